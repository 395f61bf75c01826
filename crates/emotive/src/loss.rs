//! Problem-type resolution and loss computation.

use serde::{Deserialize, Serialize};

use crate::collate::BatchLabels;
use crate::math::{log_sum_exp, softplus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemType {
    Regression,
    SingleLabelClassification,
    MultiLabelClassification,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LossError {
    #[error("logits have {got} values, expected {expected} ({rows} rows x {num_labels} labels)")]
    LogitShape {
        got: usize,
        expected: usize,
        rows: usize,
        num_labels: usize,
    },
    #[error("{problem:?} needs {expected} labels, got {got}")]
    LabelShape {
        problem: ProblemType,
        got: usize,
        expected: usize,
    },
    #[error("{problem:?} cannot use {kind} labels")]
    LabelKind {
        problem: ProblemType,
        kind: &'static str,
    },
    #[error("class id {id} out of range for {num_labels} labels")]
    ClassOutOfRange { id: i64, num_labels: usize },
}

impl ProblemType {
    /// One output -> regression; integer labels -> single-label; otherwise multi-label.
    pub fn infer(num_labels: usize, labels: &BatchLabels) -> Self {
        if num_labels == 1 {
            Self::Regression
        } else if matches!(labels, BatchLabels::Int(_)) {
            Self::SingleLabelClassification
        } else {
            Self::MultiLabelClassification
        }
    }

    /// Configured value if present, else inferred.
    pub fn resolve(configured: Option<Self>, num_labels: usize, labels: &BatchLabels) -> Self {
        configured.unwrap_or_else(|| Self::infer(num_labels, labels))
    }
}

/// Mean loss over the batch for `logits` of shape `[rows, num_labels]`.
pub fn compute_loss(
    problem: ProblemType,
    logits: &[f32],
    num_labels: usize,
    labels: &BatchLabels,
) -> Result<f32, LossError> {
    let rows = labels.rows();
    if logits.len() != rows * num_labels {
        return Err(LossError::LogitShape {
            got: logits.len(),
            expected: rows * num_labels,
            rows,
            num_labels,
        });
    }
    if rows == 0 {
        return Ok(0.0);
    }

    match problem {
        ProblemType::Regression => {
            let targets = float_targets(problem, labels, logits.len())?;
            Ok(mse(logits, &targets))
        }
        ProblemType::SingleLabelClassification => {
            let BatchLabels::Int(ids) = labels else {
                return Err(LossError::LabelKind {
                    problem,
                    kind: "float",
                });
            };
            cross_entropy(logits, num_labels, ids)
        }
        ProblemType::MultiLabelClassification => {
            let targets = float_targets(problem, labels, logits.len())?;
            Ok(bce_with_logits(logits, &targets))
        }
    }
}

fn float_targets(
    problem: ProblemType,
    labels: &BatchLabels,
    expected: usize,
) -> Result<Vec<f32>, LossError> {
    let targets: Vec<f32> = match labels {
        BatchLabels::Float { values, .. } => values.clone(),
        BatchLabels::Int(ids) => ids.iter().map(|&i| i as f32).collect(),
    };
    if targets.len() != expected {
        return Err(LossError::LabelShape {
            problem,
            got: targets.len(),
            expected,
        });
    }
    Ok(targets)
}

pub fn mse(pred: &[f32], target: &[f32]) -> f32 {
    debug_assert_eq!(pred.len(), target.len());
    if pred.is_empty() {
        return 0.0;
    }
    let sum: f32 = pred
        .iter()
        .zip(target)
        .map(|(p, t)| (p - t) * (p - t))
        .sum();
    sum / pred.len() as f32
}

pub fn cross_entropy(logits: &[f32], num_labels: usize, targets: &[i64]) -> Result<f32, LossError> {
    let mut total = 0.0f32;
    for (row, &t) in logits.chunks_exact(num_labels).zip(targets) {
        let idx = usize::try_from(t)
            .ok()
            .filter(|&i| i < num_labels)
            .ok_or(LossError::ClassOutOfRange { id: t, num_labels })?;
        total += log_sum_exp(row) - row[idx];
    }
    Ok(total / targets.len() as f32)
}

pub fn bce_with_logits(logits: &[f32], targets: &[f32]) -> f32 {
    debug_assert_eq!(logits.len(), targets.len());
    if logits.is_empty() {
        return 0.0;
    }
    // -(y*log(sigmoid(x)) + (1-y)*log(1-sigmoid(x))) == softplus(x) - x*y
    let sum: f32 = logits
        .iter()
        .zip(targets)
        .map(|(&x, &y)| softplus(x) - x * y)
        .sum();
    sum / logits.len() as f32
}

#[cfg(test)]
mod tests {
    use super::{LossError, ProblemType, compute_loss};
    use crate::collate::BatchLabels;

    fn floats(values: Vec<f32>, width: usize) -> BatchLabels {
        BatchLabels::Float { values, width }
    }

    #[test]
    fn infers_problem_type_from_cardinality_and_dtype() {
        assert_eq!(
            ProblemType::infer(1, &floats(vec![0.5, 1.5], 1)),
            ProblemType::Regression
        );
        assert_eq!(
            ProblemType::infer(4, &BatchLabels::Int(vec![0, 2, 1])),
            ProblemType::SingleLabelClassification
        );
        assert_eq!(
            ProblemType::infer(4, &floats(vec![1.0, 0.0, 1.0, 0.0], 4)),
            ProblemType::MultiLabelClassification
        );
        assert_eq!(
            ProblemType::resolve(
                Some(ProblemType::Regression),
                4,
                &BatchLabels::Int(vec![0])
            ),
            ProblemType::Regression
        );
    }

    #[test]
    fn regression_is_mse() {
        let loss = compute_loss(
            ProblemType::Regression,
            &[1.0, 3.0],
            1,
            &floats(vec![0.0, 1.0], 1),
        )
        .expect("loss");
        assert!((loss - 2.5).abs() < 1e-6);
    }

    #[test]
    fn single_label_is_cross_entropy() {
        // Uniform logits: CE = ln(C).
        let logits = vec![0.0f32; 3 * 4];
        let loss = compute_loss(
            ProblemType::SingleLabelClassification,
            &logits,
            4,
            &BatchLabels::Int(vec![0, 2, 1]),
        )
        .expect("loss");
        assert!((loss - 4f32.ln()).abs() < 1e-5);

        let confident = [10.0f32, 0.0, 0.0, 0.0];
        let low = compute_loss(
            ProblemType::SingleLabelClassification,
            &confident,
            4,
            &BatchLabels::Int(vec![0]),
        )
        .expect("loss");
        assert!(low < 1e-3);
    }

    #[test]
    fn multi_label_is_bce_with_logits() {
        let loss = compute_loss(
            ProblemType::MultiLabelClassification,
            &[0.0, 0.0],
            2,
            &floats(vec![1.0, 0.0], 2),
        )
        .expect("loss");
        assert!((loss - 2f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn rejects_bad_shapes_and_ids() {
        let err = compute_loss(
            ProblemType::SingleLabelClassification,
            &[0.0; 3],
            4,
            &BatchLabels::Int(vec![0]),
        )
        .expect_err("shape");
        assert!(matches!(err, LossError::LogitShape { .. }));

        let err = compute_loss(
            ProblemType::SingleLabelClassification,
            &[0.0; 4],
            4,
            &BatchLabels::Int(vec![-1]),
        )
        .expect_err("unknown label id");
        assert_eq!(err, LossError::ClassOutOfRange { id: -1, num_labels: 4 });
    }
}
