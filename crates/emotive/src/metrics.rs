//! Evaluation metrics over accumulated predictions.

use serde::Serialize;

use crate::math::argmax;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metrics {
    Accuracy(f32),
    Mse(f32),
}

impl Metrics {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Accuracy(_) => "accuracy",
            Self::Mse(_) => "mse",
        }
    }

    pub fn value(&self) -> f32 {
        match self {
            Self::Accuracy(v) | Self::Mse(v) => *v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricsError {
    #[error("{got} prediction values do not fit {rows} rows x {num_labels} labels")]
    Shape {
        got: usize,
        rows: usize,
        num_labels: usize,
    },
}

/// Accuracy of argmax predictions or, for regression, MSE of the squeezed
/// predictions against `label_ids`.
///
/// `predictions` is `[rows, num_labels]` with `rows == label_ids.len()`.
pub fn compute_metrics(
    predictions: &[f32],
    num_labels: usize,
    label_ids: &[f32],
    is_regression: bool,
) -> Result<Metrics, MetricsError> {
    let rows = label_ids.len();
    if num_labels == 0 || predictions.len() != rows * num_labels {
        return Err(MetricsError::Shape {
            got: predictions.len(),
            rows,
            num_labels,
        });
    }
    if rows == 0 {
        return Ok(if is_regression {
            Metrics::Mse(0.0)
        } else {
            Metrics::Accuracy(0.0)
        });
    }

    if is_regression {
        let sum: f32 = predictions
            .chunks_exact(num_labels)
            .zip(label_ids)
            .map(|(p, &y)| (p[0] - y) * (p[0] - y))
            .sum();
        return Ok(Metrics::Mse(sum / rows as f32));
    }

    let correct = predictions
        .chunks_exact(num_labels)
        .zip(label_ids)
        .filter(|(p, y)| argmax(p).map(|i| i as f32) == Some(**y))
        .count();
    Ok(Metrics::Accuracy(correct as f32 / rows as f32))
}
