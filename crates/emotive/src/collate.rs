//! Dynamic padding collator.
//!
//! Each batch is right-padded to its own longest record, never to a global
//! maximum.

use crate::extract::{Label, ProcessedRecord};

/// Stacked labels for one batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchLabels {
    /// One class id per row.
    Int(Vec<i64>),
    /// `[rows, width]` float targets (regression or multi-hot).
    Float { values: Vec<f32>, width: usize },
}

impl BatchLabels {
    pub fn rows(&self) -> usize {
        match self {
            Self::Int(ids) => ids.len(),
            Self::Float { values, width } => {
                if *width == 0 {
                    0
                } else {
                    values.len() / width
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub batch_size: usize,
    pub seq_len: usize,
    /// `[batch_size, seq_len]` row-major.
    pub input_values: Vec<f32>,
    /// `[batch_size, seq_len]`, 1 for real samples and 0 for padding.
    pub attention_mask: Vec<u8>,
    pub labels: BatchLabels,
}

impl Batch {
    pub fn row(&self, i: usize) -> &[f32] {
        &self.input_values[i * self.seq_len..(i + 1) * self.seq_len]
    }

    pub fn mask_row(&self, i: usize) -> &[u8] {
        &self.attention_mask[i * self.seq_len..(i + 1) * self.seq_len]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollateError {
    #[error("cannot collate an empty batch")]
    Empty,
    #[error("record {index} mixes class and float labels")]
    MixedLabels { index: usize },
    #[error("record {index} has label width {got}, expected {expected}")]
    LabelWidth {
        index: usize,
        got: usize,
        expected: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaddingCollator {
    pub padding_value: f32,
    /// Round the padded length up to a multiple of this.
    pub pad_to_multiple_of: Option<usize>,
    /// Truncate longer records to this many samples.
    pub max_length: Option<usize>,
}

impl Default for PaddingCollator {
    fn default() -> Self {
        Self {
            padding_value: 0.0,
            pad_to_multiple_of: None,
            max_length: None,
        }
    }
}

impl PaddingCollator {
    pub fn padded_len(&self, longest: usize) -> usize {
        let len = self.max_length.map_or(longest, |m| longest.min(m));
        match self.pad_to_multiple_of {
            Some(m) if m > 1 => len.div_ceil(m) * m,
            _ => len,
        }
    }

    pub fn collate(&self, records: &[&ProcessedRecord]) -> Result<Batch, CollateError> {
        if records.is_empty() {
            return Err(CollateError::Empty);
        }

        let longest = records
            .iter()
            .map(|r| r.input_values.len())
            .max()
            .unwrap_or(0);
        let seq_len = self.padded_len(longest);
        let batch_size = records.len();

        let mut input_values = vec![self.padding_value; batch_size * seq_len];
        let mut attention_mask = vec![0u8; batch_size * seq_len];
        for (i, r) in records.iter().enumerate() {
            let n = r.input_values.len().min(seq_len);
            let row = i * seq_len;
            input_values[row..row + n].copy_from_slice(&r.input_values[..n]);
            attention_mask[row..row + n].fill(1);
        }

        Ok(Batch {
            batch_size,
            seq_len,
            input_values,
            attention_mask,
            labels: stack_labels(records)?,
        })
    }

    pub fn collate_owned(&self, records: &[ProcessedRecord]) -> Result<Batch, CollateError> {
        let refs: Vec<&ProcessedRecord> = records.iter().collect();
        self.collate(&refs)
    }
}

/// Integer stacking for class ids, float stacking otherwise.
fn stack_labels(records: &[&ProcessedRecord]) -> Result<BatchLabels, CollateError> {
    if let Label::Class(_) = records[0].label {
        let mut ids = Vec::with_capacity(records.len());
        for (index, r) in records.iter().enumerate() {
            let Label::Class(c) = r.label else {
                return Err(CollateError::MixedLabels { index });
            };
            ids.push(c as i64);
        }
        return Ok(BatchLabels::Int(ids));
    }

    let width = label_width(&records[0].label);
    let mut values = Vec::with_capacity(records.len() * width);
    for (index, r) in records.iter().enumerate() {
        match &r.label {
            Label::Class(_) => return Err(CollateError::MixedLabels { index }),
            Label::Value(v) if width == 1 => values.push(*v),
            Label::MultiHot(v) if v.len() == width => values.extend_from_slice(v),
            other => {
                return Err(CollateError::LabelWidth {
                    index,
                    got: label_width(other),
                    expected: width,
                });
            }
        }
    }
    Ok(BatchLabels::Float { values, width })
}

fn label_width(label: &Label) -> usize {
    match label {
        Label::Class(_) | Label::Value(_) => 1,
        Label::MultiHot(v) => v.len(),
    }
}
