//! Label vocabulary: sorted distinct training labels and their dense ids.

use std::collections::{BTreeMap, BTreeSet};

use crate::constants::UNKNOWN_LABEL_ID;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelId {
    Known(usize),
    Unknown,
}

impl LabelId {
    pub fn known(self) -> Option<usize> {
        match self {
            Self::Known(id) => Some(id),
            Self::Unknown => None,
        }
    }

    /// Dense id, or `-1` for a label outside the vocabulary.
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Known(id) => id as i64,
            Self::Unknown => UNKNOWN_LABEL_ID,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelVocabulary {
    labels: Vec<String>,
}

/// Result of encoding a whole label column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedLabels {
    pub ids: Vec<LabelId>,
    pub unknown: usize,
}

impl LabelVocabulary {
    /// Sorted (lexicographic), deduplicated vocabulary of `labels`.
    pub fn build<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set: BTreeSet<String> = labels
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        Self {
            labels: set.into_iter().collect(),
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label_to_id(&self, label: &str) -> LabelId {
        match self.labels.binary_search_by(|l| l.as_str().cmp(label)) {
            Ok(id) => LabelId::Known(id),
            Err(_) => LabelId::Unknown,
        }
    }

    pub fn id_to_label(&self, id: usize) -> Option<&str> {
        self.labels.get(id).map(String::as_str)
    }

    pub fn label2id(&self) -> BTreeMap<String, usize> {
        self.labels
            .iter()
            .enumerate()
            .map(|(i, l)| (l.clone(), i))
            .collect()
    }

    pub fn id2label(&self) -> BTreeMap<usize, String> {
        self.labels.iter().cloned().enumerate().collect()
    }

    pub fn encode_all<I, S>(&self, labels: I) -> EncodedLabels
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: Vec<LabelId> = labels
            .into_iter()
            .map(|l| self.label_to_id(l.as_ref()))
            .collect();
        let unknown = ids.iter().filter(|id| **id == LabelId::Unknown).count();
        EncodedLabels { ids, unknown }
    }
}
