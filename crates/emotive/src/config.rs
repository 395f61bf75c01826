//! Classifier (`config.json`) and pipeline (`pipeline.json`) configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants::TARGET_SAMPLE_RATE_HZ;
use crate::dataset::{Columns, DataFiles};
use crate::labels::LabelVocabulary;
use crate::loss::ProblemType;
use crate::pooling::PoolingMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub hidden_size: usize,
    pub num_labels: usize,
    #[serde(default = "default_final_dropout")]
    pub final_dropout: f32,
    #[serde(default)]
    pub pooling_mode: PoolingMode,
    #[serde(default)]
    pub problem_type: Option<ProblemType>,
    #[serde(default)]
    pub label2id: BTreeMap<String, usize>,
    #[serde(default)]
    pub id2label: BTreeMap<usize, String>,
    #[serde(default)]
    pub finetuning_task: Option<String>,
}

fn default_final_dropout() -> f32 {
    0.1
}

impl ClassifierConfig {
    /// Config for a classification run over `vocabulary`.
    pub fn for_vocabulary(
        hidden_size: usize,
        vocabulary: &LabelVocabulary,
        pooling_mode: PoolingMode,
    ) -> Self {
        Self {
            hidden_size,
            num_labels: vocabulary.len(),
            final_dropout: default_final_dropout(),
            pooling_mode,
            problem_type: None,
            label2id: vocabulary.label2id(),
            id2label: vocabulary.id2label(),
            finetuning_task: Some("wav2vec2_clf".to_string()),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("parse config.json")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        let json = std::fs::read_to_string(path_ref)
            .with_context(|| format!("read {}", path_ref.display()))?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("serialize config.json")
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.hidden_size > 0, "hidden_size must be > 0");
        anyhow::ensure!(self.num_labels > 0, "num_labels must be > 0");
        anyhow::ensure!(
            (0.0..1.0).contains(&self.final_dropout),
            "final_dropout must be in [0, 1)"
        );
        if !self.id2label.is_empty() {
            anyhow::ensure!(
                self.id2label.len() == self.num_labels,
                "id2label has {} entries for {} labels",
                self.id2label.len(),
                self.num_labels
            );
        }
        for (label, id) in &self.label2id {
            anyhow::ensure!(
                self.id2label.get(id) == Some(label),
                "label2id[{label}] = {id} disagrees with id2label"
            );
        }
        if self.problem_type == Some(ProblemType::Regression) {
            anyhow::ensure!(self.num_labels == 1, "regression needs num_labels == 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PipelineConfig {
    pub data_files: DataFiles,
    #[serde(default)]
    pub columns: Columns,
    #[serde(default = "default_features_dir")]
    pub features_dir: PathBuf,
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: u32,
    #[serde(default = "default_batch_size")]
    pub per_device_train_batch_size: usize,
    #[serde(default = "default_batch_size")]
    pub per_device_eval_batch_size: usize,
    #[serde(default)]
    pub pad_to_multiple_of: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub pooling_mode: PoolingMode,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_features_dir() -> PathBuf {
    PathBuf::from("features")
}

fn default_sampling_rate() -> u32 {
    TARGET_SAMPLE_RATE_HZ
}

fn default_batch_size() -> usize {
    4
}

fn default_seed() -> u64 {
    42
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("parse pipeline config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load and resolve relative paths against the config file's directory.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        let json = std::fs::read_to_string(path_ref)
            .with_context(|| format!("read {}", path_ref.display()))?;
        let mut config = Self::from_json_str(&json)?;
        if let Some(base) = path_ref.parent() {
            config.data_files.train = base.join(&config.data_files.train);
            config.data_files.validation = base.join(&config.data_files.validation);
            config.features_dir = base.join(&config.features_dir);
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.sampling_rate > 0, "sampling_rate must be > 0");
        anyhow::ensure!(
            self.per_device_train_batch_size > 0 && self.per_device_eval_batch_size > 0,
            "batch sizes must be > 0"
        );
        Ok(())
    }
}
