//! Speech classifier: encoder -> pooling -> head -> loss, and asset loading.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::collate::{Batch, BatchLabels};
use crate::config::ClassifierConfig;
use crate::head::ClassificationHead;
use crate::loss::{ProblemType, compute_loss};
use crate::math::{argmax, softmax_inplace};
use crate::pooling::PoolingMode;
use crate::tensors::TensorStore;

/// Per-frame states for a padded batch, `[batch_size, frames, hidden_size]`.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderOutput {
    pub batch_size: usize,
    pub frames: usize,
    pub hidden_size: usize,
    pub last_hidden_state: Vec<f32>,
}

/// Pretrained speech encoder.
pub trait SpeechEncoder {
    fn hidden_size(&self) -> usize;

    fn encode(&self, batch: &Batch) -> Result<EncoderOutput>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierOutput {
    pub loss: Option<f32>,
    /// `[batch_size, num_labels]`.
    pub logits: Vec<f32>,
    pub num_labels: usize,
    pub hidden_states: Option<EncoderOutput>,
}

impl ClassifierOutput {
    /// Argmax class per row.
    pub fn predictions(&self) -> Vec<usize> {
        self.logits
            .chunks_exact(self.num_labels.max(1))
            .map(|row| argmax(row).unwrap_or(0))
            .collect()
    }

    /// Row-wise softmax of the logits.
    pub fn probabilities(&self) -> Vec<f32> {
        let mut probs = self.logits.clone();
        for row in probs.chunks_exact_mut(self.num_labels.max(1)) {
            softmax_inplace(row);
        }
        probs
    }
}

pub struct SpeechClassifier {
    encoder: Box<dyn SpeechEncoder>,
    pooling: PoolingMode,
    head: ClassificationHead,
    problem_type: ProblemType,
}

impl std::fmt::Debug for SpeechClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechClassifier")
            .field("pooling", &self.pooling)
            .field("head", &self.head)
            .field("problem_type", &self.problem_type)
            .finish_non_exhaustive()
    }
}

impl SpeechClassifier {
    /// Wire the parts together and fix the problem type.
    ///
    /// A configured problem type is used as is; otherwise it is inferred from
    /// `sample_labels` (typically the first training batch).
    pub fn setup(
        config: &ClassifierConfig,
        encoder: Box<dyn SpeechEncoder>,
        head: ClassificationHead,
        sample_labels: &BatchLabels,
    ) -> Result<Self> {
        anyhow::ensure!(
            encoder.hidden_size() == config.hidden_size,
            "encoder hidden size {} != config hidden_size {}",
            encoder.hidden_size(),
            config.hidden_size
        );
        anyhow::ensure!(
            head.hidden_size() == config.hidden_size && head.num_labels() == config.num_labels,
            "head shape [{}, {}] does not match config [{}, {}]",
            head.hidden_size(),
            head.num_labels(),
            config.hidden_size,
            config.num_labels
        );
        let problem_type =
            ProblemType::resolve(config.problem_type, config.num_labels, sample_labels);
        tracing::info!(?problem_type, pooling = %config.pooling_mode, "classifier ready");
        Ok(Self {
            encoder,
            pooling: config.pooling_mode,
            head,
            problem_type,
        })
    }

    pub fn problem_type(&self) -> ProblemType {
        self.problem_type
    }

    pub fn pooling(&self) -> PoolingMode {
        self.pooling
    }

    pub fn head(&self) -> &ClassificationHead {
        &self.head
    }

    /// Pooled utterance vectors, `[batch_size, hidden_size]`.
    pub fn pooled(&self, batch: &Batch) -> Result<(Vec<f32>, EncoderOutput)> {
        let enc = self.encoder.encode(batch).context("encode batch")?;
        anyhow::ensure!(
            enc.batch_size == batch.batch_size
                && enc.hidden_size == self.head.hidden_size()
                && enc.last_hidden_state.len() == enc.batch_size * enc.frames * enc.hidden_size,
            "encoder output shape [{}, {}, {}] does not fit batch of {}",
            enc.batch_size,
            enc.frames,
            enc.hidden_size,
            batch.batch_size
        );
        let pooled = self.pooling.pool_batch(
            &enc.last_hidden_state,
            enc.batch_size,
            enc.frames,
            enc.hidden_size,
        );
        Ok((pooled, enc))
    }

    /// Inference forward; the loss is computed only when `labels` is given.
    pub fn forward(
        &self,
        batch: &Batch,
        labels: Option<&BatchLabels>,
        output_hidden_states: bool,
    ) -> Result<ClassifierOutput> {
        let (pooled, enc) = self.pooled(batch)?;
        let logits = self.head.forward(&pooled, batch.batch_size);
        self.finish(logits, enc, labels, output_hidden_states)
    }

    /// Training forward: same as [`Self::forward`] with head dropout active.
    pub fn forward_train(
        &self,
        batch: &Batch,
        labels: &BatchLabels,
        rng: &mut impl rand::Rng,
    ) -> Result<ClassifierOutput> {
        let (pooled, enc) = self.pooled(batch)?;
        let logits = self.head.forward_train(&pooled, batch.batch_size, rng);
        self.finish(logits, enc, Some(labels), false)
    }

    fn finish(
        &self,
        logits: Vec<f32>,
        enc: EncoderOutput,
        labels: Option<&BatchLabels>,
        output_hidden_states: bool,
    ) -> Result<ClassifierOutput> {
        let num_labels = self.head.num_labels();
        let loss = labels
            .map(|l| compute_loss(self.problem_type, &logits, num_labels, l))
            .transpose()
            .context("compute loss")?;
        Ok(ClassifierOutput {
            loss,
            logits,
            num_labels,
            hidden_states: output_hidden_states.then_some(enc),
        })
    }
}

fn config_path(dir: &Path) -> PathBuf {
    dir.join("config.json")
}

fn head_path(dir: &Path) -> PathBuf {
    dir.join("classifier.safetensors")
}

/// Classifier assets in a directory: `config.json` + `classifier.safetensors`.
#[derive(Debug)]
pub struct ClassifierBundle {
    pub config: ClassifierConfig,
    pub head: ClassificationHead,
}

impl ClassifierBundle {
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let config = ClassifierConfig::from_path(config_path(dir)).context("load config.json")?;
        let store = TensorStore::open(head_path(dir)).context("open classifier.safetensors")?;
        let head = ClassificationHead::from_store(
            &store,
            config.hidden_size,
            config.num_labels,
            config.final_dropout,
        )
        .context("load classifier weights")?;
        Ok(Self { config, head })
    }

    pub fn save_to_dir(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        std::fs::write(config_path(dir), self.config.to_json_string()?)
            .context("write config.json")?;
        self.head
            .save(head_path(dir))
            .context("write classifier.safetensors")?;
        Ok(())
    }
}
