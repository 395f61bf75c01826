//! Feature extraction adapter: cached waveforms + labels -> model-ready records.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::audio::SpeechLoader;
use crate::cache::FeatureCache;
use crate::constants::NORMALIZE_EPS;
use crate::dataset::Dataset;
use crate::labels::{LabelId, LabelVocabulary};

/// Output of a feature extractor for one utterance.
///
/// Extractors occasionally hand back a nested `[rows, samples]` array for an
/// utterance instead of a flat one.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValues {
    Flat(Vec<f32>),
    Nested(Vec<Vec<f32>>),
}

/// Batch feature-extraction primitive.
pub trait FeatureExtractor {
    fn sampling_rate(&self) -> u32;

    fn extract(&self, waveforms: &[Vec<f32>], sampling_rate: u32) -> Result<Vec<FeatureValues>>;
}

/// Wav2vec2-style extractor: per-utterance zero-mean, unit-variance normalization.
#[derive(Debug, Clone, Copy)]
pub struct Wav2Vec2FeatureExtractor {
    pub sampling_rate: u32,
    pub do_normalize: bool,
}

impl Wav2Vec2FeatureExtractor {
    pub fn new(sampling_rate: u32) -> Self {
        Self {
            sampling_rate,
            do_normalize: true,
        }
    }
}

pub fn zero_mean_unit_var(samples: &[f32]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let n = samples.len() as f32;
    let mean = samples.iter().sum::<f32>() / n;
    let var = samples.iter().map(|&x| (x - mean) * (x - mean)).sum::<f32>() / n;
    let denom = (var + NORMALIZE_EPS).sqrt();
    samples.iter().map(|&x| (x - mean) / denom).collect()
}

impl FeatureExtractor for Wav2Vec2FeatureExtractor {
    fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    fn extract(&self, waveforms: &[Vec<f32>], sampling_rate: u32) -> Result<Vec<FeatureValues>> {
        anyhow::ensure!(
            sampling_rate == self.sampling_rate,
            "extractor expects {} Hz input, got {} Hz",
            self.sampling_rate,
            sampling_rate
        );
        Ok(waveforms
            .iter()
            .map(|w| {
                if self.do_normalize {
                    FeatureValues::Flat(zero_mean_unit_var(w))
                } else {
                    FeatureValues::Flat(w.clone())
                }
            })
            .collect())
    }
}

/// Collapse extractor output to a flat vector.
///
/// A nested value keeps its first row, or is empty if it has none.
// TODO: find which inputs make the extractor emit nested rows; multi-channel
// audio is the suspect, in which case averaging rows would be the better fix.
pub fn flatten_nested(values: FeatureValues) -> Vec<f32> {
    match values {
        FeatureValues::Flat(v) => v,
        FeatureValues::Nested(rows) => rows.into_iter().next().unwrap_or_default(),
    }
}

/// Training target attached to a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Label {
    Class(usize),
    Value(f32),
    MultiHot(Vec<f32>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedRecord {
    pub input_values: Vec<f32>,
    pub label: Label,
}

#[derive(Debug, Clone)]
pub struct PreparedSplit {
    pub records: Vec<ProcessedRecord>,
    /// Rows dropped because their label is not in the vocabulary.
    ///
    /// On an eval split these rows can never be predicted correctly; accuracy
    /// over `records` alone overstates accuracy over the whole index. Use
    /// [`PreparedSplit::accuracy_over_source_rows`] to count them as misses.
    pub unknown_labels: usize,
    /// Rows whose extractor output had to be flattened.
    pub flattened: usize,
}

impl PreparedSplit {
    /// Rows in the index before unknown labels were dropped.
    pub fn source_rows(&self) -> usize {
        self.records.len() + self.unknown_labels
    }

    /// Rescale accuracy measured on `records` to all source rows, scoring
    /// every dropped row as a miss.
    pub fn accuracy_over_source_rows(&self, accuracy: f32) -> f32 {
        let total = self.source_rows();
        if total == 0 {
            return 0.0;
        }
        accuracy * self.records.len() as f32 / total as f32
    }
}

/// Run cache -> extractor -> flatten -> label encoding for one split.
///
/// Rows with a label outside the vocabulary are dropped and counted.
pub fn prepare_split<L, E>(
    cache: &FeatureCache<L>,
    extractor: &E,
    vocabulary: &LabelVocabulary,
    dataset: &Dataset,
    split: &str,
) -> Result<PreparedSplit>
where
    L: SpeechLoader,
    E: FeatureExtractor + ?Sized,
{
    let paths: Vec<PathBuf> = dataset.records().iter().map(|r| r.path.clone()).collect();
    let waveforms = cache
        .load_or_build(&paths, split)
        .with_context(|| format!("build feature cache for split {split}"))?;
    anyhow::ensure!(
        waveforms.len() == paths.len(),
        "feature cache returned {} waveforms for {} paths",
        waveforms.len(),
        paths.len()
    );

    let features = extractor
        .extract(&waveforms, cache.target_hz())
        .with_context(|| format!("extract features for split {split}"))?;
    anyhow::ensure!(
        features.len() == waveforms.len(),
        "extractor returned {} feature rows for {} waveforms",
        features.len(),
        waveforms.len()
    );

    let encoded = vocabulary.encode_all(dataset.records().iter().map(|r| r.emotion.as_str()));
    if encoded.unknown > 0 {
        tracing::warn!(split, unknown = encoded.unknown, "labels outside the vocabulary, rows dropped");
    }

    let mut flattened = 0usize;
    let mut records = Vec::with_capacity(features.len());
    for (index, (values, id)) in features.into_iter().zip(encoded.ids).enumerate() {
        if matches!(values, FeatureValues::Nested(_)) {
            tracing::warn!(split, index, "nested extractor output flattened");
            flattened += 1;
        }
        let input_values = flatten_nested(values);
        if let LabelId::Known(class) = id {
            records.push(ProcessedRecord {
                input_values,
                label: Label::Class(class),
            });
        }
    }

    Ok(PreparedSplit {
        records,
        unknown_labels: encoded.unknown,
        flattened,
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{
        FeatureExtractor, FeatureValues, Label, Wav2Vec2FeatureExtractor, flatten_nested,
        prepare_split, zero_mean_unit_var,
    };
    use crate::audio::{AudioError, SpeechLoader};
    use crate::cache::FeatureCache;
    use crate::dataset::{Dataset, Utterance};
    use crate::labels::LabelVocabulary;

    struct RampLoader;

    impl SpeechLoader for RampLoader {
        fn load(&self, path: &Path, _target_hz: u32) -> Result<Vec<f32>, AudioError> {
            let n = std::fs::metadata(path)
                .map_err(|source| AudioError::Read {
                    path: path.to_path_buf(),
                    source,
                })?
                .len() as usize;
            Ok((0..n).map(|i| i as f32).collect())
        }
    }

    /// Emits a nested value for the second waveform.
    struct QuirkyExtractor;

    impl FeatureExtractor for QuirkyExtractor {
        fn sampling_rate(&self) -> u32 {
            16_000
        }

        fn extract(
            &self,
            waveforms: &[Vec<f32>],
            _sampling_rate: u32,
        ) -> anyhow::Result<Vec<FeatureValues>> {
            Ok(waveforms
                .iter()
                .enumerate()
                .map(|(i, w)| {
                    if i == 1 {
                        FeatureValues::Nested(vec![w.clone(), vec![9.0; w.len()]])
                    } else {
                        FeatureValues::Flat(w.clone())
                    }
                })
                .collect())
        }
    }

    #[test]
    fn normalization_is_zero_mean_unit_variance() {
        let out = zero_mean_unit_var(&[1.0, 2.0, 3.0, 4.0]);
        let mean: f32 = out.iter().sum::<f32>() / 4.0;
        let var: f32 = out.iter().map(|x| x * x).sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-6);
        assert!((var - 1.0).abs() < 1e-4);
        assert!(zero_mean_unit_var(&[]).is_empty());
        // Constant input stays finite.
        assert!(zero_mean_unit_var(&[0.5; 8]).iter().all(|v| v.is_finite()));
    }

    #[test]
    fn extractor_rejects_wrong_rate() {
        let fx = Wav2Vec2FeatureExtractor::new(16_000);
        assert!(fx.extract(&[vec![0.0; 4]], 8_000).is_err());
        let out = fx.extract(&[vec![0.0, 2.0]], 16_000).expect("extract");
        let FeatureValues::Flat(v) = &out[0] else {
            panic!("expected flat output");
        };
        assert!((v[0] + 1.0).abs() < 1e-5 && (v[1] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn flatten_keeps_first_row() {
        assert_eq!(flatten_nested(FeatureValues::Flat(vec![1.0])), vec![1.0]);
        assert_eq!(
            flatten_nested(FeatureValues::Nested(vec![vec![1.0, 2.0], vec![3.0, 4.0]])),
            vec![1.0, 2.0]
        );
        assert!(flatten_nested(FeatureValues::Nested(vec![])).is_empty());
    }

    #[test]
    fn prepare_split_attaches_labels_and_flattens() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut utterances = Vec::new();
        for (i, (len, emotion)) in [(3usize, "sad"), (2, "happy"), (4, "bored"), (1, "angry")]
            .into_iter()
            .enumerate()
        {
            let p = dir.path().join(format!("u{i}.wav"));
            std::fs::write(&p, vec![0u8; len]).expect("write");
            utterances.push(Utterance {
                path: p,
                emotion: emotion.to_string(),
            });
        }
        let dataset = Dataset::from_records(utterances);
        let vocab = LabelVocabulary::build(["angry", "happy", "sad"]);
        let cache = FeatureCache::new(dir.path().join("features"), 16_000, RampLoader);

        let prepared =
            prepare_split(&cache, &QuirkyExtractor, &vocab, &dataset, "train").expect("prepare");
        assert_eq!(prepared.unknown_labels, 1);
        assert_eq!(prepared.flattened, 1);
        assert_eq!(prepared.records.len(), 3);

        assert_eq!(prepared.records[0].input_values, vec![0.0, 1.0, 2.0]);
        assert_eq!(prepared.records[0].label, Label::Class(2));
        assert_eq!(prepared.records[1].input_values, vec![0.0, 1.0]);
        assert_eq!(prepared.records[1].label, Label::Class(1));
        assert_eq!(prepared.records[2].label, Label::Class(0));

        // 3 of 3 kept rows right is 3 of 4 source rows right.
        assert_eq!(prepared.source_rows(), 4);
        assert!((prepared.accuracy_over_source_rows(1.0) - 0.75).abs() < 1e-6);
    }
}
