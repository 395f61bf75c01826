use std::path::Path;

use emotive::audio::FileSpeechLoader;
use emotive::batches::BatchSampler;
use emotive::cache::FeatureCache;
use emotive::collate::{Batch, BatchLabels, PaddingCollator};
use emotive::config::{ClassifierConfig, PipelineConfig};
use emotive::extract::{Label, Wav2Vec2FeatureExtractor, prepare_split};
use emotive::head::ClassificationHead;
use emotive::labels::LabelVocabulary;
use emotive::loss::ProblemType;
use emotive::metrics::{Metrics, compute_metrics};
use emotive::model::{ClassifierBundle, EncoderOutput, SpeechClassifier, SpeechEncoder};
use emotive::pooling::PoolingMode;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn write_wav(path: &Path, sample_rate_hz: u32, samples: &[i16]) {
    let data_len = (samples.len() * 2) as u32;
    let mut wav = Vec::<u8>::new();
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36u32 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&sample_rate_hz.to_le_bytes());
    wav.extend_from_slice(&(sample_rate_hz * 2).to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes());
    wav.extend_from_slice(&16u16.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    for s in samples {
        wav.extend_from_slice(&s.to_le_bytes());
    }
    std::fs::write(path, wav).expect("write wav");
}

fn tone(len: usize, amp: i16) -> Vec<i16> {
    (0..len)
        .map(|i| if i % 2 == 0 { amp } else { -amp })
        .collect()
}

/// Groups consecutive samples into `hidden`-wide frames.
struct FrameEncoder {
    hidden: usize,
}

impl SpeechEncoder for FrameEncoder {
    fn hidden_size(&self) -> usize {
        self.hidden
    }

    fn encode(&self, batch: &Batch) -> anyhow::Result<EncoderOutput> {
        let frames = batch.seq_len / self.hidden;
        let mut states = Vec::with_capacity(batch.batch_size * frames * self.hidden);
        for i in 0..batch.batch_size {
            states.extend_from_slice(&batch.row(i)[..frames * self.hidden]);
        }
        Ok(EncoderOutput {
            batch_size: batch.batch_size,
            frames,
            hidden_size: self.hidden,
            last_hidden_state: states,
        })
    }
}

#[test]
fn wav_corpus_to_loss() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();
    std::fs::create_dir_all(root.join("audio")).expect("audio dir");
    write_wav(&root.join("audio/a.wav"), 16_000, &tone(64, 8_000));
    write_wav(&root.join("audio/b.wav"), 8_000, &tone(40, 4_000));
    write_wav(&root.join("audio/c.wav"), 16_000, &tone(48, 12_000));
    write_wav(&root.join("audio/d.wav"), 16_000, &tone(32, 2_000));

    std::fs::write(
        root.join("train.csv"),
        "path\temotion\naudio/a.wav\thappy\naudio/b.wav\tsad\naudio/c.wav\tangry\n",
    )
    .expect("train index");
    std::fs::write(
        root.join("test.csv"),
        "path\temotion\naudio/a.wav\tsad\naudio/d.wav\tbored\n",
    )
    .expect("test index");
    std::fs::write(
        root.join("pipeline.json"),
        r#"{"data_files": {"train": "train.csv", "validation": "test.csv"},
            "per_device_train_batch_size": 2, "pooling_mode": "mean"}"#,
    )
    .expect("pipeline config");

    let config = PipelineConfig::from_path(root.join("pipeline.json")).expect("config");
    let splits = config.data_files.load(&config.columns).expect("splits");
    let vocabulary = LabelVocabulary::build(splits.train.labels());
    assert_eq!(vocabulary.labels(), &["angry", "happy", "sad"]);

    let cache = FeatureCache::new(&config.features_dir, config.sampling_rate, FileSpeechLoader);
    let extractor = Wav2Vec2FeatureExtractor::new(config.sampling_rate);
    let train = prepare_split(&cache, &extractor, &vocabulary, &splits.train, "train")
        .expect("train split");
    let validation = prepare_split(&cache, &extractor, &vocabulary, &splits.validation, "validation")
        .expect("validation split");

    assert!(cache.cache_path("train").is_file());
    assert!(cache.cache_path("validation").is_file());
    assert_eq!(train.records.len(), 3);
    // 8 kHz input is resampled to 16 kHz.
    assert_eq!(train.records[1].input_values.len(), 80);
    assert_eq!(train.records[1].label, Label::Class(2));
    // "bored" is not in the train vocabulary.
    assert_eq!(validation.records.len(), 1);
    assert_eq!(validation.unknown_labels, 1);

    let mut sampler = BatchSampler::new(train.records.len(), 2, false);
    sampler.start_epoch(config.seed, 0);
    let batch = sampler
        .next_batch(&train.records, &PaddingCollator::default())
        .expect("one batch")
        .expect("collate");
    assert_eq!(batch.batch_size, 2);
    assert_eq!(batch.seq_len, 80);
    assert_eq!(batch.labels, BatchLabels::Int(vec![1, 2]));

    let cfg = ClassifierConfig::for_vocabulary(8, &vocabulary, PoolingMode::Mean);
    let head = ClassificationHead::init(8, 3, cfg.final_dropout, &mut ChaCha8Rng::seed_from_u64(0));
    let model = SpeechClassifier::setup(&cfg, Box::new(FrameEncoder { hidden: 8 }), head, &batch.labels)
        .expect("setup");
    assert_eq!(model.problem_type(), ProblemType::SingleLabelClassification);

    let out = model
        .forward(&batch, Some(&batch.labels), false)
        .expect("forward");
    let loss = out.loss.expect("loss");
    assert!(loss.is_finite() && loss > 0.0);

    let label_ids = [1.0f32, 2.0];
    let metrics = compute_metrics(&out.logits, 3, &label_ids, false).expect("metrics");
    assert!(matches!(metrics, Metrics::Accuracy(a) if (0.0..=1.0).contains(&a)));

    let bundle_dir = root.join("classifier");
    ClassifierBundle {
        config: cfg.clone(),
        head: model.head().clone(),
    }
    .save_to_dir(&bundle_dir)
    .expect("save bundle");
    let loaded = ClassifierBundle::load_from_dir(&bundle_dir).expect("load bundle");
    assert_eq!(loaded.config, cfg);
}
