use emotive::audio::FileSpeechLoader;
use emotive::cache::FeatureCache;
use emotive::collate::PaddingCollator;
use emotive::config::PipelineConfig;
use emotive::extract::{Wav2Vec2FeatureExtractor, prepare_split};
use emotive::labels::LabelVocabulary;

/// Optional integration test over a real corpus.
///
/// Run locally with:
/// `EMOTIVE_DATA_CONFIG=/path/to/pipeline.json cargo test -p emotive --test e2e_data_env -- --nocapture`
#[test]
fn data_config_env_smoke() {
    let Some(config_path) = std::env::var_os("EMOTIVE_DATA_CONFIG") else {
        eprintln!("skipping: EMOTIVE_DATA_CONFIG is not set");
        return;
    };

    let config = PipelineConfig::from_path(&config_path).expect("load pipeline config");
    let splits = config
        .data_files
        .load(&config.columns)
        .expect("load data files");
    let vocabulary = LabelVocabulary::build(splits.train.labels());
    assert!(vocabulary.len() > 1, "expected several emotion classes");

    let cache = FeatureCache::new(&config.features_dir, config.sampling_rate, FileSpeechLoader);
    let extractor = Wav2Vec2FeatureExtractor::new(config.sampling_rate);
    let prepared = prepare_split(&cache, &extractor, &vocabulary, &splits.validation, "validation")
        .expect("prepare validation split");
    assert_eq!(
        prepared.records.len() + prepared.unknown_labels,
        splits.validation.len()
    );

    // Second pass must come from the cache and agree with the first.
    let again = prepare_split(&cache, &extractor, &vocabulary, &splits.validation, "validation")
        .expect("reload validation split");
    assert_eq!(again.records, prepared.records);

    let take = prepared.records.len().min(config.per_device_eval_batch_size);
    if take > 0 {
        let batch = PaddingCollator::default()
            .collate_owned(&prepared.records[..take])
            .expect("collate");
        let longest = prepared.records[..take]
            .iter()
            .map(|r| r.input_values.len())
            .max()
            .unwrap_or(0);
        assert_eq!(batch.seq_len, longest);
    }
}
