use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use emotive::audio::FileSpeechLoader;
use emotive::batches::BatchSampler;
use emotive::cache::FeatureCache;
use emotive::collate::PaddingCollator;
use emotive::config::{ClassifierConfig, PipelineConfig};
use emotive::extract::{Wav2Vec2FeatureExtractor, prepare_split};
use emotive::head::ClassificationHead;
use emotive::labels::LabelVocabulary;
use emotive::loss::ProblemType;
use emotive::metrics::compute_metrics;
use emotive::model::ClassifierBundle;
use emotive::tensors::TensorStore;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

#[derive(Debug, Parser)]
#[command(name = "emotive")]
#[command(about = "Speech emotion classification data path and head", long_about = None)]
struct Args {
    /// Pipeline config (data files, columns, cache dir, batch sizes, seed).
    ///
    /// Relative index paths resolve against the config's directory; relative
    /// audio paths inside an index resolve against that index's directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Load both splits and report sizes and the label vocabulary.
    #[arg(long, default_value_t = false)]
    inspect_data: bool,

    /// Build (or reuse) the feature caches and collate the first train batch.
    #[arg(long, default_value_t = false)]
    prepare: bool,

    /// Write config.json + a freshly initialized head for this encoder width to --model-dir.
    #[arg(long)]
    init_head: Option<usize>,

    /// Classifier directory with config.json / classifier.safetensors.
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Validate classifier assets without touching any data.
    #[arg(long, default_value_t = false)]
    inspect_head: bool,

    /// Safetensors file with `predictions` [N, C] and `label_ids` [N] to score.
    #[arg(long)]
    evaluate: Option<PathBuf>,

    /// Treat --evaluate input as regression output (MSE instead of accuracy).
    #[arg(long, default_value_t = false)]
    regression: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let modes = u32::from(args.inspect_data)
        + u32::from(args.prepare)
        + u32::from(args.init_head.is_some())
        + u32::from(args.inspect_head)
        + u32::from(args.evaluate.is_some());
    if modes != 1 {
        anyhow::bail!(
            "choose exactly one mode: --inspect-data, --prepare, --init-head, --inspect-head, or --evaluate"
        );
    }

    if args.inspect_head {
        let model_dir = args
            .model_dir
            .as_ref()
            .context("--inspect-head requires --model-dir")?;
        return inspect_head(model_dir);
    }

    if let Some(path) = &args.evaluate {
        return evaluate(path, args.regression);
    }

    let config_path = args.config.as_ref().context("this mode requires --config")?;
    let config = PipelineConfig::from_path(config_path).context("load pipeline config")?;
    tracing::debug!(?config, "pipeline config loaded");

    if let Some(hidden_size) = args.init_head {
        let model_dir = args
            .model_dir
            .as_ref()
            .context("--init-head requires --model-dir")?;
        return init_head(&config, hidden_size, model_dir);
    }

    if args.prepare {
        return prepare(&config);
    }

    inspect_data(&config)
}

fn train_vocabulary(config: &PipelineConfig) -> Result<(LabelVocabulary, emotive::dataset::Splits)> {
    let splits = config
        .data_files
        .load(&config.columns)
        .context("load data files")?;
    let vocabulary = LabelVocabulary::build(splits.train.labels());
    anyhow::ensure!(
        !vocabulary.is_empty(),
        "train split has no labels in column `{}`",
        config.columns.label
    );
    Ok((vocabulary, splits))
}

fn inspect_data(config: &PipelineConfig) -> Result<()> {
    let (vocabulary, splits) = train_vocabulary(config)?;
    eprintln!(
        "data ok: train={} validation={} num_labels={} labels={:?}",
        splits.train.len(),
        splits.validation.len(),
        vocabulary.len(),
        vocabulary.labels()
    );
    let unseen = vocabulary
        .encode_all(splits.validation.labels())
        .unknown;
    if unseen > 0 {
        eprintln!("validation rows with labels not seen in train: {unseen}");
    }
    Ok(())
}

fn prepare(config: &PipelineConfig) -> Result<()> {
    let (vocabulary, splits) = train_vocabulary(config)?;
    let cache = FeatureCache::new(&config.features_dir, config.sampling_rate, FileSpeechLoader);
    let extractor = Wav2Vec2FeatureExtractor::new(config.sampling_rate);

    let train = prepare_split(&cache, &extractor, &vocabulary, &splits.train, "train")?;
    let validation = prepare_split(
        &cache,
        &extractor,
        &vocabulary,
        &splits.validation,
        "validation",
    )?;
    eprintln!(
        "prepared: train={} (unknown={}, flattened={}) validation={} (unknown={}, flattened={})",
        train.records.len(),
        train.unknown_labels,
        train.flattened,
        validation.records.len(),
        validation.unknown_labels,
        validation.flattened
    );
    if validation.unknown_labels > 0 {
        eprintln!(
            "validation accuracy covers {} of {} rows; use accuracy_over_source_rows to score the rest as misses",
            validation.records.len(),
            validation.source_rows()
        );
    }

    let collator = PaddingCollator {
        pad_to_multiple_of: config.pad_to_multiple_of,
        max_length: config.max_length,
        ..PaddingCollator::default()
    };
    let mut sampler = BatchSampler::new(
        train.records.len(),
        config.per_device_train_batch_size,
        true,
    );
    sampler.start_epoch(config.seed, 0);
    eprintln!("train batches per epoch: {}", sampler.num_batches());

    if let Some(batch) = sampler.next_batch(&train.records, &collator) {
        let batch = batch.context("collate first train batch")?;
        let real: usize = batch.attention_mask.iter().map(|&m| usize::from(m)).sum();
        eprintln!(
            "first batch: batch_size={} seq_len={} real_samples={} problem_type={:?}",
            batch.batch_size,
            batch.seq_len,
            real,
            ProblemType::infer(vocabulary.len(), &batch.labels)
        );
    }
    Ok(())
}

fn init_head(config: &PipelineConfig, hidden_size: usize, model_dir: &Path) -> Result<()> {
    let (vocabulary, _) = train_vocabulary(config)?;
    let classifier = ClassifierConfig::for_vocabulary(hidden_size, &vocabulary, config.pooling_mode);
    classifier.validate()?;
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let head = ClassificationHead::init(
        hidden_size,
        classifier.num_labels,
        classifier.final_dropout,
        &mut rng,
    );
    let bundle = ClassifierBundle {
        config: classifier,
        head,
    };
    bundle
        .save_to_dir(model_dir)
        .with_context(|| format!("write classifier to {}", model_dir.display()))?;
    eprintln!(
        "head written: dir={} hidden_size={} num_labels={} pooling={}",
        model_dir.display(),
        hidden_size,
        bundle.config.num_labels,
        bundle.config.pooling_mode
    );
    Ok(())
}

fn inspect_head(model_dir: &Path) -> Result<()> {
    let bundle = ClassifierBundle::load_from_dir(model_dir).context("load classifier bundle")?;
    let c = &bundle.config;
    eprintln!(
        "head ok: hidden_size={} num_labels={} pooling={} problem_type={:?} final_dropout={} labels={:?}",
        c.hidden_size,
        c.num_labels,
        c.pooling_mode,
        c.problem_type,
        c.final_dropout,
        c.id2label.values().collect::<Vec<_>>()
    );
    Ok(())
}

fn evaluate(path: &Path, regression: bool) -> Result<()> {
    let store = TensorStore::open(path).with_context(|| format!("open {}", path.display()))?;
    let predictions = store
        .tensor_f32("predictions")
        .context("read predictions")?;
    let label_ids = store.tensor_f32("label_ids").context("read label_ids")?;
    let num_labels = match predictions.shape.as_slice() {
        [_, c] => *c,
        [_] => 1,
        other => anyhow::bail!("predictions must be [N, C] or [N], got {other:?}"),
    };
    let metrics = compute_metrics(&predictions.data, num_labels, &label_ids.data, regression)
        .context("compute metrics")?;
    println!("{}={:.6}", metrics.name(), metrics.value());
    Ok(())
}
