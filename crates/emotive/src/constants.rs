//! Audio and pipeline constants.

// Target rate of the wav2vec2 feature extractor.
pub const TARGET_SAMPLE_RATE_HZ: u32 = 16_000;

// Wire value of an unknown label id.
pub const UNKNOWN_LABEL_ID: i64 = -1;

pub const NORMALIZE_EPS: f32 = 1e-7;

pub const DEFAULT_PATH_COLUMN: &str = "path";
pub const DEFAULT_LABEL_COLUMN: &str = "emotion";

pub const CACHE_FILE_PREFIX: &str = "speech_list";
pub const CACHE_KEY_METADATA: &str = "key";
pub const CACHE_COUNT_METADATA: &str = "count";
