//! Tab-separated utterance index (`path`, `emotion`, ...).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::constants::{DEFAULT_LABEL_COLUMN, DEFAULT_PATH_COLUMN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub path: PathBuf,
    pub emotion: String,
}

/// Column names in the index files.
///
/// Relative values in the path column are resolved against the directory of
/// the index file, not the process working directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Columns {
    #[serde(default = "default_path_column")]
    pub path: String,
    #[serde(default = "default_label_column")]
    pub label: String,
}

fn default_path_column() -> String {
    DEFAULT_PATH_COLUMN.to_string()
}

fn default_label_column() -> String {
    DEFAULT_LABEL_COLUMN.to_string()
}

impl Default for Columns {
    fn default() -> Self {
        Self {
            path: default_path_column(),
            label: default_label_column(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    records: Vec<Utterance>,
}

impl Dataset {
    pub fn from_records(records: Vec<Utterance>) -> Self {
        Self { records }
    }

    /// Read a tab-separated index with a header row.
    ///
    /// Relative audio paths resolve against the index file's directory, so an
    /// index that relied on the working directory needs absolute paths or a
    /// matching layout.
    pub fn from_tsv(path: impl AsRef<Path>, columns: &Columns) -> Result<Self> {
        let path = path.as_ref();
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .from_path(path)
            .with_context(|| format!("open index {}", path.display()))?;

        let headers = reader
            .headers()
            .with_context(|| format!("read header of {}", path.display()))?
            .clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .with_context(|| format!("{} has no `{name}` column", path.display()))
        };
        let path_idx = column(&columns.path)?;
        let label_idx = column(&columns.label)?;

        let mut records = Vec::new();
        for (row, result) in reader.records().enumerate() {
            let rec = result.with_context(|| format!("{} row {}", path.display(), row + 1))?;
            let (Some(audio), Some(label)) = (rec.get(path_idx), rec.get(label_idx)) else {
                anyhow::bail!("{} row {}: missing fields", path.display(), row + 1);
            };
            let audio = PathBuf::from(audio);
            let audio = if audio.is_relative() {
                base.join(audio)
            } else {
                audio
            };
            records.push(Utterance {
                path: audio,
                emotion: label.to_string(),
            });
        }

        tracing::debug!(index = %path.display(), rows = records.len(), "loaded utterance index");
        Ok(Self { records })
    }

    pub fn records(&self) -> &[Utterance] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.emotion.as_str())
    }
}

/// The two index files of a run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DataFiles {
    pub train: PathBuf,
    pub validation: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Splits {
    pub train: Dataset,
    pub validation: Dataset,
}

impl DataFiles {
    pub fn load(&self, columns: &Columns) -> Result<Splits> {
        Ok(Splits {
            train: Dataset::from_tsv(&self.train, columns).context("load train split")?,
            validation: Dataset::from_tsv(&self.validation, columns)
                .context("load validation split")?,
        })
    }
}
