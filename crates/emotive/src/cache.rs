//! Per-split waveform cache.
//!
//! One safetensors file per split holds every decoded + resampled waveform in
//! path order. The header carries a content key (SHA-256 over the target rate
//! and each path's name, size and mtime); a key mismatch marks the file stale
//! and the split is rebuilt. Concurrent builders of the same split are not
//! coordinated.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::audio::{AudioError, SpeechLoader};
use crate::constants::{CACHE_COUNT_METADATA, CACHE_FILE_PREFIX, CACHE_KEY_METADATA};
use crate::tensors::{TensorError, TensorF32, TensorStore, write_f32_tensors};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create cache dir {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("decode failed for utterance {index}: {source}")]
    Decode {
        index: usize,
        #[source]
        source: AudioError,
    },
    #[error("cache file {path}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: TensorError,
    },
}

#[derive(Debug)]
pub struct FeatureCache<L> {
    dir: PathBuf,
    target_hz: u32,
    loader: L,
}

impl<L: SpeechLoader> FeatureCache<L> {
    pub fn new(dir: impl Into<PathBuf>, target_hz: u32, loader: L) -> Self {
        Self {
            dir: dir.into(),
            target_hz,
            loader,
        }
    }

    pub fn target_hz(&self) -> u32 {
        self.target_hz
    }

    pub fn cache_path(&self, split: &str) -> PathBuf {
        self.dir
            .join(format!("{CACHE_FILE_PREFIX}_{split}.safetensors"))
    }

    /// Waveforms for `paths`, one per path and in the same order.
    ///
    /// Served from the split's cache file when its key matches; otherwise every
    /// path is decoded and the whole split is written back. A single decode
    /// failure aborts the build.
    pub fn load_or_build(&self, paths: &[PathBuf], split: &str) -> Result<Vec<Vec<f32>>, CacheError> {
        let key = content_key(paths, self.target_hz)?;
        let cache_path = self.cache_path(split);

        if cache_path.exists() {
            match read_cache(&cache_path, &key) {
                Ok(Some(waveforms)) => {
                    tracing::info!(split, count = waveforms.len(), path = %cache_path.display(), "loaded features from cache");
                    return Ok(waveforms);
                }
                Ok(None) => {
                    tracing::warn!(split, path = %cache_path.display(), "feature cache is stale, rebuilding");
                }
                Err(e) => {
                    tracing::warn!(split, error = %e, "feature cache unreadable, rebuilding");
                }
            }
        }

        tracing::info!(split, count = paths.len(), "decoding utterances");
        let mut waveforms = Vec::with_capacity(paths.len());
        for (index, path) in paths.iter().enumerate() {
            let samples = self
                .loader
                .load(path, self.target_hz)
                .map_err(|source| CacheError::Decode { index, source })?;
            tracing::trace!(index, path = %path.display(), samples = samples.len(), "decoded");
            waveforms.push(samples);
        }

        std::fs::create_dir_all(&self.dir).map_err(|source| CacheError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;
        write_cache(&cache_path, &key, &waveforms)?;
        tracing::info!(split, path = %cache_path.display(), "features saved");

        Ok(waveforms)
    }
}

/// Hex SHA-256 over the target rate and each path's name, size and mtime.
pub fn content_key(paths: &[PathBuf], target_hz: u32) -> Result<String, CacheError> {
    let mut hasher = Sha256::new();
    hasher.update(target_hz.to_le_bytes());
    hasher.update((paths.len() as u64).to_le_bytes());

    for path in paths {
        let meta = std::fs::metadata(path).map_err(|source| CacheError::Stat {
            path: path.clone(),
            source,
        })?;
        let mtime_ns = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos());

        let name = path.to_string_lossy();
        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update(meta.len().to_le_bytes());
        hasher.update(mtime_ns.to_le_bytes());
    }

    Ok(format!("{:x}", hasher.finalize()))
}

fn tensor_name(index: usize) -> String {
    format!("{index:08}")
}

fn read_cache(path: &Path, key: &str) -> Result<Option<Vec<Vec<f32>>>, CacheError> {
    let store_err = |source| CacheError::Store {
        path: path.to_path_buf(),
        source,
    };
    let store = TensorStore::open(path).map_err(store_err)?;
    let meta = store.metadata().map_err(store_err)?;

    if meta.get(CACHE_KEY_METADATA).map(String::as_str) != Some(key) {
        return Ok(None);
    }
    let Some(count) = meta
        .get(CACHE_COUNT_METADATA)
        .and_then(|c| c.parse::<usize>().ok())
    else {
        return Ok(None);
    };

    let names: Vec<String> = (0..count).map(tensor_name).collect();
    let tensors = store.tensors_f32(&names).map_err(store_err)?;
    Ok(Some(tensors.into_iter().map(|t| t.data).collect()))
}

fn write_cache(path: &Path, key: &str, waveforms: &[Vec<f32>]) -> Result<(), CacheError> {
    let tensors = waveforms
        .iter()
        .enumerate()
        .map(|(i, w)| (tensor_name(i), TensorF32::vector(w.clone())))
        .collect();

    let mut meta = HashMap::new();
    meta.insert(CACHE_KEY_METADATA.to_string(), key.to_string());
    meta.insert(CACHE_COUNT_METADATA.to_string(), waveforms.len().to_string());

    write_f32_tensors(path, tensors, meta).map_err(|source| CacheError::Store {
        path: path.to_path_buf(),
        source,
    })
}
