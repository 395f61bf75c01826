//! Reduce per-frame encoder states to one vector per utterance.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolingMode {
    #[default]
    Mean,
    Sum,
    Max,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown pooling mode `{0}`, expected one of: mean, sum, max")]
pub struct UnknownPoolingMode(pub String);

impl FromStr for PoolingMode {
    type Err = UnknownPoolingMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mean" => Ok(Self::Mean),
            "sum" => Ok(Self::Sum),
            "max" => Ok(Self::Max),
            other => Err(UnknownPoolingMode(other.to_string())),
        }
    }
}

impl fmt::Display for PoolingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mean => "mean",
            Self::Sum => "sum",
            Self::Max => "max",
        })
    }
}

impl<'de> Deserialize<'de> for PoolingMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Serialize for PoolingMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl PoolingMode {
    /// Pool `[frames, width]` row-major states into `[width]`.
    ///
    /// Zero frames pool to zeros.
    pub fn pool(self, hidden: &[f32], frames: usize, width: usize) -> Vec<f32> {
        debug_assert_eq!(hidden.len(), frames * width);
        let mut out = vec![0.0f32; width];
        if frames == 0 || width == 0 {
            return out;
        }

        match self {
            Self::Mean | Self::Sum => {
                for row in hidden.chunks_exact(width) {
                    for (o, &v) in out.iter_mut().zip(row) {
                        *o += v;
                    }
                }
                if self == Self::Mean {
                    let n = frames as f32;
                    for o in &mut out {
                        *o /= n;
                    }
                }
            }
            Self::Max => {
                out.copy_from_slice(&hidden[..width]);
                for row in hidden.chunks_exact(width).skip(1) {
                    for (o, &v) in out.iter_mut().zip(row) {
                        if v > *o {
                            *o = v;
                        }
                    }
                }
            }
        }
        out
    }

    /// Pool `[batch, frames, width]` into `[batch, width]`.
    pub fn pool_batch(self, hidden: &[f32], batch: usize, frames: usize, width: usize) -> Vec<f32> {
        debug_assert_eq!(hidden.len(), batch * frames * width);
        let mut out = Vec::with_capacity(batch * width);
        if frames == 0 || width == 0 {
            out.resize(batch * width, 0.0);
            return out;
        }
        for item in hidden.chunks_exact(frames * width) {
            out.extend(self.pool(item, frames, width));
        }
        out
    }
}
