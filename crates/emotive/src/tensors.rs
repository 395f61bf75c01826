//! Safetensors-backed f32 tensor storage (head weights and feature caches).

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;

use memmap2::MmapOptions;
use safetensors::SafeTensors;
use safetensors::tensor::{Dtype, SafeTensorError, TensorView, View, serialize_to_file};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct TensorF32 {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl TensorF32 {
    pub fn vector(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }
}

#[derive(Debug)]
pub struct TensorStore {
    mmap: memmap2::Mmap,
    #[cfg(test)]
    header_parses: std::cell::Cell<usize>,
}

#[derive(Debug, Error)]
pub enum TensorError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("safetensors error: {0}")]
    SafeTensors(#[from] SafeTensorError),
    #[error("unsupported dtype for {name}: {dtype:?}")]
    UnsupportedDtype { name: String, dtype: Dtype },
    #[error("invalid tensor byte length for {name}: got {bytes}, expected multiple of {elem_size}")]
    InvalidByteLen {
        name: String,
        bytes: usize,
        elem_size: usize,
    },
    #[error("shape mismatch for {name}: got {got:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
}

impl TensorStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TensorError> {
        let file = std::fs::File::open(path)?;
        // SAFETY: read-only file mapping for immutable tensor access.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Ok(Self {
            mmap,
            #[cfg(test)]
            header_parses: std::cell::Cell::new(0),
        })
    }

    fn parse(&self) -> Result<SafeTensors<'_>, TensorError> {
        #[cfg(test)]
        self.header_parses.set(self.header_parses.get() + 1);
        Ok(SafeTensors::deserialize(&self.mmap)?)
    }

    pub fn names(&self) -> Result<Vec<String>, TensorError> {
        let st = self.parse()?;
        Ok(st.iter().map(|(name, _)| name.to_string()).collect())
    }

    /// String entries of the `__metadata__` header block.
    pub fn metadata(&self) -> Result<HashMap<String, String>, TensorError> {
        let (_, meta) = SafeTensors::read_metadata(&self.mmap)?;
        Ok(meta.metadata().clone().unwrap_or_default())
    }

    pub fn tensor_f32(&self, name: &str) -> Result<TensorF32, TensorError> {
        let st = self.parse()?;
        decode_f32(name, &st.tensor(name)?)
    }

    /// Load many tensors in order, parsing the header once.
    pub fn tensors_f32<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<TensorF32>, TensorError> {
        let st = self.parse()?;
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                decode_f32(name, &st.tensor(name)?)
            })
            .collect()
    }

    /// Load `name` and check it has exactly `expected` shape.
    pub fn tensor_f32_shaped(&self, name: &str, expected: &[usize]) -> Result<Vec<f32>, TensorError> {
        let t = self.tensor_f32(name)?;
        if t.shape != expected {
            return Err(TensorError::ShapeMismatch {
                name: name.to_string(),
                got: t.shape,
                expected: expected.to_vec(),
            });
        }
        Ok(t.data)
    }
}

fn decode_f32(name: &str, tv: &TensorView<'_>) -> Result<TensorF32, TensorError> {
    let shape = tv.shape().to_vec();
    let raw = tv.data();

    let data = match tv.dtype() {
        Dtype::F32 => {
            if raw.len() % 4 != 0 {
                return Err(TensorError::InvalidByteLen {
                    name: name.to_string(),
                    bytes: raw.len(),
                    elem_size: 4,
                });
            }
            raw.chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        }
        Dtype::BF16 => {
            if raw.len() % 2 != 0 {
                return Err(TensorError::InvalidByteLen {
                    name: name.to_string(),
                    bytes: raw.len(),
                    elem_size: 2,
                });
            }
            raw.chunks_exact(2)
                .map(|c| {
                    let bits = u32::from(u16::from_le_bytes([c[0], c[1]]));
                    f32::from_bits(bits << 16)
                })
                .collect()
        }
        other => {
            return Err(TensorError::UnsupportedDtype {
                name: name.to_string(),
                dtype: other,
            });
        }
    };

    Ok(TensorF32 { shape, data })
}

struct F32View {
    shape: Vec<usize>,
    bytes: Vec<u8>,
}

impl View for F32View {
    fn dtype(&self) -> Dtype {
        Dtype::F32
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn data(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(&self.bytes)
    }

    fn data_len(&self) -> usize {
        self.bytes.len()
    }
}

/// Write named f32 tensors (little-endian) plus string metadata to `path`.
pub fn write_f32_tensors(
    path: impl AsRef<Path>,
    tensors: Vec<(String, TensorF32)>,
    metadata: HashMap<String, String>,
) -> Result<(), TensorError> {
    let views = tensors.into_iter().map(|(name, t)| {
        let mut bytes = Vec::with_capacity(t.data.len() * 4);
        for v in &t.data {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        (
            name,
            F32View {
                shape: t.shape,
                bytes,
            },
        )
    });
    serialize_to_file(views, &Some(metadata), path.as_ref())?;
    Ok(())
}
