//! Two-layer classification head over pooled encoder states.
//!
//! dropout -> dense (hidden -> hidden) -> tanh -> dropout -> out_proj (hidden -> labels)

use std::collections::HashMap;
use std::path::Path;

use rand::Rng;

use crate::math::tanh_inplace;
use crate::ops::{dropout_inplace, linear};
use crate::tensors::{TensorError, TensorF32, TensorStore, write_f32_tensors};

pub const DENSE_WEIGHT: &str = "classifier.dense.weight";
pub const DENSE_BIAS: &str = "classifier.dense.bias";
pub const OUT_PROJ_WEIGHT: &str = "classifier.out_proj.weight";
pub const OUT_PROJ_BIAS: &str = "classifier.out_proj.bias";

const INITIALIZER_RANGE: f32 = 0.02;

#[derive(Debug, Clone)]
pub struct ClassificationHead {
    hidden_size: usize,
    num_labels: usize,
    dropout: f32,
    dense_weight: Vec<f32>,
    dense_bias: Vec<f32>,
    out_weight: Vec<f32>,
    out_bias: Vec<f32>,
}

impl ClassificationHead {
    /// Fresh head: weights ~ N(0, 0.02), zero biases.
    pub fn init(hidden_size: usize, num_labels: usize, dropout: f32, rng: &mut impl Rng) -> Self {
        let mut normal = || {
            // Box-Muller
            let u1: f32 = rng.random::<f32>().max(f32::MIN_POSITIVE);
            let u2: f32 = rng.random::<f32>();
            INITIALIZER_RANGE * (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
        };
        let dense_weight = (0..hidden_size * hidden_size).map(|_| normal()).collect();
        let out_weight = (0..num_labels * hidden_size).map(|_| normal()).collect();
        Self {
            hidden_size,
            num_labels,
            dropout,
            dense_weight,
            dense_bias: vec![0.0; hidden_size],
            out_weight,
            out_bias: vec![0.0; num_labels],
        }
    }

    pub fn from_store(
        store: &TensorStore,
        hidden_size: usize,
        num_labels: usize,
        dropout: f32,
    ) -> Result<Self, TensorError> {
        Ok(Self {
            hidden_size,
            num_labels,
            dropout,
            dense_weight: store.tensor_f32_shaped(DENSE_WEIGHT, &[hidden_size, hidden_size])?,
            dense_bias: store.tensor_f32_shaped(DENSE_BIAS, &[hidden_size])?,
            out_weight: store.tensor_f32_shaped(OUT_PROJ_WEIGHT, &[num_labels, hidden_size])?,
            out_bias: store.tensor_f32_shaped(OUT_PROJ_BIAS, &[num_labels])?,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), TensorError> {
        let h = self.hidden_size;
        let c = self.num_labels;
        write_f32_tensors(
            path,
            vec![
                (
                    DENSE_WEIGHT.to_string(),
                    TensorF32 {
                        shape: vec![h, h],
                        data: self.dense_weight.clone(),
                    },
                ),
                (DENSE_BIAS.to_string(), TensorF32::vector(self.dense_bias.clone())),
                (
                    OUT_PROJ_WEIGHT.to_string(),
                    TensorF32 {
                        shape: vec![c, h],
                        data: self.out_weight.clone(),
                    },
                ),
                (OUT_PROJ_BIAS.to_string(), TensorF32::vector(self.out_bias.clone())),
            ],
            HashMap::new(),
        )
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    /// Inference forward (dropout disabled): `[n_rows, hidden]` -> `[n_rows, labels]`.
    pub fn forward(&self, pooled: &[f32], n_rows: usize) -> Vec<f32> {
        self.run(pooled.to_vec(), n_rows, None::<&mut rand_chacha::ChaCha8Rng>)
    }

    /// Training forward with inverted dropout driven by `rng`.
    pub fn forward_train(&self, pooled: &[f32], n_rows: usize, rng: &mut impl Rng) -> Vec<f32> {
        self.run(pooled.to_vec(), n_rows, Some(rng))
    }

    fn run<R: Rng>(&self, mut x: Vec<f32>, n_rows: usize, mut rng: Option<&mut R>) -> Vec<f32> {
        debug_assert_eq!(x.len(), n_rows * self.hidden_size);
        let h = self.hidden_size;

        if let Some(r) = rng.as_deref_mut() {
            dropout_inplace(&mut x, self.dropout, || r.random::<f32>());
        }
        let mut x = linear(&x, n_rows, h, &self.dense_weight, h, Some(&self.dense_bias));
        tanh_inplace(&mut x);
        if let Some(r) = rng.as_deref_mut() {
            dropout_inplace(&mut x, self.dropout, || r.random::<f32>());
        }
        linear(
            &x,
            n_rows,
            h,
            &self.out_weight,
            self.num_labels,
            Some(&self.out_bias),
        )
    }
}
