//! Speech emotion classification (Rust) core library.
//!
//! This crate provides:
//! - Audio decode + resample, with an on-disk feature cache per split
//! - Label vocabulary, feature extraction and dynamic padding
//! - Pooled classification head with problem-type dependent loss

pub mod audio;
pub mod batches;
pub mod cache;
pub mod collate;
pub mod config;
pub mod constants;
pub mod dataset;
pub mod extract;
pub mod head;
pub mod labels;
pub mod loss;
pub mod math;
pub mod metrics;
pub mod model;
pub mod ops;
pub mod pooling;
pub mod tensors;
