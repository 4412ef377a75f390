//! # sprig-data
//!
//! Data containers for sprig.
//!
//! This crate provides:
//! - [`LabeledImages`]: fixed-point images with ground-truth class labels
//! - [`Dataset`] / [`DatasetBuilder`]: float feature rows with one-hot labels
//! - [`Batcher`]: seeded random or sequential mini-batch sampling

pub mod dataset;
pub mod images;
pub mod loader;

pub use dataset::{Dataset, DatasetBuilder};
pub use images::LabeledImages;
pub use loader::{BatchOrder, Batcher};
