//! # sprig-core
//!
//! Core types shared by every sprig crate.
//!
//! This crate provides:
//! - [`Error`] / [`Result`]: the single error type of the workspace
//! - [`Shape`]: dimension sizes, channel-major layout
//! - [`QFormat`]: per-tensor power-of-two exponent with `dequantize` / `requantize`
//! - [`FixedTensor`]: fixed-point data carrying its shape and exponent
//! - [`Matrix`]: row-major f32 storage for the training domain

pub mod error;
pub mod fixed;
pub mod matrix;
pub mod qformat;
pub mod shape;

pub use error::{Error, Result};
pub use fixed::FixedTensor;
pub use matrix::{argmax, Matrix};
pub use qformat::{FixedPoint, QFormat};
pub use shape::Shape;
