//! # sprig-kernels
//!
//! Saturating q7 kernels for the fixed-point inference side of sprig:
//! convolution, max-pooling, ReLU, fully-connected and softmax over CHW
//! feature maps, each taking explicit bias/output shift parameters.

pub mod geometry;
pub mod q7;

pub use geometry::{MapDims, Window};
pub use q7::{
    argmax_q7, convolve_q7, fully_connected_q7, maxpool_q7, relu_q7, softmax_q7, Shifts,
};
