//! # sprig-nn
//!
//! Floating-point layers and the training driver used while a pruned
//! network is retrained.
//!
//! This crate provides:
//! - [`Layer`]: the forward/backward interface, with a `frozen` flag
//! - [`Conv2d`], [`MaxPool2d`], [`BatchNorm2d`], [`Activation`], [`Connected`]
//! - [`Network`]: an owned forward chain of boxed layers
//! - [`Sgd`] / [`Param`]: momentum SGD with weight decay
//! - [`train_epoch`] / [`accuracy`]: mini-batch training and evaluation
//!
//! Feature-map rows are CHW. Convolution filters are stored
//! `[C_out, C_in * k * k]` and dense weights `[out, in]`, the same order the
//! fixed-point kernels use.

pub mod activation;
pub mod batchnorm;
pub mod connected;
pub mod conv;
pub mod init;
pub mod layer;
pub mod network;
pub mod optim;
pub mod train;

pub use activation::{softmax_row, Activation, ActivationFn};
pub use batchnorm::BatchNorm2d;
pub use connected::Connected;
pub use conv::{Conv2d, MaxPool2d};
pub use init::kaiming_uniform;
pub use layer::{Layer, LayerKind};
pub use network::Network;
pub use optim::{Param, Sgd};
pub use train::{accuracy, cross_entropy, train_epoch, Accuracy};
