// BatchNorm2d: per-channel normalization of CHW rows
//
// FORMULA (training mode):
//   x_hat = (x - mean_batch) / sqrt(var_batch + ε)
//
// mean_batch and var_batch are taken per channel over (rows, H, W). There
// is no learnable scale or shift: the layer only normalizes, so it has no
// parameters to freeze.
//
// RUNNING STATISTICS:
//   running_mean = (1 - momentum) * running_mean + momentum * mean_batch
//   running_var  = (1 - momentum) * running_var  + momentum * var_batch
//
// During evaluation the running statistics replace the batch statistics.
//
// BACKWARD (training mode, n = rows * H * W):
//   dx = inv_std / n * (n * dy - Σ dy - x_hat * Σ (dy * x_hat))

use std::any::Any;

use sprig_core::{Error, Matrix, Result};

use crate::layer::{expect_width, Layer, LayerKind};

pub struct BatchNorm2d {
    channels: usize,
    plane: usize,
    eps: f32,
    momentum: f32,
    running_mean: Vec<f32>,
    running_var: Vec<f32>,
    training: bool,
    // forward cache
    x_hat: Option<Matrix>,
    inv_std: Vec<f32>,
    batch_stats: bool,
}

impl BatchNorm2d {
    /// Normalize `channels` maps of `plane` cells each.
    pub fn new(channels: usize, plane: usize) -> Result<Self> {
        if channels == 0 {
            return Err(Error::EmptyDimension {
                layer: "batchnorm2d",
                what: "channel count",
            });
        }
        if plane == 0 {
            return Err(Error::EmptyDimension {
                layer: "batchnorm2d",
                what: "map size",
            });
        }
        Ok(BatchNorm2d {
            channels,
            plane,
            eps: 1e-5,
            momentum: 0.1,
            running_mean: vec![0.0; channels],
            running_var: vec![1.0; channels],
            training: true,
            x_hat: None,
            inv_std: vec![1.0; channels],
            batch_stats: false,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn running_mean(&self) -> &[f32] {
        &self.running_mean
    }

    pub fn running_var(&self) -> &[f32] {
        &self.running_var
    }
}

/// Every value of channel `c` across all rows.
fn channel_values(x: &Matrix, plane: usize, c: usize) -> impl Iterator<Item = f32> + '_ {
    (0..x.rows()).flat_map(move |r| x.row(r)[c * plane..(c + 1) * plane].iter().copied())
}

impl Layer for BatchNorm2d {
    fn kind(&self) -> LayerKind {
        LayerKind::BatchNorm
    }

    fn input_len(&self) -> usize {
        self.channels * self.plane
    }

    fn output_len(&self) -> usize {
        self.channels * self.plane
    }

    fn forward(&mut self, x: &Matrix) -> Result<Matrix> {
        expect_width(x, self.input_len())?;
        let use_batch = self.training && x.rows() > 0;
        let n = (x.rows() * self.plane) as f32;
        let mut y = x.clone();

        for c in 0..self.channels {
            let (mean, var) = if use_batch {
                let mean = channel_values(x, self.plane, c).sum::<f32>() / n;
                let var = channel_values(x, self.plane, c)
                    .map(|v| (v - mean) * (v - mean))
                    .sum::<f32>()
                    / n;
                let m = self.momentum;
                self.running_mean[c] = (1.0 - m) * self.running_mean[c] + m * mean;
                self.running_var[c] = (1.0 - m) * self.running_var[c] + m * var;
                (mean, var)
            } else {
                (self.running_mean[c], self.running_var[c])
            };
            let inv_std = 1.0 / (var + self.eps).sqrt();
            self.inv_std[c] = inv_std;
            for r in 0..y.rows() {
                for v in &mut y.row_mut(r)[c * self.plane..(c + 1) * self.plane] {
                    *v = (*v - mean) * inv_std;
                }
            }
        }

        self.batch_stats = use_batch;
        self.x_hat = Some(y.clone());
        Ok(y)
    }

    fn backward(&mut self, dy: &Matrix) -> Result<Matrix> {
        expect_width(dy, self.output_len())?;
        let x_hat = self
            .x_hat
            .as_ref()
            .ok_or_else(|| Error::msg("batchnorm2d: backward before forward"))?;
        let plane = self.plane;
        let n = (dy.rows() * plane) as f32;
        let mut dx = dy.clone();

        for c in 0..self.channels {
            let inv_std = self.inv_std[c];
            let span = c * plane..(c + 1) * plane;
            if !self.batch_stats {
                for r in 0..dx.rows() {
                    dx.row_mut(r)[span.clone()].iter_mut().for_each(|v| *v *= inv_std);
                }
                continue;
            }
            let mut sum_dy = 0.0f32;
            let mut sum_dy_xhat = 0.0f32;
            for r in 0..dy.rows() {
                for (&d, &xh) in dy.row(r)[span.clone()].iter().zip(&x_hat.row(r)[span.clone()]) {
                    sum_dy += d;
                    sum_dy_xhat += d * xh;
                }
            }
            for r in 0..dx.rows() {
                let xh = &x_hat.row(r)[span.clone()];
                for (v, &xhv) in dx.row_mut(r)[span.clone()].iter_mut().zip(xh) {
                    *v = inv_std / n * (n * *v - sum_dy - xhv * sum_dy_xhat);
                }
            }
        }
        Ok(dx)
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &'static str {
        "batchnorm2d"
    }
}
