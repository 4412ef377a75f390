// Conv2d & MaxPool2d: sliding-window layers over CHW rows
//
// Each example row holds a [C, H, W] map. Conv2d lowers every example with
// im2col and runs one matrix product:
//
//   col:  [C_in * k * k, H_out * W_out]
//   y_ex = W @ col + b                     [C_out, H_out * W_out]
//
// which is already the CHW layout of the output row.
//
// PARAMETER SHAPES (Conv2d):
//
//   weight: [C_out, C_in * k * k]   (one filter per row, [C_in][k][k] inside)
//   bias:   [1, C_out]
//
// A Conv2d may have zero output channels: a convolution pruned down to
// nothing is still a valid (empty) layer. Whatever consumes its output
// rejects the zero width.

use std::any::Any;

use rand::Rng;

use sprig_core::{Error, Matrix, Result};
use sprig_kernels::{MapDims, Window};

use crate::init::kaiming_uniform;
use crate::layer::{expect_width, Layer, LayerKind};
use crate::optim::Param;

/// 2D convolutional layer.
pub struct Conv2d {
    weight: Param,
    bias: Param,
    in_dims: MapDims,
    out_dims: MapDims,
    window: Window,
    frozen: bool,
    input: Option<Matrix>,
}

impl Conv2d {
    /// A new layer with Kaiming uniform filters.
    pub fn new<R: Rng + ?Sized>(
        in_dims: MapDims,
        out_channels: usize,
        window: Window,
        rng: &mut R,
    ) -> Result<Self> {
        let fan_in = in_dims.channels * window.kernel * window.kernel;
        let weight = kaiming_uniform(out_channels, fan_in, fan_in, rng)?;
        let bias = kaiming_uniform(1, out_channels, fan_in, rng)?;
        Self::from_weights(in_dims, window, weight, bias)
    }

    /// Wrap existing filters (`[C_out, C_in*k*k]`) and bias (`[1, C_out]`).
    pub fn from_weights(in_dims: MapDims, window: Window, weight: Matrix, bias: Matrix) -> Result<Self> {
        if in_dims.is_empty() {
            return Err(Error::EmptyDimension {
                layer: "conv2d",
                what: "input map",
            });
        }
        let out_channels = weight.rows();
        let fan_in = in_dims.channels * window.kernel * window.kernel;
        if weight.cols() != fan_in {
            return Err(Error::shape_mismatch(&[out_channels, fan_in], &[weight.rows(), weight.cols()]));
        }
        if bias.rows() != 1 || bias.cols() != out_channels {
            return Err(Error::shape_mismatch(&[1, out_channels], &[bias.rows(), bias.cols()]));
        }
        let out_dims = in_dims.after(&window, out_channels)?;
        Ok(Conv2d {
            weight: Param::weight(weight)?,
            bias: Param::bias(bias)?,
            in_dims,
            out_dims,
            window,
            frozen: false,
            input: None,
        })
    }

    pub fn in_dims(&self) -> MapDims {
        self.in_dims
    }

    pub fn out_dims(&self) -> MapDims {
        self.out_dims
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn out_channels(&self) -> usize {
        self.out_dims.channels
    }

    pub fn weight(&self) -> &Matrix {
        self.weight.value()
    }

    pub fn bias(&self) -> &Matrix {
        self.bias.value()
    }

    fn col_rows(&self) -> usize {
        self.in_dims.channels * self.window.kernel * self.window.kernel
    }
}

/// Unfold one CHW example into `[C*k*k, H_out*W_out]`, zero outside the map.
fn im2col(x: &[f32], dims: MapDims, window: Window, out: MapDims, col: &mut Matrix) {
    let k = window.kernel;
    for c in 0..dims.channels {
        for ky in 0..k {
            for kx in 0..k {
                let row = col.row_mut((c * k + ky) * k + kx);
                for oy in 0..out.height {
                    let iy = (oy * window.stride + ky) as isize - window.padding as isize;
                    for ox in 0..out.width {
                        let ix = (ox * window.stride + kx) as isize - window.padding as isize;
                        let inside = iy >= 0
                            && ix >= 0
                            && (iy as usize) < dims.height
                            && (ix as usize) < dims.width;
                        row[oy * out.width + ox] = if inside {
                            x[(c * dims.height + iy as usize) * dims.width + ix as usize]
                        } else {
                            0.0
                        };
                    }
                }
            }
        }
    }
}

/// Fold `[C*k*k, H_out*W_out]` back onto a CHW example, summing overlaps.
fn col2im(col: &Matrix, dims: MapDims, window: Window, out: MapDims, dx: &mut [f32]) {
    let k = window.kernel;
    for c in 0..dims.channels {
        for ky in 0..k {
            for kx in 0..k {
                let row = col.row((c * k + ky) * k + kx);
                for oy in 0..out.height {
                    let iy = (oy * window.stride + ky) as isize - window.padding as isize;
                    if iy < 0 || iy as usize >= dims.height {
                        continue;
                    }
                    for ox in 0..out.width {
                        let ix = (ox * window.stride + kx) as isize - window.padding as isize;
                        if ix < 0 || ix as usize >= dims.width {
                            continue;
                        }
                        dx[(c * dims.height + iy as usize) * dims.width + ix as usize] +=
                            row[oy * out.width + ox];
                    }
                }
            }
        }
    }
}

impl Layer for Conv2d {
    fn kind(&self) -> LayerKind {
        LayerKind::Convolution
    }

    fn input_len(&self) -> usize {
        self.in_dims.len()
    }

    fn output_len(&self) -> usize {
        self.out_dims.len()
    }

    fn forward(&mut self, x: &Matrix) -> Result<Matrix> {
        expect_width(x, self.in_dims.len())?;
        let mut y = Matrix::zeros(x.rows(), self.out_dims.len())?;
        let mut col = Matrix::zeros(self.col_rows(), self.out_dims.plane())?;
        let plane = self.out_dims.plane();
        for r in 0..x.rows() {
            im2col(x.row(r), self.in_dims, self.window, self.out_dims, &mut col);
            let y_ex = self.weight.value().matmul(&col)?;
            let out = y.row_mut(r);
            out.copy_from_slice(y_ex.data());
            for (c, &b) in self.bias.value().row(0).iter().enumerate() {
                out[c * plane..(c + 1) * plane].iter_mut().for_each(|v| *v += b);
            }
        }
        self.input = Some(x.clone());
        Ok(y)
    }

    fn backward(&mut self, dy: &Matrix) -> Result<Matrix> {
        expect_width(dy, self.out_dims.len())?;
        let x = self
            .input
            .as_ref()
            .ok_or_else(|| Error::msg("conv2d: backward before forward"))?;
        let plane = self.out_dims.plane();
        let mut dx = Matrix::zeros(dy.rows(), self.in_dims.len())?;
        let mut col = Matrix::zeros(self.col_rows(), plane)?;
        for r in 0..dy.rows() {
            let dy_ex = Matrix::from_vec(self.out_dims.channels, plane, dy.row(r).to_vec())?;
            if !self.frozen {
                im2col(x.row(r), self.in_dims, self.window, self.out_dims, &mut col);
                let dw = dy_ex.matmul_nt(&col)?;
                self.weight.grad_mut().axpy(1.0, &dw)?;
                let db = self.bias.grad_mut().row_mut(0);
                for (c, g) in db.iter_mut().enumerate() {
                    *g += dy_ex.row(c).iter().sum::<f32>();
                }
            }
            let dcol = self.weight.value().matmul_tn(&dy_ex)?;
            col2im(&dcol, self.in_dims, self.window, self.out_dims, dx.row_mut(r));
        }
        Ok(dx)
    }

    fn params(&self) -> Vec<&Param> {
        vec![&self.weight, &self.bias]
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        vec![&mut self.weight, &mut self.bias]
    }

    fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &'static str {
        "conv2d"
    }
}

/// 2D max-pooling. Gradients flow only to the winning cell of each window.
pub struct MaxPool2d {
    in_dims: MapDims,
    out_dims: MapDims,
    window: Window,
    winners: Vec<usize>,
}

impl MaxPool2d {
    pub fn new(in_dims: MapDims, window: Window) -> Result<Self> {
        let out_dims = in_dims.after(&window, in_dims.channels)?;
        Ok(MaxPool2d {
            in_dims,
            out_dims,
            window,
            winners: Vec::new(),
        })
    }

    pub fn out_dims(&self) -> MapDims {
        self.out_dims
    }
}

impl Layer for MaxPool2d {
    fn kind(&self) -> LayerKind {
        LayerKind::Pooling
    }

    fn input_len(&self) -> usize {
        self.in_dims.len()
    }

    fn output_len(&self) -> usize {
        self.out_dims.len()
    }

    fn forward(&mut self, x: &Matrix) -> Result<Matrix> {
        expect_width(x, self.in_dims.len())?;
        let (d, o, w) = (self.in_dims, self.out_dims, self.window);
        let mut y = Matrix::zeros(x.rows(), o.len())?;
        self.winners.clear();
        self.winners.reserve(x.rows() * o.len());
        for r in 0..x.rows() {
            let xr = x.row(r);
            let yr = y.row_mut(r);
            for c in 0..d.channels {
                for oy in 0..o.height {
                    let y0 = (oy * w.stride) as isize - w.padding as isize;
                    for ox in 0..o.width {
                        let x0 = (ox * w.stride) as isize - w.padding as isize;
                        let mut best: Option<usize> = None;
                        for iy in y0.max(0)..(y0 + w.kernel as isize).min(d.height as isize) {
                            for ix in x0.max(0)..(x0 + w.kernel as isize).min(d.width as isize) {
                                let idx = (c * d.height + iy as usize) * d.width + ix as usize;
                                if best.map_or(true, |b| xr[idx] > xr[b]) {
                                    best = Some(idx);
                                }
                            }
                        }
                        let out_idx = (c * o.height + oy) * o.width + ox;
                        yr[out_idx] = best.map_or(0.0, |b| xr[b]);
                        self.winners.push(best.unwrap_or(usize::MAX));
                    }
                }
            }
        }
        Ok(y)
    }

    fn backward(&mut self, dy: &Matrix) -> Result<Matrix> {
        expect_width(dy, self.out_dims.len())?;
        if self.winners.len() != dy.rows() * self.out_dims.len() {
            return Err(Error::msg("maxpool2d: backward before forward"));
        }
        let mut dx = Matrix::zeros(dy.rows(), self.in_dims.len())?;
        let o = self.out_dims.len();
        for r in 0..dy.rows() {
            let winners = &self.winners[r * o..(r + 1) * o];
            let dxr = dx.row_mut(r);
            for (&idx, &g) in winners.iter().zip(dy.row(r)) {
                if idx != usize::MAX {
                    dxr[idx] += g;
                }
            }
        }
        Ok(dx)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &'static str {
        "maxpool2d"
    }
}
