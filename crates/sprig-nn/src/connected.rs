// Connected: fully-connected (dense) layer
//
//   y = x @ W^T + b
//
// PARAMETER SHAPES:
//
//   weight: [out_features, in_features]   (same row layout as the q7 dense kernel)
//   bias:   [1, out_features]
//
// GRADIENTS (batch of B rows):
//
//   dW += dy^T @ x      [out, B] @ [B, in]
//   db += Σ_rows dy
//   dx  = dy @ W        [B, out] @ [out, in]

use std::any::Any;

use rand::Rng;

use sprig_core::{Error, Matrix, Result};

use crate::init::kaiming_uniform;
use crate::layer::{expect_width, Layer, LayerKind};
use crate::optim::Param;

pub struct Connected {
    weight: Param,
    bias: Param,
    in_features: usize,
    out_features: usize,
    frozen: bool,
    input: Option<Matrix>,
}

impl Connected {
    /// A new layer with Kaiming uniform weights and biases.
    pub fn new<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> Result<Self> {
        check_dims(in_features, out_features)?;
        let weight = kaiming_uniform(out_features, in_features, in_features, rng)?;
        let bias = kaiming_uniform(1, out_features, in_features, rng)?;
        Self::from_weights(weight, bias)
    }

    /// Wrap existing weights (`[out, in]`) and bias (`[1, out]`).
    pub fn from_weights(weight: Matrix, bias: Matrix) -> Result<Self> {
        let (out_features, in_features) = (weight.rows(), weight.cols());
        check_dims(in_features, out_features)?;
        if bias.rows() != 1 || bias.cols() != out_features {
            return Err(Error::shape_mismatch(&[1, out_features], &[bias.rows(), bias.cols()]));
        }
        Ok(Connected {
            weight: Param::weight(weight)?,
            bias: Param::bias(bias)?,
            in_features,
            out_features,
            frozen: false,
            input: None,
        })
    }

    /// Builder-style freeze.
    pub fn frozen(mut self) -> Self {
        self.frozen = true;
        self
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn weight(&self) -> &Matrix {
        self.weight.value()
    }

    pub fn bias(&self) -> &Matrix {
        self.bias.value()
    }
}

fn check_dims(in_features: usize, out_features: usize) -> Result<()> {
    if in_features == 0 {
        return Err(Error::EmptyDimension {
            layer: "connected",
            what: "input width",
        });
    }
    if out_features == 0 {
        return Err(Error::EmptyDimension {
            layer: "connected",
            what: "output width",
        });
    }
    Ok(())
}

impl Layer for Connected {
    fn kind(&self) -> LayerKind {
        LayerKind::FullyConnected
    }

    fn input_len(&self) -> usize {
        self.in_features
    }

    fn output_len(&self) -> usize {
        self.out_features
    }

    fn forward(&mut self, x: &Matrix) -> Result<Matrix> {
        expect_width(x, self.in_features)?;
        let mut y = x.matmul_nt(self.weight.value())?;
        let b = self.bias.value().row(0);
        for r in 0..y.rows() {
            for (v, &bv) in y.row_mut(r).iter_mut().zip(b) {
                *v += bv;
            }
        }
        self.input = Some(x.clone());
        Ok(y)
    }

    fn backward(&mut self, dy: &Matrix) -> Result<Matrix> {
        expect_width(dy, self.out_features)?;
        let x = self
            .input
            .as_ref()
            .ok_or_else(|| Error::msg("connected: backward before forward"))?;
        if !self.frozen {
            let dw = dy.matmul_tn(x)?;
            self.weight.grad_mut().axpy(1.0, &dw)?;
            let db = self.bias.grad_mut().row_mut(0);
            for r in 0..dy.rows() {
                for (g, &d) in db.iter_mut().zip(dy.row(r)) {
                    *g += d;
                }
            }
        }
        dy.matmul(self.weight.value())
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
        "connected"
    }
}
