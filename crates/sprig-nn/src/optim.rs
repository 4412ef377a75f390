// SGD with momentum and weight decay
//
// For every trainable parameter w with accumulated gradient g:
//
//   v = momentum * v + g + decay * w      (decay only on weights, not biases)
//   w = w - rate * v
//
// Gradients are summed over the batch (not averaged), so `rate` is a
// per-example step size. The gradient buffer is cleared after each step.

use sprig_core::{Matrix, Result};

/// A trainable tensor with its gradient and momentum buffers.
#[derive(Debug, Clone)]
pub struct Param {
    value: Matrix,
    grad: Matrix,
    velocity: Matrix,
    decays: bool,
}

impl Param {
    /// A parameter subject to weight decay.
    pub fn weight(value: Matrix) -> Result<Self> {
        Self::build(value, true)
    }

    /// A parameter exempt from weight decay.
    pub fn bias(value: Matrix) -> Result<Self> {
        Self::build(value, false)
    }

    fn build(value: Matrix, decays: bool) -> Result<Self> {
        let grad = Matrix::zeros(value.rows(), value.cols())?;
        let velocity = grad.clone();
        Ok(Param {
            value,
            grad,
            velocity,
            decays,
        })
    }

    pub fn value(&self) -> &Matrix {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut Matrix {
        &mut self.value
    }

    pub fn grad(&self) -> &Matrix {
        &self.grad
    }

    pub fn grad_mut(&mut self) -> &mut Matrix {
        &mut self.grad
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    pub fn len(&self) -> usize {
        self.value.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.data().is_empty()
    }
}

/// Momentum SGD hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sgd {
    pub rate: f32,
    pub momentum: f32,
    pub decay: f32,
}

impl Sgd {
    pub fn new(rate: f32, momentum: f32, decay: f32) -> Self {
        Sgd {
            rate,
            momentum,
            decay,
        }
    }

    /// Apply one update to `p` and clear its gradient.
    pub fn step(&self, p: &mut Param) {
        let decay = if p.decays { self.decay } else { 0.0 };
        let Param {
            value,
            grad,
            velocity,
            ..
        } = p;
        for ((w, v), &g) in value
            .data_mut()
            .iter_mut()
            .zip(velocity.data_mut().iter_mut())
            .zip(grad.data())
        {
            *v = self.momentum * *v + g + decay * *w;
            *w -= self.rate * *v;
        }
        p.zero_grad();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_step() {
        let mut p = Param::weight(Matrix::from_vec(1, 2, vec![1.0, -1.0]).unwrap()).unwrap();
        p.grad_mut().data_mut().copy_from_slice(&[0.5, -0.5]);
        Sgd::new(0.1, 0.0, 0.0).step(&mut p);
        assert!((p.value().data()[0] - 0.95).abs() < 1e-6);
        assert!((p.value().data()[1] + 0.95).abs() < 1e-6);
        assert_eq!(p.grad().data(), &[0.0, 0.0]);
    }

    #[test]
    fn test_momentum_accumulates() {
        let mut p = Param::bias(Matrix::from_vec(1, 1, vec![0.0]).unwrap()).unwrap();
        let sgd = Sgd::new(1.0, 0.5, 0.0);
        p.grad_mut().data_mut()[0] = 1.0;
        sgd.step(&mut p);
        assert_eq!(p.value().data(), &[-1.0]);
        p.grad_mut().data_mut()[0] = 1.0;
        sgd.step(&mut p);
        // v = 0.5 * 1 + 1 = 1.5
        assert_eq!(p.value().data(), &[-2.5]);
    }

    #[test]
    fn test_decay_only_on_weights() {
        let sgd = Sgd::new(1.0, 0.0, 0.1);
        let mut w = Param::weight(Matrix::from_vec(1, 1, vec![2.0]).unwrap()).unwrap();
        let mut b = Param::bias(Matrix::from_vec(1, 1, vec![2.0]).unwrap()).unwrap();
        sgd.step(&mut w);
        sgd.step(&mut b);
        assert!((w.value().data()[0] - 1.8).abs() < 1e-6);
        assert_eq!(b.value().data(), &[2.0]);
    }
}
