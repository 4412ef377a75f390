// Network: an ordered chain of layers
//
// The output of each layer becomes the input of the next; backward runs the
// chain in reverse. There is no branching and no skip connection. A Network
// owns its layers exclusively.
//
// Example:
//   let net = Network::new()
//       .add(Connected::new(64, 10, &mut rng)?)
//       .add(Activation::relu(10)?)
//       .add(Connected::new(10, 3, &mut rng)?)
//       .add(Activation::softmax(3)?);

use sprig_core::{Error, Matrix, Result};

use crate::layer::Layer;
use crate::optim::Sgd;

#[derive(Default)]
pub struct Network {
    layers: Vec<Box<dyn Layer>>,
}

impl Network {
    pub fn new() -> Self {
        Network { layers: Vec::new() }
    }

    /// Append a layer. Returns self for chaining.
    #[allow(clippy::should_implement_trait)]
    pub fn add<L: Layer + 'static>(mut self, layer: L) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    /// Append a layer, checking that it accepts the current output width.
    pub fn push<L: Layer + 'static>(&mut self, layer: L) -> Result<()> {
        if let Some(last) = self.layers.last() {
            if last.output_len() != layer.input_len() {
                return Err(Error::shape_mismatch(&[last.output_len()], &[layer.input_len()]));
            }
        }
        self.layers.push(Box::new(layer));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub fn layer(&self, i: usize) -> Option<&dyn Layer> {
        self.layers.get(i).map(|l| l.as_ref())
    }

    /// Layer `i` downcast to its concrete type.
    pub fn layer_as<T: Layer + 'static>(&self, i: usize) -> Option<&T> {
        self.layers.get(i)?.as_any().downcast_ref::<T>()
    }

    /// Width of one input row, 0 for an empty network.
    pub fn input_len(&self) -> usize {
        self.layers.first().map_or(0, |l| l.input_len())
    }

    pub fn output_len(&self) -> usize {
        self.layers.last().map_or(0, |l| l.output_len())
    }

    pub fn forward(&mut self, x: &Matrix) -> Result<Matrix> {
        let mut out = x.clone();
        for layer in &mut self.layers {
            out = layer.forward(&out)?;
        }
        Ok(out)
    }

    pub fn backward(&mut self, dy: &Matrix) -> Result<Matrix> {
        let mut grad = dy.clone();
        for layer in self.layers.iter_mut().rev() {
            grad = layer.backward(&grad)?;
        }
        Ok(grad)
    }

    /// One optimizer step over every trainable, non-frozen layer.
    pub fn update(&mut self, sgd: &Sgd) {
        for layer in &mut self.layers {
            if layer.is_frozen() {
                continue;
            }
            for p in layer.params_mut() {
                sgd.step(p);
            }
        }
    }

    pub fn set_training(&mut self, training: bool) {
        for layer in &mut self.layers {
            layer.set_training(training);
        }
    }

    /// Number of scalars the optimizer may change.
    pub fn trainable_params(&self) -> usize {
        self.layers
            .iter()
            .filter(|l| !l.is_frozen())
            .flat_map(|l| l.params())
            .map(|p| p.len())
            .sum()
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.layers.iter().map(|l| l.name()).collect();
        f.debug_struct("Network").field("layers", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Activation, Connected};

    fn dense(w: Vec<f32>, rows: usize, cols: usize) -> Connected {
        Connected::from_weights(
            Matrix::from_vec(rows, cols, w).unwrap(),
            Matrix::zeros(1, rows).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_forward_chain() {
        let mut net = Network::new()
            .add(dense(vec![1.0, -1.0], 1, 2))
            .add(Activation::relu(1).unwrap());
        let x = Matrix::from_vec(2, 2, vec![3.0, 1.0, 1.0, 3.0]).unwrap();
        let y = net.forward(&x).unwrap();
        assert_eq!(y.data(), &[2.0, 0.0]);
    }

    #[test]
    fn test_push_checks_widths() {
        let mut net = Network::new();
        net.push(dense(vec![1.0; 6], 3, 2)).unwrap();
        assert!(net.push(Activation::relu(4).unwrap()).is_err());
        net.push(Activation::relu(3).unwrap()).unwrap();
        assert_eq!(net.len(), 2);
        assert_eq!(net.output_len(), 3);
    }

    #[test]
    fn test_layer_downcast() {
        let net = Network::new()
            .add(dense(vec![1.0; 4], 2, 2))
            .add(Activation::softmax(2).unwrap());
        assert!(net.layer_as::<Connected>(0).is_some());
        assert!(net.layer_as::<Connected>(1).is_none());
        assert!(net.layer_as::<Activation>(1).is_some());
    }

    #[test]
    fn test_trainable_params_skip_frozen() {
        let net = Network::new()
            .add(dense(vec![1.0; 4], 2, 2).frozen())
            .add(dense(vec![1.0; 6], 3, 2));
        assert_eq!(net.trainable_params(), 6 + 3);
    }
}
