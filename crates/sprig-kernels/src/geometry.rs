// Kernel geometry: input/output sizes for sliding-window kernels
//
// OUTPUT SIZE FORMULA:
//
//   H_out = floor((H + 2*padding - kernel) / stride) + 1
//   W_out = floor((W + 2*padding - kernel) / stride) + 1
//
// Square kernels, equal stride and padding on both axes.

use sprig_core::{Error, Result, Shape};

/// Square sliding window: kernel size, stride and zero padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub kernel: usize,
    pub stride: usize,
    pub padding: usize,
}

impl Window {
    pub fn new(kernel: usize, stride: usize, padding: usize) -> Self {
        Window {
            kernel,
            stride,
            padding,
        }
    }

    /// Output extent along one axis of size `extent`.
    pub fn output_extent(&self, extent: usize) -> Result<usize> {
        let padded = extent + 2 * self.padding;
        if self.kernel == 0 || self.stride == 0 || padded < self.kernel {
            return Err(Error::msg(format!(
                "window kernel={} stride={} padding={} does not fit extent {}",
                self.kernel, self.stride, self.padding, extent
            )));
        }
        Ok((padded - self.kernel) / self.stride + 1)
    }
}

/// A CHW feature map geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapDims {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl MapDims {
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        MapDims {
            channels,
            height,
            width,
        }
    }

    pub fn len(&self) -> usize {
        self.channels * self.height * self.width
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn plane(&self) -> usize {
        self.height * self.width
    }

    pub fn shape(&self) -> Shape {
        Shape::from((self.channels, self.height, self.width))
    }

    /// Dimensions after sliding `window` over this map, with `channels` outputs.
    pub fn after(&self, window: &Window, channels: usize) -> Result<MapDims> {
        Ok(MapDims {
            channels,
            height: window.output_extent(self.height)?,
            width: window.output_extent(self.width)?,
        })
    }

    pub(crate) fn expect_len(&self, got: usize) -> Result<()> {
        if got != self.len() {
            return Err(Error::ElementCountMismatch {
                shape: self.shape(),
                expected: self.len(),
                got,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_extent() {
        assert_eq!(Window::new(3, 1, 1).output_extent(32).unwrap(), 32);
        assert_eq!(Window::new(2, 2, 0).output_extent(32).unwrap(), 16);
        assert_eq!(Window::new(5, 1, 0).output_extent(8).unwrap(), 4);
        assert_eq!(Window::new(3, 2, 0).output_extent(7).unwrap(), 3);
    }

    #[test]
    fn test_window_too_large() {
        assert!(Window::new(5, 1, 0).output_extent(3).is_err());
        assert!(Window::new(2, 0, 0).output_extent(3).is_err());
    }

    #[test]
    fn test_map_after() {
        let d = MapDims::new(3, 32, 32).after(&Window::new(5, 1, 2), 16).unwrap();
        assert_eq!(d, MapDims::new(16, 32, 32));
        assert_eq!(d.len(), 16 * 32 * 32);
    }
}
