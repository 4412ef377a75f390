use std::fmt;

use serde::{Deserialize, Serialize};

// Shape: dimension sizes of a fixed-point tensor or a float matrix
//
//   feature map   [C, H, W]
//   conv weight   [C_out, C_in, k, k]
//   dense weight  [out, in]
//   bias          [C_out]
//
// Last dimension contiguous. Zero-sized dimensions are legal: a convolution
// pruned to no filters has shape [0, C_in, k, k] and no elements.

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn elem_count(&self) -> usize {
        self.0.iter().product()
    }

    /// Leading dimension: filters of a conv weight, channels of a map.
    pub fn outer(&self) -> usize {
        self.0.first().copied().unwrap_or(0)
    }

    /// Elements behind one index of the leading dimension.
    pub fn inner_count(&self) -> usize {
        self.0.iter().skip(1).product()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.0.iter().map(usize::to_string).collect();
        write!(f, "[{}]", dims.join(", "))
    }
}

macro_rules! shape_from_tuple {
    ($($d:ident),+) => {
        impl From<($(shape_from_tuple!(@usize $d),)+)> for Shape {
            fn from(($($d,)+): ($(shape_from_tuple!(@usize $d),)+)) -> Self {
                Shape(vec![$($d),+])
            }
        }
    };
    (@usize $d:ident) => { usize };
}

shape_from_tuple!(a, b);
shape_from_tuple!(a, b, c);
shape_from_tuple!(a, b, c, d);

impl From<usize> for Shape {
    fn from(len: usize) -> Self {
        Shape(vec![len])
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape(dims.to_vec())
    }
}
