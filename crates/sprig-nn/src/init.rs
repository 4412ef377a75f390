// Parameter initialization
//
// Kaiming (He) uniform: U(-k, k) with k = sqrt(1 / fan_in), the standard
// choice for layers followed by ReLU. Every initializer takes the caller's
// RNG so a seeded run is reproducible end to end.

use rand::Rng;

use sprig_core::{Matrix, Result};

/// A `[rows, cols]` matrix drawn from U(-k, k), k = sqrt(1 / fan_in).
pub fn kaiming_uniform<R: Rng + ?Sized>(
    rows: usize,
    cols: usize,
    fan_in: usize,
    rng: &mut R,
) -> Result<Matrix> {
    let k = (1.0 / fan_in.max(1) as f32).sqrt();
    let mut m = Matrix::zeros(rows, cols)?;
    for v in m.data_mut() {
        *v = rng.gen_range(-k..=k);
    }
    Ok(m)
}
