// QFormat: power-of-two fixed-point scaling
//
// A fixed-point value v with exponent Q stands for the real number v / 2^Q.
// Each tensor carries its own exponent, fixed when the quantized model was
// built. Conversions in both directions go through this one type:
//
//   dequantize(v) = v / 2^Q
//   requantize(x) = ceil(x * 2^Q), clamped to [T::MIN, T::MAX]
//
// Because the scale is a power of two, dequantizing an in-range integer and
// requantizing it with the same exponent gives the integer back exactly.
// Values outside the representable range saturate; saturation is never an
// error.

use serde::{Deserialize, Serialize};

/// Integer storage types usable as fixed-point values.
pub trait FixedPoint: Copy + Default + Send + Sync + std::fmt::Debug + 'static {
    const MIN: i32;
    const MAX: i32;

    fn to_i32(self) -> i32;

    /// Clamp a wide accumulator into this type.
    fn saturate(v: i32) -> Self;
}

impl FixedPoint for i8 {
    const MIN: i32 = i8::MIN as i32;
    const MAX: i32 = i8::MAX as i32;

    fn to_i32(self) -> i32 {
        self as i32
    }

    fn saturate(v: i32) -> Self {
        v.clamp(<Self as FixedPoint>::MIN, <Self as FixedPoint>::MAX) as i8
    }
}

/// Per-tensor quantization exponent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QFormat(i32);

impl QFormat {
    pub const fn new(frac_bits: i32) -> Self {
        QFormat(frac_bits)
    }

    /// The exponent Q.
    pub const fn frac_bits(self) -> i32 {
        self.0
    }

    /// 2^Q as a float.
    pub fn scale(self) -> f32 {
        2f32.powi(self.0)
    }

    /// One unit in the last place: the real value of integer 1.
    pub fn ulp(self) -> f32 {
        2f32.powi(-self.0)
    }

    pub fn dequantize<T: FixedPoint>(self, v: T) -> f32 {
        v.to_i32() as f32 / self.scale()
    }

    /// Round toward positive infinity, then saturate. NaN maps to 0.
    pub fn requantize<T: FixedPoint>(self, x: f32) -> T {
        let scaled = (x * self.scale()).ceil();
        if scaled.is_nan() {
            return T::default();
        }
        let clamped = scaled.clamp(T::MIN as f32, T::MAX as f32);
        T::saturate(clamped as i32)
    }

    pub fn dequantize_slice<T: FixedPoint>(self, values: &[T]) -> Vec<f32> {
        values.iter().map(|&v| self.dequantize(v)).collect()
    }

    /// Dequantize into an existing buffer of the same length.
    pub fn dequantize_into<T: FixedPoint>(self, values: &[T], out: &mut [f32]) {
        let scale = self.scale();
        for (o, &v) in out.iter_mut().zip(values) {
            *o = v.to_i32() as f32 / scale;
        }
    }

    pub fn requantize_slice<T: FixedPoint>(self, values: &[f32]) -> Vec<T> {
        values.iter().map(|&x| self.requantize(x)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dequantize_q7() {
        let q = QFormat::new(7);
        assert_eq!(q.dequantize(64i8), 0.5);
        assert_eq!(q.dequantize(-128i8), -1.0);
        let q = QFormat::new(4);
        assert_eq!(q.dequantize(24i8), 1.5);
    }

    #[test]
    fn test_requantize_rounds_up() {
        let q = QFormat::new(4);
        // 0.30 * 16 = 4.8 → 5
        assert_eq!(q.requantize::<i8>(0.30), 5);
        // -0.30 * 16 = -4.8 → -4
        assert_eq!(q.requantize::<i8>(-0.30), -4);
    }

    #[test]
    fn test_requantize_saturates() {
        let q = QFormat::new(6);
        assert_eq!(q.requantize::<i8>(100.0), 127);
        assert_eq!(q.requantize::<i8>(-100.0), -128);
        assert_eq!(q.requantize::<i8>(f32::NAN), 0);
    }

    #[test]
    fn test_saturate_clamps_accumulator() {
        assert_eq!(<i8 as FixedPoint>::saturate(300), 127);
        assert_eq!(<i8 as FixedPoint>::saturate(-300), -128);
        assert_eq!(<i8 as FixedPoint>::saturate(-5), -5);
        assert_eq!(<i8 as FixedPoint>::MAX, 127);
    }

    #[test]
    fn test_integer_round_trip_is_exact() {
        for q in [0, 3, 7, 9] {
            let fmt = QFormat::new(q);
            for v in i8::MIN..=i8::MAX {
                assert_eq!(fmt.requantize::<i8>(fmt.dequantize(v)), v);
            }
        }
    }

    #[test]
    fn test_float_round_trip_within_one_ulp() {
        let fmt = QFormat::new(5);
        let mut x = -3.9f32;
        while x < 3.9 {
            let back = fmt.dequantize(fmt.requantize::<i8>(x));
            assert!(back >= x && back - x <= fmt.ulp(), "{x} -> {back}");
            x += 0.013;
        }
    }

    #[test]
    fn test_negative_exponent() {
        let fmt = QFormat::new(-2);
        assert_eq!(fmt.dequantize(3i8), 12.0);
        assert_eq!(fmt.requantize::<i8>(12.0), 3);
    }
}
