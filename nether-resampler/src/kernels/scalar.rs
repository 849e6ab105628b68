//! Portable kernel primitives

use super::Lanes;
use crate::tables::SINC_WIDTH;

pub(crate) struct Scalar;

impl Lanes for Scalar {
    #[inline]
    fn dot4(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).take(4).map(|(x, y)| x * y).sum()
    }

    #[inline]
    fn dot32(a: &[f32], kernel: &[f32; SINC_WIDTH * 2]) -> f32 {
        let mut sum = 0.0f64;
        for (x, k) in a.iter().zip(kernel) {
            sum += (*x * *k) as f64;
        }
        sum as f32
    }

    #[inline]
    fn scatter32(out: &mut [f32], kernel: &[f32; SINC_WIDTH * 2], scale: f32) {
        for (o, k) in out.iter_mut().zip(kernel) {
            *o += k * scale;
        }
    }
}
