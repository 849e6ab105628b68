//! IT resonant low-pass filter
//!
//! Two-pole filter whose coefficients come from the cutoff (0-127, shifted
//! by 8) and resonance (0-127). The inner loop runs in fixed point with the
//! coefficients in 4.28 format.

use nether_resampler::fixed::mulsca;

use crate::voice::ENVELOPE_SHIFT;

/// Filter memory for one output side
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct FilterState {
    pub currsample: i32,
    pub prevsample: i32,
}

impl FilterState {
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Fraction bits of the fixed-point coefficients
const COEFFICIENT_BITS: u32 = 16 + 12;

/// Filter coefficients `(a, b, c)` for `y = a*x + b*y1 + c*y2`
pub(crate) fn coefficients(sampfreq: i32, cutoff: i32, resonance: i32) -> (f32, f32, f32) {
    let inv_angle = (sampfreq as f64
        * 0.5f64.powf(0.25 + cutoff as f64 / (24 << ENVELOPE_SHIFT) as f64)
        / (2.0 * std::f64::consts::PI * 110.0)) as f32;
    let loss = (resonance as f64 * (-std::f64::consts::LN_10 * 1.2 / 128.0)).exp() as f32;

    let mut d = (1.0 - loss) / inv_angle;
    if d > 2.0 {
        d = 2.0;
    }
    let d = (loss - d) * inv_angle;
    let e = inv_angle * inv_angle;
    let a = 1.0 / (1.0 + d + e);
    let c = -e * a;
    let b = 1.0 - a - c;
    (a, b, c)
}

/// Filter `frames` samples read from `src` at `src[i * step]`, adding the
/// result into `dst` at the same stride
#[allow(clippy::too_many_arguments)]
pub(crate) fn apply(
    state: &mut FilterState,
    dst: &mut [i32],
    src: &[i32],
    frames: usize,
    step: usize,
    sampfreq: i32,
    cutoff: i32,
    resonance: i32,
) {
    let (a, b, c) = coefficients(sampfreq, cutoff, resonance);
    let scale = (1u32 << COEFFICIENT_BITS) as f32;
    let (ai, bi, ci) = ((a * scale) as i32, (b * scale) as i32, (c * scale) as i32);

    let mut currsample = state.currsample;
    let mut prevsample = state.prevsample;
    for i in (0..frames * step).step_by(step.max(1)) {
        let (Some(&x), Some(out)) = (src.get(i), dst.get_mut(i)) else {
            break;
        };
        let newsample = mulsca(x, ai)
            .wrapping_add(mulsca(currsample, bi))
            .wrapping_add(mulsca(prevsample, ci));
        prevsample = currsample;
        currsample = newsample;
        *out = out.wrapping_add(currsample);
    }
    state.currsample = currsample;
    state.prevsample = prevsample;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coefficients_have_unity_dc_gain() {
        for (cutoff, resonance) in [(127 << 8, 0), (64 << 8, 0), (20 << 8, 100)] {
            let (a, b, c) = coefficients(44100, cutoff, resonance);
            assert!(
                (a + b + c - 1.0).abs() < 1e-6,
                "a+b+c should be 1 for cutoff {cutoff}, resonance {resonance}"
            );
        }
    }

    #[test]
    fn test_dc_input_settles_to_input() {
        let mut state = FilterState::default();
        let src = vec![100_000; 2048];
        let mut dst = vec![0; 2048];
        apply(&mut state, &mut dst, &src, 2048, 1, 44100, 60 << 8, 0);
        let last = dst[2047];
        assert!((last - 100_000).abs() < 1000, "DC should pass through, got {last}");
        assert_eq!(state.currsample, last);
    }

    #[test]
    fn test_low_cutoff_attenuates_nyquist() {
        let mut state = FilterState::default();
        let src: Vec<i32> = (0..4096)
            .map(|i| if (i / 2) % 2 == 0 { 1 << 20 } else { -(1 << 20) })
            .collect();
        let mut dst = vec![0; 4096];
        apply(&mut state, &mut dst, &src, 2048, 2, 44100, 10 << 8, 0);
        let peak = dst.iter().step_by(2).skip(1024).map(|v| v.abs()).max().unwrap_or(0);
        assert!(peak < 1 << 14, "alternating input should be heavily attenuated, peak {peak}");
        assert!(dst.iter().skip(1).step_by(2).all(|&v| v == 0), "odd stride untouched");
    }
}
