//! Interpolation lookup tables
//!
//! Built once per process and shared into every [`Resampler`](crate::Resampler)
//! through [`ResamplerContext`](crate::ResamplerContext).

use std::f64::consts::PI;

// ============================================================================
// Table geometry
// ============================================================================

/// Fractional phase bits kept when indexing the tables
pub const RESOLUTION_SHIFT: u32 = 10;

/// Table entries per input sample
pub const RESOLUTION: usize = 1 << RESOLUTION_SHIFT;

/// Half-width of the windowed sinc kernel, in input samples
pub const SINC_WIDTH: usize = 16;

/// Entries in the sinc and window tables (one extra for the closed end)
pub const SINC_SAMPLES: usize = RESOLUTION * SINC_WIDTH;

/// Entries in the cubic table (four taps per fractional position)
pub const CUBIC_SAMPLES: usize = RESOLUTION * 4;

/// Bandwidth of the band-limited step kernel, relative to Nyquist
pub const BLEP_CUTOFF: f32 = 0.90;

/// Bandwidth of the band-limited linear kernel, relative to Nyquist
pub const BLAM_CUTOFF: f32 = 0.93;

/// Bandwidth of the windowed sinc kernel, relative to Nyquist
pub const SINC_CUTOFF: f32 = 0.999;

/// Precomputed sinc, window and cubic coefficients
#[derive(Debug)]
pub struct ResamplerTables {
    pub(crate) sinc: Box<[f32]>,
    pub(crate) window: Box<[f32]>,
    pub(crate) cubic: Box<[f32]>,
}

fn sinc(x: f64) -> f64 {
    if (x - 0.0).abs() < 1e-6 {
        1.0
    } else {
        (x * PI).sin() / (x * PI)
    }
}

impl ResamplerTables {
    /// Build all tables
    pub fn build() -> Self {
        let mut sinc_lut = vec![0.0f32; SINC_SAMPLES + 1];
        let mut window_lut = vec![0.0f32; SINC_SAMPLES + 1];

        let dx = SINC_WIDTH as f64 / SINC_SAMPLES as f64;
        let mut x = 0.0f64;
        for i in 0..=SINC_SAMPLES {
            let y = x / SINC_WIDTH as f64;
            // Nuttall 3-term
            let window = 0.40897 + 0.5 * (PI * y).cos() + 0.09103 * (2.0 * PI * y).cos();
            sinc_lut[i] = if x.abs() < SINC_WIDTH as f64 {
                sinc(x) as f32
            } else {
                0.0
            };
            window_lut[i] = window as f32;
            x += dx;
        }

        let mut cubic_lut = vec![0.0f32; CUBIC_SAMPLES];
        let dx = 1.0 / RESOLUTION as f64;
        let mut x = 0.0f64;
        for taps in cubic_lut.chunks_exact_mut(4) {
            let x2 = x * x;
            let x3 = x2 * x;
            taps[0] = (-0.5 * x3 + x2 - 0.5 * x) as f32;
            taps[1] = (1.5 * x3 - 2.5 * x2 + 1.0) as f32;
            taps[2] = (-1.5 * x3 + 2.0 * x2 + 0.5 * x) as f32;
            taps[3] = (0.5 * x3 - 0.5 * x2) as f32;
            x += dx;
        }

        tracing::trace!(
            sinc_len = sinc_lut.len(),
            cubic_len = cubic_lut.len(),
            "resampler tables built"
        );

        Self {
            sinc: sinc_lut.into_boxed_slice(),
            window: window_lut.into_boxed_slice(),
            cubic: cubic_lut.into_boxed_slice(),
        }
    }

    /// Four cubic taps for a reduced (0..RESOLUTION) phase
    #[inline]
    pub(crate) fn cubic_taps(&self, phase_reduced: usize) -> &[f32] {
        &self.cubic[phase_reduced * 4..phase_reduced * 4 + 4]
    }

    /// Fill `kernel` with the 32 windowed-sinc taps for a reduced phase and
    /// return their sum.
    ///
    /// `step` scales the sinc argument (cutoff and downsampling ratio); the
    /// window is always evaluated at full resolution.
    #[inline]
    pub(crate) fn windowed_sinc(
        &self,
        kernel: &mut [f32; SINC_WIDTH * 2],
        phase_reduced: i32,
        step: i32,
    ) -> f64 {
        let phase_adj = phase_reduced * step / RESOLUTION as i32;
        let window_step = RESOLUTION as i32;
        let mut sum = 0.0f64;
        let mut i = SINC_WIDTH as i32;
        while i > -(SINC_WIDTH as i32) {
            let pos = i * step;
            let window_pos = i * window_step;
            let tap = self.sinc[(phase_adj - pos).unsigned_abs() as usize]
                * self.window[(phase_reduced - window_pos).unsigned_abs() as usize];
            kernel[(i + SINC_WIDTH as i32 - 1) as usize] = tap;
            sum += tap as f64;
            i -= 1;
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cubic_taps_sum_to_unity() {
        let tables = ResamplerTables::build();
        for phase in [0, 1, 256, 512, 777, RESOLUTION - 1] {
            let sum: f32 = tables.cubic_taps(phase).iter().sum();
            assert!(
                (sum - 1.0).abs() < 1e-5,
                "cubic taps at phase {phase} sum to {sum}"
            );
        }
    }

    #[test]
    fn test_cubic_phase_zero_is_identity() {
        let tables = ResamplerTables::build();
        assert_eq!(tables.cubic_taps(0), &[0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_sinc_table_endpoints() {
        let tables = ResamplerTables::build();
        assert_eq!(tables.sinc[0], 1.0);
        assert_eq!(tables.sinc[SINC_SAMPLES], 0.0);
        // Sinc crosses zero at integer arguments
        assert!(tables.sinc[RESOLUTION].abs() < 1e-6);
        // Nuttall window is 1 at the centre and ~0 at the edge
        assert!((tables.window[0] - 1.0).abs() < 1e-6);
        assert!(tables.window[SINC_SAMPLES].abs() < 1e-6);
    }

    #[test]
    fn test_windowed_sinc_kernel_has_positive_sum() {
        let tables = ResamplerTables::build();
        let mut kernel = [0.0f32; SINC_WIDTH * 2];
        let step = (SINC_CUTOFF * RESOLUTION as f32) as i32;
        let sum = tables.windowed_sinc(&mut kernel, 0, step);
        assert!(sum > 0.9 && sum < 1.1, "kernel sum {sum}");
        // Phase zero puts the peak on tap SINC_WIDTH - 1
        let peak = kernel
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(peak, Some(SINC_WIDTH - 1));
    }
}
