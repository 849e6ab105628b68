//! SSE and NEON kernel primitives
//!
//! Both ISAs are part of the baseline of their target architecture, so the
//! intrinsics are always callable once the target matches. Callers must still
//! hand in slices at least as long as the lane count consumed.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

#[cfg(target_arch = "aarch64")]
use std::arch::aarch64::*;

use super::Lanes;
use crate::tables::SINC_WIDTH;

#[cfg(target_arch = "x86_64")]
pub(crate) struct Sse;

#[cfg(target_arch = "x86_64")]
impl Sse {
    /// Horizontal sum of the four lanes
    #[inline]
    unsafe fn hsum(v: __m128) -> f32 {
        unsafe {
            let hi = _mm_movehl_ps(v, v);
            let sum = _mm_add_ps(v, hi);
            let odd = _mm_shuffle_ps(sum, sum, 0b01);
            _mm_cvtss_f32(_mm_add_ss(sum, odd))
        }
    }
}

#[cfg(target_arch = "x86_64")]
impl Lanes for Sse {
    #[inline]
    fn dot4(a: &[f32], b: &[f32]) -> f32 {
        assert!(a.len() >= 4 && b.len() >= 4);
        // SAFETY: both slices hold at least four floats; unaligned loads.
        unsafe {
            let va = _mm_loadu_ps(a.as_ptr());
            let vb = _mm_loadu_ps(b.as_ptr());
            Self::hsum(_mm_mul_ps(va, vb))
        }
    }

    #[inline]
    fn dot32(a: &[f32], kernel: &[f32; SINC_WIDTH * 2]) -> f32 {
        assert!(a.len() >= SINC_WIDTH * 2);
        // SAFETY: both sides hold SINC_WIDTH * 2 floats, read four at a time.
        unsafe {
            let mut acc = _mm_setzero_ps();
            for lane in 0..SINC_WIDTH / 2 {
                let x = _mm_loadu_ps(a.as_ptr().add(lane * 4));
                let k = _mm_loadu_ps(kernel.as_ptr().add(lane * 4));
                acc = _mm_add_ps(acc, _mm_mul_ps(x, k));
            }
            Self::hsum(acc)
        }
    }

    #[inline]
    fn scatter32(out: &mut [f32], kernel: &[f32; SINC_WIDTH * 2], scale: f32) {
        assert!(out.len() >= SINC_WIDTH * 2);
        // SAFETY: out holds at least SINC_WIDTH * 2 floats.
        unsafe {
            let s = _mm_set1_ps(scale);
            for lane in 0..SINC_WIDTH / 2 {
                let k = _mm_mul_ps(_mm_loadu_ps(kernel.as_ptr().add(lane * 4)), s);
                let dst = out.as_mut_ptr().add(lane * 4);
                _mm_storeu_ps(dst, _mm_add_ps(_mm_loadu_ps(dst), k));
            }
        }
    }
}

#[cfg(target_arch = "aarch64")]
pub(crate) struct Neon;

#[cfg(target_arch = "aarch64")]
impl Lanes for Neon {
    #[inline]
    fn dot4(a: &[f32], b: &[f32]) -> f32 {
        assert!(a.len() >= 4 && b.len() >= 4);
        // SAFETY: both slices hold at least four floats.
        unsafe { vaddvq_f32(vmulq_f32(vld1q_f32(a.as_ptr()), vld1q_f32(b.as_ptr()))) }
    }

    #[inline]
    fn dot32(a: &[f32], kernel: &[f32; SINC_WIDTH * 2]) -> f32 {
        assert!(a.len() >= SINC_WIDTH * 2);
        // SAFETY: both sides hold SINC_WIDTH * 2 floats, read four at a time.
        unsafe {
            let mut acc = vdupq_n_f32(0.0);
            for lane in 0..SINC_WIDTH / 2 {
                let x = vld1q_f32(a.as_ptr().add(lane * 4));
                let k = vld1q_f32(kernel.as_ptr().add(lane * 4));
                acc = vmlaq_f32(acc, x, k);
            }
            vaddvq_f32(acc)
        }
    }

    #[inline]
    fn scatter32(out: &mut [f32], kernel: &[f32; SINC_WIDTH * 2], scale: f32) {
        assert!(out.len() >= SINC_WIDTH * 2);
        // SAFETY: out holds at least SINC_WIDTH * 2 floats.
        unsafe {
            let s = vdupq_n_f32(scale);
            for lane in 0..SINC_WIDTH / 2 {
                let dst = out.as_mut_ptr().add(lane * 4);
                let k = vld1q_f32(kernel.as_ptr().add(lane * 4));
                vst1q_f32(dst, vmlaq_f32(vld1q_f32(dst), k, s));
            }
        }
    }
}
