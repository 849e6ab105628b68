//! Scaled fixed-point multiplies
//!
//! The mixer keeps samples in a 24-bit signed range ("24.8" relative to 16-bit
//! PCM). Filter coefficients and legacy gain factors are stored as fractions
//! scaled by `2^28` or `2^16`; these helpers perform the widening multiply and
//! shift back down without overflowing the 32-bit intermediate.

/// Multiply a sample by a 16.16 gain, pre-shifting both operands so the
/// product lands in the top half of a 64-bit intermediate.
#[inline]
pub const fn mulsc(a: i32, b: i32) -> i32 {
    (((a as i64) << 4) * ((b as i64) << 12) >> 32) as i32
}

/// Multiply by a 16.16 scale factor.
#[inline]
pub const fn mulsc16(a: i32, b: i32) -> i32 {
    ((a as i64 * b as i64) >> 16) as i32
}

/// Multiply a sample by a coefficient stored as `c * 2^28`.
///
/// Used in the resonant filter inner loop: `(x << 4) * c >> 32`.
#[inline]
pub const fn mulsca(a: i32, b: i32) -> i32 {
    (((a as i64) << 4) * (b as i64) >> 32) as i32
}

/// Convert a float coefficient to the `2^28` scale expected by [`mulsca`].
#[inline]
pub fn coefficient_to_fixed(c: f32) -> i32 {
    (c * (1i32 << 28) as f32) as i32
}

/// Clamp an accumulated mix sample into the signed 24-bit output range.
#[inline]
pub const fn clamp_24(x: i32) -> i32 {
    if x > 0x7F_FFFF {
        0x7F_FFFF
    } else if x < -0x80_0000 {
        -0x80_0000
    } else {
        x
    }
}

/// Convert a 24-bit mix sample to a normalized float.
#[inline]
pub fn to_f32(x: i32) -> f32 {
    x as f32 * (1.0 / 8_388_608.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mulsca_unity_coefficient() {
        let one = coefficient_to_fixed(1.0);
        assert_eq!(mulsca(1000, one), 1000);
        assert_eq!(mulsca(-1000, one), -1000);
    }

    #[test]
    fn test_mulsca_half_coefficient() {
        let half = coefficient_to_fixed(0.5);
        assert_eq!(mulsca(4096, half), 2048);
    }

    #[test]
    fn test_mulsc_matches_16_16_gain() {
        assert_eq!(mulsc(1000, 0x10000), 1000);
        assert_eq!(mulsc(1000, 0x4000), 250);
    }

    #[test]
    fn test_mulsc16() {
        assert_eq!(mulsc16(300, 0x8000), 150);
        assert_eq!(mulsc16(-300, 0x10000), -300);
    }

    #[test]
    fn test_clamp_24() {
        assert_eq!(clamp_24(0x100_0000), 0x7F_FFFF);
        assert_eq!(clamp_24(-0x100_0000), -0x80_0000);
        assert_eq!(clamp_24(1234), 1234);
    }
}
