//! LFO waveforms, arpeggio sequences and pitch helpers

use crate::SEMITONE_BASE;

/// LFO waveform selectors as stored on channels and voices
pub(crate) mod waveform {
    pub const SINE: u8 = 0;
    pub const SAWTOOTH: u8 = 1;
    pub const SQUARE: u8 = 2;
    pub const RANDOM: u8 = 3;
    pub const XM_SQUARE: u8 = 4;
    pub const RAMP_DOWN: u8 = 5;
    pub const RAMP_UP: u8 = 6;
}

/// S3x/S4x waveform numbers of a MOD, mapped onto [`waveform`]
pub(crate) const MOD_CONVERT_WAVEFORM: [u8; 4] = [
    waveform::SINE,
    waveform::RAMP_UP,
    waveform::XM_SQUARE,
    waveform::XM_SQUARE,
];

/// E4x/E7x waveform numbers of an XM, mapped onto [`waveform`]
pub(crate) const XM_CONVERT_WAVEFORM: [u8; 4] = [
    waveform::SINE,
    waveform::XM_SQUARE,
    waveform::RAMP_DOWN,
    waveform::RAMP_UP,
];

/// One sine period, amplitude 64
pub(crate) const SINE: [i8; 256] = [
    0, 2, 3, 5, 6, 8, 9, 11, 12, 14, 16, 17, 19, 20, 22, 23, //
    24, 26, 27, 29, 30, 32, 33, 34, 36, 37, 38, 39, 41, 42, 43, 44, //
    45, 46, 47, 48, 49, 50, 51, 52, 53, 54, 55, 56, 56, 57, 58, 59, //
    59, 60, 60, 61, 61, 62, 62, 62, 63, 63, 63, 64, 64, 64, 64, 64, //
    64, 64, 64, 64, 64, 64, 63, 63, 63, 62, 62, 62, 61, 61, 60, 60, //
    59, 59, 58, 57, 56, 56, 55, 54, 53, 52, 51, 50, 49, 48, 47, 46, //
    45, 44, 43, 42, 41, 39, 38, 37, 36, 34, 33, 32, 30, 29, 27, 26, //
    24, 23, 22, 20, 19, 17, 16, 14, 12, 11, 9, 8, 6, 5, 3, 2, //
    0, -2, -3, -5, -6, -8, -9, -11, -12, -14, -16, -17, -19, -20, -22, -23, //
    -24, -26, -27, -29, -30, -32, -33, -34, -36, -37, -38, -39, -41, -42, -43, -44, //
    -45, -46, -47, -48, -49, -50, -51, -52, -53, -54, -55, -56, -56, -57, -58, -59, //
    -59, -60, -60, -61, -61, -62, -62, -62, -63, -63, -63, -64, -64, -64, -64, -64, //
    -64, -64, -64, -64, -64, -64, -63, -63, -63, -62, -62, -62, -61, -61, -60, -60, //
    -59, -59, -58, -57, -56, -56, -55, -54, -53, -52, -51, -50, -49, -48, -47, -46, //
    -45, -44, -43, -42, -41, -39, -38, -37, -36, -34, -33, -32, -30, -29, -27, -26, //
    -24, -23, -22, -20, -19, -17, -16, -14, -12, -11, -9, -8, -6, -5, -3, -2,
];

/// 64 falling to -64
pub(crate) const SAWTOOTH: [i8; 256] = {
    let mut table = [0i8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = (64 - ((i as i32 + 1) >> 1)) as i8;
        i += 1;
    }
    table
};

/// 64 for the first half, 0 for the second
pub(crate) const SQUARE: [i8; 256] = {
    let mut table = [0i8; 256];
    let mut i = 0;
    while i < 128 {
        table[i] = 64;
        i += 1;
    }
    table
};

/// 0 falling to -64, then 64 falling to 0
pub(crate) const XM_RAMP: [i8; 256] = {
    let mut table = [0i8; 256];
    let mut i = 0;
    while i < 256 {
        let v = if i < 128 {
            -((i as i32 + 1) >> 1)
        } else {
            64 - ((i as i32 - 127) >> 1)
        };
        table[i] = v as i8;
        i += 1;
    }
    table
};

/// +64 / -64
pub(crate) const XM_SQUARE: [i8; 256] = {
    let mut table = [-64i8; 256];
    let mut i = 0;
    while i < 128 {
        table[i] = 64;
        i += 1;
    }
    table
};

/// Value of an LFO at phase `time`; `random` is used for the random waveform
pub(crate) fn lfo(waveform: u8, time: u8, random: i32) -> i32 {
    let t = time as usize;
    match waveform {
        waveform::SAWTOOTH => SAWTOOTH[t] as i32,
        waveform::SQUARE => SQUARE[t] as i32,
        waveform::RANDOM => random,
        waveform::XM_SQUARE => XM_SQUARE[t] as i32,
        waveform::RAMP_DOWN => XM_RAMP[t] as i32,
        waveform::RAMP_UP => XM_RAMP[255 - t] as i32,
        _ => SINE[t] as i32,
    }
}

/// Which arpeggio offset plays on each tick of a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum ArpeggioTable {
    #[default]
    Mod,
    Xm,
    Okt3,
    Okt4,
    Okt5,
}

impl ArpeggioTable {
    pub(crate) fn sequence(self) -> &'static [u8; 32] {
        match self {
            ArpeggioTable::Mod => &ARPEGGIO_MOD,
            ArpeggioTable::Xm => &ARPEGGIO_XM,
            ArpeggioTable::Okt3 => &ARPEGGIO_OKT_3,
            ArpeggioTable::Okt4 => &ARPEGGIO_OKT_4,
            ArpeggioTable::Okt5 => &ARPEGGIO_OKT_5,
        }
    }
}

const ARPEGGIO_MOD: [u8; 32] = [
    0, 1, 2, 0, 1, 2, 0, 1, 2, 0, 1, 2, 0, 1, 2, 0, 1, 2, 0, 1, 2, 0, 1, 2, 0, 1, 2, 0, 1, 2, 0, 1,
];
const ARPEGGIO_XM: [u8; 32] = [
    0, 1, 2, 0, 1, 2, 0, 1, 2, 0, 1, 2, 0, 1, 2, 0, 0, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2,
];
const ARPEGGIO_OKT_3: [u8; 32] = [
    1, 0, 2, 1, 0, 2, 1, 0, 2, 1, 0, 2, 1, 0, 2, 1, 0, 2, 1, 0, 2, 1, 0, 2, 1, 0, 2, 1, 0, 2, 1, 0,
];
const ARPEGGIO_OKT_4: [u8; 32] = [
    0, 2, 0, 1, 0, 2, 0, 1, 0, 2, 0, 1, 0, 2, 0, 1, 0, 2, 0, 1, 0, 2, 0, 1, 0, 2, 0, 1, 0, 2, 0, 1,
];
const ARPEGGIO_OKT_5: [u8; 32] = [
    2, 2, 0, 2, 2, 0, 2, 2, 0, 2, 2, 0, 2, 2, 0, 2, 2, 0, 2, 2, 0, 2, 2, 0, 2, 2, 0, 2, 2, 0, 2, 2,
];

/// PolyTracker volume curve, indexed by volume 0-64, output 0-1024
pub(crate) const PTM_VOLUME: [i32; 65] = [
    0, 31, 54, 73, 96, 111, 130, 153, 172, 191, 206, 222, 237, 252, 275, 298, 317, 336, 351, 370,
    386, 401, 416, 428, 443, 454, 466, 477, 489, 512, 531, 553, 573, 592, 611, 626, 645, 660, 679,
    695, 710, 725, 740, 756, 767, 782, 798, 809, 820, 836, 847, 859, 870, 881, 897, 908, 916, 927,
    939, 950, 962, 969, 983, 1005, 1024,
];

/// Tone portamento speeds of the IT volume column (Gx)
pub(crate) const VOLPAN_TONE_PORTA: [u8; 10] = [0, 1, 4, 8, 16, 32, 64, 96, 128, 255];

/// Nearest note (0-119) for a playback delta, relative to a C-5 speed of `base`
pub(crate) fn delta_to_note(delta: f64, base: u32) -> i32 {
    if base == 0 || delta <= 0.0 {
        return 0;
    }
    let note = (delta * 65536.0 / base as f64).log2() * 12.0 + 60.5;
    note.clamp(0.0, 119.0) as i32
}

/// Frequency ratio for a whole number of semitones
pub(crate) fn semitones(n: i32) -> f64 {
    SEMITONE_BASE.powi(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_waveforms_match_endpoints() {
        assert_eq!((SAWTOOTH[0], SAWTOOTH[1], SAWTOOTH[127]), (64, 63, 0));
        assert_eq!((SAWTOOTH[128], SAWTOOTH[255]), (0, -64));
        assert_eq!((XM_RAMP[0], XM_RAMP[127], XM_RAMP[128], XM_RAMP[255]), (0, -64, 64, 0));
        assert_eq!((SQUARE[127], SQUARE[128]), (64, 0));
        assert_eq!((XM_SQUARE[127], XM_SQUARE[128]), (64, -64));
    }

    #[test]
    fn test_lfo_dispatch() {
        assert_eq!(lfo(waveform::SINE, 64, 0), 64);
        assert_eq!(lfo(waveform::RANDOM, 10, -17), -17);
        assert_eq!(lfo(waveform::RAMP_UP, 0, 0), 0);
        assert_eq!(lfo(waveform::RAMP_UP, 127, 0), 64, "ramp up mirrors the xm ramp");
    }

    #[test]
    fn test_delta_to_note() {
        // C-5 at its own speed
        assert_eq!(delta_to_note(8363.0 / 65536.0, 8363), 60);
        assert_eq!(delta_to_note(2.0 * 8363.0 / 65536.0, 8363), 72);
        assert_eq!(delta_to_note(1e-9, 8363), 0, "very low pitches clamp");
    }
}
