//! Sample data structures

/// Decoded PCM, mono or interleaved stereo
#[derive(Debug, Clone)]
pub enum SampleData {
    Pcm8(Vec<i8>),
    Pcm16(Vec<i16>),
    /// 24-bit values stored in the low bits of an `i32`
    Pcm24(Vec<i32>),
}

impl Default for SampleData {
    fn default() -> Self {
        Self::Pcm16(Vec::new())
    }
}

impl SampleData {
    /// Number of stored values (frames times channels)
    pub fn len(&self) -> usize {
        match self {
            Self::Pcm8(d) => d.len(),
            Self::Pcm16(d) => d.len(),
            Self::Pcm24(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tracker sample
#[derive(Debug, Clone)]
pub struct TrackerSample {
    /// Sample name
    pub name: String,
    /// PCM data
    pub data: SampleData,
    /// Sample length in frames
    pub length: u32,
    /// Loop start (frames)
    pub loop_start: u32,
    /// Loop end (frames, exclusive)
    pub loop_end: u32,
    /// Sustain loop start (frames)
    pub sus_loop_start: u32,
    /// Sustain loop end (frames, exclusive)
    pub sus_loop_end: u32,
    /// Loop and layout flags
    pub flags: SampleFlags,
    /// C5 speed (sample rate for middle C)
    pub c5_speed: u32,
    /// Default volume (0-64)
    pub default_volume: u8,
    /// Default panning: IT 0-64 with bit 7 = use it, XM 0-255
    pub default_pan: u8,
    /// Global volume (0-64)
    pub global_volume: u8,
    /// Finetune in 1/256 semitones (XM only)
    pub finetune: i16,

    // =========================================================================
    // Sample auto-vibrato (IT stores per-sample, XM per-instrument)
    // =========================================================================
    /// Auto-vibrato speed (0-64)
    pub vibrato_speed: u8,
    /// Auto-vibrato depth (0-64)
    pub vibrato_depth: u8,
    /// Auto-vibrato rate/sweep (0-64)
    pub vibrato_rate: u8,
    /// Auto-vibrato waveform (0=sine, 1=ramp down, 2=square, 3=random)
    pub vibrato_waveform: u8,

    /// Upper bound on the resampling quality level for this sample
    pub max_resampling_quality: Option<u8>,
}

impl Default for TrackerSample {
    fn default() -> Self {
        Self {
            name: String::new(),
            data: SampleData::default(),
            length: 0,
            loop_start: 0,
            loop_end: 0,
            sus_loop_start: 0,
            sus_loop_end: 0,
            flags: SampleFlags::empty(),
            c5_speed: 8363,
            default_volume: 64,
            default_pan: 32,
            global_volume: 64,
            finetune: 0,
            vibrato_speed: 0,
            vibrato_depth: 0,
            vibrato_rate: 0,
            vibrato_waveform: 0,
            max_resampling_quality: None,
        }
    }
}

impl TrackerSample {
    /// Mono sample from 16-bit data
    pub fn from_pcm16(data: Vec<i16>) -> Self {
        Self {
            length: data.len() as u32,
            data: SampleData::Pcm16(data),
            ..Default::default()
        }
    }

    /// Mono sample from 8-bit data
    pub fn from_pcm8(data: Vec<i8>) -> Self {
        Self {
            length: data.len() as u32,
            data: SampleData::Pcm8(data),
            ..Default::default()
        }
    }

    /// Set a forward (or ping-pong) loop
    pub fn with_loop(mut self, start: u32, end: u32, pingpong: bool) -> Self {
        self.loop_start = start;
        self.loop_end = end;
        self.flags = self.flags | SampleFlags::LOOP;
        if pingpong {
            self.flags = self.flags | SampleFlags::PINGPONG_LOOP;
        }
        self
    }

    /// Set a sustain loop
    pub fn with_sus_loop(mut self, start: u32, end: u32, pingpong: bool) -> Self {
        self.sus_loop_start = start;
        self.sus_loop_end = end;
        self.flags = self.flags | SampleFlags::SUS_LOOP;
        if pingpong {
            self.flags = self.flags | SampleFlags::PINGPONG_SUS_LOOP;
        }
        self
    }

    /// A sample is playable once it has frames to play
    pub fn exists(&self) -> bool {
        self.length > 0 && !self.data.is_empty()
    }

    pub fn has_loop(&self) -> bool {
        self.flags.contains(SampleFlags::LOOP)
    }

    pub fn has_sus_loop(&self) -> bool {
        self.flags.contains(SampleFlags::SUS_LOOP)
    }

    pub fn is_stereo(&self) -> bool {
        self.flags.contains(SampleFlags::STEREO)
    }

    /// Interleaved channel count of `data`
    pub fn channels(&self) -> usize {
        if self.is_stereo() { 2 } else { 1 }
    }
}

/// Sample flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleFlags(u8);

impl SampleFlags {
    pub const LOOP: Self = Self(0x01);
    pub const SUS_LOOP: Self = Self(0x02);
    pub const PINGPONG_LOOP: Self = Self(0x04);
    pub const PINGPONG_SUS_LOOP: Self = Self(0x08);
    /// `data` is interleaved left/right
    pub const STEREO: Self = Self(0x10);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for SampleFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
