//! Nether-Tracker: parsed module data for the Nethercore module player
//!
//! This crate holds the immutable song description that the `nether-player`
//! scheduler walks while rendering: the order list, patterns of entries,
//! instruments with their envelopes, sample PCM data and the MIDI macro table.
//! Loaders for the individual file formats live elsewhere; they fill these
//! types in and set [`FormatFlags`] so the scheduler can reproduce the quirks
//! of the tracker that authored the song.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//! │  IT loader   │  │  XM loader   │  │ S3M/MOD/...  │
//! └──────┬───────┘  └──────┬───────┘  └──────┬───────┘
//!        └─────────────────┼─────────────────┘
//!                          ▼
//!     ┌────────────────────────────────────────┐
//!     │          TrackerModule                 │
//!     │  - order_table / patterns / entries    │
//!     │  - instruments (NNA, envelopes)        │
//!     │  - samples (PCM, loops, vibrato)       │
//!     │  - midi macros, format flags           │
//!     └────────────────────────────────────────┘
//!                          │  Arc<TrackerModule>
//!                          ▼
//!                 nether_player::Sigrenderer
//! ```

mod effects;
mod instrument;
mod midi;
mod pattern;
mod sample;

pub use effects::{EffectCommand, SubCommand, TrackerEffect};
pub use instrument::{
    DuplicateCheckAction, DuplicateCheckType, EnvelopeFlags, NewNoteAction, TrackerEnvelope,
    TrackerInstrument,
};
pub use midi::{MidiMacro, MidiMacros};
pub use pattern::{TrackerEntry, TrackerPattern};
pub use sample::{SampleData, SampleFlags, TrackerSample};

/// Maximum number of pattern channels a module may address
pub const MAX_CHANNELS: usize = 64;

/// Order list marker: skip this position
pub const ORDER_SKIP: u8 = 0xFE;

/// Order list marker: end of song
pub const ORDER_END: u8 = 0xFF;

/// Channel pan value meaning surround
pub const PAN_SURROUND: u8 = 100;

/// Channel pan bit meaning the channel starts muted
pub const PAN_MUTED: u8 = 0x80;

// =============================================================================
// Module
// =============================================================================

/// A fully parsed module, shared read-only by every renderer playing it
#[derive(Debug, Clone)]
pub struct TrackerModule {
    /// Module name
    pub name: String,
    /// Number of channels used (1-64)
    pub num_channels: u8,
    /// Initial speed (ticks per row)
    pub initial_speed: u8,
    /// Initial tempo (BPM)
    pub initial_tempo: u8,
    /// Global volume (0-128)
    pub global_volume: u8,
    /// Mixing volume (0-128), applied on top of the global volume
    pub mixing_volume: u8,
    /// Stereo separation (0 = mono, 128 = full)
    pub pan_separation: u8,
    /// Pattern order table
    pub order_table: Vec<u8>,
    /// Order index to continue from once the order list runs out
    pub restart_position: u16,
    /// Pattern data
    pub patterns: Vec<TrackerPattern>,
    /// Instrument definitions (empty for sample-only modules)
    pub instruments: Vec<TrackerInstrument>,
    /// Sample definitions
    pub samples: Vec<TrackerSample>,
    /// Initial channel panning (0-64, [`PAN_SURROUND`], bit 7 = muted)
    pub channel_pan: [u8; MAX_CHANNELS],
    /// Initial channel volume (0-64)
    pub channel_volume: [u8; MAX_CHANNELS],
    /// Format-specific flags
    pub format: FormatFlags,
    /// SFx / Zxx MIDI macro table
    pub midi: MidiMacros,
}

impl Default for TrackerModule {
    fn default() -> Self {
        Self {
            name: String::new(),
            num_channels: 4,
            initial_speed: 6,
            initial_tempo: 125,
            global_volume: 128,
            mixing_volume: 48,
            pan_separation: 128,
            order_table: Vec::new(),
            restart_position: 0,
            patterns: Vec::new(),
            instruments: Vec::new(),
            samples: Vec::new(),
            channel_pan: [32; MAX_CHANNELS],
            channel_volume: [64; MAX_CHANNELS],
            format: FormatFlags::WAS_IT,
            midi: MidiMacros::default(),
        }
    }
}

impl TrackerModule {
    /// Get the pattern at the given order position
    pub fn pattern_at_order(&self, order: u16) -> Option<&TrackerPattern> {
        let pattern_idx = *self.order_table.get(order as usize)?;
        if pattern_idx >= ORDER_SKIP {
            return None;
        }
        self.patterns.get(pattern_idx as usize)
    }

    /// First order position, searching from `start`, that names a real pattern
    /// before the end marker
    pub fn first_playable_order(&self, start: usize) -> Option<usize> {
        for (i, &n) in self.order_table.iter().enumerate().skip(start) {
            if (n as usize) < self.patterns.len() {
                return Some(i);
            }
            if n == ORDER_END {
                break;
            }
        }
        None
    }

    /// Check if linear frequency slides are used (vs Amiga)
    pub fn uses_linear_slides(&self) -> bool {
        self.format.contains(FormatFlags::LINEAR_SLIDES)
    }

    /// Check if this module uses instruments (vs samples-only)
    pub fn uses_instruments(&self) -> bool {
        self.format.contains(FormatFlags::INSTRUMENTS)
    }

    /// Check if this module uses old effects mode (S3M compatibility)
    pub fn uses_old_effects(&self) -> bool {
        self.format.contains(FormatFlags::OLD_EFFECTS)
    }

    /// Check if Gxx keeps its own memory and continues samples (IT "compatible Gxx")
    pub fn uses_compatible_gxx(&self) -> bool {
        self.format.contains(FormatFlags::COMPATIBLE_GXX)
    }

    /// Shorthand for `self.format.contains(flag)`
    pub fn was(&self, flag: FormatFlags) -> bool {
        self.format.contains(flag)
    }

    /// Look up a 1-based instrument number
    pub fn instrument(&self, number: u8) -> Option<&TrackerInstrument> {
        self.instruments.get((number as usize).checked_sub(1)?)
    }

    /// Look up a 1-based sample number
    pub fn sample(&self, number: u8) -> Option<&TrackerSample> {
        self.samples.get((number as usize).checked_sub(1)?)
    }
}

/// Format-specific flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormatFlags(u32);

impl FormatFlags {
    /// Authored in Impulse Tracker
    pub const WAS_IT: Self = Self(0x0001);
    /// Authored in FastTracker II
    pub const WAS_XM: Self = Self(0x0002);
    /// Authored in Scream Tracker 3
    pub const WAS_S3M: Self = Self(0x0004);
    /// Authored as a ProTracker MOD (always set together with `WAS_XM`)
    pub const WAS_MOD: Self = Self(0x0008);
    /// Authored in PolyTracker
    pub const WAS_PTM: Self = Self(0x0010);
    /// Authored in Composer 669
    pub const WAS_669: Self = Self(0x0020);
    /// Authored in Oktalyzer
    pub const WAS_OKT: Self = Self(0x0040);
    /// Authored in Scream Tracker 2
    pub const WAS_STM: Self = Self(0x0080);
    /// Use linear frequency slides (vs Amiga slides)
    pub const LINEAR_SLIDES: Self = Self(0x0100);
    /// Old effects: doubled vibrato depth, offset past end clamps
    pub const OLD_EFFECTS: Self = Self(0x0200);
    /// Gxx has its own memory and does not retrigger on instrument change
    pub const COMPATIBLE_GXX: Self = Self(0x0400);
    /// Entries address instruments rather than samples directly
    pub const INSTRUMENTS: Self = Self(0x0800);
    /// Stereo output (clear = mono mixdown)
    pub const STEREO: Self = Self(0x1000);
    /// Ramp volume on every change, not only at note on/off
    pub const VOLUME_RAMPS: Self = Self(0x2000);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// True if any bit of `other` is set
    pub const fn intersects(&self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for FormatFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests;
