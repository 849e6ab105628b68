//! Nether-Player: tick-driven module music scheduler
//!
//! Plays a parsed [`TrackerModule`](nether_tracker::TrackerModule) the way the
//! tracker that authored it would, reproducing the format quirks selected by
//! its [`FormatFlags`](nether_tracker::FormatFlags).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Sigrenderer                             │
//! │                                                                 │
//! │  order/row/tick ──► row processing ──► effects / note triggers  │
//! │        │                                    │                   │
//! │        ▼                                    ▼                   │
//! │  per-tick effects                 64 Channels ──NNA──► pool     │
//! │  (slides, LFOs, envelopes)            │   (192 background slots)│
//! │                                       ▼                         │
//! │                          VoiceArena (handle-indexed voices)     │
//! └───────────────────────────────────────┬─────────────────────────┘
//!                                         ▼
//!        loudest-first mix ──► SampleCursor (nether-resampler)
//!                              ──► resonant filter ──► declick ramp
//!                              ──► interleaved stereo i32
//! ```
//!
//! Time is kept in 1/65536 second units. A [`Sigrenderer`] is a plain value:
//! cloning it produces an independent snapshot, which is what
//! [`CheckpointList`] uses for seeking and length detection.

mod arena;
mod callbacks;
mod channel;
mod checkpoint;
mod config;
mod engine;
mod envelope;
mod error;
mod filter;
mod tables;
mod voice;

pub use callbacks::Callbacks;
pub use checkpoint::{CheckpointList, CHECKPOINT_INTERVAL, LENGTH_LIMIT};
pub use config::{PlayerConfig, RampStyle};
pub use engine::{ChannelState, Sigrenderer};
pub use error::{ConfigError, PlayerError};

/// Pattern channels a renderer tracks
pub const N_CHANNELS: usize = 64;

/// Background voice slots for notes displaced by New Note Actions
pub const N_NNA_CHANNELS: usize = 192;

/// Channels addressable through [`Sigrenderer::channel_state`]
pub const TOTAL_CHANNELS: usize = N_CHANNELS + N_NNA_CHANNELS;

/// Time units per second
pub const TIME_UNIT: i64 = 65536;

/// Tick length is `TICK_TIME_DIVIDEND / (tempo << 8)` time units (2.5 / tempo seconds)
pub const TICK_TIME_DIVIDEND: i32 = 65536 * 5 * 128;

/// Frequency ratio of one semitone
pub const SEMITONE_BASE: f64 = 1.059_463_094_359_295_3;

/// Frequency ratio of 1/256 semitone
pub const PITCH_BASE: f64 = 1.000_225_659_305_069_8;

/// Amiga period clock divisor used by non-linear slides
pub const AMIGA_DIVISOR: f64 = 4.0 * 14_317_056.0;
