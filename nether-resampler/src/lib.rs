//! Nether Resampler - sample-rate conversion for tracker playback
//!
//! ```text
//! source PCM ──► SampleCursor ──► Resampler (per channel) ──► VolumeRamp ──► i32 mix
//!   (8/16/24)     (loop pickup)     (ZOH/BLEP/Linear/           (declick)
//!                                    BLAM/Cubic/Sinc)
//! ```
//!
//! The interpolation tables are built once per [`ResamplerContext`] and shared
//! by every resampler that holds it. Kernel variants (scalar or vector) are
//! picked once when the context is created.

pub mod fixed;
mod front_end;
mod kernels;
mod resampler;
pub mod tables;

pub use front_end::{
    declick, Pcm16, Pcm24, Pcm8, Pickup, SampleCursor, SampleFormat, VolumeRamp,
};
pub use kernels::{Isa, KernelSet};
pub use resampler::{Quality, Resampler, ResamplerContext, BUFFER_SIZE};
