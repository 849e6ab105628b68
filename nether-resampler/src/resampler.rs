//! Push/pull sample-rate converter
//!
//! Input is pushed one sample at a time into a mirrored circular buffer, output
//! is pulled one sample at a time from a second ring that the selected kernel
//! fills lazily. The input side never blocks: writes past capacity are dropped
//! and callers poll [`Resampler::get_free_count`].

use std::sync::{Arc, OnceLock};

use crate::kernels::{Isa, KernelRun, KernelSet, PHASE_ONE, PhaseState};
use crate::tables::{ResamplerTables, SINC_WIDTH};

/// Capacity of the input and output rings
pub const BUFFER_SIZE: usize = SINC_WIDTH * 4;

const OUTPUT_LEN: usize = BUFFER_SIZE + SINC_WIDTH * 2 - 1;

/// Interpolation quality, lowest to highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Quality {
    /// Zero-order hold
    Zoh = 0,
    /// Band-limited step
    Blep = 1,
    /// Linear interpolation
    Linear = 2,
    /// Band-limited linear
    Blam = 3,
    /// Catmull-Rom cubic
    Cubic = 4,
    /// 32-tap windowed sinc
    #[default]
    Sinc = 5,
}

impl Quality {
    pub const MIN: Quality = Quality::Zoh;
    pub const MAX: Quality = Quality::Sinc;

    /// Map an integer level onto a quality, clamping out-of-range values
    pub fn from_level(level: i32) -> Self {
        match level {
            i32::MIN..=0 => Quality::Zoh,
            1 => Quality::Blep,
            2 => Quality::Linear,
            3 => Quality::Blam,
            4 => Quality::Cubic,
            _ => Quality::Sinc,
        }
    }

    pub fn level(self) -> i32 {
        self as i32
    }

    /// Kernels that emit impulses into the output ring and hold extra latency
    pub fn is_band_limited_step(self) -> bool {
        matches!(self, Quality::Blep | Quality::Blam)
    }

    /// Samples that must be buffered before the kernel can run
    pub fn min_filled(self) -> usize {
        match self {
            Quality::Zoh | Quality::Blep => 1,
            Quality::Linear | Quality::Blam => 2,
            Quality::Cubic => 4,
            Quality::Sinc => SINC_WIDTH * 2,
        }
    }

    /// Zero samples of history primed on the first write
    pub fn input_delay(self) -> usize {
        match self {
            Quality::Cubic => 1,
            Quality::Sinc => SINC_WIDTH - 1,
            _ => 0,
        }
    }

    /// Output samples discarded after the first fill
    pub fn output_delay(self) -> usize {
        if self.is_band_limited_step() {
            SINC_WIDTH - 1
        } else {
            0
        }
    }
}

/// Process-wide immutable resampler state: lookup tables plus the kernel
/// table chosen for this CPU.
#[derive(Debug)]
pub struct ResamplerContext {
    tables: ResamplerTables,
    kernels: KernelSet,
}

impl ResamplerContext {
    /// Build the tables and pick kernels for the running CPU
    pub fn new() -> Arc<Self> {
        Self::with_isa(Isa::detect())
    }

    /// The context built on first use and shared by every caller afterwards
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<ResamplerContext>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(Self::new))
    }

    /// Build with an explicit kernel ISA (unavailable ISAs fall back to scalar)
    pub fn with_isa(isa: Isa) -> Arc<Self> {
        let kernels = KernelSet::for_isa(isa);
        tracing::debug!(isa = ?kernels.isa(), "resampler context initialized");
        Arc::new(Self {
            tables: ResamplerTables::build(),
            kernels,
        })
    }

    pub fn isa(&self) -> Isa {
        self.kernels.isa()
    }

    pub fn tables(&self) -> &ResamplerTables {
        &self.tables
    }
}

/// One channel of sample-rate conversion
///
/// `Clone` produces a fully independent converter (the lookup tables are
/// immutable and stay shared).
#[derive(Debug, Clone)]
pub struct Resampler {
    ctx: Arc<ResamplerContext>,
    write_pos: usize,
    write_filled: usize,
    read_pos: usize,
    read_filled: usize,
    state: PhaseState,
    quality: Quality,
    delay_added: bool,
    delay_removed: bool,
    accumulator: f64,
    buffer_in: [f32; BUFFER_SIZE * 2],
    buffer_out: [f32; OUTPUT_LEN],
}

impl Resampler {
    pub fn new(ctx: Arc<ResamplerContext>) -> Self {
        Self {
            ctx,
            write_pos: SINC_WIDTH - 1,
            write_filled: 0,
            read_pos: 0,
            read_filled: 0,
            state: PhaseState::default(),
            quality: Quality::MAX,
            delay_added: false,
            delay_removed: false,
            accumulator: 0.0,
            buffer_in: [0.0; BUFFER_SIZE * 2],
            buffer_out: [0.0; OUTPUT_LEN],
        }
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    /// Change interpolation quality
    ///
    /// Moving into or out of BLEP/BLAM discards pending output, since those
    /// kernels keep impulse state in the output ring.
    pub fn set_quality(&mut self, quality: Quality) {
        if self.quality != quality {
            if quality.is_band_limited_step() || self.quality.is_band_limited_step() {
                self.read_pos = 0;
                self.read_filled = 0;
                self.state.last_amp = 0.0;
                self.accumulator = 0.0;
                self.buffer_out = [0.0; OUTPUT_LEN];
            }
            self.delay_added = false;
            self.delay_removed = false;
        }
        self.quality = quality;
    }

    /// Integer form of [`set_quality`](Self::set_quality), clamping the level
    pub fn set_quality_level(&mut self, level: i32) {
        self.set_quality(Quality::from_level(level));
    }

    /// Set `source_rate / dest_rate`
    pub fn set_rate(&mut self, ratio: f64) {
        self.state.phase_inc = (ratio * PHASE_ONE as f64) as u64;
        self.state.inv_phase_inc = (1.0 / ratio * PHASE_ONE as f64) as u64;
    }

    /// Free slots in the input ring
    pub fn get_free_count(&self) -> usize {
        BUFFER_SIZE - self.write_filled
    }

    /// Samples currently buffered on the input side, including primed delay
    pub fn get_fill_count(&self) -> usize {
        self.write_filled
    }

    /// True once enough input is buffered for the kernel to produce output
    pub fn ready(&self) -> bool {
        self.write_filled > self.quality.min_filled()
    }

    /// Push a 16-bit sample
    pub fn write_sample(&mut self, s: i16) {
        self.push(s as f32 * 256.0);
    }

    /// Push a `depth`-bit signed sample, normalized to `[-1, 1)`
    pub fn write_sample_fixed(&mut self, s: i32, depth: u8) {
        let scale = (1u64 << (depth.clamp(1, 32) - 1)) as f64;
        self.push((s as f64 / scale) as f32);
    }

    fn push(&mut self, value: f32) {
        if !self.delay_added {
            self.delay_added = true;
            self.write_filled = self.quality.input_delay();
        }

        if self.write_filled < BUFFER_SIZE {
            self.buffer_in[self.write_pos] = value;
            self.buffer_in[self.write_pos + BUFFER_SIZE] = value;
            self.write_filled += 1;
            self.write_pos = (self.write_pos + 1) % BUFFER_SIZE;
        }
    }

    /// Reset the stream while keeping quality and rate
    pub fn clear(&mut self) {
        self.write_pos = SINC_WIDTH - 1;
        self.write_filled = 0;
        self.read_pos = 0;
        self.read_filled = 0;
        self.state.phase = 0;
        self.delay_added = false;
        self.delay_removed = false;
        self.buffer_in[..SINC_WIDTH - 1].fill(0.0);
        self.buffer_in[BUFFER_SIZE..BUFFER_SIZE + SINC_WIDTH - 1].fill(0.0);
        if self.quality.is_band_limited_step() {
            self.state.inv_phase = 0;
            self.state.last_amp = 0.0;
            self.accumulator = 0.0;
            self.buffer_out = [0.0; OUTPUT_LEN];
        }
    }

    /// Replace the zero history the next write would prime with `taps`
    ///
    /// `taps` are input-domain values, oldest first; only the last
    /// [`Quality::input_delay`] of them are kept. Has no effect once samples
    /// were written since the last [`clear`](Self::clear).
    pub fn set_history(&mut self, taps: &[f32]) {
        if self.delay_added {
            return;
        }
        let n = taps.len().min(self.quality.input_delay()).min(self.write_pos);
        let first = self.write_pos - n;
        for (i, &value) in taps[taps.len() - n..].iter().enumerate() {
            self.buffer_in[first + i] = value;
            self.buffer_in[first + i + BUFFER_SIZE] = value;
        }
    }

    /// Output samples available, running the kernel if the ring is empty
    pub fn get_sample_count(&mut self) -> usize {
        if self.read_filled < 1
            && (!self.quality.is_band_limited_step() || self.state.inv_phase_inc != 0)
        {
            self.fill_and_remove_delay();
        }
        self.read_filled
    }

    /// Current output sample in the 24-bit domain
    pub fn get_sample(&mut self) -> i32 {
        self.get_sample_float() as i32
    }

    /// Current output sample without truncation
    pub fn get_sample_float(&mut self) -> f32 {
        if self.read_filled < 1 && self.state.phase_inc != 0 {
            self.fill_and_remove_delay();
        }
        if self.read_filled < 1 {
            return 0.0;
        }
        let sample = self.buffer_out[self.read_pos];
        if self.quality.is_band_limited_step() {
            (sample as f64 + self.accumulator) as f32
        } else {
            sample
        }
    }

    /// Consume the current output sample
    ///
    /// With `decay`, the BLEP/BLAM accumulator leaks `1/8192` per sample so
    /// long-run DC offset drains away.
    pub fn remove_sample(&mut self, decay: bool) {
        if self.read_filled == 0 {
            return;
        }
        if self.quality.is_band_limited_step() {
            self.accumulator += self.buffer_out[self.read_pos] as f64;
            self.buffer_out[self.read_pos] = 0.0;
            if decay {
                self.accumulator -= self.accumulator * (1.0 / 8192.0);
                if self.accumulator.abs() < 1e-20 {
                    self.accumulator = 0.0;
                }
            }
        }
        self.read_filled -= 1;
        self.read_pos = (self.read_pos + 1) % BUFFER_SIZE;
    }

    fn fill_and_remove_delay(&mut self) {
        self.fill();
        if !self.delay_removed {
            self.delay_removed = true;
            for _ in 0..self.quality.output_delay() {
                self.remove_sample(true);
            }
        }
    }

    fn fill(&mut self) {
        let quality = self.quality;
        let min_filled = quality.min_filled();
        let kernels = self.ctx.kernels;

        while self.write_filled > min_filled && self.read_filled < BUFFER_SIZE {
            let read_pos = self.read_pos;
            let filled = self.write_filled;
            let write_pos = (read_pos + self.read_filled) % BUFFER_SIZE;
            let write_size = (BUFFER_SIZE - write_pos).min(BUFFER_SIZE - self.read_filled);
            let in_start = BUFFER_SIZE + self.write_pos - filled;

            let Self {
                ctx,
                buffer_in,
                buffer_out,
                state,
                ..
            } = self;
            let input = &buffer_in[in_start..in_start + filled];
            let tables = &ctx.tables;

            let run = match quality {
                Quality::Zoh => (kernels.zoh)(
                    tables,
                    input,
                    &mut buffer_out[write_pos..write_pos + write_size],
                    state,
                ),
                Quality::Linear => (kernels.linear)(
                    tables,
                    input,
                    &mut buffer_out[write_pos..write_pos + write_size],
                    state,
                ),
                Quality::Cubic => (kernels.cubic)(
                    tables,
                    input,
                    &mut buffer_out[write_pos..write_pos + write_size],
                    state,
                ),
                Quality::Sinc => (kernels.sinc)(
                    tables,
                    input,
                    &mut buffer_out[write_pos..write_pos + write_size],
                    state,
                ),
                Quality::Blep | Quality::Blam => {
                    // Impulses spill past the ring end; mirror the wrapped head
                    // into the tail, run, then copy it back.
                    let write_extra = if write_pos >= read_pos {
                        read_pos.min(SINC_WIDTH * 2 - 1)
                    } else {
                        0
                    };
                    buffer_out.copy_within(0..write_extra, BUFFER_SIZE);
                    let kernel = if quality == Quality::Blep {
                        kernels.blep
                    } else {
                        kernels.blam
                    };
                    let run = kernel(
                        tables,
                        input,
                        &mut buffer_out[write_pos..write_pos + write_size + write_extra],
                        state,
                    );
                    buffer_out.copy_within(BUFFER_SIZE..BUFFER_SIZE + write_extra, 0);
                    run
                }
            };

            self.commit(run);

            let stalled = match quality {
                Quality::Blep => run.consumed == 0,
                Quality::Blam => run.produced == 0,
                _ => run.consumed == 0 && run.produced == 0,
            };
            if stalled {
                return;
            }
        }
    }

    fn commit(&mut self, run: KernelRun) {
        self.write_filled = self.write_filled.saturating_sub(run.consumed);
        self.read_filled = (self.read_filled + run.produced).min(BUFFER_SIZE);
    }
}

#[cfg(test)]
mod tests;
