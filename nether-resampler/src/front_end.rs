//! Typed resample front end
//!
//! Walks a PCM source (8, 16 or 24 bit, mono or interleaved stereo) forwards
//! or backwards, honoring loop pickups, feeds the per-channel [`Resampler`]s
//! and mixes their output into an interleaved stereo accumulator under a
//! ramped volume.

use std::sync::Arc;

use crate::resampler::{Quality, Resampler, ResamplerContext};
use crate::tables::SINC_WIDTH;

/// Source sample encodings accepted by [`SampleCursor::resample`]
pub trait SampleFormat {
    type Sample: Copy;

    const BITS: u8;

    /// Push one source sample into a resampler
    fn write(r: &mut Resampler, s: Self::Sample);

    /// The value [`write`](Self::write) would store for `s`
    fn input(s: Self::Sample) -> f32;

    /// Read the resampler's current output in the 24-bit mix domain
    fn read(r: &mut Resampler) -> f32;
}

/// Signed 8-bit PCM
pub struct Pcm8;
/// Signed 16-bit PCM
pub struct Pcm16;
/// Signed 24-bit PCM stored in `i32`
pub struct Pcm24;

impl SampleFormat for Pcm8 {
    type Sample = i8;
    const BITS: u8 = 8;

    #[inline]
    fn write(r: &mut Resampler, s: i8) {
        r.write_sample((s as i16) << 8);
    }

    #[inline]
    fn input(s: i8) -> f32 {
        ((s as i16) << 8) as f32 * 256.0
    }

    #[inline]
    fn read(r: &mut Resampler) -> f32 {
        r.get_sample_float()
    }
}

impl SampleFormat for Pcm16 {
    type Sample = i16;
    const BITS: u8 = 16;

    #[inline]
    fn write(r: &mut Resampler, s: i16) {
        r.write_sample(s);
    }

    #[inline]
    fn input(s: i16) -> f32 {
        s as f32 * 256.0
    }

    #[inline]
    fn read(r: &mut Resampler) -> f32 {
        r.get_sample_float()
    }
}

impl SampleFormat for Pcm24 {
    type Sample = i32;
    const BITS: u8 = 24;

    #[inline]
    fn write(r: &mut Resampler, s: i32) {
        r.write_sample_fixed(s, 24);
    }

    #[inline]
    fn input(s: i32) -> f32 {
        s as f32 / 8_388_608.0
    }

    #[inline]
    fn read(r: &mut Resampler) -> f32 {
        r.get_sample_float() * 8_388_608.0
    }
}

// ============================================================================
// Volume ramp
// ============================================================================

/// Declick stages
pub mod declick {
    /// Voice just (re)triggered, ramp starts from silence
    pub const SILENT: u8 = 0;
    /// Ramping in toward the first target
    pub const RAMP_IN: u8 = 1;
    /// Following volume changes
    pub const STEADY: u8 = 2;
    /// Cut requested
    pub const CUT: u8 = 3;
    /// Ramping out
    pub const RAMP_OUT: u8 = 4;
    /// Ramped out; the voice can be freed
    pub const DEAD: u8 = 5;
}

/// Per-side linear gain ramp
///
/// `volume` moves toward `target` by at most `|delta|` per output sample and
/// never overshoots. The gain applied to a sample is `volume * mix`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VolumeRamp {
    pub volume: f32,
    pub delta: f32,
    pub target: f32,
    pub mix: f32,
    pub declick_stage: u8,
}

impl VolumeRamp {
    pub fn new(volume: f32, target: f32, delta: f32, mix: f32, declick_stage: u8) -> Self {
        Self {
            volume,
            delta,
            target,
            mix,
            declick_stage,
        }
    }

    /// Whether the ramp has reached its target
    pub fn is_settled(&self) -> bool {
        self.volume == self.target
    }

    /// Advance one output sample and return the gain for it
    #[inline]
    pub fn step(&mut self) -> f32 {
        if self.volume != self.target {
            let step = self.delta.abs();
            if step == 0.0 {
                self.volume = self.target;
            } else if self.volume < self.target {
                self.volume = (self.volume + step).min(self.target);
            } else {
                self.volume = (self.volume - step).max(self.target);
            }
            if self.volume == self.target {
                self.advance_declick();
            }
        }
        self.volume * self.mix
    }

    /// Move to the next declick stage after the ramp settled
    ///
    /// Steady voices stay steady; every other stage moves forward once.
    pub fn advance_declick(&mut self) {
        if self.declick_stage != declick::STEADY && self.declick_stage < declick::DEAD {
            self.declick_stage += 1;
        }
    }
}

// ============================================================================
// Sample cursor
// ============================================================================

/// What happens when the feed position leaves the playback window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pickup {
    /// Stop at the end (or bounce once off the start when reversed)
    #[default]
    StopAtEnd,
    /// Jump back to the window start
    Loop,
    /// Reverse direction at both ends
    PingPong,
    /// Stop when a reversed sample reaches its start
    StopAfterReverse,
}

/// Source walker plus the resamplers it feeds
#[derive(Debug, Clone)]
pub struct SampleCursor {
    /// Next source frame to feed
    pub pos: i64,
    /// Window start (inclusive)
    pub start: i64,
    /// Window end (exclusive)
    pub end: i64,
    /// `1` forward, `-1` reverse, `0` stopped
    pub dir: i8,
    pub pickup: Pickup,
    pub quality: Quality,
    /// Frames skipped by loop pickups, for position reporting
    pub time_lost: i64,
    /// Fractional source position left over from [`skip`](Self::skip)
    carry: f64,
    channels: usize,
    fir: [Resampler; 2],
}

impl SampleCursor {
    /// Cursor over a source with `channels` interleaved channels (1 or 2)
    pub fn new(
        ctx: Arc<ResamplerContext>,
        channels: usize,
        pos: i64,
        start: i64,
        end: i64,
        quality: Quality,
    ) -> Self {
        let fir = [Resampler::new(ctx.clone()), Resampler::new(ctx)];
        let mut cursor = Self {
            pos,
            start,
            end,
            dir: 1,
            pickup: Pickup::StopAtEnd,
            quality,
            time_lost: 0,
            carry: 0.0,
            channels: channels.clamp(1, 2),
            fir,
        };
        cursor.reset(pos, start, end);
        cursor
    }

    /// Restart from `pos` with a new window, discarding buffered audio
    pub fn reset(&mut self, pos: i64, start: i64, end: i64) {
        self.pos = pos;
        self.start = start;
        self.end = end;
        self.dir = 1;
        self.time_lost = 0;
        self.carry = 0.0;
        for fir in &mut self.fir {
            fir.set_quality(self.quality);
            fir.clear();
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// True once the source stopped and every buffered sample was consumed
    pub fn is_finished(&mut self) -> bool {
        self.dir == 0 && self.fir[0].get_sample_count() == 0
    }

    /// Apply the pickup until `pos` is back inside the window
    ///
    /// Returns `false` once the cursor has stopped.
    fn process_pickup(&mut self) -> bool {
        loop {
            let inside = match self.dir {
                d if d < 0 => self.pos >= self.start,
                d if d > 0 => self.pos < self.end,
                _ => return false,
            };
            if inside {
                return true;
            }

            let len = self.end - self.start;
            match self.pickup {
                Pickup::Loop if len > 0 => {
                    self.pos -= len;
                    self.time_lost += len;
                }
                Pickup::PingPong if len > 0 => {
                    if self.dir < 0 {
                        self.pos = (self.start << 1) - 1 - self.pos;
                        self.dir = 1;
                        self.time_lost += len << 1;
                    } else {
                        self.pos = (self.end << 1) - 1 - self.pos;
                        self.dir = -1;
                    }
                }
                Pickup::StopAtEnd | Pickup::Loop | Pickup::PingPong => {
                    if self.dir < 0 {
                        self.pos = (self.start << 1) - 1 - self.pos;
                        self.dir = 1;
                    } else {
                        self.dir = 0;
                    }
                }
                Pickup::StopAfterReverse => self.dir = 0,
            }

            if self.dir == 0 {
                return false;
            }
        }
    }

    /// Top up the resamplers from the source
    fn feed<F: SampleFormat>(&mut self, data: &[F::Sample]) {
        let frames = (data.len() / self.channels) as i64;
        while self.fir[0].get_free_count() > 0 {
            if !self.process_pickup() {
                return;
            }
            if self.pos < 0 || self.pos >= frames {
                self.dir = 0;
                return;
            }
            let base = self.pos as usize * self.channels;
            for ch in 0..self.channels {
                F::write(&mut self.fir[ch], data[base + ch]);
            }
            self.pos += self.dir as i64;
        }
    }

    fn prepare(&mut self, delta: f64) -> bool {
        if delta <= 0.0 || !delta.is_finite() {
            return false;
        }
        for fir in &mut self.fir[..self.channels] {
            fir.set_quality(self.quality);
            fir.set_rate(delta);
        }
        true
    }

    fn frame<F: SampleFormat>(&mut self) -> (f32, f32) {
        let l = F::read(&mut self.fir[0]);
        let r = if self.channels == 2 {
            F::read(&mut self.fir[1])
        } else {
            l
        };
        (l, r)
    }

    /// Resample up to `frames` output frames
    ///
    /// `delta` is source frames per output frame. With `dst` present, each
    /// frame is scaled by the ramps and added to `dst[2n]`/`dst[2n+1]`;
    /// without it the cursor only advances. Returns the number of frames
    /// produced, which is short when the source stops.
    pub fn resample<F: SampleFormat>(
        &mut self,
        data: &[F::Sample],
        mut dst: Option<&mut [i32]>,
        frames: usize,
        ramps: &mut [VolumeRamp; 2],
        delta: f64,
    ) -> usize {
        if !self.prepare(delta) {
            return 0;
        }

        for ramp in ramps.iter_mut() {
            if ramp.is_settled() {
                ramp.advance_declick();
            }
        }

        for n in 0..frames {
            self.feed::<F>(data);
            if self.fir[0].get_sample_count() == 0 {
                return n;
            }

            let (l, r) = self.frame::<F>();
            let gl = ramps[0].step();
            let gr = ramps[1].step();
            if let Some(out) = dst.as_deref_mut() {
                out[n * 2] += (l * gl) as i32;
                out[n * 2 + 1] += (r * gr) as i32;
            }

            for fir in &mut self.fir[..self.channels] {
                fir.remove_sample(true);
            }
        }
        frames
    }

    /// Advance by `frames` output frames without producing audio
    ///
    /// Walks the source position arithmetically instead of running the
    /// kernels. Buffered output is dropped and the interpolation history is
    /// reloaded from the source frames just behind the new position, so a
    /// voice that becomes audible again resumes without a step.
    /// Returns the number of frames covered before the source stopped.
    pub fn skip<F: SampleFormat>(&mut self, data: &[F::Sample], frames: usize, delta: f64) -> usize {
        if delta <= 0.0 || !delta.is_finite() || self.dir == 0 {
            return 0;
        }
        let total = self.carry + frames as f64 * delta;
        let whole = total.floor();
        self.carry = total - whole;

        let mut remaining = whole as i64;
        while remaining > 0 {
            if !self.process_pickup() {
                break;
            }
            let len = self.end - self.start;
            if matches!(self.pickup, Pickup::Loop | Pickup::PingPong)
                && len > 0
                && self.pos >= self.start
                && remaining > len << 1
            {
                let cycles = remaining / (len << 1);
                remaining -= cycles * (len << 1);
                self.time_lost += cycles * (len << 1);
            }
            let room = if self.dir > 0 {
                self.end - self.pos
            } else {
                self.pos - self.start + 1
            };
            let step = remaining.min(room.max(1));
            self.pos += step * self.dir as i64;
            remaining -= step;
        }
        if remaining > 0 {
            self.process_pickup();
        }

        for fir in &mut self.fir {
            fir.set_quality(self.quality);
            fir.clear();
        }
        if self.dir != 0 {
            self.load_history::<F>(data);
        }
        if remaining > 0 {
            self.carry = 0.0;
            (((whole as i64 - remaining) as f64) / delta) as usize
        } else {
            frames
        }
    }

    /// Seed each resampler's history with the source frames behind `pos`
    fn load_history<F: SampleFormat>(&mut self, data: &[F::Sample]) {
        let taps = self.quality.input_delay();
        if taps == 0 {
            return;
        }
        let frames = (data.len() / self.channels) as i64;
        let len = self.end - self.start;
        let dir = self.dir as i64;
        // Forward loops replay the loop end before the loop start
        let wraps = self.pickup == Pickup::Loop && dir > 0 && self.time_lost > 0 && len > 0;

        let mut history = [0.0f32; SINC_WIDTH];
        for ch in 0..self.channels {
            for (i, tap) in history[..taps].iter_mut().enumerate() {
                let mut p = self.pos - (taps - i) as i64 * dir;
                if wraps && p < self.start {
                    p += len;
                }
                *tap = if (0..frames).contains(&p) {
                    F::input(data[p as usize * self.channels + ch])
                } else {
                    0.0
                };
            }
            self.fir[ch].set_history(&history[..taps]);
        }
    }

    /// The frame the next [`resample`](Self::resample) call would start with,
    /// scaled by the ramps' current gain, without consuming it
    pub fn current_sample<F: SampleFormat>(
        &mut self,
        data: &[F::Sample],
        ramps: &[VolumeRamp; 2],
        delta: f64,
    ) -> [i32; 2] {
        if !self.prepare(delta) {
            return [0, 0];
        }
        self.feed::<F>(data);
        if self.fir[0].get_sample_count() == 0 {
            return [0, 0];
        }
        let (l, r) = self.frame::<F>();
        [
            (l * ramps[0].volume * ramps[0].mix) as i32,
            (r * ramps[1].volume * ramps[1].mix) as i32,
        ]
    }
}

#[cfg(test)]
mod tests;
