//! Sample output
//!
//! Rendering alternates between mixing up to the next tick boundary and
//! running [`Sigrenderer::process_tick`]. Within a stretch, voices are mixed
//! loudest first; once `max_to_mix` voices have been mixed the rest only
//! advance their position. Voices with an active filter are rendered into a
//! scratch buffer and filtered into the output.

use std::sync::Arc;

use nether_resampler::{declick, Pcm16, Pcm24, Pcm8, SampleCursor, VolumeRamp};
use nether_tracker::{SampleData, TrackerModule, TrackerSample};
use smallvec::SmallVec;
use tracing::debug;

use super::Sigrenderer;
use crate::arena::VoiceHandle;
use crate::filter;
use crate::voice::{flags, ENVELOPE_SHIFT};
use crate::N_CHANNELS;

/// Full scale of the integer output, as a float divisor
const OUTPUT_SCALE: f32 = 8_388_608.0;

const NO_FILTER_CUTOFF: i32 = 127 << ENVELOPE_SHIFT;

fn skip(sample: &TrackerSample, cursor: &mut SampleCursor, frames: usize, delta: f64) -> usize {
    match &sample.data {
        SampleData::Pcm8(data) => cursor.skip::<Pcm8>(data, frames, delta),
        SampleData::Pcm16(data) => cursor.skip::<Pcm16>(data, frames, delta),
        SampleData::Pcm24(data) => cursor.skip::<Pcm24>(data, frames, delta),
    }
}

fn resample(
    sample: &TrackerSample,
    cursor: &mut SampleCursor,
    dst: Option<&mut [i32]>,
    frames: usize,
    ramps: &mut [VolumeRamp; 2],
    delta: f64,
) -> usize {
    match &sample.data {
        SampleData::Pcm8(data) => cursor.resample::<Pcm8>(data, dst, frames, ramps, delta),
        SampleData::Pcm16(data) => cursor.resample::<Pcm16>(data, dst, frames, ramps, delta),
        SampleData::Pcm24(data) => cursor.resample::<Pcm24>(data, dst, frames, ramps, delta),
    }
}

impl Sigrenderer {
    /// Render `out.len() / 2` stereo frames, adding them into `out`
    ///
    /// `volume` scales the whole mix and `delta` is the time step per frame
    /// in 1/65536 second units (see [`Sigrenderer::frame_delta`]). Output is
    /// in 24-bit range. Returns the number of frames rendered, which is
    /// short when a callback stopped playback.
    pub fn render(&mut self, volume: f32, delta: f64, out: &mut [i32]) -> usize {
        let frames = out.len() / 2;
        self.render_frames(volume, delta, Some(out), frames)
    }

    /// Like [`Sigrenderer::render`], writing normalized floats to `out`
    pub fn render_f32(&mut self, volume: f32, delta: f64, out: &mut [f32]) -> usize {
        let mut mix = std::mem::take(&mut self.mix_buffer);
        mix.clear();
        mix.resize(out.len(), 0);
        let rendered = self.render(volume, delta, &mut mix);
        for (dst, &src) in out.iter_mut().zip(&mix) {
            *dst += src as f32 / OUTPUT_SCALE;
        }
        self.mix_buffer = mix;
        rendered
    }

    /// Advance playback by `frames` without producing audio
    pub fn skip(&mut self, frames: usize, delta: f64) -> usize {
        self.render_frames(0.0, delta, None, frames)
    }

    fn render_frames(&mut self, volume: f32, delta: f64, mut out: Option<&mut [i32]>, frames: usize) -> usize {
        if self.order < 0 {
            return 0;
        }
        let dt = (delta * 65536.0 + 0.5) as i64;
        if dt <= 0 {
            return 0;
        }
        let volume = if out.is_some() { volume } else { 0.0 };
        let module = Arc::clone(&self.module);

        let mut pos = 0;
        let mut size = frames;
        loop {
            let todo = ((self.time_left << 16) + self.sub_time_left).max(0) / dt;
            if todo >= size as i64 {
                break;
            }
            let todo = todo as usize;

            let dst = out.as_deref_mut().map(|o| &mut o[pos * 2..]);
            self.render_voices(&module, volume, delta, dst, todo);
            pos += todo;
            size -= todo;
            self.consume_time(todo as i64 * dt);

            if self.process_tick().is_break() {
                debug!(frames = pos, "playback stopped by callback");
                self.order = -1;
                self.row = -1;
                return pos;
            }
        }

        let dst = out.as_deref_mut().map(|o| &mut o[pos * 2..]);
        self.render_voices(&module, volume, delta, dst, size);
        self.consume_time(size as i64 * dt);
        pos + size
    }

    fn consume_time(&mut self, amount: i64) {
        let t = self.sub_time_left - amount;
        self.sub_time_left = t & 65535;
        self.time_left += t >> 16;
    }

    /// Mix every voice for `frames` frames, loudest first
    fn render_voices(
        &mut self,
        module: &TrackerModule,
        volume: f32,
        delta: f64,
        mut out: Option<&mut [i32]>,
        frames: usize,
    ) {
        if frames == 0 {
            return;
        }

        let mut to_mix: SmallVec<[(VoiceHandle, f32); 64]> = self
            .live_handles()
            .into_iter()
            .filter_map(|h| {
                let voice = self.voices.get(h).filter(|v| !v.is_dead())?;
                let gain = if volume == 0.0 { 0.0 } else { self.calculate_volume(voice, volume) };
                Some((h, gain))
            })
            .collect();
        if volume != 0.0 {
            to_mix.sort_by(|a, b| b.1.total_cmp(&a.1));
        }

        let mut left_to_mix = self.max_to_mix;
        for (handle, _) in to_mix {
            let Some(voice) = self.voices.get(handle) else {
                continue;
            };
            let mut note_delta = delta * voice.delta;
            let mut cutoff = voice.filter_cutoff << ENVELOPE_SHIFT;
            self.apply_pitch_modifications(voice, &mut note_delta, &mut cutoff);

            let Some(voice) = self.voices.get_mut(handle) else {
                continue;
            };
            if cutoff != NO_FILTER_CUTOFF || voice.filter_resonance != 0 {
                voice.true_filter_cutoff = cutoff;
                voice.true_filter_resonance = voice.filter_resonance;
            }
            let filtered = voice.true_filter_cutoff != NO_FILTER_CUTOFF || voice.true_filter_resonance != 0;

            match out.as_deref_mut() {
                Some(dst) if volume != 0.0 && filtered => {
                    self.render_filtered(module, handle, volume, delta, note_delta, dst, frames, &mut left_to_mix);
                }
                dst => {
                    for state in &mut voice.filter_state {
                        state.reset();
                    }
                    self.render_voice(module, handle, volume, delta, note_delta, dst, frames, &mut left_to_mix);
                }
            }
        }

        self.free_dead_voices();
    }

    /// Render a voice through its resonant filter into `dst`
    #[allow(clippy::too_many_arguments)]
    fn render_filtered(
        &mut self,
        module: &TrackerModule,
        handle: VoiceHandle,
        volume: f32,
        main_delta: f64,
        note_delta: f64,
        dst: &mut [i32],
        frames: usize,
        left_to_mix: &mut usize,
    ) {
        let mut scratch = self.take_filter_buffer(frames * 2);
        let rendered = self.render_voice(
            module,
            handle,
            volume,
            main_delta,
            note_delta,
            Some(&mut scratch),
            frames,
            left_to_mix,
        );

        if let Some(voice) = self.voices.get_mut(handle) {
            let sampfreq = (65536.0 / main_delta) as i32;
            let (cutoff, resonance) = (voice.true_filter_cutoff, voice.true_filter_resonance);
            for side in 0..2 {
                filter::apply(
                    &mut voice.filter_state[side],
                    &mut dst[side..],
                    &scratch[side..],
                    rendered,
                    2,
                    sampfreq,
                    cutoff,
                    resonance,
                );
            }
        }
        self.restore_filter_buffer(scratch);
    }

    /// Run one voice's resampler for `frames` frames
    ///
    /// Past the voice cap, or without an output, the voice only advances.
    #[allow(clippy::too_many_arguments)]
    fn render_voice(
        &mut self,
        module: &TrackerModule,
        handle: VoiceHandle,
        volume: f32,
        main_delta: f64,
        note_delta: f64,
        dst: Option<&mut [i32]>,
        frames: usize,
        left_to_mix: &mut usize,
    ) -> usize {
        let quality = self.quality;
        let Some(voice) = self.voices.get_mut(handle) else {
            return 0;
        };
        if voice.is_dead() {
            return 0;
        }
        let Some(sample) = module.sample(voice.sample) else {
            voice.flags |= flags::DEAD;
            return 0;
        };
        voice.set_quality(quality, sample);

        let dst = dst.filter(|_| volume != 0.0 && *left_to_mix > 0);
        let rendered = match dst {
            None => skip(sample, &mut voice.cursor, frames, note_delta),
            Some(dst) => {
                let mut ramps = [0, 1].map(|side| {
                    VolumeRamp::new(
                        voice.ramp_volume[side],
                        voice.float_volume[side],
                        (voice.ramp_delta[side] as f64 * main_delta) as f32,
                        volume,
                        voice.declick_stage,
                    )
                });
                let rendered = resample(sample, &mut voice.cursor, Some(dst), frames, &mut ramps, note_delta);
                voice.ramp_volume = [ramps[0].volume, ramps[1].volume];
                voice.declick_stage = ramps[0].declick_stage.max(ramps[1].declick_stage);
                if voice.declick_stage >= declick::RAMP_OUT {
                    voice.flags |= flags::DEAD;
                }
                *left_to_mix -= 1;
                rendered
            }
        };

        if voice.cursor.dir == 0 {
            voice.flags |= flags::DEAD;
        }
        rendered
    }

    /// Release voices that finished during the last stretch
    fn free_dead_voices(&mut self) {
        for ch in 0..N_CHANNELS {
            let dead = self.channel_voice(ch).is_some_and(|v| v.is_dead());
            if dead {
                self.free_channel_voice(ch);
            }
        }
        for slot in 0..self.pool.len() {
            let dead = self.pool[slot]
                .and_then(|h| self.voices.get(h))
                .is_some_and(|v| v.is_dead());
            if dead {
                self.free_pool_slot(slot);
            }
        }
    }
}
