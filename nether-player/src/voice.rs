//! Sounding voices
//!
//! A [`Voice`] is one instance of a sample being played: it carries the
//! sample cursor, the envelope positions, LFO phases, filter memory and the
//! declick ramp. Channels own at most one voice; older voices pushed aside by
//! a new note keep sounding from the background pool.

use std::sync::Arc;

use nether_resampler::{declick, Pickup, Quality, ResamplerContext, SampleCursor};
use nether_tracker::TrackerSample;

use crate::filter::FilterState;

/// Voice state bits
pub(crate) mod flags {
    /// Displaced from its channel by a New Note Action
    pub const BACKGROUND: u8 = 1;
    /// Key released: sustain loops no longer hold
    pub const SUSTAINOFF: u8 = 2;
    /// Fade-out counter is running
    pub const FADING: u8 = 4;
    /// Finished; freed on the next housekeeping pass
    pub const DEAD: u8 = 8;
    /// Playing the sample backwards (S9F)
    pub const REVERSE: u8 = 16;
}

/// Bits of [`Voice::enabled_envelopes`]
pub(crate) mod env {
    pub const VOLUME: u8 = 1;
    pub const PANNING: u8 = 2;
    pub const PITCH: u8 = 4;
}

/// Fixed-point shift applied to envelope values and pan positions
pub(crate) const ENVELOPE_SHIFT: u32 = 8;

/// Full-scale fade-out counter
pub(crate) const FADEOUT_MAX: i32 = 1024;

/// Position of one envelope generator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct EnvelopeCursor {
    /// First node whose tick lies at or after `tick`
    pub next_node: i32,
    pub tick: i32,
    /// Current value, shifted left by [`ENVELOPE_SHIFT`]
    pub value: i32,
}

#[derive(Debug, Clone)]
pub(crate) struct Voice {
    /// [`flags`] bits
    pub flags: u8,
    /// Index of the channel this voice was started on
    pub channel: usize,

    // Source
    /// Sample number (1-based, always a sample that exists)
    pub sample: u8,
    /// Instrument playing the note, when the module uses instruments
    pub instrument: Option<u8>,
    /// Instrument supplying envelopes and fade-out
    pub env_instrument: Option<u8>,
    /// Instrument number from the pattern, for duplicate checks
    pub instnum: u8,

    // Declick ramp
    pub declick_stage: u8,
    pub float_volume: [f32; 2],
    pub ramp_volume: [f32; 2],
    pub ramp_delta: [f32; 2],

    // Volume and panning
    pub channel_volume: i32,
    pub volume: i32,
    /// Pan shifted by [`ENVELOPE_SHIFT`]; above 64 << shift means surround
    pub pan: i32,
    /// Random volume variation (percent of volume)
    pub volume_offset: i32,
    /// Random pan variation
    pub panning_offset: i32,

    // Pitch
    pub note: i32,
    /// Portamento offset: 1/256 semitones (linear) or Amiga period units
    pub slide: i32,
    pub finetune: i32,
    /// Playback rate before per-render pitch modifiers
    pub delta: f64,

    pub enabled_envelopes: u8,
    pub volume_envelope: EnvelopeCursor,
    pub pan_envelope: EnvelopeCursor,
    pub pitch_envelope: EnvelopeCursor,
    pub fadeoutcount: i32,

    // Filter
    pub filter_cutoff: i32,
    pub filter_resonance: i32,
    pub true_filter_cutoff: i32,
    pub true_filter_resonance: i32,
    pub filter_state: [FilterState; 2],

    // LFOs
    pub vibrato_speed: i32,
    pub vibrato_depth: i32,
    /// Number of vibrato commands stacked this row
    pub vibrato_n: i32,
    pub vibrato_time: u8,
    pub vibrato_waveform: u8,

    pub tremolo_speed: i32,
    pub tremolo_depth: i32,
    pub tremolo_time: u8,
    pub tremolo_waveform: u8,
    pub tremolo_random: i32,

    pub panbrello_speed: i32,
    pub panbrello_depth: i32,
    pub panbrello_time: u8,
    pub panbrello_waveform: u8,
    pub panbrello_random: i32,

    pub sample_vibrato_time: u8,
    pub sample_vibrato_waveform: u8,
    /// IT: depth << 8 ramping up by the sample's rate. XM: ticks since note on
    pub sample_vibrato_depth: i32,
    pub sample_vibrato_random: i32,

    /// Quality requested by the renderer, before the sample's cap
    pub quality: Quality,
    pub cursor: SampleCursor,
    ctx: Arc<ResamplerContext>,
}

impl Voice {
    /// Fresh voice on `channel` for `sample`, positioned at frame 0
    pub(crate) fn new(
        ctx: Arc<ResamplerContext>,
        channel: usize,
        sample_number: u8,
        sample: &TrackerSample,
        quality: Quality,
    ) -> Self {
        let cursor = SampleCursor::new(ctx.clone(), sample.channels(), 0, 0, 0, quality);
        let mut voice = Self {
            flags: 0,
            channel,
            sample: sample_number,
            instrument: None,
            env_instrument: None,
            instnum: 0,
            declick_stage: declick::SILENT,
            float_volume: [0.0; 2],
            ramp_volume: [0.0; 2],
            ramp_delta: [0.0; 2],
            channel_volume: 64,
            volume: 0,
            pan: 32 << ENVELOPE_SHIFT,
            volume_offset: 0,
            panning_offset: 0,
            note: 60,
            slide: 0,
            finetune: 0,
            delta: 0.0,
            enabled_envelopes: 0,
            volume_envelope: EnvelopeCursor::default(),
            pan_envelope: EnvelopeCursor::default(),
            pitch_envelope: EnvelopeCursor::default(),
            fadeoutcount: FADEOUT_MAX,
            filter_cutoff: 127,
            filter_resonance: 0,
            true_filter_cutoff: 127 << ENVELOPE_SHIFT,
            true_filter_resonance: 0,
            filter_state: [FilterState::default(); 2],
            vibrato_speed: 0,
            vibrato_depth: 0,
            vibrato_n: 0,
            vibrato_time: 0,
            vibrato_waveform: 0,
            tremolo_speed: 0,
            tremolo_depth: 0,
            tremolo_time: 0,
            tremolo_waveform: 0,
            tremolo_random: 0,
            panbrello_speed: 0,
            panbrello_depth: 0,
            panbrello_time: 0,
            panbrello_waveform: 0,
            panbrello_random: 0,
            sample_vibrato_time: 0,
            sample_vibrato_waveform: sample.vibrato_waveform,
            sample_vibrato_depth: 0,
            sample_vibrato_random: 0,
            quality,
            cursor,
            ctx,
        };
        voice.reset_resamplers(sample, 0);
        voice
    }

    pub(crate) fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.has(flags::DEAD)
    }

    /// Pick the playback window and loop behaviour for the current state
    ///
    /// The sustain loop holds until the key is released, then the normal
    /// loop (if any) takes over.
    pub(crate) fn update_resamplers(&mut self, sample: &TrackerSample) {
        let sustain_off = self.has(flags::SUSTAINOFF);
        let reverse = self.has(flags::REVERSE);
        let cursor = &mut self.cursor;
        let looped = |start: u32, end: u32, pingpong: bool| {
            if start == end {
                Pickup::StopAtEnd
            } else if pingpong {
                Pickup::PingPong
            } else {
                Pickup::Loop
            }
        };

        if sample.has_sus_loop() && !sustain_off {
            cursor.start = sample.sus_loop_start as i64;
            cursor.end = sample.sus_loop_end as i64;
            cursor.pickup = looped(
                sample.sus_loop_start,
                sample.sus_loop_end,
                sample.flags.contains(nether_tracker::SampleFlags::PINGPONG_SUS_LOOP),
            );
        } else if sample.has_loop() {
            cursor.start = sample.loop_start as i64;
            cursor.end = sample.loop_end as i64;
            cursor.pickup = looped(
                sample.loop_start,
                sample.loop_end,
                sample.flags.contains(nether_tracker::SampleFlags::PINGPONG_LOOP),
            );
        } else if reverse {
            cursor.start = 0;
            cursor.end = sample.length as i64;
            cursor.dir = -1;
            cursor.pickup = Pickup::StopAfterReverse;
        } else {
            cursor.start = if sample.has_sus_loop() {
                sample.sus_loop_start as i64
            } else {
                0
            };
            cursor.end = sample.length as i64;
            cursor.pickup = Pickup::StopAtEnd;
        }
    }

    /// Restart the sample cursor at `pos`; called whenever the sample or
    /// its position changes
    pub(crate) fn reset_resamplers(&mut self, sample: &TrackerSample, pos: i64) {
        let quality = self.capped_quality(sample);
        if self.cursor.channels() != sample.channels() {
            self.cursor = SampleCursor::new(self.ctx.clone(), sample.channels(), pos, 0, 0, quality);
        }
        self.cursor.quality = quality;
        self.cursor.reset(pos, 0, 0);
        self.flags &= !flags::DEAD;
        self.update_resamplers(sample);
    }

    /// Requested quality limited by the sample's own maximum
    pub(crate) fn capped_quality(&self, sample: &TrackerSample) -> Quality {
        match sample.max_resampling_quality {
            Some(max) => self.quality.min(Quality::from_level(max as i32)),
            None => self.quality,
        }
    }

    pub(crate) fn set_quality(&mut self, quality: Quality, sample: &TrackerSample) {
        self.quality = quality;
        self.cursor.quality = self.capped_quality(sample);
    }

    /// Keep the audible position when a key-off moves playback from the
    /// sustain loop into the normal loop
    pub(crate) fn fix_sample_looping(&mut self, sample: &TrackerSample) {
        if sample.has_loop() && sample.has_sus_loop() {
            if self.cursor.dir < 0 {
                self.cursor.pos = ((sample.sus_loop_end as i64) << 1) - 1 - self.cursor.pos;
                self.cursor.dir = 1;
            }
            self.cursor.pos += self.cursor.time_lost;
            self.cursor.time_lost = 0;
        }
    }

    /// Ask the declick ramp to fade this voice out
    pub(crate) fn cut(&mut self) {
        self.declick_stage = declick::CUT;
    }

    /// Restart the declick ramp from silence
    pub(crate) fn retrigger_declick(&mut self) {
        self.declick_stage = declick::SILENT;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_voice(channel: usize) -> Voice {
        let sample = TrackerSample::from_pcm16(vec![0; 16]);
        Voice::new(ResamplerContext::new(), channel, 1, &sample, Quality::Linear)
    }

    #[test]
    fn test_sustain_loop_until_key_off() {
        let sample = TrackerSample::from_pcm16(vec![0; 100])
            .with_loop(10, 90, false)
            .with_sus_loop(20, 30, true);
        let mut voice = Voice::new(ResamplerContext::new(), 0, 1, &sample, Quality::Linear);
        assert_eq!((voice.cursor.start, voice.cursor.end), (20, 30));
        assert_eq!(voice.cursor.pickup, Pickup::PingPong);

        voice.flags |= flags::SUSTAINOFF;
        voice.update_resamplers(&sample);
        assert_eq!((voice.cursor.start, voice.cursor.end), (10, 90));
        assert_eq!(voice.cursor.pickup, Pickup::Loop);
    }

    #[test]
    fn test_reverse_without_loops_plays_whole_sample_backwards() {
        let sample = TrackerSample::from_pcm8(vec![0; 50]);
        let mut voice = Voice::new(ResamplerContext::new(), 0, 1, &sample, Quality::Zoh);
        assert_eq!(voice.cursor.pickup, Pickup::StopAtEnd);

        voice.flags |= flags::REVERSE;
        voice.reset_resamplers(&sample, 49);
        assert_eq!(voice.cursor.dir, -1);
        assert_eq!(voice.cursor.pickup, Pickup::StopAfterReverse);
        assert_eq!(voice.cursor.pos, 49);
    }

    #[test]
    fn test_sample_quality_cap() {
        let mut sample = TrackerSample::from_pcm16(vec![0; 8]);
        sample.max_resampling_quality = Some(1);
        let voice = Voice::new(ResamplerContext::new(), 0, 1, &sample, Quality::Sinc);
        assert_eq!(voice.cursor.quality, Quality::Blep);
        assert_eq!(voice.quality, Quality::Sinc, "requested quality is kept for later resets");
    }
}
