//! Per-tick voice state: pitch, volume, pan and the declick ramp targets
//!
//! [`Sigrenderer::process_all_playing`] runs once per tick after the effects.
//! It copies channel state into the voices, computes each voice's playback
//! rate, steps envelopes and fade-out, and sets up the stereo gains the
//! renderer ramps toward during the next tick.

use nether_resampler::declick;
use nether_tracker::{FormatFlags, TrackerModule};
use rand::Rng;

use super::{is_pure_xm, Sigrenderer};
use crate::arena::VoiceHandle;
use crate::envelope::{step_it, step_xm};
use crate::tables::{delta_to_note, lfo, waveform, PTM_VOLUME};
use crate::voice::{env, flags, Voice, ENVELOPE_SHIFT};
use crate::{AMIGA_DIVISOR, N_CHANNELS, PITCH_BASE, SEMITONE_BASE, TICK_TIME_DIVIDEND};

/// Smallest Amiga period reciprocal before a slid note is considered gone
const MIN_AMIGA_DELTA: f64 = (1.0 / 65536.0) / 32768.0;

/// Ramp speeds, in multiples of one tick's worth of change
const RAMP_SCALE_NORMAL: f32 = 4.0;
const RAMP_SCALE_FAST: f32 = 48.0;

const PAN_CENTRE: i32 = 32 << ENVELOPE_SHIFT;
const PAN_RIGHT: i32 = 64 << ENVELOPE_SHIFT;

impl Sigrenderer {
    // ========================================================================
    // Gain, pan and pitch modifiers
    // ========================================================================

    /// Linear gain of a voice, with `volume` as the overall scale
    ///
    /// Zero when the channel is muted, tremor holds it silent or the
    /// combined volume reaches zero.
    pub(crate) fn calculate_volume(&self, voice: &Voice, volume: f32) -> f32 {
        if volume == 0.0 {
            return 0.0;
        }
        let channel = &self.channels[voice.channel];
        if channel.muted || channel.tremor_silenced() {
            return 0.0;
        }

        let module = self.module.as_ref();
        let Some(sample) = module.sample(voice.sample) else {
            return 0.0;
        };

        let time = if voice.tremolo_waveform == waveform::RAMP_UP && module.was(FormatFlags::WAS_MOD) {
            voice.vibrato_time
        } else {
            voice.tremolo_time
        };
        let tremolo = lfo(voice.tremolo_waveform, time, voice.tremolo_random) * voice.tremolo_depth;

        let mut vol = (voice.volume << 5) + tremolo;
        if vol <= 0 {
            return 0.0;
        }
        vol = vol.min(64 << 5);

        if module.was(FormatFlags::WAS_PTM) {
            let index = (vol >> 5) as usize;
            let mut v = PTM_VOLUME[index];
            if vol < 64 << 5 {
                let f = vol & 31;
                v = (v * (32 - f) + PTM_VOLUME[index + 1] * f) >> 5;
            }
            vol = v << 1;
        }

        let mut gain = volume as f64
            * vol as f64
            * sample.global_volume as f64
            * voice.channel_volume as f64
            * self.globalvolume as f64
            * module.mixing_volume as f64
            / ((64 << 5) as f64 * 64.0 * 64.0 * 128.0 * 128.0);

        if gain != 0.0 {
            if let Some(instrument) = voice.instrument.and_then(|n| module.instrument(n)) {
                let volume_envelope = voice
                    .env_instrument
                    .and_then(|n| module.instrument(n))
                    .filter(|i| !i.volume_envelope.nodes.is_empty());
                if voice.enabled_envelopes & env::VOLUME != 0 && volume_envelope.is_some() {
                    gain *= voice.volume_envelope.value as f64 / (64 << ENVELOPE_SHIFT) as f64;
                }
                gain *= instrument.global_volume as f64 * voice.fadeoutcount as f64 / (128.0 * 1024.0);
            }
        }
        gain as f32
    }

    /// Pan of a voice after panbrello and the pan envelope, shifted by
    /// [`ENVELOPE_SHIFT`]; surround passes through unchanged
    pub(crate) fn apply_pan_envelope(&self, voice: &Voice) -> i32 {
        if voice.pan > PAN_RIGHT {
            return voice.pan;
        }

        let mut pan = voice.pan;
        if voice.panbrello_depth != 0 {
            let wave = lfo(voice.panbrello_waveform, voice.panbrello_time, voice.panbrello_random);
            pan = (wave * (voice.panbrello_depth << 3) + voice.pan).clamp(0, PAN_RIGHT);
        }

        if voice.env_instrument.is_some() && voice.enabled_envelopes & env::PANNING != 0 {
            let room = if pan > PAN_CENTRE { PAN_RIGHT - pan } else { pan };
            pan += (voice.pan_envelope.value * room) >> (5 + ENVELOPE_SHIFT);
        }
        pan
    }

    /// Apply sample auto-vibrato and the pitch (or filter) envelope to a
    /// render delta and filter cutoff
    pub(crate) fn apply_pitch_modifications(&self, voice: &Voice, delta: &mut f64, cutoff: &mut i32) {
        let module = self.module.as_ref();
        let xm = module.was(FormatFlags::WAS_XM);

        if let Some(sample) = module.sample(voice.sample) {
            let mut shift = lfo(
                voice.sample_vibrato_waveform,
                voice.sample_vibrato_time,
                voice.sample_vibrato_random,
            );
            if xm {
                // Depth ramps in over `vibrato_rate` ticks
                let mut depth = sample.vibrato_depth as i32;
                if sample.vibrato_rate != 0 {
                    depth = depth * voice.sample_vibrato_depth / sample.vibrato_rate as i32;
                }
                shift *= depth;
            } else {
                shift *= voice.sample_vibrato_depth >> 8;
            }
            shift >>= 4;

            if shift != 0 {
                if module.uses_linear_slides() || !xm {
                    *delta *= PITCH_BASE.powi(shift);
                } else if voice.delta > 0.0 {
                    // Amiga vibrato bends the period, not the frequency
                    let scale = *delta / voice.delta;
                    let period = ((1.0 / 65536.0) / voice.delta - shift as f64 / AMIGA_DIVISOR)
                        .max((1.0 / 65536.0) / 32767.0);
                    *delta = (1.0 / 65536.0) / period * scale;
                }
            }
        }

        if voice.enabled_envelopes & env::PITCH == 0 {
            return;
        }
        let Some(instrument) = voice.env_instrument.and_then(|n| module.instrument(n)) else {
            return;
        };
        let p = voice.pitch_envelope.value;
        if instrument.pitch_envelope.is_filter() {
            *cutoff = (*cutoff * (p + PAN_CENTRE)) >> (6 + ENVELOPE_SHIFT);
        } else {
            *delta *= PITCH_BASE.powi(p >> (ENVELOPE_SHIFT - 7));
        }
    }

    // ========================================================================
    // Per-tick voice update
    // ========================================================================

    /// Bring every voice up to date with its channel and advance envelopes,
    /// fade-out and auto-vibrato; frees voices that finished
    pub(super) fn process_all_playing(&mut self, module: &TrackerModule) {
        let invt2g = 1.0 / (TICK_TIME_DIVIDEND as f32 / self.tempo.max(1) as f32 / 256.0);

        for ch in 0..N_CHANNELS {
            if let Some(handle) = self.channels[ch].playing {
                self.update_channel_voice(module, ch, handle);
            }
        }

        let xm = module.was(FormatFlags::WAS_XM);
        for ch in 0..N_CHANNELS {
            let Some(handle) = self.channels[ch].playing else {
                continue;
            };
            self.process_playing(module, handle, invt2g);
            // XM keeps a dead voice on its channel so Gxx can still find it
            if !xm && self.voices.get(handle).is_some_and(Voice::is_dead) {
                self.free_channel_voice(ch);
            }
        }

        for slot in 0..self.pool.len() {
            let Some(handle) = self.pool[slot] else {
                continue;
            };
            self.process_playing(module, handle, invt2g);
            if self.voices.get(handle).is_some_and(Voice::is_dead) {
                self.free_pool_slot(slot);
            }
        }
    }

    /// Copy volume, pan and filter from the channel and compute the pitch
    fn update_channel_voice(&mut self, module: &TrackerModule, ch: usize, handle: VoiceHandle) {
        let random = match self.voices.get(handle) {
            Some(voice) if voice.vibrato_waveform == waveform::RANDOM => self.rng.random_range(-64..=64),
            Some(_) => 0,
            None => return,
        };
        let (tick, speed) = (self.tick, self.speed);
        let channel = &self.channels[ch];
        let Some(voice) = self.voices.get_mut(handle) else {
            return;
        };
        let Some(sample) = module.sample(voice.sample) else {
            return;
        };
        let c5_speed = sample.c5_speed as f64;

        let mut vibrato = lfo(voice.vibrato_waveform, voice.vibrato_time, random);
        vibrato = (vibrato * voice.vibrato_n * voice.vibrato_depth) >> 4;
        if module.uses_old_effects() {
            vibrato = -vibrato;
        }

        voice.volume = channel.volume;
        voice.pan = channel.truepan;

        if voice.volume_offset != 0 {
            voice.volume += (voice.volume_offset * voice.volume) >> 7;
            if voice.volume > 64 {
                voice.volume = if voice.volume_offset < 0 { 0 } else { 64 };
            }
        }
        if voice.panning_offset != 0 && voice.pan <= PAN_RIGHT {
            voice.pan += voice.panning_offset << ENVELOPE_SHIFT;
            if voice.pan > PAN_RIGHT {
                voice.pan = if voice.panning_offset < 0 { 0 } else { PAN_RIGHT };
            }
        }

        if module.uses_linear_slides() {
            let pitch = (((voice.note - 60) << 8) + voice.slide + vibrato + voice.finetune).clamp(-32768, 32767);
            voice.delta = PITCH_BASE.powi(pitch) * c5_speed / 65536.0;
        } else {
            let period = PITCH_BASE.powi(((60 - voice.note) << 8) - voice.finetune) / c5_speed
                - (voice.slide + vibrato) as f64 / AMIGA_DIVISOR;
            if period < MIN_AMIGA_DELTA {
                voice.flags |= flags::DEAD;
                voice.delta = 1.0 / 32768.0;
                return;
            }
            voice.delta = (1.0 / 65536.0) / period;
        }

        if channel.glissando && channel.toneporta != 0 && channel.destnote < 120 {
            let note = delta_to_note(voice.delta, sample.c5_speed);
            voice.delta = SEMITONE_BASE.powi(note - 60) * c5_speed / 65536.0;
        }

        // FT2 plays the arpeggio sequence offset by one tick
        let mut arp_tick = tick - 1;
        if !is_pure_xm(module) {
            arp_tick = speed - arp_tick - 1;
        } else if arp_tick == speed - 1 {
            arp_tick = 0;
        } else {
            arp_tick += 1;
        }
        let step = channel.arpeggio_table.sequence()[(arp_tick & 31) as usize];
        voice.delta *= SEMITONE_BASE.powi(channel.arpeggio_offsets[step as usize] as i32);

        voice.filter_cutoff = channel.filter_cutoff;
        voice.filter_resonance = channel.filter_resonance;
    }

    /// Envelopes, fade-out, ramp targets and auto-vibrato of one voice
    fn process_playing(&mut self, module: &TrackerModule, handle: VoiceHandle, invt2g: f32) {
        let xm = module.was(FormatFlags::WAS_XM);
        let Some(voice) = self.voices.get_mut(handle) else {
            return;
        };

        if voice.instrument.is_some() {
            if let Some(instrument) = voice.env_instrument.and_then(|n| module.instrument(n)) {
                let sustained = !voice.has(flags::SUSTAINOFF);
                if xm {
                    step_xm(&instrument.volume_envelope, &mut voice.volume_envelope, sustained);
                    step_xm(&instrument.panning_envelope, &mut voice.pan_envelope, sustained);
                } else {
                    if voice.enabled_envelopes & env::VOLUME != 0
                        && step_it(&instrument.volume_envelope, &mut voice.volume_envelope, sustained)
                    {
                        voice.flags |= flags::FADING;
                        if voice.volume_envelope.value == 0 {
                            voice.flags |= flags::DEAD;
                        }
                    }
                    if voice.enabled_envelopes & env::PANNING != 0 {
                        step_it(&instrument.panning_envelope, &mut voice.pan_envelope, sustained);
                    }
                    if voice.enabled_envelopes & env::PITCH != 0 {
                        step_it(&instrument.pitch_envelope, &mut voice.pitch_envelope, sustained);
                    }
                }

                if voice.has(flags::FADING) {
                    voice.fadeoutcount -= instrument.fadeout as i32;
                    if voice.fadeoutcount <= 0 {
                        voice.fadeoutcount = 0;
                        if !xm {
                            voice.flags |= flags::DEAD;
                        }
                    }
                }
            }
        }

        if voice.sample_vibrato_waveform == waveform::RANDOM {
            voice.sample_vibrato_random = self.rng.random_range(-64..=64);
        }

        self.playing_volume_setup(module, handle, invt2g);

        let Some(voice) = self.voices.get_mut(handle) else {
            return;
        };
        if let Some(sample) = module.sample(voice.sample) {
            let rate = sample.vibrato_rate as i32;
            if xm {
                // XM counts ticks since note on
                if voice.sample_vibrato_depth < rate {
                    voice.sample_vibrato_depth += 1;
                }
            } else {
                voice.sample_vibrato_depth = (voice.sample_vibrato_depth + rate).min((sample.vibrato_depth as i32) << 8);
            }
            voice.sample_vibrato_time = voice.sample_vibrato_time.wrapping_add(sample.vibrato_speed);
        }
    }

    /// Stereo gain targets and the declick ramp for the coming tick
    fn playing_volume_setup(&mut self, module: &TrackerModule, handle: VoiceHandle, invt2g: f32) {
        let Some(voice) = self.voices.get(handle) else {
            return;
        };
        let pan = self.apply_pan_envelope(voice);
        let vol = self.calculate_volume(voice, 1.0);
        let separation = self.stereo_separation as f32;
        let ramp_style = self.ramp_style.level();

        let mut gains = if !module.format.contains(FormatFlags::STEREO) {
            [1.0, 1.0]
        } else if pan <= PAN_RIGHT {
            let span = (pan - PAN_CENTRE) as f32 * separation / (PAN_CENTRE as f32 * 128.0);
            let left = 0.5 * (1.0 - span);
            [left, 1.0 - left]
        } else {
            // Surround: opposite phase on the two sides
            [-0.5, 0.5]
        };
        gains = gains.map(|g| g * vol);

        let Some(voice) = self.voices.get_mut(handle) else {
            return;
        };
        let mut ramp_scale = RAMP_SCALE_NORMAL;
        if ramp_style > 0
            && voice.declick_stage == declick::STEADY
            && ((voice.ramp_volume == [0.0, 0.0]) || vol == 0.0)
        {
            ramp_scale = RAMP_SCALE_FAST;
        }

        if ramp_style == 0 || (ramp_style < 2 && voice.declick_stage == declick::STEADY) {
            if voice.declick_stage <= declick::STEADY {
                voice.ramp_volume = gains;
                voice.declick_stage = declick::STEADY;
            } else {
                gains = [0.0; 2];
                voice.ramp_volume = [0.0; 2];
                voice.declick_stage = declick::DEAD;
            }
            voice.ramp_delta = [0.0; 2];
        } else {
            match voice.declick_stage {
                declick::SILENT => {
                    voice.ramp_volume = [0.0; 2];
                    ramp_scale = RAMP_SCALE_FAST;
                    voice.declick_stage = declick::RAMP_IN;
                }
                declick::RAMP_IN => ramp_scale = RAMP_SCALE_FAST,
                declick::STEADY => {}
                stage => {
                    gains = [0.0; 2];
                    if stage == declick::CUT {
                        voice.declick_stage = declick::RAMP_OUT;
                    }
                    ramp_scale = RAMP_SCALE_FAST;
                }
            }
            for side in 0..2 {
                voice.ramp_delta[side] = ramp_scale * invt2g * (gains[side] - voice.ramp_volume[side]);
            }
        }
        voice.float_volume = gains;
    }
}
