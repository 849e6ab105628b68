//! Note triggers at row start
//!
//! IT-family and XM-family modules start, retrigger and release notes under
//! different rules; both paths end up pointing the channel's voice at the
//! sample selected by [`Sigrenderer::instrument_to_sample`].

use nether_resampler::declick;
use nether_tracker::{EffectCommand, FormatFlags, TrackerEntry, TrackerModule, TrackerSample};
use tracing::{trace, warn};

use super::Sigrenderer;
use crate::channel::{Channel, NOTE_OFF};
use crate::tables::VOLPAN_TONE_PORTA;
use crate::voice::{env, flags, Voice, ENVELOPE_SHIFT, FADEOUT_MAX};

/// Notes from here up release or stop the channel instead of playing
pub(super) const NOTE_LIMIT: u8 = 120;

/// IT volume column range holding tone portamento speeds
const VOLPAN_PORTA: std::ops::RangeInclusive<u8> = 193..=202;

fn is_immediate_key_off(entry: &TrackerEntry) -> bool {
    matches!(entry.effect_parts(), Some((EffectCommand::XmKeyOff, 0)))
}

/// Release an IT voice: leave the sustain loops and start fading unless the
/// volume envelope will end the note by itself
pub(super) fn it_note_off(module: &TrackerModule, voice: &mut Voice) {
    voice.enabled_envelopes |= env::VOLUME;
    voice.flags |= flags::BACKGROUND | flags::SUSTAINOFF;
    if let Some(sample) = module.sample(voice.sample) {
        voice.fix_sample_looping(sample);
        voice.update_resamplers(sample);
    }
    if let Some(instrument) = voice.instrument.and_then(|n| module.instrument(n)) {
        let envelope = &instrument.volume_envelope;
        if !envelope.is_enabled() || envelope.has_loop() {
            voice.flags |= flags::FADING;
        }
    }
}

/// Restart the XM volume and panning envelopes and cancel any fade-out
pub(super) fn retrigger_xm_envelopes(voice: &mut Voice) {
    voice.volume_envelope.next_node = 0;
    voice.volume_envelope.tick = -1;
    voice.pan_envelope.next_node = 0;
    voice.pan_envelope.tick = -1;
    voice.fadeoutcount = FADEOUT_MAX;
}

/// Reset `voice` to play the channel's current sample and note from the start
///
/// Envelope positions are left alone; the caller decides whether they
/// restart or carry over.
pub(super) fn prepare_note_voice(
    module: &TrackerModule,
    channel: &Channel,
    ch: usize,
    quality: nether_resampler::Quality,
    voice: &mut Voice,
    sample: &TrackerSample,
) {
    voice.flags = 0;
    voice.quality = quality;
    voice.channel = ch;
    voice.sample = channel.sample;
    voice.instrument = module.uses_instruments().then_some(channel.instrument);
    voice.env_instrument = voice.instrument;
    voice.instnum = channel.instrument;
    voice.declick_stage = declick::SILENT;
    voice.channel_volume = channel.channelvolume;
    voice.note = channel.truenote as i32;

    voice.enabled_envelopes = 0;
    if let Some(instrument) = voice.instrument.and_then(|n| module.instrument(n)) {
        if instrument.volume_envelope.is_enabled() {
            voice.enabled_envelopes |= env::VOLUME;
        }
        if instrument.panning_envelope.is_enabled() {
            voice.enabled_envelopes |= env::PANNING;
        }
    }
    voice.volume_offset = 0;
    voice.panning_offset = 0;

    voice.filter_cutoff = 127;
    voice.filter_resonance = 0;
    voice.true_filter_cutoff = 127 << ENVELOPE_SHIFT;
    voice.true_filter_resonance = 0;
    for state in &mut voice.filter_state {
        state.reset();
    }

    voice.vibrato_speed = 0;
    voice.vibrato_depth = 0;
    voice.vibrato_n = 0;
    voice.vibrato_time = 0;
    voice.vibrato_waveform = 0;
    voice.tremolo_speed = 0;
    voice.tremolo_depth = 0;
    voice.tremolo_time = 0;
    voice.tremolo_waveform = 0;
    voice.panbrello_speed = 0;
    voice.panbrello_depth = 0;
    voice.panbrello_time = 0;
    voice.panbrello_waveform = 0;
    voice.panbrello_random = 0;
    voice.sample_vibrato_time = 0;
    voice.sample_vibrato_waveform = sample.vibrato_waveform;
    voice.sample_vibrato_depth = 0;

    voice.slide = 0;
    voice.finetune = sample.finetune as i32;
    voice.reset_resamplers(sample, 0);
}

impl Sigrenderer {
    /// Resolve the channel's instrument and note to a playable sample
    ///
    /// Leaves `sample` at 0 when nothing playable is mapped.
    pub(super) fn instrument_to_sample(&mut self, module: &TrackerModule, ch: usize) {
        let channel = &mut self.channels[ch];
        if module.uses_instruments() {
            match module.instrument(channel.instrument) {
                Some(instrument) if channel.note < NOTE_LIMIT => {
                    if let Some((note, sample)) = instrument.map_note(channel.note) {
                        channel.truenote = note;
                        channel.sample = sample;
                    }
                }
                _ => channel.sample = 0,
            }
        } else {
            channel.sample = channel.instrument;
            channel.truenote = channel.note;
        }

        let playable = module
            .sample(channel.sample)
            .is_some_and(|s| s.exists() && s.c5_speed != 0);
        if !playable {
            channel.sample = 0;
        }
    }

    /// XM key off: release the channel's voice, silencing it outright when
    /// there is no volume envelope to carry the release
    pub(super) fn xm_note_off(&mut self, module: &TrackerModule, ch: usize) {
        let channel = &mut self.channels[ch];
        let Some(voice) = channel.playing.and_then(|h| self.voices.get_mut(h)) else {
            return;
        };
        let has_envelope = module
            .instrument(channel.instrument)
            .is_some_and(|i| i.volume_envelope.is_enabled());
        if !has_envelope {
            channel.volume = 0;
        }
        voice.flags |= flags::SUSTAINOFF | flags::FADING;
        if let Some(sample) = module.sample(voice.sample) {
            voice.update_resamplers(sample);
        }
    }

    /// Take volume, pan and filter defaults from the new sample and instrument
    pub(super) fn get_default_volpan(&mut self, module: &TrackerModule, ch: usize) {
        let channel = &mut self.channels[ch];
        let Some(sample) = module.sample(channel.sample) else {
            return;
        };
        channel.volume = sample.default_volume as i32;

        if module.was(FormatFlags::WAS_XM) {
            if !module.was(FormatFlags::WAS_MOD) {
                channel.truepan = 32 + sample.default_pan as i32 * 64;
            }
            return;
        }

        if (128..=192).contains(&sample.default_pan) {
            channel.pan = sample.default_pan as i32 - 128;
            return;
        }

        if module.uses_instruments() {
            if let Some(instrument) = module.instrument(channel.instrument) {
                if let Some(pan) = instrument.default_pan.filter(|&p| p <= 64) {
                    channel.pan = pan as i32;
                }
                if let Some(cutoff) = instrument.filter_cutoff {
                    channel.filter_cutoff = cutoff as i32;
                }
                if let Some(resonance) = instrument.filter_resonance {
                    channel.filter_resonance = resonance as i32;
                }
            }
        }
    }

    /// Apply pitch-pan separation to the channel pan
    pub(super) fn get_true_pan(&mut self, module: &TrackerModule, ch: usize) {
        let channel = &mut self.channels[ch];
        channel.truepan = channel.pan << ENVELOPE_SHIFT;

        if channel.sample == 0 || channel.truepan > 64 << ENVELOPE_SHIFT || !module.uses_instruments() {
            return;
        }
        if let Some(instrument) = module.instrument(channel.instrument) {
            let offset = (channel.note as i32 - instrument.pp_centre as i32) * instrument.pp_separation as i32;
            channel.truepan = (channel.truepan + (offset << (ENVELOPE_SHIFT - 3))).clamp(0, 64 << ENVELOPE_SHIFT);
        }
    }

    /// IT "compatible Gxx": a tone portamento with an instrument restarts the
    /// envelopes of the sounding note instead of starting a new one
    pub(super) fn compatible_gxx_retrigger(&mut self, module: &TrackerModule, ch: usize) {
        let channel = &self.channels[ch];
        let Some(voice) = channel.playing.and_then(|h| self.voices.get_mut(h)) else {
            return;
        };

        let mut carried = 0u8;
        if channel.sample != 0 && module.uses_instruments() && !voice.has(flags::SUSTAINOFF) {
            if let Some(instrument) = voice.env_instrument.and_then(|n| module.instrument(n)) {
                let carry = |e: &nether_tracker::TrackerEnvelope| e.flags.contains(nether_tracker::EnvelopeFlags::CARRY);
                if carry(&instrument.volume_envelope) {
                    carried |= env::VOLUME;
                }
                if carry(&instrument.panning_envelope) {
                    carried |= env::PANNING;
                }
                if carry(&instrument.pitch_envelope) {
                    carried |= env::PITCH;
                }
            }
        }

        for (bit, cursor) in [
            (env::VOLUME, &mut voice.volume_envelope),
            (env::PANNING, &mut voice.pan_envelope),
            (env::PITCH, &mut voice.pitch_envelope),
        ] {
            if carried & bit == 0 {
                cursor.next_node = 0;
                cursor.tick = 0;
            }
        }

        voice.fadeoutcount = FADEOUT_MAX;
        voice.flags &= !(flags::BACKGROUND | flags::SUSTAINOFF | flags::FADING | flags::DEAD);
        if let Some(sample) = module.sample(voice.sample) {
            voice.update_resamplers(sample);
        }

        if carried == 0 && channel.sample != 0 && module.uses_instruments() {
            voice.env_instrument = Some(channel.instrument);
        }
    }

    /// Note, instrument and volume column of an IT, S3M, PTM, 669, STM or
    /// OKT row entry
    pub(super) fn process_it_note_data(&mut self, module: &TrackerModule, entry: &TrackerEntry) {
        let ch = entry.channel as usize;

        if entry.note.is_some() || entry.instrument.is_some() {
            if let Some(instrument) = entry.instrument {
                self.channels[ch].instrument = instrument;
            }
            self.instrument_to_sample(module, ch);
            if self.channels[ch].note <= NOTE_LIMIT {
                if module.uses_instruments() && self.channels[ch].sample == 0 {
                    self.it_retrigger_note(module, ch);
                }
                if entry.instrument.is_some() {
                    self.get_default_volpan(module, ch);
                }
            } else {
                self.it_retrigger_note(module, ch);
            }
        }

        let volpan_porta = entry.volpan.filter(|vp| VOLPAN_PORTA.contains(vp));
        let effect_porta = entry.effect.filter(|e| e.is_tone_portamento());
        let mut skip_start_note = false;

        if volpan_porta.is_some() || effect_porta.is_some() {
            if self.channels[ch].playing.is_some() && entry.instrument.is_some() {
                if module.uses_compatible_gxx() {
                    self.compatible_gxx_retrigger(module, ch);
                } else if !module.uses_instruments()
                    || module.instrument(self.channels[ch].instrument).is_some()
                {
                    let sample = self.channels[ch].sample;
                    let kept = self
                        .channel_voice(ch)
                        .filter(|v| v.sample != sample)
                        .map(|v| (v.note, v.slide));
                    if let Some((note, slide)) = kept {
                        self.it_retrigger_note(module, ch);
                        if let Some(voice) = self.channel_voice_mut(ch) {
                            voice.note = note;
                            voice.slide = slide;
                        }
                    }
                }
            }

            let compatible_gxx = module.uses_compatible_gxx();
            let channel = &mut self.channels[ch];
            channel.toneporta = 0;

            if let Some(vp) = volpan_porta {
                let mut v = VOLPAN_TONE_PORTA[(vp - VOLPAN_PORTA.start()) as usize];
                if compatible_gxx {
                    if v == 0 {
                        v = channel.last_g;
                    }
                    channel.last_g = v;
                } else {
                    if v == 0 {
                        v = channel.last_ef;
                    }
                    channel.last_ef = v;
                }
                channel.toneporta += (v as i32) << 4;
            }

            if let Some(effect) = effect_porta {
                let mut v = match effect.command {
                    EffectCommand::TonePortamento => effect.value,
                    _ => 0,
                };
                if compatible_gxx {
                    if v == 0 {
                        v = channel.last_g;
                    }
                    channel.last_g = v;
                } else {
                    if v == 0 && !module.was(FormatFlags::WAS_669) {
                        v = channel.last_ef;
                    }
                    channel.last_ef = v;
                }
                channel.toneporta += (v as i32) << 4;
            }

            if (entry.note.is_some() || (compatible_gxx && entry.instrument.is_some()))
                && channel.note <= NOTE_LIMIT
            {
                channel.destnote = if channel.sample != 0 {
                    channel.truenote
                } else {
                    channel.note
                };
            }

            skip_start_note = channel.playing.is_some();
        }

        let new_instrument = entry
            .instrument
            .is_some_and(|i| self.channel_voice(ch).is_none_or(|v| v.instnum != i));
        if !skip_start_note && (entry.note.is_some() || new_instrument) && self.channels[ch].note <= NOTE_LIMIT {
            self.get_true_pan(module, ch);
            let instrument_only_retriggers = !module
                .format
                .intersects(FormatFlags::WAS_S3M.union(FormatFlags::WAS_PTM));
            if entry.note.is_some() || instrument_only_retriggers {
                self.it_retrigger_note(module, ch);
            }
        }

        let Some(vp) = entry.volpan else {
            return;
        };
        let channel = &mut self.channels[ch];
        match vp {
            0..=64 => channel.volume = vp as i32,
            65..=74 => {
                let mut v = vp - 65;
                if v == 0 {
                    v = channel.last_volslide;
                }
                channel.last_volslide = v;
                channel.volume = (channel.volume + v as i32).min(64);
            }
            75..=84 => {
                let mut v = vp - 75;
                if v == 0 {
                    v = channel.last_volslide;
                }
                channel.last_volslide = v;
                channel.volume = (channel.volume - v as i32).max(0);
            }
            128..=192 => channel.set_pan(vp as i32 - 128),
            // Slides, portamento and vibrato run with the effect column
            _ => {}
        }
    }

    /// Note, instrument and volume column of an XM or MOD row entry
    pub(super) fn process_xm_note_data(&mut self, module: &TrackerModule, entry: &TrackerEntry) {
        let ch = entry.channel as usize;
        let key_off_now = is_immediate_key_off(entry);
        let releases = entry.note.is_some_and(|n| n >= NOTE_LIMIT);
        // Copy of the previous note, faded out in the pool if a new note starts
        let mut previous: Option<Voice> = None;

        if let Some(instrument) = entry.instrument {
            let old_sample = self.channels[ch].sample;
            self.channels[ch].instrument = instrument;
            self.instrument_to_sample(module, ch);

            if let Some(handle) = self.channels[ch].playing.filter(|_| !releases && !key_off_now) {
                previous = self.voices.get(handle).cloned();

                if !module.was(FormatFlags::WAS_MOD) {
                    let channel = &mut self.channels[ch];
                    if let Some(voice) = self.voices.get_mut(handle) {
                        voice.flags &= !(flags::SUSTAINOFF | flags::FADING);
                        if let Some(sample) = module.sample(voice.sample) {
                            voice.update_resamplers(sample);
                            channel.volume = sample.default_volume as i32;
                            channel.truepan = 32 + sample.default_pan as i32 * 64;
                        }
                        retrigger_xm_envelopes(voice);
                    }
                } else {
                    let new_sample = self.channels[ch].sample;
                    if old_sample != new_sample {
                        self.cut_to_pool(ch);
                        if let (Some(mut voice), Some(sample)) = (previous.take(), module.sample(new_sample)) {
                            voice.declick_stage = declick::SILENT;
                            voice.sample = new_sample;
                            voice.reset_resamplers(sample, 0);
                            self.channels[ch].playing = self.voices.insert(voice);
                        }
                    }
                    self.get_default_volpan(module, ch);
                }
            }
        }

        if !key_off_now && entry.note.is_some() {
            if entry.instrument.is_none() {
                self.instrument_to_sample(module, ch);
            }

            let has_voice = self.channels[ch].playing.is_some();
            let volpan_porta = entry.volpan.is_some_and(|vp| vp >> 4 == 0xF);
            let effect_porta = entry.effect.is_some_and(|e| e.is_tone_portamento());

            if self.channels[ch].note >= NOTE_LIMIT {
                self.xm_note_off(module, ch);
            } else if self.channels[ch].sample == 0 {
                // No sample mapped: whatever was playing stops for good
                if let Some(handle) = self.channels[ch].playing {
                    if let (Some(voice), Some(restored)) = (self.voices.get_mut(handle), previous.take()) {
                        *voice = restored;
                    }
                    self.cut_to_pool(ch);
                }
                return;
            } else if has_voice && (volpan_porta || effect_porta) {
                // Portamento towards the note instead of a retrigger
            } else {
                self.channels[ch].destnote = NOTE_OFF;
                let Some(sample) = module.sample(self.channels[ch].sample) else {
                    return;
                };

                match self.channels[ch].playing {
                    None => {
                        let mut voice = Voice::new(
                            self.resampler_context(),
                            ch,
                            self.channels[ch].sample,
                            sample,
                            self.quality,
                        );
                        retrigger_xm_envelopes(&mut voice);
                        self.channels[ch].playing = self.voices.insert(voice);
                        if self.channels[ch].playing.is_none() {
                            warn!(channel = ch, "voice arena full, note dropped");
                            return;
                        }
                    }
                    Some(_) => {
                        if let Some(mut old) = previous.take() {
                            old.cut();
                            old.flags |= flags::SUSTAINOFF | flags::FADING;
                            self.push_voice_to_pool(old);
                        }
                    }
                }

                let channel = &self.channels[ch];
                if let Some(voice) = channel.playing.and_then(|h| self.voices.get_mut(h)) {
                    prepare_note_voice(module, channel, ch, self.quality, voice, sample);
                    trace!(channel = ch, note = voice.note, sample = voice.sample, "xm note on");
                }
            }
        }

        if !key_off_now && !releases && entry.note.is_some() && entry.instrument.is_some() {
            if let Some(voice) = self.channel_voice_mut(ch) {
                retrigger_xm_envelopes(voice);
            }
            self.get_default_volpan(module, ch);
        }

        let porta_speed = match (entry.volpan, entry.effect) {
            (Some(vp), _) if vp >> 4 == 0xF => Some((vp & 15) << 4),
            (_, Some(effect)) if effect.is_tone_portamento() => Some(match effect.command {
                EffectCommand::TonePortamento => effect.value,
                _ => 0,
            }),
            _ => None,
        };
        if let Some(mut v) = porta_speed {
            let channel = &mut self.channels[ch];
            if v == 0 {
                v = channel.last_g;
            }
            channel.last_g = v;
            if entry.note.is_some() && channel.sample != 0 && channel.note < NOTE_LIMIT {
                channel.destnote = channel.truenote;
            }
            channel.toneporta = (v as i32) << 4;
        }

        if let Some(vp) = entry.volpan {
            self.process_xm_volume_column(ch, vp);
        }
    }

    fn process_xm_volume_column(&mut self, ch: usize, vp: u8) {
        let value = (vp & 15) as i32;
        let channel = &mut self.channels[ch];
        let voice = channel.playing.and_then(|h| self.voices.get_mut(h));
        match vp >> 4 {
            0x6 => channel.xm_volslide = -value,
            0x7 => channel.xm_volslide = value,
            0x8 => channel.volume = (channel.volume - value).max(0),
            0x9 => channel.volume = (channel.volume + value).min(64),
            0xA => {
                if value != 0 {
                    channel.last_h_speed = value as u8;
                }
                if let Some(voice) = voice {
                    voice.vibrato_speed = channel.last_h_speed as i32;
                }
            }
            0xB => {
                if value != 0 {
                    channel.last_h_depth = (value << 2) as u8;
                }
                if let Some(voice) = voice {
                    voice.vibrato_depth = channel.last_h_depth as i32;
                    voice.vibrato_speed = channel.last_h_speed as i32;
                    voice.vibrato_n += 1;
                }
            }
            0xC => channel.truepan = 32 + value * (17 * 64),
            // -128 sends the pan hard left on the next tick, as FT2 does
            0xD => channel.panslide = if value != 0 { -value } else { -128 },
            0xE => channel.panslide = value,
            0xF => {}
            0x1..=0x5 => channel.volume = (vp as i32 - 0x10).min(64),
            _ => {}
        }
    }
}
