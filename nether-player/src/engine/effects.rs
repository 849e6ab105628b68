//! Effect commands and their per-tick updates
//!
//! [`Sigrenderer::process_effects`] runs on the first tick of a row and sets
//! up slides, LFO parameters and one-shot changes. Most commands remember
//! their last nonzero parameter; which memory cell a command shares depends
//! on the format (S3M shares one cell between D, E, F, I, J, K, L, Q, R and S).
//! [`Sigrenderer::update_effects`] then applies the running slides on every
//! following tick.

use std::ops::ControlFlow;

use nether_resampler::declick;
use nether_tracker::{
    EffectCommand, FormatFlags, NewNoteAction, SampleData, SubCommand, TrackerEffect, TrackerEntry,
    TrackerModule,
};
use rand::Rng;

use super::notes::{it_note_off, NOTE_LIMIT};
use super::{flow_change_pending, is_pure_xm, Sigrenderer, BREAK_MARK, JUMP_MARK, ROW_BREAK};
use crate::arena::VoiceHandle;
use crate::channel::{Channel, NOTE_OFF, SURROUND};
use crate::envelope::xm_value;
use crate::tables::{waveform, ArpeggioTable, MOD_CONVERT_WAVEFORM, XM_CONVERT_WAVEFORM};
use crate::voice::{env, flags, Voice, ENVELOPE_SHIFT};
use crate::{AMIGA_DIVISOR, SEMITONE_BASE};

/// XM pan positions are stored as `32 + pan * 64`
const XM_PAN_MIN: i32 = 32;
const XM_PAN_MAX: i32 = 32 + 255 * 64;

/// Subtract from a volume, dropping to 0 when the result leaves `0..=limit`
fn lower(value: i32, by: i32, limit: i32) -> i32 {
    let result = value - by;
    if (0..=limit).contains(&result) {
        result
    } else {
        0
    }
}

fn raise(value: i32, by: i32, limit: i32) -> i32 {
    (value + by).min(limit)
}

/// Apply a running slide, pinning to the end of the range it ran out of
fn slide(value: i32, by: i32, limit: i32) -> i32 {
    let result = value + by;
    if (0..=limit).contains(&result) {
        result
    } else if by >= 0 {
        limit
    } else {
        0
    }
}

/// Move a note by whole semitones, stopping at the ends of the keyboard
fn slide_note(note: i32, by: i32) -> i32 {
    let result = note + by;
    if (0..NOTE_LIMIT as i32).contains(&result) {
        result
    } else if by < 0 {
        0
    } else {
        NOTE_LIMIT as i32 - 1
    }
}

/// Restart a voice's sample at `pos` and ramp it in from silence
pub(super) fn restart_voice(module: &TrackerModule, voice: &mut Voice, pos: i64) {
    if let Some(sample) = module.sample(voice.sample) {
        voice.reset_resamplers(sample, pos);
    }
    voice.retrigger_declick();
}

/// Resolve Exx/Fxx memory; `up` selects the XM E1x/X1x cells over E2x/X2x
fn portamento_value(module: &TrackerModule, channel: &mut Channel, v: u8, up: bool) -> u8 {
    if module.format.intersects(FormatFlags::WAS_XM.union(FormatFlags::WAS_669)) {
        if module.was(FormatFlags::WAS_MOD) {
            return v;
        }
        let (fine, extra_fine) = if up {
            (&mut channel.xm_last_e1, &mut channel.xm_last_x1)
        } else {
            (&mut channel.xm_last_e2, &mut channel.xm_last_x2)
        };
        match v {
            0xF0 => v | *fine,
            0xF1..=0xFF => {
                *fine = v & 15;
                v
            }
            0xE0 => v | *extra_fine,
            _ => {
                *extra_fine = v & 15;
                v
            }
        }
    } else if module.was(FormatFlags::WAS_S3M) {
        let v = if v == 0 { channel.last_dkl } else { v };
        channel.last_dkl = v;
        v
    } else {
        let v = if v == 0 { channel.last_ef } else { v };
        channel.last_ef = v;
        v
    }
}

impl Sigrenderer {
    /// Run `f` on the channel's own voice and on its background voices
    fn each_channel_voice(&mut self, ch: usize, mut f: impl FnMut(&mut Voice)) {
        for handle in self.channel_voices(ch) {
            if let Some(voice) = self.voices.get_mut(handle) {
                f(voice);
            }
        }
    }

    /// Clear the per-row slides of the song and of every channel
    pub(super) fn reset_effects(&mut self) {
        self.globalvolslide = 0;
        self.temposlide = 0;
        for channel in &mut self.channels {
            let voice = channel.playing.and_then(|h| self.voices.get_mut(h));
            channel.reset_effects(voice);
        }
    }

    // ========================================================================
    // Row commands
    // ========================================================================

    /// Apply the effect column (and, for IT-family modules, the volume
    /// column commands that behave like effects) of one entry
    ///
    /// Breaks when the XM speed-zero callback asks playback to stop.
    pub(super) fn process_effects(
        &mut self,
        module: &TrackerModule,
        entry: &TrackerEntry,
        ignore_cxx: bool,
    ) -> ControlFlow<()> {
        if let Some(effect) = entry.effect {
            self.apply_effect(module, entry, effect, ignore_cxx)?;
        }
        if !module.was(FormatFlags::WAS_XM) {
            if let Some(vp) = entry.volpan {
                self.post_process_it_volpan(entry.channel as usize, vp);
            }
        }
        ControlFlow::Continue(())
    }

    fn apply_effect(
        &mut self,
        module: &TrackerModule,
        entry: &TrackerEntry,
        effect: TrackerEffect,
        ignore_cxx: bool,
    ) -> ControlFlow<()> {
        let ch = entry.channel as usize;
        let v = effect.value;
        let xm = module.was(FormatFlags::WAS_XM);
        let s3m = module.was(FormatFlags::WAS_S3M);

        match effect.command {
            EffectCommand::SetSpeed => {
                if v != 0 {
                    if !module.was(FormatFlags::WAS_STM) || v >= 32 {
                        self.speed = v as i32;
                        self.tick = v as i32;
                    }
                } else if is_pure_xm(module) {
                    self.played_set(self.order, self.row);
                    self.speed = 0;
                    self.callbacks.fire_xm_speed_zero()?;
                }
            }

            EffectCommand::BreakToRow => {
                if ignore_cxx {
                    return ControlFlow::Continue(());
                }
                self.breakrow = v as i32;
                if flow_change_pending(self.processrow) && self.processrow & JUMP_MARK == 0 {
                    self.processrow = ROW_BREAK & !(BREAK_MARK | JUMP_MARK);
                } else {
                    self.processorder = self.order;
                    self.processrow = ROW_BREAK & !BREAK_MARK;
                }
            }

            EffectCommand::VolslideVibrato => {
                let (speed, depth) = (self.channels[ch].last_h_speed, self.channels[ch].last_h_depth);
                self.each_channel_voice(ch, |voice| {
                    voice.vibrato_speed = speed as i32;
                    voice.vibrato_depth = depth as i32;
                    voice.vibrato_n += 1;
                });
                self.volume_slide(module, ch, v);
            }
            EffectCommand::VolumeSlide | EffectCommand::VolslideToneporta => {
                self.volume_slide(module, ch, v);
            }

            EffectCommand::XmFineVolslideDown => {
                let channel = &mut self.channels[ch];
                let v = if v == 0 { channel.xm_last_eb } else { v };
                channel.xm_last_eb = v;
                channel.volume = lower(channel.volume, v as i32, 64);
            }
            EffectCommand::XmFineVolslideUp => {
                let channel = &mut self.channels[ch];
                let v = if v == 0 { channel.xm_last_ea } else { v };
                channel.xm_last_ea = v;
                channel.volume = raise(channel.volume, v as i32, 64);
            }

            EffectCommand::PortamentoDown => self.portamento(module, ch, v, false),
            EffectCommand::PortamentoUp => self.portamento(module, ch, v, true),

            EffectCommand::XmPortamentoDown => {
                let channel = &mut self.channels[ch];
                let mut v = v;
                if !module.was(FormatFlags::WAS_MOD) {
                    if v == 0 {
                        v = channel.last_j;
                    }
                    channel.last_j = v;
                }
                if channel.playing.is_some() {
                    channel.portamento -= (v as i32) << 4;
                }
            }
            EffectCommand::XmPortamentoUp => {
                let channel = &mut self.channels[ch];
                let mut v = v;
                if !module.was(FormatFlags::WAS_MOD) {
                    if v == 0 {
                        v = channel.last_ef;
                    }
                    channel.last_ef = v;
                }
                if channel.playing.is_some() {
                    channel.portamento += (v as i32) << 4;
                }
            }

            EffectCommand::XmKeyOff => {
                self.channels[ch].key_off_count = v;
                if v == 0 {
                    self.xm_note_off(module, ch);
                }
            }

            EffectCommand::Vibrato => {
                if v != 0 || !module.was(FormatFlags::WAS_669) {
                    let channel = &mut self.channels[ch];
                    let mut speed = v >> 4;
                    let mut depth = v & 15;
                    if speed == 0 {
                        speed = channel.last_h_speed;
                    }
                    channel.last_h_speed = speed;
                    if depth == 0 {
                        depth = channel.last_h_depth;
                    } else {
                        let doubled = module.uses_old_effects() && !module.was(FormatFlags::WAS_MOD);
                        depth <<= if doubled { 3 } else { 2 };
                        channel.last_h_depth = depth;
                    }
                    self.each_channel_voice(ch, |voice| {
                        voice.vibrato_speed = speed as i32;
                        voice.vibrato_depth = depth as i32;
                        voice.vibrato_n += 1;
                    });
                }
            }

            EffectCommand::FineVibrato => {
                let channel = &mut self.channels[ch];
                let mut speed = v >> 4;
                let mut depth = v & 15;
                if speed == 0 {
                    speed = channel.last_h_speed;
                }
                channel.last_h_speed = speed;
                if depth == 0 {
                    depth = channel.last_h_depth;
                } else {
                    if module.uses_old_effects() {
                        depth <<= 1;
                    }
                    channel.last_h_depth = depth;
                }
                self.each_channel_voice(ch, |voice| {
                    voice.vibrato_speed = speed as i32;
                    voice.vibrato_depth = depth as i32;
                    voice.vibrato_n += 1;
                });
            }

            EffectCommand::Tremor => {
                let channel = &mut self.channels[ch];
                let mut v = v;
                if v == 0 {
                    v = if s3m { channel.last_dkl } else { channel.last_i };
                } else if !module.uses_old_effects() {
                    if v & 0xF0 != 0 {
                        v -= 0x10;
                    }
                    if v & 0x0F != 0 {
                        v -= 0x01;
                    }
                }
                if s3m {
                    channel.last_dkl = v;
                }
                // The tremor counter always reads the I cell
                channel.last_i = v;
                channel.tremor_time |= 128;
                channel.update_tremor();
            }

            EffectCommand::Arpeggio => {
                let channel = &mut self.channels[ch];
                let mut v = v;
                // XM arpeggio has no memory; 000 means no effect
                if !xm {
                    if s3m {
                        if v == 0 {
                            v = channel.last_dkl;
                        }
                        channel.last_dkl = v;
                    } else {
                        if v == 0 {
                            v = channel.last_j;
                        }
                        channel.last_j = v;
                    }
                }
                channel.arpeggio_offsets = [0, (v >> 4) as i8, (v & 15) as i8];
                channel.arpeggio_table = if is_pure_xm(module) {
                    ArpeggioTable::Xm
                } else {
                    ArpeggioTable::Mod
                };
            }

            EffectCommand::SetChannelVolume => {
                let channel = &mut self.channels[ch];
                if xm {
                    channel.volume = (v as i32).min(64);
                } else if v <= 64 {
                    channel.channelvolume = v as i32;
                }
                let channelvolume = channel.channelvolume;
                if let Some(voice) = self.channel_voice_mut(ch) {
                    voice.channel_volume = channelvolume;
                }
            }

            EffectCommand::ChannelVolumeSlide => {
                let channel = &mut self.channels[ch];
                let v = if v == 0 { channel.last_n } else { v };
                channel.last_n = v;
                if v & 0x0F == 0 {
                    channel.channelvolslide = (v >> 4) as i32;
                } else if v & 0xF0 == 0 {
                    channel.channelvolslide = -(v as i32);
                } else {
                    if v & 0x0F == 0x0F {
                        channel.channelvolume = raise(channel.channelvolume, (v >> 4) as i32, 64);
                    } else if v & 0xF0 == 0xF0 {
                        channel.channelvolume = lower(channel.channelvolume, (v & 15) as i32, 64);
                    } else {
                        return ControlFlow::Continue(());
                    }
                    let channelvolume = channel.channelvolume;
                    if let Some(voice) = self.channel_voice_mut(ch) {
                        voice.channel_volume = channelvolume;
                    }
                }
            }

            EffectCommand::SetSampleOffset => {
                let channel = &mut self.channels[ch];
                let v = if v == 0 { channel.last_o } else { v };
                channel.last_o = v;
                // Applies even alongside a tone portamento
                if entry.note.is_some() {
                    let offset = ((channel.high_offset as i64) << 16) | ((v as i64) << 8);
                    self.sample_offset(module, ch, offset);
                }
            }

            EffectCommand::PanningSlide => self.panning_slide(module, ch, v),

            EffectCommand::RetriggerNote => {
                let channel = &mut self.channels[ch];
                let mut v = v;
                if xm {
                    if v & 0x0F == 0 {
                        v |= channel.last_q & 0x0F;
                    }
                    if v & 0xF0 == 0 {
                        v |= channel.last_q & 0xF0;
                    }
                    channel.last_q = v;
                } else if s3m {
                    if v == 0 {
                        v = channel.last_dkl;
                    }
                    channel.last_dkl = v;
                } else {
                    if v == 0 {
                        v = channel.last_q;
                    }
                    channel.last_q = v;
                }
                if v & 0x0F == 0 {
                    v |= 0x01;
                }
                channel.retrig = v;
                if entry.note.is_some() {
                    channel.retrig_tick = (v & 0x0F) as i32;
                    // FT2 counts the note's own tick as the first retrigger tick
                    if xm {
                        self.update_retrig(module, ch);
                    }
                } else {
                    self.update_retrig(module, ch);
                }
            }

            EffectCommand::XmRetriggerNote => {
                let channel = &mut self.channels[ch];
                channel.xm_retrig = v;
                channel.retrig_tick = v as i32;
                if v == 0 {
                    if let Some(voice) = self.channel_voice_mut(ch) {
                        restart_voice(module, voice, 0);
                    }
                }
            }

            EffectCommand::Tremolo => {
                let channel = &mut self.channels[ch];
                let (speed, depth) = if s3m {
                    let v = if v == 0 { channel.last_dkl } else { v };
                    channel.last_dkl = v;
                    (v >> 4, v & 15)
                } else {
                    let mut speed = v >> 4;
                    let mut depth = v & 15;
                    if speed == 0 {
                        speed = channel.last_r_speed;
                    }
                    channel.last_r_speed = speed;
                    if depth == 0 {
                        depth = channel.last_r_depth;
                    }
                    channel.last_r_depth = depth;
                    (speed, depth)
                };
                self.each_channel_voice(ch, |voice| {
                    voice.tremolo_speed = speed as i32;
                    voice.tremolo_depth = depth as i32;
                });
            }

            EffectCommand::S => self.extended_command(module, ch),

            EffectCommand::SetSongTempo => {
                let channel = &mut self.channels[ch];
                let v = if v == 0 { channel.last_w } else { v };
                channel.last_w = v;
                match v {
                    0x00..=0x0F => self.temposlide = -(v as i32),
                    0x10..=0x1F => self.temposlide = (v & 15) as i32,
                    _ => self.tempo = v as i32,
                }
            }

            EffectCommand::SetGlobalVolume => {
                if !(s3m && v > 64) && v <= 128 {
                    self.globalvolume = v as i32;
                }
            }

            EffectCommand::GlobalVolumeSlide => {
                let channel = &mut self.channels[ch];
                let v = if v == 0 { channel.last_w } else { v };
                channel.last_w = v;
                let scale = if xm { 2 } else { 1 };
                if v & 0x0F == 0 {
                    self.globalvolslide = (v >> 4) as i32 * scale;
                } else if v & 0xF0 == 0 {
                    self.globalvolslide = -(v as i32) * scale;
                } else if v & 0x0F == 0x0F {
                    self.globalvolume = raise(self.globalvolume, (v >> 4) as i32, 128);
                } else if v & 0xF0 == 0xF0 {
                    self.globalvolume = lower(self.globalvolume, (v & 15) as i32, 128);
                }
            }

            EffectCommand::SetPanning => {
                let channel = &mut self.channels[ch];
                if xm {
                    channel.truepan = XM_PAN_MIN + v as i32 * 64;
                } else if s3m {
                    channel.set_pan((v as i32 + 1) >> 1);
                } else {
                    channel.set_pan((v as i32 + 2) >> 2);
                }
                if let Some(voice) = self.channel_voice_mut(ch) {
                    voice.panbrello_depth = 0;
                }
            }

            EffectCommand::Panbrello => {
                let channel = &mut self.channels[ch];
                let mut speed = v >> 4;
                let mut depth = v & 15;
                if speed == 0 {
                    speed = channel.last_y_speed;
                }
                channel.last_y_speed = speed;
                if depth == 0 {
                    depth = channel.last_y_depth;
                }
                channel.last_y_depth = depth;
                if let Some(voice) = self.channel_voice_mut(ch) {
                    voice.panbrello_speed = speed as i32;
                    voice.panbrello_depth = depth as i32;
                }
            }

            EffectCommand::MidiMacro => self.run_midi_macro(module, ch, v),

            EffectCommand::XmSetEnvelopePosition => {
                let Some(voice) = self.channel_voice_mut(ch) else {
                    return ControlFlow::Continue(());
                };
                let Some(instrument) = voice.env_instrument.and_then(|n| module.instrument(n)) else {
                    return ControlFlow::Continue(());
                };
                let envelope = &instrument.volume_envelope;
                if envelope.is_enabled() && !envelope.nodes.is_empty() {
                    let last = envelope.nodes.len() - 1;
                    let cursor = &mut voice.volume_envelope;
                    cursor.tick = (v as i32).min(envelope.node_tick(last));
                    cursor.next_node = 0;
                    while (cursor.next_node as usize) < last
                        && cursor.tick > envelope.node_tick(cursor.next_node as usize)
                    {
                        cursor.next_node += 1;
                    }
                    cursor.value = xm_value(envelope, cursor);
                }
            }

            EffectCommand::PtmNoteSlideDown | EffectCommand::PtmNoteSlideDownRetrig => {
                let retrig = effect.command == EffectCommand::PtmNoteSlideDownRetrig;
                self.ptm_note_slide(module, ch, -((v & 15) as i32), v >> 4, retrig);
            }
            EffectCommand::PtmNoteSlideUp | EffectCommand::PtmNoteSlideUpRetrig => {
                let retrig = effect.command == EffectCommand::PtmNoteSlideUpRetrig;
                self.ptm_note_slide(module, ch, (v & 15) as i32, v >> 4, retrig);
            }

            EffectCommand::OktNoteSlideDown | EffectCommand::OktNoteSlideDownRow => {
                let channel = &mut self.channels[ch];
                channel.toneslide = -(v as i32);
                channel.okt_toneslide = if effect.command == EffectCommand::OktNoteSlideDown { 255 } else { 1 };
            }
            EffectCommand::OktNoteSlideUp | EffectCommand::OktNoteSlideUpRow => {
                let channel = &mut self.channels[ch];
                channel.toneslide = v as i32;
                channel.okt_toneslide = if effect.command == EffectCommand::OktNoteSlideUp { 255 } else { 1 };
            }

            EffectCommand::OktArpeggio3 | EffectCommand::OktArpeggio4 | EffectCommand::OktArpeggio5 => {
                let channel = &mut self.channels[ch];
                channel.arpeggio_offsets = [0, -((v >> 4) as i8), (v & 15) as i8];
                channel.arpeggio_table = match effect.command {
                    EffectCommand::OktArpeggio3 => ArpeggioTable::Okt3,
                    EffectCommand::OktArpeggio4 => ArpeggioTable::Okt4,
                    _ => ArpeggioTable::Okt5,
                };
            }

            EffectCommand::OktVolumeSlideDown => {
                let channel = &mut self.channels[ch];
                if v <= 16 {
                    channel.volslide = -(v as i32);
                } else {
                    channel.volume = lower(channel.volume, v as i32 - 16, 64);
                }
            }
            EffectCommand::OktVolumeSlideUp => {
                let channel = &mut self.channels[ch];
                if v <= 16 {
                    channel.volslide = v as i32;
                } else {
                    channel.volume = raise(channel.volume, v as i32 - 16, 64);
                }
            }

            // Handled with the note data or when the row starts
            EffectCommand::JumpToOrder | EffectCommand::TonePortamento => {}
        }

        ControlFlow::Continue(())
    }

    /// Dxy and the volume slide half of Kxy/Lxy
    fn volume_slide(&mut self, module: &TrackerModule, ch: usize, v: u8) {
        let channel = &mut self.channels[ch];
        let mut v = v;
        if !module.was(FormatFlags::WAS_MOD) {
            if v == 0 {
                v = channel.last_dkl;
            }
            channel.last_dkl = v;
        }

        if module.was(FormatFlags::WAS_XM) {
            if v & 0x0F == 0 {
                channel.volslide = (v >> 4) as i32;
            } else if v & 0xF0 == 0 {
                channel.volslide = -(v as i32);
            } else if v & 0x0F == 0x0F {
                channel.volume = raise(channel.volume, (v >> 4) as i32, 64);
            } else if v & 0xF0 == 0xF0 {
                channel.volume = lower(channel.volume, (v & 15) as i32, 64);
            }
            return;
        }

        let clip = if module.was(FormatFlags::WAS_S3M) { 63 } else { 64 };
        if v & 0x0F == 0x0F {
            if v & 0xF0 == 0 {
                // D0F: slide down by 15 every tick, including this one
                channel.volslide = -15;
                channel.volume = lower(channel.volume, 15, clip);
            } else {
                channel.volume = raise(channel.volume, (v >> 4) as i32, clip);
            }
        } else if v & 0xF0 == 0xF0 {
            if v & 0x0F == 0 {
                channel.volslide = 15;
                channel.volume = raise(channel.volume, 15, clip);
            } else {
                channel.volume = lower(channel.volume, (v & 15) as i32, clip);
            }
        } else if v & 0x0F == 0 {
            channel.volslide = (v >> 4) as i32;
        } else {
            channel.volslide = -((v & 15) as i32);
        }
    }

    /// Exx/Fxx: fine and extra fine variants bend every voice of the
    /// channel at once, the plain slide runs per tick on the channel's voice
    fn portamento(&mut self, module: &TrackerModule, ch: usize, v: u8, up: bool) {
        let v = portamento_value(module, &mut self.channels[ch], v, up);
        let sign = if up { 1 } else { -1 };
        let fine = match v & 0xF0 {
            0xF0 => Some(((v & 15) as i32) << 4),
            0xE0 => Some(((v & 15) as i32) << 2),
            _ => None,
        };

        match fine {
            Some(amount) => self.each_channel_voice(ch, |voice| voice.slide += sign * amount),
            None => {
                let channel = &mut self.channels[ch];
                if channel.playing.is_some() {
                    let shift = if module.was(FormatFlags::WAS_669) { 3 } else { 4 };
                    channel.portamento += sign * ((v as i32) << shift);
                }
            }
        }
    }

    /// Oxx: restart the channel's voice `offset` frames in
    fn sample_offset(&mut self, module: &TrackerModule, ch: usize, offset: i64) {
        let Some(voice) = self.channel_voice_mut(ch) else {
            return;
        };
        let Some(sample) = module.sample(voice.sample) else {
            return;
        };
        let end = if sample.has_sus_loop() && !voice.has(flags::SUSTAINOFF) {
            sample.sus_loop_end
        } else if sample.has_loop() {
            sample.loop_end
        } else {
            sample.length
        } as i64;

        let mut offset = offset;
        if module.was(FormatFlags::WAS_PTM) && matches!(sample.data, SampleData::Pcm16(_)) {
            offset >>= 1;
        }
        if offset < end {
            restart_voice(module, voice, offset);
        } else if module.uses_old_effects() {
            restart_voice(module, voice, end);
        }
    }

    /// Pxy
    fn panning_slide(&mut self, module: &TrackerModule, ch: usize, v: u8) {
        let xm = module.was(FormatFlags::WAS_XM);
        let channel = &mut self.channels[ch];
        let mut p = channel.truepan;
        if xm {
            if channel.is_surround() {
                channel.pan = 32;
                p = XM_PAN_MIN + 128 * 64;
            }
            p >>= 6;
        } else {
            if channel.is_surround() {
                p = 32 << ENVELOPE_SHIFT;
            }
            p = (p + 128) >> ENVELOPE_SHIFT;
            channel.pan = p;
        }

        let v = if v == 0 { channel.last_p } else { v };
        channel.last_p = v;
        if v & 0x0F == 0 {
            channel.panslide = -((v >> 4) as i32);
        } else if v & 0xF0 == 0 {
            channel.panslide = v as i32;
        } else if v & 0x0F == 0x0F {
            p -= (v >> 4) as i32;
        } else if v & 0xF0 == 0xF0 {
            p += (v & 15) as i32;
        }

        if xm {
            channel.truepan = XM_PAN_MIN + p.clamp(0, 255) * 64;
        } else {
            channel.set_pan(p.clamp(0, 64));
        }
    }

    /// PolyTracker note slide; a slide still pending from the previous row
    /// completes first
    fn ptm_note_slide(&mut self, module: &TrackerModule, ch: usize, toneslide: i32, speed: u8, retrig: bool) {
        let channel = &mut self.channels[ch];
        channel.toneslide_retrig = retrig;

        if channel.ptm_last_toneslide != 0 {
            channel.toneslide_tick = channel.last_toneslide_tick.wrapping_sub(1);
            if channel.toneslide_tick == 0 {
                channel.truenote = slide_note(channel.truenote as i32, channel.toneslide) as u8;
                channel.note = slide_note(channel.note as i32, channel.toneslide) as u8;
                let note = if channel.sample != 0 { channel.truenote } else { channel.note };
                if let Some(voice) = channel.playing.and_then(|h| self.voices.get_mut(h)) {
                    voice.note = note as i32;
                    restart_voice(module, voice, 0);
                }
            }
        }

        let channel = &mut self.channels[ch];
        channel.ptm_last_toneslide = 0;
        channel.toneslide = toneslide;
        channel.ptm_toneslide = speed;
        channel.toneslide_tick = channel.toneslide_tick.wrapping_add(speed);
    }

    /// Sxy, using the value [`Sigrenderer::update_pattern_variables`] stored
    fn extended_command(&mut self, module: &TrackerModule, ch: usize) {
        let ev = self.channels[ch].last_s;
        let x = ev & 15;

        match SubCommand::from_nibble(ev >> 4) {
            SubCommand::Glissando => self.channels[ch].glissando = x != 0,

            SubCommand::Finetune => {
                if let Some(voice) = self.channel_voice_mut(ch) {
                    voice.finetune = (x as i32 - 8) << 5;
                }
            }

            SubCommand::VibratoWaveform | SubCommand::TremoloWaveform => {
                let mut wf = x & 3;
                if module.was(FormatFlags::WAS_MOD) {
                    wf = MOD_CONVERT_WAVEFORM[wf as usize];
                } else if module.was(FormatFlags::WAS_XM) {
                    wf = XM_CONVERT_WAVEFORM[wf as usize];
                }
                let vibrato = SubCommand::from_nibble(ev >> 4) == SubCommand::VibratoWaveform;
                let channel = &mut self.channels[ch];
                if vibrato {
                    channel.vibrato_waveform = wf;
                } else {
                    channel.tremolo_waveform = wf;
                }
                if let Some(voice) = self.channel_voice_mut(ch) {
                    let (waveform, time) = if vibrato {
                        (&mut voice.vibrato_waveform, &mut voice.vibrato_time)
                    } else {
                        (&mut voice.tremolo_waveform, &mut voice.tremolo_time)
                    };
                    *waveform = wf;
                    if x & 4 == 0 {
                        *time = 0;
                    }
                }
            }

            SubCommand::PanbrelloWaveform => {
                self.channels[ch].panbrello_waveform = x & 3;
                if let Some(voice) = self.channel_voice_mut(ch) {
                    voice.panbrello_waveform = x & 3;
                    if x & 4 == 0 {
                        voice.panbrello_time = 0;
                    }
                }
            }

            SubCommand::FinePatternDelay => self.tick += x as i32,

            SubCommand::InstrumentControl => {
                if module.uses_instruments() {
                    self.instrument_control(module, ch, x);
                }
            }

            SubCommand::SetPan => {
                self.channels[ch].set_pan(((x << 2) | (x >> 2)) as i32);
                if let Some(voice) = self.channel_voice_mut(ch) {
                    voice.panbrello_depth = 0;
                }
            }

            SubCommand::SoundControl => {
                if x == 15 {
                    if let Some(voice) = self.channel_voice_mut(ch) {
                        let unlooped = module
                            .sample(voice.sample)
                            .filter(|s| !s.has_loop() && !s.has_sus_loop());
                        if let Some(sample) = unlooped {
                            voice.flags |= flags::REVERSE;
                            voice.reset_resamplers(sample, sample.length as i64 - 1);
                        }
                    }
                } else if x == 1 {
                    self.channels[ch].set_pan(SURROUND);
                }
                if let Some(voice) = self.channel_voice_mut(ch) {
                    voice.panbrello_depth = 0;
                }
            }

            SubCommand::HighOffset => self.channels[ch].high_offset = x,

            SubCommand::NoteCut => {
                let channel = &mut self.channels[ch];
                channel.note_cut_count = x;
                if x == 0 {
                    if module.format.intersects(FormatFlags::WAS_XM.union(FormatFlags::WAS_PTM)) {
                        channel.volume = 0;
                    } else {
                        channel.note_cut_count = 1;
                    }
                }
            }

            SubCommand::SetMidiMacro => self.channels[ch].sfmacro = x,

            // Row flow and note delay act before the note data
            SubCommand::SetFilter
            | SubCommand::PatternLoop
            | SubCommand::NoteDelay
            | SubCommand::PatternDelay => {}
        }
    }

    /// S7x: act on background notes, override the New Note Action or toggle
    /// the envelopes of the sounding note
    fn instrument_control(&mut self, module: &TrackerModule, ch: usize, x: u8) {
        match x {
            0 => {
                for handle in self.pool_voices(ch) {
                    if let Some(voice) = self.voices.get_mut(handle) {
                        voice.declick_stage = declick::CUT;
                    }
                }
            }
            1 => {
                for handle in self.pool_voices(ch) {
                    if let Some(voice) = self.voices.get_mut(handle) {
                        if !voice.has(flags::SUSTAINOFF) {
                            it_note_off(module, voice);
                        }
                    }
                }
            }
            2 => {
                for handle in self.pool_voices(ch) {
                    if let Some(voice) = self.voices.get_mut(handle) {
                        voice.flags |= flags::FADING;
                    }
                }
            }
            3 => self.channels[ch].new_note_action = Some(NewNoteAction::Cut),
            4 => self.channels[ch].new_note_action = Some(NewNoteAction::Continue),
            5 => self.channels[ch].new_note_action = Some(NewNoteAction::NoteOff),
            6 => self.channels[ch].new_note_action = Some(NewNoteAction::NoteFade),
            7..=12 => {
                if let Some(voice) = self.channel_voice_mut(ch) {
                    let bit = match x {
                        7 | 8 => env::VOLUME,
                        9 | 10 => env::PANNING,
                        _ => env::PITCH,
                    };
                    if x % 2 == 1 {
                        voice.enabled_envelopes &= !bit;
                    } else {
                        voice.enabled_envelopes |= bit;
                    }
                }
            }
            _ => {}
        }
    }

    /// IT volume column slides, portamento and vibrato, which run alongside
    /// the effect column
    fn post_process_it_volpan(&mut self, ch: usize, vp: u8) {
        let channel = &mut self.channels[ch];
        match vp {
            85..=94 => {
                let v = match vp - 85 {
                    0 => channel.last_volslide,
                    v => v,
                };
                channel.last_volslide = v;
                channel.volslide += v as i32;
            }
            95..=104 => {
                let v = match vp - 95 {
                    0 => channel.last_volslide,
                    v => v,
                };
                channel.last_volslide = v;
                channel.volslide -= v as i32;
            }
            105..=114 => {
                let v = match (vp - 105) << 2 {
                    0 => channel.last_ef,
                    v => v,
                };
                channel.last_ef = v;
                channel.portamento -= (v as i32) << 4;
            }
            115..=124 => {
                let v = match (vp - 115) << 2 {
                    0 => channel.last_ef,
                    v => v,
                };
                channel.last_ef = v;
                channel.portamento += (v as i32) << 4;
            }
            203..=212 => {
                // A zero depth keeps whatever Hxy last stored, doubling included
                let depth = match vp - 203 {
                    0 => channel.last_h_depth,
                    v => {
                        channel.last_h_depth = v << 2;
                        v << 2
                    }
                };
                let speed = channel.last_h_speed;
                if let Some(voice) = self.channel_voice_mut(ch) {
                    voice.vibrato_speed = speed as i32;
                    voice.vibrato_depth = depth as i32;
                    voice.vibrato_n += 1;
                }
            }
            _ => {}
        }
    }

    // ========================================================================
    // Per-tick updates
    // ========================================================================

    /// Advance every running slide by one tick
    pub(super) fn update_effects(&mut self, module: &TrackerModule) {
        if self.globalvolslide != 0 {
            self.globalvolume = slide(self.globalvolume, self.globalvolslide, 128);
        }

        if self.temposlide != 0 {
            self.tempo += self.temposlide;
            if self.tempo < 32 {
                self.tempo = if self.temposlide >= 0 { 255 } else { 32 };
            }
            self.tempo = self.tempo.min(255);
        }

        let xm = module.was(FormatFlags::WAS_XM);
        let clip = if module.was(FormatFlags::WAS_S3M) { 63 } else { 64 };

        for ch in 0..self.channels.len() {
            let channel = &mut self.channels[ch];

            if channel.xm_volslide != 0 {
                channel.volume = slide(channel.volume, channel.xm_volslide, 64);
            }
            if channel.volslide != 0 {
                channel.volume = slide(channel.volume, channel.volslide, clip);
            }

            if channel.panslide != 0 {
                if xm {
                    if channel.is_surround() {
                        channel.pan = 32;
                        channel.truepan = XM_PAN_MIN + 128 * 64;
                    }
                    channel.truepan = if channel.panslide == -128 {
                        XM_PAN_MIN
                    } else {
                        (channel.truepan + channel.panslide * 64).clamp(XM_PAN_MIN, XM_PAN_MAX)
                    };
                } else {
                    if channel.is_surround() {
                        channel.pan = 32;
                    }
                    let pan = slide(channel.pan, channel.panslide, 64);
                    channel.set_pan(pan);
                }
            }

            if channel.channelvolslide != 0 {
                channel.channelvolume = slide(channel.channelvolume, channel.channelvolslide, 64);
            }

            channel.update_tremor();
            self.update_retrig(module, ch);

            if let Some(handle) = self.channels[ch].playing {
                self.update_pitch_slides(module, ch, handle);
                self.update_playing_effects(module, handle);
            }
        }

        for handle in self.pool.iter().flatten().copied().collect::<super::ChannelVoices>() {
            self.update_playing_effects(module, handle);
        }

        self.update_smooth_effects();
    }

    /// Portamento and tone portamento of the channel's own voice
    fn update_pitch_slides(&mut self, module: &TrackerModule, ch: usize, handle: VoiceHandle) {
        let channel = &mut self.channels[ch];
        let Some(voice) = self.voices.get_mut(handle) else {
            return;
        };
        voice.slide += channel.portamento;

        if channel.toneporta == 0 || channel.destnote >= NOTE_LIMIT {
            return;
        }

        if module.uses_linear_slides() {
            let mut current = ((voice.note - 60) << 8) + voice.slide;
            let dest = (channel.destnote as i32 - 60) << 8;
            if current > dest {
                current -= channel.toneporta;
                if current < dest {
                    current = dest;
                    channel.destnote = NOTE_OFF;
                }
            } else if current < dest {
                current += channel.toneporta;
                if current > dest {
                    current = dest;
                    channel.destnote = NOTE_OFF;
                }
            }
            voice.slide = current - ((voice.note - 60) << 8);
            return;
        }

        let Some(sample) = module.sample(voice.sample) else {
            return;
        };
        let amiga_multiplier = sample.c5_speed as f32 * (1.0 / AMIGA_DIVISOR as f32);
        let delta_note = SEMITONE_BASE.powi(60 - voice.note) as f32;
        let dest_delta = SEMITONE_BASE.powi(60 - channel.destnote as i32) as f32;
        let slid = |slide: i32| delta_note - slide as f32 * amiga_multiplier;

        let reached = if slid(voice.slide) < dest_delta {
            voice.slide -= channel.toneporta;
            slid(voice.slide) > dest_delta
        } else {
            voice.slide += channel.toneporta;
            slid(voice.slide) < dest_delta
        };
        if reached {
            voice.note = channel.destnote as i32;
            voice.slide = 0;
            channel.destnote = NOTE_OFF;
        }
    }

    /// Channel volume slides and note slides, applied to every voice the
    /// channel started
    fn update_playing_effects(&mut self, module: &TrackerModule, handle: VoiceHandle) {
        let Some(voice) = self.voices.get_mut(handle) else {
            return;
        };
        let channel = &mut self.channels[voice.channel];

        if channel.channelvolslide != 0 {
            voice.channel_volume = channel.channelvolume;
        }

        if channel.okt_toneslide != 0 {
            channel.okt_toneslide -= 1;
            voice.note = slide_note(voice.note, channel.toneslide);
        } else if channel.ptm_toneslide != 0 {
            channel.toneslide_tick = channel.toneslide_tick.wrapping_sub(1);
            if channel.toneslide_tick == 0 {
                channel.toneslide_tick = channel.ptm_toneslide;
                voice.note = slide_note(voice.note, channel.toneslide);
                if channel.playing == Some(handle) {
                    channel.note = voice.note as u8;
                    channel.truenote = voice.note as u8;
                }
                if channel.toneslide_retrig {
                    restart_voice(module, voice, 0);
                }
            }
        }
    }

    /// Advance the LFO phases of every voice
    pub(super) fn update_smooth_effects(&mut self) {
        for handle in self.live_handles() {
            let Some(voice) = self.voices.get_mut(handle) else {
                continue;
            };
            voice.vibrato_time = voice
                .vibrato_time
                .wrapping_add((voice.vibrato_n * (voice.vibrato_speed << 2)) as u8);
            voice.tremolo_time = voice.tremolo_time.wrapping_add((voice.tremolo_speed << 2) as u8);
            voice.panbrello_time = voice.panbrello_time.wrapping_add(voice.panbrello_speed as u8);
            if voice.panbrello_waveform == waveform::RANDOM {
                voice.panbrello_random = self.rng.random_range(-64..=64);
            }
            if voice.tremolo_waveform == waveform::RANDOM {
                voice.tremolo_random = self.rng.random_range(-64..=64);
            }
        }
    }

    /// Count down Qxy/E9x and retrigger the note when it expires
    pub(super) fn update_retrig(&mut self, module: &TrackerModule, ch: usize) {
        let channel = &mut self.channels[ch];
        let period = if channel.xm_retrig != 0 {
            channel.xm_retrig
        } else if channel.retrig & 0x0F != 0 {
            channel.retrig & 0x0F
        } else {
            return;
        };

        channel.retrig_tick -= 1;
        if channel.retrig_tick > 0 {
            return;
        }
        if channel.xm_retrig == 0 {
            channel.apply_retrig_volume();
        }

        if let Some(voice) = self.channel_voice_mut(ch) {
            restart_voice(module, voice, 0);
        } else if module.was(FormatFlags::WAS_XM) {
            self.it_retrigger_note(module, ch);
        }
        self.channels[ch].retrig_tick = period as i32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_helpers() {
        assert_eq!(lower(10, 15, 64), 0, "underflow drops to silence");
        assert_eq!(lower(40, 15, 64), 25);
        assert_eq!(raise(60, 15, 64), 64);
        assert_eq!(slide(2, -5, 64), 0);
        assert_eq!(slide(62, 5, 63), 63, "S3M slides stop at 63");
    }

    #[test]
    fn test_slide_note_clamps_to_keyboard() {
        assert_eq!(slide_note(60, 12), 72);
        assert_eq!(slide_note(2, -5), 0);
        assert_eq!(slide_note(115, 9), 119);
    }

    #[test]
    fn test_portamento_memory_by_format() {
        let mut module = TrackerModule::default();
        let mut channel = Channel::new(&module, 0);

        module.format = FormatFlags::WAS_S3M;
        assert_eq!(portamento_value(&module, &mut channel, 0x12, false), 0x12);
        assert_eq!(portamento_value(&module, &mut channel, 0, true), 0x12, "S3M shares the D/E/F cell");
        assert_eq!(channel.last_dkl, 0x12);

        module.format = FormatFlags::WAS_XM;
        assert_eq!(portamento_value(&module, &mut channel, 0xF3, true), 0xF3);
        assert_eq!(portamento_value(&module, &mut channel, 0xF0, true), 0xF3, "E1x remembers its own value");
        assert_eq!(portamento_value(&module, &mut channel, 0xF0, false), 0xF0, "E2x has a separate cell");
    }
}
