//! New Note Actions and the background voice pool
//!
//! When a channel starts a new note, the voice it was playing is moved to
//! one of the pool slots instead of being stopped. The instrument's New Note
//! Action (or an S73-S76 override) decides whether that voice is cut,
//! released, faded or left to continue, and the Duplicate Check then acts on
//! older pool voices that match the new note. A full pool simply drops the
//! displaced voice.

use nether_resampler::declick;
use nether_tracker::{DuplicateCheckAction, DuplicateCheckType, NewNoteAction, TrackerModule};
use rand::Rng;
use tracing::{trace, warn};

use super::notes::{it_note_off, prepare_note_voice, NOTE_LIMIT};
use super::Sigrenderer;
use crate::arena::VoiceHandle;
use crate::envelope::recalculate_node;
use crate::voice::{env, flags, Voice};

/// Envelope ticks handed from an old note to the one replacing it
#[derive(Debug, Clone, Copy, Default)]
struct CarriedTicks {
    volume: i32,
    pan: i32,
    pitch: i32,
}

impl CarriedTicks {
    fn from_voice(voice: &Voice, with_volume: bool) -> Self {
        Self {
            volume: if with_volume { voice.volume_envelope.tick } else { 0 },
            pan: voice.pan_envelope.tick,
            pitch: voice.pitch_envelope.tick,
        }
    }
}

impl Sigrenderer {
    // ========================================================================
    // Pool slots
    // ========================================================================

    /// Park a voice in the first free pool slot; frees it when the pool is full
    pub(super) fn move_to_pool(&mut self, handle: VoiceHandle) -> bool {
        if let Some(slot) = self.pool.iter_mut().find(|s| s.is_none()) {
            *slot = Some(handle);
            return true;
        }
        warn!("background pool full, dropping voice");
        self.voices.free(handle);
        false
    }

    /// Store a detached voice in the pool, dropping it when there is no room
    pub(super) fn push_voice_to_pool(&mut self, voice: Voice) -> bool {
        let Some(slot) = self.pool.iter().position(Option::is_none) else {
            warn!("background pool full, dropping voice");
            return false;
        };
        match self.voices.insert(voice) {
            Some(handle) => {
                self.pool[slot] = Some(handle);
                true
            }
            None => false,
        }
    }

    /// Fade the channel's voice out from the pool and leave the channel empty
    pub(super) fn cut_to_pool(&mut self, ch: usize) {
        let Some(handle) = self.channels[ch].playing.take() else {
            return;
        };
        if let Some(voice) = self.voices.get_mut(handle) {
            voice.cut();
        }
        self.move_to_pool(handle);
    }

    /// Free a pool slot and its voice
    pub(super) fn free_pool_slot(&mut self, slot: usize) {
        if let Some(handle) = self.pool[slot].take() {
            self.voices.free(handle);
        }
    }

    /// Free the channel's own voice
    pub(super) fn free_channel_voice(&mut self, ch: usize) {
        if let Some(handle) = self.channels[ch].playing.take() {
            self.voices.free(handle);
        }
    }

    // ========================================================================
    // Note start
    // ========================================================================

    fn new_note_action(&self, module: &TrackerModule, ch: usize, voice: &Voice) -> NewNoteAction {
        let channel = &self.channels[ch];
        match channel.note {
            nether_tracker::TrackerEntry::NOTE_CUT => NewNoteAction::Cut,
            nether_tracker::TrackerEntry::NOTE_OFF => NewNoteAction::NoteOff,
            n if n > NOTE_LIMIT => NewNoteAction::NoteFade,
            _ => match voice.instrument.and_then(|i| module.instrument(i)) {
                Some(_) if voice.is_dead() => NewNoteAction::Cut,
                Some(instrument) => channel.new_note_action.unwrap_or(instrument.nna),
                None => NewNoteAction::Cut,
            },
        }
    }

    /// Start the channel's current note as an IT-style voice
    ///
    /// Also used to stop the channel (note cut, off or fade values), in which
    /// case only the New Note Action runs.
    pub(super) fn it_retrigger_note(&mut self, module: &TrackerModule, ch: usize) {
        let mut nna = None;
        let mut carried: Option<CarriedTicks> = None;

        if let Some(handle) = self.channels[ch].playing {
            if let Some(voice) = self.voices.get(handle) {
                let action = self.new_note_action(module, ch, voice);
                if !voice.has(flags::SUSTAINOFF) {
                    carried = Some(CarriedTicks::from_voice(voice, action != NewNoteAction::Cut));
                }
                nna = Some(action);
            }
            if let (Some(action), Some(voice)) = (nna, self.voices.get_mut(handle)) {
                match action {
                    NewNoteAction::Cut => voice.cut(),
                    NewNoteAction::NoteOff => it_note_off(module, voice),
                    NewNoteAction::NoteFade => voice.flags |= flags::BACKGROUND | flags::FADING,
                    NewNoteAction::Continue => {}
                }
            }
        }

        let channel = &mut self.channels[ch];
        channel.new_note_action = None;
        if channel.sample == 0 || channel.note > NOTE_LIMIT {
            return;
        }
        channel.destnote = crate::channel::NOTE_OFF;

        if let Some(handle) = channel.playing.take() {
            if !self.move_to_pool(handle) {
                trace!(channel = ch, "previous note dropped");
            }
            if module.uses_instruments() {
                self.duplicate_check(module, ch);
            }
        }

        let Some(sample) = module.sample(self.channels[ch].sample) else {
            return;
        };

        if carried.is_none() && module.uses_instruments() {
            let with_volume = nna != Some(NewNoteAction::Cut);
            carried = self
                .pool
                .iter()
                .flatten()
                .filter_map(|&h| self.voices.get(h))
                .find(|v| v.channel == ch && !v.has(flags::SUSTAINOFF))
                .map(|v| CarriedTicks::from_voice(v, with_volume));
        }

        let channel = &self.channels[ch];
        let mut voice = Voice::new(self.resampler_context(), ch, channel.sample, sample, self.quality);
        prepare_note_voice(module, channel, ch, self.quality, &mut voice, sample);
        voice.vibrato_waveform = channel.vibrato_waveform;
        voice.tremolo_waveform = channel.tremolo_waveform;
        voice.panbrello_waveform = channel.panbrello_waveform;

        if let Some(instrument) = voice.instrument.and_then(|n| module.instrument(n)) {
            if instrument.pitch_envelope.is_enabled() {
                voice.enabled_envelopes |= env::PITCH;
            }
            if instrument.random_volume != 0 {
                let r = instrument.random_volume as i32;
                voice.volume_offset = self.rng.random_range(-r..=r);
            }
            if instrument.random_pan != 0 {
                let r = instrument.random_pan as i32;
                voice.panning_offset = self.rng.random_range(-r..=r);
            }

            let carry = |e: &nether_tracker::TrackerEnvelope, tick: fn(&CarriedTicks) -> i32| match carried {
                Some(ticks) if e.flags.contains(nether_tracker::EnvelopeFlags::CARRY) => tick(&ticks),
                _ => 0,
            };
            voice.volume_envelope.tick = carry(&instrument.volume_envelope, |t| t.volume);
            voice.pan_envelope.tick = carry(&instrument.panning_envelope, |t| t.pan);
            voice.pitch_envelope.tick = carry(&instrument.pitch_envelope, |t| t.pitch);
            recalculate_node(&mut voice.volume_envelope, &instrument.volume_envelope);
            recalculate_node(&mut voice.pan_envelope, &instrument.panning_envelope);
            recalculate_node(&mut voice.pitch_envelope, &instrument.pitch_envelope);
        }

        trace!(channel = ch, note = voice.note, sample = voice.sample, ?nna, "note on");
        match self.voices.insert(voice) {
            Some(handle) => self.channels[ch].playing = Some(handle),
            None => warn!(channel = ch, "voice arena full, note dropped"),
        }
    }

    /// Apply the Duplicate Check Action to pool voices matching the new note
    fn duplicate_check(&mut self, module: &TrackerModule, ch: usize) {
        let channel = &self.channels[ch];
        let (truenote, sample, instrument) = (channel.truenote as i32, channel.sample, channel.instrument);

        for slot in 0..self.pool.len() {
            let Some(handle) = self.pool[slot] else {
                continue;
            };
            let Some(voice) = self.voices.get_mut(handle) else {
                continue;
            };
            if voice.channel != ch {
                continue;
            }
            let Some(inst) = voice.instrument.and_then(|n| module.instrument(n)) else {
                continue;
            };

            let matches = match inst.dct {
                DuplicateCheckType::Off => continue,
                DuplicateCheckType::Note => {
                    voice.note == truenote && voice.sample == sample && voice.instnum == instrument
                }
                DuplicateCheckType::Sample => voice.sample == sample && voice.instnum == instrument,
                DuplicateCheckType::Instrument => voice.instnum == instrument,
            };
            if !matches {
                continue;
            }

            match inst.dca {
                DuplicateCheckAction::Cut => voice.declick_stage = declick::CUT,
                DuplicateCheckAction::NoteOff => {
                    if !voice.has(flags::SUSTAINOFF) {
                        it_note_off(module, voice);
                    }
                }
                DuplicateCheckAction::NoteFade => voice.flags |= flags::BACKGROUND | flags::FADING,
            }
        }
    }
}
