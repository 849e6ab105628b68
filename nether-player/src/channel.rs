//! Pattern channel state
//!
//! A [`Channel`] lives for the whole playback session. It keeps the values
//! the pattern data last set (volume, pan, instrument), the running slides,
//! the per-command "last value" memory cells that a zero parameter recalls,
//! pattern loop bookkeeping, and the handle of the voice it currently owns.

use nether_tracker::{FormatFlags, NewNoteAction, TrackerEntry, TrackerModule, PAN_SURROUND};

use crate::arena::VoiceHandle;
use crate::tables::ArpeggioTable;
use crate::voice::{Voice, ENVELOPE_SHIFT};

/// Channel note value meaning "no note"
pub(crate) const NOTE_OFF: u8 = TrackerEntry::NOTE_OFF;

/// Channel pan value meaning surround
pub(crate) const SURROUND: i32 = PAN_SURROUND as i32;

#[derive(Debug, Clone, Default)]
pub(crate) struct Channel {
    pub muted: bool,

    // Volume
    pub volume: i32,
    pub volslide: i32,
    pub xm_volslide: i32,
    pub channelvolume: i32,
    pub channelvolslide: i32,

    // Panning
    /// 0-64, or [`SURROUND`]
    pub pan: i32,
    /// Pan shifted by [`ENVELOPE_SHIFT`]; XM modules keep `32 + pan * 64` here
    pub truepan: i32,
    pub panslide: i32,

    // Current note
    /// Instrument number from the pattern (0 = none yet)
    pub instrument: u8,
    /// Sample the current instrument maps the note to (0 = none)
    pub sample: u8,
    pub note: u8,
    /// Note after the instrument's note map
    pub truenote: u8,
    /// Tone portamento target, [`NOTE_OFF`] once reached
    pub destnote: u8,

    // Filter and MIDI
    pub filter_cutoff: i32,
    pub filter_resonance: i32,
    pub sfmacro: u8,
    pub midi_state: u8,

    // Delayed actions
    pub key_off_count: u8,
    pub note_cut_count: u8,
    pub note_delay_count: u8,
    pub note_delay_entry: Option<TrackerEntry>,

    /// S73-S76 override of the instrument's New Note Action
    pub new_note_action: Option<NewNoteAction>,

    // Per-tick effects
    pub arpeggio_table: ArpeggioTable,
    pub arpeggio_offsets: [i8; 3],
    pub retrig: u8,
    pub xm_retrig: u8,
    pub retrig_tick: i32,
    /// Bit 7: tremor active. Bit 6: in the "on" phase. Low bits: ticks left
    pub tremor_time: u8,
    pub vibrato_waveform: u8,
    pub tremolo_waveform: u8,
    pub panbrello_waveform: u8,
    pub glissando: bool,
    pub portamento: i32,
    pub toneporta: i32,

    // PTM / OKT note slides
    pub toneslide: i32,
    pub toneslide_tick: u8,
    pub last_toneslide_tick: u8,
    pub ptm_toneslide: u8,
    pub ptm_last_toneslide: u8,
    pub okt_toneslide: u8,
    pub toneslide_retrig: bool,

    // Pattern loop
    pub pat_loop_row: i32,
    pub pat_loop_count: u8,
    pub pat_loop_end_row: i32,

    // Effect memory
    pub high_offset: u8,
    pub last_volslide: u8,
    pub last_dkl: u8,
    pub last_ef: u8,
    pub last_g: u8,
    pub last_h_speed: u8,
    pub last_h_depth: u8,
    pub last_r_speed: u8,
    pub last_r_depth: u8,
    pub last_y_speed: u8,
    pub last_y_depth: u8,
    pub last_i: u8,
    pub last_j: u8,
    pub last_n: u8,
    pub last_o: u8,
    pub last_p: u8,
    pub last_q: u8,
    pub last_s: u8,
    pub last_w: u8,
    pub xm_last_e1: u8,
    pub xm_last_e2: u8,
    pub xm_last_ea: u8,
    pub xm_last_eb: u8,
    pub xm_last_x1: u8,
    pub xm_last_x2: u8,

    pub playing: Option<VoiceHandle>,
}

impl Channel {
    /// Channel `index` in its initial state for `module`
    pub(crate) fn new(module: &TrackerModule, index: usize) -> Self {
        let initial_pan = module.channel_pan.get(index).copied().unwrap_or(32);
        let pan = (initial_pan & 0x7F) as i32;
        Self {
            muted: initial_pan & 0x80 != 0,
            volume: if module.was(FormatFlags::WAS_XM) { 0 } else { 64 },
            pan,
            truepan: pan << ENVELOPE_SHIFT,
            channelvolume: module.channel_volume.get(index).copied().unwrap_or(64) as i32,
            note: NOTE_OFF,
            destnote: NOTE_OFF,
            filter_cutoff: 127,
            ..Default::default()
        }
    }

    pub(crate) fn is_surround(&self) -> bool {
        self.pan == SURROUND
    }

    /// Set an IT-style pan position and its shifted copy
    pub(crate) fn set_pan(&mut self, pan: i32) {
        self.pan = pan;
        self.truepan = pan << ENVELOPE_SHIFT;
    }

    /// Clear the per-row effects before a new row is processed
    pub(crate) fn reset_effects(&mut self, voice: Option<&mut Voice>) {
        self.volslide = 0;
        self.xm_volslide = 0;
        self.panslide = 0;
        self.channelvolslide = 0;
        self.arpeggio_table = ArpeggioTable::Mod;
        self.arpeggio_offsets = [0; 3];
        self.retrig = 0;
        if self.xm_retrig != 0 {
            self.xm_retrig = 0;
            self.retrig_tick = 0;
        }
        self.tremor_time &= 127;
        self.portamento = 0;
        self.toneporta = 0;
        if self.ptm_toneslide != 0 {
            self.ptm_last_toneslide = self.ptm_toneslide;
            self.last_toneslide_tick = self.toneslide_tick;
        } else {
            self.ptm_last_toneslide = 0;
        }
        self.ptm_toneslide = 0;
        self.toneslide_tick = 0;
        self.okt_toneslide = 0;

        if let Some(voice) = voice {
            voice.vibrato_n = 0;
            voice.tremolo_speed = 0;
            voice.tremolo_depth = 0;
            voice.panbrello_speed = 0;
        }
    }

    /// Advance the tremor on/off counter by one tick
    pub(crate) fn update_tremor(&mut self) {
        if self.tremor_time & 128 == 0 || self.playing.is_none() {
            return;
        }
        self.tremor_time = match self.tremor_time {
            128 => (self.last_i >> 4) | 192,
            192 => (self.last_i & 15) | 128,
            t => t - 1,
        };
    }

    /// True while tremor holds the channel silent
    pub(crate) fn tremor_silenced(&self) -> bool {
        self.tremor_time & 192 == 128
    }

    /// Apply the retrigger volume modifier selected by the high nibble of Qxy
    pub(crate) fn apply_retrig_volume(&mut self) {
        let v = self.volume;
        self.volume = match self.retrig >> 4 {
            0x1 => (v - 1).max(0),
            0x2 => (v - 2).max(0),
            0x3 => (v - 4).max(0),
            0x4 => (v - 8).max(0),
            0x5 => (v - 16).max(0),
            0x6 => (v << 1) / 3,
            0x7 => v >> 1,
            0x9 => (v + 1).min(64),
            0xA => (v + 2).min(64),
            0xB => (v + 4).min(64),
            0xC => (v + 8).min(64),
            0xD => (v + 16).min(64),
            0xE => ((v * 3) >> 1).min(64),
            0xF => (v << 1).min(64),
            _ => v,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::tests::test_voice;

    #[test]
    fn test_initial_state_from_module() {
        let mut module = TrackerModule::default();
        module.channel_pan[1] = 0x80 | 16;
        module.channel_volume[1] = 40;

        let channel = Channel::new(&module, 1);
        assert!(channel.muted, "bit 7 of the initial pan mutes the channel");
        assert_eq!(channel.pan, 16);
        assert_eq!(channel.truepan, 16 << 8);
        assert_eq!(channel.channelvolume, 40);
        assert_eq!(channel.volume, 64);
        assert_eq!(channel.note, NOTE_OFF);

        module.format = FormatFlags::WAS_XM;
        assert_eq!(Channel::new(&module, 0).volume, 0, "XM channels start silent");
    }

    #[test]
    fn test_reset_effects_keeps_memory() {
        let module = TrackerModule::default();
        let mut channel = Channel::new(&module, 0);
        channel.volslide = 3;
        channel.last_dkl = 0x30;
        channel.tremor_time = 128 | 5;
        channel.ptm_toneslide = 2;
        channel.toneslide_tick = 1;
        let mut voice = test_voice(0);
        voice.vibrato_n = 2;
        voice.tremolo_depth = 9;

        channel.reset_effects(Some(&mut voice));
        assert_eq!(channel.volslide, 0);
        assert_eq!(channel.last_dkl, 0x30, "memory cells survive the row reset");
        assert_eq!(channel.tremor_time, 5, "tremor stops but keeps its counter");
        assert_eq!((channel.ptm_last_toneslide, channel.last_toneslide_tick), (2, 1));
        assert_eq!((voice.vibrato_n, voice.tremolo_depth), (0, 0));
    }

    #[test]
    fn test_tremor_cycles_on_and_off() {
        let module = TrackerModule::default();
        let mut channel = Channel::new(&module, 0);
        let mut arena = crate::arena::VoiceArena::with_capacity(1);
        channel.playing = arena.insert(test_voice(0));
        channel.last_i = 0x21;
        channel.tremor_time = 128;

        let mut silent = Vec::new();
        for _ in 0..8 {
            channel.update_tremor();
            silent.push(channel.tremor_silenced());
        }
        // I21: on for three ticks, off for two
        assert_eq!(silent, vec![false, false, false, true, true, false, false, false]);
    }

    #[test]
    fn test_retrig_volume_table() {
        let module = TrackerModule::default();
        let mut channel = Channel::new(&module, 0);
        channel.volume = 30;
        channel.retrig = 0x61;
        channel.apply_retrig_volume();
        assert_eq!(channel.volume, 20, "6x scales by two thirds");
        channel.retrig = 0xF1;
        channel.apply_retrig_volume();
        channel.apply_retrig_volume();
        assert_eq!(channel.volume, 64, "Fx doubles and caps at 64");
        channel.retrig = 0x51;
        for _ in 0..5 {
            channel.apply_retrig_volume();
        }
        assert_eq!(channel.volume, 0, "5x subtracts 16 and floors at 0");
    }
}
