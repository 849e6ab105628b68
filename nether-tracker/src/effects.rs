//! Effect column commands
//!
//! Commands follow Impulse Tracker lettering. Loaders for other formats map
//! their effects onto the IT letter with the same behaviour and fall back to
//! the format-specific commands at the end of [`EffectCommand`] where no IT
//! equivalent exists. Format quirks are resolved at playback time from
//! [`crate::FormatFlags`], so one command may behave slightly differently
//! depending on where the song came from.

/// Effect command, IT letter order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectCommand {
    // =========================================================================
    // IT letters
    // =========================================================================
    /// Axx: set speed (ticks per row)
    SetSpeed,
    /// Bxx: jump to order
    JumpToOrder,
    /// Cxx: break to row in next pattern
    BreakToRow,
    /// Dxy: volume slide, `xF`/`Fx` fine
    VolumeSlide,
    /// Exx: portamento down, `Fx` fine, `Ex` extra fine
    PortamentoDown,
    /// Fxx: portamento up, `Fx` fine, `Ex` extra fine
    PortamentoUp,
    /// Gxx: tone portamento
    TonePortamento,
    /// Hxy: vibrato
    Vibrato,
    /// Ixy: tremor
    Tremor,
    /// Jxy: arpeggio
    Arpeggio,
    /// Kxy: volume slide + continue vibrato
    VolslideVibrato,
    /// Lxy: volume slide + continue tone portamento
    VolslideToneporta,
    /// Mxx: set channel volume
    SetChannelVolume,
    /// Nxy: channel volume slide
    ChannelVolumeSlide,
    /// Oxx: sample offset
    SetSampleOffset,
    /// Pxy: panning slide
    PanningSlide,
    /// Qxy: retrigger with volume change
    RetriggerNote,
    /// Rxy: tremolo
    Tremolo,
    /// Sxy: extended commands, see [`SubCommand`]
    S,
    /// Txx: tempo, `0x`/`1x` slide
    SetSongTempo,
    /// Uxy: fine vibrato
    FineVibrato,
    /// Vxx: set global volume
    SetGlobalVolume,
    /// Wxy: global volume slide
    GlobalVolumeSlide,
    /// Xxx: set panning
    SetPanning,
    /// Yxy: panbrello
    Panbrello,
    /// Zxx: MIDI macro
    MidiMacro,

    // =========================================================================
    // FastTracker II
    // =========================================================================
    /// 2xx after conversion
    XmPortamentoDown,
    /// 1xx after conversion
    XmPortamentoUp,
    /// EBx
    XmFineVolslideDown,
    /// EAx
    XmFineVolslideUp,
    /// E9x
    XmRetriggerNote,
    /// Kxx: key off after xx ticks
    XmKeyOff,
    /// Lxx: set envelope position
    XmSetEnvelopePosition,

    // =========================================================================
    // PolyTracker
    // =========================================================================
    PtmNoteSlideDown,
    PtmNoteSlideUp,
    PtmNoteSlideDownRetrig,
    PtmNoteSlideUpRetrig,

    // =========================================================================
    // Oktalyzer
    // =========================================================================
    /// Note slide down every tick
    OktNoteSlideDown,
    /// Note slide down once per row
    OktNoteSlideDownRow,
    OktNoteSlideUp,
    OktNoteSlideUpRow,
    OktArpeggio3,
    OktArpeggio4,
    OktArpeggio5,
    OktVolumeSlideDown,
    OktVolumeSlideUp,
}

/// Effect column: command plus its raw parameter byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerEffect {
    pub command: EffectCommand,
    pub value: u8,
}

impl TrackerEffect {
    pub const fn new(command: EffectCommand, value: u8) -> Self {
        Self { command, value }
    }

    /// Sxy with the sub-command in the high nibble
    pub const fn s(sub: SubCommand, x: u8) -> Self {
        Self {
            command: EffectCommand::S,
            value: ((sub as u8) << 4) | (x & 0x0F),
        }
    }

    /// Tone portamento style commands, which suppress note retriggering
    pub fn is_tone_portamento(&self) -> bool {
        matches!(
            self.command,
            EffectCommand::TonePortamento | EffectCommand::VolslideToneporta
        )
    }

    /// Check if this effect controls pattern flow
    pub fn affects_pattern_flow(&self) -> bool {
        match self.command {
            EffectCommand::JumpToOrder | EffectCommand::BreakToRow => true,
            EffectCommand::S => matches!(
                SubCommand::from_nibble(self.value >> 4),
                SubCommand::PatternLoop | SubCommand::PatternDelay | SubCommand::FinePatternDelay
            ),
            _ => false,
        }
    }
}

/// Sxy sub-commands, selected by the high nibble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubCommand {
    /// S0x: filter (unused, kept for value memory)
    SetFilter = 0x0,
    /// S1x: glissando on/off
    Glissando = 0x1,
    /// S2x: finetune
    Finetune = 0x2,
    /// S3x: vibrato waveform
    VibratoWaveform = 0x3,
    /// S4x: tremolo waveform
    TremoloWaveform = 0x4,
    /// S5x: panbrello waveform
    PanbrelloWaveform = 0x5,
    /// S6x: add x ticks to this row
    FinePatternDelay = 0x6,
    /// S7x: past note and envelope control
    InstrumentControl = 0x7,
    /// S8x: coarse pan
    SetPan = 0x8,
    /// S9x: sound control (surround, reverse)
    SoundControl = 0x9,
    /// SAx: high sample offset
    HighOffset = 0xA,
    /// SBx: pattern loop
    PatternLoop = 0xB,
    /// SCx: note cut after x ticks
    NoteCut = 0xC,
    /// SDx: note delay
    NoteDelay = 0xD,
    /// SEx: row delay
    PatternDelay = 0xE,
    /// SFx: select MIDI macro
    SetMidiMacro = 0xF,
}

impl SubCommand {
    pub const fn from_nibble(n: u8) -> Self {
        match n & 0x0F {
            0x1 => Self::Glissando,
            0x2 => Self::Finetune,
            0x3 => Self::VibratoWaveform,
            0x4 => Self::TremoloWaveform,
            0x5 => Self::PanbrelloWaveform,
            0x6 => Self::FinePatternDelay,
            0x7 => Self::InstrumentControl,
            0x8 => Self::SetPan,
            0x9 => Self::SoundControl,
            0xA => Self::HighOffset,
            0xB => Self::PatternLoop,
            0xC => Self::NoteCut,
            0xD => Self::NoteDelay,
            0xE => Self::PatternDelay,
            0xF => Self::SetMidiMacro,
            _ => Self::SetFilter,
        }
    }
}
