//! Instrument data structures and envelopes

/// Tracker instrument
#[derive(Debug, Clone)]
pub struct TrackerInstrument {
    /// Instrument name
    pub name: String,
    /// New Note Action
    pub nna: NewNoteAction,
    /// Duplicate check type
    pub dct: DuplicateCheckType,
    /// Duplicate check action
    pub dca: DuplicateCheckAction,
    /// Fadeout speed, subtracted from a 1024-based counter every tick
    pub fadeout: u16,
    /// Global volume (0-128)
    pub global_volume: u8,
    /// Default panning (0-64), None if not set
    pub default_pan: Option<u8>,
    /// Pitch-pan separation (-32 to +32)
    pub pp_separation: i8,
    /// Pitch-pan center note (0-119)
    pub pp_centre: u8,
    /// Random volume variation (0-100 percent)
    pub random_volume: u8,
    /// Random panning variation (0-64)
    pub random_pan: u8,
    /// Initial filter cutoff (0-127)
    pub filter_cutoff: Option<u8>,
    /// Initial filter resonance (0-127)
    pub filter_resonance: Option<u8>,
    /// Note→sample mapping table (120 entries)
    /// Each entry: (transposed_note, sample_number)
    pub note_sample_table: [(u8, u8); 120],
    /// Volume envelope (values 0-64)
    pub volume_envelope: TrackerEnvelope,
    /// Panning envelope (values -32 to +32)
    pub panning_envelope: TrackerEnvelope,
    /// Pitch envelope (values -32 to +32 half-semitones, or a filter
    /// envelope when [`EnvelopeFlags::FILTER`] is set)
    pub pitch_envelope: TrackerEnvelope,
}

impl Default for TrackerInstrument {
    fn default() -> Self {
        let mut note_sample_table = [(0u8, 0u8); 120];
        for (i, entry) in note_sample_table.iter_mut().enumerate() {
            entry.0 = i as u8;
            entry.1 = 1;
        }

        Self {
            name: String::new(),
            nna: NewNoteAction::Cut,
            dct: DuplicateCheckType::Off,
            dca: DuplicateCheckAction::Cut,
            fadeout: 0,
            global_volume: 128,
            default_pan: None,
            pp_separation: 0,
            pp_centre: 60,
            random_volume: 0,
            random_pan: 0,
            filter_cutoff: None,
            filter_resonance: None,
            note_sample_table,
            volume_envelope: TrackerEnvelope::default(),
            panning_envelope: TrackerEnvelope::default(),
            pitch_envelope: TrackerEnvelope::default(),
        }
    }
}

impl TrackerInstrument {
    /// Get the (note, sample) pair for a given note
    pub fn map_note(&self, note: u8) -> Option<(u8, u8)> {
        self.note_sample_table.get(note as usize).copied()
    }

    /// Map every note to the same sample
    pub fn with_sample(mut self, sample: u8) -> Self {
        for entry in self.note_sample_table.iter_mut() {
            entry.1 = sample;
        }
        self
    }
}

/// New Note Action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum NewNoteAction {
    /// Cut the previous note immediately
    #[default]
    Cut = 0,
    /// Continue playing in background
    Continue = 1,
    /// Release the previous note
    NoteOff = 2,
    /// Fade out the previous note
    NoteFade = 3,
}

impl NewNoteAction {
    pub const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Continue,
            2 => Self::NoteOff,
            3 => Self::NoteFade,
            _ => Self::Cut,
        }
    }
}

/// Duplicate Check Type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DuplicateCheckType {
    /// No duplicate checking
    #[default]
    Off = 0,
    /// Check for same note
    Note = 1,
    /// Check for same sample
    Sample = 2,
    /// Check for same instrument
    Instrument = 3,
}

/// Duplicate Check Action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DuplicateCheckAction {
    /// Cut the duplicate note
    #[default]
    Cut = 0,
    /// Release the duplicate note
    NoteOff = 1,
    /// Fade out the duplicate note
    NoteFade = 2,
}

/// Node envelope
///
/// Loop and sustain indices refer to `nodes`. The envelope only plays when
/// [`EnvelopeFlags::ENABLED`] is set.
#[derive(Debug, Clone, Default)]
pub struct TrackerEnvelope {
    /// Envelope nodes: (tick, value)
    pub nodes: Vec<(i16, i8)>,
    /// Loop start node index
    pub loop_start: u8,
    /// Loop end node index
    pub loop_end: u8,
    /// Sustain loop start node index
    pub sus_loop_start: u8,
    /// Sustain loop end node index
    pub sus_loop_end: u8,
    /// Envelope flags
    pub flags: EnvelopeFlags,
}

impl TrackerEnvelope {
    /// Check if envelope is enabled
    pub fn is_enabled(&self) -> bool {
        self.flags.contains(EnvelopeFlags::ENABLED)
    }

    /// Check if envelope has loop
    pub fn has_loop(&self) -> bool {
        self.flags.contains(EnvelopeFlags::LOOP)
    }

    /// Check if envelope has sustain loop
    pub fn has_sustain(&self) -> bool {
        self.flags.contains(EnvelopeFlags::SUSTAIN_LOOP)
    }

    /// Check if this is a filter envelope (for pitch envelope type)
    pub fn is_filter(&self) -> bool {
        self.flags.contains(EnvelopeFlags::FILTER)
    }

    /// Tick of node `i`, clamped to the node range
    pub fn node_tick(&self, i: usize) -> i32 {
        match self.nodes.get(i.min(self.nodes.len().saturating_sub(1))) {
            Some(&(t, _)) => t as i32,
            None => 0,
        }
    }

    /// Value of node `i`, clamped to the node range
    pub fn node_value(&self, i: usize) -> i32 {
        match self.nodes.get(i.min(self.nodes.len().saturating_sub(1))) {
            Some(&(_, y)) => y as i32,
            None => 0,
        }
    }
}

/// Envelope flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnvelopeFlags(u8);

impl EnvelopeFlags {
    pub const ENABLED: Self = Self(0x01);
    pub const LOOP: Self = Self(0x02);
    pub const SUSTAIN_LOOP: Self = Self(0x04);
    /// Keep the envelope position when a new note takes over
    pub const CARRY: Self = Self(0x08);
    pub const FILTER: Self = Self(0x80);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for EnvelopeFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
