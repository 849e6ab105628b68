//! Pattern and entry data structures

use crate::effects::TrackerEffect;

/// Tracker pattern
///
/// Rows are stored sparsely: each row lists only the channels that carry
/// data, in ascending channel order.
#[derive(Debug, Clone, Default)]
pub struct TrackerPattern {
    /// Number of rows (1-256)
    pub num_rows: u16,
    /// Entry data: [row][entry]
    pub rows: Vec<Vec<TrackerEntry>>,
}

impl TrackerPattern {
    /// Create an empty pattern
    pub fn empty(num_rows: u16) -> Self {
        Self {
            num_rows,
            rows: vec![Vec::new(); num_rows as usize],
        }
    }

    /// Entries on a row (empty when the row is out of range)
    pub fn row(&self, row: usize) -> &[TrackerEntry] {
        self.rows.get(row).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Place an entry, replacing any entry already on that row and channel
    pub fn set(&mut self, row: usize, entry: TrackerEntry) {
        if row >= self.rows.len() {
            return;
        }
        let entries = &mut self.rows[row];
        match entries.binary_search_by_key(&entry.channel, |e| e.channel) {
            Ok(i) => entries[i] = entry,
            Err(i) => entries.insert(i, entry),
        }
    }

    /// Builder form of [`TrackerPattern::set`]
    pub fn with(mut self, row: usize, entry: TrackerEntry) -> Self {
        self.set(row, entry);
        self
    }
}

/// One channel's data on one row
///
/// Missing columns are `None`. The volume column is kept raw because IT and
/// XM encode it differently:
/// - IT: 0-64 volume, 65-74 fine up, 75-84 fine down, 85-94 slide up,
///   95-104 slide down, 105-114 porta down, 115-124 porta up, 128-192 pan,
///   193-202 tone portamento, 203-212 vibrato depth
/// - XM: the original byte (0x10-0x50 volume, 0x60-0xFF commands)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerEntry {
    /// Pattern channel (0-63)
    pub channel: u8,
    /// Note value (0-119 = C-0 to B-9, 254 = cut, 255 = off, others fade)
    pub note: Option<u8>,
    /// Instrument (or sample) number, 1-based
    pub instrument: Option<u8>,
    /// Raw volume column
    pub volpan: Option<u8>,
    /// Effect column
    pub effect: Option<TrackerEffect>,
}

impl TrackerEntry {
    pub const NOTE_CUT: u8 = 254;
    pub const NOTE_OFF: u8 = 255;
    pub const NOTE_MAX: u8 = 119;

    /// Empty entry for a channel
    pub fn new(channel: u8) -> Self {
        Self {
            channel,
            ..Default::default()
        }
    }

    pub fn note(mut self, note: u8) -> Self {
        self.note = Some(note);
        self
    }

    pub fn instrument(mut self, instrument: u8) -> Self {
        self.instrument = Some(instrument);
        self
    }

    pub fn volpan(mut self, volpan: u8) -> Self {
        self.volpan = Some(volpan);
        self
    }

    pub fn effect(mut self, effect: TrackerEffect) -> Self {
        self.effect = Some(effect);
        self
    }

    /// Check if this is a note-cut
    pub fn is_note_cut(&self) -> bool {
        self.note == Some(Self::NOTE_CUT)
    }

    /// Check if this is a note-off
    pub fn is_note_off(&self) -> bool {
        self.note == Some(Self::NOTE_OFF)
    }

    /// Check if this has a playable note
    pub fn has_note(&self) -> bool {
        self.note.is_some_and(|n| n <= Self::NOTE_MAX)
    }

    /// Effect command and value, if the effect column is used
    pub fn effect_parts(&self) -> Option<(crate::EffectCommand, u8)> {
        self.effect.map(|e| (e.command, e.value))
    }
}
