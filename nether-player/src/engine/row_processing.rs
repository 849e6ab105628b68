//! Row entries: pattern flow commands, note delay and the delayed actions
//!
//! Flow commands (Bxx, Cxx, SBx, SEx) are collected for the whole row before
//! any note is played, so a jump and a break on the same row combine the way
//! Impulse Tracker combines them. Note delays park the entry and replay it
//! when the countdown reaches zero.

use std::ops::ControlFlow;

use nether_tracker::{EffectCommand, FormatFlags, SubCommand, TrackerEntry, TrackerModule};
use tracing::trace;

use super::{
    flow_change_pending, is_pure_xm, Sigrenderer, BREAK_MARK, JUMP_MARK, ORDER_STAY,
    ORDER_SUSPECT_LOOP, ROW_BREAK, ROW_XM_LOOP,
};

impl Sigrenderer {
    pub(super) fn reset_tick_counts(&mut self) {
        for channel in &mut self.channels {
            channel.key_off_count = 0;
            channel.note_cut_count = 0;
            channel.note_delay_count = 0;
        }
    }

    /// Record the flow commands of one entry
    ///
    /// Returns true when a pattern loop jumps, in which case later Cxx
    /// commands on the row are ignored.
    pub(super) fn update_pattern_variables(&mut self, module: &TrackerModule, entry: &TrackerEntry) -> bool {
        let Some(effect) = entry.effect else {
            return false;
        };
        let ch = entry.channel as usize;

        match effect.command {
            EffectCommand::JumpToOrder => {
                if flow_change_pending(self.processrow) && self.processrow & BREAK_MARK == 0 {
                    self.processrow = ROW_BREAK & !(BREAK_MARK | JUMP_MARK);
                } else {
                    self.breakrow = 0;
                    self.processrow = ROW_BREAK & !JUMP_MARK;
                }
                self.processorder = effect.value as i32 - 1;
                false
            }
            EffectCommand::S => {
                let channel = &mut self.channels[ch];
                let mut v = effect.value;
                if module.was(FormatFlags::WAS_S3M) {
                    if v == 0 {
                        v = channel.last_dkl;
                    }
                    channel.last_dkl = v;
                } else if v == 0 {
                    v = channel.last_s;
                }
                channel.last_s = v;

                match SubCommand::from_nibble(v >> 4) {
                    SubCommand::PatternLoop => self.pattern_loop(module, ch, v & 15),
                    SubCommand::PatternDelay => {
                        self.rowcount = 1 + (v & 15) as i32;
                        false
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// SBx: `x == 0` marks the loop start, otherwise jump back `x` times
    fn pattern_loop(&mut self, module: &TrackerModule, ch: usize, x: u8) -> bool {
        let xm = is_pure_xm(module);
        let channel = &mut self.channels[ch];

        if x == 0 {
            channel.pat_loop_row = self.processrow;
            return false;
        }

        let jump = if channel.pat_loop_count == 0 {
            channel.pat_loop_count = x;
            true
        } else {
            channel.pat_loop_count -= 1;
            channel.pat_loop_count != 0
        };

        if !jump {
            if xm {
                channel.pat_loop_end_row = 0;
                // FT2 keeps the loop start as the next pattern's first row
                if (self.processrow | BREAK_MARK | JUMP_MARK) < ROW_BREAK {
                    self.breakrow = channel.pat_loop_row;
                }
            } else {
                channel.pat_loop_row = self.processrow + 1;
            }
            return false;
        }

        self.breakrow = channel.pat_loop_row;
        if xm {
            // A loop on its own in FT2 leaves breakrow set for the pattern end
            if (self.processrow | BREAK_MARK | JUMP_MARK) < ROW_BREAK {
                self.processorder = if self.processrow < channel.pat_loop_end_row {
                    ORDER_SUSPECT_LOOP
                } else {
                    ORDER_STAY
                };
                channel.pat_loop_end_row = self.processrow;
                self.processrow = ROW_XM_LOOP;
            }
        } else {
            self.processorder = ORDER_STAY;
            self.processrow = ROW_BREAK;
        }

        // The looped rows will be visited again; they are not a song loop
        let (order, first, last) = (self.order, channel.pat_loop_row, self.row);
        for row in first..=last {
            self.played_clear(order, row);
        }
        trace!(channel = ch, row = first, remaining = self.channels[ch].pat_loop_count, "pattern loop");
        true
    }

    /// Process one entry on the first tick of its row
    pub(super) fn process_entry(
        &mut self,
        module: &TrackerModule,
        entry: &TrackerEntry,
        ignore_cxx: bool,
    ) -> ControlFlow<()> {
        let ch = entry.channel as usize;
        if let Some(note) = entry.note {
            self.channels[ch].note = note;
        }

        if (entry.note.is_some() || entry.effect.is_some()) && module.was(FormatFlags::WAS_669) {
            let channel = &mut self.channels[ch];
            let voice = channel.playing.and_then(|h| self.voices.get_mut(h));
            if let Some(voice) = voice {
                channel.reset_effects(Some(&mut *voice));
                voice.finetune = 0;
            } else {
                channel.reset_effects(None);
            }
        }

        if entry.effect.is_some_and(|e| e.command == EffectCommand::S) {
            // last_s was resolved by update_pattern_variables
            let v = self.channels[ch].last_s;
            if SubCommand::from_nibble(v >> 4) == SubCommand::NoteDelay {
                let channel = &mut self.channels[ch];
                channel.note_delay_count = (v & 15).max(1);
                channel.note_delay_entry = Some(*entry);
                return ControlFlow::Continue(());
            }
        }

        self.process_note_data(module, entry, ignore_cxx)
    }

    fn process_note_data(&mut self, module: &TrackerModule, entry: &TrackerEntry, ignore_cxx: bool) -> ControlFlow<()> {
        if module.was(FormatFlags::WAS_XM) {
            self.process_xm_note_data(module, entry);
        } else {
            self.process_it_note_data(module, entry);
        }
        self.process_effects(module, entry, ignore_cxx)
    }

    /// Count down key off, note cut and note delay
    pub(super) fn update_tick_counts(&mut self, module: &TrackerModule) {
        for ch in 0..self.channels.len() {
            let channel = &mut self.channels[ch];

            if channel.key_off_count != 0 {
                channel.key_off_count -= 1;
                if channel.key_off_count == 0 {
                    self.xm_note_off(module, ch);
                }
            } else if channel.note_cut_count != 0 {
                channel.note_cut_count -= 1;
                if channel.note_cut_count == 0 {
                    if module.format.intersects(FormatFlags::WAS_XM.union(FormatFlags::WAS_PTM)) {
                        channel.volume = 0;
                    } else {
                        self.cut_to_pool(ch);
                    }
                }
            } else if channel.note_delay_count != 0 {
                channel.note_delay_count -= 1;
                if channel.note_delay_count == 0 {
                    if let Some(entry) = channel.note_delay_entry.take() {
                        // A delayed note cannot carry the speed-zero command
                        let flow = self.process_note_data(module, &entry, false);
                        debug_assert!(flow.is_continue(), "a delayed note never stops playback");
                    }
                }
            }
        }
    }
}
