//! Order, row and tick progression
//!
//! Each call to [`Sigrenderer::process_tick`] advances playback by one tick.
//! The first tick of a row moves the row (and, at the end of a pattern, the
//! order) pointer, processes the row's entries and starts notes. The other
//! ticks only run the per-tick effects. Loop detection uses the visited-row
//! bitmap: arriving at a row that was already played means the song looped.

use std::ops::ControlFlow;
use std::sync::Arc;

use nether_tracker::{EffectCommand, FormatFlags, TrackerModule, ORDER_END};
use smallvec::SmallVec;
use tracing::{debug, warn};

use super::{Sigrenderer, BREAK_MARK, JUMP_MARK, ORDER_STAY, ORDER_SUSPECT_LOOP, ROWS_PER_ORDER};
use crate::N_CHANNELS;

impl Sigrenderer {
    /// Advance playback by one tick
    ///
    /// Breaks when a callback asks playback to stop.
    pub(crate) fn process_tick(&mut self) -> ControlFlow<()> {
        let module = Arc::clone(&self.module);
        let module = module.as_ref();

        if self.speed != 0 {
            self.tick -= 1;
        }

        let mid_row = if self.speed != 0 && self.tick == 0 {
            self.reset_tick_counts();
            self.tick = self.speed;
            self.rowcount -= 1;

            if self.rowcount == 0 {
                self.rowcount = 1;
                self.advance_row(module)?;
                self.play_row(module)?;
            } else {
                self.repeat_row(module)?;
            }
            false
        } else {
            // STM runs its effects once per 16 ticks
            !module.was(FormatFlags::WAS_STM) || self.tick & 15 == 0
        };

        if mid_row {
            self.update_effects(module);
            self.update_tick_counts(module);
        }

        if self.callbacks.has_global_volume_zero() {
            if self.globalvolume == 0 {
                if self.global_volume_zero_elapsed() {
                    self.callbacks.fire_global_volume_zero()?;
                }
            } else {
                self.reset_global_volume_zero();
            }
        }

        self.process_all_playing(module);

        let mut t = self.tick_length() << 16;
        if module.was(FormatFlags::WAS_STM) {
            t /= 16;
        }
        t += self.sub_time_left;
        self.time_left += t >> 16;
        self.sub_time_left = t & 65535;

        ControlFlow::Continue(())
    }

    /// Move to the next row, switching pattern when the current one ends
    fn advance_row(&mut self, module: &TrackerModule) -> ControlFlow<()> {
        if self.n_rows != 0 {
            self.played_set(self.order, self.row);
        }

        self.processrow += 1;
        if self.processrow < self.n_rows {
            self.row = self.processrow;
            return ControlFlow::Continue(());
        }

        let saved_order = self.processorder;
        // Only a break or jump, not an XM pattern loop, ends the loop bookkeeping
        if (self.processrow | BREAK_MARK | JUMP_MARK) == 0xFFFF {
            for channel in &mut self.channels {
                channel.pat_loop_end_row = 0;
            }
        }
        self.processrow = self.breakrow;
        self.breakrow = 0;

        if self.processorder == ORDER_STAY || self.processorder == ORDER_SUSPECT_LOOP {
            self.processorder = self.order - 1;
        }

        let Some(pattern) = self.find_next_pattern(module) else {
            warn!(order = self.order, "no playable order left, stopping");
            return ControlFlow::Break(());
        };

        let old_n_rows = self.n_rows;
        self.pattern = Some(pattern);
        self.n_rows = module.patterns[pattern].num_rows as i32;
        if self.processrow >= self.n_rows {
            self.processrow = 0;
        }

        let looped_back = if saved_order == ORDER_STAY {
            self.order > self.processorder
        } else {
            self.order >= self.processorder
        };
        // FT2 would wrap a suspect loop through the restart position; it is
        // replayed in place here and always reported as a song loop
        let looped = saved_order == ORDER_SUSPECT_LOOP
            || (looped_back && self.played_test(self.processorder, self.processrow));
        if old_n_rows != 0 && looped && self.callbacks.has_loop() {
            debug!(order = self.processorder, row = self.processrow, "song looped");
            self.callbacks.fire_loop()?;
            self.played_reset();
        }

        if self.order != self.processorder {
            debug!(order = self.processorder, pattern, row = self.processrow, "order change");
        }
        self.order = self.processorder;
        self.row = self.processrow;
        ControlFlow::Continue(())
    }

    /// Step `processorder` to the next order naming a real pattern
    fn find_next_pattern(&mut self, module: &TrackerModule) -> Option<usize> {
        let n_orders = module.order_table.len() as i32;
        // Every order at most twice, plus the wrap through the restart position
        let mut budget = 2 * n_orders + 2;

        while budget > 0 {
            budget -= 1;
            self.processorder += 1;

            if self.processorder >= n_orders {
                self.processorder = self.restart_position;
                if self.processorder >= n_orders {
                    self.processorder = -1;
                    continue;
                }
                if module.was(FormatFlags::WAS_OKT) {
                    self.speed = module.initial_speed as i32;
                    self.tempo = module.initial_tempo as i32;
                    for ch in 0..N_CHANNELS {
                        self.xm_note_off(module, ch);
                    }
                }
            }

            let n = module.order_table[self.processorder as usize];
            if (n as usize) < module.patterns.len() {
                return Some(n as usize);
            }
            if n == ORDER_END {
                self.processorder = self.restart_position - 1;
            }
            // Skipped orders take no time, mark them so they never look unplayed
            let order = self.processorder;
            for row in 0..ROWS_PER_ORDER as i32 {
                self.played_set(order, row);
            }
        }
        None
    }

    /// First tick of a row: flow commands, then note data and effects
    fn play_row(&mut self, module: &TrackerModule) -> ControlFlow<()> {
        if !module.was(FormatFlags::WAS_669) {
            self.reset_effects();
        }

        let Some(pattern) = self.pattern.and_then(|p| module.patterns.get(p)) else {
            return ControlFlow::Continue(());
        };
        let entries: SmallVec<[_; 64]> = pattern
            .row(self.row as usize)
            .iter()
            .filter(|e| (e.channel as usize) < N_CHANNELS)
            .copied()
            .collect();

        let mut ignore_cxx = false;
        for entry in &entries {
            ignore_cxx |= self.update_pattern_variables(module, entry);
        }
        // FT2 still breaks after a pattern loop on the same row
        let ignore_cxx = ignore_cxx && !module.was(FormatFlags::WAS_XM);
        for entry in &entries {
            self.process_entry(module, entry, ignore_cxx)?;
        }

        if module.was(FormatFlags::WAS_OKT) {
            self.update_effects(module);
        } else if !module.uses_old_effects() {
            self.update_smooth_effects();
        }
        ControlFlow::Continue(())
    }

    /// First tick of a repeat of a row held by SEx
    fn repeat_row(&mut self, module: &TrackerModule) -> ControlFlow<()> {
        if let Some(pattern) = self.pattern.and_then(|p| module.patterns.get(p)) {
            for entry in pattern.row(self.row as usize) {
                let repeats = entry
                    .effect
                    .is_some_and(|e| e.command != EffectCommand::SetSampleOffset);
                if repeats && (entry.channel as usize) < N_CHANNELS {
                    self.process_effects(module, entry, false)?;
                }
            }
        }
        self.update_effects(module);
        ControlFlow::Continue(())
    }
}
