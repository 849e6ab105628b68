//! MIDI macro output and the built-in filter control messages
//!
//! Bytes a macro sends go to the host's MIDI hook first. Unconsumed bytes
//! are parsed for the `F0 F0 00 xx` (cutoff) and `F0 F0 01 xx` (resonance)
//! messages that drive the channel filter.

use nether_tracker::TrackerModule;

use super::Sigrenderer;

/// Parser states of [`crate::channel::Channel::midi_state`]
mod state {
    /// Two F0 bytes seen; the next byte picks the parameter
    pub const SELECT: u8 = 2;
    pub const CUTOFF: u8 = 3;
    pub const RESONANCE: u8 = 4;
}

impl Sigrenderer {
    /// Zxx: run a fixed macro (80-FF) or the channel's SFx macro with `value`
    pub(super) fn run_midi_macro(&mut self, module: &TrackerModule, ch: usize, value: u8) {
        if value >= 0x80 {
            let Some(midi_macro) = module.midi.z.get((value - 0x80) as usize) else {
                return;
            };
            for &byte in &midi_macro.bytes {
                self.send_midi(ch, byte);
            }
        } else {
            let sfmacro = self.channels[ch].sfmacro as usize;
            let Some(midi_macro) = module.midi.sf.get(sfmacro) else {
                return;
            };
            for byte in midi_macro.expand(value) {
                self.send_midi(ch, byte);
            }
        }
    }

    /// Send one byte on behalf of `ch`
    pub(super) fn send_midi(&mut self, ch: usize, byte: u8) {
        if self.callbacks.send_midi(ch, byte) {
            return;
        }

        let channel = &mut self.channels[ch];
        match channel.midi_state {
            state::RESONANCE => {
                if byte < 0x80 {
                    channel.filter_resonance = byte as i32;
                }
                channel.midi_state = 0;
            }
            state::CUTOFF => {
                if byte < 0x80 {
                    channel.filter_cutoff = byte as i32;
                }
                channel.midi_state = 0;
            }
            state::SELECT => {
                channel.midi_state = match byte {
                    0 => state::CUTOFF,
                    1 => state::RESONANCE,
                    _ => 0,
                };
            }
            _ => match byte {
                0xF0 => channel.midi_state += 1,
                0xFA | 0xFC | 0xFF => {
                    for channel in &mut self.channels {
                        channel.filter_cutoff = 127;
                        channel.filter_resonance = 0;
                    }
                    self.channels[ch].midi_state = 0;
                }
                _ => channel.midi_state = 0,
            },
        }
    }
}
