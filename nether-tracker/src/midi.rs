//! Embedded MIDI macro configuration (SFx / Zxx)

/// One macro: the bytes sent, with some positions replaced by the Zxx
/// parameter when the matching `param_mask` bit is set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MidiMacro {
    pub bytes: Vec<u8>,
    pub param_mask: u16,
}

impl MidiMacro {
    /// Parse the hex text form used in module MIDI configuration blocks,
    /// e.g. `"F0F000z"`. Spaces separate bytes, `z` marks the parameter
    /// slot, anything else is ignored. At most 16 bytes are kept.
    pub fn parse(text: &str) -> Self {
        let mut bytes = Vec::new();
        let mut param_mask = 0u16;
        let mut high: Option<u8> = None;

        for c in text.chars() {
            if bytes.len() >= 16 {
                break;
            }
            let digit = c.to_digit(16).filter(|_| !c.is_ascii_lowercase());
            match (high, digit) {
                (Some(h), Some(d)) => {
                    bytes.push((h << 4) | d as u8);
                    high = None;
                }
                (Some(h), None) => {
                    if c == ' ' {
                        bytes.push(h);
                    }
                    high = None;
                }
                (None, Some(d)) => high = Some(d as u8),
                (None, None) => {
                    if c == 'z' {
                        param_mask |= 1 << bytes.len();
                        bytes.push(0);
                    }
                }
            }
        }
        if let Some(h) = high {
            if bytes.len() < 16 {
                bytes.push(h);
            }
        }

        Self { bytes, param_mask }
    }

    /// Bytes to send for parameter `z`
    pub fn expand(&self, z: u8) -> impl Iterator<Item = u8> + '_ {
        self.bytes
            .iter()
            .enumerate()
            .map(move |(i, &b)| if self.param_mask & (1 << i) != 0 { z } else { b })
    }
}

/// The SF0-SFF parameterised macros and the Z80-ZFF fixed macros
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiMacros {
    pub sf: [MidiMacro; 16],
    pub z: [MidiMacro; 128],
}

impl Default for MidiMacros {
    /// SF0 drives the filter cutoff (`F0 F0 00 z`), Z80-Z8F set the
    /// resonance in steps of 8 (`F0 F0 01 n*8`), everything else is empty.
    fn default() -> Self {
        let sf = std::array::from_fn(|i| {
            if i == 0 {
                MidiMacro {
                    bytes: vec![0xF0, 0xF0, 0x00, 0x00],
                    param_mask: 1 << 3,
                }
            } else {
                MidiMacro::default()
            }
        });
        let z = std::array::from_fn(|i| {
            if i < 16 {
                MidiMacro {
                    bytes: vec![0xF0, 0xF0, 0x01, (i * 8) as u8],
                    param_mask: 0,
                }
            } else {
                MidiMacro::default()
            }
        });
        Self { sf, z }
    }
}
