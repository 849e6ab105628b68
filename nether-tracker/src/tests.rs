//! Tests for nether-tracker types

use crate::{
    EffectCommand, EnvelopeFlags, FormatFlags, MidiMacro, MidiMacros, ORDER_END, ORDER_SKIP,
    SubCommand, TrackerEffect, TrackerEntry, TrackerEnvelope, TrackerInstrument, TrackerModule,
    TrackerPattern, TrackerSample,
};

#[test]
fn test_tracker_entry_methods() {
    let entry = TrackerEntry::new(2).note(48).instrument(1).volpan(32);
    assert!(entry.has_note());
    assert!(!entry.is_note_off());
    assert!(!entry.is_note_cut());
    assert_eq!(entry.effect_parts(), None);

    let note_off = TrackerEntry::new(0).note(TrackerEntry::NOTE_OFF);
    assert!(note_off.is_note_off());
    assert!(!note_off.has_note());
}

#[test]
fn test_pattern_set_keeps_channel_order() {
    let pattern = TrackerPattern::empty(4)
        .with(1, TrackerEntry::new(3).note(60))
        .with(1, TrackerEntry::new(0).note(50))
        .with(1, TrackerEntry::new(3).note(61))
        .with(9, TrackerEntry::new(0).note(1));

    let channels: Vec<u8> = pattern.row(1).iter().map(|e| e.channel).collect();
    assert_eq!(channels, vec![0, 3], "entries should be sorted by channel");
    assert_eq!(pattern.row(1)[1].note, Some(61), "same channel should be replaced");
    assert!(pattern.row(9).is_empty(), "out of range rows are ignored");
}

#[test]
fn test_sub_command_roundtrip() {
    let effect = TrackerEffect::s(SubCommand::PatternLoop, 3);
    assert_eq!(effect.command, EffectCommand::S);
    assert_eq!(effect.value, 0xB3);
    assert_eq!(SubCommand::from_nibble(effect.value >> 4), SubCommand::PatternLoop);
    assert!(effect.affects_pattern_flow());
    assert!(!TrackerEffect::new(EffectCommand::Vibrato, 0x44).affects_pattern_flow());
}

#[test]
fn test_first_playable_order_skips_markers() {
    let module = TrackerModule {
        order_table: vec![ORDER_SKIP, 7, 0, ORDER_END, 0],
        patterns: vec![TrackerPattern::empty(64)],
        ..Default::default()
    };
    assert_eq!(module.first_playable_order(0), Some(2));
    assert_eq!(module.first_playable_order(3), None, "nothing plays after the end marker");
    assert!(module.pattern_at_order(0).is_none());
    assert!(module.pattern_at_order(2).is_some());
}

#[test]
fn test_one_based_lookups() {
    let module = TrackerModule {
        instruments: vec![TrackerInstrument::default().with_sample(2)],
        samples: vec![TrackerSample::default(), TrackerSample::from_pcm16(vec![1, 2, 3])],
        format: FormatFlags::WAS_IT | FormatFlags::INSTRUMENTS,
        ..Default::default()
    };
    assert!(module.instrument(0).is_none());
    assert_eq!(module.instrument(1).and_then(|i| i.map_note(60)), Some((60, 2)));
    assert!(module.sample(2).is_some_and(TrackerSample::exists));
    assert!(!module.sample(1).is_some_and(TrackerSample::exists));
    assert!(module.uses_instruments());
    assert!(!module.uses_linear_slides());
}

#[test]
fn test_format_flags_intersects() {
    let flags = FormatFlags::WAS_XM | FormatFlags::WAS_MOD;
    assert!(flags.intersects(FormatFlags::WAS_MOD | FormatFlags::WAS_PTM));
    assert!(!flags.contains(FormatFlags::WAS_MOD | FormatFlags::WAS_PTM));
}

#[test]
fn test_envelope_node_clamping() {
    let env = TrackerEnvelope {
        nodes: vec![(0, 64), (10, 32), (20, 0)],
        flags: EnvelopeFlags::ENABLED | EnvelopeFlags::LOOP,
        ..Default::default()
    };
    assert!(env.is_enabled() && env.has_loop() && !env.has_sustain());
    assert_eq!(env.node_tick(1), 10);
    assert_eq!(env.node_tick(9), 20, "index past the end clamps to the last node");
    assert_eq!(env.node_value(2), 0);
    assert_eq!(TrackerEnvelope::default().node_tick(0), 0);
}

#[test]
fn test_midi_macro_parse() {
    let m = MidiMacro::parse("F0F000z");
    assert_eq!(m.bytes, vec![0xF0, 0xF0, 0x00, 0x00]);
    assert_eq!(m.param_mask, 1 << 3);
    assert_eq!(m.expand(0x40).collect::<Vec<_>>(), vec![0xF0, 0xF0, 0x00, 0x40]);

    let spaced = MidiMacro::parse("F0 F0 1 8");
    assert_eq!(spaced.bytes, vec![0xF0, 0xF0, 0x01, 0x08]);
}

#[test]
fn test_default_midi_macros() {
    let midi = MidiMacros::default();
    assert_eq!(midi.sf[0], MidiMacro::parse("F0F000z"));
    assert_eq!(midi.z[2].bytes, vec![0xF0, 0xF0, 0x01, 16]);
    assert!(midi.z[16].bytes.is_empty());
    assert!(midi.sf[1].bytes.is_empty());
}
