//! Scheduler tests driving whole songs tick by tick

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nether_resampler::{declick, ResamplerContext};
use nether_tracker::{
    EffectCommand, FormatFlags, NewNoteAction, SubCommand, TrackerEffect, TrackerEntry, TrackerInstrument,
    TrackerModule, TrackerPattern, TrackerSample, ORDER_END, ORDER_SKIP,
};

use super::Sigrenderer;
use crate::{PlayerConfig, N_CHANNELS, N_NNA_CHANNELS};

// ============================================================================
// Helpers
// ============================================================================

/// Route scheduler logs to the test output; filter with RUST_LOG
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn looped_sample() -> TrackerSample {
    TrackerSample::from_pcm16(vec![8000; 1024]).with_loop(0, 1024, false)
}

fn song(format: FormatFlags, pattern: TrackerPattern, orders: usize) -> TrackerModule {
    let mut module = TrackerModule::default();
    module.format = format;
    module.samples.push(looped_sample());
    module.patterns.push(pattern);
    module.order_table = vec![0; orders];
    module
}

/// Module where instrument 1 plays sample 1 with the given New Note Action
fn instrument_song(nna: NewNoteAction, pattern: TrackerPattern, orders: usize) -> TrackerModule {
    let mut module = song(FormatFlags::WAS_IT.union(FormatFlags::INSTRUMENTS), pattern, orders);
    module.instruments.push(TrackerInstrument {
        nna,
        ..Default::default()
    });
    module
}

/// FastTracker II module with its own patterns and order list
fn xm_song(patterns: Vec<TrackerPattern>, order_table: Vec<u8>) -> TrackerModule {
    let mut module = TrackerModule::default();
    module.format = FormatFlags::WAS_XM;
    module.samples.push(looped_sample());
    module.patterns = patterns;
    module.order_table = order_table;
    module
}

fn start(module: TrackerModule) -> Sigrenderer {
    Sigrenderer::new(Arc::new(module), &PlayerConfig::default(), 0).expect("valid module")
}

fn note_on(channel: u8) -> TrackerEntry {
    TrackerEntry::new(channel).note(60).instrument(1)
}

fn run_ticks(sr: &mut Sigrenderer, ticks: usize) {
    for _ in 0..ticks {
        assert!(sr.process_tick().is_continue(), "playback should continue");
    }
}

/// Rows in the order they start playing
fn row_starts(sr: &mut Sigrenderer, count: usize) -> Vec<i32> {
    let mut rows = Vec::new();
    while rows.len() < count {
        assert!(sr.process_tick().is_continue(), "playback should continue");
        if sr.tick == sr.speed {
            rows.push(sr.row);
        }
    }
    rows
}

/// (order, row) pairs in the order they start playing
fn positions(sr: &mut Sigrenderer, count: usize) -> Vec<(i32, i32)> {
    let mut seen = Vec::new();
    while seen.len() < count {
        assert!(sr.process_tick().is_continue(), "playback should continue");
        if sr.tick == sr.speed {
            seen.push((sr.order, sr.row));
        }
    }
    seen
}

/// Count loop callbacks, letting playback continue
fn count_loops(sr: &mut Sigrenderer) -> Arc<AtomicUsize> {
    let (loops, seen) = counter();
    sr.callbacks_mut().set_loop(move || {
        seen.fetch_add(1, Ordering::SeqCst);
        ControlFlow::Continue(())
    });
    loops
}

fn pattern_loop(channel: u8, count: u8) -> TrackerEntry {
    TrackerEntry::new(channel).effect(TrackerEffect::s(SubCommand::PatternLoop, count))
}

fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    (count.clone(), count)
}

fn render_frames(sr: &mut Sigrenderer, frames: usize) -> (usize, Vec<i32>) {
    let mut out = vec![0; frames * 2];
    let delta = sr.frame_delta();
    let rendered = sr.render(1.0, delta, &mut out);
    (rendered, out)
}

// ============================================================================
// Row flow
// ============================================================================

#[test]
fn test_volume_slide_recalls_last_value() {
    let pattern = TrackerPattern::empty(64)
        .with(0, note_on(0).volpan(40))
        .with(1, TrackerEntry::new(0).effect(TrackerEffect::new(EffectCommand::VolumeSlide, 0x02)))
        .with(2, TrackerEntry::new(0).effect(TrackerEffect::new(EffectCommand::VolumeSlide, 0x00)));
    let mut sr = start(song(FormatFlags::WAS_IT, pattern, 1));

    // All of row 0, then row 1 with its five effect ticks
    run_ticks(&mut sr, 6 + 6);
    assert_eq!(sr.channels[0].volume, 40 - 5 * 2, "D02 slides on the five ticks after row 1");

    run_ticks(&mut sr, 6);
    assert_eq!(sr.channels[0].volume, 40 - 10 * 2, "D00 repeats the last slide");
    assert_eq!(sr.channels[0].last_dkl, 0x02);
}

#[test]
fn test_pattern_loop_repeats_rows() {
    init_tracing();
    let pattern = TrackerPattern::empty(4)
        .with(0, TrackerEntry::new(0).effect(TrackerEffect::s(SubCommand::PatternLoop, 0)))
        .with(1, TrackerEntry::new(0).effect(TrackerEffect::s(SubCommand::PatternLoop, 3)));
    let mut sr = start(song(FormatFlags::WAS_IT, pattern, 1));
    let (loops, seen) = counter();
    sr.callbacks_mut().set_loop(move || {
        seen.fetch_add(1, Ordering::SeqCst);
        ControlFlow::Continue(())
    });

    let rows = row_starts(&mut sr, 10);
    assert_eq!(rows, vec![0, 1, 0, 1, 0, 1, 0, 1, 2, 3], "SB3 plays the loop body four times");
    assert_eq!(loops.load(Ordering::SeqCst), 0, "a pattern loop is not a song loop");

    let rows = row_starts(&mut sr, 1);
    assert_eq!(rows, vec![0]);
    assert_eq!(loops.load(Ordering::SeqCst), 1, "wrapping to the start is a song loop");
}

#[test]
fn test_xm_pattern_loop_carries_start_into_next_pattern() {
    init_tracing();
    let looped = TrackerPattern::empty(8).with(1, pattern_loop(0, 0)).with(2, pattern_loop(0, 2));
    let mut sr = start(xm_song(vec![looped, TrackerPattern::empty(8)], vec![0, 1]));
    let loops = count_loops(&mut sr);

    let rows: Vec<i32> = positions(&mut sr, 12).into_iter().map(|(_, row)| row).collect();
    assert_eq!(rows, vec![0, 1, 2, 1, 2, 1, 2, 3, 4, 5, 6, 7], "E62 plays the loop body three times");
    assert_eq!(sr.order, 0);

    // FT2 leaves the loop start as the break row of the next pattern
    assert_eq!(positions(&mut sr, 1), vec![(1, 1)]);
    assert_eq!(loops.load(Ordering::SeqCst), 0, "neither the loop nor the order change is a song loop");

    assert_eq!(positions(&mut sr, 7).last(), Some(&(0, 0)), "wrapped through the restart position");
    assert_eq!(loops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_xm_suspect_loop_reports_song_loop() {
    // E62 jumps back over E61, which then jumps from before the last loop end
    let pattern = TrackerPattern::empty(8)
        .with(0, pattern_loop(0, 0))
        .with(1, pattern_loop(0, 1))
        .with(2, pattern_loop(0, 2));
    let mut sr = start(xm_song(vec![pattern], vec![0]));
    let loops = count_loops(&mut sr);

    let rows: Vec<i32> = positions(&mut sr, 7).into_iter().map(|(_, row)| row).collect();
    assert_eq!(rows, vec![0, 1, 0, 1, 2, 0, 1]);
    assert_eq!(loops.load(Ordering::SeqCst), 0);

    assert_eq!(positions(&mut sr, 1), vec![(0, 0)], "replays in place");
    assert_eq!(loops.load(Ordering::SeqCst), 1, "a jump from before the last loop end never terminates");
    assert_eq!((sr.order(), sr.row()), (Some(0), Some(0)));
}

#[test]
fn test_xm_loop_jump_within_order_is_not_song_loop() {
    let looped = TrackerPattern::empty(4).with(0, pattern_loop(0, 0)).with(3, pattern_loop(0, 1));
    let mut sr = start(xm_song(vec![looped], vec![0]));
    let loops = count_loops(&mut sr);
    let rows: Vec<i32> = positions(&mut sr, 8).into_iter().map(|(_, row)| row).collect();
    assert_eq!(rows, vec![0, 1, 2, 3, 0, 1, 2, 3]);
    assert_eq!(loops.load(Ordering::SeqCst), 0, "staying in the order never counts as looping back");

    // B00 on order 0 lands on the same order, which does count
    let jump = TrackerPattern::empty(8)
        .with(3, TrackerEntry::new(0).effect(TrackerEffect::new(EffectCommand::JumpToOrder, 0)));
    let mut sr = start(xm_song(vec![jump], vec![0]));
    let loops = count_loops(&mut sr);
    assert_eq!(positions(&mut sr, 5), vec![(0, 0), (0, 1), (0, 2), (0, 3), (0, 0)]);
    assert_eq!(loops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_skip_and_end_orders() {
    let patterns = vec![TrackerPattern::empty(2), TrackerPattern::empty(2)];
    let orders = vec![0, ORDER_SKIP, 1, ORDER_END, 0];

    let mut sr = start(xm_song(patterns.clone(), orders.clone()));
    let loops = count_loops(&mut sr);
    assert_eq!(positions(&mut sr, 4), vec![(0, 0), (0, 1), (2, 0), (2, 1)], "0xFE orders are passed over");
    assert_eq!(loops.load(Ordering::SeqCst), 0);
    assert_eq!(positions(&mut sr, 1), vec![(0, 0)], "0xFF restarts the song");
    assert_eq!(loops.load(Ordering::SeqCst), 1);

    let mut module = xm_song(patterns, orders);
    module.restart_position = 2;
    let mut sr = start(module);
    let loops = count_loops(&mut sr);
    let seen = positions(&mut sr, 6);
    assert_eq!(seen[4..], [(2, 0), (2, 1)], "restart position picks the order after 0xFF");
    assert_eq!(loops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_break_to_row_skips_rest_of_pattern() {
    let pattern = TrackerPattern::empty(8)
        .with(1, TrackerEntry::new(0).effect(TrackerEffect::new(EffectCommand::BreakToRow, 4)));
    let mut sr = start(song(FormatFlags::WAS_IT, pattern, 2));

    assert_eq!(row_starts(&mut sr, 6), vec![0, 1, 4, 5, 6, 7]);
    assert_eq!(sr.order, 1, "break moved to the next order");
}

#[test]
fn test_speed_and_tempo_commands() {
    let pattern = TrackerPattern::empty(8)
        .with(0, TrackerEntry::new(0).effect(TrackerEffect::new(EffectCommand::SetSpeed, 3)))
        .with(0, TrackerEntry::new(1).effect(TrackerEffect::new(EffectCommand::SetSongTempo, 150)));
    let mut sr = start(song(FormatFlags::WAS_IT, pattern, 1));

    run_ticks(&mut sr, 1);
    assert_eq!(sr.speed(), 3);
    assert_eq!(sr.tempo(), 150);
    run_ticks(&mut sr, 3);
    assert_eq!(sr.row(), Some(1), "three ticks per row after A03");
}

// ============================================================================
// Callbacks
// ============================================================================

#[test]
fn test_loop_callback_stops_render() {
    init_tracing();
    let mut sr = start(song(FormatFlags::WAS_IT, TrackerPattern::empty(1), 1));
    sr.callbacks_mut().set_loop(|| ControlFlow::Break(()));

    // One row at speed 6 and tempo 125 is 7860 time units, about 5289 frames
    let (rendered, _) = render_frames(&mut sr, 20_000);
    assert!((5285..=5292).contains(&rendered), "stopped after one row, got {rendered}");
    assert!(sr.is_finished());
    assert_eq!(sr.order(), None);
    assert_eq!(sr.row(), None);

    let (rendered, _) = render_frames(&mut sr, 100);
    assert_eq!(rendered, 0, "a finished renderer produces nothing");
}

#[test]
fn test_xm_speed_zero_callback() {
    let pattern = TrackerPattern::empty(4).with(0, TrackerEntry::new(0).effect(TrackerEffect::new(EffectCommand::SetSpeed, 0)));

    let mut sr = start(song(FormatFlags::WAS_XM, pattern.clone(), 1));
    sr.callbacks_mut().set_xm_speed_zero(|| ControlFlow::Break(()));
    let (rendered, _) = render_frames(&mut sr, 1000);
    assert_eq!(rendered, 0, "F00 on the first row stops at once");
    assert!(sr.is_finished());

    let mut sr = start(song(FormatFlags::WAS_XM, pattern, 1));
    let (calls, seen) = counter();
    sr.callbacks_mut().set_xm_speed_zero(move || {
        seen.fetch_add(1, Ordering::SeqCst);
        ControlFlow::Continue(())
    });
    let (rendered, _) = render_frames(&mut sr, 44_100);
    assert_eq!(rendered, 44_100, "continuing keeps time running");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!((sr.order(), sr.row()), (Some(0), Some(0)), "speed zero never leaves the row");
}

#[test]
fn test_repeated_row_honors_speed_zero_stop() {
    // F00 is undone by F06 on the same row, then EE1 replays both
    let pattern = TrackerPattern::empty(4)
        .with(0, TrackerEntry::new(0).effect(TrackerEffect::new(EffectCommand::SetSpeed, 0)))
        .with(0, TrackerEntry::new(1).effect(TrackerEffect::new(EffectCommand::SetSpeed, 6)))
        .with(0, TrackerEntry::new(2).effect(TrackerEffect::s(SubCommand::PatternDelay, 1)));
    let mut sr = start(song(FormatFlags::WAS_XM, pattern, 1));
    let (calls, seen) = counter();
    sr.callbacks_mut().set_xm_speed_zero(move || {
        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(())
        }
    });

    let mut ticks = 0;
    while sr.process_tick().is_continue() {
        ticks += 1;
        assert!(ticks < 100, "the repeat should have stopped playback");
    }
    assert_eq!(ticks, 6, "one full row before the repeat");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_global_volume_zero_callback() {
    let mut module = song(FormatFlags::WAS_IT, TrackerPattern::empty(64), 1);
    module.global_volume = 0;
    let config = PlayerConfig {
        global_volume_zero_seconds: 1,
        ..Default::default()
    };
    let mut sr = Sigrenderer::new(Arc::new(module), &config, 0).expect("valid module");
    sr.callbacks_mut().set_global_volume_zero(|| ControlFlow::Break(()));

    let (rendered, _) = render_frames(&mut sr, 2 * 44_100);
    assert!((43_000..45_000).contains(&rendered), "stopped after about a second, got {rendered}");
}

// ============================================================================
// Voices
// ============================================================================

#[test]
fn test_declick_and_note_cut() {
    let pattern = TrackerPattern::empty(64)
        .with(0, note_on(0))
        .with(1, TrackerEntry::new(0).effect(TrackerEffect::s(SubCommand::NoteCut, 1)));
    let mut sr = start(song(FormatFlags::WAS_IT, pattern, 1));

    let (_, out) = render_frames(&mut sr, 2000);
    assert!(out.iter().any(|&s| s != 0), "note is audible");
    let voice = sr.channel_voice(0).expect("note is playing");
    assert_eq!(voice.declick_stage, declick::STEADY, "ramp-in finished within the first tick");

    // Through row 1 and its cut tick
    render_frames(&mut sr, 10_000);
    assert!(sr.channel_state(0).is_none(), "SC1 cut the note");
    assert_eq!(sr.active_voices(), 0, "the cut voice ramped out and was freed");
}

#[test]
fn test_nna_cut_replaces_voice() {
    let pattern = TrackerPattern::empty(64).with(0, note_on(0)).with(1, note_on(0));
    let mut sr = start(instrument_song(NewNoteAction::Cut, pattern, 1));

    render_frames(&mut sr, 12_000);
    assert_eq!(sr.active_voices(), 1, "old note faded out quickly");
    assert!(sr.channel_state(0).is_some());
}

#[test]
fn test_nna_continue_keeps_old_voice() {
    let pattern = TrackerPattern::empty(64).with(0, note_on(0)).with(1, note_on(0));
    let mut sr = start(instrument_song(NewNoteAction::Continue, pattern, 1));

    render_frames(&mut sr, 12_000);
    assert_eq!(sr.active_voices(), 2, "old note keeps sounding in the background");
    let background = sr.channel_state(N_CHANNELS).expect("first pool slot in use");
    assert_eq!(background.channel, 0, "pool voice remembers its channel");
}

#[test]
fn test_background_pool_is_bounded() {
    init_tracing();
    let mut pattern = TrackerPattern::empty(64);
    for row in 0..64 {
        pattern.set(row, note_on(0));
    }
    let mut sr = start(instrument_song(NewNoteAction::Continue, pattern, 4));

    // 256 notes, never rendered, so no voice finishes
    run_ticks(&mut sr, 1 + 255 * 6);
    assert_eq!(sr.active_voices(), 1 + N_NNA_CHANNELS, "extra voices are dropped");
    assert!(sr.pool.iter().all(Option::is_some));
}

#[test]
fn test_clone_is_independent() {
    let pattern = TrackerPattern::empty(64).with(0, note_on(0));
    let mut sr = start(song(FormatFlags::WAS_IT, pattern, 1));
    sr.callbacks_mut().set_loop(|| ControlFlow::Break(()));
    run_ticks(&mut sr, 1);

    let mut copy = sr.clone();
    run_ticks(&mut copy, 3 * 6);
    assert_eq!(copy.row(), Some(3));
    assert_eq!(sr.row(), Some(0), "original did not move");
    assert!(sr.channel_state(0).is_some() && copy.channel_state(0).is_some());
    assert!(!copy.callbacks.has_loop(), "clones start without callbacks");
}

#[test]
fn test_channel_state_reports_voice() {
    let pattern = TrackerPattern::empty(64).with(0, note_on(0));
    let mut sr = start(song(FormatFlags::WAS_IT, pattern, 1));
    assert!(sr.channel_state(0).is_none(), "nothing plays before the first tick");

    run_ticks(&mut sr, 1);
    let state = sr.channel_state(0).expect("note is playing");
    assert_eq!(state.channel, 0);
    assert_eq!(state.sample, 1);
    assert_eq!(state.pan, 32);
    assert!((state.volume - 48.0 / 128.0).abs() < 1e-4, "full volume times mixing volume, got {}", state.volume);
    assert!((8200..8530).contains(&state.freq), "C-5 plays near the sample rate, got {}", state.freq);
    assert_eq!(state.filter_cutoff, 127);
    assert_eq!(state.filter_resonance, 0);

    assert!(sr.channel_state(1).is_none());
    assert!(sr.channel_state(N_CHANNELS).is_none(), "pool is empty");
}

#[test]
fn test_muted_channel_is_silent() {
    let pattern = TrackerPattern::empty(64).with(0, note_on(0));
    let mut sr = start(song(FormatFlags::WAS_IT, pattern, 1));
    let mut muted = sr.clone();
    muted.set_channel_muted(0, true);
    assert!(muted.is_channel_muted(0));

    let (_, out) = render_frames(&mut sr, 4000);
    assert!(out.iter().any(|&s| s != 0));
    let (_, out) = render_frames(&mut muted, 4000);
    assert!(out.iter().all(|&s| s == 0), "muted channel renders silence");
    assert!(muted.channel_state(0).is_some(), "muted voice keeps playing");
}

#[test]
fn test_skip_matches_render_position() {
    let pattern = TrackerPattern::empty(64).with(0, note_on(0));
    let mut rendered = start(song(FormatFlags::WAS_IT, pattern, 1));
    let mut skipped = rendered.clone();

    render_frames(&mut rendered, 30_000);
    let delta = skipped.frame_delta();
    assert_eq!(skipped.skip(30_000, delta), 30_000);
    assert_eq!(skipped.row(), rendered.row());
    assert_eq!(skipped.time_left, rendered.time_left);
}

#[test]
fn test_renderers_share_resampler_tables() {
    let a = start(song(FormatFlags::WAS_IT, TrackerPattern::empty(4), 1));
    let b = start(song(FormatFlags::WAS_XM, TrackerPattern::empty(8), 2));
    assert!(Arc::ptr_eq(&a.resampler_context(), &b.resampler_context()));
    assert!(Arc::ptr_eq(&a.resampler_context(), &ResamplerContext::shared()));

    let own = ResamplerContext::new();
    let module = Arc::new(song(FormatFlags::WAS_IT, TrackerPattern::empty(4), 1));
    let c = Sigrenderer::with_context(module, Arc::clone(&own), &PlayerConfig::default(), 0).expect("valid module");
    assert!(Arc::ptr_eq(&c.resampler_context(), &own), "a supplied context is used as is");
}

#[test]
fn test_render_f32_reuses_scratch() {
    let pattern = TrackerPattern::empty(64).with(0, note_on(0));
    let mut sr = start(song(FormatFlags::WAS_IT, pattern, 1));
    let delta = sr.frame_delta();
    let mut out = vec![0.0f32; 2048];
    sr.render_f32(1.0, delta, &mut out);
    let scratch = sr.mix_buffer.as_ptr();
    sr.render_f32(1.0, delta, &mut out);
    assert_eq!(sr.mix_buffer.as_ptr(), scratch, "same-size renders keep the allocation");
    assert_eq!(sr.mix_buffer.len(), 2048);
}

#[test]
fn test_render_f32_scale() {
    let pattern = TrackerPattern::empty(64).with(0, note_on(0));
    let mut sr = start(song(FormatFlags::WAS_IT, pattern, 1));
    let mut out = vec![0.0f32; 4000];
    let delta = sr.frame_delta();
    assert_eq!(sr.render_f32(1.0, delta, &mut out), 2000);
    assert!(out.iter().any(|&s| s != 0.0));
    assert!(out.iter().all(|s| s.abs() <= 1.0), "output stays within full scale");
}
