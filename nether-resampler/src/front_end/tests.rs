use super::*;
use crate::kernels::Isa;

fn cursor(channels: usize, pos: i64, start: i64, end: i64) -> SampleCursor {
    SampleCursor::new(
        ResamplerContext::with_isa(Isa::Scalar),
        channels,
        pos,
        start,
        end,
        Quality::Zoh,
    )
}

fn unity() -> [VolumeRamp; 2] {
    [VolumeRamp::new(1.0, 1.0, 0.0, 1.0, declick::STEADY); 2]
}

fn render16(c: &mut SampleCursor, data: &[i16], frames: usize) -> (usize, Vec<i32>) {
    let mut out = vec![0; frames * 2];
    let mut ramps = unity();
    let n = c.resample::<Pcm16>(data, Some(&mut out), frames, &mut ramps, 1.0);
    (n, out)
}

fn left(out: &[i32], n: usize) -> Vec<i32> {
    out.chunks(2).take(n).map(|f| f[0] / 256).collect()
}

// ============================================================================
// Volume ramp
// ============================================================================

#[test]
fn test_ramp_step_is_bounded_and_converges() {
    let mut ramp = VolumeRamp::new(0.0, 1.0, 0.25, 1.0, declick::RAMP_IN);
    let mut prev = ramp.volume;
    let mut steps = 0;
    while !ramp.is_settled() {
        ramp.step();
        assert!(ramp.volume - prev <= 0.25, "step exceeded delta");
        assert!(ramp.volume <= 1.0, "ramp overshot target");
        prev = ramp.volume;
        steps += 1;
        assert!(steps <= 4, "ramp did not converge in |target - volume| / delta steps");
    }
    assert_eq!(steps, 4);
    assert_eq!(ramp.declick_stage, declick::STEADY);
}

#[test]
fn test_ramp_down_never_undershoots() {
    let mut ramp = VolumeRamp::new(1.0, 0.0, -0.3, 1.0, declick::RAMP_OUT);
    for _ in 0..3 {
        ramp.step();
        assert!(ramp.volume >= 0.0, "ramp went below target");
    }
    assert!(ramp.volume > 0.0);
    ramp.step();
    assert_eq!(ramp.volume, 0.0);
    assert_eq!(ramp.declick_stage, declick::DEAD);

    ramp.step();
    assert_eq!(ramp.declick_stage, declick::DEAD, "stage must not pass DEAD");
}

#[test]
fn test_ramp_ignores_delta_sign() {
    let mut ramp = VolumeRamp::new(0.0, 0.5, -0.25, 2.0, declick::STEADY);
    assert_eq!(ramp.step(), 0.5);
    assert_eq!(ramp.step(), 1.0);
    assert_eq!(ramp.declick_stage, declick::STEADY);
}

#[test]
fn test_ramp_with_zero_delta_snaps() {
    let mut ramp = VolumeRamp::new(0.2, 0.7, 0.0, 1.0, declick::RAMP_IN);
    ramp.step();
    assert_eq!(ramp.volume, 0.7);
    assert_eq!(ramp.declick_stage, declick::STEADY);
}

#[test]
fn test_settled_ramp_advances_stage_on_render() {
    let mut c = cursor(1, 0, 0, 4);
    let data = [1i16, 2, 3, 4];
    let mut ramps = [VolumeRamp::new(0.0, 0.0, 0.0, 1.0, declick::RAMP_OUT); 2];
    c.resample::<Pcm16>(&data, None, 1, &mut ramps, 1.0);
    assert_eq!(ramps[0].declick_stage, declick::DEAD);
    assert_eq!(ramps[1].declick_stage, declick::DEAD);
}

// ============================================================================
// Sample formats
// ============================================================================

#[test]
fn test_formats_share_24_bit_scale() {
    let mut ramps = unity();

    let mut c = cursor(1, 0, 0, 8);
    let mut out = vec![0; 8];
    c.resample::<Pcm8>(&[4i8; 8], Some(&mut out), 4, &mut ramps, 1.0);
    assert_eq!(out[0], 4 << 16);

    let mut c = cursor(1, 0, 0, 8);
    let mut out = vec![0; 8];
    c.resample::<Pcm16>(&[1000i16; 8], Some(&mut out), 4, &mut ramps, 1.0);
    assert_eq!(out[0], 1000 << 8);

    let mut c = cursor(1, 0, 0, 8);
    let mut out = vec![0; 8];
    c.resample::<Pcm24>(&[256_000i32; 8], Some(&mut out), 4, &mut ramps, 1.0);
    assert!((out[0] - 256_000).abs() <= 1, "24-bit sample scaled to {}", out[0]);
}

#[test]
fn test_output_is_added_to_destination() {
    let mut c = cursor(1, 0, 0, 8);
    let mut out = vec![5; 4];
    let mut ramps = unity();
    c.resample::<Pcm16>(&[1i16; 8], Some(&mut out), 2, &mut ramps, 1.0);
    assert_eq!(out, vec![261, 261, 261, 261]);
}

#[test]
fn test_stereo_source_keeps_channels_apart() {
    let mut c = cursor(2, 0, 0, 4);
    let data = [100i16, -100, 100, -100, 100, -100, 100, -100];
    let (n, out) = render16(&mut c, &data, 2);
    assert_eq!(n, 2);
    assert_eq!(out[0], 100 * 256);
    assert_eq!(out[1], -100 * 256);
}

// ============================================================================
// Pickups
// ============================================================================

#[test]
fn test_forward_loop_repeats_window() {
    let data: Vec<i16> = (0..8).collect();
    let mut c = cursor(1, 0, 4, 8);
    c.pickup = Pickup::Loop;
    let (n, out) = render16(&mut c, &data, 16);
    assert_eq!(n, 16);
    assert_eq!(
        left(&out, n),
        vec![0, 1, 2, 3, 4, 5, 6, 7, 4, 5, 6, 7, 4, 5, 6, 7]
    );
    assert!(c.time_lost > 0, "loop pickups should account skipped time");
}

#[test]
fn test_ping_pong_reverses_at_both_ends() {
    let data: Vec<i16> = (0..4).collect();
    let mut c = cursor(1, 0, 0, 4);
    c.pickup = Pickup::PingPong;
    let (n, out) = render16(&mut c, &data, 12);
    assert_eq!(left(&out, n), vec![0, 1, 2, 3, 3, 2, 1, 0, 0, 1, 2, 3]);
}

#[test]
fn test_stop_at_end_finishes_short() {
    let data: Vec<i16> = (1..=6).collect();
    let mut c = cursor(1, 0, 0, 6);
    let (n, out) = render16(&mut c, &data, 20);
    assert!(n < 20, "one-shot sample should end early, produced {n}");
    assert!(n >= 5);
    assert_eq!(left(&out, 5), vec![1, 2, 3, 4, 5]);
    assert!(c.is_finished());
    assert!(out[n * 2..].iter().all(|&s| s == 0), "nothing written past the end");
}

#[test]
fn test_stop_after_reverse() {
    let data: Vec<i16> = (0..4).collect();
    let mut c = cursor(1, 3, 0, 4);
    c.dir = -1;
    c.pickup = Pickup::StopAfterReverse;
    let (n, out) = render16(&mut c, &data, 10);
    assert!(n < 10);
    assert_eq!(left(&out, 3), vec![3, 2, 1]);
    assert_eq!(c.dir, 0);
}

#[test]
fn test_stop_at_end_bounces_reversed_voice() {
    let data: Vec<i16> = (0..4).collect();
    let mut c = cursor(1, 1, 0, 4);
    c.dir = -1;
    let (n, out) = render16(&mut c, &data, 5);
    assert_eq!(n, 5);
    assert_eq!(left(&out, n), vec![1, 0, 0, 1, 2]);
}

// ============================================================================
// Cursor control
// ============================================================================

#[test]
fn test_advance_only_matches_rendered_position() {
    let data: Vec<i16> = (0..32).collect();
    let mut silent = cursor(1, 0, 0, 32);
    let mut loud = cursor(1, 0, 0, 32);
    let mut ramps = unity();

    let a = silent.resample::<Pcm16>(&data, None, 10, &mut ramps, 1.0);
    let (b, _) = render16(&mut loud, &data, 10);
    assert_eq!(a, b);

    let (_, s) = render16(&mut silent, &data, 4);
    let (_, l) = render16(&mut loud, &data, 4);
    assert_eq!(s, l);
    assert_eq!(left(&s, 4), vec![10, 11, 12, 13]);
}

#[test]
fn test_current_sample_does_not_consume() {
    let data: Vec<i16> = (10..20).collect();
    let mut c = cursor(1, 0, 0, 10);
    let ramps = [VolumeRamp::new(0.5, 0.5, 0.0, 1.0, declick::STEADY); 2];
    let first = c.current_sample::<Pcm16>(&data, &ramps, 1.0);
    let again = c.current_sample::<Pcm16>(&data, &ramps, 1.0);
    assert_eq!(first, again);
    assert_eq!(first[0], 10 * 128);

    let (_, out) = render16(&mut c, &data, 1);
    assert_eq!(out[0], 10 * 256);
}

#[test]
fn test_zero_delta_renders_nothing() {
    let mut c = cursor(1, 0, 0, 4);
    let mut ramps = unity();
    let mut out = vec![0; 8];
    let n = c.resample::<Pcm16>(&[1, 2, 3, 4], Some(&mut out), 4, &mut ramps, 0.0);
    assert_eq!(n, 0);
    assert!(out.iter().all(|&s| s == 0));
}

#[test]
fn test_reset_restarts_from_position() {
    let data: Vec<i16> = (0..16).collect();
    let mut c = cursor(1, 0, 0, 16);
    render16(&mut c, &data, 6);
    c.reset(8, 0, 16);
    let (_, out) = render16(&mut c, &data, 3);
    assert_eq!(left(&out, 3), vec![8, 9, 10]);
    assert_eq!(c.time_lost, 0);
}

#[test]
fn test_skip_follows_loop_pickup() {
    let data: Vec<i16> = (0..8).collect();
    let mut c = cursor(1, 0, 4, 8);
    c.pickup = Pickup::Loop;
    assert_eq!(c.skip::<Pcm16>(&data, 10, 1.0), 10);
    let (_, out) = render16(&mut c, &data, 3);
    assert_eq!(left(&out, 3), vec![6, 7, 4], "skip should land where rendering would");

    let mut long = cursor(1, 0, 4, 8);
    long.pickup = Pickup::Loop;
    assert_eq!(long.skip::<Pcm16>(&data, 1_000_002, 1.0), 1_000_002);
    let (_, out) = render16(&mut long, &data, 1);
    assert_eq!(left(&out, 1), vec![6], "whole loop cycles should be folded away");
}

#[test]
fn test_skip_keeps_fractional_position() {
    let data: Vec<i16> = (0..16).collect();
    let mut c = cursor(1, 0, 0, 16);
    c.skip::<Pcm16>(&data, 3, 0.5);
    c.skip::<Pcm16>(&data, 3, 0.5);
    let (_, out) = render16(&mut c, &data, 1);
    assert_eq!(left(&out, 1), vec![3], "two half-frame remainders should add up");
}

#[test]
fn test_skip_reports_short_when_source_stops() {
    let data: Vec<i16> = (0..5).collect();
    let mut c = cursor(1, 0, 0, 5);
    assert_eq!(c.skip::<Pcm16>(&data, 8, 1.0), 5);
    assert_eq!(c.dir, 0);
    assert!(c.is_finished());
    assert_eq!(c.skip::<Pcm16>(&data, 8, 1.0), 0, "a stopped cursor covers nothing");
}

#[test]
fn test_skip_keeps_interpolation_history() {
    let data = vec![10_000i16; 4096];
    let half_rate = |c: &mut SampleCursor| {
        let mut out = vec![0; 8];
        let mut ramps = unity();
        assert_eq!(c.resample::<Pcm16>(&data, Some(&mut out), 4, &mut ramps, 0.5), 4);
        left(&out, 4)
    };

    let mut skipped = cursor(1, 0, 0, 4096);
    skipped.quality = Quality::Sinc;
    assert_eq!(skipped.skip::<Pcm16>(&data, 1000, 1.0), 1000);
    for (i, level) in half_rate(&mut skipped).into_iter().enumerate() {
        assert!(
            (level - 10_000).abs() < 100,
            "frame {i} after a skip should resume at the source level, got {level}"
        );
    }

    let mut cold = cursor(1, 1000, 0, 4096);
    cold.quality = Quality::Sinc;
    let levels = half_rate(&mut cold);
    assert!(
        levels.iter().any(|level| (level - 10_000).abs() > 500),
        "a cold start rings against the zero history: {levels:?}"
    );
}
