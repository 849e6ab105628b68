//! Tests for the resampler push/pull contract

use super::*;

const ALL_QUALITIES: [Quality; 6] = [
    Quality::Zoh,
    Quality::Blep,
    Quality::Linear,
    Quality::Blam,
    Quality::Cubic,
    Quality::Sinc,
];

fn resampler(quality: Quality, rate: f64) -> Resampler {
    let mut r = Resampler::new(ResamplerContext::new());
    r.set_quality(quality);
    r.set_rate(rate);
    r
}

/// Pull `count` output samples, topping up the input from `source` as needed.
fn pull(r: &mut Resampler, source: &mut impl Iterator<Item = i16>, count: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(count);
    while out.len() < count {
        while r.get_free_count() > 0 {
            match source.next() {
                Some(s) => r.write_sample(s),
                None => break,
            }
        }
        if r.get_sample_count() == 0 {
            break;
        }
        out.push(r.get_sample_float());
        r.remove_sample(false);
    }
    out
}

#[test]
fn test_quality_levels_clamp() {
    assert_eq!(Quality::from_level(-3), Quality::Zoh);
    assert_eq!(Quality::from_level(2), Quality::Linear);
    assert_eq!(Quality::from_level(99), Quality::Sinc);

    let mut r = Resampler::new(ResamplerContext::new());
    r.set_quality_level(42);
    assert_eq!(r.quality(), Quality::Sinc);
    r.set_quality_level(-1);
    assert_eq!(r.quality(), Quality::Zoh);
}

#[test]
fn test_new_resampler_defaults_to_sinc() {
    let r = Resampler::new(ResamplerContext::new());
    assert_eq!(r.quality(), Quality::Sinc);
    assert_eq!(r.get_free_count(), BUFFER_SIZE);
    assert!(!r.ready());
}

#[test]
fn test_dc_gain_per_quality() {
    for quality in ALL_QUALITIES {
        for rate in [0.75, 1.0, 1.3] {
            let mut r = resampler(quality, rate);
            let mut source = std::iter::repeat(1000i16);
            let out = pull(&mut r, &mut source, 400);
            assert_eq!(out.len(), 400, "{quality:?} stalled at rate {rate}");

            let expected = 1000.0 * 256.0;
            for (i, v) in out.iter().enumerate().skip(200) {
                assert!(
                    (v - expected).abs() < expected * 0.01,
                    "{quality:?} rate {rate}: sample {i} = {v}, expected ~{expected}"
                );
            }
        }
    }
}

#[test]
fn test_unity_rate_reproduces_input_for_zoh_and_linear() {
    for quality in [Quality::Zoh, Quality::Linear] {
        let latency = quality.input_delay() + quality.output_delay();
        assert_eq!(latency, 0);

        let mut r = resampler(quality, 1.0);
        let mut source = (0..500).map(|i| (i * 7 - 1000) as i16);
        let out = pull(&mut r, &mut source, 300);
        assert_eq!(out.len(), 300);
        for (i, v) in out.iter().enumerate() {
            let expected = ((i as i32 - latency as i32) * 7 - 1000) as f32 * 256.0;
            assert_eq!(*v, expected, "{quality:?} sample {i}");
        }
    }
}

#[test]
fn test_free_count_plus_fill_is_capacity() {
    for quality in ALL_QUALITIES {
        let mut r = resampler(quality, 1.37);
        assert_eq!(r.get_free_count() + r.get_fill_count(), BUFFER_SIZE);
        for step in 0..500 {
            if step % 3 != 0 {
                r.write_sample((step * 31 % 2000) as i16);
            } else if r.get_sample_count() > 0 {
                r.remove_sample(true);
            }
            assert_eq!(
                r.get_free_count() + r.get_fill_count(),
                BUFFER_SIZE,
                "{quality:?} at step {step}"
            );
        }
    }
}

#[test]
fn test_writes_past_capacity_are_dropped() {
    let mut r = resampler(Quality::Linear, 1.0);
    for i in 0..(BUFFER_SIZE as i16 + 10) {
        r.write_sample(i);
    }
    assert_eq!(r.get_free_count(), 0);
    assert_eq!(r.get_fill_count(), BUFFER_SIZE);

    // The first BUFFER_SIZE samples survive in order
    let mut empty = std::iter::empty();
    let out = pull(&mut r, &mut empty, 20);
    for (i, v) in out.iter().enumerate() {
        assert_eq!(*v, i as f32 * 256.0);
    }
}

#[test]
fn test_first_write_primes_input_delay() {
    let mut r = resampler(Quality::Sinc, 1.0);
    r.write_sample(1);
    assert_eq!(r.get_fill_count(), SINC_WIDTH - 1 + 1);

    let mut r = resampler(Quality::Cubic, 1.0);
    r.write_sample(1);
    assert_eq!(r.get_fill_count(), 2);
}

#[test]
fn test_ready_threshold() {
    let mut r = resampler(Quality::Cubic, 1.0);
    r.write_sample(0);
    r.write_sample(0);
    r.write_sample(0);
    // Primed one + three written = four, threshold is "more than four"
    assert!(!r.ready());
    r.write_sample(0);
    assert!(r.ready());
}

#[test]
fn test_cubic_midpoint_between_neighbours() {
    let mut r = resampler(Quality::Cubic, 1.5);
    let input = [0i16, 1000, 2000, -1000, 0];
    let mut source = input.into_iter().chain(std::iter::repeat(0));
    let out = pull(&mut r, &mut source, 4);

    // Output 0 lands on input 0, output 1 on input position 1.5
    assert_eq!(out[0], 0.0);
    let mid = out[1] / 256.0;
    assert!(
        mid > 1000.0 && mid < 2000.0,
        "interpolated value {mid} not strictly between 1000 and 2000"
    );
}

#[test]
fn test_quality_switch_across_blep_resets_output() {
    let mut r = resampler(Quality::Linear, 1.0);
    let mut source = std::iter::repeat(500i16);
    let _ = pull(&mut r, &mut source, 10);
    assert!(r.read_filled > 0);

    // Linear -> Cubic keeps pending output
    r.set_quality(Quality::Cubic);
    assert!(r.read_filled > 0, "non-BLEP switch must keep the output ring");

    // Cubic -> BLEP discards it
    r.set_quality(Quality::Blep);
    assert_eq!(r.read_filled, 0);
    assert_eq!(r.accumulator, 0.0);
    assert_eq!(r.state.last_amp, 0.0);
    assert!(r.buffer_out.iter().all(|&v| v == 0.0));
}

#[test]
fn test_clear_restarts_stream() {
    let mut r = resampler(Quality::Zoh, 1.0);
    let mut source = std::iter::repeat(100i16);
    let _ = pull(&mut r, &mut source, 30);
    r.clear();
    assert_eq!(r.get_free_count(), BUFFER_SIZE);
    r.write_sample(7);
    r.write_sample(8);
    assert_eq!(r.get_sample_float(), 7.0 * 256.0);
}

#[test]
fn test_clone_is_independent() {
    let mut a = resampler(Quality::Sinc, 0.9);
    let mut source = (0..).map(|i| ((i * 13) % 3000) as i16);
    let _ = pull(&mut a, &mut source, 50);

    let mut b = a.clone();
    let mut source_b = source.clone();
    let out_a = pull(&mut a, &mut source, 40);
    let out_b = pull(&mut b, &mut source_b, 40);
    assert_eq!(out_a, out_b, "clone diverged from original");

    // Advancing one does not move the other
    a.remove_sample(false);
    assert_eq!(b.get_fill_count() + b.get_free_count(), BUFFER_SIZE);
    assert_ne!(a.get_sample_count(), 0);
}

#[test]
fn test_write_sample_fixed_normalizes_depth() {
    let mut r = resampler(Quality::Zoh, 1.0);
    r.write_sample_fixed(1 << 22, 24);
    r.write_sample_fixed(0, 24);
    assert_eq!(r.get_sample_float(), 0.5);
}

#[test]
fn test_accumulator_decay_drains_dc() {
    let mut r = resampler(Quality::Blep, 1.0);
    let mut source = std::iter::repeat(1000i16);
    let _ = pull(&mut r, &mut source, 100);
    let before = r.get_sample_float();

    for _ in 0..2000 {
        while r.get_free_count() > 0 {
            r.write_sample(1000);
        }
        if r.get_sample_count() == 0 {
            break;
        }
        r.remove_sample(true);
    }

    let after = r.get_sample_float();
    assert!(
        after.abs() < before.abs() * 0.9,
        "decay did not reduce {before} -> {after}"
    );
}

#[test]
fn test_shared_context_is_built_once() {
    let a = ResamplerContext::shared();
    let b = ResamplerContext::shared();
    assert!(Arc::ptr_eq(&a, &b), "every caller gets the same tables");
    assert!(
        !Arc::ptr_eq(&a, &ResamplerContext::new()),
        "new() still builds a private context"
    );
}
