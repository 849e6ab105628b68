//! Interpolation kernels and the once-per-process ISA selection
//!
//! Every kernel consumes a window of the input ring and writes into a slice of
//! the output ring, advancing a Q32.32 phase accumulator. The kernel loops are
//! written once, generic over a [`Lanes`] implementation that supplies the
//! inner dot products; [`KernelSet`] monomorphizes them for the detected ISA.

mod scalar;
mod simd;

use crate::tables::{
    BLAM_CUTOFF, BLEP_CUTOFF, RESOLUTION, RESOLUTION_SHIFT, ResamplerTables, SINC_CUTOFF,
    SINC_WIDTH,
};

pub(crate) use scalar::Scalar;

/// One in Q32.32
pub(crate) const PHASE_ONE: u64 = 1 << 32;
const PHASE_FRAC_MASK: u64 = PHASE_ONE - 1;

/// Phase accumulators shared by all kernels
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PhaseState {
    pub phase: u64,
    pub phase_inc: u64,
    pub inv_phase: u64,
    pub inv_phase_inc: u64,
    /// Running amplitude already emitted as impulses (BLEP/BLAM)
    pub last_amp: f64,
}

/// Input and output advance of one kernel invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct KernelRun {
    pub consumed: usize,
    pub produced: usize,
}

pub(crate) type KernelFn =
    fn(&ResamplerTables, &[f32], &mut [f32], &mut PhaseState) -> KernelRun;

/// Vector width primitives used by the kernel loops
pub(crate) trait Lanes {
    /// `a[0..4] · b[0..4]`
    fn dot4(a: &[f32], b: &[f32]) -> f32;

    /// `a[0..32] · kernel`
    fn dot32(a: &[f32], kernel: &[f32; SINC_WIDTH * 2]) -> f32;

    /// `out[0..32] += kernel * scale`
    fn scatter32(out: &mut [f32], kernel: &[f32; SINC_WIDTH * 2], scale: f32);
}

/// Instruction set used for the vectorized kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isa {
    Scalar,
    Sse,
    Neon,
}

impl Isa {
    /// Probe the running CPU
    pub fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            if is_x86_feature_detected!("sse") {
                return Isa::Sse;
            }
        }

        #[cfg(target_arch = "aarch64")]
        {
            if std::arch::is_aarch64_feature_detected!("neon") {
                return Isa::Neon;
            }
        }

        Isa::Scalar
    }

    /// Whether this ISA can run on the current CPU
    pub fn is_available(self) -> bool {
        match self {
            Isa::Scalar => true,
            other => Isa::detect() == other,
        }
    }
}

/// Kernel function table for one ISA
#[derive(Clone, Copy)]
pub struct KernelSet {
    isa: Isa,
    pub(crate) zoh: KernelFn,
    pub(crate) blep: KernelFn,
    pub(crate) linear: KernelFn,
    pub(crate) blam: KernelFn,
    pub(crate) cubic: KernelFn,
    pub(crate) sinc: KernelFn,
}

impl std::fmt::Debug for KernelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelSet").field("isa", &self.isa).finish()
    }
}

impl KernelSet {
    /// Kernel table for `isa`, falling back to scalar when the CPU lacks it
    pub fn for_isa(isa: Isa) -> Self {
        let isa = if isa.is_available() { isa } else { Isa::Scalar };
        match isa {
            #[cfg(target_arch = "x86_64")]
            Isa::Sse => Self::with_lanes::<simd::Sse>(Isa::Sse),
            #[cfg(target_arch = "aarch64")]
            Isa::Neon => Self::with_lanes::<simd::Neon>(Isa::Neon),
            _ => Self::with_lanes::<Scalar>(Isa::Scalar),
        }
    }

    fn with_lanes<L: Lanes>(isa: Isa) -> Self {
        Self {
            isa,
            zoh: run_zoh,
            blep: run_blep::<L>,
            linear: run_linear,
            blam: run_blam::<L>,
            cubic: run_cubic::<L>,
            sinc: run_sinc::<L>,
        }
    }

    pub fn isa(&self) -> Isa {
        self.isa
    }
}

#[inline]
fn phase_reduce(phase: u64) -> usize {
    (phase >> (32 - RESOLUTION_SHIFT)) as usize
}

#[inline]
fn phase_to_f32(phase: u64) -> f32 {
    phase as f32 * (1.0 / PHASE_ONE as f32)
}

// ============================================================================
// Kernel loops
// ============================================================================

fn run_zoh(
    _tables: &ResamplerTables,
    input: &[f32],
    out: &mut [f32],
    state: &mut PhaseState,
) -> KernelRun {
    let in_size = input.len().saturating_sub(1);
    if in_size == 0 {
        return KernelRun::default();
    }

    let mut phase = state.phase;
    let (mut i, mut o) = (0usize, 0usize);
    while o < out.len() {
        out[o] = input[i];
        o += 1;

        phase += state.phase_inc;
        i += (phase >> 32) as usize;
        phase &= PHASE_FRAC_MASK;

        if i >= in_size {
            break;
        }
    }

    state.phase = phase;
    KernelRun {
        consumed: i,
        produced: o,
    }
}

fn run_linear(
    _tables: &ResamplerTables,
    input: &[f32],
    out: &mut [f32],
    state: &mut PhaseState,
) -> KernelRun {
    let in_size = input.len().saturating_sub(2);
    if in_size == 0 {
        return KernelRun::default();
    }

    let mut phase = state.phase;
    let (mut i, mut o) = (0usize, 0usize);
    while o < out.len() {
        out[o] = input[i] + (input[i + 1] - input[i]) * phase_to_f32(phase);
        o += 1;

        phase += state.phase_inc;
        i += (phase >> 32) as usize;
        phase &= PHASE_FRAC_MASK;

        if i >= in_size {
            break;
        }
    }

    state.phase = phase;
    KernelRun {
        consumed: i,
        produced: o,
    }
}

fn run_blep<L: Lanes>(
    tables: &ResamplerTables,
    input: &[f32],
    out: &mut [f32],
    state: &mut PhaseState,
) -> KernelRun {
    let in_size = input.len().saturating_sub(1);
    if in_size == 0 {
        return KernelRun::default();
    }

    let step = (BLEP_CUTOFF * RESOLUTION as f32) as i32;
    let mut last_amp = state.last_amp;
    let mut inv_phase = state.inv_phase;
    let mut kernel = [0.0f32; SINC_WIDTH * 2];
    let (mut i, mut o) = (0usize, 0usize);

    loop {
        if o + SINC_WIDTH * 2 > out.len() {
            break;
        }

        let mut sample = input[i] as f64 - last_amp;
        i += 1;

        if sample != 0.0 {
            let kernel_sum =
                tables.windowed_sinc(&mut kernel, phase_reduce(inv_phase) as i32, step);
            last_amp += sample;
            sample /= kernel_sum;
            L::scatter32(&mut out[o..], &kernel, sample as f32);
        }

        inv_phase += state.inv_phase_inc;
        o += (inv_phase >> 32) as usize;
        inv_phase &= PHASE_FRAC_MASK;

        if i >= in_size {
            break;
        }
    }

    state.inv_phase = inv_phase;
    state.last_amp = last_amp;
    KernelRun {
        consumed: i,
        produced: o,
    }
}

fn run_blam<L: Lanes>(
    tables: &ResamplerTables,
    input: &[f32],
    out: &mut [f32],
    state: &mut PhaseState,
) -> KernelRun {
    let in_size = input.len().saturating_sub(2);
    if in_size == 0 {
        return KernelRun::default();
    }

    let step = (BLAM_CUTOFF * RESOLUTION as f32) as i32;
    let mut last_amp = state.last_amp;
    let mut phase = state.phase;
    let mut inv_phase = state.inv_phase;
    let mut kernel = [0.0f32; SINC_WIDTH * 2];
    let (mut i, mut o) = (0usize, 0usize);

    loop {
        if o + SINC_WIDTH * 2 > out.len() {
            break;
        }

        let mut sample = input[i] as f64;
        if state.phase_inc < PHASE_ONE {
            sample += ((input[i + 1] - input[i]) * phase_to_f32(phase)) as f64;
        }
        sample -= last_amp;

        if sample != 0.0 {
            let kernel_sum =
                tables.windowed_sinc(&mut kernel, phase_reduce(inv_phase) as i32, step);
            last_amp += sample;
            sample /= kernel_sum;
            L::scatter32(&mut out[o..], &kernel, sample as f32);
        }

        if state.inv_phase_inc < PHASE_ONE {
            // Downsampling: one impulse per input sample
            i += 1;
            inv_phase += state.inv_phase_inc;
            o += (inv_phase >> 32) as usize;
            inv_phase &= PHASE_FRAC_MASK;
        } else {
            phase += state.phase_inc;
            o += 1;
            i += (phase >> 32) as usize;
            phase &= PHASE_FRAC_MASK;
        }

        if i >= in_size {
            break;
        }
    }

    state.phase = phase;
    state.inv_phase = inv_phase;
    state.last_amp = last_amp;
    KernelRun {
        consumed: i,
        produced: o,
    }
}

fn run_cubic<L: Lanes>(
    tables: &ResamplerTables,
    input: &[f32],
    out: &mut [f32],
    state: &mut PhaseState,
) -> KernelRun {
    let in_size = input.len().saturating_sub(4);
    if in_size == 0 {
        return KernelRun::default();
    }

    let mut phase = state.phase;
    let (mut i, mut o) = (0usize, 0usize);
    while o < out.len() {
        out[o] = L::dot4(&input[i..i + 4], tables.cubic_taps(phase_reduce(phase)));
        o += 1;

        phase += state.phase_inc;
        i += (phase >> 32) as usize;
        phase &= PHASE_FRAC_MASK;

        if i >= in_size {
            break;
        }
    }

    state.phase = phase;
    KernelRun {
        consumed: i,
        produced: o,
    }
}

fn run_sinc<L: Lanes>(
    tables: &ResamplerTables,
    input: &[f32],
    out: &mut [f32],
    state: &mut PhaseState,
) -> KernelRun {
    let in_size = input.len().saturating_sub(SINC_WIDTH * 2);
    if in_size == 0 {
        return KernelRun::default();
    }

    // Narrow the passband when downsampling
    let step = if state.phase_inc > PHASE_ONE {
        (RESOLUTION as f32 / phase_to_f32(state.phase_inc) * SINC_CUTOFF) as i32
    } else {
        (RESOLUTION as f32 * SINC_CUTOFF) as i32
    };

    let mut phase = state.phase;
    let mut kernel = [0.0f32; SINC_WIDTH * 2];
    let (mut i, mut o) = (0usize, 0usize);
    while o < out.len() {
        let kernel_sum = tables.windowed_sinc(&mut kernel, phase_reduce(phase) as i32, step);
        let sample = L::dot32(&input[i..i + SINC_WIDTH * 2], &kernel);
        out[o] = (sample as f64 / kernel_sum) as f32;
        o += 1;

        phase += state.phase_inc;
        i += (phase >> 32) as usize;
        phase &= PHASE_FRAC_MASK;

        if i >= in_size {
            break;
        }
    }

    state.phase = phase;
    KernelRun {
        consumed: i,
        produced: o,
    }
}
