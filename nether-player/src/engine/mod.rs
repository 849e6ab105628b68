//! Scheduler and mixer
//!
//! [`Sigrenderer`] drives one playback session of a module:
//! - Order, row and tick progression with loop detection
//! - Row processing: note triggers, effect commands and their memory
//! - New Note Actions and the background voice pool
//! - Per-tick slides, envelopes and LFOs
//! - Mixing through the resampler, the resonant filter and declick ramps

mod effects;
mod midi;
mod mixing;
mod nna;
mod notes;
mod render;
mod row_processing;
mod tick;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use nether_resampler::{Quality, ResamplerContext};
use nether_tracker::{FormatFlags, TrackerModule};
use rand::SeedableRng;
use rand_pcg::Pcg32;
use smallvec::SmallVec;
use tracing::debug;

use crate::arena::{VoiceArena, VoiceHandle};
use crate::callbacks::Callbacks;
use crate::channel::Channel;
use crate::config::{PlayerConfig, RampStyle};
use crate::error::PlayerError;
use crate::voice::{Voice, ENVELOPE_SHIFT};
use crate::{N_CHANNELS, N_NNA_CHANNELS, TICK_TIME_DIVIDEND, TIME_UNIT, TOTAL_CHANNELS};

// ============================================================================
// Sequencer sentinels
// ============================================================================

/// `processrow` value asking for the next row to be taken from `breakrow`
pub(crate) const ROW_BREAK: i32 = 0xFFFE;

/// `processrow` after an XM pattern loop: take `breakrow` but keep loop state
pub(crate) const ROW_XM_LOOP: i32 = 0xFFFF;

/// Cleared from [`ROW_BREAK`] once a pattern break (Cxx) is seen on the row
pub(crate) const BREAK_MARK: i32 = 0x800;

/// Cleared from [`ROW_BREAK`] once an order jump (Bxx) is seen on the row
pub(crate) const JUMP_MARK: i32 = 0x400;

/// `processorder` value meaning "continue in the current order"
pub(crate) const ORDER_STAY: i32 = 0xFFFF;

/// `processorder` after an XM pattern loop jumped back past its last end
pub(crate) const ORDER_SUSPECT_LOOP: i32 = 0xFFFE;

/// Rows tracked per order in the visited-row bitmap
pub(crate) const ROWS_PER_ORDER: usize = 256;

/// Voice handles touched by one channel's effects
pub(crate) type ChannelVoices = SmallVec<[VoiceHandle; 8]>;

/// True while a break or jump is waiting for the end of the row
pub(crate) fn flow_change_pending(processrow: i32) -> bool {
    (processrow | BREAK_MARK | JUMP_MARK) == ROW_BREAK
}

/// FastTracker II proper, not a MOD played through the XM rules
pub(crate) fn is_pure_xm(module: &TrackerModule) -> bool {
    module.was(FormatFlags::WAS_XM) && !module.was(FormatFlags::WAS_MOD)
}

/// Snapshot of what one voice slot is playing
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChannelState {
    /// Pattern channel the voice was started on
    pub channel: usize,
    /// 1-based sample number
    pub sample: u8,
    /// Linear gain, 1.0 = full scale
    pub volume: f32,
    /// 0-64, or above 64 for surround
    pub pan: u8,
    /// Fractional pan in 1/256 steps
    pub subpan: i8,
    /// Playback rate in source frames per second
    pub freq: i32,
    /// 0-127
    pub filter_cutoff: u8,
    /// Fractional cutoff in 1/256 steps
    pub filter_subcutoff: u8,
    pub filter_resonance: u8,
}

/// One playback session of a module
///
/// Cloning yields an independent renderer that continues from the same
/// point; only the callbacks are left behind.
#[derive(Debug, Clone)]
pub struct Sigrenderer {
    pub(crate) module: Arc<TrackerModule>,
    ctx: Arc<ResamplerContext>,

    // Output settings
    pub(crate) quality: Quality,
    pub(crate) ramp_style: RampStyle,
    pub(crate) max_to_mix: usize,
    /// Module separation scaled by the configured separation (0-128)
    pub(crate) stereo_separation: i32,
    frame_delta: f64,
    /// Time units of zero global volume before the callback fires
    gvz_limit: i64,

    // Channels and voices
    pub(crate) channels: Vec<Channel>,
    pub(crate) pool: Vec<Option<VoiceHandle>>,
    pub(crate) voices: VoiceArena,

    // Song state
    pub(crate) globalvolume: i32,
    pub(crate) globalvolslide: i32,
    pub(crate) tempo: i32,
    pub(crate) temposlide: i32,
    pub(crate) speed: i32,
    pub(crate) tick: i32,
    pub(crate) rowcount: i32,

    // Position
    pub(crate) order: i32,
    pub(crate) row: i32,
    pub(crate) processorder: i32,
    pub(crate) processrow: i32,
    pub(crate) breakrow: i32,
    pub(crate) n_rows: i32,
    pub(crate) restart_position: i32,
    /// Index into `module.patterns` of the pattern being played
    pub(crate) pattern: Option<usize>,
    /// One bit per (order, row) already played
    played: Vec<u64>,

    // Timing, in 16.16 time units
    pub(crate) time_left: i64,
    pub(crate) sub_time_left: i64,
    gvz_time: i64,
    gvz_sub_time: i64,

    pub(crate) rng: Pcg32,
    pub(crate) callbacks: Callbacks,
    filter_buffer: Vec<i32>,
    /// Integer mix behind [`Sigrenderer::render_f32`]
    mix_buffer: Vec<i32>,
}

impl Sigrenderer {
    /// Start playback of `module` at `start_order`
    ///
    /// Uses the process-wide [`ResamplerContext::shared`] tables.
    pub fn new(
        module: Arc<TrackerModule>,
        config: &PlayerConfig,
        start_order: usize,
    ) -> Result<Self, PlayerError> {
        Self::with_context(module, ResamplerContext::shared(), config, start_order)
    }

    /// Start playback with a caller-supplied resampler context
    pub fn with_context(
        module: Arc<TrackerModule>,
        ctx: Arc<ResamplerContext>,
        config: &PlayerConfig,
        start_order: usize,
    ) -> Result<Self, PlayerError> {
        config.validate()?;

        if module.num_channels as usize > N_CHANNELS {
            return Err(PlayerError::TooManyChannels(module.num_channels as usize));
        }
        let n_orders = module.order_table.len();
        if start_order > n_orders {
            return Err(PlayerError::StartOrderOutOfRange {
                order: start_order,
                len: n_orders,
            });
        }
        if module.first_playable_order(0).is_none() {
            return Err(PlayerError::NoValidOrder);
        }

        let channels = (0..N_CHANNELS).map(|i| Channel::new(&module, i)).collect();
        let restart_position = if start_order > 0 {
            start_order as i32
        } else {
            module.restart_position as i32
        };

        let mut renderer = Self {
            ctx,
            quality: Quality::from_level(config.resampling_quality),
            ramp_style: config.ramp_style,
            max_to_mix: config.max_to_mix,
            stereo_separation: module.pan_separation as i32 * config.stereo_separation as i32 / 128,
            frame_delta: config.delta(),
            gvz_limit: config.global_volume_zero_seconds as i64 * TIME_UNIT,
            channels,
            pool: vec![None; N_NNA_CHANNELS],
            voices: VoiceArena::with_capacity(TOTAL_CHANNELS),
            globalvolume: module.global_volume as i32,
            globalvolslide: 0,
            tempo: module.initial_tempo as i32,
            temposlide: 0,
            speed: module.initial_speed as i32,
            tick: 1,
            rowcount: 1,
            order: start_order as i32,
            row: 0,
            processorder: start_order as i32 - 1,
            processrow: ROW_BREAK,
            breakrow: 0,
            n_rows: 0,
            restart_position,
            pattern: None,
            played: vec![0; (n_orders * ROWS_PER_ORDER).div_ceil(64)],
            time_left: 0,
            sub_time_left: 0,
            gvz_time: 0,
            gvz_sub_time: 0,
            rng: Pcg32::seed_from_u64(config.seed),
            callbacks: Callbacks::default(),
            filter_buffer: Vec::new(),
            mix_buffer: Vec::new(),
            module,
        };

        if renderer.module.was(FormatFlags::WAS_669) {
            renderer.reset_effects();
        }

        debug!(
            start_order,
            speed = renderer.speed,
            tempo = renderer.tempo,
            channels = renderer.module.num_channels,
            "sigrenderer started"
        );
        Ok(renderer)
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Change the interpolation level (0-5) of this and every sounding voice
    pub fn set_resampling_quality(&mut self, level: i32) {
        self.quality = Quality::from_level(level);
        let module = Arc::clone(&self.module);
        for handle in self.live_handles() {
            if let Some(voice) = self.voices.get_mut(handle) {
                if let Some(sample) = module.sample(voice.sample) {
                    voice.set_quality(self.quality, sample);
                }
            }
        }
    }

    pub fn set_ramp_style(&mut self, ramp_style: RampStyle) {
        self.ramp_style = ramp_style;
    }

    /// Number of voices mixed per render call, loudest first
    pub fn set_max_to_mix(&mut self, max_to_mix: usize) {
        self.max_to_mix = max_to_mix;
    }

    /// Silence or restore one pattern channel, including its background notes
    pub fn set_channel_muted(&mut self, channel: usize, muted: bool) {
        if let Some(ch) = self.channels.get_mut(channel) {
            ch.muted = muted;
        }
    }

    pub fn is_channel_muted(&self, channel: usize) -> bool {
        self.channels.get(channel).is_some_and(|ch| ch.muted)
    }

    pub fn callbacks_mut(&mut self) -> &mut Callbacks {
        &mut self.callbacks
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn module(&self) -> &Arc<TrackerModule> {
        &self.module
    }

    /// Current order, `None` once playback has stopped
    pub fn order(&self) -> Option<usize> {
        usize::try_from(self.order).ok()
    }

    /// Current row, `None` once playback has stopped
    pub fn row(&self) -> Option<usize> {
        usize::try_from(self.row).ok()
    }

    pub fn tempo(&self) -> i32 {
        self.tempo
    }

    pub fn speed(&self) -> i32 {
        self.speed
    }

    pub fn global_volume(&self) -> i32 {
        self.globalvolume
    }

    /// True once a callback stopped playback
    pub fn is_finished(&self) -> bool {
        self.order < 0
    }

    /// Render delta for the configured sample rate
    pub fn frame_delta(&self) -> f64 {
        self.frame_delta
    }

    /// Number of voices currently alive
    pub fn active_voices(&self) -> usize {
        self.voices.live()
    }

    /// What voice slot `slot` is playing
    ///
    /// Slots below [`N_CHANNELS`] are pattern channels, the rest address the
    /// background pool. Returns `None` for empty or finished slots.
    pub fn channel_state(&self, slot: usize) -> Option<ChannelState> {
        let handle = if slot < N_CHANNELS {
            self.channels[slot].playing?
        } else {
            (*self.pool.get(slot - N_CHANNELS)?)?
        };
        let voice = self.voices.get(handle)?;
        if voice.is_dead() {
            return None;
        }

        let pan = self.apply_pan_envelope(voice);
        let mut delta = voice.delta * 65536.0;
        let mut cutoff = voice.filter_cutoff << ENVELOPE_SHIFT;
        self.apply_pitch_modifications(voice, &mut delta, &mut cutoff);

        let resonance = if cutoff == 127 << ENVELOPE_SHIFT && voice.filter_resonance == 0 {
            cutoff = voice.true_filter_cutoff;
            voice.true_filter_resonance
        } else {
            voice.filter_resonance
        };

        Some(ChannelState {
            channel: voice.channel,
            sample: voice.sample,
            volume: self.calculate_volume(voice, 1.0),
            pan: ((pan + 128) >> ENVELOPE_SHIFT) as u8,
            subpan: pan as i8,
            freq: delta as i32,
            filter_cutoff: (cutoff >> 8) as u8,
            filter_subcutoff: cutoff as u8,
            filter_resonance: resonance as u8,
        })
    }

    // ========================================================================
    // Shared helpers
    // ========================================================================

    /// Tick length in whole time units at the current tempo
    pub(crate) fn tick_length(&self) -> i64 {
        (TICK_TIME_DIVIDEND / (self.tempo.max(1) << 8)) as i64
    }

    /// The channel's own voice followed by its background voices
    pub(crate) fn channel_voices(&self, ch: usize) -> ChannelVoices {
        let mut handles = ChannelVoices::new();
        handles.extend(self.channels[ch].playing);
        handles.extend(
            self.pool
                .iter()
                .flatten()
                .copied()
                .filter(|&h| self.voices.get(h).is_some_and(|v| v.channel == ch)),
        );
        handles
    }

    /// Background voices started on `ch`
    pub(crate) fn pool_voices(&self, ch: usize) -> ChannelVoices {
        self.pool
            .iter()
            .flatten()
            .copied()
            .filter(|&h| self.voices.get(h).is_some_and(|v| v.channel == ch))
            .collect()
    }

    /// Every live voice: channel voices first, then the pool
    pub(crate) fn live_handles(&self) -> SmallVec<[VoiceHandle; 64]> {
        self.channels
            .iter()
            .filter_map(|ch| ch.playing)
            .chain(self.pool.iter().flatten().copied())
            .collect()
    }

    pub(crate) fn channel_voice(&self, ch: usize) -> Option<&Voice> {
        self.voices.get(self.channels[ch].playing?)
    }

    pub(crate) fn channel_voice_mut(&mut self, ch: usize) -> Option<&mut Voice> {
        self.voices.get_mut(self.channels[ch].playing?)
    }

    pub(crate) fn played_set(&mut self, order: i32, row: i32) {
        if let Some((word, bit)) = self.played_bit(order, row) {
            self.played[word] |= bit;
        }
    }

    pub(crate) fn played_clear(&mut self, order: i32, row: i32) {
        if let Some((word, bit)) = self.played_bit(order, row) {
            self.played[word] &= !bit;
        }
    }

    pub(crate) fn played_test(&self, order: i32, row: i32) -> bool {
        self.played_bit(order, row)
            .is_some_and(|(word, bit)| self.played[word] & bit != 0)
    }

    pub(crate) fn played_reset(&mut self) {
        self.played.fill(0);
    }

    fn played_bit(&self, order: i32, row: i32) -> Option<(usize, u64)> {
        let order = usize::try_from(order).ok()?;
        let row = usize::try_from(row).ok().filter(|&r| r < ROWS_PER_ORDER)?;
        let index = order * ROWS_PER_ORDER + row;
        (index / 64 < self.played.len()).then_some((index / 64, 1u64 << (index % 64)))
    }

    pub(crate) fn resampler_context(&self) -> Arc<ResamplerContext> {
        Arc::clone(&self.ctx)
    }

    /// Advance the global-volume-zero timer by one tick
    pub(crate) fn global_volume_zero_elapsed(&mut self) -> bool {
        let t = self.gvz_sub_time + (self.tick_length() << 16);
        self.gvz_time += t >> 16;
        self.gvz_sub_time = t & 65535;
        self.gvz_time >= self.gvz_limit
    }

    pub(crate) fn reset_global_volume_zero(&mut self) {
        self.gvz_time = 0;
        self.gvz_sub_time = 0;
    }

    pub(crate) fn take_filter_buffer(&mut self, len: usize) -> Vec<i32> {
        let mut buffer = std::mem::take(&mut self.filter_buffer);
        buffer.clear();
        buffer.resize(len, 0);
        buffer
    }

    pub(crate) fn restore_filter_buffer(&mut self, buffer: Vec<i32>) {
        self.filter_buffer = buffer;
    }
}
