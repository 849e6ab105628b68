//! Playback event hooks
//!
//! Returning [`ControlFlow::Break`] from a status hook stops the renderer at
//! the tick that raised it; `render` then returns the frames produced so far.

use std::fmt;
use std::ops::ControlFlow;

type StatusHook = Box<dyn FnMut() -> ControlFlow<()> + Send>;
type MidiHook = Box<dyn FnMut(usize, u8) -> bool + Send>;

/// Hooks a [`Sigrenderer`](crate::Sigrenderer) raises while playing
///
/// Cloning a renderer never clones its hooks: the copy starts with an empty
/// set, so checkpoints taken while scanning a song stay silent.
#[derive(Default)]
pub struct Callbacks {
    pub(crate) on_loop: Option<StatusHook>,
    pub(crate) on_xm_speed_zero: Option<StatusHook>,
    pub(crate) on_midi: Option<MidiHook>,
    pub(crate) on_global_volume_zero: Option<StatusHook>,
}

impl Callbacks {
    /// Called when playback returns to a row it has already played
    ///
    /// If the hook continues, the visited-row record is cleared so the next
    /// pass is reported again.
    pub fn set_loop(&mut self, f: impl FnMut() -> ControlFlow<()> + Send + 'static) {
        self.on_loop = Some(Box::new(f));
    }

    /// Called when an XM row sets the speed to zero
    ///
    /// If the hook continues, the row keeps playing its per-tick effects
    /// without ever advancing.
    pub fn set_xm_speed_zero(&mut self, f: impl FnMut() -> ControlFlow<()> + Send + 'static) {
        self.on_xm_speed_zero = Some(Box::new(f));
    }

    /// Receives every MIDI byte a macro sends, with the channel it came from
    ///
    /// Return true to consume the byte. Unconsumed bytes are still parsed
    /// for the internal filter messages.
    pub fn set_midi(&mut self, f: impl FnMut(usize, u8) -> bool + Send + 'static) {
        self.on_midi = Some(Box::new(f));
    }

    /// Called once the global volume has stayed at zero for the configured time
    pub fn set_global_volume_zero(&mut self, f: impl FnMut() -> ControlFlow<()> + Send + 'static) {
        self.on_global_volume_zero = Some(Box::new(f));
    }

    /// Stop at the first loop, speed-zero or silence event
    pub(crate) fn terminating() -> Self {
        let mut callbacks = Self::default();
        callbacks.set_loop(|| ControlFlow::Break(()));
        callbacks.set_xm_speed_zero(|| ControlFlow::Break(()));
        callbacks.set_global_volume_zero(|| ControlFlow::Break(()));
        callbacks
    }

    pub(crate) fn has_loop(&self) -> bool {
        self.on_loop.is_some()
    }

    pub(crate) fn has_global_volume_zero(&self) -> bool {
        self.on_global_volume_zero.is_some()
    }

    pub(crate) fn fire_loop(&mut self) -> ControlFlow<()> {
        fire(&mut self.on_loop)
    }

    pub(crate) fn fire_xm_speed_zero(&mut self) -> ControlFlow<()> {
        fire(&mut self.on_xm_speed_zero)
    }

    pub(crate) fn fire_global_volume_zero(&mut self) -> ControlFlow<()> {
        fire(&mut self.on_global_volume_zero)
    }

    /// Offer a MIDI byte to the host; true if it was consumed
    pub(crate) fn send_midi(&mut self, channel: usize, byte: u8) -> bool {
        self.on_midi.as_mut().is_some_and(|f| f(channel, byte))
    }
}

fn fire(hook: &mut Option<StatusHook>) -> ControlFlow<()> {
    match hook {
        Some(f) => f(),
        None => ControlFlow::Continue(()),
    }
}

impl Clone for Callbacks {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_loop", &self.on_loop.is_some())
            .field("on_xm_speed_zero", &self.on_xm_speed_zero.is_some())
            .field("on_midi", &self.on_midi.is_some())
            .field("on_global_volume_zero", &self.on_global_volume_zero.is_some())
            .finish()
    }
}
