//! Handle-indexed voice storage
//!
//! Voices live in a fixed-capacity arena and are referred to by
//! [`VoiceHandle`]. A handle is owned by exactly one place at a time: a
//! channel's `playing` slot or one slot of the background pool. Freeing a
//! voice returns its slot to the free list.

use crate::voice::Voice;

/// Index of a live voice in a [`VoiceArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct VoiceHandle(u16);

impl VoiceHandle {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub(crate) struct VoiceArena {
    slots: Vec<Option<Voice>>,
    free: Vec<u16>,
    capacity: usize,
}

impl VoiceArena {
    /// Arena able to hold `capacity` live voices
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            capacity,
        }
    }

    /// Store a voice; `None` (and the voice dropped) when the arena is full
    pub(crate) fn insert(&mut self, voice: Voice) -> Option<VoiceHandle> {
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(voice);
            return Some(VoiceHandle(index));
        }
        if self.slots.len() < self.capacity {
            self.slots.push(Some(voice));
            return Some(VoiceHandle((self.slots.len() - 1) as u16));
        }
        None
    }

    /// Drop a voice and recycle its slot
    pub(crate) fn free(&mut self, handle: VoiceHandle) -> Option<Voice> {
        let voice = self.slots.get_mut(handle.index())?.take()?;
        self.free.push(handle.0);
        Some(voice)
    }

    pub(crate) fn get(&self, handle: VoiceHandle) -> Option<&Voice> {
        self.slots.get(handle.index())?.as_ref()
    }

    pub(crate) fn get_mut(&mut self, handle: VoiceHandle) -> Option<&mut Voice> {
        self.slots.get_mut(handle.index())?.as_mut()
    }

    /// Number of live voices
    pub(crate) fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::tests::test_voice;

    #[test]
    fn test_insert_reuses_freed_slots() {
        let mut arena = VoiceArena::with_capacity(2);
        let a = arena.insert(test_voice(0)).expect("first slot");
        let b = arena.insert(test_voice(1)).expect("second slot");
        assert!(arena.insert(test_voice(2)).is_none(), "arena is full");
        assert_eq!(arena.live(), 2);

        assert_eq!(arena.free(a).map(|v| v.channel), Some(0));
        assert!(arena.get(a).is_none(), "freed handle no longer resolves");
        assert!(arena.free(a).is_none(), "double free is a no-op");

        let c = arena.insert(test_voice(3)).expect("slot recycled");
        assert_eq!(c, a);
        assert_eq!(arena.get(b).map(|v| v.channel), Some(1));
        assert_eq!(arena.live(), 2);
    }
}
