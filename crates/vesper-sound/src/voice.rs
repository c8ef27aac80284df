//! Fixed table of hardware playback voices.
//!
//! A voice is one native playback slot capable of rendering one buffer at a
//! time. Slots carry explicit state flags, the buffer they are bound to, a
//! generation counter for stale-handle detection, and the caller's opaque
//! tag for the completion callback.
//!
//! Allocation never preempts a voice that is playing or paused: when every
//! slot is busy, the request fails and the caller is told, rather than an
//! audible sound being cut off somewhere else.

use tracing::debug;

use crate::handle::GENERATION_PERIOD;

/// One playback voice slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct Voice {
    /// Bound to a live playback session (superset of playing/paused).
    pub active: bool,
    /// Currently rendering audio.
    pub playing: bool,
    /// Paused mid-playback.
    pub paused: bool,
    /// Restarts from the beginning when it reaches the end.
    pub looping: bool,
    /// Buffer pool index this voice renders; valid only while `active`.
    pub buffer_index: usize,
    /// Incremented every time the slot is reallocated, wrapping at 2^19.
    pub generation: u32,
    /// Caller-supplied value returned through the completion callback.
    pub user_tag: u32,
}

impl Voice {
    /// Clears every playback flag, leaving the slot fully retired.
    pub fn retire(&mut self) {
        self.active = false;
        self.playing = false;
        self.paused = false;
        self.looping = false;
    }
}

/// Fixed-capacity array of playback voices.
#[derive(Debug)]
pub struct VoiceTable {
    slots: Vec<Voice>,
}

impl VoiceTable {
    /// Creates a table with the given number of voice slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![Voice::default(); capacity],
        }
    }

    /// Number of voice slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Borrow a voice slot.
    #[must_use]
    pub fn voice(&self, slot: usize) -> &Voice {
        &self.slots[slot]
    }

    /// Mutably borrow a voice slot.
    pub fn voice_mut(&mut self, slot: usize) -> &mut Voice {
        &mut self.slots[slot]
    }

    /// Claims a voice slot for a new playback session bound to `buffer_index`.
    ///
    /// Only slots that are neither playing nor paused are eligible. On
    /// success the slot's generation is bumped (wrapping at 2^19), its
    /// playback flags are cleared, and it is marked active. Returns `None`
    /// when every voice is busy.
    pub fn allocate(&mut self, buffer_index: usize) -> Option<usize> {
        let slot = self
            .slots
            .iter()
            .position(|voice| !voice.playing && !voice.paused);

        let Some(slot) = slot else {
            debug!(buffer_index, "no free voice, request dropped");
            return None;
        };

        let voice = &mut self.slots[slot];
        voice.generation = (voice.generation + 1) % GENERATION_PERIOD;
        voice.buffer_index = buffer_index;
        voice.active = true;
        voice.playing = false;
        voice.paused = false;
        voice.looping = false;
        voice.user_tag = 0;

        Some(slot)
    }

    /// The single authority for "does this handle still mean anything".
    ///
    /// True iff the slot is active, bound to `buffer_index`, and its
    /// generation matches. Every public operation checks this before touching
    /// voice state; a mismatch means the handle belongs to a retired session.
    #[must_use]
    pub fn is_live(&self, slot: usize, buffer_index: usize, generation: u32) -> bool {
        let Some(voice) = self.slots.get(slot) else {
            return false;
        };
        voice.active && voice.buffer_index == buffer_index && voice.generation == generation
    }

    /// Number of voices currently flagged playing.
    #[must_use]
    pub fn playing_count(&self) -> usize {
        self.slots.iter().filter(|voice| voice.playing).count()
    }

    /// Iterate over `(slot, voice)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Voice)> {
        self.slots.iter().enumerate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_bumps_generation() {
        let mut table = VoiceTable::new(2);

        let slot = table.allocate(3).expect("should allocate");
        let first_gen = table.voice(slot).generation;
        assert!(table.voice(slot).active);
        assert_eq!(table.voice(slot).buffer_index, 3);

        // Slot is not playing, so reallocation reuses it and bumps the
        // generation, invalidating the earlier session.
        let again = table.allocate(7).expect("should allocate");
        assert_eq!(again, slot);
        assert_eq!(table.voice(slot).generation, first_gen + 1);
        assert!(!table.is_live(slot, 3, first_gen));
        assert!(table.is_live(slot, 7, first_gen + 1));
    }

    #[test]
    fn test_allocate_skips_playing_and_paused() {
        let mut table = VoiceTable::new(3);

        let a = table.allocate(0).expect("should allocate");
        table.voice_mut(a).playing = true;
        let b = table.allocate(0).expect("should allocate");
        table.voice_mut(b).playing = false;
        table.voice_mut(b).paused = true;

        let c = table.allocate(0).expect("should allocate");
        assert_ne!(c, a);
        assert_ne!(c, b);
    }

    #[test]
    fn test_allocate_fails_when_all_busy() {
        let mut table = VoiceTable::new(2);

        for _ in 0..2 {
            let slot = table.allocate(0).expect("should allocate");
            table.voice_mut(slot).playing = true;
        }

        assert_eq!(table.allocate(0), None);
    }

    #[test]
    fn test_generation_wraps() {
        let mut table = VoiceTable::new(1);
        table.voice_mut(0).generation = GENERATION_PERIOD - 1;

        let slot = table.allocate(0).expect("should allocate");
        assert_eq!(table.voice(slot).generation, 0);
    }

    #[test]
    fn test_reallocations_produce_distinct_generations() {
        let mut table = VoiceTable::new(1);

        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            let slot = table.allocate(0).expect("should allocate");
            assert!(seen.insert(table.voice(slot).generation));
        }
    }

    #[test]
    fn test_is_live_checks_all_three_fields() {
        let mut table = VoiceTable::new(2);

        let slot = table.allocate(4).expect("should allocate");
        let generation = table.voice(slot).generation;

        assert!(table.is_live(slot, 4, generation));
        assert!(!table.is_live(slot, 5, generation));
        assert!(!table.is_live(slot, 4, generation + 1));
        assert!(!table.is_live(slot + 1, 4, generation));
        assert!(!table.is_live(99, 4, generation));

        table.voice_mut(slot).retire();
        assert!(!table.is_live(slot, 4, generation));
    }

    #[test]
    fn test_playing_count() {
        let mut table = VoiceTable::new(4);
        assert_eq!(table.playing_count(), 0);

        for expected in 1..=3 {
            let slot = table.allocate(0).expect("should allocate");
            table.voice_mut(slot).playing = true;
            assert_eq!(table.playing_count(), expected);
        }
    }
}
