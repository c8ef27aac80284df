//! Packed playback handles.
//!
//! A [`SoundHandle`] is the opaque value returned to callers when a sound
//! starts playing. It packs the buffer slot, the voice slot, and the voice
//! generation into a single `u32`:
//!
//! ```text
//! bit 31 .......... 13 12 ...... 8 7 ............ 0
//!     [ generation    ][ voice    ][ buffer index  ]
//!          19 bits        5 bits        8 bits
//! ```
//!
//! A handle is not an ownership token. It is a generation-checked capability:
//! the voice table only honors a handle whose generation still matches the
//! slot's current generation, so a handle from a retired playback session can
//! never control a newer session that reused the same slot.

/// Bits reserved for the buffer index.
pub const BUFFER_INDEX_BITS: u32 = 8;

/// Bits reserved for the voice slot.
pub const VOICE_SLOT_BITS: u32 = 5;

/// Bits reserved for the voice generation counter.
pub const GENERATION_BITS: u32 = 19;

/// Largest supported buffer pool capacity.
pub const MAX_BUFFERS: usize = 1 << BUFFER_INDEX_BITS;

/// Largest supported voice table capacity.
pub const MAX_VOICES: usize = 1 << VOICE_SLOT_BITS;

/// Generation counters wrap at this value.
pub const GENERATION_PERIOD: u32 = 1 << GENERATION_BITS;

const BUFFER_MASK: u32 = (1 << BUFFER_INDEX_BITS) - 1;
const VOICE_MASK: u32 = (1 << VOICE_SLOT_BITS) - 1;
const GENERATION_MASK: u32 = GENERATION_PERIOD - 1;

const VOICE_SHIFT: u32 = BUFFER_INDEX_BITS;
const GENERATION_SHIFT: u32 = BUFFER_INDEX_BITS + VOICE_SLOT_BITS;

/// Opaque reference to a playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoundHandle(u32);

impl SoundHandle {
    /// Handle returned when a playback request fails.
    pub const INVALID: Self = Self(u32::MAX);

    /// Packs a buffer index, voice slot, and generation into a handle.
    ///
    /// The generation is masked so it wraps instead of overflowing into the
    /// other fields.
    #[must_use]
    pub fn pack(buffer_index: usize, voice_slot: usize, generation: u32) -> Self {
        debug_assert!(buffer_index < MAX_BUFFERS);
        debug_assert!(voice_slot < MAX_VOICES);

        let buffer = buffer_index as u32 & BUFFER_MASK;
        let voice = (voice_slot as u32 & VOICE_MASK) << VOICE_SHIFT;
        let generation = (generation & GENERATION_MASK) << GENERATION_SHIFT;
        Self(buffer | voice | generation)
    }

    /// Reconstructs a handle from its raw bit pattern.
    ///
    /// Total for any input; a garbage pattern simply decodes to fields that
    /// will fail the voice table's liveness check.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw bit pattern.
    #[must_use]
    pub const fn to_bits(self) -> u32 {
        self.0
    }

    /// Buffer pool index encoded in this handle.
    #[must_use]
    pub const fn buffer_index(self) -> usize {
        (self.0 & BUFFER_MASK) as usize
    }

    /// Voice slot encoded in this handle.
    #[must_use]
    pub const fn voice_slot(self) -> usize {
        ((self.0 >> VOICE_SHIFT) & VOICE_MASK) as usize
    }

    /// Voice generation encoded in this handle.
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> GENERATION_SHIFT) & GENERATION_MASK
    }

    /// Check if this is the invalid sentinel.
    #[must_use]
    pub const fn is_invalid(self) -> bool {
        self.0 == u32::MAX
    }

    /// Check if this handle may refer to a playback session.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        !self.is_invalid()
    }
}

impl Default for SoundHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_pack_round_trip() {
        let handle = SoundHandle::pack(17, 3, 1042);
        assert_eq!(handle.buffer_index(), 17);
        assert_eq!(handle.voice_slot(), 3);
        assert_eq!(handle.generation(), 1042);
    }

    #[test]
    fn test_field_extremes() {
        let handle = SoundHandle::pack(MAX_BUFFERS - 1, MAX_VOICES - 1, GENERATION_PERIOD - 1);
        assert_eq!(handle.buffer_index(), MAX_BUFFERS - 1);
        assert_eq!(handle.voice_slot(), MAX_VOICES - 1);
        assert_eq!(handle.generation(), GENERATION_PERIOD - 1);
    }

    #[test]
    fn test_generation_wraps_without_bleeding() {
        let handle = SoundHandle::pack(5, 2, GENERATION_PERIOD + 7);
        assert_eq!(handle.generation(), 7);
        assert_eq!(handle.buffer_index(), 5);
        assert_eq!(handle.voice_slot(), 2);
    }

    #[test]
    fn test_invalid_sentinel() {
        assert!(SoundHandle::INVALID.is_invalid());
        assert!(!SoundHandle::INVALID.is_valid());
        assert_eq!(SoundHandle::default(), SoundHandle::INVALID);
        assert!(SoundHandle::pack(0, 0, 0).is_valid());
    }

    #[test]
    fn test_decode_is_total() {
        // Any bit pattern decodes without panicking.
        for bits in [0u32, 1, 0xdead_beef, u32::MAX] {
            let handle = SoundHandle::from_bits(bits);
            let _ = (handle.buffer_index(), handle.voice_slot(), handle.generation());
            assert_eq!(handle.to_bits(), bits);
        }
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            buffer in 0..MAX_BUFFERS,
            voice in 0..MAX_VOICES,
            generation in 0..GENERATION_PERIOD,
        ) {
            let handle = SoundHandle::pack(buffer, voice, generation);
            prop_assert_eq!(handle.buffer_index(), buffer);
            prop_assert_eq!(handle.voice_slot(), voice);
            prop_assert_eq!(handle.generation(), generation);
        }
    }
}
