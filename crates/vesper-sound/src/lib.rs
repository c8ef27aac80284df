//! # Vesper Sound
//!
//! Voice and buffer resource management for the Vesper engine's sound
//! subsystem. This crate owns the hard part of playing game audio: mapping
//! named sound assets onto a bounded pool of decoded buffers, mapping live
//! playback requests onto a bounded table of hardware voices, and keeping
//! both consistent while a simulation thread and an update thread call in
//! concurrently.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         SoundEngine                          │
//! │   ┌────────────┐   ┌────────────┐   ┌────────────────────┐   │
//! │   │ BufferPool │   │ VoiceTable │   │   SoundBackend     │   │
//! │   │ (LRU cache)│   │ (handles)  │   │   (rodio / mock)   │   │
//! │   └────────────┘   └────────────┘   └────────────────────┘   │
//! │          └───────── one engine-wide lock ─────────┘          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! - Buffers cache decoded PCM by asset name; when the pool is full, the
//!   least recently used *unreferenced* buffer is evicted. A buffer that a
//!   voice still renders is never evicted, no matter how old.
//! - Voices are handed out as packed [`SoundHandle`]s carrying a generation
//!   counter, so a handle from a finished session can never control the
//!   session that reused its slot.
//! - [`SoundEngine::tick`] polls the backend once per frame, retires voices
//!   that finished on their own, and fires the completion callback.
//!
//! ## Quick start
//!
//! ```ignore
//! use vesper_sound::prelude::*;
//!
//! let engine = SoundEngine::new_or_disabled(SoundConfig::default());
//!
//! let info = SoundInfo::default().with_volume(0.9).with_user_tag(42);
//! let handle = engine.play("explosion", &pcm, SoundFormat::Raw, &info, false);
//!
//! // Each frame:
//! engine.tick();
//!
//! engine.stop(handle);
//! ```
//!
//! Exhaustion is never fatal: when every buffer is referenced or every voice
//! is busy, `play` returns [`SoundHandle::INVALID`] and the caller decides
//! whether to retry next frame.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod backend;
pub mod buffer_pool;
pub mod decoder;
pub mod engine;
pub mod handle;
pub mod voice;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::backend::{
        PcmFormat, RodioBackend, SoundBackend, SoundError, SoundResult, VoiceStartParams,
        VoiceState,
    };
    pub use crate::decoder::{DecodeError, SoundFormat};
    pub use crate::engine::{CompletionCallback, SoundConfig, SoundEngine, SoundInfo};
    pub use crate::handle::{SoundHandle, MAX_BUFFERS, MAX_VOICES};
}

pub use prelude::*;
