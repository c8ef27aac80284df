//! The sound engine: playback orchestration over the buffer and voice pools.
//!
//! [`SoundEngine`] owns all mutable subsystem state behind a single
//! `parking_lot::Mutex`. Every public operation takes the lock for its full
//! duration, so a play/allocate/configure sequence is atomic with respect to
//! a concurrent [`tick`](SoundEngine::tick) or a concurrent play/stop from
//! another thread. Nothing blocks waiting for a resource: buffer and voice
//! exhaustion fail the request immediately and the caller decides whether to
//! retry next frame.
//!
//! Stale handles are never errors. A sound may finish between a caller's
//! decision and its next call, so every operation silently ignores handles
//! whose generation no longer matches.
//!
//! # Shutdown
//!
//! Dropping the engine releases the native voice pool and the output device.

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::backend::{
    PcmFormat, RodioBackend, SoundBackend, SoundResult, VoiceStartParams, VoiceState,
};
use crate::buffer_pool::BufferPool;
use crate::decoder::{self, SoundFormat};
use crate::handle::{SoundHandle, MAX_BUFFERS, MAX_VOICES};
use crate::voice::VoiceTable;

/// Headroom factor folded into every global volume value.
const GLOBAL_VOLUME_HEADROOM: f32 = 0.80;

/// VOC assets have always been played at triple their container rate.
const VOC_RATE_MULTIPLIER: u32 = 3;

/// Completion notification, carrying the `user_tag` from [`SoundInfo`].
pub type CompletionCallback = Box<dyn FnMut(u32) + Send>;

/// Sound engine configuration.
#[derive(Debug, Clone)]
pub struct SoundConfig {
    /// Buffer pool capacity; clamped to [1, 256].
    pub buffer_capacity: usize,
    /// Voice table capacity; clamped to [1, 32].
    pub voice_capacity: usize,
    /// Initial global volume (0.0-1.0).
    pub global_volume: f32,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: MAX_BUFFERS,
            voice_capacity: MAX_VOICES,
            global_volume: 1.0,
        }
    }
}

impl SoundConfig {
    /// Create config with a buffer pool capacity.
    #[must_use]
    pub const fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Create config with a voice table capacity.
    #[must_use]
    pub const fn with_voice_capacity(mut self, capacity: usize) -> Self {
        self.voice_capacity = capacity;
        self
    }

    /// Create config with an initial global volume.
    #[must_use]
    pub const fn with_global_volume(mut self, volume: f32) -> Self {
        self.global_volume = volume;
        self
    }
}

/// Per-request playback parameters.
#[derive(Debug, Clone, Copy)]
pub struct SoundInfo {
    /// Requested volume (0.0-1.0), scaled by the global volume.
    pub volume: f32,
    /// Stereo position, -1.0 (left) to 1.0 (right).
    pub pan: f32,
    /// Sample rate of raw PCM data; ignored for self-describing containers.
    pub sampling_rate: u32,
    /// Bit depth of the sample data (8 or 16).
    pub bits_per_sample: u32,
    /// Two interleaved channels instead of one.
    pub stereo: bool,
    /// Opaque value handed back through the completion callback.
    pub user_tag: u32,
}

impl Default for SoundInfo {
    fn default() -> Self {
        Self {
            volume: 1.0,
            pan: 0.0,
            sampling_rate: 11_025,
            bits_per_sample: 8,
            stereo: false,
            user_tag: 0,
        }
    }
}

impl SoundInfo {
    /// Create info with a volume.
    #[must_use]
    pub const fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    /// Create info with a stereo position.
    #[must_use]
    pub const fn with_pan(mut self, pan: f32) -> Self {
        self.pan = pan;
        self
    }

    /// Create info with a raw PCM sample rate.
    #[must_use]
    pub const fn with_sampling_rate(mut self, rate: u32) -> Self {
        self.sampling_rate = rate;
        self
    }

    /// Create info with a user tag.
    #[must_use]
    pub const fn with_user_tag(mut self, tag: u32) -> Self {
        self.user_tag = tag;
        self
    }
}

/// Everything the engine lock protects.
struct EngineState {
    backend: Box<dyn SoundBackend>,
    buffers: BufferPool,
    voices: VoiceTable,
    current_tick: u64,
    global_volume: f32,
    callback: Option<CompletionCallback>,
}

impl EngineState {
    /// Resolves a handle to its voice slot, if the session is still live.
    fn live(&self, handle: SoundHandle) -> Option<usize> {
        if handle.is_invalid() {
            return None;
        }
        let slot = handle.voice_slot();
        self.voices
            .is_live(slot, handle.buffer_index(), handle.generation())
            .then_some(slot)
    }

    /// Forcibly stops every voice and zeroes every reference count.
    fn stop_everything(&mut self) {
        for slot in 0..self.voices.capacity() {
            self.backend.stop_voice(slot);
            let voice = self.voices.voice_mut(slot);
            voice.retire();
            voice.buffer_index = 0;
        }
        self.buffers.reset_ref_counts();
    }
}

/// The sound subsystem's public face.
///
/// Cheap to share across threads (`&self` API, internal lock). A typical
/// setup has the simulation thread issuing `play`/`stop`/volume calls while
/// an update thread calls [`tick`](Self::tick) once per frame.
pub struct SoundEngine {
    // `None` when the subsystem is disabled (device init failed).
    state: Option<Mutex<EngineState>>,
}

impl std::fmt::Debug for SoundEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundEngine")
            .field("enabled", &self.state.is_some())
            .finish_non_exhaustive()
    }
}

impl SoundEngine {
    /// Creates an engine backed by the default audio output device.
    pub fn new(config: SoundConfig) -> SoundResult<Self> {
        let buffer_capacity = config.buffer_capacity.clamp(1, MAX_BUFFERS);
        let voice_capacity = config.voice_capacity.clamp(1, MAX_VOICES);
        let backend = RodioBackend::new(buffer_capacity, voice_capacity)?;
        Ok(Self::with_backend(config, Box::new(backend)))
    }

    /// Creates an engine, or a disabled one if the audio device is missing.
    ///
    /// This is the lenient constructor for game startup: a machine without
    /// audio output gets a fully functional no-op subsystem instead of an
    /// error.
    #[must_use]
    pub fn new_or_disabled(config: SoundConfig) -> Self {
        match Self::new(config) {
            Ok(engine) => engine,
            Err(e) => {
                error!("sound disabled: {e}");
                Self::disabled()
            },
        }
    }

    /// Creates an engine over an explicit backend.
    #[must_use]
    pub fn with_backend(config: SoundConfig, backend: Box<dyn SoundBackend>) -> Self {
        let buffer_capacity = config.buffer_capacity.clamp(1, MAX_BUFFERS);
        let voice_capacity = config.voice_capacity.clamp(1, MAX_VOICES);

        info!(
            buffers = buffer_capacity,
            voices = voice_capacity,
            "sound system initialized"
        );

        Self {
            state: Some(Mutex::new(EngineState {
                backend,
                buffers: BufferPool::new(buffer_capacity),
                voices: VoiceTable::new(voice_capacity),
                current_tick: 1,
                global_volume: config.global_volume * GLOBAL_VOLUME_HEADROOM,
                callback: None,
            })),
        }
    }

    /// Creates a permanently disabled engine; every operation is a no-op.
    #[must_use]
    pub fn disabled() -> Self {
        Self { state: None }
    }

    /// Check whether the subsystem is live (device initialization succeeded).
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state.is_some()
    }

    /// Sets the completion callback invoked when a voice finishes naturally.
    ///
    /// The callback runs synchronously inside [`tick`](Self::tick) with the
    /// engine lock held: it must not call back into the engine, or it will
    /// deadlock.
    pub fn set_completion_callback<F>(&self, callback: F)
    where
        F: FnMut(u32) + Send + 'static,
    {
        if let Some(state) = &self.state {
            state.lock().callback = Some(Box::new(callback));
        }
    }

    /// Starts playing a named sound.
    ///
    /// The buffer pool is consulted first: a cache hit skips decoding
    /// entirely, otherwise `data` is decoded and uploaded into the claimed
    /// slot. Returns [`SoundHandle::INVALID`] when the buffer pool or voice
    /// table is exhausted, or when the data cannot be decoded or uploaded;
    /// the request is dropped, never queued.
    pub fn play(
        &self,
        name: &str,
        data: &[u8],
        format: SoundFormat,
        info: &SoundInfo,
        looping: bool,
    ) -> SoundHandle {
        let Some(state) = &self.state else {
            return SoundHandle::INVALID;
        };
        let mut guard = state.lock();
        let state = &mut *guard;

        let Some(buffer_index) = state.buffers.acquire(name) else {
            return SoundHandle::INVALID;
        };

        if !state.buffers.slot(buffer_index).is_loaded() {
            let decoded = match decoder::decode(data, format) {
                Ok(decoded) => decoded,
                Err(e) => {
                    error!(name, "cannot decode sound: {e}");
                    state.buffers.rollback(buffer_index);
                    return SoundHandle::INVALID;
                },
            };

            let pcm_format = PcmFormat::from_info(info.bits_per_sample, info.stereo);
            let sample_rate = match decoded.sample_rate {
                Some(rate) => rate * VOC_RATE_MULTIPLIER,
                None => info.sampling_rate,
            };

            if let Err(e) = state
                .backend
                .upload(buffer_index, &decoded.pcm, pcm_format, sample_rate)
            {
                error!(name, "sound has invalid data: {e}");
                state.buffers.rollback(buffer_index);
                return SoundHandle::INVALID;
            }
            state.buffers.mark_loaded(buffer_index);
        }

        // Buffer stays cached for the next caller if no voice is free.
        let Some(voice_slot) = state.voices.allocate(buffer_index) else {
            return SoundHandle::INVALID;
        };

        let params = VoiceStartParams {
            gain: (info.volume * state.global_volume).min(1.0),
            pan: info.pan,
            looping,
            ..VoiceStartParams::default()
        };
        if let Err(e) = state.backend.start_voice(voice_slot, buffer_index, &params) {
            error!(name, "cannot play sound: {e}");
            state.voices.voice_mut(voice_slot).retire();
            return SoundHandle::INVALID;
        }

        let generation = {
            let voice = state.voices.voice_mut(voice_slot);
            voice.playing = true;
            voice.looping = looping;
            voice.user_tag = info.user_tag;
            voice.generation
        };
        state.buffers.add_ref(buffer_index);
        let tick = state.current_tick;
        state.buffers.touch(buffer_index, tick);

        debug!(name, voice_slot, buffer_index, "sound started");
        SoundHandle::pack(buffer_index, voice_slot, generation)
    }

    /// Starts playing a named sound on a loop.
    pub fn play_looping(
        &self,
        name: &str,
        data: &[u8],
        format: SoundFormat,
        info: &SoundInfo,
    ) -> SoundHandle {
        self.play(name, data, format, info, true)
    }

    /// Fire-and-forget playback; reports only whether the sound started.
    pub fn play_one_shot(
        &self,
        name: &str,
        data: &[u8],
        format: SoundFormat,
        info: &SoundInfo,
    ) -> bool {
        self.play(name, data, format, info, false).is_valid()
    }

    /// Stops a playing sound.
    ///
    /// The voice stays bound to its session (queries keep answering for the
    /// handle) but becomes eligible for reallocation. Pausing first makes
    /// this a no-op; so does a stale handle.
    pub fn stop(&self, handle: SoundHandle) {
        let Some(state) = &self.state else { return };
        let mut guard = state.lock();
        let state = &mut *guard;

        let Some(slot) = state.live(handle) else { return };
        if !state.voices.voice(slot).playing {
            return;
        }

        state.backend.stop_voice(slot);
        let voice = state.voices.voice_mut(slot);
        voice.playing = false;
        voice.looping = false;
        voice.paused = false;
        state.buffers.release(handle.buffer_index());
    }

    /// Pauses a playing sound.
    pub fn pause(&self, handle: SoundHandle) {
        let Some(state) = &self.state else { return };
        let mut guard = state.lock();
        let state = &mut *guard;

        let Some(slot) = state.live(handle) else { return };
        if !state.voices.voice(slot).playing {
            return;
        }

        state.backend.pause_voice(slot);
        let voice = state.voices.voice_mut(slot);
        voice.playing = false;
        voice.paused = true;
        let tick = state.current_tick;
        state.buffers.touch(handle.buffer_index(), tick);
    }

    /// Resumes a paused sound.
    pub fn resume(&self, handle: SoundHandle) {
        let Some(state) = &self.state else { return };
        let mut guard = state.lock();
        let state = &mut *guard;

        let Some(slot) = state.live(handle) else { return };
        if !state.voices.voice(slot).paused {
            return;
        }

        state.backend.resume_voice(slot);
        let voice = state.voices.voice_mut(slot);
        voice.playing = true;
        voice.paused = false;
        let tick = state.current_tick;
        state.buffers.touch(handle.buffer_index(), tick);
    }

    /// Sets a sound's volume, scaled by the global volume and clamped to 1.0.
    pub fn set_volume(&self, handle: SoundHandle, volume: f32) {
        let Some(state) = &self.state else { return };
        let mut guard = state.lock();
        let state = &mut *guard;

        let Some(slot) = state.live(handle) else { return };
        let gain = (volume * state.global_volume).min(1.0);
        state.backend.set_gain(slot, gain);
        let tick = state.current_tick;
        state.buffers.touch(handle.buffer_index(), tick);
    }

    /// Sets a sound's stereo position.
    pub fn set_pan(&self, handle: SoundHandle, pan: f32) {
        let Some(state) = &self.state else { return };
        let mut guard = state.lock();
        let state = &mut *guard;

        let Some(slot) = state.live(handle) else { return };
        state.backend.set_pan(slot, pan);
        let tick = state.current_tick;
        state.buffers.touch(handle.buffer_index(), tick);
    }

    /// Rescales every active voice's gain to the new global volume.
    ///
    /// Each voice's *current* gain is multiplied by `new / old` and clamped
    /// to 1.0. The originally requested per-voice volume is not retained, so
    /// repeated changes compound multiplicatively: once a clamp kicks in,
    /// the pre-clamp gain is lost for good. Known-lossy, kept for parity
    /// with the original engine.
    pub fn set_global_volume(&self, volume: f32) {
        let Some(state) = &self.state else { return };
        let volume = volume * GLOBAL_VOLUME_HEADROOM;
        let mut guard = state.lock();
        let state = &mut *guard;

        if (volume - state.global_volume).abs() < f32::EPSILON {
            return;
        }

        let scale = if state.global_volume > 0.0 {
            volume / state.global_volume
        } else {
            1.0
        };

        let voices = &state.voices;
        let backend = &mut state.backend;
        for (slot, voice) in voices.iter() {
            if voice.active {
                let gain = (backend.gain(slot) * scale).min(1.0);
                backend.set_gain(slot, gain);
            }
        }

        state.global_volume = volume;
    }

    /// Check whether a handle still refers to a live playback session.
    #[must_use]
    pub fn is_active(&self, handle: SoundHandle) -> bool {
        let Some(state) = &self.state else {
            return false;
        };
        state.lock().live(handle).is_some()
    }

    /// Check whether a handle's sound is currently playing.
    #[must_use]
    pub fn is_playing(&self, handle: SoundHandle) -> bool {
        let Some(state) = &self.state else {
            return false;
        };
        let state = state.lock();
        state
            .live(handle)
            .is_some_and(|slot| state.voices.voice(slot).playing)
    }

    /// Check whether a handle's sound is looping.
    #[must_use]
    pub fn is_looping(&self, handle: SoundHandle) -> bool {
        let Some(state) = &self.state else {
            return false;
        };
        let state = state.lock();
        state
            .live(handle)
            .is_some_and(|slot| state.voices.voice(slot).looping)
    }

    /// Number of voices currently playing.
    #[must_use]
    pub fn active_voice_count(&self) -> usize {
        let Some(state) = &self.state else { return 0 };
        state.lock().voices.playing_count()
    }

    /// Polls every playing voice and retires the ones that finished.
    ///
    /// Call once per frame, from one place (not once per caller). A voice
    /// whose native state reports stopped while still flagged playing
    /// finished naturally (an explicit [`stop`](Self::stop) clears the flag
    /// first): the completion callback fires with its user tag, the bound
    /// buffer's reference count drops, and the voice is retired. Also
    /// advances the recency clock exactly once.
    pub fn tick(&self) {
        let Some(state) = &self.state else { return };
        let mut guard = state.lock();
        let state = &mut *guard;

        for slot in 0..state.voices.capacity() {
            if !state.voices.voice(slot).playing {
                continue;
            }

            let native = state.backend.voice_state(slot);
            if native == VoiceState::Stopped {
                let (buffer_index, user_tag) = {
                    let voice = state.voices.voice(slot);
                    (voice.buffer_index, voice.user_tag)
                };
                if let Some(callback) = state.callback.as_mut() {
                    callback(user_tag);
                }
                state.buffers.release(buffer_index);
                state.voices.voice_mut(slot).retire();
                debug!(slot, buffer_index, "voice finished");
            } else if native != VoiceState::Paused && state.voices.voice(slot).paused {
                // Resync a paused flag the backend no longer agrees with.
                state.voices.voice_mut(slot).paused = false;
            }
        }

        state.current_tick += 1;
    }

    /// Forcibly stops every voice and zeroes every buffer reference count.
    pub fn stop_all(&self) {
        let Some(state) = &self.state else { return };
        state.lock().stop_everything();
    }

    /// Hard reset for scene transitions: [`stop_all`](Self::stop_all) plus
    /// dropping every cached buffer.
    pub fn reset_all(&self) {
        let Some(state) = &self.state else { return };
        let mut state = state.lock();
        state.stop_everything();
        state.buffers.clear();
    }

    #[cfg(test)]
    fn buffer_ref_count(&self, name: &str) -> Option<i32> {
        let state = self.state.as_ref()?.lock();
        let index = state.buffers.find(name)?;
        Some(state.buffers.slot(index).ref_count)
    }
}
