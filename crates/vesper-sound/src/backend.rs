//! Native audio output backend.
//!
//! The engine core never talks to the audio device directly; it drives a
//! [`SoundBackend`], a small object-safe trait covering exactly what the
//! voice/buffer manager needs: PCM upload per buffer slot, start/stop/pause
//! per voice slot, gain and pan get/set, and a playback state query for the
//! per-tick completion poll.
//!
//! [`RodioBackend`] is the production implementation, built on rodio with one
//! spatial sink per voice slot. Tests substitute a scriptable mock.
//!
//! Backends are treated as fallible at initialization and infallible per
//! call: a failed device or voice-pool setup disables the whole subsystem,
//! while per-call oddities are logged and swallowed. The one exception is
//! PCM upload, whose failure aborts that single playback request.

use std::sync::mpsc;
use std::thread;

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Source, SpatialSink};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::decoder::DecodeError;

/// Default reference distance for the 2D distance model, in world units.
pub const DEFAULT_REFERENCE_DISTANCE: f32 = 15.0;

/// Default maximum hearing distance for the 2D distance model.
pub const DEFAULT_MAX_DISTANCE: f32 = 200.0;

/// Half the distance between the virtual listener's ears.
const EAR_SPREAD: f32 = 1.0;

/// Forward offset of a 2D emitter from the listener, so panning never puts
/// the emitter on top of an ear.
const EMITTER_DEPTH: f32 = 1.0;

/// Sound subsystem error types.
#[derive(Debug, Error)]
pub enum SoundError {
    /// Failed to open the audio output device.
    #[error("failed to open audio output device: {0}")]
    DeviceInit(String),

    /// Failed to create the fixed pool of playback voices.
    #[error("failed to create playback voice pool: {0}")]
    VoicePoolInit(String),

    /// Failed to upload PCM data for a buffer slot.
    #[error("failed to upload sound data: {0}")]
    Upload(String),

    /// A voice was started against a buffer slot with no uploaded data.
    #[error("no sound data uploaded for buffer slot {0}")]
    BufferEmpty(usize),

    /// Sound data could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Result type for sound operations.
pub type SoundResult<T> = Result<T, SoundError>;

/// Playback state of a native voice, as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    /// The voice is rendering audio.
    Playing,
    /// The voice is paused mid-stream.
    Paused,
    /// The voice has finished or was never started.
    Stopped,
}

/// Uploaded PCM sample layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmFormat {
    /// 8-bit unsigned, one channel.
    Mono8,
    /// 8-bit unsigned, two interleaved channels.
    Stereo8,
    /// 16-bit signed little-endian, one channel.
    Mono16,
    /// 16-bit signed little-endian, two interleaved channels.
    Stereo16,
}

impl PcmFormat {
    /// Maps a caller-supplied bit depth and channel layout to a format.
    ///
    /// Unknown bit depths fall back to `Mono8`, matching the engine's
    /// historical behavior for malformed asset metadata.
    #[must_use]
    pub const fn from_info(bits_per_sample: u32, stereo: bool) -> Self {
        match (bits_per_sample, stereo) {
            (16, false) => Self::Mono16,
            (16, true) => Self::Stereo16,
            (8, true) => Self::Stereo8,
            _ => Self::Mono8,
        }
    }

    /// Number of interleaved channels.
    #[must_use]
    pub const fn channels(self) -> u16 {
        match self {
            Self::Mono8 | Self::Mono16 => 1,
            Self::Stereo8 | Self::Stereo16 => 2,
        }
    }
}

/// Configuration applied to a native voice when playback starts.
#[derive(Debug, Clone, Copy)]
pub struct VoiceStartParams {
    /// Final gain, already scaled by the global volume and clamped to 1.0.
    pub gain: f32,
    /// Stereo position, -1.0 (left) to 1.0 (right).
    pub pan: f32,
    /// Restart from the beginning on completion.
    pub looping: bool,
    /// Distance rolloff factor.
    pub rolloff_factor: f32,
    /// Distance at which attenuation begins.
    pub reference_distance: f32,
    /// Distance beyond which no further attenuation is applied.
    pub max_distance: f32,
}

impl Default for VoiceStartParams {
    fn default() -> Self {
        Self {
            gain: 1.0,
            pan: 0.0,
            looping: false,
            rolloff_factor: 1.0,
            reference_distance: DEFAULT_REFERENCE_DISTANCE,
            max_distance: DEFAULT_MAX_DISTANCE,
        }
    }
}

/// Interface to the native audio output.
///
/// Buffer and voice slots are the same small integers the pools hand out;
/// the backend owns whatever native objects stand behind them. All methods
/// are called with the engine lock held and must not block.
pub trait SoundBackend: Send {
    /// Stores decoded PCM for a buffer slot, replacing any previous data.
    fn upload(
        &mut self,
        buffer_slot: usize,
        pcm: &[u8],
        format: PcmFormat,
        sample_rate: u32,
    ) -> SoundResult<()>;

    /// Binds a voice to a buffer, applies `params`, and starts playback.
    fn start_voice(
        &mut self,
        voice_slot: usize,
        buffer_slot: usize,
        params: &VoiceStartParams,
    ) -> SoundResult<()>;

    /// Stops a voice and detaches its buffer.
    fn stop_voice(&mut self, voice_slot: usize);

    /// Pauses a voice, keeping its position.
    fn pause_voice(&mut self, voice_slot: usize);

    /// Resumes a paused voice.
    fn resume_voice(&mut self, voice_slot: usize);

    /// Sets a voice's gain.
    fn set_gain(&mut self, voice_slot: usize, gain: f32);

    /// Reads a voice's current gain.
    fn gain(&self, voice_slot: usize) -> f32;

    /// Sets a voice's stereo position.
    fn set_pan(&mut self, voice_slot: usize, pan: f32);

    /// Reports the native playback state of a voice.
    fn voice_state(&self, voice_slot: usize) -> VoiceState;
}

/// Decoded samples retained for one buffer slot.
#[derive(Debug, Clone)]
struct LoadedPcm {
    samples: Vec<i16>,
    channels: u16,
    sample_rate: u32,
}

/// Rodio-based backend: one spatial sink per voice slot.
///
/// The rodio output stream is not `Send`, so the device lives on a dedicated
/// keeper thread for the backend's lifetime; the stream handle and the sinks
/// are what cross threads. Dropping the backend signals the keeper, which
/// closes the device.
pub struct RodioBackend {
    voices: Vec<SpatialSink>,
    buffers: Vec<Option<LoadedPcm>>,
    // Dropped to release the output device.
    _shutdown: mpsc::Sender<()>,
}

impl std::fmt::Debug for RodioBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RodioBackend")
            .field("voices", &self.voices.len())
            .field("buffers", &self.buffers.len())
            .finish_non_exhaustive()
    }
}

impl RodioBackend {
    /// Opens the default output device and creates the fixed voice pool.
    pub fn new(buffer_capacity: usize, voice_capacity: usize) -> SoundResult<Self> {
        let (handle, shutdown) = spawn_device_keeper()?;

        let mut voices = Vec::with_capacity(voice_capacity);
        for _ in 0..voice_capacity {
            let sink = SpatialSink::try_new(
                &handle,
                [0.0, EMITTER_DEPTH, 0.0],
                [-EAR_SPREAD, 0.0, 0.0],
                [EAR_SPREAD, 0.0, 0.0],
            )
            .map_err(|e| SoundError::VoicePoolInit(e.to_string()))?;
            voices.push(sink);
        }

        info!(
            voices = voices.len(),
            buffers = buffer_capacity,
            "audio output initialized"
        );

        Ok(Self {
            voices,
            buffers: vec![None; buffer_capacity],
            _shutdown: shutdown,
        })
    }
}

impl SoundBackend for RodioBackend {
    fn upload(
        &mut self,
        buffer_slot: usize,
        pcm: &[u8],
        format: PcmFormat,
        sample_rate: u32,
    ) -> SoundResult<()> {
        let samples = match format {
            PcmFormat::Mono8 | PcmFormat::Stereo8 => pcm
                .iter()
                .map(|&byte| (i16::from(byte) - 128) << 8)
                .collect(),
            PcmFormat::Mono16 | PcmFormat::Stereo16 => {
                if pcm.len() % 2 != 0 {
                    return Err(SoundError::Upload(format!(
                        "odd byte count {} for 16-bit data",
                        pcm.len()
                    )));
                }
                pcm.chunks_exact(2)
                    .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                    .collect()
            },
        };

        self.buffers[buffer_slot] = Some(LoadedPcm {
            samples,
            channels: format.channels(),
            sample_rate,
        });
        Ok(())
    }

    fn start_voice(
        &mut self,
        voice_slot: usize,
        buffer_slot: usize,
        params: &VoiceStartParams,
    ) -> SoundResult<()> {
        let pcm = self.buffers[buffer_slot]
            .as_ref()
            .ok_or(SoundError::BufferEmpty(buffer_slot))?;

        // Rodio's ear model has no rolloff/reference/max distance knobs; the
        // emitter offset below is the whole 2D model.
        if (params.reference_distance - DEFAULT_REFERENCE_DISTANCE).abs() > f32::EPSILON {
            debug!(
                reference_distance = params.reference_distance,
                "distance model parameters are not supported by this backend"
            );
        }

        let sink = &self.voices[voice_slot];
        sink.stop();
        sink.set_emitter_position([params.pan, EMITTER_DEPTH, 0.0]);
        sink.set_volume(params.gain);

        let source = SamplesBuffer::new(pcm.channels, pcm.sample_rate, pcm.samples.clone());
        if params.looping {
            sink.append(source.repeat_infinite());
        } else {
            sink.append(source);
        }
        sink.play();

        Ok(())
    }

    fn stop_voice(&mut self, voice_slot: usize) {
        self.voices[voice_slot].stop();
    }

    fn pause_voice(&mut self, voice_slot: usize) {
        self.voices[voice_slot].pause();
    }

    fn resume_voice(&mut self, voice_slot: usize) {
        self.voices[voice_slot].play();
    }

    fn set_gain(&mut self, voice_slot: usize, gain: f32) {
        self.voices[voice_slot].set_volume(gain);
    }

    fn gain(&self, voice_slot: usize) -> f32 {
        self.voices[voice_slot].volume()
    }

    fn set_pan(&mut self, voice_slot: usize, pan: f32) {
        self.voices[voice_slot].set_emitter_position([pan, EMITTER_DEPTH, 0.0]);
    }

    fn voice_state(&self, voice_slot: usize) -> VoiceState {
        let sink = &self.voices[voice_slot];
        if sink.empty() {
            VoiceState::Stopped
        } else if sink.is_paused() {
            VoiceState::Paused
        } else {
            VoiceState::Playing
        }
    }
}

/// Parks the rodio output stream on its own thread and hands back the
/// `Send` stream handle plus the channel whose closure shuts the device down.
fn spawn_device_keeper() -> SoundResult<(OutputStreamHandle, mpsc::Sender<()>)> {
    let (init_tx, init_rx) = mpsc::channel();
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    thread::Builder::new()
        .name("vesper-sound-device".into())
        .spawn(move || match OutputStream::try_default() {
            Ok((stream, handle)) => {
                if init_tx.send(Ok(handle)).is_ok() {
                    let _stream = stream;
                    // Blocks until the backend drops its sender.
                    let _ = shutdown_rx.recv();
                    debug!("audio output device released");
                }
            },
            Err(e) => {
                warn!("no audio output device: {e}");
                let _ = init_tx.send(Err(SoundError::DeviceInit(e.to_string())));
            },
        })
        .map_err(|e| SoundError::DeviceInit(e.to_string()))?;

    let handle = init_rx
        .recv()
        .map_err(|_| SoundError::DeviceInit("audio device thread exited".into()))??;
    Ok((handle, shutdown_tx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_format_from_info() {
        assert_eq!(PcmFormat::from_info(8, false), PcmFormat::Mono8);
        assert_eq!(PcmFormat::from_info(8, true), PcmFormat::Stereo8);
        assert_eq!(PcmFormat::from_info(16, false), PcmFormat::Mono16);
        assert_eq!(PcmFormat::from_info(16, true), PcmFormat::Stereo16);
        // Malformed bit depths fall back to mono 8-bit.
        assert_eq!(PcmFormat::from_info(12, true), PcmFormat::Mono8);
        assert_eq!(PcmFormat::from_info(0, false), PcmFormat::Mono8);
    }

    #[test]
    fn test_pcm_format_channels() {
        assert_eq!(PcmFormat::Mono8.channels(), 1);
        assert_eq!(PcmFormat::Stereo8.channels(), 2);
        assert_eq!(PcmFormat::Mono16.channels(), 1);
        assert_eq!(PcmFormat::Stereo16.channels(), 2);
    }

    #[test]
    fn test_voice_start_params_defaults() {
        let params = VoiceStartParams::default();
        assert!((params.gain - 1.0).abs() < f32::EPSILON);
        assert!((params.pan - 0.0).abs() < f32::EPSILON);
        assert!(!params.looping);
        assert!((params.reference_distance - DEFAULT_REFERENCE_DISTANCE).abs() < f32::EPSILON);
        assert!((params.max_distance - DEFAULT_MAX_DISTANCE).abs() < f32::EPSILON);
    }
}
