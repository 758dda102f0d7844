//! Audio backend implementations
//!
//! Platform-independent abstraction over the library that actually decodes,
//! mixes and spatializes. The pool only asks a backend for voices and
//! buffers and pokes voice parameters; everything audible happens behind
//! this trait.

pub mod headless;
#[cfg(feature = "rodio")]
pub mod rodio_backend;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

use crate::audio::AudioError;
use crate::config::Config;
use crate::foundation::math::Vec2;

new_key_type! {
    /// Handle to one backend playback voice.
    ///
    /// Keys are generational: a released id never aliases a later voice.
    pub struct VoiceId;

    /// Handle to one decoded buffer held by a backend
    pub struct BufferId;
}

/// Decoded sample data owned by a backend, shared through the pool's cache
#[derive(Debug)]
pub struct SampleBuffer {
    id: BufferId,
    path: PathBuf,
    channels: u16,
    duration: Option<f32>,
}

impl SampleBuffer {
    /// Describe a buffer the backend has decoded
    pub fn new(id: BufferId, path: PathBuf, channels: u16, duration: Option<f32>) -> Self {
        Self { id, path, channels, duration }
    }

    /// Backend-side identifier
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// File the buffer was decoded from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of interleaved channels
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Length in seconds, if the decoder knows it
    pub fn duration(&self) -> Option<f32> {
        self.duration
    }
}

/// Shared handle to a cached buffer
pub type BufferHandle = Arc<SampleBuffer>;

/// Completion notification raised by a backend, possibly from its own thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceEvent {
    /// The voice stopped producing sound (reached the end or was stopped)
    Stopped(VoiceId),
    /// The backend dropped the voice; the id is dead from now on
    Released(VoiceId),
}

impl VoiceEvent {
    /// Voice the event refers to
    pub fn voice(&self) -> VoiceId {
        match *self {
            Self::Stopped(voice) | Self::Released(voice) => voice,
        }
    }
}

/// Sending half of the pool's notification queue.
///
/// Sending never blocks and never touches pool state, so backends may call
/// it from their mixing thread or from inside `stop`/`release_voice`.
#[derive(Debug, Clone)]
pub struct VoiceEventSender {
    tx: Sender<VoiceEvent>,
}

impl VoiceEventSender {
    pub(crate) fn new(tx: Sender<VoiceEvent>) -> Self {
        Self { tx }
    }

    /// Queue a notification for the owning thread
    pub fn send(&self, event: VoiceEvent) {
        if self.tx.send(event).is_err() {
            log::trace!("Voice event {:?} dropped, pool is gone", event);
        }
    }
}

/// Spatial parameters for one voice
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialParams {
    /// Emitter position (ignored when relative)
    pub position: Vec2,
    /// Emitter velocity, for doppler
    pub velocity: Vec2,
    /// Rolloff factor of the inverse distance model
    pub rolloff: f32,
    /// Distance below which there is no attenuation
    pub min_distance: f32,
    /// Distance beyond which attenuation stops growing
    pub max_distance: f32,
    /// Listener-relative, zero-distance playback (2D sounds)
    pub relative: bool,
}

impl SpatialParams {
    /// Listener-relative placement used for 2D sounds
    pub fn relative() -> Self {
        Self {
            position: Vec2::zeros(),
            velocity: Vec2::zeros(),
            rolloff: 1.0,
            min_distance: 1.0,
            max_distance: f32::MAX,
            relative: true,
        }
    }

    /// World-space placement used for 3D sounds
    pub fn world(
        position: Vec2,
        velocity: Vec2,
        rolloff: f32,
        min_distance: f32,
        max_distance: f32,
    ) -> Self {
        Self {
            position,
            velocity,
            rolloff,
            min_distance,
            max_distance,
            relative: false,
        }
    }
}

impl Default for SpatialParams {
    fn default() -> Self {
        Self::relative()
    }
}

/// Kind of voice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceKind {
    /// Plays a cached, fully decoded buffer
    Static,
    /// Decodes incrementally from a file
    Stream,
}

/// Diagnostic snapshot of one voice
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceInfo {
    /// Static or streaming
    pub kind: VoiceKind,
    /// Current spatial parameters
    pub spatial: SpatialParams,
    /// Voice volume before attenuation
    pub volume: f32,
    /// Pitch multiplier
    pub pitch: f32,
    /// Attenuated gain as heard by the listener
    pub gain: f32,
    /// Playback position in seconds
    pub current_time: f32,
    /// Total length in seconds, if known
    pub total_time: Option<f32>,
    /// Looping flag
    pub looping: bool,
    /// Currently producing sound
    pub playing: bool,
}

/// Audio backend trait for platform abstraction
///
/// # Threading
/// Backends are shared between the owning thread and their own mixing
/// thread, so every method takes `&self` and implementations synchronize
/// internally. Completion is reported through the [`VoiceEventSender`]
/// installed with [`AudioBackend::set_event_sender`]; a backend must never
/// call back into the pool directly.
pub trait AudioBackend: Send + Sync {
    /// Initialize the audio backend
    fn initialize(&self, config: &AudioBackendConfig) -> Result<(), AudioError>;

    /// Shutdown the audio backend, dropping every voice and buffer
    fn shutdown(&self);

    /// Check if backend is initialized
    fn is_initialized(&self) -> bool;

    /// Install the queue completion notifications go to
    fn set_event_sender(&self, sender: VoiceEventSender);

    /// Move the listener
    fn set_listener(&self, position: Vec2, velocity: Vec2);

    /// Create a voice that will play a cached buffer
    fn create_static_voice(&self) -> Result<VoiceId, AudioError>;

    /// Open a streaming voice reading from `path`
    fn create_stream_voice(&self, path: &Path) -> Result<VoiceId, AudioError>;

    /// Decode `path` into a buffer
    fn create_buffer(&self, path: &Path) -> Result<BufferHandle, AudioError>;

    /// Free a buffer's decoded data
    fn release_buffer(&self, buffer: &SampleBuffer);

    /// Attach a buffer to a static voice
    fn bind_buffer(&self, voice: VoiceId, buffer: &BufferHandle) -> Result<(), AudioError>;

    /// Drop a voice; its id becomes invalid
    fn release_voice(&self, voice: VoiceId);

    /// Drop every voice
    fn release_all_voices(&self);

    /// Start playback
    fn play(&self, voice: VoiceId, looping: bool) -> Result<(), AudioError>;

    /// Stop playback and rewind
    fn stop(&self, voice: VoiceId) -> Result<(), AudioError>;

    /// Jump to a position in seconds
    fn seek(&self, voice: VoiceId, seconds: f32) -> Result<(), AudioError>;

    /// Set voice volume (before distance attenuation)
    fn set_volume(&self, voice: VoiceId, volume: f32) -> Result<(), AudioError>;

    /// Get voice volume
    fn volume(&self, voice: VoiceId) -> Result<f32, AudioError>;

    /// Set pitch multiplier
    fn set_pitch(&self, voice: VoiceId, pitch: f32) -> Result<(), AudioError>;

    /// Change looping on a live voice
    fn set_looping(&self, voice: VoiceId, looping: bool) -> Result<(), AudioError>;

    /// Set position, velocity and attenuation parameters
    fn set_spatial(&self, voice: VoiceId, params: &SpatialParams) -> Result<(), AudioError>;

    /// Check if a voice is producing sound
    fn is_playing(&self, voice: VoiceId) -> bool;

    /// Playback position in seconds
    fn current_time(&self, voice: VoiceId) -> Result<f32, AudioError>;

    /// Volume after distance attenuation, as heard by the listener
    fn calculate_gain(&self, voice: VoiceId) -> Result<f32, AudioError>;

    /// Diagnostic snapshot
    fn voice_info(&self, voice: VoiceId) -> Option<VoiceInfo>;
}

/// Configuration for audio backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioBackendConfig {
    /// Sample rate (e.g., 44100, 48000)
    pub sample_rate: u32,
    /// Number of output channels (1=mono, 2=stereo)
    pub channels: u16,
    /// Buffer size for audio processing
    pub buffer_size: usize,
    /// Speed of sound in world units per second, for doppler
    pub speed_of_sound: f32,
    /// Doppler exaggeration factor
    pub doppler_factor: f32,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            buffer_size: 4096,
            speed_of_sound: 5000.0,
            doppler_factor: 1.0,
        }
    }
}

impl Config for AudioBackendConfig {}

/// Constructor the pool uses to (re)create its backend on `init`
pub type BackendFactory =
    Box<dyn Fn(&AudioBackendConfig) -> Result<Arc<dyn AudioBackend>, AudioError> + Send + Sync>;

/// Create the default audio backend for the platform
///
/// With the `rodio` feature this opens the default output device; otherwise
/// a [`headless::HeadlessBackend`] is returned.
pub fn create_backend(config: &AudioBackendConfig) -> Result<Arc<dyn AudioBackend>, AudioError> {
    #[cfg(feature = "rodio")]
    let backend = rodio_backend::RodioBackend::new();
    #[cfg(not(feature = "rodio"))]
    let backend = headless::HeadlessBackend::new();

    backend.initialize(config)?;
    Ok(Arc::new(backend))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use slotmap::SlotMap;

    #[test]
    fn test_event_voice() {
        let mut ids: SlotMap<VoiceId, ()> = SlotMap::with_key();
        let voice = ids.insert(());
        assert_eq!(VoiceEvent::Stopped(voice).voice(), voice);
        assert_eq!(VoiceEvent::Released(voice).voice(), voice);
    }

    #[test]
    fn test_sender_after_receiver_dropped() {
        let (tx, rx) = unbounded();
        let sender = VoiceEventSender::new(tx);
        drop(rx);
        // Must not panic
        sender.send(VoiceEvent::Stopped(VoiceId::default()));
    }

    #[test]
    fn test_relative_params() {
        let params = SpatialParams::relative();
        assert!(params.relative);
        assert_eq!(params.position, Vec2::zeros());
        assert_eq!(params.rolloff, 1.0);
    }

    #[test]
    fn test_default_backend() {
        let backend = create_backend(&AudioBackendConfig::default());
        // May fail in CI/test environments without audio device
        if let Ok(backend) = backend {
            assert!(backend.is_initialized());
            backend.shutdown();
            assert!(!backend.is_initialized());
        }
    }
}
