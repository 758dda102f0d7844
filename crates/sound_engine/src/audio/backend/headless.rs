//! Headless audio backend
//!
//! Simulates voices without touching an audio device: playback position
//! advances when [`HeadlessBackend::advance`] is called, clips end after
//! their length, and completion is reported through the installed
//! [`VoiceEventSender`] like a real mixing thread would. Used on servers,
//! in CI and by the test suite.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use slotmap::SlotMap;

use super::{
    AudioBackend, AudioBackendConfig, BufferHandle, BufferId, SampleBuffer, SpatialParams,
    VoiceEvent,
    VoiceEventSender, VoiceId, VoiceInfo, VoiceKind,
};
use crate::audio::spatial::Listener;
use crate::audio::AudioError;
use crate::foundation::math::Vec2;

/// Length and layout of a simulated clip
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipInfo {
    /// Length in seconds
    pub duration: f32,
    /// Channel count
    pub channels: u16,
}

impl Default for ClipInfo {
    fn default() -> Self {
        Self {
            duration: 1.0,
            channels: 1,
        }
    }
}

#[derive(Debug)]
struct HeadlessVoice {
    kind: VoiceKind,
    clip: Option<ClipInfo>,
    spatial: SpatialParams,
    volume: f32,
    pitch: f32,
    looping: bool,
    time: f32,
    playing: bool,
}

impl HeadlessVoice {
    fn new(kind: VoiceKind, clip: Option<ClipInfo>) -> Self {
        Self {
            kind,
            clip,
            spatial: SpatialParams::default(),
            volume: 1.0,
            pitch: 1.0,
            looping: false,
            time: 0.0,
            playing: false,
        }
    }

    fn gain(&self, listener: &Listener) -> f32 {
        if self.spatial.relative {
            return self.volume;
        }
        self.volume
            * listener.attenuation(
                self.spatial.position,
                self.spatial.min_distance,
                self.spatial.max_distance,
                self.spatial.rolloff,
            )
    }
}

#[derive(Debug, Default)]
struct HeadlessState {
    initialized: bool,
    fail_init: bool,
    config: AudioBackendConfig,
    listener: Listener,
    voices: SlotMap<VoiceId, HeadlessVoice>,
    buffers: SlotMap<BufferId, ClipInfo>,
    clips: HashMap<PathBuf, ClipInfo>,
    missing: HashSet<PathBuf>,
    sender: Option<VoiceEventSender>,
    buffer_loads: usize,
    stream_opens: usize,
}

impl HeadlessState {
    fn voice_mut(&mut self, voice: VoiceId) -> Result<&mut HeadlessVoice, AudioError> {
        self.voices.get_mut(voice).ok_or(AudioError::InvalidHandle)
    }

    fn voice(&self, voice: VoiceId) -> Result<&HeadlessVoice, AudioError> {
        self.voices.get(voice).ok_or(AudioError::InvalidHandle)
    }

    fn clip_for(&self, path: &Path) -> ClipInfo {
        self.clips.get(path).copied().unwrap_or_default()
    }

    fn notify(&self, event: VoiceEvent) {
        if let Some(sender) = &self.sender {
            sender.send(event);
        }
    }
}

/// In-memory backend
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    state: Mutex<HeadlessState>,
}

impl HeadlessBackend {
    /// Create an uninitialized backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose initialization always fails, as when no device is present
    pub fn unavailable() -> Self {
        let backend = Self::new();
        backend.state.lock().fail_init = true;
        backend
    }

    /// Register clip metadata for a file
    pub fn with_clip(self, path: impl Into<PathBuf>, duration: f32, channels: u16) -> Self {
        self.state
            .lock()
            .clips
            .insert(path.into(), ClipInfo { duration, channels });
        self
    }

    /// Make loading or streaming `path` fail
    pub fn with_missing(self, path: impl Into<PathBuf>) -> Self {
        self.state.lock().missing.insert(path.into());
        self
    }

    /// Advance every playing voice by `dt` seconds.
    ///
    /// Non-looping voices that run past their clip stop and report
    /// [`VoiceEvent::Stopped`].
    pub fn advance(&self, dt: f32) {
        let mut state = self.state.lock();
        let mut finished = Vec::new();
        for (id, voice) in &mut state.voices {
            if !voice.playing {
                continue;
            }
            voice.time += dt * voice.pitch;
            let Some(clip) = voice.clip else { continue };
            if voice.time < clip.duration {
                continue;
            }
            if voice.looping && clip.duration > 0.0 {
                voice.time %= clip.duration;
            } else {
                voice.time = clip.duration;
                voice.playing = false;
                finished.push(id);
            }
        }
        for id in finished {
            state.notify(VoiceEvent::Stopped(id));
        }
    }

    /// End a voice as if it had reached the end of its clip
    pub fn finish(&self, voice: VoiceId) {
        let mut state = self.state.lock();
        if let Some(v) = state.voices.get_mut(voice) {
            if v.playing {
                v.playing = false;
                state.notify(VoiceEvent::Stopped(voice));
            }
        }
    }

    /// Number of live voices
    pub fn voice_count(&self) -> usize {
        self.state.lock().voices.len()
    }

    /// Check if a voice id is still alive
    pub fn contains_voice(&self, voice: VoiceId) -> bool {
        self.state.lock().voices.contains_key(voice)
    }

    /// Number of decoded buffers currently held
    pub fn buffer_count(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// Number of buffer decode attempts so far
    pub fn buffer_loads(&self) -> usize {
        self.state.lock().buffer_loads
    }

    /// Number of stream open attempts so far
    pub fn stream_opens(&self) -> usize {
        self.state.lock().stream_opens
    }

    /// Current listener position
    pub fn listener_position(&self) -> Vec2 {
        self.state.lock().listener.position
    }

    /// Configuration the backend was initialized with
    pub fn config(&self) -> AudioBackendConfig {
        self.state.lock().config.clone()
    }
}

impl AudioBackend for HeadlessBackend {
    fn initialize(&self, config: &AudioBackendConfig) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        if state.fail_init {
            return Err(AudioError::BackendInitFailed("no audio device".to_string()));
        }
        if state.initialized {
            return Ok(());
        }
        state.config = config.clone();
        state.initialized = true;
        log::info!("Headless audio backend initialized");
        Ok(())
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        if !state.initialized {
            return;
        }
        let ids: Vec<VoiceId> = state.voices.keys().collect();
        state.voices.clear();
        for id in ids {
            state.notify(VoiceEvent::Released(id));
        }
        state.buffers.clear();
        state.initialized = false;
        log::info!("Headless audio backend shutdown");
    }

    fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    fn set_event_sender(&self, sender: VoiceEventSender) {
        self.state.lock().sender = Some(sender);
    }

    fn set_listener(&self, position: Vec2, velocity: Vec2) {
        let mut state = self.state.lock();
        state.listener = Listener { position, velocity };
    }

    fn create_static_voice(&self) -> Result<VoiceId, AudioError> {
        let mut state = self.state.lock();
        if !state.initialized {
            return Err(AudioError::BackendNotInitialized);
        }
        Ok(state.voices.insert(HeadlessVoice::new(VoiceKind::Static, None)))
    }

    fn create_stream_voice(&self, path: &Path) -> Result<VoiceId, AudioError> {
        let mut state = self.state.lock();
        if !state.initialized {
            return Err(AudioError::BackendNotInitialized);
        }
        state.stream_opens += 1;
        if state.missing.contains(path) {
            return Err(AudioError::StreamOpenFailed {
                path: path.to_path_buf(),
                reason: "file not found".to_string(),
            });
        }
        let clip = state.clip_for(path);
        Ok(state.voices.insert(HeadlessVoice::new(VoiceKind::Stream, Some(clip))))
    }

    fn create_buffer(&self, path: &Path) -> Result<BufferHandle, AudioError> {
        let mut state = self.state.lock();
        if !state.initialized {
            return Err(AudioError::BackendNotInitialized);
        }
        state.buffer_loads += 1;
        if state.missing.contains(path) {
            return Err(AudioError::LoadFailed {
                path: path.to_path_buf(),
                reason: "file not found".to_string(),
            });
        }
        let clip = state.clip_for(path);
        let id = state.buffers.insert(clip);
        Ok(Arc::new(SampleBuffer::new(
            id,
            path.to_path_buf(),
            clip.channels,
            Some(clip.duration),
        )))
    }

    fn release_buffer(&self, buffer: &SampleBuffer) {
        self.state.lock().buffers.remove(buffer.id());
    }

    fn bind_buffer(&self, voice: VoiceId, buffer: &BufferHandle) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        let clip = *state.buffers.get(buffer.id()).ok_or(AudioError::InvalidHandle)?;
        let v = state.voice_mut(voice)?;
        if v.kind != VoiceKind::Static {
            return Err(AudioError::PlaybackFailed(
                "cannot bind a buffer to a stream voice".to_string(),
            ));
        }
        v.clip = Some(clip);
        v.time = 0.0;
        Ok(())
    }

    fn release_voice(&self, voice: VoiceId) {
        let mut state = self.state.lock();
        if state.voices.remove(voice).is_some() {
            state.notify(VoiceEvent::Released(voice));
        }
    }

    fn release_all_voices(&self) {
        let mut state = self.state.lock();
        let ids: Vec<VoiceId> = state.voices.keys().collect();
        state.voices.clear();
        for id in ids {
            state.notify(VoiceEvent::Released(id));
        }
    }

    fn play(&self, voice: VoiceId, looping: bool) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        let v = state.voice_mut(voice)?;
        if v.clip.is_none() {
            return Err(AudioError::PlaybackFailed("no buffer bound".to_string()));
        }
        v.looping = looping;
        v.playing = true;
        Ok(())
    }

    fn stop(&self, voice: VoiceId) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        let v = state.voice_mut(voice)?;
        let was_playing = v.playing;
        v.playing = false;
        v.time = 0.0;
        if was_playing {
            state.notify(VoiceEvent::Stopped(voice));
        }
        Ok(())
    }

    fn seek(&self, voice: VoiceId, seconds: f32) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        let v = state.voice_mut(voice)?;
        let end = v.clip.map_or(f32::MAX, |clip| clip.duration);
        v.time = seconds.clamp(0.0, end);
        Ok(())
    }

    fn set_volume(&self, voice: VoiceId, volume: f32) -> Result<(), AudioError> {
        self.state.lock().voice_mut(voice)?.volume = volume;
        Ok(())
    }

    fn volume(&self, voice: VoiceId) -> Result<f32, AudioError> {
        Ok(self.state.lock().voice(voice)?.volume)
    }

    fn set_pitch(&self, voice: VoiceId, pitch: f32) -> Result<(), AudioError> {
        self.state.lock().voice_mut(voice)?.pitch = pitch;
        Ok(())
    }

    fn set_looping(&self, voice: VoiceId, looping: bool) -> Result<(), AudioError> {
        self.state.lock().voice_mut(voice)?.looping = looping;
        Ok(())
    }

    fn set_spatial(&self, voice: VoiceId, params: &SpatialParams) -> Result<(), AudioError> {
        self.state.lock().voice_mut(voice)?.spatial = *params;
        Ok(())
    }

    fn is_playing(&self, voice: VoiceId) -> bool {
        self.state.lock().voices.get(voice).is_some_and(|v| v.playing)
    }

    fn current_time(&self, voice: VoiceId) -> Result<f32, AudioError> {
        Ok(self.state.lock().voice(voice)?.time)
    }

    fn calculate_gain(&self, voice: VoiceId) -> Result<f32, AudioError> {
        let state = self.state.lock();
        Ok(state.voice(voice)?.gain(&state.listener))
    }

    fn voice_info(&self, voice: VoiceId) -> Option<VoiceInfo> {
        let state = self.state.lock();
        let v = state.voices.get(voice)?;
        Some(VoiceInfo {
            kind: v.kind,
            spatial: v.spatial,
            volume: v.volume,
            pitch: v.pitch,
            gain: v.gain(&state.listener),
            current_time: v.time,
            total_time: v.clip.map(|clip| clip.duration),
            looping: v.looping,
            playing: v.playing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crossbeam_channel::unbounded;

    fn initialized() -> (HeadlessBackend, crossbeam_channel::Receiver<VoiceEvent>) {
        let backend = HeadlessBackend::new().with_clip("short.wav", 0.5, 1);
        backend.initialize(&AudioBackendConfig::default()).unwrap();
        let (tx, rx) = unbounded();
        backend.set_event_sender(VoiceEventSender::new(tx));
        (backend, rx)
    }

    fn playing_voice(backend: &HeadlessBackend, path: &str) -> VoiceId {
        let voice = backend.create_static_voice().unwrap();
        let buffer = backend.create_buffer(Path::new(path)).unwrap();
        backend.bind_buffer(voice, &buffer).unwrap();
        backend.play(voice, false).unwrap();
        voice
    }

    #[test]
    fn test_backend_initialization() {
        let backend = HeadlessBackend::new();
        assert!(!backend.is_initialized());
        backend.initialize(&AudioBackendConfig::default()).unwrap();
        assert!(backend.is_initialized());
        // Second initialization should succeed
        assert!(backend.initialize(&AudioBackendConfig::default()).is_ok());
        backend.shutdown();
        assert!(!backend.is_initialized());
    }

    #[test]
    fn test_unavailable_backend() {
        let backend = HeadlessBackend::unavailable();
        assert!(matches!(
            backend.initialize(&AudioBackendConfig::default()),
            Err(AudioError::BackendInitFailed(_))
        ));
        assert!(matches!(backend.create_static_voice(), Err(AudioError::BackendNotInitialized)));
    }

    #[test]
    fn test_clip_runs_out() {
        let (backend, rx) = initialized();
        let voice = playing_voice(&backend, "short.wav");

        backend.advance(0.25);
        assert!(backend.is_playing(voice));
        assert_relative_eq!(backend.current_time(voice).unwrap(), 0.25);

        backend.advance(0.3);
        assert!(!backend.is_playing(voice));
        assert_eq!(rx.try_recv().unwrap(), VoiceEvent::Stopped(voice));
    }

    #[test]
    fn test_looping_wraps() {
        let (backend, rx) = initialized();
        let voice = playing_voice(&backend, "short.wav");
        backend.set_looping(voice, true).unwrap();

        backend.advance(0.75);
        assert!(backend.is_playing(voice));
        assert_relative_eq!(backend.current_time(voice).unwrap(), 0.25, epsilon = 1e-5);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stop_and_release_notify() {
        let (backend, rx) = initialized();
        let voice = playing_voice(&backend, "short.wav");

        backend.stop(voice).unwrap();
        backend.release_voice(voice);
        assert_eq!(rx.try_recv().unwrap(), VoiceEvent::Stopped(voice));
        assert_eq!(rx.try_recv().unwrap(), VoiceEvent::Released(voice));
        assert!(!backend.contains_voice(voice));
        assert!(matches!(backend.set_volume(voice, 0.5), Err(AudioError::InvalidHandle)));
    }

    #[test]
    fn test_missing_file() {
        let backend = HeadlessBackend::new().with_missing("gone.wav");
        backend.initialize(&AudioBackendConfig::default()).unwrap();
        assert!(matches!(
            backend.create_buffer(Path::new("gone.wav")),
            Err(AudioError::LoadFailed { .. })
        ));
        assert!(matches!(
            backend.create_stream_voice(Path::new("gone.wav")),
            Err(AudioError::StreamOpenFailed { .. })
        ));
        assert_eq!(backend.buffer_loads(), 1);
        assert_eq!(backend.stream_opens(), 1);
    }

    #[test]
    fn test_play_without_buffer_fails() {
        let (backend, _rx) = initialized();
        let voice = backend.create_static_voice().unwrap();
        assert!(matches!(backend.play(voice, false), Err(AudioError::PlaybackFailed(_))));
    }

    #[test]
    fn test_gain_follows_listener() {
        let (backend, _rx) = initialized();
        let voice = playing_voice(&backend, "short.wav");
        backend.set_volume(voice, 0.5).unwrap();
        let spatial = SpatialParams::world(Vec2::new(10.0, 0.0), Vec2::zeros(), 1.0, 1.0, 100.0);
        backend.set_spatial(voice, &spatial).unwrap();
        assert_relative_eq!(backend.calculate_gain(voice).unwrap(), 0.05);

        backend.set_listener(Vec2::new(9.0, 0.0), Vec2::zeros());
        assert_relative_eq!(backend.calculate_gain(voice).unwrap(), 0.5);

        backend.set_spatial(voice, &SpatialParams::relative()).unwrap();
        backend.set_listener(Vec2::new(500.0, 0.0), Vec2::zeros());
        assert_relative_eq!(backend.calculate_gain(voice).unwrap(), 0.5);
    }
}
