//! Rodio audio backend implementation
//!
//! Uses the Rodio library for cross-platform audio playback.
//! Rodio is pure Rust and supports WAV, OGG Vorbis, MP3, and FLAC formats.
//!
//! Rodio's output stream cannot leave the thread that opened it, so the
//! backend runs a dedicated output thread. That thread owns the stream,
//! polls the sinks and reports finished voices through the pool's event
//! queue. Each `play` gets a fresh [`Sink`]; distance attenuation and doppler
//! are folded into the sink's volume and speed.
//!
//! # Example
//!
//! ```no_run
//! use sound_engine::audio::backend::{AudioBackend, AudioBackendConfig};
//! use sound_engine::audio::backend::rodio_backend::RodioBackend;
//! use std::path::Path;
//!
//! let backend = RodioBackend::new();
//! backend.initialize(&AudioBackendConfig::default()).unwrap();
//!
//! let voice = backend.create_static_voice().unwrap();
//! let buffer = backend.create_buffer(Path::new("resources/audio/sound.wav")).unwrap();
//! backend.bind_buffer(voice, &buffer).unwrap();
//! backend.play(voice, false).unwrap();
//!
//! backend.set_volume(voice, 0.5).unwrap();
//! if backend.is_playing(voice) {
//!     println!("Sound is playing!");
//! }
//!
//! backend.shutdown();
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use slotmap::SlotMap;

use super::{
    AudioBackend, AudioBackendConfig, BufferHandle, BufferId, SampleBuffer, SpatialParams,
    VoiceEvent,
    VoiceEventSender, VoiceId, VoiceInfo, VoiceKind,
};
use crate::audio::spatial::Listener;
use crate::audio::AudioError;
use crate::foundation::math::Vec2;

/// How often the output thread checks for finished sinks
const POLL_INTERVAL: Duration = Duration::from_millis(10);

type BoxedSource = Box<dyn Source<Item = f32> + Send>;

/// Fully decoded sample data
#[derive(Clone)]
struct DecodedClip {
    channels: u16,
    sample_rate: u32,
    samples: Arc<[f32]>,
}

impl DecodedClip {
    fn load(path: &Path) -> Result<Self, AudioError> {
        let decoder = open_decoder(path).map_err(|reason| AudioError::LoadFailed {
            path: path.to_path_buf(),
            reason,
        })?;
        let channels = decoder.channels();
        let sample_rate = decoder.sample_rate();
        let samples: Vec<f32> = decoder.convert_samples::<f32>().collect();
        Ok(Self {
            channels,
            sample_rate,
            samples: samples.into(),
        })
    }

    fn duration(&self) -> f32 {
        let frames = self.samples.len() as f32 / f32::from(self.channels.max(1));
        frames / self.sample_rate.max(1) as f32
    }

    fn source(&self) -> ClipSource {
        ClipSource {
            samples: Arc::clone(&self.samples),
            position: 0,
            channels: self.channels,
            sample_rate: self.sample_rate,
        }
    }
}

/// Plays a decoded clip without copying its samples
struct ClipSource {
    samples: Arc<[f32]>,
    position: usize,
    channels: u16,
    sample_rate: u32,
}

impl Iterator for ClipSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        let sample = self.samples.get(self.position).copied()?;
        self.position += 1;
        Some(sample)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.samples.len().saturating_sub(self.position);
        (remaining, Some(remaining))
    }
}

impl Source for ClipSource {
    fn current_frame_len(&self) -> Option<usize> {
        Some(self.samples.len().saturating_sub(self.position))
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        let frames = self.samples.len() / usize::from(self.channels.max(1));
        Some(Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate.max(1))))
    }
}

fn open_decoder(path: &Path) -> Result<Decoder<BufReader<File>>, String> {
    let file = File::open(path).map_err(|e| format!("Failed to open audio file: {}", e))?;
    Decoder::new(BufReader::new(file)).map_err(|e| format!("Failed to decode audio: {}", e))
}

enum VoiceSource {
    Empty,
    Buffer(DecodedClip),
    Stream { path: PathBuf, duration: Option<f32> },
}

impl VoiceSource {
    fn duration(&self) -> Option<f32> {
        match self {
            Self::Empty => None,
            Self::Buffer(clip) => Some(clip.duration()),
            Self::Stream { duration, .. } => *duration,
        }
    }

    fn open(&self) -> Result<BoxedSource, AudioError> {
        match self {
            Self::Empty => Err(AudioError::PlaybackFailed("no buffer bound".to_string())),
            Self::Buffer(clip) => Ok(Box::new(clip.source())),
            Self::Stream { path, .. } => {
                let decoder = open_decoder(path).map_err(|reason| AudioError::StreamOpenFailed {
                    path: path.clone(),
                    reason,
                })?;
                Ok(Box::new(decoder.convert_samples::<f32>()))
            }
        }
    }
}

struct RodioVoice {
    kind: VoiceKind,
    source: VoiceSource,
    sink: Option<Sink>,
    spatial: SpatialParams,
    volume: f32,
    pitch: f32,
    looping: bool,
    playing: bool,
    /// Position playback (re)started from
    offset: f32,
    started: Option<Instant>,
}

impl RodioVoice {
    fn new(kind: VoiceKind, source: VoiceSource) -> Self {
        Self {
            kind,
            source,
            sink: None,
            spatial: SpatialParams::default(),
            volume: 1.0,
            pitch: 1.0,
            looping: false,
            playing: false,
            offset: 0.0,
            started: None,
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

    fn speed(&self, listener: &Listener, config: &AudioBackendConfig) -> f32 {
        if self.spatial.relative {
            return self.pitch;
        }
        let doppler = doppler_shift(
            listener,
            &self.spatial,
            config.speed_of_sound,
            config.doppler_factor,
        );
        self.pitch * doppler
    }

    fn current_time(&self, listener: &Listener, config: &AudioBackendConfig) -> f32 {
        let Some(started) = self.started.filter(|_| self.playing) else {
            return self.offset;
        };
        let time = self.offset + started.elapsed().as_secs_f32() * self.speed(listener, config);
        match self.source.duration() {
            Some(total) if self.looping && total > 0.0 => time % total,
            Some(total) => time.min(total),
            None => time,
        }
    }

    /// Push volume and speed to the sink
    fn apply(&self, listener: &Listener, config: &AudioBackendConfig) {
        if let Some(sink) = &self.sink {
            sink.set_volume(self.gain(listener));
            sink.set_speed(self.speed(listener, config));
        }
    }

    fn halt(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
        self.playing = false;
        self.started = None;
    }
}

/// Pitch factor of the OpenAL doppler model
pub fn doppler_shift(
    listener: &Listener,
    spatial: &SpatialParams,
    speed_of_sound: f32,
    factor: f32,
) -> f32 {
    if factor <= 0.0 || speed_of_sound <= 0.0 {
        return 1.0;
    }
    let to_listener = listener.position - spatial.position;
    let distance = to_listener.norm();
    if distance <= f32::EPSILON {
        return 1.0;
    }
    let limit = speed_of_sound / factor;
    let listener_speed = (listener.velocity.dot(&to_listener) / distance).min(limit);
    let source_speed = (spatial.velocity.dot(&to_listener) / distance).min(limit);
    let denominator = speed_of_sound - factor * source_speed;
    if denominator <= f32::EPSILON {
        return 1.0;
    }
    (speed_of_sound - factor * listener_speed) / denominator
}

struct OutputThread {
    handle: OutputStreamHandle,
    stop_tx: Sender<()>,
    join: JoinHandle<()>,
}

#[derive(Default)]
struct RodioState {
    output: Option<OutputThread>,
    config: AudioBackendConfig,
    listener: Listener,
    voices: SlotMap<VoiceId, RodioVoice>,
    buffers: SlotMap<BufferId, DecodedClip>,
    sender: Option<VoiceEventSender>,
}

impl RodioState {
    fn voice_mut(&mut self, voice: VoiceId) -> Result<&mut RodioVoice, AudioError> {
        self.voices.get_mut(voice).ok_or(AudioError::InvalidHandle)
    }

    fn notify(&self, event: VoiceEvent) {
        if let Some(sender) = &self.sender {
            sender.send(event);
        }
    }

    /// Start (or restart) a voice from its saved offset
    fn start(&mut self, voice: VoiceId) -> Result<(), AudioError> {
        let handle = self
            .output
            .as_ref()
            .map(|output| output.handle.clone())
            .ok_or(AudioError::BackendNotInitialized)?;
        let listener = self.listener;
        let config = self.config.clone();
        let v = self.voice_mut(voice)?;

        let source = v
            .source
            .open()?
            .skip_duration(Duration::from_secs_f32(v.offset.max(0.0)));
        let sink = Sink::try_new(&handle)
            .map_err(|e| AudioError::PlaybackFailed(format!("Failed to create sink: {}", e)))?;
        if v.looping {
            sink.append(source.repeat_infinite());
        } else {
            sink.append(source);
        }

        v.halt();
        v.sink = Some(sink);
        v.apply(&listener, &config);
        v.playing = true;
        v.started = Some(Instant::now());
        Ok(())
    }

    /// Mark voices whose sink ran dry as stopped
    fn poll_finished(&mut self) {
        let mut finished = Vec::new();
        for (id, voice) in &mut self.voices {
            if voice.playing && voice.sink.as_ref().map_or(true, Sink::empty) {
                voice.offset = 0.0;
                voice.halt();
                finished.push(id);
            }
        }
        for id in finished {
            self.notify(VoiceEvent::Stopped(id));
        }
    }
}

/// Rodio-based audio backend
pub struct RodioBackend {
    state: Arc<Mutex<RodioState>>,
}

impl RodioBackend {
    /// Create a new Rodio backend
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RodioState::default())),
        }
    }

    fn spawn_output(state: Arc<Mutex<RodioState>>) -> Result<OutputThread, AudioError> {
        let (ready_tx, ready_rx) = bounded(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let join = std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let (stream, handle) = match OutputStream::try_default() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::BackendInitFailed(format!(
                            "Failed to create audio output: {}",
                            e
                        ))));
                        return;
                    }
                };
                if ready_tx.send(Ok(handle)).is_err() {
                    return;
                }
                loop {
                    match stop_rx.recv_timeout(POLL_INTERVAL) {
                        Err(RecvTimeoutError::Timeout) => state.lock().poll_finished(),
                        _ => break,
                    }
                }
                drop(stream);
            })
            .map_err(|e| {
                AudioError::BackendInitFailed(format!("Failed to spawn output thread: {}", e))
            })?;

        let handle = ready_rx
            .recv()
            .map_err(|_| AudioError::BackendInitFailed("Audio output thread exited".to_string()))??;
        Ok(OutputThread { handle, stop_tx, join })
    }
}

impl AudioBackend for RodioBackend {
    fn initialize(&self, config: &AudioBackendConfig) -> Result<(), AudioError> {
        if self.is_initialized() {
            return Ok(());
        }

        let output = Self::spawn_output(Arc::clone(&self.state))?;
        let mut state = self.state.lock();
        state.config = config.clone();
        state.output = Some(output);

        log::info!("Rodio audio backend initialized");
        Ok(())
    }

    fn shutdown(&self) {
        let output = {
            let mut state = self.state.lock();
            let Some(output) = state.output.take() else {
                return;
            };
            let ids: Vec<VoiceId> = state.voices.keys().collect();
            for voice in state.voices.values_mut() {
                voice.halt();
            }
            state.voices.clear();
            state.buffers.clear();
            for id in ids {
                state.notify(VoiceEvent::Released(id));
            }
            output
        };

        // The output thread takes the state lock while polling
        let _ = output.stop_tx.send(());
        if output.join.join().is_err() {
            log::error!("Audio output thread panicked");
        }
        log::info!("Rodio audio backend shutdown");
    }

    fn is_initialized(&self) -> bool {
        self.state.lock().output.is_some()
    }

    fn set_event_sender(&self, sender: VoiceEventSender) {
        self.state.lock().sender = Some(sender);
    }

    fn set_listener(&self, position: Vec2, velocity: Vec2) {
        let mut state = self.state.lock();
        state.listener = Listener { position, velocity };
        let (listener, config) = (state.listener, state.config.clone());
        for voice in state.voices.values() {
            voice.apply(&listener, &config);
        }
    }

    fn create_static_voice(&self) -> Result<VoiceId, AudioError> {
        let mut state = self.state.lock();
        if state.output.is_none() {
            return Err(AudioError::BackendNotInitialized);
        }
        Ok(state.voices.insert(RodioVoice::new(VoiceKind::Static, VoiceSource::Empty)))
    }

    fn create_stream_voice(&self, path: &Path) -> Result<VoiceId, AudioError> {
        if !self.is_initialized() {
            return Err(AudioError::BackendNotInitialized);
        }
        // Probe outside the lock; decoding headers can touch the disk
        let decoder = open_decoder(path).map_err(|reason| AudioError::StreamOpenFailed {
            path: path.to_path_buf(),
            reason,
        })?;
        let source = VoiceSource::Stream {
            path: path.to_path_buf(),
            duration: decoder.total_duration().map(|d| d.as_secs_f32()),
        };
        Ok(self.state.lock().voices.insert(RodioVoice::new(VoiceKind::Stream, source)))
    }

    fn create_buffer(&self, path: &Path) -> Result<BufferHandle, AudioError> {
        if !self.is_initialized() {
            return Err(AudioError::BackendNotInitialized);
        }
        let clip = DecodedClip::load(path)?;
        let (channels, duration) = (clip.channels, clip.duration());
        let id = self.state.lock().buffers.insert(clip);
        Ok(Arc::new(SampleBuffer::new(id, path.to_path_buf(), channels, Some(duration))))
    }

    fn release_buffer(&self, buffer: &SampleBuffer) {
        self.state.lock().buffers.remove(buffer.id());
    }

    fn bind_buffer(&self, voice: VoiceId, buffer: &BufferHandle) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        let clip = state.buffers.get(buffer.id()).cloned().ok_or(AudioError::InvalidHandle)?;
        let v = state.voice_mut(voice)?;
        if v.kind != VoiceKind::Static {
            return Err(AudioError::PlaybackFailed(
                "cannot bind a buffer to a stream voice".to_string(),
            ));
        }
        v.halt();
        v.source = VoiceSource::Buffer(clip);
        v.offset = 0.0;
        Ok(())
    }

    fn release_voice(&self, voice: VoiceId) {
        let mut state = self.state.lock();
        if let Some(mut v) = state.voices.remove(voice) {
            v.halt();
            state.notify(VoiceEvent::Released(voice));
        }
    }

    fn release_all_voices(&self) {
        let mut state = self.state.lock();
        let ids: Vec<VoiceId> = state.voices.keys().collect();
        for (_, mut voice) in state.voices.drain() {
            voice.halt();
        }
        for id in ids {
            state.notify(VoiceEvent::Released(id));
        }
    }

    fn play(&self, voice: VoiceId, looping: bool) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        state.voice_mut(voice)?.looping = looping;
        state.start(voice)
    }

    fn stop(&self, voice: VoiceId) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        let v = state.voice_mut(voice)?;
        let was_playing = v.playing;
        v.halt();
        v.offset = 0.0;
        if was_playing {
            state.notify(VoiceEvent::Stopped(voice));
        }
        Ok(())
    }

    fn seek(&self, voice: VoiceId, seconds: f32) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        let v = state.voice_mut(voice)?;
        v.offset = seconds.max(0.0);
        if v.playing {
            state.start(voice)?;
        }
        Ok(())
    }

    fn set_volume(&self, voice: VoiceId, volume: f32) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        let (listener, config) = (state.listener, state.config.clone());
        let v = state.voice_mut(voice)?;
        v.volume = volume;
        v.apply(&listener, &config);
        Ok(())
    }

    fn volume(&self, voice: VoiceId) -> Result<f32, AudioError> {
        let state = self.state.lock();
        state.voices.get(voice).map(|v| v.volume).ok_or(AudioError::InvalidHandle)
    }

    fn set_pitch(&self, voice: VoiceId, pitch: f32) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        let (listener, config) = (state.listener, state.config.clone());
        let v = state.voice_mut(voice)?;
        // Keep the reported position continuous across the speed change
        v.offset = v.current_time(&listener, &config);
        if v.started.is_some() {
            v.started = Some(Instant::now());
        }
        v.pitch = pitch;
        v.apply(&listener, &config);
        Ok(())
    }

    fn set_looping(&self, voice: VoiceId, looping: bool) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        let (listener, config) = (state.listener, state.config.clone());
        let v = state.voice_mut(voice)?;
        if v.looping == looping {
            return Ok(());
        }
        v.looping = looping;
        if v.playing {
            v.offset = v.current_time(&listener, &config);
            state.start(voice)?;
        }
        Ok(())
    }

    fn set_spatial(&self, voice: VoiceId, params: &SpatialParams) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        let (listener, config) = (state.listener, state.config.clone());
        let v = state.voice_mut(voice)?;
        v.spatial = *params;
        v.apply(&listener, &config);
        Ok(())
    }

    fn is_playing(&self, voice: VoiceId) -> bool {
        self.state
            .lock()
            .voices
            .get(voice)
            .is_some_and(|v| v.playing && v.sink.as_ref().is_some_and(|sink| !sink.empty()))
    }

    fn current_time(&self, voice: VoiceId) -> Result<f32, AudioError> {
        let state = self.state.lock();
        let v = state.voices.get(voice).ok_or(AudioError::InvalidHandle)?;
        Ok(v.current_time(&state.listener, &state.config))
    }

    fn calculate_gain(&self, voice: VoiceId) -> Result<f32, AudioError> {
        let state = self.state.lock();
        let v = state.voices.get(voice).ok_or(AudioError::InvalidHandle)?;
        Ok(v.gain(&state.listener))
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
            current_time: v.current_time(&state.listener, &state.config),
            total_time: v.source.duration(),
            looping: v.looping,
            playing: v.playing,
        })
    }
}

impl Default for RodioBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RodioBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_backend_initialization() {
        let backend = RodioBackend::new();
        assert!(!backend.is_initialized());

        let config = AudioBackendConfig::default();
        let result = backend.initialize(&config);

        // May fail in CI/test environments without audio device
        if result.is_ok() {
            assert!(backend.is_initialized());
            // Second initialization should succeed
            assert!(backend.initialize(&config).is_ok());
            backend.shutdown();
            assert!(!backend.is_initialized());
        }
    }

    #[test]
    fn test_clip_sources_share_samples() {
        let clip = DecodedClip {
            channels: 2,
            sample_rate: 4,
            samples: vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8].into(),
        };
        let first = clip.source();
        let second = clip.source();
        assert!(Arc::ptr_eq(&first.samples, &clip.samples));
        assert_eq!(Arc::strong_count(&clip.samples), 3);

        assert_eq!(first.total_duration(), Some(Duration::from_secs(1)));
        assert_eq!(Source::channels(&second), 2);
        let played: Vec<f32> = second.collect();
        assert_eq!(played, vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8]);
        assert_relative_eq!(clip.duration(), 1.0);
    }

    #[test]
    fn test_voice_without_initialization() {
        let backend = RodioBackend::new();
        assert!(matches!(backend.create_static_voice(), Err(AudioError::BackendNotInitialized)));
        assert!(matches!(
            backend.create_buffer(Path::new("sound.wav")),
            Err(AudioError::BackendNotInitialized)
        ));
    }

    #[test]
    fn test_invalid_handle_operations() {
        let backend = RodioBackend::new();
        let config = AudioBackendConfig::default();

        if backend.initialize(&config).is_ok() {
            let voice = backend.create_static_voice().unwrap();
            backend.release_voice(voice);

            // All operations on a released voice should return error
            assert!(matches!(backend.play(voice, false), Err(AudioError::InvalidHandle)));
            assert!(matches!(backend.set_volume(voice, 0.5), Err(AudioError::InvalidHandle)));
            assert!(matches!(backend.volume(voice), Err(AudioError::InvalidHandle)));
            assert!(!backend.is_playing(voice));

            backend.shutdown();
        }
    }

    #[test]
    fn test_missing_file() {
        let backend = RodioBackend::new();
        if backend.initialize(&AudioBackendConfig::default()).is_ok() {
            assert!(matches!(
                backend.create_buffer(Path::new("does/not/exist.wav")),
                Err(AudioError::LoadFailed { .. })
            ));
            assert!(matches!(
                backend.create_stream_voice(Path::new("does/not/exist.ogg")),
                Err(AudioError::StreamOpenFailed { .. })
            ));
            backend.shutdown();
        }
    }

    #[test]
    fn test_doppler_at_rest() {
        let listener = Listener::new();
        let spatial = SpatialParams::world(Vec2::new(10.0, 0.0), Vec2::zeros(), 1.0, 1.0, 100.0);
        assert_relative_eq!(doppler_shift(&listener, &spatial, 5000.0, 1.0), 1.0);
    }

    #[test]
    fn test_doppler_approaching_source() {
        let listener = Listener::new();
        // Source on +x moving towards the listener
        let spatial = SpatialParams::world(
            Vec2::new(10.0, 0.0),
            Vec2::new(-1000.0, 0.0),
            1.0,
            1.0,
            100.0,
        );
        let shift = doppler_shift(&listener, &spatial, 5000.0, 1.0);
        assert_relative_eq!(shift, 1.25);
        assert!(doppler_shift(&listener, &spatial, 5000.0, 0.0) == 1.0);
    }
}
