//! Voice pool
//!
//! Manages allocation of backend voices and the decoded-buffer cache.
//! Static voices are admitted by audibility and stolen by `(priority, gain)`
//! when the pool is full; streaming voices live in a small separate pool and
//! are stolen by volume.
//!
//! All state sits behind one mutex. Backends report completion by queueing
//! [`VoiceEvent`]s, so a backend never has to take the pool lock. Queued
//! events are applied whenever the pool is locked for a binding lookup or
//! a voice request, and by [`VoicePool::on_update`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::audio::backend::{
    create_backend, AudioBackend, AudioBackendConfig, BackendFactory, BufferHandle, VoiceEvent,
    VoiceEventSender, VoiceId,
};
use crate::audio::registry::{BindingKey, BindingState, CallbackRegistry, VoiceEnd};
use crate::audio::resolver::PathResolver;
use crate::audio::spatial::Listener;
use crate::audio::AudioError;
use crate::config::Config;
use crate::foundation::math::Vec2;

/// Configuration for the voice pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoicePoolConfig {
    /// Maximum simultaneous static (buffered) voices
    pub static_voices: usize,
    /// Maximum simultaneous streaming voices
    pub stream_voices: usize,
    /// Requests quieter than this are skipped
    pub min_audible_gain: f32,
    /// Settings handed to the backend on `init`
    pub backend: AudioBackendConfig,
}

impl Default for VoicePoolConfig {
    fn default() -> Self {
        Self {
            static_voices: 30,
            stream_voices: 2,
            min_audible_gain: 0.001,
            backend: AudioBackendConfig::default(),
        }
    }
}

impl Config for VoicePoolConfig {}

/// A static voice held by the pool
#[derive(Debug, Clone, Copy)]
struct VoiceSlot {
    voice: VoiceId,
    /// Priority of the request that acquired the voice
    priority: i32,
    /// Attenuated gain as of the last update
    gain: f32,
}

/// A streaming voice held by the pool
#[derive(Debug, Clone)]
struct StreamSlot {
    voice: VoiceId,
    identifier: String,
}

#[derive(Default)]
struct PoolState {
    backend: Option<Arc<dyn AudioBackend>>,
    slots: Vec<VoiceSlot>,
    stream_slots: Vec<StreamSlot>,
    /// `None` entries remember failed loads
    buffers: HashMap<String, Option<BufferHandle>>,
    registry: CallbackRegistry,
    listener: Listener,
}

impl PoolState {
    /// Stop and drop every held voice; bindings end as released
    fn release_voices(&mut self, backend: &dyn AudioBackend) {
        self.registry.detach_all();
        for slot in self.slots.drain(..) {
            drop_voice(backend, slot.voice);
        }
        for slot in self.stream_slots.drain(..) {
            drop_voice(backend, slot.voice);
        }
        backend.release_all_voices();
    }

    fn release_buffers(&mut self, backend: &dyn AudioBackend) {
        for (identifier, entry) in self.buffers.drain() {
            if let Some(buffer) = entry {
                debug_assert_eq!(
                    Arc::strong_count(&buffer),
                    1,
                    "buffer '{identifier}' is still referenced outside the pool"
                );
                backend.release_buffer(&buffer);
            }
        }
    }

    fn shutdown(&mut self) {
        let Some(backend) = self.backend.take() else {
            return;
        };
        self.release_voices(&*backend);
        self.release_buffers(&*backend);
        backend.shutdown();
        log::info!("Voice pool shutdown");
    }

    /// Forget a voice the backend has already dropped
    fn forget_voice(&mut self, voice: VoiceId) {
        self.slots.retain(|slot| slot.voice != voice);
        self.stream_slots.retain(|slot| slot.voice != voice);
    }
}

fn identifier_as_path(identifier: &str) -> Option<PathBuf> {
    Some(PathBuf::from(identifier))
}

fn drop_voice(backend: &dyn AudioBackend, voice: VoiceId) {
    if let Err(e) = backend.stop(voice) {
        log::trace!("Stopping voice {:?} failed: {}", voice, e);
    }
    backend.release_voice(voice);
}

struct PoolShared {
    config: VoicePoolConfig,
    factory: BackendFactory,
    resolver: Box<dyn PathResolver>,
    state: Mutex<PoolState>,
    events_tx: Sender<VoiceEvent>,
    events_rx: Receiver<VoiceEvent>,
}

impl PoolShared {
    /// Lock the state with every queued backend event applied
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        for event in self.events_rx.try_iter() {
            state.registry.dispatch(event);
            if let VoiceEvent::Released(voice) = event {
                state.forget_voice(voice);
            }
        }
        guard
    }
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        self.state.get_mut().shutdown();
    }
}

/// Shared handle to the voice pool
///
/// Cloning is cheap; every clone refers to the same pool. The pool shuts
/// down when the last handle is dropped.
#[derive(Clone)]
pub struct VoicePool {
    shared: Arc<PoolShared>,
}

impl VoicePool {
    /// Create a pool that builds its backend with `factory` and resolves
    /// sample identifiers with `resolver`. Nothing is opened until [`init`].
    ///
    /// [`init`]: VoicePool::init
    pub fn new(
        config: VoicePoolConfig,
        factory: BackendFactory,
        resolver: impl PathResolver + 'static,
    ) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            shared: Arc::new(PoolShared {
                config,
                factory,
                resolver: Box::new(resolver),
                state: Mutex::new(PoolState::default()),
                events_tx,
                events_rx,
            }),
        }
    }

    /// Pool over the platform's default backend, with identifiers used as paths
    pub fn with_default_backend(config: VoicePoolConfig) -> Self {
        Self::new(config, Box::new(create_backend), identifier_as_path)
    }

    /// Pool over an existing backend, with identifiers used as paths
    pub fn with_backend(config: VoicePoolConfig, backend: Arc<dyn AudioBackend>) -> Self {
        Self::new(
            config,
            Box::new(move |_: &AudioBackendConfig| Ok(Arc::clone(&backend))),
            identifier_as_path,
        )
    }

    /// Open the backend. Does nothing if it is already open.
    ///
    /// # Errors
    /// Returns the backend's error if it cannot be created or initialized.
    /// The pool stays usable; allocations simply fail until a later `init`
    /// succeeds.
    pub fn init(&self) -> Result<(), AudioError> {
        let mut state = self.shared.state.lock();
        if state.backend.is_some() {
            return Ok(());
        }

        let config = &self.shared.config.backend;
        let backend = (self.shared.factory)(config).and_then(|backend| {
            backend.initialize(config)?;
            Ok(backend)
        });
        let backend = match backend {
            Ok(backend) => backend,
            Err(e) => {
                log::error!("Audio backend unavailable: {}", e);
                return Err(e);
            }
        };

        // Leftovers from a previous session refer to dead voices
        for _ in self.shared.events_rx.try_iter() {}

        backend.set_event_sender(VoiceEventSender::new(self.shared.events_tx.clone()));
        backend.set_listener(state.listener.position, state.listener.velocity);
        state.backend = Some(backend);
        log::info!(
            "Voice pool initialized: {} static voices, {} stream voices",
            self.shared.config.static_voices,
            self.shared.config.stream_voices
        );
        Ok(())
    }

    /// Stop every voice, drop every buffer and close the backend.
    /// Safe to call repeatedly.
    pub fn shutdown(&self) {
        self.shared.state.lock().shutdown();
    }

    /// Check if the backend is open
    pub fn is_initialized(&self) -> bool {
        self.shared.state.lock().backend.is_some()
    }

    /// Pool configuration
    pub fn config(&self) -> &VoicePoolConfig {
        &self.shared.config
    }

    /// Move the listener
    pub fn set_listener(&self, position: Vec2, velocity: Vec2) {
        let mut state = self.shared.state.lock();
        state.listener = Listener { position, velocity };
        if let Some(backend) = &state.backend {
            backend.set_listener(position, velocity);
        }
    }

    /// Listener position used for gain calculations
    pub fn listener_position(&self) -> Vec2 {
        self.shared.state.lock().listener.position
    }

    /// Gain of an emitter at `position`, relative to the current listener
    pub fn calculate_gain(
        &self,
        position: Vec2,
        reference: f32,
        max_distance: f32,
        rolloff: f32,
    ) -> f32 {
        self.shared
            .state
            .lock()
            .listener
            .attenuation(position, reference, max_distance, rolloff)
    }

    /// Acquire a static voice.
    ///
    /// Returns `None` when the request is inaudible, the backend is not
    /// open, or the pool is full and no held voice ranks below the request.
    /// A held voice ranks below when its priority is lower, or equal with a
    /// lower gain; the lowest such voice is stolen.
    pub fn get_voice(&self, gain: f32, priority: i32) -> Option<VoiceId> {
        let mut state = self.shared.lock();
        self.admit_static(&mut state, gain, priority)
    }

    /// [`get_voice`](Self::get_voice), with the voice bound to a new
    /// registration before the lock is released
    pub(crate) fn acquire_voice(&self, gain: f32, priority: i32) -> Option<(VoiceId, BindingKey)> {
        let mut state = self.shared.lock();
        let voice = self.admit_static(&mut state, gain, priority)?;
        Some((voice, state.registry.register(voice)))
    }

    fn admit_static(&self, state: &mut PoolState, gain: f32, priority: i32) -> Option<VoiceId> {
        let config = &self.shared.config;
        if gain < config.min_audible_gain {
            return None;
        }
        let backend = state.backend.clone()?;

        if state.slots.len() >= config.static_voices {
            let (index, victim) = state
                .slots
                .iter()
                .copied()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    a.priority.cmp(&b.priority).then(a.gain.total_cmp(&b.gain))
                })?;

            let outranked = victim.priority < priority
                || (victim.priority == priority && victim.gain < gain);
            if !outranked {
                return None;
            }

            state.slots.swap_remove(index);
            state.registry.detach(victim.voice, VoiceEnd::Released);
            drop_voice(&*backend, victim.voice);
            log::debug!(
                "Stole voice {:?} (priority {}, gain {:.3}) for priority {}, gain {:.3}",
                victim.voice,
                victim.priority,
                victim.gain,
                priority,
                gain
            );
        }

        match backend.create_static_voice() {
            Ok(voice) => {
                state.slots.push(VoiceSlot {
                    voice,
                    priority,
                    gain,
                });
                debug_assert!(state.slots.len() <= config.static_voices);
                Some(voice)
            }
            Err(e) => {
                log::error!("Failed to create voice: {}", e);
                None
            }
        }
    }

    /// Open a streaming voice for `identifier`.
    ///
    /// When the stream pool is full, finished streams are dropped first;
    /// if it is still full the quietest stream below full volume is stolen.
    pub fn get_stream_voice(&self, identifier: &str) -> Option<VoiceId> {
        let mut state = self.shared.lock();
        self.admit_stream(&mut state, identifier)
    }

    /// [`get_stream_voice`](Self::get_stream_voice), with the voice bound to
    /// a new registration before the lock is released
    pub(crate) fn acquire_stream_voice(&self, identifier: &str) -> Option<(VoiceId, BindingKey)> {
        let mut state = self.shared.lock();
        let voice = self.admit_stream(&mut state, identifier)?;
        Some((voice, state.registry.register(voice)))
    }

    fn admit_stream(&self, state: &mut PoolState, identifier: &str) -> Option<VoiceId> {
        let capacity = self.shared.config.stream_voices;
        let backend = state.backend.clone()?;

        let Some(path) = self.shared.resolver.resolve(identifier) else {
            log::debug!("Failed to stream audio file '{}': not found", identifier);
            return None;
        };

        if state.stream_slots.len() >= capacity {
            let registry = &mut state.registry;
            state.stream_slots.retain(|slot| {
                if backend.is_playing(slot.voice) {
                    return true;
                }
                registry.detach(slot.voice, VoiceEnd::Stopped);
                drop_voice(&*backend, slot.voice);
                false
            });
        }

        if state.stream_slots.len() >= capacity {
            let (index, volume) = state
                .stream_slots
                .iter()
                .enumerate()
                .filter_map(|(i, slot)| backend.volume(slot.voice).ok().map(|volume| (i, volume)))
                .filter(|&(_, volume)| volume < 1.0)
                .min_by(|a, b| a.1.total_cmp(&b.1))?;

            let victim = state.stream_slots.swap_remove(index);
            state.registry.detach(victim.voice, VoiceEnd::Released);
            drop_voice(&*backend, victim.voice);
            log::debug!("Stole stream '{}' at volume {:.3}", victim.identifier, volume);
        }

        match backend.create_stream_voice(&path) {
            Ok(voice) => {
                state.stream_slots.push(StreamSlot {
                    voice,
                    identifier: identifier.to_string(),
                });
                debug_assert!(state.stream_slots.len() <= capacity);
                Some(voice)
            }
            Err(e) => {
                log::debug!("Failed to stream audio file '{}': {}", identifier, e);
                None
            }
        }
    }

    /// Decoded buffer for `identifier`, loading it on first use.
    ///
    /// Failed loads are remembered and not retried until the cache is
    /// cleared.
    pub fn get_buffer(&self, identifier: &str) -> Option<BufferHandle> {
        let mut state = self.shared.state.lock();
        if let Some(entry) = state.buffers.get(identifier) {
            return entry.clone();
        }
        let backend = state.backend.clone()?;

        let loaded = match self.shared.resolver.resolve(identifier) {
            Some(path) => backend.create_buffer(&path),
            None => Err(AudioError::LoadFailed {
                path: PathBuf::from(identifier),
                reason: "not found in any search path".to_string(),
            }),
        };
        let entry = match loaded {
            Ok(buffer) => Some(buffer),
            Err(e) => {
                log::error!("Failed to load sound: {}", e);
                None
            }
        };
        state.buffers.insert(identifier.to_string(), entry.clone());
        entry
    }

    /// Per-frame maintenance.
    ///
    /// Applies queued backend notifications, releases static voices that
    /// have finished and refreshes the gain of the rest.
    pub fn on_update(&self) {
        let mut guard = self.shared.lock();
        let state = &mut *guard;

        let Some(backend) = state.backend.clone() else {
            return;
        };
        let registry = &mut state.registry;
        state.slots.retain_mut(|slot| {
            if !backend.is_playing(slot.voice) {
                registry.detach(slot.voice, VoiceEnd::Stopped);
                drop_voice(&*backend, slot.voice);
                return false;
            }
            if let Ok(gain) = backend.calculate_gain(slot.voice) {
                slot.gain = gain;
            }
            true
        });
    }

    /// Stop every voice and clear the buffer cache; the backend stays open
    pub fn release_all(&self) {
        let mut state = self.shared.lock();
        let Some(backend) = state.backend.clone() else {
            return;
        };
        state.release_voices(&*backend);
        state.release_buffers(&*backend);
    }

    /// Stop and drop one voice handed out by this pool
    pub fn release_voice(&self, voice: VoiceId) {
        let mut state = self.shared.lock();
        let Some(backend) = state.backend.clone() else {
            return;
        };
        state.registry.detach(voice, VoiceEnd::Released);
        state.forget_voice(voice);
        drop_voice(&*backend, voice);
    }

    /// Voices currently held, static and streaming
    pub fn sources_used(&self) -> usize {
        let state = self.shared.lock();
        state.slots.len() + state.stream_slots.len()
    }

    /// Voice capacity, static and streaming
    pub fn sources_total(&self) -> usize {
        self.shared.config.static_voices + self.shared.config.stream_voices
    }

    /// Cached buffer entries, failed loads included
    pub fn buffer_count(&self) -> usize {
        self.shared.state.lock().buffers.len()
    }

    pub(crate) fn backend(&self) -> Option<Arc<dyn AudioBackend>> {
        self.shared.state.lock().backend.clone()
    }

    /// Drop a registration and, if its voice is still live, stop and
    /// release the voice. The registration goes first so the stop cannot
    /// reach it.
    pub(crate) fn release_binding(&self, key: BindingKey) {
        let mut state = self.shared.lock();
        let Some(voice) = state.registry.unregister(key) else {
            return;
        };
        state.forget_voice(voice);
        if let Some(backend) = state.backend.clone() {
            drop_voice(&*backend, voice);
        }
    }

    pub(crate) fn poll(&self, key: BindingKey) -> BindingState {
        self.shared.lock().registry.poll(key)
    }

    pub(crate) fn peek(&self, key: BindingKey) -> Option<VoiceId> {
        self.shared.lock().registry.peek(key)
    }
}

impl std::fmt::Debug for VoicePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("VoicePool")
            .field("initialized", &state.backend.is_some())
            .field("static_voices", &state.slots.len())
            .field("stream_voices", &state.stream_slots.len())
            .field("buffers", &state.buffers.len())
            .finish()
    }
}
