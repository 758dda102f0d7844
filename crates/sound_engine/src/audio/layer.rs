//! Sound layers
//!
//! A [`SoundLayer`] plays one layer of an [`EventDescription`] through at most
//! one pool voice at a time. The voice is borrowed, not owned: the pool may
//! steal it and the backend may end it, and the layer learns about either on
//! its next access through the pool's binding registry.

use std::sync::Arc;

use rand::Rng;

use crate::audio::backend::{AudioBackend, SpatialParams, VoiceId};
use crate::audio::description::{AudioFlags, EventDescription};
use crate::audio::registry::{BindingKey, BindingState, VoiceEnd};
use crate::audio::voice_pool::VoicePool;
use crate::audio::AudioError;
use crate::foundation::math::Vec2;

/// Registration of the layer's current voice
#[derive(Debug)]
struct Binding {
    pool: VoicePool,
    key: BindingKey,
}

fn report(op: &str, result: Result<(), AudioError>) {
    if let Err(e) = result {
        log::debug!("Voice {} failed: {}", op, e);
    }
}

/// One playable layer of a sound event
#[derive(Debug)]
pub struct SoundLayer {
    description: Option<Arc<EventDescription>>,
    layer: usize,
    volume: f32,
    pitch: f32,
    offset: f32,
    looping: bool,
    relative: bool,
    stereo: bool,
    /// The held voice has been started at least once
    started: bool,
    binding: Option<Binding>,
}

impl SoundLayer {
    /// Layer `layer` of `description`
    pub fn new(description: Option<Arc<EventDescription>>, layer: usize) -> Self {
        Self {
            description,
            layer,
            volume: 1.0,
            pitch: 1.0,
            offset: 0.0,
            looping: false,
            relative: false,
            stereo: false,
            started: false,
            binding: None,
        }
    }

    /// Description this layer plays
    pub fn description(&self) -> Option<&Arc<EventDescription>> {
        self.description.as_ref()
    }

    /// Index of the description layer this layer plays
    pub fn layer_index(&self) -> usize {
        self.layer
    }

    /// Backend and voice, if the voice is still ours.
    ///
    /// Consumes an ended binding; a voice that stopped (rather than being
    /// stolen) rewinds the saved offset.
    fn live(&mut self) -> Option<(Arc<dyn AudioBackend>, VoiceId)> {
        let state = {
            let binding = self.binding.as_ref()?;
            binding.pool.poll(binding.key)
        };
        match state {
            BindingState::Live(voice) => {
                let backend = self.binding.as_ref()?.pool.backend()?;
                Some((backend, voice))
            }
            BindingState::Ended(end) => {
                if end == VoiceEnd::Stopped {
                    self.offset = 0.0;
                }
                self.binding = None;
                self.started = false;
                None
            }
        }
    }

    /// Give the held voice back to the pool, keeping the offset
    fn release(&mut self) {
        if let Some(binding) = self.binding.take() {
            binding.pool.release_binding(binding.key);
        }
        self.started = false;
    }

    /// Voice currently held, if any
    pub fn voice(&self) -> Option<VoiceId> {
        let binding = self.binding.as_ref()?;
        binding.pool.peek(binding.key)
    }

    /// Acquire and configure a voice without starting it.
    ///
    /// Returns the held voice if there already is one. `gain3d` is the
    /// distance attenuation the request will be heard at.
    pub fn prepare(&mut self, pool: &VoicePool, gain3d: f32) -> Option<VoiceId> {
        if let Some((backend, voice)) = self.live() {
            if !self.started || backend.is_playing(voice) {
                return Some(voice);
            }
            // Ran out before the backend's notification arrived
            self.release();
            self.offset = 0.0;
        }
        let description = self.description.clone()?;
        let sample = description.selected_sample(self.layer)?;

        let effective = gain3d * description.volume() * self.volume;
        if effective < pool.config().min_audible_gain {
            return None;
        }
        let backend = pool.backend()?;

        let (voice, key) = if description.flags().contains(AudioFlags::STREAM) {
            self.stereo = false;
            pool.acquire_stream_voice(sample)?
        } else {
            let (voice, key) = pool.acquire_voice(effective, description.priority())?;
            let Some(buffer) = pool.get_buffer(sample) else {
                pool.release_binding(key);
                return None;
            };
            if let Err(e) = backend.bind_buffer(voice, &buffer) {
                log::error!(
                    "Failed to bind '{}' for {}: {}",
                    sample,
                    description.name(),
                    e
                );
                pool.release_binding(key);
                return None;
            }
            self.stereo = buffer.channels() == 2;
            (voice, key)
        };

        let spread = description.pitch_randomize();
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        report("pitch", backend.set_pitch(voice, self.pitch * (description.pitch() + jitter)));
        report("volume", backend.set_volume(voice, self.volume * description.volume()));
        report("seek", backend.seek(voice, self.offset));

        self.started = false;
        self.binding = Some(Binding {
            pool: pool.clone(),
            key,
        });
        Some(voice)
    }

    fn looping(&self, description: &EventDescription) -> bool {
        description.flags().contains(AudioFlags::LOOP) || self.looping
    }

    fn log_voice(&self, mode: &str, backend: &dyn AudioBackend, voice: VoiceId) {
        if !log::log_enabled!(log::Level::Trace) {
            return;
        }
        if let (Some(description), Some(info)) = (&self.description, backend.voice_info(voice)) {
            log::trace!("{} {}:{}: {:?}", mode, description.name(), description.index(), info);
        }
    }

    /// Play without spatialization, at the listener
    pub fn play2d(&mut self, pool: &VoicePool) -> bool {
        if self.prepare(pool, 1.0).is_none() {
            return false;
        }
        let (Some((backend, voice)), Some(description)) =
            (self.live(), self.description.clone())
        else {
            return false;
        };

        self.relative = true;
        report("spatial", backend.set_spatial(voice, &SpatialParams::relative()));
        report("play", backend.play(voice, self.looping(&description)));
        self.started = true;
        self.log_voice("Play2D", &*backend, voice);
        true
    }

    /// Play at a world position
    pub fn play3d(&mut self, pool: &VoicePool, position: Vec2, velocity: Vec2) -> bool {
        let Some(description) = self.description.clone() else {
            return false;
        };
        let gain3d = pool.calculate_gain(
            position,
            description.min_dist(),
            description.max_dist(),
            description.rolloff(),
        );
        if self.prepare(pool, gain3d).is_none() {
            return false;
        }
        let Some((backend, voice)) = self.live() else {
            return false;
        };

        self.relative = false;
        let spatial = SpatialParams::world(
            position,
            velocity,
            description.rolloff(),
            description.min_dist(),
            description.max_dist(),
        );
        report("spatial", backend.set_spatial(voice, &spatial));
        report("play", backend.play(voice, self.looping(&description)));
        self.started = true;
        if self.stereo {
            log::warn!(
                "Stereo sample {}:{}:{} does not support spatialization",
                description.name(),
                description.index(),
                description.selected_sample(self.layer).unwrap_or_default()
            );
        }
        self.log_voice("Play3D", &*backend, voice);
        true
    }

    /// Stop and give the voice back to the pool; rewinds the offset
    pub fn stop(&mut self) {
        self.release();
        self.offset = 0.0;
    }

    /// Set the volume multiplier
    pub fn set_volume(&mut self, volume: f32) {
        debug_assert!(volume.is_finite());
        if let (Some((backend, voice)), Some(description)) = (self.live(), &self.description) {
            report("volume", backend.set_volume(voice, volume * description.volume()));
        }
        self.volume = volume;
    }

    /// Set the pitch multiplier
    pub fn set_pitch(&mut self, pitch: f32) {
        debug_assert!(pitch.is_finite());
        if let (Some((backend, voice)), Some(description)) = (self.live(), &self.description) {
            report("pitch", backend.set_pitch(voice, pitch * description.pitch()));
        }
        self.pitch = pitch;
    }

    /// Set the playback position in seconds
    pub fn set_offset(&mut self, seconds: f32) {
        debug_assert!(seconds.is_finite());
        if let Some((backend, voice)) = self.live() {
            report("seek", backend.seek(voice, seconds));
        }
        self.offset = seconds;
    }

    /// Loop regardless of the description's LOOP flag
    pub fn set_loop(&mut self, looping: bool) {
        if let Some((backend, voice)) = self.live() {
            report("loop", backend.set_looping(voice, looping));
        }
        self.looping = looping;
    }

    /// Save the voice's playback position as the offset
    pub fn update(&mut self) {
        if let Some((backend, voice)) = self.live() {
            match backend.current_time(voice) {
                Ok(time) => self.offset = time,
                Err(e) => log::debug!("Voice position unavailable: {}", e),
            }
        }
    }

    /// Volume multiplier
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Pitch multiplier
    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    /// Saved playback position in seconds
    pub fn offset(&self) -> f32 {
        self.offset
    }

    /// Local loop override
    pub fn is_loop(&self) -> bool {
        self.looping
    }

    /// Last played without spatialization
    pub fn is_relative(&self) -> bool {
        self.relative
    }

    /// Bound to a description
    pub fn is_valid(&self) -> bool {
        self.description.is_some()
    }

    /// Holds a voice that is producing sound
    pub fn is_playing(&self) -> bool {
        let Some(binding) = &self.binding else {
            return false;
        };
        match (binding.pool.peek(binding.key), binding.pool.backend()) {
            (Some(voice), Some(backend)) => backend.is_playing(voice),
            _ => false,
        }
    }

    /// Shared sample cursor of the description
    pub fn index(&self) -> usize {
        self.description.as_ref().map_or(0, |d| d.index())
    }

    /// Move the shared sample cursor
    pub fn set_index(&self, index: usize) {
        if let Some(description) = &self.description {
            description.set_index(index);
        }
    }

    /// Advance the shared sample cursor
    pub fn advance(&self, delta: i32) {
        if let Some(description) = &self.description {
            description.advance(delta);
        }
    }
}

impl Default for SoundLayer {
    fn default() -> Self {
        Self::new(None, 0)
    }
}

impl Drop for SoundLayer {
    fn drop(&mut self) {
        self.stop();
    }
}
