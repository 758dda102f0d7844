//! Sound events
//!
//! A [`SoundEvent`] is the handle game code keeps for one logical sound: a
//! description, a world position and velocity, and one [`SoundLayer`] per
//! description layer (at most [`MAX_SOUND_LAYERS`]).

use std::sync::Arc;

use crate::audio::description::EventDescription;
use crate::audio::layer::SoundLayer;
use crate::audio::voice_pool::VoicePool;
use crate::audio::MAX_SOUND_LAYERS;
use crate::foundation::math::Vec2;

/// Layered sound handle
#[derive(Debug, Default)]
pub struct SoundEvent {
    description: Option<Arc<EventDescription>>,
    position: Vec2,
    velocity: Vec2,
    layers: Vec<SoundLayer>,
}

impl SoundEvent {
    /// Create an event for `description`
    pub fn new(description: Option<Arc<EventDescription>>) -> Self {
        let mut event = Self::default();
        event.set_description(description);
        event
    }

    /// Rebind to a new description; existing layers are stopped
    pub fn set_description(&mut self, description: Option<Arc<EventDescription>>) {
        self.layers.clear();
        if let Some(desc) = &description {
            let count = desc.layer_count().min(MAX_SOUND_LAYERS);
            self.layers = (0..count).map(|i| SoundLayer::new(Some(Arc::clone(desc)), i)).collect();
        }
        self.description = description;
    }

    /// Bound description
    pub fn description(&self) -> Option<&Arc<EventDescription>> {
        self.description.as_ref()
    }

    fn audible(&self, pool: &VoicePool) -> bool {
        let threshold = pool.config().min_audible_gain;
        self.description
            .as_ref()
            .is_some_and(|desc| desc.layer_count() > 0 && desc.volume() >= threshold)
    }

    /// Play every layer without spatialization
    pub fn play2d(&mut self, pool: &VoicePool) {
        if !self.audible(pool) {
            return;
        }
        for layer in &mut self.layers {
            layer.play2d(pool);
        }
    }

    /// Play every layer at the event's position
    pub fn play3d(&mut self, pool: &VoicePool) {
        if !self.audible(pool) {
            return;
        }
        let (position, velocity) = (self.position, self.velocity);
        for layer in &mut self.layers {
            layer.play3d(pool, position, velocity);
        }
    }

    /// Stop every layer
    pub fn stop(&mut self) {
        for layer in &mut self.layers {
            layer.stop();
        }
    }

    /// Save every layer's playback position
    pub fn update(&mut self) {
        for layer in &mut self.layers {
            layer.update();
        }
    }

    /// Any layer producing sound
    pub fn is_playing(&self) -> bool {
        self.layers.iter().any(SoundLayer::is_playing)
    }

    /// Set the volume multiplier of every layer
    pub fn set_volume(&mut self, volume: f32) {
        for layer in &mut self.layers {
            layer.set_volume(volume);
        }
    }

    /// Set the volume multiplier of one layer
    pub fn set_layer_volume(&mut self, index: usize, volume: f32) {
        if let Some(layer) = self.layers.get_mut(index) {
            layer.set_volume(volume);
        }
    }

    /// Set the pitch multiplier of every layer
    pub fn set_pitch(&mut self, pitch: f32) {
        for layer in &mut self.layers {
            layer.set_pitch(pitch);
        }
    }

    /// Set the pitch multiplier of one layer
    pub fn set_layer_pitch(&mut self, index: usize, pitch: f32) {
        if let Some(layer) = self.layers.get_mut(index) {
            layer.set_pitch(pitch);
        }
    }

    /// Seek every layer
    pub fn set_offset(&mut self, seconds: f32) {
        for layer in &mut self.layers {
            layer.set_offset(seconds);
        }
    }

    /// Set the loop override of every layer
    pub fn set_loop(&mut self, looping: bool) {
        for layer in &mut self.layers {
            layer.set_loop(looping);
        }
    }

    /// Advance the description's shared sample cursor
    pub fn advance(&self, delta: i32) {
        if let Some(desc) = &self.description {
            desc.advance(delta);
        }
    }

    /// Set the world position used by [`play3d`](Self::play3d)
    pub fn set_pos(&mut self, position: Vec2) {
        self.position = position;
    }

    /// Set the world velocity used by [`play3d`](Self::play3d)
    pub fn set_vel(&mut self, velocity: Vec2) {
        self.velocity = velocity;
    }

    /// World position
    pub fn pos(&self) -> Vec2 {
        self.position
    }

    /// World velocity
    pub fn vel(&self) -> Vec2 {
        self.velocity
    }

    /// Number of layers
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// One layer
    pub fn layer(&self, index: usize) -> Option<&SoundLayer> {
        self.layers.get(index)
    }

    /// One layer, mutably
    pub fn layer_mut(&mut self, index: usize) -> Option<&mut SoundLayer> {
        self.layers.get_mut(index)
    }

    /// Volume multiplier of the first layer
    pub fn volume(&self) -> f32 {
        self.layers.first().map_or(0.0, SoundLayer::volume)
    }

    /// Pitch multiplier of the first layer
    pub fn pitch(&self) -> f32 {
        self.layers.first().map_or(0.0, SoundLayer::pitch)
    }

    /// Saved offset of the first layer
    pub fn offset(&self) -> f32 {
        self.layers.first().map_or(0.0, SoundLayer::offset)
    }

    /// Loop override of the first layer
    pub fn is_loop(&self) -> bool {
        self.layers.first().is_some_and(SoundLayer::is_loop)
    }

    /// Whether the first layer last played without spatialization
    pub fn is_relative(&self) -> bool {
        self.layers.first().is_some_and(SoundLayer::is_relative)
    }

    /// Bound to a description
    pub fn is_valid(&self) -> bool {
        self.description.is_some()
    }
}

impl Clone for SoundEvent {
    /// Same description and placement, with fresh layers
    fn clone(&self) -> Self {
        let mut event = Self::new(self.description.clone());
        event.position = self.position;
        event.velocity = self.velocity;
        event
    }
}
