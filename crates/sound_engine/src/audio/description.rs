//! Sound event descriptions
//!
//! An [`EventDescription`] is the per-event-type configuration loaded once
//! per session: layers of candidate samples plus volume, pitch and
//! attenuation parameters. It is shared by every sound event that plays it.
//!
//! The one mutable piece is the sample cursor. It belongs to the
//! description, not to any single layer: advancing it from one event changes
//! which sample every sibling event plays next.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::foundation::math::Vec2;

bitflags! {
    /// Playback flags of an event description
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct AudioFlags: u32 {
        /// Stream from disk instead of using a cached buffer
        const STREAM      = 1 << 0;
        /// Loop playback
        const LOOP        = 1 << 1;
        /// Step through samples in order instead of picking randomly
        const ROUND_ROBIN = 1 << 2;
        /// Background music
        const MUSIC       = 1 << 3;
        /// Crossfade between tracks
        const CROSSFADE   = 1 << 4;
        /// Clustered one-shots
        const CLUSTER     = 1 << 5;
    }
}

/// Serialized form of an event description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventParams {
    /// Layers, each a list of candidate sample identifiers
    pub samples: Vec<Vec<String>>,
    /// Base volume
    pub volume: f32,
    /// Base pitch
    pub pitch: f32,
    /// Random pitch offset range, applied per play
    pub pitch_randomize: f32,
    /// Playback flags
    pub flags: AudioFlags,
    /// Rolloff factor
    pub rolloff: f32,
    /// Reference distance
    pub min_dist: f32,
    /// Maximum attenuation distance
    pub max_dist: f32,
    /// Voice priority
    pub priority: i32,
    /// Stereo pan delay
    pub delay: Vec2,
}

impl Default for EventParams {
    fn default() -> Self {
        Self {
            samples: Vec::new(),
            volume: 1.0,
            pitch: 1.0,
            pitch_randomize: 0.0,
            flags: AudioFlags::empty(),
            rolloff: 1.0,
            min_dist: 1.0,
            max_dist: 9_999_999_999.0,
            priority: 0,
            delay: Vec2::zeros(),
        }
    }
}

/// Per-event-type configuration shared by all events that play it
#[derive(Debug)]
pub struct EventDescription {
    name: String,
    params: EventParams,
    cursor: AtomicUsize,
}

impl EventDescription {
    /// Create a description with default parameters
    pub fn new<S: Into<String>>(name: S, samples: Vec<Vec<String>>) -> Self {
        Self::from_params(
            name,
            EventParams {
                samples,
                ..EventParams::default()
            },
        )
    }

    /// Create a description from loaded parameters
    pub fn from_params<S: Into<String>>(name: S, params: EventParams) -> Self {
        Self {
            name: name.into(),
            params,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Set base volume
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.params.volume = volume;
        self
    }

    /// Set base pitch and its random range
    pub fn with_pitch(mut self, pitch: f32, randomize: f32) -> Self {
        self.params.pitch = pitch;
        self.params.pitch_randomize = randomize;
        self
    }

    /// Set flags
    pub fn with_flags(mut self, flags: AudioFlags) -> Self {
        self.params.flags = flags;
        self
    }

    /// Set voice priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.params.priority = priority;
        self
    }

    /// Set attenuation parameters
    pub fn with_attenuation(mut self, rolloff: f32, min_dist: f32, max_dist: f32) -> Self {
        self.params.rolloff = rolloff;
        self.params.min_dist = min_dist;
        self.params.max_dist = max_dist;
        self
    }

    /// Event name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All parameters
    pub fn params(&self) -> &EventParams {
        &self.params
    }

    /// Base volume
    pub fn volume(&self) -> f32 {
        self.params.volume
    }

    /// Base pitch
    pub fn pitch(&self) -> f32 {
        self.params.pitch
    }

    /// Random pitch range
    pub fn pitch_randomize(&self) -> f32 {
        self.params.pitch_randomize
    }

    /// Playback flags
    pub fn flags(&self) -> AudioFlags {
        self.params.flags
    }

    /// Voice priority
    pub fn priority(&self) -> i32 {
        self.params.priority
    }

    /// Rolloff factor
    pub fn rolloff(&self) -> f32 {
        self.params.rolloff
    }

    /// Reference distance
    pub fn min_dist(&self) -> f32 {
        self.params.min_dist
    }

    /// Maximum attenuation distance
    pub fn max_dist(&self) -> f32 {
        self.params.max_dist
    }

    /// Stereo pan delay
    pub fn delay(&self) -> Vec2 {
        self.params.delay
    }

    /// Number of layers
    pub fn layer_count(&self) -> usize {
        self.params.samples.len()
    }

    /// Candidate samples of one layer (empty for an unknown layer)
    pub fn samples(&self, layer: usize) -> &[String] {
        self.params.samples.get(layer).map_or(&[], Vec::as_slice)
    }

    /// Total sample identifiers across all layers
    pub fn sample_count(&self) -> usize {
        self.params.samples.iter().map(Vec::len).sum()
    }

    /// Current cursor
    pub fn index(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Move the cursor; visible to every event bound to this description
    pub fn set_index(&self, index: usize) {
        self.cursor.store(index, Ordering::Relaxed);
    }

    /// Sample the cursor selects in `layer`, clamped to that layer's length
    pub fn selected_sample(&self, layer: usize) -> Option<&str> {
        let samples = self.samples(layer);
        let last = samples.len().checked_sub(1)?;
        Some(samples[self.index().min(last)].as_str())
    }

    /// Advance the shared cursor.
    ///
    /// Round-robin descriptions step by `delta` (negative steps back).
    /// Otherwise a new track is drawn at random, never the current one.
    pub fn advance(&self, delta: i32) {
        let Some(first) = self.params.samples.first() else {
            return;
        };
        let tracks = first.len();
        if tracks <= 1 {
            self.set_index(0);
        } else if self.params.flags.contains(AudioFlags::ROUND_ROBIN) {
            let next = (self.index() as i64 + i64::from(delta)).rem_euclid(tracks as i64);
            self.set_index(next as usize);
        } else {
            let last = self.index();
            let mut rng = rand::thread_rng();
            let next = if last < tracks {
                // draw from the other tracks, skipping over the current one
                let pick = rng.gen_range(0..tracks - 1);
                if pick >= last { pick + 1 } else { pick }
            } else {
                rng.gen_range(0..tracks)
            };
            self.set_index(next);
        }
    }
}

impl Default for EventDescription {
    fn default() -> Self {
        Self::from_params(String::new(), EventParams::default())
    }
}

/// Serialized event library: event name → parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLibraryConfig {
    /// Events by name
    pub events: BTreeMap<String, EventParams>,
}

impl Config for EventLibraryConfig {}

/// Registry of loaded descriptions, shared with the events that play them
#[derive(Debug, Default)]
pub struct EventLibrary {
    events: BTreeMap<String, Arc<EventDescription>>,
}

impl EventLibrary {
    /// Create an empty library
    pub fn new() -> Self {
        Self::default()
    }

    /// Build descriptions from configuration
    pub fn from_config(config: EventLibraryConfig) -> Self {
        let events = config
            .events
            .into_iter()
            .map(|(name, params)| {
                let description = Arc::new(EventDescription::from_params(name.clone(), params));
                (name, description)
            })
            .collect::<BTreeMap<_, _>>();
        log::info!("Loaded {} sound event descriptions", events.len());
        Self { events }
    }

    /// Load a `.toml` or `.ron` event file
    pub fn load_from_file(
        path: impl AsRef<std::path::Path>,
    ) -> Result<Self, crate::config::ConfigError> {
        Ok(Self::from_config(EventLibraryConfig::load_from_file(path)?))
    }

    /// Add or replace a description
    pub fn insert(&mut self, description: EventDescription) -> Arc<EventDescription> {
        let description = Arc::new(description);
        self.events.insert(description.name().to_string(), Arc::clone(&description));
        description
    }

    /// Look a description up by name
    pub fn get(&self, name: &str) -> Option<Arc<EventDescription>> {
        self.events.get(name).cloned()
    }

    /// Event names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.events.keys().map(String::as_str)
    }

    /// Number of descriptions
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if the library is empty
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Total sample identifiers across all descriptions
    pub fn sample_count(&self) -> usize {
        self.events.values().map(|d| d.sample_count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFormat;

    fn tracks(n: usize) -> Vec<Vec<String>> {
        vec![(0..n).map(|i| format!("track{i}.ogg")).collect()]
    }

    #[test]
    fn test_round_robin_cycles() {
        let desc = EventDescription::new("music", tracks(3)).with_flags(AudioFlags::ROUND_ROBIN);
        let mut seen = vec![desc.index()];
        for _ in 0..6 {
            desc.advance(1);
            seen.push(desc.index());
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_round_robin_backwards() {
        let desc = EventDescription::new("music", tracks(3)).with_flags(AudioFlags::ROUND_ROBIN);
        desc.advance(-1);
        assert_eq!(desc.index(), 2);
        desc.advance(-4);
        assert_eq!(desc.index(), 1);
    }

    #[test]
    fn test_random_never_repeats() {
        let desc = EventDescription::new("hit", tracks(2));
        let mut last = desc.index();
        for _ in 0..100 {
            desc.advance(1);
            assert_ne!(desc.index(), last);
            assert!(desc.index() < 2);
            last = desc.index();
        }

        let desc = EventDescription::new("hit", tracks(5));
        let mut last = desc.index();
        for _ in 0..200 {
            desc.advance(1);
            assert_ne!(desc.index(), last);
            assert!(desc.index() < 5);
            last = desc.index();
        }
    }

    #[test]
    fn test_single_track_resets() {
        let desc = EventDescription::new("one", tracks(1));
        desc.set_index(4);
        desc.advance(1);
        assert_eq!(desc.index(), 0);
    }

    #[test]
    fn test_no_layers_is_noop() {
        let desc = EventDescription::new("empty", Vec::new());
        desc.set_index(2);
        desc.advance(1);
        assert_eq!(desc.index(), 2);
    }

    #[test]
    fn test_selected_sample_clamps_per_layer() {
        let samples = vec![
            vec!["a0".to_string(), "a1".to_string(), "a2".to_string()],
            vec!["b0".to_string()],
            Vec::new(),
        ];
        let desc = EventDescription::new("engine", samples);
        desc.set_index(2);
        assert_eq!(desc.selected_sample(0), Some("a2"));
        assert_eq!(desc.selected_sample(1), Some("b0"));
        assert_eq!(desc.selected_sample(2), None);
        assert_eq!(desc.selected_sample(7), None);
        // Clamping does not move the shared cursor
        assert_eq!(desc.index(), 2);
    }

    #[test]
    fn test_sample_count() {
        let samples = vec![vec!["a".to_string(), "b".to_string()], vec!["c".to_string()]];
        let desc = EventDescription::new("x", samples);
        assert_eq!(desc.sample_count(), 3);
        assert_eq!(desc.layer_count(), 2);
    }

    #[test]
    fn test_defaults() {
        let desc = EventDescription::default();
        assert_eq!(desc.volume(), 1.0);
        assert_eq!(desc.pitch(), 1.0);
        assert_eq!(desc.rolloff(), 1.0);
        assert_eq!(desc.min_dist(), 1.0);
        assert_eq!(desc.priority(), 0);
        assert!(desc.flags().is_empty());
    }

    #[test]
    fn test_library_from_toml() {
        let text = r#"
            [events.explosion]
            samples = [["boom1.wav", "boom2.wav"], ["debris.wav"]]
            volume = 0.8
            priority = 2
            flags = "ROUND_ROBIN | CLUSTER"

            [events.theme]
            samples = [["theme.ogg"]]
            flags = "STREAM | LOOP | MUSIC"
        "#;
        let config = EventLibraryConfig::from_str_with_format(text, ConfigFormat::Toml).unwrap();
        let library = EventLibrary::from_config(config);

        assert_eq!(library.len(), 2);
        assert_eq!(library.names().collect::<Vec<_>>(), vec!["explosion", "theme"]);
        assert_eq!(library.sample_count(), 4);

        let explosion = library.get("explosion").unwrap();
        assert_eq!(explosion.name(), "explosion");
        assert_eq!(explosion.volume(), 0.8);
        assert_eq!(explosion.priority(), 2);
        assert_eq!(explosion.pitch(), 1.0);
        assert_eq!(explosion.flags(), AudioFlags::ROUND_ROBIN | AudioFlags::CLUSTER);

        let theme = library.get("theme").unwrap();
        assert!(theme.flags().contains(AudioFlags::STREAM | AudioFlags::LOOP));
        assert!(library.get("missing").is_none());
    }

    #[test]
    fn test_library_shares_descriptions() {
        let mut library = EventLibrary::new();
        let inserted = library.insert(EventDescription::new("click", tracks(2)));
        let fetched = library.get("click").unwrap();
        assert!(Arc::ptr_eq(&inserted, &fetched));

        fetched.set_index(1);
        assert_eq!(inserted.index(), 1);
    }
}
