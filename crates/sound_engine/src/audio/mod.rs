//! Audio system
//!
//! Multiplexes many sound requests onto a small, fixed pool of backend
//! voices.
//!
//! - [`voice_pool::VoicePool`] owns the voices and the decoded-buffer cache
//!   and decides admission and eviction.
//! - [`description::EventDescription`] is the shared configuration of one
//!   named sound event, loaded through [`description::EventLibrary`].
//! - [`layer::SoundLayer`] binds one description layer to at most one voice.
//! - [`event::SoundEvent`] groups up to [`MAX_SOUND_LAYERS`] layers under a
//!   world position.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use sound_engine::audio::backend::headless::HeadlessBackend;
//! use sound_engine::audio::{EventDescription, SoundEvent, VoicePool, VoicePoolConfig};
//!
//! let backend = Arc::new(HeadlessBackend::new());
//! let pool = VoicePool::with_backend(VoicePoolConfig::default(), backend);
//! pool.init().unwrap();
//!
//! let desc = Arc::new(EventDescription::new("laser", vec![vec!["laser.wav".to_string()]]));
//! let mut event = SoundEvent::new(Some(desc));
//! event.play2d(&pool);
//! assert!(event.is_playing());
//!
//! pool.on_update();
//! pool.shutdown();
//! ```

pub mod backend;
pub mod description;
pub mod event;
pub mod layer;
pub(crate) mod registry;
pub mod resolver;
pub mod spatial;
pub mod voice_pool;

#[cfg(test)]
mod tests;

use std::path::PathBuf;

use thiserror::Error;

pub use backend::{
    AudioBackend, AudioBackendConfig, BufferHandle, SpatialParams, VoiceEvent, VoiceId,
};
pub use description::{AudioFlags, EventDescription, EventLibrary, EventLibraryConfig, EventParams};
pub use event::SoundEvent;
pub use layer::SoundLayer;
pub use resolver::{PathResolver, SearchPathResolver};
pub use voice_pool::{VoicePool, VoicePoolConfig};

/// Maximum number of layers a sound event plays
pub const MAX_SOUND_LAYERS: usize = 3;

/// Audio system errors
#[derive(Error, Debug)]
pub enum AudioError {
    /// Backend used before `initialize` succeeded
    #[error("Audio backend not initialized")]
    BackendNotInitialized,

    /// Backend could not open its output
    #[error("Audio backend initialization failed: {0}")]
    BackendInitFailed(String),

    /// Decoding a file into a buffer failed
    #[error("Failed to load '{}': {reason}", .path.display())]
    LoadFailed {
        /// File that was requested
        path: PathBuf,
        /// Decoder or I/O message
        reason: String,
    },

    /// Opening a streaming voice failed
    #[error("Failed to open stream '{}': {reason}", .path.display())]
    StreamOpenFailed {
        /// File that was requested
        path: PathBuf,
        /// Decoder or I/O message
        reason: String,
    },

    /// Voice operation rejected by the backend
    #[error("Playback failed: {0}")]
    PlaybackFailed(String),

    /// Voice or buffer id is unknown to the backend
    #[error("Invalid voice handle")]
    InvalidHandle,
}
