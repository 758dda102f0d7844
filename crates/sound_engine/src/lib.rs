//! # Sound Engine
//!
//! Event-based sound playback over a fixed pool of audio voices.
//!
//! ## Features
//!
//! - **Voice Pool**: Priority- and audibility-based voice allocation and stealing
//! - **Sound Events**: Layered events with shared round-robin or random sample selection
//! - **Buffer Cache**: Each sample is decoded once per session
//! - **Thread Safety**: Backend completion is queued and applied on the owning thread
//! - **Backends**: Headless simulation, and Rodio output behind the `rodio` feature
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sound_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     sound_engine::foundation::logging::init();
//!
//!     let library = EventLibrary::load_from_file("resources/audio/events.toml")?;
//!     let pool = VoicePool::with_default_backend(VoicePoolConfig::default());
//!     pool.init()?;
//!
//!     let mut laser = SoundEvent::new(library.get("laser"));
//!     laser.set_pos(Vec2::new(10.0, 4.0));
//!     laser.play3d(&pool);
//!
//!     loop {
//!         // Once per frame
//!         pool.set_listener(Vec2::zeros(), Vec2::zeros());
//!         pool.on_update();
//!         laser.update();
//!         if !laser.is_playing() {
//!             break;
//!         }
//!     }
//!
//!     pool.shutdown();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod audio;
pub mod config;
pub mod foundation;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        audio::{
            AudioBackend, AudioBackendConfig, AudioError, AudioFlags, EventDescription,
            EventLibrary, EventLibraryConfig, EventParams, PathResolver, SearchPathResolver,
            SoundEvent, SoundLayer, VoiceId, VoicePool, VoicePoolConfig, MAX_SOUND_LAYERS,
        },
        config::{Config, ConfigError},
        foundation::math::Vec2,
    };
}
