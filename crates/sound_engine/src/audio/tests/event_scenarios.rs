//! Integration tests for sound events over a shared voice pool
//!
//! Descriptions come from a parsed library, events play through the pool and
//! the headless backend stands in for the mixing thread.

use std::sync::Arc;
use std::thread;

use approx::assert_relative_eq;

use crate::audio::backend::headless::HeadlessBackend;
use crate::audio::backend::AudioBackend;
use crate::audio::{
    AudioFlags, EventDescription, EventLibrary, EventLibraryConfig, SoundEvent, VoicePool,
    VoicePoolConfig,
};
use crate::config::{Config, ConfigFormat};
use crate::foundation::math::Vec2;

const LIBRARY: &str = r#"
[events.laser]
samples = [["laser_a.wav", "laser_b.wav", "laser_c.wav"]]
flags = "ROUND_ROBIN"
volume = 0.8

[events.explosion]
samples = [["boom_low.wav"], ["boom_high.wav"]]
priority = 2
min_dist = 5.0
max_dist = 500.0

[events.theme]
samples = [["theme.ogg"]]
flags = "STREAM | LOOP | MUSIC"
volume = 0.5
"#;

fn backend() -> Arc<HeadlessBackend> {
    Arc::new(
        HeadlessBackend::new()
            .with_clip("laser_a.wav", 0.1, 1)
            .with_clip("laser_b.wav", 0.2, 1)
            .with_clip("laser_c.wav", 0.3, 1)
            .with_clip("boom_low.wav", 1.5, 1)
            .with_clip("boom_high.wav", 1.0, 2)
            .with_clip("theme.ogg", 120.0, 2),
    )
}

fn pool(backend: &Arc<HeadlessBackend>, static_voices: usize) -> VoicePool {
    crate::foundation::logging::init_for_tests();
    let config = VoicePoolConfig {
        static_voices,
        ..VoicePoolConfig::default()
    };
    let pool = VoicePool::with_backend(config, backend.clone());
    pool.init().unwrap();
    pool
}

fn library() -> EventLibrary {
    let config = EventLibraryConfig::from_str_with_format(LIBRARY, ConfigFormat::Toml).unwrap();
    EventLibrary::from_config(config)
}

fn clip_length(backend: &HeadlessBackend, event: &SoundEvent) -> Option<f32> {
    let voice = event.layer(0)?.voice()?;
    backend.voice_info(voice)?.total_time
}

#[test]
fn test_round_robin_cycles_samples() {
    let backend = backend();
    let pool = pool(&backend, 8);
    let library = library();
    let laser = library.get("laser").unwrap();
    assert!(laser.flags().contains(AudioFlags::ROUND_ROBIN));

    let mut played = Vec::new();
    for _ in 0..4 {
        let mut event = SoundEvent::new(Some(laser.clone()));
        event.play2d(&pool);
        played.push(clip_length(&backend, &event).unwrap());
        event.advance(1);
    }
    for (length, expected) in played.iter().zip([0.1, 0.2, 0.3, 0.1]) {
        assert_relative_eq!(*length, expected);
    }
    // Each sample decoded once
    assert_eq!(backend.buffer_loads(), 3);
}

#[test]
fn test_layered_event_occupies_one_voice_per_layer() {
    let backend = backend();
    let pool = pool(&backend, 8);
    let mut explosion = SoundEvent::new(library().get("explosion"));

    explosion.set_pos(Vec2::new(3.0, 4.0));
    explosion.play3d(&pool);
    assert_eq!(explosion.layer_count(), 2);
    assert_eq!(pool.sources_used(), 2);

    // Inside min_dist: no attenuation
    let voice = explosion.layer(1).unwrap().voice().unwrap();
    assert_relative_eq!(backend.calculate_gain(voice).unwrap(), 1.0);

    // The shorter layer ends first; the event keeps playing
    backend.advance(1.2);
    pool.on_update();
    assert!(explosion.is_playing());
    assert_eq!(pool.sources_used(), 1);

    backend.advance(0.5);
    pool.on_update();
    assert!(!explosion.is_playing());
    assert_eq!(pool.sources_used(), 0);
}

#[test]
fn test_capacity_two_eviction_sequence() {
    let backend = backend();
    let pool = pool(&backend, 2);
    let event = |volume: f32, priority: i32| {
        let desc = EventDescription::new("shot", vec![vec!["laser_c.wav".to_string()]])
            .with_volume(volume)
            .with_priority(priority);
        SoundEvent::new(Some(Arc::new(desc)))
    };

    let mut a = event(0.5, 0);
    let mut b = event(0.8, 0);
    a.play2d(&pool);
    b.play2d(&pool);

    // Same priority, quieter than everything held: dropped
    let mut quiet = event(0.3, 0);
    quiet.play2d(&pool);
    assert!(!quiet.is_playing());
    assert!(a.is_playing() && b.is_playing());

    // Same priority, louder than the quietest: takes its voice
    let mut c = event(0.6, 0);
    c.play2d(&pool);
    assert!(c.is_playing());
    assert!(!a.is_playing());
    assert!(b.is_playing());

    // Higher priority wins even when barely audible
    let mut d = event(0.01, 1);
    d.play2d(&pool);
    assert!(d.is_playing());
    assert!(!c.is_playing());

    // Lowest priority is stolen first, regardless of gain
    let mut e = event(1.0, 0);
    e.play2d(&pool);
    assert!(e.is_playing());
    assert!(!b.is_playing());
    assert!(d.is_playing());
    assert_eq!(pool.sources_used(), 2);
}

#[test]
fn test_music_streams_separately() {
    let backend = backend();
    let pool = pool(&backend, 1);
    let library = library();

    let mut theme = SoundEvent::new(library.get("theme"));
    theme.play2d(&pool);
    let mut laser = SoundEvent::new(library.get("laser"));
    laser.play2d(&pool);

    assert!(theme.is_playing());
    assert!(laser.is_playing());
    assert_eq!(backend.stream_opens(), 1);
    assert_eq!(pool.sources_used(), 2);

    // Looping stream survives past its length
    backend.advance(200.0);
    pool.on_update();
    assert!(theme.is_playing());
}

#[test]
fn test_listener_moves_sounds_in_and_out_of_range() {
    let backend = backend();
    let pool = pool(&backend, 4);
    let desc = Arc::new(
        EventDescription::new("hum", vec![vec!["boom_low.wav".to_string()]])
            .with_attenuation(1.0, 1.0, 2000.0),
    );
    let mut hum = SoundEvent::new(Some(desc));
    hum.set_pos(Vec2::new(1500.0, 0.0));

    hum.play3d(&pool);
    assert!(!hum.is_playing());
    assert_eq!(backend.voice_count(), 0);

    pool.set_listener(Vec2::new(1490.0, 0.0), Vec2::zeros());
    hum.play3d(&pool);
    assert!(hum.is_playing());
    assert_eq!(backend.listener_position(), Vec2::new(1490.0, 0.0));
}

#[test]
fn test_events_outlive_shutdown() {
    let backend = backend();
    let pool = pool(&backend, 4);
    let mut laser = SoundEvent::new(library().get("laser"));
    laser.play2d(&pool);

    pool.shutdown();
    assert!(!laser.is_playing());
    laser.stop();
    laser.update();

    pool.init().unwrap();
    laser.play2d(&pool);
    assert!(laser.is_playing());
}

#[test]
fn test_notifications_from_another_thread() {
    let backend = backend();
    let pool = pool(&backend, 6);
    let library = library();
    let laser = library.get("laser").unwrap();

    let mixer = {
        let backend = backend.clone();
        thread::spawn(move || {
            for _ in 0..200 {
                backend.advance(0.01);
                thread::yield_now();
            }
        })
    };

    let mut events: Vec<SoundEvent> = Vec::new();
    for i in 0..200 {
        let mut event = SoundEvent::new(Some(laser.clone()));
        event.set_volume(0.2 + (i % 5) as f32 * 0.2);
        event.play2d(&pool);
        event.advance(1);
        events.push(event);
        if events.len() > 10 {
            events.remove(0);
        }

        pool.on_update();
        for event in &mut events {
            event.update();
        }
        assert!(pool.sources_used() <= pool.sources_total());
        assert!(backend.voice_count() <= 6);
    }
    mixer.join().unwrap();

    events.clear();
    pool.on_update();
    assert_eq!(pool.sources_used(), 0);
}
