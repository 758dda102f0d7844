//! Cross-module scenarios for the audio system, driven by the headless backend

mod event_scenarios;
