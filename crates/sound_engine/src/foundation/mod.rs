//! Foundation module - Core utilities and types
//!
//! - Math types for positions and velocities
//! - Logging setup

pub mod math;
pub mod logging;
