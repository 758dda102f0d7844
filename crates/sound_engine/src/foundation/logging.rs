//! Logging utilities
//!
//! The crate logs through the `log` facade; applications pick the sink.
//! `env_logger` is wired up here for binaries and tests.

pub use log::{debug, error, info, trace, warn};

/// Initialize `env_logger` from `RUST_LOG`. Later calls are ignored.
pub fn init() {
    let _ = env_logger::try_init();
}

/// Initialize `env_logger` with a default level, still overridable by `RUST_LOG`
pub fn init_with_level(level: log::LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_env("RUST_LOG")
        .try_init();
}

/// Logger for unit tests: output is captured by the test harness
#[cfg(test)]
pub(crate) fn init_for_tests() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}
