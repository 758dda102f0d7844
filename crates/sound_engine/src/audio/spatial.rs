//! Distance attenuation
//!
//! Inverse distance clamped model, the OpenAL default: distances are
//! clamped to `[reference, max]` and gain falls off as
//! `reference / (reference + rolloff * (distance - reference))`.

use crate::foundation::math::{distance, Vec2};

/// Gain for a sound at `distance` from the listener
pub fn inverse_distance_clamped(
    distance: f32,
    reference: f32,
    max_distance: f32,
    rolloff: f32,
) -> f32 {
    let clamped = distance.max(reference).min(max_distance);
    let denominator = reference + rolloff * (clamped - reference);
    if denominator <= f32::EPSILON {
        // reference distance of zero: nothing to attenuate against
        return 1.0;
    }
    reference / denominator
}

/// Listener state used for gain calculations
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Listener {
    /// Listener position
    pub position: Vec2,
    /// Listener velocity
    pub velocity: Vec2,
}

impl Listener {
    /// Listener at the origin, at rest
    pub fn new() -> Self {
        Self {
            position: Vec2::zeros(),
            velocity: Vec2::zeros(),
        }
    }

    /// Gain of an emitter at `position` under the inverse distance clamped model
    pub fn attenuation(
        &self,
        position: Vec2,
        reference: f32,
        max_distance: f32,
        rolloff: f32,
    ) -> f32 {
        let range = distance(position, self.position);
        inverse_distance_clamped(range, reference, max_distance, rolloff)
    }
}

impl Default for Listener {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_attenuation_at_reference_distance() {
        let listener = Listener::new();
        assert_relative_eq!(listener.attenuation(Vec2::new(1.0, 0.0), 1.0, 10.0, 1.0), 1.0);
        // Inside the reference distance there is no boost
        assert_relative_eq!(listener.attenuation(Vec2::new(0.2, 0.0), 1.0, 10.0, 1.0), 1.0);
    }

    #[test]
    fn test_attenuation_at_max_distance() {
        let listener = Listener::new();
        assert_relative_eq!(listener.attenuation(Vec2::new(10.0, 0.0), 1.0, 10.0, 1.0), 0.1);
    }

    #[test]
    fn test_attenuation_beyond_max_distance() {
        let listener = Listener::new();
        assert_relative_eq!(listener.attenuation(Vec2::new(0.0, 50.0), 1.0, 10.0, 1.0), 0.1);
    }

    #[test]
    fn test_rolloff_scales_falloff() {
        assert_relative_eq!(inverse_distance_clamped(5.0, 1.0, 10.0, 0.0), 1.0);
        assert_relative_eq!(inverse_distance_clamped(5.0, 1.0, 10.0, 2.0), 1.0 / 9.0);
    }

    #[test]
    fn test_zero_reference_distance() {
        assert_relative_eq!(inverse_distance_clamped(0.0, 0.0, 10.0, 1.0), 1.0);
    }
}
