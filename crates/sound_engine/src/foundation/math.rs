//! Math types for the sound layer
//!
//! Sound emitters and the listener live on the game plane, so positions and
//! velocities are 2D. Backends that spatialize in 3D place them at z = 0.

pub use nalgebra::Vector2;

/// 2D vector type used for positions and velocities
pub type Vec2 = Vector2<f32>;

/// Euclidean distance between two points on the plane
pub fn distance(a: Vec2, b: Vec2) -> f32 {
    (a - b).norm()
}
