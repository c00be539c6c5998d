//! Common component types used across benchmarks.
//!
//! Sized like typical game components so cache layouts are representative.

use bappa_warehouse::Component;

// =============================================================================
// Transform Components
// =============================================================================

/// 3D position component (12 bytes).
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// 3D velocity component (12 bytes).
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// 4x4 transformation matrix (64 bytes).
#[derive(Component, Clone, Copy, Debug)]
pub struct Transform {
    pub matrix: [[f32; 4]; 4],
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            matrix: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }
}

/// Health component for damageable entities.
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct Health {
    pub current: f32,
    pub max: f32,
}

// =============================================================================
// Particle System Components
// =============================================================================

/// A particle marker.
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct Particle;

/// Particle lifetime tracking.
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct Lifetime {
    pub remaining: f32,
    pub total: f32,
}

/// RGBA color (16 bytes).
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

// =============================================================================
// Fragmentation Components
// =============================================================================

// Marker components for spreading entities over many tables.
macro_rules! define_marker_components {
    ($($name:ident),*) => {
        $(
            #[derive(Component, Clone, Copy, Debug, Default)]
            pub struct $name;
        )*
    };
}

define_marker_components!(MarkerA, MarkerB, MarkerC, MarkerD, MarkerE, MarkerF, MarkerG, MarkerH);

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn document_component_sizes() {
        assert_eq!(size_of::<Position>(), 12);
        assert_eq!(size_of::<Velocity>(), 12);
        assert_eq!(size_of::<Transform>(), 64);
        assert_eq!(size_of::<Health>(), 8);
        assert_eq!(size_of::<Lifetime>(), 8);
        assert_eq!(size_of::<Color>(), 16);

        // Markers occupy no cache memory.
        assert_eq!(size_of::<Particle>(), 0);
        assert_eq!(size_of::<MarkerA>(), 0);
    }
}
