//! Realistic workloads against a [`Storage`](bappa_warehouse::Storage).
//!
//! - **Particles**: high entity count, simple components, short lifetimes

pub mod particles;

pub use particles::{ParticleConfig, ParticleScenario};

/// Common trait for benchmark scenarios.
pub trait Scenario {
    /// Human-readable name of the scenario.
    fn name(&self) -> &'static str;

    /// Brief description of what this scenario tests.
    fn description(&self) -> &'static str;

    /// Number of entities in this scenario.
    fn entity_count(&self) -> usize;

    /// Set up the scenario (create entities, initialize state).
    fn setup(&mut self) -> bappa_warehouse::Result<()>;

    /// Run one "frame" of the scenario.
    fn update(&mut self) -> bappa_warehouse::Result<()>;

    /// Clean up the scenario.
    fn teardown(&mut self) -> bappa_warehouse::Result<()>;
}
