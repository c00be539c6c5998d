//! Particle system benchmark scenario.
//!
//! Simulates a high-volume particle system with:
//! - 100,000 particles
//! - Simple components: Position, Velocity, Lifetime, Color
//! - One pass per frame: movement, lifetime decay, fade, and destruction of dead particles
//!
//! Dead particles are destroyed through the deferred queue while the cursor holds their table,
//! then replaced in one batch once the frame's iteration is over. This exercises:
//! - High entity count iteration performance
//! - Deferred destruction draining on unlock
//! - Id recycling throughput

use std::sync::Arc;

use bappa_warehouse::{
    Config, Entry, Result, Storage,
    element::Registry,
    query::{Accessor, Cursor, Query},
    storage::TableId,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    components::{Color, Lifetime, Particle, Position, Velocity},
    scenarios::Scenario,
};

/// Configuration for the particle benchmark.
pub struct ParticleConfig {
    /// Total number of particles to maintain.
    pub particle_count: usize,
    /// Simulated delta time per frame.
    pub delta_time: f32,
    /// Random seed for reproducibility.
    pub seed: u64,
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self {
            particle_count: 100_000,
            delta_time: 1.0 / 60.0, // 60 FPS
            seed: 12345,
        }
    }
}

struct Accessors {
    position: Accessor<Position>,
    velocity: Accessor<Velocity>,
    lifetime: Accessor<Lifetime>,
    color: Accessor<Color>,
    particle: Accessor<Particle>,
}

/// Particle system benchmark scenario.
pub struct ParticleScenario {
    config: ParticleConfig,
    storage: Storage,
    access: Accessors,
    rng: ChaCha8Rng,
    table: Option<TableId>,
    cursor: Cursor,
}

impl ParticleScenario {
    /// Create a new particle scenario with default config.
    pub fn new() -> Self {
        Self::with_config(ParticleConfig::default())
    }

    /// Create a new particle scenario with custom config.
    pub fn with_config(config: ParticleConfig) -> Self {
        let registry = Arc::new(Registry::new());
        let access = Accessors {
            position: Accessor::new(&registry),
            velocity: Accessor::new(&registry),
            lifetime: Accessor::new(&registry),
            color: Accessor::new(&registry),
            particle: Accessor::new(&registry),
        };
        let cursor = Cursor::new(&Query::and([access.particle.element()]));
        Self {
            storage: Storage::new(registry, Config::default()),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            access,
            table: None,
            cursor,
            config,
        }
    }

    /// Get current particle count.
    pub fn current_count(&self) -> usize {
        self.storage.index().len()
    }

    /// Create `count` particles with randomized state.
    fn spawn(&mut self, count: usize) -> Result<()> {
        let Some(table) = self.table else {
            return Ok(());
        };
        if count == 0 {
            return Ok(());
        }
        for entry in self.storage.new_entries(table, count)? {
            self.randomize(entry)?;
        }
        Ok(())
    }

    fn randomize(&mut self, entry: Entry) -> Result<()> {
        let rng = &mut self.rng;
        let position = Position {
            x: rng.gen_range(-100.0..100.0),
            y: rng.gen_range(-100.0..100.0),
            z: rng.gen_range(-100.0..100.0),
        };
        let velocity = Velocity {
            x: rng.gen_range(-10.0..10.0),
            y: rng.gen_range(-10.0..10.0),
            z: rng.gen_range(-10.0..10.0),
        };
        let lifetime = Lifetime {
            remaining: rng.gen_range(0.1..1.0),
            total: 1.0,
        };
        let color = Color {
            r: rng.gen_range(0.0..1.0),
            g: rng.gen_range(0.0..1.0),
            b: rng.gen_range(0.0..1.0),
            a: 1.0,
        };
        self.storage.set(entry, position)?;
        self.storage.set(entry, velocity)?;
        self.storage.set(entry, lifetime)?;
        self.storage.set(entry, color)
    }
}

impl Default for ParticleScenario {
    fn default() -> Self {
        Self::new()
    }
}

impl Scenario for ParticleScenario {
    fn name(&self) -> &'static str {
        "particles"
    }

    fn description(&self) -> &'static str {
        "High-volume particle system with movement, lifetime, and respawn"
    }

    fn entity_count(&self) -> usize {
        self.config.particle_count
    }

    fn setup(&mut self) -> Result<()> {
        let table = self.storage.table_for(&[
            self.access.particle.element(),
            self.access.position.element(),
            self.access.velocity.element(),
            self.access.lifetime.element(),
            self.access.color.element(),
        ])?;
        self.table = Some(table);
        self.spawn(self.config.particle_count)
    }

    fn update(&mut self) -> Result<()> {
        let dt = self.config.delta_time;
        let a = &self.access;
        let storage = &mut self.storage;
        let mut dead = 0;

        self.cursor.reset(storage)?;
        while self.cursor.next(storage)? {
            let velocity = *a.velocity.get_from_cursor(&self.cursor, storage)?;
            let position = a.position.get_from_cursor_mut(&self.cursor, storage)?;
            position.x += velocity.x * dt;
            position.y += velocity.y * dt;
            position.z += velocity.z * dt;

            let lifetime = a.lifetime.get_from_cursor_mut(&self.cursor, storage)?;
            lifetime.remaining -= dt;
            let (remaining, total) = (lifetime.remaining, lifetime.total);

            if remaining <= 0.0 {
                storage.enqueue_destroy_entries(&[self.cursor.current_entry()?])?;
                dead += 1;
            } else {
                a.color.get_from_cursor_mut(&self.cursor, storage)?.a = remaining / total;
            }
        }

        self.spawn(dead)
    }

    fn teardown(&mut self) -> Result<()> {
        self.cursor.reset(&mut self.storage)?;
        let entries = self.storage.entries();
        if entries.is_empty() {
            return Ok(());
        }
        self.storage.destroy_entries(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> ParticleScenario {
        ParticleScenario::with_config(ParticleConfig {
            particle_count: 100,
            ..Default::default()
        })
    }

    #[test]
    fn particle_scenario_setup() {
        let mut scenario = small();

        scenario.setup().unwrap();
        assert_eq!(scenario.current_count(), 100);

        scenario.teardown().unwrap();
        assert_eq!(scenario.current_count(), 0);
    }

    #[test]
    fn particle_scenario_update() {
        let mut scenario = small();
        scenario.setup().unwrap();

        // Lifetimes are under a second, so every particle dies at least once.
        for _ in 0..90 {
            scenario.update().unwrap();
        }

        assert_eq!(scenario.current_count(), 100);
        assert!(scenario.storage.entries().iter().any(|entry| entry.generation().value() > 0));
        assert!(scenario.storage.tables().all(|table| !table.locked()));

        scenario.teardown().unwrap();
    }
}
