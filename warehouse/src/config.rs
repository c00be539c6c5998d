//! Construction-time configuration of a [`Storage`](crate::Storage).
//!
//! Two decisions are made at build time through cargo features:
//!
//! - `unsafe-storage`: the default cache strategy becomes [`Strategy::Raw`].
//! - `mask-256`, `mask-512`, `mask-1024`: the width of every [`Mask`](crate::Mask).
//!
//! Everything else is chosen per storage through [`Config`].

use crate::{
    schema::{DirectSchema, IndirectSchema, Schema},
    storage::{cache::Strategy, mem::GrowthStrategy},
};

/// Which [`Schema`] a storage maps element types with.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    /// Row is the element's registry id.
    Direct,
    /// Rows are assigned in registration order.
    #[default]
    Indirect,
}

impl SchemaKind {
    /// Build an empty schema of this kind.
    pub fn build(self) -> Box<dyn Schema> {
        match self {
            SchemaKind::Direct => Box::new(DirectSchema::new()),
            SchemaKind::Indirect => Box::new(IndirectSchema::new()),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Cache strategy for every table. Defaults to the feature selected strategy.
    pub strategy: Strategy,

    /// How caches grow.
    pub growth: GrowthStrategy,

    /// Rows allocated up front in each new table.
    pub initial_capacity: usize,

    /// How element types are mapped to mask rows.
    pub schema: SchemaKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strategy: Strategy::configured(),
            growth: GrowthStrategy::default(),
            initial_capacity: 0,
            schema: SchemaKind::default(),
        }
    }
}

impl Config {
    /// Use `strategy` for every table's caches.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Grow caches by `growth`.
    pub fn with_growth(mut self, growth: GrowthStrategy) -> Self {
        self.growth = growth;
        self
    }

    /// Allocate `initial_capacity` rows in each new table.
    pub fn with_initial_capacity(mut self, initial_capacity: usize) -> Self {
        self.initial_capacity = initial_capacity;
        self
    }

    /// Map element types to mask rows with a `schema` of this kind.
    pub fn with_schema(mut self, schema: SchemaKind) -> Self {
        self.schema = schema;
        self
    }
}
