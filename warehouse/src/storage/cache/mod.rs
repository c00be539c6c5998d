//! Per-component row storage.
//!
//! Every table keeps one [`Cache`] per component type, a dense array indexed by [`Row`]. Two
//! interchangeable implementations exist:
//!
//! - [`BoxedCache<T>`]: a plain `Vec<T>`. Every access is bounds checked and the typed access
//!   path downcasts to the concrete cache.
//! - [`RawCache`]: type-erased memory managed through [`IndexedMemory`]. Access is pointer
//!   arithmetic behind a single length comparison.
//!
//! The strategy is picked once, when a table is built, through [`factory`]. Table logic only
//! ever sees `dyn Cache`. The `unsafe-storage` cargo feature flips [`Strategy::configured`] from
//! checked to raw.
//!
//! [`IndexedMemory`]: super::mem::IndexedMemory

mod boxed;
mod raw;

use std::any::Any;

pub use boxed::BoxedCache;
pub use raw::RawCache;

use crate::{
    element::{Component, ElementType},
    error::{Error, Result},
    storage::{Row, mem::GrowthStrategy},
};

/// The storage strategy used for the caches of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Boxed `Vec<T>` caches with checked access.
    Checked,
    /// Type-erased raw memory caches.
    Raw,
}

impl Strategy {
    /// The strategy selected by the crate features.
    pub const fn configured() -> Self {
        if cfg!(feature = "unsafe-storage") {
            Self::Raw
        } else {
            Self::Checked
        }
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Self::configured()
    }
}

/// Dense, row indexed storage of one component type.
pub trait Cache: Any {
    /// The element type stored.
    fn element(&self) -> &ElementType;

    /// The strategy implementing this cache.
    fn strategy(&self) -> Strategy;

    /// The number of populated rows.
    fn len(&self) -> usize;

    /// Whether no row is populated.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of rows that fit without growing.
    fn capacity(&self) -> usize;

    /// Make room for at least `additional` more rows.
    fn reserve(&mut self, additional: usize);

    /// Append a row holding the component's zero value.
    fn push_default(&mut self);

    /// Drop the value at `row` and move the last row into its place.
    fn swap_remove(&mut self, row: Row) -> Result<()>;

    /// Move the value at `row` to the end of `destination`, compacting this cache like
    /// [`Cache::swap_remove`].
    ///
    /// `destination` must store the same element with the same strategy.
    fn move_row(&mut self, row: Row, destination: &mut dyn Cache) -> Result<()>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl dyn Cache {
    /// Get a reference to the value at `row`.
    pub fn get<T: Component>(&self, row: Row) -> Result<&T> {
        let any = self.as_any();
        if let Some(boxed) = any.downcast_ref::<BoxedCache<T>>() {
            return boxed.get(row);
        }
        match any.downcast_ref::<RawCache>() {
            Some(raw) => raw.get::<T>(row),
            None => Err(self.mismatch::<T>()),
        }
    }

    /// Get a mutable reference to the value at `row`.
    pub fn get_mut<T: Component>(&mut self, row: Row) -> Result<&mut T> {
        let mismatch = self.mismatch::<T>();
        let any = self.as_any_mut();
        if any.is::<BoxedCache<T>>() {
            return match any.downcast_mut::<BoxedCache<T>>() {
                Some(boxed) => boxed.get_mut(row),
                None => Err(mismatch),
            };
        }
        match any.downcast_mut::<RawCache>() {
            Some(raw) => raw.get_mut::<T>(row),
            None => Err(mismatch),
        }
    }

    /// Replace the value at `row`, dropping the previous one.
    pub fn set<T: Component>(&mut self, row: Row, value: T) -> Result<()> {
        *self.get_mut::<T>(row)? = value;
        Ok(())
    }

    fn mismatch<T: Component>(&self) -> Error {
        Error::TypeMismatch {
            expected: self.element().name(),
            found: T::name(),
        }
    }
}

/// Build an empty cache for `element` using `strategy`.
pub fn factory(
    strategy: Strategy,
    element: &ElementType,
    growth: &GrowthStrategy,
    capacity: usize,
) -> Box<dyn Cache> {
    match strategy {
        Strategy::Checked => element.new_boxed_cache(capacity, growth.clone()),
        Strategy::Raw => Box::new(RawCache::with_capacity(*element, capacity, growth.clone())),
    }
}
