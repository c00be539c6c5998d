use std::any::Any;

use crate::{
    element::{Component, ElementType},
    error::{Error, Result},
    storage::{
        Row,
        cache::{Cache, Strategy},
        mem::GrowthStrategy,
    },
};

/// A checked cache backed by a `Vec<T>`.
pub struct BoxedCache<T> {
    element: ElementType,
    data: Vec<T>,
    growth: GrowthStrategy,
}

impl<T: Component> BoxedCache<T> {
    /// Create an empty cache with room for `capacity` rows.
    pub fn with_capacity(element: ElementType, capacity: usize, growth: GrowthStrategy) -> Self {
        debug_assert!(element.is::<T>(), "boxed cache built for the wrong element");
        Self {
            element,
            data: Vec::with_capacity(capacity),
            growth,
        }
    }

    #[inline]
    pub fn get(&self, row: Row) -> Result<&T> {
        self.data
            .get(row.index())
            .ok_or_else(|| Error::access(row, self.data.len()))
    }

    #[inline]
    pub fn get_mut(&mut self, row: Row) -> Result<&mut T> {
        let len = self.data.len();
        self.data
            .get_mut(row.index())
            .ok_or_else(|| Error::access(row, len))
    }

    /// All populated rows in order.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    fn check_row(&self, row: Row) -> Result<()> {
        if row.index() < self.data.len() {
            Ok(())
        } else {
            Err(Error::access(row, self.data.len()))
        }
    }
}

impl<T: Component> Cache for BoxedCache<T> {
    #[inline]
    fn element(&self) -> &ElementType {
        &self.element
    }

    #[inline]
    fn strategy(&self) -> Strategy {
        Strategy::Checked
    }

    #[inline]
    fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.data.capacity()
    }

    fn reserve(&mut self, additional: usize) {
        let required = self.data.len() + additional;
        if required > self.data.capacity() {
            let target = self.growth.new_capacity(self.data.capacity(), required);
            self.data.reserve_exact(target - self.data.len());
        }
    }

    fn push_default(&mut self) {
        self.reserve(1);
        self.data.push(T::default());
    }

    fn swap_remove(&mut self, row: Row) -> Result<()> {
        self.check_row(row)?;
        self.data.swap_remove(row.index());
        Ok(())
    }

    fn move_row(&mut self, row: Row, destination: &mut dyn Cache) -> Result<()> {
        self.check_row(row)?;
        let destination = destination
            .as_any_mut()
            .downcast_mut::<BoxedCache<T>>()
            .ok_or(Error::IncompatibleCache(self.element.name()))?;
        destination.reserve(1);
        destination.data.push(self.data.swap_remove(row.index()));
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
