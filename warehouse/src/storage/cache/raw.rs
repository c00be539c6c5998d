use std::{any::Any, ptr};

use crate::{
    element::{Component, ElementType},
    error::{Error, Result},
    storage::{
        Row,
        cache::{Cache, Strategy},
        mem::{GrowthStrategy, IndexedMemory},
    },
};

/// A type-erased cache over [`IndexedMemory`].
///
/// Rows `0..len` are always initialized. Typed access compares the requested type against the
/// element once and then reads through a raw pointer.
pub struct RawCache {
    element: ElementType,
    data: IndexedMemory,
    len: usize,
}

impl RawCache {
    /// Create an empty cache with room for `capacity` rows.
    pub fn with_capacity(element: ElementType, capacity: usize, growth: GrowthStrategy) -> Self {
        Self {
            data: IndexedMemory::with_capacity(element.layout(), capacity, growth),
            element,
            len: 0,
        }
    }

    pub fn get<T: Component>(&self, row: Row) -> Result<&T> {
        self.ensure_type::<T>()?;
        self.check_row(row)?;
        // SAFETY: T matches the element layout and the row is initialized.
        unsafe { Ok(&*(self.data.ptr_at(row.index()).as_ptr() as *const T)) }
    }

    pub fn get_mut<T: Component>(&mut self, row: Row) -> Result<&mut T> {
        self.ensure_type::<T>()?;
        self.check_row(row)?;
        // SAFETY: T matches the element layout and the row is initialized.
        unsafe { Ok(&mut *(self.data.ptr_at(row.index()).as_ptr() as *mut T)) }
    }

    #[inline]
    fn ensure_type<T: Component>(&self) -> Result<()> {
        if self.element.is::<T>() {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                expected: self.element.name(),
                found: T::name(),
            })
        }
    }

    #[inline]
    fn check_row(&self, row: Row) -> Result<()> {
        if row.index() < self.len {
            Ok(())
        } else {
            Err(Error::access(row, self.len))
        }
    }

    /// Move the last row into `row` without dropping anything. The value at `row` must have
    /// been dropped or moved out already.
    fn fill_gap(&mut self, row: Row) {
        let last = self.len - 1;
        if row.index() != last {
            // SAFETY: both rows are within len and distinct.
            unsafe {
                ptr::copy_nonoverlapping(
                    self.data.ptr_at(last).as_ptr(),
                    self.data.ptr_at(row.index()).as_ptr(),
                    self.element.layout().size(),
                );
            }
        }
        self.len = last;
    }
}

impl Cache for RawCache {
    #[inline]
    fn element(&self) -> &ElementType {
        &self.element
    }

    #[inline]
    fn strategy(&self) -> Strategy {
        Strategy::Raw
    }

    #[inline]
    fn len(&self) -> usize {
        self.len
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.data.capacity()
    }

    fn reserve(&mut self, additional: usize) {
        self.data.ensure_capacity(self.len + additional);
    }

    fn push_default(&mut self) {
        self.reserve(1);
        // SAFETY: the slot at len is allocated and uninitialized.
        unsafe {
            (self.element.default_fn())(self.data.ptr_at(self.len));
        }
        self.len += 1;
    }

    fn swap_remove(&mut self, row: Row) -> Result<()> {
        self.check_row(row)?;
        // SAFETY: the row is initialized and is overwritten or abandoned right after.
        unsafe {
            (self.element.drop_fn())(self.data.ptr_at(row.index()));
        }
        self.fill_gap(row);
        Ok(())
    }

    fn move_row(&mut self, row: Row, destination: &mut dyn Cache) -> Result<()> {
        self.check_row(row)?;
        let destination = destination
            .as_any_mut()
            .downcast_mut::<RawCache>()
            .ok_or(Error::IncompatibleCache(self.element.name()))?;
        if destination.element != self.element {
            return Err(Error::TypeMismatch {
                expected: destination.element.name(),
                found: self.element.name(),
            });
        }

        destination.reserve(1);
        // SAFETY: same layout; the destination slot is allocated and uninitialized, and the
        // source slot is treated as moved out by fill_gap.
        unsafe {
            ptr::copy_nonoverlapping(
                self.data.ptr_at(row.index()).as_ptr(),
                destination.data.ptr_at(destination.len).as_ptr(),
                self.element.layout().size(),
            );
        }
        destination.len += 1;
        self.fill_gap(row);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for RawCache {
    fn drop(&mut self) {
        for index in 0..self.len {
            // SAFETY: every row below len is initialized and dropped once.
            unsafe {
                (self.element.drop_fn())(self.data.ptr_at(index));
            }
        }
    }
}
