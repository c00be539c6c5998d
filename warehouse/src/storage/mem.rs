//! Low-level memory management for the raw cache strategy.
//!
//! [`IndexedMemory`] manages one contiguous block of uniform-sized elements without type
//! information. It does not track initialization or drop anything; [`RawCache`] owns those
//! invariants.
//!
//! # Growth Strategies
//!
//! [`GrowthStrategy`] controls how the block expands when more room is needed:
//!
//! - **[`GrowthStrategy::Multiply(n)`]**: geometric growth (e.g. 2x), few reallocations.
//! - **[`GrowthStrategy::Buffer(n)`]**: linear growth by a fixed number of elements.
//! - **[`GrowthStrategy::Exact`]**: grow to exactly what was requested.
//!
//! Zero sized elements never allocate; their block reports unbounded capacity.
//!
//! [`RawCache`]: super::cache::RawCache
//! [`GrowthStrategy::Multiply(n)`]: GrowthStrategy::Multiply
//! [`GrowthStrategy::Buffer(n)`]: GrowthStrategy::Buffer

use std::{
    alloc::{self, Layout},
    cmp,
    ptr::{self, NonNull},
};

/// How a storage block grows when it runs out of capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrowthStrategy {
    /// Grow to a multiple of the current capacity.
    Multiply(usize),
    /// Grow the current capacity by a fixed number of elements.
    Buffer(usize),
    /// Grow to exactly the requested capacity.
    Exact,
}

impl Default for GrowthStrategy {
    fn default() -> Self {
        Self::Multiply(2)
    }
}

impl GrowthStrategy {
    /// Calculate the new capacity to grow to based on the current capacity and the requested
    /// capacity.
    pub fn new_capacity(&self, current: usize, requested: usize) -> usize {
        match self {
            Self::Multiply(factor) => cmp::max(current.saturating_mul(*factor), requested),
            Self::Buffer(buffer) => cmp::max(current.saturating_add(*buffer), requested),
            Self::Exact => requested,
        }
    }
}

/// A contiguous, type-erased block of elements addressed by index.
///
/// # Safety
///
/// The caller is responsible for:
/// - Only reading from initialized memory
/// - Dropping values before they are overwritten or the block is deallocated
/// - Keeping indices within `capacity()`
pub struct IndexedMemory {
    /// The pointer to the underlying memory.
    ptr: NonNull<u8>,
    /// The number of elements the block can hold.
    capacity: usize,
    /// The memory layout of an element.
    element_layout: Layout,
    /// Growth strategy for this memory.
    growth_strat: GrowthStrategy,
}

impl IndexedMemory {
    /// Construct a new empty block for elements of `element_layout`.
    pub fn new(element_layout: Layout, growth_strat: GrowthStrategy) -> Self {
        // A well aligned dangling pointer, so zero sized element access stays aligned.
        let dangling = NonNull::new(ptr::without_provenance_mut::<u8>(element_layout.align()))
            .unwrap_or(NonNull::dangling());
        Self {
            ptr: dangling,
            capacity: if element_layout.size() == 0 { usize::MAX } else { 0 },
            element_layout,
            growth_strat,
        }
    }

    /// Construct a block with room for at least `capacity` elements.
    pub fn with_capacity(element_layout: Layout, capacity: usize, growth_strat: GrowthStrategy) -> Self {
        let mut block = Self::new(element_layout, growth_strat);
        if capacity > block.capacity {
            block.grow_to(capacity);
        }
        block
    }

    /// The number of elements the block can hold without reallocating.
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get a pointer to the element at the given index.
    ///
    /// # Panics
    ///
    /// Panics in debug mode if `index >= capacity()`.
    #[inline]
    pub fn ptr_at(&self, index: usize) -> NonNull<u8> {
        debug_assert!(
            index < self.capacity,
            "index {} out of bounds (capacity: {})",
            index,
            self.capacity
        );
        // SAFETY: index is within the allocation, so the offset stays in bounds and non-null.
        unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(index * self.element_layout.size())) }
    }

    /// Make sure the block can hold at least `required` elements, growing per the strategy.
    pub fn ensure_capacity(&mut self, required: usize) {
        if required <= self.capacity {
            return;
        }
        let new_capacity = self.growth_strat.new_capacity(self.capacity, required);
        self.grow_to(new_capacity);
    }

    /// Grow the memory to hold `capacity` elements, allocating or reallocating as needed.
    fn grow_to(&mut self, capacity: usize) {
        let new_layout = Self::array_layout(self.element_layout, capacity);

        let new_ptr = if self.capacity == 0 {
            // SAFETY: new_layout has a non-zero size; zero sized elements never reach here.
            unsafe { alloc::alloc(new_layout) }
        } else {
            let old_layout = Self::array_layout(self.element_layout, self.capacity);
            // SAFETY: ptr was allocated with old_layout by this block.
            unsafe { alloc::realloc(self.ptr.as_ptr(), old_layout, new_layout.size()) }
        };

        self.ptr = match NonNull::new(new_ptr) {
            Some(ptr) => ptr,
            None => alloc::handle_alloc_error(new_layout),
        };
        self.capacity = capacity;
    }

    fn array_layout(element: Layout, count: usize) -> Layout {
        let size = element
            .size()
            .checked_mul(count)
            .expect("storage capacity overflow");
        Layout::from_size_align(size, element.align()).expect("storage layout overflow")
    }
}

impl Drop for IndexedMemory {
    fn drop(&mut self) {
        // Only deallocate if we actually allocated memory
        if self.element_layout.size() > 0 && self.capacity > 0 {
            let layout = Self::array_layout(self.element_layout, self.capacity);
            // SAFETY: ptr was allocated with this layout by this block.
            unsafe {
                alloc::dealloc(self.ptr.as_ptr(), layout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_memory_is_empty() {
        let mem = IndexedMemory::new(Layout::new::<u32>(), GrowthStrategy::Multiply(2));
        assert_eq!(mem.capacity(), 0);
    }

    #[test]
    fn with_capacity_allocates() {
        let mem = IndexedMemory::with_capacity(Layout::new::<u32>(), 10, GrowthStrategy::Exact);
        assert_eq!(mem.capacity(), 10);
    }

    #[test]
    fn ensure_capacity_follows_strategy() {
        let mut exact = IndexedMemory::new(Layout::new::<u32>(), GrowthStrategy::Exact);
        exact.ensure_capacity(5);
        assert_eq!(exact.capacity(), 5);

        let mut doubling = IndexedMemory::with_capacity(Layout::new::<u32>(), 4, GrowthStrategy::Multiply(2));
        doubling.ensure_capacity(5);
        assert_eq!(doubling.capacity(), 8);

        let mut buffered = IndexedMemory::with_capacity(Layout::new::<u32>(), 4, GrowthStrategy::Buffer(10));
        buffered.ensure_capacity(5);
        assert_eq!(buffered.capacity(), 14);
        buffered.ensure_capacity(3);
        assert_eq!(buffered.capacity(), 14);
    }

    #[test]
    fn growth_strategy_new_capacity() {
        assert_eq!(GrowthStrategy::Exact.new_capacity(10, 15), 15);
        assert_eq!(GrowthStrategy::Multiply(2).new_capacity(10, 15), 20);
        assert_eq!(GrowthStrategy::Multiply(2).new_capacity(10, 25), 25);
        assert_eq!(GrowthStrategy::Buffer(5).new_capacity(10, 12), 15);
        assert_eq!(GrowthStrategy::Buffer(5).new_capacity(10, 20), 20);
    }

    #[test]
    fn realloc_preserves_data() {
        let mut mem = IndexedMemory::with_capacity(Layout::new::<i32>(), 2, GrowthStrategy::Exact);

        unsafe {
            (mem.ptr_at(0).as_ptr() as *mut i32).write(42);
            (mem.ptr_at(1).as_ptr() as *mut i32).write(99);
        }

        mem.ensure_capacity(7);
        assert_eq!(mem.capacity(), 7);

        unsafe {
            assert_eq!((mem.ptr_at(0).as_ptr() as *const i32).read(), 42);
            assert_eq!((mem.ptr_at(1).as_ptr() as *const i32).read(), 99);
        }
    }

    #[test]
    fn zero_sized_elements_never_allocate() {
        struct Tag;
        let mut mem = IndexedMemory::new(Layout::new::<Tag>(), GrowthStrategy::Exact);
        assert_eq!(mem.capacity(), usize::MAX);
        mem.ensure_capacity(1000);
        unsafe {
            (mem.ptr_at(999).as_ptr() as *mut Tag).write(Tag);
        }
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    #[cfg(debug_assertions)]
    fn ptr_at_bounds_check_debug() {
        let mem = IndexedMemory::with_capacity(Layout::new::<u32>(), 5, GrowthStrategy::Exact);
        let _ = mem.ptr_at(10);
    }
}
