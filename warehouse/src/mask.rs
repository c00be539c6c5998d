//! Fixed width component masks.
//!
//! A [`Mask`] holds one bit per schema row. A table's mask is the union of the rows of the
//! components it stores, so matching a table against a query is a handful of word operations
//! regardless of how many entities the table holds.
//!
//! The width is fixed at build time through cargo features (`mask-256`, `mask-512`,
//! `mask-1024`, defaulting to 64) and never varies within one binary.

use fixedbitset::FixedBitSet;

use crate::error::{Error, Result};

/// The number of component rows a mask can represent.
#[cfg(feature = "mask-1024")]
pub const MASK_CAPACITY: usize = 1024;

/// The number of component rows a mask can represent.
#[cfg(all(feature = "mask-512", not(feature = "mask-1024")))]
pub const MASK_CAPACITY: usize = 512;

/// The number of component rows a mask can represent.
#[cfg(all(
    feature = "mask-256",
    not(any(feature = "mask-512", feature = "mask-1024"))
))]
pub const MASK_CAPACITY: usize = 256;

/// The number of component rows a mask can represent.
#[cfg(not(any(feature = "mask-256", feature = "mask-512", feature = "mask-1024")))]
pub const MASK_CAPACITY: usize = 64;

/// A bitset over schema rows.
///
/// Bit `i` set means the owner (a table or a query term) requires or contains the component at
/// row `i`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Mask {
    bits: FixedBitSet,
}

impl Default for Mask {
    fn default() -> Self {
        Self::new()
    }
}

impl Mask {
    /// An empty mask of [`MASK_CAPACITY`] bits.
    #[inline]
    pub fn new() -> Self {
        Self {
            bits: FixedBitSet::with_capacity(MASK_CAPACITY),
        }
    }

    /// Build a mask with the given rows marked.
    pub fn from_rows(rows: impl IntoIterator<Item = u32>) -> Result<Self> {
        let mut mask = Self::new();
        for row in rows {
            mask.mark(row)?;
        }
        Ok(mask)
    }

    /// The fixed number of rows this mask can hold.
    #[inline]
    pub const fn capacity() -> usize {
        MASK_CAPACITY
    }

    /// Set the bit for `row`.
    ///
    /// Fails with [`Error::Capacity`] when `row` does not fit in the mask.
    #[inline]
    pub fn mark(&mut self, row: u32) -> Result<()> {
        let index = row as usize;
        if index >= MASK_CAPACITY {
            return Err(Error::Capacity {
                requested: index + 1,
                capacity: MASK_CAPACITY,
            });
        }
        self.bits.insert(index);
        Ok(())
    }

    /// Clear the bit for `row`. Rows outside the mask are ignored.
    #[inline]
    pub fn unmark(&mut self, row: u32) {
        let index = row as usize;
        if index < MASK_CAPACITY {
            self.bits.set(index, false);
        }
    }

    /// Whether the bit for `row` is set.
    #[inline]
    pub fn contains(&self, row: u32) -> bool {
        self.bits.contains(row as usize)
    }

    /// Whether every bit of `other` is set in this mask.
    #[inline]
    pub fn contains_all(&self, other: &Mask) -> bool {
        self.bits.is_superset(&other.bits)
    }

    /// Whether at least one bit of `other` is set in this mask.
    #[inline]
    pub fn contains_any(&self, other: &Mask) -> bool {
        !self.bits.is_disjoint(&other.bits)
    }

    /// Whether no bit of `other` is set in this mask.
    #[inline]
    pub fn contains_none(&self, other: &Mask) -> bool {
        self.bits.is_disjoint(&other.bits)
    }

    /// Whether no bit is set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits.is_clear()
    }

    /// The number of set bits.
    #[inline]
    pub fn len(&self) -> usize {
        self.bits.count_ones(..)
    }

    /// A new mask holding the bits of both.
    #[inline]
    pub fn union(&self, other: &Mask) -> Mask {
        let mut bits = self.bits.clone();
        bits.union_with(&other.bits);
        Mask { bits }
    }

    /// A new mask holding the bits of `self` that are not in `other`.
    #[inline]
    pub fn difference(&self, other: &Mask) -> Mask {
        let mut bits = self.bits.clone();
        bits.difference_with(&other.bits);
        Mask { bits }
    }

    /// Iterate the set rows in ascending order.
    pub fn rows(&self) -> impl Iterator<Item = u32> + '_ {
        self.bits.ones().map(|index| index as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_and_contains() {
        // Given
        let mut mask = Mask::new();

        // When
        mask.mark(0).unwrap();
        mask.mark(5).unwrap();

        // Then
        assert!(mask.contains(0));
        assert!(mask.contains(5));
        assert!(!mask.contains(1));
        assert_eq!(mask.len(), 2);
        assert_eq!(mask.rows().collect::<Vec<_>>(), vec![0, 5]);
    }

    #[test]
    fn mark_past_capacity_fails() {
        let mut mask = Mask::new();
        let result = mask.mark(MASK_CAPACITY as u32);
        assert!(matches!(result, Err(Error::Capacity { .. })));
        assert!(mask.is_empty());
    }

    #[test]
    fn unmark_clears_bit() {
        let mut mask = Mask::from_rows([1, 2]).unwrap();
        mask.unmark(1);
        mask.unmark(MASK_CAPACITY as u32 + 3);
        assert!(!mask.contains(1));
        assert!(mask.contains(2));
    }

    #[test]
    fn set_relations() {
        // Given
        let table = Mask::from_rows([0, 1, 2]).unwrap();
        let subset = Mask::from_rows([0, 2]).unwrap();
        let overlapping = Mask::from_rows([2, 3]).unwrap();
        let disjoint = Mask::from_rows([4, 5]).unwrap();

        // Then
        assert!(table.contains_all(&subset));
        assert!(!table.contains_all(&overlapping));
        assert!(table.contains_any(&overlapping));
        assert!(!table.contains_any(&disjoint));
        assert!(table.contains_none(&disjoint));
        assert!(table.contains_all(&Mask::new()));
    }

    #[test]
    fn union_and_difference() {
        let a = Mask::from_rows([0, 1]).unwrap();
        let b = Mask::from_rows([1, 2]).unwrap();
        assert_eq!(a.union(&b), Mask::from_rows([0, 1, 2]).unwrap());
        assert_eq!(a.difference(&b), Mask::from_rows([0]).unwrap());
    }

    #[test]
    fn equal_masks_hash_equal() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(Mask::from_rows([3, 7]).unwrap());
        assert!(set.contains(&Mask::from_rows([7, 3]).unwrap()));
    }
}
