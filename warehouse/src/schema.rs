//! Mapping from element types to mask rows.
//!
//! A [`Schema`] decides which [`Mask`] bit a component occupies. Every table and query built
//! against the same schema agrees on those bits, and a row never moves once it is assigned.
//!
//! Two strategies are provided and are interchangeable from a table's point of view:
//!
//! - [`DirectSchema`]: the row is the element's registry id. No lookup table, but only the
//!   first [`MASK_CAPACITY`] registered types can ever be stored.
//! - [`IndirectSchema`]: rows are handed out in registration order, so a registry may know far
//!   more component types than the mask is wide as long as no more than [`MASK_CAPACITY`] of
//!   them are actually used by tables.

use std::collections::HashMap;

use crate::{
    element::{ElementType, Id},
    error::{Error, Result},
    mask::{MASK_CAPACITY, Mask},
};

/// Resolves element types to mask rows.
pub trait Schema {
    /// Register the given element types, assigning rows to any not seen before.
    ///
    /// Registration is idempotent and all-or-nothing: if the new types do not fit,
    /// [`Error::Capacity`] is returned and nothing is registered.
    fn register(&mut self, elements: &[ElementType]) -> Result<()>;

    /// Whether the element type has a row.
    fn contains(&self, element: &ElementType) -> bool;

    /// The row for a registered element id.
    fn row_index_for_id(&self, id: Id) -> Result<u32>;

    /// The row for a registered element type.
    fn row_index(&self, element: &ElementType) -> Result<u32> {
        self.row_index_for_id(element.id())
            .map_err(|_| Error::unregistered(element))
    }

    /// The mask marking the rows of every given element type.
    fn mask_of(&self, elements: &[ElementType]) -> Result<Mask> {
        let mut mask = Mask::new();
        for element in elements {
            mask.mark(self.row_index(element)?)?;
        }
        Ok(mask)
    }
}

/// A schema where an element's row is its registry id.
#[derive(Debug, Default, Clone)]
pub struct DirectSchema {
    registered: Mask,
}

impl DirectSchema {
    /// Create an empty direct schema.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Schema for DirectSchema {
    fn register(&mut self, elements: &[ElementType]) -> Result<()> {
        if let Some(element) = elements
            .iter()
            .find(|element| element.id().index() >= MASK_CAPACITY)
        {
            return Err(Error::Capacity {
                requested: element.id().index() + 1,
                capacity: MASK_CAPACITY,
            });
        }
        for element in elements {
            self.registered.mark(element.id().value())?;
        }
        Ok(())
    }

    #[inline]
    fn contains(&self, element: &ElementType) -> bool {
        self.registered.contains(element.id().value())
    }

    #[inline]
    fn row_index_for_id(&self, id: Id) -> Result<u32> {
        if self.registered.contains(id.value()) {
            Ok(id.value())
        } else {
            Err(Error::Unregistered(format!("{id:?}")))
        }
    }
}

/// A schema that compacts the element types actually used into consecutive rows.
#[derive(Debug, Default, Clone)]
pub struct IndirectSchema {
    rows: HashMap<Id, u32>,
}

impl IndirectSchema {
    /// Create an empty indirect schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of rows assigned so far.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no row has been assigned.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Schema for IndirectSchema {
    fn register(&mut self, elements: &[ElementType]) -> Result<()> {
        let mut unseen: Vec<Id> = elements
            .iter()
            .map(|element| element.id())
            .filter(|id| !self.rows.contains_key(id))
            .collect();
        unseen.sort();
        unseen.dedup();

        let requested = self.rows.len() + unseen.len();
        if requested > MASK_CAPACITY {
            return Err(Error::Capacity {
                requested,
                capacity: MASK_CAPACITY,
            });
        }

        // Rows follow the order the caller listed the new types in.
        for element in elements {
            let next = self.rows.len() as u32;
            self.rows.entry(element.id()).or_insert(next);
        }
        Ok(())
    }

    #[inline]
    fn contains(&self, element: &ElementType) -> bool {
        self.rows.contains_key(&element.id())
    }

    #[inline]
    fn row_index_for_id(&self, id: Id) -> Result<u32> {
        self.rows
            .get(&id)
            .copied()
            .ok_or_else(|| Error::Unregistered(format!("{id:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Component, element::Registry};

    #[derive(Component, Default)]
    struct A;
    #[derive(Component, Default)]
    struct B;
    #[derive(Component, Default)]
    struct C;

    #[test]
    fn direct_rows_follow_registry_ids() {
        // Given
        let registry = Registry::new();
        let a = registry.register::<A>();
        let b = registry.register::<B>();
        let mut schema = DirectSchema::new();

        // When
        schema.register(&[b, a]).unwrap();

        // Then
        assert_eq!(schema.row_index(&a).unwrap(), a.id().value());
        assert_eq!(schema.row_index(&b).unwrap(), b.id().value());
    }

    #[test]
    fn indirect_rows_follow_registration_order() {
        // Given
        let registry = Registry::new();
        let a = registry.register::<A>();
        let b = registry.register::<B>();
        let c = registry.register::<C>();
        let mut schema = IndirectSchema::new();

        // When
        schema.register(&[c]).unwrap();
        schema.register(&[a, c, b]).unwrap();

        // Then
        assert_eq!(schema.row_index(&c).unwrap(), 0);
        assert_eq!(schema.row_index(&a).unwrap(), 1);
        assert_eq!(schema.row_index(&b).unwrap(), 2);
        assert_eq!(schema.len(), 3);
    }

    #[test]
    fn register_is_idempotent() {
        let registry = Registry::new();
        let a = registry.register::<A>();
        let mut schema = IndirectSchema::new();
        schema.register(&[a]).unwrap();
        schema.register(&[a, a]).unwrap();
        assert_eq!(schema.len(), 1);
        assert_eq!(schema.row_index(&a).unwrap(), 0);
    }

    #[test]
    fn unregistered_lookup_is_an_error() {
        let registry = Registry::new();
        let a = registry.register::<A>();
        let b = registry.register::<B>();

        let mut direct = DirectSchema::new();
        direct.register(&[a]).unwrap();
        assert!(direct.contains(&a));
        assert!(!direct.contains(&b));
        assert!(matches!(direct.row_index(&b), Err(Error::Unregistered(_))));

        let indirect = IndirectSchema::new();
        assert!(matches!(indirect.row_index(&a), Err(Error::Unregistered(_))));
        assert!(matches!(
            indirect.row_index_for_id(b.id()),
            Err(Error::Unregistered(_))
        ));
    }

    #[test]
    fn mask_of_marks_each_row() {
        let registry = Registry::new();
        let a = registry.register::<A>();
        let b = registry.register::<B>();
        let mut schema = IndirectSchema::new();
        schema.register(&[b, a]).unwrap();

        let mask = schema.mask_of(&[a]).unwrap();
        assert!(mask.contains(1));
        assert!(!mask.contains(0));
    }

    // Registers MASK_CAPACITY + 1 distinct types through const generics.
    #[derive(Default)]
    struct Numbered<const N: usize>;
    impl<const N: usize> crate::element::Component for Numbered<N> {}

    fn register_many(registry: &Registry) -> Vec<ElementType> {
        fn push<const N: usize>(registry: &Registry, out: &mut Vec<ElementType>) {
            out.push(registry.register::<Numbered<N>>());
        }
        let mut out = Vec::new();
        macro_rules! many {
            ($($n:literal)*) => { $( push::<$n>(registry, &mut out); )* };
        }
        many!(0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16 17 18 19 20 21 22 23 24 25 26 27 28 29 30 31
              32 33 34 35 36 37 38 39 40 41 42 43 44 45 46 47 48 49 50 51 52 53 54 55 56 57 58 59 60 61 62 63 64);
        out
    }

    #[test]
    #[cfg(not(any(feature = "mask-256", feature = "mask-512", feature = "mask-1024")))]
    fn indirect_capacity_is_all_or_nothing() {
        // Given
        let registry = Registry::new();
        let elements = register_many(&registry);
        let mut schema = IndirectSchema::new();
        schema.register(&elements[..60]).unwrap();

        // When
        let result = schema.register(&elements[60..]);

        // Then
        assert!(matches!(result, Err(Error::Capacity { requested: 65, .. })));
        assert_eq!(schema.len(), 60);
        assert!(!schema.contains(&elements[60]));
    }

    #[test]
    #[cfg(not(any(feature = "mask-256", feature = "mask-512", feature = "mask-1024")))]
    fn direct_rejects_ids_past_the_mask() {
        let registry = Registry::new();
        let elements = register_many(&registry);
        let mut schema = DirectSchema::new();

        let result = schema.register(&elements[63..]);
        assert!(matches!(result, Err(Error::Capacity { requested: 65, .. })));
        assert!(!schema.contains(&elements[63]));

        // Indirect compacts a high id into a low row.
        let mut indirect = IndirectSchema::new();
        indirect.register(&elements[64..]).unwrap();
        assert_eq!(indirect.row_index(&elements[64]).unwrap(), 0);
    }
}
