use std::{fmt, marker::PhantomData};

use crate::{
    element::{Component, ElementType, Registry},
    entry::Entry,
    error::{Error, Result},
    query::Cursor,
    storage::Storage,
};

/// A typed handle to one component type.
///
/// Obtain accessors once at startup and keep them next to the systems that use them. The
/// accessor carries the element type, so it doubles as a query term through
/// [`Accessor::element`].
pub struct Accessor<T: Component> {
    element: ElementType,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Component> Accessor<T> {
    /// Register `T` (if needed) and build its accessor.
    pub fn new(registry: &Registry) -> Self {
        Self {
            element: registry.register::<T>(),
            _marker: PhantomData,
        }
    }

    /// Build an accessor from an element type already obtained elsewhere.
    pub fn from_element(element: ElementType) -> Result<Self> {
        if !element.is::<T>() {
            return Err(Error::TypeMismatch {
                expected: element.name(),
                found: T::name(),
            });
        }
        Ok(Self {
            element,
            _marker: PhantomData,
        })
    }

    #[inline]
    pub fn element(&self) -> ElementType {
        self.element
    }

    /// The value at the cursor position.
    pub fn get_from_cursor<'s>(&self, cursor: &Cursor, storage: &'s Storage) -> Result<&'s T> {
        cursor.get::<T>(storage)
    }

    /// The value at the cursor position, or `None` when the cursor's table lacks it.
    pub fn get_from_cursor_safe<'s>(&self, cursor: &Cursor, storage: &'s Storage) -> Option<&'s T> {
        cursor.get_safe::<T>(storage)
    }

    pub fn get_from_cursor_mut<'s>(&self, cursor: &Cursor, storage: &'s mut Storage) -> Result<&'s mut T> {
        cursor.get_mut::<T>(storage)
    }

    /// The value for an entity, wherever it lives.
    pub fn get_from_entry<'s>(&self, entry: Entry, storage: &'s Storage) -> Result<&'s T> {
        storage.get::<T>(entry)
    }

    pub fn get_from_entry_mut<'s>(&self, entry: Entry, storage: &'s mut Storage) -> Result<&'s mut T> {
        storage.get_mut::<T>(entry)
    }

    /// Whether the cursor is on a row whose table stores `T`.
    pub fn check_cursor(&self, cursor: &Cursor, storage: &Storage) -> bool {
        cursor
            .position()
            .and_then(|(table, _)| storage.table(table))
            .is_ok_and(|table| table.contains(&self.element))
    }
}

impl<T: Component> Clone for Accessor<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Component> Copy for Accessor<T> {}

impl<T: Component> fmt::Debug for Accessor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Accessor").field(&self.element).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{Component, Config, query::Query};

    #[derive(Component, Default, Debug, PartialEq)]
    struct Health(i32);

    #[derive(Component, Default, Debug, PartialEq)]
    struct Armor(i32);

    fn setup() -> (Storage, Accessor<Health>, Accessor<Armor>) {
        let registry = Arc::new(Registry::new());
        let health = Accessor::<Health>::new(&registry);
        let armor = Accessor::<Armor>::new(&registry);
        (Storage::new(registry, Config::default()), health, armor)
    }

    #[test]
    fn new_is_idempotent_per_type() {
        let registry = Registry::new();
        let a = Accessor::<Health>::new(&registry);
        let b = Accessor::<Health>::new(&registry);
        assert_eq!(a.element(), b.element());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn from_element_checks_the_type() {
        let registry = Registry::new();
        let health = registry.register::<Health>();

        assert!(Accessor::<Health>::from_element(health).is_ok());
        assert!(matches!(
            Accessor::<Armor>::from_element(health),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn reads_and_writes_through_the_cursor() {
        // Given
        let (mut storage, health, armor) = setup();
        let plain = storage.table_for(&[health.element()]).unwrap();
        let armored = storage
            .table_for(&[health.element(), armor.element()])
            .unwrap();
        storage.new_entries(plain, 2).unwrap();
        let tanks = storage.new_entries(armored, 1).unwrap();
        storage.set(tanks[0], Armor(5)).unwrap();

        // When
        let mut cursor = Cursor::new(&Query::and([health.element()]));
        let mut armored_seen = 0;
        while cursor.next(&mut storage).unwrap() {
            assert!(health.check_cursor(&cursor, &storage));
            let bonus = armor
                .get_from_cursor_safe(&cursor, &storage)
                .map_or(0, |armor| armor.0);
            if armor.check_cursor(&cursor, &storage) {
                armored_seen += 1;
            }
            health.get_from_cursor_mut(&cursor, &mut storage).unwrap().0 = 10 + bonus;
        }

        // Then
        assert_eq!(armored_seen, 1);
        assert_eq!(health.get_from_entry(tanks[0], &storage).unwrap(), &Health(15));
        let totals: i32 = storage
            .entries()
            .into_iter()
            .map(|entry| health.get_from_entry(entry, &storage).unwrap().0)
            .sum();
        assert_eq!(totals, 35);
    }

    #[test]
    fn cursor_reads_require_a_position() {
        let (storage, health, _) = setup();
        let cursor = Cursor::new(&Query::and([health.element()]));

        assert!(!health.check_cursor(&cursor, &storage));
        assert!(health.get_from_cursor_safe(&cursor, &storage).is_none());
        assert!(matches!(
            health.get_from_cursor(&cursor, &storage),
            Err(Error::NoCurrentRow)
        ));
    }

    #[test]
    fn entry_access_follows_the_entity() {
        // Given
        let (mut storage, health, armor) = setup();
        let table = storage.table_for(&[health.element()]).unwrap();
        let entry = storage.new_entries(table, 1).unwrap()[0];
        *health.get_from_entry_mut(entry, &mut storage).unwrap() = Health(3);

        // When
        storage.add_component(entry, armor.element()).unwrap();

        // Then
        assert_eq!(health.get_from_entry(entry, &storage).unwrap(), &Health(3));
        assert_eq!(armor.get_from_entry(entry, &storage).unwrap(), &Armor(0));
    }
}
