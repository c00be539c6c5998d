use log::warn;

use crate::{
    element::Component,
    entry::Entry,
    error::{Error, Result},
    query::{Filter, Query},
    storage::{Row, Storage, TableId},
};

/// A lazy, restartable walk over every entity matching a [`Query`].
///
/// The cursor does not borrow the storage between calls. Each call that needs it takes the
/// storage explicitly, so between two [`Cursor::next`] calls the caller is free to read, write
/// and enqueue structural changes.
///
/// The table the cursor is inside stays locked until its rows are exhausted or the cursor is
/// [`reset`](Cursor::reset). Releasing the last lock applies the table's deferred operations.
///
/// ```rust,ignore
/// let mut cursor = Cursor::new(&Query::and([health]));
/// while cursor.next(&mut storage)? {
///     if cursor.get::<Health>(&storage)?.0 <= 0 {
///         storage.enqueue_destroy_entries(&[cursor.current_entry()?])?;
///     }
/// }
/// ```
///
/// A cursor dropped while inside a table leaves that table locked; call `reset` first when
/// abandoning an iteration early.
#[derive(Debug)]
pub struct Cursor {
    query: Query,

    /// Matching tables, resolved on the first advance.
    tables: Option<Vec<TableId>>,

    /// Position in `tables`.
    table: usize,

    /// Current row in the current table.
    row: Option<Row>,

    /// The table this cursor holds a lock on.
    locked: Option<TableId>,

    current: Option<Entry>,
}

impl Cursor {
    pub fn new(query: &Query) -> Self {
        Self {
            query: query.clone(),
            tables: None,
            table: 0,
            row: None,
            locked: None,
            current: None,
        }
    }

    /// Advance to the next matching row. Returns false once every matching table is exhausted.
    ///
    /// Leaving a table releases its lock, which may apply deferred operations. If one of them
    /// fails its error is returned here; the cursor has already moved past that table.
    pub fn next(&mut self, storage: &mut Storage) -> Result<bool> {
        if self.tables.is_none() {
            self.tables = Some(Self::resolve(&self.query.compile(storage.schema()), storage));
        }

        loop {
            let Some(table_id) = self
                .tables
                .as_ref()
                .and_then(|tables| tables.get(self.table).copied())
            else {
                self.current = None;
                return Ok(false);
            };

            let next_row = self.row.map_or(Row::new(0), Row::increment);
            if next_row.index() < storage.table(table_id)?.len() {
                if self.locked != Some(table_id) {
                    storage.lock(table_id)?;
                    self.locked = Some(table_id);
                }
                self.row = Some(next_row);
                self.current = Some(storage.table(table_id)?.entry(next_row)?);
                return Ok(true);
            }

            self.row = None;
            self.current = None;
            self.table += 1;
            if let Some(locked) = self.locked.take() {
                storage.unlock(locked)?;
            }
        }
    }

    /// Release any held lock and start over. Matching tables are resolved again on the next
    /// advance, so tables created since are included.
    pub fn reset(&mut self, storage: &mut Storage) -> Result<()> {
        self.tables = None;
        self.table = 0;
        self.row = None;
        self.current = None;
        match self.locked.take() {
            Some(locked) => storage.unlock(locked),
            None => Ok(()),
        }
    }

    /// The entry at the cursor position.
    pub fn current_entry(&self) -> Result<Entry> {
        self.current.ok_or(Error::NoCurrentRow)
    }

    /// The table and row at the cursor position.
    pub fn position(&self) -> Result<(TableId, Row)> {
        match (self.locked, self.row) {
            (Some(table), Some(row)) => Ok((table, row)),
            _ => Err(Error::NoCurrentRow),
        }
    }

    /// The component at the cursor position.
    pub fn get<'s, T: Component>(&self, storage: &'s Storage) -> Result<&'s T> {
        let (table, row) = self.position()?;
        storage.table(table)?.get::<T>(row)
    }

    pub fn get_mut<'s, T: Component>(&self, storage: &'s mut Storage) -> Result<&'s mut T> {
        let (table, row) = self.position()?;
        storage.table_mut(table)?.get_mut::<T>(row)
    }

    /// The component at the cursor position, or `None` if the current table does not store it.
    pub fn get_safe<'s, T: Component>(&self, storage: &'s Storage) -> Option<&'s T> {
        self.get::<T>(storage).ok()
    }

    /// The number of entities in tables matching the query right now.
    pub fn total_matched(&self, storage: &Storage) -> usize {
        let filter = self.query.compile(storage.schema());
        storage
            .tables()
            .filter(|table| table.matches(&filter))
            .map(|table| table.len())
            .sum()
    }

    fn resolve(filter: &Filter, storage: &Storage) -> Vec<TableId> {
        storage
            .tables()
            .filter(|table| table.matches(filter))
            .map(|table| table.id())
            .collect()
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if let Some(table) = self.locked {
            warn!(
                "cursor dropped while holding table {:?}; it stays locked until reset",
                table
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{Component, Config, element::{ElementType, Registry}};

    #[derive(Component, Default, Debug, Clone, PartialEq)]
    struct Position {
        x: f64,
        y: f64,
    }

    #[derive(Component, Default, Debug, Clone, PartialEq)]
    struct Velocity {
        dx: f64,
        dy: f64,
    }

    #[derive(Component, Default, Debug, Clone, PartialEq)]
    struct Sleeping;

    struct World {
        storage: Storage,
        position: ElementType,
        velocity: ElementType,
        sleeping: ElementType,
    }

    /// Three tables: {P} x2, {P, V} x3, {P, V, S} x1.
    fn world() -> World {
        let registry = Arc::new(Registry::new());
        let position = registry.register::<Position>();
        let velocity = registry.register::<Velocity>();
        let sleeping = registry.register::<Sleeping>();
        let mut storage = Storage::new(registry, Config::default());
        for (elements, count) in [
            (vec![position], 2),
            (vec![position, velocity], 3),
            (vec![position, velocity, sleeping], 1),
        ] {
            let table = storage.table_for(&elements).unwrap();
            storage.new_entries(table, count).unwrap();
        }
        World {
            storage,
            position,
            velocity,
            sleeping,
        }
    }

    fn collect(cursor: &mut Cursor, storage: &mut Storage) -> Vec<Entry> {
        let mut entries = Vec::new();
        while cursor.next(storage).unwrap() {
            entries.push(cursor.current_entry().unwrap());
        }
        entries
    }

    #[test]
    fn visits_every_matching_entity_once() {
        // Given
        let mut world = world();
        let mut cursor = Cursor::new(&Query::and([world.velocity]));

        // When
        let visited = collect(&mut cursor, &mut world.storage);

        // Then
        assert_eq!(visited.len(), 4);
        assert_eq!(cursor.total_matched(&world.storage), 4);
        for entry in visited {
            assert!(world.storage.has(entry, &world.velocity).unwrap());
        }
    }

    #[test]
    fn boolean_queries_select_tables() {
        let mut world = world();

        let mut not_sleeping = Cursor::new(&Query::and([
            crate::query::Term::from(world.velocity),
            Query::not([world.sleeping]).into(),
        ]));
        assert_eq!(collect(&mut not_sleeping, &mut world.storage).len(), 3);

        let mut either = Cursor::new(&Query::or([world.sleeping, world.position]));
        assert_eq!(collect(&mut either, &mut world.storage).len(), 6);

        let mut still = Cursor::new(&Query::not([world.velocity]));
        assert_eq!(collect(&mut still, &mut world.storage).len(), 2);
    }

    #[test]
    fn locks_only_the_table_being_walked() {
        // Given
        let mut world = world();
        let moving = world.storage.table_for(&[world.position, world.velocity]).unwrap();
        let still = world.storage.table_for(&[world.position]).unwrap();
        let mut cursor = Cursor::new(&Query::and([world.position]));

        // When: first row of the first table
        assert!(cursor.next(&mut world.storage).unwrap());

        // Then
        assert!(world.storage.table(still).unwrap().locked());
        assert!(!world.storage.table(moving).unwrap().locked());

        // When: into the second table
        cursor.next(&mut world.storage).unwrap();
        cursor.next(&mut world.storage).unwrap();

        // Then
        assert!(!world.storage.table(still).unwrap().locked());
        assert!(world.storage.table(moving).unwrap().locked());

        // Exhausting releases everything
        while cursor.next(&mut world.storage).unwrap() {}
        assert!(world.storage.tables().all(|table| !table.locked()));
        assert!(matches!(cursor.current_entry(), Err(Error::NoCurrentRow)));
    }

    #[test]
    fn reset_releases_the_lock_and_restarts() {
        // Given
        let mut world = world();
        let mut cursor = Cursor::new(&Query::and([world.position]));
        let first = {
            assert!(cursor.next(&mut world.storage).unwrap());
            cursor.current_entry().unwrap()
        };

        // When
        cursor.reset(&mut world.storage).unwrap();

        // Then
        assert!(world.storage.tables().all(|table| !table.locked()));
        assert!(cursor.next(&mut world.storage).unwrap());
        assert_eq!(cursor.current_entry().unwrap(), first);
        cursor.reset(&mut world.storage).unwrap();
    }

    #[test]
    fn reset_picks_up_new_tables() {
        #[derive(Component, Default)]
        struct Marker;

        let mut world = world();
        let marker = world.storage.registry().register::<Marker>();
        let mut cursor = Cursor::new(&Query::and([world.position]));
        assert_eq!(collect(&mut cursor, &mut world.storage).len(), 6);

        let table = world.storage.table_for(&[world.position, marker]).unwrap();
        world.storage.new_entries(table, 2).unwrap();
        cursor.reset(&mut world.storage).unwrap();

        assert_eq!(collect(&mut cursor, &mut world.storage).len(), 8);
    }

    #[test]
    fn component_access_at_the_cursor() {
        // Given
        let mut world = world();
        let mut cursor = Cursor::new(&Query::and([world.position]));

        // When
        let mut step = 0.0;
        while cursor.next(&mut world.storage).unwrap() {
            step += 1.0;
            cursor.get_mut::<Position>(&mut world.storage).unwrap().x = step;
            if let Some(velocity) = cursor.get_safe::<Velocity>(&world.storage) {
                assert_eq!(velocity, &Velocity::default());
            }
        }

        // Then
        let mut xs: Vec<f64> = world
            .storage
            .entries()
            .into_iter()
            .map(|entry| world.storage.get::<Position>(entry).unwrap().x)
            .collect();
        xs.sort_by(f64::total_cmp);
        assert_eq!(xs, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert!(matches!(
            cursor.get::<Position>(&world.storage),
            Err(Error::NoCurrentRow)
        ));
    }

    #[test]
    fn get_safe_is_none_for_missing_components() {
        let mut world = world();
        let mut cursor = Cursor::new(&Query::not([world.velocity]));
        assert!(cursor.next(&mut world.storage).unwrap());

        assert!(cursor.get_safe::<Velocity>(&world.storage).is_none());
        assert!(matches!(
            cursor.get::<Velocity>(&world.storage),
            Err(Error::MissingComponent { .. })
        ));
        cursor.reset(&mut world.storage).unwrap();
    }

    #[test]
    fn empty_tables_are_skipped_without_locking() {
        let mut world = world();
        let empty = world.storage.table_for(&[world.velocity]).unwrap();
        let mut cursor = Cursor::new(&Query::and([world.velocity]));

        let mut seen_locked = false;
        while cursor.next(&mut world.storage).unwrap() {
            seen_locked |= world.storage.table(empty).unwrap().locked();
        }

        assert!(!seen_locked);
    }

    #[test]
    fn nested_cursors_keep_the_table_locked_until_both_leave() {
        // Given
        let mut world = world();
        let table = world.storage.table_for(&[world.position]).unwrap();
        let mut outer = Cursor::new(&Query::not([world.velocity]));
        let mut inner = Cursor::new(&Query::not([world.velocity]));
        assert!(outer.next(&mut world.storage).unwrap());
        let first = outer.current_entry().unwrap();

        // When
        assert_eq!(collect(&mut inner, &mut world.storage).len(), 2);
        world.storage.enqueue_destroy_entries(&[first]).unwrap();

        // Then
        assert!(world.storage.table(table).unwrap().locked());
        assert!(world.storage.index().is_live(first));
        while outer.next(&mut world.storage).unwrap() {}
        assert!(!world.storage.index().is_live(first));
    }
}
