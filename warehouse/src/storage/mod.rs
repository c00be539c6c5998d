//! Archetypal component storage.
//!
//! [`Storage`] is the central authority for entity and component data. It owns the schema, the
//! entry index and one [`Table`] per archetype, and it is the only place structural changes
//! that span tables (destroying, transferring, adding or removing components) are made.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Query / Cursor / Accessor                                      │
//! └────────────────────────────┬────────────────────────────────────┘
//!                              │
//! ┌────────────────────────────▼────────────────────────────────────┐
//! │  Storage (this module)                                          │
//! │  - Mask → Table archetype map                                   │
//! │  - Entity level mutations and their enqueue_* forms             │
//! │  - Drains a table's queue when its last lock is released        │
//! └────────┬───────────────────┬───────────────────┬────────────────┘
//!          │                   │                   │
//! ┌────────▼────────┐ ┌────────▼────────┐ ┌────────▼───────┐
//! │  Schema         │ │  EntryIndex     │ │  Tables        │
//! │  - Element →    │ │  - Entry →      │ │  - Lock count  │
//! │    mask row     │ │    Location     │ │  - Op queue    │
//! └─────────────────┘ └─────────────────┘ └────────┬───────┘
//!                                                  │
//!                                         ┌────────▼─────────┐
//!                                         │  dyn Cache       │
//!                                         │  - BoxedCache<T> │
//!                                         │  - RawCache      │
//!                                         └──────────────────┘
//! ```
//!
//! # Locking and Deferral
//!
//! A [`Cursor`](crate::query::Cursor) locks each table while it walks it. Direct structural
//! calls touching a locked table fail with [`Error::LockedStorage`]. The `enqueue_*` forms
//! never fail for that reason: against a locked table they record an [`Operation`] in its queue,
//! otherwise they run immediately. The queue is applied in FIFO order when the table's last
//! lock is released; the first failing operation aborts the drain and its error is returned
//! from the call that released the lock.
//!
//! Adding or removing a component moves the entity to the table of its new archetype, so an
//! entity's [`Entry`] is the only stable way to refer to it.

pub mod cache;
mod location;
pub mod mem;
pub mod queue;
mod row;
mod table;

use std::{collections::HashMap, sync::Arc};

use log::{debug, trace, warn};

pub use location::Location;
pub use row::Row;
pub use table::{Events, Id as TableId, Table, TableBuilder};

use crate::{
    config::Config,
    element::{Component, ElementType, Registry},
    entry::{Entry, EntryIndex},
    error::{Error, Result},
    mask::Mask,
    schema::Schema,
    storage::{
        cache::Cache,
        queue::{Operation, ValueWriter},
    },
};

/// Entries of one table, with the rows they occupied when resolved.
struct Group {
    table: TableId,
    entries: Vec<Entry>,
    rows: Vec<Row>,
}

/// The owner of every table of one world.
pub struct Storage {
    registry: Arc<Registry>,
    schema: Box<dyn Schema>,
    index: Arc<EntryIndex>,
    tables: Vec<Table>,

    /// Position of each table in `tables`.
    positions: HashMap<TableId, usize>,

    /// The table holding each archetype.
    archetypes: HashMap<Mask, TableId>,

    /// First table an operation was deferred onto since the last reset.
    deferred_onto: Option<TableId>,

    config: Config,
}

impl Storage {
    /// Create an empty storage for component types of `registry`.
    pub fn new(registry: Arc<Registry>, config: Config) -> Self {
        Self {
            registry,
            schema: config.schema.build(),
            index: Arc::new(EntryIndex::new()),
            tables: Vec::new(),
            positions: HashMap::new(),
            archetypes: HashMap::new(),
            deferred_onto: None,
            config,
        }
    }

    #[inline]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    #[inline]
    pub fn schema(&self) -> &dyn Schema {
        self.schema.as_ref()
    }

    #[inline]
    pub fn index(&self) -> &Arc<EntryIndex> {
        &self.index
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// All tables, in creation order.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter()
    }

    pub fn table(&self, id: TableId) -> Result<&Table> {
        let position = self.position(id)?;
        Ok(&self.tables[position])
    }

    pub fn table_mut(&mut self, id: TableId) -> Result<&mut Table> {
        let position = self.position(id)?;
        Ok(&mut self.tables[position])
    }

    /// Every live entry, ordered by table and row.
    pub fn entries(&self) -> Vec<Entry> {
        self.index.entries()
    }

    /// The table storing exactly `elements`, created if it does not exist yet.
    pub fn table_for(&mut self, elements: &[ElementType]) -> Result<TableId> {
        self.schema.register(elements)?;
        let mask = self.schema.mask_of(elements)?;
        if let Some(id) = self.archetypes.get(&mask) {
            return Ok(*id);
        }

        let table = TableBuilder::new(self.schema.as_mut(), self.index.clone())
            .with_elements(elements)
            .with_strategy(self.config.strategy)
            .with_growth(self.config.growth.clone())
            .with_capacity(self.config.initial_capacity)
            .build()?;
        let id = table.id();
        self.positions.insert(id, self.tables.len());
        self.tables.push(table);
        self.archetypes.insert(mask, id);
        Ok(id)
    }

    /// The element type registered for `T`.
    pub fn element_of<T: Component>(&self) -> Result<ElementType> {
        self.registry
            .element_of::<T>()
            .ok_or_else(|| Error::Unregistered(T::name().to_string()))
    }

    /// Where the entry is stored.
    #[inline]
    pub fn location(&self, entry: Entry) -> Result<Location> {
        self.index.location(entry)
    }

    pub fn get<T: Component>(&self, entry: Entry) -> Result<&T> {
        let location = self.index.location(entry)?;
        self.table(location.table_id())?.get::<T>(location.row())
    }

    pub fn get_mut<T: Component>(&mut self, entry: Entry) -> Result<&mut T> {
        let location = self.index.location(entry)?;
        self.table_mut(location.table_id())?
            .get_mut::<T>(location.row())
    }

    pub fn set<T: Component>(&mut self, entry: Entry, value: T) -> Result<()> {
        let location = self.index.location(entry)?;
        self.table_mut(location.table_id())?
            .set(location.row(), value)
    }

    /// Whether the entity currently has the component.
    pub fn has(&self, entry: Entry, element: &ElementType) -> Result<bool> {
        let location = self.index.location(entry)?;
        Ok(self.table(location.table_id())?.contains(element))
    }

    /// Create `count` zero-valued entities in `table`.
    pub fn new_entries(&mut self, table: TableId, count: usize) -> Result<Vec<Entry>> {
        self.table_mut(table)?.new_entries(count)
    }

    /// Destroy entities, recycling their ids.
    ///
    /// Every handle is resolved and every involved table checked for locks before anything is
    /// deleted.
    pub fn destroy_entries(&mut self, entries: &[Entry]) -> Result<()> {
        let groups = self.group(entries)?;
        for group in groups.iter() {
            self.ensure_unlocked(group.table)?;
        }
        for group in groups {
            self.table_mut(group.table)?.delete_entries(&group.rows)?;
        }
        Ok(())
    }

    /// Move entities to `destination`, keeping their identities. Entities already stored there
    /// are left alone.
    pub fn transfer_entries(&mut self, entries: &[Entry], destination: TableId) -> Result<()> {
        self.ensure_unlocked(destination)?;
        let groups = self.group(entries)?;
        for group in groups.iter() {
            self.ensure_unlocked(group.table)?;
        }
        for group in groups {
            if group.table == destination {
                continue;
            }
            let (source, target) = self.pair_mut(group.table, destination)?;
            source.transfer_entries(target, &group.rows)?;
        }
        Ok(())
    }

    /// Give the entity a zero-valued component, moving it to the matching table. Does nothing
    /// if it already has one.
    pub fn add_component(&mut self, entry: Entry, element: ElementType) -> Result<()> {
        let location = self.index.location(entry)?;
        self.ensure_unlocked(location.table_id())?;
        if self.table(location.table_id())?.contains(&element) {
            return Ok(());
        }
        let destination = self.reshaped(location.table_id(), element, true)?;
        self.transfer_entries(&[entry], destination)
    }

    /// Give the entity a component with the given value, replacing any existing value.
    pub fn add_component_with<T: Component>(&mut self, entry: Entry, value: T) -> Result<()> {
        let element = self.element_of::<T>()?;
        self.add_component(entry, element)?;
        self.set(entry, value)
    }

    /// Take a component away from the entity, moving it to the matching table. Does nothing if
    /// it has no such component.
    pub fn remove_component(&mut self, entry: Entry, element: ElementType) -> Result<()> {
        let location = self.index.location(entry)?;
        self.ensure_unlocked(location.table_id())?;
        if !self.table(location.table_id())?.contains(&element) {
            return Ok(());
        }
        let destination = self.reshaped(location.table_id(), element, false)?;
        self.transfer_entries(&[entry], destination)
    }

    /// [`Storage::new_entries`], deferred while the table is locked.
    pub fn enqueue_new_entries(&mut self, table: TableId, count: usize) -> Result<()> {
        if self.table(table)?.locked() {
            return self.defer(table, Operation::CreateEntities { table, count });
        }
        self.table_mut(table)?.new_entries(count)?;
        Ok(())
    }

    /// [`Storage::destroy_entries`], deferred per locked table.
    pub fn enqueue_destroy_entries(&mut self, entries: &[Entry]) -> Result<()> {
        for group in self.group(entries)? {
            if self.table(group.table)?.locked() {
                self.defer(
                    group.table,
                    Operation::DestroyEntities {
                        entries: group.entries,
                    },
                )?;
            } else {
                self.table_mut(group.table)?.delete_entries(&group.rows)?;
            }
        }
        Ok(())
    }

    /// [`Storage::transfer_entries`], deferred while the source or destination is locked.
    pub fn enqueue_transfer_entries(&mut self, entries: &[Entry], destination: TableId) -> Result<()> {
        let destination_locked = self.table(destination)?.locked();
        for group in self.group(entries)? {
            if group.table == destination {
                continue;
            }
            let operation = Operation::TransferEntities {
                destination,
                entries: group.entries,
            };
            if self.table(group.table)?.locked() {
                self.defer(group.table, operation)?;
            } else if destination_locked {
                self.defer(destination, operation)?;
            } else {
                let (source, target) = self.pair_mut(group.table, destination)?;
                source.transfer_entries(target, &group.rows)?;
            }
        }
        Ok(())
    }

    /// [`Storage::add_component`], deferred while the entity's current or future table is
    /// locked.
    pub fn enqueue_add_component(&mut self, entry: Entry, element: ElementType) -> Result<()> {
        self.enqueue_add(entry, element, None)
    }

    /// [`Storage::add_component_with`], deferred while the entity's current or future table is
    /// locked. The value is held by the queue until applied.
    pub fn enqueue_add_component_with<T: Component>(&mut self, entry: Entry, value: T) -> Result<()> {
        let element = self.element_of::<T>()?;
        let write: ValueWriter = Box::new(move |cache: &mut dyn Cache, row: Row| cache.set(row, value));
        self.enqueue_add(entry, element, Some(write))
    }

    /// [`Storage::remove_component`], deferred while the entity's current or future table is
    /// locked.
    pub fn enqueue_remove_component(&mut self, entry: Entry, element: ElementType) -> Result<()> {
        let location = self.index.location(entry)?;
        let source = self.table(location.table_id())?;
        if source.locked() {
            return self.defer(location.table_id(), Operation::RemoveComponent { entry, element });
        }
        if !source.contains(&element) {
            return Ok(());
        }

        let destination = self.reshaped(location.table_id(), element, false)?;
        if self.table(destination)?.locked() {
            return self.defer(destination, Operation::RemoveComponent { entry, element });
        }
        self.transfer_entries(&[entry], destination)
    }

    /// Take a lock on a table. Structural changes to it are refused or deferred until every
    /// lock is released.
    pub(crate) fn lock(&mut self, table: TableId) -> Result<()> {
        self.table_mut(table)?.lock();
        Ok(())
    }

    /// Release a lock on a table, draining its queue if it was the last one.
    pub(crate) fn unlock(&mut self, table: TableId) -> Result<()> {
        if self.table_mut(table)?.unlock() {
            self.drain(table)
        } else {
            Ok(())
        }
    }

    /// Restore an entity with an exact identity at the end of `table`.
    pub(crate) fn restore_entry(&mut self, table: TableId, entry: Entry) -> Result<Location> {
        self.table_mut(table)?.restore_entry(entry)
    }

    fn enqueue_add(&mut self, entry: Entry, element: ElementType, write: Option<ValueWriter>) -> Result<()> {
        let location = self.index.location(entry)?;
        let source = self.table(location.table_id())?;
        if source.locked() {
            return self.defer(location.table_id(), Self::add_operation(entry, element, write));
        }

        if !source.contains(&element) {
            let destination = self.reshaped(location.table_id(), element, true)?;
            if self.table(destination)?.locked() {
                return self.defer(destination, Self::add_operation(entry, element, write));
            }
            self.transfer_entries(&[entry], destination)?;
        }

        match write {
            Some(write) => self.write_component(entry, element, write),
            None => Ok(()),
        }
    }

    fn add_operation(entry: Entry, element: ElementType, write: Option<ValueWriter>) -> Operation {
        match write {
            Some(write) => Operation::AddComponentWithValue {
                entry,
                element,
                write,
            },
            None => Operation::AddComponent { entry, element },
        }
    }

    fn write_component(&mut self, entry: Entry, element: ElementType, write: ValueWriter) -> Result<()> {
        let location = self.index.location(entry)?;
        let table = self.table_mut(location.table_id())?;
        let id = table.id();
        let cache = table.cache_mut(&element).ok_or(Error::MissingComponent {
            table: id,
            element: element.name(),
        })?;
        write(cache, location.row())
    }

    fn defer(&mut self, table: TableId, operation: Operation) -> Result<()> {
        trace!("table {:?} locked, deferring {:?}", table, operation);
        self.table_mut(table)?.queue_mut().push(operation);
        self.deferred_onto.get_or_insert(table);
        Ok(())
    }

    /// Apply every operation queued on `table`, in order, stopping at the first failure.
    ///
    /// Once an operation is deferred again onto another locked table, everything queued after
    /// it follows onto that table's queue unapplied, so the two still run in the order they
    /// were made.
    fn drain(&mut self, table: TableId) -> Result<()> {
        let operations = self.table_mut(table)?.queue_mut().begin_drain();
        if !operations.is_empty() {
            debug!("draining {} operations from table {:?}", operations.len(), table);
        }

        let mut operations = operations.into_iter();
        let mut result = Ok(());
        while let Some(operation) = operations.next() {
            let name = operation.name();
            self.deferred_onto = None;
            if let Err(error) = self.apply(operation) {
                warn!(
                    "drain of table {:?} aborted at {}: {}; {} remaining operations discarded",
                    table,
                    name,
                    error,
                    operations.len()
                );
                result = Err(error);
                break;
            }
            if let Some(locked) = self.deferred_onto.take() {
                if !operations.as_slice().is_empty() {
                    debug!(
                        "table {:?} locked, moving {} operations from table {:?} behind {}",
                        locked,
                        operations.len(),
                        table,
                        name
                    );
                }
                let queue = self.table_mut(locked)?.queue_mut();
                operations.by_ref().for_each(|operation| queue.push(operation));
                break;
            }
        }

        self.table_mut(table)?.queue_mut().finish_drain();
        result
    }

    /// Apply one operation against the live state. Operations touching a table that is still
    /// locked are deferred again onto that table, which is recorded in `deferred_onto`.
    fn apply(&mut self, operation: Operation) -> Result<()> {
        trace!("applying {:?}", operation);
        match operation {
            Operation::AddComponent { entry, element } => self.enqueue_add(entry, element, None),
            Operation::AddComponentWithValue {
                entry,
                element,
                write,
            } => self.enqueue_add(entry, element, Some(write)),
            Operation::RemoveComponent { entry, element } => {
                self.enqueue_remove_component(entry, element)
            }
            Operation::CreateEntities { table, count } => self.enqueue_new_entries(table, count),
            Operation::DestroyEntities { entries } => self.enqueue_destroy_entries(&entries),
            Operation::TransferEntities {
                destination,
                entries,
            } => self.enqueue_transfer_entries(&entries, destination),
        }
    }

    /// The table for the elements of `table` with `element` added or removed.
    fn reshaped(&mut self, table: TableId, element: ElementType, add: bool) -> Result<TableId> {
        let mut elements = self.table(table)?.elements().to_vec();
        if add {
            elements.push(element);
        } else {
            elements.retain(|existing| *existing != element);
        }
        self.table_for(&elements)
    }

    /// Resolve entries and group them by table, in order of first appearance.
    fn group(&self, entries: &[Entry]) -> Result<Vec<Group>> {
        if entries.is_empty() {
            return Err(Error::BatchOperation(0));
        }
        let mut groups: Vec<Group> = Vec::new();
        for entry in entries {
            let location = self.index.location(*entry)?;
            match groups
                .iter_mut()
                .find(|group| group.table == location.table_id())
            {
                Some(group) => {
                    group.entries.push(*entry);
                    group.rows.push(location.row());
                }
                None => groups.push(Group {
                    table: location.table_id(),
                    entries: vec![*entry],
                    rows: vec![location.row()],
                }),
            }
        }
        Ok(groups)
    }

    fn ensure_unlocked(&self, table: TableId) -> Result<()> {
        if self.table(table)?.locked() {
            Err(Error::LockedStorage(table))
        } else {
            Ok(())
        }
    }

    #[inline]
    fn position(&self, id: TableId) -> Result<usize> {
        self.positions
            .get(&id)
            .copied()
            .ok_or(Error::TableNotFound(id))
    }

    /// Borrow two distinct tables mutably.
    fn pair_mut(&mut self, a: TableId, b: TableId) -> Result<(&mut Table, &mut Table)> {
        let a = self.position(a)?;
        let b = self.position(b)?;
        debug_assert_ne!(a, b, "pair_mut called with one table");
        if a < b {
            let (left, right) = self.tables.split_at_mut(b);
            Ok((&mut left[a], &mut right[0]))
        } else {
            let (left, right) = self.tables.split_at_mut(a);
            Ok((&mut right[0], &mut left[b]))
        }
    }
}
