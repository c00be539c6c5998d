use std::{any::TypeId as StdTypeId, collections::HashMap, fmt, sync::Arc};

use log::{debug, trace};

use crate::{
    element::{Component, ElementType},
    entry::{self, Entry, EntryIndex},
    error::{Error, HookError, Result},
    mask::Mask,
    query::Filter,
    schema::Schema,
    storage::{
        Location, Row,
        cache::{self, Cache, Strategy},
        mem::GrowthStrategy,
        queue::OperationQueue,
    },
};

/// The identifier for a table, unique per entry index.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u32);

impl Id {
    /// Create a new Id with the given unique identifier.
    #[inline]
    pub const fn new(id: u32) -> Self {
        Id(id)
    }

    /// Get the index for this Id.
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Hooks invoked around a table's structural changes.
///
/// The `before` hooks may veto the operation by returning an error, in which case nothing is
/// mutated and the caller receives [`Error::Hook`]. Hooks only see borrowed data; work that
/// must happen later should capture [`Entry`] handles, never rows.
#[allow(unused_variables)]
pub trait Events {
    fn on_before_entries_created(&mut self, count: usize) -> std::result::Result<(), HookError> {
        Ok(())
    }

    fn on_after_entries_created(&mut self, entries: &[Entry]) {}

    fn on_before_entries_deleted(&mut self, rows: &[Row]) -> std::result::Result<(), HookError> {
        Ok(())
    }

    fn on_after_entries_deleted(&mut self, ids: &[entry::Id]) {}
}

/// Configures and builds a [`Table`].
///
/// ```rust,ignore
/// let table = TableBuilder::new(&mut schema, index.clone())
///     .with_elements(&[position, velocity])
///     .with_strategy(Strategy::Raw)
///     .build()?;
/// ```
pub struct TableBuilder<'a> {
    schema: &'a mut dyn Schema,
    index: Arc<EntryIndex>,
    elements: Vec<ElementType>,
    events: Option<Box<dyn Events>>,
    strategy: Strategy,
    growth: GrowthStrategy,
    capacity: usize,
}

impl<'a> TableBuilder<'a> {
    pub fn new(schema: &'a mut dyn Schema, index: Arc<EntryIndex>) -> Self {
        Self {
            schema,
            index,
            elements: Vec::new(),
            events: None,
            strategy: Strategy::configured(),
            growth: GrowthStrategy::default(),
            capacity: 0,
        }
    }

    /// The component types stored by the table. Duplicates are ignored.
    pub fn with_elements(mut self, elements: &[ElementType]) -> Self {
        for element in elements {
            if !self.elements.contains(element) {
                self.elements.push(*element);
            }
        }
        self
    }

    pub fn with_events(mut self, events: impl Events + 'static) -> Self {
        self.events = Some(Box::new(events));
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_growth(mut self, growth: GrowthStrategy) -> Self {
        self.growth = growth;
        self
    }

    /// Rows to allocate up front in every cache.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Register the elements with the schema and build the table.
    pub fn build(self) -> Result<Table> {
        self.schema.register(&self.elements)?;
        let mask = self.schema.mask_of(&self.elements)?;

        let caches: Vec<Box<dyn Cache>> = self
            .elements
            .iter()
            .map(|element| cache::factory(self.strategy, element, &self.growth, self.capacity))
            .collect();
        let slots = self
            .elements
            .iter()
            .enumerate()
            .map(|(slot, element)| (element.type_id(), slot))
            .collect();

        let id = self.index.next_table_id();
        debug!(
            "built table {:?} [{}] ({:?} storage)",
            id,
            self.elements
                .iter()
                .map(ElementType::name)
                .collect::<Vec<_>>()
                .join(", "),
            self.strategy
        );

        Ok(Table {
            id,
            index: self.index,
            mask,
            elements: self.elements,
            caches,
            slots,
            entries: Vec::new(),
            events: self.events,
            lock: 0,
            queue: OperationQueue::new(),
        })
    }
}

/// The entities of one archetype and their component data.
///
/// Each component lives in its own dense [`Cache`]; row `n` of every cache, together with
/// `entries[n]`, is one entity.
///
/// # Invariants
/// - every cache length equals `entries.len()`
/// - the mask marks exactly the schema rows of `elements`
/// - while `locked()`, no row is added, removed or moved
pub struct Table {
    id: Id,

    /// The identity authority shared with every table entities may move to.
    index: Arc<EntryIndex>,

    mask: Mask,

    /// The stored component types, in cache order.
    elements: Vec<ElementType>,

    caches: Vec<Box<dyn Cache>>,

    /// Cache slot per component TypeId.
    slots: HashMap<StdTypeId, usize>,

    /// The entry stored at each row.
    entries: Vec<Entry>,

    events: Option<Box<dyn Events>>,

    /// Number of cursors currently iterating the table.
    lock: u32,

    /// Structural operations deferred while locked.
    queue: OperationQueue,
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.id)
            .field("elements", &self.elements)
            .field("len", &self.entries.len())
            .field("lock", &self.lock)
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl Table {
    #[inline]
    pub fn id(&self) -> Id {
        self.id
    }

    #[inline]
    pub fn mask(&self) -> &Mask {
        &self.mask
    }

    #[inline]
    pub fn elements(&self) -> &[ElementType] {
        &self.elements
    }

    /// The entry index this table allocates identities from.
    #[inline]
    pub fn index(&self) -> &Arc<EntryIndex> {
        &self.index
    }

    /// The number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entries, one per row.
    #[inline]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// The entry stored at `row`.
    pub fn entry(&self, row: Row) -> Result<Entry> {
        self.entries
            .get(row.index())
            .copied()
            .ok_or_else(|| Error::access(row, self.entries.len()))
    }

    /// The row currently holding `entry`.
    pub fn row_of(&self, entry: Entry) -> Result<Row> {
        let location = self.index.location(entry)?;
        if location.table_id() == self.id {
            Ok(location.row())
        } else {
            Err(Error::EntryNotFound(entry.id()))
        }
    }

    /// Replace the event hooks.
    pub fn set_events(&mut self, events: impl Events + 'static) {
        self.events = Some(Box::new(events));
    }

    #[inline]
    pub fn contains(&self, element: &ElementType) -> bool {
        self.slot(element).is_some()
    }

    pub fn contains_all(&self, elements: &[ElementType]) -> bool {
        elements.iter().all(|element| self.contains(element))
    }

    /// Whether the table's mask satisfies a compiled query.
    #[inline]
    pub fn matches(&self, filter: &Filter) -> bool {
        filter.matches(&self.mask)
    }

    /// Whether a cursor currently holds the table.
    #[inline]
    pub fn locked(&self) -> bool {
        self.lock > 0
    }

    /// The cache storing `element`.
    pub fn cache(&self, element: &ElementType) -> Option<&dyn Cache> {
        self.slot(element).map(|slot| self.caches[slot].as_ref())
    }

    /// The cache storing `element`, mutably.
    pub fn cache_mut(&mut self, element: &ElementType) -> Option<&mut dyn Cache> {
        let slot = self.slot(element)?;
        Some(self.caches[slot].as_mut())
    }

    pub fn get<T: Component>(&self, row: Row) -> Result<&T> {
        let slot = self.typed_slot::<T>()?;
        self.caches[slot].get::<T>(row)
    }

    pub fn get_mut<T: Component>(&mut self, row: Row) -> Result<&mut T> {
        let slot = self.typed_slot::<T>()?;
        self.caches[slot].get_mut::<T>(row)
    }

    pub fn set<T: Component>(&mut self, row: Row, value: T) -> Result<()> {
        let slot = self.typed_slot::<T>()?;
        self.caches[slot].set(row, value)
    }

    /// Append `count` zero-valued rows and allocate an entry for each.
    pub fn new_entries(&mut self, count: usize) -> Result<Vec<Entry>> {
        self.ensure_unlocked()?;
        if count == 0 {
            return Err(Error::BatchOperation(count));
        }
        if let Some(events) = self.events.as_mut() {
            events
                .on_before_entries_created(count)
                .map_err(|source| Error::Hook {
                    operation: "new_entries",
                    source,
                })?;
        }

        let first_row = Row::new(self.entries.len());
        let entries = self.index.new_entries(count, self.id, first_row)?;
        for cache in self.caches.iter_mut() {
            cache.reserve(count);
            for _ in 0..count {
                cache.push_default();
            }
        }
        self.entries.extend_from_slice(&entries);

        #[cfg(debug_assertions)]
        self.verify_invariants();

        trace!("table {:?}: created {} entries", self.id, count);
        if let Some(events) = self.events.as_mut() {
            events.on_after_entries_created(&entries);
        }
        Ok(entries)
    }

    /// Delete the given rows, compacting the table by moving the last row into each gap, and
    /// recycle their identities.
    ///
    /// Returns the deleted entries, highest row first.
    pub fn delete_entries(&mut self, rows: &[Row]) -> Result<Vec<Entry>> {
        self.ensure_unlocked()?;
        let rows = self.descending_rows(rows)?;
        if let Some(events) = self.events.as_mut() {
            events
                .on_before_entries_deleted(&rows)
                .map_err(|source| Error::Hook {
                    operation: "delete_entries",
                    source,
                })?;
        }

        let mut deleted = Vec::with_capacity(rows.len());
        for row in rows {
            for cache in self.caches.iter_mut() {
                cache.swap_remove(row)?;
            }
            deleted.push(self.entries.swap_remove(row.index()));
            self.repoint(row)?;
        }

        let ids: Vec<entry::Id> = deleted.iter().map(Entry::id).collect();
        self.index.recycle_entries(&ids)?;

        #[cfg(debug_assertions)]
        self.verify_invariants();

        trace!("table {:?}: deleted {} entries", self.id, deleted.len());
        if let Some(events) = self.events.as_mut() {
            events.on_after_entries_deleted(&ids);
        }
        Ok(deleted)
    }

    /// Move the given rows to `destination`, keeping their identities.
    ///
    /// Components both tables store are moved, components only this table stores are dropped
    /// and components only the destination stores start zero-valued. Every precondition is
    /// checked before anything moves.
    ///
    /// Returns the transferred entries, highest source row first.
    pub fn transfer_entries(&mut self, destination: &mut Table, rows: &[Row]) -> Result<Vec<Entry>> {
        if !Arc::ptr_eq(&self.index, &destination.index) {
            return Err(Error::TransferEntryIndexMismatch {
                source_table: self.id,
                destination: destination.id,
            });
        }
        self.ensure_unlocked()?;
        destination.ensure_unlocked()?;
        let rows = self.descending_rows(rows)?;

        // Source slot -> destination slot for shared components.
        let mut shared = Vec::with_capacity(self.caches.len());
        for cache in self.caches.iter() {
            let target = destination.slot(cache.element());
            if let Some(target) = target
                && destination.caches[target].strategy() != cache.strategy()
            {
                return Err(Error::IncompatibleCache(cache.element().name()));
            }
            shared.push(target);
        }
        let fresh: Vec<usize> = (0..destination.caches.len())
            .filter(|slot| !shared.contains(&Some(*slot)))
            .collect();

        let mut moved = Vec::with_capacity(rows.len());
        for row in rows {
            let target_row = Row::new(destination.entries.len());
            for (cache, target) in self.caches.iter_mut().zip(shared.iter()) {
                match target {
                    Some(target) => cache.move_row(row, destination.caches[*target].as_mut())?,
                    None => cache.swap_remove(row)?,
                }
            }
            for slot in fresh.iter() {
                destination.caches[*slot].push_default();
            }

            let entry = self.entries.swap_remove(row.index());
            destination.entries.push(entry);
            self.index
                .set_location(entry, Location::new(destination.id, target_row))?;
            self.repoint(row)?;
            moved.push(entry);
        }

        #[cfg(debug_assertions)]
        {
            self.verify_invariants();
            destination.verify_invariants();
        }

        trace!(
            "transferred {} entries from table {:?} to {:?}",
            moved.len(),
            self.id,
            destination.id
        );
        Ok(moved)
    }

    /// Append a zero-valued row for an entry with an exact identity, as read back from a
    /// snapshot.
    pub(crate) fn restore_entry(&mut self, entry: Entry) -> Result<Location> {
        self.ensure_unlocked()?;
        let location = Location::new(self.id, Row::new(self.entries.len()));
        self.index
            .force_new_entry(entry.id(), entry.generation(), location)?;
        for cache in self.caches.iter_mut() {
            cache.push_default();
        }
        self.entries.push(entry);

        #[cfg(debug_assertions)]
        self.verify_invariants();

        Ok(location)
    }

    /// Verify the table invariants.
    ///
    /// # Panics
    /// - If a cache length differs from the entry count.
    #[cfg(debug_assertions)]
    pub fn verify_invariants(&self) {
        let expected_len = self.entries.len();
        for cache in self.caches.iter() {
            assert_eq!(
                cache.len(),
                expected_len,
                "cache {} length {} doesn't match entry count {}",
                cache.element(),
                cache.len(),
                expected_len
            );
        }
    }

    #[inline]
    pub(crate) fn lock(&mut self) {
        self.lock += 1;
    }

    /// Release one lock. Returns true when the table became unlocked.
    #[inline]
    pub(crate) fn unlock(&mut self) -> bool {
        self.lock = self.lock.saturating_sub(1);
        self.lock == 0
    }

    #[inline]
    pub(crate) fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    #[inline]
    pub(crate) fn queue_mut(&mut self) -> &mut OperationQueue {
        &mut self.queue
    }

    #[inline]
    fn ensure_unlocked(&self) -> Result<()> {
        if self.locked() {
            Err(Error::LockedStorage(self.id))
        } else {
            Ok(())
        }
    }

    #[inline]
    fn slot(&self, element: &ElementType) -> Option<usize> {
        self.slots
            .get(&element.type_id())
            .copied()
            .filter(|slot| self.elements[*slot] == *element)
    }

    #[inline]
    fn typed_slot<T: Component>(&self) -> Result<usize> {
        self.slots
            .get(&StdTypeId::of::<T>())
            .copied()
            .ok_or(Error::MissingComponent {
                table: self.id,
                element: T::name(),
            })
    }

    /// Point the entry that was swapped into `row` (if any) at its new location.
    fn repoint(&self, row: Row) -> Result<()> {
        match self.entries.get(row.index()) {
            Some(entry) => self.index.set_location(*entry, Location::new(self.id, row)),
            None => Ok(()),
        }
    }

    /// Deduplicate, range check and sort rows highest first, so each swap only ever moves a
    /// row that is not scheduled for removal.
    fn descending_rows(&self, rows: &[Row]) -> Result<Vec<Row>> {
        if rows.is_empty() {
            return Err(Error::BatchOperation(0));
        }
        if let Some(row) = rows.iter().find(|row| row.index() >= self.entries.len()) {
            return Err(Error::access(*row, self.entries.len()));
        }
        let mut rows = rows.to_vec();
        rows.sort_unstable_by(|a, b| b.cmp(a));
        rows.dedup();
        Ok(rows)
    }
}
