use std::{
    fmt,
    sync::atomic::{AtomicU32, Ordering},
};

use crossbeam::queue::SegQueue;
use parking_lot::RwLock;

use crate::{
    entry::{Entry, Generation, Id},
    error::{Error, Result},
    storage::{Location, Row, TableId},
};

/// One arena slot: the current generation and, while live, where the entity is stored.
#[derive(Debug, Clone, Copy)]
struct Record {
    generation: Generation,
    location: Option<Location>,
}

impl Record {
    #[inline]
    fn is_live(&self) -> bool {
        self.location.is_some()
    }
}

/// The identity authority shared by every table that may exchange entities.
///
/// Issues [`Entry`] handles, recycles ids through a free pool with a bumped generation, and maps
/// each live entry to the table and row currently holding it. Tables keep an `Arc` to the index
/// they were built with; a transfer between tables is only allowed when both point at the same
/// index.
///
/// All methods take `&self`. Mutation goes through an internal lock so the index can be shared
/// by reference counting without an outer `RefCell`.
pub struct EntryIndex {
    /// Arena of slots, indexed by entry id.
    records: RwLock<Vec<Record>>,

    /// Ids available for reuse.
    dead_pool: SegQueue<Id>,

    /// Next table id handed to a table built against this index.
    next_table: AtomicU32,
}

impl Default for EntryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EntryIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryIndex")
            .field("slots", &self.records.read().len())
            .field("live", &self.len())
            .field("pooled", &self.dead_pool.len())
            .finish()
    }
}

impl EntryIndex {
    /// Construct an empty index.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            dead_pool: SegQueue::new(),
            next_table: AtomicU32::new(0),
        }
    }

    /// Allocate `count` entries stored at consecutive rows of `table`, starting at `first_row`.
    ///
    /// Ids from the free pool are reused first (carrying their bumped generation), then fresh
    /// ids are issued at generation zero.
    pub fn new_entries(&self, count: usize, table: TableId, first_row: Row) -> Result<Vec<Entry>> {
        if count == 0 {
            return Err(Error::Allocation(count));
        }

        let mut records = self.records.write();
        let mut allocated = Vec::with_capacity(count);
        let mut row = first_row;

        while allocated.len() < count
            && let Some(id) = self.dead_pool.pop()
        {
            let record = &mut records[id.index()];
            // A restore may have revived a pooled id; it is not free anymore.
            if record.is_live() {
                continue;
            }
            record.location = Some(Location::new(table, row));
            allocated.push(Entry::new(id, record.generation));
            row = row.increment();
        }

        while allocated.len() < count {
            let id = Id::new(records.len() as u32);
            records.push(Record {
                generation: Generation::FIRST,
                location: Some(Location::new(table, row)),
            });
            allocated.push(Entry::new(id, Generation::FIRST));
            row = row.increment();
        }

        Ok(allocated)
    }

    /// Release the given ids for reuse.
    ///
    /// Every id is validated before any is released; an unknown or already free id fails the
    /// whole call with [`Error::EntryNotFound`]. Released ids have their generation bumped,
    /// which makes every outstanding handle to them stale.
    pub fn recycle_entries(&self, ids: &[Id]) -> Result<()> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut records = self.records.write();
        if let Some(id) = ids
            .iter()
            .find(|id| !records.get(id.index()).is_some_and(Record::is_live))
        {
            return Err(Error::EntryNotFound(*id));
        }

        for id in ids {
            let record = &mut records[id.index()];
            record.generation = record.generation.next();
            record.location = None;
            self.dead_pool.push(id);
        }
        Ok(())
    }

    /// All live entries, ordered by table and row.
    pub fn entries(&self) -> Vec<Entry> {
        let records = self.records.read();
        let mut live: Vec<(Location, Entry)> = records
            .iter()
            .enumerate()
            .filter_map(|(index, record)| {
                record.location.map(|location| {
                    (
                        location,
                        Entry::new(Id::new(index as u32), record.generation),
                    )
                })
            })
            .collect();
        live.sort_by_key(|(location, _)| (location.table_id(), location.row().index()));
        live.into_iter().map(|(_, entry)| entry).collect()
    }

    /// Every free id with the generation its next holder will carry, in id order.
    pub fn free_entries(&self) -> Vec<(Id, Generation)> {
        self.records
            .read()
            .iter()
            .enumerate()
            .filter(|(_, record)| !record.is_live())
            .map(|(index, record)| (Id::new(index as u32), record.generation))
            .collect()
    }

    /// The live entry currently holding `id`.
    pub fn entry(&self, id: Id) -> Result<Entry> {
        let records = self.records.read();
        match records.get(id.index()) {
            Some(record) if record.is_live() => Ok(Entry::new(id, record.generation)),
            _ => Err(Error::EntryNotFound(id)),
        }
    }

    /// Where the entry is stored.
    ///
    /// Fails with [`Error::StaleEntry`] if the handle's generation is outdated or the id is free,
    /// and [`Error::EntryNotFound`] if the id was never issued.
    pub fn location(&self, entry: Entry) -> Result<Location> {
        let records = self.records.read();
        let record = records
            .get(entry.index())
            .ok_or(Error::EntryNotFound(entry.id()))?;
        match record.location {
            Some(location) if record.generation == entry.generation() => Ok(location),
            _ => Err(Error::StaleEntry(entry)),
        }
    }

    /// Whether the handle refers to a live entity.
    pub fn is_live(&self, entry: Entry) -> bool {
        self.location(entry).is_ok()
    }

    /// The number of live entries.
    pub fn len(&self) -> usize {
        self.records.read().iter().filter(|r| r.is_live()).count()
    }

    /// Whether no entry is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point a live entry at a new location.
    pub fn set_location(&self, entry: Entry, location: Location) -> Result<()> {
        let mut records = self.records.write();
        let record = records
            .get_mut(entry.index())
            .ok_or(Error::EntryNotFound(entry.id()))?;
        if !record.is_live() || record.generation != entry.generation() {
            return Err(Error::StaleEntry(entry));
        }
        record.location = Some(location);
        Ok(())
    }

    /// Recreate an entry with an exact id and generation, as read back from a snapshot.
    ///
    /// Ids below `id` that were never issued are created free and pooled. Fails with
    /// [`Error::EntryInUse`] if the id is live.
    pub fn force_new_entry(&self, id: Id, generation: Generation, location: Location) -> Result<Entry> {
        let mut records = self.records.write();
        self.grow_to(&mut records, id);

        let record = &mut records[id.index()];
        if record.is_live() {
            return Err(Error::EntryInUse(id));
        }
        record.generation = generation;
        record.location = Some(location);
        Ok(Entry::new(id, generation))
    }

    /// Free `id` at an exact generation, as read back from a snapshot, and pool it.
    ///
    /// Ids below `id` that were never issued are created free and pooled. A slot already free
    /// at a later generation keeps it, so no handle that was stale becomes live again. Fails
    /// with [`Error::EntryInUse`] if the id is live.
    pub fn force_free_entry(&self, id: Id, generation: Generation) -> Result<()> {
        let mut records = self.records.write();
        if let Some(record) = records.get_mut(id.index()) {
            if record.is_live() {
                return Err(Error::EntryInUse(id));
            }
            record.generation = record.generation.max(generation);
            return Ok(());
        }

        self.grow_to(&mut records, id);
        records[id.index()].generation = generation;
        self.dead_pool.push(id);
        Ok(())
    }

    /// Issue the id for a new table built against this index.
    pub fn next_table_id(&self) -> TableId {
        TableId::new(self.next_table.fetch_add(1, Ordering::Relaxed))
    }

    /// Extend the arena with free records up to and including `id`. Every new id but `id`
    /// itself is pooled.
    fn grow_to(&self, records: &mut Vec<Record>, id: Id) {
        while records.len() <= id.index() {
            let gap = Id::new(records.len() as u32);
            records.push(Record {
                generation: Generation::FIRST,
                location: None,
            });
            if gap != id {
                self.dead_pool.push(gap);
            }
        }
    }
}
