//! Persisted entity layout.
//!
//! Each entity is written as its identity, the names of its components, and the serialized
//! value of every component registered with [`Registry::register_serde`]. Components registered
//! without serde support are listed but carry no data; they come back as their zero value.
//!
//! ```json
//! { "id": 4, "recycled_generation": 1,
//!   "components": ["Position", "Tag"],
//!   "data": { "Position": { "x": 1.0, "y": 2.0 } } }
//! ```
//!
//! Restoring recreates each entity under the exact `(id, generation)` it was saved with, so
//! entries stored inside component data remain valid. A [`StorageSnapshot`] also records the
//! ids destroyed entities left free, with the generation each will be reissued at, so entries
//! pointing at destroyed entities stay stale after a restore.
//!
//! [`Registry::register_serde`]: crate::element::Registry::register_serde

use std::collections::{BTreeMap, HashSet};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    element::{Codec, ElementType},
    entry::{self, Entry, Generation},
    error::{Error, Result},
    storage::{Storage, TableId},
};

/// One entity as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: entry::Id,
    pub recycled_generation: Generation,
    pub components: Vec<String>,
    #[serde(default)]
    pub data: BTreeMap<String, serde_json::Value>,
}

impl EntitySnapshot {
    /// The entry handle this snapshot restores to.
    pub fn entry(&self) -> Entry {
        Entry::new(self.id, self.recycled_generation)
    }
}

/// A free id and the generation its next holder will carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeSlot {
    pub id: entry::Id,
    pub generation: Generation,
}

/// A whole storage as persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageSnapshot {
    pub entities: Vec<EntitySnapshot>,
    #[serde(default)]
    pub free: Vec<FreeSlot>,
}

/// Snapshot every entity of one table, in row order.
pub fn snapshot_table(storage: &Storage, table: TableId) -> Result<Vec<EntitySnapshot>> {
    let table = storage.table(table)?;
    let codecs = table
        .elements()
        .iter()
        .filter_map(|element| codec_of(storage, element).map(|codec| (*element, codec)))
        .collect::<Vec<_>>();
    let components = table
        .elements()
        .iter()
        .map(|element| element.name().to_string())
        .collect::<Vec<_>>();

    let mut snapshots = Vec::with_capacity(table.len());
    for (row, entry) in table.entries().iter().enumerate() {
        let mut data = BTreeMap::new();
        for (element, codec) in codecs.iter() {
            let cache = table
                .cache(element)
                .ok_or_else(|| Error::Snapshot(format!("table has no cache for {element}")))?;
            data.insert(element.name().to_string(), codec.encode(cache, row.into())?);
        }
        snapshots.push(EntitySnapshot {
            id: entry.id(),
            recycled_generation: entry.generation(),
            components: components.clone(),
            data,
        });
    }
    Ok(snapshots)
}

/// Snapshot every entity in storage, table by table, along with every free id.
pub fn snapshot_storage(storage: &Storage) -> Result<StorageSnapshot> {
    let mut entities = Vec::new();
    for table in storage.tables() {
        entities.extend(snapshot_table(storage, table.id())?);
    }
    let free = storage
        .index()
        .free_entries()
        .into_iter()
        .map(|(id, generation)| FreeSlot { id, generation })
        .collect::<Vec<_>>();
    debug!("snapshot of {} entities, {} free ids", entities.len(), free.len());
    Ok(StorageSnapshot { entities, free })
}

/// Restore a whole storage: free ids are seeded at their saved generations, then every entity
/// is restored as by [`restore`].
///
/// Free ids are checked against each other, the snapshot's entities and the live entries of
/// `storage` along with everything [`restore`] checks, before anything is changed.
pub fn restore_storage(storage: &mut Storage, snapshot: &StorageSnapshot) -> Result<Vec<Entry>> {
    let entities = snapshot
        .entities
        .iter()
        .map(|entity| entity.id)
        .collect::<HashSet<_>>();
    let mut seen = HashSet::new();
    for slot in snapshot.free.iter() {
        if !seen.insert(slot.id)
            || entities.contains(&slot.id)
            || storage.index().entry(slot.id).is_ok()
        {
            return Err(Error::EntryInUse(slot.id));
        }
    }
    let resolved = prepare(storage, &snapshot.entities)?;

    for slot in snapshot.free.iter() {
        storage.index().force_free_entry(slot.id, slot.generation)?;
    }
    apply(storage, &snapshot.entities, resolved)
}

/// Recreate `entities` in `storage`, each in the table for its component set and under its
/// saved identity.
///
/// Component names, codecs and identities are all checked before anything is restored. A
/// value that fails to decode stops the restore with the entities before it already in place.
///
/// Ids below the highest restored one that no entity claims come back free at their first
/// generation; use [`restore_storage`] to keep the generations they were freed at.
pub fn restore(storage: &mut Storage, entities: &[EntitySnapshot]) -> Result<Vec<Entry>> {
    let resolved = prepare(storage, entities)?;
    apply(storage, entities, resolved)
}

type Resolved = (Vec<ElementType>, Vec<(ElementType, Codec, serde_json::Value)>);

/// Check identities and resolve component names and codecs, without touching `storage`.
fn prepare(storage: &Storage, entities: &[EntitySnapshot]) -> Result<Vec<Resolved>> {
    let mut seen = HashSet::new();
    let mut resolved = Vec::with_capacity(entities.len());
    for snapshot in entities {
        if !seen.insert(snapshot.id) || storage.index().entry(snapshot.id).is_ok() {
            return Err(Error::EntryInUse(snapshot.id));
        }
        resolved.push(resolve(storage, snapshot)?);
    }
    Ok(resolved)
}

fn apply(storage: &mut Storage, entities: &[EntitySnapshot], resolved: Vec<Resolved>) -> Result<Vec<Entry>> {
    let mut restored = Vec::with_capacity(entities.len());
    for (snapshot, (elements, values)) in entities.iter().zip(resolved) {
        let table = storage.table_for(&elements)?;
        let entry = snapshot.entry();
        let location = storage.restore_entry(table, entry)?;
        let table = storage.table_mut(table)?;
        for (element, codec, value) in values {
            let cache = table
                .cache_mut(&element)
                .ok_or_else(|| Error::Snapshot(format!("table has no cache for {element}")))?;
            codec.decode(cache, location.row(), value)?;
        }
        restored.push(entry);
    }
    debug!("restored {} entities", restored.len());
    Ok(restored)
}

fn resolve(storage: &Storage, snapshot: &EntitySnapshot) -> Result<Resolved> {
    let registry = storage.registry();
    let elements = snapshot
        .components
        .iter()
        .map(|name| {
            registry
                .by_name(name)
                .ok_or_else(|| Error::Snapshot(format!("unknown component {name}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut values = Vec::with_capacity(snapshot.data.len());
    for (name, value) in snapshot.data.iter() {
        let element = elements
            .iter()
            .find(|element| element.name() == name)
            .ok_or_else(|| {
                Error::Snapshot(format!("data for {name}, which is not among the components"))
            })?;
        let codec = codec_of(storage, element)
            .ok_or_else(|| Error::Snapshot(format!("component {name} is not serializable")))?;
        values.push((*element, codec, value.clone()));
    }
    Ok((elements, values))
}

/// Codecs are looked up in the registry, since a type may gain serde support after tables
/// holding it were built.
fn codec_of(storage: &Storage, element: &ElementType) -> Option<Codec> {
    storage
        .registry()
        .get(element.id())
        .and_then(|element| element.codec().copied())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::{Component, Config, element::Registry};

    #[derive(Component, Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Position {
        x: f64,
        y: f64,
    }

    #[derive(Component, Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Target(Option<Entry>);

    #[derive(Component, Default, Debug)]
    struct Tag;

    fn registry() -> Arc<Registry> {
        let registry = Arc::new(Registry::new());
        registry.register_serde::<Position>();
        registry.register_serde::<Target>();
        registry.register::<Tag>();
        registry
    }

    fn populated() -> (Storage, Vec<Entry>) {
        let registry = registry();
        let position = registry.register::<Position>();
        let target = registry.register::<Target>();
        let tag = registry.register::<Tag>();
        let mut storage = Storage::new(registry, Config::default());

        let a = storage.table_for(&[position, tag]).unwrap();
        let b = storage.table_for(&[position, target]).unwrap();
        let mut entries = storage.new_entries(a, 3).unwrap();
        entries.extend(storage.new_entries(b, 2).unwrap());

        // Bump a generation: destroy one and create one that reuses the id.
        storage.destroy_entries(&[entries[1]]).unwrap();
        entries.remove(1);
        entries.extend(storage.new_entries(b, 1).unwrap());

        for (i, entry) in entries.iter().enumerate() {
            storage
                .set(*entry, Position { x: i as f64, y: 2.0 * i as f64 })
                .unwrap();
        }
        storage.set(entries[3], Target(Some(entries[0]))).unwrap();
        (storage, entries)
    }

    #[test]
    fn snapshot_records_identity_and_data() {
        // Given
        let (storage, entries) = populated();

        // When
        let snapshots = snapshot_storage(&storage).unwrap().entities;

        // Then
        assert_eq!(snapshots.len(), 5);
        let recycled = snapshots.iter().find(|s| s.entry() == entries[4]).unwrap();
        assert_eq!(recycled.recycled_generation, Generation::new(1));
        let tagged = snapshots.iter().find(|s| s.entry() == entries[0]).unwrap();
        assert_eq!(tagged.components.len(), 2);
        assert!(tagged.components.iter().any(|name| name == "Tag"));
        assert!(!tagged.data.contains_key("Tag"));
        assert_eq!(
            tagged.data["Position"],
            serde_json::json!({ "x": 0.0, "y": 0.0 })
        );
    }

    #[test]
    fn round_trip_preserves_identity_and_values() {
        // Given
        let (storage, entries) = populated();
        let json = serde_json::to_string(&snapshot_storage(&storage).unwrap()).unwrap();

        // When
        let snapshot: StorageSnapshot = serde_json::from_str(&json).unwrap();
        let mut fresh = Storage::new(registry(), Config::default());
        let restored = restore_storage(&mut fresh, &snapshot).unwrap();

        // Then
        assert_eq!(restored.len(), entries.len());
        for entry in entries.iter() {
            assert!(fresh.index().is_live(*entry));
            assert_eq!(
                fresh.get::<Position>(*entry).unwrap(),
                storage.get::<Position>(*entry).unwrap()
            );
        }
        let pointer = fresh.get::<Target>(entries[3]).unwrap().0.unwrap();
        assert_eq!(pointer, entries[0]);
        assert!(fresh.get::<Position>(pointer).is_ok());
        assert_eq!(snapshot_storage(&fresh).unwrap(), snapshot);
    }

    #[test]
    fn restored_storage_keeps_allocating_new_ids() {
        // Given
        let (storage, entries) = populated();
        let snapshots = snapshot_storage(&storage).unwrap().entities;
        let mut fresh = Storage::new(registry(), Config::default());
        restore(&mut fresh, &snapshots).unwrap();

        // When
        let table = fresh.location(entries[0]).unwrap().table_id();
        let created = fresh.new_entries(table, 3).unwrap();

        // Then
        for entry in created {
            assert!(!entries.iter().any(|e| e.id() == entry.id()));
        }
        assert_eq!(fresh.index().len(), 8);
    }

    #[test]
    fn restore_rejects_unknown_components_before_mutating() {
        // Given
        let (storage, _) = populated();
        let mut snapshots = snapshot_storage(&storage).unwrap().entities;
        snapshots[4].components.push("Velocity".into());
        let mut fresh = Storage::new(registry(), Config::default());

        // When
        let result = restore(&mut fresh, &snapshots);

        // Then
        assert!(matches!(result, Err(Error::Snapshot(_))));
        assert!(fresh.index().is_empty());
    }

    #[test]
    fn restore_rejects_live_or_duplicate_ids() {
        let (mut storage, entries) = populated();
        let snapshots = snapshot_storage(&storage).unwrap().entities;

        assert!(matches!(
            restore(&mut storage, &snapshots[..1]),
            Err(Error::EntryInUse(_))
        ));

        let mut fresh = Storage::new(registry(), Config::default());
        let twice = vec![snapshots[0].clone(), snapshots[0].clone()];
        assert!(matches!(
            restore(&mut fresh, &twice),
            Err(Error::EntryInUse(id)) if id == entries[0].id()
        ));
        assert!(fresh.index().is_empty());
    }

    #[test]
    fn data_for_unserializable_components_is_rejected() {
        let (storage, _) = populated();
        let mut snapshots = snapshot_storage(&storage).unwrap().entities;
        snapshots[0]
            .data
            .insert("Tag".into(), serde_json::Value::Null);
        let mut fresh = Storage::new(registry(), Config::default());

        assert!(matches!(
            restore(&mut fresh, &snapshots),
            Err(Error::Snapshot(_))
        ));
    }

    #[test]
    fn references_to_destroyed_entities_stay_stale_after_restore() {
        // Given: e0 points at e1, which is then destroyed
        let registry = registry();
        let target = registry.register::<Target>();
        let mut storage = Storage::new(registry, Config::default());
        let table = storage.table_for(&[target]).unwrap();
        let entries = storage.new_entries(table, 2).unwrap();
        storage.set(entries[0], Target(Some(entries[1]))).unwrap();
        storage.destroy_entries(&[entries[1]]).unwrap();
        let json = serde_json::to_string(&snapshot_storage(&storage).unwrap()).unwrap();

        // When
        let snapshot: StorageSnapshot = serde_json::from_str(&json).unwrap();
        let mut fresh = Storage::new(self::registry(), Config::default());
        restore_storage(&mut fresh, &snapshot).unwrap();
        let table = fresh.location(entries[0]).unwrap().table_id();
        let reissued = fresh.new_entries(table, 1).unwrap()[0];

        // Then
        assert_eq!(
            snapshot.free,
            vec![FreeSlot {
                id: entries[1].id(),
                generation: Generation::new(1)
            }]
        );
        assert_eq!(reissued, storage.new_entries(table, 1).unwrap()[0]);
        assert_eq!(reissued.id(), entries[1].id());
        assert_eq!(reissued.generation(), Generation::new(1));
        let pointer = fresh.get::<Target>(entries[0]).unwrap().0.unwrap();
        assert!(!fresh.index().is_live(pointer));
        assert!(matches!(
            fresh.get::<Target>(pointer),
            Err(Error::StaleEntry(_))
        ));
    }

    #[test]
    fn restore_storage_rejects_free_ids_that_are_taken() {
        let (storage, entries) = populated();
        let mut snapshot = snapshot_storage(&storage).unwrap();
        snapshot.free.push(FreeSlot {
            id: entries[0].id(),
            generation: Generation::new(3),
        });
        let mut fresh = Storage::new(registry(), Config::default());

        assert!(matches!(
            restore_storage(&mut fresh, &snapshot),
            Err(Error::EntryInUse(id)) if id == entries[0].id()
        ));
        assert!(fresh.index().is_empty());
        assert!(fresh.index().free_entries().is_empty());
    }
}
