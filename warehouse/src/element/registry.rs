use std::any::TypeId as StdTypeId;

use dashmap::DashMap;
use log::warn;
use parking_lot::RwLock;
use serde::{Serialize, de::DeserializeOwned};

use crate::element::{Codec, Component, ElementType, Id};

/// An explicit registry of component types.
///
/// Built once during startup and shared by reference (usually through an `Arc`) with every
/// schema, table and accessor that needs element types. Each test can build its own registry,
/// there is no process wide state.
///
/// Registration is idempotent: registering a type again returns the element type issued the
/// first time. Ids are dense and issued in registration order.
pub struct Registry {
    /// Map from Rust TypeId to element id. Lock-free reads via sharded concurrent hashmap.
    types: DashMap<StdTypeId, Id>,

    /// Map from component name to element id, used to resolve snapshots.
    names: DashMap<&'static str, Id>,

    /// Registered element types, indexed by id. Protected by RwLock for rare writes.
    elements: RwLock<Vec<ElementType>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create a new, empty registry.
    #[inline]
    pub fn new() -> Self {
        Self {
            types: DashMap::new(),
            names: DashMap::new(),
            elements: RwLock::new(Vec::new()),
        }
    }

    /// Register a component type, returning its element type.
    pub fn register<T: Component>(&self) -> ElementType {
        self.insert::<T>(None)
    }

    /// Register a component type that can be written to and read from snapshots.
    ///
    /// A type first registered without serde support gains it here; its id does not change.
    pub fn register_serde<T: Component + Serialize + DeserializeOwned>(&self) -> ElementType {
        self.insert::<T>(Some(Codec::of::<T>()))
    }

    /// Get the element type for `T`, if it has been registered.
    pub fn element_of<T: Component>(&self) -> Option<ElementType> {
        let id = self.types.get(&StdTypeId::of::<T>()).map(|id| *id)?;
        self.get(id)
    }

    /// Get the element type with the given id.
    pub fn get(&self, id: Id) -> Option<ElementType> {
        self.elements.read().get(id.index()).copied()
    }

    /// Get the element type registered under `name`.
    pub fn by_name(&self, name: &str) -> Option<ElementType> {
        let id = self.names.get(name).map(|id| *id)?;
        self.get(id)
    }

    /// The number of registered element types.
    pub fn len(&self) -> usize {
        self.elements.read().len()
    }

    /// Whether nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert<T: Component>(&self, codec: Option<Codec>) -> ElementType {
        let std_type_id = StdTypeId::of::<T>();

        // Fast path: already registered (lock-free read).
        let existing = self.types.get(&std_type_id).map(|id| *id);
        let id = match existing {
            Some(id) => id,
            None => match self.types.entry(std_type_id) {
                dashmap::Entry::Occupied(occupied) => *occupied.get(),
                dashmap::Entry::Vacant(vacant) => {
                    let mut elements = self.elements.write();
                    let id = Id::new(elements.len() as u32);
                    let element = ElementType::of::<T>(id, codec);
                    elements.push(element);
                    if let Some(previous) = self.names.insert(T::name(), id) {
                        warn!(
                            "component name '{}' registered by two types ({:?} and {:?}), snapshots resolve to the latest",
                            T::name(),
                            previous,
                            id
                        );
                    }
                    vacant.insert(id);
                    return element;
                }
            },
        };

        let mut elements = self.elements.write();
        let element = &mut elements[id.index()];
        if let Some(codec) = codec
            && element.codec().is_none()
        {
            element.set_codec(codec);
        }
        *element
    }
}
