//! Component types and their runtime identity.
//!
//! A [`Component`] is any `Default + 'static` type. Registering it with a [`Registry`] yields an
//! [`ElementType`]: a small `Copy` token carrying the registry id, the Rust `TypeId`, the memory
//! layout and the monomorphized functions the type-erased storage needs (drop, zero value, cache
//! construction and, optionally, a serde codec).
//!
//! Element types are obtained once at startup and handed around by value. Two element types are
//! equal exactly when they denote the same registered component.
//!
//! ```rust,ignore
//! #[derive(Component, Default)]
//! struct Position { x: f64, y: f64 }
//!
//! let registry = Registry::new();
//! let position = registry.register::<Position>();
//! assert_eq!(position, registry.register::<Position>());
//! ```

mod registry;

use std::{
    alloc::Layout,
    any::TypeId as StdTypeId,
    fmt,
    hash::{Hash, Hasher},
    ptr::NonNull,
};

use serde::{Serialize, de::DeserializeOwned};

pub use registry::Registry;

use crate::{
    error::Result,
    storage::{
        Row,
        cache::{BoxedCache, Cache},
        mem::GrowthStrategy,
    },
};

/// A trait representing a component stored in a table.
///
/// The `Default` bound provides the zero value new rows are initialized with. The
/// `#[derive(Component)]` macro implements this trait and reports the bare struct name.
pub trait Component: Default + 'static {
    /// The name used for this component in logs and snapshots.
    fn name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A registry issued element identifier.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u32);

impl Id {
    /// Construct a new element Id from a raw u32 value.
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the index of this element if it were to live in indexable storage (e.g. Vec)
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// The raw value.
    #[inline]
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl From<u32> for Id {
    #[inline]
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

/// Serialization functions for a component, captured at registration time.
#[derive(Clone, Copy)]
pub struct Codec {
    encode: fn(&dyn Cache, Row) -> Result<serde_json::Value>,
    decode: fn(&mut dyn Cache, Row, serde_json::Value) -> Result<()>,
}

impl Codec {
    fn of<T: Component + Serialize + DeserializeOwned>() -> Self {
        Self {
            encode: encode_impl::<T>,
            decode: decode_impl::<T>,
        }
    }

    /// Encode the value at `row` of `cache`.
    #[inline]
    pub fn encode(&self, cache: &dyn Cache, row: Row) -> Result<serde_json::Value> {
        (self.encode)(cache, row)
    }

    /// Decode `value` into `row` of `cache`, replacing what was there.
    #[inline]
    pub fn decode(&self, cache: &mut dyn Cache, row: Row, value: serde_json::Value) -> Result<()> {
        (self.decode)(cache, row, value)
    }
}

fn encode_impl<T: Component + Serialize>(cache: &dyn Cache, row: Row) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(cache.get::<T>(row)?)?)
}

fn decode_impl<T: Component + DeserializeOwned>(
    cache: &mut dyn Cache,
    row: Row,
    value: serde_json::Value,
) -> Result<()> {
    let value: T = serde_json::from_value(value)?;
    cache.set(row, value)
}

/// The runtime identity of a registered component type.
#[derive(Clone, Copy)]
pub struct ElementType {
    /// The registry id.
    id: Id,

    /// The Rust TypeId for runtime type checking.
    type_id: StdTypeId,

    /// The component name.
    name: &'static str,

    /// The memory layout of the type.
    layout: Layout,

    /// Drops a value in place (may be a no-op).
    drop_fn: unsafe fn(NonNull<u8>),

    /// Writes the zero value into uninitialized memory.
    default_fn: unsafe fn(NonNull<u8>),

    /// Builds an empty checked cache for this type.
    boxed_fn: fn(&ElementType, usize, GrowthStrategy) -> Box<dyn Cache>,

    /// Optional serde support.
    codec: Option<Codec>,
}

impl ElementType {
    /// Construct the element type for `T` with a registry issued id.
    pub(crate) fn of<T: Component>(id: Id, codec: Option<Codec>) -> Self {
        let drop_fn = if std::mem::needs_drop::<T>() {
            Self::drop_impl::<T>
        } else {
            Self::drop_noop
        };
        Self {
            id,
            type_id: StdTypeId::of::<T>(),
            name: T::name(),
            layout: Layout::new::<T>(),
            drop_fn,
            default_fn: Self::default_impl::<T>,
            boxed_fn: Self::boxed_impl::<T>,
            codec,
        }
    }

    /// Get the registry id.
    #[inline]
    pub fn id(&self) -> Id {
        self.id
    }

    /// Get the Rust TypeId.
    #[inline]
    pub fn type_id(&self) -> StdTypeId {
        self.type_id
    }

    /// Get the component name.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get the memory layout.
    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Whether this element denotes the component type `T`.
    #[inline]
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == StdTypeId::of::<T>()
    }

    /// Get the drop function.
    #[inline]
    pub fn drop_fn(&self) -> unsafe fn(NonNull<u8>) {
        self.drop_fn
    }

    /// Get the function writing the zero value.
    #[inline]
    pub fn default_fn(&self) -> unsafe fn(NonNull<u8>) {
        self.default_fn
    }

    /// Get the serde codec, if the component was registered with one.
    #[inline]
    pub fn codec(&self) -> Option<&Codec> {
        self.codec.as_ref()
    }

    #[inline]
    pub(crate) fn set_codec(&mut self, codec: Codec) {
        self.codec = Some(codec);
    }

    /// Build an empty checked cache for this element.
    #[inline]
    pub(crate) fn new_boxed_cache(&self, capacity: usize, growth: GrowthStrategy) -> Box<dyn Cache> {
        (self.boxed_fn)(self, capacity, growth)
    }

    unsafe fn drop_impl<T>(ptr: NonNull<u8>) {
        unsafe {
            std::ptr::drop_in_place(ptr.as_ptr() as *mut T);
        }
    }

    unsafe fn drop_noop(_ptr: NonNull<u8>) {}

    unsafe fn default_impl<T: Default>(ptr: NonNull<u8>) {
        unsafe {
            (ptr.as_ptr() as *mut T).write(T::default());
        }
    }

    fn boxed_impl<T: Component>(
        element: &ElementType,
        capacity: usize,
        growth: GrowthStrategy,
    ) -> Box<dyn Cache> {
        Box::new(BoxedCache::<T>::with_capacity(*element, capacity, growth))
    }
}

impl PartialEq for ElementType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.type_id == other.type_id
    }
}

impl Eq for ElementType {}

impl Hash for ElementType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.type_id.hash(state);
    }
}

impl fmt::Debug for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementType")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("size", &self.layout.size())
            .field("serde", &self.codec.is_some())
            .finish()
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
