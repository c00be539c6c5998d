//! Archetypal entity component storage for the Bappa framework.
//!
//! Entities with the same set of components live together in a [`Table`](storage::Table), one
//! dense [`Cache`](storage::cache::Cache) per component. A shared [`EntryIndex`] hands out stable
//! [`Entry`] handles, a [`Schema`](schema::Schema) maps component types onto [`Mask`] bits, and a
//! [`Cursor`](query::Cursor) walks every table matching a [`Query`](query::Query).
//!
//! Structural changes (create, destroy, add or remove components, transfer) requested against a
//! table that a cursor is iterating are captured by the table's operation queue through the
//! `enqueue_*` methods of [`Storage`] and applied once the cursor releases the table.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bappa_warehouse::{Component, Config, Storage, element::Registry, query::{Accessor, Cursor, Query}};
//!
//! #[derive(Component, Default)]
//! struct Position { x: f64, y: f64 }
//!
//! let registry = Arc::new(Registry::new());
//! let position = Accessor::<Position>::new(&registry);
//! let mut storage = Storage::new(registry, Config::default());
//!
//! let table = storage.table_for(&[position.element()])?;
//! storage.new_entries(table, 3)?;
//!
//! let mut cursor = Cursor::new(&Query::and([position.element()]));
//! while cursor.next(&mut storage)? {
//!     position.get_from_cursor_mut(&cursor, &mut storage)?.x += 1.0;
//! }
//! ```

// Allow the derive macros to refer to `::bappa_warehouse` from inside this crate.
extern crate self as bappa_warehouse;

pub mod config;
pub mod element;
pub mod entry;
pub mod error;
pub mod mask;
pub mod query;
pub mod schema;
pub mod snapshot;
pub mod storage;

pub use bappa_macros::Component;
pub use config::Config;
pub use entry::{Entry, EntryIndex};
pub use error::{Error, Result};
pub use mask::Mask;
pub use storage::Storage;
