//! Error taxonomy for the storage core.
//!
//! Every fallible operation returns [`Result`]. Panics are reserved for violated internal
//! invariants, such as caches of one table drifting to different lengths.

use thiserror::Error;

use crate::{
    element,
    entry::{self, Entry},
    storage::{Row, TableId},
};

/// The error type a hook may use to veto a table operation.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur in the storage core.
#[derive(Error, Debug)]
pub enum Error {
    /// Registering element types would exceed the mask width.
    #[error("capacity exceeded: {requested} element rows requested, mask holds {capacity}")]
    Capacity {
        /// The number of rows the operation needed.
        requested: usize,
        /// The fixed capacity that prevented it.
        capacity: usize,
    },

    /// A creation or deletion batch was empty.
    #[error("invalid batch size {0}")]
    BatchOperation(usize),

    /// The entry index was asked for an invalid number of entries.
    #[error("cannot allocate {0} entries")]
    Allocation(usize),

    /// A row outside the populated range of a cache or table.
    #[error("row {row} out of range (len {len})")]
    Access {
        /// The row requested.
        row: usize,
        /// The number of populated rows.
        len: usize,
    },

    /// A direct structural mutation was attempted on a table held by a cursor.
    #[error("table {0:?} is locked by an active cursor")]
    LockedStorage(TableId),

    /// A transfer between tables that track identities in different entry indexes.
    #[error("tables {source_table:?} and {destination:?} do not share an entry index")]
    TransferEntryIndexMismatch {
        /// The table the entries would leave.
        source_table: TableId,
        /// The table the entries would join.
        destination: TableId,
    },

    /// The id is unknown to the entry index or not currently live.
    #[error("entry {0:?} not found")]
    EntryNotFound(entry::Id),

    /// The id is already held by a live entry.
    #[error("entry {0:?} is already in use")]
    EntryInUse(entry::Id),

    /// The handle's generation no longer matches the live entry for its id.
    #[error("stale entry handle {0:?}")]
    StaleEntry(Entry),

    /// The element type has not been registered with the schema or registry.
    #[error("element type {0} is not registered")]
    Unregistered(String),

    /// The table does not store the requested component.
    #[error("table {table:?} has no {element} component")]
    MissingComponent {
        /// The table that was searched.
        table: TableId,
        /// The component name.
        element: &'static str,
    },

    /// The component type requested does not match what the cache stores.
    #[error("type mismatch: cache stores {expected}, requested {found}")]
    TypeMismatch {
        /// The stored type.
        expected: &'static str,
        /// The requested type.
        found: &'static str,
    },

    /// Two caches of the same element use different storage strategies and cannot exchange rows.
    #[error("caches for {0} use incompatible storage strategies")]
    IncompatibleCache(&'static str),

    /// No table with the id is owned by the storage.
    #[error("table {0:?} not found")]
    TableNotFound(TableId),

    /// The cursor is not positioned on a row.
    #[error("cursor is not positioned on a row")]
    NoCurrentRow,

    /// A before-hook refused the operation. Nothing was mutated.
    #[error("{operation} rejected by hook: {source}")]
    Hook {
        /// The table operation that was vetoed.
        operation: &'static str,
        /// The hook's reason.
        #[source]
        source: HookError,
    },

    /// A snapshot referenced something the storage cannot reproduce.
    #[error("snapshot: {0}")]
    Snapshot(String),

    /// Component data failed to (de)serialize.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Construct an access error for the given row and populated length.
    #[inline]
    pub(crate) fn access(row: Row, len: usize) -> Self {
        Error::Access {
            row: row.index(),
            len,
        }
    }

    /// Construct an unregistered error naming the element.
    #[inline]
    pub(crate) fn unregistered(element: &element::ElementType) -> Self {
        Error::Unregistered(element.name().to_string())
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;
