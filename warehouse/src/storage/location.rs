use crate::storage::{Row, TableId};

/// Where a live entity is stored: its table and the row inside it.
///
/// Kept per entry by the [`EntryIndex`](crate::EntryIndex) and updated on every move, so
/// resolving a handle to its data is two lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    table_id: TableId,
    row: Row,
}

impl Location {
    #[inline]
    pub const fn new(table_id: TableId, row: Row) -> Self {
        Self { table_id, row }
    }

    /// The table holding the entity.
    #[inline]
    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// The row inside the table.
    #[inline]
    pub fn row(&self) -> Row {
        self.row
    }
}
