use std::fmt;

/// The current physical position of an entity inside a table's dense caches.
///
/// Rows are not stable: deleting or transferring out of a table moves the last row into the
/// freed slot. Hold an [`Entry`](crate::Entry) and resolve its row when needed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Row(usize);

impl From<usize> for Row {
    fn from(value: usize) -> Self {
        Self::new(value)
    }
}

impl Row {
    /// Construct a row from a cache index.
    #[inline]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// The index into the table's caches.
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }

    /// The following row.
    #[inline]
    pub fn increment(self) -> Self {
        Self::new(self.0 + 1)
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}", self.0)
    }
}
