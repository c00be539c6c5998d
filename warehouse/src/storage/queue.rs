//! Deferred structural operations.
//!
//! While a cursor holds a table, nothing may add, remove or move that table's rows. Requests
//! made through the `enqueue_*` methods of [`Storage`](super::Storage) are instead recorded as
//! [`Operation`]s in the table's [`OperationQueue`] and applied, in the order they were made,
//! once the last lock on the table is released.
//!
//! # Lifecycle
//!
//! ```text
//!            push                 last unlock            drained
//!  Idle ───────────► Accumulating ───────────► Draining ─────────► Idle
//!   ▲                                                              │
//!   └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Operations refer to entities by [`Entry`] handle only. They are resolved against the live
//! state when applied, so rows shifting between enqueue and drain cannot misdirect them.

use std::fmt;

use crossbeam::queue::SegQueue;

use crate::{
    element::ElementType,
    entry::Entry,
    error::Result,
    storage::{Row, TableId, cache::Cache},
};

/// Writes a captured component value into a cache row.
pub type ValueWriter = Box<dyn FnOnce(&mut dyn Cache, Row) -> Result<()>>;

/// A deferred structural operation.
pub enum Operation {
    /// Add a zero-valued component to an entity.
    AddComponent {
        entry: Entry,
        element: ElementType,
    },

    /// Add a component to an entity and write a value into it.
    AddComponentWithValue {
        entry: Entry,
        element: ElementType,
        /// Writes the value captured at enqueue time.
        write: ValueWriter,
    },

    /// Remove a component from an entity. Ignored if the entity lacks it.
    RemoveComponent {
        entry: Entry,
        element: ElementType,
    },

    /// Create zero-valued entities in a table.
    CreateEntities { table: TableId, count: usize },

    /// Destroy entities and recycle their ids.
    DestroyEntities { entries: Vec<Entry> },

    /// Move entities to another table.
    TransferEntities {
        destination: TableId,
        entries: Vec<Entry>,
    },
}

impl Operation {
    /// A short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::AddComponent { .. } => "add_component",
            Operation::AddComponentWithValue { .. } => "add_component_with_value",
            Operation::RemoveComponent { .. } => "remove_component",
            Operation::CreateEntities { .. } => "create_entities",
            Operation::DestroyEntities { .. } => "destroy_entities",
            Operation::TransferEntities { .. } => "transfer_entities",
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::AddComponent { entry, element }
            | Operation::RemoveComponent { entry, element } => f
                .debug_struct(self.name())
                .field("entry", entry)
                .field("element", &element.name())
                .finish(),
            Operation::AddComponentWithValue { entry, element, .. } => f
                .debug_struct(self.name())
                .field("entry", entry)
                .field("element", &element.name())
                .finish_non_exhaustive(),
            Operation::CreateEntities { table, count } => f
                .debug_struct(self.name())
                .field("table", table)
                .field("count", count)
                .finish(),
            Operation::DestroyEntities { entries } => f
                .debug_struct(self.name())
                .field("entries", entries)
                .finish(),
            Operation::TransferEntities {
                destination,
                entries,
            } => f
                .debug_struct(self.name())
                .field("destination", destination)
                .field("entries", entries)
                .finish(),
        }
    }
}

/// Where a queue is in its lifecycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Nothing queued.
    #[default]
    Idle,
    /// Operations are being recorded.
    Accumulating,
    /// Recorded operations are being applied.
    Draining,
}

/// A FIFO of deferred operations for one table.
#[derive(Default)]
pub struct OperationQueue {
    operations: SegQueue<Operation>,
    state: QueueState,
}

impl fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationQueue")
            .field("state", &self.state)
            .field("len", &self.operations.len())
            .finish()
    }
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn state(&self) -> QueueState {
        self.state
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Record an operation.
    pub fn push(&mut self, operation: Operation) {
        if self.state == QueueState::Idle {
            self.state = QueueState::Accumulating;
        }
        self.operations.push(operation);
    }

    /// Take every recorded operation, in FIFO order, and enter the draining state.
    pub fn begin_drain(&mut self) -> Vec<Operation> {
        self.state = QueueState::Draining;
        let mut operations = Vec::with_capacity(self.operations.len());
        while let Some(operation) = self.operations.pop() {
            operations.push(operation);
        }
        operations
    }

    /// Leave the draining state. Operations pushed while draining stay queued.
    pub fn finish_drain(&mut self) {
        self.state = if self.operations.is_empty() {
            QueueState::Idle
        } else {
            QueueState::Accumulating
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Generation, Id};

    fn entry(id: u32) -> Entry {
        Entry::new(Id::new(id), Generation::FIRST)
    }

    #[test]
    fn push_moves_idle_queue_to_accumulating() {
        // Given
        let mut queue = OperationQueue::new();
        assert_eq!(queue.state(), QueueState::Idle);

        // When
        queue.push(Operation::DestroyEntities {
            entries: vec![entry(0)],
        });

        // Then
        assert_eq!(queue.state(), QueueState::Accumulating);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn drain_preserves_fifo_order() {
        // Given
        let mut queue = OperationQueue::new();
        for count in 1..=3 {
            queue.push(Operation::CreateEntities {
                table: TableId::new(0),
                count,
            });
        }

        // When
        let drained = queue.begin_drain();

        // Then
        assert_eq!(queue.state(), QueueState::Draining);
        assert!(queue.is_empty());
        let counts: Vec<usize> = drained
            .iter()
            .map(|operation| match operation {
                Operation::CreateEntities { count, .. } => *count,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(counts, vec![1, 2, 3]);

        queue.finish_drain();
        assert_eq!(queue.state(), QueueState::Idle);
    }

    #[test]
    fn operations_pushed_while_draining_remain_queued() {
        let mut queue = OperationQueue::new();
        queue.push(Operation::DestroyEntities {
            entries: vec![entry(0)],
        });
        let _ = queue.begin_drain();

        queue.push(Operation::DestroyEntities {
            entries: vec![entry(1)],
        });
        assert_eq!(queue.state(), QueueState::Draining);

        queue.finish_drain();
        assert_eq!(queue.state(), QueueState::Accumulating);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn debug_names_the_operation() {
        let operation = Operation::TransferEntities {
            destination: TableId::new(2),
            entries: vec![entry(4)],
        };
        let rendered = format!("{operation:?}");
        assert!(rendered.starts_with("transfer_entities"));
        assert!(rendered.contains("Entry(4v0)"));
    }
}
