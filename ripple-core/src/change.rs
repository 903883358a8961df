//! Normalized change descriptors.
//!
//! Every inbound message that survives the relevance filter is reduced to one
//! [`ChangeDescriptor`] before it touches cached pages.

use crate::identity::EntityId;
use crate::query::SortDirection;
use crate::record::SyncRecord;

/// Where an inserted record lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    /// Front of the first page (reverse-chronological feeds).
    Front,
    /// Natural sort position by [`SyncRecord::sort_key`].
    Sorted(SortDirection),
}

/// Change applied to an existing record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordPatch<R> {
    /// Authoritative replacement.
    Replace(R),
    /// Status-only change carried by the message itself.
    Status(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeDescriptor<R> {
    Insert {
        record: R,
        position: InsertPosition,
    },
    Update {
        id: EntityId,
        patch: RecordPatch<R>,
    },
    /// Update in place if present, insert at `position` otherwise.
    Upsert {
        record: R,
        position: InsertPosition,
    },
    Delete {
        id: EntityId,
    },
    /// No precise patch is possible; the entry must be re-fetched.
    InvalidateAll {
        reason: String,
    },
}

impl<R: SyncRecord> ChangeDescriptor<R> {
    /// Id of the record the change targets, if any.
    pub fn target_id(&self) -> Option<&EntityId> {
        match self {
            Self::Insert { record, .. } | Self::Upsert { record, .. } => Some(record.id()),
            Self::Update { id, .. } | Self::Delete { id } => Some(id),
            Self::InvalidateAll { .. } => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Upsert { .. } => "upsert",
            Self::Delete { .. } => "delete",
            Self::InvalidateAll { .. } => "invalidate_all",
        }
    }
}
