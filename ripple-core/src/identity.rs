//! Identity types for synchronized records

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Record / scope identifier as issued by the server.
///
/// Ids are opaque strings on the wire; nothing in the synchronizer relies on
/// their format.
pub type EntityId = String;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Project name the record and message belong to.
pub type ProjectName = String;

/// Generate a new UUIDv7 handle for locally issued identifiers
/// (subscription tokens, fetch request ids).
pub fn new_local_id() -> Uuid {
    Uuid::now_v7()
}
