//! Records held in synchronized caches.
//!
//! Activities, reviewables and tasks share one identity shape, expressed by
//! [`SyncRecord`]. The patch engine and coordinator only ever see records
//! through this trait.

use crate::identity::{EntityId, Timestamp};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Activity type that doubles as a checklist when its body has checkbox markup.
pub const COMMENT_TYPE: &str = "comment";

/// Derived secondary type for comments containing checklist markup.
pub const CHECKLIST_TYPE: &str = "checklist";

static CHECKLIST_MARKUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*[-*]\s+\[[ xX]\]").expect("checklist markup pattern is valid")
});

/// Whether a markdown body contains at least one checklist item.
pub fn has_checklist_markup(body: &str) -> bool {
    CHECKLIST_MARKUP.is_match(body)
}

/// Trait for records that can live in a synchronized cache entry.
///
/// # Implementation Requirements
///
/// - `id()` is stable for the lifetime of the record and unique within an entry
/// - `parent_scope()` names the entity/version/folder the record belongs to
/// - `record_types()` returns the declared type plus any derived types
pub trait SyncRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> &EntityId;

    fn parent_scope(&self) -> &EntityId;

    /// Declared type and derived secondary types, used by type filters.
    fn record_types(&self) -> Vec<String>;

    /// Key used for natural-position inserts.
    fn sort_key(&self) -> String {
        self.id().clone()
    }

    /// Apply a status-only change in place. Returns false if the record has
    /// no notion of status.
    fn apply_status(&mut self, _status: &str) -> bool {
        false
    }
}

// ============================================================================
// ACTIVITY
// ============================================================================

/// One item of an activity feed (comment, status change, version publish...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub activity_id: EntityId,
    pub activity_type: String,
    /// Entity the activity was posted on.
    pub entity_id: EntityId,
    pub entity_type: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub author: Option<String>,
    pub created_at: Timestamp,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl SyncRecord for Activity {
    fn id(&self) -> &EntityId {
        &self.activity_id
    }

    fn parent_scope(&self) -> &EntityId {
        &self.entity_id
    }

    fn record_types(&self) -> Vec<String> {
        let mut types = vec![self.activity_type.clone()];
        if self.activity_type == COMMENT_TYPE && has_checklist_markup(&self.body) {
            types.push(CHECKLIST_TYPE.to_string());
        }
        types
    }

    fn sort_key(&self) -> String {
        self.created_at.to_rfc3339()
    }
}

// ============================================================================
// REVIEWABLE
// ============================================================================

/// Processing state of a reviewable transcode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingState {
    pub status: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub progress: Option<f32>,
}

/// A reviewable file attached to a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reviewable {
    pub file_id: EntityId,
    pub version_id: EntityId,
    pub filename: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub processing: Option<ProcessingState>,
    pub created_at: Timestamp,
}

impl SyncRecord for Reviewable {
    fn id(&self) -> &EntityId {
        &self.file_id
    }

    fn parent_scope(&self) -> &EntityId {
        &self.version_id
    }

    fn record_types(&self) -> Vec<String> {
        vec![self
            .media_type
            .clone()
            .unwrap_or_else(|| "reviewable".to_string())]
    }

    fn sort_key(&self) -> String {
        self.created_at.to_rfc3339()
    }

    fn apply_status(&mut self, status: &str) -> bool {
        match self.processing.as_mut() {
            Some(processing) => processing.status = status.to_string(),
            None => {
                self.processing = Some(ProcessingState {
                    status: status.to_string(),
                    description: None,
                    progress: None,
                })
            }
        }
        true
    }
}

// ============================================================================
// TASK
// ============================================================================

/// A task listed under a folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: EntityId,
    pub folder_id: EntityId,
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    pub task_type: String,
    pub status: String,
    #[serde(default)]
    pub assignees: Vec<String>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

impl SyncRecord for Task {
    fn id(&self) -> &EntityId {
        &self.task_id
    }

    fn parent_scope(&self) -> &EntityId {
        &self.folder_id
    }

    fn record_types(&self) -> Vec<String> {
        vec![self.task_type.clone()]
    }

    fn sort_key(&self) -> String {
        self.label
            .as_deref()
            .filter(|label| !label.is_empty())
            .unwrap_or(&self.name)
            .to_lowercase()
    }

    fn apply_status(&mut self, status: &str) -> bool {
        self.status = status.to_string();
        true
    }
}
