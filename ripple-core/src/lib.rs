//! Ripple Core - Data Model
//!
//! Pure data structures shared by every other ripple crate: the real-time
//! message envelope, synchronized records, query params and cache tags,
//! cached pages, change descriptors, errors and configuration.

pub mod change;
pub mod config;
pub mod error;
pub mod identity;
pub mod message;
pub mod page;
pub mod query;
pub mod record;

pub use change::{ChangeDescriptor, InsertPosition, RecordPatch};
pub use config::{
    ConfigError, LogConfig, ReconnectConfig, RippleConfig, WatchConfig, WatchKind,
    CONFIG_ENV_VAR,
};
pub use error::{
    CacheError, FetchError, MessageError, PatchError, RippleError, RippleResult, TransportError,
};
pub use identity::{new_local_id, EntityId, ProjectName, Timestamp};
pub use message::{
    MessageAction, RawMessage, RawReference, RawSummary, Reference, ReferenceType, Summary,
    SyncMessage, Topic, TopicSet,
};
pub use page::{Page, PageInfo, Pages};
pub use query::{CacheKey, CacheTag, QueryParams, SortDirection, LIST_TAG_ID};
pub use record::{
    has_checklist_markup, Activity, ProcessingState, Reviewable, SyncRecord, Task,
    CHECKLIST_TYPE, COMMENT_TYPE,
};
