//! Error types for ripple operations

use thiserror::Error;

/// Inbound message errors (decode or relevance-time field checks).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("Required message field missing: {field}")]
    MissingField { field: &'static str },

    #[error("Invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },

    #[error("Failed to decode message: {reason}")]
    Decode { reason: String },
}

/// Targeted fetch errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Fetch for {ids:?} failed: {reason}")]
    Failed { ids: Vec<String>, reason: String },

    #[error("Fetch returned an undecodable payload: {reason}")]
    InvalidPayload { reason: String },
}

/// Patch engine errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("No page to anchor insert of record {id}")]
    NoAnchorPage { id: String },

    #[error("Record {id} not present for update")]
    MissingRecord { id: String },

    #[error("Change for record {id} carries record {record_id}")]
    IdMismatch { id: String, record_id: String },

    #[error("Record {id} cannot apply a status patch")]
    UnsupportedPatch { id: String },

    #[error("Entry invalidation requested: {reason}")]
    InvalidationRequested { reason: String },
}

/// Transport (pub/sub) errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Subscription requires at least one topic")]
    NoTopics,

    #[error("Transport closed")]
    Closed,

    #[error("Failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("Transport lock poisoned")]
    LockPoisoned,
}

/// Query cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache entry not found: {key}")]
    EntryNotFound { key: String },

    #[error("Initial fetch for {key} failed: {reason}")]
    InitialFetchFailed { key: String, reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Master error type for all ripple errors.
#[derive(Debug, Clone, Error)]
pub enum RippleError {
    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Result type alias for ripple operations.
pub type RippleResult<T> = Result<T, RippleError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_error_display_missing_field() {
        let err = MessageError::MissingField {
            field: "summary.entityType",
        };
        let msg = format!("{}", err);
        assert!(msg.contains("missing"));
        assert!(msg.contains("summary.entityType"));
    }

    #[test]
    fn test_fetch_error_display_failed() {
        let err = FetchError::Failed {
            ids: vec!["c".to_string()],
            reason: "503".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("\"c\""));
        assert!(msg.contains("503"));
    }

    #[test]
    fn test_patch_error_display_no_anchor() {
        let err = PatchError::NoAnchorPage {
            id: "x".to_string(),
        };
        assert!(format!("{}", err).contains("No page to anchor"));
    }

    #[test]
    fn test_ripple_error_from_variants() {
        let message = RippleError::from(MessageError::Decode {
            reason: "eof".to_string(),
        });
        assert!(matches!(message, RippleError::Message(_)));

        let fetch = RippleError::from(FetchError::InvalidPayload {
            reason: "not json".to_string(),
        });
        assert!(matches!(fetch, RippleError::Fetch(_)));

        let patch = RippleError::from(PatchError::MissingRecord {
            id: "a".to_string(),
        });
        assert!(matches!(patch, RippleError::Patch(_)));

        let transport = RippleError::from(TransportError::Closed);
        assert!(matches!(transport, RippleError::Transport(_)));

        let cache = RippleError::from(CacheError::LockPoisoned);
        assert!(matches!(cache, RippleError::Cache(_)));
    }
}
