//! Real-time message envelope.
//!
//! Messages arrive from the pub/sub transport as loosely shaped JSON. They are
//! decoded exactly once at ingress: [`RawMessage`] mirrors the wire form and
//! [`SyncMessage`] is the strict form every downstream component works with.

use crate::error::MessageError;
use crate::identity::{EntityId, ProjectName, Timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// TOPICS
// ============================================================================

/// Dot-separated transport routing key, e.g. `activity.created`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic(String);

impl Topic {
    /// Parse a topic, rejecting empty strings and empty segments.
    pub fn parse(raw: &str) -> Result<Self, MessageError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(MessageError::InvalidTopic {
                topic: raw.to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if trimmed.split('.').any(str::is_empty) {
            return Err(MessageError::InvalidTopic {
                topic: raw.to_string(),
                reason: "empty segment".to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Final segment, which carries the action (`created`, `deleted`, ...).
    pub fn last_segment(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    /// Whether a message published on `self` is delivered to a subscription
    /// on `subscribed`. Matching is on whole segments: `activity` matches
    /// `activity.created` but not `activityfeed`.
    pub fn is_within(&self, subscribed: &Topic) -> bool {
        match self.0.strip_prefix(subscribed.as_str()) {
            Some("") => true,
            Some(rest) => rest.starts_with('.'),
            None => false,
        }
    }
}

impl TryFrom<String> for Topic {
    type Error = MessageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Topic::parse(&value)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Set of topics a single subscription listens on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TopicSet {
    topics: Vec<Topic>,
}

impl TopicSet {
    pub fn new(topics: impl IntoIterator<Item = Topic>) -> Self {
        let mut topics: Vec<Topic> = topics.into_iter().collect();
        topics.sort();
        topics.dedup();
        Self { topics }
    }

    /// Build from static topic names. Invalid names are skipped.
    pub fn from_names(names: &[&str]) -> Self {
        Self::new(names.iter().filter_map(|name| Topic::parse(name).ok()))
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Topic> {
        self.topics.iter()
    }

    /// Whether a message on `topic` belongs to any topic in this set.
    pub fn matches(&self, topic: &Topic) -> bool {
        self.topics.iter().any(|subscribed| topic.is_within(subscribed))
    }
}

impl fmt::Display for TopicSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.topics.iter().map(Topic::as_str).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

// ============================================================================
// WIRE FORM
// ============================================================================

/// Message exactly as published by the server.
///
/// Every field except `topic` may be absent; checks that need a field decide
/// what its absence means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub topic: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub entity_ids: Option<Vec<EntityId>>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub summary: Option<RawSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSummary {
    #[serde(default)]
    pub primary_entity_id: Option<EntityId>,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub references: Vec<RawReference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReference {
    #[serde(default)]
    pub entity_id: Option<EntityId>,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub reference_type: Option<String>,
}

// ============================================================================
// STRICT FORM
// ============================================================================

/// What happened, derived from the final topic segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageAction {
    Created,
    Updated,
    Deleted,
    Process,
    Other(String),
}

impl MessageAction {
    pub fn from_topic(topic: &Topic) -> Self {
        match topic.last_segment() {
            "created" => Self::Created,
            "updated" | "changed" => Self::Updated,
            "deleted" => Self::Deleted,
            "process" => Self::Process,
            other => Self::Other(other.to_string()),
        }
    }
}

/// How a referenced entity relates to the message's primary record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceType {
    Origin,
    Mention,
    Relation,
    Other(String),
}

impl ReferenceType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "origin" => Self::Origin,
            "mention" => Self::Mention,
            "relation" => Self::Relation,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub entity_id: EntityId,
    pub entity_type: Option<String>,
    pub reference_type: ReferenceType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub primary_entity_id: Option<EntityId>,
    pub entity_type: Option<String>,
    pub references: Vec<Reference>,
}

impl Summary {
    /// Entity ids the message declares itself relevant to.
    pub fn origin_ids(&self) -> impl Iterator<Item = &EntityId> {
        self.references
            .iter()
            .filter(|reference| reference.reference_type == ReferenceType::Origin)
            .map(|reference| &reference.entity_id)
    }
}

impl From<RawSummary> for Summary {
    fn from(raw: RawSummary) -> Self {
        Self {
            primary_entity_id: raw.primary_entity_id.filter(|id| !id.is_empty()),
            entity_type: raw.entity_type.filter(|t| !t.is_empty()),
            references: raw
                .references
                .into_iter()
                .filter_map(|reference| {
                    let entity_id = reference.entity_id.filter(|id| !id.is_empty())?;
                    Some(Reference {
                        entity_id,
                        entity_type: reference.entity_type,
                        reference_type: reference
                            .reference_type
                            .as_deref()
                            .map(ReferenceType::parse)
                            .unwrap_or_else(|| ReferenceType::Other(String::new())),
                    })
                })
                .collect(),
        }
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMessage {
    pub topic: Topic,
    pub action: MessageAction,
    pub project: ProjectName,
    pub entity_ids: Vec<EntityId>,
    pub timestamp: Option<Timestamp>,
    pub status: Option<String>,
    pub summary: Option<Summary>,
}

impl SyncMessage {
    /// Decode a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, MessageError> {
        let raw: RawMessage = serde_json::from_str(text).map_err(|e| MessageError::Decode {
            reason: e.to_string(),
        })?;
        Self::try_from(raw)
    }

    /// Ids the message is scoped to: origin references first, top-level
    /// `entityIds` when the summary declares none.
    pub fn scope_ids(&self) -> Vec<&EntityId> {
        let origins: Vec<&EntityId> = self
            .summary
            .as_ref()
            .map(|summary| summary.origin_ids().collect())
            .unwrap_or_default();
        if origins.is_empty() {
            self.entity_ids.iter().collect()
        } else {
            origins
        }
    }

    pub fn primary_entity_id(&self) -> Result<&EntityId, MessageError> {
        self.summary
            .as_ref()
            .and_then(|summary| summary.primary_entity_id.as_ref())
            .ok_or(MessageError::MissingField {
                field: "summary.primaryEntityId",
            })
    }

    pub fn entity_type(&self) -> Result<&str, MessageError> {
        self.summary
            .as_ref()
            .and_then(|summary| summary.entity_type.as_deref())
            .ok_or(MessageError::MissingField {
                field: "summary.entityType",
            })
    }

    pub fn status(&self) -> Result<&str, MessageError> {
        self.status
            .as_deref()
            .ok_or(MessageError::MissingField { field: "status" })
    }
}

impl TryFrom<RawMessage> for SyncMessage {
    type Error = MessageError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        let topic = Topic::parse(&raw.topic)?;
        let project = raw
            .project
            .filter(|p| !p.trim().is_empty())
            .ok_or(MessageError::MissingField { field: "project" })?;
        let timestamp = raw
            .timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc));

        Ok(Self {
            action: MessageAction::from_topic(&topic),
            topic,
            project,
            entity_ids: raw.entity_ids.unwrap_or_default(),
            timestamp,
            status: raw.status.filter(|s| !s.is_empty()),
            summary: raw.summary.map(Summary::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(raw: &str) -> Topic {
        Topic::parse(raw).unwrap()
    }

    #[test]
    fn test_topic_rejects_empty_segments() {
        assert!(Topic::parse("").is_err());
        assert!(Topic::parse("activity..created").is_err());
        assert!(Topic::parse(".activity").is_err());
    }

    #[test]
    fn test_topic_matches_whole_segments() {
        assert!(topic("activity.created").is_within(&topic("activity")));
        assert!(topic("activity").is_within(&topic("activity")));
        assert!(!topic("activityfeed.created").is_within(&topic("activity")));
        assert!(!topic("activity").is_within(&topic("activity.created")));
        assert!(topic("inbox.message").is_within(&topic("inbox.message")));
    }

    #[test]
    fn test_topic_set_dedups_and_matches() {
        let set = TopicSet::from_names(&["activity", "inbox.message", "activity"]);
        assert_eq!(set.iter().count(), 2);
        assert!(set.matches(&topic("activity.deleted")));
        assert!(set.matches(&topic("inbox.message")));
        assert!(!set.matches(&topic("reviewable.process")));
    }

    #[test]
    fn test_action_from_topic() {
        assert_eq!(MessageAction::from_topic(&topic("activity.created")), MessageAction::Created);
        assert_eq!(MessageAction::from_topic(&topic("entity.task.changed")), MessageAction::Updated);
        assert_eq!(MessageAction::from_topic(&topic("activity.deleted")), MessageAction::Deleted);
        assert_eq!(MessageAction::from_topic(&topic("reviewable.process")), MessageAction::Process);
        assert_eq!(
            MessageAction::from_topic(&topic("inbox.message")),
            MessageAction::Other("message".to_string())
        );
    }

    #[test]
    fn test_decode_full_message() {
        let json = r#"{
            "topic": "activity.created",
            "project": "demo",
            "timestamp": "2024-05-01T10:00:00Z",
            "summary": {
                "primaryEntityId": "c",
                "entityType": "comment",
                "references": [
                    {"entityId": "scope1", "entityType": "version", "referenceType": "origin"},
                    {"entityId": "user1", "entityType": "user", "referenceType": "mention"}
                ]
            }
        }"#;
        let message = SyncMessage::from_json(json).unwrap();
        assert_eq!(message.action, MessageAction::Created);
        assert_eq!(message.project, "demo");
        assert!(message.timestamp.is_some());
        assert_eq!(message.primary_entity_id().unwrap(), "c");
        assert_eq!(message.entity_type().unwrap(), "comment");
        assert_eq!(message.scope_ids(), vec!["scope1"]);
    }

    #[test]
    fn test_decode_requires_project() {
        let raw = RawMessage {
            topic: "activity.created".to_string(),
            project: None,
            entity_ids: None,
            timestamp: None,
            status: None,
            summary: None,
        };
        assert_eq!(
            SyncMessage::try_from(raw),
            Err(MessageError::MissingField { field: "project" })
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            SyncMessage::from_json("not json"),
            Err(MessageError::Decode { .. })
        ));
    }

    #[test]
    fn test_scope_falls_back_to_entity_ids() {
        let json = r#"{"topic": "entity.task.deleted", "project": "demo", "entityIds": ["f1", "f2"]}"#;
        let message = SyncMessage::from_json(json).unwrap();
        assert_eq!(message.scope_ids(), vec!["f1", "f2"]);
        assert!(message.primary_entity_id().is_err());
    }

    #[test]
    fn test_references_without_id_are_skipped() {
        let json = r#"{
            "topic": "activity.updated",
            "project": "demo",
            "summary": {"primaryEntityId": "a", "references": [{"referenceType": "origin"}]}
        }"#;
        let message = SyncMessage::from_json(json).unwrap();
        assert!(message.scope_ids().is_empty());
        assert!(message.entity_type().is_err());
    }
}
