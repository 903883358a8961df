//! Cache kinds.
//!
//! One synchronizer core serves every kind of cached query. A kind only says
//! which topics to listen on and how a relevant message maps onto a change:
//! applied directly from embedded data, or via a targeted fetch.

use ripple_cache::FetchRequest;
use ripple_core::{
    Activity, ChangeDescriptor, InsertPosition, MessageAction, MessageError, QueryParams,
    RecordPatch, Reviewable, SyncMessage, SyncRecord, Task, TopicSet,
};

/// What to do with a relevant message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePlan<R> {
    /// The message carries everything needed.
    Apply(ChangeDescriptor<R>),
    /// Authoritative data must be fetched first.
    Fetch(FetchRequest),
}

/// Behaviour specific to one kind of cached query.
pub trait SyncKind: Send + Sync + 'static {
    type Record: SyncRecord;

    /// Kind name, part of every cache key of this kind.
    fn name(&self) -> &'static str;

    /// Tag type for invalidation tags.
    fn tag_type(&self) -> &'static str;

    fn topics(&self, params: &QueryParams) -> TopicSet;

    /// Map a relevant message onto a plan. A missing field the plan needs is
    /// reported as an error and the message is dropped.
    fn plan(
        &self,
        message: &SyncMessage,
        params: &QueryParams,
    ) -> Result<MessagePlan<Self::Record>, MessageError>;

    /// Where fetched records land.
    fn merge_position(&self, params: &QueryParams) -> InsertPosition;
}

fn fetch_primary<R>(message: &SyncMessage) -> Result<MessagePlan<R>, MessageError> {
    let id = message.primary_entity_id()?;
    let scope_ids = message.scope_ids().into_iter().cloned().collect();
    Ok(MessagePlan::Fetch(FetchRequest::single(
        message.project.clone(),
        id.clone(),
        scope_ids,
    )))
}

fn delete_primary<R>(message: &SyncMessage) -> Result<MessagePlan<R>, MessageError> {
    let id = message.primary_entity_id()?;
    Ok(MessagePlan::Apply(ChangeDescriptor::Delete { id: id.clone() }))
}

// ============================================================================
// ACTIVITY FEED
// ============================================================================

/// Reverse-chronological activity feed of one or more entities.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivityFeed;

impl SyncKind for ActivityFeed {
    type Record = Activity;

    fn name(&self) -> &'static str {
        "activities"
    }

    fn tag_type(&self) -> &'static str {
        "activity"
    }

    fn topics(&self, _params: &QueryParams) -> TopicSet {
        TopicSet::from_names(&["activity", "inbox.message"])
    }

    fn plan(
        &self,
        message: &SyncMessage,
        _params: &QueryParams,
    ) -> Result<MessagePlan<Activity>, MessageError> {
        match message.action {
            MessageAction::Deleted => delete_primary(message),
            _ => fetch_primary(message),
        }
    }

    fn merge_position(&self, _params: &QueryParams) -> InsertPosition {
        InsertPosition::Front
    }
}

// ============================================================================
// REVIEWABLE PROCESSING
// ============================================================================

/// Statuses reported while a transcode runs. They carry no other data worth
/// fetching.
const IN_FLIGHT_STATUSES: &[&str] = &["queued", "in_progress", "processing"];

/// Reviewables of one or more versions, tracking transcode progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReviewableProcessing;

impl SyncKind for ReviewableProcessing {
    type Record = Reviewable;

    fn name(&self) -> &'static str {
        "reviewables"
    }

    fn tag_type(&self) -> &'static str {
        "reviewable"
    }

    fn topics(&self, _params: &QueryParams) -> TopicSet {
        TopicSet::from_names(&["reviewable.process"])
    }

    fn plan(
        &self,
        message: &SyncMessage,
        _params: &QueryParams,
    ) -> Result<MessagePlan<Reviewable>, MessageError> {
        let status = message.status()?;
        if IN_FLIGHT_STATUSES.contains(&status) {
            let id = message.primary_entity_id()?;
            return Ok(MessagePlan::Apply(ChangeDescriptor::Update {
                id: id.clone(),
                patch: RecordPatch::Status(status.to_string()),
            }));
        }
        fetch_primary(message)
    }

    fn merge_position(&self, params: &QueryParams) -> InsertPosition {
        InsertPosition::Sorted(params.sort)
    }
}

// ============================================================================
// TASK FOLDER
// ============================================================================

/// Tasks of one or more folders, kept in natural (label) order.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskFolder;

impl SyncKind for TaskFolder {
    type Record = Task;

    fn name(&self) -> &'static str {
        "tasks"
    }

    fn tag_type(&self) -> &'static str {
        "task"
    }

    fn topics(&self, _params: &QueryParams) -> TopicSet {
        TopicSet::from_names(&["entity.task"])
    }

    fn plan(
        &self,
        message: &SyncMessage,
        _params: &QueryParams,
    ) -> Result<MessagePlan<Task>, MessageError> {
        match message.action {
            MessageAction::Deleted => delete_primary(message),
            _ => fetch_primary(message),
        }
    }

    fn merge_position(&self, params: &QueryParams) -> InsertPosition {
        InsertPosition::Sorted(params.sort)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_core::SortDirection;

    fn parse(json: &str) -> SyncMessage {
        SyncMessage::from_json(json).unwrap()
    }

    #[test]
    fn test_activity_delete_needs_no_fetch() {
        let msg = parse(
            r#"{"topic": "activity.deleted", "project": "demo",
                "summary": {"primaryEntityId": "a", "references": []}}"#,
        );
        let plan = ActivityFeed.plan(&msg, &QueryParams::new("demo")).unwrap();
        assert_eq!(
            plan,
            MessagePlan::Apply(ChangeDescriptor::Delete { id: "a".to_string() })
        );
    }

    #[test]
    fn test_activity_created_fetches_primary_with_scope() {
        let msg = parse(
            r#"{"topic": "activity.created", "project": "demo",
                "summary": {"primaryEntityId": "c", "entityType": "comment",
                    "references": [{"entityId": "scope1", "referenceType": "origin"}]}}"#,
        );
        let plan = ActivityFeed.plan(&msg, &QueryParams::new("demo")).unwrap();
        assert_eq!(
            plan,
            MessagePlan::Fetch(FetchRequest::single("demo", "c", vec!["scope1".to_string()]))
        );
    }

    #[test]
    fn test_activity_without_primary_id_is_malformed() {
        let msg = parse(r#"{"topic": "inbox.message", "project": "demo"}"#);
        assert!(ActivityFeed.plan(&msg, &QueryParams::new("demo")).is_err());
    }

    #[test]
    fn test_reviewable_in_flight_status_is_embedded() {
        let msg = parse(
            r#"{"topic": "reviewable.process", "project": "demo", "status": "in_progress",
                "summary": {"primaryEntityId": "file1"}}"#,
        );
        let plan = ReviewableProcessing
            .plan(&msg, &QueryParams::new("demo"))
            .unwrap();
        assert_eq!(
            plan,
            MessagePlan::Apply(ChangeDescriptor::Update {
                id: "file1".to_string(),
                patch: RecordPatch::Status("in_progress".to_string()),
            })
        );
    }

    #[test]
    fn test_reviewable_finished_fetches() {
        let msg = parse(
            r#"{"topic": "reviewable.process", "project": "demo", "status": "finished",
                "entityIds": ["v1"], "summary": {"primaryEntityId": "file1"}}"#,
        );
        let plan = ReviewableProcessing
            .plan(&msg, &QueryParams::new("demo"))
            .unwrap();
        assert_eq!(
            plan,
            MessagePlan::Fetch(FetchRequest::single("demo", "file1", vec!["v1".to_string()]))
        );
    }

    #[test]
    fn test_reviewable_missing_status_is_malformed() {
        let msg = parse(
            r#"{"topic": "reviewable.process", "project": "demo",
                "summary": {"primaryEntityId": "file1"}}"#,
        );
        assert_eq!(
            ReviewableProcessing.plan(&msg, &QueryParams::new("demo")),
            Err(MessageError::MissingField { field: "status" })
        );
    }

    #[test]
    fn test_task_actions() {
        let params = QueryParams::new("demo").with_sort(SortDirection::Ascending);
        let changed = parse(
            r#"{"topic": "entity.task.changed", "project": "demo", "entityIds": ["f1"],
                "summary": {"primaryEntityId": "t1"}}"#,
        );
        assert!(matches!(
            TaskFolder.plan(&changed, &params).unwrap(),
            MessagePlan::Fetch(_)
        ));

        let assigned = parse(
            r#"{"topic": "entity.task.assigned", "project": "demo",
                "summary": {"primaryEntityId": "t1"}}"#,
        );
        assert!(matches!(
            TaskFolder.plan(&assigned, &params).unwrap(),
            MessagePlan::Fetch(_)
        ));

        let deleted = parse(
            r#"{"topic": "entity.task.deleted", "project": "demo", "entityIds": ["f1"],
                "summary": {"primaryEntityId": "t1"}}"#,
        );
        assert_eq!(
            TaskFolder.plan(&deleted, &params).unwrap(),
            MessagePlan::Apply(ChangeDescriptor::Delete { id: "t1".to_string() })
        );
        assert_eq!(
            TaskFolder.merge_position(&params),
            InsertPosition::Sorted(SortDirection::Ascending)
        );
    }
}
