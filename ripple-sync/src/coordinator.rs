//! Fetch-and-merge coordinator.
//!
//! Turns the result of a targeted fetch into changes for the patch engine.
//! A failed fetch never disappears: it becomes `InvalidateAll`.

use crate::kinds::SyncKind;
use ripple_cache::FetchRequest;
use ripple_core::{ChangeDescriptor, EntityId, FetchError, QueryParams, SyncRecord};
use tracing::debug;

/// One step derived from a fetch result.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeStep<R> {
    Change(ChangeDescriptor<R>),
    /// The fetched record no longer matches the entry's type filter.
    Dropped { id: EntityId },
}

/// Whether a fetched record passes the params' type filter, derived types
/// included.
pub fn matches_types<R: SyncRecord>(record: &R, params: &QueryParams) -> bool {
    match &params.types {
        None => true,
        Some(types) => record
            .record_types()
            .iter()
            .any(|record_type| types.contains(record_type)),
    }
}

/// Derive changes from a targeted fetch.
///
/// - fetch error: a single `InvalidateAll`
/// - requested id returned: `Upsert` at the kind's merge position, unless
///   the record fails the type filter
/// - requested id absent: the server no longer has it, `Delete`
pub fn merge<K: SyncKind>(
    kind: &K,
    params: &QueryParams,
    request: &FetchRequest,
    result: Result<Vec<K::Record>, FetchError>,
) -> Vec<MergeStep<K::Record>> {
    let mut records = match result {
        Ok(records) => records,
        Err(err) => {
            return vec![MergeStep::Change(ChangeDescriptor::InvalidateAll {
                reason: err.to_string(),
            })]
        }
    };

    let position = kind.merge_position(params);
    request
        .ids
        .iter()
        .map(|id| {
            let found = records
                .iter()
                .position(|record| record.id() == id)
                .map(|index| records.swap_remove(index));
            match found {
                Some(record) if matches_types(&record, params) => {
                    MergeStep::Change(ChangeDescriptor::Upsert { record, position })
                }
                Some(_) => {
                    debug!(id = %id, kind = kind.name(), "Fetched record outside type filter");
                    MergeStep::Dropped { id: id.clone() }
                }
                None => MergeStep::Change(ChangeDescriptor::Delete { id: id.clone() }),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::ActivityFeed;
    use chrono::{TimeZone, Utc};
    use ripple_core::{Activity, InsertPosition};

    fn activity(id: &str, activity_type: &str, body: &str) -> Activity {
        Activity {
            activity_id: id.to_string(),
            activity_type: activity_type.to_string(),
            entity_id: "scope1".to_string(),
            entity_type: "version".to_string(),
            body: body.to_string(),
            author: None,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            updated_at: None,
            data: None,
        }
    }

    fn request(id: &str) -> FetchRequest {
        FetchRequest::single("demo", id, vec!["scope1".to_string()])
    }

    #[test]
    fn test_fetch_error_invalidates() {
        let steps = merge(
            &ActivityFeed,
            &QueryParams::new("demo"),
            &request("c"),
            Err(FetchError::Failed {
                ids: vec!["c".to_string()],
                reason: "503".to_string(),
            }),
        );
        assert!(matches!(
            steps.as_slice(),
            [MergeStep::Change(ChangeDescriptor::InvalidateAll { .. })]
        ));
    }

    #[test]
    fn test_found_record_is_upserted_at_front() {
        let steps = merge(
            &ActivityFeed,
            &QueryParams::new("demo"),
            &request("c"),
            Ok(vec![activity("other", "comment", ""), activity("c", "comment", "hi")]),
        );
        assert_eq!(
            steps,
            vec![MergeStep::Change(ChangeDescriptor::Upsert {
                record: activity("c", "comment", "hi"),
                position: InsertPosition::Front,
            })]
        );
    }

    #[test]
    fn test_absent_record_becomes_delete() {
        let steps = merge(&ActivityFeed, &QueryParams::new("demo"), &request("c"), Ok(vec![]));
        assert_eq!(
            steps,
            vec![MergeStep::Change(ChangeDescriptor::Delete { id: "c".to_string() })]
        );
    }

    #[test]
    fn test_checklist_is_rechecked_after_fetch() {
        let params = QueryParams::new("demo").with_types(["checklist"]);

        let plain = merge(
            &ActivityFeed,
            &params,
            &request("c"),
            Ok(vec![activity("c", "comment", "no boxes here")]),
        );
        assert_eq!(plain, vec![MergeStep::Dropped { id: "c".to_string() }]);

        let checklist = merge(
            &ActivityFeed,
            &params,
            &request("c"),
            Ok(vec![activity("c", "comment", "- [ ] check roto")]),
        );
        assert!(matches!(
            checklist.as_slice(),
            [MergeStep::Change(ChangeDescriptor::Upsert { .. })]
        ));
    }
}
