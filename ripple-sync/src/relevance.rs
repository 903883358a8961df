//! Relevance filter.
//!
//! Decides whether a message can possibly affect an entry built from given
//! query params. Every sub-check must pass. A check that needs a field the
//! message lacks yields [`Verdict::Malformed`], never a wildcard pass.

use ripple_core::{MessageError, QueryParams, SyncMessage, TopicSet, CHECKLIST_TYPE, COMMENT_TYPE};

/// Outcome of the relevance checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Relevant,
    /// Cannot affect the entry. Names the failing check.
    Irrelevant(&'static str),
    /// A field needed by one of the checks is missing.
    Malformed(MessageError),
}

impl Verdict {
    pub fn is_relevant(&self) -> bool {
        matches!(self, Self::Relevant)
    }
}

/// Run every check in order and stop at the first failure.
pub fn evaluate(message: &SyncMessage, params: &QueryParams, topics: &TopicSet) -> Verdict {
    if !topics.matches(&message.topic) {
        return Verdict::Irrelevant("topic");
    }
    if message.project != params.project {
        return Verdict::Irrelevant("project");
    }
    if let Err(verdict) = check_scope(message, params) {
        return verdict;
    }
    if let Err(verdict) = check_types(message, params) {
        return verdict;
    }
    Verdict::Relevant
}

pub fn is_relevant(message: &SyncMessage, params: &QueryParams, topics: &TopicSet) -> bool {
    evaluate(message, params, topics).is_relevant()
}

/// OR semantics: any scope id of the message in the entry's scope passes.
fn check_scope(message: &SyncMessage, params: &QueryParams) -> Result<(), Verdict> {
    let Some(scope) = &params.entity_ids else {
        return Ok(());
    };
    let message_scope = message.scope_ids();
    if message_scope.is_empty() {
        return Err(Verdict::Malformed(MessageError::MissingField {
            field: "summary.references",
        }));
    }
    if message_scope.iter().any(|id| scope.contains(*id)) {
        Ok(())
    } else {
        Err(Verdict::Irrelevant("scope"))
    }
}

/// Declared type plus any type it may be derived into.
///
/// A comment is only a checklist if its body says so, which the message does
/// not carry; it passes here and is rechecked against the fetched record.
pub fn candidate_types(entity_type: &str) -> Vec<&str> {
    let mut types = vec![entity_type];
    if entity_type == COMMENT_TYPE {
        types.push(CHECKLIST_TYPE);
    }
    types
}

fn check_types(message: &SyncMessage, params: &QueryParams) -> Result<(), Verdict> {
    let Some(types) = &params.types else {
        return Ok(());
    };
    let entity_type = message.entity_type().map_err(Verdict::Malformed)?;
    if candidate_types(entity_type)
        .into_iter()
        .any(|candidate| types.contains(candidate))
    {
        Ok(())
    } else {
        Err(Verdict::Irrelevant("type"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use ripple_core::{RawMessage, RawReference, RawSummary};

    fn raw(topic: &str, entity_type: Option<&str>, origins: &[&str]) -> RawMessage {
        RawMessage {
            topic: topic.to_string(),
            project: Some("demo".to_string()),
            entity_ids: None,
            timestamp: None,
            status: None,
            summary: Some(RawSummary {
                primary_entity_id: Some("c".to_string()),
                entity_type: entity_type.map(str::to_string),
                references: origins
                    .iter()
                    .map(|id| RawReference {
                        entity_id: Some(id.to_string()),
                        entity_type: Some("version".to_string()),
                        reference_type: Some("origin".to_string()),
                    })
                    .collect(),
            }),
        }
    }

    fn message(topic: &str, entity_type: Option<&str>, origins: &[&str]) -> SyncMessage {
        SyncMessage::try_from(raw(topic, entity_type, origins)).unwrap()
    }

    fn feed_topics() -> TopicSet {
        TopicSet::from_names(&["activity", "inbox.message"])
    }

    #[test]
    fn test_unscoped_params_accept_any_scope() {
        let params = QueryParams::new("demo");
        let msg = message("activity.created", Some("comment"), &["anything"]);
        assert_eq!(evaluate(&msg, &params, &feed_topics()), Verdict::Relevant);
    }

    #[test]
    fn test_scope_uses_or_semantics() {
        let params = QueryParams::new("demo").with_entity_ids(["scope1", "scope3"]);
        let msg = message("activity.created", Some("comment"), &["scope2", "scope3"]);
        assert!(is_relevant(&msg, &params, &feed_topics()));

        let msg = message("activity.created", Some("comment"), &["scope2"]);
        assert_eq!(
            evaluate(&msg, &params, &feed_topics()),
            Verdict::Irrelevant("scope")
        );
    }

    #[test]
    fn test_missing_scope_is_malformed_for_scoped_params() {
        let params = QueryParams::new("demo").with_entity_ids(["scope1"]);
        let msg = message("activity.created", Some("comment"), &[]);
        assert!(matches!(
            evaluate(&msg, &params, &feed_topics()),
            Verdict::Malformed(MessageError::MissingField { .. })
        ));
    }

    #[test]
    fn test_topic_and_project_checks() {
        let params = QueryParams::new("demo");
        let msg = message("reviewable.process", Some("comment"), &[]);
        assert_eq!(
            evaluate(&msg, &params, &feed_topics()),
            Verdict::Irrelevant("topic")
        );

        let params = QueryParams::new("other");
        let msg = message("activity.created", Some("comment"), &[]);
        assert_eq!(
            evaluate(&msg, &params, &feed_topics()),
            Verdict::Irrelevant("project")
        );
    }

    #[test]
    fn test_type_filter_with_derived_checklist() {
        let params = QueryParams::new("demo").with_types(["checklist"]);
        let comment = message("activity.created", Some("comment"), &[]);
        assert!(is_relevant(&comment, &params, &feed_topics()));

        let status = message("activity.created", Some("status.change"), &[]);
        assert_eq!(
            evaluate(&status, &params, &feed_topics()),
            Verdict::Irrelevant("type")
        );
    }

    #[test]
    fn test_missing_type_never_relevant_under_type_filter() {
        let params = QueryParams::new("demo").with_types(["comment"]);
        let msg = message("activity.created", None, &[]);
        assert_eq!(
            evaluate(&msg, &params, &feed_topics()),
            Verdict::Malformed(MessageError::MissingField {
                field: "summary.entityType"
            })
        );
    }

    fn arb_opt_string() -> impl Strategy<Value = Option<String>> {
        prop::option::of("[a-z]{1,6}")
    }

    proptest! {
        #[test]
        fn evaluate_is_total(
            topic in "[a-z]{1,6}(\\.[a-z]{1,6}){0,2}",
            entity_type in arb_opt_string(),
            origins in prop::collection::vec("[a-z]{1,4}", 0..4),
            scope in prop::option::of(prop::collection::vec("[a-z]{1,4}", 1..4)),
            types in prop::option::of(prop::collection::vec("[a-z]{1,6}", 1..3)),
        ) {
            let origin_refs: Vec<&str> = origins.iter().map(String::as_str).collect();
            let msg = message(&topic, entity_type.as_deref(), &origin_refs);
            let mut params = QueryParams::new("demo");
            if let Some(scope) = scope {
                params = params.with_entity_ids(scope);
            }
            let typed = types.is_some();
            if let Some(types) = types {
                params = params.with_types(types);
            }

            let verdict = evaluate(&msg, &params, &feed_topics());
            if typed && entity_type.is_none() {
                prop_assert!(!verdict.is_relevant());
            }
        }
    }
}
