//! Patch engine over cached pages.
//!
//! Pure functions, no I/O. Every function preserves the entry invariant that
//! a record id appears at most once across all pages. Scans run in page order
//! and stop at the first match.

use ripple_core::{
    ChangeDescriptor, InsertPosition, Page, PatchError, RecordPatch, SortDirection, SyncRecord,
};

/// Result of applying one change to an entry's pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    Inserted,
    Updated,
    Deleted,
    /// Nothing to do (e.g. deleting an id that is not cached).
    Unchanged,
    /// The change cannot be applied correctly; the entry must be invalidated.
    NeedsInvalidation(PatchError),
}

impl PatchOutcome {
    /// Whether the pages were modified.
    pub fn mutated(&self) -> bool {
        matches!(self, Self::Inserted | Self::Updated | Self::Deleted)
    }

    pub fn needs_invalidation(&self) -> bool {
        matches!(self, Self::NeedsInvalidation(_))
    }
}

/// Position `(page, index)` of the record with `id`.
pub fn find_record<R: SyncRecord>(pages: &[Page<R>], id: &str) -> Option<(usize, usize)> {
    pages.iter().enumerate().find_map(|(page_index, page)| {
        page.items
            .iter()
            .position(|item| item.id() == id)
            .map(|item_index| (page_index, item_index))
    })
}

pub fn contains_record<R: SyncRecord>(pages: &[Page<R>], id: &str) -> bool {
    find_record(pages, id).is_some()
}

/// Remove the record with `id`. Returns whether a removal occurred.
pub fn apply_delete<R: SyncRecord>(pages: &mut [Page<R>], id: &str) -> bool {
    match find_record(pages, id) {
        Some((page_index, item_index)) => {
            pages[page_index].items.remove(item_index);
            true
        }
        None => false,
    }
}

fn check_id<R: SyncRecord>(id: &str, record: &R) -> Result<(), PatchError> {
    if record.id() == id {
        Ok(())
    } else {
        Err(PatchError::IdMismatch {
            id: id.to_string(),
            record_id: record.id().clone(),
        })
    }
}

/// Replace the record with `id` in place, preserving its position.
///
/// `new_record` must carry the same id; writing another id into the slot
/// could duplicate it elsewhere in the entry.
pub fn apply_update<R: SyncRecord>(
    pages: &mut [Page<R>],
    id: &str,
    new_record: R,
) -> Result<bool, PatchError> {
    check_id(id, &new_record)?;
    match find_record(pages, id) {
        Some((page_index, item_index)) => {
            pages[page_index].items[item_index] = new_record;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Apply a [`RecordPatch`] to the record with `id`.
pub fn apply_record_patch<R: SyncRecord>(
    pages: &mut [Page<R>],
    id: &str,
    patch: RecordPatch<R>,
) -> PatchOutcome {
    if let RecordPatch::Replace(record) = &patch {
        if let Err(err) = check_id(id, record) {
            return PatchOutcome::NeedsInvalidation(err);
        }
    }
    let Some((page_index, item_index)) = find_record(pages, id) else {
        return PatchOutcome::NeedsInvalidation(PatchError::MissingRecord { id: id.to_string() });
    };
    let slot = &mut pages[page_index].items[item_index];
    match patch {
        RecordPatch::Replace(record) => {
            *slot = record;
            PatchOutcome::Updated
        }
        RecordPatch::Status(status) => {
            if slot.apply_status(&status) {
                PatchOutcome::Updated
            } else {
                PatchOutcome::NeedsInvalidation(PatchError::UnsupportedPatch { id: id.to_string() })
            }
        }
    }
}

/// Prepend `record` to the first page.
///
/// With no pages there is nothing to anchor to and creating a page would
/// fabricate pagination metadata, so the caller must fall back to
/// invalidation. Any existing copy of the record is removed first.
pub fn apply_insert_front<R: SyncRecord>(
    pages: &mut [Page<R>],
    record: R,
) -> Result<(), PatchError> {
    if pages.is_empty() {
        return Err(PatchError::NoAnchorPage {
            id: record.id().clone(),
        });
    }
    apply_delete(pages, record.id());
    pages[0].items.insert(0, record);
    Ok(())
}

/// Insert `record` at its natural sort position.
///
/// The record goes before the first cached record that sorts after it. If
/// none does, it is appended to the last page only when that page is the end
/// of the result set; otherwise it belongs to a page that is not loaded and
/// `Ok(false)` is returned.
pub fn apply_insert_sorted<R: SyncRecord>(
    pages: &mut [Page<R>],
    record: R,
    direction: SortDirection,
) -> Result<bool, PatchError> {
    if pages.is_empty() {
        return Err(PatchError::NoAnchorPage {
            id: record.id().clone(),
        });
    }
    apply_delete(pages, record.id());

    let key = record.sort_key();
    let goes_before = |item: &R| match direction {
        SortDirection::Ascending => key < item.sort_key(),
        SortDirection::Descending => key > item.sort_key(),
    };

    for page in pages.iter_mut() {
        if let Some(index) = page.items.iter().position(|item| goes_before(item)) {
            page.items.insert(index, record);
            return Ok(true);
        }
    }

    match pages.last_mut() {
        Some(last) if !last.page_info.has_next_page => {
            last.items.push(record);
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Update in place if `id` is cached, otherwise insert at the front.
pub fn apply_insert_or_update<R: SyncRecord>(
    pages: &mut [Page<R>],
    id: &str,
    record: R,
) -> PatchOutcome {
    match apply_update(pages, id, record.clone()) {
        Ok(true) => return PatchOutcome::Updated,
        Ok(false) => {}
        Err(err) => return PatchOutcome::NeedsInvalidation(err),
    }
    match apply_insert_front(pages, record) {
        Ok(()) => PatchOutcome::Inserted,
        Err(err) => PatchOutcome::NeedsInvalidation(err),
    }
}

fn insert_at<R: SyncRecord>(
    pages: &mut [Page<R>],
    record: R,
    position: InsertPosition,
) -> Result<bool, PatchError> {
    match position {
        InsertPosition::Front => apply_insert_front(pages, record).map(|()| true),
        InsertPosition::Sorted(direction) => apply_insert_sorted(pages, record, direction),
    }
}

fn upsert<R: SyncRecord>(pages: &mut [Page<R>], record: R, position: InsertPosition) -> PatchOutcome {
    let id = record.id().clone();
    let existing = find_record(pages, &id);

    match (existing, position) {
        (None, InsertPosition::Front) => apply_insert_or_update(pages, &id, record),
        (Some((page_index, item_index)), InsertPosition::Front) => {
            pages[page_index].items[item_index] = record;
            PatchOutcome::Updated
        }
        (Some((page_index, item_index)), InsertPosition::Sorted(_))
            if pages[page_index].items[item_index].sort_key() == record.sort_key() =>
        {
            pages[page_index].items[item_index] = record;
            PatchOutcome::Updated
        }
        (existing, InsertPosition::Sorted(direction)) => {
            match apply_insert_sorted(pages, record, direction) {
                Ok(true) if existing.is_some() => PatchOutcome::Updated,
                Ok(true) => PatchOutcome::Inserted,
                Ok(false) if existing.is_some() => PatchOutcome::Deleted,
                Ok(false) => PatchOutcome::Unchanged,
                Err(err) => PatchOutcome::NeedsInvalidation(err),
            }
        }
    }
}

/// Apply a change descriptor. `InvalidateAll` is never applied here and is
/// reported back as needing invalidation.
pub fn apply_change<R: SyncRecord>(
    pages: &mut [Page<R>],
    change: ChangeDescriptor<R>,
) -> PatchOutcome {
    match change {
        ChangeDescriptor::Insert { record, position } => {
            let replaced = contains_record(pages, record.id());
            match insert_at(pages, record, position) {
                Ok(true) if replaced => PatchOutcome::Updated,
                Ok(true) => PatchOutcome::Inserted,
                Ok(false) if replaced => PatchOutcome::Deleted,
                Ok(false) => PatchOutcome::Unchanged,
                Err(err) => PatchOutcome::NeedsInvalidation(err),
            }
        }
        ChangeDescriptor::Update { id, patch } => apply_record_patch(pages, &id, patch),
        ChangeDescriptor::Upsert { record, position } => upsert(pages, record, position),
        ChangeDescriptor::Delete { id } => {
            if apply_delete(pages, &id) {
                PatchOutcome::Deleted
            } else {
                PatchOutcome::Unchanged
            }
        }
        ChangeDescriptor::InvalidateAll { reason } => {
            PatchOutcome::NeedsInvalidation(PatchError::InvalidationRequested { reason })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use ripple_core::{PageInfo, Task};
    use std::collections::HashSet;

    fn task(id: &str) -> Task {
        Task {
            task_id: id.to_string(),
            folder_id: "f1".to_string(),
            name: id.to_string(),
            label: None,
            task_type: "Generic".to_string(),
            status: "Not ready".to_string(),
            assignees: vec![],
            updated_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
        }
    }

    fn page(ids: &[&str]) -> Page<Task> {
        Page::single(ids.iter().map(|id| task(id)).collect())
    }

    fn ids(pages: &[Page<Task>]) -> Vec<Vec<String>> {
        pages
            .iter()
            .map(|p| p.items.iter().map(|t| t.task_id.clone()).collect())
            .collect()
    }

    #[test]
    fn test_delete_removes_first_match() {
        let mut pages = vec![page(&["a", "b"]), page(&["c"])];
        assert!(apply_delete(&mut pages, "c"));
        assert_eq!(ids(&pages), vec![vec!["a", "b"], vec![]]);
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let mut pages = vec![page(&["a", "b"])];
        let before = pages.clone();
        assert!(!apply_delete(&mut pages, "zz"));
        assert_eq!(pages, before);
        assert_eq!(
            apply_change(&mut pages, ChangeDescriptor::Delete { id: "zz".to_string() }),
            PatchOutcome::Unchanged
        );
    }

    #[test]
    fn test_update_preserves_position() {
        let mut pages = vec![page(&["a", "b", "c"])];
        let mut updated = task("b");
        updated.status = "Done".to_string();
        assert_eq!(apply_update(&mut pages, "b", updated), Ok(true));
        assert_eq!(ids(&pages), vec![vec!["a", "b", "c"]]);
        assert_eq!(pages[0].items[1].status, "Done");
    }

    #[test]
    fn test_update_with_other_record_id_is_rejected() {
        let mut pages = vec![page(&["a", "b"])];
        let before = pages.clone();

        let outcome = apply_change(
            &mut pages,
            ChangeDescriptor::Update {
                id: "a".to_string(),
                patch: RecordPatch::Replace(task("b")),
            },
        );
        assert!(matches!(
            outcome,
            PatchOutcome::NeedsInvalidation(PatchError::IdMismatch { .. })
        ));
        assert_eq!(pages, before);

        assert!(apply_update(&mut pages, "a", task("b")).is_err());
        assert!(apply_insert_or_update(&mut pages, "a", task("b")).needs_invalidation());
        assert!(apply_insert_or_update(&mut pages, "n", task("b")).needs_invalidation());
        assert_eq!(pages, before);
    }

    #[test]
    fn test_insert_front_prepends_to_first_page() {
        let mut pages = vec![page(&["a", "b"]), page(&["c"])];
        apply_insert_front(&mut pages, task("n")).unwrap();
        assert_eq!(ids(&pages), vec![vec!["n", "a", "b"], vec!["c"]]);
    }

    #[test]
    fn test_insert_front_without_pages_needs_invalidation() {
        let mut pages: Vec<Page<Task>> = vec![];
        assert!(matches!(
            apply_insert_front(&mut pages, task("n")),
            Err(PatchError::NoAnchorPage { .. })
        ));
        assert!(pages.is_empty());
        assert!(apply_insert_or_update(&mut pages, "n", task("n")).needs_invalidation());
    }

    #[test]
    fn test_insert_or_update_prefers_update() {
        let mut pages = vec![page(&["a", "b"])];
        assert_eq!(apply_insert_or_update(&mut pages, "b", task("b")), PatchOutcome::Updated);
        assert_eq!(ids(&pages), vec![vec!["a", "b"]]);
        assert_eq!(apply_insert_or_update(&mut pages, "c", task("c")), PatchOutcome::Inserted);
        assert_eq!(ids(&pages), vec![vec!["c", "a", "b"]]);
    }

    #[test]
    fn test_insert_sorted_natural_position() {
        let mut pages = vec![page(&["a", "c"]), page(&["e"])];
        assert_eq!(
            apply_insert_sorted(&mut pages, task("d"), SortDirection::Ascending),
            Ok(true)
        );
        assert_eq!(ids(&pages), vec![vec!["a", "c"], vec!["d", "e"]]);
    }

    #[test]
    fn test_insert_sorted_past_loaded_pages_is_skipped() {
        let mut pages = vec![Page::new(
            vec![task("a"), task("b")],
            PageInfo {
                has_next_page: true,
                ..PageInfo::default()
            },
        )];
        assert_eq!(
            apply_insert_sorted(&mut pages, task("z"), SortDirection::Ascending),
            Ok(false)
        );
        assert_eq!(ids(&pages), vec![vec!["a", "b"]]);

        pages[0].page_info.has_next_page = false;
        assert_eq!(
            apply_insert_sorted(&mut pages, task("z"), SortDirection::Ascending),
            Ok(true)
        );
        assert_eq!(ids(&pages), vec![vec!["a", "b", "z"]]);
    }

    #[test]
    fn test_upsert_sorted_moves_renamed_record() {
        let mut pages = vec![page(&["a", "b", "c"])];
        let mut renamed = task("a");
        renamed.name = "zz".to_string();
        let outcome = apply_change(
            &mut pages,
            ChangeDescriptor::Upsert {
                record: renamed,
                position: InsertPosition::Sorted(SortDirection::Ascending),
            },
        );
        assert_eq!(outcome, PatchOutcome::Updated);
        assert_eq!(ids(&pages), vec![vec!["b", "c", "a"]]);
    }

    #[test]
    fn test_status_patch_on_missing_record_needs_invalidation() {
        let mut pages = vec![page(&["a"])];
        let outcome = apply_change(
            &mut pages,
            ChangeDescriptor::Update {
                id: "x".to_string(),
                patch: RecordPatch::Status("Done".to_string()),
            },
        );
        assert!(outcome.needs_invalidation());

        let outcome = apply_change(
            &mut pages,
            ChangeDescriptor::Update {
                id: "a".to_string(),
                patch: RecordPatch::Status("Done".to_string()),
            },
        );
        assert_eq!(outcome, PatchOutcome::Updated);
        assert_eq!(pages[0].items[0].status, "Done");
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(u8, bool),
        Upsert(u8, bool),
        Update(u8, u8),
        Delete(u8),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..12, any::<bool>()).prop_map(|(id, front)| Op::Insert(id, front)),
            (0u8..12, any::<bool>()).prop_map(|(id, front)| Op::Upsert(id, front)),
            // replacement id usually matches, sometimes names another record
            (0u8..12, prop_oneof![3 => Just(None), 1 => (0u8..12).prop_map(Some)])
                .prop_map(|(id, other)| Op::Update(id, other.unwrap_or(id))),
            (0u8..12).prop_map(Op::Delete),
        ]
    }

    fn position(front: bool) -> InsertPosition {
        if front {
            InsertPosition::Front
        } else {
            InsertPosition::Sorted(SortDirection::Ascending)
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn ids_stay_unique_across_any_op_sequence(
            ops in prop::collection::vec(arb_op(), 0..40),
            split in 0usize..4,
        ) {
            let initial: Vec<String> = (0..4).map(|i| format!("t{i:02}")).collect();
            let (first, second) = initial.split_at(split.min(initial.len()));
            let mut pages = vec![
                Page::single(first.iter().map(|id| task(id)).collect()),
                Page::single(second.iter().map(|id| task(id)).collect()),
            ];

            for op in ops {
                let change = match op {
                    Op::Insert(id, front) => ChangeDescriptor::Insert {
                        record: task(&format!("t{id:02}")),
                        position: position(front),
                    },
                    Op::Upsert(id, front) => ChangeDescriptor::Upsert {
                        record: task(&format!("t{id:02}")),
                        position: position(front),
                    },
                    Op::Update(id, record_id) => ChangeDescriptor::Update {
                        id: format!("t{id:02}"),
                        patch: RecordPatch::Replace(task(&format!("t{record_id:02}"))),
                    },
                    Op::Delete(id) => ChangeDescriptor::Delete { id: format!("t{id:02}") },
                };
                apply_change(&mut pages, change);

                let mut seen = HashSet::new();
                for item in pages.iter().flat_map(|p| p.items.iter()) {
                    prop_assert!(seen.insert(item.task_id.clone()), "duplicate id {}", item.task_id);
                }
            }
        }

        #[test]
        fn delete_of_absent_id_never_mutates(present in prop::collection::hash_set(0u8..20, 0..10), absent in 20u8..40) {
            let ids: Vec<String> = present.iter().map(|i| format!("t{i:02}")).collect();
            let mut pages = vec![Page::single(ids.iter().map(|id| task(id)).collect())];
            let before = pages.clone();
            let absent_id = format!("t{absent:02}");
            prop_assert!(!apply_delete(&mut pages, &absent_id));
            prop_assert_eq!(pages, before);
        }
    }
}
