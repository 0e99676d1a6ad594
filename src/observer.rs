//! Snapshot diffing
//!
//! The observer is a pure function of (previous snapshot, fresh listing). It
//! never patches a snapshot in place: the returned `next` snapshot is built
//! from the listing alone, so it always matches what was last observed.

use serde::Serialize;

use crate::snapshot::{ListingEntry, TreeSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// One detected change for one path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: String,
}

impl ChangeEvent {
    pub fn created(path: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Created,
            path: path.into(),
        }
    }

    pub fn modified(path: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Modified,
            path: path.into(),
        }
    }

    pub fn deleted(path: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Deleted,
            path: path.into(),
        }
    }
}

/// Result of one diff: the ordered events plus the snapshot to persist
#[derive(Debug, Clone)]
pub struct Diff {
    pub events: Vec<ChangeEvent>,
    pub next: TreeSnapshot,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }
}

pub struct Observer;

impl Observer {
    /// Diff a fresh listing against the previous snapshot.
    ///
    /// Deletions come first, then creations and modifications, each group in
    /// ascending path order. Renames show up as a delete plus a create.
    pub fn diff(previous: Option<&TreeSnapshot>, listing: Vec<ListingEntry>) -> Diff {
        let next = TreeSnapshot::from_listing(listing);

        let Some(previous) = previous else {
            let events = next.paths().map(ChangeEvent::created).collect();
            return Diff { events, next };
        };

        let mut events: Vec<ChangeEvent> = previous
            .paths()
            .filter(|path| !next.contains(path))
            .map(ChangeEvent::deleted)
            .collect();

        for path in next.paths() {
            match (previous.get(path), next.get(path)) {
                (None, _) => events.push(ChangeEvent::created(path)),
                (Some(before), Some(after)) if before != after => {
                    events.push(ChangeEvent::modified(path))
                }
                _ => {}
            }
        }

        Diff { events, next }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Fingerprint;

    fn listing(entries: &[(&str, u64)]) -> Vec<ListingEntry> {
        entries
            .iter()
            .map(|(path, size)| ListingEntry::new(*path, Fingerprint::new(*size, 1000)))
            .collect()
    }

    #[test]
    fn test_first_run_creates_everything() {
        let diff = Observer::diff(None, listing(&[("a", 1)]));

        assert_eq!(diff.events, vec![ChangeEvent::created("a")]);
        assert_eq!(diff.next.len(), 1);
    }

    #[test]
    fn test_modified_and_created_without_unchanged() {
        let previous = TreeSnapshot::from_listing(listing(&[("a", 1), ("b", 1)]));

        let diff = Observer::diff(Some(&previous), listing(&[("a", 1), ("b", 2), ("c", 1)]));

        assert_eq!(
            diff.events,
            vec![ChangeEvent::modified("b"), ChangeEvent::created("c")]
        );
    }

    #[test]
    fn test_missing_paths_are_deleted_first() {
        let previous = TreeSnapshot::from_listing(listing(&[("a", 1), ("z", 1)]));

        let diff = Observer::diff(Some(&previous), listing(&[("b", 1), ("z", 1)]));

        assert_eq!(
            diff.events,
            vec![ChangeEvent::deleted("a"), ChangeEvent::created("b")]
        );
        assert_eq!(diff.count(ChangeKind::Deleted), 1);
    }

    #[test]
    fn test_modification_time_alone_is_a_change() {
        let previous = TreeSnapshot::from_listing(vec![ListingEntry::new("a", Fingerprint::new(5, 1))]);

        let diff = Observer::diff(
            Some(&previous),
            vec![ListingEntry::new("a", Fingerprint::new(5, 2))],
        );

        assert_eq!(diff.events, vec![ChangeEvent::modified("a")]);
    }

    #[test]
    fn test_rename_is_delete_plus_create() {
        let previous = TreeSnapshot::from_listing(listing(&[("old", 3)]));

        let diff = Observer::diff(Some(&previous), listing(&[("new", 3)]));

        assert_eq!(
            diff.events,
            vec![ChangeEvent::deleted("old"), ChangeEvent::created("new")]
        );
    }

    #[test]
    fn test_disappear_then_reappear_unchanged() {
        let first = Observer::diff(None, listing(&[("a", 1)]));
        let gone = Observer::diff(Some(&first.next), Vec::new());
        let back = Observer::diff(Some(&gone.next), listing(&[("a", 1)]));

        assert_eq!(gone.events, vec![ChangeEvent::deleted("a")]);
        assert_eq!(back.events, vec![ChangeEvent::created("a")]);
    }

    #[test]
    fn test_next_replaces_previous_entirely() {
        let previous = TreeSnapshot::from_listing(listing(&[("a", 1), ("b", 1)]));

        let diff = Observer::diff(Some(&previous), listing(&[("c", 1)]));

        assert_eq!(diff.next.paths().collect::<Vec<_>>(), vec!["c"]);
    }

    #[test]
    fn test_unchanged_tree_yields_no_events() {
        let previous = TreeSnapshot::from_listing(listing(&[("a", 1)]));

        let diff = Observer::diff(Some(&previous), listing(&[("a", 1)]));

        assert!(diff.is_empty());
    }
}
