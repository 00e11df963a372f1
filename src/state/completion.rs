//! Hunt-completion predicates and the edge-trigger watcher.

use std::collections::BTreeMap;

use dashmap::DashMap;

use crate::{
    dao::models::{HuntItemEntity, HuntItemId, HuntKind, HuntMark, UserId},
    dto::hunt::HuntProgressSummary,
};

/// Whether every item of the given catalog slice is satisfied in `progress`.
///
/// An empty catalog never reports complete.
pub fn is_hunt_complete<'a, I>(items: I, progress: &BTreeMap<HuntItemId, HuntMark>) -> bool
where
    I: IntoIterator<Item = &'a HuntItemEntity>,
{
    let mut seen_any = false;
    for item in items {
        seen_any = true;
        if !progress.get(&item.id).is_some_and(HuntMark::is_satisfied) {
            return false;
        }
    }
    seen_any
}

/// Count of satisfied items in the given catalog slice.
pub fn satisfied_count<'a, I>(items: I, progress: &BTreeMap<HuntItemId, HuntMark>) -> usize
where
    I: IntoIterator<Item = &'a HuntItemEntity>,
{
    items
        .into_iter()
        .filter(|item| progress.get(&item.id).is_some_and(HuntMark::is_satisfied))
        .count()
}

/// Build the progress summary for one hunt.
pub fn hunt_progress_summary(
    catalog: &[HuntItemEntity],
    hunt: HuntKind,
    progress: &BTreeMap<HuntItemId, HuntMark>,
) -> HuntProgressSummary {
    let total = catalog.iter().filter(|item| item.hunt == hunt).count();
    let found = satisfied_count(catalog.iter().filter(|item| item.hunt == hunt), progress);
    let percent = if total == 0 {
        0.0
    } else {
        (found as f64 / total as f64 * 100.0).round()
    };
    HuntProgressSummary {
        hunt,
        found,
        total,
        percent,
        complete: total > 0 && found == total,
    }
}

/// Detects incomplete-to-complete transitions of a guest's hunts.
///
/// The watcher keeps the last progress snapshot it saw for each guest. A
/// completion fires only when a previous snapshot exists and was non-empty,
/// so neither the first observation of an already-finished hunt nor a fresh
/// hydration produces an event.
#[derive(Default)]
pub struct CompletionWatcher {
    seen: DashMap<UserId, BTreeMap<HuntItemId, HuntMark>>,
}

impl CompletionWatcher {
    /// Create an empty watcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fresh snapshot and return the hunts that just completed.
    pub fn observe(
        &self,
        catalog: &[HuntItemEntity],
        user: &UserId,
        progress: &BTreeMap<HuntItemId, HuntMark>,
    ) -> Vec<HuntKind> {
        let previous = self.seen.insert(user.clone(), progress.clone());

        let Some(previous) = previous else {
            return Vec::new();
        };
        if previous.is_empty() {
            return Vec::new();
        }

        HuntKind::ALL
            .iter()
            .copied()
            .filter(|kind| {
                let of_kind = || catalog.iter().filter(|item| item.hunt == *kind);
                is_hunt_complete(of_kind(), progress) && !is_hunt_complete(of_kind(), &previous)
            })
            .collect()
    }

    /// Drop the retained snapshot when the guest document goes away.
    pub fn forget(&self, user: &UserId) {
        self.seen.remove(user);
    }

    /// Drop every retained snapshot.
    pub fn clear(&self) {
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::HuntItemKind;

    fn item(id: &str, hunt: HuntKind) -> HuntItemEntity {
        HuntItemEntity {
            id: HuntItemId::new(id),
            text: format!("find {id}"),
            kind: HuntItemKind::Checkbox,
            hunt,
            category: None,
        }
    }

    fn checked(ids: &[&str]) -> BTreeMap<HuntItemId, HuntMark> {
        ids.iter()
            .map(|id| (HuntItemId::new(*id), HuntMark::Checked(true)))
            .collect()
    }

    #[test]
    fn empty_catalog_is_never_complete() {
        assert!(!is_hunt_complete([].iter(), &checked(&["h1"])));
    }

    #[test]
    fn blank_text_answers_do_not_satisfy() {
        let items = [item("h1", HuntKind::House)];
        let mut progress = BTreeMap::new();
        progress.insert(HuntItemId::new("h1"), HuntMark::Answer("  ".into()));
        assert!(!is_hunt_complete(items.iter(), &progress));

        progress.insert(HuntItemId::new("h1"), HuntMark::Answer("a red door".into()));
        assert!(is_hunt_complete(items.iter(), &progress));
    }

    #[test]
    fn completion_fires_once_per_transition() {
        let catalog = vec![item("h1", HuntKind::House), item("h2", HuntKind::House)];
        let watcher = CompletionWatcher::new();
        let user = UserId::new("u1");

        assert!(watcher.observe(&catalog, &user, &checked(&["h1"])).is_empty());

        let fired = watcher.observe(&catalog, &user, &checked(&["h1", "h2"]));
        assert_eq!(fired, vec![HuntKind::House]);

        // Re-observing the finished state stays quiet.
        assert!(
            watcher
                .observe(&catalog, &user, &checked(&["h1", "h2"]))
                .is_empty()
        );
    }

    #[test]
    fn first_snapshot_never_fires_even_when_already_complete() {
        let catalog = vec![item("h1", HuntKind::House)];
        let watcher = CompletionWatcher::new();
        let user = UserId::new("u1");

        assert!(watcher.observe(&catalog, &user, &checked(&["h1"])).is_empty());
    }

    #[test]
    fn unchecking_and_refinishing_fires_again() {
        let catalog = vec![item("h1", HuntKind::House)];
        let watcher = CompletionWatcher::new();
        let user = UserId::new("u1");

        watcher.observe(&catalog, &user, &checked(&["h1"]));
        let mut cleared = checked(&["h1"]);
        cleared.insert(HuntItemId::new("h1"), HuntMark::Checked(false));
        assert!(watcher.observe(&catalog, &user, &cleared).is_empty());

        let fired = watcher.observe(&catalog, &user, &checked(&["h1"]));
        assert_eq!(fired, vec![HuntKind::House]);
    }

    #[test]
    fn hunts_complete_independently() {
        let catalog = vec![item("h1", HuntKind::House), item("v1", HuntKind::Village)];
        let watcher = CompletionWatcher::new();
        let user = UserId::new("u1");

        watcher.observe(&catalog, &user, &checked(&["h1"]));
        let fired = watcher.observe(&catalog, &user, &checked(&["h1", "v1"]));
        assert_eq!(fired, vec![HuntKind::Village]);
    }

    #[test]
    fn progress_summary_rounds_and_flags_completion() {
        let catalog = vec![
            item("h1", HuntKind::House),
            item("h2", HuntKind::House),
            item("h3", HuntKind::House),
        ];

        let summary = hunt_progress_summary(&catalog, HuntKind::House, &checked(&["h1"]));
        assert_eq!((summary.found, summary.total), (1, 3));
        assert_eq!(summary.percent, 33.0);
        assert!(!summary.complete);

        let done = hunt_progress_summary(&catalog, HuntKind::House, &checked(&["h1", "h2", "h3"]));
        assert_eq!(done.percent, 100.0);
        assert!(done.complete);

        // A hunt with no catalog items never reports complete.
        let empty = hunt_progress_summary(&catalog, HuntKind::Village, &checked(&["h1"]));
        assert_eq!((empty.found, empty.total), (0, 0));
        assert!(!empty.complete);
    }

    #[test]
    fn forget_resets_the_first_snapshot_rule() {
        let catalog = vec![item("h1", HuntKind::House)];
        let watcher = CompletionWatcher::new();
        let user = UserId::new("u1");

        watcher.observe(&catalog, &user, &checked(&[]));
        watcher.observe(&catalog, &user, &checked(&["h1"]));
        watcher.forget(&user);

        // After forgetting, the next snapshot counts as the first again.
        assert!(watcher.observe(&catalog, &user, &checked(&["h1"])).is_empty());
    }
}
