//! Undo/redo scoped to the local user.
//!
//! Only commits made through the session's mutation API are recorded, each
//! tagged with the origin that made it. Remote updates never enter the
//! history, so undoing can only revert this user's own edits.

use std::time::{Duration, Instant};

use crate::mutations::Edit;

/// Edits that revert one user-visible step, in application order.
#[derive(Debug, Clone)]
pub struct UndoStep {
    pub origin: String,
    pub edits: Vec<Edit>,
    pub recorded_at: Instant,
}

/// One undo stack and one redo stack shared by every origin.
///
/// Each step carries the origin that recorded it, and the `pop_*` calls only
/// hand a step back to that same origin. The session clears the history when
/// the local identity changes, so in practice both stacks hold one origin.
pub struct UndoHistory {
    undo: Vec<UndoStep>,
    redo: Vec<UndoStep>,
    capture_timeout: Duration,
    depth: usize,
}

impl UndoHistory {
    pub fn new(capture_timeout: Duration, depth: usize) -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            capture_timeout,
            depth: depth.max(1),
        }
    }

    /// Record the inverses of a fresh local commit.
    ///
    /// Commits by the same origin within the capture timeout merge into
    /// the previous step. Any recorded commit invalidates redo.
    pub fn record(&mut self, origin: &str, inverses: Vec<Edit>) {
        self.record_at(origin, inverses, Instant::now());
    }

    fn record_at(&mut self, origin: &str, inverses: Vec<Edit>, now: Instant) {
        if inverses.is_empty() {
            return;
        }
        self.redo.clear();

        if let Some(top) = self.undo.last_mut() {
            if top.origin == origin && now.duration_since(top.recorded_at) < self.capture_timeout {
                // Newest changes are reverted first.
                let mut edits = inverses;
                edits.append(&mut top.edits);
                top.edits = edits;
                top.recorded_at = now;
                return;
            }
        }

        self.undo.push(UndoStep {
            origin: origin.to_string(),
            edits: inverses,
            recorded_at: now,
        });
        if self.undo.len() > self.depth {
            self.undo.remove(0);
        }
    }

    pub fn can_undo(&self, origin: &str) -> bool {
        self.undo.last().is_some_and(|step| step.origin == origin)
    }

    pub fn can_redo(&self, origin: &str) -> bool {
        self.redo.last().is_some_and(|step| step.origin == origin)
    }

    pub fn pop_undo(&mut self, origin: &str) -> Option<UndoStep> {
        if !self.can_undo(origin) {
            return None;
        }
        self.undo.pop()
    }

    pub fn pop_redo(&mut self, origin: &str) -> Option<UndoStep> {
        if !self.can_redo(origin) {
            return None;
        }
        self.redo.pop()
    }

    /// Store what reverses an undo, so it can be redone.
    pub fn push_redo(&mut self, origin: &str, edits: Vec<Edit>) {
        if edits.is_empty() {
            return;
        }
        self.redo.push(UndoStep {
            origin: origin.to_string(),
            edits,
            recorded_at: Instant::now(),
        });
    }

    /// Store what reverses a redo. Never merges and keeps the redo stack.
    pub fn push_undo(&mut self, origin: &str, edits: Vec<Edit>) {
        if edits.is_empty() {
            return;
        }
        self.undo.push(UndoStep {
            origin: origin.to_string(),
            edits,
            // Far enough back that the next commit starts its own step.
            recorded_at: Instant::now()
                .checked_sub(self.capture_timeout + Duration::from_millis(1))
                .unwrap_or_else(Instant::now),
        });
    }

    /// Forget everything, e.g. when the local identity changes.
    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn title(page: &str, title: &str) -> Edit {
        Edit::SetPageTitle {
            page_id: page.to_string(),
            title: title.to_string(),
        }
    }

    #[test]
    fn test_rapid_edits_coalesce() {
        let mut history = UndoHistory::new(Duration::from_millis(500), 10);
        let start = Instant::now();
        history.record_at("me", vec![title("p1", "a")], start);
        history.record_at("me", vec![title("p1", "ab")], start + Duration::from_millis(200));
        assert_eq!(history.undo_len(), 1);

        let step = history.pop_undo("me").unwrap();
        assert_eq!(step.edits, vec![title("p1", "ab"), title("p1", "a")]);
    }

    #[test]
    fn test_slow_edits_are_separate_steps() {
        let mut history = UndoHistory::new(Duration::from_millis(500), 10);
        let start = Instant::now();
        history.record_at("me", vec![title("p1", "a")], start);
        history.record_at("me", vec![title("p1", "b")], start + Duration::from_millis(900));
        assert_eq!(history.undo_len(), 2);
    }

    #[test]
    fn test_other_origin_is_not_undoable() {
        let mut history = UndoHistory::new(Duration::from_millis(500), 10);
        history.record("alice", vec![title("p1", "a")]);
        assert!(!history.can_undo("bob"));
        assert!(history.pop_undo("bob").is_none());
        assert!(history.can_undo("alice"));
    }

    #[test]
    fn test_record_clears_redo() {
        let mut history = UndoHistory::new(Duration::from_millis(500), 10);
        history.record("me", vec![title("p1", "a")]);
        let step = history.pop_undo("me").unwrap();
        history.push_redo("me", step.edits);
        assert!(history.can_redo("me"));

        history.record("me", vec![title("p1", "b")]);
        assert!(!history.can_redo("me"));
    }

    #[test]
    fn test_depth_limit_drops_oldest() {
        let mut history = UndoHistory::new(Duration::ZERO, 2);
        let start = Instant::now();
        for i in 0..3u64 {
            history.record_at("me", vec![title("p1", &i.to_string())], start + Duration::from_secs(i));
        }
        assert_eq!(history.undo_len(), 2);
        assert_eq!(history.pop_undo("me").unwrap().edits, vec![title("p1", "2")]);
        assert_eq!(history.pop_undo("me").unwrap().edits, vec![title("p1", "1")]);
        assert!(history.pop_undo("me").is_none());
    }

    #[test]
    fn test_empty_commits_are_ignored() {
        let mut history = UndoHistory::new(Duration::from_millis(500), 10);
        history.record("me", Vec::new());
        assert!(!history.can_undo("me"));
    }
}
