//! Reference counts of applied transactions.
//!
//! Each remote delivery adjusts the count of its transaction id: a
//! transaction or redo adds one, an undo subtracts one. The patch is applied
//! only when the count reaches 1 from below, and unapplied only when it
//! reaches 0 from above, so duplicate and reordered deliveries are harmless.
//! Zero counts are removed rather than stored.

use crate::TransactionId;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct Cemetery {
    counts: HashMap<TransactionId, i64>,
}

impl Cemetery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current count of a transaction; absent ids count zero.
    pub fn count(&self, id: &str) -> i64 {
        self.counts.get(id).copied().unwrap_or(0)
    }

    /// Record a locally committed transaction as applied once.
    pub fn mark_visible(&mut self, id: &str) {
        self.counts.insert(id.to_string(), 1);
    }

    /// Count a transaction or redo delivery. Returns whether its patch
    /// should now be applied.
    pub fn apply(&mut self, id: &str) -> bool {
        self.adjust(id, 1) == 1
    }

    /// Count an undo delivery. Returns whether the patch should now be
    /// unapplied.
    pub fn unapply(&mut self, id: &str) -> bool {
        self.adjust(id, -1) == 0
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    fn adjust(&mut self, id: &str, delta: i64) -> i64 {
        let next = self.count(id) + delta;
        if next == 0 {
            self.counts.remove(id);
        } else {
            self.counts.insert(id.to_string(), next);
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_delivery_applies() {
        let mut cemetery = Cemetery::new();
        assert!(cemetery.apply("t"));
        assert_eq!(cemetery.count("t"), 1);
        // Duplicate.
        assert!(!cemetery.apply("t"));
        assert_eq!(cemetery.count("t"), 2);
    }

    #[test]
    fn undo_then_redo() {
        let mut cemetery = Cemetery::new();
        cemetery.mark_visible("t");
        assert!(cemetery.unapply("t"));
        assert_eq!(cemetery.count("t"), 0);
        assert!(cemetery.is_empty());
        assert!(cemetery.apply("t"));
    }

    #[test]
    fn undo_before_transaction_cancels_it() {
        let mut cemetery = Cemetery::new();
        assert!(!cemetery.unapply("t"));
        assert_eq!(cemetery.count("t"), -1);
        assert!(!cemetery.apply("t"));
        assert!(cemetery.is_empty());
    }

    #[test]
    fn repeated_undo_does_not_double_unapply() {
        let mut cemetery = Cemetery::new();
        cemetery.mark_visible("t");
        assert!(cemetery.unapply("t"));
        assert!(!cemetery.unapply("t"));
        assert_eq!(cemetery.count("t"), -1);
        // One redo only gets back to zero.
        assert!(!cemetery.apply("t"));
        assert!(cemetery.apply("t"));
    }

    #[test]
    fn redo_is_not_clamped() {
        let mut cemetery = Cemetery::new();
        cemetery.mark_visible("t");
        assert!(!cemetery.apply("t"));
        assert!(!cemetery.apply("t"));
        assert_eq!(cemetery.count("t"), 3);
        assert_eq!(cemetery.len(), 1);
    }
}
