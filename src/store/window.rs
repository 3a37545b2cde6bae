use std::collections::{HashSet, VecDeque};

use crate::types::TransactionRecord;

/// Bounded, newest-first list of transactions without duplicate signatures
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionWindow {
    capacity: usize,
    records: VecDeque<TransactionRecord>,
}

impl Default for TransactionWindow {
    fn default() -> Self {
        Self::new(50)
    }
}

impl TransactionWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransactionRecord> {
        self.records.iter()
    }

    pub fn newest(&self) -> Option<&TransactionRecord> {
        self.records.front()
    }

    pub fn contains(&self, signature: &str) -> bool {
        self.records.iter().any(|r| r.signature == signature)
    }

    pub fn signatures(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.signature.as_str()).collect()
    }

    /// Merge a freshly fetched page (newest first).
    ///
    /// Meaningless records and signatures already present are dropped, the
    /// rest are prepended in their fetched order and the window is cut back
    /// to capacity. Returns how many records were added.
    pub fn merge(&mut self, fetched: Vec<TransactionRecord>) -> usize {
        let mut known: HashSet<String> = self.records.iter().map(|r| r.signature.clone()).collect();

        let fresh: Vec<TransactionRecord> = fetched
            .into_iter()
            .filter(TransactionRecord::is_meaningful)
            .filter(|r| known.insert(r.signature.clone()))
            .collect();
        let added = fresh.len();

        for record in fresh.into_iter().rev() {
            self.records.push_front(record);
        }
        self.records.truncate(self.capacity);
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TokenTransfer, TransactionKind};
    use proptest::prelude::*;

    fn tx(signature: &str) -> TransactionRecord {
        TransactionRecord {
            signature: signature.to_string(),
            timestamp: 1,
            fee: 5000,
            fee_payer: "payer".to_string(),
            kind: TransactionKind::Transfer,
            source: "SYSTEM_PROGRAM".to_string(),
            description: format!("transfer {}", signature),
            token_transfers: vec![TokenTransfer {
                from_user: "a".to_string(),
                to_user: "b".to_string(),
                mint: "m".to_string(),
                amount: 1.0,
            }],
            native_transfers: vec![],
        }
    }

    #[test]
    fn test_merge_prepends_new_in_order() {
        let mut window = TransactionWindow::new(50);
        window.merge(vec![tx("c"), tx("b"), tx("a")]);
        let added = window.merge(vec![tx("e"), tx("d"), tx("c")]);
        assert_eq!(added, 2);
        assert_eq!(window.signatures(), vec!["e", "d", "c", "b", "a"]);
    }

    #[test]
    fn test_merge_filters_meaningless() {
        let mut window = TransactionWindow::new(50);
        let mut unknown = tx("u");
        unknown.kind = TransactionKind::Unknown;
        let mut blank = tx("blank");
        blank.description = String::new();
        let mut empty = tx("empty");
        empty.token_transfers.clear();

        assert_eq!(window.merge(vec![unknown, blank, empty, tx("ok")]), 1);
        assert_eq!(window.signatures(), vec!["ok"]);
    }

    #[test]
    fn test_merge_dedups_within_page() {
        let mut window = TransactionWindow::new(50);
        assert_eq!(window.merge(vec![tx("a"), tx("a")]), 1);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_truncates_to_capacity_keeping_newest() {
        let mut window = TransactionWindow::new(3);
        window.merge(vec![tx("c"), tx("b"), tx("a")]);
        window.merge(vec![tx("e"), tx("d")]);
        assert_eq!(window.signatures(), vec!["e", "d", "c"]);
        assert_eq!(window.newest().map(|r| r.signature.as_str()), Some("e"));
    }

    #[test]
    fn test_no_change_when_everything_known() {
        let mut window = TransactionWindow::new(5);
        window.merge(vec![tx("b"), tx("a")]);
        let before = window.clone();
        assert_eq!(window.merge(vec![tx("b"), tx("a")]), 0);
        assert_eq!(window, before);
    }

    proptest! {
        #[test]
        fn prop_window_bounded_and_unique(
            pages in prop::collection::vec(prop::collection::vec(0u8..40, 0..15), 1..12),
            capacity in 1usize..60,
        ) {
            let mut window = TransactionWindow::new(capacity);
            for page in pages {
                let records = page.iter().map(|n| tx(&format!("s{}", n))).collect();
                window.merge(records);

                prop_assert!(window.len() <= capacity);
                let sigs = window.signatures();
                let unique: HashSet<&str> = sigs.iter().copied().collect();
                prop_assert_eq!(unique.len(), sigs.len());
            }
        }
    }
}
