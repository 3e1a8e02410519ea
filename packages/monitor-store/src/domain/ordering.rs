//! Ordering of records as exposed to consumers
//!
//! The store imposes no order on storage enumeration; views are sorted with
//! one of these comparators.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::models::RecordSummary;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Capture time descending
    #[default]
    NewestFirst,
    /// Capture time ascending
    OldestFirst,
    /// By display name, ties broken by id
    Alphabetical,
}

impl SortOrder {
    pub fn compare(&self, a: &RecordSummary, b: &RecordSummary) -> Ordering {
        match self {
            SortOrder::NewestFirst => b
                .timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.id.cmp(&a.id)),
            SortOrder::OldestFirst => a
                .timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.id.cmp(&b.id)),
            SortOrder::Alphabetical => a
                .display_name
                .cmp(&b.display_name)
                .then_with(|| a.id.cmp(&b.id)),
        }
    }

    pub fn sort(&self, summaries: &mut [RecordSummary]) {
        summaries.sort_by(|a, b| self.compare(a, b));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Partition, TransactionRecord};

    fn summaries() -> Vec<RecordSummary> {
        vec![
            TransactionRecord::new("1700000000002", "GET", "/b", "localhost", 80)
                .summary(Partition::Current),
            TransactionRecord::new("1700000000001", "POST", "/a", "localhost", 80)
                .summary(Partition::Current),
            TransactionRecord::new("1700000000003", "GET", "/a", "localhost", 80)
                .summary(Partition::Current),
        ]
    }

    fn ids(summaries: &[RecordSummary]) -> Vec<&str> {
        summaries.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn test_newest_first() {
        let mut list = summaries();
        SortOrder::NewestFirst.sort(&mut list);
        assert_eq!(
            ids(&list),
            vec!["1700000000003", "1700000000002", "1700000000001"]
        );
    }

    #[test]
    fn test_oldest_first() {
        let mut list = summaries();
        SortOrder::OldestFirst.sort(&mut list);
        assert_eq!(
            ids(&list),
            vec!["1700000000001", "1700000000002", "1700000000003"]
        );
    }

    #[test]
    fn test_alphabetical() {
        let mut list = summaries();
        SortOrder::Alphabetical.sort(&mut list);
        // "GET /a" < "GET /b" < "POST /a"
        assert_eq!(
            ids(&list),
            vec!["1700000000003", "1700000000002", "1700000000001"]
        );
    }

    #[test]
    fn test_default_is_newest_first() {
        assert_eq!(SortOrder::default(), SortOrder::NewestFirst);
    }
}
