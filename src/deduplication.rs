// 🔍 Duplicate Key Resolution - one record per key per source file
// Four policies: keep first, keep last, reject, coalesce

use crate::error::{CadenceError, Result};
use crate::parser::SourceType;
use crate::records::Keyed;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

// ============================================================================
// POLICY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// First occurrence in file order wins
    #[default]
    KeepFirst,

    /// Last occurrence in file order wins
    KeepLast,

    /// Any repeated key fails the run with `DuplicateKey`
    Reject,

    /// Later occurrences are folded into the first (see `Keyed::coalesce`)
    Coalesce,
}

impl DuplicatePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicatePolicy::KeepFirst => "keep-first",
            DuplicatePolicy::KeepLast => "keep-last",
            DuplicatePolicy::Reject => "reject",
            DuplicatePolicy::Coalesce => "coalesce",
        }
    }
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// Outcome of resolving one source's duplicates
#[derive(Debug, Clone)]
pub struct Deduplicated<R> {
    /// Unique records, in order of first appearance
    pub records: Vec<R>,
    /// How many rows were dropped or folded
    pub duplicates: usize,
}

/// Apply `policy` so every key appears exactly once.
///
/// Output order is the order in which each key first appears, regardless
/// of which occurrence supplies the values.
pub fn resolve<R: Keyed>(
    records: Vec<R>,
    policy: DuplicatePolicy,
    source: SourceType,
) -> Result<Deduplicated<R>> {
    let mut unique: Vec<R> = Vec::with_capacity(records.len());
    let mut position: HashMap<String, usize> = HashMap::with_capacity(records.len());
    let mut duplicates = 0;

    for record in records {
        let existing = position.get(record.key()).copied();
        match existing {
            None => {
                position.insert(record.key().to_string(), unique.len());
                unique.push(record);
            }
            Some(idx) => {
                duplicates += 1;
                match policy {
                    DuplicatePolicy::KeepFirst => {}
                    DuplicatePolicy::KeepLast => unique[idx] = record,
                    DuplicatePolicy::Coalesce => unique[idx].coalesce(&record),
                    DuplicatePolicy::Reject => {
                        return Err(CadenceError::DuplicateKey {
                            input: source,
                            key: record.key().to_string(),
                            first_row: unique[idx].row(),
                            second_row: record.row(),
                        });
                    }
                }
            }
        }
    }

    if duplicates > 0 {
        debug!(
            "{}: resolved {} duplicate key rows with policy {}",
            source,
            duplicates,
            policy.as_str()
        );
    }

    Ok(Deduplicated {
        records: unique,
        duplicates,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        key: String,
        value: String,
        row: usize,
    }

    impl Keyed for Row {
        fn key(&self) -> &str {
            &self.key
        }

        fn row(&self) -> usize {
            self.row
        }

        fn coalesce(&mut self, other: &Self) {
            self.value = format!("{}+{}", self.value, other.value);
        }
    }

    fn rows() -> Vec<Row> {
        vec![
            Row { key: "A".into(), value: "a1".into(), row: 2 },
            Row { key: "B".into(), value: "b1".into(), row: 3 },
            Row { key: "A".into(), value: "a2".into(), row: 4 },
        ]
    }

    #[test]
    fn test_keep_first() {
        let out = resolve(rows(), DuplicatePolicy::KeepFirst, SourceType::Armt).unwrap();
        assert_eq!(out.duplicates, 1);
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].value, "a1");
        assert_eq!(out.records[1].key, "B");
    }

    #[test]
    fn test_keep_last_preserves_first_position() {
        let out = resolve(rows(), DuplicatePolicy::KeepLast, SourceType::Armt).unwrap();
        assert_eq!(out.records[0].key, "A");
        assert_eq!(out.records[0].value, "a2");
        assert_eq!(out.records[1].key, "B");
    }

    #[test]
    fn test_coalesce() {
        let out = resolve(rows(), DuplicatePolicy::Coalesce, SourceType::Armt).unwrap();
        assert_eq!(out.records[0].value, "a1+a2");
    }

    #[test]
    fn test_reject_reports_both_rows() {
        let err = resolve(rows(), DuplicatePolicy::Reject, SourceType::Cadence).unwrap_err();
        match err {
            CadenceError::DuplicateKey { input, key, first_row, second_row } => {
                assert_eq!(input, SourceType::Cadence);
                assert_eq!(key, "A");
                assert_eq!(first_row, 2);
                assert_eq!(second_row, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_no_duplicates_untouched() {
        let input = vec![Row { key: "Z".into(), value: "z".into(), row: 2 }];
        let out = resolve(input.clone(), DuplicatePolicy::Reject, SourceType::Outflow).unwrap();
        assert_eq!(out.records, input);
        assert_eq!(out.duplicates, 0);
    }
}
