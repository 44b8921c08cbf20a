//! Error taxonomy for a cadence run
//!
//! Every error aborts the whole run: no partial report is ever produced.

use crate::parser::SourceType;
use std::fmt;
use thiserror::Error;

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, CadenceError>;

/// What exactly is wrong with a malformed input file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Malformation {
    /// A required header is missing or misnamed
    MissingColumn(String),
    /// The workbook has no sheets at all
    NoSheets,
    /// The file extension is not one we can read
    UnsupportedFormat(String),
    /// The bytes could not be decoded (corrupt workbook, bad CSV, ...)
    Unreadable(String),
}

impl fmt::Display for Malformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Malformation::MissingColumn(column) => {
                write!(f, "missing required column '{}'", column)
            }
            Malformation::NoSheets => write!(f, "workbook contains no sheets"),
            Malformation::UnsupportedFormat(ext) => {
                write!(f, "unsupported file format '{}'", ext)
            }
            Malformation::Unreadable(reason) => write!(f, "unreadable file: {}", reason),
        }
    }
}

#[derive(Error, Debug)]
pub enum CadenceError {
    #[error("{input} file is malformed: {problem}")]
    MalformedInput {
        input: SourceType,
        problem: Malformation,
    },

    #[error("{input} file has duplicate key '{key}' (rows {first_row} and {second_row})")]
    DuplicateKey {
        input: SourceType,
        key: String,
        first_row: usize,
        second_row: usize,
    },

    #[error("{input} file yields no records")]
    EmptyInput { input: SourceType },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid output month '{0}' (expected YYYY-MM or '<Month> <year>')")]
    InvalidPeriod(String),

    #[error("export failed: {0}")]
    Export(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CadenceError {
    pub fn missing_column(input: SourceType, column: &str) -> Self {
        CadenceError::MalformedInput {
            input,
            problem: Malformation::MissingColumn(column.to_string()),
        }
    }

    pub fn unreadable(input: SourceType, reason: impl fmt::Display) -> Self {
        CadenceError::MalformedInput {
            input,
            problem: Malformation::Unreadable(reason.to_string()),
        }
    }

    /// The input file this error is about, when it is about one
    pub fn input(&self) -> Option<SourceType> {
        match self {
            CadenceError::MalformedInput { input, .. }
            | CadenceError::DuplicateKey { input, .. }
            | CadenceError::EmptyInput { input } => Some(*input),
            _ => None,
        }
    }

    /// Name of the missing column for `MalformedInput` errors
    pub fn missing_column_name(&self) -> Option<&str> {
        match self {
            CadenceError::MalformedInput {
                problem: Malformation::MissingColumn(column),
                ..
            } => Some(column),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_column_message_names_column() {
        let err = CadenceError::missing_column(SourceType::Outflow, "root_cause");
        assert_eq!(
            err.to_string(),
            "Outflow file is malformed: missing required column 'root_cause'"
        );
        assert_eq!(err.missing_column_name(), Some("root_cause"));
        assert_eq!(err.input(), Some(SourceType::Outflow));
    }

    #[test]
    fn test_duplicate_key_message() {
        let err = CadenceError::DuplicateKey {
            input: SourceType::Armt,
            key: "Weapons,Knives,US".to_string(),
            first_row: 2,
            second_row: 7,
        };
        assert_eq!(
            err.to_string(),
            "ARMT file has duplicate key 'Weapons,Knives,US' (rows 2 and 7)"
        );
        assert_eq!(err.missing_column_name(), None);
    }
}
