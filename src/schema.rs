// 📐 Shape Layer - required column schemas per source
// A sheet is checked against its schema before a single row is read.

use crate::config::KeyScheme;
use crate::error::{CadenceError, Result};
use crate::parser::SourceType;

// ============================================================================
// COLUMN NAMES
// ============================================================================

pub mod armt {
    pub const PROGRAM: &str = "program";
    pub const SOURCE_COUNTRY: &str = "source_country";
    pub const DESTINATION_COUNTRY: &str = "include_destination_country";
    pub const PARENT_CLASS: &str = "parent_class";
    pub const CHILD_CLASS: &str = "child_class";
    pub const POLICY_NAME: &str = "policy_name";
    pub const PARENT_SCORE: &str = "parent_score";
}

pub mod cadence {
    pub const COMBINED_CLASSES: &str = "Combined Classes";
    pub const PARENT_CLASSES: &str = "Parent Classes";
    pub const CHILD_CLASSES: &str = "Child Classes";
    pub const SOURCE: &str = "Source";
    pub const ARC: &str = "ARC";
    pub const PROGRAM: &str = "program";
    pub const CADENCE_SCORE: &str = "Cadence Score";
    pub const DUE_DATE: &str = "Due Date";
    pub const NC_COUNT: &str = "NC Count";
    /// Key column of child-class reports
    pub const CHILD_CLASS: &str = "child_class";
}

pub mod outflow {
    pub const ROOT_CAUSE: &str = "root_cause";
    pub const ROOT_CAUSE_DETAILS: &str = "root_cause_details";
    pub const SHORT_DESCRIPTION: &str = "short_description";
    pub const RESOLVED_DATE: &str = "resolved_date";
    pub const RESOLUTION: &str = "resolution";
    pub const QUANTITY: &str = "quantity";
    pub const VENDOR_ID: &str = "vendor_id";
    pub const ASSIGNED_TO_GROUP: &str = "assigned_to_group";
}

// ============================================================================
// SCHEMA
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRequirement {
    /// Column must be present
    Column(&'static str),
    /// At least one group must be fully present
    AnyOf(Vec<Vec<&'static str>>),
}

#[derive(Debug, Clone)]
pub struct SourceSchema {
    pub source: SourceType,
    pub required: Vec<ColumnRequirement>,
    pub optional: Vec<&'static str>,
}

impl SourceSchema {
    pub fn armt() -> Self {
        SourceSchema {
            source: SourceType::Armt,
            required: [
                armt::PROGRAM,
                armt::SOURCE_COUNTRY,
                armt::DESTINATION_COUNTRY,
                armt::PARENT_CLASS,
                armt::CHILD_CLASS,
                armt::POLICY_NAME,
                armt::PARENT_SCORE,
            ]
            .into_iter()
            .map(ColumnRequirement::Column)
            .collect(),
            optional: vec![],
        }
    }

    pub fn cadence(scheme: KeyScheme) -> Self {
        let key_columns = match scheme {
            KeyScheme::ClassLane => ColumnRequirement::AnyOf(vec![
                vec![cadence::COMBINED_CLASSES],
                vec![cadence::PARENT_CLASSES, cadence::CHILD_CLASSES, cadence::SOURCE],
            ]),
            KeyScheme::ChildClass => ColumnRequirement::AnyOf(vec![
                vec![cadence::COMBINED_CLASSES],
                vec![cadence::CHILD_CLASS],
            ]),
        };

        SourceSchema {
            source: SourceType::Cadence,
            required: vec![
                key_columns,
                ColumnRequirement::Column(cadence::CADENCE_SCORE),
                ColumnRequirement::Column(cadence::DUE_DATE),
            ],
            optional: vec![cadence::ARC, cadence::PROGRAM, cadence::NC_COUNT],
        }
    }

    pub fn outflow() -> Self {
        SourceSchema {
            source: SourceType::Outflow,
            required: [
                outflow::ROOT_CAUSE,
                outflow::ROOT_CAUSE_DETAILS,
                outflow::SHORT_DESCRIPTION,
                outflow::RESOLVED_DATE,
                outflow::RESOLUTION,
                outflow::QUANTITY,
                outflow::VENDOR_ID,
            ]
            .into_iter()
            .map(ColumnRequirement::Column)
            .collect(),
            optional: vec![outflow::ASSIGNED_TO_GROUP],
        }
    }

    /// First required column absent from `headers`, if any.
    ///
    /// For `AnyOf` requirements the reported column comes from the last
    /// alternative, which is the most explicit one.
    pub fn first_missing(&self, headers: &[String]) -> Option<&'static str> {
        let has = |name: &str| headers.iter().any(|h| h == name);

        for requirement in &self.required {
            match requirement {
                ColumnRequirement::Column(name) => {
                    if !has(name) {
                        return Some(*name);
                    }
                }
                ColumnRequirement::AnyOf(groups) => {
                    let satisfied = groups.iter().any(|g| g.iter().all(|c| has(c)));
                    if !satisfied {
                        if let Some(last) = groups.last() {
                            if let Some(missing) = last.iter().find(|c| !has(c)) {
                                return Some(*missing);
                            }
                        }
                    }
                }
            }
        }

        None
    }

    /// All required columns absent from `headers`
    pub fn missing_columns(&self, headers: &[String]) -> Vec<&'static str> {
        let has = |name: &str| headers.iter().any(|h| h == name);
        let mut missing = Vec::new();

        for requirement in &self.required {
            match requirement {
                ColumnRequirement::Column(name) => {
                    if !has(name) {
                        missing.push(*name);
                    }
                }
                ColumnRequirement::AnyOf(groups) => {
                    if !groups.iter().any(|g| g.iter().all(|c| has(c))) {
                        if let Some(last) = groups.last() {
                            missing.extend(last.iter().filter(|c| !has(c)));
                        }
                    }
                }
            }
        }

        missing
    }

    pub fn validate(&self, headers: &[String]) -> Result<()> {
        match self.first_missing(headers) {
            Some(column) => Err(CadenceError::missing_column(self.source, column)),
            None => Ok(()),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
