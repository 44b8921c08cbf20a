// 🗂️ Entity Records - typed rows for each source and the merged entity
//
// Every optional value is an explicit `Option`: a missing outflow is
// "no outflow activity", never zero NC.

use crate::period::ReportingPeriod;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Policy program in the ARMT export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Program {
    AmazonGlobal,
    CrossListing,
}

impl Program {
    pub fn as_str(&self) -> &'static str {
        match self {
            Program::AmazonGlobal => "AmazonGlobal",
            Program::CrossListing => "CrossListing",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "AmazonGlobal" => Some(Program::AmazonGlobal),
            "CrossListing" => Some(Program::CrossListing),
            _ => None,
        }
    }
}

/// Records that carry an identity key and their spreadsheet row
pub trait Keyed {
    fn key(&self) -> &str;

    /// 1-based spreadsheet row (header is row 1)
    fn row(&self) -> usize;

    /// Fold a later duplicate into this record. Default keeps `self` as is.
    fn coalesce(&mut self, _other: &Self) {}
}

// ============================================================================
// ARMT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmtRecord {
    pub key: String,
    pub program: Program,
    pub policies: String,
    pub parent_class: String,
    pub child_class: String,
    pub source: String,
    pub destination: String,
    /// `<source>-<destination>`; absent for records keyed by child class
    pub lane: Option<String>,
    pub risk_score: Option<f64>,
    pub row: usize,
}

impl Keyed for ArmtRecord {
    fn key(&self) -> &str {
        &self.key
    }

    fn row(&self) -> usize {
        self.row
    }

    /// Distinct parent classes and policy names are comma-joined;
    /// everything else comes from the first occurrence.
    fn coalesce(&mut self, other: &Self) {
        self.parent_class = join_distinct(&self.parent_class, &other.parent_class);
        self.policies = join_distinct(&self.policies, &other.policies);
    }
}

fn join_distinct(existing: &str, incoming: &str) -> String {
    let mut parts: Vec<String> = existing
        .split(',')
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
        .collect();
    for part in incoming.split(',').filter(|s| !s.is_empty()) {
        if !parts.iter().any(|p| p == part) {
            parts.push(part.to_string());
        }
    }
    parts.join(",")
}

// ============================================================================
// PRIOR CADENCE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CadenceRecord {
    pub key: String,
    pub program: Option<String>,
    pub cadence_score: Option<f64>,
    pub due_date: Option<NaiveDate>,
    pub nc_count: Option<f64>,
    pub row: usize,
}

impl Keyed for CadenceRecord {
    fn key(&self) -> &str {
        &self.key
    }

    fn row(&self) -> usize {
        self.row
    }
}

// ============================================================================
// OUTFLOW
// ============================================================================

/// One resolved ticket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutflowRecord {
    pub key: String,
    /// Lane-level key the ticket also answers to (`parent,child,FR-US`)
    pub lane_key: Option<String>,
    pub parent_class: String,
    pub child_class: String,
    pub resolution: String,
    pub root_cause: String,
    pub resolved_date: Option<NaiveDate>,
    pub nc_units: f64,
    pub row: usize,
}

impl Keyed for OutflowRecord {
    fn key(&self) -> &str {
        &self.key
    }

    fn row(&self) -> usize {
        self.row
    }
}

/// All tickets sharing one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutflowAggregate {
    pub key: String,
    pub nc_count: f64,
    pub latest_resolved: Option<NaiveDate>,
    /// Root cause of the most recently resolved ticket
    pub root_cause: String,
    pub ticket_count: usize,
    /// Lane keys of the member tickets
    pub lane_keys: BTreeSet<String>,
    /// Member tickets without a lane key
    pub laneless_tickets: usize,
}

impl OutflowAggregate {
    pub fn from_ticket(key: &str, ticket: &OutflowRecord) -> Self {
        let mut aggregate = OutflowAggregate {
            key: key.to_string(),
            nc_count: 0.0,
            latest_resolved: None,
            root_cause: ticket.root_cause.clone(),
            ticket_count: 0,
            lane_keys: BTreeSet::new(),
            laneless_tickets: 0,
        };
        aggregate.add(ticket);
        aggregate
    }

    pub fn add(&mut self, ticket: &OutflowRecord) {
        self.nc_count += ticket.nc_units;
        self.ticket_count += 1;

        match &ticket.lane_key {
            Some(lane) => {
                self.lane_keys.insert(lane.clone());
            }
            None => self.laneless_tickets += 1,
        }

        // Strictly later only: ties keep the earlier row's root cause
        if ticket.resolved_date > self.latest_resolved {
            self.latest_resolved = ticket.resolved_date;
            self.root_cause = ticket.root_cause.clone();
        }
    }
}

// ============================================================================
// MERGED RECORD
// ============================================================================

/// Per-entity union of the three sources for one reporting period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub key: String,
    pub period: ReportingPeriod,
    pub armt: Option<ArmtRecord>,
    pub prior: Option<CadenceRecord>,
    pub outflow: Option<OutflowAggregate>,
}

impl MergedRecord {
    pub fn new(key: &str, period: ReportingPeriod) -> Self {
        MergedRecord {
            key: key.to_string(),
            period,
            armt: None,
            prior: None,
            outflow: None,
        }
    }

    pub fn risk_score(&self) -> Option<f64> {
        self.armt.as_ref().and_then(|a| a.risk_score)
    }

    /// Current-month NC (None = no outflow activity)
    pub fn nc_count(&self) -> Option<f64> {
        self.outflow.as_ref().map(|o| o.nc_count)
    }

    pub fn resolved_date(&self) -> Option<NaiveDate> {
        self.outflow.as_ref().and_then(|o| o.latest_resolved)
    }

    pub fn previous_cadence(&self) -> Option<f64> {
        self.prior.as_ref().and_then(|p| p.cadence_score)
    }

    pub fn previous_due_date(&self) -> Option<NaiveDate> {
        self.prior.as_ref().and_then(|p| p.due_date)
    }

    pub fn previous_nc(&self) -> Option<f64> {
        self.prior.as_ref().and_then(|p| p.nc_count)
    }

    /// Program from ARMT, falling back to the prior report
    pub fn program(&self) -> Option<String> {
        self.armt
            .as_ref()
            .map(|a| a.program.as_str().to_string())
            .or_else(|| self.prior.as_ref().and_then(|p| p.program.clone()))
    }

    pub fn policies(&self) -> Option<&str> {
        self.armt.as_ref().map(|a| a.policies.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(lane: Option<&str>, nc: f64, resolved: Option<(i32, u32, u32)>, cause: &str) -> OutflowRecord {
        OutflowRecord {
            key: "Weapons,Knives,FR".to_string(),
            lane_key: lane.map(|l| l.to_string()),
            parent_class: "Weapons".to_string(),
            child_class: "Knives".to_string(),
            resolution: "FR-US".to_string(),
            root_cause: cause.to_string(),
            resolved_date: resolved.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
            nc_units: nc,
            row: 2,
        }
    }

    #[test]
    fn test_aggregate_sums_and_tracks_latest() {
        let first = ticket(Some("Weapons,Knives,FR-US"), 3.0, Some((2025, 11, 2)), "Missed listing");
        let later = ticket(Some("Weapons,Knives,FR-DE"), 4.0, Some((2025, 11, 20)), "Wrong class");
        let undated = ticket(None, 1.0, None, "Unknown");

        let mut agg = OutflowAggregate::from_ticket("Weapons,Knives,FR", &first);
        agg.add(&later);
        agg.add(&undated);

        assert_eq!(agg.nc_count, 8.0);
        assert_eq!(agg.ticket_count, 3);
        assert_eq!(agg.latest_resolved, NaiveDate::from_ymd_opt(2025, 11, 20));
        assert_eq!(agg.root_cause, "Wrong class");
        assert_eq!(agg.lane_keys.len(), 2);
        assert_eq!(agg.laneless_tickets, 1);
    }

    #[test]
    fn test_armt_coalesce_joins_distinct() {
        let mut a = ArmtRecord {
            key: "Knives".to_string(),
            program: Program::AmazonGlobal,
            policies: "P1".to_string(),
            parent_class: "Weapons".to_string(),
            child_class: "Knives".to_string(),
            source: "DE".to_string(),
            destination: "SOME".to_string(),
            lane: None,
            risk_score: Some(3.0),
            row: 2,
        };
        let mut b = a.clone();
        b.policies = "P2".to_string();
        b.parent_class = "Weapons".to_string();
        b.risk_score = Some(5.0);

        a.coalesce(&b);
        assert_eq!(a.policies, "P1,P2");
        assert_eq!(a.parent_class, "Weapons");
        assert_eq!(a.risk_score, Some(3.0));
    }

    #[test]
    fn test_program_parse() {
        assert_eq!(Program::parse(" CrossListing "), Some(Program::CrossListing));
        assert_eq!(Program::parse("Retail"), None);
    }
}
