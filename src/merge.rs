// 🔗 Record Merger - outer join of the three sources on the entity key
//
// Every key of every source appears exactly once. Outflow joins by key
// first, then by lane alias; outflow keys that join nothing become their
// own entity.

use crate::period::ReportingPeriod;
use crate::records::{ArmtRecord, CadenceRecord, MergedRecord, OutflowAggregate, OutflowRecord};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

// ============================================================================
// OUTFLOW INDEX
// ============================================================================

/// Outflow tickets aggregated two ways: by key and by lane alias
#[derive(Debug, Clone, Default)]
pub struct OutflowIndex {
    pub by_key: BTreeMap<String, OutflowAggregate>,
    pub by_lane: BTreeMap<String, OutflowAggregate>,
}

impl OutflowIndex {
    pub fn build(tickets: &[OutflowRecord]) -> Self {
        let mut index = OutflowIndex::default();

        for ticket in tickets {
            index
                .by_key
                .entry(ticket.key.clone())
                .and_modify(|agg| agg.add(ticket))
                .or_insert_with(|| OutflowAggregate::from_ticket(&ticket.key, ticket));

            if let Some(lane) = &ticket.lane_key {
                index
                    .by_lane
                    .entry(lane.clone())
                    .and_modify(|agg| agg.add(ticket))
                    .or_insert_with(|| OutflowAggregate::from_ticket(lane, ticket));
            }
        }

        index
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

// ============================================================================
// MERGE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub entities: usize,
    pub armt_keys: usize,
    pub prior_keys: usize,
    /// Entities present in both ARMT and the prior report
    pub matched_prior: usize,
    pub outflow_by_key: usize,
    pub outflow_by_lane: usize,
    /// Entities formed from outflow alone
    pub outflow_only: usize,
}

/// Outer-join the sources into one merged record per key, in key order
pub fn merge(
    armt: Vec<ArmtRecord>,
    prior: Vec<CadenceRecord>,
    outflow: &[OutflowRecord],
    period: ReportingPeriod,
) -> (Vec<MergedRecord>, MergeStats) {
    let mut stats = MergeStats {
        armt_keys: armt.len(),
        prior_keys: prior.len(),
        ..Default::default()
    };

    let mut entities: BTreeMap<String, MergedRecord> = BTreeMap::new();

    for record in armt {
        let key = record.key.clone();
        entities
            .entry(key.clone())
            .or_insert_with(|| MergedRecord::new(&key, period))
            .armt = Some(record);
    }

    for record in prior {
        let key = record.key.clone();
        let entity = entities
            .entry(key.clone())
            .or_insert_with(|| MergedRecord::new(&key, period));
        if entity.armt.is_some() {
            stats.matched_prior += 1;
        }
        entity.prior = Some(record);
    }

    let index = OutflowIndex::build(outflow);
    let mut used_keys: BTreeSet<&str> = BTreeSet::new();

    for entity in entities.values_mut() {
        if let Some(agg) = index.by_key.get(&entity.key) {
            entity.outflow = Some(agg.clone());
            used_keys.insert(agg.key.as_str());
            stats.outflow_by_key += 1;
        } else if let Some(agg) = index.by_lane.get(&entity.key) {
            entity.outflow = Some(agg.clone());
            stats.outflow_by_lane += 1;
        }
    }

    // Every outflow key is an entity of its own, even when its lanes joined
    for (key, agg) in &index.by_key {
        if used_keys.contains(key.as_str()) {
            continue;
        }

        debug!(
            "Outflow key '{}' joins no policy ({} lanes, {} laneless tickets), kept as its own entity",
            key,
            agg.lane_keys.len(),
            agg.laneless_tickets
        );
        let mut entity = MergedRecord::new(key, period);
        entity.outflow = Some(agg.clone());
        entities.insert(key.clone(), entity);
        stats.outflow_only += 1;
    }

    stats.entities = entities.len();
    info!(
        "Merged {} entities ({} ARMT, {} prior, {} outflow-only)",
        stats.entities, stats.armt_keys, stats.prior_keys, stats.outflow_only
    );

    (entities.into_values().collect(), stats)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Program;
    use chrono::NaiveDate;

    fn period() -> ReportingPeriod {
        ReportingPeriod::new(2025, 12).unwrap()
    }

    fn armt(key: &str) -> ArmtRecord {
        ArmtRecord {
            key: key.to_string(),
            program: Program::CrossListing,
            policies: "P".to_string(),
            parent_class: "Weapons".to_string(),
            child_class: "Knives".to_string(),
            source: "US".to_string(),
            destination: "DE".to_string(),
            lane: Some("US-DE".to_string()),
            risk_score: Some(2.0),
            row: 2,
        }
    }

    fn prior(key: &str) -> CadenceRecord {
        CadenceRecord {
            key: key.to_string(),
            program: None,
            cadence_score: Some(60.0),
            due_date: None,
            nc_count: None,
            row: 2,
        }
    }

    fn ticket(key: &str, lane: Option<&str>, nc: f64) -> OutflowRecord {
        OutflowRecord {
            key: key.to_string(),
            lane_key: lane.map(|l| l.to_string()),
            parent_class: "Weapons".to_string(),
            child_class: "Knives".to_string(),
            resolution: "US-DE".to_string(),
            root_cause: "Missed".to_string(),
            resolved_date: NaiveDate::from_ymd_opt(2025, 11, 3),
            nc_units: nc,
            row: 2,
        }
    }

    #[test]
    fn test_outer_join_example() {
        let (merged, stats) = merge(
            vec![armt("A"), armt("B")],
            vec![prior("A"), prior("C")],
            &[ticket("B", None, 2.0)],
            period(),
        );

        let keys: Vec<&str> = merged.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["A", "B", "C"]);

        let a = &merged[0];
        assert!(a.armt.is_some() && a.prior.is_some() && a.outflow.is_none());

        let b = &merged[1];
        assert!(b.prior.is_none());
        assert_eq!(b.nc_count(), Some(2.0));

        let c = &merged[2];
        assert!(c.armt.is_none() && c.outflow.is_none());
        assert!(c.prior.is_some());

        assert_eq!(stats.entities, 3);
        assert_eq!(stats.matched_prior, 1);
        assert_eq!(stats.outflow_only, 0);
    }

    #[test]
    fn test_lane_alias_join_keeps_outflow_key() {
        let (merged, stats) = merge(
            vec![armt("Weapons,Knives,US-DE")],
            vec![],
            &[
                ticket("Weapons,Knives,US", Some("Weapons,Knives,US-DE"), 3.0),
                ticket("Weapons,Knives,US", Some("Weapons,Knives,US-DE"), 4.0),
            ],
            period(),
        );

        let keys: Vec<&str> = merged.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["Weapons,Knives,US", "Weapons,Knives,US-DE"]);
        assert!(merged[0].armt.is_none());
        assert_eq!(merged[0].nc_count(), Some(7.0));
        assert_eq!(merged[1].nc_count(), Some(7.0));
        assert!(merged[1].armt.is_some());
        assert_eq!(stats.outflow_by_lane, 1);
        assert_eq!(stats.outflow_only, 1);
    }

    #[test]
    fn test_every_input_key_appears_once() {
        let tickets = [
            ticket("Weapons,Knives,US", Some("Weapons,Knives,US-DE"), 1.0),
            ticket("Toys,Lasers,UK", None, 2.0),
            ticket("A", None, 1.0),
        ];
        let (merged, _) = merge(
            vec![armt("A"), armt("Weapons,Knives,US-DE")],
            vec![prior("A"), prior("C")],
            &tickets,
            period(),
        );

        let keys: BTreeSet<&str> = merged.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys.len(), merged.len());
        let expected: BTreeSet<&str> = ["A", "C", "Weapons,Knives,US-DE"]
            .into_iter()
            .chain(tickets.iter().map(|t| t.key.as_str()))
            .collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_unjoined_outflow_forms_entity() {
        let (merged, stats) = merge(
            vec![armt("Weapons,Knives,US-DE")],
            vec![],
            &[
                ticket("Weapons,Knives,US", Some("Weapons,Knives,US-DE"), 1.0),
                ticket("Weapons,Knives,US", Some("Weapons,Knives,US-FR"), 5.0),
                ticket("Toys,Lasers,UK", None, 2.0),
            ],
            period(),
        );

        let keys: Vec<&str> = merged.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["Toys,Lasers,UK", "Weapons,Knives,US", "Weapons,Knives,US-DE"]);
        assert_eq!(merged[1].nc_count(), Some(6.0));
        assert!(merged[1].armt.is_none());
        assert_eq!(merged[2].nc_count(), Some(1.0));
        assert_eq!(stats.outflow_only, 2);
    }

    #[test]
    fn test_no_outflow() {
        let (merged, _) = merge(vec![armt("A")], vec![], &[], period());
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].nc_count(), None);
    }
}
