// 📊 Report Assembler - filtered table, stable order, summary metrics

use crate::cell::format_number;
use crate::error::{CadenceError, Result};
use crate::period::ReportingPeriod;
use crate::rules::{CadenceCategory, ScoredRecord};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

/// Column order of the cadence report. The first column doubles as the
/// key column when the report is read back as next month's prior cadence.
pub const REPORT_COLUMNS: [&str; 19] = [
    "Combined Classes",
    "program",
    "Policies",
    "Parent Classes",
    "Child Classes",
    "Source",
    "Destination",
    "ARC",
    "risk score",
    "Resolved Date",
    "Root Cause",
    "NC Count",
    "Previous Cadence",
    "Previous Due Date",
    "Previous NC",
    "Cadence Score",
    "Due Date",
    "JSR",
    "Category",
];

const TOP_SOURCES: usize = 10;

// ============================================================================
// REPORT ROW
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub key: String,
    pub program: Option<String>,
    pub policies: Option<String>,
    pub parent_class: Option<String>,
    pub child_class: Option<String>,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub arc: Option<String>,
    pub risk_score: f64,
    pub resolved_date: Option<NaiveDate>,
    pub root_cause: Option<String>,
    pub nc_count: Option<f64>,
    pub previous_cadence: Option<f64>,
    pub previous_due_date: Option<NaiveDate>,
    pub previous_nc: Option<f64>,
    pub cadence_score: u32,
    pub due_date: Option<NaiveDate>,
    pub jsr: bool,
    pub category: CadenceCategory,
}

impl ReportRow {
    pub fn from_scored(scored: &ScoredRecord) -> Self {
        let merged = &scored.merged;
        let armt = merged.armt.as_ref();

        ReportRow {
            key: merged.key.clone(),
            program: merged.program(),
            policies: armt.map(|a| a.policies.clone()),
            parent_class: armt.map(|a| a.parent_class.clone()),
            child_class: armt.map(|a| a.child_class.clone()),
            source: armt.map(|a| a.source.clone()),
            destination: armt.map(|a| a.destination.clone()),
            arc: armt.and_then(|a| a.lane.clone()),
            risk_score: scored.risk_display,
            resolved_date: merged.resolved_date(),
            root_cause: merged.outflow.as_ref().map(|o| o.root_cause.clone()),
            nc_count: merged.nc_count(),
            previous_cadence: merged.previous_cadence(),
            previous_due_date: merged.previous_due_date(),
            previous_nc: merged.previous_nc(),
            cadence_score: scored.cadence_score,
            due_date: scored.due_date,
            jsr: scored.jsr,
            category: scored.category,
        }
    }

    /// Text cells in `REPORT_COLUMNS` order; absent values become `marker`
    pub fn cells(&self, marker: &str) -> Vec<String> {
        let text = |v: &Option<String>| v.clone().unwrap_or_else(|| marker.to_string());
        let number = |v: Option<f64>| v.map(format_number).unwrap_or_else(|| marker.to_string());
        let date = |v: Option<NaiveDate>| {
            v.map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| marker.to_string())
        };

        vec![
            self.key.clone(),
            text(&self.program),
            text(&self.policies),
            text(&self.parent_class),
            text(&self.child_class),
            text(&self.source),
            text(&self.destination),
            text(&self.arc),
            format_number(self.risk_score),
            date(self.resolved_date),
            text(&self.root_cause),
            number(self.nc_count),
            number(self.previous_cadence),
            date(self.previous_due_date),
            number(self.previous_nc),
            self.cadence_score.to_string(),
            date(self.due_date),
            if self.jsr { "Yes" } else { "No" }.to_string(),
            self.category.as_str().to_string(),
        ]
    }
}

// ============================================================================
// FILTER & SORT
// ============================================================================

/// Conjunction of optional criteria; empty lists match everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportFilter {
    pub sources: Vec<String>,
    pub programs: Vec<String>,
    pub jsr: Option<bool>,
    pub categories: Vec<CadenceCategory>,
    pub scores: Vec<u32>,
    pub min_score: Option<u32>,
    pub max_score: Option<u32>,
    pub keys: Option<BTreeSet<String>>,
}

impl ReportFilter {
    pub fn is_empty(&self) -> bool {
        self == &ReportFilter::default()
    }

    pub fn matches(&self, row: &ReportRow) -> bool {
        let in_list = |list: &[String], value: &Option<String>| {
            list.is_empty() || value.as_ref().map_or(false, |v| list.contains(v))
        };

        in_list(&self.sources, &row.source)
            && in_list(&self.programs, &row.program)
            && self.jsr.map_or(true, |j| j == row.jsr)
            && (self.categories.is_empty() || self.categories.contains(&row.category))
            && (self.scores.is_empty() || self.scores.contains(&row.cadence_score))
            && self.min_score.map_or(true, |m| row.cadence_score >= m)
            && self.max_score.map_or(true, |m| row.cadence_score <= m)
            && self.keys.as_ref().map_or(true, |k| k.contains(&row.key))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortOrder {
    #[default]
    Key,
    CadenceScore,
    /// Earliest due date first; rows without one go last
    DueDate,
}

impl SortOrder {
    fn compare(&self, a: &ReportRow, b: &ReportRow) -> Ordering {
        let primary = match self {
            SortOrder::Key => Ordering::Equal,
            SortOrder::CadenceScore => a.cadence_score.cmp(&b.cadence_score),
            SortOrder::DueDate => match (a.due_date, b.due_date) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        };
        primary.then_with(|| a.key.cmp(&b.key))
    }
}

impl FromStr for SortOrder {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "key" => Ok(SortOrder::Key),
            "score" | "cadence-score" => Ok(SortOrder::CadenceScore),
            "due" | "due-date" => Ok(SortOrder::DueDate),
            other => Err(CadenceError::Config(format!(
                "unknown sort order '{}' (key, score, due-date)",
                other
            ))),
        }
    }
}

// ============================================================================
// TABLE & SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportTable {
    pub node: String,
    pub period: ReportingPeriod,
    pub rule_set: String,
    pub rows: Vec<ReportRow>,
    /// Row count before filtering
    pub unfiltered: usize,
}

impl ReportTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceCount {
    pub source: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreStats {
    pub min: u32,
    pub max: u32,
    pub mean: f64,
    pub median: f64,
}

impl ScoreStats {
    fn from_scores(scores: &[u32]) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }
        let mut sorted = scores.to_vec();
        sorted.sort_unstable();

        let n = sorted.len();
        let mean = sorted.iter().map(|&s| s as f64).sum::<f64>() / n as f64;
        let median = if n % 2 == 1 {
            sorted[n / 2] as f64
        } else {
            (sorted[n / 2 - 1] as f64 + sorted[n / 2] as f64) / 2.0
        };

        Some(ScoreStats {
            min: sorted[0],
            max: sorted[n - 1],
            mean,
            median,
        })
    }
}

/// Dashboard numbers for one report table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryMetrics {
    pub node: String,
    pub period: ReportingPeriod,
    pub total_records: usize,
    pub unfiltered_records: usize,
    pub with_current_nc: usize,
    pub jsr_policies: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_cadence_score: BTreeMap<u32, usize>,
    pub by_risk_score: BTreeMap<String, usize>,
    pub top_sources: Vec<SourceCount>,
    pub score_stats: Option<ScoreStats>,
}

impl SummaryMetrics {
    pub fn from_table(table: &ReportTable) -> Self {
        let rows = &table.rows;

        let mut by_category: BTreeMap<String, usize> = CadenceCategory::ALL
            .iter()
            .map(|c| (c.as_str().to_string(), 0))
            .collect();
        let mut by_cadence_score = BTreeMap::new();
        let mut by_risk_score = BTreeMap::new();
        let mut sources: BTreeMap<&str, usize> = BTreeMap::new();

        for row in rows {
            *by_category.entry(row.category.as_str().to_string()).or_insert(0) += 1;
            *by_cadence_score.entry(row.cadence_score).or_insert(0) += 1;
            *by_risk_score.entry(format_number(row.risk_score)).or_insert(0) += 1;
            if let Some(source) = &row.source {
                *sources.entry(source.as_str()).or_insert(0) += 1;
            }
        }

        // Count descending, then name ascending (BTreeMap order is kept by the stable sort)
        let mut top_sources: Vec<SourceCount> = sources
            .into_iter()
            .map(|(source, count)| SourceCount {
                source: source.to_string(),
                count,
            })
            .collect();
        top_sources.sort_by(|a, b| b.count.cmp(&a.count));
        top_sources.truncate(TOP_SOURCES);

        let scores: Vec<u32> = rows.iter().map(|r| r.cadence_score).collect();

        SummaryMetrics {
            node: table.node.clone(),
            period: table.period,
            total_records: rows.len(),
            unfiltered_records: table.unfiltered,
            with_current_nc: rows.iter().filter(|r| r.nc_count.is_some()).count(),
            jsr_policies: rows.iter().filter(|r| r.jsr).count(),
            by_category,
            by_cadence_score,
            by_risk_score,
            top_sources,
            score_stats: ScoreStats::from_scores(&scores),
        }
    }
}

/// Sorted distinct values offered as filter choices
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterOptions {
    pub sources: Vec<String>,
    pub programs: Vec<String>,
    pub scores: Vec<u32>,
}

impl FilterOptions {
    pub fn from_rows(rows: &[ReportRow]) -> Self {
        let sources: BTreeSet<&String> = rows.iter().filter_map(|r| r.source.as_ref()).collect();
        let programs: BTreeSet<&String> = rows.iter().filter_map(|r| r.program.as_ref()).collect();
        let scores: BTreeSet<u32> = rows.iter().map(|r| r.cadence_score).collect();

        FilterOptions {
            sources: sources.into_iter().cloned().collect(),
            programs: programs.into_iter().cloned().collect(),
            scores: scores.into_iter().collect(),
        }
    }
}

/// Filter, sort and summarize scored records
pub fn assemble(
    scored: &[ScoredRecord],
    filter: &ReportFilter,
    sort: SortOrder,
    node: &str,
    period: ReportingPeriod,
) -> (ReportTable, SummaryMetrics) {
    let mut rows: Vec<ReportRow> = scored
        .iter()
        .map(ReportRow::from_scored)
        .filter(|row| filter.matches(row))
        .collect();
    rows.sort_by(|a, b| sort.compare(a, b));

    let table = ReportTable {
        node: node.to_string(),
        period,
        rule_set: scored
            .first()
            .map(|s| s.rule_set.clone())
            .unwrap_or_default(),
        rows,
        unfiltered: scored.len(),
    };
    let summary = SummaryMetrics::from_table(&table);

    (table, summary)
}

// ============================================================================
// TESTS
// ============================================================================
