//! The `process` entry point: load, merge, score, assemble
//!
//! One run is a linear transform over owned inputs. Either every stage
//! succeeds and a complete report comes back, or the first error is
//! returned and nothing is produced.

use crate::config::CadenceConfig;
use crate::error::{CadenceError, Result};
use crate::merge::{self, MergeStats};
use crate::parser::{
    ArmtParser, CadenceParser, InputFile, LoadStats, OutflowParser, SheetParser, SourceType,
};
use crate::period::ReportingPeriod;
use crate::export::SourceSheets;
use crate::records::{ArmtRecord, CadenceRecord};
use crate::report::{self, FilterOptions, ReportFilter, ReportTable, SortOrder, SummaryMetrics};
use crate::rules::{self, RuleRegistry, ScoredRecord};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// The three input files of one run
#[derive(Debug, Clone)]
pub struct RunInputs {
    pub armt: InputFile,
    pub prior_cadence: InputFile,
    pub outflow: InputFile,
}

impl RunInputs {
    pub fn from_paths(armt: &Path, prior_cadence: &Path, outflow: &Path) -> Result<Self> {
        Ok(RunInputs {
            armt: InputFile::from_path(armt)?,
            prior_cadence: InputFile::from_path(prior_cadence)?,
            outflow: InputFile::from_path(outflow)?,
        })
    }
}

/// How the scored records are presented
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportView {
    pub filter: ReportFilter,
    pub sort: SortOrder,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub armt: LoadStats,
    pub prior_cadence: LoadStats,
    pub outflow: LoadStats,
    pub merge: MergeStats,
}

/// Everything one run produced
#[derive(Debug, Clone)]
pub struct CadenceRun {
    pub node: String,
    pub period: ReportingPeriod,
    pub report: ReportTable,
    pub summary: SummaryMetrics,
    /// Unfiltered scored records, in key order
    pub scored: Vec<ScoredRecord>,
    /// Selected ARMT records, for the ARMT exports
    pub armt_records: Vec<ArmtRecord>,
    /// Prior cadence records as read, for the Master exports
    pub prior_records: Vec<CadenceRecord>,
    pub stats: RunStats,
}

impl CadenceRun {
    /// Re-filter and re-sort without recomputing scores
    pub fn reassemble(&self, view: &ReportView) -> (ReportTable, SummaryMetrics) {
        report::assemble(&self.scored, &view.filter, view.sort, &self.node, self.period)
    }

    pub fn source_sheets(&self) -> SourceSheets<'_> {
        SourceSheets {
            armt: &self.armt_records,
            master: &self.prior_records,
        }
    }

    pub fn filter_options(&self) -> FilterOptions {
        let (table, _) = self.reassemble(&ReportView::default());
        FilterOptions::from_rows(&table.rows)
    }
}

/// Compute the cadence report for `period` with the active node profile
pub fn process(
    inputs: &RunInputs,
    period: ReportingPeriod,
    config: &CadenceConfig,
    view: &ReportView,
) -> Result<CadenceRun> {
    let profile = config.active_profile()?;
    let registry = RuleRegistry::with_builtin(&config.ladder);
    let rule_set = registry.get(&config.rule_set)?;

    info!(
        "🚀 {} cadence for {} (rule set {}, key scheme {})",
        profile.name,
        period,
        rule_set.name(),
        profile.key_scheme.as_str()
    );

    // 1. Load
    let armt = ArmtParser::new(profile).parse(&inputs.armt, &config.sheet_name)?;
    if armt.records.is_empty() {
        return Err(CadenceError::EmptyInput {
            input: SourceType::Armt,
        });
    }
    let prior = CadenceParser::new(profile).parse(&inputs.prior_cadence, &config.sheet_name)?;
    info!(
        "Prior cadence {} taken as the {} report",
        inputs.prior_cadence.name,
        period.previous()
    );
    let outflow = OutflowParser::new(profile).parse(&inputs.outflow, &config.sheet_name)?;

    // 2. Merge
    let armt_records = armt.records.clone();
    let prior_records = prior.records.clone();
    let (merged, merge_stats) = merge::merge(armt.records, prior.records, &outflow.records, period);

    // 3. Score
    let scored = rules::score_all(rule_set, merged);
    info!("Scored {} entities", scored.len());

    // 4. Assemble
    let (report, summary) =
        report::assemble(&scored, &view.filter, view.sort, &profile.name, period);
    info!(
        "✅ Report ready: {} rows ({} before filters)",
        report.len(),
        report.unfiltered
    );

    Ok(CadenceRun {
        node: profile.name.clone(),
        period,
        report,
        summary,
        scored,
        armt_records,
        prior_records,
        stats: RunStats {
            armt: armt.stats,
            prior_cadence: prior.stats,
            outflow: outflow.stats,
            merge: merge_stats,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARMT: &str = "program,source_country,include_destination_country,parent_class,child_class,policy_name,parent_score\n\
                        AmazonGlobal,US,SOME,Weapons,Knives,KNIFE_JSR,3\n";
    const MASTER: &str = "Combined Classes,Cadence Score,Due Date,NC Count\n\
                          \"Weapons,Knives,US\",90,2025-12-01,2\n";
    const OUTFLOW: &str = "root_cause,root_cause_details,short_description,resolved_date,resolution,quantity,vendor_id\n\
                           Missed,Weapons\\x,Knives: a,2025-11-10,US-DE,12,0\n";

    fn inputs(armt: &str) -> RunInputs {
        RunInputs {
            armt: InputFile::new("armt.csv", armt.as_bytes().to_vec()),
            prior_cadence: InputFile::new("master.csv", MASTER.as_bytes().to_vec()),
            outflow: InputFile::new("outflow.csv", OUTFLOW.as_bytes().to_vec()),
        }
    }

    fn period() -> ReportingPeriod {
        ReportingPeriod::new(2025, 12).unwrap()
    }

    #[test]
    fn test_process_scores_breach() {
        let run = process(&inputs(ARMT), period(), &CadenceConfig::default(), &ReportView::default())
            .unwrap();

        assert_eq!(run.report.len(), 1);
        let row = &run.report.rows[0];
        assert_eq!(row.key, "Weapons,Knives,US");
        assert_eq!(row.nc_count, Some(12.0));
        assert_eq!(row.cadence_score, 60);
        assert!(row.jsr);
        assert_eq!(run.stats.merge.entities, 1);
        assert_eq!(run.prior_records.len(), 1);
        assert_eq!(run.source_sheets().master[0].cadence_score, Some(90.0));
        assert_eq!(run.node, "BLR");
    }

    #[test]
    fn test_empty_armt_is_error() {
        let header_only = "program,source_country,include_destination_country,parent_class,child_class,policy_name,parent_score\n";
        let err = process(&inputs(header_only), period(), &CadenceConfig::default(), &ReportView::default())
            .unwrap_err();
        assert!(matches!(err, CadenceError::EmptyInput { input: SourceType::Armt }));
    }

    #[test]
    fn test_unknown_rule_set_is_config_error() {
        let config = CadenceConfig {
            rule_set: "coin-flip".to_string(),
            ..Default::default()
        };
        let err = process(&inputs(ARMT), period(), &config, &ReportView::default()).unwrap_err();
        assert!(matches!(err, CadenceError::Config(_)));
    }

    #[test]
    fn test_reassemble_applies_new_view() {
        let run = process(&inputs(ARMT), period(), &CadenceConfig::default(), &ReportView::default())
            .unwrap();
        let view = ReportView {
            filter: ReportFilter {
                jsr: Some(false),
                ..Default::default()
            },
            sort: SortOrder::Key,
        };
        let (table, summary) = run.reassemble(&view);
        assert!(table.is_empty());
        assert_eq!(summary.unfiltered_records, 1);
        assert_eq!(run.filter_options().scores, vec![60]);
    }
}
