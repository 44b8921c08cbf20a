// 🪜 Cadence Rules - Rules as Data
// Scoring is a named, swappable rule set; ladder parameters live in config.

use crate::error::{CadenceError, Result};
use crate::records::MergedRecord;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Default rule set: risk base score adjusted by NC history
pub const RISK_LADDER: &str = "risk-ladder";

/// Base score from risk only, no NC history
pub const RISK_ONLY: &str = "risk-only";

// ============================================================================
// LADDER PARAMETERS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderLevel {
    /// Cadence in days
    pub days: u32,

    /// NC count at or above which the level is breached
    pub breach_threshold: f64,

    /// Due date offset used instead of `days` when breached
    pub breach_due_days: u32,

    /// Risks that never step up from this level
    #[serde(default)]
    pub hold_risks: Vec<u32>,

    /// When set, only these risks step up from this level
    #[serde(default)]
    pub relax_risks: Option<Vec<u32>>,
}

impl LadderLevel {
    fn new(days: u32, breach_threshold: f64, breach_due_days: u32) -> Self {
        LadderLevel {
            days,
            breach_threshold,
            breach_due_days,
            hold_risks: vec![],
            relax_risks: None,
        }
    }

    fn is_breached(&self, nc: f64) -> bool {
        nc >= self.breach_threshold
    }

    fn allows_relax(&self, risk: u32) -> bool {
        let gated_in = self.relax_risks.as_ref().map_or(true, |r| r.contains(&risk));
        gated_in && !self.hold_risks.contains(&risk)
    }

    /// Days from the resolved date to the next audit
    fn due_days(&self, nc: f64) -> u32 {
        if self.is_breached(nc) {
            self.breach_due_days
        } else {
            self.days
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskMapping {
    pub risk: u32,
    pub days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LadderConfig {
    /// Ordered from tightest to loosest cadence
    pub levels: Vec<LadderLevel>,
    pub risk_to_cadence: Vec<RiskMapping>,
    /// Base score for risks missing from `risk_to_cadence`
    pub default_days: u32,
    /// Risk assumed when the ARMT record has none
    pub default_risk: u32,
}

impl Default for LadderConfig {
    fn default() -> Self {
        let mut ninety = LadderLevel::new(90, 10.0, 60);
        ninety.relax_risks = Some(vec![4, 5]);
        let mut one_eighty = LadderLevel::new(180, 15.0, 90);
        one_eighty.hold_risks = vec![4];

        LadderConfig {
            levels: vec![
                LadderLevel::new(30, 10.0, 30),
                LadderLevel::new(60, 10.0, 30),
                ninety,
                one_eighty,
                LadderLevel::new(365, 15.0, 180),
            ],
            risk_to_cadence: [(0, 30), (1, 30), (2, 60), (3, 90), (4, 180), (5, 365)]
                .into_iter()
                .map(|(risk, days)| RiskMapping { risk, days })
                .collect(),
            default_days: 30,
            default_risk: 1,
        }
    }
}

impl LadderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.levels.is_empty() {
            return Err(CadenceError::Config("ladder needs at least one level".to_string()));
        }
        if self.levels.windows(2).any(|w| w[0].days >= w[1].days) {
            return Err(CadenceError::Config(
                "ladder levels must be strictly increasing in days".to_string(),
            ));
        }
        for level in &self.levels {
            if level.days == 0 || level.breach_due_days == 0 {
                return Err(CadenceError::Config(format!(
                    "ladder level {} has a zero-day interval",
                    level.days
                )));
            }
            if !level.breach_threshold.is_finite() || level.breach_threshold <= 0.0 {
                return Err(CadenceError::Config(format!(
                    "ladder level {} needs a positive breach threshold",
                    level.days
                )));
            }
        }
        for days in self
            .risk_to_cadence
            .iter()
            .map(|m| m.days)
            .chain(std::iter::once(self.default_days))
        {
            if self.level_index(days).is_none() {
                return Err(CadenceError::Config(format!(
                    "base score {} is not a ladder level",
                    days
                )));
            }
        }
        Ok(())
    }

    fn level_index(&self, days: u32) -> Option<usize> {
        self.levels.iter().position(|l| l.days == days)
    }

    /// Effective integer risk: absent risk falls back to `default_risk`
    pub fn effective_risk(&self, risk: Option<f64>) -> Option<u32> {
        match risk {
            None => Some(self.default_risk),
            Some(r) if r >= 0.0 && r.fract() == 0.0 => Some(r as u32),
            Some(_) => None,
        }
    }

    pub fn base_score(&self, risk: Option<f64>) -> u32 {
        self.effective_risk(risk)
            .and_then(|r| self.risk_to_cadence.iter().find(|m| m.risk == r))
            .map(|m| m.days)
            .unwrap_or(self.default_days)
    }
}

// ============================================================================
// SCORING OUTPUT
// ============================================================================

/// How the new score relates to the previous cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CadenceCategory {
    /// No previous cadence
    New,
    /// Score below previous (audited more often)
    Tightened,
    Held,
    /// Score above previous
    Relaxed,
    /// No current NC; previous values carried over
    Carried,
}

impl CadenceCategory {
    pub const ALL: [CadenceCategory; 5] = [
        CadenceCategory::New,
        CadenceCategory::Tightened,
        CadenceCategory::Held,
        CadenceCategory::Relaxed,
        CadenceCategory::Carried,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CadenceCategory::New => "new",
            CadenceCategory::Tightened => "tightened",
            CadenceCategory::Held => "held",
            CadenceCategory::Relaxed => "relaxed",
            CadenceCategory::Carried => "carried",
        }
    }

    fn compare(score: u32, previous: Option<f64>) -> Self {
        match previous {
            None => CadenceCategory::New,
            Some(prev) => {
                let score = score as f64;
                if score < prev {
                    CadenceCategory::Tightened
                } else if score > prev {
                    CadenceCategory::Relaxed
                } else {
                    CadenceCategory::Held
                }
            }
        }
    }
}

impl fmt::Display for CadenceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CadenceCategory {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self> {
        CadenceCategory::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CadenceError::Config(format!("unknown category '{}'", s)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutcome {
    pub cadence_score: u32,
    pub due_date: Option<NaiveDate>,
    pub category: CadenceCategory,
}

/// Merged record plus its computed cadence
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRecord {
    pub merged: MergedRecord,
    pub cadence_score: u32,
    pub due_date: Option<NaiveDate>,
    pub category: CadenceCategory,
    pub jsr: bool,
    /// Risk as displayed (absent or 0 shows as 1)
    pub risk_display: f64,
    pub rule_set: String,
}

impl ScoredRecord {
    pub fn key(&self) -> &str {
        &self.merged.key
    }

    pub fn source(&self) -> Option<&str> {
        self.merged.armt.as_ref().map(|a| a.source.as_str())
    }
}

/// Any policy name containing `_JSR` or `-JSR`
pub fn is_jsr(policies: &str) -> bool {
    policies.contains("_JSR") || policies.contains("-JSR")
}

pub fn display_risk(risk: Option<f64>) -> f64 {
    match risk {
        None => 1.0,
        Some(r) if r == 0.0 => 1.0,
        Some(r) => r,
    }
}

fn add_days(date: Option<NaiveDate>, days: u32) -> Option<NaiveDate> {
    date.and_then(|d| d.checked_add_signed(Duration::days(days as i64)))
}

// ============================================================================
// RULE SETS
// ============================================================================

/// A pure scoring function over one merged record
pub trait CadenceRules: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn score(&self, record: &MergedRecord) -> ScoreOutcome;
}

/// Risk base score moved up or down the ladder by NC history
#[derive(Debug, Clone)]
pub struct RiskLadderRules {
    ladder: LadderConfig,
}

impl RiskLadderRules {
    pub fn new(ladder: LadderConfig) -> Self {
        RiskLadderRules { ladder }
    }

    /// Score before carry-over
    fn ladder_score(&self, record: &MergedRecord) -> u32 {
        let base = self.ladder.base_score(record.risk_score());

        let previous = match record.previous_cadence() {
            Some(p) if p >= 0.0 && p.fract() == 0.0 => p as u32,
            _ => return base,
        };
        let idx = match self.ladder.level_index(previous) {
            Some(idx) => idx,
            None => return base,
        };
        let level = &self.ladder.levels[idx];
        let nc = record.nc_count();
        let previous_nc = record.previous_nc();

        if let Some(nc) = nc {
            if level.is_breached(nc) {
                return self.ladder.levels[idx.saturating_sub(1)].days;
            }
        }

        if previous_nc.map_or(false, |p| level.is_breached(p)) {
            return level.days;
        }

        match nc {
            Some(_) => {
                let next = match self.ladder.levels.get(idx + 1) {
                    Some(next) => next,
                    None => return level.days,
                };
                let risk = self.ladder.effective_risk(record.risk_score());
                match risk {
                    Some(r) if level.allows_relax(r) => next.days,
                    // Risk outside the gate (or fractional): hold
                    _ => level.days,
                }
            }
            None => base,
        }
    }

    fn due_date(&self, record: &MergedRecord, score: u32) -> Option<NaiveDate> {
        let nc = record.nc_count()?;
        let level = self.ladder.levels.iter().find(|l| l.days == score)?;
        add_days(record.resolved_date(), level.due_days(nc))
    }
}

impl CadenceRules for RiskLadderRules {
    fn name(&self) -> &str {
        RISK_LADDER
    }

    fn description(&self) -> &str {
        "risk base score, stepped down on NC breach and up after quiet months"
    }

    fn score(&self, record: &MergedRecord) -> ScoreOutcome {
        let score = self.ladder_score(record);
        let due_date = self.due_date(record, score);

        if record.nc_count().is_none() {
            if let Some(previous) = record.previous_cadence() {
                let carried_score = if previous >= 0.0 && previous.fract() == 0.0 {
                    previous as u32
                } else {
                    score
                };
                return ScoreOutcome {
                    cadence_score: carried_score,
                    due_date: record.previous_due_date().or(due_date),
                    category: CadenceCategory::Carried,
                };
            }
        }

        ScoreOutcome {
            cadence_score: score,
            due_date,
            category: CadenceCategory::compare(score, record.previous_cadence()),
        }
    }
}

/// Base score from the risk map alone
#[derive(Debug, Clone)]
pub struct RiskOnlyRules {
    ladder: LadderConfig,
}

impl RiskOnlyRules {
    pub fn new(ladder: LadderConfig) -> Self {
        RiskOnlyRules { ladder }
    }
}

impl CadenceRules for RiskOnlyRules {
    fn name(&self) -> &str {
        RISK_ONLY
    }

    fn description(&self) -> &str {
        "risk base score only; due date is resolved date plus score"
    }

    fn score(&self, record: &MergedRecord) -> ScoreOutcome {
        let score = self.ladder.base_score(record.risk_score());
        ScoreOutcome {
            cadence_score: score,
            due_date: add_days(record.resolved_date(), score),
            category: CadenceCategory::compare(score, record.previous_cadence()),
        }
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

pub struct RuleRegistry {
    rule_sets: BTreeMap<String, Box<dyn CadenceRules>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        RuleRegistry {
            rule_sets: BTreeMap::new(),
        }
    }

    /// Registry holding the built-in rule sets
    pub fn with_builtin(ladder: &LadderConfig) -> Self {
        let mut registry = RuleRegistry::new();
        registry.register(Box::new(RiskLadderRules::new(ladder.clone())));
        registry.register(Box::new(RiskOnlyRules::new(ladder.clone())));
        registry
    }

    /// Add a rule set, replacing any with the same name
    pub fn register(&mut self, rules: Box<dyn CadenceRules>) {
        self.rule_sets.insert(rules.name().to_string(), rules);
    }

    pub fn get(&self, name: &str) -> Result<&dyn CadenceRules> {
        self.rule_sets.get(name).map(|r| r.as_ref()).ok_or_else(|| {
            CadenceError::Config(format!(
                "unknown rule set '{}' (known: {})",
                name,
                self.names().join(", ")
            ))
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.rule_sets.keys().map(|k| k.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn CadenceRules> {
        self.rule_sets.values().map(|r| r.as_ref())
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::with_builtin(&LadderConfig::default())
    }
}

/// Score every merged record with one rule set
pub fn score_all(rules: &dyn CadenceRules, merged: Vec<MergedRecord>) -> Vec<ScoredRecord> {
    merged
        .into_iter()
        .map(|record| {
            let outcome = rules.score(&record);
            let jsr = record.policies().map_or(false, is_jsr);
            let risk_display = display_risk(record.risk_score());
            ScoredRecord {
                merged: record,
                cadence_score: outcome.cadence_score,
                due_date: outcome.due_date,
                category: outcome.category,
                jsr,
                risk_display,
                rule_set: rules.name().to_string(),
            }
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::ReportingPeriod;
    use crate::records::{ArmtRecord, CadenceRecord, OutflowAggregate, Program};
    use std::collections::BTreeSet;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(risk: Option<f64>, previous: Option<(f64, f64)>, nc: Option<f64>) -> MergedRecord {
        let period = ReportingPeriod::new(2025, 12).unwrap();
        let mut merged = MergedRecord::new("Weapons,Knives,US", period);
        merged.armt = Some(ArmtRecord {
            key: "Weapons,Knives,US".to_string(),
            program: Program::AmazonGlobal,
            policies: "KNIFE_POLICY".to_string(),
            parent_class: "Weapons".to_string(),
            child_class: "Knives".to_string(),
            source: "US".to_string(),
            destination: "SOME".to_string(),
            lane: None,
            risk_score: risk,
            row: 2,
        });
        merged.prior = previous.map(|(cadence, prev_nc)| CadenceRecord {
            key: "Weapons,Knives,US".to_string(),
            program: None,
            cadence_score: Some(cadence),
            due_date: Some(date(2025, 12, 15)),
            nc_count: if prev_nc < 0.0 { None } else { Some(prev_nc) },
            row: 3,
        });
        merged.outflow = nc.map(|n| OutflowAggregate {
            key: "Weapons,Knives,US".to_string(),
            nc_count: n,
            latest_resolved: Some(date(2025, 11, 20)),
            root_cause: "Missed listing".to_string(),
            ticket_count: 1,
            lane_keys: BTreeSet::new(),
            laneless_tickets: 1,
        });
        merged
    }

    fn ladder() -> RiskLadderRules {
        RiskLadderRules::new(LadderConfig::default())
    }

    #[test]
    fn test_base_score_from_risk() {
        let config = LadderConfig::default();
        assert_eq!(config.base_score(Some(0.0)), 30);
        assert_eq!(config.base_score(Some(3.0)), 90);
        assert_eq!(config.base_score(Some(5.0)), 365);
        assert_eq!(config.base_score(Some(9.0)), 30);
        assert_eq!(config.base_score(None), 30);
    }

    #[test]
    fn test_new_entity_uses_base_score_and_due_date() {
        let out = ladder().score(&record(Some(2.0), None, Some(3.0)));
        assert_eq!(out.cadence_score, 60);
        assert_eq!(out.due_date, Some(date(2026, 1, 19)));
        assert_eq!(out.category, CadenceCategory::New);
    }

    #[test]
    fn test_breach_steps_down_and_shortens_due() {
        let out = ladder().score(&record(Some(3.0), Some((90.0, 2.0)), Some(12.0)));
        assert_eq!(out.cadence_score, 60);
        // 60 breached at 12 NC: due in 30 days
        assert_eq!(out.due_date, Some(date(2025, 12, 20)));
        assert_eq!(out.category, CadenceCategory::Tightened);

        let floor = ladder().score(&record(Some(1.0), Some((30.0, 0.0)), Some(10.0)));
        assert_eq!(floor.cadence_score, 30);
        assert_eq!(floor.category, CadenceCategory::Held);
    }

    #[test]
    fn test_previous_breach_holds() {
        let out = ladder().score(&record(Some(1.0), Some((60.0, 11.0)), Some(2.0)));
        assert_eq!(out.cadence_score, 60);
        assert_eq!(out.category, CadenceCategory::Held);
    }

    #[test]
    fn test_quiet_month_steps_up_with_risk_gates() {
        let up = ladder().score(&record(Some(1.0), Some((30.0, 1.0)), Some(1.0)));
        assert_eq!(up.cadence_score, 60);
        assert_eq!(up.category, CadenceCategory::Relaxed);

        let gated = ladder().score(&record(Some(2.0), Some((90.0, -1.0)), Some(1.0)));
        assert_eq!(gated.cadence_score, 90);

        let high_risk = ladder().score(&record(Some(5.0), Some((90.0, -1.0)), Some(1.0)));
        assert_eq!(high_risk.cadence_score, 180);

        let risk_four = ladder().score(&record(Some(4.0), Some((180.0, 3.0)), Some(14.0)));
        assert_eq!(risk_four.cadence_score, 180);

        let risk_five = ladder().score(&record(Some(5.0), Some((180.0, 3.0)), Some(14.0)));
        assert_eq!(risk_five.cadence_score, 365);

        let top = ladder().score(&record(Some(5.0), Some((365.0, 3.0)), Some(1.0)));
        assert_eq!(top.cadence_score, 365);
    }

    #[test]
    fn test_no_nc_carries_previous_values() {
        let out = ladder().score(&record(Some(5.0), Some((60.0, 2.0)), None));
        assert_eq!(out.cadence_score, 60);
        assert_eq!(out.due_date, Some(date(2025, 12, 15)));
        assert_eq!(out.category, CadenceCategory::Carried);
    }

    #[test]
    fn test_no_history_no_outflow() {
        let out = ladder().score(&record(Some(4.0), None, None));
        assert_eq!(out.cadence_score, 180);
        assert_eq!(out.due_date, None);
        assert_eq!(out.category, CadenceCategory::New);
    }

    #[test]
    fn test_scoring_is_pure() {
        let rules = ladder();
        let input = record(Some(3.0), Some((90.0, 4.0)), Some(6.0));
        assert_eq!(rules.score(&input), rules.score(&input));
    }

    #[test]
    fn test_risk_only_ignores_history() {
        let out = RiskOnlyRules::new(LadderConfig::default())
            .score(&record(Some(3.0), Some((30.0, 20.0)), Some(25.0)));
        assert_eq!(out.cadence_score, 90);
        assert_eq!(out.category, CadenceCategory::Relaxed);
    }

    #[test]
    fn test_registry_lookup() {
        let registry = RuleRegistry::default();
        assert_eq!(registry.names(), vec![RISK_LADDER, RISK_ONLY]);
        assert!(registry.get(RISK_LADDER).is_ok());
        assert!(matches!(registry.get("nope"), Err(CadenceError::Config(_))));
    }

    #[test]
    fn test_score_all_sets_flags() {
        let mut input = record(Some(0.0), None, Some(1.0));
        if let Some(armt) = input.armt.as_mut() {
            armt.policies = "A,B_JSR".to_string();
        }
        let scored = score_all(&ladder(), vec![input]);
        assert!(scored[0].jsr);
        assert_eq!(scored[0].risk_display, 1.0);
        assert_eq!(scored[0].rule_set, RISK_LADDER);
    }

    #[test]
    fn test_ladder_validation() {
        assert!(LadderConfig::default().validate().is_ok());

        let mut bad = LadderConfig::default();
        bad.risk_to_cadence.push(RiskMapping { risk: 6, days: 45 });
        assert!(bad.validate().is_err());

        let mut unordered = LadderConfig::default();
        unordered.levels.swap(0, 1);
        assert!(unordered.validate().is_err());
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("Carried".parse::<CadenceCategory>().unwrap(), CadenceCategory::Carried);
        assert!("later".parse::<CadenceCategory>().is_err());
    }
}
