//! Run configuration: node profiles, scoring parameters, export options
//!
//! Resolution order for the config file:
//! 1. Explicit path (CLI `--config`)
//! 2. `CADENCE_CONFIG` environment variable
//! 3. `~/.config/cadence/config.toml`
//! 4. Built-in defaults
//!
//! A file only needs to name what it overrides. Built-in node profiles
//! (BLR, IAS, GDN) stay available unless the file redefines them.

use crate::deduplication::DuplicatePolicy;
use crate::error::{CadenceError, Result};
use crate::rules::LadderConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const CONFIG_ENV_VAR: &str = "CADENCE_CONFIG";

/// Marker written for absent cells; previous reports use it too
pub const DEFAULT_ABSENT_MARKER: &str = "not Found!";

// ============================================================================
// KEY SCHEME
// ============================================================================

/// How the entity key is formed from a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyScheme {
    /// `parent,child,source` for AmazonGlobal and `parent,child,source-destination`
    /// for CrossListing
    ClassLane,
    /// Bare child class (`No-Child` becomes the parent class)
    ChildClass,
}

impl KeyScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyScheme::ClassLane => "class-lane",
            KeyScheme::ChildClass => "child-class",
        }
    }
}

// ============================================================================
// NODE PROFILE
// ============================================================================

/// Country scope and outflow filters of one operations node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeProfile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub key_scheme: KeyScheme,

    /// AmazonGlobal sources this node audits
    #[serde(default)]
    pub core_sources: Vec<String>,

    /// Core sources also select CrossListing rows, whatever the destination
    #[serde(default)]
    pub core_applies_to_all_programs: bool,

    /// CrossListing destinations this node audits (None = any)
    #[serde(default)]
    pub cross_destinations: Option<Vec<String>>,

    /// CrossListing sources this node audits (None = any)
    #[serde(default)]
    pub cross_sources: Option<Vec<String>>,

    /// CrossListing sources never audited by this node
    #[serde(default)]
    pub excluded_cross_sources: Vec<String>,

    /// Outflow tickets owned by other auditor groups
    #[serde(default)]
    pub excluded_groups: Vec<String>,

    #[serde(default = "default_excluded_root_causes")]
    pub excluded_root_causes: Vec<String>,

    #[serde(default)]
    pub armt_duplicates: DuplicatePolicy,

    #[serde(default)]
    pub cadence_duplicates: DuplicatePolicy,
}

fn default_excluded_root_causes() -> Vec<String> {
    strings(&["Duplicate", "Other", "Negative Class"])
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

impl NodeProfile {
    pub fn blr() -> Self {
        NodeProfile {
            name: "BLR".to_string(),
            description: "BLR node - US, UK, SG, AU, AE".to_string(),
            key_scheme: KeyScheme::ClassLane,
            core_sources: strings(&["US", "UK", "SG", "AU", "AE", "GB", "ANY", "Any"]),
            core_applies_to_all_programs: false,
            cross_destinations: Some(strings(&[
                "US", "UK", "GB", "SA", "AE", "DE", "SG", "AU", "IT", "ES", "FR", "TR", "Any",
                "ANY", "BR", "ZA", "IN", "NL", "BE", "QA", "AT",
            ])),
            cross_sources: None,
            excluded_cross_sources: strings(&[
                "JP", "DE", "TR", "FR", "IT", "ES", "CN", "PL", "NL", "SE", "MX", "EG",
            ]),
            excluded_groups: strings(&[
                "RP - AG Auditors CN",
                "RP - AG Auditors PL",
                "RP - AG Auditors ES",
                "RP - AG Auditors FR",
                "RP - AG Auditors IT",
            ]),
            excluded_root_causes: default_excluded_root_causes(),
            armt_duplicates: DuplicatePolicy::KeepFirst,
            cadence_duplicates: DuplicatePolicy::KeepFirst,
        }
    }

    pub fn ias() -> Self {
        NodeProfile {
            name: "IAS".to_string(),
            description: "IAS node - France, Italy, Spain, Mexico".to_string(),
            key_scheme: KeyScheme::ClassLane,
            core_sources: strings(&["FR", "IT", "ES"]),
            core_applies_to_all_programs: false,
            cross_destinations: None,
            cross_sources: Some(strings(&["FR", "IT", "ES", "MX"])),
            excluded_cross_sources: vec![],
            excluded_groups: strings(&[
                "RP - AG Auditors",
                "RP - AG Auditors CN",
                "RP - AG Auditors PL",
            ]),
            excluded_root_causes: default_excluded_root_causes(),
            armt_duplicates: DuplicatePolicy::KeepFirst,
            cadence_duplicates: DuplicatePolicy::KeepFirst,
        }
    }

    pub fn gdn() -> Self {
        NodeProfile {
            name: "GDN".to_string(),
            description: "GDN node - Germany (keyed by child class)".to_string(),
            key_scheme: KeyScheme::ChildClass,
            core_sources: strings(&["DE", "ANY", "Any"]),
            core_applies_to_all_programs: true,
            cross_destinations: Some(strings(&["DE", "TR", "UK", "Any"])),
            cross_sources: None,
            excluded_cross_sources: strings(&[
                "JP", "FR", "IT", "ES", "CN", "US", "AU", "SG", "AE", "IN", "SA", "CA", "NL",
                "EG", "MX", "UK",
            ]),
            excluded_groups: strings(&[
                "RP - AG Auditors",
                "RP - AG Auditors CN",
                "RP - AG Auditors ES",
                "RP - AG Auditors FR",
                "RP - AG Auditors IT",
            ]),
            excluded_root_causes: default_excluded_root_causes(),
            armt_duplicates: DuplicatePolicy::Coalesce,
            cadence_duplicates: DuplicatePolicy::KeepFirst,
        }
    }

    pub fn is_core_source(&self, source: &str) -> bool {
        self.core_sources.iter().any(|s| s == source)
    }

    /// CrossListing selection: the lane rules, or a core source when the
    /// node's core list covers every program
    pub fn selects_cross_listing(&self, source: &str, destination: &str) -> bool {
        (self.core_applies_to_all_programs && self.is_core_source(source))
            || self.audits_cross_lane(source, destination)
    }

    /// CrossListing lane selection
    pub fn audits_cross_lane(&self, source: &str, destination: &str) -> bool {
        let destination_ok = self
            .cross_destinations
            .as_ref()
            .map_or(true, |list| list.iter().any(|d| d == destination));
        let source_ok = self
            .cross_sources
            .as_ref()
            .map_or(true, |list| list.iter().any(|s| s == source));
        let excluded = self.excluded_cross_sources.iter().any(|s| s == source);

        destination_ok && source_ok && !excluded
    }

    pub fn excludes_group(&self, group: &str) -> bool {
        self.excluded_groups.iter().any(|g| g == group)
    }

    pub fn excludes_root_cause(&self, cause: &str) -> bool {
        self.excluded_root_causes.iter().any(|c| c == cause)
    }
}

// ============================================================================
// CADENCE CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// Active node profile
    pub node: String,

    /// Sheet read from each workbook (falls back to the first sheet)
    pub sheet_name: String,

    /// Registered scoring rule set
    pub rule_set: String,

    pub ladder: LadderConfig,

    pub absent_marker: String,

    pub nodes: BTreeMap<String, NodeProfile>,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        CadenceConfig {
            node: "BLR".to_string(),
            sheet_name: "Sheet1".to_string(),
            rule_set: crate::rules::RISK_LADDER.to_string(),
            ladder: LadderConfig::default(),
            absent_marker: DEFAULT_ABSENT_MARKER.to_string(),
            nodes: default_nodes(),
        }
    }
}

fn default_nodes() -> BTreeMap<String, NodeProfile> {
    [NodeProfile::blr(), NodeProfile::ias(), NodeProfile::gdn()]
        .into_iter()
        .map(|p| (p.name.clone(), p))
        .collect()
}

impl CadenceConfig {
    /// Parse a TOML document, filling in built-in node profiles
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: CadenceConfig = toml::from_str(content)
            .map_err(|e| CadenceError::Config(format!("invalid config TOML: {}", e)))?;

        for (name, profile) in default_nodes() {
            config.nodes.entry(name).or_insert(profile);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CadenceError::Config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Resolve the configuration following the documented priority order
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return Self::load(Path::new(&path));
            }
        }

        if let Some(path) = default_config_path() {
            if path.exists() {
                return Self::load(&path);
            }
        }

        debug!("No configuration file found, using built-in defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sheet_name.trim().is_empty() {
            return Err(CadenceError::Config("sheet_name must not be empty".to_string()));
        }
        for (name, profile) in &self.nodes {
            if name != &profile.name {
                return Err(CadenceError::Config(format!(
                    "node table '{}' declares name '{}'",
                    name, profile.name
                )));
            }
        }
        self.ladder.validate()
    }

    /// Case-insensitive profile lookup
    pub fn profile(&self, name: &str) -> Result<&NodeProfile> {
        self.nodes
            .values()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                CadenceError::Config(format!(
                    "unknown node '{}' (known: {})",
                    name,
                    self.node_names().join(", ")
                ))
            })
    }

    pub fn active_profile(&self) -> Result<&NodeProfile> {
        self.profile(&self.node)
    }

    pub fn node_names(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }
}

/// `~/.config/cadence/config.toml` (platform config dir)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cadence").join("config.toml"))
}

// ============================================================================
// TESTS
// ============================================================================
