// Cadence Calculator - Core Library
// Exposes all modules for use in the CLI and tests

pub mod cell;           // Cell normalization at the parse boundary
pub mod config;         // Node profiles, ladder parameters, TOML loading
pub mod deduplication;  // Duplicate key policies
pub mod error;
pub mod export;         // CSV / XLSX / JSON outputs
pub mod merge;          // Outer join on the entity key
pub mod parser;         // Spreadsheet loader
pub mod period;
pub mod pipeline;       // process(): load → merge → score → assemble
pub mod records;
pub mod report;         // Filters, sort, summary metrics
pub mod rules;          // Cadence rule sets
pub mod schema;         // Required columns per source

// Re-export commonly used types
pub use cell::CellValue;
pub use config::{CadenceConfig, KeyScheme, NodeProfile};
pub use deduplication::DuplicatePolicy;
pub use error::{CadenceError, Malformation, Result};
pub use merge::{merge, MergeStats, OutflowIndex};
pub use parser::{
    detect_source, inspect, ArmtParser, CadenceParser, InputFile, InspectReport, LoadStats,
    OutflowParser, SheetParser, SheetTable, SourceType,
};
pub use period::ReportingPeriod;
pub use export::{ExportPaths, SourceSheets};
pub use pipeline::{process, CadenceRun, ReportView, RunInputs};
pub use records::{ArmtRecord, CadenceRecord, MergedRecord, OutflowAggregate, OutflowRecord, Program};
pub use report::{
    assemble, FilterOptions, ReportFilter, ReportRow, ReportTable, SortOrder, SummaryMetrics,
    REPORT_COLUMNS,
};
pub use rules::{
    CadenceCategory, CadenceRules, LadderConfig, RuleRegistry, ScoredRecord, RISK_LADDER,
    RISK_ONLY,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
