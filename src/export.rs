// 📤 Export - CSV, XLSX report, XLSX bundle, JSON summary

use crate::error::{CadenceError, Result};
use crate::period::ReportingPeriod;
use crate::records::{ArmtRecord, CadenceRecord};
use crate::report::{ReportRow, ReportTable, SummaryMetrics, REPORT_COLUMNS};
use rust_xlsxwriter::{Format, Workbook};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::info;

/// Sheet name of the single-sheet report; it is also the sheet the loader
/// reads by default, so a report can be fed back as next month's input.
pub const REPORT_SHEET: &str = "Sheet1";

pub const BUNDLE_SHEETS: [&str; 4] = ["Cadence", "Master", "ARMT", "Summary"];

/// Prior cadence as read, in the layout the loader accepts
const MASTER_COLUMNS: [&str; 5] = ["Combined Classes", "program", "Cadence Score", "Due Date", "NC Count"];

const ARMT_COLUMNS: [&str; 9] = [
    "Combined Classes",
    "program",
    "policy_name",
    "parent_class",
    "child_class",
    "Source",
    "Destination",
    "ARC",
    "parent_score",
];

// ============================================================================
// FILE NAMES
// ============================================================================

pub fn report_file_name(period: ReportingPeriod, node: &str) -> String {
    format!("{}_{}_Cadence.xlsx", period.month_name(), node)
}

pub fn bundle_file_name(period: ReportingPeriod, node: &str) -> String {
    format!("{}_{}_All_Reports.xlsx", period.month_name(), node)
}

pub fn csv_file_name(period: ReportingPeriod, node: &str) -> String {
    format!("{}_{}_Cadence.csv", period.month_name(), node)
}

pub fn summary_file_name(period: ReportingPeriod, node: &str) -> String {
    format!("{}_{}_Summary.json", period.month_name(), node)
}

pub fn master_file_name(node: &str) -> String {
    format!("{}_Master.xlsx", node)
}

pub fn armt_file_name(node: &str) -> String {
    format!("{}_ARMT.xlsx", node)
}

// ============================================================================
// CSV & FINGERPRINT
// ============================================================================

/// CSV rendering of the report; identical tables render identical bytes
pub fn to_csv(table: &ReportTable, marker: &str) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer
        .write_record(REPORT_COLUMNS)
        .map_err(|e| CadenceError::Export(format!("CSV header: {}", e)))?;
    for row in &table.rows {
        writer
            .write_record(row.cells(marker))
            .map_err(|e| CadenceError::Export(format!("CSV row '{}': {}", row.key, e)))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| CadenceError::Export(format!("CSV flush: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| CadenceError::Export(e.to_string()))
}

/// SHA-256 of the CSV rendering, lowercase hex
pub fn fingerprint(csv: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(csv.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn summary_json(summary: &SummaryMetrics) -> Result<String> {
    serde_json::to_string_pretty(summary).map_err(|e| CadenceError::Export(e.to_string()))
}

// ============================================================================
// XLSX
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum SheetCell {
    Text(String),
    Number(f64),
}

fn text(value: impl Into<String>) -> SheetCell {
    SheetCell::Text(value.into())
}

fn number_or(value: Option<f64>, marker: &str) -> SheetCell {
    match value {
        Some(n) => SheetCell::Number(n),
        None => text(marker),
    }
}

/// Report cells with numeric columns kept numeric
fn report_cells(row: &ReportRow, marker: &str) -> Vec<SheetCell> {
    row.cells(marker)
        .into_iter()
        .enumerate()
        .map(|(idx, cell)| match REPORT_COLUMNS[idx] {
            "risk score" => SheetCell::Number(row.risk_score),
            "NC Count" => number_or(row.nc_count, marker),
            "Previous Cadence" => number_or(row.previous_cadence, marker),
            "Previous NC" => number_or(row.previous_nc, marker),
            "Cadence Score" => SheetCell::Number(row.cadence_score as f64),
            _ => SheetCell::Text(cell),
        })
        .collect()
}

fn armt_cells(record: &ArmtRecord, marker: &str) -> Vec<SheetCell> {
    vec![
        text(record.key.as_str()),
        text(record.program.as_str()),
        text(record.policies.as_str()),
        text(record.parent_class.as_str()),
        text(record.child_class.as_str()),
        text(record.source.as_str()),
        text(record.destination.as_str()),
        text(record.lane.clone().unwrap_or_else(|| marker.to_string())),
        number_or(record.risk_score, marker),
    ]
}

fn master_cells(record: &CadenceRecord, marker: &str) -> Vec<SheetCell> {
    vec![
        text(record.key.as_str()),
        text(record.program.clone().unwrap_or_else(|| marker.to_string())),
        number_or(record.cadence_score, marker),
        text(
            record
                .due_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| marker.to_string()),
        ),
        number_or(record.nc_count, marker),
    ]
}

fn summary_cells(table: &ReportTable, summary: &SummaryMetrics) -> Vec<Vec<SheetCell>> {
    let count = |label: String, n: usize| vec![text(label), SheetCell::Number(n as f64)];

    let mut rows = vec![
        vec![text("Node"), text(summary.node.as_str())],
        vec![text("Period"), text(summary.period.to_string())],
        vec![text("Rule set"), text(table.rule_set.as_str())],
        count("Total records".to_string(), summary.total_records),
        count("Unfiltered records".to_string(), summary.unfiltered_records),
        count("Records with current NC".to_string(), summary.with_current_nc),
        count("JSR policies".to_string(), summary.jsr_policies),
    ];

    for (category, n) in &summary.by_category {
        rows.push(count(format!("Category: {}", category), *n));
    }
    for (score, n) in &summary.by_cadence_score {
        rows.push(count(format!("Cadence score {}", score), *n));
    }
    for (risk, n) in &summary.by_risk_score {
        rows.push(count(format!("Risk score {}", risk), *n));
    }
    for source in &summary.top_sources {
        rows.push(count(format!("Source {}", source.source), source.count));
    }
    if let Some(stats) = &summary.score_stats {
        rows.push(vec![text("Score min"), SheetCell::Number(stats.min as f64)]);
        rows.push(vec![text("Score max"), SheetCell::Number(stats.max as f64)]);
        rows.push(vec![text("Score mean"), SheetCell::Number(stats.mean)]);
        rows.push(vec![text("Score median"), SheetCell::Number(stats.median)]);
    }

    rows
}

fn xlsx_error(context: &str, e: impl std::fmt::Display) -> CadenceError {
    CadenceError::Export(format!("{}: {}", context, e))
}

fn write_sheet(
    workbook: &mut Workbook,
    name: &str,
    headers: &[&str],
    rows: &[Vec<SheetCell>],
) -> Result<()> {
    let bold = Format::new().set_bold();
    let worksheet = workbook
        .add_worksheet()
        .set_name(name)
        .map_err(|e| xlsx_error(&format!("create sheet '{}'", name), e))?;

    for (col, header) in headers.iter().enumerate() {
        worksheet
            .write_string_with_format(0, col as u16, *header, &bold)
            .map_err(|e| xlsx_error("write header", e))?;
    }

    for (idx, cells) in rows.iter().enumerate() {
        let row = (idx + 1) as u32;
        for (col, cell) in cells.iter().enumerate() {
            let col = col as u16;
            let written = match cell {
                SheetCell::Text(s) => worksheet.write_string(row, col, s.as_str()),
                SheetCell::Number(n) => worksheet.write_number(row, col, *n),
            };
            written.map_err(|e| xlsx_error(&format!("write cell ({}, {})", row, col), e))?;
        }
    }

    Ok(())
}

/// Single-sheet report workbook
pub fn report_xlsx(table: &ReportTable, marker: &str) -> Result<Vec<u8>> {
    let rows: Vec<Vec<SheetCell>> = table.rows.iter().map(|r| report_cells(r, marker)).collect();

    let mut workbook = Workbook::new();
    write_sheet(&mut workbook, REPORT_SHEET, &REPORT_COLUMNS, &rows)?;
    save(&mut workbook, "report")
}

/// Source records carried into the exports next to the report
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceSheets<'a> {
    pub armt: &'a [ArmtRecord],
    pub master: &'a [CadenceRecord],
}

fn save(workbook: &mut Workbook, what: &str) -> Result<Vec<u8>> {
    workbook
        .save_to_buffer()
        .map_err(|e| xlsx_error(&format!("save {}", what), e))
}

/// Prior cadence records on one `Sheet1`
pub fn master_xlsx(master: &[CadenceRecord], marker: &str) -> Result<Vec<u8>> {
    let rows: Vec<Vec<SheetCell>> = master.iter().map(|r| master_cells(r, marker)).collect();
    let mut workbook = Workbook::new();
    write_sheet(&mut workbook, REPORT_SHEET, &MASTER_COLUMNS, &rows)?;
    save(&mut workbook, "master")
}

/// Selected ARMT records on one `Sheet1`
pub fn armt_xlsx(armt: &[ArmtRecord], marker: &str) -> Result<Vec<u8>> {
    let rows: Vec<Vec<SheetCell>> = armt.iter().map(|r| armt_cells(r, marker)).collect();
    let mut workbook = Workbook::new();
    write_sheet(&mut workbook, REPORT_SHEET, &ARMT_COLUMNS, &rows)?;
    save(&mut workbook, "ARMT")
}

/// Cadence, Master, ARMT and Summary sheets in one workbook
pub fn bundle_xlsx(
    table: &ReportTable,
    summary: &SummaryMetrics,
    sources: SourceSheets<'_>,
    marker: &str,
) -> Result<Vec<u8>> {
    let cadence_rows: Vec<Vec<SheetCell>> =
        table.rows.iter().map(|r| report_cells(r, marker)).collect();
    let master_rows: Vec<Vec<SheetCell>> =
        sources.master.iter().map(|r| master_cells(r, marker)).collect();
    let armt_rows: Vec<Vec<SheetCell>> =
        sources.armt.iter().map(|r| armt_cells(r, marker)).collect();

    let mut workbook = Workbook::new();
    write_sheet(&mut workbook, BUNDLE_SHEETS[0], &REPORT_COLUMNS, &cadence_rows)?;
    write_sheet(&mut workbook, BUNDLE_SHEETS[1], &MASTER_COLUMNS, &master_rows)?;
    write_sheet(&mut workbook, BUNDLE_SHEETS[2], &ARMT_COLUMNS, &armt_rows)?;
    write_sheet(
        &mut workbook,
        BUNDLE_SHEETS[3],
        &["Metric", "Value"],
        &summary_cells(table, summary),
    )?;
    save(&mut workbook, "bundle")
}

// ============================================================================
// WRITE ALL
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ExportPaths {
    pub report: PathBuf,
    pub bundle: PathBuf,
    pub master: PathBuf,
    pub armt: PathBuf,
    pub csv: PathBuf,
    pub summary: PathBuf,
    /// Fingerprint of the CSV rendering
    pub fingerprint: String,
}

/// Write every export format into `dir`
pub fn write_outputs(
    dir: &Path,
    table: &ReportTable,
    summary: &SummaryMetrics,
    sources: SourceSheets<'_>,
    marker: &str,
) -> Result<ExportPaths> {
    std::fs::create_dir_all(dir)?;

    let node = table.node.as_str();
    let period = table.period;

    let csv = to_csv(table, marker)?;
    let paths = ExportPaths {
        report: dir.join(report_file_name(period, node)),
        bundle: dir.join(bundle_file_name(period, node)),
        master: dir.join(master_file_name(node)),
        armt: dir.join(armt_file_name(node)),
        csv: dir.join(csv_file_name(period, node)),
        summary: dir.join(summary_file_name(period, node)),
        fingerprint: fingerprint(&csv),
    };

    std::fs::write(&paths.report, report_xlsx(table, marker)?)?;
    std::fs::write(&paths.bundle, bundle_xlsx(table, summary, sources, marker)?)?;
    std::fs::write(&paths.master, master_xlsx(sources.master, marker)?)?;
    std::fs::write(&paths.armt, armt_xlsx(sources.armt, marker)?)?;
    std::fs::write(&paths.csv, csv)?;
    std::fs::write(&paths.summary, summary_json(summary)?)?;

    info!(
        "Exported {} rows to {} (fingerprint {})",
        table.len(),
        dir.display(),
        &paths.fingerprint[..12]
    );

    Ok(paths)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{CadenceParser, InputFile, SheetParser, SheetTable, SourceType};
    use crate::report::{assemble, ReportFilter, SortOrder};
    use crate::records::MergedRecord;
    use crate::rules::{CadenceCategory, ScoredRecord};

    fn table() -> (ReportTable, SummaryMetrics) {
        let period = ReportingPeriod::new(2025, 12).unwrap();
        let merged = MergedRecord::new("Weapons,Knives,US", period);
        let scored = vec![ScoredRecord {
            merged,
            cadence_score: 60,
            due_date: chrono::NaiveDate::from_ymd_opt(2026, 1, 19),
            category: CadenceCategory::New,
            jsr: false,
            risk_display: 1.0,
            rule_set: "risk-ladder".to_string(),
        }];
        assemble(&scored, &ReportFilter::default(), SortOrder::Key, "BLR", period)
    }

    #[test]
    fn test_file_names() {
        let period = ReportingPeriod::new(2025, 12).unwrap();
        assert_eq!(report_file_name(period, "BLR"), "December_BLR_Cadence.xlsx");
        assert_eq!(bundle_file_name(period, "GDN"), "December_GDN_All_Reports.xlsx");
    }

    #[test]
    fn test_csv_rendering_and_fingerprint() {
        let (table, _) = table();
        let csv = to_csv(&table, "not Found!").unwrap();
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("Combined Classes,program,Policies"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("\"Weapons,Knives,US\",not Found!"));
        assert!(row.contains(",60,2026-01-19,No,new"));

        assert_eq!(fingerprint(&csv), fingerprint(&to_csv(&table, "not Found!").unwrap()));
        assert_eq!(fingerprint(&csv).len(), 64);
    }

    #[test]
    fn test_report_xlsx_reads_back() {
        let (table, _) = table();
        let bytes = report_xlsx(&table, "not Found!").unwrap();
        let input = InputFile::new("December_BLR_Cadence.xlsx", bytes);
        let sheet = SheetTable::read(&input, SourceType::Cadence, REPORT_SHEET).unwrap();

        assert_eq!(sheet.sheet_name, "Sheet1");
        assert_eq!(sheet.headers.len(), REPORT_COLUMNS.len());
        assert_eq!(sheet.rows.len(), 1);
        let score = sheet.column("Cadence Score").unwrap();
        assert_eq!(sheet.rows[0].get(score).as_number(), Some(60.0));
    }

    fn master_record() -> CadenceRecord {
        CadenceRecord {
            key: "Weapons,Knives,US".to_string(),
            program: Some("AmazonGlobal".to_string()),
            cadence_score: Some(90.0),
            due_date: chrono::NaiveDate::from_ymd_opt(2025, 12, 1),
            nc_count: None,
            row: 2,
        }
    }

    #[test]
    fn test_bundle_sheets() {
        let (table, summary) = table();
        let master = [master_record()];
        let sources = SourceSheets {
            armt: &[],
            master: &master,
        };
        let bytes = bundle_xlsx(&table, &summary, sources, "not Found!").unwrap();
        let input = InputFile::new("bundle.xlsx", bytes);
        for sheet in BUNDLE_SHEETS {
            let read = SheetTable::read(&input, SourceType::Cadence, sheet).unwrap();
            assert_eq!(read.sheet_name, sheet);
        }

        let read = SheetTable::read(&input, SourceType::Cadence, "Master").unwrap();
        assert_eq!(read.headers, MASTER_COLUMNS);
        assert_eq!(read.rows.len(), 1);
        assert_eq!(read.rows[0].get(0).as_text().as_deref(), Some("Weapons,Knives,US"));
        assert_eq!(read.rows[0].get(2).as_number(), Some(90.0));
        assert_eq!(read.rows[0].get(3).as_text().as_deref(), Some("2025-12-01"));
        assert!(read.rows[0].get(4).is_absent());
    }

    #[test]
    fn test_master_export_reloads_as_prior_cadence() {
        let bytes = master_xlsx(&[master_record()], "not Found!").unwrap();
        let input = InputFile::new("BLR_Master.xlsx", bytes);
        let profile = crate::config::NodeProfile::blr();
        let parsed = CadenceParser::new(&profile).parse(&input, REPORT_SHEET).unwrap();
        assert_eq!(parsed.records, vec![master_record()]);
    }

    #[test]
    fn test_summary_json() {
        let (_, summary) = table();
        let json = summary_json(&summary).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["total_records"], 1);
        assert_eq!(value["period"], "2025-12");
        assert_eq!(value["by_cadence_score"]["60"], 1);
    }

    #[test]
    fn test_write_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let (table, summary) = table();
        let paths =
            write_outputs(dir.path(), &table, &summary, SourceSheets::default(), "not Found!")
                .unwrap();
        assert!(paths.report.exists());
        assert!(paths.bundle.exists());
        assert!(paths.master.ends_with("BLR_Master.xlsx"));
        assert!(paths.armt.exists());
        assert_eq!(
            std::fs::read_to_string(&paths.csv).unwrap(),
            to_csv(&table, "not Found!").unwrap()
        );
    }
}
