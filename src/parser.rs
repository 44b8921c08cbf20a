// 🏗️ Parser Framework - Spreadsheet Loader
// One trait, three sources: ARMT policies, prior cadence report, outflow tickets

use crate::cell::CellValue;
use crate::config::{KeyScheme, NodeProfile};
use crate::deduplication::{self, DuplicatePolicy};
use crate::error::{CadenceError, Malformation, Result};
use crate::records::{ArmtRecord, CadenceRecord, Keyed, OutflowRecord, Program};
use crate::schema::{self, SourceSchema};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info, warn};

// ============================================================================
// CORE TYPES
// ============================================================================

/// SourceType - which of the three input files a sheet came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceType {
    Armt,
    Cadence,
    Outflow,
}

impl SourceType {
    pub const ALL: [SourceType; 3] = [SourceType::Armt, SourceType::Cadence, SourceType::Outflow];

    /// Human-readable name for display
    pub fn name(&self) -> &str {
        match self {
            SourceType::Armt => "ARMT",
            SourceType::Cadence => "Cadence",
            SourceType::Outflow => "Outflow",
        }
    }

    /// Short code for CLI arguments
    pub fn code(&self) -> &str {
        match self {
            SourceType::Armt => "armt",
            SourceType::Cadence => "cadence",
            SourceType::Outflow => "outflow",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An input file held in memory; dropped with the run
#[derive(Debug, Clone)]
pub struct InputFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl InputFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        InputFile {
            name: name.into(),
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        Ok(InputFile { name, bytes })
    }

    /// Lowercase extension without the dot
    pub fn extension(&self) -> String {
        Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    Workbook,
    Csv,
}

fn file_format(input: &InputFile, source: SourceType) -> Result<FileFormat> {
    match input.extension().as_str() {
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Ok(FileFormat::Workbook),
        "csv" => Ok(FileFormat::Csv),
        other => Err(CadenceError::MalformedInput {
            input: source,
            problem: Malformation::UnsupportedFormat(if other.is_empty() {
                input.name.clone()
            } else {
                format!(".{}", other)
            }),
        }),
    }
}

// ============================================================================
// SHEET TABLE
// ============================================================================

static ABSENT_CELL: CellValue = CellValue::Absent;

/// One data row with its spreadsheet row number (header is row 1)
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub number: usize,
    pub cells: Vec<CellValue>,
}

impl TableRow {
    pub fn get(&self, idx: usize) -> &CellValue {
        self.cells.get(idx).unwrap_or(&ABSENT_CELL)
    }

    pub fn text(&self, idx: Option<usize>) -> Option<String> {
        idx.and_then(|i| self.get(i).as_text())
    }

    pub fn number(&self, idx: Option<usize>) -> Option<f64> {
        idx.and_then(|i| self.get(i).as_number())
    }

    pub fn date(&self, idx: Option<usize>) -> Option<chrono::NaiveDate> {
        idx.and_then(|i| self.get(i).as_date())
    }

    fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| c.is_absent())
    }
}

/// The header row and normalized data rows of one sheet
#[derive(Debug, Clone, PartialEq)]
pub struct SheetTable {
    pub sheet_name: String,
    pub headers: Vec<String>,
    pub rows: Vec<TableRow>,
}

impl SheetTable {
    /// Read the preferred sheet (or the CSV body) of an input file.
    /// Blank rows are dropped; row numbers keep their spreadsheet position.
    pub fn read(input: &InputFile, source: SourceType, preferred_sheet: &str) -> Result<Self> {
        match file_format(input, source)? {
            FileFormat::Workbook => Self::from_workbook(input, source, preferred_sheet),
            FileFormat::Csv => Self::from_csv(input, source),
        }
    }

    fn from_workbook(input: &InputFile, source: SourceType, preferred_sheet: &str) -> Result<Self> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(input.bytes.as_slice()))
            .map_err(|e| CadenceError::unreadable(source, e))?;

        let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
        if sheet_names.is_empty() {
            return Err(CadenceError::MalformedInput {
                input: source,
                problem: Malformation::NoSheets,
            });
        }

        let sheet_name = if sheet_names.iter().any(|n| n == preferred_sheet) {
            preferred_sheet.to_string()
        } else {
            warn!(
                "{}: sheet '{}' not found in {}, using '{}'",
                source, preferred_sheet, input.name, sheet_names[0]
            );
            sheet_names[0].clone()
        };

        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(|e| CadenceError::unreadable(source, format!("sheet '{}': {}", sheet_name, e)))?;

        // Ranges start at the first used cell, not necessarily A1
        let first_row = range.start().map(|(r, _)| r as usize).unwrap_or(0);
        let mut rows_iter = range.rows();

        let headers: Vec<String> = match rows_iter.next() {
            Some(cells) => cells.iter().map(header_text).collect(),
            None => Vec::new(),
        };

        let rows = rows_iter
            .enumerate()
            .map(|(idx, cells)| TableRow {
                number: first_row + idx + 2,
                cells: cells.iter().map(CellValue::from_data).collect(),
            })
            .filter(|row| !row.is_blank())
            .collect();

        Ok(SheetTable {
            sheet_name,
            headers,
            rows,
        })
    }

    fn from_csv(input: &InputFile, source: SourceType) -> Result<Self> {
        let bytes = input
            .bytes
            .strip_prefix(b"\xEF\xBB\xBF".as_slice())
            .unwrap_or(input.bytes.as_slice());

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes);

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| CadenceError::unreadable(source, e))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for (line_num, result) in reader.records().enumerate() {
            let record = result.map_err(|e| {
                CadenceError::unreadable(source, format!("CSV line {}: {}", line_num + 2, e))
            })?;
            let row = TableRow {
                number: line_num + 2,
                cells: record.iter().map(CellValue::from_text).collect(),
            };
            if !row.is_blank() {
                rows.push(row);
            }
        }

        Ok(SheetTable {
            sheet_name: input.name.clone(),
            headers,
            rows,
        })
    }

    /// Index of the first header equal to `name`
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

fn header_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        other => CellValue::from_data(other).as_text().unwrap_or_default(),
    }
}

// ============================================================================
// SOURCE DETECTION
// ============================================================================

/// Guess the source type from a filename
///
/// ```
/// use cadence_calculator::parser::{detect_source, SourceType};
/// use std::path::Path;
///
/// assert_eq!(detect_source(Path::new("ARMT_export.xlsx")).unwrap(), SourceType::Armt);
/// assert_eq!(detect_source(Path::new("November_BLR_Cadence.xlsx")).unwrap(), SourceType::Cadence);
/// ```
pub fn detect_source(file_path: &Path) -> Result<SourceType> {
    let filename = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    let filename_lower = filename.to_lowercase();

    if filename_lower.contains("armt") {
        return Ok(SourceType::Armt);
    }

    if filename_lower.contains("outflow") {
        return Ok(SourceType::Outflow);
    }

    if filename_lower.contains("cadence") || filename_lower.contains("master") {
        return Ok(SourceType::Cadence);
    }

    Err(CadenceError::Config(format!(
        "could not detect input type from filename: {}",
        filename
    )))
}

pub fn schema_for(source: SourceType, scheme: KeyScheme) -> SourceSchema {
    match source {
        SourceType::Armt => SourceSchema::armt(),
        SourceType::Cadence => SourceSchema::cadence(scheme),
        SourceType::Outflow => SourceSchema::outflow(),
    }
}

// ============================================================================
// PARSER TRAIT
// ============================================================================

/// Per-file load counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub file_name: String,
    pub sheet_name: String,
    /// Non-blank data rows
    pub rows_read: usize,
    /// Rows (or exploded entries) outside this node's scope
    pub filtered: usize,
    /// Rows whose key could not be formed
    pub skipped: usize,
    pub duplicates: usize,
    pub records: usize,
}

#[derive(Debug, Clone)]
pub struct ParsedSource<R> {
    pub source: SourceType,
    pub records: Vec<R>,
    pub stats: LoadStats,
}

/// Records produced from a table before duplicate resolution
#[derive(Debug, Clone)]
pub struct RowYield<R> {
    pub records: Vec<R>,
    pub filtered: usize,
    pub skipped: usize,
}

impl<R> Default for RowYield<R> {
    fn default() -> Self {
        RowYield {
            records: Vec::new(),
            filtered: 0,
            skipped: 0,
        }
    }
}

pub trait SheetParser {
    type Record: Keyed;

    fn source_type(&self) -> SourceType;

    fn schema(&self) -> SourceSchema;

    /// None for event logs, where repeated keys are expected
    fn duplicate_policy(&self) -> Option<DuplicatePolicy>;

    fn parse_rows(&self, table: &SheetTable) -> Result<RowYield<Self::Record>>;

    /// Read, check the schema, build records and resolve duplicate keys
    fn parse(&self, input: &InputFile, sheet_name: &str) -> Result<ParsedSource<Self::Record>> {
        let source = self.source_type();
        let table = SheetTable::read(input, source, sheet_name)?;
        self.schema().validate(&table.headers)?;

        let rows_read = table.rows.len();
        let yielded = self.parse_rows(&table)?;

        let (records, duplicates) = match self.duplicate_policy() {
            Some(policy) => {
                let resolved = deduplication::resolve(yielded.records, policy, source)?;
                (resolved.records, resolved.duplicates)
            }
            None => (yielded.records, 0),
        };

        if yielded.skipped > 0 {
            warn!(
                "{}: skipped {} rows whose key could not be formed",
                source, yielded.skipped
            );
        }

        info!(
            "{}: {} rows read from {} → {} records ({} out of scope, {} duplicates)",
            source,
            rows_read,
            input.name,
            records.len(),
            yielded.filtered,
            duplicates
        );

        Ok(ParsedSource {
            source,
            stats: LoadStats {
                file_name: input.name.clone(),
                sheet_name: table.sheet_name,
                rows_read,
                filtered: yielded.filtered,
                skipped: yielded.skipped,
                duplicates,
                records: records.len(),
            },
            records,
        })
    }
}

/// Split a comma list into trimmed, non-empty parts
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Text before the first occurrence of `sep`, trimmed
fn head(value: &str, sep: char) -> String {
    value.split(sep).next().unwrap_or("").trim().to_string()
}

// ============================================================================
// ARMT
// ============================================================================

pub struct ArmtParser<'a> {
    profile: &'a NodeProfile,
}

impl<'a> ArmtParser<'a> {
    pub fn new(profile: &'a NodeProfile) -> Self {
        ArmtParser { profile }
    }

    fn record(
        &self,
        program: Program,
        parent: &str,
        child: &str,
        source: &str,
        destination: &str,
        policies: &str,
        risk: Option<f64>,
        row: usize,
    ) -> ArmtRecord {
        let arc = format!("{}-{}", source, destination);
        let (key, lane) = match self.profile.key_scheme {
            KeyScheme::ClassLane => {
                let tail = match program {
                    Program::AmazonGlobal => source,
                    Program::CrossListing => arc.as_str(),
                };
                (format!("{},{},{}", parent, child, tail), Some(arc.clone()))
            }
            KeyScheme::ChildClass => (child.to_string(), None),
        };

        ArmtRecord {
            key,
            program,
            policies: policies.to_string(),
            parent_class: parent.to_string(),
            child_class: child.to_string(),
            source: source.to_string(),
            destination: destination.to_string(),
            lane,
            risk_score: risk,
            row,
        }
    }
}

impl<'a> SheetParser for ArmtParser<'a> {
    type Record = ArmtRecord;

    fn source_type(&self) -> SourceType {
        SourceType::Armt
    }

    fn schema(&self) -> SourceSchema {
        SourceSchema::armt()
    }

    fn duplicate_policy(&self) -> Option<DuplicatePolicy> {
        Some(self.profile.armt_duplicates)
    }

    fn parse_rows(&self, table: &SheetTable) -> Result<RowYield<ArmtRecord>> {
        let program_col = table.column(schema::armt::PROGRAM);
        let source_col = table.column(schema::armt::SOURCE_COUNTRY);
        let dest_col = table.column(schema::armt::DESTINATION_COUNTRY);
        let parent_col = table.column(schema::armt::PARENT_CLASS);
        let child_col = table.column(schema::armt::CHILD_CLASS);
        let policy_col = table.column(schema::armt::POLICY_NAME);
        let score_col = table.column(schema::armt::PARENT_SCORE);

        let mut out = RowYield::default();

        for row in &table.rows {
            let program = match row.text(program_col).as_deref().and_then(Program::parse) {
                Some(p) => p,
                None => {
                    out.filtered += 1;
                    continue;
                }
            };

            let (parent, child) = match (row.text(parent_col), row.text(child_col)) {
                (Some(p), Some(c)) => (p, c),
                _ => {
                    debug!("ARMT row {}: missing class, skipped", row.number);
                    out.skipped += 1;
                    continue;
                }
            };
            let child = if self.profile.key_scheme == KeyScheme::ChildClass && child == "No-Child" {
                parent.clone()
            } else {
                child
            };

            let sources = split_list(&row.text(source_col).unwrap_or_default());
            if sources.is_empty() {
                debug!("ARMT row {}: no source country, skipped", row.number);
                out.skipped += 1;
                continue;
            }
            let destination_raw = row.text(dest_col).unwrap_or_default();
            let policies = row.text(policy_col).unwrap_or_default();
            let risk = row.number(score_col);

            match program {
                Program::AmazonGlobal => {
                    let destination = if destination_raw.contains(',') {
                        "SOME".to_string()
                    } else {
                        destination_raw.trim().to_string()
                    };
                    for source in &sources {
                        if !self.profile.is_core_source(source) {
                            out.filtered += 1;
                            continue;
                        }
                        out.records.push(self.record(
                            program, &parent, &child, source, &destination, &policies, risk,
                            row.number,
                        ));
                    }
                }
                Program::CrossListing => {
                    for destination in split_list(&destination_raw) {
                        for source in &sources {
                            if !self.profile.selects_cross_listing(source, &destination) {
                                out.filtered += 1;
                                continue;
                            }
                            out.records.push(self.record(
                                program, &parent, &child, source, &destination, &policies, risk,
                                row.number,
                            ));
                        }
                    }
                }
            }
        }

        Ok(out)
    }
}

// ============================================================================
// PRIOR CADENCE
// ============================================================================

pub struct CadenceParser {
    scheme: KeyScheme,
    policy: DuplicatePolicy,
}

impl CadenceParser {
    pub fn new(profile: &NodeProfile) -> Self {
        CadenceParser {
            scheme: profile.key_scheme,
            policy: profile.cadence_duplicates,
        }
    }
}

impl SheetParser for CadenceParser {
    type Record = CadenceRecord;

    fn source_type(&self) -> SourceType {
        SourceType::Cadence
    }

    fn schema(&self) -> SourceSchema {
        SourceSchema::cadence(self.scheme)
    }

    fn duplicate_policy(&self) -> Option<DuplicatePolicy> {
        Some(self.policy)
    }

    fn parse_rows(&self, table: &SheetTable) -> Result<RowYield<CadenceRecord>> {
        use schema::cadence as col;

        let combined_col = table.column(col::COMBINED_CLASSES);
        let parent_col = table.column(col::PARENT_CLASSES);
        let child_col = table.column(col::CHILD_CLASSES);
        let source_col = table.column(col::SOURCE);
        let arc_col = table.column(col::ARC);
        let child_class_col = table.column(col::CHILD_CLASS);
        let program_col = table.column(col::PROGRAM);
        let score_col = table.column(col::CADENCE_SCORE);
        let due_col = table.column(col::DUE_DATE);
        let nc_col = table.column(col::NC_COUNT);

        let mut out = RowYield::default();

        for row in &table.rows {
            let program = row.text(program_col);

            let derived = || -> Option<String> {
                match self.scheme {
                    KeyScheme::ClassLane => {
                        let parent = row.text(parent_col)?;
                        let child = row.text(child_col)?;
                        let lane = match program.as_deref() {
                            Some("CrossListing") => row.text(arc_col).or_else(|| row.text(source_col)),
                            _ => row.text(source_col),
                        }?;
                        Some(format!("{},{},{}", parent, child, lane))
                    }
                    KeyScheme::ChildClass => row.text(child_class_col),
                }
            };

            let key = match row.text(combined_col).or_else(derived) {
                Some(k) => k,
                None => {
                    debug!("Cadence row {}: no key, skipped", row.number);
                    out.skipped += 1;
                    continue;
                }
            };

            out.records.push(CadenceRecord {
                key,
                program,
                cadence_score: row.number(score_col),
                due_date: row.date(due_col),
                nc_count: row.number(nc_col),
                row: row.number,
            });
        }

        Ok(out)
    }
}

// ============================================================================
// OUTFLOW
// ============================================================================

pub struct OutflowParser<'a> {
    profile: &'a NodeProfile,
}

impl<'a> OutflowParser<'a> {
    pub fn new(profile: &'a NodeProfile) -> Self {
        OutflowParser { profile }
    }
}

impl<'a> SheetParser for OutflowParser<'a> {
    type Record = OutflowRecord;

    fn source_type(&self) -> SourceType {
        SourceType::Outflow
    }

    fn schema(&self) -> SourceSchema {
        SourceSchema::outflow()
    }

    fn duplicate_policy(&self) -> Option<DuplicatePolicy> {
        None
    }

    fn parse_rows(&self, table: &SheetTable) -> Result<RowYield<OutflowRecord>> {
        use schema::outflow as col;

        let cause_col = table.column(col::ROOT_CAUSE);
        let details_col = table.column(col::ROOT_CAUSE_DETAILS);
        let description_col = table.column(col::SHORT_DESCRIPTION);
        let resolved_col = table.column(col::RESOLVED_DATE);
        let resolution_col = table.column(col::RESOLUTION);
        let quantity_col = table.column(col::QUANTITY);
        let vendor_col = table.column(col::VENDOR_ID);
        let group_col = table.column(col::ASSIGNED_TO_GROUP);

        let mut out = RowYield::default();

        for row in &table.rows {
            let (root_cause, details) = match (row.text(cause_col), row.text(details_col)) {
                (Some(c), Some(d)) => (c, d),
                _ => {
                    out.filtered += 1;
                    continue;
                }
            };

            let excluded_group = row
                .text(group_col)
                .map_or(false, |g| self.profile.excludes_group(&g));
            if excluded_group || self.profile.excludes_root_cause(&root_cause) {
                out.filtered += 1;
                continue;
            }

            let parent = head(&details, '\\');
            let child = row
                .text(description_col)
                .map(|d| head(&d, ':'))
                .unwrap_or_default();
            if parent.is_empty() || child.is_empty() {
                debug!("Outflow row {}: missing class, skipped", row.number);
                out.skipped += 1;
                continue;
            }

            let resolution = row
                .text(resolution_col)
                .map(|r| head(&r, '\\'))
                .unwrap_or_default();

            let (key, lane_key) = match self.profile.key_scheme {
                KeyScheme::ClassLane => {
                    let source = head(&resolution, '-');
                    if source.is_empty() {
                        debug!("Outflow row {}: no resolution lane, skipped", row.number);
                        out.skipped += 1;
                        continue;
                    }
                    let child = if child == parent { "No-Child" } else { child.as_str() };
                    let lane_key = resolution
                        .contains('-')
                        .then(|| format!("{},{},{}", parent, child, resolution));
                    (format!("{},{},{}", parent, child, source), lane_key)
                }
                KeyScheme::ChildClass => {
                    let key = if child == parent || child == "No-Child" {
                        parent.clone()
                    } else {
                        child.clone()
                    };
                    (key, None)
                }
            };

            let quantity = row.number(quantity_col).unwrap_or(0.0);
            let vendor = row.number(vendor_col).unwrap_or(0.0).trunc();

            out.records.push(OutflowRecord {
                key,
                lane_key,
                parent_class: parent,
                child_class: child,
                resolution,
                root_cause,
                resolved_date: row.date(resolved_col),
                nc_units: quantity + vendor,
                row: row.number,
            });
        }

        Ok(out)
    }
}

// ============================================================================
// INSPECT
// ============================================================================

/// Shape of one input file, without running the pipeline
#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    pub source: SourceType,
    pub file_name: String,
    pub sheet_name: String,
    pub headers: Vec<String>,
    pub rows: usize,
    pub missing_columns: Vec<&'static str>,
}

impl InspectReport {
    pub fn is_valid(&self) -> bool {
        self.missing_columns.is_empty()
    }
}

pub fn inspect(
    input: &InputFile,
    source: SourceType,
    sheet_name: &str,
    scheme: KeyScheme,
) -> Result<InspectReport> {
    let table = SheetTable::read(input, source, sheet_name)?;
    let missing_columns = schema_for(source, scheme).missing_columns(&table.headers);

    Ok(InspectReport {
        source,
        file_name: input.name.clone(),
        sheet_name: table.sheet_name,
        rows: table.rows.len(),
        headers: table.headers,
        missing_columns,
    })
}

// ============================================================================
// TESTS
// ============================================================================
