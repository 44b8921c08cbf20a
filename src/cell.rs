// 🧱 Cell Normalization - typed cell values at the parse boundary
// Loosely-typed spreadsheet cells become one of four explicit shapes,
// so merge and scoring never look at raw cell types again.

use calamine::Data;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Sentinel strings that mean "no value" in the sheets we ingest.
/// Previous reports write absent cells as `not Found!`.
const ABSENT_SENTINELS: &[&str] = &["not found!", "not found", "nan", "nat", "none", "null", ""];

/// Excel's 1900 date system counts days from 1899-12-30
const EXCEL_EPOCH: (i32, u32, u32) = (1899, 12, 30);

/// Serial of 9999-12-31, the last date Excel can hold
const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

// ============================================================================
// CELL VALUE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Absent,
    Text(String),
    Number(f64),
    Date(NaiveDate),
}

impl CellValue {
    /// Normalize a text cell (CSV input, or a string cell in a workbook)
    pub fn from_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if is_absent_text(trimmed) {
            CellValue::Absent
        } else {
            CellValue::Text(trimmed.to_string())
        }
    }

    /// Normalize a calamine cell
    pub fn from_data(data: &Data) -> Self {
        match data {
            Data::Empty => CellValue::Absent,
            Data::String(s) => CellValue::from_text(s),
            Data::Float(n) => {
                if n.is_nan() {
                    CellValue::Absent
                } else {
                    CellValue::Number(*n)
                }
            }
            Data::Int(n) => CellValue::Number(*n as f64),
            Data::Bool(b) => CellValue::Text(if *b { "TRUE" } else { "FALSE" }.to_string()),
            Data::Error(_) => CellValue::Absent,
            Data::DateTime(dt) => match excel_serial_to_date(dt.as_f64()) {
                Some(date) => CellValue::Date(date),
                None => CellValue::Absent,
            },
            Data::DateTimeIso(s) => match parse_date(s) {
                Some(date) => CellValue::Date(date),
                None => CellValue::from_text(s),
            },
            Data::DurationIso(s) => CellValue::from_text(s),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, CellValue::Absent)
    }

    /// Text rendering of the cell; integral numbers print without decimals
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Absent => None,
            CellValue::Text(s) => Some(s.clone()),
            CellValue::Number(n) => Some(format_number(*n)),
            CellValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => s.replace(',', "").parse::<f64>().ok().filter(|n| !n.is_nan()),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            CellValue::Date(d) => Some(*d),
            CellValue::Text(s) => parse_date(s),
            // Date columns sometimes arrive as raw serials
            CellValue::Number(n) => excel_serial_to_date(*n),
            CellValue::Absent => None,
        }
    }
}

impl Default for CellValue {
    fn default() -> Self {
        CellValue::Absent
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// True for blank cells and the "not found" family of sentinels
pub fn is_absent_text(value: &str) -> bool {
    let lower = value.trim().to_lowercase();
    ABSENT_SENTINELS.contains(&lower.as_str())
}

/// Integers without decimals, everything else as-is
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Parse the date shapes found in ARMT, outflow and prior cadence exports
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if is_absent_text(value) {
        return None;
    }

    for format in ["%Y-%m-%d", "%m/%d/%Y", "%d.%m.%Y", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date);
        }
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.date());
        }
    }

    // "2025-11-03 14:22" and friends: the date part is enough
    let head = value.split(|c: char| c == ' ' || c == 'T').next()?;
    if head.len() < value.len() {
        return parse_date(head);
    }

    None
}

/// Convert an Excel 1900-system serial to a calendar date
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || !(1.0..=MAX_EXCEL_SERIAL).contains(&serial) {
        return None;
    }
    let (y, m, d) = EXCEL_EPOCH;
    let epoch = NaiveDate::from_ymd_opt(y, m, d)?;
    epoch.checked_add_signed(Duration::days(serial.floor() as i64))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_sentinels() {
        assert!(CellValue::from_text("").is_absent());
        assert!(CellValue::from_text("   ").is_absent());
        assert!(CellValue::from_text("not Found!").is_absent());
        assert!(CellValue::from_text("NaN").is_absent());
        assert!(CellValue::from_text("NaT").is_absent());
        assert!(!CellValue::from_text("0").is_absent());
    }

    #[test]
    fn test_blank_numeric_is_absent_not_zero() {
        assert_eq!(CellValue::from_text("").as_number(), None);
        assert_eq!(CellValue::from_data(&Data::Empty).as_number(), None);
        assert_eq!(CellValue::from_data(&Data::Float(f64::NAN)).as_number(), None);
        assert_eq!(CellValue::from_text("0").as_number(), Some(0.0));
    }

    #[test]
    fn test_number_text_rendering() {
        assert_eq!(CellValue::Number(30.0).as_text(), Some("30".to_string()));
        assert_eq!(CellValue::Number(2.5).as_text(), Some("2.5".to_string()));
        assert_eq!(CellValue::from_data(&Data::Int(4)).as_number(), Some(4.0));
        assert_eq!(CellValue::from_text("1,250").as_number(), Some(1250.0));
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 11, 3).unwrap();
        assert_eq!(parse_date("2025-11-03"), Some(expected));
        assert_eq!(parse_date("11/03/2025"), Some(expected));
        assert_eq!(parse_date("03.11.2025"), Some(expected));
        assert_eq!(parse_date("2025-11-03 14:22:10"), Some(expected));
        assert_eq!(parse_date("2025-11-03 14:22"), Some(expected));
        assert_eq!(parse_date("not Found!"), None);
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn test_excel_serial() {
        // 45000 is 2023-03-15 in the 1900 system
        assert_eq!(
            excel_serial_to_date(45000.0),
            NaiveDate::from_ymd_opt(2023, 3, 15)
        );
        assert_eq!(
            excel_serial_to_date(45000.75),
            NaiveDate::from_ymd_opt(2023, 3, 15)
        );
        assert_eq!(excel_serial_to_date(0.0), None);
        assert_eq!(CellValue::Number(45000.0).as_date(), NaiveDate::from_ymd_opt(2023, 3, 15));
    }

    #[test]
    fn test_excel_serial_out_of_range_is_absent() {
        assert_eq!(
            excel_serial_to_date(2_958_465.0),
            NaiveDate::from_ymd_opt(9999, 12, 31)
        );
        assert_eq!(excel_serial_to_date(2_958_466.0), None);
        assert_eq!(excel_serial_to_date(1e15), None);
        assert_eq!(CellValue::Number(1e15).as_date(), None);
        assert_eq!(CellValue::from_data(&Data::Float(1e300)).as_date(), None);
    }
}
