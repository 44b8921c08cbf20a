// 📅 Reporting Period - the "output month" a run is computed for

use crate::error::{CadenceError, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const MONTHS: [&str; 12] = [
    "January", "February", "March", "April", "May", "June",
    "July", "August", "September", "October", "November", "December",
];

/// Year + month identifying one cadence report
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReportingPeriod {
    year: i32,
    month: u32,
}

impl ReportingPeriod {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(CadenceError::InvalidPeriod(format!("{}-{}", year, month)));
        }
        Ok(ReportingPeriod { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        ReportingPeriod {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn month_name(&self) -> &'static str {
        MONTHS[(self.month - 1) as usize]
    }

    /// `2025-12`
    pub fn code(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }

    /// Period right before this one (the month the prior cadence file covers)
    pub fn previous(&self) -> Self {
        if self.month == 1 {
            ReportingPeriod { year: self.year - 1, month: 12 }
        } else {
            ReportingPeriod { year: self.year, month: self.month - 1 }
        }
    }
}

fn month_from_name(name: &str) -> Option<u32> {
    let lower = name.trim().to_lowercase();
    if lower.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|m| m.to_lowercase().starts_with(&lower))
        .map(|i| i as u32 + 1)
}

impl FromStr for ReportingPeriod {
    type Err = CadenceError;

    /// Accepts `2025-12`, `2025-12-01`, `December 2025`, `Dec 2025`
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let invalid = || CadenceError::InvalidPeriod(trimmed.to_string());

        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            return Ok(ReportingPeriod::from_date(date));
        }

        if let Some((y, m)) = trimmed.split_once('-') {
            let year: i32 = y.parse().map_err(|_| invalid())?;
            let month: u32 = m.parse().map_err(|_| invalid())?;
            return ReportingPeriod::new(year, month).map_err(|_| invalid());
        }

        let mut parts = trimmed.split_whitespace();
        let month = parts.next().and_then(month_from_name).ok_or_else(invalid)?;
        let year: i32 = parts
            .next()
            .ok_or_else(invalid)?
            .parse()
            .map_err(|_| invalid())?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        ReportingPeriod::new(year, month)
    }
}

impl fmt::Display for ReportingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.month_name(), self.year)
    }
}

impl Serialize for ReportingPeriod {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.code())
    }
}

impl<'de> Deserialize<'de> for ReportingPeriod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_year_month() {
        let period: ReportingPeriod = "2025-12".parse().unwrap();
        assert_eq!(period.year(), 2025);
        assert_eq!(period.month(), 12);
        assert_eq!(period.month_name(), "December");
        assert_eq!(period.code(), "2025-12");
        assert_eq!(period.to_string(), "December 2025");
    }

    #[test]
    fn test_parse_month_name() {
        assert_eq!(
            "December 2025".parse::<ReportingPeriod>().unwrap(),
            ReportingPeriod::new(2025, 12).unwrap()
        );
        assert_eq!(
            "sep 2024".parse::<ReportingPeriod>().unwrap(),
            ReportingPeriod::new(2024, 9).unwrap()
        );
        assert_eq!(
            "2024-03-15".parse::<ReportingPeriod>().unwrap(),
            ReportingPeriod::new(2024, 3).unwrap()
        );
    }

    #[test]
    fn test_rejects_bad_periods() {
        assert!("2025-13".parse::<ReportingPeriod>().is_err());
        assert!("December".parse::<ReportingPeriod>().is_err());
        assert!("Smarch 2025".parse::<ReportingPeriod>().is_err());
        assert!("".parse::<ReportingPeriod>().is_err());
    }

    #[test]
    fn test_previous_wraps_year() {
        let january = ReportingPeriod::new(2025, 1).unwrap();
        assert_eq!(january.previous(), ReportingPeriod::new(2024, 12).unwrap());
    }

    #[test]
    fn test_serde_as_code() {
        let period = ReportingPeriod::new(2025, 6).unwrap();
        let json = serde_json::to_string(&period).unwrap();
        assert_eq!(json, "\"2025-06\"");
        let back: ReportingPeriod = serde_json::from_str(&json).unwrap();
        assert_eq!(back, period);
    }
}
