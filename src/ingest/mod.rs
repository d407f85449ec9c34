//! Source ingestion and harmonisation
//!
//! Each job reads a raw source, normalises headers and dates, aligns the
//! series to Monday week starts and writes a processed snapshot.

pub mod eu_prices;
pub mod fbx;
pub mod macros;
pub mod tariffs;

pub use eu_prices::{standardize_eu_prices, EuPriceRow};
pub use fbx::{standardize_fbx, FbxWeek};
pub use macros::{ingest_macros, HttpMacroSource, MacroSeries, MacroSource, MacroWeek, SeriesPoint};
pub use tariffs::{normalize_tariffs, TariffRow};

use crate::error::ForecastError;
use crate::Result;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Olive oil density in kg per litre.
pub const DENSITY_KG_PER_L: f64 = 0.916;

lazy_static! {
    static ref NON_WORD: Regex = Regex::new(r"\W+").unwrap();
}

/// Unit of an ambiguous `price` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceUnit {
    PerL,
    PerKg,
    Per100Kg,
}

impl PriceUnit {
    /// Convert a price in this unit to EUR per litre.
    pub fn to_eur_per_l(&self, value: f64) -> f64 {
        match self {
            PriceUnit::PerL => value,
            PriceUnit::PerKg => value * DENSITY_KG_PER_L,
            PriceUnit::Per100Kg => value / 100.0 * DENSITY_KG_PER_L,
        }
    }
}

impl FromStr for PriceUnit {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "per_l" => Ok(PriceUnit::PerL),
            "per_kg" => Ok(PriceUnit::PerKg),
            "per_100kg" => Ok(PriceUnit::Per100Kg),
            other => Err(ForecastError::Config(format!("unknown price unit: {}", other))),
        }
    }
}

impl fmt::Display for PriceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PriceUnit::PerL => "per_l",
            PriceUnit::PerKg => "per_kg",
            PriceUnit::Per100Kg => "per_100kg",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Raw tables =================
//

/// A raw CSV with normalised headers and untyped cells
#[derive(Debug, Clone)]
pub struct RawTable {
    pub columns: Vec<String>,
    rows: Vec<csv::StringRecord>,
}

impl RawTable {
    pub fn from_path(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let columns = reader.headers()?.iter().map(normalize_header).collect();
        let rows = reader.records().collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { columns, rows })
    }

    #[cfg(test)]
    pub fn from_csv_str(data: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(data.as_bytes());
        let columns = reader.headers()?.iter().map(normalize_header).collect();
        let rows = reader.records().collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { columns, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First candidate present among the columns.
    pub fn pick(&self, candidates: &[&str]) -> Option<usize> {
        candidates
            .iter()
            .find_map(|c| self.columns.iter().position(|col| col == c))
    }

    pub fn column_name(&self, idx: usize) -> &str {
        &self.columns[idx]
    }

    pub fn rows(&self) -> impl Iterator<Item = RawRow<'_>> {
        self.rows.iter().map(RawRow)
    }
}

pub struct RawRow<'a>(&'a csv::StringRecord);

impl<'a> RawRow<'a> {
    pub fn text(&self, idx: Option<usize>) -> Option<&'a str> {
        let value = self.0.get(idx?)?.trim();
        (!value.is_empty()).then_some(value)
    }

    pub fn number(&self, idx: Option<usize>) -> Option<f64> {
        parse_number(self.text(idx)?)
    }
}

//
// ================= Helpers =================
//

/// snake_case + lowercase, runs of non-word characters become `_`.
pub fn normalize_header(raw: &str) -> String {
    NON_WORD
        .replace_all(raw.trim().to_lowercase().as_str(), "_")
        .into_owned()
}

/// Parse a numeric cell. Accepts decimal commas, thousands separators
/// and the `.` placeholder FRED uses for missing values.
pub fn parse_number(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() || s == "." || s.eq_ignore_ascii_case("nan") || s.eq_ignore_ascii_case("na") {
        return None;
    }
    if let Ok(v) = s.parse::<f64>() {
        return v.is_finite().then_some(v);
    }
    let cleaned = if s.contains(',') && !s.contains('.') {
        s.replace(',', ".")
    } else {
        s.replace(',', "")
    };
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse ISO dates, ISO datetimes, `dd/mm/yyyy` and epoch milliseconds.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    for fmt in ["%d/%m/%Y", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    if s.len() >= 10 && s.chars().all(|c| c.is_ascii_digit()) {
        let ms: i64 = s.parse().ok()?;
        return Utc.timestamp_millis_opt(ms).single().map(|dt| dt.date_naive());
    }
    None
}

/// Monday of an ISO (year, week).
pub fn iso_week_start(year: i32, week: u32) -> Option<NaiveDate> {
    NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)
}

/// Monday of the week containing `date`.
pub fn to_monday(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// Mean per Monday week start, ordered by week.
pub fn weekly_mean(points: impl IntoIterator<Item = (NaiveDate, f64)>) -> BTreeMap<NaiveDate, f64> {
    let mut acc: HashMap<NaiveDate, (f64, usize)> = HashMap::new();
    for (date, value) in points {
        let entry = acc.entry(to_monday(date)).or_insert((0.0, 0));
        entry.0 += value;
        entry.1 += 1;
    }
    acc.into_iter()
        .map(|(week, (sum, n))| (week, sum / n as f64))
        .collect()
}

/// Resolve a row's date from a date column or ISO year + week columns.
pub(crate) fn row_date(
    row: &RawRow<'_>,
    date_col: Option<usize>,
    year_col: Option<usize>,
    week_col: Option<usize>,
) -> Option<NaiveDate> {
    if date_col.is_some() {
        return row.text(date_col).and_then(parse_date);
    }
    let year = row.number(year_col)? as i32;
    let week = row.number(week_col)? as u32;
    iso_week_start(year, week)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("Member State"), "member_state");
        assert_eq!(normalize_header(" Price (EUR/100kg) "), "price_eur_100kg_");
        assert_eq!(normalize_header("ReferenceFrom"), "referencefrom");
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("2025-01-15"), Some(d("2025-01-15")));
        assert_eq!(parse_date("2025-01-15T10:30:00"), Some(d("2025-01-15")));
        assert_eq!(parse_date("15/01/2025"), Some(d("2025-01-15")));
        assert_eq!(parse_date("1736899200000"), Some(d("2025-01-15")));
        assert_eq!(parse_date("soon"), None);
    }

    #[test]
    fn test_week_alignment() {
        assert_eq!(to_monday(d("2025-01-15")), d("2025-01-13"));
        assert_eq!(to_monday(d("2025-01-13")), d("2025-01-13"));
        assert_eq!(to_monday(d("2025-01-19")), d("2025-01-13"));
        assert_eq!(iso_week_start(2025, 3), Some(d("2025-01-13")));
        assert_eq!(iso_week_start(2020, 53), Some(d("2020-12-28")));
    }

    #[test]
    fn test_price_unit_conversion() {
        assert!((PriceUnit::Per100Kg.to_eur_per_l(400.0) - 3.664).abs() < 1e-9);
        assert!((PriceUnit::PerKg.to_eur_per_l(4.0) - 3.664).abs() < 1e-9);
        assert_eq!(PriceUnit::PerL.to_eur_per_l(3.5), 3.5);
        assert_eq!("per_kg".parse::<PriceUnit>().unwrap(), PriceUnit::PerKg);
        assert!("per_barrel".parse::<PriceUnit>().is_err());
    }

    #[test]
    fn test_parse_number_variants() {
        assert_eq!(parse_number("."), None);
        assert_eq!(parse_number("3,5"), Some(3.5));
        assert_eq!(parse_number("1,234.5"), Some(1234.5));
        assert_eq!(parse_number(" 42 "), Some(42.0));
    }

    #[test]
    fn test_weekly_mean_groups_by_monday() {
        let weekly = weekly_mean(vec![
            (d("2025-01-13"), 1.0),
            (d("2025-01-15"), 3.0),
            (d("2025-01-20"), 5.0),
        ]);
        assert_eq!(weekly.len(), 2);
        assert_eq!(weekly[&d("2025-01-13")], 2.0);
        assert_eq!(weekly[&d("2025-01-20")], 5.0);
    }
}
