//! US MFN tariff reference for HS headings 1509/1510

use super::RawTable;
use crate::error::ForecastError;
use crate::lake::{self, DataLake};
use crate::models::Grade;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

const HS_COLUMNS: [&str; 5] = ["hs_prefix", "hs4", "hs_code", "hs", "hts8"];
const ADVAL_COLUMNS: [&str; 5] = [
    "mfn_ad_val_rate",
    "mfn_ave",
    "mfn_ad_val",
    "adval_pct",
    "ad_valorem_pct",
];
const SPECIFIC_COLUMNS: [&str; 4] = [
    "mfn_specific_rate",
    "mfn_specific",
    "specific_usd_per_kg",
    "specific_rate",
];
const GRADE_COLUMNS: [&str; 4] = ["grade", "product_grade", "category", "quality"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TariffRow {
    pub grade: Option<Grade>,
    pub hs_prefix: String,
    pub adval_pct: f64,
    pub specific_usd_per_kg: f64,
}

/// Duty per litre: ad-valorem share of the USD price plus the specific
/// rate converted from kg to litres.
pub fn duty_usd_per_l(tariff: &TariffRow, price_usd_per_l: f64) -> f64 {
    tariff.adval_pct / 100.0 * price_usd_per_l + tariff.specific_usd_per_kg * super::DENSITY_KG_PER_L
}

/// Tariff applying to a grade: an exact (grade, HS) match wins over a
/// grade-less row for the same heading.
pub fn tariff_for_grade(tariffs: &[TariffRow], grade: Grade) -> Option<&TariffRow> {
    let hs = grade.hs_prefix();
    tariffs
        .iter()
        .rev()
        .find(|t| t.hs_prefix == hs && t.grade == Some(grade))
        .or_else(|| tariffs.iter().rev().find(|t| t.hs_prefix == hs && t.grade.is_none()))
        .or_else(|| tariffs.iter().rev().find(|t| t.hs_prefix == hs))
}

pub fn parse_tariffs(table: &RawTable) -> Result<Vec<TariffRow>> {
    if table.is_empty() {
        return Err(ForecastError::Ingestion("tariffs file is empty".to_string()));
    }

    let hs_col = table.pick(&HS_COLUMNS).ok_or_else(|| {
        ForecastError::MissingColumn(format!("no hs_prefix-like column in {:?}", table.columns))
    })?;
    let adval_col = table.pick(&ADVAL_COLUMNS);
    let spec_col = table.pick(&SPECIFIC_COLUMNS);
    let grade_col = table.pick(&GRADE_COLUMNS);

    let mut rows: Vec<TariffRow> = Vec::new();
    for row in table.rows() {
        let digits: String = row
            .text(Some(hs_col))
            .unwrap_or_default()
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        if digits.is_empty() {
            continue;
        }

        let tariff = TariffRow {
            grade: row.text(grade_col).and_then(Grade::canonical),
            hs_prefix: digits.chars().take(4).collect(),
            adval_pct: row.number(adval_col).unwrap_or(0.0),
            specific_usd_per_kg: row.number(spec_col).unwrap_or(0.0),
        };

        // Later rows replace earlier ones for the same (grade, heading).
        rows.retain(|t| !(t.grade == tariff.grade && t.hs_prefix == tariff.hs_prefix));
        rows.push(tariff);
    }

    if rows.is_empty() {
        return Err(ForecastError::Ingestion(
            "no tariff rows with an HS code after cleaning".to_string(),
        ));
    }
    Ok(rows)
}

pub fn normalize_tariffs(lake: &DataLake) -> Result<PathBuf> {
    let source = lake.latest_raw_file(lake::RAW_TARIFFS, &[".csv"])?;
    info!(path = %source.display(), "reading tariffs");

    let table = RawTable::from_path(&source)?;
    let rows = parse_tariffs(&table)?;

    let dest = lake.path(lake::TARIFFS_LATEST).join("tariffs.csv");
    lake.write_csv(&dest, &rows)?;
    info!(rows = rows.len(), dest = %dest.display(), "tariffs written");
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hts8_reduced_and_deduplicated() {
        let table = RawTable::from_csv_str(
            "HTS8,MFN Ad Val Rate,MFN Specific Rate\n\
             15091020,0,0.05\n\
             1509.90.20,0,0.034\n\
             15100020,3.4,\n",
        )
        .unwrap();

        let rows = parse_tariffs(&table).unwrap();
        assert_eq!(rows.len(), 2);
        let olive = rows.iter().find(|t| t.hs_prefix == "1509").unwrap();
        assert_eq!(olive.specific_usd_per_kg, 0.034);
        let pomace = rows.iter().find(|t| t.hs_prefix == "1510").unwrap();
        assert_eq!(pomace.adval_pct, 3.4);
        assert_eq!(pomace.specific_usd_per_kg, 0.0);
    }

    #[test]
    fn test_duty_and_grade_lookup() {
        let tariffs = vec![
            TariffRow { grade: None, hs_prefix: "1509".into(), adval_pct: 0.0, specific_usd_per_kg: 0.05 },
            TariffRow { grade: None, hs_prefix: "1510".into(), adval_pct: 10.0, specific_usd_per_kg: 0.0 },
        ];

        let evoo = tariff_for_grade(&tariffs, Grade::ExtraVirgin).unwrap();
        assert!((duty_usd_per_l(evoo, 4.0) - 0.0458).abs() < 1e-9);

        let pomace = tariff_for_grade(&tariffs, Grade::Pomace).unwrap();
        assert!((duty_usd_per_l(pomace, 2.0) - 0.2).abs() < 1e-9);
    }
}
