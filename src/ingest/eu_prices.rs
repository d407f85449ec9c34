//! EU member-state olive oil price sheets

use super::{row_date, PriceUnit, RawTable};
use crate::error::ForecastError;
use crate::lake::{self, DataLake};
use crate::models::{country_code, Grade};
use crate::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

const DATE_COLUMNS: [&str; 4] = ["referencefrom", "reference_from", "ref_from", "date"];
const YEAR_COLUMNS: [&str; 2] = ["year", "yr"];
const WEEK_COLUMNS: [&str; 2] = ["week", "wk"];
const COUNTRY_COLUMNS: [&str; 3] = ["member_state", "memberstate", "country"];
const MARKET_COLUMNS: [&str; 3] = ["market", "city", "location"];
const GRADE_COLUMNS: [&str; 5] = ["category", "product", "prod", "grade", "variety"];
const PRICE_COLUMNS: [&str; 7] = [
    "price",
    "price_eur_per_l",
    "price_eur_per_kg",
    "eur_per_l",
    "eur_per_kg",
    "eur_100kg",
    "price_eur_per_100kg",
];

/// Standardised price observation in EUR per litre
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EuPriceRow {
    pub date: NaiveDate,
    pub country: Option<String>,
    pub market: Option<String>,
    pub grade: Option<Grade>,
    pub price_eur_per_l: f64,
}

/// Unit implied by the price column name; the bare `price` header falls
/// back to the configured unit.
fn unit_for_column(column: &str, fallback: PriceUnit) -> PriceUnit {
    match column {
        "price_eur_per_l" | "eur_per_l" => PriceUnit::PerL,
        "price_eur_per_kg" | "eur_per_kg" => PriceUnit::PerKg,
        "eur_100kg" | "price_eur_per_100kg" => PriceUnit::Per100Kg,
        _ => fallback,
    }
}

/// Parse a raw price table into EUR/L rows sorted by date.
pub fn parse_eu_prices(table: &RawTable, unit: PriceUnit) -> Result<Vec<EuPriceRow>> {
    if table.is_empty() {
        return Err(ForecastError::Ingestion("EU prices file is empty".to_string()));
    }

    let price_col = table.pick(&PRICE_COLUMNS).ok_or_else(|| {
        ForecastError::MissingColumn(format!(
            "no recognizable price column in {:?}",
            table.columns
        ))
    })?;
    let date_col = table.pick(&DATE_COLUMNS);
    let year_col = table.pick(&YEAR_COLUMNS);
    let week_col = table.pick(&WEEK_COLUMNS);
    if date_col.is_none() && (year_col.is_none() || week_col.is_none()) {
        return Err(ForecastError::MissingColumn(
            "no date column (looked for referencefrom or year+week)".to_string(),
        ));
    }

    let country_col = table.pick(&COUNTRY_COLUMNS);
    let market_col = table.pick(&MARKET_COLUMNS);
    let grade_col = table.pick(&GRADE_COLUMNS);
    let unit = unit_for_column(table.column_name(price_col), unit);

    info!(columns = ?table.columns, price_column = table.column_name(price_col), unit = %unit, "EU price columns resolved");

    let mut rows: Vec<EuPriceRow> = table
        .rows()
        .filter_map(|row| {
            let date = row_date(&row, date_col, year_col, week_col)?;
            let price = row.number(Some(price_col))?;
            Some(EuPriceRow {
                date,
                country: row
                    .text(country_col)
                    .map(|c| country_code(c).unwrap_or_else(|| c.to_string())),
                market: row.text(market_col).map(str::to_string),
                grade: row.text(grade_col).and_then(Grade::canonical),
                price_eur_per_l: unit.to_eur_per_l(price),
            })
        })
        .collect();

    if rows.is_empty() {
        return Err(ForecastError::Ingestion(
            "no valid rows after parsing date and price".to_string(),
        ));
    }

    rows.sort_by_key(|r| r.date);
    Ok(rows)
}

/// Standardise the newest raw EU price file into the snapshot partition.
pub fn standardize_eu_prices(
    lake: &DataLake,
    snapshot: NaiveDate,
    unit: PriceUnit,
) -> Result<PathBuf> {
    let source = lake.latest_raw_file(lake::RAW_EU_PRICES, &[".csv"])?;
    info!(path = %source.display(), snapshot = %snapshot, "reading EU prices");

    let table = RawTable::from_path(&source)?;
    let rows = parse_eu_prices(&table, unit)?;

    let dest = lake.snapshot_path(lake::EU_PRICES, snapshot, "eu_prices.csv");
    lake.write_csv(&dest, &rows)?;
    info!(
        rows = rows.len(),
        dropped = table.len() - rows.len(),
        first = %rows[0].date,
        last = %rows[rows.len() - 1].date,
        dest = %dest.display(),
        "EU prices written"
    );
    Ok(dest)
}
