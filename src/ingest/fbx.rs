//! Freightos Baltic (FBX) container freight index

use super::{row_date, weekly_mean, RawTable};
use crate::error::ForecastError;
use crate::lake::{self, DataLake};
use crate::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

const DATE_COLUMNS: [&str; 4] = ["date", "observation_date", "day", "dt"];
const INDEX_COLUMNS: [&str; 6] = ["fbx_global", "fbx", "index", "fbx_index", "price", "value"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FbxWeek {
    pub week_start: NaiveDate,
    pub fbx: f64,
}

/// Weekly mean of the freight index per Monday.
pub fn parse_fbx(table: &RawTable) -> Result<Vec<FbxWeek>> {
    if table.is_empty() {
        return Err(ForecastError::Ingestion("FBX file is empty".to_string()));
    }

    let index_col = table.pick(&INDEX_COLUMNS).ok_or_else(|| {
        ForecastError::MissingColumn(format!("no recognizable FBX column in {:?}", table.columns))
    })?;
    let date_col = table.pick(&DATE_COLUMNS);
    let year_col = table.pick(&["year", "yr"]);
    let week_col = table.pick(&["week", "wk"]);
    if date_col.is_none() && (year_col.is_none() || week_col.is_none()) {
        return Err(ForecastError::MissingColumn(
            "no date column (looked for date or year+week)".to_string(),
        ));
    }

    let points = table.rows().filter_map(|row| {
        let date = row_date(&row, date_col, year_col, week_col)?;
        Some((date, row.number(Some(index_col))?))
    });

    let weeks: Vec<FbxWeek> = weekly_mean(points)
        .into_iter()
        .map(|(week_start, fbx)| FbxWeek { week_start, fbx })
        .collect();

    if weeks.is_empty() {
        return Err(ForecastError::Ingestion(
            "no valid rows after parsing date and FBX index".to_string(),
        ));
    }
    Ok(weeks)
}

pub fn standardize_fbx(lake: &DataLake, snapshot: NaiveDate) -> Result<PathBuf> {
    let source = lake.latest_raw_file(lake::RAW_FBX, &[".csv"])?;
    info!(path = %source.display(), snapshot = %snapshot, "reading FBX index");

    let table = RawTable::from_path(&source)?;
    let weeks = parse_fbx(&table)?;

    let dest = lake.snapshot_path(lake::FBX, snapshot, "fbx.csv");
    lake.write_csv(&dest, &weeks)?;
    info!(weeks = weeks.len(), dest = %dest.display(), "FBX written");
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daily_index_reduced_to_weeks() {
        let table = RawTable::from_csv_str(
            "Date,FBX Global\n\
             2025-01-06,2000\n\
             2025-01-08,2200\n\
             2025-01-14,2500\n\
             2025-01-15,n/a\n",
        )
        .unwrap();

        let weeks = parse_fbx(&table).unwrap();
        assert_eq!(weeks.len(), 2);
        assert_eq!(weeks[0].week_start, NaiveDate::from_ymd_opt(2025, 1, 6).unwrap());
        assert_eq!(weeks[0].fbx, 2100.0);
        assert_eq!(weeks[1].fbx, 2500.0);
    }

    #[test]
    fn test_missing_index_column() {
        let table = RawTable::from_csv_str("date,volume\n2025-01-06,1\n").unwrap();
        assert!(parse_fbx(&table).is_err());
    }
}
