//! Feature engineering over the weekly panel

use crate::error::ForecastError;
use crate::lake::{self, DataLake};
use crate::models::{FeatureRow, Grade, PanelRecord};
use crate::panel::load_panel;
use crate::Result;
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::path::PathBuf;
use tracing::{info, warn};

/// Ordered model inputs.
pub const FEATURE_SCHEMA: [&str; 9] = [
    "lag1week",
    "lag2week",
    "rolling3",
    "rolling10",
    "month",
    "dayofweek",
    "quarter",
    "sin_week",
    "cost_pressure",
];

pub const FEATURE_COUNT: usize = FEATURE_SCHEMA.len();

/// Cost drivers and their weights in the composite pressure index.
const COST_DRIVERS: [(&str, f64); 5] = [
    ("ocean_proxy", 0.4),
    ("diesel_usd_per_gal", 0.3),
    ("ppi_glass", 0.1),
    ("ppi_plastic_bottles", 0.1),
    ("ppi_steel", 0.1),
];

fn driver_value(record: &PanelRecord, driver: &str) -> Option<f64> {
    match driver {
        "ocean_proxy" => record.ocean_proxy,
        "diesel_usd_per_gal" => record.diesel_usd_per_gal,
        "ppi_glass" => record.ppi_glass,
        "ppi_plastic_bottles" => record.ppi_plastic_bottles,
        "ppi_steel" => record.ppi_steel,
        _ => None,
    }
}

/// Weighted z-score of the cost drivers, one value per record.
///
/// Drivers that are entirely missing or entirely zero are excluded and the
/// remaining weights renormalised. A missing value contributes 0.
pub fn cost_pressure(records: &[PanelRecord]) -> Vec<f64> {
    let mut pressure = vec![0.0; records.len()];

    let usable: Vec<(&str, f64, f64, f64)> = COST_DRIVERS
        .iter()
        .filter_map(|(driver, weight)| {
            let values: Vec<f64> = records.iter().filter_map(|r| driver_value(r, driver)).collect();
            if values.is_empty() || values.iter().all(|v| *v == 0.0) {
                return None;
            }
            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
            Some((*driver, *weight, mean, std))
        })
        .collect();

    let total_weight: f64 = usable.iter().map(|(_, w, _, _)| w).sum();
    if usable.is_empty() || total_weight == 0.0 {
        return pressure;
    }

    for (record, slot) in records.iter().zip(pressure.iter_mut()) {
        *slot = usable
            .iter()
            .map(|(driver, weight, mean, std)| {
                let z = match driver_value(record, driver) {
                    Some(v) if *std > 0.0 => (v - mean) / std,
                    _ => 0.0,
                };
                z * weight / total_weight
            })
            .sum();
    }
    pressure
}

/// One week of a price series with its cost pressure
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WeeklyObservation {
    pub week_start: NaiveDate,
    pub price: f64,
    pub cost_pressure: f64,
}

fn trailing_mean(history: &[f64], window: usize) -> Option<f64> {
    if history.is_empty() {
        return None;
    }
    let tail = &history[history.len().saturating_sub(window)..];
    Some(tail.iter().sum::<f64>() / tail.len() as f64)
}

pub fn sin_week(week: NaiveDate) -> f64 {
    (2.0 * PI * week.iso_week().week() as f64 / 52.0).sin()
}

/// Feature row for `week` given the prices observed before it.
pub fn feature_row(
    history: &[f64],
    week_start: NaiveDate,
    country: &str,
    grade: Grade,
    price: f64,
    cost_pressure: f64,
) -> FeatureRow {
    let n = history.len();
    FeatureRow {
        week_start,
        country: country.to_string(),
        grade,
        price_usd_per_l: price,
        cost_pressure,
        lag1week: history.last().copied(),
        lag2week: (n >= 2).then(|| history[n - 2]),
        rolling3: trailing_mean(history, 3),
        rolling10: trailing_mean(history, 10),
        month: week_start.month(),
        dayofweek: week_start.weekday().num_days_from_monday(),
        quarter: (week_start.month() - 1) / 3 + 1,
        sin_week: sin_week(week_start),
    }
}

/// Model input vector in [`FEATURE_SCHEMA`] order; absent history is 0.
pub fn feature_vector(history: &[f64], week_start: NaiveDate, cost_pressure: f64) -> [f64; FEATURE_COUNT] {
    let n = history.len();
    let month = week_start.month();
    [
        history.last().copied().unwrap_or(0.0),
        if n >= 2 { history[n - 2] } else { 0.0 },
        trailing_mean(history, 3).unwrap_or(0.0),
        trailing_mean(history, 10).unwrap_or(0.0),
        month as f64,
        week_start.weekday().num_days_from_monday() as f64,
        ((month - 1) / 3 + 1) as f64,
        sin_week(week_start),
        cost_pressure,
    ]
}

/// Design matrix and targets for a weekly series sorted by week.
pub fn design_matrix(series: &[WeeklyObservation]) -> (Vec<[f64; FEATURE_COUNT]>, Vec<f64>) {
    let mut history = Vec::with_capacity(series.len());
    let mut x = Vec::with_capacity(series.len());
    let mut y = Vec::with_capacity(series.len());
    for obs in series {
        x.push(feature_vector(&history, obs.week_start, obs.cost_pressure));
        y.push(obs.price);
        history.push(obs.price);
    }
    (x, y)
}

/// Weekly mean of price and cost pressure over the given feature rows.
pub fn aggregate_weekly<'a>(rows: impl Iterator<Item = &'a FeatureRow>) -> Vec<WeeklyObservation> {
    let mut weeks: BTreeMap<NaiveDate, (f64, f64, usize)> = BTreeMap::new();
    for row in rows {
        let entry = weeks.entry(row.week_start).or_insert((0.0, 0.0, 0));
        entry.0 += row.price_usd_per_l;
        entry.1 += row.cost_pressure;
        entry.2 += 1;
    }
    weeks
        .into_iter()
        .map(|(week_start, (price, pressure, n))| WeeklyObservation {
            week_start,
            price: price / n as f64,
            cost_pressure: pressure / n as f64,
        })
        .collect()
}

/// Feature rows for every (country, grade) series with a USD price.
pub fn engineer_features(records: &[PanelRecord]) -> Vec<FeatureRow> {
    let pressure = cost_pressure(records);

    let mut series: BTreeMap<(String, Grade), Vec<(NaiveDate, f64, f64)>> = BTreeMap::new();
    for (record, cp) in records.iter().zip(pressure) {
        let Some(price) = record.price_usd_per_l else {
            continue;
        };
        series
            .entry((record.country.clone(), record.grade))
            .or_default()
            .push((record.week_start, price, cp));
    }

    let mut rows = Vec::new();
    for ((country, grade), mut points) in series {
        points.sort_by_key(|p| p.0);
        let mut history = Vec::with_capacity(points.len());
        for (week, price, cp) in points {
            rows.push(feature_row(&history, week, &country, grade, price, cp));
            history.push(price);
        }
    }
    rows.sort_by(|a, b| {
        (a.week_start, &a.country, a.grade).cmp(&(b.week_start, &b.country, b.grade))
    });
    rows
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureSummary {
    pub path: PathBuf,
    pub rows: usize,
    pub series: usize,
    pub panel_snapshot: NaiveDate,
}

/// Build the feature panel for a snapshot from its weekly panel.
pub fn build_features(lake: &DataLake, snapshot: NaiveDate) -> Result<FeatureSummary> {
    let (panel_snapshot, records) = load_panel(lake, Some(snapshot))?;
    let rows = engineer_features(&records);
    if rows.is_empty() {
        return Err(ForecastError::InsufficientData {
            segment: "features".to_string(),
            required: 1,
            actual: 0,
        });
    }

    let dropped = records.len() - rows.len();
    if dropped > 0 {
        warn!(rows = dropped, "panel records without a USD price skipped");
    }

    let path = lake.snapshot_path(lake::FEATURES, snapshot, "features.csv");
    lake.write_csv(&path, &rows)?;

    let series = rows
        .iter()
        .map(|r| (r.country.as_str(), r.grade))
        .collect::<std::collections::BTreeSet<_>>()
        .len();
    info!(rows = rows.len(), series, path = %path.display(), "features written");

    Ok(FeatureSummary {
        path,
        rows: rows.len(),
        series,
        panel_snapshot,
    })
}

/// Load the feature panel of a snapshot, or the latest one.
pub fn load_features(lake: &DataLake, snapshot: Option<NaiveDate>) -> Result<(NaiveDate, Vec<FeatureRow>)> {
    let snapshot = match snapshot {
        Some(s) => s,
        None => lake.require_latest_snapshot(lake::FEATURES)?,
    };
    let path = lake.snapshot_path(lake::FEATURES, snapshot, "features.csv");
    if !path.exists() {
        return Err(ForecastError::Storage(format!(
            "no features for snapshot {}",
            snapshot
        )));
    }
    Ok((snapshot, lake.read_csv(&path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn record(week: &str, price: Option<f64>, ocean: Option<f64>, diesel: Option<f64>) -> PanelRecord {
        PanelRecord {
            week_start: d(week),
            country: "IT".into(),
            grade: Grade::ExtraVirgin,
            markets: 1,
            price_eur_per_l: price.unwrap_or(0.0),
            usd_per_eur: price.map(|_| 1.0),
            price_usd_per_l: price,
            brent_usd_bbl: None,
            diesel_usd_per_gal: diesel,
            ppi_glass: None,
            ppi_plastic_bottles: None,
            ppi_steel: Some(0.0),
            fbx_index: ocean,
            ocean_proxy: ocean,
            pack: "glass".into(),
            pack_cost: 0.22,
            ocean_uplift: None,
            diesel_uplift: None,
            duty_usd_per_l: None,
            deliv_hat_usd_per_l: None,
            z_base: 0.0,
        }
    }

    #[test]
    fn test_cost_pressure_renormalises_usable_drivers() {
        let records = vec![
            record("2025-01-06", Some(3.0), Some(100.0), Some(3.0)),
            record("2025-01-13", Some(3.1), Some(300.0), Some(5.0)),
        ];
        // ocean z = -1/+1, diesel z = -1/+1; ppi all missing or all zero
        let cp = cost_pressure(&records);
        assert!((cp[0] + 1.0).abs() < 1e-9);
        assert!((cp[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cost_pressure_zero_without_drivers() {
        let records = vec![record("2025-01-06", Some(3.0), None, None)];
        assert_eq!(cost_pressure(&records), vec![0.0]);
    }

    #[test]
    fn test_missing_driver_value_contributes_zero() {
        let records = vec![
            record("2025-01-06", Some(3.0), Some(100.0), None),
            record("2025-01-13", Some(3.0), Some(300.0), None),
            record("2025-01-20", Some(3.0), None, None),
        ];
        let cp = cost_pressure(&records);
        assert_eq!(cp[2], 0.0);
    }

    #[test]
    fn test_lags_and_rolling_use_prior_weeks() {
        let records: Vec<PanelRecord> = ["2025-01-06", "2025-01-13", "2025-01-20", "2025-01-27"]
            .iter()
            .zip([1.0, 2.0, 3.0, 4.0])
            .map(|(w, p)| record(w, Some(p), None, None))
            .collect();

        let rows = engineer_features(&records);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].lag1week, None);
        assert_eq!(rows[0].rolling3, None);
        assert_eq!(rows[2].lag1week, Some(2.0));
        assert_eq!(rows[2].lag2week, Some(1.0));
        assert_eq!(rows[3].rolling3, Some(2.0));
        assert_eq!(rows[3].rolling10, Some(2.0));
        assert_eq!(rows[3].month, 1);
        assert_eq!(rows[3].quarter, 1);
        assert_eq!(rows[3].dayofweek, 0);
    }

    #[test]
    fn test_unpriced_records_skipped() {
        let records = vec![
            record("2025-01-06", Some(3.0), None, None),
            record("2025-01-13", None, None, None),
        ];
        assert_eq!(engineer_features(&records).len(), 1);
    }

    #[test]
    fn test_design_matrix_matches_schema() {
        let series = vec![
            WeeklyObservation { week_start: d("2025-03-31"), price: 3.0, cost_pressure: 0.5 },
            WeeklyObservation { week_start: d("2025-04-07"), price: 3.2, cost_pressure: 0.4 },
        ];
        let (x, y) = design_matrix(&series);
        assert_eq!(y, vec![3.0, 3.2]);
        assert_eq!(x[0][0], 0.0);
        assert_eq!(x[1][0], 3.0);
        assert_eq!(x[1][4], 4.0);
        assert_eq!(x[1][6], 2.0);
        assert_eq!(x[1][8], 0.4);
        assert!((x[1][7] - sin_week(d("2025-04-07"))).abs() < 1e-12);
    }

    #[test]
    fn test_aggregate_weekly_means() {
        let a = feature_row(&[], d("2025-01-06"), "IT", Grade::ExtraVirgin, 4.0, 1.0);
        let b = feature_row(&[], d("2025-01-06"), "ES", Grade::ExtraVirgin, 3.0, 0.0);
        let weekly = aggregate_weekly([a, b].iter());
        assert_eq!(weekly.len(), 1);
        assert_eq!(weekly[0].price, 3.5);
        assert_eq!(weekly[0].cost_pressure, 0.5);
    }
}
