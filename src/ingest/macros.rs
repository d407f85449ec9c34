//! Macro series (FX, Brent, diesel, producer price indices)
//!
//! Series come from FRED and EIA through the [`MacroSource`] seam. Each is
//! reduced to weekly means; a series that fails or comes back empty is
//! taken from the most recent earlier snapshot instead.

use super::{parse_date, parse_number, to_monday, weekly_mean};
use crate::error::ForecastError;
use crate::lake::{self, DataLake};
use crate::Result;
use chrono::{Duration, NaiveDate};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration as StdDuration;
use tracing::{info, warn};

const FRED_URL: &str = "https://api.stlouisfed.org/fred/series/observations";
const EIA_URL: &str = "https://api.eia.gov/v2/seriesid";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacroSeries {
    UsdPerEur,
    Brent,
    Diesel,
    PpiGlass,
    PpiPlasticBottles,
    PpiSteel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Fred,
    Eia,
}

impl MacroSeries {
    pub const ALL: [MacroSeries; 6] = [
        MacroSeries::UsdPerEur,
        MacroSeries::Brent,
        MacroSeries::Diesel,
        MacroSeries::PpiGlass,
        MacroSeries::PpiPlasticBottles,
        MacroSeries::PpiSteel,
    ];

    pub fn provider(&self) -> Provider {
        match self {
            MacroSeries::Brent | MacroSeries::Diesel => Provider::Eia,
            _ => Provider::Fred,
        }
    }

    pub fn series_id(&self) -> &'static str {
        match self {
            MacroSeries::UsdPerEur => "DEXUSEU",
            MacroSeries::Brent => "PET.RBRTE.D",
            MacroSeries::Diesel => "PET.EMD_EPD2D_PTE_NUS_DPG.D",
            MacroSeries::PpiGlass => "WPU101706",
            MacroSeries::PpiPlasticBottles => "WPU0721",
            MacroSeries::PpiSteel => "WPU101702",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Weekly value of a single macro series
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeeklyValue {
    pub week_start: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PpiWeek {
    pub week_start: NaiveDate,
    pub ppi_glass: Option<f64>,
    pub ppi_plastic_bottles: Option<f64>,
    pub ppi_steel: Option<f64>,
}

/// One Monday of the forward-filled macro grid
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MacroWeek {
    pub week_start: NaiveDate,
    pub usd_per_eur: Option<f64>,
    pub brent_usd_bbl: Option<f64>,
    pub diesel_usd_per_gal: Option<f64>,
    pub ppi_glass: Option<f64>,
    pub ppi_plastic_bottles: Option<f64>,
    pub ppi_steel: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MacroIngestSummary {
    pub snapshot: NaiveDate,
    pub fx_weeks: usize,
    pub brent_weeks: usize,
    pub diesel_weeks: usize,
    pub ppi_weeks: usize,
    pub grid_weeks: usize,
    pub fallbacks: Vec<String>,
}

/// Provider of raw macro observations
#[async_trait::async_trait]
pub trait MacroSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch(&self, series: MacroSeries) -> Result<Vec<SeriesPoint>>;
}

//
// ================= HTTP source =================
//

pub struct HttpMacroSource {
    client: Client,
    fred_api_key: Option<String>,
    eia_api_key: Option<String>,
}

impl HttpMacroSource {
    pub fn new(fred_api_key: Option<String>, eia_api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            fred_api_key,
            eia_api_key,
        })
    }

    async fn fetch_fred(&self, series_id: &str) -> Result<Vec<SeriesPoint>> {
        let key = self
            .fred_api_key
            .as_deref()
            .ok_or_else(|| ForecastError::Config("FRED_API_KEY not set".to_string()))?;

        let response = self
            .client
            .get(FRED_URL)
            .query(&[("series_id", series_id), ("api_key", key), ("file_type", "json")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ForecastError::Ingestion(format!(
                "FRED returned {} for {}",
                response.status(),
                series_id
            )));
        }

        let body: Value = response.json().await?;
        Ok(parse_fred_observations(&body))
    }

    async fn fetch_eia(&self, series_id: &str) -> Result<Vec<SeriesPoint>> {
        let key = self
            .eia_api_key
            .as_deref()
            .ok_or_else(|| ForecastError::Config("EIA_API_KEY not set".to_string()))?;

        let response = self
            .client
            .get(format!("{}/{}", EIA_URL, series_id))
            .query(&[("api_key", key)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ForecastError::Ingestion(format!(
                "EIA returned {} for {}",
                response.status(),
                series_id
            )));
        }

        let body: Value = response.json().await?;
        Ok(parse_eia_data(&body))
    }
}

#[async_trait::async_trait]
impl MacroSource for HttpMacroSource {
    fn name(&self) -> &'static str {
        "fred_eia_http"
    }

    async fn fetch(&self, series: MacroSeries) -> Result<Vec<SeriesPoint>> {
        match series.provider() {
            Provider::Fred => self.fetch_fred(series.series_id()).await,
            Provider::Eia => self.fetch_eia(series.series_id()).await,
        }
    }
}

fn json_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

/// FRED `observations[]`; the `.` placeholder marks a missing value.
pub fn parse_fred_observations(body: &Value) -> Vec<SeriesPoint> {
    body.get("observations")
        .and_then(Value::as_array)
        .map(|obs| {
            obs.iter()
                .filter_map(|o| {
                    Some(SeriesPoint {
                        date: parse_date(o.get("date")?.as_str()?)?,
                        value: json_number(o.get("value")?)?,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// EIA v2 `response.data[]` with either `period` or `date` keys.
pub fn parse_eia_data(body: &Value) -> Vec<SeriesPoint> {
    body.pointer("/response/data")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|r| {
                    let date = r.get("period").or_else(|| r.get("date"))?.as_str()?;
                    Some(SeriesPoint {
                        date: parse_date(date)?,
                        value: json_number(r.get("value")?)?,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

//
// ================= Ingestion job =================
//

async fn fetch_weekly(source: &dyn MacroSource, series: MacroSeries) -> BTreeMap<NaiveDate, f64> {
    match source.fetch(series).await {
        Ok(points) => {
            if points.is_empty() {
                warn!(series = series.series_id(), "source returned no observations");
            }
            weekly_mean(points.into_iter().map(|p| (p.date, p.value)))
        }
        Err(e) => {
            warn!(series = series.series_id(), error = %e, "macro fetch failed");
            BTreeMap::new()
        }
    }
}

fn scalar_series(
    lake: &DataLake,
    snapshot: NaiveDate,
    file: &str,
    fetched: BTreeMap<NaiveDate, f64>,
    fallbacks: &mut Vec<String>,
) -> Result<Vec<WeeklyValue>> {
    if !fetched.is_empty() {
        return Ok(fetched
            .into_iter()
            .map(|(week_start, value)| WeeklyValue { week_start, value })
            .collect());
    }
    match lake.load_or_fallback::<WeeklyValue>(lake::MACROS, snapshot, file)? {
        Some((from, rows)) => {
            fallbacks.push(format!("{}@{}", file, from));
            Ok(rows)
        }
        None => {
            warn!(file, "no fallback snapshot exists");
            Ok(Vec::new())
        }
    }
}

/// Fetch every macro series and write the snapshot's per-series files
/// plus the forward-filled weekly grid.
pub async fn ingest_macros(
    lake: &DataLake,
    snapshot: NaiveDate,
    source: &dyn MacroSource,
) -> Result<MacroIngestSummary> {
    info!(snapshot = %snapshot, source = source.name(), "ingesting macro series");
    let mut fallbacks = Vec::new();

    let fx_raw = fetch_weekly(source, MacroSeries::UsdPerEur).await;
    let brent_raw = fetch_weekly(source, MacroSeries::Brent).await;
    let diesel_raw = fetch_weekly(source, MacroSeries::Diesel).await;
    let glass = fetch_weekly(source, MacroSeries::PpiGlass).await;
    let plastic = fetch_weekly(source, MacroSeries::PpiPlasticBottles).await;
    let steel = fetch_weekly(source, MacroSeries::PpiSteel).await;

    let fx = scalar_series(lake, snapshot, "fx.csv", fx_raw, &mut fallbacks)?;
    let brent = scalar_series(lake, snapshot, "brent.csv", brent_raw, &mut fallbacks)?;
    let diesel = scalar_series(lake, snapshot, "diesel.csv", diesel_raw, &mut fallbacks)?;

    let mut ppi = combine_ppi(&glass, &plastic, &steel);
    if ppi.is_empty() {
        if let Some((from, rows)) = lake.load_or_fallback::<PpiWeek>(lake::MACROS, snapshot, "ppi.csv")? {
            fallbacks.push(format!("ppi.csv@{}", from));
            ppi = rows;
        }
    }

    for (file, rows) in [("fx.csv", &fx), ("brent.csv", &brent), ("diesel.csv", &diesel)] {
        if rows.is_empty() {
            warn!(file, "series empty, not written");
            continue;
        }
        lake.write_csv(&lake.snapshot_path(lake::MACROS, snapshot, file), rows)?;
    }
    if !ppi.is_empty() {
        lake.write_csv(&lake.snapshot_path(lake::MACROS, snapshot, "ppi.csv"), &ppi)?;
    }

    let grid = build_macro_grid(&fx, &brent, &diesel, &ppi);
    if grid.is_empty() {
        warn!("no macro series available, skipping grid");
    } else {
        lake.write_csv(&lake.snapshot_path(lake::MACROS, snapshot, "macros.csv"), &grid)?;
        info!(
            weeks = grid.len(),
            first = %grid[0].week_start,
            last = %grid[grid.len() - 1].week_start,
            "macro grid written"
        );
    }

    let summary = MacroIngestSummary {
        snapshot,
        fx_weeks: fx.len(),
        brent_weeks: brent.len(),
        diesel_weeks: diesel.len(),
        ppi_weeks: ppi.len(),
        grid_weeks: grid.len(),
        fallbacks,
    };
    info!(
        fx = summary.fx_weeks,
        brent = summary.brent_weeks,
        diesel = summary.diesel_weeks,
        ppi = summary.ppi_weeks,
        fallbacks = ?summary.fallbacks,
        "macro ingestion complete"
    );
    Ok(summary)
}

fn combine_ppi(
    glass: &BTreeMap<NaiveDate, f64>,
    plastic: &BTreeMap<NaiveDate, f64>,
    steel: &BTreeMap<NaiveDate, f64>,
) -> Vec<PpiWeek> {
    let weeks: BTreeSet<NaiveDate> = glass
        .keys()
        .chain(plastic.keys())
        .chain(steel.keys())
        .copied()
        .collect();

    weeks
        .into_iter()
        .map(|week_start| PpiWeek {
            week_start,
            ppi_glass: glass.get(&week_start).copied(),
            ppi_plastic_bottles: plastic.get(&week_start).copied(),
            ppi_steel: steel.get(&week_start).copied(),
        })
        .collect()
}

/// Outer-join every series on a contiguous Monday grid and carry the last
/// known value forward so monthly indices cover every week.
pub fn build_macro_grid(
    fx: &[WeeklyValue],
    brent: &[WeeklyValue],
    diesel: &[WeeklyValue],
    ppi: &[PpiWeek],
) -> Vec<MacroWeek> {
    let index = |rows: &[WeeklyValue]| -> BTreeMap<NaiveDate, f64> {
        rows.iter().map(|r| (to_monday(r.week_start), r.value)).collect()
    };
    let fx = index(fx);
    let brent = index(brent);
    let diesel = index(diesel);
    let ppi: BTreeMap<NaiveDate, &PpiWeek> =
        ppi.iter().map(|p| (to_monday(p.week_start), p)).collect();

    let first = [fx.keys().next(), brent.keys().next(), diesel.keys().next(), ppi.keys().next()]
        .into_iter()
        .flatten()
        .min()
        .copied();
    let last = [fx.keys().last(), brent.keys().last(), diesel.keys().last(), ppi.keys().last()]
        .into_iter()
        .flatten()
        .max()
        .copied();
    let (Some(first), Some(last)) = (first, last) else {
        return Vec::new();
    };

    let mut grid = Vec::new();
    let mut carry = MacroWeek::default();
    let mut week = first;
    while week <= last {
        if let Some(v) = fx.get(&week) {
            carry.usd_per_eur = Some(*v);
        }
        if let Some(v) = brent.get(&week) {
            carry.brent_usd_bbl = Some(*v);
        }
        if let Some(v) = diesel.get(&week) {
            carry.diesel_usd_per_gal = Some(*v);
        }
        if let Some(p) = ppi.get(&week) {
            carry.ppi_glass = p.ppi_glass.or(carry.ppi_glass);
            carry.ppi_plastic_bottles = p.ppi_plastic_bottles.or(carry.ppi_plastic_bottles);
            carry.ppi_steel = p.ppi_steel.or(carry.ppi_steel);
        }
        carry.week_start = week;
        grid.push(carry.clone());
        week += Duration::weeks(1);
    }
    grid
}
