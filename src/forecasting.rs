//! Forecasting interface
//!
//! Predictions are recursive: starting from the latest observed week of the
//! (country, grade) series, each next week is predicted from features
//! recomputed over the extended history and fed back as that week's price.
//! Cost pressure is held at its last observed value.

use crate::audit::{ForecastLedger, LedgerKey};
use crate::error::ForecastError;
use crate::features::{feature_vector, load_features, WeeklyObservation};
use crate::ingest::to_monday;
use crate::lake::{self, DataLake};
use crate::models::{country_name, FeatureRow, Forecast, ForecastQuery, Grade, ModelBundle, SegmentModel};
use crate::registry::ModelRegistry;
use crate::training::{segment_series, Segment};
use crate::Result;
use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

pub const CONFIDENCE_LEVEL: f64 = 0.95;
pub const MAX_HORIZON_WEEKS: u32 = 52;
const Z_95: f64 = 1.96;

async fn run_blocking<T, F>(job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| ForecastError::Storage(format!("forecaster load task failed: {}", e)))?
}

/// 95% bounds widening with the square root of the horizon.
pub fn interval(point: f64, residual_std: f64, horizon_weeks: u32) -> (f64, f64) {
    let half = Z_95 * residual_std * (horizon_weeks as f64).sqrt();
    (point - half, point + half)
}

/// One week of a forecast path
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ForecastStep {
    pub week_start: NaiveDate,
    pub horizon_weeks: u32,
    pub point: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Forecasts from one model bundle over one feature panel
#[derive(Debug, Clone)]
pub struct Forecaster {
    bundle: ModelBundle,
    rows: Vec<FeatureRow>,
}

impl Forecaster {
    pub fn new(bundle: ModelBundle, rows: Vec<FeatureRow>) -> Self {
        Self { bundle, rows }
    }

    pub fn model_version(&self) -> &str {
        &self.bundle.version
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    /// Most specific segment model available for the series.
    pub fn select_model(&self, country: &str, grade: Grade) -> Result<&SegmentModel> {
        Segment::fallback_chain(country, grade)
            .iter()
            .find_map(|segment| self.bundle.models.get(&segment.name()))
            .ok_or_else(|| {
                ForecastError::ModelNotFound(format!(
                    "no model in {} covers {} {}",
                    self.bundle.version,
                    country,
                    grade.code()
                ))
            })
    }

    /// Observed weekly series of a (country, grade).
    pub fn series(&self, country: &str, grade: Grade) -> Result<Vec<WeeklyObservation>> {
        let series = segment_series(&self.rows, &Segment::CountryGrade(country.to_string(), grade));
        if series.is_empty() {
            return Err(ForecastError::InvalidQuery(format!(
                "no price history for {} {}",
                country_name(country),
                grade.label()
            )));
        }
        Ok(series)
    }

    pub fn last_observed_week(&self, country: &str, grade: Grade) -> Result<NaiveDate> {
        let series = self.series(country, grade)?;
        series
            .last()
            .map(|o| o.week_start)
            .ok_or_else(|| ForecastError::InvalidQuery(format!("empty series for {}", country)))
    }

    /// Weekly forecasts for the `steps` weeks after the latest observation.
    pub fn forecast_path(&self, country: &str, grade: Grade, steps: u32) -> Result<Vec<ForecastStep>> {
        if steps == 0 || steps > MAX_HORIZON_WEEKS {
            return Err(ForecastError::InvalidQuery(format!(
                "horizon must be between 1 and {} weeks, got {}",
                MAX_HORIZON_WEEKS, steps
            )));
        }

        let series = self.series(country, grade)?;
        let model = self.select_model(country, grade)?;
        let Some(last) = series.last().copied() else {
            return Err(ForecastError::InvalidQuery(format!("empty series for {}", country)));
        };

        let mut history: Vec<f64> = series.iter().map(|o| o.price).collect();
        let mut path = Vec::with_capacity(steps as usize);
        for h in 1..=steps {
            let week_start = last.week_start + Duration::weeks(h as i64);
            let x = feature_vector(&history, week_start, last.cost_pressure);
            let point = model.predict(&x);
            let (lower, upper) = interval(point, model.residual_std, h);
            path.push(ForecastStep {
                week_start,
                horizon_weeks: h,
                point,
                lower,
                upper,
            });
            history.push(point);
        }
        Ok(path)
    }

    /// Forecast for the week containing the query's target date.
    pub fn forecast(&self, query: &ForecastQuery) -> Result<Forecast> {
        let target_week = to_monday(query.target_week);
        let last = self.last_observed_week(&query.country, query.grade)?;
        if target_week <= last {
            return Err(ForecastError::InvalidQuery(format!(
                "target week {} is not after the latest observed week {}",
                target_week, last
            )));
        }

        let weeks = (target_week - last).num_weeks();
        if weeks > MAX_HORIZON_WEEKS as i64 {
            return Err(ForecastError::InvalidQuery(format!(
                "target week {} is {} weeks ahead; the limit is {}",
                target_week, weeks, MAX_HORIZON_WEEKS
            )));
        }
        let horizon = weeks as u32;

        let path = self.forecast_path(&query.country, query.grade, horizon)?;
        let model = self.select_model(&query.country, query.grade)?;
        let step = path
            .last()
            .copied()
            .ok_or_else(|| ForecastError::Numerical("empty forecast path".to_string()))?;

        Ok(Forecast {
            forecast_id: Uuid::new_v4(),
            target_week,
            country: query.country.clone(),
            grade: query.grade,
            point: step.point,
            lower: step.lower,
            upper: step.upper,
            confidence_level: CONFIDENCE_LEVEL,
            model_version: self.bundle.version.clone(),
            segment: model.name.clone(),
            horizon_weeks: horizon,
            issued_at: Utc::now(),
        })
    }
}

/// Loaded forecaster and the (model version, features snapshot) it was built from
struct CachedForecaster {
    version: String,
    snapshot: NaiveDate,
    forecaster: Arc<Forecaster>,
}

/// Forecasting backed by the registry, the feature panel and the ledger
#[derive(Clone)]
pub struct ForecastService {
    lake: DataLake,
    registry: ModelRegistry,
    ledger: ForecastLedger,
    cache: Arc<RwLock<Option<CachedForecaster>>>,
}

impl ForecastService {
    pub fn new(lake: DataLake, registry: ModelRegistry, ledger: ForecastLedger) -> Self {
        Self {
            lake,
            registry,
            ledger,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    pub fn ledger(&self) -> &ForecastLedger {
        &self.ledger
    }

    /// Forecaster for the active model over the latest features snapshot.
    /// The feature panel is parsed on the blocking pool and reused until
    /// either the active version or the latest snapshot changes.
    pub async fn forecaster(&self) -> Result<Arc<Forecaster>> {
        let (lake, registry) = (self.lake.clone(), self.registry.clone());
        let (version, snapshot) = run_blocking(move || {
            let version = registry
                .index()?
                .active
                .ok_or_else(|| ForecastError::ModelNotFound("no active model".to_string()))?;
            Ok((version, lake.require_latest_snapshot(lake::FEATURES)?))
        })
        .await?;

        if let Some(cached) = self.cache.read().await.as_ref() {
            if cached.version == version && cached.snapshot == snapshot {
                return Ok(cached.forecaster.clone());
            }
        }

        let mut cache = self.cache.write().await;
        if let Some(cached) = cache.as_ref() {
            if cached.version == version && cached.snapshot == snapshot {
                return Ok(cached.forecaster.clone());
            }
        }
        let (lake, registry) = (self.lake.clone(), self.registry.clone());
        let loaded_version = version.clone();
        let forecaster = run_blocking(move || {
            let bundle = registry.get(&loaded_version)?;
            let (_, rows) = load_features(&lake, Some(snapshot))?;
            debug!(version = %bundle.version, snapshot = %snapshot, rows = rows.len(), "forecaster loaded");
            Ok(Forecaster::new(bundle, rows))
        })
        .await?;
        let forecaster = Arc::new(forecaster);
        *cache = Some(CachedForecaster {
            version,
            snapshot,
            forecaster: forecaster.clone(),
        });
        Ok(forecaster)
    }

    /// Issue a forecast, returning the recorded one when this model version
    /// already answered the same query.
    pub async fn issue(&self, query: &ForecastQuery) -> Result<Forecast> {
        let forecaster = self.forecaster().await?;
        self.issue_with(&forecaster, query).await
    }

    pub async fn issue_with(&self, forecaster: &Forecaster, query: &ForecastQuery) -> Result<Forecast> {
        let key = LedgerKey::new(
            forecaster.model_version(),
            &query.country,
            query.grade,
            to_monday(query.target_week),
        );
        if let Some(existing) = self.ledger.lookup(&key).await {
            debug!(forecast_id = %existing.forecast_id, "returning recorded forecast");
            return Ok(existing);
        }

        let forecast = forecaster.forecast(query)?;
        let forecast = self.ledger.record(forecast).await?;
        info!(
            country = %forecast.country,
            grade = %forecast.grade,
            target_week = %forecast.target_week,
            point = forecast.point,
            version = %forecast.model_version,
            "forecast issued"
        );
        Ok(forecast)
    }
}
