//! Segment model training
//!
//! One ridge model is fitted for the global weekly mean series and for
//! every country, grade and (country, grade) series with enough history.

use crate::error::ForecastError;
use crate::features::{aggregate_weekly, design_matrix, load_features, WeeklyObservation, FEATURE_SCHEMA};
use crate::lake::DataLake;
use crate::models::{FeatureRow, Grade, ModelBundle, ModelStatus, SegmentModel};
use crate::regression::RidgeCv;
use crate::Result;
use chrono::{NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

pub const GLOBAL_SEGMENT: &str = "global_ridge";

/// A slice of the feature panel that gets its own model
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Segment {
    Global,
    Country(String),
    Grade(Grade),
    CountryGrade(String, Grade),
}

impl Segment {
    pub fn name(&self) -> String {
        match self {
            Segment::Global => GLOBAL_SEGMENT.to_string(),
            Segment::Country(c) => format!("country_{}", c.replace(' ', "_")),
            Segment::Grade(g) => format!("grade_{}", g.code()),
            Segment::CountryGrade(c, g) => {
                format!("country_grade_{}_{}", c.replace(' ', "_"), g.code())
            }
        }
    }

    pub fn matches(&self, row: &FeatureRow) -> bool {
        match self {
            Segment::Global => true,
            Segment::Country(c) => &row.country == c,
            Segment::Grade(g) => row.grade == *g,
            Segment::CountryGrade(c, g) => &row.country == c && row.grade == *g,
        }
    }

    /// Most specific segment first, ending with the global model.
    pub fn fallback_chain(country: &str, grade: Grade) -> [Segment; 4] {
        [
            Segment::CountryGrade(country.to_string(), grade),
            Segment::Country(country.to_string()),
            Segment::Grade(grade),
            Segment::Global,
        ]
    }
}

/// Every segment present in the feature rows.
pub fn segments_in(rows: &[FeatureRow]) -> Vec<Segment> {
    let countries: BTreeSet<&str> = rows.iter().map(|r| r.country.as_str()).collect();
    let grades: BTreeSet<Grade> = rows.iter().map(|r| r.grade).collect();
    let pairs: BTreeSet<(&str, Grade)> = rows.iter().map(|r| (r.country.as_str(), r.grade)).collect();

    let mut segments = vec![Segment::Global];
    segments.extend(countries.into_iter().map(|c| Segment::Country(c.to_string())));
    segments.extend(grades.into_iter().map(Segment::Grade));
    segments.extend(
        pairs
            .into_iter()
            .map(|(c, g)| Segment::CountryGrade(c.to_string(), g)),
    );
    segments
}

/// Weekly mean series of a segment.
pub fn segment_series(rows: &[FeatureRow], segment: &Segment) -> Vec<WeeklyObservation> {
    aggregate_weekly(rows.iter().filter(|r| segment.matches(r)))
}

pub fn new_version() -> String {
    format!("v{}", Utc::now().format("%Y%m%d%H%M%S%3f"))
}

#[derive(Debug, Clone)]
pub struct Trainer {
    min_rows: usize,
    ridge: RidgeCv,
}

impl Trainer {
    pub fn new(min_rows: usize) -> Self {
        Self {
            min_rows,
            ridge: RidgeCv::default(),
        }
    }

    /// Fit one segment's series.
    pub fn fit_segment(&self, name: &str, series: &[WeeklyObservation]) -> Result<SegmentModel> {
        if series.len() < self.min_rows {
            return Err(ForecastError::InsufficientData {
                segment: name.to_string(),
                required: self.min_rows,
                actual: series.len(),
            });
        }

        let (x, y) = design_matrix(series);
        let (fit, _loo_mse) = self.ridge.fit(&x, &y)?;

        let residuals: Vec<f64> = x
            .iter()
            .zip(&y)
            .map(|(row, target)| target - fit.predict(row))
            .collect();
        let n = residuals.len() as f64;
        let train_mae = residuals.iter().map(|r| r.abs()).sum::<f64>() / n;
        let residual_std = (residuals.iter().map(|r| r * r).sum::<f64>() / (n - 1.0).max(1.0)).sqrt();

        Ok(SegmentModel {
            name: name.to_string(),
            alpha: fit.alpha,
            intercept: fit.intercept,
            coefficients: fit.coefficients,
            feature_schema: FEATURE_SCHEMA.iter().map(|s| s.to_string()).collect(),
            training_rows: series.len(),
            residual_std,
            train_mae,
        })
    }

    /// Train every eligible segment into a candidate bundle.
    pub fn train_bundle(
        &self,
        rows: &[FeatureRow],
        source_snapshot: Option<NaiveDate>,
    ) -> Result<ModelBundle> {
        let mut models = BTreeMap::new();

        for segment in segments_in(rows) {
            let name = segment.name();
            let series = segment_series(rows, &segment);
            match self.fit_segment(&name, &series) {
                Ok(model) => {
                    info!(segment = %name, alpha = model.alpha, rows = model.training_rows, mae = model.train_mae, "segment fitted");
                    models.insert(name, model);
                }
                Err(ForecastError::InsufficientData { actual, required, .. }) => {
                    warn!(segment = %name, rows = actual, required, "skipping segment");
                }
                Err(e) => return Err(e),
            }
        }

        if models.is_empty() {
            return Err(ForecastError::InsufficientData {
                segment: "all".to_string(),
                required: self.min_rows,
                actual: rows.len(),
            });
        }

        let bundle = ModelBundle {
            version: new_version(),
            created_at: Utc::now(),
            source_snapshot,
            models,
            status: ModelStatus::Candidate,
            retired_at: None,
        };
        info!(version = %bundle.version, segments = bundle.models.len(), "candidate bundle trained");
        Ok(bundle)
    }
}

/// Train a candidate bundle from the features of a snapshot (latest when
/// none is given).
pub fn train(lake: &DataLake, min_rows: usize, snapshot: Option<NaiveDate>) -> Result<ModelBundle> {
    let (snapshot, rows) = load_features(lake, snapshot)?;
    info!(snapshot = %snapshot, rows = rows.len(), "training from features");
    Trainer::new(min_rows).train_bundle(&rows, Some(snapshot))
}
