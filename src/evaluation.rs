//! In-sample evaluation of a model bundle and the registration gate

use crate::features::design_matrix;
use crate::lake::{self, DataLake};
use crate::models::{FeatureRow, ModelBundle};
use crate::training::{segment_series, segments_in, Segment};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ErrorMetrics {
    pub mae: f64,
    pub rmse: f64,
    pub n: usize,
}

impl ErrorMetrics {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (f64, f64)>) -> Option<Self> {
        let (abs, sq, n) = pairs
            .into_iter()
            .fold((0.0, 0.0, 0usize), |(a, s, n), (pred, actual)| {
                let e = pred - actual;
                (a + e.abs(), s + e * e, n + 1)
            });
        (n > 0).then(|| Self {
            mae: abs / n as f64,
            rmse: (sq / n as f64).sqrt(),
            n,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub version: String,
    pub evaluated_at: DateTime<Utc>,
    pub global: Option<ErrorMetrics>,
    pub country: BTreeMap<String, ErrorMetrics>,
    pub grade: BTreeMap<String, ErrorMetrics>,
    pub country_grade: BTreeMap<String, ErrorMetrics>,
    pub mae_threshold: f64,
    pub passed: bool,
}

/// Score every segment model of the bundle on its own weekly series.
pub fn evaluate(bundle: &ModelBundle, rows: &[FeatureRow], mae_threshold: f64) -> EvaluationReport {
    let mut report = EvaluationReport {
        version: bundle.version.clone(),
        evaluated_at: Utc::now(),
        global: None,
        country: BTreeMap::new(),
        grade: BTreeMap::new(),
        country_grade: BTreeMap::new(),
        mae_threshold,
        passed: false,
    };

    for segment in segments_in(rows) {
        let Some(model) = bundle.models.get(&segment.name()) else {
            continue;
        };
        let series = segment_series(rows, &segment);
        let (x, y) = design_matrix(&series);
        let Some(metrics) =
            ErrorMetrics::from_pairs(x.iter().zip(&y).map(|(row, actual)| (model.predict(row), *actual)))
        else {
            continue;
        };

        match segment {
            Segment::Global => report.global = Some(metrics),
            Segment::Country(c) => {
                report.country.insert(c, metrics);
            }
            Segment::Grade(g) => {
                report.grade.insert(g.code().to_string(), metrics);
            }
            Segment::CountryGrade(c, g) => {
                report.country_grade.insert(format!("{}_{}", c, g.code()), metrics);
            }
        }
    }

    report.passed = report.global.map_or(false, |g| g.mae <= mae_threshold);
    report
}

/// Persist the report under the bundle's version.
pub fn store_report(lake: &DataLake, report: &EvaluationReport) -> Result<PathBuf> {
    let path = lake
        .path(lake::EVALUATION)
        .join(&report.version)
        .join("metrics.json");
    lake.write_json(&path, report)?;
    info!(
        version = %report.version,
        global_mae = ?report.global.map(|g| g.mae),
        passed = report.passed,
        path = %path.display(),
        "evaluation stored"
    );
    Ok(path)
}

pub fn load_report(lake: &DataLake, version: &str) -> Result<EvaluationReport> {
    let path = lake.path(lake::EVALUATION).join(version).join("metrics.json");
    lake.read_json(&path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Grade;
    use crate::training::tests::synthetic_rows;
    use crate::training::Trainer;

    #[test]
    fn test_metrics_from_pairs() {
        let m = ErrorMetrics::from_pairs(vec![(1.0, 2.0), (3.0, 3.0), (2.0, 0.0)]).unwrap();
        assert!((m.mae - 1.0).abs() < 1e-12);
        assert!((m.rmse - (5.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!(m.n, 3);
        assert!(ErrorMetrics::from_pairs(Vec::new()).is_none());
    }

    #[test]
    fn test_evaluate_reports_every_level_and_passes_gate() {
        let rows = synthetic_rows(&[("IT", Grade::ExtraVirgin, 3.5), ("ES", Grade::ExtraVirgin, 3.2)], 40);
        let bundle = Trainer::new(26).train_bundle(&rows, None).unwrap();

        let report = evaluate(&bundle, &rows, 0.12);
        assert!(report.global.is_some());
        assert!(report.country.contains_key("IT"));
        assert!(report.grade.contains_key("EVOO"));
        assert!(report.country_grade.contains_key("ES_EVOO"));
        assert!(report.passed);
    }

    #[test]
    fn test_missing_global_model_fails_gate() {
        let rows = synthetic_rows(&[("IT", Grade::ExtraVirgin, 3.5)], 40);
        let mut bundle = Trainer::new(26).train_bundle(&rows, None).unwrap();
        bundle.models.remove("global_ridge");

        let report = evaluate(&bundle, &rows, 0.12);
        assert!(report.global.is_none());
        assert!(!report.passed);

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["global"].is_null());
    }

    #[test]
    fn test_report_persisted_by_version() {
        let lake = crate::lake::temp_lake();
        let rows = synthetic_rows(&[("IT", Grade::ExtraVirgin, 3.5)], 30);
        let bundle = Trainer::new(26).train_bundle(&rows, None).unwrap();
        let report = evaluate(&bundle, &rows, 0.12);

        store_report(&lake, &report).unwrap();
        let back = load_report(&lake, &bundle.version).unwrap();
        assert_eq!(back.version, report.version);
        assert!((back.global.unwrap().mae - report.global.unwrap().mae).abs() < 1e-12);
    }
}
