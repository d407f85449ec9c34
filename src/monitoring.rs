//! Daily monitoring of data freshness, panel quality and live forecast error

use crate::audit::ForecastLedger;
use crate::config::Settings;
use crate::lake::{self, DataLake};
use crate::models::{Alert, AlertStatus, Grade, Severity};
use crate::notify::{deliver, Notifier};
use crate::panel::{coverage, load_panel};
use crate::registry::ModelRegistry;
use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Coverage (percent) below which a panel field is flagged.
pub const MIN_FIELD_COVERAGE: f64 = 50.0;

/// Snapshotted sources checked for freshness: (name, prefix, file).
const SNAPSHOT_SOURCES: [(&str, &str, &str); 6] = [
    ("eu_prices", lake::EU_PRICES, "eu_prices.csv"),
    ("fbx", lake::FBX, "fbx.csv"),
    ("fx", lake::MACROS, "fx.csv"),
    ("brent", lake::MACROS, "brent.csv"),
    ("diesel", lake::MACROS, "diesel.csv"),
    ("ppi", lake::MACROS, "ppi.csv"),
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FreshnessCheck {
    pub source: String,
    pub latest: Option<NaiveDate>,
    pub age_days: Option<i64>,
    pub fresh: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityCheck {
    pub panel_snapshot: Option<NaiveDate>,
    pub records: usize,
    pub coverage: BTreeMap<String, f64>,
    pub low_coverage: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceCheck {
    pub model_version: Option<String>,
    pub evaluated: usize,
    pub mae: Option<f64>,
    pub mape: Option<f64>,
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringChecks {
    pub freshness: Vec<FreshnessCheck>,
    pub quality: QualityCheck,
    pub performance: PerformanceCheck,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportStatus {
    Ok,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSummary {
    pub total_checks: usize,
    pub alerts_sent: usize,
    pub status: ReportStatus,
}

/// Performance-degradation signal consumed by retraining
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DegradationSignal {
    pub model_version: String,
    pub mae: f64,
    pub mape: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringReport {
    pub report_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub checks: MonitoringChecks,
    pub alerts: Vec<Alert>,
    pub summary: MonitoringSummary,
    pub degradation: Option<DegradationSignal>,
}

/// Age of a source in days and whether it is within the freshness window.
pub fn classify_freshness(age_days: Option<i64>, max_age_days: i64) -> bool {
    matches!(age_days, Some(age) if age < max_age_days)
}

/// MAE and MAPE (percent) over (forecast, actual) pairs. Zero actuals are
/// left out of the MAPE.
pub fn forecast_errors(pairs: &[(f64, f64)]) -> Option<(f64, f64)> {
    if pairs.is_empty() {
        return None;
    }
    let mae = pairs.iter().map(|(f, a)| (f - a).abs()).sum::<f64>() / pairs.len() as f64;
    let pct: Vec<f64> = pairs
        .iter()
        .filter(|(_, a)| *a != 0.0)
        .map(|(f, a)| ((f - a) / a).abs() * 100.0)
        .collect();
    let mape = if pct.is_empty() {
        0.0
    } else {
        pct.iter().sum::<f64>() / pct.len() as f64
    };
    Some((mae, mape))
}

#[derive(Debug, Clone, Copy)]
pub struct MonitorThresholds {
    pub freshness_max_age_days: i64,
    pub mae: f64,
    pub mape: f64,
}

impl From<&Settings> for MonitorThresholds {
    fn from(settings: &Settings) -> Self {
        Self {
            freshness_max_age_days: settings.freshness_max_age_days,
            mae: settings.eval_mae_threshold,
            mape: settings.degradation_mape_threshold,
        }
    }
}

pub struct Monitor {
    lake: DataLake,
    registry: ModelRegistry,
    ledger: ForecastLedger,
    notifier: Arc<dyn Notifier>,
    thresholds: MonitorThresholds,
}

impl Monitor {
    pub fn new(
        lake: DataLake,
        registry: ModelRegistry,
        ledger: ForecastLedger,
        notifier: Arc<dyn Notifier>,
        thresholds: MonitorThresholds,
    ) -> Self {
        Self {
            lake,
            registry,
            ledger,
            notifier,
            thresholds,
        }
    }

    /// Freshness of every source as of the given instant.
    pub fn check_freshness(&self, as_of: DateTime<Utc>) -> Result<Vec<FreshnessCheck>> {
        let today = as_of.date_naive();
        let mut checks = Vec::with_capacity(SNAPSHOT_SOURCES.len() + 1);

        for (source, prefix, file) in SNAPSHOT_SOURCES {
            let latest = self
                .lake
                .list_snapshots(prefix)?
                .into_iter()
                .rev()
                .find(|d| self.lake.snapshot_path(prefix, *d, file).exists());
            let age_days = latest.map(|d| (today - d).num_days());
            checks.push(FreshnessCheck {
                source: source.to_string(),
                latest,
                age_days,
                fresh: classify_freshness(age_days, self.thresholds.freshness_max_age_days),
            });
        }

        let tariffs = self.lake.path(lake::TARIFFS_LATEST).join("tariffs.csv");
        let age_days = if tariffs.exists() {
            Some(self.lake.file_age_days(&tariffs, as_of)?)
        } else {
            None
        };
        checks.push(FreshnessCheck {
            source: "tariffs".to_string(),
            latest: age_days.map(|age| today - chrono::Duration::days(age)),
            age_days,
            fresh: classify_freshness(age_days, self.thresholds.freshness_max_age_days),
        });

        Ok(checks)
    }

    /// Non-null coverage of the key fields of the latest panel.
    pub fn check_quality(&self) -> Result<QualityCheck> {
        let Some(snapshot) = self.lake.latest_snapshot(lake::WEEKLY_PANEL)? else {
            return Ok(QualityCheck::default());
        };
        let (_, records) = load_panel(&self.lake, Some(snapshot))?;
        let coverage = coverage(&records);
        let low_coverage = coverage
            .iter()
            .filter(|(_, pct)| **pct < MIN_FIELD_COVERAGE)
            .map(|(field, _)| field.clone())
            .collect();
        Ok(QualityCheck {
            panel_snapshot: Some(snapshot),
            records: records.len(),
            coverage,
            low_coverage,
        })
    }

    /// Error of the active model's issued forecasts whose target week now
    /// has an observed price.
    pub async fn check_performance(&self) -> Result<PerformanceCheck> {
        let Some(active) = self.registry.active()? else {
            return Ok(PerformanceCheck::default());
        };
        let mut check = PerformanceCheck {
            model_version: Some(active.version.clone()),
            ..Default::default()
        };
        let Some(snapshot) = self.lake.latest_snapshot(lake::WEEKLY_PANEL)? else {
            return Ok(check);
        };
        let (_, records) = load_panel(&self.lake, Some(snapshot))?;
        // forecasts issued by the API process land on disk, not in this copy
        self.ledger.reload().await?;
        let actuals: HashMap<(String, Grade, NaiveDate), f64> = records
            .iter()
            .filter_map(|r| {
                r.price_usd_per_l
                    .map(|p| ((r.country.clone(), r.grade, r.week_start), p))
            })
            .collect();

        let pairs: Vec<(f64, f64)> = self
            .ledger
            .forecasts()
            .await
            .into_iter()
            .filter(|f| f.model_version == active.version)
            .filter_map(|f| {
                actuals
                    .get(&(f.country.clone(), f.grade, f.target_week))
                    .map(|actual| (f.point, *actual))
            })
            .collect();

        check.evaluated = pairs.len();
        if let Some((mae, mape)) = forecast_errors(&pairs) {
            check.mae = Some(mae);
            check.mape = Some(mape);
            check.degraded = mae > self.thresholds.mae || mape > self.thresholds.mape;
        }
        Ok(check)
    }

    /// Run every check, deliver the resulting alerts and store the report.
    pub async fn run(&self, as_of: DateTime<Utc>) -> Result<MonitoringReport> {
        info!(as_of = %as_of, "monitoring run started");
        let freshness = self.check_freshness(as_of)?;
        let quality = self.check_quality()?;
        let performance = self.check_performance().await?;

        let mut alerts = Vec::new();

        let stale: Vec<String> = freshness
            .iter()
            .filter(|c| !c.fresh)
            .map(|c| match c.age_days {
                Some(age) => format!("{} ({} days old)", c.source, age),
                None => format!("{} (missing)", c.source),
            })
            .collect();
        if !stale.is_empty() {
            alerts.push(Alert::new(
                "freshness",
                format!("{} stale data source(s)", stale.len()),
                format!(
                    "Sources older than {} days: {}",
                    self.thresholds.freshness_max_age_days,
                    stale.join(", ")
                ),
                Severity::Warning,
            ));
        }

        if quality.records == 0 {
            alerts.push(Alert::new(
                "quality",
                "Weekly panel missing or empty",
                "No usable weekly panel records were found; forecasts cannot be refreshed.",
                Severity::Critical,
            ));
        } else if !quality.low_coverage.is_empty() {
            let detail: Vec<String> = quality
                .low_coverage
                .iter()
                .map(|f| format!("{} {:.1}%", f, quality.coverage.get(f).copied().unwrap_or(0.0)))
                .collect();
            alerts.push(Alert::new(
                "quality",
                "Low field coverage in weekly panel",
                format!(
                    "Fields below {:.0}% coverage: {}",
                    MIN_FIELD_COVERAGE,
                    detail.join(", ")
                ),
                Severity::Warning,
            ));
        }

        let degradation = match (&performance.model_version, performance.mae, performance.mape) {
            (Some(version), Some(mae), Some(mape)) if performance.degraded => {
                let reason = format!(
                    "model {} MAE {:.3} (limit {:.3}), MAPE {:.1}% (limit {:.1}%) over {} forecasts",
                    version, mae, self.thresholds.mae, mape, self.thresholds.mape, performance.evaluated
                );
                alerts.push(Alert::new(
                    "performance",
                    "Forecast performance degraded",
                    reason.clone(),
                    Severity::Critical,
                ));
                Some(DegradationSignal {
                    model_version: version.clone(),
                    mae,
                    mape,
                    reason,
                })
            }
            _ => None,
        };

        for alert in alerts.iter_mut() {
            deliver(self.notifier.as_ref(), alert).await;
        }
        let alerts_sent = alerts
            .iter()
            .filter(|a| a.status == AlertStatus::Delivered)
            .count();

        let report = MonitoringReport {
            report_id: Uuid::new_v4(),
            timestamp: as_of,
            summary: MonitoringSummary {
                total_checks: freshness.len() + 2,
                alerts_sent,
                status: if alerts.is_empty() {
                    ReportStatus::Ok
                } else {
                    ReportStatus::Warning
                },
            },
            checks: MonitoringChecks {
                freshness,
                quality,
                performance,
            },
            alerts,
            degradation,
        };

        let path = self.store(&report)?;
        if report.summary.status == ReportStatus::Warning {
            warn!(alerts = report.alerts.len(), sent = alerts_sent, path = %path.display(), "monitoring found issues");
        } else {
            info!(path = %path.display(), "monitoring ok");
        }
        Ok(report)
    }

    fn store(&self, report: &MonitoringReport) -> Result<PathBuf> {
        let path = self.lake.path(lake::MONITORING_REPORTS).join(format!(
            "{}-{}.json",
            report.timestamp.format("%Y%m%dT%H%M%S"),
            &report.report_id.simple().to_string()[..8]
        ));
        self.lake.write_json(&path, report)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::to_monday;
    use crate::models::{Forecast, PanelRecord};
    use crate::notify::tests::RecordingNotifier;
    use crate::training::tests::synthetic_rows;
    use crate::training::Trainer;
    use chrono::{Duration, TimeZone};

    fn thresholds() -> MonitorThresholds {
        MonitorThresholds {
            freshness_max_age_days: 7,
            mae: 0.12,
            mape: 10.0,
        }
    }

    fn record(week: NaiveDate, price: f64) -> PanelRecord {
        PanelRecord {
            week_start: week,
            country: "IT".into(),
            grade: Grade::ExtraVirgin,
            markets: 2,
            price_eur_per_l: price,
            usd_per_eur: Some(1.0),
            price_usd_per_l: Some(price),
            brent_usd_bbl: Some(80.0),
            diesel_usd_per_gal: Some(3.5),
            ppi_glass: None,
            ppi_plastic_bottles: None,
            ppi_steel: None,
            fbx_index: Some(2000.0),
            ocean_proxy: Some(2000.0),
            pack: "glass".into(),
            pack_cost: 0.22,
            ocean_uplift: Some(6.0),
            diesel_uplift: Some(0.0),
            duty_usd_per_l: Some(0.1),
            deliv_hat_usd_per_l: Some(price + 6.32),
            z_base: 0.0,
        }
    }

    fn monitor(lake: &DataLake, notifier: Arc<dyn Notifier>) -> (Monitor, ModelRegistry, ForecastLedger) {
        let registry = ModelRegistry::new(lake.clone());
        let ledger = ForecastLedger::new();
        let m = Monitor::new(lake.clone(), registry.clone(), ledger.clone(), notifier, thresholds());
        (m, registry, ledger)
    }

    #[test]
    fn test_freshness_classification() {
        assert!(classify_freshness(Some(0), 7));
        assert!(classify_freshness(Some(6), 7));
        assert!(!classify_freshness(Some(7), 7));
        assert!(!classify_freshness(None, 7));
    }

    #[test]
    fn test_forecast_errors() {
        let (mae, mape) = forecast_errors(&[(3.3, 3.0), (3.0, 3.0)]).unwrap();
        assert!((mae - 0.15).abs() < 1e-12);
        assert!((mape - 5.0).abs() < 1e-9);
        assert!(forecast_errors(&[]).is_none());
    }

    #[tokio::test]
    async fn test_stale_and_missing_sources_alert() {
        let lake = crate::lake::temp_lake();
        let as_of = Utc.with_ymd_and_hms(2025, 3, 20, 6, 0, 0).unwrap();
        let today = as_of.date_naive();
        let week = vec![record(to_monday(today), 3.5)];
        lake.write_csv(&lake.snapshot_path(lake::EU_PRICES, today - Duration::days(2), "eu_prices.csv"), &week)
            .unwrap();
        lake.write_csv(&lake.snapshot_path(lake::FBX, today - Duration::days(10), "fbx.csv"), &week)
            .unwrap();
        lake.write_csv(&lake.snapshot_path(lake::WEEKLY_PANEL, today, "weekly_panel.csv"), &week)
            .unwrap();

        let notifier = Arc::new(RecordingNotifier::default());
        let (m, _, _) = monitor(&lake, notifier.clone());
        let report = m.run(as_of).await.unwrap();

        let by_source: HashMap<_, _> = report
            .checks
            .freshness
            .iter()
            .map(|c| (c.source.as_str(), c))
            .collect();
        assert!(by_source["eu_prices"].fresh);
        assert_eq!(by_source["eu_prices"].age_days, Some(2));
        assert!(!by_source["fbx"].fresh);
        assert!(!by_source["tariffs"].fresh);
        assert_eq!(by_source["tariffs"].age_days, None);

        assert_eq!(report.summary.total_checks, 9);
        assert_eq!(report.summary.status, ReportStatus::Warning);
        assert!(report.alerts.iter().any(|a| a.trigger == "freshness"));
        assert!(report.alerts.iter().all(|a| a.status == AlertStatus::Delivered));
        assert_eq!(report.summary.alerts_sent, notifier.sent.lock().await.len());
        assert!(report.degradation.is_none());
        assert_eq!(lake.list_snapshots(lake::WEEKLY_PANEL).unwrap().len(), 1);
        assert!(lake.path(lake::MONITORING_REPORTS).read_dir().unwrap().count() == 1);
    }

    #[tokio::test]
    async fn test_missing_panel_is_critical() {
        let lake = crate::lake::temp_lake();
        let (m, _, _) = monitor(&lake, Arc::new(RecordingNotifier::default()));
        let report = m.run(Utc::now()).await.unwrap();
        let quality = report.alerts.iter().find(|a| a.trigger == "quality").unwrap();
        assert_eq!(quality.severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_low_coverage_flagged() {
        let lake = crate::lake::temp_lake();
        let (m, _, _) = monitor(&lake, Arc::new(RecordingNotifier::default()));
        let today = Utc::now().date_naive();
        lake.write_csv(
            &lake.snapshot_path(lake::WEEKLY_PANEL, today, "weekly_panel.csv"),
            &[record(to_monday(today), 3.5)],
        )
        .unwrap();

        let quality = m.check_quality().unwrap();
        assert_eq!(quality.records, 1);
        assert_eq!(quality.low_coverage, vec!["ppi_glass".to_string()]);
    }

    #[tokio::test]
    async fn test_degradation_signal() {
        let lake = crate::lake::temp_lake();
        let notifier = Arc::new(RecordingNotifier { fail: true, ..Default::default() });
        let (m, registry, ledger) = monitor(&lake, notifier);

        let rows = synthetic_rows(&[("IT", Grade::ExtraVirgin, 3.5)], 30);
        let bundle = registry.register(Trainer::new(26).train_bundle(&rows, None).unwrap()).unwrap();

        let week = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        lake.write_csv(
            &lake.snapshot_path(lake::WEEKLY_PANEL, week, "weekly_panel.csv"),
            &[record(week, 3.0)],
        )
        .unwrap();
        ledger
            .record(Forecast {
                forecast_id: Uuid::new_v4(),
                target_week: week,
                country: "IT".into(),
                grade: Grade::ExtraVirgin,
                point: 3.6,
                lower: 3.4,
                upper: 3.8,
                confidence_level: 0.95,
                model_version: bundle.version.clone(),
                segment: "country_grade_IT_EVOO".into(),
                horizon_weeks: 4,
                issued_at: Utc::now(),
            })
            .await
            .unwrap();

        let report = m.run(Utc::now()).await.unwrap();
        let perf = &report.checks.performance;
        assert_eq!(perf.evaluated, 1);
        assert!(perf.degraded);
        let signal = report.degradation.unwrap();
        assert_eq!(signal.model_version, bundle.version);
        assert!((signal.mape - 20.0).abs() < 1e-9);

        let alert = report.alerts.iter().find(|a| a.trigger == "performance").unwrap();
        assert_eq!(alert.status, AlertStatus::Failed);
        assert_eq!(report.summary.alerts_sent, 0);
    }

    #[tokio::test]
    async fn test_performance_sees_forecasts_from_other_process() {
        let lake = crate::lake::temp_lake();
        let registry = ModelRegistry::new(lake.clone());
        let scheduler_ledger = ForecastLedger::open(lake.clone()).unwrap();
        let m = Monitor::new(
            lake.clone(),
            registry.clone(),
            scheduler_ledger.clone(),
            Arc::new(RecordingNotifier::default()),
            thresholds(),
        );

        let rows = synthetic_rows(&[("IT", Grade::ExtraVirgin, 3.5)], 30);
        let bundle = registry.register(Trainer::new(26).train_bundle(&rows, None).unwrap()).unwrap();
        let week = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        lake.write_csv(
            &lake.snapshot_path(lake::WEEKLY_PANEL, week, "weekly_panel.csv"),
            &[record(week, 3.0)],
        )
        .unwrap();

        // issued after the scheduler opened its ledger
        let api_ledger = ForecastLedger::open(lake.clone()).unwrap();
        api_ledger
            .record(Forecast {
                forecast_id: Uuid::new_v4(),
                target_week: week,
                country: "IT".into(),
                grade: Grade::ExtraVirgin,
                point: 3.6,
                lower: 3.4,
                upper: 3.8,
                confidence_level: 0.95,
                model_version: bundle.version.clone(),
                segment: "country_grade_IT_EVOO".into(),
                horizon_weeks: 4,
                issued_at: Utc::now(),
            })
            .await
            .unwrap();

        let report = m.run(Utc::now()).await.unwrap();
        assert_eq!(report.checks.performance.evaluated, 1);
        assert!(report.checks.performance.degraded);
        assert!(report.degradation.is_some());
        assert_eq!(scheduler_ledger.len().await, 1);
    }
}
