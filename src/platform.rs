//! Wiring of the lake, registry, ledger and notifier into the pipeline,
//! monitoring and retraining entry points shared by the binaries.

use crate::audit::ForecastLedger;
use crate::config::Settings;
use crate::evaluation::{evaluate, store_report, EvaluationReport};
use crate::features::{build_features, load_features, FeatureSummary};
use crate::forecasting::ForecastService;
use crate::ingest::macros::MacroIngestSummary;
use crate::ingest::{ingest_macros, normalize_tariffs, standardize_eu_prices, standardize_fbx, MacroSource};
use crate::lake::DataLake;
use crate::models::ModelBundle;
use crate::monitoring::{Monitor, MonitorThresholds, MonitoringReport};
use crate::notify::{notifier_from_settings, Notifier};
use crate::panel::{build_weekly_panel, PanelSummary};
use crate::registry::ModelRegistry;
use crate::retraining::{RetrainOutcome, Retrainer};
use crate::training::Trainer;
use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a training run: the candidate, its evaluation and whether it
/// became the active model.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingOutcome {
    pub version: String,
    pub segments: usize,
    pub evaluation: EvaluationReport,
    pub registered: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub snapshot: NaiveDate,
    pub macros: Option<MacroIngestSummary>,
    pub panel: PanelSummary,
    pub features: FeatureSummary,
    pub training: TrainingOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleOutcome {
    pub report: MonitoringReport,
    pub retraining: RetrainOutcome,
}

#[derive(Clone)]
pub struct Platform {
    pub settings: Settings,
    pub lake: DataLake,
    pub registry: ModelRegistry,
    pub ledger: ForecastLedger,
    pub notifier: Arc<dyn Notifier>,
    pub forecasts: ForecastService,
}

impl Platform {
    pub fn new(settings: Settings) -> Result<Self> {
        let notifier = notifier_from_settings(&settings.smtp);
        Self::with_notifier(settings, notifier)
    }

    pub fn with_notifier(settings: Settings, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let lake = DataLake::new(settings.lake_root.clone());
        let registry = ModelRegistry::new(lake.clone());
        let ledger = ForecastLedger::open(lake.clone())?;
        let forecasts = ForecastService::new(lake.clone(), registry.clone(), ledger.clone());
        info!(lake = %lake.root().display(), notifier = notifier.name(), "platform initialised");
        Ok(Self {
            settings,
            lake,
            registry,
            ledger,
            notifier,
            forecasts,
        })
    }

    pub fn monitor(&self) -> Monitor {
        Monitor::new(
            self.lake.clone(),
            self.registry.clone(),
            self.ledger.clone(),
            self.notifier.clone(),
            MonitorThresholds::from(&self.settings),
        )
    }

    pub fn retrainer(&self) -> Retrainer {
        Retrainer::new(
            self.lake.clone(),
            self.registry.clone(),
            self.notifier.clone(),
            self.settings.min_rows_per_model,
            self.settings.eval_mae_threshold,
        )
    }

    /// Train from a features snapshot, evaluate, and register when the
    /// candidate passes the gate. A rejected candidate is kept on disk.
    pub fn train_and_register(&self, snapshot: Option<NaiveDate>) -> Result<TrainingOutcome> {
        let (snapshot, rows) = load_features(&self.lake, snapshot)?;
        let bundle = Trainer::new(self.settings.min_rows_per_model).train_bundle(&rows, Some(snapshot))?;
        let evaluation = evaluate(&bundle, &rows, self.settings.eval_mae_threshold);
        store_report(&self.lake, &evaluation)?;
        self.finish_training(bundle, evaluation)
    }

    /// Evaluate a stored bundle against a features snapshot.
    pub fn evaluate_version(&self, version: Option<&str>, snapshot: Option<NaiveDate>) -> Result<EvaluationReport> {
        let bundle = match version {
            Some(v) => self.registry.get(v)?,
            None => self.registry.require_active()?,
        };
        let (_, rows) = load_features(&self.lake, snapshot)?;
        let report = evaluate(&bundle, &rows, self.settings.eval_mae_threshold);
        store_report(&self.lake, &report)?;
        Ok(report)
    }

    fn finish_training(&self, bundle: ModelBundle, evaluation: EvaluationReport) -> Result<TrainingOutcome> {
        let version = bundle.version.clone();
        let segments = bundle.models.len();
        let registered = if evaluation.passed {
            self.registry.register(bundle)?;
            true
        } else {
            warn!(version = %version, global = ?evaluation.global, "candidate failed the gate, not registered");
            self.registry.save_candidate(&bundle)?;
            false
        };
        Ok(TrainingOutcome {
            version,
            segments,
            evaluation,
            registered,
        })
    }

    /// Full batch run for one snapshot: ingestion, panel, features and
    /// training. FBX, tariffs and macros are optional inputs.
    pub async fn run_pipeline(
        &self,
        snapshot: NaiveDate,
        macro_source: Option<&dyn MacroSource>,
    ) -> Result<PipelineOutcome> {
        info!(snapshot = %snapshot, "pipeline started");
        standardize_eu_prices(&self.lake, snapshot, self.settings.price_unit)?;
        if let Err(e) = standardize_fbx(&self.lake, snapshot) {
            warn!(error = %e, "FBX ingestion skipped");
        }
        if let Err(e) = normalize_tariffs(&self.lake) {
            warn!(error = %e, "tariff normalisation skipped");
        }
        let macros = match macro_source {
            Some(source) => Some(ingest_macros(&self.lake, snapshot, source).await?),
            None => None,
        };

        let panel = build_weekly_panel(&self.lake, snapshot)?;
        let features = build_features(&self.lake, snapshot)?;
        let training = self.train_and_register(Some(snapshot))?;
        info!(
            snapshot = %snapshot,
            version = %training.version,
            registered = training.registered,
            "pipeline complete"
        );
        Ok(PipelineOutcome {
            snapshot,
            macros,
            panel,
            features,
            training,
        })
    }

    /// One scheduled cycle: monitoring, then retraining when degraded.
    pub async fn run_cycle(&self, as_of: DateTime<Utc>) -> Result<CycleOutcome> {
        let report = self.monitor().run(as_of).await?;
        let retraining = self.retrainer().trigger_from_monitoring(&report).await?;
        Ok(CycleOutcome { report, retraining })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ForecastError;
    use crate::ingest::{MacroSeries, SeriesPoint};
    use crate::lake;
    use crate::notify::tests::RecordingNotifier;
    use crate::retraining::RetrainStatus;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::fs;

    pub(crate) struct FixedFx(pub f64);

    #[async_trait]
    impl MacroSource for FixedFx {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn fetch(&self, series: MacroSeries) -> Result<Vec<SeriesPoint>> {
            if series != MacroSeries::UsdPerEur {
                return Err(ForecastError::Ingestion("offline".into()));
            }
            let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
            Ok((0..400)
                .map(|i| SeriesPoint {
                    date: start + Duration::days(i),
                    value: self.0,
                })
                .collect())
        }
    }

    /// Raw weekly EU prices for Italy and Spain, extra virgin, in EUR/L.
    pub(crate) fn write_raw_prices(lake: &DataLake, weeks: usize) {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut csv = String::from("Member State,Market,Product,Date,Price EUR per L\n");
        for i in 0..weeks {
            let date = start + Duration::weeks(i as i64);
            let wiggle = 0.01 * ((i % 4) as f64 - 1.5);
            csv.push_str(&format!("IT,Bari,Extra virgin olive oil,{},{:.4}\n", date, 3.5 + wiggle));
            csv.push_str(&format!("ES,Jaen,Extra virgin olive oil,{},{:.4}\n", date, 3.2 + wiggle));
        }
        let dir = lake.path(lake::RAW_EU_PRICES);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("prices.csv"), csv).unwrap();
    }

    pub(crate) fn test_platform() -> (Platform, Arc<RecordingNotifier>) {
        let lake = lake::temp_lake();
        let settings = Settings::default().with_lake_root(lake.root());
        let notifier = Arc::new(RecordingNotifier::default());
        (Platform::with_notifier(settings, notifier.clone()).unwrap(), notifier)
    }

    #[tokio::test]
    async fn test_pipeline_registers_model() {
        let (platform, _) = test_platform();
        write_raw_prices(&platform.lake, 40);
        let snapshot = NaiveDate::from_ymd_opt(2024, 10, 7).unwrap();

        let outcome = platform.run_pipeline(snapshot, Some(&FixedFx(1.0))).await.unwrap();
        assert_eq!(outcome.panel.records, 80);
        assert_eq!(outcome.features.series, 2);
        assert!(outcome.training.registered);
        assert!(outcome.training.evaluation.passed);
        assert_eq!(
            platform.registry.active().unwrap().unwrap().version,
            outcome.training.version
        );
    }

    #[tokio::test]
    async fn test_cycle_without_degradation_does_not_retrain() {
        let (platform, notifier) = test_platform();
        write_raw_prices(&platform.lake, 40);
        let snapshot = NaiveDate::from_ymd_opt(2024, 10, 7).unwrap();
        platform.run_pipeline(snapshot, Some(&FixedFx(1.0))).await.unwrap();

        let cycle = platform.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(cycle.retraining.status, RetrainStatus::NotTriggered);
        assert_eq!(cycle.report.summary.alerts_sent, notifier.sent.lock().await.len());
    }

    #[tokio::test]
    async fn test_pipeline_without_prices_fails() {
        let (platform, _) = test_platform();
        let snapshot = NaiveDate::from_ymd_opt(2024, 10, 7).unwrap();
        assert!(platform.run_pipeline(snapshot, None).await.is_err());
    }
}
