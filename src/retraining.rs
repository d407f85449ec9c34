//! Conditional retraining
//!
//! A degraded monitoring report triggers a retrain: check that features
//! exist, train a candidate, evaluate it, and register it only when it
//! passes the MAE gate. Every outcome is announced through the notifier.

use crate::evaluation::{evaluate, store_report, EvaluationReport};
use crate::features::load_features;
use crate::lake::{self, DataLake};
use crate::models::{Alert, Severity};
use crate::monitoring::MonitoringReport;
use crate::notify::{deliver, Notifier};
use crate::registry::ModelRegistry;
use crate::training::Trainer;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetrainStatus {
    NotTriggered,
    Registered,
    Rejected,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainStep {
    pub name: String,
    pub status: StepStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainOutcome {
    pub triggered: bool,
    pub reason: String,
    pub status: RetrainStatus,
    pub steps: Vec<RetrainStep>,
    pub candidate_version: Option<String>,
    pub active_version: Option<String>,
    pub evaluation: Option<EvaluationReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RetrainOutcome {
    fn start(reason: &str) -> Self {
        let now = Utc::now();
        Self {
            triggered: true,
            reason: reason.to_string(),
            status: RetrainStatus::Failed,
            steps: Vec::new(),
            candidate_version: None,
            active_version: None,
            evaluation: None,
            started_at: now,
            finished_at: now,
        }
    }

    fn step(&mut self, name: &str, status: StepStatus, detail: impl Into<String>) {
        self.steps.push(RetrainStep {
            name: name.to_string(),
            status,
            detail: detail.into(),
        });
    }
}

pub struct Retrainer {
    lake: DataLake,
    registry: ModelRegistry,
    notifier: Arc<dyn Notifier>,
    min_rows: usize,
    mae_threshold: f64,
}

impl Retrainer {
    pub fn new(
        lake: DataLake,
        registry: ModelRegistry,
        notifier: Arc<dyn Notifier>,
        min_rows: usize,
        mae_threshold: f64,
    ) -> Self {
        Self {
            lake,
            registry,
            notifier,
            min_rows,
            mae_threshold,
        }
    }

    /// Retrain only when the report carries a degradation signal.
    pub async fn trigger_from_monitoring(&self, report: &MonitoringReport) -> Result<RetrainOutcome> {
        match &report.degradation {
            Some(signal) => self.retrain(&signal.reason).await,
            None => {
                info!("no degradation signal, retraining not triggered");
                let mut outcome = RetrainOutcome::start("no degradation");
                outcome.triggered = false;
                outcome.status = RetrainStatus::NotTriggered;
                outcome.active_version = self.registry.active()?.map(|b| b.version);
                Ok(outcome)
            }
        }
    }

    pub async fn retrain(&self, reason: &str) -> Result<RetrainOutcome> {
        info!(reason, "retraining started");
        let mut outcome = RetrainOutcome::start(reason);
        outcome.active_version = self.registry.active()?.map(|b| b.version);

        let rows = match self.lake.latest_snapshot(lake::FEATURES)? {
            Some(snapshot) => match load_features(&self.lake, Some(snapshot)) {
                Ok((_, rows)) if !rows.is_empty() => {
                    outcome.step("data_check", StepStatus::Completed, format!("{} feature rows from {}", rows.len(), snapshot));
                    Some((snapshot, rows))
                }
                Ok(_) => {
                    outcome.step("data_check", StepStatus::Failed, format!("features snapshot {} is empty", snapshot));
                    None
                }
                Err(e) => {
                    outcome.step("data_check", StepStatus::Failed, e.to_string());
                    None
                }
            },
            None => {
                outcome.step("data_check", StepStatus::Failed, "no features snapshot available");
                None
            }
        };
        let Some((snapshot, rows)) = rows else {
            for name in ["train", "evaluate", "register"] {
                outcome.step(name, StepStatus::Skipped, "no training data");
            }
            return Ok(self.finish(outcome, "Retraining failed: no training data", Severity::Critical).await);
        };

        let candidate = match Trainer::new(self.min_rows).train_bundle(&rows, Some(snapshot)) {
            Ok(bundle) => {
                outcome.step("train", StepStatus::Completed, format!("{} segment models", bundle.models.len()));
                bundle
            }
            Err(e) => {
                error!(error = %e, "candidate training failed");
                outcome.step("train", StepStatus::Failed, e.to_string());
                for name in ["evaluate", "register"] {
                    outcome.step(name, StepStatus::Skipped, "training failed");
                }
                return Ok(self.finish(outcome, "Retraining failed during training", Severity::Critical).await);
            }
        };
        outcome.candidate_version = Some(candidate.version.clone());
        self.registry.save_candidate(&candidate)?;

        let report = evaluate(&candidate, &rows, self.mae_threshold);
        store_report(&self.lake, &report)?;
        let global_mae = report.global.map(|g| g.mae);
        outcome.step(
            "evaluate",
            StepStatus::Completed,
            match global_mae {
                Some(mae) => format!("global MAE {:.4} (gate {:.4})", mae, self.mae_threshold),
                None => "no global model".to_string(),
            },
        );
        let passed = report.passed;
        outcome.evaluation = Some(report);

        if passed {
            let registered = self.registry.register(candidate)?;
            outcome.step("register", StepStatus::Completed, format!("{} is now active", registered.version));
            outcome.active_version = Some(registered.version);
            outcome.status = RetrainStatus::Registered;
            Ok(self.finish(outcome, "Retraining completed: new model registered", Severity::Info).await)
        } else {
            warn!(candidate = ?outcome.candidate_version, mae = ?global_mae, "candidate rejected by gate");
            outcome.step("register", StepStatus::Skipped, "candidate did not pass the MAE gate");
            outcome.status = RetrainStatus::Rejected;
            Ok(self.finish(outcome, "Retraining rejected: current model kept", Severity::Warning).await)
        }
    }

    async fn finish(&self, mut outcome: RetrainOutcome, subject: &str, severity: Severity) -> RetrainOutcome {
        outcome.finished_at = Utc::now();
        let steps: Vec<String> = outcome
            .steps
            .iter()
            .map(|s| format!("{}: {:?} ({})", s.name, s.status, s.detail))
            .collect();
        let mut alert = Alert::new(
            "retraining",
            subject,
            format!(
                "Reason: {}\nCandidate: {}\nActive: {}\n{}",
                outcome.reason,
                outcome.candidate_version.as_deref().unwrap_or("none"),
                outcome.active_version.as_deref().unwrap_or("none"),
                steps.join("\n")
            ),
            severity,
        );
        deliver(self.notifier.as_ref(), &mut alert).await;
        info!(status = ?outcome.status, candidate = ?outcome.candidate_version, "retraining finished");
        outcome
    }
}
