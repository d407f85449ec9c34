//! Core data models for the olive oil forecasting platform

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//
// ================= Markets =================
//

/// A producing country tracked by the platform
#[derive(Debug, Clone, Copy)]
pub struct Country {
    pub code: &'static str,
    pub name: &'static str,
    pub adjective: &'static str,
}

/// EU member-state codes as they appear in the price sheets.
pub const COUNTRIES: [Country; 5] = [
    Country { code: "EL", name: "Greece", adjective: "greek" },
    Country { code: "ES", name: "Spain", adjective: "spanish" },
    Country { code: "PT", name: "Portugal", adjective: "portuguese" },
    Country { code: "IT", name: "Italy", adjective: "italian" },
    Country { code: "HR", name: "Croatia", adjective: "croatian" },
];

/// Resolve a country name, adjective or code to its member-state code.
/// Unknown inputs are passed through upper-cased so other member states
/// present in the data remain addressable.
pub fn country_code(input: &str) -> Option<String> {
    let needle = input.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    if needle == "gr" {
        return Some("EL".to_string());
    }

    COUNTRIES
        .iter()
        .find(|c| {
            c.code.eq_ignore_ascii_case(&needle)
                || c.name.eq_ignore_ascii_case(&needle)
                || c.adjective == needle
        })
        .map(|c| c.code.to_string())
        .or_else(|| {
            (needle.len() == 2 && needle.chars().all(|ch| ch.is_ascii_alphabetic()))
                .then(|| needle.to_uppercase())
        })
}

/// Display name for a member-state code ("IT" → "Italy").
pub fn country_name(code: &str) -> String {
    COUNTRIES
        .iter()
        .find(|c| c.code.eq_ignore_ascii_case(code))
        .map(|c| c.name.to_string())
        .unwrap_or_else(|| code.to_string())
}

//
// ================= Grade =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Grade {
    #[serde(rename = "EVOO")]
    ExtraVirgin,
    #[serde(rename = "VOO")]
    Virgin,
    #[serde(rename = "LAMPANTE")]
    Lampante,
    #[serde(rename = "REFINED")]
    Refined,
    #[serde(rename = "POMACE")]
    Pomace,
}

impl Grade {
    pub const ALL: [Grade; 5] = [
        Grade::ExtraVirgin,
        Grade::Virgin,
        Grade::Lampante,
        Grade::Refined,
        Grade::Pomace,
    ];

    /// Canonicalise a free-text category label from a price sheet.
    pub fn canonical(raw: &str) -> Option<Grade> {
        let s = raw.trim().to_lowercase();
        if s.is_empty() {
            return None;
        }
        if let Some(g) = Grade::ALL.iter().find(|g| g.code().eq_ignore_ascii_case(&s)) {
            return Some(*g);
        }
        if s.contains("extra") {
            Some(Grade::ExtraVirgin)
        } else if s.contains("lampante") {
            Some(Grade::Lampante)
        } else if s.contains("pomace") {
            Some(Grade::Pomace)
        } else if s.contains("refined") {
            Some(Grade::Refined)
        } else if s.contains("virgin") {
            Some(Grade::Virgin)
        } else {
            None
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Grade::ExtraVirgin => "EVOO",
            Grade::Virgin => "VOO",
            Grade::Lampante => "LAMPANTE",
            Grade::Refined => "REFINED",
            Grade::Pomace => "POMACE",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Grade::ExtraVirgin => "Extra Virgin",
            Grade::Virgin => "Virgin",
            Grade::Lampante => "Lampante",
            Grade::Refined => "Refined",
            Grade::Pomace => "Pomace",
        }
    }

    /// Four-digit HS heading used for tariff lookup.
    pub fn hs_prefix(&self) -> &'static str {
        match self {
            Grade::Pomace => "1510",
            _ => "1509",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Grade {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Grade::canonical(s).ok_or_else(|| format!("unknown grade: {}", s))
    }
}

//
// ================= Panel =================
//

/// Weekly economic panel record, one per (week, country, grade)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PanelRecord {
    pub week_start: NaiveDate,
    pub country: String,
    pub grade: Grade,
    pub markets: usize,
    pub price_eur_per_l: f64,
    pub usd_per_eur: Option<f64>,
    pub price_usd_per_l: Option<f64>,
    pub brent_usd_bbl: Option<f64>,
    pub diesel_usd_per_gal: Option<f64>,
    pub ppi_glass: Option<f64>,
    pub ppi_plastic_bottles: Option<f64>,
    pub ppi_steel: Option<f64>,
    pub fbx_index: Option<f64>,
    pub ocean_proxy: Option<f64>,
    pub pack: String,
    pub pack_cost: f64,
    pub ocean_uplift: Option<f64>,
    pub diesel_uplift: Option<f64>,
    pub duty_usd_per_l: Option<f64>,
    pub deliv_hat_usd_per_l: Option<f64>,
    pub z_base: f64,
}

/// Feature panel row consumed by training and forecasting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureRow {
    pub week_start: NaiveDate,
    pub country: String,
    pub grade: Grade,
    pub price_usd_per_l: f64,
    pub cost_pressure: f64,
    pub lag1week: Option<f64>,
    pub lag2week: Option<f64>,
    pub rolling3: Option<f64>,
    pub rolling10: Option<f64>,
    pub month: u32,
    pub dayofweek: u32,
    pub quarter: u32,
    pub sin_week: f64,
}

//
// ================= Model Artifact =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Candidate,
    Active,
    Retired,
}

/// One fitted ridge model for a segment of the panel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentModel {
    pub name: String,
    pub alpha: f64,
    pub intercept: f64,
    pub coefficients: Vec<f64>,
    pub feature_schema: Vec<String>,
    pub training_rows: usize,
    pub residual_std: f64,
    pub train_mae: f64,
}

impl SegmentModel {
    pub fn predict(&self, features: &[f64]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(features)
                .map(|(b, x)| b * x)
                .sum::<f64>()
    }
}

/// Versioned set of segment models produced by one training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub source_snapshot: Option<NaiveDate>,
    pub models: BTreeMap<String, SegmentModel>,
    pub status: ModelStatus,
    #[serde(default)]
    pub retired_at: Option<DateTime<Utc>>,
}

//
// ================= Forecast =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastQuery {
    pub country: String,
    pub grade: Grade,
    pub target_week: NaiveDate,
}

/// Issued forecast. Immutable once recorded for a model version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Forecast {
    pub forecast_id: Uuid,
    pub target_week: NaiveDate,
    pub country: String,
    pub grade: Grade,
    pub point: f64,
    pub lower: f64,
    pub upper: f64,
    pub confidence_level: f64,
    pub model_version: String,
    pub segment: String,
    pub horizon_weeks: u32,
    pub issued_at: DateTime<Utc>,
}

//
// ================= Alerts =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Pending,
    Delivered,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: Uuid,
    pub trigger: String,
    pub subject: String,
    pub message: String,
    pub severity: Severity,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn new(
        trigger: impl Into<String>,
        subject: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            trigger: trigger.into(),
            subject: subject.into(),
            message: message.into(),
            severity,
            status: AlertStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != AlertStatus::Pending
    }

    /// Record the delivery outcome. Returns false when the alert already
    /// reached a terminal state.
    pub fn resolve(&mut self, delivered: bool) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = if delivered {
            AlertStatus::Delivered
        } else {
            AlertStatus::Failed
        };
        self.resolved_at = Some(Utc::now());
        true
    }
}

//
// ================= Plan =================
//

/// Tool calls answering one conversational turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: Uuid,
    pub session_id: Uuid,
    pub intent: crate::classifier::Intent,
    pub steps: Vec<PlanStep>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: Uuid,
    pub order: u32,
    pub tool_name: String,
    pub tool_input: serde_json::Value,
    pub expected_output: String,
}

//
// ================= Execution =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub observation_id: Uuid,
    pub plan_id: Uuid,
    pub step_id: Uuid,
    pub tool_name: String,
    pub tool_input: serde_json::Value,
    pub tool_output: serde_json::Value,
    pub execution_time_ms: u64,
    pub created_at: DateTime<Utc>,
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Skipped,
}

//
// ================= Tool I/O =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInput {
    pub tool_name: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub data: serde_json::Value,
    pub error: Option<String>,
}

impl ToolOutput {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}
