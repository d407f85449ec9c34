//! Runtime settings loaded from the environment (`.env` supported)

use crate::ingest::PriceUnit;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// TLS mode for the SMTP alert channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SmtpTls {
    #[default]
    StartTls,
    Tls,
    None,
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
    pub to: Vec<String>,
    pub tls: SmtpTls,
}

impl SmtpSettings {
    /// SMTP delivery needs at least a host, a sender and one recipient.
    pub fn is_configured(&self) -> bool {
        self.host.is_some() && self.from.is_some() && !self.to.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub lake_root: PathBuf,
    /// Registration gate and degradation bound on MAE (USD per litre)
    pub eval_mae_threshold: f64,
    pub min_rows_per_model: usize,
    pub freshness_max_age_days: i64,
    /// Degradation bound on MAPE (percent)
    pub degradation_mape_threshold: f64,
    pub price_unit: PriceUnit,
    pub fred_api_key: Option<String>,
    pub eia_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub database_url: Option<String>,
    pub api_port: u16,
    pub monitor_interval_hours: u64,
    pub smtp: SmtpSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            lake_root: PathBuf::from("./lake"),
            eval_mae_threshold: 0.12,
            min_rows_per_model: 26,
            freshness_max_age_days: 7,
            degradation_mape_threshold: 10.0,
            price_unit: PriceUnit::Per100Kg,
            fred_api_key: None,
            eia_api_key: None,
            gemini_api_key: None,
            database_url: None,
            api_port: 8080,
            monitor_interval_hours: 24,
            smtp: SmtpSettings {
                host: None,
                port: 587,
                username: None,
                password: None,
                from: None,
                to: Vec::new(),
                tls: SmtpTls::StartTls,
            },
        }
    }
}

impl Settings {
    /// Load settings from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let defaults = Self::default();

        let smtp_to = env::var("ALERT_EMAIL_TO")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let smtp_tls = match env::var("SMTP_TLS").unwrap_or_default().to_lowercase().as_str() {
            "tls" => SmtpTls::Tls,
            "none" => SmtpTls::None,
            _ => SmtpTls::StartTls,
        };

        let price_unit = env::var("PRICE_UNIT")
            .ok()
            .and_then(|v| PriceUnit::from_str(&v).ok())
            .unwrap_or(defaults.price_unit);

        Self {
            lake_root: env::var("OLIVE_LAKE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.lake_root),
            eval_mae_threshold: parse_var("EVAL_METRIC_THRESHOLD", defaults.eval_mae_threshold),
            min_rows_per_model: parse_var("MIN_ROWS_PER_MODEL", defaults.min_rows_per_model),
            freshness_max_age_days: parse_var(
                "FRESHNESS_MAX_AGE_DAYS",
                defaults.freshness_max_age_days,
            ),
            degradation_mape_threshold: parse_var(
                "DEGRADATION_MAPE_THRESHOLD",
                defaults.degradation_mape_threshold,
            ),
            price_unit,
            fred_api_key: non_empty_var("FRED_API_KEY"),
            eia_api_key: non_empty_var("EIA_API_KEY"),
            gemini_api_key: non_empty_var("GEMINI_API_KEY"),
            database_url: non_empty_var("POSTGRES_URL").or_else(|| non_empty_var("DATABASE_URL")),
            api_port: env::var("PORT")
                .or_else(|_| env::var("API_PORT"))
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.api_port),
            monitor_interval_hours: parse_var(
                "MONITOR_INTERVAL_HOURS",
                defaults.monitor_interval_hours,
            ),
            smtp: SmtpSettings {
                host: non_empty_var("SMTP_HOST"),
                port: parse_var("SMTP_PORT", defaults.smtp.port),
                username: non_empty_var("SMTP_USERNAME"),
                password: non_empty_var("SMTP_PASSWORD"),
                from: non_empty_var("SMTP_FROM_ADDRESS"),
                to: smtp_to,
                tls: smtp_tls,
            },
        }
    }

    /// Same settings rooted at a different lake directory.
    pub fn with_lake_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.lake_root = root.into();
        self
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
