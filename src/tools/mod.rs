//! Tool trait and registry
//!
//! Tools are the deterministic operations the conversational layer and the
//! agent action groups call: forecasts, market comparison and price driver
//! analysis. All of them answer from the lake and the active model.

mod action_group;
mod drivers;
mod forecast;
mod market;

pub use action_group::{handle_action_group, ActionGroupRequest, ActionGroupResponse, ActionParameter};
pub use drivers::PriceDriversTool;
pub use forecast::ForecastTool;
pub use market::MarketComparisonTool;

use crate::error::ForecastError;
use crate::forecasting::ForecastService;
use crate::lake::DataLake;
use crate::models::{country_code, Grade, ToolInput, ToolOutput};
use crate::Result;
use chrono::{Duration, NaiveDate};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Trait for a single tool (deterministic execution)
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput>;
}

/// Tool registry for looking up and executing tools
#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub async fn execute(&self, name: &str, parameters: Value) -> Result<ToolOutput> {
        let tool = self
            .get(name)
            .ok_or_else(|| ForecastError::ToolNotFound(name.to_string()))?;
        tool.execute(&ToolInput {
            tool_name: name.to_string(),
            parameters,
        })
        .await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry with the forecasting, comparison and driver tools.
pub fn create_registry(lake: DataLake, forecasts: ForecastService) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ForecastTool::new(forecasts)));
    registry.register(Arc::new(MarketComparisonTool::new(lake.clone())));
    registry.register(Arc::new(PriceDriversTool::new(lake)));
    registry
}

//
// ================= Parameter helpers =================
//

fn ensure_object_parameters(input: &ToolInput) -> Result<()> {
    if input.parameters.is_object() || input.parameters.is_null() {
        Ok(())
    } else {
        Err(ForecastError::InvalidToolInput(format!(
            "{} expects an object of parameters",
            input.tool_name
        )))
    }
}

/// First non-empty string parameter among `names`. Numbers are accepted
/// and rendered as text.
fn param_str(input: &ToolInput, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match input.parameters.get(*name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn param_country(input: &ToolInput, names: &[&str]) -> Result<Option<String>> {
    match param_str(input, names) {
        Some(raw) => country_code(&raw)
            .map(Some)
            .ok_or_else(|| ForecastError::InvalidToolInput(format!("unknown country '{}'", raw))),
        None => Ok(None),
    }
}

fn param_grade(input: &ToolInput) -> Result<Grade> {
    match param_str(input, &["grade", "oil_grade"]) {
        Some(raw) => Grade::canonical(&raw)
            .ok_or_else(|| ForecastError::InvalidToolInput(format!("unknown grade '{}'", raw))),
        None => Ok(Grade::ExtraVirgin),
    }
}

/// Country list from a JSON array or a comma-separated string.
fn param_countries(input: &ToolInput) -> Result<Option<Vec<String>>> {
    let raw: Vec<String> = match input.parameters.get("countries") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => s.split(',').map(|c| c.trim().to_string()).collect(),
        _ => return Ok(None),
    };
    let codes = raw
        .iter()
        .filter(|c| !c.is_empty())
        .map(|c| {
            country_code(c)
                .ok_or_else(|| ForecastError::InvalidToolInput(format!("unknown country '{}'", c)))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((!codes.is_empty()).then_some(codes))
}

/// Longest look-back window a tool accepts (100 years)
pub const MAX_PERIOD_DAYS: i64 = 100 * 365;

/// Parse "6 months", "1 year", "12 weeks" or "90 days" into a duration.
/// Periods longer than [`MAX_PERIOD_DAYS`] are rejected.
pub fn parse_period(raw: &str) -> Option<Duration> {
    let text = raw.trim().to_lowercase();
    let mut parts = text.split_whitespace();
    let first = parts.next()?;
    let (n, unit) = match first.parse::<i64>() {
        Ok(n) => (n, parts.next().unwrap_or("months")),
        Err(_) => (1, first),
    };
    if n <= 0 {
        return None;
    }
    let per_unit = match unit.trim_end_matches('s') {
        "day" => 1,
        "week" => 7,
        "month" => 30,
        "quarter" => 91,
        "year" => 365,
        _ => return None,
    };
    let days = n.checked_mul(per_unit).filter(|d| *d <= MAX_PERIOD_DAYS)?;
    Some(Duration::days(days))
}

fn param_period(input: &ToolInput, default: &str) -> Result<(String, Duration)> {
    let label = param_str(input, &["time_period", "period"]).unwrap_or_else(|| default.to_string());
    let period = parse_period(&label)
        .ok_or_else(|| ForecastError::InvalidToolInput(format!("unrecognised time period '{}'", label)))?;
    Ok((label, period))
}

/// First day of a window of length `period` ending at `as_of`.
fn period_start(as_of: NaiveDate, period: Duration, label: &str) -> Result<NaiveDate> {
    as_of
        .checked_sub_signed(period)
        .ok_or_else(|| ForecastError::InvalidToolInput(format!("time period '{}' is out of range", label)))
}

fn round(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn percent_change(from: f64, to: f64) -> Option<f64> {
    (from != 0.0).then(|| (to - from) / from * 100.0)
}

/// "increasing" / "decreasing" outside a ±`band` percent band.
fn direction(change_percent: f64, band: f64) -> &'static str {
    if change_percent > band {
        "increasing"
    } else if change_percent < -band {
        "decreasing"
    } else {
        "stable"
    }
}
