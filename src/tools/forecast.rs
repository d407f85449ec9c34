use super::{ensure_object_parameters, param_country, param_grade, param_str, round, Tool};
use crate::error::ForecastError;
use crate::forecasting::{ForecastService, MAX_HORIZON_WEEKS};
use crate::ingest::to_monday;
use crate::models::{country_name, ForecastQuery, ToolInput, ToolOutput};
use crate::Result;
use chrono::{Duration, NaiveDate};
use serde_json::json;

pub const DEFAULT_MONTHS_AHEAD: u32 = 3;
pub const MAX_MONTHS_AHEAD: u32 = 12;

/// Requested forecast points: one per month, or a single week
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Horizon {
    Months(u32),
    Weeks(u32),
}

impl Horizon {
    /// Monday-aligned target weeks counted from the last observed week.
    fn targets(&self, as_of: NaiveDate) -> Vec<NaiveDate> {
        match *self {
            Horizon::Months(months) => (1..=months)
                .map(|i| to_monday(as_of + Duration::days(30 * i as i64)))
                .collect(),
            Horizon::Weeks(weeks) => vec![to_monday(as_of + Duration::weeks(weeks as i64))],
        }
    }

    fn label(&self) -> String {
        match *self {
            Horizon::Months(1) => "1 month".to_string(),
            Horizon::Months(n) => format!("{} months", n),
            Horizon::Weeks(1) => "1 week".to_string(),
            Horizon::Weeks(n) => format!("{} weeks", n),
        }
    }
}

fn whole_number(raw: &str, name: &str) -> Result<u32> {
    raw.parse::<u32>()
        .map_err(|_| ForecastError::InvalidToolInput(format!("{} must be a whole number, got '{}'", name, raw)))
}

/// `weeks_ahead` (1-52) takes precedence over `months_ahead` (1-12, default 3).
fn forecast_horizon(input: &ToolInput) -> Result<Horizon> {
    if let Some(raw) = param_str(input, &["weeks_ahead"]) {
        let weeks = whole_number(&raw, "weeks_ahead")?;
        if !(1..=MAX_HORIZON_WEEKS).contains(&weeks) {
            return Err(ForecastError::InvalidToolInput(format!(
                "weeks_ahead must be between 1 and {}",
                MAX_HORIZON_WEEKS
            )));
        }
        return Ok(Horizon::Weeks(weeks));
    }
    let months = match param_str(input, &["months_ahead", "horizon"]) {
        Some(raw) => whole_number(&raw, "months_ahead")?,
        None => DEFAULT_MONTHS_AHEAD,
    };
    if !(1..=MAX_MONTHS_AHEAD).contains(&months) {
        return Err(ForecastError::InvalidToolInput(format!(
            "months_ahead must be between 1 and {}",
            MAX_MONTHS_AHEAD
        )));
    }
    Ok(Horizon::Months(months))
}

/// Monthly price forecasts with 95% bounds for one market
pub struct ForecastTool {
    forecasts: ForecastService,
}

impl ForecastTool {
    pub fn new(forecasts: ForecastService) -> Self {
        Self { forecasts }
    }
}

#[async_trait::async_trait]
impl Tool for ForecastTool {
    fn name(&self) -> &'static str {
        "get_forecast"
    }

    fn description(&self) -> &'static str {
        "Forecast olive oil prices (USD per liter) for a country and grade over the next 1-12 months"
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        ensure_object_parameters(input)?;
        let country = param_country(input, &["country"])?.unwrap_or_else(|| "IT".to_string());
        let grade = param_grade(input)?;
        let horizon = forecast_horizon(input)?;

        let forecaster = self.forecasts.forecaster().await?;
        let as_of = forecaster.last_observed_week(&country, grade)?;

        let mut points = Vec::new();
        let mut model = String::new();
        for target_week in horizon.targets(as_of) {
            let query = ForecastQuery {
                country: country.clone(),
                grade,
                target_week,
            };
            let forecast = self.forecasts.issue_with(&forecaster, &query).await?;
            model = forecast.segment.clone();
            points.push(json!({
                "date": forecast.target_week.to_string(),
                "predicted_price_usd_per_liter": round(forecast.point, 2),
                "confidence_interval_lower": round(forecast.lower, 2),
                "confidence_interval_upper": round(forecast.upper, 2),
                "confidence_level": "95%",
                "horizon_weeks": forecast.horizon_weeks,
            }));
        }

        Ok(ToolOutput::ok(json!({
            "country": country_name(&country),
            "grade": grade.label(),
            "forecast_horizon": horizon.label(),
            "current_date": as_of.to_string(),
            "forecasts": points,
            "model": model,
            "model_version": forecaster.model_version(),
            "last_updated": as_of.to_string(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::ForecastLedger;
    use crate::lake::{self, DataLake};
    use crate::models::Grade;
    use crate::registry::ModelRegistry;
    use crate::tools::tests::input;
    use crate::training::tests::synthetic_rows;
    use crate::training::Trainer;

    fn service() -> (ForecastService, DataLake) {
        let lake = lake::temp_lake();
        let rows = synthetic_rows(&[("IT", Grade::ExtraVirgin, 3.5), ("ES", Grade::ExtraVirgin, 3.8)], 52);
        let snapshot = NaiveDate::from_ymd_opt(2024, 12, 30).unwrap();
        lake.write_csv(&lake.snapshot_path(lake::FEATURES, snapshot, "features.csv"), &rows)
            .unwrap();
        let registry = ModelRegistry::new(lake.clone());
        registry
            .register(Trainer::new(26).train_bundle(&rows, Some(snapshot)).unwrap())
            .unwrap();
        (ForecastService::new(lake.clone(), registry, ForecastLedger::new()), lake)
    }

    #[tokio::test]
    async fn test_italian_evoo_monthly_forecasts() {
        let (service, _lake) = service();
        let tool = ForecastTool::new(service.clone());
        let out = tool
            .execute(&input("get_forecast", json!({"country": "Italy", "grade": "extra virgin", "months_ahead": "2"})))
            .await
            .unwrap();

        assert!(out.success);
        assert_eq!(out.data["country"], "Italy");
        assert_eq!(out.data["grade"], "Extra Virgin");
        assert_eq!(out.data["forecast_horizon"], "2 months");
        let forecasts = out.data["forecasts"].as_array().unwrap();
        assert_eq!(forecasts.len(), 2);

        let first = &forecasts[0];
        let point = first["predicted_price_usd_per_liter"].as_f64().unwrap();
        assert!((point - 3.5).abs() < 0.2);
        assert!(first["confidence_interval_lower"].as_f64().unwrap() <= point);
        assert!(first["confidence_interval_upper"].as_f64().unwrap() >= point);
        assert_eq!(first["confidence_level"], "95%");
        assert_eq!(service.ledger().len().await, 2);
    }

    #[tokio::test]
    async fn test_repeated_call_reuses_issued_forecasts() {
        let (service, _lake) = service();
        let tool = ForecastTool::new(service.clone());
        let params = json!({"country": "ES"});
        let a = tool.execute(&input("get_forecast", params.clone())).await.unwrap();
        let b = tool.execute(&input("get_forecast", params)).await.unwrap();
        assert_eq!(a.data["forecasts"], b.data["forecasts"]);
        assert_eq!(service.ledger().len().await, 3);
    }

    #[tokio::test]
    async fn test_single_week_ahead() {
        let (service, _lake) = service();
        let tool = ForecastTool::new(service);
        let out = tool
            .execute(&input("get_forecast", json!({"country": "IT", "weeks_ahead": "1"})))
            .await
            .unwrap();
        assert_eq!(out.data["forecast_horizon"], "1 week");
        let forecasts = out.data["forecasts"].as_array().unwrap();
        assert_eq!(forecasts.len(), 1);
        assert_eq!(forecasts[0]["horizon_weeks"], 1);
        assert_eq!(forecasts[0]["date"], "2024-12-30");
    }

    #[tokio::test]
    async fn test_rejects_bad_horizon() {
        let (service, _lake) = service();
        let tool = ForecastTool::new(service);
        for months in ["0", "13", "soon"] {
            let res = tool.execute(&input("get_forecast", json!({"months_ahead": months}))).await;
            assert!(matches!(res, Err(ForecastError::InvalidToolInput(_))));
        }
        let res = tool.execute(&input("get_forecast", json!({"weeks_ahead": 53}))).await;
        assert!(matches!(res, Err(ForecastError::InvalidToolInput(_))));
    }
}
