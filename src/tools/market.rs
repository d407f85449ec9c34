use super::{
    direction, ensure_object_parameters, param_countries, param_grade, param_period, percent_change, period_start,
    round, Tool,
};
use crate::error::ForecastError;
use crate::lake::DataLake;
use crate::models::{country_name, Grade, PanelRecord, ToolInput, ToolOutput};
use crate::panel::load_panel;
use crate::Result;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::json;

const DEFAULT_COUNTRIES: [&str; 3] = ["IT", "ES", "EL"];
const TREND_BAND_PERCENT: f64 = 2.0;

/// Weekly USD prices of one market, sorted by week.
pub(crate) fn price_series(records: &[PanelRecord], country: &str, grade: Grade) -> Vec<(NaiveDate, f64)> {
    let mut series: Vec<(NaiveDate, f64)> = records
        .iter()
        .filter(|r| r.country == country && r.grade == grade)
        .filter_map(|r| r.price_usd_per_l.map(|p| (r.week_start, p)))
        .collect();
    series.sort_by_key(|(week, _)| *week);
    series
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketSummary {
    pub country: String,
    pub current_price_usd_per_liter: f64,
    pub average_price_period: f64,
    pub price_change_percent: f64,
    pub trend: &'static str,
    pub grade: &'static str,
    #[serde(skip)]
    pub variation: f64,
}

/// Summarise a market over the weeks in `[from, to]`.
pub fn summarize_market(
    series: &[(NaiveDate, f64)],
    country: &str,
    grade: Grade,
    from: NaiveDate,
    to: NaiveDate,
) -> Option<MarketSummary> {
    let window: Vec<f64> = series
        .iter()
        .filter(|(week, _)| *week >= from && *week <= to)
        .map(|(_, p)| *p)
        .collect();
    let (first, current) = (*window.first()?, *window.last()?);

    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let std = (window.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n).sqrt();
    let change = percent_change(first, current).unwrap_or(0.0);

    Some(MarketSummary {
        country: country_name(country),
        current_price_usd_per_liter: round(current, 2),
        average_price_period: round(mean, 2),
        price_change_percent: round(change, 1),
        trend: direction(change, TREND_BAND_PERCENT),
        grade: grade.label(),
        variation: if mean != 0.0 { std / mean } else { 0.0 },
    })
}

/// Current prices, period averages and trends across markets
pub struct MarketComparisonTool {
    lake: DataLake,
}

impl MarketComparisonTool {
    pub fn new(lake: DataLake) -> Self {
        Self { lake }
    }
}

#[async_trait::async_trait]
impl Tool for MarketComparisonTool {
    fn name(&self) -> &'static str {
        "compare_markets"
    }

    fn description(&self) -> &'static str {
        "Compare current olive oil prices, averages and trends across producing countries"
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        ensure_object_parameters(input)?;
        let countries = param_countries(input)?
            .unwrap_or_else(|| DEFAULT_COUNTRIES.iter().map(|c| c.to_string()).collect());
        let grade = param_grade(input)?;
        let (period_label, period) = param_period(input, "6 months")?;

        let (_, records) = load_panel(&self.lake, None)?;
        let as_of = records
            .iter()
            .map(|r| r.week_start)
            .max()
            .ok_or_else(|| ForecastError::ToolError("weekly panel is empty".to_string()))?;
        let from = period_start(as_of, period, &period_label)?;

        let mut markets = Vec::new();
        let mut unavailable = Vec::new();
        for country in &countries {
            let series = price_series(&records, country, grade);
            match summarize_market(&series, country, grade, from, as_of) {
                Some(summary) => markets.push(summary),
                None => unavailable.push(country_name(country)),
            }
        }
        if markets.is_empty() {
            return Err(ForecastError::ToolError(format!(
                "no {} prices for {} in the last {}",
                grade.label(),
                unavailable.join(", "),
                period_label
            )));
        }

        let by_price = |a: &&MarketSummary, b: &&MarketSummary| {
            a.current_price_usd_per_liter.total_cmp(&b.current_price_usd_per_liter)
        };
        let lowest = markets.iter().min_by(by_price);
        let highest = markets.iter().max_by(by_price);
        let most_volatile = markets.iter().max_by(|a, b| a.variation.total_cmp(&b.variation));
        let spread = match (lowest, highest) {
            (Some(lo), Some(hi)) => {
                percent_change(lo.current_price_usd_per_liter, hi.current_price_usd_per_liter).unwrap_or(0.0)
            }
            _ => 0.0,
        };

        Ok(ToolOutput::ok(json!({
            "comparison_date": as_of.to_string(),
            "time_period": period_label,
            "markets": markets,
            "insights": {
                "lowest_price": lowest.map(|m| m.country.clone()),
                "highest_price": highest.map(|m| m.country.clone()),
                "most_volatile": most_volatile.map(|m| m.country.clone()),
                "price_spread_percent": round(spread, 1),
            },
            "unavailable": unavailable,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lake;
    use crate::tools::tests::{input, panel_record, write_panel};
    use chrono::Duration;

    fn weeks(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2025, 5, 5).unwrap();
        (0..n).map(|i| start + Duration::weeks(i as i64)).collect()
    }

    #[tokio::test]
    async fn test_spain_below_italy() {
        let lake = lake::temp_lake();
        let mut records = Vec::new();
        for (i, week) in weeks(26).into_iter().enumerate() {
            let t = i as f64 / 25.0;
            records.push(panel_record(week, "IT", 4.0 + 0.2 * t));
            records.push(panel_record(week, "ES", 3.8 + 0.02 * ((i % 2) as f64)));
        }
        // last Spanish week back at 3.80
        records.push(panel_record(weeks(27)[26], "ES", 3.8));
        records.push(panel_record(weeks(27)[26], "IT", 4.2));
        write_panel(&lake, &records);

        let tool = MarketComparisonTool::new(lake);
        let out = tool
            .execute(&input("compare_markets", json!({"countries": "Italy,Spain"})))
            .await
            .unwrap();

        let markets = out.data["markets"].as_array().unwrap();
        assert_eq!(markets.len(), 2);
        assert_eq!(markets[0]["country"], "Italy");
        assert_eq!(markets[0]["current_price_usd_per_liter"], 4.2);
        assert_eq!(markets[1]["current_price_usd_per_liter"], 3.8);
        assert_eq!(markets[0]["trend"], "increasing");
        assert_eq!(markets[1]["trend"], "stable");
        assert_eq!(out.data["insights"]["lowest_price"], "Spain");
        assert_eq!(out.data["insights"]["highest_price"], "Italy");
        assert_eq!(out.data["insights"]["price_spread_percent"], 10.5);
        assert_eq!(out.data["time_period"], "6 months");
    }

    #[tokio::test]
    async fn test_unknown_markets_reported() {
        let lake = lake::temp_lake();
        let records: Vec<PanelRecord> = weeks(4).into_iter().map(|w| panel_record(w, "IT", 4.0)).collect();
        write_panel(&lake, &records);
        let tool = MarketComparisonTool::new(lake);

        let out = tool.execute(&input("compare_markets", json!({}))).await.unwrap();
        assert_eq!(out.data["markets"].as_array().unwrap().len(), 1);
        assert_eq!(out.data["unavailable"], json!(["Spain", "Greece"]));

        let err = tool
            .execute(&input("compare_markets", json!({"countries": ["Portugal"]})))
            .await;
        assert!(matches!(err, Err(ForecastError::ToolError(_))));
    }

    #[tokio::test]
    async fn test_oversized_period_rejected() {
        let lake = lake::temp_lake();
        let records: Vec<PanelRecord> = weeks(4).into_iter().map(|w| panel_record(w, "IT", 4.0)).collect();
        write_panel(&lake, &records);
        let tool = MarketComparisonTool::new(lake);

        let err = tool
            .execute(&input("compare_markets", json!({"time_period": "1000000 years"})))
            .await;
        assert!(matches!(err, Err(ForecastError::InvalidToolInput(_))));

        let out = tool
            .execute(&input("compare_markets", json!({"time_period": "100 years"})))
            .await
            .unwrap();
        assert_eq!(out.data["markets"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_volatility_measure() {
        let w = weeks(4);
        let steady: Vec<_> = w.iter().map(|d| (*d, 3.0)).collect();
        let jumpy: Vec<_> = w.iter().zip([3.0, 4.0, 3.0, 4.0]).map(|(d, p)| (*d, p)).collect();
        let a = summarize_market(&steady, "ES", Grade::ExtraVirgin, w[0], w[3]).unwrap();
        let b = summarize_market(&jumpy, "EL", Grade::ExtraVirgin, w[0], w[3]).unwrap();
        assert_eq!(a.variation, 0.0);
        assert!(b.variation > 0.1);
        assert!(summarize_market(&steady, "ES", Grade::ExtraVirgin, w[3] + Duration::weeks(1), w[3] + Duration::weeks(2)).is_none());
    }
}
