use super::{
    direction, ensure_object_parameters, param_country, param_grade, param_period, percent_change, period_start,
    round, Tool,
};
use crate::error::ForecastError;
use crate::lake::DataLake;
use crate::models::{country_name, PanelRecord, ToolInput, ToolOutput};
use crate::panel::load_panel;
use crate::Result;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

const DRIVER_BAND_PERCENT: f64 = 2.5;
const PRICE_BAND_PERCENT: f64 = 2.0;

/// Cost factors examined, with the panel field they come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Factor {
    OceanFreight,
    UsdEur,
    Diesel,
    GlassPackaging,
}

impl Factor {
    const ALL: [Factor; 4] = [Factor::OceanFreight, Factor::UsdEur, Factor::Diesel, Factor::GlassPackaging];

    fn label(&self) -> &'static str {
        match self {
            Factor::OceanFreight => "Ocean Freight Costs",
            Factor::UsdEur => "USD/EUR Exchange Rate",
            Factor::Diesel => "Diesel Prices",
            Factor::GlassPackaging => "Packaging Costs (Glass)",
        }
    }

    fn feature(&self) -> &'static str {
        match self {
            Factor::OceanFreight => "freight_index",
            Factor::UsdEur => "usd_eur_rate",
            Factor::Diesel => "diesel_price",
            Factor::GlassPackaging => "packaging_costs",
        }
    }

    fn value(&self, record: &PanelRecord) -> Option<f64> {
        match self {
            Factor::OceanFreight => record.ocean_proxy,
            Factor::UsdEur => record.usd_per_eur,
            Factor::Diesel => record.diesel_usd_per_gal,
            Factor::GlassPackaging => record.ppi_glass,
        }
    }

    fn explanation(&self, direction: &str) -> &'static str {
        match (self, direction) {
            (Factor::OceanFreight, "increasing") => "Shipping costs have risen, raising landed cost per liter",
            (Factor::OceanFreight, "decreasing") => "Cheaper shipping lowers landed cost per liter",
            (Factor::OceanFreight, _) => "Shipping costs are broadly unchanged",
            (Factor::UsdEur, "increasing") => "A weaker dollar makes European olive oil more expensive for US buyers",
            (Factor::UsdEur, "decreasing") => "A stronger dollar makes European olive oil relatively cheaper for US buyers",
            (Factor::UsdEur, _) => "The exchange rate has held steady",
            (Factor::Diesel, "increasing") => "Higher diesel costs affect production and transportation",
            (Factor::Diesel, "decreasing") => "Lower diesel costs ease production and transportation",
            (Factor::Diesel, _) => "Diesel costs are broadly unchanged",
            (Factor::GlassPackaging, "increasing") => "Glass bottle costs are rising",
            (Factor::GlassPackaging, "decreasing") => "Glass bottle costs are easing",
            (Factor::GlassPackaging, _) => "Glass bottle costs remain relatively stable",
        }
    }
}

pub fn impact(change_percent: f64) -> &'static str {
    let magnitude = change_percent.abs();
    if magnitude >= 10.0 {
        "High"
    } else if magnitude >= 3.0 {
        "Medium"
    } else {
        "Low"
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DriverChange {
    pub factor: &'static str,
    pub impact: &'static str,
    pub change_percent: f64,
    pub direction: &'static str,
    pub explanation: &'static str,
}

/// Mean per week of an optional panel value.
fn weekly(records: &[&PanelRecord], value: impl Fn(&PanelRecord) -> Option<f64>) -> BTreeMap<NaiveDate, f64> {
    let mut acc: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for record in records {
        if let Some(v) = value(record) {
            let entry = acc.entry(record.week_start).or_insert((0.0, 0));
            entry.0 += v;
            entry.1 += 1;
        }
    }
    acc.into_iter().map(|(w, (sum, n))| (w, sum / n as f64)).collect()
}

/// Change from the first to the last available week.
fn endpoints(series: &BTreeMap<NaiveDate, f64>) -> Option<(f64, f64)> {
    let first = *series.values().next()?;
    let last = *series.values().next_back()?;
    Some((first, last))
}

/// Driver changes over the records of a window, largest move first.
pub fn driver_changes(records: &[&PanelRecord]) -> Vec<DriverChange> {
    let mut drivers: Vec<DriverChange> = Factor::ALL
        .iter()
        .filter_map(|factor| {
            let (first, last) = endpoints(&weekly(records, |r| factor.value(r)))?;
            let change = round(percent_change(first, last)?, 1);
            let dir = direction(change, DRIVER_BAND_PERCENT);
            Some(DriverChange {
                factor: factor.label(),
                impact: impact(change),
                change_percent: change,
                direction: dir,
                explanation: factor.explanation(dir),
            })
        })
        .collect();
    drivers.sort_by(|a, b| b.change_percent.abs().total_cmp(&a.change_percent.abs()));
    drivers
}

fn summary_sentence(price_direction: &str, price_change: f64, drivers: &[DriverChange]) -> String {
    let movers: Vec<String> = drivers
        .iter()
        .filter(|d| d.impact != "Low")
        .map(|d| format!("{} ({:+.1}%)", d.factor.to_lowercase(), d.change_percent))
        .collect();
    let price = match price_direction {
        "stable" => format!("Prices are broadly stable ({:+.1}%)", price_change),
        dir => format!("Prices are {} ({:+.1}%)", dir, price_change),
    };
    if movers.is_empty() {
        format!("{}; no cost driver moved materially over the period.", price)
    } else {
        format!("{}, with the largest cost movements in {}.", price, movers.join(", "))
    }
}

/// Explains recent price movement through freight, FX, diesel and packaging
pub struct PriceDriversTool {
    lake: DataLake,
}

impl PriceDriversTool {
    pub fn new(lake: DataLake) -> Self {
        Self { lake }
    }
}

#[async_trait::async_trait]
impl Tool for PriceDriversTool {
    fn name(&self) -> &'static str {
        "analyze_price_drivers"
    }

    fn description(&self) -> &'static str {
        "Analyze which cost factors (freight, exchange rate, diesel, packaging) drive recent price changes"
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        ensure_object_parameters(input)?;
        let country = param_country(input, &["country"])?;
        let grade = param_grade(input)?;
        let (period_label, period) = param_period(input, "3 months")?;

        let (_, records) = load_panel(&self.lake, None)?;
        let as_of = records
            .iter()
            .map(|r| r.week_start)
            .max()
            .ok_or_else(|| ForecastError::ToolError("weekly panel is empty".to_string()))?;
        let from = period_start(as_of, period, &period_label)?;

        let window: Vec<&PanelRecord> = records
            .iter()
            .filter(|r| r.week_start >= from && r.grade == grade)
            .filter(|r| country.as_deref().map_or(true, |c| r.country == c))
            .collect();

        let prices = weekly(&window, |r| r.price_usd_per_l);
        let (previous, current) = endpoints(&prices).ok_or_else(|| {
            ForecastError::ToolError(format!(
                "no {} prices for {} in the last {}",
                grade.label(),
                country.as_deref().map(country_name).unwrap_or_else(|| "any market".to_string()),
                period_label
            ))
        })?;
        let price_change = round(percent_change(previous, current).unwrap_or(0.0), 1);
        let price_direction = direction(price_change, PRICE_BAND_PERCENT);

        let drivers = driver_changes(&window);
        let summary = summary_sentence(price_direction, price_change, &drivers);

        Ok(ToolOutput::ok(json!({
            "analysis_date": as_of.to_string(),
            "country": country.as_deref().map(country_name).unwrap_or_else(|| "All Markets".to_string()),
            "grade": grade.label(),
            "time_period": period_label,
            "price_change": {
                "current_price_usd_per_liter": round(current, 2),
                "previous_price_usd_per_liter": round(previous, 2),
                "change_percent": price_change,
                "direction": price_direction,
            },
            "key_drivers": drivers,
            "summary": summary,
            "features_analyzed": Factor::ALL.iter().map(Factor::feature).collect::<Vec<_>>(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lake;
    use crate::tools::tests::{input, panel_record, write_panel};
    use chrono::Duration;

    fn panel() -> Vec<PanelRecord> {
        let start = NaiveDate::from_ymd_opt(2025, 8, 4).unwrap();
        (0..13)
            .map(|i| {
                let t = i as f64 / 12.0;
                let mut r = panel_record(start + Duration::weeks(i), "IT", 3.85 + 0.25 * t);
                r.ocean_proxy = Some(1000.0 + 152.0 * t);
                r.diesel_usd_per_gal = Some(3.0 + 0.261 * t);
                r.usd_per_eur = Some(1.10 - 0.0341 * t);
                r.ppi_glass = Some(100.0 + 2.3 * t);
                r
            })
            .collect()
    }

    #[test]
    fn test_impact_bands() {
        assert_eq!(impact(15.2), "High");
        assert_eq!(impact(-10.0), "High");
        assert_eq!(impact(8.7), "Medium");
        assert_eq!(impact(-3.1), "Medium");
        assert_eq!(impact(2.3), "Low");
    }

    #[tokio::test]
    async fn test_freight_and_diesel_surface_as_drivers() {
        let lake = lake::temp_lake();
        write_panel(&lake, &panel());
        let tool = PriceDriversTool::new(lake);

        let out = tool
            .execute(&input("analyze_price_drivers", json!({"country": "Italy"})))
            .await
            .unwrap();
        let data = &out.data;
        assert_eq!(data["country"], "Italy");
        assert_eq!(data["price_change"]["direction"], "increasing");
        assert_eq!(data["price_change"]["change_percent"], 6.5);

        let drivers = data["key_drivers"].as_array().unwrap();
        assert_eq!(drivers.len(), 4);
        assert_eq!(drivers[0]["factor"], "Ocean Freight Costs");
        assert_eq!(drivers[0]["change_percent"], 15.2);
        assert_eq!(drivers[0]["impact"], "High");
        assert_eq!(drivers[1]["factor"], "Diesel Prices");
        assert_eq!(drivers[1]["change_percent"], 8.7);
        assert_eq!(drivers[1]["impact"], "Medium");
        assert_eq!(drivers[2]["factor"], "USD/EUR Exchange Rate");
        assert_eq!(drivers[2]["direction"], "decreasing");
        assert_eq!(drivers[3]["direction"], "stable");

        let summary = data["summary"].as_str().unwrap();
        assert!(summary.contains("ocean freight costs (+15.2%)"));
        assert!(summary.contains("diesel prices (+8.7%)"));
    }

    #[tokio::test]
    async fn test_missing_market() {
        let lake = lake::temp_lake();
        write_panel(&lake, &panel());
        let tool = PriceDriversTool::new(lake);
        let res = tool.execute(&input("analyze_price_drivers", json!({"country": "Spain"}))).await;
        assert!(matches!(res, Err(ForecastError::ToolError(_))));
    }

    #[tokio::test]
    async fn test_oversized_period_rejected() {
        let lake = lake::temp_lake();
        write_panel(&lake, &panel());
        let tool = PriceDriversTool::new(lake);
        for period in ["1000000 years", "9223372036854775807 weeks"] {
            let res = tool
                .execute(&input("analyze_price_drivers", json!({"time_period": period})))
                .await;
            assert!(matches!(res, Err(ForecastError::InvalidToolInput(_))), "{}", period);
        }
    }
}
