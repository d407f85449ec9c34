//! Weekly economic panel
//!
//! Joins standardised EU prices with FX, energy, packaging, freight and
//! tariff data into one record per (week, country, grade) and derives the
//! delivered-cost estimate.

use crate::error::ForecastError;
use crate::ingest::tariffs::{duty_usd_per_l, tariff_for_grade};
use crate::ingest::{to_monday, EuPriceRow, FbxWeek, MacroWeek, TariffRow};
use crate::lake::{self, DataLake};
use crate::models::{Grade, PanelRecord};
use crate::Result;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use tracing::{info, warn};

pub const DEFAULT_PACK: &str = "glass";
const OCEAN_UPLIFT_PER_POINT: f64 = 0.003;
const DIESEL_UPLIFT_FACTOR: f64 = 0.15;

/// Packaging cost in USD per litre.
pub fn pack_cost(pack: &str) -> f64 {
    match pack {
        "plastic" => 0.12,
        "steel" => 0.30,
        _ => 0.22,
    }
}

/// Panel fields whose non-null coverage is reported by QA and monitoring.
pub const QA_FIELDS: [&str; 7] = [
    "price_usd_per_l",
    "usd_per_eur",
    "brent_usd_bbl",
    "diesel_usd_per_gal",
    "ppi_glass",
    "ocean_proxy",
    "duty_usd_per_l",
];

fn qa_value(record: &PanelRecord, field: &str) -> Option<f64> {
    match field {
        "price_usd_per_l" => record.price_usd_per_l,
        "usd_per_eur" => record.usd_per_eur,
        "brent_usd_bbl" => record.brent_usd_bbl,
        "diesel_usd_per_gal" => record.diesel_usd_per_gal,
        "ppi_glass" => record.ppi_glass,
        "ocean_proxy" => record.ocean_proxy,
        "duty_usd_per_l" => record.duty_usd_per_l,
        _ => None,
    }
}

/// Percentage of records with a value for each QA field.
pub fn coverage(records: &[PanelRecord]) -> BTreeMap<String, f64> {
    QA_FIELDS
        .iter()
        .map(|field| {
            let present = records.iter().filter(|r| qa_value(r, field).is_some()).count();
            let pct = if records.is_empty() {
                0.0
            } else {
                present as f64 / records.len() as f64 * 100.0
            };
            (field.to_string(), pct)
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct PanelSummary {
    pub path: PathBuf,
    pub records: usize,
    pub first_week: Option<NaiveDate>,
    pub last_week: Option<NaiveDate>,
    pub countries: Vec<String>,
    pub grades: Vec<Grade>,
    pub coverage: BTreeMap<String, f64>,
}

/// Freight proxy per week: the FBX index where present, otherwise Brent
/// scaled by the mean FBX/Brent ratio over weeks where both exist.
pub fn ocean_proxy_by_week(
    fbx: &BTreeMap<NaiveDate, f64>,
    brent: &BTreeMap<NaiveDate, f64>,
) -> BTreeMap<NaiveDate, f64> {
    let ratios: Vec<f64> = fbx
        .iter()
        .filter_map(|(week, f)| {
            let b = *brent.get(week)?;
            (b > 0.0).then(|| f / b)
        })
        .collect();
    let ratio = (!ratios.is_empty()).then(|| ratios.iter().sum::<f64>() / ratios.len() as f64);

    let weeks: BTreeSet<NaiveDate> = fbx.keys().chain(brent.keys()).copied().collect();
    weeks
        .into_iter()
        .filter_map(|week| {
            let proxy = fbx
                .get(&week)
                .copied()
                .or_else(|| Some(brent.get(&week)? * ratio?))?;
            Some((week, proxy))
        })
        .collect()
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Build panel records from already-loaded inputs.
pub fn assemble_panel(
    prices: &[EuPriceRow],
    macros: &[MacroWeek],
    fbx: &[FbxWeek],
    tariffs: &[TariffRow],
) -> Vec<PanelRecord> {
    // (week, country, grade) -> (sum, count, markets)
    let mut groups: BTreeMap<(NaiveDate, String, Grade), (f64, usize, HashSet<String>)> =
        BTreeMap::new();
    let mut unusable = 0usize;
    for row in prices {
        let (Some(country), Some(grade)) = (row.country.clone(), row.grade) else {
            unusable += 1;
            continue;
        };
        let entry = groups
            .entry((to_monday(row.date), country, grade))
            .or_insert_with(|| (0.0, 0, HashSet::new()));
        entry.0 += row.price_eur_per_l;
        entry.1 += 1;
        entry.2.insert(row.market.clone().unwrap_or_default());
    }
    if unusable > 0 {
        warn!(rows = unusable, "price rows without country or grade dropped");
    }

    let macro_by_week: HashMap<NaiveDate, &MacroWeek> =
        macros.iter().map(|m| (to_monday(m.week_start), m)).collect();
    let fbx_by_week: BTreeMap<NaiveDate, f64> =
        fbx.iter().map(|f| (to_monday(f.week_start), f.fbx)).collect();
    let brent_by_week: BTreeMap<NaiveDate, f64> = macros
        .iter()
        .filter_map(|m| Some((to_monday(m.week_start), m.brent_usd_bbl?)))
        .collect();
    let proxy_by_week = ocean_proxy_by_week(&fbx_by_week, &brent_by_week);

    let mut records: Vec<PanelRecord> = groups
        .into_iter()
        .map(|((week_start, country, grade), (sum, count, markets))| {
            let m = macro_by_week.get(&week_start);
            let usd_per_eur = m.and_then(|m| m.usd_per_eur);
            let price_eur_per_l = sum / count as f64;
            PanelRecord {
                week_start,
                country,
                grade,
                markets: markets.len(),
                price_eur_per_l,
                usd_per_eur,
                price_usd_per_l: usd_per_eur.map(|fx| price_eur_per_l * fx),
                brent_usd_bbl: m.and_then(|m| m.brent_usd_bbl),
                diesel_usd_per_gal: m.and_then(|m| m.diesel_usd_per_gal),
                ppi_glass: m.and_then(|m| m.ppi_glass),
                ppi_plastic_bottles: m.and_then(|m| m.ppi_plastic_bottles),
                ppi_steel: m.and_then(|m| m.ppi_steel),
                fbx_index: fbx_by_week.get(&week_start).copied(),
                ocean_proxy: proxy_by_week.get(&week_start).copied(),
                pack: DEFAULT_PACK.to_string(),
                pack_cost: pack_cost(DEFAULT_PACK),
                ocean_uplift: None,
                diesel_uplift: None,
                duty_usd_per_l: None,
                deliv_hat_usd_per_l: None,
                z_base: 0.0,
            }
        })
        .collect();

    let diesel_mean = mean(records.iter().filter_map(|r| r.diesel_usd_per_gal));
    let base_values: Vec<f64> = records.iter().filter_map(|r| r.price_usd_per_l).collect();
    let base_mean = mean(base_values.iter().copied()).unwrap_or(0.0);
    let base_std = if base_values.len() > 1 {
        (base_values.iter().map(|v| (v - base_mean).powi(2)).sum::<f64>()
            / (base_values.len() - 1) as f64)
            .sqrt()
    } else {
        0.0
    };

    for record in &mut records {
        record.ocean_uplift = record.ocean_proxy.map(|p| OCEAN_UPLIFT_PER_POINT * p);
        record.diesel_uplift = record
            .diesel_usd_per_gal
            .zip(diesel_mean)
            .map(|(d, mean)| DIESEL_UPLIFT_FACTOR * (d - mean));

        let tariff = tariff_for_grade(tariffs, record.grade);
        record.duty_usd_per_l = record
            .price_usd_per_l
            .map(|p| tariff.map_or(0.0, |t| duty_usd_per_l(t, p)));

        record.deliv_hat_usd_per_l = record.price_usd_per_l.map(|base| {
            base + record.pack_cost
                + record.ocean_uplift.unwrap_or(0.0)
                + record.diesel_uplift.unwrap_or(0.0)
                + record.duty_usd_per_l.unwrap_or(0.0)
        });

        record.z_base = match record.price_usd_per_l {
            Some(p) if base_std > 0.0 => (p - base_mean) / base_std,
            _ => 0.0,
        };
    }

    records
}

/// Build and persist the weekly panel for a snapshot.
pub fn build_weekly_panel(lake: &DataLake, snapshot: NaiveDate) -> Result<PanelSummary> {
    let eu_path = lake.snapshot_path(lake::EU_PRICES, snapshot, "eu_prices.csv");
    if !eu_path.exists() {
        return Err(ForecastError::Panel(format!(
            "EU prices missing for snapshot {}",
            snapshot
        )));
    }
    let prices: Vec<EuPriceRow> = lake.read_csv(&eu_path)?;

    let macros: Vec<MacroWeek> = lake
        .load_or_fallback(lake::MACROS, snapshot, "macros.csv")?
        .map(|(_, rows)| rows)
        .unwrap_or_default();
    let fbx: Vec<FbxWeek> = lake
        .load_or_fallback(lake::FBX, snapshot, "fbx.csv")?
        .map(|(_, rows)| rows)
        .unwrap_or_default();
    let tariffs_path = lake.path(lake::TARIFFS_LATEST).join("tariffs.csv");
    let tariffs: Vec<TariffRow> = if tariffs_path.exists() {
        lake.read_csv(&tariffs_path)?
    } else {
        warn!("no tariff reference, duties default to 0");
        Vec::new()
    };

    info!(
        snapshot = %snapshot,
        prices = prices.len(),
        macro_weeks = macros.len(),
        fbx_weeks = fbx.len(),
        tariffs = tariffs.len(),
        "building weekly panel"
    );

    let records = assemble_panel(&prices, &macros, &fbx, &tariffs);
    if records.is_empty() {
        return Err(ForecastError::Panel(
            "no panel records after aggregation".to_string(),
        ));
    }

    let path = lake.snapshot_path(lake::WEEKLY_PANEL, snapshot, "weekly_panel.csv");
    lake.write_csv(&path, &records)?;

    let coverage = coverage(&records);
    for (field, pct) in &coverage {
        info!(field = %field, coverage_pct = format!("{:.1}", pct), "panel QA");
    }

    let countries: BTreeSet<String> = records.iter().map(|r| r.country.clone()).collect();
    let grades: BTreeSet<Grade> = records.iter().map(|r| r.grade).collect();
    let summary = PanelSummary {
        path,
        records: records.len(),
        first_week: records.first().map(|r| r.week_start),
        last_week: records.last().map(|r| r.week_start),
        countries: countries.into_iter().collect(),
        grades: grades.into_iter().collect(),
        coverage,
    };
    info!(
        records = summary.records,
        first_week = ?summary.first_week,
        last_week = ?summary.last_week,
        countries = ?summary.countries,
        "weekly panel written"
    );
    Ok(summary)
}

/// Load the panel of a snapshot, or of the latest snapshot when none is given.
pub fn load_panel(lake: &DataLake, snapshot: Option<NaiveDate>) -> Result<(NaiveDate, Vec<PanelRecord>)> {
    let snapshot = match snapshot {
        Some(s) => s,
        None => lake.require_latest_snapshot(lake::WEEKLY_PANEL)?,
    };
    let path = lake.snapshot_path(lake::WEEKLY_PANEL, snapshot, "weekly_panel.csv");
    Ok((snapshot, lake.read_csv(&path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn price(date: &str, country: &str, market: &str, grade: Grade, eur: f64) -> EuPriceRow {
        EuPriceRow {
            date: d(date),
            country: Some(country.to_string()),
            market: Some(market.to_string()),
            grade: Some(grade),
            price_eur_per_l: eur,
        }
    }

    fn macro_week(week: &str, fx: f64, brent: Option<f64>, diesel: f64) -> MacroWeek {
        MacroWeek {
            week_start: d(week),
            usd_per_eur: Some(fx),
            brent_usd_bbl: brent,
            diesel_usd_per_gal: Some(diesel),
            ..Default::default()
        }
    }

    #[test]
    fn test_ocean_proxy_scales_brent_when_fbx_missing() {
        let fbx: BTreeMap<_, _> = [(d("2025-01-06"), 2000.0)].into_iter().collect();
        let brent: BTreeMap<_, _> = [(d("2025-01-06"), 80.0), (d("2025-01-13"), 84.0)]
            .into_iter()
            .collect();
        let proxy = ocean_proxy_by_week(&fbx, &brent);
        assert_eq!(proxy[&d("2025-01-06")], 2000.0);
        assert!((proxy[&d("2025-01-13")] - 2100.0).abs() < 1e-9);

        let none = ocean_proxy_by_week(&BTreeMap::new(), &BTreeMap::new());
        assert!(none.is_empty());
    }

    #[test]
    fn test_panel_aggregates_markets_and_derives_costs() {
        let prices = vec![
            price("2025-01-06", "IT", "Bari", Grade::ExtraVirgin, 3.0),
            price("2025-01-08", "IT", "Florence", Grade::ExtraVirgin, 4.0),
            price("2025-01-13", "IT", "Bari", Grade::ExtraVirgin, 4.0),
            price("2025-01-13", "ES", "Jaen", Grade::Pomace, 2.0),
        ];
        let macros = vec![
            macro_week("2025-01-06", 1.0, Some(80.0), 3.0),
            macro_week("2025-01-13", 1.0, Some(84.0), 4.0),
        ];
        let fbx = vec![FbxWeek { week_start: d("2025-01-06"), fbx: 2000.0 }];
        let tariffs = vec![TariffRow {
            grade: None,
            hs_prefix: "1510".into(),
            adval_pct: 10.0,
            specific_usd_per_kg: 0.0,
        }];

        let records = assemble_panel(&prices, &macros, &fbx, &tariffs);
        assert_eq!(records.len(), 3);

        let first = &records[0];
        assert_eq!(first.week_start, d("2025-01-06"));
        assert_eq!(first.markets, 2);
        assert_eq!(first.price_usd_per_l, Some(3.5));
        assert_eq!(first.pack_cost, 0.22);
        assert_eq!(first.duty_usd_per_l, Some(0.0));
        assert!((first.ocean_uplift.unwrap() - 6.0).abs() < 1e-9);

        // diesel mean over records = (3 + 4 + 4) / 3
        let pomace = records.iter().find(|r| r.grade == Grade::Pomace).unwrap();
        let diesel_mean = 11.0 / 3.0;
        assert!((pomace.diesel_uplift.unwrap() - 0.15 * (4.0 - diesel_mean)).abs() < 1e-9);
        assert!((pomace.duty_usd_per_l.unwrap() - 0.2).abs() < 1e-9);
        let expected = 2.0 + 0.22 + 0.003 * 2100.0 + 0.15 * (4.0 - diesel_mean) + 0.2;
        assert!((pomace.deliv_hat_usd_per_l.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_missing_fx_leaves_usd_price_empty() {
        let prices = vec![price("2025-01-06", "EL", "Chania", Grade::ExtraVirgin, 4.0)];
        let records = assemble_panel(&prices, &[], &[], &[]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].price_usd_per_l, None);
        assert_eq!(records[0].deliv_hat_usd_per_l, None);
        assert_eq!(records[0].z_base, 0.0);
        let cov = coverage(&records);
        assert_eq!(cov["price_usd_per_l"], 0.0);
    }

    #[test]
    fn test_build_requires_eu_prices() {
        let lake = crate::lake::temp_lake();
        let err = build_weekly_panel(&lake, d("2025-01-10")).unwrap_err();
        assert!(matches!(err, ForecastError::Panel(_)));
    }
}
