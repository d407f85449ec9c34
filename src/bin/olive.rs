use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use olive_forecast::{
    config::Settings,
    features::build_features,
    ingest::{
        ingest_macros, normalize_tariffs, standardize_eu_prices, standardize_fbx, HttpMacroSource, MacroSource,
    },
    models::{country_code, ForecastQuery, Grade},
    panel::build_weekly_panel,
    platform::Platform,
    scheduler,
};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "olive")]
#[command(about = "Olive oil price forecasting pipeline", long_about = None)]
struct Cli {
    /// Lake root directory (overrides OLIVE_LAKE_ROOT)
    #[arg(long, global = true)]
    lake: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Standardise the newest raw EU price file
    IngestEuPrices {
        /// Snapshot date (default: today)
        #[arg(short, long)]
        snapshot: Option<NaiveDate>,
    },

    /// Standardise the newest raw FBX freight file
    IngestFbx {
        #[arg(short, long)]
        snapshot: Option<NaiveDate>,
    },

    /// Normalise the newest raw tariff file
    IngestTariffs,

    /// Fetch FX, Brent, diesel and PPI series from FRED and EIA
    IngestMacros {
        #[arg(short, long)]
        snapshot: Option<NaiveDate>,
    },

    /// Build the weekly economic panel
    BuildPanel {
        #[arg(short, long)]
        snapshot: Option<NaiveDate>,
    },

    /// Engineer model features from the panel
    BuildFeatures {
        #[arg(short, long)]
        snapshot: Option<NaiveDate>,
    },

    /// Train a model bundle and register it if it passes the gate
    Train {
        /// Features snapshot (default: latest)
        #[arg(short, long)]
        snapshot: Option<NaiveDate>,
    },

    /// Evaluate a registered model version
    Evaluate {
        /// Model version (default: active)
        #[arg(short, long)]
        version: Option<String>,

        #[arg(short, long)]
        snapshot: Option<NaiveDate>,
    },

    /// Forecast a series with the active model
    Forecast {
        /// Country name or member-state code
        #[arg(short, long, default_value = "IT")]
        country: String,

        /// Oil grade (EVOO, VOO, lampante, refined, pomace)
        #[arg(short, long, default_value = "EVOO")]
        grade: Grade,

        /// Target week (Monday-aligned); issues and records one forecast
        #[arg(short, long)]
        target_week: Option<NaiveDate>,

        /// Weekly path length when no target week is given
        #[arg(long, default_value = "12")]
        weeks: u32,
    },

    /// Run freshness, quality and performance checks
    Monitor,

    /// Retrain on the latest features snapshot
    Retrain {
        #[arg(short, long, default_value = "manual")]
        reason: String,
    },

    /// Ingest, build panel and features, then train
    RunPipeline {
        #[arg(short, long)]
        snapshot: Option<NaiveDate>,

        /// Skip FRED/EIA macro series
        #[arg(long)]
        skip_macros: bool,
    },

    /// Run monitoring and conditional retraining on an interval
    Schedule {
        /// Hours between cycles (default: MONITOR_INTERVAL_HOURS)
        #[arg(long)]
        interval_hours: Option<u64>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::from_env();
    if let Some(root) = cli.lake {
        settings = settings.with_lake_root(root);
    }

    let platform = Platform::new(settings.clone())?;
    let lake = &platform.lake;

    match cli.command {
        Commands::IngestEuPrices { snapshot } => {
            let path = standardize_eu_prices(lake, snapshot.unwrap_or_else(today), settings.price_unit)?;
            info!(path = %path.display(), "EU prices written");
        }
        Commands::IngestFbx { snapshot } => {
            let path = standardize_fbx(lake, snapshot.unwrap_or_else(today))?;
            info!(path = %path.display(), "FBX written");
        }
        Commands::IngestTariffs => {
            let path = normalize_tariffs(lake)?;
            info!(path = %path.display(), "tariffs written");
        }
        Commands::IngestMacros { snapshot } => {
            let source = HttpMacroSource::new(settings.fred_api_key.clone(), settings.eia_api_key.clone())?;
            let summary = ingest_macros(lake, snapshot.unwrap_or_else(today), &source).await?;
            print_json(&summary)?;
        }
        Commands::BuildPanel { snapshot } => {
            print_json(&build_weekly_panel(lake, snapshot.unwrap_or_else(today))?)?;
        }
        Commands::BuildFeatures { snapshot } => {
            print_json(&build_features(lake, snapshot.unwrap_or_else(today))?)?;
        }
        Commands::Train { snapshot } => {
            print_json(&platform.train_and_register(snapshot)?)?;
        }
        Commands::Evaluate { version, snapshot } => {
            print_json(&platform.evaluate_version(version.as_deref(), snapshot)?)?;
        }
        Commands::Forecast {
            country,
            grade,
            target_week,
            weeks,
        } => {
            let country = country_code(&country).ok_or_else(|| format!("unknown country '{}'", country))?;
            match target_week {
                Some(target_week) => {
                    let query = ForecastQuery {
                        country,
                        grade,
                        target_week,
                    };
                    print_json(&platform.forecasts.issue(&query).await?)?;
                }
                None => {
                    let forecaster = platform.forecasts.forecaster().await?;
                    print_json(&forecaster.forecast_path(&country, grade, weeks)?)?;
                }
            }
        }
        Commands::Monitor => {
            print_json(&platform.monitor().run(Utc::now()).await?)?;
        }
        Commands::Retrain { reason } => {
            print_json(&platform.retrainer().retrain(&reason).await?)?;
        }
        Commands::RunPipeline { snapshot, skip_macros } => {
            let source = if skip_macros {
                None
            } else {
                Some(HttpMacroSource::new(settings.fred_api_key.clone(), settings.eia_api_key.clone())?)
            };
            let outcome = platform
                .run_pipeline(
                    snapshot.unwrap_or_else(today),
                    source.as_ref().map(|s| s as &dyn MacroSource),
                )
                .await?;
            print_json(&outcome)?;
        }
        Commands::Schedule { interval_hours } => {
            let hours = interval_hours.unwrap_or(settings.monitor_interval_hours).max(1);
            scheduler::run_daily(&platform, Duration::from_secs(hours * 3600)).await;
        }
    }

    Ok(())
}
