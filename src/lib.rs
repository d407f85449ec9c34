//! Olive Oil Price Forecasting Platform
//!
//! Forecasts weekly olive oil prices per EU member state and grade from
//! market prices, ocean freight, tariffs and macro series:
//! - Ingests raw sources into a snapshot-versioned CSV lake
//! - Builds a weekly panel and lagged model features
//! - Trains per-segment ridge models behind an evaluation gate
//! - Serves point forecasts with 95% intervals and records them in a ledger
//! - Monitors freshness, data quality and live accuracy, retraining on degradation
//! - Answers importer questions through deterministic tools and a chat assistant
//!
//! PIPELINE:
//! INGEST → PANEL → FEATURES → TRAIN → EVALUATE → REGISTER → FORECAST → MONITOR

pub mod agent;
pub mod api;
pub mod audit;
pub mod classifier;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod execution;
pub mod features;
pub mod forecasting;
pub mod gemini;
pub mod ingest;
pub mod lake;
pub mod memory;
pub mod models;
pub mod monitoring;
pub mod notify;
pub mod panel;
pub mod planner;
pub mod platform;
pub mod registry;
pub mod regression;
pub mod retraining;
pub mod scheduler;
pub mod tools;
pub mod training;

pub use error::{ForecastError, Result};

// Re-export common types
pub use classifier::{Intent, IntentClassifier};
pub use models::*;
pub use platform::Platform;
