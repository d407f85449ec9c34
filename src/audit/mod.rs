//! Forecast ledger
//!
//! Every issued forecast is recorded once per (model version, country,
//! grade, target week). A repeated query returns the recorded forecast
//! instead of a fresh computation, and each entry carries a content hash
//! so tampering with the persisted ledger can be detected.

use crate::lake::{self, DataLake};
use crate::models::{Forecast, Grade};
use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identity of an issued forecast
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerKey {
    pub model_version: String,
    pub country: String,
    pub grade: Grade,
    pub target_week: NaiveDate,
}

impl LedgerKey {
    pub fn new(model_version: &str, country: &str, grade: Grade, target_week: NaiveDate) -> Self {
        Self {
            model_version: model_version.to_string(),
            country: country.to_string(),
            grade,
            target_week,
        }
    }

    pub fn of(forecast: &Forecast) -> Self {
        Self::new(
            &forecast.model_version,
            &forecast.country,
            forecast.grade,
            forecast.target_week,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub forecast: Forecast,
    pub content_hash: String,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only store of issued forecasts
#[derive(Clone)]
pub struct ForecastLedger {
    entries: Arc<RwLock<HashMap<LedgerKey, LedgerEntry>>>,
    lake: Option<DataLake>,
}

impl ForecastLedger {
    /// Ledger kept in memory only.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            lake: None,
        }
    }

    /// Ledger persisted to `mlops/forecasts/ledger.jsonl`, loading what is
    /// already there.
    pub fn open(lake: DataLake) -> Result<Self> {
        let mut entries = HashMap::new();
        let loaded = merge_persisted(&lake, &mut entries)?;
        debug!(entries = loaded, "forecast ledger opened");
        Ok(Self {
            entries: Arc::new(RwLock::new(entries)),
            lake: Some(lake),
        })
    }

    /// Merge entries other processes appended since this ledger was opened.
    /// Returns how many were new; an in-memory ledger has nothing to merge.
    pub async fn reload(&self) -> Result<usize> {
        let Some(lake) = &self.lake else {
            return Ok(0);
        };
        let mut entries = self.entries.write().await;
        let added = merge_persisted(lake, &mut entries)?;
        if added > 0 {
            debug!(added, "forecast ledger reloaded");
        }
        Ok(added)
    }

    pub async fn lookup(&self, key: &LedgerKey) -> Option<Forecast> {
        let entries = self.entries.read().await;
        entries.get(key).map(|e| e.forecast.clone())
    }

    /// Record a forecast. When its key was already issued the earlier
    /// forecast is returned unchanged.
    pub async fn record(&self, forecast: Forecast) -> Result<Forecast> {
        let key = LedgerKey::of(&forecast);
        let mut entries = self.entries.write().await;
        if let Some(lake) = &self.lake {
            merge_persisted(lake, &mut entries)?;
        }
        if let Some(existing) = entries.get(&key) {
            return Ok(existing.forecast.clone());
        }

        let entry = LedgerEntry {
            content_hash: compute_forecast_hash(&forecast),
            forecast,
            recorded_at: Utc::now(),
        };
        if let Some(lake) = &self.lake {
            lake.append_jsonl(&lake.path(lake::FORECAST_LEDGER), &entry)?;
        }
        let forecast = entry.forecast.clone();
        entries.insert(key, entry);
        Ok(forecast)
    }

    /// Recorded forecasts ordered by issue time.
    pub async fn forecasts(&self) -> Vec<Forecast> {
        let entries = self.entries.read().await;
        let mut items: Vec<Forecast> = entries.values().map(|e| e.forecast.clone()).collect();
        items.sort_by_key(|f| f.issued_at);
        items
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Check a recorded forecast against its stored hash.
    pub async fn verify_integrity(&self, forecast_id: Uuid) -> bool {
        let entries = self.entries.read().await;
        match entries.values().find(|e| e.forecast.forecast_id == forecast_id) {
            Some(entry) => {
                let ok = compute_forecast_hash(&entry.forecast) == entry.content_hash;
                if !ok {
                    warn!(forecast_id = %forecast_id, "ledger hash mismatch");
                }
                ok
            }
            None => false,
        }
    }
}

impl Default for ForecastLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_persisted(lake: &DataLake, entries: &mut HashMap<LedgerKey, LedgerEntry>) -> Result<usize> {
    let mut added = 0;
    for entry in lake.read_jsonl::<LedgerEntry>(&lake.path(lake::FORECAST_LEDGER))? {
        // first write wins
        if let Entry::Vacant(slot) = entries.entry(LedgerKey::of(&entry.forecast)) {
            slot.insert(entry);
            added += 1;
        }
    }
    Ok(added)
}

/// SHA-256 of the forecast's JSON, streamed straight into the hasher.
pub fn compute_forecast_hash(forecast: &Forecast) -> String {
    let mut hasher = Sha256::new();
    if serde_json::to_writer(&mut HashWriter(&mut hasher), forecast).is_err() {
        return String::new();
    }
    hex::encode(hasher.finalize())
}

struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forecast(version: &str, point: f64) -> Forecast {
        Forecast {
            forecast_id: Uuid::new_v4(),
            target_week: NaiveDate::from_ymd_opt(2025, 12, 1).unwrap(),
            country: "IT".into(),
            grade: Grade::ExtraVirgin,
            point,
            lower: point - 0.2,
            upper: point + 0.2,
            confidence_level: 0.95,
            model_version: version.into(),
            segment: "country_grade_IT_EVOO".into(),
            horizon_weeks: 4,
            issued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_repeat_returns_first_forecast() {
        let ledger = ForecastLedger::new();
        let first = ledger.record(forecast("v1", 3.5)).await.unwrap();
        let second = ledger.record(forecast("v1", 9.9)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(ledger.len().await, 1);
        assert!(ledger.lookup(&LedgerKey::of(&first)).await.is_some());
    }

    #[tokio::test]
    async fn test_new_version_gets_new_entry() {
        let ledger = ForecastLedger::new();
        ledger.record(forecast("v1", 3.5)).await.unwrap();
        let other = ledger.record(forecast("v2", 3.6)).await.unwrap();
        assert_eq!(other.point, 3.6);
        assert_eq!(ledger.len().await, 2);
    }

    #[tokio::test]
    async fn test_integrity_and_reload() {
        let lake = crate::lake::temp_lake();
        let ledger = ForecastLedger::open(lake.clone()).unwrap();
        let issued = ledger.record(forecast("v1", 3.5)).await.unwrap();
        assert!(ledger.verify_integrity(issued.forecast_id).await);
        assert!(!ledger.verify_integrity(Uuid::new_v4()).await);

        let reopened = ForecastLedger::open(lake).unwrap();
        assert_eq!(reopened.len().await, 1);
        let again = reopened.record(forecast("v1", 1.0)).await.unwrap();
        assert_eq!(again.forecast_id, issued.forecast_id);
        assert!(reopened.verify_integrity(issued.forecast_id).await);
    }

    #[tokio::test]
    async fn test_reload_sees_other_writers() {
        let lake = crate::lake::temp_lake();
        let reader = ForecastLedger::open(lake.clone()).unwrap();
        let writer = ForecastLedger::open(lake).unwrap();

        let issued = writer.record(forecast("v1", 3.6)).await.unwrap();
        assert_eq!(reader.len().await, 0);
        assert_eq!(reader.reload().await.unwrap(), 1);
        assert_eq!(reader.reload().await.unwrap(), 0);
        assert_eq!(reader.forecasts().await[0].forecast_id, issued.forecast_id);

        // the reader must not issue a second forecast for the same key
        let again = reader.record(forecast("v1", 1.0)).await.unwrap();
        assert_eq!(again.forecast_id, issued.forecast_id);
        assert_eq!(ForecastLedger::new().reload().await.unwrap(), 0);
    }

    #[test]
    fn test_hash_changes_with_content() {
        let a = forecast("v1", 3.5);
        let mut b = a.clone();
        b.point = 3.6;
        assert_eq!(compute_forecast_hash(&a).len(), 64);
        assert_ne!(compute_forecast_hash(&a), compute_forecast_hash(&b));
    }
}
