//! Versioned model registry
//!
//! Bundles live under `mlops/models/<version>/bundle.json`; the index at
//! `mlops/registry.json` records each version's status. Registering a
//! bundle activates it and retires the previously active one. Retired
//! bundles stay loadable so issued forecasts keep their reference.

use crate::error::ForecastError;
use crate::lake::{self, DataLake};
use crate::models::{ModelBundle, ModelStatus};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistryEntry {
    pub version: String,
    pub status: ModelStatus,
    pub created_at: DateTime<Utc>,
    pub segments: usize,
    #[serde(default)]
    pub registered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retired_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryIndex {
    pub active: Option<String>,
    pub entries: Vec<RegistryEntry>,
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    lake: DataLake,
}

impl ModelRegistry {
    pub fn new(lake: DataLake) -> Self {
        Self { lake }
    }

    fn bundle_path(&self, version: &str) -> PathBuf {
        self.lake.path(lake::MODELS).join(version).join("bundle.json")
    }

    fn index_path(&self) -> PathBuf {
        self.lake.path(lake::REGISTRY_FILE)
    }

    pub fn index(&self) -> Result<RegistryIndex> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(RegistryIndex::default());
        }
        self.lake.read_json(&path)
    }

    fn upsert_entry(index: &mut RegistryIndex, bundle: &ModelBundle, registered_at: Option<DateTime<Utc>>) {
        let entry = RegistryEntry {
            version: bundle.version.clone(),
            status: bundle.status,
            created_at: bundle.created_at,
            segments: bundle.models.len(),
            registered_at,
            retired_at: bundle.retired_at,
        };
        match index.entries.iter_mut().find(|e| e.version == bundle.version) {
            Some(existing) => {
                let registered_at = existing.registered_at.or(entry.registered_at);
                *existing = RegistryEntry { registered_at, ..entry };
            }
            None => index.entries.push(entry),
        }
    }

    /// Persist a bundle without changing which version is active.
    pub fn save_candidate(&self, bundle: &ModelBundle) -> Result<PathBuf> {
        let path = self.bundle_path(&bundle.version);
        self.lake.write_json(&path, bundle)?;

        let mut index = self.index()?;
        Self::upsert_entry(&mut index, bundle, None);
        self.lake.write_json(&self.index_path(), &index)?;
        Ok(path)
    }

    /// Activate a bundle, retiring the current active one.
    pub fn register(&self, mut bundle: ModelBundle) -> Result<ModelBundle> {
        let mut index = self.index()?;
        let now = Utc::now();

        if let Some(previous) = index.active.clone().filter(|v| *v != bundle.version) {
            let mut old = self.get(&previous)?;
            old.status = ModelStatus::Retired;
            old.retired_at = Some(now);
            self.lake.write_json(&self.bundle_path(&old.version), &old)?;
            Self::upsert_entry(&mut index, &old, None);
            info!(version = %previous, "model retired");
        }

        bundle.status = ModelStatus::Active;
        bundle.retired_at = None;
        self.lake.write_json(&self.bundle_path(&bundle.version), &bundle)?;
        Self::upsert_entry(&mut index, &bundle, Some(now));
        index.active = Some(bundle.version.clone());
        self.lake.write_json(&self.index_path(), &index)?;

        info!(version = %bundle.version, segments = bundle.models.len(), "model registered as active");
        Ok(bundle)
    }

    pub fn get(&self, version: &str) -> Result<ModelBundle> {
        let path = self.bundle_path(version);
        if !path.exists() {
            return Err(ForecastError::ModelNotFound(version.to_string()));
        }
        self.lake.read_json(&path)
    }

    /// The active bundle, if any has been registered.
    pub fn active(&self) -> Result<Option<ModelBundle>> {
        match self.index()?.active {
            Some(version) => Ok(Some(self.get(&version)?)),
            None => Ok(None),
        }
    }

    pub fn require_active(&self) -> Result<ModelBundle> {
        self.active()?
            .ok_or_else(|| ForecastError::ModelNotFound("no active model".to_string()))
    }

    /// Registry entries, newest first.
    pub fn list(&self) -> Result<Vec<RegistryEntry>> {
        let mut entries = self.index()?.entries;
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Grade;
    use crate::training::tests::synthetic_rows;
    use crate::training::Trainer;

    fn bundle() -> ModelBundle {
        let rows = synthetic_rows(&[("IT", Grade::ExtraVirgin, 3.5)], 30);
        let mut b = Trainer::new(26).train_bundle(&rows, None).unwrap();
        b.version = format!("v-test-{}", uuid::Uuid::new_v4());
        b
    }

    #[test]
    fn test_empty_registry_has_no_active() {
        let registry = ModelRegistry::new(crate::lake::temp_lake());
        assert!(registry.active().unwrap().is_none());
        assert!(matches!(registry.require_active(), Err(ForecastError::ModelNotFound(_))));
        assert!(registry.list().unwrap().is_empty());
    }

    #[test]
    fn test_register_retires_previous() {
        let registry = ModelRegistry::new(crate::lake::temp_lake());
        let first = registry.register(bundle()).unwrap();
        let second = registry.register(bundle()).unwrap();

        let active = registry.active().unwrap().unwrap();
        assert_eq!(active.version, second.version);
        assert_eq!(active.status, ModelStatus::Active);

        let retired = registry.get(&first.version).unwrap();
        assert_eq!(retired.status, ModelStatus::Retired);
        assert!(retired.retired_at.is_some());
        assert_eq!(registry.list().unwrap().len(), 2);
    }

    #[test]
    fn test_candidate_does_not_change_active() {
        let registry = ModelRegistry::new(crate::lake::temp_lake());
        let active = registry.register(bundle()).unwrap();
        let candidate = bundle();
        registry.save_candidate(&candidate).unwrap();

        assert_eq!(registry.active().unwrap().unwrap().version, active.version);
        assert_eq!(registry.get(&candidate.version).unwrap().status, ModelStatus::Candidate);
    }

    #[test]
    fn test_unknown_version() {
        let registry = ModelRegistry::new(crate::lake::temp_lake());
        assert!(matches!(registry.get("v0"), Err(ForecastError::ModelNotFound(_))));
    }
}
