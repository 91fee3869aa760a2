//! Persistent key-value store collaborator
//!
//! Settings and the remote rate-limit history live in host-owned storage
//! holding plain JSON values. The engine reads and writes it but never locks
//! it; only one search session writes at a time.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::Settings;

pub const SETTINGS_KEY: &str = "settings";
pub const RATE_LIMIT_KEY: &str = "rateLimitHistory";

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&mut self, key: &str, value: Value) -> Result<()>;
}

/// Volatile store for tests and hosts without persistence
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: HashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

/// Store backed by a single JSON object on disk, written through on every set
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Map<String, Value>,
}

impl JsonFileStore {
    /// Open (or lazily create) the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            return Ok(Self {
                path,
                values: Map::new(),
            });
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read store {:?}", path))?;
        let values: Map<String, Value> = if content.trim().is_empty() {
            Map::new()
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse store {:?}", path))?
        };

        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.values)?;
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write store {:?}", self.path))?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<()> {
        self.values.insert(key.to_string(), value);
        self.save()
    }
}

/// Saved settings, or defaults if none were saved
pub fn load_settings<S: KeyValueStore + ?Sized>(store: &S) -> Result<Settings> {
    match store.get(SETTINGS_KEY)? {
        Some(value) => serde_json::from_value(value).context("Failed to parse saved settings"),
        None => Ok(Settings::default()),
    }
}

pub fn save_settings<S: KeyValueStore + ?Sized>(store: &mut S, settings: &Settings) -> Result<()> {
    store.set(SETTINGS_KEY, serde_json::to_value(settings)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_round_trip() {
        let mut store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", json!([1, 2, 3])).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(json!([1, 2, 3])));
    }

    #[test]
    fn test_settings_default_when_missing() {
        let store = MemoryStore::new();
        assert_eq!(load_settings(&store).unwrap(), Settings::default());
    }

    #[test]
    fn test_settings_saved_camel_case() {
        let mut store = MemoryStore::new();
        let settings = Settings {
            case_sensitive: true,
            ai_mode: true,
            ..Settings::default()
        };
        save_settings(&mut store, &settings).unwrap();
        let raw = store.get(SETTINGS_KEY).unwrap().unwrap();
        assert_eq!(raw["caseSensitive"], json!(true));
        assert_eq!(load_settings(&store).unwrap(), settings);
    }

    #[test]
    fn test_file_store_persists_across_opens() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("store.json");

        let mut store = JsonFileStore::open(&path).unwrap();
        store.set(RATE_LIMIT_KEY, json!([1700000000000u64])).unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get(RATE_LIMIT_KEY).unwrap(),
            Some(json!([1700000000000u64]))
        );
    }

    #[test]
    fn test_file_store_rejects_garbage() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.json");
        std::fs::write(&path, "not json").unwrap();
        let err = JsonFileStore::open(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse store"));
    }
}
