//! ConfigStore - local persisted configuration
//!
//! ## Responsibilities
//!
//! - Typed load/save of local settings (device-role assignments, matcher tuning)
//! - One JSON file per key under a data directory
//! - Single in-memory cache, invalidated on write
//!
//! ## Design Principles
//!
//! - SSoT: all persisted local state goes through here
//! - No other module re-parses persisted blobs on read

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::RwLock;

/// File-backed key-value store with an in-memory cache
pub struct ConfigStore {
    dir: PathBuf,
    cache: RwLock<HashMap<String, serde_json::Value>>,
}

impl ConfigStore {
    /// Open the store, creating the directory and loading every existing key
    pub async fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;

        let mut cache = HashMap::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let raw = fs::read_to_string(&path).await?;
            match serde_json::from_str(&raw) {
                Ok(value) => {
                    cache.insert(key.to_string(), value);
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping unreadable config entry");
                }
            }
        }

        tracing::info!(
            dir = %dir.display(),
            keys = cache.len(),
            "ConfigStore opened"
        );

        Ok(Self {
            dir,
            cache: RwLock::new(cache),
        })
    }

    /// Read a typed value for a key, if present
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let cache = self.cache.read().await;
        match cache.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Write a typed value for a key; the file is written before the cache
    /// entry is replaced so a crash never leaves the cache ahead of disk.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        validate_key(key)?;
        let json = serde_json::to_value(value)?;
        let path = self.path_for(key);

        fs::write(&path, serde_json::to_string_pretty(&json)?).await?;

        let mut cache = self.cache.write().await;
        cache.insert(key.to_string(), json);

        tracing::debug!(key = %key, "Config entry written");
        Ok(())
    }

    /// Remove a key from disk and cache
    pub async fn remove(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(&path).await?;
        }
        self.cache.write().await.remove(key);
        Ok(())
    }

    /// List all known keys
    pub async fn keys(&self) -> Vec<String> {
        self.cache.read().await.keys().cloned().collect()
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

/// Keys become file names, so restrict them to a safe alphabet
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty()
        || !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(Error::Validation(format!("invalid config key: {key:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path().to_path_buf()).await.unwrap();

        store.set("greeting", &"hello".to_string()).await.unwrap();
        let got: Option<String> = store.get("greeting").await.unwrap();
        assert_eq!(got.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn float_vectors_roundtrip_bit_identical() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path().to_path_buf()).await.unwrap();

        let samples: Vec<f32> = vec![0.123_456_79, -0.000_001_3, 1.0, f32::MIN_POSITIVE];
        store.set("embedding", &samples).await.unwrap();

        // Reopen to force a read from disk, not the warm cache
        drop(store);
        let store = ConfigStore::open(dir.path().to_path_buf()).await.unwrap();
        let got: Vec<f32> = store.get("embedding").await.unwrap().unwrap();
        for (a, b) in samples.iter().zip(got.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[tokio::test]
    async fn remove_clears_disk_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path().to_path_buf()).await.unwrap();

        store.set("k", &42u32).await.unwrap();
        store.remove("k").await.unwrap();
        let got: Option<u32> = store.get("k").await.unwrap();
        assert!(got.is_none());
        assert!(!dir.path().join("k.json").exists());
    }

    #[tokio::test]
    async fn rejects_path_traversal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path().to_path_buf()).await.unwrap();
        assert!(store.set("../evil", &1u8).await.is_err());
    }
}
