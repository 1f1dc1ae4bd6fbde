//! EnrollmentStore - enrolled face templates
//!
//! ## Responsibilities
//!
//! - Hold embedding samples per identity (more samples improve recall)
//! - Append-only writes from the enrollment flow
//! - Read-only lookup-all for the identity matcher
//! - Typed persistence through the ConfigStore, one cached copy in memory
//!
//! All samples in a deployment share one embedding dimension; comparisons
//! are undefined otherwise, so mismatched samples are rejected at the door.

use crate::config_store::ConfigStore;
use crate::error::{Error, Result};
use crate::models::Identity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const TEMPLATE_KEY_PREFIX: &str = "face_template.";

/// Enrolled template: identity metadata plus its embedding samples
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentTemplate {
    pub identity: Identity,
    pub samples: Vec<Vec<f32>>,
}

/// EnrollmentStore instance
pub struct EnrollmentStore {
    config: Arc<ConfigStore>,
    cache: RwLock<HashMap<String, EnrollmentTemplate>>,
}

impl EnrollmentStore {
    /// Load all persisted templates into the cache
    pub async fn new(config: Arc<ConfigStore>) -> Result<Self> {
        let mut cache = HashMap::new();
        for key in config.keys().await {
            let Some(identity_id) = key.strip_prefix(TEMPLATE_KEY_PREFIX) else {
                continue;
            };
            if let Some(template) = config.get::<EnrollmentTemplate>(&key).await? {
                cache.insert(identity_id.to_string(), template);
            }
        }

        tracing::info!(identities = cache.len(), "EnrollmentStore loaded");

        Ok(Self {
            config,
            cache: RwLock::new(cache),
        })
    }

    /// Append one embedding sample for an identity.
    ///
    /// Returns the total sample count for that identity after the append.
    pub async fn add_sample(&self, identity: &Identity, embedding: Vec<f32>) -> Result<usize> {
        if embedding.is_empty() {
            return Err(Error::Validation("empty embedding sample".into()));
        }

        let mut cache = self.cache.write().await;

        if let Some(dim) = dimension_of(&cache) {
            if embedding.len() != dim {
                return Err(Error::Validation(format!(
                    "embedding dimension {} does not match enrolled dimension {}",
                    embedding.len(),
                    dim
                )));
            }
        }

        let template = cache
            .entry(identity.id.clone())
            .or_insert_with(|| EnrollmentTemplate {
                identity: identity.clone(),
                samples: Vec::new(),
            });
        template.samples.push(embedding);
        let count = template.samples.len();

        let key = format!("{TEMPLATE_KEY_PREFIX}{}", identity.id);
        self.config.set(&key, &*template).await?;

        tracing::info!(
            identity_id = %identity.id,
            samples = count,
            "Embedding sample enrolled"
        );
        Ok(count)
    }

    /// All enrolled templates (matcher lookup-all)
    pub async fn templates(&self) -> Vec<EnrollmentTemplate> {
        self.cache.read().await.values().cloned().collect()
    }

    /// Sample count per identity id
    pub async fn sample_counts(&self) -> HashMap<String, usize> {
        self.cache
            .read()
            .await
            .iter()
            .map(|(id, t)| (id.clone(), t.samples.len()))
            .collect()
    }

    /// Drop an identity's template entirely
    pub async fn remove(&self, identity_id: &str) -> Result<()> {
        let key = format!("{TEMPLATE_KEY_PREFIX}{identity_id}");
        self.config.remove(&key).await?;
        self.cache.write().await.remove(identity_id);
        Ok(())
    }

    /// The deployment's embedding dimension, once any sample exists
    pub async fn dimension(&self) -> Option<usize> {
        dimension_of(&*self.cache.read().await)
    }
}

fn dimension_of(cache: &HashMap<String, EnrollmentTemplate>) -> Option<usize> {
    cache
        .values()
        .flat_map(|t| t.samples.first())
        .map(|s| s.len())
        .next()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: &str) -> Identity {
        Identity {
            id: id.to_string(),
            display_name: format!("Person {id}"),
            group: "ops".to_string(),
        }
    }

    async fn store() -> (tempfile::TempDir, EnrollmentStore) {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(ConfigStore::open(dir.path().to_path_buf()).await.unwrap());
        let store = EnrollmentStore::new(config).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn add_sample_accumulates() {
        let (_dir, store) = store().await;
        let e1 = identity("e1");
        assert_eq!(store.add_sample(&e1, vec![0.1, 0.2]).await.unwrap(), 1);
        assert_eq!(store.add_sample(&e1, vec![0.3, 0.4]).await.unwrap(), 2);
        assert_eq!(store.templates().await.len(), 1);
    }

    #[tokio::test]
    async fn dimension_mismatch_rejected() {
        let (_dir, store) = store().await;
        store.add_sample(&identity("e1"), vec![0.1, 0.2]).await.unwrap();
        let err = store
            .add_sample(&identity("e2"), vec![0.1, 0.2, 0.3])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn templates_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let config = Arc::new(ConfigStore::open(dir.path().to_path_buf()).await.unwrap());
            let store = EnrollmentStore::new(config).await.unwrap();
            store.add_sample(&identity("e1"), vec![0.5, -0.5]).await.unwrap();
        }
        let config = Arc::new(ConfigStore::open(dir.path().to_path_buf()).await.unwrap());
        let store = EnrollmentStore::new(config).await.unwrap();
        let templates = store.templates().await;
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].samples[0], vec![0.5, -0.5]);
    }
}
