//! InventoryClient - Inventory Store adapter
//!
//! ## Responsibilities
//!
//! - List identities known to the store
//! - Write committed checkouts through
//!
//! The store owns employees, items, and transactions; this service only
//! reads identities and records checkouts on commit.

use crate::error::{Error, Result};
use crate::models::Identity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Inventory Store HTTP client
pub struct InventoryClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct CheckoutRequest<'a> {
    identity_id: &'a str,
    removed_labels: &'a BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CheckoutResponse {
    transaction_id: String,
}

impl InventoryClient {
    /// Create a client with the default 10 s call deadline
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, base_url }
    }

    /// Check store health
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/healthz", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// All identities eligible to check items out
    pub async fn list_identities(&self) -> Result<Vec<Identity>> {
        let url = format!("{}/identities", self.base_url);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Inventory(format!(
                "identity listing failed: {}",
                resp.status()
            )));
        }

        let identities: Vec<Identity> = resp.json().await?;
        Ok(identities)
    }

    /// Record one checkout; returns the store's transaction id.
    ///
    /// Any non-success response is surfaced as an `Inventory` error and the
    /// caller keeps its candidate intact for retry.
    pub async fn record_checkout(
        &self,
        identity_id: &str,
        removed_labels: &BTreeSet<String>,
        note: Option<&str>,
    ) -> Result<String> {
        let url = format!("{}/checkouts", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&CheckoutRequest {
                identity_id,
                removed_labels,
                note,
            })
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Inventory(format!(
                "checkout rejected: {status} - {body}"
            )));
        }

        let body: CheckoutResponse = resp.json().await?;
        tracing::info!(
            identity_id = %identity_id,
            items = removed_labels.len(),
            transaction_id = %body.transaction_id,
            "Checkout recorded"
        );
        Ok(body.transaction_id)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}
