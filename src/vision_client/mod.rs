//! VisionClient - Vision Provider adapter
//!
//! ## Responsibilities
//!
//! - Device enumeration
//! - Per-tick embedding extraction (zero-or-one face per frame)
//! - Label detection for the shelf camera
//!
//! Every call is bounded by the configured timeout; a timeout surfaces as
//! `VisionTimeout` so sampling loops can absorb it as a no-detection tick.

use crate::error::{Error, Result};
use crate::models::{DetectionLabel, DeviceInfo};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Vision Provider HTTP client
pub struct VisionClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct SampleRequest<'a> {
    device_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct DeviceListResponse {
    devices: Vec<DeviceInfo>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    /// Absent or null when no face was found in the frame
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct Detection {
    label: String,
    confidence: f32,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<Detection>,
}

impl VisionClient {
    /// Create a client with the default 10 s call deadline
    pub fn new(base_url: String) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(10))
    }

    /// Create a client with a custom call deadline
    pub fn with_timeout(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url,
            timeout,
        }
    }

    /// Check provider health
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/healthz", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// Enumerate capture devices known to the provider
    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let url = format!("{}/v1/devices", self.base_url);
        let resp = self.client.get(&url).send().await.map_err(map_reqwest)?;

        if !resp.status().is_success() {
            return Err(Error::Internal(format!(
                "device enumeration failed: {}",
                resp.status()
            )));
        }

        let body: DeviceListResponse = resp.json().await.map_err(map_reqwest)?;
        Ok(body.devices)
    }

    /// Sample one frame from a device and extract a face embedding.
    ///
    /// `Ok(None)` means the frame held no face; that is a normal result.
    pub async fn sample_embedding(&self, device_id: &str) -> Result<Option<Vec<f32>>> {
        let url = format!("{}/v1/embedding", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&SampleRequest { device_id })
            .send()
            .await
            .map_err(map_reqwest)?;

        if !resp.status().is_success() {
            return Err(Error::Internal(format!(
                "embedding extraction failed: {}",
                resp.status()
            )));
        }

        let body: EmbeddingResponse = resp.json().await.map_err(map_reqwest)?;
        Ok(body.embedding)
    }

    /// Sample one frame from a device and return the detected labels
    pub async fn sample_labels(&self, device_id: &str) -> Result<HashSet<DetectionLabel>> {
        let url = format!("{}/v1/detect", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&SampleRequest { device_id })
            .send()
            .await
            .map_err(map_reqwest)?;

        if !resp.status().is_success() {
            return Err(Error::Internal(format!(
                "label detection failed: {}",
                resp.status()
            )));
        }

        let body: DetectResponse = resp.json().await.map_err(map_reqwest)?;
        Ok(body
            .detections
            .into_iter()
            .map(|d| DetectionLabel::new(d.label, d.confidence))
            .collect())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn map_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::VisionTimeout(e.to_string())
    } else {
        Error::Http(e)
    }
}
