//! Shared models and types for shelfwatch
//!
//! Types used across multiple modules to avoid circular dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub vision_connected: bool,
    pub inventory_connected: bool,
    pub identity_loop_running: bool,
}

/// An identity known to the Inventory Store.
///
/// Owned by the store; immutable from this service's perspective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    /// Team / department grouping
    pub group: String,
}

/// A detected item label with an advisory confidence score.
///
/// Equality and ordering follow the label identifier only; confidence is
/// never consulted when diffing snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionLabel {
    pub label: String,
    pub confidence: f32,
}

impl DetectionLabel {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

impl PartialEq for DetectionLabel {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label
    }
}

impl Eq for DetectionLabel {}

impl std::hash::Hash for DetectionLabel {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.label.hash(state);
    }
}

/// Which side of the before/after pair a snapshot belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SnapshotPhase {
    Before,
    After,
}

/// An immutable set of detected labels captured at one instant.
///
/// Created once per scan attempt, consumed by the diff and discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub phase: SnapshotPhase,
    /// Distinct label identifiers seen during the capture
    pub labels: BTreeSet<String>,
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(phase: SnapshotPhase, labels: BTreeSet<String>) -> Self {
        Self {
            phase,
            labels,
            captured_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// A capture device as enumerated by the Vision Provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    #[serde(default)]
    pub label: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_equality_ignores_confidence() {
        let a = DetectionLabel::new("ITEM_01", 0.9);
        let b = DetectionLabel::new("ITEM_01", 0.2);
        assert_eq!(a, b);

        let mut set = std::collections::HashSet::new();
        set.insert(a);
        set.insert(b);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn snapshot_counts_distinct_labels() {
        let labels: BTreeSet<String> = ["ITEM_01", "ITEM_02"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let snap = Snapshot::new(SnapshotPhase::Before, labels);
        assert_eq!(snap.len(), 2);
        assert!(!snap.is_empty());
    }
}
