//! DetectionDiffEngine - before/after label diffing
//!
//! ## Responsibilities
//!
//! - Accumulate a snapshot from repeated polls of a label source
//!   (union across the window tolerates transient misses)
//! - Compute the removed-label delta between BEFORE and AFTER snapshots
//! - Reject noisy captures instead of trusting a wrong diff
//!
//! The engine is source-agnostic: the interactive shelf flow polls a local
//! camera over a window, the server round trip does one detector call per
//! snapshot. Both share these diff rules.

use crate::error::{Error, Result};
use crate::models::{DetectionLabel, Snapshot, SnapshotPhase};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;
use tokio::time::Instant;

/// Anything that can produce the set of labels currently in view
pub trait LabelSource {
    fn sample(&self) -> impl std::future::Future<Output = Result<HashSet<DetectionLabel>>> + Send;
}

/// Diff engine tuning, configurable per deployment
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DiffConfig {
    /// Minimum distinct labels for a windowed capture to be trusted
    pub min_detections: usize,
    /// Length of one capture window
    pub window: Duration,
    /// Poll spacing within a window
    pub interval: Duration,
    /// Forced delay between BEFORE and AFTER in the server round trip
    pub settle_delay: Duration,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            min_detections: 2,
            window: Duration::from_millis(2000),
            interval: Duration::from_millis(200),
            settle_delay: Duration::from_millis(2000),
        }
    }
}

/// Accepted diff result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "removed")]
pub enum DiffOutcome {
    /// Nothing disappeared between the snapshots; no transaction implied
    NoChange,
    /// Labels present before and absent after
    Removed(BTreeSet<String>),
}

/// DetectionDiffEngine instance
#[derive(Debug, Clone)]
pub struct DetectionDiffEngine {
    config: DiffConfig,
}

impl DetectionDiffEngine {
    pub fn new(config: DiffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiffConfig {
        &self.config
    }

    /// Poll `source` every `interval` until `window` elapses, accumulating
    /// the union of all labels seen. A label seen in a single poll counts.
    ///
    /// Poll failures are absorbed as empty polls so one bad frame cannot
    /// abort the window; a window with fewer than `min_detections` distinct
    /// labels is rejected and must be retried by the operator.
    pub async fn capture_window<S: LabelSource>(
        &self,
        source: &S,
        phase: SnapshotPhase,
    ) -> Result<Snapshot> {
        let deadline = Instant::now() + self.config.window;
        let mut ticker = tokio::time::interval(self.config.interval);
        let mut labels: BTreeSet<String> = BTreeSet::new();

        loop {
            ticker.tick().await;
            match source.sample().await {
                Ok(seen) => {
                    labels.extend(seen.into_iter().map(|l| l.label));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Label poll failed; counting as empty");
                }
            }
            if Instant::now() >= deadline {
                break;
            }
        }

        if labels.len() < self.config.min_detections {
            return Err(Error::InsufficientDetections {
                seen: labels.len(),
                min: self.config.min_detections,
            });
        }

        tracing::info!(
            phase = ?phase,
            distinct = labels.len(),
            "Capture window complete"
        );
        Ok(Snapshot::new(phase, labels))
    }

    /// One detector call per snapshot (server round trip).
    ///
    /// A provider failure degrades to an empty label set rather than
    /// aborting the whole operation; the diff noise guards still apply.
    pub async fn capture_single_shot<S: LabelSource>(
        &self,
        source: &S,
        phase: SnapshotPhase,
    ) -> Snapshot {
        let labels = match source.sample().await {
            Ok(seen) => seen.into_iter().map(|l| l.label).collect(),
            Err(e) => {
                tracing::warn!(phase = ?phase, error = %e, "Detector call failed; snapshot degraded to empty");
                BTreeSet::new()
            }
        };
        Snapshot::new(phase, labels)
    }

    /// Compute the removed-label delta.
    ///
    /// Rejects with `UnexpectedGrowth` when the AFTER set grew past the
    /// plausible bound (strictly more than one new label): more labels
    /// appearing than existed before indicates a bad read, not a
    /// legitimate shelf state.
    pub fn diff(&self, before: &Snapshot, after: &Snapshot) -> Result<DiffOutcome> {
        if before.phase != SnapshotPhase::Before || after.phase != SnapshotPhase::After {
            return Err(Error::Validation(
                "diff requires one BEFORE and one AFTER snapshot".into(),
            ));
        }

        if after.len() > before.len() + 1 {
            return Err(Error::UnexpectedGrowth {
                before: before.len(),
                after: after.len(),
            });
        }

        let removed: BTreeSet<String> = before
            .labels
            .difference(&after.labels)
            .cloned()
            .collect();

        if removed.is_empty() {
            Ok(DiffOutcome::NoChange)
        } else {
            Ok(DiffOutcome::Removed(removed))
        }
    }
}
