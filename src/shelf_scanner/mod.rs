//! ShelfScanner - before/after scan session
//!
//! ## Responsibilities
//!
//! - Hold the accepted BEFORE snapshot between operator actions
//! - Run capture windows against whichever device holds the shelf role
//! - Feed an accepted removed-set into the transaction assembler
//! - Run the one-call-per-snapshot server round trip
//!
//! A rejected capture (sparse window, unexpected growth) leaves the session
//! unchanged so the operator can retry just the failed step.

use crate::detection_diff::{DetectionDiffEngine, DiffOutcome, LabelSource};
use crate::device_arbiter::{CameraRole, DeviceArbiter};
use crate::error::{Error, Result};
use crate::models::{DetectionLabel, Snapshot, SnapshotPhase};
use crate::transaction_assembler::TransactionAssembler;
use crate::vision_client::VisionClient;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-device label sampling, so scan flows can run against a test double
pub trait LabelProvider: Send + Sync {
    fn sample_labels(
        &self,
        device_id: &str,
    ) -> impl std::future::Future<Output = Result<HashSet<DetectionLabel>>> + Send;
}

impl LabelProvider for VisionClient {
    async fn sample_labels(&self, device_id: &str) -> Result<HashSet<DetectionLabel>> {
        VisionClient::sample_labels(self, device_id).await
    }
}

/// A provider pinned to one device for the duration of a capture
struct BoundSource<'a, P: LabelProvider> {
    provider: &'a P,
    device_id: &'a str,
}

impl<'a, P: LabelProvider> LabelSource for BoundSource<'a, P> {
    async fn sample(&self) -> Result<HashSet<DetectionLabel>> {
        self.provider.sample_labels(self.device_id).await
    }
}

/// Scan session state for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ScanStatus {
    pub has_before: bool,
    pub before_labels: BTreeSet<String>,
    pub last_outcome: Option<DiffOutcome>,
}

/// Server round trip result: both snapshots plus the accepted delta
#[derive(Debug, Clone, Serialize)]
pub struct RoundTripReport {
    pub before_labels: BTreeSet<String>,
    pub after_labels: BTreeSet<String>,
    pub removed_labels: BTreeSet<String>,
}

/// ShelfScanner instance
pub struct ShelfScanner<P: LabelProvider> {
    arbiter: Arc<DeviceArbiter>,
    provider: Arc<P>,
    engine: DetectionDiffEngine,
    assembler: Arc<TransactionAssembler>,
    before: RwLock<Option<Snapshot>>,
    last_outcome: RwLock<Option<DiffOutcome>>,
}

impl<P: LabelProvider> ShelfScanner<P> {
    pub fn new(
        arbiter: Arc<DeviceArbiter>,
        provider: Arc<P>,
        engine: DetectionDiffEngine,
        assembler: Arc<TransactionAssembler>,
    ) -> Self {
        Self {
            arbiter,
            provider,
            engine,
            assembler,
            before: RwLock::new(None),
            last_outcome: RwLock::new(None),
        }
    }

    async fn shelf_device(&self) -> Result<String> {
        self.arbiter
            .resolve(CameraRole::Shelf)
            .await
            .ok_or_else(|| Error::Validation("no shelf camera assigned".into()))
    }

    /// Capture the BEFORE snapshot over a polling window.
    ///
    /// Replaces any previous BEFORE; a rejection keeps the old one.
    pub async fn capture_before(&self) -> Result<Snapshot> {
        let device_id = self.shelf_device().await?;
        let source = BoundSource {
            provider: self.provider.as_ref(),
            device_id: &device_id,
        };
        let snapshot = self
            .engine
            .capture_window(&source, SnapshotPhase::Before)
            .await?;

        tracing::info!(
            device_id = %device_id,
            labels = snapshot.len(),
            "BEFORE snapshot accepted"
        );
        *self.before.write().await = Some(snapshot.clone());
        *self.last_outcome.write().await = None;
        Ok(snapshot)
    }

    /// Capture the AFTER snapshot and diff against the held BEFORE.
    ///
    /// Requires a BEFORE snapshot. An accepted `Removed` outcome is pushed
    /// into the assembler; the BEFORE stays held so the operator can rescan
    /// the AFTER side alone.
    pub async fn capture_after(&self) -> Result<DiffOutcome> {
        let before = self
            .before
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Validation("no BEFORE snapshot - scan the shelf first".into()))?;

        let device_id = self.shelf_device().await?;
        let source = BoundSource {
            provider: self.provider.as_ref(),
            device_id: &device_id,
        };
        let after = self
            .engine
            .capture_window(&source, SnapshotPhase::After)
            .await?;

        let outcome = self.engine.diff(&before, &after)?;
        match &outcome {
            DiffOutcome::Removed(removed) => {
                tracing::info!(device_id = %device_id, items = removed.len(), "Shelf diff accepted");
                self.assembler.set_removed(removed.clone()).await;
            }
            DiffOutcome::NoChange => {
                tracing::info!(device_id = %device_id, "Shelf diff found no change");
            }
        }
        *self.last_outcome.write().await = Some(outcome.clone());
        Ok(outcome)
    }

    /// One-call-per-snapshot round trip with a settle delay in between.
    ///
    /// Used by callers that hand the whole before/after cycle to the
    /// server. Detector failures degrade to empty snapshots; the diff
    /// growth guard still applies.
    pub async fn round_trip(&self) -> Result<RoundTripReport> {
        let device_id = self.shelf_device().await?;
        let source = BoundSource {
            provider: self.provider.as_ref(),
            device_id: &device_id,
        };

        let before = self
            .engine
            .capture_single_shot(&source, SnapshotPhase::Before)
            .await;
        tokio::time::sleep(self.engine.config().settle_delay).await;
        let after = self
            .engine
            .capture_single_shot(&source, SnapshotPhase::After)
            .await;

        let outcome = self.engine.diff(&before, &after)?;
        let removed_labels = match outcome {
            DiffOutcome::Removed(removed) => removed,
            DiffOutcome::NoChange => BTreeSet::new(),
        };

        Ok(RoundTripReport {
            before_labels: before.labels,
            after_labels: after.labels,
            removed_labels,
        })
    }

    /// Drop the held BEFORE and last outcome
    pub async fn reset(&self) {
        *self.before.write().await = None;
        *self.last_outcome.write().await = None;
        tracing::info!("Scan session reset");
    }

    pub async fn status(&self) -> ScanStatus {
        let before = self.before.read().await;
        ScanStatus {
            has_before: before.is_some(),
            before_labels: before
                .as_ref()
                .map(|s| s.labels.clone())
                .unwrap_or_default(),
            last_outcome: self.last_outcome.read().await.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::ConfigStore;
    use crate::detection_diff::DiffConfig;
    use crate::transaction_assembler::AssemblerPhase;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// Replays scripted per-poll label sets regardless of device
    struct ScriptedProvider {
        polls: Mutex<VecDeque<Vec<&'static str>>>,
    }

    impl ScriptedProvider {
        fn new(polls: Vec<Vec<&'static str>>) -> Self {
            Self {
                polls: Mutex::new(polls.into()),
            }
        }
    }

    impl LabelProvider for ScriptedProvider {
        async fn sample_labels(&self, _device_id: &str) -> Result<HashSet<DetectionLabel>> {
            let mut polls = self.polls.lock().await;
            let labels = polls.pop_front().unwrap_or_default();
            Ok(labels
                .into_iter()
                .map(|l| DetectionLabel::new(l, 0.9))
                .collect())
        }
    }

    // Zero-length window: exactly one poll per capture
    fn tight_config() -> DiffConfig {
        DiffConfig {
            min_detections: 2,
            window: Duration::ZERO,
            interval: Duration::from_millis(200),
            settle_delay: Duration::from_millis(2000),
        }
    }

    async fn fixture(
        provider: ScriptedProvider,
    ) -> (
        tempfile::TempDir,
        ShelfScanner<ScriptedProvider>,
        Arc<TransactionAssembler>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(ConfigStore::open(dir.path().to_path_buf()).await.unwrap());
        let arbiter = Arc::new(DeviceArbiter::new(config).await.unwrap());
        arbiter
            .assign(CameraRole::Shelf, "cam-shelf".into())
            .await
            .unwrap();

        let assembler = Arc::new(TransactionAssembler::new());
        let scanner = ShelfScanner::new(
            arbiter,
            Arc::new(provider),
            DetectionDiffEngine::new(tight_config()),
            assembler.clone(),
        );
        (dir, scanner, assembler)
    }

    #[tokio::test(start_paused = true)]
    async fn after_without_before_is_rejected() {
        let (_dir, scanner, _assembler) =
            fixture(ScriptedProvider::new(vec![vec!["A", "B"]])).await;
        let err = scanner.capture_after().await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_diff_feeds_assembler() {
        // One poll per window with the tight config
        let (_dir, scanner, assembler) =
            fixture(ScriptedProvider::new(vec![vec!["A", "B", "C"], vec!["A", "C"]])).await;

        scanner.capture_before().await.unwrap();
        let outcome = scanner.capture_after().await.unwrap();
        let expected: BTreeSet<String> = ["B".to_string()].into();
        assert_eq!(outcome, DiffOutcome::Removed(expected.clone()));

        let view = assembler.candidate().await;
        assert_eq!(view.phase, AssemblerPhase::ItemsKnown);
        assert_eq!(view.removed_labels, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn growth_rejection_keeps_before_for_retry() {
        let (_dir, scanner, assembler) = fixture(ScriptedProvider::new(vec![
            vec!["A", "B"],
            vec!["A", "B", "C", "D"],
            vec!["A", "C"],
        ]))
        .await;

        scanner.capture_before().await.unwrap();
        let err = scanner.capture_after().await.unwrap_err();
        assert!(err.is_retryable_capture());
        assert_eq!(assembler.candidate().await.phase, AssemblerPhase::Empty);

        // BEFORE survives the rejection; the retried AFTER diffs against it
        let status = scanner.status().await;
        assert!(status.has_before);
        assert_eq!(status.before_labels.len(), 2);

        let outcome = scanner.capture_after().await.unwrap();
        let expected: BTreeSet<String> = ["B".to_string()].into();
        assert_eq!(outcome, DiffOutcome::Removed(expected));
    }

    #[tokio::test(start_paused = true)]
    async fn no_change_leaves_assembler_empty() {
        let (_dir, scanner, assembler) =
            fixture(ScriptedProvider::new(vec![vec!["A", "B"], vec!["A", "B"]])).await;

        scanner.capture_before().await.unwrap();
        assert_eq!(scanner.capture_after().await.unwrap(), DiffOutcome::NoChange);
        assert_eq!(assembler.candidate().await.phase, AssemblerPhase::Empty);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_session() {
        let (_dir, scanner, _assembler) =
            fixture(ScriptedProvider::new(vec![vec!["A", "B"]])).await;
        scanner.capture_before().await.unwrap();
        scanner.reset().await;
        let status = scanner.status().await;
        assert!(!status.has_before);
        assert!(status.before_labels.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn round_trip_waits_out_the_settle_delay() {
        let (_dir, scanner, _assembler) =
            fixture(ScriptedProvider::new(vec![vec!["A", "B"], vec!["A"]])).await;

        let started = tokio::time::Instant::now();
        let report = scanner.round_trip().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(2000));

        let expected: BTreeSet<String> = ["B".to_string()].into();
        assert_eq!(report.removed_labels, expected);
        assert_eq!(report.before_labels.len(), 2);
        assert_eq!(report.after_labels.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unassigned_shelf_role_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(ConfigStore::open(dir.path().to_path_buf()).await.unwrap());
        let arbiter = Arc::new(DeviceArbiter::new(config).await.unwrap());
        let scanner = ShelfScanner::new(
            arbiter,
            Arc::new(ScriptedProvider::new(vec![])),
            DetectionDiffEngine::new(tight_config()),
            Arc::new(TransactionAssembler::new()),
        );
        assert!(scanner.capture_before().await.is_err());
    }
}
