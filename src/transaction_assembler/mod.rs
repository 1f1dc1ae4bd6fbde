//! TransactionAssembler - checkout candidate state machine
//!
//! ## Responsibilities
//!
//! - Combine a confirmed identity and a confirmed removed-set into one
//!   checkout candidate (either may arrive first)
//! - Allow operator corrections (label edits, identity override) until commit
//! - Write through to the Inventory Store exactly once, or not at all
//!
//! Phases: Empty -> IdentityKnown / ItemsKnown -> Ready -> Committed.
//! Commit destroys the candidate; cancel is valid from any non-terminal
//! phase and discards it.

use crate::error::{Error, Result};
use crate::inventory_client::InventoryClient;
use crate::models::Identity;
use serde::Serialize;
use std::collections::BTreeSet;
use tokio::sync::RwLock;

/// Where the candidate currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblerPhase {
    Empty,
    IdentityKnown,
    ItemsKnown,
    Ready,
}

/// Write-through target for committed checkouts
pub trait CheckoutSink {
    fn record_checkout(
        &self,
        identity_id: &str,
        removed_labels: &BTreeSet<String>,
        note: Option<&str>,
    ) -> impl std::future::Future<Output = Result<String>> + Send;
}

impl CheckoutSink for InventoryClient {
    async fn record_checkout(
        &self,
        identity_id: &str,
        removed_labels: &BTreeSet<String>,
        note: Option<&str>,
    ) -> Result<String> {
        InventoryClient::record_checkout(self, identity_id, removed_labels, note).await
    }
}

#[derive(Debug, Default)]
struct CandidateInner {
    identity: Option<Identity>,
    confidence: Option<f32>,
    removed: BTreeSet<String>,
    note: Option<String>,
    last_transaction_id: Option<String>,
}

impl CandidateInner {
    fn phase(&self) -> AssemblerPhase {
        match (self.identity.is_some(), !self.removed.is_empty()) {
            (true, true) => AssemblerPhase::Ready,
            (true, false) => AssemblerPhase::IdentityKnown,
            (false, true) => AssemblerPhase::ItemsKnown,
            (false, false) => AssemblerPhase::Empty,
        }
    }
}

/// Candidate snapshot for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct CandidateView {
    pub phase: AssemblerPhase,
    pub identity: Option<Identity>,
    pub confidence: Option<f32>,
    pub removed_labels: BTreeSet<String>,
    pub note: Option<String>,
    pub last_transaction_id: Option<String>,
}

/// TransactionAssembler instance
pub struct TransactionAssembler {
    inner: RwLock<CandidateInner>,
}

impl TransactionAssembler {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CandidateInner::default()),
        }
    }

    /// Accept a confirmed identity. Idempotent: the matcher's `Confirmed`
    /// event is level-triggered and may repeat every tick.
    pub async fn set_identity(&self, identity: Identity, confidence: f32) {
        let mut inner = self.inner.write().await;
        if inner.identity.as_ref() == Some(&identity) {
            return;
        }
        tracing::info!(
            identity_id = %identity.id,
            confidence = confidence,
            "Checkout identity set"
        );
        inner.identity = Some(identity);
        inner.confidence = Some(confidence);
    }

    /// Operator picked an identity by hand; replaces any camera-confirmed one
    pub async fn override_identity(&self, identity: Identity) {
        let mut inner = self.inner.write().await;
        tracing::info!(identity_id = %identity.id, "Checkout identity overridden manually");
        inner.identity = Some(identity);
        inner.confidence = None;
    }

    /// Accept a confirmed removed-set from the diff engine
    pub async fn set_removed(&self, removed: BTreeSet<String>) {
        let mut inner = self.inner.write().await;
        tracing::info!(items = removed.len(), "Checkout removed-set set");
        inner.removed = removed;
    }

    /// Operator adds a label the detector missed
    pub async fn add_label(&self, label: String) {
        self.inner.write().await.removed.insert(label);
    }

    /// Operator strikes a label the detector got wrong
    pub async fn remove_label(&self, label: &str) {
        self.inner.write().await.removed.remove(label);
    }

    pub async fn set_note(&self, note: Option<String>) {
        self.inner.write().await.note = note;
    }

    /// Current candidate snapshot
    pub async fn candidate(&self) -> CandidateView {
        let inner = self.inner.read().await;
        CandidateView {
            phase: inner.phase(),
            identity: inner.identity.clone(),
            confidence: inner.confidence,
            removed_labels: inner.removed.clone(),
            note: inner.note.clone(),
            last_transaction_id: inner.last_transaction_id.clone(),
        }
    }

    /// Discard the candidate
    pub async fn cancel(&self) {
        let mut inner = self.inner.write().await;
        let last = inner.last_transaction_id.take();
        *inner = CandidateInner {
            last_transaction_id: last,
            ..CandidateInner::default()
        };
        tracing::info!("Checkout candidate cancelled");
    }

    /// Write the candidate through to the Inventory Store.
    ///
    /// Fails with `IncompleteCandidate` unless both an identity and a
    /// non-empty removed-set are present. A store failure leaves the
    /// candidate intact for retry; success destroys it.
    pub async fn commit<S: CheckoutSink>(&self, sink: &S) -> Result<String> {
        let mut inner = self.inner.write().await;

        let Some(identity) = inner.identity.clone() else {
            return Err(Error::IncompleteCandidate(
                "no confirmed identity - redo the face capture or pick one manually".into(),
            ));
        };
        if inner.removed.is_empty() {
            return Err(Error::IncompleteCandidate(
                "no removed items - redo the shelf scan".into(),
            ));
        }

        let transaction_id = sink
            .record_checkout(&identity.id, &inner.removed, inner.note.as_deref())
            .await?;

        tracing::info!(
            identity_id = %identity.id,
            transaction_id = %transaction_id,
            "Checkout committed"
        );

        *inner = CandidateInner {
            last_transaction_id: Some(transaction_id.clone()),
            ..CandidateInner::default()
        };
        Ok(transaction_id)
    }
}

impl Default for TransactionAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn identity(id: &str) -> Identity {
        Identity {
            id: id.to_string(),
            display_name: id.to_uppercase(),
            group: "lab".to_string(),
        }
    }

    fn labels(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    /// Counts writes; optionally fails every call
    struct FakeSink {
        fail: bool,
        writes: AtomicUsize,
    }

    impl FakeSink {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                writes: AtomicUsize::new(0),
            }
        }
    }

    impl CheckoutSink for FakeSink {
        async fn record_checkout(
            &self,
            _identity_id: &str,
            _removed_labels: &BTreeSet<String>,
            _note: Option<&str>,
        ) -> Result<String> {
            if self.fail {
                return Err(Error::Inventory("store down".into()));
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok("txn-1".to_string())
        }
    }

    #[tokio::test]
    async fn both_orderings_reach_ready() {
        // Identity first
        let assembler = TransactionAssembler::new();
        assembler.set_identity(identity("e1"), 0.9).await;
        assert_eq!(assembler.candidate().await.phase, AssemblerPhase::IdentityKnown);
        assembler.set_removed(labels(&["ITEM_01"])).await;
        assert_eq!(assembler.candidate().await.phase, AssemblerPhase::Ready);

        // Items first
        let assembler = TransactionAssembler::new();
        assembler.set_removed(labels(&["ITEM_01"])).await;
        assert_eq!(assembler.candidate().await.phase, AssemblerPhase::ItemsKnown);
        assembler.set_identity(identity("e1"), 0.9).await;
        assert_eq!(assembler.candidate().await.phase, AssemblerPhase::Ready);
    }

    #[tokio::test]
    async fn commit_without_identity_fails_and_preserves_items() {
        let assembler = TransactionAssembler::new();
        assembler.set_removed(labels(&["ITEM_01"])).await;

        let sink = FakeSink::new(false);
        let err = assembler.commit(&sink).await.unwrap_err();
        assert!(matches!(err, Error::IncompleteCandidate(_)));
        assert_eq!(sink.writes.load(Ordering::SeqCst), 0);
        assert_eq!(assembler.candidate().await.removed_labels, labels(&["ITEM_01"]));
    }

    #[tokio::test]
    async fn commit_with_empty_removed_set_fails() {
        let assembler = TransactionAssembler::new();
        assembler.set_identity(identity("e1"), 1.0).await;
        assembler.add_label("ITEM_01".into()).await;
        assembler.remove_label("ITEM_01").await;

        let sink = FakeSink::new(false);
        assert!(assembler.commit(&sink).await.is_err());
        assert_eq!(sink.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn store_failure_keeps_candidate_for_retry() {
        let assembler = TransactionAssembler::new();
        assembler.set_identity(identity("e1"), 1.0).await;
        assembler.set_removed(labels(&["ITEM_01", "ITEM_02"])).await;

        let failing = FakeSink::new(true);
        assert!(assembler.commit(&failing).await.is_err());

        // Candidate intact; a retry against a healthy store succeeds
        let view = assembler.candidate().await;
        assert_eq!(view.phase, AssemblerPhase::Ready);
        assert_eq!(view.removed_labels.len(), 2);

        let sink = FakeSink::new(false);
        let txn = assembler.commit(&sink).await.unwrap();
        assert_eq!(txn, "txn-1");
    }

    #[tokio::test]
    async fn commit_destroys_candidate() {
        let assembler = TransactionAssembler::new();
        assembler.set_identity(identity("e1"), 1.0).await;
        assembler.set_removed(labels(&["ITEM_01"])).await;
        assembler.set_note(Some("spare".into())).await;

        let sink = FakeSink::new(false);
        assembler.commit(&sink).await.unwrap();

        let view = assembler.candidate().await;
        assert_eq!(view.phase, AssemblerPhase::Empty);
        assert!(view.identity.is_none());
        assert!(view.removed_labels.is_empty());
        assert!(view.note.is_none());
        assert_eq!(view.last_transaction_id.as_deref(), Some("txn-1"));
    }

    #[tokio::test]
    async fn manual_edits_adjust_removed_set() {
        let assembler = TransactionAssembler::new();
        assembler.set_removed(labels(&["ITEM_01", "ITEM_02"])).await;
        assembler.remove_label("ITEM_02").await;
        assembler.add_label("ITEM_03".into()).await;
        assert_eq!(
            assembler.candidate().await.removed_labels,
            labels(&["ITEM_01", "ITEM_03"])
        );
    }

    #[tokio::test]
    async fn cancel_discards_candidate() {
        let assembler = TransactionAssembler::new();
        assembler.set_identity(identity("e1"), 1.0).await;
        assembler.set_removed(labels(&["ITEM_01"])).await;
        assembler.cancel().await;
        assert_eq!(assembler.candidate().await.phase, AssemblerPhase::Empty);
    }
}
