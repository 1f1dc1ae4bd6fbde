//! RecognitionLoop - continuous identity sampling
//!
//! ## Responsibilities
//!
//! - One periodic tick per sampling interval on the identity camera
//! - Absorb provider timeouts and no-face frames as no-detection ticks
//! - Feed confirmed identities into the transaction assembler
//!
//! The loop owns no consensus state of its own; the matcher does. Stopping
//! awaits the spawned task so a restart never samples the old device while
//! a new stream is being acquired.

use crate::device_arbiter::{CameraRole, DeviceArbiter};
use crate::error::Result;
use crate::identity_matcher::{IdentityMatcher, MatchEvent};
use crate::transaction_assembler::TransactionAssembler;
use crate::vision_client::VisionClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;

/// Per-tick embedding supplier for the identity camera
pub trait EmbeddingSource: Send + Sync + 'static {
    fn sample_embedding(
        &self,
        device_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Vec<f32>>>> + Send;
}

impl EmbeddingSource for VisionClient {
    async fn sample_embedding(&self, device_id: &str) -> Result<Option<Vec<f32>>> {
        VisionClient::sample_embedding(self, device_id).await
    }
}

/// RecognitionLoop instance
pub struct RecognitionLoop<S: EmbeddingSource> {
    arbiter: Arc<DeviceArbiter>,
    source: Arc<S>,
    matcher: Arc<IdentityMatcher>,
    assembler: Arc<TransactionAssembler>,
    sample_interval: Duration,
    running: Arc<RwLock<bool>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: EmbeddingSource> RecognitionLoop<S> {
    pub fn new(
        arbiter: Arc<DeviceArbiter>,
        source: Arc<S>,
        matcher: Arc<IdentityMatcher>,
        assembler: Arc<TransactionAssembler>,
        sample_interval: Duration,
    ) -> Self {
        Self {
            arbiter,
            source,
            matcher,
            assembler,
            sample_interval,
            running: Arc::new(RwLock::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Start the sampling loop
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Identity loop already running");
                return;
            }
            *running = true;
        }

        tracing::info!(
            interval_ms = self.sample_interval.as_millis() as u64,
            "Starting identity sampling loop"
        );

        let arbiter = self.arbiter.clone();
        let source = self.source.clone();
        let matcher = self.matcher.clone();
        let assembler = self.assembler.clone();
        let running = self.running.clone();
        let sample_interval = self.sample_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(sample_interval);

            loop {
                ticker.tick().await;

                if !*running.read().await {
                    break;
                }

                let Some(device_id) = arbiter.resolve(CameraRole::Identity).await else {
                    tracing::debug!("No identity camera assigned; skipping tick");
                    continue;
                };

                // Timeouts and provider hiccups count as no-detection ticks;
                // the loop must keep running either way.
                let embedding = match source.sample_embedding(&device_id).await {
                    Ok(embedding) => embedding,
                    Err(e) => {
                        tracing::warn!(
                            device_id = %device_id,
                            error = %e,
                            "Embedding sample failed; treating as no detection"
                        );
                        None
                    }
                };

                match matcher.observe(embedding.as_deref()).await {
                    MatchEvent::Confirmed {
                        identity,
                        confidence,
                        ..
                    } => {
                        assembler.set_identity(identity, confidence).await;
                    }
                    MatchEvent::Tracking {
                        identity_id,
                        streak,
                        distance,
                    } => {
                        tracing::debug!(
                            identity_id = %identity_id,
                            streak = streak,
                            distance = distance,
                            "Identity consensus building"
                        );
                    }
                    MatchEvent::NoMatch | MatchEvent::Suppressed => {}
                }
            }

            tracing::info!("Identity sampling loop stopped");
        });

        *self.task.lock().await = Some(handle);
    }

    /// Stop the loop and wait for the task to finish its current tick.
    ///
    /// After this returns, the old device stream is released; only then may
    /// a caller reassign devices and start a fresh loop.
    pub async fn stop(&self) {
        {
            let mut running = self.running.write().await;
            if !*running {
                return;
            }
            *running = false;
        }
        tracing::info!("Stopping identity sampling loop");

        if let Some(handle) = self.task.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Identity loop task join failed");
            }
        }
    }

    /// Stop, then start again (used after device reassignment)
    pub async fn restart(&self) {
        self.stop().await;
        self.start().await;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::ConfigStore;
    use crate::enrollment_store::EnrollmentStore;
    use crate::identity_matcher::MatcherConfig;
    use crate::models::Identity;
    use crate::transaction_assembler::AssemblerPhase;

    /// Always sees the same face
    struct ConstantFace(Vec<f32>);

    impl EmbeddingSource for ConstantFace {
        async fn sample_embedding(&self, _device_id: &str) -> Result<Option<Vec<f32>>> {
            Ok(Some(self.0.clone()))
        }
    }

    /// Provider that always times out
    struct DeadProvider;

    impl EmbeddingSource for DeadProvider {
        async fn sample_embedding(&self, _device_id: &str) -> Result<Option<Vec<f32>>> {
            Err(crate::error::Error::VisionTimeout("no provider".into()))
        }
    }

    async fn fixture<S: EmbeddingSource>(
        source: S,
    ) -> (
        tempfile::TempDir,
        RecognitionLoop<S>,
        Arc<TransactionAssembler>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(ConfigStore::open(dir.path().to_path_buf()).await.unwrap());
        let arbiter = Arc::new(DeviceArbiter::new(config.clone()).await.unwrap());
        arbiter
            .assign(CameraRole::Identity, "cam-face".into())
            .await
            .unwrap();

        let enrollment = Arc::new(EnrollmentStore::new(config).await.unwrap());
        enrollment
            .add_sample(
                &Identity {
                    id: "e1".into(),
                    display_name: "E1".into(),
                    group: "lab".into(),
                },
                vec![0.0, 0.0],
            )
            .await
            .unwrap();

        let matcher = Arc::new(IdentityMatcher::new(
            enrollment,
            MatcherConfig {
                match_threshold: 0.6,
                consensus_count: 2,
            },
        ));
        let assembler = Arc::new(TransactionAssembler::new());
        let looper = RecognitionLoop::new(
            arbiter,
            Arc::new(source),
            matcher,
            assembler.clone(),
            Duration::from_millis(100),
        );
        (dir, looper, assembler)
    }

    #[tokio::test(start_paused = true)]
    async fn confirmed_identity_reaches_assembler() {
        let (_dir, looper, assembler) = fixture(ConstantFace(vec![0.0, 0.0])).await;
        looper.start().await;

        // Two ticks are needed for consensus
        tokio::time::sleep(Duration::from_millis(350)).await;
        looper.stop().await;

        let view = assembler.candidate().await;
        assert_eq!(view.phase, AssemblerPhase::IdentityKnown);
        assert_eq!(view.identity.unwrap().id, "e1");
    }

    #[tokio::test(start_paused = true)]
    async fn provider_timeouts_keep_loop_alive() {
        let (_dir, looper, assembler) = fixture(DeadProvider).await;
        looper.start().await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(looper.is_running().await);
        assert_eq!(assembler.candidate().await.phase, AssemblerPhase::Empty);
        looper.stop().await;
        assert!(!looper.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_is_stop_then_start() {
        let (_dir, looper, _assembler) = fixture(ConstantFace(vec![0.0, 0.0])).await;
        looper.start().await;
        looper.restart().await;
        assert!(looper.is_running().await);
        looper.stop().await;
    }
}
