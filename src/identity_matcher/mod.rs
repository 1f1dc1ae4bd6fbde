//! IdentityMatcher - temporal-consensus face matching
//!
//! ## Responsibilities
//!
//! - Nearest-neighbor classification of one embedding per sampling tick
//! - Temporal consensus: the same identity must match on consecutive ticks
//!   before a `Confirmed` event is emitted
//! - Manual-override suppression window so operator input wins for a
//!   bounded time while the camera keeps sampling
//!
//! `Confirmed` is level-triggered: once consensus is reached, every further
//! agreeing tick re-emits it. Callers de-duplicate if they need one event
//! per checkout.

use crate::enrollment_store::EnrollmentStore;
use crate::models::Identity;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Config-store key for persisted matcher tuning
pub const TUNING_KEY: &str = "matcher_tuning";

/// Matcher tuning, configurable per deployment
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Maximum Euclidean distance for a sample to count as a match
    pub match_threshold: f32,
    /// Consecutive agreeing ticks required before confirmation
    pub consensus_count: u32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.55,
            consensus_count: 2,
        }
    }
}

/// Outcome of one `observe` call
#[derive(Debug, Clone, PartialEq)]
pub enum MatchEvent {
    /// No face, no enrolled samples, or nearest sample beyond the threshold
    NoMatch,
    /// A manual-override window is active; consensus state untouched
    Suppressed,
    /// Matched but consensus not yet reached
    Tracking {
        identity_id: String,
        streak: u32,
        distance: f32,
    },
    /// Consensus reached
    Confirmed {
        identity: Identity,
        confidence: f32,
        distance: f32,
    },
}

/// Transient consensus state, owned exclusively by the matcher
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsensusState {
    pub candidate_identity: Option<String>,
    pub consecutive_matches: u32,
}

/// Publicly visible matcher state (for the status endpoint)
#[derive(Debug, Clone, Serialize)]
pub struct MatcherStatus {
    pub consensus: ConsensusState,
    pub override_active: bool,
    pub config: MatcherConfig,
}

/// IdentityMatcher instance
pub struct IdentityMatcher {
    enrollment: Arc<EnrollmentStore>,
    config: RwLock<MatcherConfig>,
    consensus: RwLock<ConsensusState>,
    override_until: RwLock<Option<Instant>>,
}

impl IdentityMatcher {
    /// Create a matcher over the enrolled templates
    pub fn new(enrollment: Arc<EnrollmentStore>, config: MatcherConfig) -> Self {
        Self {
            enrollment,
            config: RwLock::new(config),
            consensus: RwLock::new(ConsensusState::default()),
            override_until: RwLock::new(None),
        }
    }

    /// Feed the matcher one sampling tick.
    ///
    /// `None` means the tick produced no face (or the provider timed out);
    /// it resets consensus exactly like a beyond-threshold observation.
    pub async fn observe(&self, embedding: Option<&[f32]>) -> MatchEvent {
        // Operator override takes priority over everything, and must leave
        // consensus untouched so sampling resumes cleanly after the deadline.
        if self.override_active().await {
            return MatchEvent::Suppressed;
        }

        let Some(embedding) = embedding else {
            self.reset().await;
            return MatchEvent::NoMatch;
        };

        let config = *self.config.read().await;
        let nearest = self.nearest(embedding).await;

        let Some((identity, distance)) = nearest else {
            self.reset().await;
            return MatchEvent::NoMatch;
        };
        if distance > config.match_threshold {
            self.reset().await;
            return MatchEvent::NoMatch;
        }

        let mut consensus = self.consensus.write().await;
        if consensus.candidate_identity.as_deref() == Some(identity.id.as_str()) {
            consensus.consecutive_matches += 1;
        } else {
            consensus.candidate_identity = Some(identity.id.clone());
            consensus.consecutive_matches = 1;
        }

        if consensus.consecutive_matches >= config.consensus_count {
            tracing::debug!(
                identity_id = %identity.id,
                distance = distance,
                streak = consensus.consecutive_matches,
                "Identity consensus reached"
            );
            MatchEvent::Confirmed {
                identity,
                confidence: 1.0 - distance,
                distance,
            }
        } else {
            MatchEvent::Tracking {
                identity_id: identity.id,
                streak: consensus.consecutive_matches,
                distance,
            }
        }
    }

    /// Suppress camera-driven confirmation until `duration` elapses
    pub async fn override_for(&self, duration: Duration) {
        let mut until = self.override_until.write().await;
        *until = Some(Instant::now() + duration);
        tracing::info!(duration_ms = duration.as_millis() as u64, "Manual override window set");
    }

    /// Clear consensus state (e.g. after a committed checkout)
    pub async fn reset(&self) {
        let mut consensus = self.consensus.write().await;
        *consensus = ConsensusState::default();
    }

    /// Current state snapshot
    pub async fn status(&self) -> MatcherStatus {
        MatcherStatus {
            consensus: self.consensus.read().await.clone(),
            override_active: self.override_active().await,
            config: *self.config.read().await,
        }
    }

    /// Replace the tuning config
    pub async fn set_config(&self, config: MatcherConfig) {
        *self.config.write().await = config;
    }

    async fn override_active(&self) -> bool {
        self.override_until
            .read()
            .await
            .map(|deadline| Instant::now() < deadline)
            .unwrap_or(false)
    }

    /// Minimum distance across every sample of every enrolled identity
    async fn nearest(&self, embedding: &[f32]) -> Option<(Identity, f32)> {
        let templates = self.enrollment.templates().await;
        let mut best: Option<(Identity, f32)> = None;

        for template in templates {
            for sample in &template.samples {
                if sample.len() != embedding.len() {
                    continue;
                }
                let distance = euclidean_distance(embedding, sample);
                if best.as_ref().map(|(_, d)| distance < *d).unwrap_or(true) {
                    best = Some((template.identity.clone(), distance));
                }
            }
        }
        best
    }
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::ConfigStore;

    fn identity(id: &str) -> Identity {
        Identity {
            id: id.to_string(),
            display_name: id.to_uppercase(),
            group: "lab".to_string(),
        }
    }

    async fn matcher_with(
        samples: &[(&str, Vec<f32>)],
        config: MatcherConfig,
    ) -> (tempfile::TempDir, IdentityMatcher) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ConfigStore::open(dir.path().to_path_buf()).await.unwrap());
        let enrollment = Arc::new(EnrollmentStore::new(store).await.unwrap());
        for (id, sample) in samples {
            enrollment.add_sample(&identity(id), sample.clone()).await.unwrap();
        }
        (dir, IdentityMatcher::new(enrollment, config))
    }

    fn test_config() -> MatcherConfig {
        MatcherConfig {
            match_threshold: 0.6,
            consensus_count: 2,
        }
    }

    #[tokio::test]
    async fn beyond_threshold_never_confirms() {
        let (_dir, matcher) =
            matcher_with(&[("e1", vec![0.0, 0.0])], test_config()).await;
        for _ in 0..10 {
            let event = matcher.observe(Some(&[3.0, 4.0])).await; // distance 5.0
            assert_eq!(event, MatchEvent::NoMatch);
        }
    }

    #[tokio::test]
    async fn exact_match_confirms_on_second_tick() {
        let (_dir, matcher) =
            matcher_with(&[("e1", vec![0.25, 0.5])], test_config()).await;

        let first = matcher.observe(Some(&[0.25, 0.5])).await;
        assert_eq!(
            first,
            MatchEvent::Tracking {
                identity_id: "e1".to_string(),
                streak: 1,
                distance: 0.0
            }
        );

        let second = matcher.observe(Some(&[0.25, 0.5])).await;
        match second {
            MatchEvent::Confirmed {
                identity,
                confidence,
                distance,
            } => {
                assert_eq!(identity.id, "e1");
                assert_eq!(distance, 0.0);
                assert_eq!(confidence, 1.0);
            }
            other => panic!("expected Confirmed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn confirmation_is_level_triggered() {
        let (_dir, matcher) =
            matcher_with(&[("e1", vec![0.0, 0.0])], test_config()).await;
        matcher.observe(Some(&[0.0, 0.0])).await;
        matcher.observe(Some(&[0.0, 0.0])).await;
        // Further agreeing ticks keep re-emitting Confirmed
        let again = matcher.observe(Some(&[0.0, 0.0])).await;
        assert!(matches!(again, MatchEvent::Confirmed { .. }));
    }

    #[tokio::test]
    async fn differing_identity_resets_streak_to_one() {
        let (_dir, matcher) = matcher_with(
            &[("e1", vec![0.0, 0.0]), ("e2", vec![10.0, 10.0])],
            test_config(),
        )
        .await;

        matcher.observe(Some(&[0.0, 0.0])).await;
        // Nearest is now e2; streak restarts at 1 for the new candidate
        let event = matcher.observe(Some(&[10.0, 10.0])).await;
        assert_eq!(
            event,
            MatchEvent::Tracking {
                identity_id: "e2".to_string(),
                streak: 1,
                distance: 0.0
            }
        );
    }

    #[tokio::test]
    async fn absence_tick_resets_consensus() {
        let (_dir, matcher) =
            matcher_with(&[("e1", vec![0.0, 0.0])], test_config()).await;
        matcher.observe(Some(&[0.0, 0.0])).await;
        assert_eq!(matcher.observe(None).await, MatchEvent::NoMatch);
        // Streak must restart, so the next tick only tracks
        let event = matcher.observe(Some(&[0.0, 0.0])).await;
        assert!(matches!(event, MatchEvent::Tracking { streak: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn override_suppresses_without_touching_state() {
        let (_dir, matcher) =
            matcher_with(&[("e1", vec![0.0, 0.0])], test_config()).await;
        matcher.observe(Some(&[0.0, 0.0])).await;

        matcher.override_for(Duration::from_secs(5)).await;
        for _ in 0..5 {
            assert_eq!(matcher.observe(Some(&[0.0, 0.0])).await, MatchEvent::Suppressed);
            assert_eq!(matcher.observe(None).await, MatchEvent::Suppressed);
        }
        let status = matcher.status().await;
        assert_eq!(status.consensus.consecutive_matches, 1);
        assert_eq!(status.consensus.candidate_identity.as_deref(), Some("e1"));

        // Past the deadline, consensus resumes from the preserved streak
        tokio::time::advance(Duration::from_secs(6)).await;
        let event = matcher.observe(Some(&[0.0, 0.0])).await;
        assert!(matches!(event, MatchEvent::Confirmed { .. }));
    }

    #[tokio::test]
    async fn no_enrolled_samples_is_no_match() {
        let (_dir, matcher) = matcher_with(&[], test_config()).await;
        assert_eq!(matcher.observe(Some(&[0.1, 0.1])).await, MatchEvent::NoMatch);
    }
}
