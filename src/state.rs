//! Application state
//!
//! Holds all shared components and state

use crate::config_store::ConfigStore;
use crate::detection_diff::DiffConfig;
use crate::device_arbiter::DeviceArbiter;
use crate::enrollment_store::EnrollmentStore;
use crate::identity_matcher::{IdentityMatcher, MatcherConfig};
use crate::inventory_client::InventoryClient;
use crate::recognition_loop::RecognitionLoop;
use crate::shelf_scanner::ShelfScanner;
use crate::transaction_assembler::TransactionAssembler;
use crate::vision_client::VisionClient;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Vision Provider URL
    pub vision_url: String,
    /// Inventory Store URL
    pub inventory_url: String,
    /// Persistence directory (role assignments, face templates)
    pub data_dir: PathBuf,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Identity camera sampling interval (ms)
    pub sample_interval_ms: u64,
    /// Maximum embedding distance for a match
    pub match_threshold: f32,
    /// Consecutive agreeing ticks before confirmation
    pub consensus_count: u32,
    /// Minimum distinct labels for a trusted capture window
    pub min_detections: usize,
    /// Shelf capture window length (ms)
    pub scan_window_ms: u64,
    /// Poll spacing within a capture window (ms)
    pub scan_interval_ms: u64,
    /// Delay between BEFORE and AFTER in the diff round trip (ms)
    pub settle_delay_ms: u64,
    /// Manual-override suppression window (ms)
    pub override_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            vision_url: std::env::var("VISION_URL")
                .unwrap_or_else(|_| "http://localhost:9000".to_string()),
            inventory_url: std::env::var("INVENTORY_URL")
                .unwrap_or_else(|_| "http://localhost:9100".to_string()),
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/var/lib/shelfwatch")),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            sample_interval_ms: env_u64("SAMPLE_INTERVAL_MS", 600),
            match_threshold: std::env::var("MATCH_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.55),
            consensus_count: env_u64("CONSENSUS_COUNT", 2) as u32,
            min_detections: env_u64("MIN_DETECTIONS", 2) as usize,
            scan_window_ms: env_u64("SCAN_WINDOW_MS", 2000),
            scan_interval_ms: env_u64("SCAN_INTERVAL_MS", 200),
            settle_delay_ms: env_u64("SETTLE_DELAY_MS", 2000),
            override_ms: env_u64("OVERRIDE_MS", 5000),
        }
    }
}

impl AppConfig {
    pub fn matcher_config(&self) -> MatcherConfig {
        MatcherConfig {
            match_threshold: self.match_threshold,
            consensus_count: self.consensus_count,
        }
    }

    pub fn diff_config(&self) -> DiffConfig {
        DiffConfig {
            min_detections: self.min_detections,
            window: Duration::from_millis(self.scan_window_ms),
            interval: Duration::from_millis(self.scan_interval_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
        }
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn override_window(&self) -> Duration {
        Duration::from_millis(self.override_ms)
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub config_store: Arc<ConfigStore>,
    pub arbiter: Arc<DeviceArbiter>,
    pub vision: Arc<VisionClient>,
    pub inventory: Arc<InventoryClient>,
    pub enrollment: Arc<EnrollmentStore>,
    pub matcher: Arc<IdentityMatcher>,
    pub assembler: Arc<TransactionAssembler>,
    pub scanner: Arc<ShelfScanner<VisionClient>>,
    pub recognition: Arc<RecognitionLoop<VisionClient>>,
}
