//! Shelfwatch Library
//!
//! Dual-sensor checkout recognition for a self-service equipment shelf
//!
//! ## Architecture (10 Components)
//!
//! 1. ConfigStore - File-backed persistence for assignments and templates
//! 2. DeviceArbiter - Camera role ownership (identity / shelf)
//! 3. VisionClient - Vision Provider communication adapter
//! 4. InventoryClient - Inventory Store communication adapter
//! 5. EnrollmentStore - Face templates (embedding samples per identity)
//! 6. IdentityMatcher - Temporal-consensus face matching
//! 7. DetectionDiffEngine - Before/after label diffing
//! 8. ShelfScanner - Scan session over the shelf camera
//! 9. TransactionAssembler - Checkout candidate state machine
//! 10. WebAPI - REST API endpoints
//!
//! ## Design Principles
//!
//! - The Inventory Store owns identities and transactions; this service
//!   only reads the former and writes the latter on commit
//! - Reject unreliable captures instead of guessing
//! - SOLID: Single responsibility per module

pub mod config_store;
pub mod detection_diff;
pub mod device_arbiter;
pub mod enrollment_store;
pub mod identity_matcher;
pub mod inventory_client;
pub mod recognition_loop;
pub mod shelf_scanner;
pub mod transaction_assembler;
pub mod vision_client;
pub mod web_api;
pub mod models;
pub mod error;
pub mod state;

pub use error::{Error, Result};
pub use state::AppState;
