//! Shelfwatch - dual-sensor checkout recognition server
//!
//! Main entry point for the shelfwatch application.

use shelfwatch::{
    config_store::ConfigStore,
    detection_diff::DetectionDiffEngine,
    device_arbiter::DeviceArbiter,
    enrollment_store::EnrollmentStore,
    identity_matcher::IdentityMatcher,
    inventory_client::InventoryClient,
    recognition_loop::RecognitionLoop,
    shelf_scanner::ShelfScanner,
    state::{AppConfig, AppState},
    transaction_assembler::TransactionAssembler,
    vision_client::VisionClient,
    web_api, Error,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shelfwatch=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Shelfwatch v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        vision_url = %config.vision_url,
        inventory_url = %config.inventory_url,
        data_dir = %config.data_dir.display(),
        "Configuration loaded"
    );

    // Initialize components
    let config_store = Arc::new(ConfigStore::open(config.data_dir.clone()).await?);
    tracing::info!("ConfigStore initialized");

    let arbiter = Arc::new(DeviceArbiter::new(config_store.clone()).await?);
    tracing::info!("DeviceArbiter initialized");

    let vision = Arc::new(VisionClient::new(config.vision_url.clone()));
    let inventory = Arc::new(InventoryClient::new(config.inventory_url.clone()));

    let enrollment = Arc::new(EnrollmentStore::new(config_store.clone()).await?);

    // Persisted tuning wins over env defaults
    let matcher_config = config_store
        .get(shelfwatch::identity_matcher::TUNING_KEY)
        .await?
        .unwrap_or_else(|| config.matcher_config());
    let matcher = Arc::new(IdentityMatcher::new(enrollment.clone(), matcher_config));
    let assembler = Arc::new(TransactionAssembler::new());

    let scanner = Arc::new(ShelfScanner::new(
        arbiter.clone(),
        vision.clone(),
        DetectionDiffEngine::new(config.diff_config()),
        assembler.clone(),
    ));

    let recognition = Arc::new(RecognitionLoop::new(
        arbiter.clone(),
        vision.clone(),
        matcher.clone(),
        assembler.clone(),
        config.sample_interval(),
    ));

    // Revalidate persisted role assignments against the live device list.
    // A missing provider or too few devices is not fatal at boot; the loop
    // simply has nothing to sample until devices appear and are assigned.
    match vision.list_devices().await {
        Ok(devices) => match arbiter.sync_with_devices(&devices).await {
            Ok(Some(notice)) => {
                tracing::warn!(notice = ?notice, "Camera roles re-assigned at boot")
            }
            Ok(None) => {}
            Err(Error::InsufficientDevices { found }) => {
                tracing::warn!(found = found, "Fewer than two capture devices; roles cleared");
            }
            Err(e) => return Err(e.into()),
        },
        Err(e) => {
            tracing::warn!(error = %e, "Vision provider unreachable at boot; roles not validated");
        }
    }

    // Create application state
    let state = AppState {
        config: config.clone(),
        config_store,
        arbiter,
        vision,
        inventory,
        enrollment,
        matcher,
        assembler,
        scanner,
        recognition: recognition.clone(),
    };

    // Start the identity sampling loop
    recognition.start().await;
    tracing::info!("RecognitionLoop started - identity sampling active");

    // Build the application router
    let app = web_api::create_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
