use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use poultry_classifier_rs::config::AppConfig;
use poultry_classifier_rs::model::PlaceholderClassifier;
use poultry_classifier_rs::routes::{build_router, AppState};
use poultry_classifier_rs::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Fails here, before anything is served, when production lacks SECRET_KEY.
    let config = AppConfig::from_env()?;
    telemetry::init(&config)?;

    config.check_model_artifacts();
    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .with_context(|| format!("creating upload folder {}", config.upload_dir.display()))?;

    let addr = config.socket_addr();
    info!(
        profile = ?config.profile,
        upload_dir = %config.upload_dir.display(),
        body_limit_bytes = config.body_limit_bytes,
        "starting poultry classifier"
    );

    let state = Arc::new(AppState::new(config, Arc::new(PlaceholderClassifier)));
    let app = build_router(state);

    info!("Listening on http://{}", addr);
    axum::Server::try_bind(&addr)
        .with_context(|| format!("binding {addr}"))?
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
