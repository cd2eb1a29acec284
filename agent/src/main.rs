//! Sensor Simulator Agent
//!
//! Production wiring of the reconciliation core:
//! - Catalog snapshot over HTTP, config changes from Kafka
//! - Measurements to the HTTP archive and the Kafka stream
//! - Introspection endpoint listing running sensors

use anyhow::{Context, Result};
use clap::Parser;
use sensorsim_core::{RuntimeRegistry, Sinks, SyncCoordinator};
use sensorsim_env::TokioContext;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod http;
mod kafka;
mod server;
mod settings;

use http::{HttpArchiveSink, HttpCatalog, ARCHIVE_TIMEOUT, CATALOG_TIMEOUT, CONNECT_TIMEOUT};
use kafka::{KafkaChangeEvents, KafkaMeasurementSink};
use settings::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::parse();

    // RUST_LOG wins over --verbose
    let default_level = if settings.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Sensor Simulator v{}", env!("CARGO_PKG_VERSION"));

    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .context("building HTTP client")?;
    let catalog = HttpCatalog::new(client.clone(), &settings.catalog_url, settings.page_size, CATALOG_TIMEOUT);
    let archive = HttpArchiveSink::new(client, &settings.archiver_url, ARCHIVE_TIMEOUT);
    let stream = KafkaMeasurementSink::new(&settings.kafka_brokers, settings.measurement_topic.clone())
        .context("creating Kafka producer")?;

    let group_id = settings.consumer_group();
    let events = KafkaChangeEvents::new(
        settings.kafka_brokers.clone(),
        settings.config_topic.clone(),
        group_id.clone(),
    );
    info!(
        catalog = %catalog.url(),
        topic = %settings.config_topic,
        group_id = %group_id,
        stream_topic = %stream.topic(),
        "Config sources"
    );

    let registry = RuntimeRegistry::shared(
        TokioContext::shared(),
        Sinks::new(Arc::new(archive), Arc::new(stream)),
    );

    let shutdown = CancellationToken::new();
    let coordinator = SyncCoordinator::new(Arc::clone(&registry), catalog, events);
    let sync_task = tokio::spawn(coordinator.run(shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(settings.listen)
        .await
        .with_context(|| format!("binding {}", settings.listen))?;
    info!(addr = %settings.listen, "Introspection server listening");

    let app = server::router(Arc::clone(&registry));
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => error!(error = %e, "Failed to listen for ctrl-c; shutting down"),
    }
    shutdown.cancel();

    if let Err(e) = sync_task.await {
        error!(error = %e, "Config sync task failed");
    }
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Introspection server failed"),
        Err(e) => error!(error = %e, "Introspection server task failed"),
    }
    registry.shutdown().await;

    info!("Sensor Simulator stopped");
    Ok(())
}
