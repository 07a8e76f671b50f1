mod api;
mod artifacts;
mod broadcast;
mod config;
mod db;
mod dupes;
mod error;
mod events;
mod faces;
mod logging;
mod ollama;
mod pipeline;
mod scanner;
mod stages;

use anyhow::{Context, Result};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};

use artifacts::ArtifactStore;
use broadcast::ProgressBroadcaster;
use config::Config;
use db::Catalog;
use dupes::DuplicateIndex;
use faces::{CentroidIndex, FaceDetector};
use ollama::OllamaClient;
use pipeline::Supervisor;
use scanner::Scanner;
use stages::geocode::Geocoder;
use stages::StageCtx;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(Config::from_env());
    logging::init(&config.log_level, config.log_dir())?;

    tracing::info!("Starting lumika");
    tracing::info!(photos = %config.photos_path.display(), data = %config.data_dir.display(), "Mounts");

    // A missing photo root is fatal: nothing downstream can work.
    if !config.photos_path.exists() {
        anyhow::bail!(
            "photos directory does not exist: {}",
            config.photos_path.display()
        );
    }

    let catalog = Arc::new(Catalog::open(&config.db_path())?);

    // Crash recovery: rows a dead worker left in flight go back to
    // pending. No filesystem walk happens here.
    let demoted = catalog.demote_in_flight()?;
    if demoted > 0 {
        tracing::info!(demoted, "Recovered interrupted ledger rows");
    }

    let artifacts = Arc::new(ArtifactStore::new(&config)?);
    std::fs::create_dir_all(config.models_dir())?;

    let geocoder = Arc::new(Geocoder::load(&config.places_path()));
    let ollama_client = Arc::new(OllamaClient::new(&config.ollama_url, &config.ollama_model));
    if !ollama_client.enabled() {
        tracing::info!("OLLAMA_URL empty, captioning and tagging disabled");
    }
    let detector = Arc::new(FaceDetector::new(config.models_dir()));

    // Warm the in-memory indexes from persisted state.
    let dupe_index = DuplicateIndex::load(dupes::DEFAULT_THRESHOLD, catalog.all_phashes()?);
    tracing::info!(hashes = dupe_index.len(), "Duplicate index loaded");
    let clusters = CentroidIndex::load(&catalog)?;
    tracing::info!(persons = clusters.person_count(), "Person centroids loaded");

    let ctx = Arc::new(StageCtx {
        catalog: catalog.clone(),
        config: config.clone(),
        artifacts,
        geocoder,
        ollama: ollama_client,
        detector,
        dupes: Arc::new(RwLock::new(dupe_index)),
        clusters: Arc::new(RwLock::new(clusters)),
        cancel: Arc::new(AtomicBool::new(false)),
    });

    let scanner = Arc::new(Scanner::new(catalog.clone(), config.clone()));

    // Startup reconcile only: mark rows whose path vanished. A full walk
    // runs solely on explicit trigger.
    match scanner.reconcile() {
        Ok(marked) if marked > 0 => tracing::info!(marked, "Startup reconcile marked missing files"),
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "Startup reconcile failed"),
    }

    let supervisor = Supervisor::new(ctx, scanner.clone());
    supervisor.start();

    let _watcher = scanner::watcher::spawn(supervisor.clone(), scanner, config.clone());

    let broadcaster = ProgressBroadcaster::new();
    let _ticker = broadcast::spawn_ticker(
        supervisor.clone(),
        broadcaster.clone(),
        supervisor.shutdown.clone(),
    );

    let state = api::AppState {
        catalog,
        config: config.clone(),
        supervisor: supervisor.clone(),
        broadcaster,
    };
    let app = api::router(state);

    let addr = ("0.0.0.0", config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "HTTP server listening");

    axum::serve(listener, app).await?;

    supervisor.halt();
    Ok(())
}
