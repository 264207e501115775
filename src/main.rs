//! Song battle backend entrypoint wiring the REST API, the round scheduler, the
//! artifact worker and storage supervision.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "mongo-store")]
use song_battle_back::dao::battle_store::mongodb::{MongoBattleStore, MongoConfig};
use song_battle_back::{
    config::{AppConfig, StorageBackend},
    dao::{
        battle_store::{BattleStore, memory::MemoryBattleStore},
        storage::StorageError,
    },
    routes,
    services::{artifacts, scheduler, storage_supervisor},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let port = config.port();
    let storage = config.storage().clone();
    let generator = artifacts::generator_from_settings(config.artifacts())
        .context("building artifact generator")?;

    let (app_state, channels) = AppState::new(config);

    spawn_storage_supervisor(app_state.clone(), storage);
    tokio::spawn(scheduler::run(app_state.clone(), channels.hints));
    tokio::spawn(artifacts::run_worker(
        app_state.clone(),
        generator,
        channels.artifact_tasks,
    ));

    let app = build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Start the background task that installs the configured battle store and keeps
/// the degraded flag in sync with its health.
fn spawn_storage_supervisor(state: SharedState, backend: StorageBackend) {
    match backend {
        StorageBackend::Memory => {
            info!("using the in-memory battle store; data is lost on restart");
            let store = MemoryBattleStore::new();
            tokio::spawn(storage_supervisor::run(state, move || {
                let store = store.clone();
                async move { Ok::<Arc<dyn BattleStore>, StorageError>(Arc::new(store)) }
            }));
        }
        #[cfg(feature = "mongo-store")]
        StorageBackend::Mongo { uri, database } => {
            info!("using the MongoDB battle store");
            tokio::spawn(storage_supervisor::run(state, move || {
                let uri = uri.clone();
                let database = database.clone();
                async move {
                    let config = MongoConfig::from_uri(&uri, database.as_deref()).await?;
                    let store = MongoBattleStore::connect(config).await?;
                    Ok::<Arc<dyn BattleStore>, StorageError>(Arc::new(store))
                }
            }));
        }
        #[cfg(not(feature = "mongo-store"))]
        StorageBackend::Mongo { .. } => {
            warn!("MongoDB configured but the `mongo-store` feature is disabled; staying degraded");
        }
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
