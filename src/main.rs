//! Upload shelf server binary.
//!
//! Accepts multipart uploads with optional title/description, stores each
//! file next to a `<name>.metadata` JSON sidecar, and lists what is on disk.
//! Every route except `/api/version` requires the `X-API-Key` header.

mod atomic;
mod auth;
mod config;
mod error;
mod files;
mod http;
mod locking;
mod logging;
mod router;
mod storage;
#[cfg(test)]
mod testing;
mod upload;
mod version;

use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

use crate::auth::StaticKeyVerifier;
use crate::config::Args;
use crate::locking::LockManager;
use crate::router::{AppState, build_router};
use crate::storage::Storage;

shadow!(build);

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let storage = Arc::new(Storage::new(PathBuf::from(&args.storage_dir)));
    storage.ensure_root().await?;
    info!(root = ?storage.root_path(), "storage ready");

    let app = build_router(AppState {
        storage,
        verifier: Arc::new(StaticKeyVerifier::new(args.api_key.clone())),
        locks: Arc::new(LockManager::new(Duration::from_secs(args.lock_wait_secs))),
        cors_origin: args.cors_origin.clone(),
    });

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!("🚀 Starting HTTP server at {}", addr);

    tokio::spawn(shutdown_signal(handle.clone()));
    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
