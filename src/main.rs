//! Simple file server binary.
//!
//! Serves a small file drop: static pages, a multipart upload form guarded by
//! a disk quota and per-file limit, and a plain listing of uploaded files.
//! The main entry point bootstraps settings, prepares the upload folder and
//! starts the HTTP listener.

mod app;
mod atomic;
mod config;
mod error;
mod files;
mod http;
mod logging;
mod pages;
mod settings;
mod storage;
mod upload;
mod usage;

use axum_server::Handle;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

use crate::app::{SitePaths, build_router};
use crate::config::{Args, SHUTDOWN_GRACE_SECS};
use crate::settings::{Startup, bootstrap};
use crate::storage::Storage;

/// Starts the file server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let args = Args::parse();
    let log_dir = (!args.no_log_files).then(|| Path::new(&args.log_dir));
    logging::init_logging(log_dir);

    let paths = SitePaths {
        www_dir: PathBuf::from(&args.www_dir),
        static_dir: PathBuf::from(&args.static_dir),
    };
    pages::ensure_default_pages(&paths.www_dir).await?;

    info!("Loading settings ...");
    let settings_path = PathBuf::from(&args.settings);
    let settings = match bootstrap(&settings_path)
        .await
        .map_err(|err| std::io::Error::other(err.to_string()))?
    {
        Startup::Loaded(settings) => settings,
        Startup::WroteDefaults(path) => {
            info!(
                path = ?path,
                "written default settings, review them and start the server again"
            );
            return Ok(());
        }
    };
    let limits = settings
        .limits()
        .map_err(|err| std::io::Error::other(err.to_string()))?;

    info!("Initializing server ...");
    let storage = Arc::new(Storage::open(PathBuf::from(&settings.folder_path), limits).await?);
    info!(
        folder = settings.folder_path,
        space_used = storage.space_used().await,
        size_limit = storage.limits().size_limit_bytes,
        single_file_size_limit = storage.limits().single_file_size_limit_bytes,
        read_only = settings.read_only,
        "upload folder ready"
    );

    let app = build_router(storage, &paths);

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let http_addr = SocketAddr::new(host, args.http_port);
    let handle = Handle::new();

    info!("Starting HTTP server at {}", http_addr);

    let http_server = axum_server::bind(http_addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::select! {
        result = http_server => result?,
        _ = shutdown_signal(handle) => {}
    }

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
    handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
}
