//! File depot server binary.
//!
//! Clients upload files over HTTP; files land in a `YYYY/MM/DD` tree under
//! the storage root and their records live in a single `metadata.json`
//! document next to it. The main entry point builds the Axum router,
//! initializes the storage root and metadata store, and starts the listener.

mod atomic;
mod config;
mod error;
mod etag;
mod files;
mod frontend;
mod health;
mod http;
mod logging;
mod metadata;
mod stats;
mod storage;
mod upload;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span};

use crate::config::Args;
use crate::http::{build_cors_layer, resolve_client_ip};
use crate::metadata::MetadataStore;
use crate::storage::Storage;

shadow!(build);

/// Starts the file depot server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let storage = Arc::new(Storage::new(PathBuf::from(&args.storage_dir)));
    storage.ensure_root().await?;
    let store = Arc::new(MetadataStore::new(storage.metadata_path()));
    store
        .init()
        .await
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    info!(root = ?storage.root_path(), metadata = ?store.path(), "storage ready");

    let mut app = build_app(storage, store, args.max_upload_size);
    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!(
        max_upload_size = args.max_upload_size,
        "🚀 Starting HTTP server at {}",
        addr
    );

    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::select! {
        result = server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

/// Routes, request tracing and shared state.
fn build_app(storage: Arc<Storage>, store: Arc<MetadataStore>, max_upload_size: usize) -> Router {
    Router::new()
        .route("/", get(frontend::index))
        .route("/static/{*path}", get(frontend::serve_static))
        .route("/health", get(health::health))
        .route("/upload", post(upload::upload_file))
        .route("/list", get(files::list_files))
        .route(
            "/files/{filename}",
            get(files::download_file).delete(files::delete_file),
        )
        .route("/delete/{filename}", delete(files::delete_file))
        .route("/stats", get(stats::get_stats))
        .fallback(error::not_found)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_size))
        .layer(middleware::from_fn(error::json_payload_too_large))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip());
                    let client_ip = resolve_client_ip(request.headers(), connect_ip)
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(Extension(storage))
        .layer(Extension(store))
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
