//! ArqDrop server binary.
//!
//! A LAN archive drop box: browsers upload compressed archives over
//! HTTP(S), the server validates and streams them to disk under
//! collision-free names, optionally behind a token gate with per-address
//! rate limiting. The main entry point builds the Axum router, configures
//! TLS, and starts HTTP/HTTPS listeners.

mod background;
mod config;
mod error;
mod files;
mod gate;
mod hash;
mod http;
mod ingest;
mod logging;
mod naming;
mod status;
mod storage;
mod tls;
mod upload;
mod validate;

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span};

use crate::config::Args;
use crate::gate::Gate;
use crate::http::{RequestScheme, build_cors_layer};
use crate::storage::Storage;
use crate::upload::UploadConfig;
use crate::validate::{ValidationPolicy, parse_list};

shadow!(build);

/// Starts the ArqDrop server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let storage = Arc::new(Storage::new(PathBuf::from(args.upload_dir.clone())));
    storage.ensure_root().await?;

    let gate = Arc::new(Gate::new(
        args.secret.clone(),
        Duration::from_secs(args.token_ttl_secs),
        Duration::from_secs(args.rate_window_secs),
        args.rate_max_attempts,
    ));
    let upload_config = Arc::new(UploadConfig {
        policy: ValidationPolicy {
            allowed_extensions: parse_list(&args.allowed_extensions),
            allowed_content_types: args.allowed_content_types.as_deref().map(parse_list),
            strict_content_types: args.strict_content_types,
            max_bytes: args.max_upload_size,
        },
        timeout: Duration::from_secs(args.upload_timeout_secs),
    });

    if gate.is_guarded() {
        info!("access gate enabled, uploads require a token");
    } else {
        info!("running open, no authentication required");
    }

    let mut app = Router::new()
        .route(
            "/upload",
            post(upload::upload_archive).layer(DefaultBodyLimit::disable()),
        )
        .route("/auth", post(gate::auth_exchange))
        .route("/files", get(files::list_files))
        .route("/download/{filename}", get(files::download_file))
        .route("/health", get(status::health))
        .route("/status", get(status::server_status))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let forwarded_ip = request
                        .headers()
                        .get("x-forwarded-for")
                        .and_then(|v| v.to_str().ok())
                        .map(|s| s.split(',').next().unwrap_or("").trim().to_string());
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.to_string());
                    let client_ip = forwarded_ip
                        .or(connect_ip)
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(storage))
        .layer(Extension(gate.clone()))
        .layer(Extension(upload_config));

    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let http_addr = SocketAddr::new(host, args.http_port);
    let https_addr = SocketAddr::new(host, args.https_port);
    let tls_config = tls::build_rustls_config(&args, host).await?;
    let handle = Handle::new();

    info!("🚀 Starting HTTP server at {}", http_addr);
    info!("🔒 Starting HTTPS server at {}", https_addr);

    let http_app = app.clone().layer(Extension(RequestScheme::Http));
    let https_app = app.layer(Extension(RequestScheme::Https));

    let http_server = axum_server::bind(http_addr)
        .handle(handle.clone())
        .serve(http_app.into_make_service_with_connect_info::<SocketAddr>());
    let https_server = axum_server::bind_rustls(https_addr, tls_config)
        .handle(handle.clone())
        .serve(https_app.into_make_service_with_connect_info::<SocketAddr>());

    background::spawn_background_tasks(gate);
    tokio::select! {
        result = http_server => result?,
        result = https_server => result?,
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
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
