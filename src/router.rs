//! 路由装配：处理器、认证、追踪与 CORS。

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info_span};

use crate::auth::{self, SharedVerifier};
use crate::http::{self as http_util, build_cors_layer};
use crate::locking::LockManager;
use crate::storage::Storage;
use crate::{files, upload, version};

/// Shared state handed to every handler through `Extension` layers.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
    pub verifier: SharedVerifier,
    pub locks: Arc<LockManager>,
    pub cors_origin: String,
}

pub fn build_router(state: AppState) -> Router {
    let mut app = Router::new()
        .route(
            "/upload",
            post(upload::upload_file).layer(DefaultBodyLimit::disable()),
        )
        .route("/files", get(files::list_files))
        .route("/uploads/{name}", get(files::download_file))
        .route("/api/version", get(version::get_version_info))
        .layer(middleware::from_fn(auth::auth_middleware))
        .layer(middleware::from_fn(http_util::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip());
                    let client_ip = http_util::extract_forwarded_ip(request.headers())
                        .or(connect_ip)
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
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(state.storage))
        .layer(Extension(state.verifier))
        .layer(Extension(state.locks));

    if let Some(cors_layer) = build_cors_layer(&state.cors_origin) {
        app = app.layer(cors_layer);
    }

    app
}
