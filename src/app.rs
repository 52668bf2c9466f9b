//! Router assembly: pages, upload endpoint, upload folder and static assets.

use axum::extract::connect_info::ConnectInfo;
use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::{Request, StatusCode};
use axum::routing::{get, get_service};
use axum::{Router, middleware};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info_span};

use crate::files;
use crate::http::{self, ClientAddr};
use crate::pages::{INDEX_PAGE, UPLOAD_PAGE};
use crate::storage::Storage;
use crate::upload;

/// Directories served next to the upload folder.
#[derive(Clone, Debug)]
pub struct SitePaths {
    pub www_dir: PathBuf,
    pub static_dir: PathBuf,
}

pub fn build_router(storage: Arc<Storage>, paths: &SitePaths) -> Router {
    let body_limit = usize::try_from(storage.limits().max_multipart_bytes).unwrap_or(usize::MAX);

    Router::new()
        .route(
            "/",
            get_service(ServeFile::new(paths.www_dir.join(INDEX_PAGE))),
        )
        .route(
            "/upload",
            get_service(ServeFile::new(paths.www_dir.join(UPLOAD_PAGE)))
                .post(upload::upload_file)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/uploads", get(files::list_uploads))
        .route("/uploads/", get(files::list_uploads))
        .route("/uploads/{*path}", get(files::serve_upload))
        .nest_service("/static", ServeDir::new(&paths.static_dir))
        .fallback(not_found)
        .layer(middleware::from_fn(http::log_requests))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_addr = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| *addr);
                    let client = ClientAddr::resolve(request.headers(), connect_addr);

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client = %client,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(storage))
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "404 page not found")
}
