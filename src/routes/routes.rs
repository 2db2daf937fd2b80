//! Defines routes for the upload/build/download lifecycle.
//!
//! ## Structure
//! - **Build endpoints**
//!   - `POST /upload` — multipart project upload (field `projectZip`)
//!   - `GET  /download/{filename}` — one-shot artifact download
//!
//! - **Probes**
//!   - `GET /healthz` — liveness
//!   - `GET /readyz`  — storage-directory readiness
//!
//! Everything else falls through to the static client UI in `public/`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::{download_artifact, upload_project},
    },
    services::store_service::UploadStore,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::{services::ServeDir, trace::TraceLayer};

/// Headroom over the upload ceiling for multipart boundaries and headers,
/// so the store's own size check fires (with a clean 400) before the body
/// limit does.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build and return the application router.
///
/// The router carries shared state (`UploadStore`) to all handlers; the
/// body limit is derived from the store's configured upload ceiling.
pub fn routes(store: UploadStore) -> Router {
    let body_limit = store.max_upload_bytes as usize + MULTIPART_OVERHEAD;
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // build lifecycle
        .route("/upload", post(upload_project))
        .route("/download/{filename}", get(download_artifact))
        .layer(DefaultBodyLimit::max(body_limit))
        // client UI
        .fallback_service(ServeDir::new("public"))
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}
