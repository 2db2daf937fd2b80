//! HTTP handlers for project upload and artifact download.
//! Streams bodies to avoid buffering uploads in memory and delegates storage
//! concerns to `UploadStore`.

use crate::{
    errors::AppError,
    services::store_service::{StoreError, UploadStore},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Serialize;
use std::io::{self, ErrorKind};
use tokio_util::io::ReaderStream;

/// Multipart form field the client submits the archive under.
const UPLOAD_FIELD: &str = "projectZip";

/// Filename presented to the browser for every downloaded artifact.
const PRESENTED_NAME: &str = "Bol-AI-Project.apk";

const APK_CONTENT_TYPE: &str = "application/vnd.android.package-archive";

/// Success body for `POST /upload`.
#[derive(Debug, Serialize)]
pub struct BuildResponse {
    pub success: bool,
    pub message: String,
    #[serde(rename = "downloadUrl")]
    pub download_url: String,
}

/// `POST /upload` — receive a project archive, validate it, simulate the
/// build, and answer with a one-shot download URL.
///
/// The upload lands on disk before validation; every failure after that
/// point discards the stored file before responding.
pub async fn upload_project(
    State(store): State<UploadStore>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::new(StatusCode::BAD_REQUEST, format!("Upload failed: {}", err)))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let original_name = field.file_name().unwrap_or("project.zip").to_string();
        let stream = field.map(|chunk| chunk.map_err(|err| io::Error::new(ErrorKind::Other, err)));
        upload = Some(store.save_stream(&original_name, stream).await?);
        break;
    }

    let Some(upload) = upload else {
        return Err(AppError::new(StatusCode::BAD_REQUEST, "No file selected!"));
    };

    // an empty field value is "no file" too, not a corrupt archive
    if upload.size_bytes == 0 {
        store.discard(&upload.stored_name).await;
        return Err(AppError::new(StatusCode::BAD_REQUEST, "No file selected!"));
    }

    match store.has_marker_entry(&upload.stored_name).await {
        Ok(true) => {}
        Ok(false) => {
            store.discard(&upload.stored_name).await;
            return Err(AppError::new(
                StatusCode::BAD_REQUEST,
                "Invalid Project: 'index.html' not found inside ZIP!",
            ));
        }
        Err(err) => {
            tracing::error!("could not inspect archive {}: {}", upload.stored_name, err);
            store.discard(&upload.stored_name).await;
            return Err(AppError::internal("Engine Error: Could not process ZIP."));
        }
    }

    // Simulated build step. Suspends only this request.
    tokio::time::sleep(store.build_delay).await;

    Ok(Json(BuildResponse {
        success: true,
        message: "Cyber-Engine Built the APK!".into(),
        download_url: format!("/download/{}", upload.stored_name),
    })
    .into_response())
}

/// `GET /download/{filename}` — stream the stored file once, then delete it.
///
/// The reclaim guard rides inside the body stream, so the stored file is
/// removed when the transfer finishes or the client goes away mid-stream.
/// Rejected tokens and missing files both answer 404: from the client's view
/// the artifact simply expired.
pub async fn download_artifact(
    State(store): State<UploadStore>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    let (size, file, reclaim) = match store.open_download(&filename).await {
        Ok(parts) => parts,
        Err(StoreError::InvalidToken | StoreError::NotFound(_)) => {
            return Ok((StatusCode::NOT_FOUND, "File expired. Build again.").into_response());
        }
        Err(err) => return Err(err.into()),
    };

    let stream = ReaderStream::new(file).map(move |chunk| {
        let _keep_until_body_drops = &reclaim;
        chunk
    });

    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(APK_CONTENT_TYPE),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", PRESENTED_NAME))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&size.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    Ok(response)
}
