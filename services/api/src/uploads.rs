//! Upload handlers for X-ray analysis and ECG archival.

use crate::api::AppState;
use crate::classifier::{AnalysisResult, Classifier};
use crate::error::ApiError;
use crate::storage::{
    archive_filename, is_archivable, normalized_extension, size_in_mb, StagedFile, StoragePaths,
};
use anyhow::Context;
use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::error::Error as _;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Multipart field carrying the uploaded file
pub const FILE_FIELD: &str = "file";

/// X-ray analysis response
#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    pub success: bool,
    pub result: AnalysisResult,
    pub timestamp: DateTime<Local>,
}

/// ECG upload response
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    pub file_info: FileInfo,
}

/// Stored ECG file details
#[derive(Debug, Serialize)]
pub struct FileInfo {
    pub filename: String,
    /// Relative path of the stored file
    pub path: String,
    pub size_mb: f64,
    pub timestamp: DateTime<Local>,
}

/// Binary X-ray analysis: normal vs abnormal
#[instrument(skip_all)]
pub async fn analyze_xray(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let classifier = state
        .classifier
        .clone()
        .ok_or_else(|| ApiError::ServiceUnavailable("X-ray AI not initialized".to_string()))?;

    let mut multipart = multipart.map_err(|e| ApiError::InvalidInput(e.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, ApiError::Analysis))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let is_image = field
            .content_type()
            .map(|ct| ct.to_ascii_lowercase().starts_with("image/"))
            .unwrap_or(false);
        if !is_image {
            metrics::counter!("xray.analyses", "outcome" => "rejected").increment(1);
            return Err(ApiError::InvalidInput("Invalid file type".to_string()));
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let staging_path = state
            .storage
            .staging_path(Uuid::new_v4(), &normalized_extension(&filename));

        let started = Instant::now();
        let outcome = stage_and_analyze(field, staging_path, &*classifier, &filename).await;
        metrics::histogram!("xray.analysis.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        return match outcome {
            Ok(result) => {
                metrics::counter!("xray.analyses", "outcome" => "success").increment(1);
                info!(filename = %filename, "X-ray analyzed");
                Ok(Json(AnalysisResponse {
                    success: true,
                    result,
                    timestamp: Local::now(),
                }))
            }
            Err(e) => {
                metrics::counter!("xray.analyses", "outcome" => "error").increment(1);
                Err(e)
            }
        };
    }

    Err(ApiError::InvalidInput("No file provided".to_string()))
}

/// Read the image, stage it, run the classifier.
///
/// The staged file is gone by the time this returns, whatever the outcome.
async fn stage_and_analyze(
    field: Field<'_>,
    staging_path: PathBuf,
    classifier: &dyn Classifier,
    filename: &str,
) -> Result<AnalysisResult, ApiError> {
    let image = field
        .bytes()
        .await
        .map_err(|e| multipart_error(e, ApiError::Analysis))?;

    let staged = StagedFile::write(staging_path, &image)
        .await
        .map_err(|e| ApiError::Analysis(e.to_string()))?;

    let result = classifier.analyze(&image, filename).await;
    staged.remove().await;

    result.map_err(|e| ApiError::Analysis(e.to_string()))
}

/// Upload an ECG file for storage
#[instrument(skip_all)]
pub async fn upload_ecg(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::InvalidInput(e.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, ApiError::Upload))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        return archive_upload(&state.storage, field).await.map(Json);
    }

    Err(ApiError::InvalidInput("No file provided".to_string()))
}

async fn archive_upload(
    storage: &StoragePaths,
    field: Field<'_>,
) -> Result<UploadResponse, ApiError> {
    let original = field.file_name().unwrap_or_default().to_string();
    let ext = normalized_extension(&original);
    if !is_archivable(&ext) {
        metrics::counter!("ecg.uploads", "outcome" => "rejected").increment(1);
        return Err(ApiError::InvalidInput(
            "Only PNG, JPG, JPEG, PDF allowed".to_string(),
        ));
    }

    let now = Local::now();
    let filename = archive_filename(now, Uuid::new_v4(), &ext);
    let path = storage.archive_path(&filename);

    let size_bytes = match write_field(field, &path).await {
        Ok(size) => size,
        Err(e) => {
            metrics::counter!("ecg.uploads", "outcome" => "error").increment(1);
            discard_partial(&path).await;
            return Err(match e.downcast::<MultipartError>() {
                Ok(e) => multipart_error(e, ApiError::Upload),
                Err(e) => ApiError::Upload(format!("{e:#}")),
            });
        }
    };

    metrics::counter!("ecg.uploads", "outcome" => "stored").increment(1);
    metrics::counter!("ecg.bytes.stored").increment(size_bytes);
    info!(
        original = %original,
        filename = %filename,
        size_bytes = size_bytes,
        "ECG stored"
    );

    Ok(UploadResponse {
        success: true,
        message: "ECG uploaded successfully".to_string(),
        file_info: FileInfo {
            path: storage.public_path(&filename),
            filename,
            size_mb: size_in_mb(size_bytes),
            timestamp: now,
        },
    })
}

/// Stream a multipart field to `path` chunk by chunk, returning the size on disk
async fn write_field(mut field: Field<'_>, path: &Path) -> anyhow::Result<u64> {
    let mut file = fs::File::create(path)
        .await
        .with_context(|| format!("failed to create {}", path.display()))?;

    while let Some(chunk) = field.chunk().await? {
        file.write_all(&chunk)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    file.flush().await.context("failed to flush upload")?;
    drop(file);

    let metadata = fs::metadata(path)
        .await
        .with_context(|| format!("failed to stat {}", path.display()))?;

    debug!(path = %path.display(), size_bytes = metadata.len(), "Upload written");
    Ok(metadata.len())
}

/// Map a body read failure by its own status: 413 past the body limit, 400 for
/// malformed multipart, otherwise `internal` (a 500 of the calling workflow).
fn multipart_error(e: MultipartError, internal: fn(String) -> ApiError) -> ApiError {
    let mut causes: Vec<String> = Vec::new();
    let mut source = e.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if causes.last() != Some(&text) {
            causes.push(text);
        }
        source = cause.source();
    }
    let cause = causes.join(": ");

    match e.status() {
        StatusCode::PAYLOAD_TOO_LARGE => ApiError::PayloadTooLarge(format!(
            "Request body too large: {cause}"
        )),
        status if status.is_client_error() => {
            ApiError::InvalidInput(format!("Failed to read multipart: {cause}"))
        }
        _ => internal(cause),
    }
}

/// Remove what a failed upload left behind
async fn discard_partial(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => warn!(path = %path.display(), "Removed partial upload"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial upload"),
    }
}
