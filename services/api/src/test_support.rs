//! Helpers shared by the router tests.

use crate::api::{create_router, AppState};
use crate::classifier::Classifier;
use crate::config::{ApiConfig, ServiceConfig, StorageConfig};
use crate::storage::StoragePaths;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use std::path::Path;
use std::sync::Arc;

const BOUNDARY: &str = "pulsex-test-boundary";

/// State rooted at `root` with both upload directories created
pub async fn test_state(root: &Path, classifier: Option<Arc<dyn Classifier>>) -> AppState {
    let storage = StoragePaths::new(&StorageConfig {
        root: root.to_path_buf(),
        ..Default::default()
    });
    storage.ensure_directories().await.unwrap();

    AppState::new(classifier, storage, ServiceConfig::default())
}

pub fn test_router(state: AppState) -> Router {
    test_router_with(state, ApiConfig::default())
}

pub fn test_router_with(state: AppState, config: ApiConfig) -> Router {
    create_router(state, &config)
}

/// Opening boundary and part headers of a single file field
pub fn multipart_head(field: &str, filename: &str, content_type: &str) -> Vec<u8> {
    format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
         Content-Type: {content_type}\r\n\r\n"
    )
    .into_bytes()
}

/// Multipart POST with an arbitrary body, e.g. a stream that fails midway
pub fn multipart_post(uri: &str, body: Body) -> Request<Body> {
    Request::post(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(body)
        .unwrap()
}

/// Single-field multipart POST
pub fn multipart_request(
    uri: &str,
    field: &str,
    filename: &str,
    content_type: &str,
    data: &[u8],
) -> Request<Body> {
    let mut body = multipart_head(field, filename, content_type);
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    multipart_post(uri, Body::from(body))
}

pub async fn json_response(response: Response) -> (StatusCode, serde_json::Value) {
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

pub fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}
