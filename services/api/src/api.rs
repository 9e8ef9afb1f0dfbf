use crate::classifier::Classifier;
use crate::config::{ApiConfig, ServiceConfig};
use crate::storage::StoragePaths;
use crate::uploads::{analyze_xray, upload_ecg};
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub const XRAY_ANALYZE_PATH: &str = "/api/xray/analyze";
pub const ECG_UPLOAD_PATH: &str = "/api/ecg/upload";
pub const HEALTH_PATH: &str = "/health";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// X-ray classifier, absent when it failed to initialize
    pub classifier: Option<Arc<dyn Classifier>>,
    pub storage: Arc<StoragePaths>,
    pub service: Arc<ServiceConfig>,
}

impl AppState {
    pub fn new(
        classifier: Option<Arc<dyn Classifier>>,
        storage: StoragePaths,
        service: ServiceConfig,
    ) -> Self {
        Self {
            classifier,
            storage: Arc::new(storage),
            service: Arc::new(service),
        }
    }

    pub fn xray_available(&self) -> bool {
        self.classifier.is_some()
    }
}

/// Root status response
#[derive(Debug, Serialize)]
pub struct ServiceStatus {
    pub service: String,
    pub status: &'static str,
    pub version: String,
    pub endpoints: Vec<&'static str>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Local>,
    pub xray_ai: &'static str,
    /// Local disk storage has no failure mode once started
    pub ecg_storage: &'static str,
}

/// Unmatched route response
#[derive(Debug, Serialize)]
pub struct NotFoundResponse {
    pub error: &'static str,
    pub available: Vec<&'static str>,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/", get(root))
        .route(HEALTH_PATH, get(health_check))
        .route(XRAY_ANALYZE_PATH, post(analyze_xray))
        .route(ECG_UPLOAD_PATH, post(upload_ecg))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Service status endpoint
async fn root(State(state): State<AppState>) -> Json<ServiceStatus> {
    Json(ServiceStatus {
        service: state.service.name.clone(),
        status: "operational",
        version: state.service.version.clone(),
        endpoints: vec![XRAY_ANALYZE_PATH, ECG_UPLOAD_PATH, HEALTH_PATH],
    })
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Local::now(),
        xray_ai: if state.xray_available() { "active" } else { "inactive" },
        ecg_storage: "active",
    })
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(NotFoundResponse {
            error: "Not Found",
            available: vec![XRAY_ANALYZE_PATH, ECG_UPLOAD_PATH],
        }),
    )
}

/// Serve the API until `shutdown` resolves
pub async fn start_api_server<F>(state: AppState, config: &ApiConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state, config);
    let addr = config.listen_addr();

    info!(address = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::MockClassifier;
    use crate::test_support::{json_response, test_router, test_state};
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use tower::ServiceExt;

    async fn get_json(state: AppState, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = test_router(state)
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        json_response(response).await
    }

    #[tokio::test]
    async fn test_root_lists_endpoints() {
        let tmp = tempfile::tempdir().unwrap();
        let (status, body) = get_json(test_state(tmp.path(), None).await, "/").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "PulseX Medical API");
        assert_eq!(body["status"], "operational");
        assert_eq!(body["version"], "2.0.0");
        assert_eq!(
            body["endpoints"],
            serde_json::json!(["/api/xray/analyze", "/api/ecg/upload", "/health"])
        );
    }

    #[tokio::test]
    async fn test_health_reports_inactive_classifier() {
        let tmp = tempfile::tempdir().unwrap();
        let (status, body) = get_json(test_state(tmp.path(), None).await, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["xray_ai"], "inactive");
        assert_eq!(body["ecg_storage"], "active");
        let timestamp = body["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[tokio::test]
    async fn test_health_reports_active_classifier() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path(), Some(Arc::new(MockClassifier::new()))).await;
        let (_, body) = get_json(state, "/health").await;

        assert_eq!(body["xray_ai"], "active");
    }

    #[tokio::test]
    async fn test_unknown_route_returns_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let (status, body) = get_json(test_state(tmp.path(), None).await, "/api/unknown").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Not Found");
        assert_eq!(
            body["available"],
            serde_json::json!(["/api/xray/analyze", "/api/ecg/upload"])
        );
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let tmp = tempfile::tempdir().unwrap();
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri(ECG_UPLOAD_PATH)
            .header(header::ORIGIN, "https://clinic.example")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();

        let response = test_router(test_state(tmp.path(), None).await)
            .oneshot(request)
            .await
            .unwrap();

        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }
}
