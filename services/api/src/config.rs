use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration for the PulseX API
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Upload directory layout
    #[serde(default)]
    pub storage: StorageConfig,
    /// External X-ray classifier
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name reported by the status endpoint
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Version reported by the status endpoint
    #[serde(default = "default_version")]
    pub version: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Expose Prometheus metrics
    #[serde(default)]
    pub metrics_enabled: bool,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum accepted request body in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Upload directory layout
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root upload directory, relative to the working directory unless absolute
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// Durable ECG archive, under `root`
    #[serde(default = "default_archive_subdir")]
    pub archive_subdir: String,
    /// Transient X-ray staging area, under `root`
    #[serde(default = "default_staging_subdir")]
    pub staging_subdir: String,
    /// Relative prefix of archive paths reported to clients
    #[serde(default = "default_public_prefix")]
    pub public_prefix: String,
}

/// External classifier configuration.
///
/// The classifier is a program that reads image bytes on stdin and prints a
/// JSON verdict on stdout. Leaving `command` unset disables X-ray analysis.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClassifierConfig {
    /// Program to spawn for each analysis
    pub command: Option<String>,
    /// Extra arguments passed before the per-request flags
    #[serde(default)]
    pub args: Vec<String>,
    /// Model artifact that must exist at startup
    pub model_path: Option<PathBuf>,
}

// Default value functions
fn default_service_name() -> String {
    "PulseX Medical API".to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8000
}

fn default_true() -> bool {
    true
}

fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024 // 50MB
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_archive_subdir() -> String {
    "ecg".to_string()
}

fn default_staging_subdir() -> String {
    "xray_temp".to_string()
}

fn default_public_prefix() -> String {
    "uploads".to_string()
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Add config file if present
            .add_source(config::File::with_name("config/pulsex").required(false))
            .add_source(config::File::with_name("/etc/pulsex/api").required(false))
            // Override with environment variables
            // PULSEX__CLASSIFIER__COMMAND -> classifier.command
            .add_source(
                config::Environment::with_prefix("PULSEX")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("classifier.args")
                    .with_list_parse_key("api.cors_origins")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }
}

impl ApiConfig {
    /// Socket address the API binds to
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            version: default_version(),
            log_level: default_log_level(),
            metrics_enabled: false,
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            archive_subdir: default_archive_subdir(),
            staging_subdir: default_staging_subdir(),
            public_prefix: default_public_prefix(),
        }
    }
}
