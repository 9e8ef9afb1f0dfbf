//! Gateway to the external X-ray classifier.
//!
//! The model itself lives outside this service. [`CommandClassifier`] runs it
//! as a child process per request: image bytes go to stdin, a JSON verdict
//! comes back on stdout. Nothing is cached, batched or retried.

use crate::config::ClassifierConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Longest stderr excerpt carried in an error message
const STDERR_EXCERPT_LEN: usize = 512;

/// Errors raised while building or calling the classifier
#[derive(Error, Debug)]
pub enum ClassificationError {
    #[error("Classifier command is not configured")]
    NotConfigured,

    #[error("Model artifact not found: {0}")]
    ModelMissing(PathBuf),

    #[error("Classifier program not found: {0}")]
    ProgramMissing(PathBuf),

    #[error("Failed to run classifier: {0}")]
    Spawn(String),

    #[error("Classifier exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Invalid classifier output: {0}")]
    InvalidOutput(String),
}

/// Classifier verdict, passed through to clients untouched
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AnalysisResult(pub serde_json::Value);

impl AnalysisResult {
    pub fn into_inner(self) -> serde_json::Value {
        self.0
    }
}

/// Image classification capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify one image
    async fn analyze(
        &self,
        image: &[u8],
        filename: &str,
    ) -> Result<AnalysisResult, ClassificationError>;
}

/// Classifier backed by an external program
#[derive(Debug)]
pub struct CommandClassifier {
    program: String,
    args: Vec<String>,
    model_path: Option<PathBuf>,
}

impl CommandClassifier {
    /// Validate the configuration and build the classifier.
    ///
    /// Fails when no command is configured, the model artifact is missing, or
    /// the program is given as a path that does not exist. Bare program names
    /// are resolved through `PATH` at call time.
    pub fn new(config: &ClassifierConfig) -> Result<Self, ClassificationError> {
        let program = config
            .command
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(ClassificationError::NotConfigured)?;

        let program_path = Path::new(program);
        if program_path.components().count() > 1 && !program_path.exists() {
            return Err(ClassificationError::ProgramMissing(program_path.to_path_buf()));
        }

        if let Some(model) = &config.model_path {
            if !model.is_file() {
                return Err(ClassificationError::ModelMissing(model.clone()));
            }
        }

        Ok(Self {
            program: program.to_string(),
            args: config.args.clone(),
            model_path: config.model_path.clone(),
        })
    }

    fn command(&self, filename: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(model) = &self.model_path {
            cmd.arg("--model").arg(model);
        }
        cmd.arg("--filename")
            .arg(filename)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Classifier for CommandClassifier {
    #[instrument(skip(self, image), fields(program = %self.program, size_bytes = image.len()))]
    async fn analyze(
        &self,
        image: &[u8],
        filename: &str,
    ) -> Result<AnalysisResult, ClassificationError> {
        let mut child = self
            .command(filename)
            .spawn()
            .map_err(|e| ClassificationError::Spawn(e.to_string()))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClassificationError::Spawn("stdin not captured".to_string()))?;

        let feed = async move {
            let result = stdin.write_all(image).await;
            drop(stdin);
            result
        };

        // Feed stdin while draining stdout/stderr so neither pipe can fill up
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|e| ClassificationError::Spawn(e.to_string()))?;

        if !output.status.success() {
            let stderr = stderr_excerpt(&output.stderr);
            warn!(status = %output.status, stderr = %stderr, "Classifier failed");
            return Err(ClassificationError::Failed {
                status: output.status.to_string(),
                stderr,
            });
        }

        if let Err(e) = fed {
            return Err(ClassificationError::Spawn(format!(
                "failed to send image to classifier: {e}"
            )));
        }

        let value: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| ClassificationError::InvalidOutput(e.to_string()))?;

        debug!("Classifier returned a verdict");
        Ok(AnalysisResult(value))
    }
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    match text.char_indices().nth(STDERR_EXCERPT_LEN) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Build the classification gateway.
///
/// A classifier that cannot be initialized is logged and left out; the
/// service keeps running with X-ray analysis reported as inactive.
pub fn init_gateway(config: &ClassifierConfig) -> Option<Arc<dyn Classifier>> {
    match CommandClassifier::new(config) {
        Ok(classifier) => {
            info!(program = %classifier.program, "X-ray classifier loaded");
            Some(Arc::new(classifier))
        }
        Err(e) => {
            warn!(error = %e, "X-ray classifier unavailable, analysis disabled");
            None
        }
    }
}
