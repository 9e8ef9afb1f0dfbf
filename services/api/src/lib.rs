//! PulseX Medical API
//!
//! HTTP front door for two workflows:
//!
//! - **X-ray analysis**: an uploaded image is staged, handed to an external
//!   classifier, and the verdict is returned. The staged copy never outlives
//!   the request.
//! - **ECG storage**: PNG, JPG, JPEG or PDF uploads are streamed into a durable
//!   archive under a collision-resistant name.
//!
//! ## Architecture
//!
//! ```text
//!  POST /api/xray/analyze            POST /api/ecg/upload
//!          │                                  │
//!          ▼                                  ▼
//! ┌──────────────────┐              ┌──────────────────┐
//! │ uploads/         │              │ uploads/ecg/     │
//! │   xray_temp/     │              │   ecg_{ts}_{id}  │
//! └──────────────────┘              └──────────────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │ Classifier       │  (external program, optional)
//! └──────────────────┘
//! ```

pub mod api;
pub mod classifier;
pub mod config;
pub mod error;
pub mod storage;
pub mod uploads;

#[cfg(test)]
mod test_support;

pub use api::{create_router, start_api_server, AppState};
pub use classifier::{
    init_gateway, AnalysisResult, ClassificationError, Classifier, CommandClassifier,
};
pub use config::Config;
pub use error::ApiError;
pub use storage::{StagedFile, StorageError, StoragePaths};
pub use uploads::{AnalysisResponse, FileInfo, UploadResponse};
