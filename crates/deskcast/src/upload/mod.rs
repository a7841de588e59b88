//! Upload - best-effort delivery of segments to the ingestion endpoint
//!
//! Uploads are never retried here. A segment that fails is dropped; a newer
//! version of it will be picked up by the scan loop if the encoder rewrites it.

pub mod dispatcher;
pub mod http;

pub use dispatcher::{
    DispatchStats, DispatcherConfig, UploadDispatcher, UploadOutcome, UploadQueue, UploadReport,
};
pub use http::HttpUploader;

use crate::error::UploadError;
use std::future::Future;
use std::path::PathBuf;

/// Snapshot of one file to send. The bytes are read when the attempt
/// starts; if the file is gone by then the attempt is abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    pub name: String,
    pub path: PathBuf,
}

impl UploadTask {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Sends a single file somewhere. One call is one attempt.
pub trait Uploader: Send + Sync + 'static {
    fn upload(&self, task: UploadTask) -> impl Future<Output = Result<(), UploadError>> + Send;
}
