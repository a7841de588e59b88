//! Deskcast - live HLS segment capture and upload
//!
//! An external encoder writes a manifest plus rolling segments into a
//! working directory. A scan loop detects new or rewritten segments with a
//! timestamp-then-hash check and hands them to a fixed pool of upload
//! workers, which POST each file to an ingestion endpoint.

pub mod cancel;
pub mod capture;
pub mod config;
pub mod encoder;
pub mod error;
pub mod pipeline;
pub mod upload;

pub use cancel::CancellationToken;
pub use capture::{ChangeTracker, ContentHash, FileKind, Observation, SegmentLayout};
pub use config::{DeskcastConfig, EncoderConfig, StartNumberSource};
pub use encoder::{Encoder, FfmpegEncoder};
pub use error::{ConfigError, EncoderError, PipelineError, Result, UploadError};
pub use pipeline::{CycleReport, Pipeline, PipelineOptions, PipelineState};
pub use upload::{
    DispatchStats, DispatcherConfig, HttpUploader, UploadDispatcher, UploadOutcome, UploadQueue,
    UploadReport, UploadTask, Uploader,
};
