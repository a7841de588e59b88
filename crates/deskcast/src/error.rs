//! Error types for the capture pipeline

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that abort a pipeline step and trigger a coarse reset.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Cannot list working directory {path}: {source}")]
    Listing {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot reset working directory {path}: {source}")]
    DirectoryReset {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("No segment changed for {idle:?}, encoder presumed stalled")]
    EncoderStalled { idle: Duration },
}

/// Encoder process errors
#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("Encoder executable '{0}' not found")]
    NotFound(String),

    #[error("Failed to spawn encoder: {0}")]
    Spawn(#[source] io::Error),
}

/// A single failed upload attempt. Never retried.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Segment {0} vanished before it could be read")]
    Superseded(String),

    #[error("Failed to read {name}: {source}")]
    Read {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Endpoint rejected {name} with status {status}: {body}")]
    Rejected {
        name: String,
        status: u16,
        body: String,
    },

    #[error("Transport error uploading {name}: {source}")]
    Transport {
        name: String,
        #[source]
        source: reqwest::Error,
    },
}

impl UploadError {
    /// The segment was rotated away; nothing is wrong with the endpoint.
    pub fn is_superseded(&self) -> bool {
        matches!(self, UploadError::Superseded(_))
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, PipelineError>;
