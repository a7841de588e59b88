//! Configuration for the capture pipeline

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration. Every field has a default, so an empty TOML file is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeskcastConfig {
    /// Directory the encoder writes into and the scanner watches
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Ingestion endpoint receiving one multipart file per POST
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Multipart form field carrying the file
    #[serde(default = "default_form_field")]
    pub form_field: String,

    /// Delay between scan cycles in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Number of concurrent upload workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Upload tasks allowed to wait for a worker before new ones are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Per-request timeout for uploads in seconds
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,

    /// Pause before a full pipeline reset in seconds
    #[serde(default = "default_reset_backoff_secs")]
    pub reset_backoff_secs: u64,

    /// Reset the pipeline when no segment changed for this long (0 disables)
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,

    /// Manifest file name, re-sent with every batch of changed segments
    #[serde(default = "default_manifest_name")]
    pub manifest_name: String,

    /// Extension (without dot) identifying segment files
    #[serde(default = "default_segment_extension")]
    pub segment_extension: String,

    #[serde(default)]
    pub encoder: EncoderConfig,
}

/// Parameters passed through to the external encoder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_input_format")]
    pub input_format: String,
    #[serde(default = "default_input_device")]
    pub input_device: String,
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Target segment length in seconds
    #[serde(default = "default_segment_duration_secs")]
    pub segment_duration_secs: u32,
    /// Segments kept by rolling retention
    #[serde(default = "default_segment_count")]
    pub segment_count: u32,
    #[serde(default = "default_framerate")]
    pub framerate: u32,
    #[serde(default = "default_video_size")]
    pub video_size: String,
    /// printf-style segment file name, relative to the working directory
    #[serde(default = "default_segment_pattern")]
    pub segment_pattern: String,
    /// Where segment numbering starts on each encoder launch
    #[serde(default)]
    pub start_number_source: StartNumberSource,
    /// First segment number when `start_number_source = "fixed"`
    #[serde(default)]
    pub start_number: u64,
}

/// `epoch` numbers segments from the launch time, so names stay unique
/// across encoder restarts. `fixed` counts from `start_number`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartNumberSource {
    #[default]
    Epoch,
    Fixed,
}

fn default_working_dir() -> PathBuf {
    std::env::temp_dir().join("deskcast").join("hls")
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8001/stream_desk/".to_string()
}

fn default_form_field() -> String {
    "file".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

fn default_upload_timeout_secs() -> u64 {
    10
}

fn default_reset_backoff_secs() -> u64 {
    5
}

fn default_stall_timeout_secs() -> u64 {
    30
}

fn default_manifest_name() -> String {
    "index.m3u8".to_string()
}

fn default_segment_extension() -> String {
    "ts".to_string()
}

fn default_program() -> String {
    "ffmpeg".to_string()
}

fn default_input_format() -> String {
    "v4l2".to_string()
}

fn default_input_device() -> String {
    "/dev/video0".to_string()
}

fn default_codec() -> String {
    "libx264".to_string()
}

fn default_preset() -> String {
    "ultrafast".to_string()
}

fn default_segment_duration_secs() -> u32 {
    1
}

fn default_segment_count() -> u32 {
    3
}

fn default_framerate() -> u32 {
    15
}

fn default_video_size() -> String {
    "640x480".to_string()
}

fn default_segment_pattern() -> String {
    "segment%07d.ts".to_string()
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            input_format: default_input_format(),
            input_device: default_input_device(),
            codec: default_codec(),
            preset: default_preset(),
            segment_duration_secs: default_segment_duration_secs(),
            segment_count: default_segment_count(),
            framerate: default_framerate(),
            video_size: default_video_size(),
            segment_pattern: default_segment_pattern(),
            start_number_source: StartNumberSource::default(),
            start_number: 0,
        }
    }
}

impl Default for DeskcastConfig {
    fn default() -> Self {
        Self {
            working_dir: default_working_dir(),
            endpoint: default_endpoint(),
            form_field: default_form_field(),
            poll_interval_ms: default_poll_interval_ms(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            upload_timeout_secs: default_upload_timeout_secs(),
            reset_backoff_secs: default_reset_backoff_secs(),
            stall_timeout_secs: default_stall_timeout_secs(),
            manifest_name: default_manifest_name(),
            segment_extension: default_segment_extension(),
            encoder: EncoderConfig::default(),
        }
    }
}

impl DeskcastConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: DeskcastConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_toml()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Err(ConfigError::Invalid("endpoint is empty".to_string()));
        }
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "endpoint must be an http(s) URL, got '{}'",
                endpoint
            )));
        }
        if self.manifest_name.is_empty() || self.segment_extension.is_empty() {
            return Err(ConfigError::Invalid(
                "manifest_name and segment_extension must be set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn reset_backoff(&self) -> Duration {
        Duration::from_secs(self.reset_backoff_secs)
    }

    pub fn stall_timeout(&self) -> Option<Duration> {
        (self.stall_timeout_secs > 0).then(|| Duration::from_secs(self.stall_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DeskcastConfig::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.manifest_name, "index.m3u8");
        assert_eq!(config.segment_extension, "ts");
        assert_eq!(config.encoder.segment_count, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: DeskcastConfig = toml::from_str("").unwrap();
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.encoder.program, "ffmpeg");
    }

    #[test]
    fn test_partial_file_overrides() {
        let config: DeskcastConfig = toml::from_str(
            r#"
            endpoint = "https://ingest.example.org/stream_desk/"
            poll_interval_ms = 100
            stall_timeout_secs = 0

            [encoder]
            segment_count = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.endpoint, "https://ingest.example.org/stream_desk/");
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.stall_timeout(), None);
        assert_eq!(config.encoder.segment_count, 2);
        assert_eq!(config.encoder.framerate, 15);
        assert_eq!(config.encoder.start_number_source, StartNumberSource::Epoch);
    }

    #[test]
    fn test_fixed_start_number_source() {
        let config: DeskcastConfig = toml::from_str(
            r#"
            [encoder]
            start_number_source = "fixed"
            start_number = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.encoder.start_number_source, StartNumberSource::Fixed);
        assert_eq!(config.encoder.start_number, 7);

        assert!(toml::from_str::<DeskcastConfig>("[encoder]\nstart_number_source = \"boot\"\n").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("conf").join("deskcast.toml");

        let mut config = DeskcastConfig::default();
        config.workers = 2;
        config.encoder.video_size = "1280x720".to_string();
        config.save(&path).unwrap();

        let loaded = DeskcastConfig::load(&path).unwrap();
        assert_eq!(loaded.workers, 2);
        assert_eq!(loaded.encoder.video_size, "1280x720");
        assert_eq!(loaded.working_dir, config.working_dir);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = DeskcastConfig::default();
        config.workers = 0;
        assert!(config.validate().is_err());

        let mut config = DeskcastConfig::default();
        config.endpoint = "ftp://example.org".to_string();
        assert!(config.validate().is_err());

        let mut config = DeskcastConfig::default();
        config.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = DeskcastConfig::default();
        config.queue_capacity = 0;
        assert!(config.validate().is_err());
    }
}
