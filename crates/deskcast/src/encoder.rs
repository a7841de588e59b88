//! Encoder Supervisor
//!
//! Owns the external encoder process that writes the manifest and rolling
//! segments into the working directory. It does not watch individual
//! segment writes: a dead encoder is noticed by the pipeline as a stall and
//! handled with a full reset.

use crate::config::{EncoderConfig, StartNumberSource};
use crate::error::EncoderError;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long `stop` waits for a graceful exit before killing.
const STOP_GRACE: Duration = Duration::from_millis(500);

/// Something that fills a directory with HLS output.
pub trait Encoder: Send {
    /// Start writing into `dir`. Stops any previous run first.
    fn start(&mut self, dir: &Path) -> Result<(), EncoderError>;

    /// Stop writing. Idempotent.
    fn stop(&mut self);

    fn is_running(&mut self) -> bool;
}

/// Runs `ffmpeg` (or a compatible program) as a detached child process.
pub struct FfmpegEncoder {
    config: EncoderConfig,
    manifest_name: String,
    child: Option<Child>,
    launches: u32,
}

impl FfmpegEncoder {
    pub fn new(config: EncoderConfig, manifest_name: impl Into<String>) -> Self {
        Self {
            config,
            manifest_name: manifest_name.into(),
            child: None,
            launches: 0,
        }
    }

    /// Argument list for an encoder writing into `dir`.
    pub fn args(&self, dir: &Path) -> Vec<String> {
        let c = &self.config;
        let segment_path = dir.join(&c.segment_pattern);
        let manifest_path = dir.join(&self.manifest_name);
        let mut args: Vec<String> = vec![
            "-f".into(),
            c.input_format.clone(),
            "-framerate".into(),
            c.framerate.to_string(),
            "-video_size".into(),
            c.video_size.clone(),
            "-i".into(),
            c.input_device.clone(),
            "-codec:v".into(),
            c.codec.clone(),
            "-preset".into(),
            c.preset.clone(),
            "-f".into(),
            "hls".into(),
            "-hls_time".into(),
            c.segment_duration_secs.to_string(),
            "-hls_list_size".into(),
            c.segment_count.to_string(),
            "-hls_flags".into(),
            "delete_segments+split_by_time".into(),
            "-hls_segment_filename".into(),
            segment_path.to_string_lossy().into_owned(),
        ];
        match c.start_number_source {
            StartNumberSource::Epoch => {
                args.extend(["-hls_start_number_source".to_string(), "epoch".to_string()]);
            }
            StartNumberSource::Fixed => {
                args.extend(["-start_number".to_string(), c.start_number.to_string()]);
            }
        }
        args.extend([
            "-y".to_string(),
            "-loglevel".to_string(),
            "warning".to_string(),
            manifest_path.to_string_lossy().into_owned(),
        ]);
        args
    }

    pub fn command(&self, dir: &Path) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(self.args(dir))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }

    /// Number of successful launches since construction.
    pub fn launches(&self) -> u32 {
        self.launches
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(|c| c.id())
    }

    /// Block until the encoder exits on its own, or until `keep_waiting`
    /// returns false. Used by the encoder-only CLI mode.
    pub fn wait_while(
        &mut self,
        mut keep_waiting: impl FnMut() -> bool,
    ) -> Option<std::process::ExitStatus> {
        while keep_waiting() {
            let child = self.child.as_mut()?;
            match child.try_wait() {
                Ok(Some(status)) => {
                    self.child = None;
                    return Some(status);
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(200)),
                Err(e) => {
                    warn!(error = %e, "Failed to poll encoder process");
                    return None;
                }
            }
        }
        None
    }

    fn launch(&mut self, mut cmd: Command, dir: &Path) -> Result<(), EncoderError> {
        self.stop();

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EncoderError::NotFound(self.config.program.clone())
            } else {
                EncoderError::Spawn(e)
            }
        })?;

        self.launches += 1;
        info!(
            program = %self.config.program,
            pid = child.id(),
            dir = %dir.display(),
            launch = self.launches,
            "Encoder started"
        );
        self.child = Some(child);
        Ok(())
    }
}

impl Encoder for FfmpegEncoder {
    fn start(&mut self, dir: &Path) -> Result<(), EncoderError> {
        self.launch(self.command(dir), dir)
    }

    fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let pid = child.id();

        #[cfg(unix)]
        {
            // SAFETY: plain kill(2) on a pid we spawned and have not reaped.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }

        let deadline = Instant::now() + STOP_GRACE;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(pid, %status, "Encoder exited");
                    return;
                }
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(25));
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(pid, error = %e, "Failed to poll encoder during stop");
                    break;
                }
            }
        }

        if let Err(e) = child.kill() {
            warn!(pid, error = %e, "Failed to kill encoder");
        }
        let _ = child.wait();
        info!(pid, "Encoder killed");
    }

    fn is_running(&mut self) -> bool {
        match self.child.as_mut().map(|c| c.try_wait()) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                warn!(%status, "Encoder exited on its own");
                self.child = None;
                false
            }
            Some(Err(e)) => {
                warn!(error = %e, "Failed to poll encoder");
                self.child = None;
                false
            }
            None => false,
        }
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(|s| s.as_str())
    }

    #[test]
    fn test_args_pass_config_through() {
        let mut config = EncoderConfig::default();
        config.segment_duration_secs = 4;
        config.segment_count = 2;
        config.video_size = "1280x720".to_string();
        let encoder = FfmpegEncoder::new(config, "index.m3u8");

        let dir = PathBuf::from("/var/hls");
        let args = encoder.args(&dir);

        assert_eq!(value_after(&args, "-hls_time"), Some("4"));
        assert_eq!(value_after(&args, "-hls_list_size"), Some("2"));
        assert_eq!(value_after(&args, "-video_size"), Some("1280x720"));
        assert_eq!(value_after(&args, "-i"), Some("/dev/video0"));
        assert_eq!(
            value_after(&args, "-hls_flags"),
            Some("delete_segments+split_by_time")
        );
        assert_eq!(
            value_after(&args, "-hls_segment_filename"),
            Some(dir.join("segment%07d.ts").to_str().unwrap())
        );
        assert_eq!(
            args.last().map(String::as_str),
            Some(dir.join("index.m3u8").to_str().unwrap())
        );
        assert_eq!(value_after(&args, "-hls_start_number_source"), Some("epoch"));
        assert_eq!(value_after(&args, "-start_number"), None);
    }

    #[test]
    fn test_fixed_start_number() {
        let mut config = EncoderConfig::default();
        config.start_number_source = StartNumberSource::Fixed;
        config.start_number = 42;
        let encoder = FfmpegEncoder::new(config, "index.m3u8");

        let args = encoder.args(&PathBuf::from("/var/hls"));
        assert_eq!(value_after(&args, "-start_number"), Some("42"));
        assert_eq!(value_after(&args, "-hls_start_number_source"), None);
        assert!(args.last().map(|a| a.ends_with("index.m3u8")).unwrap_or(false));
    }

    #[test]
    fn test_missing_program_is_reported() {
        let mut config = EncoderConfig::default();
        config.program = "deskcast-no-such-encoder".to_string();
        let mut encoder = FfmpegEncoder::new(config, "index.m3u8");
        let tmp = tempfile::tempdir().unwrap();

        match encoder.start(tmp.path()) {
            Err(EncoderError::NotFound(program)) => assert_eq!(program, "deskcast-no-such-encoder"),
            other => panic!("expected NotFound, got {other:?}"),
        }
        assert!(!encoder.is_running());
        assert_eq!(encoder.launches(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_relaunch_replaces_child() {
        let mut config = EncoderConfig::default();
        config.program = "sleep".to_string();
        let mut encoder = FfmpegEncoder::new(config, "index.m3u8");
        let tmp = tempfile::tempdir().unwrap();

        let sleep_30 = || {
            let mut cmd = Command::new("sleep");
            cmd.arg("30").stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
            cmd
        };

        encoder.launch(sleep_30(), tmp.path()).unwrap();
        assert!(encoder.is_running());
        let first = encoder.pid();

        encoder.launch(sleep_30(), tmp.path()).unwrap();
        assert!(encoder.is_running());
        assert_ne!(first, encoder.pid());
        assert_eq!(encoder.launches(), 2);

        encoder.stop();
        assert!(!encoder.is_running());
        assert_eq!(encoder.pid(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_exited_encoder_is_not_running() {
        let mut encoder = FfmpegEncoder::new(EncoderConfig::default(), "index.m3u8");
        let tmp = tempfile::tempdir().unwrap();

        encoder.launch(Command::new("true"), tmp.path()).unwrap();
        let status = encoder.wait_while(|| true);
        assert!(status.map(|s| s.success()).unwrap_or(false));
        assert!(!encoder.is_running());
    }
}
