//! Shared logging setup for deskcast binaries.
//!
//! Logs go to stderr and to a size-rotated file under `<home>/logs`, where
//! `<home>` is `$DESKCAST_HOME` or `~/.deskcast`.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "deskcast=info";
const VERBOSE_LOG_FILTER: &str = "deskcast=debug";
const KEEP_LOG_FILES: usize = 5;
const MAX_LOG_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Logging options for a deskcast binary.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Send debug output to stderr regardless of `RUST_LOG`.
    pub verbose: bool,
    /// Overrides `<home>/logs`.
    pub log_dir: Option<PathBuf>,
}

/// Install the global tracing subscriber.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = match config.log_dir {
        Some(dir) => dir,
        None => logs_dir(),
    };
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

    let file_writer = RotatingWriter::open(&log_dir, config.app_name)
        .with_context(|| format!("Failed to open log file in {}", log_dir.display()))?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        EnvFilter::new(VERBOSE_LOG_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    Ok(())
}

/// Deskcast home directory: `$DESKCAST_HOME`, else `~/.deskcast`, else `./.deskcast`.
pub fn deskcast_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("DESKCAST_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".deskcast")
}

/// Default log directory: `<home>/logs`.
pub fn logs_dir() -> PathBuf {
    deskcast_home().join("logs")
}

/// Append-only log file that rolls over to numbered generations once it
/// passes `max_bytes`. `app.log` is current, `app.log.1` the newest
/// archived generation, `app.log.<keep-1>` the oldest.
struct SizeRotatingFile {
    dir: PathBuf,
    stem: String,
    keep: usize,
    max_bytes: u64,
    file: Option<File>,
    written: u64,
}

impl SizeRotatingFile {
    fn open(dir: &Path, app_name: &str, keep: usize, max_bytes: u64) -> io::Result<Self> {
        let mut log = Self {
            dir: dir.to_path_buf(),
            stem: file_stem(app_name),
            keep: keep.max(1),
            max_bytes,
            file: None,
            written: 0,
        };
        log.reopen()?;
        if log.written > log.max_bytes {
            log.roll()?;
        }
        Ok(log)
    }

    fn generation(&self, n: usize) -> PathBuf {
        if n == 0 {
            self.dir.join(format!("{}.log", self.stem))
        } else {
            self.dir.join(format!("{}.log.{}", self.stem, n))
        }
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.generation(0))?;
        self.written = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    fn roll(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }

        if self.keep > 1 {
            let oldest = self.generation(self.keep - 1);
            if oldest.exists() {
                fs::remove_file(&oldest)?;
            }
            for n in (0..self.keep - 1).rev() {
                let from = self.generation(n);
                if from.exists() {
                    fs::rename(&from, self.generation(n + 1))?;
                }
            }
        } else {
            // Single generation: truncate in place.
            File::create(self.generation(0))?;
        }

        self.reopen()
    }
}

impl Write for SizeRotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.roll()?;
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file unavailable"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// `MakeWriter` handing every tracing event the same locked file.
#[derive(Clone)]
struct RotatingWriter {
    inner: Arc<Mutex<SizeRotatingFile>>,
}

impl RotatingWriter {
    fn open(dir: &Path, app_name: &str) -> io::Result<Self> {
        let file = SizeRotatingFile::open(dir, app_name, KEEP_LOG_FILES, MAX_LOG_FILE_BYTES)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RotatingWriter {
    type Writer = RotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?
            .flush()
    }
}

fn file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect();
    if stem.is_empty() {
        "deskcast".to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem_replaces_separators() {
        assert_eq!(file_stem("deskcast"), "deskcast");
        assert_eq!(file_stem("desk cast/../x"), "desk_cast____x");
        assert_eq!(file_stem(""), "deskcast");
    }

    #[test]
    fn test_rolls_over_when_full() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = SizeRotatingFile::open(tmp.path(), "app", 3, 16).unwrap();

        log.write_all(b"0123456789").unwrap();
        log.write_all(b"abcdefghij").unwrap();
        log.write_all(b"ABCDEFGHIJ").unwrap();
        log.flush().unwrap();

        assert_eq!(fs::read(tmp.path().join("app.log")).unwrap(), b"ABCDEFGHIJ");
        assert_eq!(fs::read(tmp.path().join("app.log.1")).unwrap(), b"abcdefghij");
        assert_eq!(fs::read(tmp.path().join("app.log.2")).unwrap(), b"0123456789");
        assert!(!tmp.path().join("app.log.3").exists());
    }

    #[test]
    fn test_oldest_generation_is_discarded() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = SizeRotatingFile::open(tmp.path(), "app", 2, 4).unwrap();

        for chunk in [b"aaaa", b"bbbb", b"cccc"] {
            log.write_all(chunk).unwrap();
        }
        log.flush().unwrap();

        assert_eq!(fs::read(tmp.path().join("app.log")).unwrap(), b"cccc");
        assert_eq!(fs::read(tmp.path().join("app.log.1")).unwrap(), b"bbbb");
        assert!(!tmp.path().join("app.log.2").exists());
    }

    #[test]
    fn test_appends_to_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("app.log"), b"old\n").unwrap();

        let mut log = SizeRotatingFile::open(tmp.path(), "app", 2, 1024).unwrap();
        log.write_all(b"new\n").unwrap();
        log.flush().unwrap();

        assert_eq!(fs::read(tmp.path().join("app.log")).unwrap(), b"old\nnew\n");
    }
}
