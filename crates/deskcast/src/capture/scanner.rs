//! Working directory listing
//!
//! The encoder creates and deletes files while we list, so a file that
//! disappears between `read_dir` and `metadata` is skipped for this cycle
//! rather than reported as an error.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// A regular file seen in the working directory during one listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedFile {
    pub name: String,
    pub path: PathBuf,
    pub modified: SystemTime,
    pub len: u64,
}

/// Role of a file in the HLS output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Manifest,
    Segment,
    /// Encoder scratch files such as `index.m3u8.tmp`
    Other,
}

/// Naming scheme shared with the encoder.
#[derive(Debug, Clone)]
pub struct SegmentLayout {
    pub manifest_name: String,
    pub segment_extension: String,
}

impl SegmentLayout {
    pub fn new(manifest_name: impl Into<String>, segment_extension: impl Into<String>) -> Self {
        Self {
            manifest_name: manifest_name.into(),
            segment_extension: segment_extension.into().trim_start_matches('.').to_string(),
        }
    }

    pub fn classify(&self, name: &str) -> FileKind {
        if name == self.manifest_name {
            return FileKind::Manifest;
        }
        match Path::new(name).extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext == self.segment_extension => FileKind::Segment,
            _ => FileKind::Other,
        }
    }
}

impl Default for SegmentLayout {
    fn default() -> Self {
        Self::new("index.m3u8", "ts")
    }
}

/// List the regular files directly inside `dir`, sorted by name.
///
/// Errors only when the directory itself cannot be read.
pub fn list_segment_dir(dir: &Path) -> io::Result<Vec<ListedFile>> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };

        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                warn!(name = ?raw, "Skipping non UTF-8 file name");
                continue;
            }
        };

        let path = entry.path();
        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(file = %name, "File vanished during listing");
                continue;
            }
            Err(e) => {
                warn!(file = %name, error = %e, "Cannot stat file, skipping this cycle");
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(e) => {
                warn!(file = %name, error = %e, "No modification time available");
                continue;
            }
        };

        files.push(ListedFile {
            name,
            path,
            modified,
            len: metadata.len(),
        });
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}
