//! BLAKE3 content fingerprints for segment files

use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;
use tracing::warn;

/// Fixed-length digest of a file's full contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(blake3::Hash);

impl ContentHash {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> String {
        let hex = self.0.to_hex();
        hex.as_str()[..12].to_string()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_hex())
    }
}

/// Hash the current contents of `path`, however large it has grown.
pub fn try_fingerprint_file(path: &Path) -> io::Result<ContentHash> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(ContentHash(hasher.finalize()))
}

/// Like [`try_fingerprint_file`], but a vanished or unreadable file is
/// logged and reported as `None` so the caller can retry next cycle.
pub fn fingerprint_file(path: &Path) -> Option<ContentHash> {
    match try_fingerprint_file(path) {
        Ok(hash) => Some(hash),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(file = %path.display(), "File vanished before it could be hashed");
            None
        }
        Err(e) => {
            warn!(file = %path.display(), error = %e, "Failed to hash file");
            None
        }
    }
}
