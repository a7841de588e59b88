//! Capture - segment discovery and change detection
//!
//! The scanner lists the working directory, the fingerprinter hashes segment
//! bytes, and the tracker decides which segments still need uploading. All
//! three are driven by the pipeline's scan loop; only the tracker holds state.

pub mod fingerprint;
pub mod scanner;
pub mod tracker;

pub use fingerprint::{fingerprint_file, try_fingerprint_file, ContentHash};
pub use scanner::{list_segment_dir, FileKind, ListedFile, SegmentLayout};
pub use tracker::{ChangeTracker, Observation};
