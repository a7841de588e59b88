//! Pipeline Orchestrator
//!
//! ```text
//! Uninitialized ──wipe dir──▶ DirectoryReset ──start encoder──▶ EncoderStarted ──▶ Scanning ⟲
//!       ▲                           ▲                                                  │
//!       └──── wipe failed ──────────┴──────────── any error: backoff, recover ─────────┘
//! ```
//!
//! The scan loop is the only writer of the [`ChangeTracker`]. Uploads are
//! handed to the [`UploadQueue`] and never awaited, so a slow endpoint can
//! not delay the next listing, and a reset never waits on a hung upload.

use crate::cancel::CancellationToken;
use crate::capture::{
    fingerprint_file, list_segment_dir, ChangeTracker, FileKind, ListedFile, Observation,
    SegmentLayout,
};
use crate::config::DeskcastConfig;
use crate::encoder::Encoder;
use crate::error::{PipelineError, Result};
use crate::upload::{UploadQueue, UploadTask};
use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    DirectoryReset,
    EncoderStarted,
    Scanning,
}

/// Knobs for one pipeline instance.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub working_dir: PathBuf,
    pub layout: SegmentLayout,
    pub poll_interval: Duration,
    pub reset_backoff: Duration,
    /// Reset when no segment changed for this long.
    pub stall_timeout: Option<Duration>,
    /// Delete the working directory's contents on reset. Only safe when the
    /// pipeline owns the encoder.
    pub wipe_on_reset: bool,
}

impl PipelineOptions {
    pub fn from_config(config: &DeskcastConfig, wipe_on_reset: bool) -> Self {
        Self {
            working_dir: config.working_dir.clone(),
            layout: SegmentLayout::new(&config.manifest_name, &config.segment_extension),
            poll_interval: config.poll_interval(),
            reset_backoff: config.reset_backoff(),
            stall_timeout: config.stall_timeout(),
            wipe_on_reset,
        }
    }
}

/// What one scan cycle saw and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub listed: usize,
    pub timestamp_changes: usize,
    pub hash_failures: usize,
    pub pruned: usize,
    /// Names accepted by the upload queue, segments first, manifest last.
    pub submitted: Vec<String>,
    pub dropped: usize,
}

pub struct Pipeline {
    options: PipelineOptions,
    tracker: ChangeTracker,
    queue: UploadQueue,
    encoder: Option<Box<dyn Encoder>>,
    state: PipelineState,
    last_activity: Instant,
    resets: u32,
}

impl Pipeline {
    /// `encoder` is `None` when segments are produced by a separate process.
    pub fn new(
        options: PipelineOptions,
        queue: UploadQueue,
        encoder: Option<Box<dyn Encoder>>,
    ) -> Self {
        Self {
            options,
            tracker: ChangeTracker::new(),
            queue,
            encoder,
            state: PipelineState::Uninitialized,
            last_activity: Instant::now(),
            resets: 0,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Number of coarse resets so far.
    pub fn resets(&self) -> u32 {
        self.resets
    }

    /// Perform one state transition, or one scan cycle once `Scanning`.
    pub fn advance(&mut self) -> Result<PipelineState> {
        match self.state {
            PipelineState::Uninitialized => {
                self.reset_directory()?;
                self.state = PipelineState::DirectoryReset;
            }
            PipelineState::DirectoryReset => {
                if let Some(encoder) = self.encoder.as_mut() {
                    encoder.start(&self.options.working_dir)?;
                }
                self.state = PipelineState::EncoderStarted;
            }
            PipelineState::EncoderStarted => {
                self.reset_tracker();
                self.last_activity = Instant::now();
                self.state = PipelineState::Scanning;
                info!(dir = %self.options.working_dir.display(), "Scanning for segments");
            }
            PipelineState::Scanning => {
                self.scan_cycle()?;
            }
        }
        Ok(self.state)
    }

    /// List, prune, detect changes, and dispatch. Never waits on uploads.
    pub fn scan_cycle(&mut self) -> Result<CycleReport> {
        let dir = &self.options.working_dir;
        let listing = list_segment_dir(dir).map_err(|source| PipelineError::Listing {
            path: dir.clone(),
            source,
        })?;

        let mut report = CycleReport {
            listed: listing.len(),
            ..Default::default()
        };

        let segment_names: BTreeSet<String> = listing
            .iter()
            .filter(|f| self.options.layout.classify(&f.name) == FileKind::Segment)
            .map(|f| f.name.clone())
            .collect();
        report.pruned = self.tracker.prune(&segment_names);

        let mut manifest: Option<&ListedFile> = None;
        let mut active = false;
        for file in &listing {
            match self.options.layout.classify(&file.name) {
                FileKind::Manifest => manifest = Some(file),
                FileKind::Other => {}
                FileKind::Segment => {
                    if self.tracker.observe(&file.name, file.modified) == Observation::Unchanged {
                        continue;
                    }
                    report.timestamp_changes += 1;

                    let Some(hash) = fingerprint_file(&file.path) else {
                        // Not confirmed; look again next cycle even if mtime stays put.
                        self.tracker.invalidate_timestamp(&file.name);
                        report.hash_failures += 1;
                        continue;
                    };
                    active = true;

                    if self.tracker.confirm_content_change(&file.name, hash) {
                        debug!(file = %file.name, hash = %hash.short(), "Content changed");
                    } else {
                        debug!(file = %file.name, "Timestamp moved, content identical");
                    }
                }
            }
        }

        if active {
            self.last_activity = Instant::now();
        }

        let changed = self.tracker.drain_pending();
        if !changed.is_empty() {
            let mut batch: Vec<(String, PathBuf)> = changed
                .into_iter()
                .map(|name| {
                    let path = dir.join(&name);
                    (name, path)
                })
                .collect();
            if let Some(manifest) = manifest {
                batch.push((manifest.name.clone(), manifest.path.clone()));
            }

            for (name, path) in batch {
                if self.queue.submit(UploadTask::new(name.clone(), path)) {
                    report.submitted.push(name);
                } else {
                    report.dropped += 1;
                }
            }
            info!(
                files = ?report.submitted,
                dropped = report.dropped,
                "Dispatched changed segments"
            );
        }

        debug!(
            listed = report.listed,
            timestamp_changes = report.timestamp_changes,
            pruned = report.pruned,
            tracked = self.tracker.tracked_len(),
            "Scan cycle done"
        );

        if let Some(limit) = self.options.stall_timeout {
            let idle = self.last_activity.elapsed();
            if idle > limit {
                return Err(PipelineError::EncoderStalled { idle });
            }
        }

        Ok(report)
    }

    /// Coarse recovery: stop the encoder, reset tracking state, and
    /// recreate the working directory.
    pub fn recover(&mut self) {
        self.resets += 1;
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.stop();
        }
        self.reset_tracker();

        match self.reset_directory() {
            Ok(()) => self.state = PipelineState::DirectoryReset,
            Err(e) => {
                error!(error = %e, "Directory reset failed, will retry");
                self.state = PipelineState::Uninitialized;
            }
        }
        info!(resets = self.resets, state = ?self.state, "Pipeline reset");
    }

    /// Drive the state machine until `cancel` fires. Failures are logged and
    /// followed by a backoff and a full reset; they never end the loop.
    pub fn run(&mut self, cancel: &CancellationToken) {
        info!(
            dir = %self.options.working_dir.display(),
            owns_encoder = self.encoder.is_some(),
            "Pipeline starting"
        );

        while !cancel.is_cancelled() {
            match self.advance() {
                Ok(PipelineState::Scanning) => {
                    if !cancel.sleep(self.options.poll_interval) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        error = %e,
                        state = ?self.state,
                        "Pipeline failure, resetting in {:?}",
                        self.options.reset_backoff
                    );
                    if !cancel.sleep(self.options.reset_backoff) {
                        break;
                    }
                    self.recover();
                }
            }
        }

        if let Some(encoder) = self.encoder.as_mut() {
            encoder.stop();
        }
        info!("Pipeline stopped");
    }

    /// A wiped directory starts from nothing. Files left in place keep
    /// their confirmed hashes, so unchanged bytes are not sent again.
    fn reset_tracker(&mut self) {
        if self.options.wipe_on_reset {
            self.tracker.clear();
        } else {
            self.tracker.forget_timestamps();
        }
    }

    fn reset_directory(&self) -> Result<()> {
        let dir = &self.options.working_dir;
        let to_err = |source: io::Error| PipelineError::DirectoryReset {
            path: dir.clone(),
            source,
        };

        if self.options.wipe_on_reset {
            match std::fs::remove_dir_all(dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(to_err(e)),
            }
        }
        std::fs::create_dir_all(dir).map_err(to_err)?;
        info!(dir = %dir.display(), wiped = self.options.wipe_on_reset, "Working directory ready");
        Ok(())
    }
}
