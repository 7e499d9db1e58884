//! The processing log: durable per-page status, the single source of truth
//! for resuming an interrupted run.
//!
//! ## On-disk format
//!
//! One JSON object keyed by decimal page index:
//!
//! ```json
//! {
//!   "1": { "status": "processed", "remote_id": "a1b2c3" },
//!   "2": { "status": "submitted", "remote_id": "d4e5f6" }
//! }
//! ```
//!
//! Pages that were never submitted have no entry.
//!
//! ## Crash safety
//!
//! Every mutation is followed by a synchronous [`ProcessingLog::save`] that
//! writes a sibling temp file, fsyncs it, and renames it over the canonical
//! path. A crash at any instant leaves either the previous or the new
//! snapshot on disk, never a mix of the two.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Lifecycle of one work unit. Only ever moves left to right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    /// Not yet uploaded. Never persisted; absence from the log means this.
    Unsubmitted,
    /// Uploaded; the service holds a remote id for it.
    Submitted,
    /// Result downloaded and handed to the sink.
    Processed,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnitStatus::Unsubmitted => "unsubmitted",
            UnitStatus::Submitted => "submitted",
            UnitStatus::Processed => "processed",
        })
    }
}

/// Persisted record for a submitted or processed page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub status: UnitStatus,
    /// Handle assigned by the service at submission. Never changes afterwards.
    #[serde(alias = "doc_id")]
    pub remote_id: String,
}

/// Per-status page counts for a document of known size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LogCounts {
    pub unsubmitted: usize,
    pub submitted: usize,
    pub processed: usize,
}

/// In-memory view of the processing log, bound to its file.
#[derive(Debug, Clone)]
pub struct ProcessingLog {
    path: PathBuf,
    entries: BTreeMap<usize, LogEntry>,
}

impl ProcessingLog {
    /// Load the log at `path`, or start an empty one if the file is absent.
    ///
    /// # Errors
    /// [`PipelineError::CorruptLog`] if the file exists but is not a valid
    /// log. Nothing is repaired or discarded.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let path = path.into();

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No processing log at {}, starting fresh", path.display());
                return Ok(Self {
                    path,
                    entries: BTreeMap::new(),
                });
            }
            Err(e) => return Err(PipelineError::LogIo { path, source: e }),
        };

        let raw: BTreeMap<String, LogEntry> =
            serde_json::from_str(&text).map_err(|e| PipelineError::CorruptLog {
                path: path.clone(),
                detail: e.to_string(),
            })?;

        let mut entries = BTreeMap::new();
        for (key, entry) in raw {
            let page = match key.trim().parse::<usize>() {
                Ok(p) if p >= 1 => p,
                _ => {
                    return Err(PipelineError::CorruptLog {
                        path,
                        detail: format!("key '{key}' is not a page number"),
                    })
                }
            };
            if entry.status == UnitStatus::Unsubmitted {
                return Err(PipelineError::CorruptLog {
                    path,
                    detail: format!("page {page} is recorded as unsubmitted"),
                });
            }
            if entry.remote_id.trim().is_empty() {
                return Err(PipelineError::CorruptLog {
                    path,
                    detail: format!("page {page} has an empty remote id"),
                });
            }
            if entries.insert(page, entry).is_some() {
                return Err(PipelineError::CorruptLog {
                    path,
                    detail: format!("page {page} appears more than once"),
                });
            }
        }

        info!(
            "Loaded processing log {} ({} entries)",
            path.display(),
            entries.len()
        );
        Ok(Self { path, entries })
    }

    /// Path of the canonical log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recorded entry for `page`, `None` when the page is unsubmitted.
    pub fn entry(&self, page: usize) -> Option<&LogEntry> {
        self.entries.get(&page)
    }

    /// Current status of `page`.
    pub fn status(&self, page: usize) -> UnitStatus {
        self.entries
            .get(&page)
            .map(|e| e.status)
            .unwrap_or(UnitStatus::Unsubmitted)
    }

    /// Pages in `1..=total` not yet processed, ascending.
    pub fn pending(&self, total: usize) -> Vec<usize> {
        (1..=total)
            .filter(|p| self.status(*p) != UnitStatus::Processed)
            .collect()
    }

    pub fn counts(&self, total: usize) -> LogCounts {
        let mut counts = LogCounts::default();
        for page in 1..=total {
            match self.status(page) {
                UnitStatus::Unsubmitted => counts.unsubmitted += 1,
                UnitStatus::Submitted => counts.submitted += 1,
                UnitStatus::Processed => counts.processed += 1,
            }
        }
        counts
    }

    /// Highest page index with an entry, if any.
    pub fn highest_index(&self) -> Option<usize> {
        self.entries.keys().next_back().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a successful upload and checkpoint.
    pub fn set_submitted(
        &mut self,
        page: usize,
        remote_id: impl Into<String>,
    ) -> Result<(), PipelineError> {
        let from = self.status(page);
        if from != UnitStatus::Unsubmitted {
            return Err(PipelineError::IllegalTransition {
                page,
                from,
                to: UnitStatus::Submitted,
            });
        }
        let remote_id = remote_id.into();
        if remote_id.trim().is_empty() {
            return Err(PipelineError::Internal(format!(
                "page {page}: refusing to record an empty remote id"
            )));
        }

        self.entries.insert(
            page,
            LogEntry {
                status: UnitStatus::Submitted,
                remote_id,
            },
        );
        self.save().inspect_err(|_| {
            self.entries.remove(&page);
        })
    }

    /// Record a downloaded result and checkpoint.
    pub fn set_processed(&mut self, page: usize) -> Result<(), PipelineError> {
        let from = self.status(page);
        if from != UnitStatus::Submitted {
            return Err(PipelineError::IllegalTransition {
                page,
                from,
                to: UnitStatus::Processed,
            });
        }

        if let Some(entry) = self.entries.get_mut(&page) {
            entry.status = UnitStatus::Processed;
        }
        self.save().inspect_err(|_| {
            if let Some(entry) = self.entries.get_mut(&page) {
                entry.status = UnitStatus::Submitted;
            }
        })
    }

    /// Atomically replace the on-disk log with the in-memory snapshot.
    pub fn save(&self) -> Result<(), PipelineError> {
        let io_err = |source: std::io::Error| PipelineError::LogIo {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(io_err)?;

        let raw: BTreeMap<String, &LogEntry> = self
            .entries
            .iter()
            .map(|(page, entry)| (page.to_string(), entry))
            .collect();
        let json = serde_json::to_vec_pretty(&raw)
            .map_err(|e| PipelineError::Internal(format!("serialising log: {e}")))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".processing_log.")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        debug!("Checkpointed {} log entries", self.entries.len());
        Ok(())
    }
}
