//! Result sinks: receive each page's downloaded extraction output.
//!
//! Pages may arrive in any order. The driver only marks a page `processed`
//! after [`ResultSink::accept`] returns `Ok`, so a sink must not report
//! success before the result is durably stored.

use crate::error::PipelineError;
use crate::pipeline::source::page_file_name;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

pub trait ResultSink: Send + Sync {
    /// Store the result for `page` (1-based). Accepting the same page twice
    /// overwrites the earlier result.
    fn accept(&self, page: usize, result: &[u8]) -> Result<(), PipelineError>;
}

/// Writes `page_000001.json`, `page_000002.json`, … into a directory.
///
/// Each file is written to a temp sibling and renamed into place, so a
/// crash never leaves a truncated result behind.
#[derive(Debug, Clone)]
pub struct DirectoryResultSink {
    dir: PathBuf,
}

impl DirectoryResultSink {
    /// Create the directory if needed.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            PipelineError::InvalidConfig(format!(
                "cannot create output directory '{}': {e}",
                dir.display()
            ))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a page's result is written to.
    pub fn path_for(&self, page: usize) -> PathBuf {
        self.dir.join(page_file_name(page, "json"))
    }
}

impl ResultSink for DirectoryResultSink {
    fn accept(&self, page: usize, result: &[u8]) -> Result<(), PipelineError> {
        let path = self.path_for(page);
        let failed = |e: std::io::Error| PipelineError::SinkFailed {
            page,
            detail: format!("{}: {e}", path.display()),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(failed)?;
        tmp.write_all(result).map_err(failed)?;
        tmp.as_file().sync_all().map_err(failed)?;
        tmp.persist(&path).map_err(|e| failed(e.error))?;

        debug!("Stored page {} result at {}", page, path.display());
        Ok(())
    }
}

/// Collects results in memory, keyed by page.
#[derive(Debug, Default)]
pub struct MemoryResultSink {
    results: Mutex<BTreeMap<usize, Vec<u8>>>,
}

impl MemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything received so far.
    pub fn results(&self) -> BTreeMap<usize, Vec<u8>> {
        self.results
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn len(&self) -> usize {
        self.results().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultSink for MemoryResultSink {
    fn accept(&self, page: usize, result: &[u8]) -> Result<(), PipelineError> {
        let mut guard = self
            .results
            .lock()
            .map_err(|_| PipelineError::SinkFailed {
                page,
                detail: "result map lock poisoned".into(),
            })?;
        guard.insert(page, result.to_vec());
        Ok(())
    }
}
