//! Atomic publication of result records
//!
//! Every file is written to a hidden temp file in the result directory and
//! renamed into place, so a concurrent reader sees either nothing or the whole
//! file. The output file goes first; the result file is the commit marker.

use super::naming::{FileKind, ResultFileName, TEMP_PREFIX};
use super::record::{RecordError, ResultRecord};
use crate::util::kv::KvWriter;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

pub struct ResultPublisher {
    dir: PathBuf,
    published: Mutex<Vec<PathBuf>>,
}

/// Paths written by one [`ResultPublisher::publish`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub result: PathBuf,
    pub output: PathBuf,
}

impl ResultPublisher {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, RecordError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            published: Mutex::new(Vec::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn published_mut(&self) -> MutexGuard<'_, Vec<PathBuf>> {
        self.published.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn publish(&self, record: &ResultRecord) -> Result<Published, RecordError> {
        let result_name = ResultFileName::new(FileKind::Result, &record.suite_id);
        let output_name = result_name.sibling(FileKind::Output);

        let mut output = KvWriter::new();
        output
            .field("suite_id", &result_name.suite_id)
            .field("stdout", &record.stdout)
            .field("stderr", &record.stderr);
        let output_path = self.write_atomic(&output_name.to_string(), &output.finish())?;

        let mut stored = record.clone();
        stored.suite_id = result_name.suite_id.clone();
        let result_path = self.write_atomic(&result_name.to_string(), &stored.to_kv())?;

        debug!(suite = %stored.suite_id, path = %result_path.display(), "Result published");
        Ok(Published {
            result: result_path,
            output: output_path,
        })
    }

    fn write_atomic(&self, name: &str, contents: &str) -> Result<PathBuf, RecordError> {
        let target = self.dir.join(name);
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| RecordError::Io(e.error))?;

        self.published_mut().push(target.clone());
        Ok(target)
    }

    pub fn published(&self) -> Vec<PathBuf> {
        self.published_mut().clone()
    }

    /// Removes every file this publisher wrote. Safe to call repeatedly.
    pub fn cleanup(&self) -> usize {
        let paths: Vec<PathBuf> = self.published_mut().drain(..).collect();
        let mut removed = 0;
        for path in paths {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove result file"),
            }
        }
        if removed > 0 {
            debug!(removed, "Result files cleaned up");
        }
        removed
    }

    pub fn guard(self: &Arc<Self>) -> CleanupGuard {
        CleanupGuard {
            publisher: Arc::clone(self),
        }
    }
}

/// Runs [`ResultPublisher::cleanup`] when dropped, including during unwinding
pub struct CleanupGuard {
    publisher: Arc<ResultPublisher>,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.publisher.cleanup();
    }
}
