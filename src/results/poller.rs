//! Exactly-once collection of published result files

use super::naming::{FileKind, ResultFileName};
use super::record::{RecordError, ResultRecord};
use crate::termination::ShutdownSignal;
use crate::util::kv::KvWriter;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct CollectedResult {
    pub file_name: ResultFileName,
    pub path: PathBuf,
    pub record: ResultRecord,
}

/// A result file that could not be used; it is still marked processed
#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct PollReport {
    pub results: Vec<CollectedResult>,
    pub skipped: Vec<SkippedFile>,
}

impl PollReport {
    pub fn results_found(&self) -> usize {
        self.results.len()
    }

    fn extend(&mut self, other: PollReport) {
        self.results.extend(other.results);
        self.skipped.extend(other.skipped);
    }

    pub fn to_kv(&self) -> String {
        let mut w = KvWriter::new();
        w.field("results_found", self.results_found())
            .field("files_skipped", self.skipped.len());
        w.finish()
    }
}

pub struct ResultPoller {
    dir: PathBuf,
    processed: Mutex<HashSet<String>>,
    pid: Option<u32>,
    poll_interval: Duration,
}

impl ResultPoller {
    pub fn new(dir: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            processed: Mutex::new(HashSet::new()),
            pid: None,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Only collects files published by `pid`, leaving other processes'
    /// files in a shared directory alone
    pub fn for_process(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn processed_count(&self) -> usize {
        self.processed().len()
    }

    fn processed(&self) -> MutexGuard<'_, HashSet<String>> {
        self.processed.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// One pass over the directory. A missing directory yields an empty report.
    pub fn poll(&self) -> Result<PollReport, RecordError> {
        let mut report = PollReport::default();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(e.into()),
        };

        let mut candidates = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(parsed) = ResultFileName::parse(&name) else {
                continue;
            };
            if parsed.kind != FileKind::Result {
                continue;
            }
            if self.pid.is_some_and(|pid| pid != parsed.pid) {
                continue;
            }
            candidates.push((name, parsed, entry.path()));
        }
        candidates.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, parsed, path) in candidates {
            if !self.processed().insert(name) {
                continue;
            }
            let outcome = std::fs::read_to_string(&path)
                .map_err(RecordError::from)
                .and_then(|text| ResultRecord::from_kv(&text, &parsed.suite_id));
            match outcome {
                Ok(record) => report.results.push(CollectedResult {
                    file_name: parsed,
                    path,
                    record,
                }),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable result file");
                    report.skipped.push(SkippedFile {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if report.results_found() > 0 {
            debug!(found = report.results_found(), "Collected results");
        }
        Ok(report)
    }

    /// Polls until `expected` records were collected, `timeout` elapses, or
    /// shutdown is requested; returns whatever was collected
    pub async fn wait_for(
        &self,
        expected: usize,
        timeout: Duration,
        shutdown: &ShutdownSignal,
    ) -> Result<PollReport, RecordError> {
        let deadline = Instant::now() + timeout;
        let mut collected = PollReport::default();
        loop {
            collected.extend(self.poll()?);
            if collected.results_found() >= expected {
                return Ok(collected);
            }
            let now = Instant::now();
            if now >= deadline || shutdown.is_triggered() {
                debug!(
                    expected,
                    found = collected.results_found(),
                    "Stopped waiting for results"
                );
                return Ok(collected);
            }
            let pause = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.triggered() => {}
            }
        }
    }
}
