//! Parallel processing of many source documents.
//!
//! A fixed pool of scoped worker threads pulls file indices from a shared
//! queue and runs the pipeline on each. Failures are isolated per file,
//! and a cooperative cancellation flag is honored between files, never
//! mid-file.

use crate::classify::CascadeClassifier;
use crate::extract::TableExtractor;
use crate::pipeline::{DocumentExtraction, DocumentPipeline};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

const DEFAULT_WORKERS: usize = 4;

#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub result: crate::error::Result<DocumentExtraction>,
    pub duration: Duration,
}

impl FileOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub submitted: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
    pub total_duration: Duration,
}

#[derive(Debug)]
pub struct BatchReport {
    pub outcomes: Vec<FileOutcome>,
    pub summary: BatchSummary,
}

/// Shared flag for stopping a batch from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub struct BatchProcessor<'a> {
    cascade: &'a CascadeClassifier,
    workers: usize,
    period: Option<String>,
}

impl<'a> BatchProcessor<'a> {
    pub fn new(cascade: &'a CascadeClassifier) -> Self {
        BatchProcessor {
            cascade,
            workers: DEFAULT_WORKERS,
            period: None,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_period(mut self, period: impl Into<String>) -> Self {
        self.period = Some(period.into());
        self
    }

    /// Processes every file, up to `workers` at a time. Every submitted
    /// file is accounted for exactly once: successful + failed + skipped
    /// always equals submitted.
    pub fn run(&self, files: &[PathBuf], token: &CancellationToken) -> BatchReport {
        let started = Instant::now();
        let next = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel::<FileOutcome>();

        std::thread::scope(|scope| {
            for _ in 0..self.workers.min(files.len().max(1)) {
                let tx = tx.clone();
                let next = &next;
                scope.spawn(move || {
                    let pipeline = DocumentPipeline::new(TableExtractor::new(), self.cascade);
                    loop {
                        if token.is_cancelled() {
                            break;
                        }
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        let Some(path) = files.get(index) else {
                            break;
                        };
                        let file_started = Instant::now();
                        let result = pipeline.process(path, self.period.as_deref());
                        if let Err(e) = &result {
                            warn!("'{}' failed: {}", path.display(), e);
                        }
                        let outcome = FileOutcome {
                            path: path.clone(),
                            result,
                            duration: file_started.elapsed(),
                        };
                        if tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);
        });

        let mut outcomes: Vec<FileOutcome> = rx.into_iter().collect();
        outcomes.sort_by(|a, b| a.path.cmp(&b.path));

        let successful = outcomes.iter().filter(|o| o.succeeded()).count();
        let failed = outcomes.len() - successful;
        let cancelled = token.is_cancelled();
        let summary = BatchSummary {
            submitted: files.len(),
            successful,
            failed,
            skipped: files.len() - outcomes.len(),
            cancelled,
            total_duration: started.elapsed(),
        };

        info!(
            "batch finished: {}/{} succeeded, {} failed, {} skipped{} in {:.1?}",
            summary.successful,
            summary.submitted,
            summary.failed,
            summary.skipped,
            if cancelled { " (cancelled)" } else { "" },
            summary.total_duration
        );

        BatchReport { outcomes, summary }
    }
}

/// Collects the processable documents directly under a directory.
pub fn discover_documents(dir: &Path) -> crate::error::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);
        if is_pdf {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
