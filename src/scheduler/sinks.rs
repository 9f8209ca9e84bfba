//! Outcome delivery seams
//!
//! The scheduler holds these capability interfaces instead of emitting
//! events: a result sink for accepted URLs, a progress sink for periodic
//! snapshots, and an error sink for per-task failures. The collecting
//! implementations back the tests; the logging ones back the binary.

use parking_lot::Mutex;

use crate::filter::UrlRecord;

use super::stats::SchedulerStats;

/// Receives every accepted URL with its engine position and source dork.
pub trait ResultSink: Send + Sync {
    fn on_result(&self, dork: &str, record: &UrlRecord, position: usize);
}

/// Receives statistics snapshots as outcomes land.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, stats: &SchedulerStats);
}

/// Receives per-task errors.
pub trait ErrorSink: Send + Sync {
    fn on_error(&self, task_id: &str, error: &str, fatal: bool);
}

/// One delivered result row.
#[derive(Debug, Clone)]
pub struct ResultRow {
    pub dork: String,
    pub record: UrlRecord,
    pub position: usize,
}

/// Collects everything in memory; the test sink.
#[derive(Default)]
pub struct CollectingSink {
    results: Mutex<Vec<ResultRow>>,
    errors: Mutex<Vec<(String, String, bool)>>,
    progress_updates: Mutex<u64>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<ResultRow> {
        self.results.lock().clone()
    }

    pub fn errors(&self) -> Vec<(String, String, bool)> {
        self.errors.lock().clone()
    }

    pub fn progress_updates(&self) -> u64 {
        *self.progress_updates.lock()
    }
}

impl ResultSink for CollectingSink {
    fn on_result(&self, dork: &str, record: &UrlRecord, position: usize) {
        self.results.lock().push(ResultRow {
            dork: dork.to_string(),
            record: record.clone(),
            position,
        });
    }
}

impl ProgressSink for CollectingSink {
    fn on_progress(&self, _stats: &SchedulerStats) {
        *self.progress_updates.lock() += 1;
    }
}

impl ErrorSink for CollectingSink {
    fn on_error(&self, task_id: &str, error: &str, fatal: bool) {
        self.errors
            .lock()
            .push((task_id.to_string(), error.to_string(), fatal));
    }
}

/// Logs through tracing; the binary's default sink.
#[derive(Default)]
pub struct LogSink;

impl ResultSink for LogSink {
    fn on_result(&self, dork: &str, record: &UrlRecord, position: usize) {
        tracing::info!(dork, position, url = record.url.as_str(), "result");
    }
}

impl ProgressSink for LogSink {
    fn on_progress(&self, stats: &SchedulerStats) {
        tracing::debug!(
            completed = stats.completed_dorks,
            pending = stats.pending_dorks,
            unique_urls = stats.unique_urls,
            concurrency = stats.current_concurrency,
            eta = stats.eta.as_str(),
            "progress"
        );
    }
}

impl ErrorSink for LogSink {
    fn on_error(&self, task_id: &str, error: &str, fatal: bool) {
        if fatal {
            tracing::error!(task = task_id, error, "fatal task error");
        } else {
            tracing::warn!(task = task_id, error, "task error");
        }
    }
}
