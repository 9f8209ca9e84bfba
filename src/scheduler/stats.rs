//! Scheduler statistics and ETA rendering

use std::time::Duration;

/// Pull-model observability snapshot.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub state: String,
    pub total_dorks: usize,
    pub completed_dorks: usize,
    pub failed_dorks: usize,
    pub pending_dorks: usize,
    pub running_tasks: usize,
    /// URLs extracted before filtering.
    pub total_urls: u64,
    /// URLs that survived the filter pipeline.
    pub unique_urls: u64,
    pub requests_per_min: f64,
    pub urls_per_min: f64,
    /// Recent success rate over the outcome window, 0..1.
    pub success_rate: f64,
    pub eta: String,
    pub current_concurrency: usize,
    pub captcha_count: u64,
    pub block_count: u64,
    pub elapsed: Duration,
}

/// Render the ETA from throughput so far: pending divided by completions
/// per minute. "Complete" at zero pending; "calculating" before any
/// completion has landed.
pub fn format_eta(pending: usize, completed: usize, elapsed: Duration) -> String {
    if pending == 0 {
        return "Complete".to_string();
    }

    let elapsed_min = elapsed.as_secs_f64() / 60.0;
    if completed == 0 || elapsed_min <= 0.0 {
        return "calculating".to_string();
    }

    let per_minute = completed as f64 / elapsed_min;
    let minutes = (pending as f64 / per_minute).ceil() as u64;

    if minutes > 60 {
        format!("{}h {}m", minutes / 60, minutes % 60)
    } else {
        format!("{minutes}m")
    }
}
