//! Task queue: priority-ordered pending work with a bounded in-flight set
//!
//! A task is one dork at one page. The queue owns pending, running,
//! completed, and failed tasks, hands out work under the scheduler's
//! concurrency cap, accounts for retries, and spawns pagination follow-ups.
//!
//! Ordering: highest priority first, FIFO within a priority class.
//! Insertion is an O(n) scan; the bounded number of priority classes keeps
//! that acceptable at this workload.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

/// Task priority. Retries and pagination spawns bump priority upward,
/// clamped at `Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    /// One step up, clamped at the top.
    pub fn bump(self) -> Self {
        match self {
            Self::Low => Self::Normal,
            Self::Normal => Self::High,
            Self::High => Self::Critical,
            Self::Critical => Self::Critical,
        }
    }
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One unit of work: a dork at a page.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub dork: String,
    /// 0-based page index.
    pub page: usize,
    pub status: TaskStatus,
    pub priority: Priority,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Extracted URLs, populated on completion.
    pub urls: Vec<String>,
}

impl Task {
    fn new(dork: String, page: usize, priority: Priority, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            dork,
            page,
            status: TaskStatus::Pending,
            priority,
            retry_count: 0,
            max_retries,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            urls: Vec::new(),
        }
    }
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Hard cap on in-flight tasks. The scheduler lowers this when the
    /// adaptive controller shrinks concurrency.
    pub max_concurrency: usize,
    pub max_retries: u32,
    /// Pagination ceiling: a task at `pages_per_dork - 1` never spawns.
    pub pages_per_dork: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 50,
            max_retries: 3,
            pages_per_dork: 10,
        }
    }
}

/// Counters snapshot. At any observation point
/// `pending + running + completed + failed == total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    /// Dorks ingested plus pagination tasks spawned.
    pub total: usize,
}

struct QueueInner {
    pending: Vec<Task>,
    running: HashMap<String, Task>,
    completed: Vec<Task>,
    failed: Vec<Task>,
    /// `(dork, page)` pairs processed to completion; enqueue does not
    /// dedup beyond this.
    processed: HashSet<(String, usize)>,
    paused: bool,
    max_concurrency: usize,
    max_retries: u32,
    pages_per_dork: usize,
    total_ingested: usize,
    pagination_spawned: usize,
    drained_signaled: bool,
}

/// Shared task queue.
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
}

impl TaskQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                pending: Vec::new(),
                running: HashMap::new(),
                completed: Vec::new(),
                failed: Vec::new(),
                processed: HashSet::new(),
                paused: false,
                max_concurrency: config.max_concurrency.max(1),
                max_retries: config.max_retries,
                pages_per_dork: config.pages_per_dork.max(1),
                total_ingested: 0,
                pagination_spawned: 0,
                drained_signaled: false,
            }),
        }
    }

    /// Enqueue a page-0 task for a dork. Returns the task id, or `None`
    /// when this `(dork, 0)` was already processed to completion.
    pub fn add_dork(&self, dork: &str, priority: Priority) -> Option<String> {
        let dork = dork.trim();
        if dork.is_empty() {
            return None;
        }

        let mut inner = self.inner.lock();
        if inner.processed.contains(&(dork.to_string(), 0)) {
            tracing::debug!(dork, "dork already processed, skipping enqueue");
            return None;
        }

        let task = Task::new(dork.to_string(), 0, priority, inner.max_retries);
        let id = task.id.clone();
        Self::insert_back_of_class(&mut inner.pending, task);
        inner.total_ingested += 1;
        inner.drained_signaled = false;
        Some(id)
    }

    /// Enqueue a pagination task at the front of its priority class.
    /// Returns the task id, or `None` when `(dork, page)` already completed.
    pub fn add_page(&self, dork: &str, page: usize, priority: Priority) -> Option<String> {
        let dork = dork.trim();
        if dork.is_empty() {
            return None;
        }

        let mut inner = self.inner.lock();
        if inner.processed.contains(&(dork.to_string(), page)) {
            return None;
        }

        let task = Task::new(dork.to_string(), page, priority, inner.max_retries);
        let id = task.id.clone();
        Self::insert_front_of_class(&mut inner.pending, task);
        inner.total_ingested += 1;
        inner.pagination_spawned += 1;
        inner.drained_signaled = false;
        Some(id)
    }

    /// Back of the task's priority class: after every task of the same or
    /// higher priority.
    fn insert_back_of_class(pending: &mut Vec<Task>, task: Task) {
        let pos = pending
            .iter()
            .position(|t| t.priority < task.priority)
            .unwrap_or(pending.len());
        pending.insert(pos, task);
    }

    /// Front of the task's priority class: before every task of the same
    /// or lower priority.
    fn insert_front_of_class(pending: &mut Vec<Task>, task: Task) {
        let pos = pending
            .iter()
            .position(|t| t.priority <= task.priority)
            .unwrap_or(pending.len());
        pending.insert(pos, task);
    }

    /// Pop up to `n` tasks into the running set, honoring the pause gate
    /// and the in-flight cap. Popped tasks come back marked `Running`.
    pub fn next_batch(&self, n: usize) -> Vec<Task> {
        let mut inner = self.inner.lock();
        if inner.paused {
            return Vec::new();
        }

        let mut batch = Vec::new();
        while batch.len() < n
            && inner.running.len() < inner.max_concurrency
            && !inner.pending.is_empty()
        {
            let mut task = inner.pending.remove(0);
            task.status = TaskStatus::Running;
            task.started_at = Some(Utc::now());
            inner.running.insert(task.id.clone(), task.clone());
            batch.push(task);
        }
        batch
    }

    /// Mark a running task complete. Spawns the next page (front of a
    /// bumped priority class) when the engine saw a next page and the
    /// pagination ceiling allows it; the spawned id is returned.
    pub fn complete(&self, id: &str, urls: Vec<String>, has_next_page: bool) -> Option<String> {
        let mut inner = self.inner.lock();
        let Some(mut task) = inner.running.remove(id) else {
            return None;
        };

        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        task.urls = urls;

        let key = (task.dork.clone(), task.page);
        inner.processed.insert(key);

        let spawn = (has_next_page && task.page + 1 < inner.pages_per_dork)
            .then(|| (task.dork.clone(), task.page + 1, task.priority.bump()));
        inner.completed.push(task);
        drop(inner);

        spawn.and_then(|(dork, page, priority)| self.add_page(&dork, page, priority))
    }

    /// Mark a running task failed. When `retry` is set and the retry
    /// budget allows, the task re-enters pending with its priority bumped;
    /// otherwise it is recorded as a final failure.
    pub fn fail(&self, id: &str, error: &str, retry: bool) {
        let mut inner = self.inner.lock();
        let Some(mut task) = inner.running.remove(id) else {
            return;
        };

        if retry && task.retry_count < task.max_retries {
            task.retry_count += 1;
            task.priority = task.priority.bump();
            task.status = TaskStatus::Pending;
            task.started_at = None;
            task.error = Some(error.to_string());
            tracing::debug!(
                task = id,
                retry = task.retry_count,
                "task requeued after failure"
            );
            Self::insert_back_of_class(&mut inner.pending, task);
        } else {
            task.status = TaskStatus::Failed;
            task.completed_at = Some(Utc::now());
            task.error = Some(error.to_string());
            tracing::debug!(task = id, error, "task failed permanently");
            inner.failed.push(task);
        }
    }

    /// A blocked task re-enters the queue; the proxy path penalizes the
    /// proxy separately.
    pub fn block(&self, id: &str, reason: &str) {
        self.fail(id, reason, true);
    }

    /// Put a running task back at the front of its priority class without
    /// touching its retry budget. Used when dispatch could not obtain a
    /// proxy.
    pub fn requeue(&self, id: &str) {
        let mut inner = self.inner.lock();
        let Some(mut task) = inner.running.remove(id) else {
            return;
        };
        task.status = TaskStatus::Pending;
        task.started_at = None;
        Self::insert_front_of_class(&mut inner.pending, task);
    }

    pub fn pause(&self) {
        self.inner.lock().paused = true;
    }

    pub fn resume(&self) {
        self.inner.lock().paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    /// Propagate a new concurrency cap from the adaptive controller.
    pub fn set_max_concurrency(&self, cap: usize) {
        self.inner.lock().max_concurrency = cap.max(1);
    }

    /// Counter snapshot.
    pub fn counts(&self) -> QueueCounts {
        let inner = self.inner.lock();
        QueueCounts {
            pending: inner.pending.len(),
            running: inner.running.len(),
            completed: inner.completed.len(),
            failed: inner.failed.len(),
            total: inner.total_ingested,
        }
    }

    /// Number of pagination tasks spawned so far.
    pub fn pagination_spawned(&self) -> usize {
        self.inner.lock().pagination_spawned
    }

    /// Whether everything ingested has reached a terminal state.
    pub fn is_drained(&self) -> bool {
        let inner = self.inner.lock();
        inner.pending.is_empty() && inner.running.is_empty()
    }

    /// One-shot drained signal: true exactly once per drain, re-armed when
    /// new work arrives.
    pub fn take_drained_signal(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.pending.is_empty() && inner.running.is_empty() && !inner.drained_signaled {
            inner.drained_signaled = true;
            return true;
        }
        false
    }

    /// Snapshot of failed tasks (for reporting).
    pub fn failed_tasks(&self) -> Vec<Task> {
        self.inner.lock().failed.clone()
    }

    /// Snapshot of completed tasks.
    pub fn completed_tasks(&self) -> Vec<Task> {
        self.inner.lock().completed.clone()
    }

    /// Drop all transient state, keeping configuration. Used when the
    /// scheduler starts a fresh run.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.pending.clear();
        inner.running.clear();
        inner.completed.clear();
        inner.failed.clear();
        inner.processed.clear();
        inner.total_ingested = 0;
        inner.pagination_spawned = 0;
        inner.drained_signaled = false;
        inner.paused = false;
    }
}

/// Parse a dork list: one dork per line, trimmed, `#` comments and blank
/// lines ignored.
pub fn parse_dork_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> TaskQueue {
        TaskQueue::new(QueueConfig::default())
    }

    #[test]
    fn test_add_and_next_batch() {
        let q = queue();
        q.add_dork("inurl:admin", Priority::Normal).unwrap();
        q.add_dork("inurl:login", Priority::Normal).unwrap();

        let batch = q.next_batch(10);
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|t| t.status == TaskStatus::Running));

        let counts = q.counts();
        assert_eq!(counts.pending, 0);
        assert_eq!(counts.running, 2);
    }

    #[test]
    fn test_priority_ordering_fifo_within_class() {
        let q = queue();
        q.add_dork("low-1", Priority::Low);
        q.add_dork("normal-1", Priority::Normal);
        q.add_dork("low-2", Priority::Low);
        q.add_dork("critical-1", Priority::Critical);
        q.add_dork("normal-2", Priority::Normal);

        let dorks: Vec<String> = q.next_batch(10).into_iter().map(|t| t.dork).collect();
        assert_eq!(dorks, vec!["critical-1", "normal-1", "normal-2", "low-1", "low-2"]);
    }

    #[test]
    fn test_add_page_front_of_class() {
        let q = queue();
        q.add_dork("first", Priority::Normal);
        q.add_dork("second", Priority::Normal);
        q.add_page("paged", 1, Priority::Normal);

        let dorks: Vec<String> = q.next_batch(10).into_iter().map(|t| t.dork).collect();
        assert_eq!(dorks, vec!["paged", "first", "second"]);
    }

    #[test]
    fn test_concurrency_cap() {
        let q = TaskQueue::new(QueueConfig {
            max_concurrency: 2,
            ..QueueConfig::default()
        });
        for i in 0..5 {
            q.add_dork(&format!("dork-{i}"), Priority::Normal);
        }

        assert_eq!(q.next_batch(10).len(), 2);
        // Cap reached; nothing more until a slot frees
        assert_eq!(q.next_batch(10).len(), 0);
    }

    #[test]
    fn test_paused_queue_dispatches_nothing() {
        let q = queue();
        q.add_dork("dork", Priority::Normal);
        q.pause();
        assert!(q.next_batch(10).is_empty());

        q.resume();
        assert_eq!(q.next_batch(10).len(), 1);
    }

    #[test]
    fn test_complete_spawns_next_page() {
        let q = queue();
        let id = q.add_dork("dork", Priority::Normal).unwrap();
        q.next_batch(1);

        let spawned = q.complete(&id, vec!["https://a.com".into()], true);
        assert!(spawned.is_some());

        let batch = q.next_batch(1);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].page, 1);
        // Raised priority on the spawn
        assert_eq!(batch[0].priority, Priority::High);
    }

    #[test]
    fn test_no_spawn_at_page_ceiling() {
        let q = TaskQueue::new(QueueConfig {
            pages_per_dork: 3,
            ..QueueConfig::default()
        });
        let id = q.add_page("dork", 2, Priority::Normal).unwrap();
        q.next_batch(1);

        // page 2 == pages_per_dork - 1: has_next_page must not spawn
        assert!(q.complete(&id, Vec::new(), true).is_none());
        assert!(q.is_drained());
    }

    #[test]
    fn test_completed_key_not_reprocessed() {
        let q = queue();
        let id = q.add_dork("dork", Priority::Normal).unwrap();
        q.next_batch(1);
        q.complete(&id, Vec::new(), false);

        // Re-adding a completed (dork, page) is a no-op
        assert!(q.add_dork("dork", Priority::Normal).is_none());
        assert_eq!(q.counts().pending, 0);
    }

    #[test]
    fn test_enqueue_does_not_dedup_pending() {
        let q = queue();
        assert!(q.add_dork("dork", Priority::Normal).is_some());
        assert!(q.add_dork("dork", Priority::Normal).is_some());
        assert_eq!(q.counts().pending, 2);
    }

    #[test]
    fn test_retry_bumps_priority_and_counts() {
        let q = queue();
        let id = q.add_dork("dork", Priority::Normal).unwrap();
        q.next_batch(1);
        q.fail(&id, "connection reset", true);

        let counts = q.counts();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.failed, 0);

        let batch = q.next_batch(1);
        assert_eq!(batch[0].priority, Priority::High);
        assert_eq!(batch[0].retry_count, 1);
    }

    #[test]
    fn test_retry_budget_exhaustion() {
        let q = TaskQueue::new(QueueConfig {
            max_retries: 2,
            ..QueueConfig::default()
        });
        let id = q.add_dork("dork", Priority::Normal).unwrap();

        for expected_retry in 1..=2 {
            let batch = q.next_batch(1);
            q.fail(&batch[0].id, "boom", true);
            let _ = expected_retry;
        }
        let batch = q.next_batch(1);
        q.fail(&batch[0].id, "boom", true);

        let counts = q.counts();
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.pending, 0);

        let failed = q.failed_tasks();
        assert_eq!(failed[0].error.as_deref(), Some("boom"));
        let _ = id;
    }

    #[test]
    fn test_zero_retries_fails_immediately() {
        let q = TaskQueue::new(QueueConfig {
            max_retries: 0,
            ..QueueConfig::default()
        });
        let id = q.add_dork("dork", Priority::Normal).unwrap();
        q.next_batch(1);
        q.fail(&id, "first strike", true);

        assert_eq!(q.counts().failed, 1);
    }

    #[test]
    fn test_block_requeues() {
        let q = queue();
        let id = q.add_dork("dork", Priority::Normal).unwrap();
        q.next_batch(1);
        q.block(&id, "captcha");

        assert_eq!(q.counts().pending, 1);
        assert_eq!(q.counts().failed, 0);
    }

    #[test]
    fn test_requeue_keeps_retry_budget() {
        let q = queue();
        let id = q.add_dork("dork", Priority::Normal).unwrap();
        q.next_batch(1);
        q.requeue(&id);

        let counts = q.counts();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.running, 0);

        let batch = q.next_batch(1);
        assert_eq!(batch[0].retry_count, 0);
        assert_eq!(batch[0].priority, Priority::Normal);
    }

    #[test]
    fn test_counter_invariant() {
        let q = queue();
        for i in 0..10 {
            q.add_dork(&format!("dork-{i}"), Priority::Normal);
        }

        let batch = q.next_batch(4);
        q.complete(&batch[0].id, Vec::new(), false);
        q.fail(&batch[1].id, "x", false);
        q.block(&batch[2].id, "captcha");

        let counts = q.counts();
        assert_eq!(
            counts.pending + counts.running + counts.completed + counts.failed,
            counts.total
        );
    }

    #[test]
    fn test_drained_signal_is_one_shot() {
        let q = queue();
        let id = q.add_dork("dork", Priority::Normal).unwrap();
        assert!(!q.take_drained_signal());

        q.next_batch(1);
        q.complete(&id, Vec::new(), false);

        assert!(q.take_drained_signal());
        assert!(!q.take_drained_signal());

        // New work re-arms the signal
        let id = q.add_dork("dork-2", Priority::Normal).unwrap();
        q.next_batch(1);
        q.complete(&id, Vec::new(), false);
        assert!(q.take_drained_signal());
    }

    #[test]
    fn test_running_task_not_in_pending() {
        let q = queue();
        q.add_dork("dork", Priority::Normal);
        let batch = q.next_batch(1);

        let counts = q.counts();
        assert_eq!(counts.pending, 0);
        assert_eq!(counts.running, 1);
        assert_eq!(batch[0].status, TaskStatus::Running);
    }

    #[test]
    fn test_clear_resets_everything() {
        let q = queue();
        q.add_dork("dork", Priority::Normal);
        q.pause();
        q.clear();

        assert_eq!(q.counts(), QueueCounts::default());
        assert!(!q.is_paused());
    }

    #[test]
    fn test_parse_dork_list() {
        let text = "\
# common panels
inurl:admin

  inurl:login.php
# end
";
        let dorks = parse_dork_list(text);
        assert_eq!(dorks, vec!["inurl:admin", "inurl:login.php"]);
    }

    #[test]
    fn test_priority_bump_clamps() {
        assert_eq!(Priority::Low.bump(), Priority::Normal);
        assert_eq!(Priority::Critical.bump(), Priority::Critical);
    }
}
