//! Scheduler: the control loop binding pool, queue, engine, and filter
//!
//! Dequeues tasks under the adaptive concurrency cap, acquires a proxy for
//! each, runs the request executor under a deadline, classifies the
//! response, and dispatches the outcome back into the pool, queue, and
//! filter. Outcome handling runs inline in the spawned request task so the
//! adaptive adjustment is one comparison per outcome with no timer races.
//!
//! Key components:
//! - `Scheduler`: state machine and dispatch loop
//! - `AdaptiveController`: recent-outcome window driving the concurrency cap
//! - `RequestExecutor`: the HTTP seam (reqwest in production, stubs in tests)
//! - sink traits: `ResultSink`, `ProgressSink`, `ErrorSink`

pub mod adaptive;
pub mod executor;
pub mod sinks;
pub mod stats;

pub use adaptive::AdaptiveController;
pub use executor::{FetchError, FetchResponse, HttpExecutor, RequestExecutor};
pub use sinks::{CollectingSink, ErrorSink, LogSink, ProgressSink, ResultRow, ResultSink};
pub use stats::{format_eta, SchedulerStats};

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;

use crate::engine::{self, EngineOptions, Verdict};
use crate::filter::UrlFilter;
use crate::ledger::DomainLedger;
use crate::proxy::ProxyPool;
use crate::queue::{Priority, Task, TaskQueue};

/// Scheduler lifecycle state. Transitions are linear except
/// paused <-> running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Paused,
    Stopping,
    Stopped,
    Completed,
}

impl SchedulerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
        }
    }

    /// Whether `start` is legal from this state.
    fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Stopped | Self::Completed)
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from scheduler control operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("start is not legal from state '{0}'")]
    InvalidState(SchedulerState),
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub min_concurrency: usize,
    pub initial_concurrency: usize,
    pub max_concurrency: usize,
    /// Recent success rate that must be exceeded (plus margin) to grow.
    pub target_success_rate: f64,
    pub adaptive: bool,
    /// Deadline for each outbound request.
    pub request_timeout: Duration,
    /// Loop delay after dispatching work.
    pub dispatch_delay: Duration,
    /// Loop delay while waiting for slots or results.
    pub idle_delay: Duration,
    /// Pin each task to one proxy while that proxy stays alive.
    pub sticky_tasks: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_concurrency: 10,
            initial_concurrency: 50,
            max_concurrency: 200,
            target_success_rate: 0.70,
            adaptive: true,
            request_timeout: Duration::from_secs(30),
            dispatch_delay: Duration::from_millis(50),
            idle_delay: Duration::from_millis(100),
            sticky_tasks: false,
        }
    }
}

/// The application object composing the five core components.
pub struct Scheduler {
    config: SchedulerConfig,
    engine: Mutex<EngineOptions>,
    pool: Arc<ProxyPool>,
    queue: Arc<TaskQueue>,
    filter: Arc<UrlFilter>,
    ledger: Option<Arc<DomainLedger>>,
    request_executor: Arc<dyn RequestExecutor>,
    result_sink: Arc<dyn ResultSink>,
    progress_sink: Arc<dyn ProgressSink>,
    error_sink: Arc<dyn ErrorSink>,
    state: Mutex<SchedulerState>,
    adaptive: Mutex<AdaptiveController>,
    inflight: AtomicUsize,
    requests: AtomicU64,
    total_urls: AtomicU64,
    captcha_count: AtomicU64,
    block_count: AtomicU64,
    started_at: Mutex<Option<Instant>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        pool: Arc<ProxyPool>,
        queue: Arc<TaskQueue>,
        filter: Arc<UrlFilter>,
        request_executor: Arc<dyn RequestExecutor>,
    ) -> Self {
        let adaptive = AdaptiveController::new(
            config.initial_concurrency,
            config.min_concurrency,
            config.max_concurrency,
            config.target_success_rate,
            config.adaptive,
        );
        Self {
            config,
            engine: Mutex::new(EngineOptions::default()),
            pool,
            queue,
            filter,
            ledger: None,
            request_executor,
            result_sink: Arc::new(LogSink),
            progress_sink: Arc::new(LogSink),
            error_sink: Arc::new(LogSink),
            state: Mutex::new(SchedulerState::Idle),
            adaptive: Mutex::new(adaptive),
            inflight: AtomicUsize::new(0),
            requests: AtomicU64::new(0),
            total_urls: AtomicU64::new(0),
            captcha_count: AtomicU64::new(0),
            block_count: AtomicU64::new(0),
            started_at: Mutex::new(None),
        }
    }

    /// Attach the persistent domain ledger.
    pub fn with_ledger(mut self, ledger: Arc<DomainLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Replace the default logging sinks.
    pub fn with_sinks(
        mut self,
        result: Arc<dyn ResultSink>,
        progress: Arc<dyn ProgressSink>,
        error: Arc<dyn ErrorSink>,
    ) -> Self {
        self.result_sink = result;
        self.progress_sink = progress;
        self.error_sink = error;
        self
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    /// Ingest dorks and begin the run. Legal from idle, stopped, or
    /// completed; transient state from any previous run is cleared first.
    /// Pool statistics survive across runs.
    pub fn start(
        self: &Arc<Self>,
        dorks: &[String],
        engine: EngineOptions,
    ) -> Result<(), SchedulerError> {
        {
            let mut state = self.state.lock();
            if !state.can_start() {
                return Err(SchedulerError::InvalidState(*state));
            }
            *state = SchedulerState::Running;
        }

        self.queue.clear();
        self.filter.reset();
        self.adaptive.lock().reset(self.config.initial_concurrency);
        self.requests.store(0, Ordering::Relaxed);
        self.total_urls.store(0, Ordering::Relaxed);
        self.captcha_count.store(0, Ordering::Relaxed);
        self.block_count.store(0, Ordering::Relaxed);
        *self.engine.lock() = engine;
        *self.started_at.lock() = Some(Instant::now());

        let mut ingested = 0usize;
        for dork in dorks {
            if self.queue.add_dork(dork, Priority::Normal).is_some() {
                ingested += 1;
            }
        }
        self.queue
            .set_max_concurrency(self.config.initial_concurrency);

        tracing::info!(ingested, "scheduler starting");
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler.run().await;
        });
        Ok(())
    }

    /// Suspend dispatch. In-flight work completes normally.
    pub fn pause(&self) {
        let mut state = self.state.lock();
        if *state == SchedulerState::Running {
            *state = SchedulerState::Paused;
            self.queue.pause();
            tracing::info!("scheduler paused");
        }
    }

    /// Resume dispatch after a pause.
    pub fn resume(&self) {
        let mut state = self.state.lock();
        if *state == SchedulerState::Paused {
            *state = SchedulerState::Running;
            self.queue.resume();
            tracing::info!("scheduler resumed");
        }
    }

    /// Stop the run. Dispatch halts immediately; in-flight requests finish
    /// best-effort under their own deadlines.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if matches!(*state, SchedulerState::Running | SchedulerState::Paused) {
            *state = SchedulerState::Stopping;
            tracing::info!("scheduler stopping");
        }
    }

    /// The control loop.
    async fn run(self: Arc<Self>) {
        loop {
            match self.state() {
                SchedulerState::Running => {}
                SchedulerState::Paused => {
                    tokio::time::sleep(self.config.idle_delay).await;
                    continue;
                }
                _ => break,
            }

            let available_slots = {
                let cap = self.adaptive.lock().current();
                cap.saturating_sub(self.inflight.load(Ordering::SeqCst))
            };

            let mut dispatched = 0;
            if available_slots > 0 && self.pool.stats().available > 0 {
                let batch = self.queue.next_batch(available_slots);
                dispatched = batch.len();
                for task in batch {
                    self.inflight.fetch_add(1, Ordering::SeqCst);
                    let scheduler = Arc::clone(&self);
                    tokio::spawn(async move {
                        scheduler.process_task(task).await;
                        scheduler.inflight.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            }

            if dispatched == 0
                && self.inflight.load(Ordering::SeqCst) == 0
                && self.queue.take_drained_signal()
            {
                *self.state.lock() = SchedulerState::Completed;
                self.progress_sink.on_progress(&self.stats());
                tracing::info!("queue drained, run complete");
                return;
            }

            let delay = if dispatched > 0 {
                self.config.dispatch_delay
            } else {
                self.config.idle_delay
            };
            tokio::time::sleep(delay).await;
        }

        // Stopping: let in-flight work land, then finish
        if self.state() == SchedulerState::Stopping {
            while self.inflight.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(self.config.idle_delay).await;
            }
            *self.state.lock() = SchedulerState::Stopped;
            self.progress_sink.on_progress(&self.stats());
            tracing::info!("scheduler stopped");
        }
    }

    /// One request: proxy acquisition, fetch, classification, dispatch.
    async fn process_task(self: &Arc<Self>, task: Task) {
        let proxy = if self.config.sticky_tasks {
            self.pool.get_for_task(&task.id)
        } else {
            self.pool.get()
        };
        let proxy = match proxy {
            Ok(proxy) => proxy,
            Err(_) => {
                // Pool emptied between the dispatch check and now; hand
                // the task back without charging its retry budget.
                self.queue.requeue(&task.id);
                return;
            }
        };

        let (url, timeout) = {
            let opts = self.engine.lock();
            let url =
                engine::build_search_url(&opts, &task.dork, task.page, opts.results_per_page);
            (url, self.config.request_timeout)
        };

        self.requests.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(task = task.id.as_str(), dork = task.dork.as_str(), page = task.page, proxy = proxy.id.as_str(), "dispatching request");

        match self.request_executor.execute(&url, &proxy, timeout).await {
            Err(e) if e.is_fatal() => {
                let message = e.to_string();
                self.queue.fail(&task.id, &message, false);
                self.error_sink.on_error(&task.id, &message, true);
                tracing::error!(task = task.id.as_str(), error = message.as_str(), "fatal engine error");
                self.stop();
            }
            Err(e) => {
                let message = e.to_string();
                self.pool.report_failure(&proxy.id);
                self.adaptive.lock().on_failure();
                self.queue.fail(&task.id, &message, true);
                self.error_sink.on_error(&task.id, &message, false);
            }
            Ok(response) => {
                self.handle_response(&task, &proxy.id, response).await;
            }
        }

        self.progress_sink.on_progress(&self.stats());
    }

    async fn handle_response(
        &self,
        task: &Task,
        proxy_id: &str,
        response: FetchResponse,
    ) {
        match engine::classify(&response.body) {
            Verdict::Captcha => {
                self.captcha_count.fetch_add(1, Ordering::Relaxed);
                self.pool.report_captcha(proxy_id);
                self.shrink_concurrency();
                self.queue.block(&task.id, "captcha");
            }
            Verdict::Blocked => {
                self.block_count.fetch_add(1, Ordering::Relaxed);
                self.pool.report_block(proxy_id);
                self.shrink_concurrency();
                self.queue.block(&task.id, "blocked");
            }
            Verdict::Empty => {
                self.pool.report_success(proxy_id, response.latency);
                self.grow_concurrency();
                self.queue.complete(&task.id, Vec::new(), false);
            }
            Verdict::Ok => {
                self.pool.report_success(proxy_id, response.latency);

                let extraction = {
                    let opts = self.engine.lock();
                    engine::extract(&opts, &response.body)
                };
                self.total_urls
                    .fetch_add(extraction.hits.len() as u64, Ordering::Relaxed);

                let mut ledger_rows = Vec::new();
                for hit in &extraction.hits {
                    if let Ok(record) = self.filter.add(&hit.url) {
                        self.result_sink.on_result(&task.dork, &record, hit.position);
                        if self.filter.track_domains() {
                            ledger_rows.push((record.domain, record.top_domain));
                        }
                    }
                }

                if let Some(ledger) = &self.ledger {
                    if !ledger_rows.is_empty() {
                        if let Err(e) = ledger.record_many(&ledger_rows, "scrape").await {
                            tracing::warn!(error = %e, "ledger write failed");
                        }
                    }
                }

                self.grow_concurrency();
                let urls: Vec<String> =
                    extraction.hits.into_iter().map(|h| h.url).collect();
                self.queue
                    .complete(&task.id, urls, extraction.has_next_page);
            }
        }
    }

    fn grow_concurrency(&self) {
        if let Some(cap) = self.adaptive.lock().on_success() {
            self.queue.set_max_concurrency(cap);
            tracing::debug!(cap, "concurrency increased");
        }
    }

    fn shrink_concurrency(&self) {
        if let Some(cap) = self.adaptive.lock().on_throttle() {
            self.queue.set_max_concurrency(cap);
            tracing::debug!(cap, "concurrency reduced");
        }
    }

    /// Observability snapshot.
    pub fn stats(&self) -> SchedulerStats {
        let counts = self.queue.counts();
        let filter_stats = self.filter.stats();
        let elapsed = self
            .started_at
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO);
        let minutes = elapsed.as_secs_f64() / 60.0;

        let requests = self.requests.load(Ordering::Relaxed);
        let total_urls = self.total_urls.load(Ordering::Relaxed);

        let (adaptive_current, success_rate) = {
            let adaptive = self.adaptive.lock();
            (adaptive.current(), adaptive.recent_success_rate())
        };

        SchedulerStats {
            state: self.state().to_string(),
            total_dorks: counts.total,
            completed_dorks: counts.completed,
            failed_dorks: counts.failed,
            pending_dorks: counts.pending,
            running_tasks: counts.running,
            total_urls,
            unique_urls: filter_stats.accepted,
            requests_per_min: if minutes > 0.0 {
                requests as f64 / minutes
            } else {
                0.0
            },
            urls_per_min: if minutes > 0.0 {
                total_urls as f64 / minutes
            } else {
                0.0
            },
            success_rate,
            eta: format_eta(counts.pending, counts.completed, elapsed),
            current_concurrency: adaptive_current,
            captcha_count: self.captcha_count.load(Ordering::Relaxed),
            block_count: self.block_count.load(Ordering::Relaxed),
            elapsed,
        }
    }
}
