//! Integration tests for dorkhound
//!
//! These drive the full pipeline — queue, pool, engine adapter, filter,
//! ledger, scheduler — through a scripted request executor, so every
//! assertion exercises the real component wiring without any network.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use dorkhound::{
    engine::EngineOptions,
    filter::{DedupConfig, DedupMode, FilterConfig, UrlFilter},
    ledger::DomainLedger,
    proxy::{PoolConfig, Protocol, Proxy, ProxyPool},
    queue::{QueueConfig, TaskQueue},
    scheduler::{
        CollectingSink, ErrorSink, FetchError, FetchResponse, ProgressSink, RequestExecutor,
        ResultSink, Scheduler, SchedulerConfig, SchedulerState,
    },
};

/// Serves canned bodies keyed by (dork, page); unknown pages get the
/// default body. Records how many requests it served.
struct ScriptedExecutor {
    bodies: Mutex<HashMap<(String, usize), String>>,
    default_body: String,
    served: Mutex<u64>,
}

impl ScriptedExecutor {
    fn new(default_body: impl Into<String>) -> Self {
        Self {
            bodies: Mutex::new(HashMap::new()),
            default_body: default_body.into(),
            served: Mutex::new(0),
        }
    }

    fn script(&self, dork: &str, page: usize, body: impl Into<String>) {
        self.bodies
            .lock()
            .insert((dork.to_string(), page), body.into());
    }

    fn served(&self) -> u64 {
        *self.served.lock()
    }
}

#[async_trait]
impl RequestExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        url: &str,
        _proxy: &Proxy,
        _timeout: Duration,
    ) -> Result<FetchResponse, FetchError> {
        let parsed = url::Url::parse(url).expect("scheduler builds valid URLs");
        let mut dork = String::new();
        let mut start = 0usize;
        let mut num = 10usize;
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "q" => dork = value.into_owned(),
                "start" => start = value.parse().unwrap_or(0),
                "num" => num = value.parse().unwrap_or(10),
                _ => {}
            }
        }
        let page = start / num.max(1);

        *self.served.lock() += 1;
        let body = self
            .bodies
            .lock()
            .get(&(dork, page))
            .cloned()
            .unwrap_or_else(|| self.default_body.clone());

        Ok(FetchResponse {
            status: 200,
            body,
            latency: Duration::from_millis(25),
        })
    }
}

fn results_page(urls: &[&str]) -> String {
    let links: String = urls
        .iter()
        .map(|u| format!(r#"<div class="g"><a href="/url?q={u}&amp;sa=U">result</a></div>"#))
        .collect();
    format!("<html><body>{links}{}</body></html>", " ".repeat(1500))
}

fn no_results_page() -> String {
    format!(
        "<html><body>Your search did not match any documents{}</body></html>",
        " ".repeat(1500)
    )
}

fn fast_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        dispatch_delay: Duration::from_millis(5),
        idle_delay: Duration::from_millis(5),
        ..SchedulerConfig::default()
    }
}

fn pool_with(n: usize) -> Arc<ProxyPool> {
    let pool = Arc::new(ProxyPool::new(PoolConfig::default()));
    for i in 0..n {
        pool.add(Proxy::new(
            format!("10.50.{}.{}", i / 256, i % 256),
            3128,
            Protocol::Http,
        ))
        .unwrap();
    }
    pool
}

async fn wait_for_state(scheduler: &Arc<Scheduler>, target: SchedulerState) {
    for _ in 0..1000 {
        if scheduler.state() == target {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("scheduler stuck in {}", scheduler.state());
}

/// One dork, one task, three URLs on distinct domains: all three reach the
/// sink, the pool counts one success, and the run completes.
#[tokio::test]
async fn test_minimal_end_to_end() {
    let executor = ScriptedExecutor::new(results_page(&[
        "https://alpha.example.com/admin",
        "https://beta.example.org/login",
        "https://gamma.example.net/panel",
    ]));
    let pool = pool_with(2);
    let queue = Arc::new(TaskQueue::new(QueueConfig::default()));
    let filter = Arc::new(UrlFilter::new(FilterConfig::default()));
    let sink = Arc::new(CollectingSink::new());

    let scheduler = Arc::new(
        Scheduler::new(
            fast_scheduler_config(),
            Arc::clone(&pool),
            Arc::clone(&queue),
            Arc::clone(&filter),
            Arc::new(executor),
        )
        .with_sinks(
            Arc::clone(&sink) as Arc<dyn ResultSink>,
            Arc::clone(&sink) as Arc<dyn ProgressSink>,
            Arc::clone(&sink) as Arc<dyn ErrorSink>,
        ),
    );

    scheduler
        .start(&["inurl:admin".to_string()], EngineOptions::default())
        .unwrap();
    wait_for_state(&scheduler, SchedulerState::Completed).await;

    let results = sink.results();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.dork == "inurl:admin"));
    let positions: Vec<usize> = results.iter().map(|r| r.position).collect();
    assert_eq!(positions, vec![1, 2, 3]);

    let pool_stats = pool.stats();
    assert_eq!(pool_stats.requests, 1);
    assert_eq!(pool_stats.alive, 2);

    let counts = queue.counts();
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.failed, 0);
    assert!(sink.progress_updates() > 0);
}

/// A full catalog across pagination: page 0 links to page 1; both pages'
/// URLs surface exactly once and accounting balances after the drain.
#[tokio::test]
async fn test_pagination_and_accounting() {
    let executor = ScriptedExecutor::new(no_results_page());
    executor.script(
        "paged dork",
        0,
        format!(
            r##"<html><body><a href="/url?q=https://page0.example.com/a">a</a><a id="pnnext" href="#">Next</a>{}</body></html>"##,
            " ".repeat(1500)
        ),
    );
    executor.script(
        "paged dork",
        1,
        results_page(&["https://page1.example.com/b"]),
    );

    let pool = pool_with(3);
    let queue = Arc::new(TaskQueue::new(QueueConfig::default()));
    let filter = Arc::new(UrlFilter::new(FilterConfig::default()));
    let sink = Arc::new(CollectingSink::new());

    let scheduler = Arc::new(
        Scheduler::new(
            fast_scheduler_config(),
            pool,
            Arc::clone(&queue),
            filter,
            Arc::new(executor),
        )
        .with_sinks(
            Arc::clone(&sink) as Arc<dyn ResultSink>,
            Arc::clone(&sink) as Arc<dyn ProgressSink>,
            Arc::clone(&sink) as Arc<dyn ErrorSink>,
        ),
    );

    scheduler
        .start(
            &["paged dork".to_string(), "plain dork".to_string()],
            EngineOptions::default(),
        )
        .unwrap();
    wait_for_state(&scheduler, SchedulerState::Completed).await;

    let urls: Vec<String> = sink.results().iter().map(|r| r.record.url.clone()).collect();
    assert!(urls.contains(&"https://page0.example.com/a".to_string()));
    assert!(urls.contains(&"https://page1.example.com/b".to_string()));

    // 2 ingested + 1 pagination spawn, all terminal
    let counts = queue.counts();
    assert_eq!(counts.total, 3);
    assert_eq!(counts.completed + counts.failed, counts.total);
    assert_eq!(queue.pagination_spawned(), 1);
}

/// The filter pipeline applies inside the full loop: static assets,
/// blacklisted domains, and duplicates never reach the sink.
#[tokio::test]
async fn test_filtering_inside_pipeline() {
    let executor = ScriptedExecutor::new(results_page(&[
        "https://keep.example.com/page?id=1",
        "https://keep.example.com/logo.png",
        "https://blocked.example.net/page",
        "https://keep.example.com/page?id=1",
    ]));

    let filter_config = FilterConfig {
        domain_blacklist: vec!["blocked.example.net".to_string()],
        ..FilterConfig::default()
    };

    let pool = pool_with(1);
    let queue = Arc::new(TaskQueue::new(QueueConfig::default()));
    let filter = Arc::new(UrlFilter::new(filter_config));
    let sink = Arc::new(CollectingSink::new());

    let scheduler = Arc::new(
        Scheduler::new(
            fast_scheduler_config(),
            pool,
            queue,
            Arc::clone(&filter),
            Arc::new(executor),
        )
        .with_sinks(
            Arc::clone(&sink) as Arc<dyn ResultSink>,
            Arc::clone(&sink) as Arc<dyn ProgressSink>,
            Arc::clone(&sink) as Arc<dyn ErrorSink>,
        ),
    );

    scheduler
        .start(&["dork".to_string()], EngineOptions::default())
        .unwrap();
    wait_for_state(&scheduler, SchedulerState::Completed).await;

    let results = sink.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].record.url, "https://keep.example.com/page?id=1");
    assert!(results[0].record.has_params);

    let stats = filter.stats();
    assert_eq!(stats.accepted, 1);
    assert!(stats.rejects_by_reason.contains_key("extension_blacklisted"));
    assert!(stats.rejects_by_reason.contains_key("domain_blacklisted"));
}

/// Anti-public filtering writes accepted hosts to the domain ledger, and
/// the ledger survives across scheduler runs with hit counts increasing.
#[tokio::test]
async fn test_ledger_records_accepted_domains() {
    let dir = tempfile::tempdir().unwrap();
    let ledger_path = dir.path().join("domains.db");
    let ledger = Arc::new(DomainLedger::open(&ledger_path).await.unwrap());

    let filter_config = FilterConfig {
        anti_public: true,
        public_domains: vec!["facebook.com".to_string()],
        track_domains: true,
        dedup: DedupConfig {
            // Domain-level dedup: one record per host per run
            mode: DedupMode::Domain,
            ..DedupConfig::default()
        },
        ..FilterConfig::default()
    };

    let run = |ledger: Arc<DomainLedger>, filter_config: FilterConfig| async move {
        let executor = ScriptedExecutor::new(results_page(&[
            "https://smallshop.example.com/catalog",
            "https://facebook.com/profile",
        ]));
        let pool = pool_with(1);
        let queue = Arc::new(TaskQueue::new(QueueConfig::default()));
        let filter = Arc::new(UrlFilter::new(filter_config));
        let sink = Arc::new(CollectingSink::new());

        let scheduler = Arc::new(
            Scheduler::new(
                fast_scheduler_config(),
                pool,
                queue,
                filter,
                Arc::new(executor),
            )
            .with_ledger(ledger)
            .with_sinks(
                Arc::clone(&sink) as Arc<dyn ResultSink>,
                Arc::clone(&sink) as Arc<dyn ProgressSink>,
                Arc::clone(&sink) as Arc<dyn ErrorSink>,
            ),
        );
        scheduler
            .start(&["dork".to_string()], EngineOptions::default())
            .unwrap();
        wait_for_state(&scheduler, SchedulerState::Completed).await;
        sink.results()
    };

    let first = run(Arc::clone(&ledger), filter_config.clone()).await;
    assert_eq!(first.len(), 1, "public domain must be filtered out");
    assert_eq!(first[0].record.domain, "smallshop.example.com");

    let second = run(Arc::clone(&ledger), filter_config).await;
    assert_eq!(second.len(), 1);

    let entry = ledger
        .lookup("smallshop.example.com")
        .await
        .unwrap()
        .expect("accepted domain must be in the ledger");
    assert_eq!(entry.hit_count, 2);
    assert!(!ledger.contains("facebook.com").await.unwrap());
}

/// Proxies that repeatedly hit CAPTCHAs cool down while the run proceeds
/// on the remaining proxies, and the adaptive controller shrinks the cap.
#[tokio::test]
async fn test_captcha_storm_shrinks_concurrency() {
    let captcha_page = format!(
        r#"<html><body><div class="g-recaptcha"></div>{}</body></html>"#,
        " ".repeat(1500)
    );
    let executor = ScriptedExecutor::new(no_results_page());
    for i in 0..5 {
        executor.script(&format!("dork-{i}"), 0, captcha_page.clone());
    }

    let pool = pool_with(30);
    let queue = Arc::new(TaskQueue::new(QueueConfig {
        // Blocked tasks retry a few times against fresh proxies
        max_retries: 1,
        ..QueueConfig::default()
    }));
    let filter = Arc::new(UrlFilter::new(FilterConfig::default()));
    let sink = Arc::new(CollectingSink::new());

    let scheduler = Arc::new(
        Scheduler::new(
            fast_scheduler_config(),
            Arc::clone(&pool),
            queue,
            filter,
            Arc::new(executor),
        )
        .with_sinks(
            Arc::clone(&sink) as Arc<dyn ResultSink>,
            Arc::clone(&sink) as Arc<dyn ProgressSink>,
            Arc::clone(&sink) as Arc<dyn ErrorSink>,
        ),
    );

    let dorks: Vec<String> = (0..10).map(|i| format!("dork-{i}")).collect();
    scheduler.start(&dorks, EngineOptions::default()).unwrap();
    wait_for_state(&scheduler, SchedulerState::Completed).await;

    let stats = scheduler.stats();
    // Five captcha dorks, each attempted twice (initial + one retry)
    assert_eq!(stats.captcha_count, 10);
    assert!(stats.current_concurrency < 50);
    assert_eq!(stats.failed_dorks, 5);
    assert_eq!(stats.completed_dorks, 5);

    // CAPTCHA reports left proxies alive (cooling down), not quarantined
    let pool_stats = pool.stats();
    assert_eq!(pool_stats.alive, 30);
    assert!(pool_stats.available < 30);
}

/// Stop mid-run: dispatch halts, in-flight work lands, state reaches
/// stopped, and the queue never loses a task.
#[tokio::test]
async fn test_stop_preserves_accounting() {
    let executor = ScriptedExecutor::new(no_results_page());
    let pool = pool_with(2);
    let queue = Arc::new(TaskQueue::new(QueueConfig::default()));
    let filter = Arc::new(UrlFilter::new(FilterConfig::default()));

    let scheduler = Arc::new(Scheduler::new(
        SchedulerConfig {
            initial_concurrency: 10,
            min_concurrency: 10,
            dispatch_delay: Duration::from_millis(20),
            idle_delay: Duration::from_millis(20),
            ..SchedulerConfig::default()
        },
        pool,
        Arc::clone(&queue),
        filter,
        Arc::new(executor),
    ));

    let dorks: Vec<String> = (0..200).map(|i| format!("dork-{i}")).collect();
    scheduler.start(&dorks, EngineOptions::default()).unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    scheduler.stop();
    wait_for_state(&scheduler, SchedulerState::Stopped).await;

    let counts = queue.counts();
    assert_eq!(counts.running, 0);
    assert_eq!(
        counts.pending + counts.completed + counts.failed,
        counts.total
    );
    assert!(counts.pending > 0, "stop should leave undispatched work");
}

/// Start is legal again after completion, and a fresh run re-emits URLs
/// (filter state resets) while the executor keeps serving.
#[tokio::test]
async fn test_restart_after_completion_resets_transient_state() {
    let executor = Arc::new(ScriptedExecutor::new(results_page(&[
        "https://repeat.example.com/page",
    ])));
    let pool = pool_with(1);
    let queue = Arc::new(TaskQueue::new(QueueConfig::default()));
    let filter = Arc::new(UrlFilter::new(FilterConfig::default()));
    let sink = Arc::new(CollectingSink::new());

    let scheduler = Arc::new(
        Scheduler::new(
            fast_scheduler_config(),
            Arc::clone(&pool),
            queue,
            filter,
            Arc::clone(&executor) as Arc<dyn RequestExecutor>,
        )
        .with_sinks(
            Arc::clone(&sink) as Arc<dyn ResultSink>,
            Arc::clone(&sink) as Arc<dyn ProgressSink>,
            Arc::clone(&sink) as Arc<dyn ErrorSink>,
        ),
    );

    scheduler
        .start(&["dork".to_string()], EngineOptions::default())
        .unwrap();
    wait_for_state(&scheduler, SchedulerState::Completed).await;
    assert_eq!(sink.results().len(), 1);

    scheduler
        .start(&["dork".to_string()], EngineOptions::default())
        .unwrap();
    wait_for_state(&scheduler, SchedulerState::Completed).await;

    // Same URL accepted again after the reset; pool history accumulated
    assert_eq!(sink.results().len(), 2);
    assert_eq!(executor.served(), 2);
    assert_eq!(pool.stats().requests, 2);
}
