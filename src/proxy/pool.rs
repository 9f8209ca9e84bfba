//! Proxy pool with weighted rotation and health tracking
//!
//! The pool owns the full proxy set plus the alive/quarantined/dead buckets
//! and serves selections to the scheduler. All mutating operations hold the
//! pool lock; snapshot queries copy out under the same lock. No lock is
//! ever held across an HTTP call.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use thiserror::Error;

use super::parser::{parse_proxy_list, ParseError};
use super::{PoolConfig, Proxy, ProxyStatus};

/// Errors from pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("proxy {0} already exists")]
    AlreadyExists(String),
    #[error("no available proxies")]
    NoAvailable,
}

/// How the pool picks among available proxies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    RoundRobin,
    Random,
    LeastUsed,
    LeastLatency,
    #[default]
    Weighted,
}

/// Pool statistics snapshot.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub total: usize,
    pub alive: usize,
    /// Alive and not on cooldown.
    pub available: usize,
    pub quarantined: usize,
    pub dead: usize,
    pub rotations: u64,
    pub requests: u64,
    pub avg_success_rate: f64,
}

impl PoolStats {
    pub fn alive_percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.alive as f64 / self.total as f64 * 100.0
    }
}

struct PoolInner {
    proxies: HashMap<String, Proxy>,
    /// Bucket membership by id, in insertion order.
    alive: Vec<String>,
    quarantined: Vec<String>,
    dead: Vec<String>,
    /// Optional task -> proxy pinning; evicted when the proxy leaves alive.
    sticky: HashMap<String, String>,
    use_count: HashMap<String, u64>,
    rr_cursor: usize,
    rotations: u64,
    requests: u64,
}

impl PoolInner {
    fn remove_from(bucket: &mut Vec<String>, id: &str) {
        if let Some(pos) = bucket.iter().position(|b| b == id) {
            bucket.remove(pos);
        }
    }

    fn quarantine(&mut self, id: &str, duration: Duration) {
        if let Some(proxy) = self.proxies.get_mut(id) {
            proxy.status = ProxyStatus::Quarantined;
            proxy.set_cooldown(duration);
        }
        Self::remove_from(&mut self.alive, id);
        if !self.quarantined.iter().any(|q| q == id) {
            self.quarantined.push(id.to_string());
        }
        self.evict_sticky(id);
    }

    fn revive(&mut self, id: &str) {
        if let Some(proxy) = self.proxies.get_mut(id) {
            proxy.status = ProxyStatus::Alive;
            proxy.fail_count = 0;
            proxy.cooldown_until = None;
        }
        Self::remove_from(&mut self.quarantined, id);
        Self::remove_from(&mut self.dead, id);
        if !self.alive.iter().any(|a| a == id) {
            self.alive.push(id.to_string());
        }
    }

    fn evict_sticky(&mut self, proxy_id: &str) {
        self.sticky.retain(|_, pinned| pinned != proxy_id);
    }

    /// Available proxies in insertion order.
    fn available_ids(&self) -> Vec<String> {
        self.alive
            .iter()
            .filter(|id| {
                self.proxies
                    .get(id.as_str())
                    .is_some_and(|p| p.is_available())
            })
            .cloned()
            .collect()
    }
}

/// Shared proxy pool.
pub struct ProxyPool {
    inner: Mutex<PoolInner>,
    config: PoolConfig,
    strategy: RotationStrategy,
    health_check_running: AtomicBool,
}

impl ProxyPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                proxies: HashMap::new(),
                alive: Vec::new(),
                quarantined: Vec::new(),
                dead: Vec::new(),
                sticky: HashMap::new(),
                use_count: HashMap::new(),
                rr_cursor: 0,
                rotations: 0,
                requests: 0,
            }),
            config,
            strategy: RotationStrategy::default(),
            health_check_running: AtomicBool::new(false),
        }
    }

    pub fn with_strategy(config: PoolConfig, strategy: RotationStrategy) -> Self {
        let mut pool = Self::new(config);
        pool.strategy = strategy;
        pool
    }

    /// Insert a new proxy. The proxy enters the alive bucket immediately.
    pub fn add(&self, mut proxy: Proxy) -> Result<(), PoolError> {
        let mut inner = self.inner.lock();
        if inner.proxies.contains_key(&proxy.id) {
            return Err(PoolError::AlreadyExists(proxy.id));
        }

        proxy.status = ProxyStatus::Alive;
        let id = proxy.id.clone();
        inner.proxies.insert(id.clone(), proxy);
        inner.alive.push(id);
        Ok(())
    }

    /// Insert many proxies, returning the added count and per-proxy errors.
    pub fn add_many(&self, proxies: Vec<Proxy>) -> (usize, Vec<PoolError>) {
        let mut added = 0;
        let mut errors = Vec::new();
        for proxy in proxies {
            match self.add(proxy) {
                Ok(()) => added += 1,
                Err(e) => errors.push(e),
            }
        }
        (added, errors)
    }

    /// Load proxies from a file, skipping comments/blanks. Parse errors are
    /// returned alongside the count of successfully added proxies.
    pub fn load_from_file(&self, path: &Path) -> std::io::Result<(usize, Vec<ParseError>)> {
        let text = std::fs::read_to_string(path)?;
        let (proxies, errors) = parse_proxy_list(&text);
        let (added, add_errors) = self.add_many(proxies);
        for err in &add_errors {
            tracing::debug!("skipping proxy: {err}");
        }
        Ok((added, errors))
    }

    /// Select one available proxy using the configured rotation strategy.
    pub fn get(&self) -> Result<Proxy, PoolError> {
        let mut inner = self.inner.lock();
        inner.rotations += 1;

        let available = inner.available_ids();
        if available.is_empty() {
            return Err(PoolError::NoAvailable);
        }

        let id = self.select(&mut inner, &available);
        self.record_usage(&mut inner, &id);
        Ok(inner.proxies[&id].clone())
    }

    /// Select a proxy for a task, honoring any sticky assignment that is
    /// still alive. The fresh selection is pinned for subsequent calls.
    pub fn get_for_task(&self, task_id: &str) -> Result<Proxy, PoolError> {
        let mut inner = self.inner.lock();
        inner.rotations += 1;

        if let Some(pinned) = inner.sticky.get(task_id).cloned() {
            let usable = inner
                .proxies
                .get(&pinned)
                .is_some_and(|p| p.is_available());
            if usable {
                self.record_usage(&mut inner, &pinned);
                return Ok(inner.proxies[&pinned].clone());
            }
            inner.sticky.remove(task_id);
        }

        let available = inner.available_ids();
        if available.is_empty() {
            return Err(PoolError::NoAvailable);
        }

        let id = self.select(&mut inner, &available);
        self.record_usage(&mut inner, &id);
        inner.sticky.insert(task_id.to_string(), id.clone());
        Ok(inner.proxies[&id].clone())
    }

    fn record_usage(&self, inner: &mut PoolInner, id: &str) {
        *inner.use_count.entry(id.to_string()).or_insert(0) += 1;
        if let Some(proxy) = inner.proxies.get_mut(id) {
            proxy.last_used = Some(Instant::now());
        }
    }

    fn select(&self, inner: &mut PoolInner, available: &[String]) -> String {
        if available.len() == 1 {
            return available[0].clone();
        }
        match self.strategy {
            RotationStrategy::RoundRobin => {
                let idx = inner.rr_cursor % available.len();
                inner.rr_cursor = inner.rr_cursor.wrapping_add(1);
                available[idx].clone()
            }
            RotationStrategy::Random => {
                let idx = rand::thread_rng().gen_range(0..available.len());
                available[idx].clone()
            }
            RotationStrategy::LeastUsed => available
                .iter()
                .min_by_key(|id| inner.use_count.get(*id).copied().unwrap_or(0))
                .cloned()
                .unwrap_or_else(|| available[0].clone()),
            RotationStrategy::LeastLatency => available
                .iter()
                .filter(|id| inner.proxies[id.as_str()].latency > Duration::ZERO)
                .min_by_key(|id| inner.proxies[id.as_str()].latency)
                .cloned()
                .unwrap_or_else(|| {
                    let idx = rand::thread_rng().gen_range(0..available.len());
                    available[idx].clone()
                }),
            RotationStrategy::Weighted => Self::weighted_select(inner, available),
        }
    }

    /// Weighted random selection: base weight 1, up to +2 for a perfect
    /// success rate, halved when average latency exceeds 5 seconds. The
    /// draw is a single uniform sample scaled to the cumulative total; the
    /// scan resolves boundary ties left-most and falls back to the last
    /// candidate on floating-point shortfall.
    fn weighted_select(inner: &PoolInner, available: &[String]) -> String {
        let mut weights = Vec::with_capacity(available.len());
        let mut total = 0.0f64;

        for id in available {
            let proxy = &inner.proxies[id.as_str()];
            let mut weight = 1.0;
            if proxy.total_requests > 0 {
                weight += proxy.success_rate() / 100.0 * 2.0;
            }
            if proxy.latency > Duration::from_secs(5) {
                weight *= 0.5;
            }
            weights.push(weight);
            total += weight;
        }

        let draw = rand::thread_rng().gen::<f64>() * total;
        let mut cumulative = 0.0;
        for (id, weight) in available.iter().zip(&weights) {
            cumulative += weight;
            if draw <= cumulative {
                return id.clone();
            }
        }
        available[available.len() - 1].clone()
    }

    /// Return a proxy by id, if known.
    pub fn get_by_id(&self, id: &str) -> Option<Proxy> {
        self.inner.lock().proxies.get(id).cloned()
    }

    /// Record a successful request. Revives the proxy if it was benched.
    pub fn report_success(&self, id: &str, latency: Duration) {
        let mut inner = self.inner.lock();
        inner.requests += 1;

        let Some(proxy) = inner.proxies.get_mut(id) else {
            return;
        };
        let was_benched = matches!(
            proxy.status,
            ProxyStatus::Quarantined | ProxyStatus::Dead
        );
        proxy.record_success(latency);
        proxy.status = ProxyStatus::Alive;

        if was_benched {
            inner.revive(id);
            tracing::debug!(proxy = id, "proxy revived by successful request");
        }
    }

    /// Record a failed request. Quarantines after `max_failures` in a row.
    pub fn report_failure(&self, id: &str) {
        let mut inner = self.inner.lock();
        inner.requests += 1;

        let Some(proxy) = inner.proxies.get_mut(id) else {
            return;
        };
        proxy.record_failure();

        if proxy.fail_count >= self.config.max_failures {
            inner.quarantine(id, self.config.quarantine);
            tracing::info!(proxy = id, "proxy quarantined after consecutive failures");
        }
    }

    /// Record a CAPTCHA hit. The proxy stays alive but is skipped by
    /// selection until the cooldown expires.
    pub fn report_captcha(&self, id: &str) {
        let mut inner = self.inner.lock();
        let Some(proxy) = inner.proxies.get_mut(id) else {
            return;
        };
        proxy.captcha_count += 1;
        proxy.last_check = Some(Instant::now());
        proxy.set_cooldown(self.config.cooldown);
        tracing::debug!(proxy = id, "proxy cooling down after CAPTCHA");
    }

    /// Record a block: unconditional quarantine.
    pub fn report_block(&self, id: &str) {
        let mut inner = self.inner.lock();
        if !inner.proxies.contains_key(id) {
            return;
        }
        inner.quarantine(id, self.config.quarantine);
        tracing::info!(proxy = id, "proxy quarantined after block");
    }

    /// Administrative: mark a proxy permanently dead.
    pub fn mark_dead(&self, id: &str) {
        let mut inner = self.inner.lock();
        let Some(proxy) = inner.proxies.get_mut(id) else {
            return;
        };
        proxy.status = ProxyStatus::Dead;
        proxy.last_check = Some(Instant::now());

        PoolInner::remove_from(&mut inner.alive, id);
        PoolInner::remove_from(&mut inner.quarantined, id);
        if !inner.dead.iter().any(|d| d == id) {
            inner.dead.push(id.to_string());
        }
        inner.evict_sticky(id);
    }

    /// Administrative: mark a proxy banned. Banned proxies sit in
    /// quarantine for three times the normal duration.
    pub fn mark_banned(&self, id: &str) {
        let mut inner = self.inner.lock();
        let Some(proxy) = inner.proxies.get_mut(id) else {
            return;
        };
        proxy.ban_count += 1;
        proxy.last_check = Some(Instant::now());
        inner.quarantine(id, self.config.quarantine * 3);
        if let Some(proxy) = inner.proxies.get_mut(id) {
            proxy.status = ProxyStatus::Banned;
        }
    }

    /// One health-check sweep: revive quarantined proxies whose cooldown
    /// expired, and bench alive proxies with enough history and a success
    /// rate below the configured minimum.
    pub fn perform_health_check(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        let to_revive: Vec<String> = inner
            .quarantined
            .iter()
            .filter(|id| {
                inner.proxies.get(id.as_str()).is_some_and(|p| {
                    p.status != ProxyStatus::Banned
                        && p.cooldown_until.is_none_or(|until| now >= until)
                })
            })
            .cloned()
            .collect();
        // Banned proxies also come back once their extended cooldown passes
        let banned_expired: Vec<String> = inner
            .quarantined
            .iter()
            .filter(|id| {
                inner.proxies.get(id.as_str()).is_some_and(|p| {
                    p.status == ProxyStatus::Banned
                        && p.cooldown_until.is_none_or(|until| now >= until)
                })
            })
            .cloned()
            .collect();

        for id in to_revive.iter().chain(&banned_expired) {
            inner.revive(id);
            tracing::debug!(proxy = id.as_str(), "proxy revived from quarantine");
        }

        let to_bench: Vec<String> = inner
            .alive
            .iter()
            .filter(|id| {
                inner.proxies.get(id.as_str()).is_some_and(|p| {
                    p.total_requests >= 10 && p.success_rate() < self.config.min_success_rate
                })
            })
            .cloned()
            .collect();

        for id in to_bench {
            inner.quarantine(&id, self.config.quarantine);
            tracing::info!(proxy = id.as_str(), "proxy quarantined for sustained low success rate");
        }
    }

    /// Spawn the periodic health-check loop. Call `stop_health_check` to
    /// end it; the task exits at its next tick.
    pub fn start_health_check(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.health_check_running.store(true, Ordering::Relaxed);
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pool.config.health_check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of a tokio interval fires immediately; skip it
            ticker.tick().await;
            while pool.health_check_running.load(Ordering::Relaxed) {
                ticker.tick().await;
                pool.perform_health_check();
            }
        })
    }

    pub fn stop_health_check(&self) {
        self.health_check_running.store(false, Ordering::Relaxed);
    }

    /// Recommended worker count for the current pool: one worker per ten
    /// alive proxies, clamped to [1, 200]; zero for an empty pool.
    pub fn recommended_workers(&self) -> usize {
        let alive = self.inner.lock().alive.len();
        if alive == 0 {
            return 0;
        }
        (alive / 10).clamp(1, 200)
    }

    /// Snapshot of current pool statistics.
    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock();

        let available = inner
            .alive
            .iter()
            .filter(|id| {
                inner
                    .proxies
                    .get(id.as_str())
                    .is_some_and(|p| p.is_available())
            })
            .count();

        let mut rate_sum = 0.0;
        let mut rated = 0usize;
        for id in &inner.alive {
            if let Some(proxy) = inner.proxies.get(id) {
                if proxy.total_requests > 0 {
                    rate_sum += proxy.success_rate();
                    rated += 1;
                }
            }
        }

        PoolStats {
            total: inner.proxies.len(),
            alive: inner.alive.len(),
            available,
            quarantined: inner.quarantined.len(),
            dead: inner.dead.len(),
            rotations: inner.rotations,
            requests: inner.requests,
            avg_success_rate: if rated > 0 { rate_sum / rated as f64 } else { 0.0 },
        }
    }

    /// Snapshot of all alive proxies.
    pub fn all_alive(&self) -> Vec<Proxy> {
        let inner = self.inner.lock();
        inner
            .alive
            .iter()
            .filter_map(|id| inner.proxies.get(id).cloned())
            .collect()
    }

    /// Snapshot of all quarantined proxies.
    pub fn all_quarantined(&self) -> Vec<Proxy> {
        let inner = self.inner.lock();
        inner
            .quarantined
            .iter()
            .filter_map(|id| inner.proxies.get(id).cloned())
            .collect()
    }

    /// Snapshot of all dead proxies.
    pub fn all_dead(&self) -> Vec<Proxy> {
        let inner = self.inner.lock();
        inner
            .dead
            .iter()
            .filter_map(|id| inner.proxies.get(id).cloned())
            .collect()
    }
}
