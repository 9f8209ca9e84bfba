//! Configuration
//!
//! One TOML file drives the whole core. Each subsystem gets its own
//! section struct with serde defaults; `Config::validate` collects every
//! problem into a single error so the user fixes the file in one pass
//! rather than playing whack-a-mole.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::engine::EngineOptions;
use crate::filter::{DedupConfig, DedupMode, FilterConfig, DEFAULT_EXTENSION_BLACKLIST};
use crate::proxy::PoolConfig;
use crate::queue::QueueConfig;
use crate::scheduler::SchedulerConfig;

/// Default user agent for outbound requests.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub filter: FilterSettings,
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Search engine section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    pub domain: String,
    pub language: String,
    pub country: String,
    pub safe_search: bool,
    pub exclude_domains: Vec<String>,
    pub results_per_page: usize,
    pub pages_per_dork: usize,
    pub user_agent: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            domain: "www.google.com".to_string(),
            language: "en".to_string(),
            country: "us".to_string(),
            safe_search: false,
            exclude_domains: Vec::new(),
            results_per_page: 10,
            pages_per_dork: 10,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl EngineSettings {
    pub fn to_engine_options(&self) -> EngineOptions {
        EngineOptions {
            domain: self.domain.clone(),
            language: self.language.clone(),
            country: self.country.clone(),
            safe_search: self.safe_search,
            exclude_domains: self
                .exclude_domains
                .iter()
                .map(|d| d.to_ascii_lowercase())
                .collect(),
            results_per_page: self.results_per_page,
            pages_per_query: self.pages_per_dork,
        }
    }
}

/// Proxy pool section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    pub max_failures: u64,
    pub cooldown_secs: u64,
    pub quarantine_secs: u64,
    pub health_check_interval_secs: u64,
    /// Percent; proxies with enough history below this are benched.
    pub min_success_rate: f64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_failures: 5,
            cooldown_secs: 30,
            quarantine_secs: 300,
            health_check_interval_secs: 60,
            min_success_rate: 50.0,
        }
    }
}

impl PoolSettings {
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_failures: self.max_failures,
            cooldown: Duration::from_secs(self.cooldown_secs),
            quarantine: Duration::from_secs(self.quarantine_secs),
            health_check_interval: Duration::from_secs(self.health_check_interval_secs),
            min_success_rate: self.min_success_rate,
        }
    }
}

/// Task queue section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    pub max_retries: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

impl QueueSettings {
    pub fn to_queue_config(&self, scheduler: &SchedulerSettings, engine: &EngineSettings) -> QueueConfig {
        QueueConfig {
            max_concurrency: scheduler.initial_concurrency,
            max_retries: self.max_retries,
            pages_per_dork: engine.pages_per_dork,
        }
    }
}

/// Scheduler section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub min_concurrency: usize,
    pub initial_concurrency: usize,
    pub max_concurrency: usize,
    /// 0..1 recent success rate the adaptive controller aims for.
    pub target_success_rate: f64,
    pub adaptive: bool,
    pub request_timeout_secs: u64,
    pub sticky_tasks: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            min_concurrency: 10,
            initial_concurrency: 50,
            max_concurrency: 200,
            target_success_rate: 0.70,
            adaptive: true,
            request_timeout_secs: 30,
            sticky_tasks: false,
        }
    }
}

impl SchedulerSettings {
    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            min_concurrency: self.min_concurrency,
            initial_concurrency: self.initial_concurrency,
            max_concurrency: self.max_concurrency,
            target_success_rate: self.target_success_rate,
            adaptive: self.adaptive,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            sticky_tasks: self.sticky_tasks,
            ..SchedulerConfig::default()
        }
    }
}

/// Filter pipeline section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSettings {
    pub min_url_length: usize,
    pub max_url_length: usize,
    pub tld_whitelist: Vec<String>,
    pub tld_blacklist: Vec<String>,
    pub domain_whitelist: Vec<String>,
    pub domain_blacklist: Vec<String>,
    pub extension_blacklist: Vec<String>,
    pub extension_whitelist: Vec<String>,
    pub keyword_include: Vec<String>,
    pub keyword_exclude: Vec<String>,
    pub url_params_only: bool,
    pub anti_public: bool,
    pub public_domains: Vec<String>,
    pub track_domains: bool,
    /// One of: exact, normalized, domain, top_domain.
    pub dedup_mode: String,
    pub dedup_expected_items: usize,
    pub dedup_false_positive_rate: f64,
    pub dedup_exact: bool,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            min_url_length: 10,
            max_url_length: 2000,
            tld_whitelist: Vec::new(),
            tld_blacklist: Vec::new(),
            domain_whitelist: Vec::new(),
            domain_blacklist: Vec::new(),
            extension_blacklist: DEFAULT_EXTENSION_BLACKLIST
                .iter()
                .map(|s| s.to_string())
                .collect(),
            extension_whitelist: Vec::new(),
            keyword_include: Vec::new(),
            keyword_exclude: Vec::new(),
            url_params_only: false,
            anti_public: false,
            public_domains: Vec::new(),
            track_domains: false,
            dedup_mode: "normalized".to_string(),
            dedup_expected_items: 1_000_000,
            dedup_false_positive_rate: 0.01,
            dedup_exact: false,
        }
    }
}

impl FilterSettings {
    fn parse_dedup_mode(&self) -> Option<DedupMode> {
        match self.dedup_mode.to_ascii_lowercase().as_str() {
            "exact" => Some(DedupMode::Exact),
            "normalized" => Some(DedupMode::Normalized),
            "domain" => Some(DedupMode::Domain),
            "top_domain" | "topdomain" => Some(DedupMode::TopDomain),
            _ => None,
        }
    }

    pub fn to_filter_config(&self) -> FilterConfig {
        FilterConfig {
            min_url_length: self.min_url_length,
            max_url_length: self.max_url_length,
            tld_whitelist: self.tld_whitelist.clone(),
            tld_blacklist: self.tld_blacklist.clone(),
            domain_whitelist: self.domain_whitelist.clone(),
            domain_blacklist: self.domain_blacklist.clone(),
            extension_blacklist: self.extension_blacklist.clone(),
            extension_whitelist: self.extension_whitelist.clone(),
            keyword_include: self.keyword_include.clone(),
            keyword_exclude: self.keyword_exclude.clone(),
            url_params_only: self.url_params_only,
            anti_public: self.anti_public,
            public_domains: self.public_domains.clone(),
            track_domains: self.track_domains,
            dedup: DedupConfig {
                mode: self.parse_dedup_mode().unwrap_or_default(),
                expected_items: self.dedup_expected_items,
                false_positive_rate: self.dedup_false_positive_rate,
                exact: self.dedup_exact,
            },
        }
    }
}

/// Domain ledger section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("domains.db"),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Log severity level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            level: LogLevel::Info,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration fields, reporting every error at once.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.engine.domain.is_empty() {
            errors.push("engine domain must not be empty".to_string());
        }
        if self.engine.results_per_page == 0 {
            errors.push("results_per_page must be positive".to_string());
        }
        if self.engine.results_per_page > 100 {
            errors.push("results_per_page must be <= 100".to_string());
        }
        if self.engine.pages_per_dork == 0 {
            errors.push("pages_per_dork must be positive".to_string());
        }

        if self.pool.min_success_rate < 0.0 || self.pool.min_success_rate > 100.0 {
            errors.push("pool min_success_rate must be between 0 and 100".to_string());
        }

        if self.scheduler.min_concurrency == 0 {
            errors.push("min_concurrency must be positive".to_string());
        }
        if self.scheduler.min_concurrency > self.scheduler.max_concurrency {
            errors.push(format!(
                "min_concurrency ({}) must not exceed max_concurrency ({})",
                self.scheduler.min_concurrency, self.scheduler.max_concurrency
            ));
        }
        if self.scheduler.initial_concurrency < self.scheduler.min_concurrency
            || self.scheduler.initial_concurrency > self.scheduler.max_concurrency
        {
            errors.push(format!(
                "initial_concurrency ({}) must lie within [{}, {}]",
                self.scheduler.initial_concurrency,
                self.scheduler.min_concurrency,
                self.scheduler.max_concurrency
            ));
        }
        if self.scheduler.target_success_rate <= 0.0 || self.scheduler.target_success_rate >= 1.0 {
            errors.push("target_success_rate must be between 0.0 and 1.0 (exclusive)".to_string());
        }
        if self.scheduler.request_timeout_secs == 0 {
            errors.push("request_timeout_secs must be positive".to_string());
        }

        if self.filter.min_url_length > self.filter.max_url_length {
            errors.push("filter min_url_length must not exceed max_url_length".to_string());
        }
        if self.filter.parse_dedup_mode().is_none() {
            errors.push(format!(
                "unknown dedup_mode '{}' (expected exact, normalized, domain, or top_domain)",
                self.filter.dedup_mode
            ));
        }
        if self.filter.dedup_false_positive_rate <= 0.0
            || self.filter.dedup_false_positive_rate >= 1.0
        {
            errors.push(
                "dedup_false_positive_rate must be between 0.0 (exclusive) and 1.0 (exclusive)"
                    .to_string(),
            );
        }
        if self.filter.dedup_expected_items == 0 {
            errors.push("dedup_expected_items must be positive".to_string());
        }

        if self.ledger.enabled && self.ledger.path.as_os_str().is_empty() {
            errors.push("ledger path must not be empty when the ledger is enabled".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}
