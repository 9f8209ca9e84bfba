//! URL filter pipeline
//!
//! Decides which extracted URLs pass and records the unique set. Gates are
//! applied in a fixed order; the first failing gate determines the reject
//! reason and later gates are not evaluated. Deduplication runs last so
//! that reject statistics reflect the real reason a URL never surfaced.
//!
//! Key components:
//! - `UrlFilter`: the ordered gate chain plus dedup, behind one lock
//! - `Deduplicator`: mode-keyed membership over a Bloom filter with an
//!   optional exact keyset
//! - `BloomFilter`: the memory-bounded approximate structure

pub mod bloom;
pub mod dedup;

pub use bloom::BloomFilter;
pub use dedup::{DedupConfig, DedupMode, Deduplicator};

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use url::Url;

use crate::urlutil;

/// Default extension blacklist: static assets and binary bundles that are
/// never useful scrape results.
pub const DEFAULT_EXTENSION_BLACKLIST: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "svg", "ico", "webp", "css", "js",
    "woff", "woff2", "ttf", "eot", "otf", "mp3", "mp4", "avi", "mov",
    "webm", "zip", "tar", "gz", "rar", "7z", "exe", "dmg", "iso",
];

/// Longest path suffix still treated as an extension token.
const MAX_EXTENSION_LEN: usize = 6;

/// Filter configuration.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub min_url_length: usize,
    pub max_url_length: usize,
    /// Registrable-domain TLD allow list; empty disables the gate.
    pub tld_whitelist: Vec<String>,
    pub tld_blacklist: Vec<String>,
    /// Domain allow list with `*.suffix` support; empty disables the gate.
    pub domain_whitelist: Vec<String>,
    pub domain_blacklist: Vec<String>,
    pub extension_blacklist: Vec<String>,
    /// When non-empty, URLs with an extension outside this list reject.
    pub extension_whitelist: Vec<String>,
    /// At least one must occur (case-insensitive) when non-empty.
    pub keyword_include: Vec<String>,
    /// None may occur.
    pub keyword_exclude: Vec<String>,
    /// Require both `?` and `=` in the URL.
    pub url_params_only: bool,
    /// Reject hosts in (or under) the public-domain set.
    pub anti_public: bool,
    pub public_domains: Vec<String>,
    /// Record accepted hosts to the domain ledger.
    pub track_domains: bool,
    pub dedup: DedupConfig,
}

impl Default for FilterConfig {
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
            dedup: DedupConfig::default(),
        }
    }
}

/// Why a URL was rejected. Ordered to match the gate chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    Empty,
    TooShort,
    TooLong,
    NoHost,
    InvalidDomain,
    TldNotWhitelisted,
    TldBlacklisted,
    DomainNotWhitelisted,
    DomainBlacklisted,
    ExtensionBlacklisted,
    ExtensionNotWhitelisted,
    MissingKeyword,
    ExcludedKeyword,
    NoParams,
    PublicDomain,
    Duplicate,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::TooShort => "too_short",
            Self::TooLong => "too_long",
            Self::NoHost => "no_host",
            Self::InvalidDomain => "invalid_domain",
            Self::TldNotWhitelisted => "tld_not_whitelisted",
            Self::TldBlacklisted => "tld_blacklisted",
            Self::DomainNotWhitelisted => "domain_not_whitelisted",
            Self::DomainBlacklisted => "domain_blacklisted",
            Self::ExtensionBlacklisted => "extension_blacklisted",
            Self::ExtensionNotWhitelisted => "extension_not_whitelisted",
            Self::MissingKeyword => "missing_keyword",
            Self::ExcludedKeyword => "excluded_keyword",
            Self::NoParams => "no_params",
            Self::PublicDomain => "public_domain",
            Self::Duplicate => "duplicate",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An accepted URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlRecord {
    pub url: String,
    pub domain: String,
    pub top_domain: String,
    pub has_params: bool,
}

/// Filter statistics snapshot.
#[derive(Debug, Clone, Default)]
pub struct FilterStats {
    pub checked: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub rejects_by_reason: HashMap<&'static str, u64>,
}

struct FilterState {
    dedup: Deduplicator,
    stats: FilterStats,
}

/// The per-URL decision pipeline.
pub struct UrlFilter {
    config: FilterConfig,
    state: Mutex<FilterState>,
}

impl UrlFilter {
    pub fn new(config: FilterConfig) -> Self {
        let dedup = Deduplicator::new(&config.dedup);
        Self {
            config,
            state: Mutex::new(FilterState {
                dedup,
                stats: FilterStats::default(),
            }),
        }
    }

    /// Run the full decision procedure for one URL, including dedup.
    /// Concurrent adds of URLs with the same dedup key yield exactly one
    /// accepted record.
    pub fn add(&self, url: &str) -> Result<UrlRecord, RejectReason> {
        let gated = self.check_gates(url);

        let mut state = self.state.lock();
        state.stats.checked += 1;

        let record = match gated {
            Ok(record) => record,
            Err(reason) => {
                state.stats.rejected += 1;
                *state.stats.rejects_by_reason.entry(reason.as_str()).or_insert(0) += 1;
                return Err(reason);
            }
        };

        if !state.dedup.is_new(&record.url) {
            state.stats.rejected += 1;
            *state
                .stats
                .rejects_by_reason
                .entry(RejectReason::Duplicate.as_str())
                .or_insert(0) += 1;
            return Err(RejectReason::Duplicate);
        }

        state.stats.accepted += 1;
        Ok(record)
    }

    /// Filter a batch, returning only the accepted records in order.
    pub fn add_many(&self, urls: &[String]) -> Vec<UrlRecord> {
        urls.iter().filter_map(|u| self.add(u).ok()).collect()
    }

    /// Gates 1-13; dedup is not consulted here.
    fn check_gates(&self, url: &str) -> Result<UrlRecord, RejectReason> {
        let url = url.trim();
        if url.is_empty() {
            return Err(RejectReason::Empty);
        }
        if url.len() < self.config.min_url_length {
            return Err(RejectReason::TooShort);
        }
        if url.len() > self.config.max_url_length {
            return Err(RejectReason::TooLong);
        }

        let parsed = Url::parse(url).map_err(|_| RejectReason::NoHost)?;
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or(RejectReason::NoHost)?
            .to_ascii_lowercase();

        if !urlutil::is_valid_host(&host) {
            return Err(RejectReason::InvalidDomain);
        }

        let top = urlutil::top_domain(&host);
        let tld = registrable_tld(&top);

        if !self.config.tld_whitelist.is_empty()
            && !self.config.tld_whitelist.iter().any(|t| tld_eq(t, &tld))
        {
            return Err(RejectReason::TldNotWhitelisted);
        }
        if self.config.tld_blacklist.iter().any(|t| tld_eq(t, &tld)) {
            return Err(RejectReason::TldBlacklisted);
        }

        if !self.config.domain_whitelist.is_empty()
            && !self
                .config
                .domain_whitelist
                .iter()
                .any(|d| urlutil::host_matches(&host, d) || urlutil::host_matches(&top, d))
        {
            return Err(RejectReason::DomainNotWhitelisted);
        }
        if self
            .config
            .domain_blacklist
            .iter()
            .any(|d| urlutil::host_matches(&host, d) || urlutil::host_matches(&top, d))
        {
            return Err(RejectReason::DomainBlacklisted);
        }

        if let Some(ext) = path_extension(parsed.path()) {
            if self
                .config
                .extension_blacklist
                .iter()
                .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext))
            {
                return Err(RejectReason::ExtensionBlacklisted);
            }
            if !self.config.extension_whitelist.is_empty()
                && !self
                    .config
                    .extension_whitelist
                    .iter()
                    .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext))
            {
                return Err(RejectReason::ExtensionNotWhitelisted);
            }
        }

        let lower = url.to_lowercase();
        if !self.config.keyword_include.is_empty()
            && !self
                .config
                .keyword_include
                .iter()
                .any(|k| lower.contains(&k.to_lowercase()))
        {
            return Err(RejectReason::MissingKeyword);
        }
        if self
            .config
            .keyword_exclude
            .iter()
            .any(|k| !k.is_empty() && lower.contains(&k.to_lowercase()))
        {
            return Err(RejectReason::ExcludedKeyword);
        }

        if self.config.url_params_only && !urlutil::has_params(url) {
            return Err(RejectReason::NoParams);
        }

        if self.config.anti_public
            && self
                .config
                .public_domains
                .iter()
                .any(|d| urlutil::host_matches(&host, d))
        {
            return Err(RejectReason::PublicDomain);
        }

        let has_params = urlutil::has_params(url);
        Ok(UrlRecord {
            url: url.to_string(),
            domain: host,
            top_domain: top,
            has_params,
        })
    }

    /// Whether accepted hosts should be written to the domain ledger.
    pub fn track_domains(&self) -> bool {
        self.config.anti_public && self.config.track_domains
    }

    pub fn stats(&self) -> FilterStats {
        self.state.lock().stats.clone()
    }

    /// Number of unique dedup keys accepted so far.
    pub fn unique_count(&self) -> u64 {
        self.state.lock().dedup.len()
    }

    /// Reset dedup state and statistics for a fresh run.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.dedup = Deduplicator::new(&self.config.dedup);
        state.stats = FilterStats::default();
    }
}

/// The suffix of a registrable domain: `com` for `example.com`,
/// `co.uk` for `example.co.uk`. Empty for single-label hosts.
fn registrable_tld(top_domain: &str) -> String {
    match top_domain.split_once('.') {
        Some((_, suffix)) => suffix.to_string(),
        None => String::new(),
    }
}

fn tld_eq(configured: &str, tld: &str) -> bool {
    configured.trim_start_matches('.').eq_ignore_ascii_case(tld)
}

/// Extract a single short extension token from a URL path, if present.
fn path_extension(path: &str) -> Option<String> {
    let segment = path.rsplit('/').next()?;
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
