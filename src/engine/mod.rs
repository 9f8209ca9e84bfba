//! Engine adapter: stateless helpers for one search engine
//!
//! Builds per-page request URLs, classifies response bodies, and extracts
//! result URLs. Everything here is pattern-table driven so upstream HTML
//! drift is repaired by editing the tables, never by touching the
//! scheduler.

pub mod builder;
pub mod classify;
pub mod extract;

pub use builder::build_search_url;
pub use classify::{classify, Verdict};
pub use extract::{extract, Extraction, SearchHit};

/// Engine configuration, fixed at construction time.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Host to query, e.g. `www.google.com`.
    pub domain: String,
    /// `hl` parameter.
    pub language: String,
    /// `gl` parameter.
    pub country: String,
    /// Emit `safe=active` when set.
    pub safe_search: bool,
    /// Result domains to suppress, matched on the full host and any
    /// `*.domain` suffix.
    pub exclude_domains: Vec<String>,
    /// `num` parameter.
    pub results_per_page: usize,
    /// Pagination ceiling per query.
    pub pages_per_query: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            domain: "www.google.com".to_string(),
            language: "en".to_string(),
            country: "us".to_string(),
            safe_search: false,
            exclude_domains: Vec::new(),
            results_per_page: 10,
            pages_per_query: 10,
        }
    }
}

impl EngineOptions {
    pub fn add_exclude_domain(&mut self, domain: impl Into<String>) {
        self.exclude_domains.push(domain.into().to_ascii_lowercase());
    }
}

/// Engine host domains usable for rotation.
pub fn engine_domains() -> Vec<&'static str> {
    vec![
        "www.google.com",
        "www.google.co.uk",
        "www.google.ca",
        "www.google.com.au",
        "www.google.de",
        "www.google.fr",
        "www.google.es",
        "www.google.it",
        "www.google.nl",
        "www.google.be",
        "www.google.ch",
        "www.google.at",
        "www.google.se",
        "www.google.no",
        "www.google.dk",
        "www.google.fi",
        "www.google.pl",
        "www.google.pt",
        "www.google.ie",
        "www.google.co.nz",
    ]
}
