//! URL deduplication
//!
//! A dedup key is derived from each URL by the configured mode and tested
//! against a Bloom filter sized for the expected input. When exact mode is
//! requested a keyset is kept alongside and consulted first, trading
//! memory that scales with unique URLs for the removal of false positives.

use std::collections::HashSet;

use crate::urlutil;

use super::bloom::BloomFilter;

/// How a URL maps to its dedup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupMode {
    /// The URL string as-is.
    Exact,
    /// The normalized URL (see `urlutil::normalize`).
    #[default]
    Normalized,
    /// The URL's host, lowercased.
    Domain,
    /// The URL's registrable domain.
    TopDomain,
}

/// Deduplicator configuration.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub mode: DedupMode,
    /// Expected number of unique URLs; sizes the Bloom filter.
    pub expected_items: usize,
    pub false_positive_rate: f64,
    /// Keep an exact keyset alongside the filter.
    pub exact: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            mode: DedupMode::Normalized,
            expected_items: 1_000_000,
            false_positive_rate: 0.01,
            exact: false,
        }
    }
}

/// Tracks seen dedup keys.
pub struct Deduplicator {
    mode: DedupMode,
    bloom: BloomFilter,
    /// Present only when exact dedup was requested.
    keys: Option<HashSet<String>>,
    inserted: u64,
}

impl Deduplicator {
    pub fn new(config: &DedupConfig) -> Self {
        Self {
            mode: config.mode,
            bloom: BloomFilter::new(config.expected_items, config.false_positive_rate),
            keys: config.exact.then(HashSet::new),
            inserted: 0,
        }
    }

    /// Derive the dedup key for a URL under the configured mode.
    pub fn key_for(&self, url: &str) -> String {
        match self.mode {
            DedupMode::Exact => url.to_string(),
            DedupMode::Normalized => urlutil::normalize(url),
            DedupMode::Domain => urlutil::host_of(url).unwrap_or_else(|| urlutil::normalize(url)),
            DedupMode::TopDomain => urlutil::host_of(url)
                .map(|h| urlutil::top_domain(&h))
                .unwrap_or_else(|| urlutil::normalize(url)),
        }
    }

    /// Insert-test: true when the URL's key has not been seen before.
    /// A positive membership answer from the approximate filter suppresses
    /// the URL unless the exact keyset says otherwise.
    pub fn is_new(&mut self, url: &str) -> bool {
        let key = self.key_for(url);

        if let Some(keys) = &mut self.keys {
            // Exact set is authoritative when present
            if keys.contains(&key) {
                return false;
            }
            keys.insert(key.clone());
            self.bloom.insert(key.as_bytes());
            self.inserted += 1;
            return true;
        }

        if self.bloom.contains(key.as_bytes()) {
            return false;
        }
        self.bloom.insert(key.as_bytes());
        self.inserted += 1;
        true
    }

    /// Number of keys inserted so far.
    pub fn len(&self) -> u64 {
        self.inserted
    }

    pub fn is_empty(&self) -> bool {
        self.inserted == 0
    }
}
