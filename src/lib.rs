//! Dorkhound: distributed search-engine scraper core
//!
//! Drives a catalog of search queries ("dorks") through a rotating pool of
//! upstream proxies, extracts result URLs, filters them, and persists the
//! unique domain set. The crate is the concurrent execution layer:
//! - a proxy-health state machine with quarantine and weighted selection
//! - an adaptive-concurrency task queue with priority, retry, and
//!   pagination follow-up
//! - a stateless engine adapter (URL building, response classification,
//!   URL extraction)
//! - a URL filter pipeline with probabilistic and exact deduplication
//! - a persistent domain ledger behind the public-domain filter

pub mod config;
pub mod engine;
pub mod filter;
pub mod ledger;
pub mod proxy;
pub mod queue;
pub mod scheduler;
pub mod urlutil;

pub use config::Config;
pub use engine::EngineOptions;
pub use filter::{FilterConfig, UrlFilter, UrlRecord};
pub use ledger::DomainLedger;
pub use proxy::{PoolConfig, Proxy, ProxyPool};
pub use queue::{Priority, Task, TaskQueue};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerState};
