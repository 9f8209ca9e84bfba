//! Request executor: one outbound HTTP call through one proxy
//!
//! The trait seam lets tests drive the scheduler with a scripted executor;
//! the reqwest implementation is the production path. Clients are cached
//! per proxy so connection pools survive across requests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::proxy::Proxy;

/// Errors from one request attempt.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("proxy configuration rejected: {0}")]
    Proxy(String),
    /// Unrecoverable engine-level failure; the scheduler stops on these.
    #[error("fatal engine error: {0}")]
    Fatal(String),
}

impl FetchError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// A completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
    pub latency: Duration,
}

/// One outbound request under a deadline. Implementations must not hold
/// shared locks across the call.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(
        &self,
        url: &str,
        proxy: &Proxy,
        timeout: Duration,
    ) -> Result<FetchResponse, FetchError>;
}

/// Production executor over reqwest, one cached client per proxy.
pub struct HttpExecutor {
    user_agent: String,
    clients: Mutex<HashMap<String, reqwest::Client>>,
}

impl HttpExecutor {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, proxy: &Proxy) -> Result<reqwest::Client, FetchError> {
        {
            let clients = self.clients.lock();
            if let Some(client) = clients.get(&proxy.id) {
                return Ok(client.clone());
            }
        }

        let upstream = reqwest::Proxy::all(proxy.proxy_url())
            .map_err(|e| FetchError::Proxy(e.to_string()))?;
        let client = reqwest::Client::builder()
            .proxy(upstream)
            .user_agent(&self.user_agent)
            .gzip(true)
            .brotli(true)
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        self.clients.lock().insert(proxy.id.clone(), client.clone());
        Ok(client)
    }

    /// Drop the cached client for a proxy (e.g. after it is marked dead).
    pub fn evict(&self, proxy_id: &str) {
        self.clients.lock().remove(proxy_id);
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn execute(
        &self,
        url: &str,
        proxy: &Proxy,
        timeout: Duration,
    ) -> Result<FetchResponse, FetchError> {
        let client = self.client_for(proxy)?;
        let start = Instant::now();

        let response = client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(timeout)
                } else {
                    FetchError::Http(e)
                }
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(FetchError::Http)?;

        Ok(FetchResponse {
            status,
            body,
            latency: start.elapsed(),
        })
    }
}
