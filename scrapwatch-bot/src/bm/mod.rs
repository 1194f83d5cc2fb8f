//! Rate-limited, caching client for the Battlemetrics API.
//!
//! Every cache miss passes through a FIFO queue that spaces dispatches
//! at the configured request rate, so bursts of lookups cannot trip
//! the upstream limiter. Successful payloads are cached by path and
//! sorted query parameters; errors are never cached.

pub mod types;

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::FetchError;
use types::{Document, PlayerInfo, ServerInfo, SessionRecord};

/// Queue depth beyond which enqueueing logs a warning.
const QUEUE_WARN_DEPTH: usize = 15;

/// A request to the API: path plus query parameters, nothing else.
/// Authorization is attached by the transport and never part of the
/// cache identity.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Stable cache key: the path followed by the query pairs in
    /// sorted order, so parameter order does not split the cache.
    pub fn cache_key(&self) -> String {
        let mut pairs = self.query.clone();
        pairs.sort();
        let mut key = self.path.clone();
        for (i, (name, value)) in pairs.iter().enumerate() {
            key.push(if i == 0 { '?' } else { '&' });
            key.push_str(name);
            key.push('=');
            key.push_str(value);
        }
        key
    }
}

/// The wire seam of the client. The production transport speaks HTTP
/// with a bearer token; tests substitute canned payloads.
pub trait Transport: Send + Sync + 'static {
    fn execute(
        &self,
        request: &ApiRequest,
    ) -> impl Future<Output = Result<serde_json::Value, FetchError>> + Send;
}

/// reqwest-backed transport against the real API.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpTransport {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
        })
    }
}

impl Transport for HttpTransport {
    fn execute(
        &self,
        request: &ApiRequest,
    ) -> impl Future<Output = Result<serde_json::Value, FetchError>> + Send {
        async move {
            let url = format!("{}{}", self.base_url, request.path);
            let response = self
                .client
                .get(url)
                .query(&request.query)
                .bearer_auth(&self.token)
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status(status.as_u16()));
            }
            Ok(response.json::<serde_json::Value>().await?)
        }
    }
}

/// A successful response held until its TTL runs out.
#[derive(Debug, Clone)]
struct CacheEntry {
    payload: serde_json::Value,
    set_at: Instant,
}

/// A request sitting between enqueue and dispatch.
#[derive(Debug)]
struct PendingRequest {
    id: u64,
    enqueued_at: Instant,
}

#[derive(Debug, Default)]
struct PendingQueue {
    entries: Mutex<VecDeque<PendingRequest>>,
    next_id: AtomicU64,
}

impl PendingQueue {
    /// Append an entry; returns its id and the depth ahead of it.
    async fn enqueue(&self) -> (u64, usize) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.lock().await;
        let depth_before = entries.len();
        entries.push_back(PendingRequest {
            id,
            enqueued_at: Instant::now(),
        });
        (id, depth_before)
    }

    /// Drop an entry at dispatch time; returns how long it waited.
    async fn remove(&self, id: u64) -> Option<Duration> {
        let mut entries = self.entries.lock().await;
        let waited = entries
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.enqueued_at.elapsed());
        entries.retain(|entry| entry.id != id);
        waited
    }

    #[cfg(test)]
    async fn depth(&self) -> usize {
        self.entries.lock().await.len()
    }
}

pub struct BmClient<T: Transport = HttpTransport> {
    transport: T,
    cache: scc::HashMap<String, CacheEntry>,
    queue: PendingQueue,
    cache_ttl: Duration,
    pace: Duration,
}

impl<T: Transport> BmClient<T> {
    pub fn new(transport: T, cache_ttl: Duration, requests_per_second: u32) -> Self {
        Self {
            transport,
            cache: scc::HashMap::new(),
            queue: PendingQueue::default(),
            cache_ttl,
            pace: Duration::from_millis(1000 / u64::from(requests_per_second.max(1))),
        }
    }

    /// Fetch a payload, preferring a fresh cache entry.
    ///
    /// On a miss the request is queued and dispatch is delayed by the
    /// queue depth sampled at enqueue time, one pace interval per
    /// request already waiting.
    pub async fn fetch(&self, request: &ApiRequest) -> Result<serde_json::Value, FetchError> {
        let key = request.cache_key();

        let ttl = self.cache_ttl;
        let cached = self
            .cache
            .read_async(&key, |_, entry| {
                (entry.set_at.elapsed() < ttl).then(|| entry.payload.clone())
            })
            .await
            .flatten();
        if let Some(payload) = cached {
            debug!(%key, "cache hit");
            return Ok(payload);
        }

        let (id, depth_before) = self.queue.enqueue().await;
        if depth_before + 1 > QUEUE_WARN_DEPTH {
            warn!(depth = depth_before + 1, "request queue is falling behind");
        }

        // Dispatch always defers to the scheduler, so a burst of
        // concurrent misses enqueues fully before the first one is
        // removed and the later ones see the true depth.
        let delay = self.pace * depth_before as u32;
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }

        let waited = self.queue.remove(id).await;
        debug!(%key, ?waited, "dispatching request");

        let payload = self.transport.execute(request).await?;

        let entry = CacheEntry {
            payload: payload.clone(),
            set_at: Instant::now(),
        };
        if self
            .cache
            .update_async(&key, |_, existing| *existing = entry.clone())
            .await
            .is_none()
        {
            let _ = self.cache.insert_async(key, entry).await;
        }

        Ok(payload)
    }

    /// `GET /players/{id}` - player identity.
    pub async fn get_player_info(&self, player_id: &str) -> Result<PlayerInfo, FetchError> {
        let request = ApiRequest::new(format!("/players/{player_id}"));
        let payload = self.fetch(&request).await?;
        let document: Document<PlayerInfo> = serde_json::from_value(payload)?;
        document.data.ok_or(FetchError::MissingData)
    }

    /// `GET /servers/{id}` - server identity, wipe and map metadata.
    pub async fn get_server_info(&self, server_id: &str) -> Result<ServerInfo, FetchError> {
        let request = ApiRequest::new(format!("/servers/{server_id}"));
        let payload = self.fetch(&request).await?;
        let document: Document<ServerInfo> = serde_json::from_value(payload)?;
        document.data.ok_or(FetchError::MissingData)
    }

    /// `GET /players/{id}/relationships/sessions`, newest page only.
    /// An empty `server_ids` asks for sessions across all servers.
    pub async fn get_sessions(
        &self,
        player_id: &str,
        server_ids: &[String],
    ) -> Result<Vec<SessionRecord>, FetchError> {
        let mut request = ApiRequest::new(format!("/players/{player_id}/relationships/sessions"));
        if !server_ids.is_empty() {
            request = request.with_param("filter[servers]", server_ids.join(","));
        }
        let request = request.with_param("page[size]", "100");
        let payload = self.fetch(&request).await?;
        let document: Document<Vec<SessionRecord>> = serde_json::from_value(payload)?;
        document.data.ok_or(FetchError::MissingData)
    }
}
