//! Signaling endpoint selection.
//!
//! Endpoints are probed with an HTTP `HEAD` (WebSocket URLs are mapped to
//! their HTTP equivalents). Probes never fail: a timeout or transport error
//! yields an unavailable [`ProbeResult`].

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of probing one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub url: String,
    pub available: bool,
    /// Round trip of the probe; `None` when unavailable.
    pub latency_ms: Option<u64>,
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl ProbeResult {
    pub fn reachable(url: &str, latency: Duration, status_code: Option<u16>) -> Self {
        Self {
            url: url.to_string(),
            available: true,
            latency_ms: Some(latency.as_millis() as u64),
            status_code,
            error: None,
            checked_at: Utc::now(),
        }
    }

    pub fn unreachable(url: &str, error: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            available: false,
            latency_ms: None,
            status_code: None,
            error: Some(error.into()),
            checked_at: Utc::now(),
        }
    }
}

/// Checks whether an endpoint answers.
pub trait EndpointProbe: Send + Sync {
    fn probe<'a>(&'a self, url: &'a str, timeout: Duration) -> BoxFuture<'a, ProbeResult>;
}

/// Map `ws://` to `http://` and `wss://` to `https://`.
pub fn http_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = url.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        url.to_string()
    }
}

/// Probes over HTTP with reqwest.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpProbe {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl EndpointProbe for HttpProbe {
    fn probe<'a>(&'a self, url: &'a str, timeout: Duration) -> BoxFuture<'a, ProbeResult> {
        async move {
            let target = http_url(url);
            let started = Instant::now();
            let request = self
                .client
                .head(&target)
                .header(reqwest::header::CACHE_CONTROL, "no-store")
                .send();

            match tokio::time::timeout(timeout, request).await {
                Ok(Ok(response)) if response.status().is_success() => {
                    ProbeResult::reachable(url, started.elapsed(), Some(response.status().as_u16()))
                }
                Ok(Ok(response)) => {
                    let status = response.status().as_u16();
                    ProbeResult {
                        status_code: Some(status),
                        ..ProbeResult::unreachable(url, format!("unexpected status {status}"))
                    }
                }
                Ok(Err(e)) => ProbeResult::unreachable(url, e.to_string()),
                Err(_) => ProbeResult::unreachable(
                    url,
                    format!("timed out after {}ms", timeout.as_millis()),
                ),
            }
        }
        .boxed()
    }
}

/// Canned probe results, for offline setups and tests. Unknown URLs are
/// unavailable.
#[derive(Debug, Default)]
pub struct StaticProbe {
    latencies: Mutex<HashMap<String, Option<u64>>>,
    calls: Mutex<Vec<String>>,
}

impl StaticProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `url` reachable with the given latency, or unreachable with `None`.
    pub fn set(&self, url: &str, latency_ms: Option<u64>) {
        self.latencies.lock().insert(url.to_string(), latency_ms);
    }

    /// URLs probed so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl EndpointProbe for StaticProbe {
    fn probe<'a>(&'a self, url: &'a str, _timeout: Duration) -> BoxFuture<'a, ProbeResult> {
        self.calls.lock().push(url.to_string());
        let result = match self.latencies.lock().get(url).copied().flatten() {
            Some(ms) => ProbeResult::reachable(url, Duration::from_millis(ms), Some(200)),
            None => ProbeResult::unreachable(url, "unreachable"),
        };
        futures::future::ready(result).boxed()
    }
}

/// Sort key: available first, then ascending latency.
fn rank(results: &mut [ProbeResult]) {
    results.sort_by_key(|r| (!r.available, r.latency_ms.unwrap_or(u64::MAX)));
}

struct CachedChoice {
    url: String,
    at: Instant,
}

/// Picks the best signaling endpoint from a configured list.
pub struct SignalingSelector {
    candidates: Vec<String>,
    probe: Arc<dyn EndpointProbe>,
    timeout: Duration,
    ttl: Duration,
    cached: Mutex<Option<CachedChoice>>,
    last_results: Mutex<Vec<ProbeResult>>,
}

impl std::fmt::Debug for SignalingSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingSelector")
            .field("candidates", &self.candidates)
            .field("timeout", &self.timeout)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl SignalingSelector {
    pub fn new(
        candidates: Vec<String>,
        probe: Arc<dyn EndpointProbe>,
        timeout: Duration,
        ttl: Duration,
    ) -> Self {
        Self {
            candidates,
            probe,
            timeout,
            ttl,
            cached: Mutex::new(None),
            last_results: Mutex::new(Vec::new()),
        }
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Probe a single endpoint.
    pub async fn probe(&self, url: &str) -> ProbeResult {
        let result = self.probe.probe(url, self.timeout).await;
        if !result.available {
            tracing::debug!(
                url = %url,
                error = ?result.error,
                "Signaling endpoint unavailable"
            );
        }
        result
    }

    /// Probe every candidate concurrently and rank the results.
    pub async fn rank_all(&self) -> Vec<ProbeResult> {
        let mut results = join_all(self.candidates.iter().map(|url| self.probe(url))).await;
        rank(&mut results);
        *self.last_results.lock() = results.clone();

        if let Some(best) = results.first().filter(|r| r.available) {
            *self.cached.lock() = Some(CachedChoice {
                url: best.url.clone(),
                at: Instant::now(),
            });
        }
        results
    }

    /// The best endpoint, re-probing when the cached pick is older than the
    /// TTL or `force_refresh` is set. Falls back to the first candidate when
    /// nothing answers.
    pub async fn get_optimal(&self, force_refresh: bool) -> Option<String> {
        if !force_refresh {
            if let Some(cached) = self.cached.lock().as_ref() {
                if cached.at.elapsed() < self.ttl {
                    return Some(cached.url.clone());
                }
            }
        }

        let results = self.rank_all().await;
        match results.into_iter().find(|r| r.available) {
            Some(best) => Some(best.url),
            None => {
                tracing::warn!(
                    candidates = self.candidates.len(),
                    "No signaling endpoint reachable, using first configured"
                );
                self.candidates.first().cloned()
            }
        }
    }

    /// Up to `n` available endpoints, best first. When none is reachable the
    /// configured list is returned unchanged so the transport can keep trying.
    pub async fn select_best(&self, n: usize) -> Vec<String> {
        let results = self.rank_all().await;
        let best: Vec<String> = results
            .into_iter()
            .filter(|r| r.available)
            .take(n)
            .map(|r| r.url)
            .collect();
        if best.is_empty() {
            self.candidates.iter().take(n).cloned().collect()
        } else {
            best
        }
    }

    /// Results of the most recent sweep.
    pub fn last_results(&self) -> Vec<ProbeResult> {
        self.last_results.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector(probe: Arc<StaticProbe>, candidates: &[&str]) -> SignalingSelector {
        SignalingSelector::new(
            candidates.iter().map(|s| s.to_string()).collect(),
            probe,
            Duration::from_millis(2000),
            Duration::from_millis(300_000),
        )
    }

    #[test]
    fn test_http_url() {
        assert_eq!(http_url("wss://signal.example"), "https://signal.example");
        assert_eq!(http_url("ws://localhost:4444"), "http://localhost:4444");
        assert_eq!(http_url("https://already"), "https://already");
    }

    #[tokio::test]
    async fn test_rank_all_orders_available_by_latency() {
        let probe = Arc::new(StaticProbe::new());
        probe.set("ws://slow", Some(300));
        probe.set("ws://fast", Some(20));
        let selector = selector(probe, &["ws://down", "ws://slow", "ws://fast"]);

        let ranked: Vec<String> = selector.rank_all().await.into_iter().map(|r| r.url).collect();
        assert_eq!(ranked, vec!["ws://fast", "ws://slow", "ws://down"]);
    }

    #[tokio::test]
    async fn test_get_optimal_uses_cache_until_forced() {
        let probe = Arc::new(StaticProbe::new());
        probe.set("ws://a", Some(50));
        probe.set("ws://b", Some(100));
        let selector = selector(probe.clone(), &["ws://a", "ws://b"]);

        assert_eq!(selector.get_optimal(false).await.as_deref(), Some("ws://a"));
        probe.set("ws://a", None);
        assert_eq!(selector.get_optimal(false).await.as_deref(), Some("ws://a"));
        assert_eq!(probe.calls().len(), 2);

        assert_eq!(selector.get_optimal(true).await.as_deref(), Some("ws://b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_optimal_reprobes_after_ttl() {
        let probe = Arc::new(StaticProbe::new());
        probe.set("ws://a", Some(50));
        let selector = selector(probe.clone(), &["ws://a"]);

        selector.get_optimal(false).await;
        tokio::time::advance(Duration::from_millis(300_001)).await;
        selector.get_optimal(false).await;

        assert_eq!(probe.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_falls_back_to_first_candidate() {
        let probe = Arc::new(StaticProbe::new());
        let selector = selector(probe, &["ws://one", "ws://two"]);

        assert_eq!(selector.get_optimal(false).await.as_deref(), Some("ws://one"));
        assert_eq!(selector.select_best(5).await, vec!["ws://one", "ws://two"]);
    }

    #[tokio::test]
    async fn test_select_best_limits_count() {
        let probe = Arc::new(StaticProbe::new());
        probe.set("ws://a", Some(30));
        probe.set("ws://b", Some(10));
        probe.set("ws://c", Some(20));
        let selector = selector(probe, &["ws://a", "ws://b", "ws://c"]);

        assert_eq!(selector.select_best(2).await, vec!["ws://b", "ws://c"]);
    }
}
