//! Connection diagnostics for a room.

use crate::scheduler::{EnvironmentProbe, LinkClass, NetworkInfo};
use crate::signaling::ProbeResult;
use crate::transport::PeerTransportManager;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tandem_engine::{encoded_size, ClientId, Doc};

/// Qualitative connection rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionRating {
    Excellent,
    Good,
    Fair,
    Poor,
    Disconnected,
}

impl fmt::Display for ConnectionRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionRating::Excellent => "excellent",
            ConnectionRating::Good => "good",
            ConnectionRating::Fair => "fair",
            ConnectionRating::Poor => "poor",
            ConnectionRating::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}

/// Rate a link. A connected link without a latency reading yet rates Good.
pub fn rate(connected: bool, latency_ms: Option<u64>) -> ConnectionRating {
    if !connected {
        return ConnectionRating::Disconnected;
    }
    match latency_ms {
        None => ConnectionRating::Good,
        Some(ms) if ms < 100 => ConnectionRating::Excellent,
        Some(ms) if ms < 200 => ConnectionRating::Good,
        Some(ms) if ms < 500 => ConnectionRating::Fair,
        Some(_) => ConnectionRating::Poor,
    }
}

/// Inputs to [`issues`].
#[derive(Debug, Clone, Default)]
pub struct LinkHealth<'a> {
    pub connected: bool,
    pub latency_ms: Option<u64>,
    pub endpoints: &'a [ProbeResult],
    pub link: Option<LinkClass>,
}

/// Human-readable list of detected problems; empty when healthy.
pub fn issues(health: &LinkHealth<'_>) -> Vec<String> {
    let mut issues = Vec::new();
    let unreachable = health.endpoints.iter().filter(|r| !r.available).count();

    if !health.connected {
        issues.push("not connected to any peer".to_string());
        if !health.endpoints.is_empty() && unreachable == health.endpoints.len() {
            issues.push("no signaling endpoint reachable".to_string());
        }
    }
    if let Some(ms) = health.latency_ms.filter(|ms| *ms > 500) {
        issues.push(format!("high latency ({ms}ms)"));
    }
    if unreachable > 0 {
        issues.push(format!("{unreachable} signaling endpoint(s) unreachable"));
    }
    if let Some(link) = health.link.filter(LinkClass::is_degraded) {
        issues.push(format!("slow network link ({link})"));
    }
    issues
}

/// One-line summary of [`issues`].
pub fn advisory(issues: &[String]) -> String {
    if issues.is_empty() {
        "connection healthy".to_string()
    } else {
        issues.join("; ")
    }
}

/// Everything known about a room's connection at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub room: String,
    pub client: ClientId,
    pub status: String,
    pub connected: bool,
    /// Clients with presence in the room, this one included; zero without
    /// a transport.
    pub peer_count: usize,
    pub is_host: bool,
    pub latency_ms: Option<u64>,
    pub rating: ConnectionRating,
    pub endpoints: Vec<ProbeResult>,
    /// Encoded snapshot size in bytes.
    pub document_size: usize,
    pub op_count: usize,
    pub pending_ops: usize,
    pub network: NetworkInfo,
    pub issues: Vec<String>,
    pub advisory: String,
    pub timestamp: DateTime<Utc>,
}

/// Builds [`DiagnosticsSnapshot`]s for one room.
pub struct DiagnosticsReporter {
    manager: Arc<PeerTransportManager>,
    doc: Doc,
    environment: Arc<dyn EnvironmentProbe>,
}

impl fmt::Debug for DiagnosticsReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticsReporter")
            .field("room", &self.manager.room())
            .finish()
    }
}

impl DiagnosticsReporter {
    pub fn new(
        manager: Arc<PeerTransportManager>,
        doc: Doc,
        environment: Arc<dyn EnvironmentProbe>,
    ) -> Self {
        Self {
            manager,
            doc,
            environment,
        }
    }

    /// Probe endpoints (only while disconnected) and collect the snapshot.
    pub async fn snapshot(&self) -> DiagnosticsSnapshot {
        let connected = self.manager.is_connected();
        let endpoints = if connected {
            self.manager.selector().last_results()
        } else {
            self.manager.selector().rank_all().await
        };

        let latency_ms = if connected {
            self.manager
                .last_message_at()
                .map(|at| at.elapsed().as_millis() as u64)
        } else {
            endpoints
                .iter()
                .filter_map(|r| r.latency_ms)
                .filter(|ms| *ms > 0)
                .min()
        };
        let network = self.environment.network().await;

        let found = issues(&LinkHealth {
            connected,
            latency_ms,
            endpoints: &endpoints,
            link: Some(network.link),
        });
        let summary = advisory(&found);
        tracing::debug!(room = %self.manager.room(), advisory = %summary, "Diagnostics collected");

        DiagnosticsSnapshot {
            room: self.manager.room().to_string(),
            client: self.doc.client_id(),
            status: self.manager.status(),
            connected,
            peer_count: self.manager.presence_count(),
            is_host: self.manager.is_host(),
            latency_ms,
            rating: rate(connected, latency_ms),
            endpoints,
            document_size: encoded_size(&self.doc),
            op_count: self.doc.op_count(),
            pending_ops: self.doc.pending_count(),
            network,
            issues: found,
            advisory: summary,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn probe(url: &str, latency: Option<u64>) -> ProbeResult {
        match latency {
            Some(ms) => ProbeResult::reachable(url, Duration::from_millis(ms), Some(200)),
            None => ProbeResult::unreachable(url, "down"),
        }
    }

    #[test]
    fn test_rating_thresholds() {
        assert_eq!(rate(false, Some(10)), ConnectionRating::Disconnected);
        assert_eq!(rate(true, Some(99)), ConnectionRating::Excellent);
        assert_eq!(rate(true, Some(100)), ConnectionRating::Good);
        assert_eq!(rate(true, Some(199)), ConnectionRating::Good);
        assert_eq!(rate(true, Some(200)), ConnectionRating::Fair);
        assert_eq!(rate(true, Some(500)), ConnectionRating::Poor);
        assert_eq!(rate(true, None), ConnectionRating::Good);
    }

    #[test]
    fn test_healthy_advisory() {
        let found = issues(&LinkHealth {
            connected: true,
            latency_ms: Some(40),
            endpoints: &[probe("ws://a", Some(40))],
            link: Some(LinkClass::G4),
        });
        assert!(found.is_empty());
        assert_eq!(advisory(&found), "connection healthy");
    }

    #[test]
    fn test_offline_advisory_lists_everything() {
        let endpoints = [probe("ws://a", None), probe("ws://b", None)];
        let found = issues(&LinkHealth {
            connected: false,
            latency_ms: Some(900),
            endpoints: &endpoints,
            link: Some(LinkClass::Slow2g),
        });
        assert_eq!(
            found,
            vec![
                "not connected to any peer",
                "no signaling endpoint reachable",
                "high latency (900ms)",
                "2 signaling endpoint(s) unreachable",
                "slow network link (slow-2g)",
            ]
        );
    }

    #[test]
    fn test_partial_endpoint_failure() {
        let endpoints = [probe("ws://a", Some(30)), probe("ws://b", None)];
        let found = issues(&LinkHealth {
            connected: false,
            latency_ms: Some(30),
            endpoints: &endpoints,
            link: None,
        });
        assert_eq!(
            found,
            vec!["not connected to any peer", "1 signaling endpoint(s) unreachable"]
        );
    }
}
