//! Room options.
//!
//! Every struct has a `Default` carrying the documented defaults and a
//! `validate()` that rejects inconsistent combinations up front.

use crate::error::{Error, Result};
use std::time::Duration;
use tandem_engine::CodecOptions;

/// Default signaling endpoint: a local `tandem-server`.
pub const DEFAULT_SIGNALING: &str = "ws://localhost:4444";

/// Reconnect backoff settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryStrategy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

impl RetryStrategy {
    /// Backoff before reconnect attempt `attempt` (1-based):
    /// `min(initial * 1.5^(attempt-1), max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let millis = self.initial_delay.as_millis() as f64 * 1.5f64.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.round() as u64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_delay.is_zero() {
            return Err(Error::InvalidOptions(
                "retry initial_delay must be positive".into(),
            ));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::InvalidOptions(
                "retry max_delay must not be below initial_delay".into(),
            ));
        }
        Ok(())
    }
}

/// Periodic heartbeat sync settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoSyncConfig {
    pub enabled: bool,
    /// Base interval before adaptive factors.
    pub interval: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub adaptive_mode: bool,
    /// Feed document updates into the change frequency tracker.
    pub sync_on_change: bool,
    /// Key in the `states-` map that receives the heartbeat timestamp.
    pub heartbeat_field: String,
    pub battery_aware: bool,
    pub network_aware: bool,
}

impl Default for AutoSyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_millis(5000),
            min_interval: Duration::from_millis(1000),
            max_interval: Duration::from_millis(30_000),
            adaptive_mode: true,
            sync_on_change: true,
            heartbeat_field: "_lastSyncTime".to_string(),
            battery_aware: true,
            network_aware: true,
        }
    }
}

impl AutoSyncConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_interval.is_zero() {
            return Err(Error::InvalidOptions(
                "auto sync min_interval must be positive".into(),
            ));
        }
        if self.min_interval > self.max_interval {
            return Err(Error::InvalidOptions(format!(
                "auto sync min_interval ({:?}) exceeds max_interval ({:?})",
                self.min_interval, self.max_interval
            )));
        }
        if self.heartbeat_field.is_empty() {
            return Err(Error::InvalidOptions(
                "auto sync heartbeat_field must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// A relay (NAT traversal) server entry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RelayServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// Where peers meet.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerDiscoveryConfig {
    /// Signaling endpoints in order of preference.
    pub signaling: Vec<String>,
    pub relays: Vec<RelayServer>,
    /// How many of the best endpoints the transport is handed.
    pub max_endpoints: usize,
    pub probe_timeout: Duration,
    /// How long the selector trusts its cached pick.
    pub cache_ttl: Duration,
}

impl Default for PeerDiscoveryConfig {
    fn default() -> Self {
        Self {
            signaling: vec![DEFAULT_SIGNALING.to_string()],
            relays: Vec::new(),
            max_endpoints: 3,
            probe_timeout: Duration::from_millis(2000),
            cache_ttl: Duration::from_millis(300_000),
        }
    }
}

impl PeerDiscoveryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.signaling.iter().any(|url| url.trim().is_empty()) {
            return Err(Error::InvalidOptions(
                "signaling endpoints must not be blank".into(),
            ));
        }
        if self.max_endpoints == 0 {
            return Err(Error::InvalidOptions(
                "max_endpoints must be at least 1".into(),
            ));
        }
        for relay in &self.relays {
            if relay.urls.is_empty() {
                return Err(Error::InvalidOptions("relay server without urls".into()));
            }
        }
        Ok(())
    }
}

/// Options accepted by [`SyncedRoom::create_or_get`](crate::SyncedRoom::create_or_get).
#[derive(Debug, Clone, PartialEq)]
pub struct RoomOptions {
    /// Name used on the wire; defaults to the room key.
    pub room_name: Option<String>,
    /// Restore from and save to the registry's persistence backend.
    pub persist: bool,
    pub auto_connect: bool,
    pub auto_sync: AutoSyncConfig,
    pub retry_strategy: RetryStrategy,
    pub discovery: PeerDiscoveryConfig,
    pub codec: CodecOptions,
    /// Period of the connectivity cross-check.
    pub liveness_interval: Duration,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            room_name: None,
            persist: true,
            auto_connect: true,
            auto_sync: AutoSyncConfig::default(),
            retry_strategy: RetryStrategy::default(),
            discovery: PeerDiscoveryConfig::default(),
            codec: CodecOptions::default(),
            liveness_interval: Duration::from_secs(2),
        }
    }
}

impl RoomOptions {
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.room_name {
            crate::registry::validate_room_key(name)?;
        }
        if self.liveness_interval.is_zero() {
            return Err(Error::InvalidOptions(
                "liveness_interval must be positive".into(),
            ));
        }
        self.auto_sync.validate()?;
        self.retry_strategy.validate()?;
        self.discovery.validate()
    }
}
