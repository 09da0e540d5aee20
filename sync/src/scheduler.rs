//! Adaptive heartbeat sync.
//!
//! While enabled, the scheduler writes a timestamp into the room's heartbeat
//! field on every tick (when connected), so every tick produces at least one
//! replicated operation. The tick period adapts to how often the document
//! changes, to the network and to the battery.

use crate::config::AutoSyncConfig;
use crate::error::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tandem_engine::{Doc, Subscription};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Samples kept by [`ChangeFrequencyTracker`] by default.
pub const MAX_CHANGE_HISTORY: usize = 10;

/// Delay before the first tick after `start()`.
pub const FIRST_SYNC_DELAY: Duration = Duration::from_millis(100);

/// How long a network measurement is reused.
pub const NETWORK_CACHE_TTL: Duration = Duration::from_secs(30);

/// Relative change below which the running interval is kept.
pub const INTERVAL_HYSTERESIS: f64 = 0.2;

const STALE_AFTER: Duration = Duration::from_secs(60);

/// Edits per minute over a sliding window of timestamps.
#[derive(Debug, Clone)]
pub struct ChangeFrequencyTracker {
    history: VecDeque<u64>,
    capacity: usize,
}

impl Default for ChangeFrequencyTracker {
    fn default() -> Self {
        Self::with_capacity(MAX_CHANGE_HISTORY)
    }
}

impl ChangeFrequencyTracker {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity: capacity.max(2),
        }
    }

    /// Record an edit at `now_ms` and return the updated frequency.
    pub fn record(&mut self, now_ms: u64) -> f64 {
        self.history.push_back(now_ms);
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
        self.frequency()
    }

    /// `(count - 1) / minutes spanned`; zero with fewer than two samples or
    /// no elapsed time.
    pub fn frequency(&self) -> f64 {
        let (Some(oldest), Some(newest)) = (self.history.front(), self.history.back()) else {
            return 0.0;
        };
        let span = newest.saturating_sub(*oldest);
        if self.history.len() < 2 || span == 0 {
            return 0.0;
        }
        (self.history.len() - 1) as f64 / (span as f64 / 60_000.0)
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

/// Effective connection class, as browsers report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkClass {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    G2,
    #[serde(rename = "3g")]
    G3,
    #[serde(rename = "4g")]
    G4,
    #[serde(rename = "unknown")]
    Unknown,
}

impl LinkClass {
    pub fn parse(s: &str) -> Self {
        match s {
            "slow-2g" => LinkClass::Slow2g,
            "2g" => LinkClass::G2,
            "3g" => LinkClass::G3,
            "4g" => LinkClass::G4,
            _ => LinkClass::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkClass::Slow2g => "slow-2g",
            LinkClass::G2 => "2g",
            LinkClass::G3 => "3g",
            LinkClass::G4 => "4g",
            LinkClass::Unknown => "unknown",
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, LinkClass::Slow2g | LinkClass::G2)
    }
}

impl fmt::Display for LinkClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    pub latency_ms: u64,
    pub link: LinkClass,
}

impl Default for NetworkInfo {
    fn default() -> Self {
        Self {
            latency_ms: 200,
            link: LinkClass::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryInfo {
    /// Charge between 0 and 1.
    pub level: f64,
    pub charging: bool,
}

/// Source of network and battery readings.
pub trait EnvironmentProbe: Send + Sync {
    fn network(&self) -> BoxFuture<'_, NetworkInfo>;

    /// `None` when the host has no battery or does not say.
    fn battery(&self) -> BoxFuture<'_, Option<BatteryInfo>>;
}

/// Fixed readings that can be changed at runtime.
#[derive(Debug, Default)]
pub struct StaticEnvironment {
    network: Mutex<NetworkInfo>,
    battery: Mutex<Option<BatteryInfo>>,
    network_reads: AtomicUsize,
}

impl StaticEnvironment {
    pub fn new(network: NetworkInfo, battery: Option<BatteryInfo>) -> Self {
        Self {
            network: Mutex::new(network),
            battery: Mutex::new(battery),
            network_reads: AtomicUsize::new(0),
        }
    }

    pub fn set_network(&self, network: NetworkInfo) {
        *self.network.lock() = network;
    }

    pub fn set_battery(&self, battery: Option<BatteryInfo>) {
        *self.battery.lock() = battery;
    }

    /// How many times the network was read.
    pub fn network_reads(&self) -> usize {
        self.network_reads.load(Ordering::SeqCst)
    }
}

impl EnvironmentProbe for StaticEnvironment {
    fn network(&self) -> BoxFuture<'_, NetworkInfo> {
        self.network_reads.fetch_add(1, Ordering::SeqCst);
        futures::future::ready(self.network.lock().clone()).boxed()
    }

    fn battery(&self) -> BoxFuture<'_, Option<BatteryInfo>> {
        futures::future::ready(*self.battery.lock()).boxed()
    }
}

/// Everything the interval depends on besides the config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntervalInputs {
    /// Edits per minute.
    pub change_frequency: f64,
    pub network: Option<NetworkInfo>,
    pub battery: Option<BatteryInfo>,
    pub since_last_sync: Duration,
}

fn frequency_factor(per_minute: f64) -> f64 {
    if per_minute > 10.0 {
        0.7
    } else if per_minute >= 5.0 {
        0.85
    } else if per_minute < 0.1 {
        1.3
    } else if per_minute < 0.5 {
        1.15
    } else {
        1.0
    }
}

fn network_factor(network: &NetworkInfo) -> f64 {
    let latency = if network.latency_ms > 500 {
        1.2
    } else if network.latency_ms < 100 {
        0.9
    } else {
        1.0
    };
    let link = match network.link {
        LinkClass::G4 => 0.9,
        LinkClass::G3 => 1.1,
        LinkClass::G2 | LinkClass::Slow2g => 1.5,
        LinkClass::Unknown => 1.0,
    };
    latency * link
}

/// The tick period for `inputs`, always within `[min_interval, max_interval]`.
pub fn compute_interval(config: &AutoSyncConfig, inputs: &IntervalInputs) -> Duration {
    let base = config.interval.as_secs_f64() * 1000.0;
    let mut factor = 1.0;

    if config.adaptive_mode {
        factor *= frequency_factor(inputs.change_frequency);
        if config.network_aware {
            if let Some(network) = &inputs.network {
                factor *= network_factor(network);
            }
        }
        if config.battery_aware {
            if let Some(battery) = &inputs.battery {
                if !battery.charging && battery.level < 0.2 {
                    factor *= 1.3;
                }
            }
        }
        if inputs.since_last_sync > STALE_AFTER {
            factor *= 1.2;
        }
    }

    let min = config.min_interval.as_secs_f64() * 1000.0;
    let max = config.max_interval.as_secs_f64() * 1000.0;
    let millis = (base * factor).clamp(min, max);
    Duration::from_millis(millis.round() as u64)
}

/// Whether `next` differs from `current` by more than the hysteresis band.
pub fn exceeds_hysteresis(current: Duration, next: Duration) -> bool {
    if current.is_zero() {
        return !next.is_zero();
    }
    let current_ms = current.as_secs_f64();
    (next.as_secs_f64() - current_ms).abs() / current_ms > INTERVAL_HYSTERESIS
}

/// What the scheduler syncs.
pub trait SyncTarget: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Write `timestamp_ms` into the heartbeat field.
    fn heartbeat(&self, field: &str, timestamp_ms: i64);

    /// Ask peers for anything we are missing.
    fn request_sync(&self) -> bool;
}

/// Snapshot of the scheduler for status displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub running: bool,
    pub adaptive: bool,
    pub interval_ms: u64,
    pub change_frequency: f64,
    pub since_last_sync_ms: u64,
    pub sync_count: u64,
    pub last_heartbeat: Option<i64>,
    pub network: Option<NetworkInfo>,
    pub battery: Option<BatteryInfo>,
}

struct Readings {
    interval: Duration,
    last_sync: Instant,
    network: Option<(Instant, NetworkInfo)>,
    battery: Option<BatteryInfo>,
    sync_count: u64,
    last_heartbeat: Option<i64>,
}

struct SchedulerInner {
    room: String,
    doc: Doc,
    target: Arc<dyn SyncTarget>,
    environment: Arc<dyn EnvironmentProbe>,
    config: Mutex<AutoSyncConfig>,
    tracker: Mutex<ChangeFrequencyTracker>,
    readings: Mutex<Readings>,
    started_at: Instant,
    /// Set while the heartbeat is written so it is not counted as an edit.
    in_heartbeat: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
    changes: Mutex<Option<Subscription>>,
}

/// Periodic heartbeat writer with an adaptive period.
pub struct AdaptiveSyncScheduler {
    inner: Arc<SchedulerInner>,
}

impl fmt::Debug for AdaptiveSyncScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptiveSyncScheduler")
            .field("room", &self.inner.room)
            .field("running", &self.is_running())
            .field("interval", &self.interval())
            .finish()
    }
}

impl AdaptiveSyncScheduler {
    pub fn new(
        room: impl Into<String>,
        doc: Doc,
        target: Arc<dyn SyncTarget>,
        environment: Arc<dyn EnvironmentProbe>,
        config: AutoSyncConfig,
    ) -> Result<Self> {
        config.validate()?;
        let now = Instant::now();
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                room: room.into(),
                doc,
                target,
                environment,
                readings: Mutex::new(Readings {
                    interval: config.interval,
                    last_sync: now,
                    network: None,
                    battery: None,
                    sync_count: 0,
                    last_heartbeat: None,
                }),
                config: Mutex::new(config),
                tracker: Mutex::new(ChangeFrequencyTracker::default()),
                started_at: now,
                in_heartbeat: AtomicBool::new(false),
                timer: Mutex::new(None),
                changes: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> AutoSyncConfig {
        self.inner.config.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .timer
            .lock()
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    /// Current tick period.
    pub fn interval(&self) -> Duration {
        self.inner.readings.lock().interval
    }

    /// Start ticking. Returns false (and stays stopped) when disabled.
    pub async fn start(&self) -> bool {
        self.stop();
        let config = self.config();
        if !config.enabled {
            return false;
        }

        let interval = self.inner.compute().await;
        self.inner.readings.lock().interval = interval;

        if config.sync_on_change {
            let weak = Arc::downgrade(&self.inner);
            *self.inner.changes.lock() = Some(self.inner.doc.observe_updates(move |_| {
                if let Some(inner) = weak.upgrade() {
                    if !inner.in_heartbeat.load(Ordering::SeqCst) {
                        inner.record_change();
                    }
                }
            }));
        }

        let weak = Arc::downgrade(&self.inner);
        *self.inner.timer.lock() = Some(tokio::spawn(run(weak)));
        tracing::info!(
            room = %self.inner.room,
            interval_ms = interval.as_millis() as u64,
            adaptive = config.adaptive_mode,
            "Auto sync started"
        );
        true
    }

    /// Stop ticking and stop listening for changes.
    pub fn stop(&self) {
        if let Some(timer) = self.inner.timer.lock().take() {
            timer.abort();
            tracing::debug!(room = %self.inner.room, "Auto sync stopped");
        }
        self.inner.changes.lock().take();
    }

    /// Replace the config, restarting or stopping as it says.
    pub async fn set_config(&self, config: AutoSyncConfig) -> Result<bool> {
        config.validate()?;
        let enabled = config.enabled;
        *self.inner.config.lock() = config;
        if enabled {
            Ok(self.start().await)
        } else {
            self.stop();
            Ok(false)
        }
    }

    /// Sync right now. Returns false when not connected.
    pub fn trigger_sync(&self) -> bool {
        if !self.inner.target.is_connected() {
            tracing::debug!(room = %self.inner.room, "Manual sync skipped, not connected");
            return false;
        }
        self.inner.beat();
        self.inner.target.request_sync();
        self.inner.record_change();
        true
    }

    /// Note a completed sync and adapt the interval.
    pub async fn on_synced(&self) {
        self.inner.readings.lock().last_sync = Instant::now();
        self.inner.record_change();
        let config = self.config();
        if config.adaptive_mode && config.enabled && self.is_running() {
            self.inner.adapt().await;
        }
    }

    /// Count an edit. Returns the updated frequency.
    pub fn record_change(&self) -> f64 {
        self.inner.record_change()
    }

    pub fn change_frequency(&self) -> f64 {
        self.inner.tracker.lock().frequency()
    }

    pub fn status(&self) -> SchedulerStatus {
        let config = self.config();
        let running = self.is_running();
        let change_frequency = self.change_frequency();
        let readings = self.inner.readings.lock();
        SchedulerStatus {
            enabled: config.enabled,
            running,
            adaptive: config.adaptive_mode,
            interval_ms: readings.interval.as_millis() as u64,
            change_frequency,
            since_last_sync_ms: readings.last_sync.elapsed().as_millis() as u64,
            sync_count: readings.sync_count,
            last_heartbeat: readings.last_heartbeat,
            network: readings.network.as_ref().map(|(_, n)| n.clone()),
            battery: readings.battery,
        }
    }
}

impl Drop for AdaptiveSyncScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(weak: Weak<SchedulerInner>) {
    tokio::time::sleep(FIRST_SYNC_DELAY).await;
    loop {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        inner.tick().await;
        let interval = inner.readings.lock().interval;
        drop(inner);
        tokio::time::sleep(interval).await;
    }
}

impl SchedulerInner {
    fn now_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    fn record_change(&self) -> f64 {
        let now = self.now_ms();
        self.tracker.lock().record(now)
    }

    /// Write the heartbeat and count the sync.
    fn beat(&self) {
        let field = self.config.lock().heartbeat_field.clone();
        let timestamp = chrono::Utc::now().timestamp_millis();
        self.in_heartbeat.store(true, Ordering::SeqCst);
        self.target.heartbeat(&field, timestamp);
        self.in_heartbeat.store(false, Ordering::SeqCst);

        let mut readings = self.readings.lock();
        readings.last_sync = Instant::now();
        readings.sync_count += 1;
        readings.last_heartbeat = Some(timestamp);
    }

    async fn tick(&self) {
        if self.target.is_connected() {
            self.beat();
            tracing::trace!(room = %self.room, "Heartbeat written");
        } else {
            tracing::debug!(room = %self.room, "Tick skipped, not connected");
        }
        if self.config.lock().adaptive_mode {
            self.adapt().await;
        }
    }

    /// Recompute and adopt the interval if it moved past the hysteresis band.
    async fn adapt(&self) {
        let next = self.compute().await;
        let mut readings = self.readings.lock();
        if exceeds_hysteresis(readings.interval, next) {
            tracing::debug!(
                room = %self.room,
                from_ms = readings.interval.as_millis() as u64,
                to_ms = next.as_millis() as u64,
                "Sync interval adjusted"
            );
            readings.interval = next;
        }
    }

    async fn compute(&self) -> Duration {
        let config = self.config.lock().clone();
        let network = if config.network_aware {
            Some(self.network().await)
        } else {
            None
        };
        let battery = if config.battery_aware {
            self.environment.battery().await
        } else {
            None
        };

        let since_last_sync = {
            let mut readings = self.readings.lock();
            readings.battery = battery;
            readings.last_sync.elapsed()
        };
        let inputs = IntervalInputs {
            change_frequency: self.tracker.lock().frequency(),
            network,
            battery,
            since_last_sync,
        };
        compute_interval(&config, &inputs)
    }

    /// Network reading, reused for [`NETWORK_CACHE_TTL`].
    async fn network(&self) -> NetworkInfo {
        let cached = self
            .readings
            .lock()
            .network
            .as_ref()
            .filter(|(at, _)| at.elapsed() < NETWORK_CACHE_TTL)
            .map(|(_, network)| network.clone());
        if let Some(network) = cached {
            return network;
        }
        let network = self.environment.network().await;
        self.readings.lock().network = Some((Instant::now(), network.clone()));
        network
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[derive(Default)]
    struct FakeTarget {
        connected: AtomicBool,
        beats: AtomicU64,
        requests: AtomicU64,
    }

    impl SyncTarget for FakeTarget {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn heartbeat(&self, _field: &str, _timestamp_ms: i64) {
            self.beats.fetch_add(1, Ordering::SeqCst);
        }

        fn request_sync(&self) -> bool {
            self.requests.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn config() -> AutoSyncConfig {
        AutoSyncConfig {
            enabled: true,
            ..Default::default()
        }
    }

    fn scheduler(target: Arc<FakeTarget>, config: AutoSyncConfig) -> AdaptiveSyncScheduler {
        AdaptiveSyncScheduler::new(
            "room",
            Doc::with_client(1),
            target,
            Arc::new(StaticEnvironment::default()),
            config,
        )
        .unwrap()
    }

    #[test]
    fn test_tracker_scenario() {
        let mut tracker = ChangeFrequencyTracker::default();
        for i in 0..10 {
            tracker.record(i * 1000);
        }
        assert!((tracker.frequency() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_tracker_edge_cases() {
        let mut tracker = ChangeFrequencyTracker::default();
        assert_eq!(tracker.record(5), 0.0);
        assert_eq!(tracker.record(5), 0.0);

        for i in 0..50 {
            tracker.record(10_000 + i * 6000);
        }
        assert_eq!(tracker.len(), MAX_CHANGE_HISTORY);
        assert!((tracker.frequency() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_frequency_factors() {
        let config = config();
        let at = |per_minute: f64| {
            compute_interval(
                &config,
                &IntervalInputs {
                    change_frequency: per_minute,
                    ..Default::default()
                },
            )
            .as_millis()
        };
        assert_eq!(at(20.0), 3500);
        assert_eq!(at(7.0), 4250);
        assert_eq!(at(1.0), 5000);
        assert_eq!(at(0.3), 5750);
        assert_eq!(at(0.0), 6500);
    }

    #[test]
    fn test_environment_factors() {
        let config = config();
        let inputs = IntervalInputs {
            change_frequency: 1.0,
            network: Some(NetworkInfo {
                latency_ms: 800,
                link: LinkClass::G2,
            }),
            battery: Some(BatteryInfo {
                level: 0.1,
                charging: false,
            }),
            since_last_sync: Duration::from_secs(61),
        };
        // 5000 * 1.2 * 1.5 * 1.3 * 1.2
        assert_eq!(compute_interval(&config, &inputs).as_millis(), 14040);

        let charging = IntervalInputs {
            battery: Some(BatteryInfo {
                level: 0.1,
                charging: true,
            }),
            ..inputs.clone()
        };
        assert_eq!(compute_interval(&config, &charging).as_millis(), 10800);

        let unaware = AutoSyncConfig {
            network_aware: false,
            battery_aware: false,
            ..config.clone()
        };
        assert_eq!(compute_interval(&unaware, &inputs).as_millis(), 6000);
    }

    #[test]
    fn test_interval_is_clamped() {
        let config = AutoSyncConfig {
            interval: Duration::from_millis(29_000),
            ..config()
        };
        let slow = IntervalInputs {
            change_frequency: 0.0,
            since_last_sync: Duration::from_secs(120),
            ..Default::default()
        };
        assert_eq!(compute_interval(&config, &slow), Duration::from_millis(30_000));

        let fixed = AutoSyncConfig {
            adaptive_mode: false,
            interval: Duration::from_millis(10),
            ..config
        };
        assert_eq!(compute_interval(&fixed, &slow), Duration::from_millis(1000));
    }

    #[test]
    fn test_hysteresis() {
        let current = Duration::from_millis(5000);
        assert!(!exceeds_hysteresis(current, Duration::from_millis(5900)));
        assert!(!exceeds_hysteresis(current, Duration::from_millis(4000)));
        assert!(exceeds_hysteresis(current, Duration::from_millis(6100)));
        assert!(exceeds_hysteresis(current, Duration::from_millis(3900)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_100ms() {
        let target = Arc::new(FakeTarget::default());
        target.connected.store(true, Ordering::SeqCst);
        let scheduler = scheduler(target.clone(), config());

        assert!(scheduler.start().await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(target.beats.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(target.beats.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.status().sync_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_heartbeat_while_disconnected() {
        let target = Arc::new(FakeTarget::default());
        let scheduler = scheduler(target.clone(), config());
        scheduler.start().await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(target.beats.load(Ordering::SeqCst), 0);
        assert!(!scheduler.trigger_sync());
        assert_eq!(target.requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_does_not_start() {
        let target = Arc::new(FakeTarget::default());
        let scheduler = scheduler(target, AutoSyncConfig::default());
        assert!(!scheduler.start().await);
        assert!(!scheduler.is_running());

        assert!(scheduler.set_config(config()).await.unwrap());
        assert!(scheduler.is_running());

        let disabled = AutoSyncConfig {
            enabled: false,
            ..config()
        };
        assert!(!scheduler.set_config(disabled).await.unwrap());
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_sync_records_change() {
        let target = Arc::new(FakeTarget::default());
        target.connected.store(true, Ordering::SeqCst);
        let scheduler = scheduler(target.clone(), config());

        assert!(scheduler.trigger_sync());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(scheduler.trigger_sync());

        assert_eq!(target.beats.load(Ordering::SeqCst), 2);
        assert_eq!(target.requests.load(Ordering::SeqCst), 2);
        assert!((scheduler.change_frequency() - 60.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_reading_is_cached() {
        let environment = Arc::new(StaticEnvironment::default());
        let scheduler = AdaptiveSyncScheduler::new(
            "room",
            Doc::with_client(1),
            Arc::new(FakeTarget::default()),
            environment.clone(),
            config(),
        )
        .unwrap();

        scheduler.start().await;
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(environment.network_reads(), 1);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(environment.network_reads(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_invalid_config() {
        let target = Arc::new(FakeTarget::default());
        let scheduler = scheduler(target, config());
        let bad = AutoSyncConfig {
            heartbeat_field: String::new(),
            ..config()
        };
        assert!(scheduler.set_config(bad).await.is_err());
        assert_eq!(scheduler.config().heartbeat_field, "_lastSyncTime");
    }
}
