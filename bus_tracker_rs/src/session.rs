use crate::config::{LocationRequest, Settings, TrackingConfig, NO_VEHICLE};
use crate::error::TrackerError;
use crate::fix::{LocationFix, TelemetryRecord};
use crate::guard::{attempt_step, GuardHandle, HostPlatform, LifecycleGuard, TeardownReport};
use crate::location::{FixSink, LocationSource, SourcedFix, SubscriptionHandle, SubscriptionId};
use crate::uplink::{Uplink, UplinkOutcome, UplinkRequest};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinError;

pub const STEP_SUBSCRIPTION: &str = "cancel_subscription";

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No session; nothing held
    Idle,
    /// Presence shown and guard held, subscription not (yet) registered
    Starting,
    /// Subscription live, fixes are uplinked
    Tracking,
    /// Teardown in progress
    Stopping,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "IDLE",
            SessionState::Starting => "STARTING",
            SessionState::Tracking => "TRACKING",
            SessionState::Stopping => "STOPPING",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a `start` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub config: TrackingConfig,
    /// A start carrying this flag is a stop request
    pub stop_service: bool,
}

impl StartRequest {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            stop_service: false,
        }
    }

    pub fn stop_flag() -> Self {
        Self {
            config: TrackingConfig::from_parts(None, None, NO_VEHICLE),
            stop_service: true,
        }
    }
}

/// Counters kept across sessions of one worker
#[derive(Debug, Default)]
pub struct SessionStats {
    pub fixes_received: AtomicU64,
    pub fixes_dropped: Arc<AtomicU64>,
    pub stale_fixes: AtomicU64,
    pub dispatched: AtomicU64,
    pub skipped: AtomicU64,
    pub delivered: AtomicU64,
    pub rejected: AtomicU64,
    pub transport_errors: AtomicU64,
}

impl SessionStats {
    fn record_outcome(&self, outcome: Result<UplinkOutcome, JoinError>) {
        match outcome {
            Ok(Ok(_)) => self.delivered.fetch_add(1, Ordering::Relaxed),
            Ok(Err(TrackerError::RemoteRejected { .. })) => {
                self.rejected.fetch_add(1, Ordering::Relaxed)
            }
            Ok(Err(_)) => self.transport_errors.fetch_add(1, Ordering::Relaxed),
            Err(e) => {
                log::error!("uplink task ended abnormally: {}", e);
                self.transport_errors.fetch_add(1, Ordering::Relaxed)
            }
        };
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            fixes_received: self.fixes_received.load(Ordering::Relaxed),
            fixes_dropped: self.fixes_dropped.load(Ordering::Relaxed),
            stale_fixes: self.stale_fixes.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub fixes_received: u64,
    pub fixes_dropped: u64,
    pub stale_fixes: u64,
    pub dispatched: u64,
    pub skipped: u64,
    pub delivered: u64,
    pub rejected: u64,
    pub transport_errors: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub vehicle_id: Option<i64>,
    pub subscription_active: bool,
    pub stats: StatsSnapshot,
}

/// Tracking session: owns the one location subscription and the guard resources.
///
/// Not thread-safe by itself; the session worker is the single writer, which
/// makes every check-and-set on `state` atomic with respect to the session.
pub struct TrackingSession {
    state: SessionState,
    config: Option<TrackingConfig>,
    subscription: Option<SubscriptionHandle>,
    guard_handle: Option<GuardHandle>,
    next_subscription: u64,
    request: LocationRequest,
    source: Arc<dyn LocationSource>,
    guard: LifecycleGuard,
    uplink: Arc<dyn Uplink>,
    fixes: Sender<SourcedFix>,
    stats: Arc<SessionStats>,
}

impl TrackingSession {
    pub fn new(
        source: Arc<dyn LocationSource>,
        platform: Arc<dyn HostPlatform>,
        uplink: Arc<dyn Uplink>,
        settings: &Settings,
        fixes: Sender<SourcedFix>,
    ) -> Self {
        TrackingSession {
            state: SessionState::Idle,
            config: None,
            subscription: None,
            guard_handle: None,
            next_subscription: 1,
            request: settings.location.clone(),
            source,
            guard: LifecycleGuard::new(platform, settings.guard.clone()),
            uplink,
            fixes,
            stats: Arc::new(SessionStats::default()),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        self.subscription.as_ref().map(|h| h.id())
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.stats)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            vehicle_id: self.config.as_ref().and_then(|c| c.vehicle_id()),
            subscription_active: self.subscription.is_some(),
            stats: self.stats.snapshot(),
        }
    }

    /// Handle a `start` command
    pub fn start(&mut self, request: StartRequest) {
        if request.stop_service {
            log::info!("Stop request received, stopping session");
            self.stop();
            return;
        }

        let vehicle_id = request.config.vehicle_id();
        log::info!(
            "start: apiBase={:?}, busId={:?}, hasToken={}, state={}",
            request.config.api_base_url(),
            vehicle_id,
            request.config.auth_token().is_some(),
            self.state
        );

        match self.state {
            SessionState::Idle => {
                self.state = SessionState::Starting;
                // Presence goes up inside acquire, before the subscription is requested
                self.guard_handle = Some(self.guard.acquire(vehicle_id));
                self.config = Some(request.config);
                self.subscribe();
            }
            SessionState::Starting => {
                // Inert after a failed subscribe; nothing is running yet, so the newest config wins
                self.guard.present(vehicle_id);
                self.config = Some(request.config);
                self.subscribe();
            }
            SessionState::Tracking => {
                log::info!("Location tracking already started, ignoring duplicate start");
                self.guard.present(vehicle_id);
            }
            SessionState::Stopping => {
                log::warn!("start received while stopping, ignoring");
            }
        }
    }

    fn subscribe(&mut self) {
        if self.subscription.is_some() {
            return;
        }

        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        let sink = FixSink::new(id, self.fixes.clone(), Arc::clone(&self.stats.fixes_dropped));

        match self.source.subscribe(&self.request, sink) {
            Ok(handle) => {
                log::info!("Location updates registered ({})", handle.id());
                self.subscription = Some(handle);
                self.state = SessionState::Tracking;
            }
            Err(TrackerError::PermissionDenied) => {
                log::warn!("Location permission denied; session stays inert until the next start");
            }
            Err(e) => {
                log::error!("Failed to register location updates: {}", e);
            }
        }
    }

    /// Tear the session down. Safe to call in any state; never fails outward.
    pub fn stop(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        if self.state == SessionState::Idle {
            log::debug!("stop while idle, nothing to release");
            return report;
        }

        log::info!("Stopping session (state={})", self.state);
        self.state = SessionState::Stopping;

        if let Some(handle) = self.subscription.take() {
            let source = &self.source;
            attempt_step(STEP_SUBSCRIPTION, &mut report, || source.unsubscribe(handle));
        }

        if let Some(handle) = self.guard_handle.take() {
            report.merge(self.guard.release(handle));
        }

        self.config = None;
        self.state = SessionState::Idle;

        if report.is_clean() {
            log::info!("Session fully stopped");
        } else {
            log::warn!("Session stopped with {} teardown error(s)", report.errors.len());
        }
        report
    }

    /// Handle one fix from the location source.
    ///
    /// Returns `false` when the fix belongs to a subscription that is no longer current.
    pub fn on_fix(&mut self, sourced: SourcedFix) -> bool {
        if self.state != SessionState::Tracking || self.subscription_id() != Some(sourced.subscription)
        {
            self.stats.stale_fixes.fetch_add(1, Ordering::Relaxed);
            log::debug!("Dropping fix from inactive {}", sourced.subscription);
            return false;
        }
        self.stats.fixes_received.fetch_add(1, Ordering::Relaxed);

        if let Some(config) = self.config.as_ref() {
            self.dispatch(config, sourced.fix);
        }
        true
    }

    fn dispatch(&self, config: &TrackingConfig, fix: LocationFix) {
        log::debug!(
            "Got location: lat={}, lon={}, speed={:.1} km/h",
            fix.latitude,
            fix.longitude,
            fix.speed_kmh()
        );

        let (url, token) = match (config.update_location_url(), config.auth_token()) {
            (Some(url), Some(token)) => (url, token.to_string()),
            _ => {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                log::warn!("Missing URL or token, cannot post");
                return;
            }
        };

        let body = match TelemetryRecord::from_fix(&fix).to_json() {
            Ok(body) => body,
            Err(e) => {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                log::error!("Failed to encode telemetry record: {}", e);
                return;
            }
        };

        log::debug!("Posting to: {}", url);
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
        let pending = self.uplink.post(UplinkRequest { url, token, body });

        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            stats.record_outcome(pending.await);
        });
    }

    /// Re-acquire the wake hold ahead of its ceiling
    pub fn renew_guard(&mut self) {
        if self.state != SessionState::Tracking {
            return;
        }
        if let Some(handle) = self.guard_handle.as_mut() {
            if let Err(e) = self.guard.renew(handle) {
                log::warn!("Wake hold renewal failed: {}", e);
            }
        }
    }
}
