//! Lifecycle guard: keeps the host process eligible to run while tracking.
//!
//! The guard owns two platform resources, the persistent "tracking" notification
//! and the wake hold. Release steps never fail outward; each one is attempted
//! on its own and problems are reported in a [`TeardownReport`].

use crate::config::GuardSettings;
use crate::error::{Result, TrackerError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Notification channel the presence notification is posted on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationChannel {
    pub id: String,
    pub name: String,
    pub low_importance: bool,
    pub show_badge: bool,
    pub public_on_lock_screen: bool,
}

/// Ongoing, non-dismissible notification shown while a session is alive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presence {
    pub id: i32,
    pub channel_id: String,
    pub title: String,
    pub text: String,
    pub ongoing: bool,
}

/// Host OS services the guard relies on
pub trait HostPlatform: Send + Sync {
    /// Create the channel if it does not exist yet
    fn ensure_channel(&self, channel: &NotificationChannel) -> Result<()>;

    /// Post or replace the foreground presence notification
    fn show_presence(&self, presence: &Presence) -> Result<()>;

    fn dismiss_presence(&self, id: i32) -> Result<()>;

    /// Acquire (or re-acquire) the wake hold, released automatically after `ceiling`
    fn acquire_wake_hold(&self, tag: &str, ceiling: Duration) -> Result<()>;

    fn wake_hold_held(&self) -> bool;

    fn release_wake_hold(&self) -> Result<()>;
}

/// Resources held for one session
#[derive(Debug)]
pub struct GuardHandle {
    vehicle_id: Option<i64>,
    acquired_at: Instant,
    wake_hold: bool,
}

impl GuardHandle {
    pub fn vehicle_id(&self) -> Option<i64> {
        self.vehicle_id
    }

    pub fn holds_wake_hold(&self) -> bool {
        self.wake_hold
    }

    pub fn age(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

/// Failures collected while tearing a session down
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TeardownReport {
    pub errors: Vec<TrackerError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn failed(&self, step: &str) -> bool {
        self.errors
            .iter()
            .any(|e| matches!(e, TrackerError::ResourceTeardown { step: s, .. } if *s == step))
    }

    pub(crate) fn merge(&mut self, other: TeardownReport) {
        self.errors.extend(other.errors);
    }
}

/// Run one teardown step; errors and panics are logged and recorded, never propagated
pub(crate) fn attempt_step<F>(step: &'static str, report: &mut TeardownReport, f: F)
where
    F: FnOnce() -> Result<()>,
{
    let reason = match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {
            log::debug!("[teardown] {} ok", step);
            return;
        }
        Ok(Err(e)) => e.to_string(),
        Err(panic) => panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic".to_string()),
    };

    log::error!("[teardown] {} failed: {}", step, reason);
    report
        .errors
        .push(TrackerError::ResourceTeardown { step, reason });
}

pub const STEP_WAKE_HOLD: &str = "release_wake_hold";
pub const STEP_PRESENCE: &str = "dismiss_presence";

pub struct LifecycleGuard {
    platform: std::sync::Arc<dyn HostPlatform>,
    settings: GuardSettings,
}

impl LifecycleGuard {
    pub fn new(platform: std::sync::Arc<dyn HostPlatform>, settings: GuardSettings) -> Self {
        Self { platform, settings }
    }

    pub fn settings(&self) -> &GuardSettings {
        &self.settings
    }

    fn channel(&self) -> NotificationChannel {
        NotificationChannel {
            id: self.settings.channel_id.clone(),
            name: self.settings.channel_name.clone(),
            low_importance: true,
            show_badge: false,
            public_on_lock_screen: true,
        }
    }

    /// Show the foreground presence. Must run before any asynchronous work on start.
    pub fn present(&self, vehicle_id: Option<i64>) {
        if let Err(e) = self.platform.ensure_channel(&self.channel()) {
            log::warn!("[guard] notification channel unavailable: {}", e);
        }

        let presence = Presence {
            id: self.settings.notification_id,
            channel_id: self.settings.channel_id.clone(),
            title: self.settings.notification_title.clone(),
            text: self.settings.notification_text(vehicle_id),
            ongoing: true,
        };
        if let Err(e) = self.platform.show_presence(&presence) {
            log::error!("[guard] failed to post presence notification: {}", e);
        }
    }

    /// Present and take the wake hold for a new session
    pub fn acquire(&self, vehicle_id: Option<i64>) -> GuardHandle {
        self.present(vehicle_id);

        let wake_hold = match self
            .platform
            .acquire_wake_hold(&self.settings.wake_hold_tag, self.settings.wake_hold_ceiling)
        {
            Ok(()) => {
                log::info!(
                    "[guard] wake hold acquired (ceiling {}h)",
                    self.settings.wake_hold_ceiling.as_secs() / 3600
                );
                true
            }
            Err(e) => {
                log::error!("[guard] wake hold not acquired: {}", e);
                false
            }
        };

        GuardHandle {
            vehicle_id,
            acquired_at: Instant::now(),
            wake_hold,
        }
    }

    /// Re-acquire the wake hold before its ceiling expires
    pub fn renew(&self, handle: &mut GuardHandle) -> Result<()> {
        if self.platform.wake_hold_held() {
            self.platform.release_wake_hold()?;
        }
        self.platform
            .acquire_wake_hold(&self.settings.wake_hold_tag, self.settings.wake_hold_ceiling)?;
        handle.wake_hold = true;
        handle.acquired_at = Instant::now();
        log::info!("[guard] wake hold renewed");
        Ok(())
    }

    /// Release the wake hold (only if still held), then remove the notification
    pub fn release(&self, handle: GuardHandle) -> TeardownReport {
        let mut report = TeardownReport::default();

        attempt_step(STEP_WAKE_HOLD, &mut report, || {
            if self.platform.wake_hold_held() {
                self.platform.release_wake_hold()?;
                log::info!("[guard] wake hold released");
            }
            Ok(())
        });

        attempt_step(STEP_PRESENCE, &mut report, || {
            self.platform.dismiss_presence(self.settings.notification_id)?;
            log::info!("[guard] presence notification removed");
            Ok(())
        });

        log::debug!(
            "[guard] released after {:.1}s (vehicle {:?})",
            handle.age().as_secs_f64(),
            handle.vehicle_id
        );
        report
    }
}

#[derive(Debug, Default)]
struct HeadlessState {
    channels: Vec<String>,
    presence: Option<Presence>,
    wake_hold_until: Option<Instant>,
}

/// Host platform for processes without a notification shade or power manager.
///
/// Presence and wake hold are logged and tracked in memory so a desktop run
/// walks through the same lifecycle as the phone.
#[derive(Debug, Default)]
pub struct HeadlessPlatform {
    state: Mutex<HeadlessState>,
}

impl HeadlessPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HeadlessState>> {
        self.state
            .lock()
            .map_err(|_| TrackerError::Internal("Failed to acquire platform lock".to_string()))
    }

    pub fn presence(&self) -> Option<Presence> {
        self.lock().ok().and_then(|s| s.presence.clone())
    }
}

impl HostPlatform for HeadlessPlatform {
    fn ensure_channel(&self, channel: &NotificationChannel) -> Result<()> {
        let mut state = self.lock()?;
        if !state.channels.contains(&channel.id) {
            log::debug!("[host] channel '{}' created", channel.id);
            state.channels.push(channel.id.clone());
        }
        Ok(())
    }

    fn show_presence(&self, presence: &Presence) -> Result<()> {
        log::info!("[host] {}: {}", presence.title, presence.text);
        self.lock()?.presence = Some(presence.clone());
        Ok(())
    }

    fn dismiss_presence(&self, _id: i32) -> Result<()> {
        self.lock()?.presence = None;
        Ok(())
    }

    fn acquire_wake_hold(&self, _tag: &str, ceiling: Duration) -> Result<()> {
        self.lock()?.wake_hold_until = Some(Instant::now() + ceiling);
        Ok(())
    }

    fn wake_hold_held(&self) -> bool {
        self.lock()
            .ok()
            .and_then(|s| s.wake_hold_until)
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    fn release_wake_hold(&self) -> Result<()> {
        self.lock()?.wake_hold_until = None;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Platform double that records calls and can be told to fail
    #[derive(Default)]
    pub(crate) struct FlakyPlatform {
        pub inner: HeadlessPlatform,
        pub fail_release: AtomicBool,
        pub panic_release: AtomicBool,
        pub fail_dismiss: AtomicBool,
        pub releases: AtomicUsize,
        pub dismissals: AtomicUsize,
        pub acquisitions: AtomicUsize,
    }

    impl HostPlatform for FlakyPlatform {
        fn ensure_channel(&self, channel: &NotificationChannel) -> Result<()> {
            self.inner.ensure_channel(channel)
        }

        fn show_presence(&self, presence: &Presence) -> Result<()> {
            self.inner.show_presence(presence)
        }

        fn dismiss_presence(&self, id: i32) -> Result<()> {
            self.dismissals.fetch_add(1, Ordering::SeqCst);
            if self.fail_dismiss.load(Ordering::SeqCst) {
                return Err(TrackerError::Platform("notification service gone".to_string()));
            }
            self.inner.dismiss_presence(id)
        }

        fn acquire_wake_hold(&self, tag: &str, ceiling: Duration) -> Result<()> {
            self.acquisitions.fetch_add(1, Ordering::SeqCst);
            self.inner.acquire_wake_hold(tag, ceiling)
        }

        fn wake_hold_held(&self) -> bool {
            self.inner.wake_hold_held()
        }

        fn release_wake_hold(&self) -> Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            if self.panic_release.load(Ordering::SeqCst) {
                panic!("wake lock under-locked");
            }
            if self.fail_release.load(Ordering::SeqCst) {
                return Err(TrackerError::Platform("wake lock under-locked".to_string()));
            }
            self.inner.release_wake_hold()
        }
    }

    fn guard(platform: Arc<FlakyPlatform>) -> LifecycleGuard {
        LifecycleGuard::new(platform, GuardSettings::default())
    }

    #[test]
    fn test_acquire_presents_and_holds() {
        let platform = Arc::new(FlakyPlatform::default());
        let guard = guard(platform.clone());

        let handle = guard.acquire(Some(42));
        assert!(handle.holds_wake_hold());
        assert!(platform.wake_hold_held());

        let presence = platform.inner.presence().unwrap();
        assert_eq!(presence.id, 1001);
        assert_eq!(presence.title, "Tracking");
        assert_eq!(presence.text, "Bus #42 tracking active");
        assert!(presence.ongoing);
    }

    #[test]
    fn test_release_is_clean() {
        let platform = Arc::new(FlakyPlatform::default());
        let guard = guard(platform.clone());

        let handle = guard.acquire(Some(1));
        let report = guard.release(handle);

        assert!(report.is_clean());
        assert!(!platform.wake_hold_held());
        assert!(platform.inner.presence().is_none());
    }

    #[test]
    fn test_release_skips_wake_hold_not_held() {
        let platform = Arc::new(FlakyPlatform::default());
        let guard = guard(platform.clone());

        let handle = guard.acquire(Some(1));
        platform.inner.release_wake_hold().unwrap();

        let report = guard.release(handle);
        assert!(report.is_clean());
        assert_eq!(platform.releases.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_release_failure_still_dismisses() {
        let platform = Arc::new(FlakyPlatform::default());
        platform.fail_release.store(true, Ordering::SeqCst);
        let guard = guard(platform.clone());

        let handle = guard.acquire(Some(1));
        let report = guard.release(handle);

        assert!(report.failed(STEP_WAKE_HOLD));
        assert!(!report.failed(STEP_PRESENCE));
        assert_eq!(platform.dismissals.load(Ordering::SeqCst), 1);
        assert!(platform.inner.presence().is_none());
    }

    #[test]
    fn test_release_panic_still_dismisses() {
        let platform = Arc::new(FlakyPlatform::default());
        platform.panic_release.store(true, Ordering::SeqCst);
        let guard = guard(platform.clone());

        let handle = guard.acquire(Some(1));
        let report = guard.release(handle);

        assert!(report.failed(STEP_WAKE_HOLD));
        assert!(platform.inner.presence().is_none());
    }

    #[test]
    fn test_renew_reacquires() {
        let platform = Arc::new(FlakyPlatform::default());
        let guard = guard(platform.clone());

        let mut handle = guard.acquire(Some(1));
        guard.renew(&mut handle).unwrap();

        assert_eq!(platform.acquisitions.load(Ordering::SeqCst), 2);
        assert_eq!(platform.releases.load(Ordering::SeqCst), 1);
        assert!(platform.wake_hold_held());
    }
}
