use crate::config::LocationRequest;
use crate::error::{Result, TrackerError};
use crate::fix::LocationFix;
use crate::location::{FixSink, LocationSource, SubscriptionHandle, SubscriptionId};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};

/// Live emission tasks keyed by subscription
#[derive(Default)]
struct Subscriptions {
    tasks: Mutex<HashMap<SubscriptionId, JoinHandle<()>>>,
}

impl Subscriptions {
    fn insert(&self, id: SubscriptionId, task: JoinHandle<()>) -> Result<()> {
        let mut tasks = self.tasks.lock().map_err(|_| {
            TrackerError::Internal("Failed to acquire subscriptions lock".to_string())
        })?;
        if let Some(previous) = tasks.insert(id, task) {
            previous.abort();
        }
        Ok(())
    }

    fn cancel(&self, id: SubscriptionId) -> Result<()> {
        let mut tasks = self.tasks.lock().map_err(|_| {
            TrackerError::Internal("Failed to acquire subscriptions lock".to_string())
        })?;
        match tasks.remove(&id) {
            Some(task) => {
                task.abort();
                Ok(())
            }
            None => Err(TrackerError::SourceUnavailable(format!(
                "{} is not registered",
                id
            ))),
        }
    }

    fn live(&self) -> usize {
        self.tasks
            .lock()
            .ok()
            .map(|t| t.values().filter(|h| !h.is_finished()).count())
            .unwrap_or(0)
    }
}

fn spawn_on_runtime<F>(future: F) -> Result<JoinHandle<()>>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|e| TrackerError::SourceUnavailable(format!("no async runtime: {}", e)))?;
    Ok(runtime.spawn(future))
}

/// Synthetic source that walks a vehicle slowly north-east from an origin.
///
/// Stands in for the platform provider on desktops and in tests.
pub struct SimulatedSource {
    origin: (f64, f64),
    permission_granted: bool,
    subscriptions: Subscriptions,
}

impl SimulatedSource {
    pub fn new(origin_lat: f64, origin_lon: f64) -> Self {
        SimulatedSource {
            origin: (origin_lat, origin_lon),
            permission_granted: true,
            subscriptions: Subscriptions::default(),
        }
    }

    /// Behave as if the location permission was revoked
    pub fn without_permission(mut self) -> Self {
        self.permission_granted = false;
        self
    }

    pub fn live_subscriptions(&self) -> usize {
        self.subscriptions.live()
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new(30.0444, 31.2357)
    }
}

impl LocationSource for SimulatedSource {
    fn subscribe(&self, request: &LocationRequest, sink: FixSink) -> Result<SubscriptionHandle> {
        if !self.permission_granted {
            return Err(TrackerError::PermissionDenied);
        }

        let id = sink.subscription();
        let period = request.interval.max(Duration::from_millis(1));
        let (lat0, lon0) = self.origin;

        let task = spawn_on_runtime(async move {
            let mut ticker = interval(period);
            let mut seq = 0u64;

            loop {
                ticker.tick().await;
                let step = seq as f64;
                let fix = LocationFix::now(
                    lat0 + step * 0.00001,
                    lon0 + step * 0.00001,
                    8.0 + (step * 0.5).sin() * 3.0,
                );
                if !sink.deliver(fix) {
                    log::debug!("[sim] {} worker gone after {} fixes", id, seq);
                    break;
                }
                seq += 1;
            }
        })?;

        self.subscriptions.insert(id, task)?;
        log::info!("[sim] {} registered ({} ms interval)", id, period.as_millis());
        Ok(SubscriptionHandle::new(id))
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        self.subscriptions.cancel(handle.id())?;
        log::info!("[sim] {} removed", handle.id());
        Ok(())
    }
}

/// Output of `termux-location`
#[derive(Debug, Deserialize)]
struct TermuxLocation {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    speed: Option<f64>,
}

fn parse_termux_output(output: &str) -> Option<LocationFix> {
    let location: TermuxLocation = serde_json::from_str(output.trim()).ok()?;
    Some(LocationFix::now(
        location.latitude,
        location.longitude,
        location.speed.unwrap_or(0.0),
    ))
}

/// Polls Termux:API's `termux-location` once per request interval
pub struct TermuxSource {
    command: String,
    subscriptions: Subscriptions,
}

impl TermuxSource {
    pub fn new() -> Self {
        Self::with_command("termux-location")
    }

    pub fn with_command(command: &str) -> Self {
        TermuxSource {
            command: command.to_string(),
            subscriptions: Subscriptions::default(),
        }
    }

    pub fn live_subscriptions(&self) -> usize {
        self.subscriptions.live()
    }
}

impl Default for TermuxSource {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_termux_location(command: &str) -> Option<LocationFix> {
    let run = tokio::process::Command::new(command)
        .args(["-p", "gps", "-r", "once"])
        .kill_on_drop(true)
        .output();

    match timeout(Duration::from_secs(30), run).await {
        Ok(Ok(output)) => {
            let text = String::from_utf8_lossy(&output.stdout);
            let fix = parse_termux_output(&text);
            if fix.is_none() {
                log::warn!("[termux] unparseable location output: {}", text.trim());
            }
            fix
        }
        Ok(Err(e)) => {
            log::error!("[termux] failed to run {}: {}", command, e);
            None
        }
        Err(_) => {
            log::warn!("[termux] no fix within 30s");
            None
        }
    }
}

impl LocationSource for TermuxSource {
    fn subscribe(&self, request: &LocationRequest, sink: FixSink) -> Result<SubscriptionHandle> {
        let id = sink.subscription();
        let period = request.interval.max(Duration::from_millis(1));
        let command = self.command.clone();

        let task = spawn_on_runtime(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if let Some(fix) = read_termux_location(&command).await {
                    if !sink.deliver(fix) {
                        break;
                    }
                }
            }
        })?;

        self.subscriptions.insert(id, task)?;
        log::info!("[termux] {} registered", id);
        Ok(SubscriptionHandle::new(id))
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        self.subscriptions.cancel(handle.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::SourcedFix;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn sink(id: u64) -> (FixSink, mpsc::Receiver<SourcedFix>) {
        let (tx, rx) = mpsc::channel(16);
        (
            FixSink::new(SubscriptionId(id), tx, Arc::new(AtomicU64::new(0))),
            rx,
        )
    }

    fn fast_request() -> LocationRequest {
        LocationRequest {
            interval: Duration::from_millis(10),
            ..LocationRequest::default()
        }
    }

    #[test]
    fn test_parse_termux_output() {
        let output = r#"{
  "latitude": 30.0444,
  "longitude": 31.2357,
  "altitude": 74.0,
  "accuracy": 4.5,
  "vertical_accuracy": 2.0,
  "bearing": 12.0,
  "speed": 3.25,
  "elapsedMs": 52,
  "provider": "gps"
}"#;
        let fix = parse_termux_output(output).unwrap();
        assert_eq!(fix.latitude, 30.0444);
        assert_eq!(fix.longitude, 31.2357);
        assert_eq!(fix.speed_mps, 3.25);
    }

    #[test]
    fn test_parse_termux_output_rejects_garbage() {
        assert!(parse_termux_output("").is_none());
        assert!(parse_termux_output("Location permission denied").is_none());
    }

    #[test]
    fn test_subscribe_without_runtime_fails() {
        let source = SimulatedSource::default();
        let (sink, _rx) = sink(1);
        let err = source.subscribe(&fast_request(), sink).unwrap_err();
        assert!(matches!(err, TrackerError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_simulated_source_emits_tagged_fixes() {
        let source = SimulatedSource::new(30.0, 31.0);
        let (sink, mut rx) = sink(3);

        let handle = source.subscribe(&fast_request(), sink).unwrap();
        assert_eq!(source.live_subscriptions(), 1);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.subscription, SubscriptionId(3));
        assert!(second.fix.latitude > first.fix.latitude);

        source.unsubscribe(handle).unwrap();
        tokio::task::yield_now().await;
        assert_eq!(source.live_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_simulated_permission_denied() {
        let source = SimulatedSource::default().without_permission();
        let (sink, _rx) = sink(1);
        let err = source.subscribe(&fast_request(), sink).unwrap_err();
        assert_eq!(err, TrackerError::PermissionDenied);
        assert_eq!(source.live_subscriptions(), 0);
    }

    async fn wait_until_cancelled(live: impl Fn() -> usize) {
        for _ in 0..100 {
            if live() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("subscription task still running");
    }

    #[tokio::test]
    async fn test_termux_missing_command_skips_ticks() {
        let source = TermuxSource::with_command("/nonexistent/termux-location");
        let (sink, mut rx) = sink(5);

        let handle = source.subscribe(&fast_request(), sink).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Failed runs deliver nothing, and the poll loop keeps going
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Empty)
        ));
        assert_eq!(source.live_subscriptions(), 1);

        source.unsubscribe(handle).unwrap();
        wait_until_cancelled(|| source.live_subscriptions()).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_termux_polls_command_output() {
        use std::os::unix::fs::PermissionsExt;

        let script = std::env::temp_dir().join(format!("fake-termux-location-{}", std::process::id()));
        std::fs::write(
            &script,
            "#!/bin/sh\necho '{\"latitude\": 30.1, \"longitude\": 31.2, \"speed\": 5.5}'\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let source = TermuxSource::with_command(script.to_str().unwrap());
        let (sink, mut rx) = sink(6);
        let handle = source.subscribe(&fast_request(), sink).unwrap();

        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.subscription, SubscriptionId(6));
        assert_eq!(got.fix.latitude, 30.1);
        assert_eq!(got.fix.longitude, 31.2);
        assert_eq!(got.fix.speed_mps, 5.5);

        source.unsubscribe(handle).unwrap();
        wait_until_cancelled(|| source.live_subscriptions()).await;

        // Drain whatever was in flight; nothing arrives afterwards
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        let _ = std::fs::remove_file(&script);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_handle_errors() {
        let source = SimulatedSource::default();
        let result = source.unsubscribe(SubscriptionHandle::new(SubscriptionId(99)));
        assert!(result.is_err());
    }
}
