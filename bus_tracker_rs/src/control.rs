//! Control channel and session worker.
//!
//! The worker task is the only owner of the [`TrackingSession`]. UI commands,
//! location fixes and timer ticks all reach it through channels, so there is
//! no shared mutable flag between the caller and the session.

use crate::config::{HealthSettings, Settings, TrackingConfig};
use crate::guard::HostPlatform;
use crate::health::FixWatchdog;
use crate::location::{LocationSource, SourcedFix};
use crate::session::{SessionSnapshot, SessionState, StartRequest, TrackingSession};
use crate::uplink::Uplink;
use std::future::pending;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Duration, Instant, MissedTickBehavior};

#[derive(Debug)]
pub enum Command {
    Start(StartRequest),
    Stop,
    Snapshot(oneshot::Sender<SessionSnapshot>),
    /// Tear down and end the worker (process teardown)
    Shutdown,
}

/// Cloneable command handle given to the UI layer
#[derive(Clone, Debug)]
pub struct ControlHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl ControlHandle {
    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            log::warn!("session worker is gone, command dropped");
        }
    }

    /// Always `true`; the real outcome only shows up in logs and telemetry
    pub fn start(&self, config: TrackingConfig) -> bool {
        self.start_with(StartRequest::new(config))
    }

    pub fn start_with(&self, request: StartRequest) -> bool {
        self.send(Command::Start(request));
        true
    }

    /// Always `true`
    pub fn stop(&self) -> bool {
        self.send(Command::Stop);
        true
    }

    /// Current state and counters, or `None` once the worker has exited
    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx));
        rx.await.ok()
    }

    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }
}

pub struct SessionWorker {
    session: TrackingSession,
    commands: mpsc::UnboundedReceiver<Command>,
    fixes: mpsc::Receiver<SourcedFix>,
    watchdog: FixWatchdog,
    health: HealthSettings,
    renew_interval: Option<Duration>,
    renew_at: Option<Instant>,
}

impl SessionWorker {
    pub fn new(
        source: Arc<dyn LocationSource>,
        platform: Arc<dyn HostPlatform>,
        uplink: Arc<dyn Uplink>,
        settings: &Settings,
    ) -> (ControlHandle, SessionWorker) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (fix_tx, fix_rx) = mpsc::channel(settings.fix_queue_capacity.0.max(1));

        let session = TrackingSession::new(source, platform, uplink, settings, fix_tx);
        let worker = SessionWorker {
            session,
            commands: command_rx,
            fixes: fix_rx,
            watchdog: FixWatchdog::new(&settings.health),
            health: settings.health.clone(),
            renew_interval: settings.guard.renew_interval,
            renew_at: None,
        };

        (ControlHandle { tx: command_tx }, worker)
    }

    /// Process commands, fixes and timers until shutdown
    pub async fn run(mut self) {
        let mut health_tick = interval(self.health.check_interval.max(Duration::from_millis(1)));
        health_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!("session worker running");

        loop {
            let renew_at = self.renew_at;

            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        log::info!("all control handles dropped");
                        break;
                    };
                    if !self.handle(command) {
                        break;
                    }
                }
                Some(fix) = self.fixes.recv() => self.on_fix(fix),
                _ = health_tick.tick() => {
                    if self.session.state() == SessionState::Tracking {
                        if let Some(silence) = self.watchdog.check() {
                            log::warn!(
                                "No location fix for {:.1}s, provider may be stalled",
                                silence.as_secs_f64()
                            );
                        }
                    }
                }
                _ = async {
                    match renew_at {
                        Some(at) => sleep_until(at).await,
                        None => pending::<()>().await,
                    }
                } => {
                    self.session.renew_guard();
                    self.renew_at = None;
                    self.sync_timers(true);
                }
            }
        }

        self.session.stop();
        log::info!("session worker stopped");
    }

    fn on_fix(&mut self, fix: SourcedFix) {
        // Only fixes from the live subscription count as signs of life
        if self.session.on_fix(fix) {
            self.watchdog.record_fix();
        }
    }

    /// Returns `false` when the worker should exit
    fn handle(&mut self, command: Command) -> bool {
        let was_tracking = self.session.state() == SessionState::Tracking;

        match command {
            Command::Start(request) => self.session.start(request),
            Command::Stop => {
                self.session.stop();
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.session.snapshot());
            }
            Command::Shutdown => return false,
        }

        self.sync_timers(was_tracking);
        true
    }

    fn sync_timers(&mut self, was_tracking: bool) {
        if self.session.state() != SessionState::Tracking {
            self.renew_at = None;
            return;
        }
        if !was_tracking {
            self.watchdog.reset();
        }
        if self.renew_at.is_none() {
            self.renew_at = self.renew_interval.map(|every| Instant::now() + every);
        }
    }
}

/// Build a worker and run it on the current tokio runtime
pub fn spawn_session(
    source: Arc<dyn LocationSource>,
    platform: Arc<dyn HostPlatform>,
    uplink: Arc<dyn Uplink>,
    settings: &Settings,
) -> (ControlHandle, JoinHandle<()>) {
    let (handle, worker) = SessionWorker::new(source, platform, uplink, settings);
    (handle, tokio::spawn(worker.run()))
}
