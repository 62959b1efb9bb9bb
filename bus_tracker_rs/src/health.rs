use crate::config::HealthSettings;
use std::time::{Duration, Instant};

/// Tracks how long the location source has been quiet during a session
#[derive(Clone, Debug)]
pub struct FixWatchdog {
    silence_threshold: Duration,
    last_fix: Instant,
    warned: bool,
}

impl FixWatchdog {
    pub fn new(settings: &HealthSettings) -> Self {
        FixWatchdog {
            silence_threshold: settings.silence_threshold,
            last_fix: Instant::now(),
            warned: false,
        }
    }

    /// Restart the silence clock (session start or a fresh fix)
    pub fn reset(&mut self) {
        self.last_fix = Instant::now();
        self.warned = false;
    }

    pub fn record_fix(&mut self) {
        self.reset();
    }

    pub fn time_since_last_fix(&self) -> Duration {
        self.last_fix.elapsed()
    }

    pub fn is_silent(&self) -> bool {
        self.time_since_last_fix() > self.silence_threshold
    }

    /// Returns the silence duration the first time the threshold is crossed;
    /// stays quiet until the next fix arrives
    pub fn check(&mut self) -> Option<Duration> {
        if self.warned || !self.is_silent() {
            return None;
        }
        self.warned = true;
        Some(self.time_since_last_fix())
    }
}
