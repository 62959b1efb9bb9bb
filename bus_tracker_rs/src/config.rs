use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Vehicle id the UI sends when no bus is selected
pub const NO_VEHICLE: i64 = -1;

/// Parameters supplied with a `start` command.
///
/// Every field may be absent: the UI forwards whatever it holds, and a session
/// with an incomplete config still runs but never dispatches (see
/// [`TrackingConfig::update_location_url`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingConfig {
    api_base_url: Option<String>,
    auth_token: Option<String>,
    vehicle_id: Option<i64>,
}

impl TrackingConfig {
    pub fn new(api_base_url: &str, auth_token: &str, vehicle_id: i64) -> Self {
        Self::from_parts(
            Some(api_base_url.to_string()),
            Some(auth_token.to_string()),
            vehicle_id,
        )
    }

    /// Build from raw UI values. Empty strings and negative ids count as absent.
    pub fn from_parts(
        api_base_url: Option<String>,
        auth_token: Option<String>,
        vehicle_id: i64,
    ) -> Self {
        let non_empty = |s: Option<String>| s.filter(|v| !v.trim().is_empty());

        TrackingConfig {
            api_base_url: non_empty(api_base_url),
            auth_token: non_empty(auth_token),
            vehicle_id: (vehicle_id >= 0).then_some(vehicle_id),
        }
    }

    pub fn api_base_url(&self) -> Option<&str> {
        self.api_base_url.as_deref()
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn vehicle_id(&self) -> Option<i64> {
        self.vehicle_id
    }

    /// `{api_base_url}/api/buses/{vehicle_id}/update-location/`, or `None` if
    /// the base URL or vehicle id is missing
    pub fn update_location_url(&self) -> Option<String> {
        let base = self.api_base_url.as_deref()?.trim_end_matches('/');
        let vehicle_id = self.vehicle_id?;
        Some(format!("{}/api/buses/{}/update-location/", base, vehicle_id))
    }
}

/// Provider priority requested from the location source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    HighAccuracy,
    Balanced,
    LowPower,
}

/// Location update request handed to a [`crate::location::LocationSource`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRequest {
    pub priority: Priority,
    pub interval: Duration,
    pub min_update_interval: Duration,
    pub max_update_delay: Duration,
    pub min_update_distance_m: f32,
    pub wait_for_accurate_location: bool,
}

impl Default for LocationRequest {
    fn default() -> Self {
        // ~1 fix/s, stationary fixes included, never hold back for a GPS lock
        LocationRequest {
            priority: Priority::HighAccuracy,
            interval: Duration::from_millis(1_000),
            min_update_interval: Duration::from_millis(1_000),
            max_update_delay: Duration::from_millis(500),
            min_update_distance_m: 0.0,
            wait_for_accurate_location: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UplinkSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Cap on concurrent POSTs; `None` leaves dispatch unbounded
    pub max_in_flight: Option<usize>,
    /// Response bodies are cut to this many characters before logging
    pub body_snippet_chars: usize,
}

impl Default for UplinkSettings {
    fn default() -> Self {
        UplinkSettings {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            max_in_flight: None,
            body_snippet_chars: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardSettings {
    pub channel_id: String,
    pub channel_name: String,
    pub notification_id: i32,
    pub notification_title: String,
    pub wake_hold_tag: String,
    pub wake_hold_ceiling: Duration,
    /// How often the wake hold is re-acquired while tracking; `None` disables renewal
    pub renew_interval: Option<Duration>,
}

impl GuardSettings {
    pub fn notification_text(&self, vehicle_id: Option<i64>) -> String {
        format!("Bus #{} tracking active", vehicle_id.unwrap_or(NO_VEHICLE))
    }
}

impl Default for GuardSettings {
    fn default() -> Self {
        GuardSettings {
            channel_id: "driver_foreground_channel".to_string(),
            channel_name: "Driver Tracking".to_string(),
            notification_id: 1001,
            notification_title: "Tracking".to_string(),
            wake_hold_tag: "DriverApp::LocationWakeLock".to_string(),
            wake_hold_ceiling: Duration::from_secs(10 * 60 * 60),
            renew_interval: Some(Duration::from_secs(9 * 60 * 60)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSettings {
    pub silence_threshold: Duration,
    pub check_interval: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        HealthSettings {
            silence_threshold: Duration::from_secs(30),
            check_interval: Duration::from_secs(2),
        }
    }
}

/// Everything the session worker needs besides its collaborators
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub location: LocationRequest,
    pub uplink: UplinkSettings,
    pub guard: GuardSettings,
    pub health: HealthSettings,
    pub fix_queue_capacity: FixQueueCapacity,
}

/// Bound on fixes waiting for the session worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixQueueCapacity(pub usize);

impl Default for FixQueueCapacity {
    fn default() -> Self {
        FixQueueCapacity(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_location_url() {
        let config = TrackingConfig::new("https://api.x", "tok123", 42);
        assert_eq!(
            config.update_location_url().as_deref(),
            Some("https://api.x/api/buses/42/update-location/")
        );
    }

    #[test]
    fn test_trailing_slash_is_not_doubled() {
        let config = TrackingConfig::new("https://api.x/", "tok123", 7);
        assert_eq!(
            config.update_location_url().as_deref(),
            Some("https://api.x/api/buses/7/update-location/")
        );
    }

    #[test]
    fn test_missing_parts_disable_url() {
        let no_base = TrackingConfig::from_parts(None, Some("t".to_string()), 3);
        assert!(no_base.update_location_url().is_none());

        let no_vehicle = TrackingConfig::new("https://api.x", "t", NO_VEHICLE);
        assert_eq!(no_vehicle.vehicle_id(), None);
        assert!(no_vehicle.update_location_url().is_none());

        let blank_token = TrackingConfig::new("https://api.x", "  ", 3);
        assert_eq!(blank_token.auth_token(), None);
    }

    #[test]
    fn test_defaults_match_tracking_policy() {
        let settings = Settings::default();
        assert_eq!(settings.location.interval, Duration::from_millis(1_000));
        assert_eq!(settings.location.max_update_delay, Duration::from_millis(500));
        assert_eq!(settings.location.min_update_distance_m, 0.0);
        assert!(!settings.location.wait_for_accurate_location);
        assert_eq!(settings.uplink.connect_timeout, Duration::from_secs(10));
        assert_eq!(settings.uplink.read_timeout, Duration::from_secs(10));
        assert_eq!(settings.guard.wake_hold_ceiling, Duration::from_secs(36_000));
        assert!(settings.guard.renew_interval.unwrap() < settings.guard.wake_hold_ceiling);
    }

    #[test]
    fn test_notification_text() {
        let guard = GuardSettings::default();
        assert_eq!(guard.notification_text(Some(42)), "Bus #42 tracking active");
        assert_eq!(guard.notification_text(None), "Bus #-1 tracking active");
    }
}
