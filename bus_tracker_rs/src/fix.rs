use serde::{Deserialize, Serialize};

/// One position sample from the location provider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub speed_mps: f64,
    pub captured_at_ms: i64,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64, speed_mps: f64, captured_at_ms: i64) -> Self {
        Self {
            latitude,
            longitude,
            speed_mps,
            captured_at_ms,
        }
    }

    /// Fix stamped with the current wall clock
    pub fn now(latitude: f64, longitude: f64, speed_mps: f64) -> Self {
        Self::new(
            latitude,
            longitude,
            speed_mps,
            chrono::Utc::now().timestamp_millis(),
        )
    }

    pub fn speed_kmh(&self) -> f64 {
        self.speed_mps * 3.6
    }
}

/// Wire body of an update-location POST.
///
/// Field order is part of the protocol: `latitude, longitude, speed, timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    latitude: f64,
    longitude: f64,
    speed: f64,
    timestamp: i64,
}

impl TelemetryRecord {
    /// Only the tracking session builds records, and only outside `Idle`
    pub(crate) fn from_fix(fix: &LocationFix) -> Self {
        TelemetryRecord {
            latitude: fix.latitude,
            longitude: fix.longitude,
            speed: fix.speed_mps,
            timestamp: fix.captured_at_ms,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
