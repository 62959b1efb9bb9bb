use crate::error::{BridgeResult, JniBridgeError};
use bus_tracker_rs::LocationFix;

/// Zip the parallel arrays of a fused-provider batch into fixes.
///
/// Kotlin hands over `LocationResult.locations` column by column; every
/// column must have the same length.
pub fn zip_batch(
    latitudes: &[f64],
    longitudes: &[f64],
    speeds: &[f32],
    times_ms: &[i64],
) -> BridgeResult<Vec<LocationFix>> {
    let n = latitudes.len();
    if longitudes.len() != n || speeds.len() != n || times_ms.len() != n {
        return Err(JniBridgeError::InvalidBatch(format!(
            "column lengths differ: lat={}, lon={}, speed={}, time={}",
            n,
            longitudes.len(),
            speeds.len(),
            times_ms.len()
        )));
    }

    Ok((0..n)
        .map(|i| LocationFix::new(latitudes[i], longitudes[i], speeds[i] as f64, times_ms[i]))
        .collect())
}

/// Counters exposed to Kotlin as a `long[]`:
/// `[dispatched, delivered, rejected, transport_errors, skipped]`
pub fn uplink_counts(stats: &bus_tracker_rs::session::StatsSnapshot) -> [i64; 5] {
    [
        stats.dispatched as i64,
        stats.delivered as i64,
        stats.rejected as i64,
        stats.transport_errors as i64,
        stats.skipped as i64,
    ]
}
