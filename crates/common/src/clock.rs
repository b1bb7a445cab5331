//! Wall-clock helpers.
//!
//! Inference results carry integer epoch seconds so that the storage layer
//! can record them without further conversion.

/// Current Unix time in whole seconds.
pub fn unix_timestamp_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Render epoch seconds as an ISO 8601 UTC string (`2026-01-01T00:00:00Z`).
///
/// Returns `None` for timestamps chrono cannot represent.
pub fn epoch_secs_to_rfc3339(secs: i64) -> Option<String> {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
}
