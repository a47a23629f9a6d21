use chrono::{Local, TimeZone, Utc};

/// Current Unix timestamp in seconds.
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before the epoch")
        .as_secs()
}

/// Converts a Unix timestamp into a human-readable local-time string, for log and
/// CLI display. Returns `"Invalid timestamp"` rather than panicking on out-of-range input.
pub fn format_unix_timestamp(timestamp: u64) -> String {
    match Utc.timestamp_opt(timestamp as i64, 0).single() {
        Some(dt_utc) => dt_utc.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "Invalid timestamp".to_string(),
    }
}
