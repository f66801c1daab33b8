//! Utility functions for identifiers and timestamps.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Timestamp type used on every persisted record.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Returns the current UTC time as an RFC 3339 string with microseconds.
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Generates a new run id.
///
/// UUID v7 ids sort by creation time, so run listings and state files order
/// naturally.
#[must_use]
pub fn generate_run_id() -> Uuid {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_run_id_is_v7() {
        let id = generate_run_id();
        assert_eq!(id.get_version_num(), 7);
    }

    #[test]
    fn test_run_ids_are_time_ordered() {
        let first = generate_run_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = generate_run_id();
        assert!(first < second);
    }

    #[test]
    fn test_iso_timestamp_format() {
        let ts = iso_timestamp();
        assert!(ts.contains('T'));
        assert!(ts.ends_with("+00:00"));
    }
}
