//! Cursor algebra for reconnect scheduling.
//!
//! Time is divided into fixed intervals since a shared epoch; a cursor is the
//! current interval number. Clients treat cursors as a liveness hint. When a
//! client presents a cursor at or ahead of the server's interval (clock skew),
//! the response cursor advances by a random jitter so a fleet of such clients
//! does not reconnect in lockstep.

use chrono::{DateTime, Utc};
use rand::Rng;

/// Options for cursor calculation.
#[derive(Debug, Clone)]
pub struct CursorOptions {
    /// Interval duration in seconds (default: 20).
    pub interval_seconds: u64,
    /// Epoch for interval calculation (default: Oct 9, 2024).
    pub epoch: DateTime<Utc>,
}

impl Default for CursorOptions {
    fn default() -> Self {
        Self {
            interval_seconds: 20,
            epoch: DateTime::parse_from_rfc3339("2024-10-09T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }
}

/// The current interval number: `floor((now - epoch) / interval)`.
pub fn calculate_cursor(options: &CursorOptions) -> u64 {
    let elapsed = Utc::now()
        .signed_duration_since(options.epoch)
        .num_seconds()
        .max(0) as u64;
    elapsed / options.interval_seconds.max(1)
}

/// Compute the cursor to hand back for a request.
///
/// No client cursor, or one behind the current interval, yields the current
/// interval. A client cursor at or ahead of it yields `client + jitter` where
/// jitter is 1..=3600 seconds worth of intervals, at least one interval.
pub fn generate_response_cursor(client_cursor: Option<u64>, options: &CursorOptions) -> u64 {
    let current_interval = calculate_cursor(options);
    match client_cursor {
        Some(cursor) if cursor >= current_interval => {
            let jitter_seconds: u64 = rand::thread_rng().gen_range(1..=3600);
            let interval = options.interval_seconds.max(1);
            let jitter_intervals = jitter_seconds.div_ceil(interval);
            cursor + jitter_intervals.max(1)
        }
        _ => current_interval,
    }
}

/// Parse a decimal cursor string.
pub fn parse_cursor(cursor: &str) -> Option<u64> {
    cursor.parse().ok()
}

/// Format a cursor value for the wire.
pub fn format_cursor(cursor: u64) -> String {
    cursor.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_counts_intervals_since_epoch() {
        let options = CursorOptions {
            interval_seconds: 20,
            epoch: Utc::now() - chrono::Duration::seconds(100),
        };
        let cursor = calculate_cursor(&options);
        assert!((4..=6).contains(&cursor));
    }

    #[test]
    fn no_client_cursor_yields_current() {
        let options = CursorOptions::default();
        let cursor = generate_response_cursor(None, &options);
        assert_eq!(cursor, calculate_cursor(&options));
    }

    #[test]
    fn client_behind_gets_current() {
        let options = CursorOptions {
            interval_seconds: 20,
            epoch: Utc::now() - chrono::Duration::seconds(1000),
        };
        let current = calculate_cursor(&options);
        let result = generate_response_cursor(Some(current - 10), &options);
        assert_eq!(result, current);
    }

    #[test]
    fn client_ahead_gets_jittered() {
        let options = CursorOptions::default();
        let client_cursor = calculate_cursor(&options) + 100;
        let result = generate_response_cursor(Some(client_cursor), &options);
        assert!(result > client_cursor);
        // Jitter is bounded by an hour's worth of intervals.
        assert!(result <= client_cursor + 3600 / options.interval_seconds + 1);
    }

    #[test]
    fn client_equal_still_advances() {
        let options = CursorOptions::default();
        let current = calculate_cursor(&options);
        assert!(generate_response_cursor(Some(current), &options) > current);
    }

    #[test]
    fn parse_and_format() {
        assert_eq!(parse_cursor("12345"), Some(12345));
        assert_eq!(parse_cursor("not-a-cursor"), None);
        assert_eq!(format_cursor(12345), "12345");
    }
}
