//! Throughput calculation shared by the sender and receiver data-plane
//! loops.
//!
//! Both loops measure wall-clock `start_time`/`end_time` rather than
//! `Instant` deltas, since a `TestResult` reports absolute timestamps
//! that the results sink persists alongside the rate — the duration
//! used for the rate itself is simply the difference between them.

use chrono::{DateTime, Utc};

/// Megabits per second for `messages` payloads of `size_bytes` sent or
/// received between `start` and `end`. Mirrors the rate formula from
/// the component design: `messages * size * 8 / (elapsed_seconds * 1_000_000)`.
///
/// Returns `0.0` when `start == end` (a `count=1` test has no
/// meaningful duration) rather than dividing by zero.
pub fn throughput_mbps(
    messages: usize,
    size_bytes: usize,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> f64 {
    let elapsed_seconds = (end - start).num_nanoseconds().unwrap_or(0) as f64 / 1_000_000_000.0;
    if elapsed_seconds <= 0.0 {
        return 0.0;
    }
    let total_bits = (messages as f64) * (size_bytes as f64) * 8.0;
    total_bits / (elapsed_seconds * 1_000_000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn zero_elapsed_time_yields_zero_throughput() {
        let now = Utc::now();
        assert_eq!(throughput_mbps(1, 64, now, now), 0.0);
    }

    #[test]
    fn one_second_of_ten_megabit_payload_is_ten_mbps() {
        let start = Utc::now();
        let end = start + Duration::seconds(1);
        // 10 messages * 125_000 bytes * 8 bits = 10_000_000 bits over 1s = 10 Mbps.
        let mbps = throughput_mbps(10, 125_000, start, end);
        assert!((mbps - 10.0).abs() < 1e-9);
    }
}
