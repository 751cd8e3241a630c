//! Exponential backoff between `/history` polls.
//!
//! The executor starts at [`PollConfig::initial_interval`] and grows the
//! wait by [`PollConfig::multiplier`] after every poll that finds the
//! prompt still running, until [`PollConfig::max_interval`] is reached.
//! There is no jitter; the sequence is fully deterministic.

use std::time::Duration;

/// Tunable parameters for the poll backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    /// Wait after the first empty poll.
    pub initial_interval: Duration,
    /// Upper bound on the wait between polls.
    pub max_interval: Duration,
    /// Factor by which the wait grows after each empty poll.
    pub multiplier: f64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
            multiplier: 1.5,
        }
    }
}

/// Calculate the next poll interval from the current one.
///
/// Computed at nanosecond precision and clamped to
/// [`PollConfig::max_interval`].
pub fn next_interval(current: Duration, config: &PollConfig) -> Duration {
    let next_ns = (current.as_nanos() as f64 * config.multiplier).round() as u64;
    Duration::from_nanos(next_ns).min(config.max_interval)
}

/// The first `count` waits of the backoff sequence.
pub fn schedule(config: &PollConfig, count: usize) -> Vec<Duration> {
    std::iter::successors(Some(config.initial_interval), |d| {
        Some(next_interval(*d, config))
    })
    .take(count)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_interval_grows_by_half() {
        let config = PollConfig::default();
        let d = next_interval(Duration::from_millis(100), &config);
        assert_eq!(d, Duration::from_millis(150));
    }

    #[test]
    fn next_interval_clamps_at_max() {
        let config = PollConfig::default();
        let d = next_interval(Duration::from_millis(1900), &config);
        assert_eq!(d, Duration::from_secs(2));
    }

    #[test]
    fn next_interval_already_at_max() {
        let config = PollConfig::default();
        let d = next_interval(Duration::from_secs(2), &config);
        assert_eq!(d, Duration::from_secs(2));
    }

    #[test]
    fn custom_multiplier() {
        let config = PollConfig {
            multiplier: 2.0,
            max_interval: Duration::from_secs(10),
            ..Default::default()
        };
        let d = next_interval(Duration::from_millis(300), &config);
        assert_eq!(d, Duration::from_millis(600));
    }

    #[test]
    fn full_backoff_sequence() {
        let expected_us = [
            100_000, 150_000, 225_000, 337_500, 506_250, 759_375, 1_139_062, 1_708_593,
            2_000_000, 2_000_000,
        ];
        let actual: Vec<u128> = schedule(&PollConfig::default(), expected_us.len())
            .into_iter()
            .map(|d| d.as_micros())
            .collect();
        assert_eq!(actual, expected_us);
    }

    #[test]
    fn sequence_matches_closed_form() {
        let config = PollConfig::default();
        for (k, d) in schedule(&config, 12).into_iter().enumerate() {
            let closed = (0.1 * 1.5_f64.powi(k as i32)).min(2.0);
            assert!(
                (d.as_secs_f64() - closed).abs() < 1e-9,
                "interval {k}: {d:?} vs {closed}"
            );
        }
    }
}
