//! Billing retry policy.
//!
//! Failed charges are retried on a fixed backoff of 1, 3, then 7 days after
//! the previous attempt, capped at three retries. A failure that exhausts
//! the table stops retrying and must be resolved manually.

pub const RETRY_BACKOFF_DAYS: [i64; 3] = [1, 3, 7];
pub const MAX_RETRY_ATTEMPTS: i64 = RETRY_BACKOFF_DAYS.len() as i64;

const DAY_SECS: i64 = 24 * 60 * 60;

/// Seconds until the next charge for a schedule frequency.
pub fn frequency_interval_secs(frequency: &str) -> Option<i64> {
    match frequency {
        "monthly" => Some(30 * DAY_SECS),
        "quarterly" => Some(90 * DAY_SECS),
        "annual" => Some(365 * DAY_SECS),
        _ => None,
    }
}

/// The retry timestamp for a failure that has already been attempted
/// `completed_attempts` times, or None once the cap is reached.
pub fn next_retry_at(completed_attempts: i64, now: i64) -> Option<i64> {
    if completed_attempts < 0 || completed_attempts >= MAX_RETRY_ATTEMPTS {
        return None;
    }
    Some(now + RETRY_BACKOFF_DAYS[completed_attempts as usize] * DAY_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_table() {
        let now = 1_700_000_000;
        assert_eq!(next_retry_at(0, now), Some(now + DAY_SECS));
        assert_eq!(next_retry_at(1, now), Some(now + 3 * DAY_SECS));
        assert_eq!(next_retry_at(2, now), Some(now + 7 * DAY_SECS));
    }

    #[test]
    fn test_attempt_cap() {
        assert_eq!(next_retry_at(3, 0), None);
        assert_eq!(next_retry_at(17, 0), None);
        assert_eq!(next_retry_at(-1, 0), None);
    }

    #[test]
    fn test_frequency_intervals() {
        assert_eq!(frequency_interval_secs("monthly"), Some(30 * DAY_SECS));
        assert_eq!(frequency_interval_secs("quarterly"), Some(90 * DAY_SECS));
        assert_eq!(frequency_interval_secs("annual"), Some(365 * DAY_SECS));
        assert_eq!(frequency_interval_secs("weekly"), None);
    }
}
