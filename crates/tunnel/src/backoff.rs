/*!
 * Reconnect Backoff
 */

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter
///
/// Formula: min(base * 2^attempt, max) with ±20% randomness to keep a fleet
/// of reconnecting clients from stampeding the control port.
pub fn calculate_backoff(attempt: u32, base_delay_secs: u64, max_delay_secs: u64) -> Duration {
    let exponential_delay = base_delay_secs.saturating_mul(2u64.saturating_pow(attempt));
    let capped_delay = exponential_delay.min(max_delay_secs);

    let mut rng = rand::thread_rng();
    let jitter_factor = rng.gen_range(0.8..1.2);
    let delay_with_jitter = (capped_delay as f64 * jitter_factor) as u64;

    Duration::from_secs(delay_with_jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let d0 = calculate_backoff(0, 2, 60);
        assert!(d0.as_secs() >= 1 && d0.as_secs() <= 3);

        let d2 = calculate_backoff(2, 2, 60);
        assert!(d2.as_secs() >= 6 && d2.as_secs() <= 10);

        let d_high = calculate_backoff(20, 2, 60);
        assert!(d_high.as_secs() >= 48 && d_high.as_secs() <= 72);
    }

    #[test]
    fn test_backoff_never_overflows() {
        let d = calculate_backoff(u32::MAX, u64::MAX, 60);
        assert!(d.as_secs() <= 72);
    }
}
