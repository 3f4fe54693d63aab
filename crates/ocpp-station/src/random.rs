//! Random draw helpers for the transaction generator
//!
//! Delay and duration draws use the thread-local generator; the start
//! decision itself is drawn from the operating system's entropy source so
//! fleet-wide start patterns cannot collapse onto a shared seed.

use std::time::Duration;

use rand::rngs::OsRng;
use rand::Rng;

/// Uniform draw in `[0, 1)` from the OS entropy source
pub fn secure_random() -> f64 {
    OsRng.gen::<f64>()
}

/// Uniform duration between `min_seconds` and `max_seconds`
///
/// Equal (or inverted) bounds yield the lower bound, clamped at zero.
pub fn uniform_seconds(min_seconds: f64, max_seconds: f64) -> Duration {
    let min = min_seconds.max(0.0);
    let max = max_seconds.max(0.0);
    if max <= min {
        return Duration::from_secs_f64(min);
    }
    Duration::from_secs_f64(rand::thread_rng().gen_range(min..max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_random_is_in_unit_interval() {
        for _ in 0..100 {
            let r = secure_random();
            assert!((0.0..1.0).contains(&r));
        }
    }

    #[test]
    fn uniform_seconds_respects_bounds() {
        for _ in 0..100 {
            let d = uniform_seconds(1.0, 2.0);
            assert!(d >= Duration::from_secs(1));
            assert!(d < Duration::from_secs(2));
        }
    }

    #[test]
    fn equal_bounds_are_deterministic() {
        assert_eq!(uniform_seconds(3.0, 3.0), Duration::from_secs(3));
    }

    #[test]
    fn negative_bounds_clamp_to_zero() {
        assert_eq!(uniform_seconds(-5.0, -1.0), Duration::ZERO);
    }
}
