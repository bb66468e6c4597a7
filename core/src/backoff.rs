//! Delay arithmetic shared by job polling and credential retries.

use std::time::Duration;

/// Delay that follows `current` in a multiplicative backoff.
///
/// A multiplier `<= 1` (or NaN) disables growth and returns `current`
/// unchanged. Otherwise the delay is multiplied, rounded down to whole
/// milliseconds and, when `cap` is set, clamped to it.
pub fn next_delay(current: Duration, multiplier: f64, cap: Option<Duration>) -> Duration {
    if !(multiplier > 1.0) {
        return current;
    }
    let scaled = (current.as_millis() as f64 * multiplier).floor();
    // Saturate instead of overflowing for absurd uncapped sequences.
    let next = if scaled >= u64::MAX as f64 {
        Duration::from_millis(u64::MAX)
    } else {
        Duration::from_millis(scaled as u64)
    };
    match cap {
        Some(cap) => next.min(cap),
        None => next,
    }
}

/// Infinite sequence of poll delays: starts at `initial` and grows by
/// `multiplier`, never exceeding `cap` while backoff is enabled.
#[derive(Debug, Clone)]
pub struct PollDelays {
    current: Duration,
    multiplier: f64,
    cap: Duration,
}

impl PollDelays {
    pub fn new(initial: Duration, multiplier: f64, cap: Duration) -> Self {
        let current = if multiplier > 1.0 { initial.min(cap) } else { initial };
        Self { current, multiplier, cap }
    }
}

impl Iterator for PollDelays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.current;
        self.current = next_delay(delay, self.multiplier, Some(self.cap));
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn default_poll_sequence_grows_then_caps() {
        let delays: Vec<_> = PollDelays::new(ms(1000), 1.5, ms(10_000)).take(8).collect();
        assert_eq!(
            delays,
            vec![ms(1000), ms(1500), ms(2250), ms(3375), ms(5062), ms(7593), ms(10_000), ms(10_000)]
        );
    }

    #[test]
    fn sequences_are_monotonic_and_bounded() {
        let intervals = [1, 7, 250, 1000, 9_999];
        let multipliers = [1.01, 1.5, 2.0, 2.5, 10.0];
        let caps = [1, 500, 10_000, 60_000];
        for &interval in &intervals {
            for &multiplier in &multipliers {
                for &cap in &caps {
                    let delays: Vec<_> = PollDelays::new(ms(interval), multiplier, ms(cap)).take(50).collect();
                    for pair in delays.windows(2) {
                        assert!(pair[0] <= pair[1], "{interval}/{multiplier}/{cap}: {delays:?}");
                    }
                    assert!(delays.iter().all(|d| *d <= ms(cap)), "{interval}/{multiplier}/{cap}: {delays:?}");
                }
            }
        }
    }

    #[test]
    fn multiplier_at_or_below_one_keeps_interval() {
        for multiplier in [1.0, 0.5, 0.0, -3.0, f64::NAN] {
            let delays: Vec<_> = PollDelays::new(ms(1200), multiplier, ms(500)).take(10).collect();
            assert!(delays.iter().all(|d| *d == ms(1200)), "{multiplier}: {delays:?}");
        }
    }

    #[test]
    fn uncapped_growth_matches_credential_backoff() {
        let mut delay = ms(100);
        let mut seen = vec![delay];
        for _ in 0..3 {
            delay = next_delay(delay, 2.5, None);
            seen.push(delay);
        }
        assert_eq!(seen, vec![ms(100), ms(250), ms(625), ms(1562)]);
    }

    #[test]
    fn huge_delays_saturate() {
        let d = next_delay(Duration::from_millis(u64::MAX / 2), 10.0, None);
        assert_eq!(d, Duration::from_millis(u64::MAX));
    }
}
