use std::time::{Duration, Instant};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Passed to timer callbacks.
#[derive(Debug, Clone, Copy)]
pub struct TimerInfo {
    /// Deadline this call was scheduled for.
    pub expected_call_time: Instant,
    pub actual_call_time: Instant,
    pub since_last_call: Duration,
}

/// Fixed-period event source on the monotonic clock.
#[derive(Debug)]
pub struct Timer {
    period: Duration,
    last_call_time: Instant,
    next_call_time: Instant,
}

impl Timer {
    /// First deadline is one period from now.
    pub fn new(period: Duration) -> Self {
        Self::starting_at(period, Instant::now())
    }

    pub fn starting_at(period: Duration, now: Instant) -> Self {
        Self {
            period,
            last_call_time: now,
            next_call_time: now + period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        self.next_call_time <= now
    }

    pub fn time_until_next_call(&self, now: Instant) -> Duration {
        self.next_call_time.saturating_duration_since(now)
    }

    /// Consume the current deadline and schedule the next one.
    pub fn call(&mut self, now: Instant) -> TimerInfo {
        let info = TimerInfo {
            expected_call_time: self.next_call_time,
            actual_call_time: now,
            since_last_call: now.saturating_duration_since(self.last_call_time),
        };
        self.update(now);
        info
    }

    fn update(&mut self, now: Instant) {
        self.last_call_time = now;
        if self.period.is_zero() {
            self.next_call_time = now;
            return;
        }
        self.next_call_time += self.period;
        // Fell behind: skip the missed periods rather than firing a burst.
        // The next deadline stays on the original period grid.
        if let Some(ahead) = now.checked_duration_since(self.next_call_time) {
            let rem = ahead.as_nanos() % self.period.as_nanos();
            // rem < period, so both parts fit
            let rem = Duration::new((rem / NANOS_PER_SEC) as u64, (rem % NANOS_PER_SEC) as u32);
            self.next_call_time = now + (self.period - rem);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Duration = Duration::from_millis(2000);

    #[test]
    fn test_first_deadline_is_one_period_out() {
        let t0 = Instant::now();
        let timer = Timer::starting_at(PERIOD, t0);
        assert!(!timer.is_ready(t0));
        assert_eq!(timer.time_until_next_call(t0), PERIOD);
        assert!(!timer.is_ready(t0 + Duration::from_millis(1999)));
        assert!(timer.is_ready(t0 + PERIOD));
    }

    #[test]
    fn test_three_ticks() {
        let t0 = Instant::now();
        let mut timer = Timer::starting_at(PERIOD, t0);
        let mut fired = 0;
        // 10 ms idle steps over 6 s
        let mut now = t0;
        while now <= t0 + PERIOD * 3 {
            if timer.is_ready(now) {
                let info = timer.call(now);
                assert!(info.actual_call_time >= info.expected_call_time);
                fired += 1;
            }
            now += Duration::from_millis(10);
        }
        assert_eq!(fired, 3);
    }

    #[test]
    fn test_late_call_skips_missed_periods() {
        let t0 = Instant::now();
        let mut timer = Timer::starting_at(PERIOD, t0);
        let late = t0 + PERIOD * 3 + Duration::from_millis(500);
        let info = timer.call(late);
        assert_eq!(info.expected_call_time, t0 + PERIOD);
        assert_eq!(info.since_last_call, late - t0);
        assert!(!timer.is_ready(late));
        assert_eq!(timer.time_until_next_call(late), Duration::from_millis(1500));
    }

    #[test]
    fn test_far_behind_short_period_reanchors() {
        let t0 = Instant::now();
        let period = Duration::from_nanos(1);
        let mut timer = Timer::starting_at(period, t0);
        // Ten billion missed periods, more than a u32 can count
        let late = t0 + Duration::from_secs(10);
        timer.call(late);
        assert!(!timer.is_ready(late));
        assert_eq!(timer.time_until_next_call(late), period);
        assert!(timer.is_ready(late + period));
    }

    #[test]
    fn test_exactly_on_a_missed_deadline() {
        let t0 = Instant::now();
        let mut timer = Timer::starting_at(PERIOD, t0);
        let now = t0 + PERIOD * 3;
        let info = timer.call(now);
        assert_eq!(info.expected_call_time, t0 + PERIOD);
        assert_eq!(timer.time_until_next_call(now), PERIOD);
    }

    #[test]
    fn test_zero_period_is_always_ready() {
        let t0 = Instant::now();
        let mut timer = Timer::starting_at(Duration::ZERO, t0);
        assert!(timer.is_ready(t0));
        timer.call(t0);
        assert!(timer.is_ready(t0));
    }
}
