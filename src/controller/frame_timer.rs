use std::time::{Duration, Instant};

/// Paces a fixed number of ticks per second.
///
/// The event loop sleeps until [`FrameTimer::next_deadline`] and calls
/// [`FrameTimer::tick`] once it has passed. A tick reports the real time
/// since the previous tick, so a late frame rotates further instead of
/// being replayed.
pub struct FrameTimer {
    period: Duration,
    last_tick: Instant,
    next_deadline: Instant,
    number_of_ticks: u64,
}

impl FrameTimer {
    pub fn new(ticks_per_second: f64, now: Instant) -> Self {
        let period = Duration::from_secs_f64(1.0 / ticks_per_second.max(1.0));
        Self {
            period,
            last_tick: now,
            next_deadline: now + period,
            number_of_ticks: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_deadline
    }

    /// Seconds since the previous tick
    pub fn tick(&mut self, now: Instant) -> f32 {
        let elapsed = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;
        self.number_of_ticks += 1;

        self.next_deadline += self.period;
        // fell more than a period behind: drop the missed ticks
        if self.next_deadline <= now {
            self.next_deadline = now + self.period;
        }

        elapsed.as_secs_f32()
    }

    pub fn number_of_ticks(&self) -> u64 {
        self.number_of_ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sixty_hz_period() {
        let timer = FrameTimer::new(60.0, Instant::now());
        let period = timer.period().as_secs_f64();
        assert!((period - 1.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_due_after_one_period() {
        let start = Instant::now();
        let timer = FrameTimer::new(60.0, start);

        assert!(!timer.is_due(start));
        assert!(timer.is_due(start + timer.period()));
    }

    #[test]
    fn test_tick_reports_real_elapsed() {
        let start = Instant::now();
        let mut timer = FrameTimer::new(60.0, start);

        let dt = timer.tick(start + Duration::from_millis(20));
        assert!((dt - 0.020).abs() < 1e-6);
        assert_eq!(timer.number_of_ticks(), 1);
    }

    #[test]
    fn test_deadlines_stay_on_grid() {
        let start = Instant::now();
        let mut timer = FrameTimer::new(50.0, start);

        // a slightly late tick does not push the next deadline back
        timer.tick(start + Duration::from_millis(22));
        assert_eq!(timer.next_deadline(), start + Duration::from_millis(40));
    }

    #[test]
    fn test_long_stall_skips_missed_ticks() {
        let start = Instant::now();
        let mut timer = FrameTimer::new(50.0, start);

        let late = start + Duration::from_secs(1);
        let dt = timer.tick(late);

        assert!((dt - 1.0).abs() < 1e-6);
        assert_eq!(timer.next_deadline(), late + Duration::from_millis(20));
        assert!(!timer.is_due(late));
    }
}
