// src/harness/measurement.rs

use log::debug;
use std::time::{Duration, Instant};

/// Frames measured before the first check against the minimum duration.
pub const INITIAL_FRAME_BUDGET: u64 = 100;

/// Time source for measurements.
pub trait Clock {
    /// Time since an arbitrary fixed origin.
    fn now(&mut self) -> Duration;
}

/// Wall clock backed by `Instant`.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&mut self) -> Duration {
        self.origin.elapsed()
    }
}

/// One adaptive measurement: render frames until the budget is spent, and
/// double the budget whenever it runs out before `min_duration` has passed.
#[derive(Debug, Clone)]
pub struct MeasurementRun {
    frames: u64,
    budget: u64,
    start: Duration,
    end: Duration,
    min_duration: Duration,
}

impl MeasurementRun {
    pub fn start(now: Duration, min_duration: Duration) -> Self {
        MeasurementRun {
            frames: 0,
            budget: INITIAL_FRAME_BUDGET,
            start: now,
            end: now,
            min_duration,
        }
    }

    pub fn wants_frame(&self) -> bool {
        self.frames < self.budget
    }

    /// Index passed to `render` for the next frame.
    pub fn frame_index(&self) -> u64 {
        self.frames
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }

    /// Records a presented frame that ended at `now`.
    pub fn complete_frame(&mut self, now: Duration) {
        self.end = now;
        self.frames += 1;
        if self.frames >= self.budget && self.elapsed() < self.min_duration {
            self.budget *= 2;
            debug!(
                "{} frames took {:?}, extending to {}",
                self.frames,
                self.elapsed(),
                self.budget
            );
        }
    }

    pub fn finish(self) -> Measurement {
        Measurement {
            frames: self.frames,
            elapsed: self.elapsed(),
        }
    }
}

/// Result of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    pub frames: u64,
    pub elapsed: Duration,
}

impl Measurement {
    /// Whole frames per second, truncated.
    pub fn fps(&self) -> u64 {
        let nanos = self.elapsed.as_nanos().max(1);
        (u128::from(self.frames) * 1_000_000_000 / nanos) as u64
    }
}

/// One `#` per three frames per second, rounded up.
pub fn bar(fps: u64) -> String {
    "#".repeat(fps.div_ceil(3) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn drive(step: Duration, min: Duration) -> MeasurementRun {
        let mut now = Duration::ZERO;
        let mut run = MeasurementRun::start(now, min);
        while run.wants_frame() {
            now += step;
            run.complete_frame(now);
        }
        run
    }

    #[test]
    fn test_budget_doubles_until_min_duration() {
        let run = drive(Duration::from_millis(1), Duration::from_secs(1));
        assert_eq!(run.frame_index(), 1600);
        assert!(run.elapsed() >= Duration::from_secs(1));
        assert_eq!(run.finish().fps(), 1000);
    }

    #[test]
    fn test_stops_only_after_min_duration() {
        for step_us in [1, 7, 333, 1_000, 12_345, 40_000] {
            let min = Duration::from_millis(250);
            let run = drive(Duration::from_micros(step_us), min);
            assert!(run.elapsed() >= min, "step {}us", step_us);
            let frames = run.frame_index();
            assert!(frames >= INITIAL_FRAME_BUDGET);
            assert!((frames / INITIAL_FRAME_BUDGET).is_power_of_two());
        }
    }

    #[test]
    fn test_zero_min_duration_runs_initial_budget() {
        let run = drive(Duration::from_millis(5), Duration::ZERO);
        assert_eq!(run.frame_index(), INITIAL_FRAME_BUDGET);
        assert_eq!(run.budget(), INITIAL_FRAME_BUDGET);
    }

    #[test]
    fn test_fps_is_truncated() {
        let m = Measurement {
            frames: 100,
            elapsed: Duration::from_millis(1_500),
        };
        assert_eq!(m.fps(), 66);
        let instant = Measurement {
            frames: 5,
            elapsed: Duration::ZERO,
        };
        assert_eq!(instant.fps(), 5_000_000_000);
    }

    #[test]
    fn test_bar_rounds_up() {
        assert_eq!(bar(0), "");
        assert_eq!(bar(1), "#");
        assert_eq!(bar(3), "#");
        assert_eq!(bar(4), "##");
        assert_eq!(bar(60).len(), 20);
    }
}
