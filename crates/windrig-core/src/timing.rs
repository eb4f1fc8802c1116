//! Local performance timer.
//!
//! The [`LocalTimer`] measures how long the current performance has been
//! running on this machine and compares it with the theoretical duration of
//! the execution sequence. It is diagnostic only: whether the rig is playing is
//! decided by the status feed, never by the timer.
//!
//! All methods take the current [`Instant`] explicitly so the timer can be
//! driven deterministically in tests.

use std::time::{Duration, Instant};

/// Default tick period while the timer runs.
pub const DEFAULT_TICK: Duration = Duration::from_millis(10);

/// Difference between measured and theoretical duration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Drift {
    /// Measured minus theoretical, in seconds. Positive means running late.
    pub seconds: f64,
    /// `seconds` relative to the theoretical duration, in percent.
    pub percent: f64,
}

impl Drift {
    fn compute(elapsed_sec: f64, theoretical_sec: f64) -> Option<Self> {
        if theoretical_sec <= 0.0 {
            return None;
        }
        let seconds = elapsed_sec - theoretical_sec;
        Some(Self {
            seconds,
            percent: seconds / theoretical_sec * 100.0,
        })
    }
}

/// What the timer currently displays.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimerReading {
    pub elapsed: Duration,
    pub drift: Option<Drift>,
}

impl TimerReading {
    /// Elapsed time as `MM:SS.mmm`.
    pub fn elapsed_display(&self) -> String {
        format_elapsed(self.elapsed)
    }

    /// Drift as `+0.123s (1.00%)`, or `-` when unknown.
    pub fn drift_display(&self) -> String {
        match self.drift {
            Some(d) => format!(
                "{}{:.3}s ({:.2}%)",
                if d.seconds >= 0.0 { "+" } else { "" },
                d.seconds,
                d.percent
            ),
            None => "-".to_string(),
        }
    }
}

/// Format a duration as `MM:SS.mmm`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total_ms = elapsed.as_millis();
    let minutes = total_ms / 60_000;
    let secs = (total_ms / 1000) % 60;
    let ms = total_ms % 1000;
    format!("{:02}:{:02}.{:03}", minutes, secs, ms)
}

/// Free-running elapsed-time clock with drift reporting.
#[derive(Clone, Debug, Default)]
pub struct LocalTimer {
    running: bool,
    anchor: Option<Instant>,
    paused_accumulated: Duration,
    theoretical_sec: f64,
    reading: TimerReading,
}

impl LocalTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the duration drift is measured against. Zero disables drift.
    pub fn set_theoretical_duration(&mut self, seconds: f64) {
        self.theoretical_sec = seconds.max(0.0);
    }

    /// Start ticking. Time accumulated before a pause is carried over.
    pub fn start(&mut self, now: Instant) {
        let anchor = now.checked_sub(self.paused_accumulated).unwrap_or(now);
        self.anchor = Some(anchor);
        self.paused_accumulated = Duration::ZERO;
        self.running = true;
        self.tick(now);
    }

    /// Recompute the reading. Does nothing unless running.
    pub fn tick(&mut self, now: Instant) -> Option<TimerReading> {
        if !self.running {
            return None;
        }
        let anchor = self.anchor?;
        let elapsed = now.saturating_duration_since(anchor);
        self.reading = TimerReading {
            elapsed,
            drift: Drift::compute(elapsed.as_secs_f64(), self.theoretical_sec),
        };
        Some(self.reading)
    }

    /// Stop ticking and zero the display.
    pub fn stop_and_reset(&mut self) {
        self.running = false;
        self.anchor = None;
        self.paused_accumulated = Duration::ZERO;
        self.reading = TimerReading::default();
    }

    /// Stop ticking but keep the last reading visible.
    pub fn pause_keeping_display(&mut self) {
        if self.running {
            self.paused_accumulated = self.reading.elapsed;
        }
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The last computed reading.
    pub fn reading(&self) -> TimerReading {
        self.reading
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_and_drift() {
        let mut timer = LocalTimer::new();
        timer.set_theoretical_duration(10.0);
        let t0 = Instant::now();
        timer.start(t0);
        let reading = timer.tick(t0 + Duration::from_millis(10_500)).unwrap();
        assert_eq!(reading.elapsed, Duration::from_millis(10_500));
        let drift = reading.drift.unwrap();
        assert!((drift.seconds - 0.5).abs() < 1e-9);
        assert!((drift.percent - 5.0).abs() < 1e-9);
        assert_eq!(reading.drift_display(), "+0.500s (5.00%)");
    }

    #[test]
    fn test_no_drift_without_theoretical_duration() {
        let mut timer = LocalTimer::new();
        let t0 = Instant::now();
        timer.start(t0);
        let reading = timer.tick(t0 + Duration::from_secs(1)).unwrap();
        assert!(reading.drift.is_none());
        assert_eq!(reading.drift_display(), "-");
    }

    #[test]
    fn test_stop_and_reset_zeroes_display() {
        let mut timer = LocalTimer::new();
        timer.set_theoretical_duration(4.0);
        let t0 = Instant::now();
        timer.start(t0);
        timer.tick(t0 + Duration::from_secs(3));
        timer.stop_and_reset();
        assert!(!timer.is_running());
        assert_eq!(timer.reading().elapsed, Duration::ZERO);
        assert!(timer.reading().drift.is_none());
        assert!(timer.tick(t0 + Duration::from_secs(5)).is_none());
    }

    #[test]
    fn test_pause_keeps_display() {
        let mut timer = LocalTimer::new();
        timer.set_theoretical_duration(4.0);
        let t0 = Instant::now();
        timer.start(t0);
        timer.tick(t0 + Duration::from_millis(4_200));
        let before = timer.reading();
        timer.pause_keeping_display();
        assert_eq!(timer.reading(), before);
        // Later ticks do not move a paused timer.
        assert!(timer.tick(t0 + Duration::from_secs(9)).is_none());
        assert_eq!(timer.reading(), before);
    }

    #[test]
    fn test_restart_after_pause_resumes() {
        let mut timer = LocalTimer::new();
        let t0 = Instant::now();
        timer.start(t0);
        timer.tick(t0 + Duration::from_secs(2));
        timer.pause_keeping_display();
        let t1 = t0 + Duration::from_secs(10);
        timer.start(t1);
        let reading = timer.tick(t1 + Duration::from_secs(1)).unwrap();
        assert_eq!(reading.elapsed, Duration::from_secs(3));
    }

    #[test]
    fn test_elapsed_formatting() {
        assert_eq!(format_elapsed(Duration::from_millis(61_234)), "01:01.234");
        assert_eq!(format_elapsed(Duration::ZERO), "00:00.000");
    }
}
