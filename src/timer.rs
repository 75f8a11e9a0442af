//! Wall-clock timing for the evaluation span.

use std::fmt;
use std::time::{Duration, Instant};

/// Measures elapsed wall-clock time from its creation.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started: Instant,
}

impl Stopwatch {
    /// Start a new stopwatch.
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Time elapsed since the stopwatch was started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Elapsed time decomposed into hours, minutes and seconds.
    pub fn breakdown(&self) -> ElapsedBreakdown {
        ElapsedBreakdown::from_duration(self.elapsed())
    }
}

/// A duration truncated to whole seconds and split into h/m/s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElapsedBreakdown {
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
}

impl ElapsedBreakdown {
    pub fn from_duration(duration: Duration) -> Self {
        Self::from_secs(duration.as_secs())
    }

    pub fn from_secs(total: u64) -> Self {
        Self {
            hours: total / 3600,
            minutes: (total % 3600) / 60,
            seconds: total % 60,
        }
    }

    /// Whole seconds represented by this breakdown.
    pub fn total_seconds(&self) -> u64 {
        self.hours * 3600 + self.minutes * 60 + self.seconds
    }
}

impl fmt::Display for ElapsedBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} hours, {} minutes, and {} seconds",
            self.hours, self.minutes, self.seconds
        )
    }
}

/// Print the final elapsed-time summary line.
pub fn report_elapsed(stopwatch: &Stopwatch) {
    println!("Model evaluation took: {}.", stopwatch.breakdown());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_duration() {
        let b = ElapsedBreakdown::from_duration(Duration::ZERO);
        assert_eq!(b, ElapsedBreakdown { hours: 0, minutes: 0, seconds: 0 });
        assert_eq!(b.to_string(), "0 hours, 0 minutes, and 0 seconds");
    }

    #[test]
    fn test_fractional_seconds_are_truncated() {
        let b = ElapsedBreakdown::from_duration(Duration::from_millis(7325_999));
        assert_eq!(b.hours, 2);
        assert_eq!(b.minutes, 2);
        assert_eq!(b.seconds, 5);
    }

    #[test]
    fn test_decomposition_is_lossless() {
        for total in [0u64, 1, 59, 60, 61, 3599, 3600, 3661, 86_399, 90_061, 1_000_000] {
            let b = ElapsedBreakdown::from_secs(total);
            assert_eq!(b.total_seconds(), total);
            assert!(b.minutes < 60);
            assert!(b.seconds < 60);
        }
    }

    #[test]
    fn test_display_format() {
        let b = ElapsedBreakdown::from_secs(3661);
        assert_eq!(b.to_string(), "1 hours, 1 minutes, and 1 seconds");
    }

    #[test]
    fn test_stopwatch_elapsed_is_monotonic() {
        let sw = Stopwatch::start();
        let first = sw.elapsed();
        let second = sw.elapsed();
        assert!(second >= first);
    }
}
