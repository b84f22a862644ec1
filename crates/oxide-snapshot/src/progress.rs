//! Run progress tracking.

use std::time::{Duration, Instant};

use tracing::info;

/// Counts tables and rows as a run advances and logs each step.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    started: Option<Instant>,
    finished: Option<Duration>,
    total_tables: usize,
    completed_tables: usize,
    total_rows: u64,
    completed_rows: u64,
}

impl ProgressTracker {
    /// Creates an idle tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts (or restarts) timing and resets the counters.
    pub fn start(&mut self, total_tables: usize) {
        *self = Self {
            started: Some(Instant::now()),
            total_tables,
            ..Self::default()
        };
        info!(tables = total_tables, "Starting migration");
    }

    /// Stops timing.
    pub fn complete(&mut self) {
        self.finished = Some(self.duration());
        info!(duration = %self.formatted_duration(), "Migration finished");
    }

    /// Whether `start` was called and `complete` was not.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.started.is_some() && self.finished.is_none()
    }

    /// Adds rows expected in the data phase.
    pub fn add_expected_rows(&mut self, rows: u64) {
        self.total_rows += rows;
    }

    /// Records one finished table.
    pub fn table_completed(&mut self) {
        self.completed_tables += 1;
        self.log();
    }

    /// Records rows written.
    pub fn rows_completed(&mut self, rows: u64) {
        self.completed_rows += rows;
    }

    /// Tables finished so far.
    #[must_use]
    pub fn completed_tables(&self) -> usize {
        self.completed_tables
    }

    /// Rows written so far.
    #[must_use]
    pub fn completed_rows(&self) -> u64 {
        self.completed_rows
    }

    /// Elapsed time, frozen once complete.
    #[must_use]
    pub fn duration(&self) -> Duration {
        match (self.finished, self.started) {
            (Some(d), _) => d,
            (None, Some(start)) => start.elapsed(),
            (None, None) => Duration::ZERO,
        }
    }

    /// Table completion in percent.
    #[must_use]
    pub fn table_percentage(&self) -> f64 {
        percentage(self.completed_tables as u64, self.total_tables as u64)
    }

    /// Row completion in percent.
    #[must_use]
    pub fn row_percentage(&self) -> f64 {
        percentage(self.completed_rows, self.total_rows)
    }

    /// Elapsed time as `1h 2m 3s`, `2m 3s` or `3s`.
    #[must_use]
    pub fn formatted_duration(&self) -> String {
        format_duration(self.duration())
    }

    fn log(&self) {
        if self.total_tables == 0 {
            return;
        }
        info!(
            "Progress: {}/{} tables ({:.1}%), {}/{} rows ({:.1}%)",
            self.completed_tables,
            self.total_tables,
            self.table_percentage(),
            self.completed_rows,
            self.total_rows,
            self.row_percentage()
        );
    }
}

#[allow(clippy::cast_precision_loss)]
fn percentage(done: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        done as f64 / total as f64 * 100.0
    }
}

/// Formats a duration as `1h 2m 3s`, `2m 3s` or `3s`.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    let (hours, minutes) = (seconds / 3600, seconds / 60 % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m {}s", seconds % 60)
    } else if minutes > 0 {
        format!("{minutes}m {}s", seconds % 60)
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn test_counters() {
        let mut progress = ProgressTracker::new();
        assert!(!progress.is_running());
        progress.start(4);
        assert!(progress.is_running());
        progress.add_expected_rows(10);
        progress.rows_completed(5);
        progress.table_completed();
        assert_eq!(progress.completed_tables(), 1);
        assert!((progress.table_percentage() - 25.0).abs() < f64::EPSILON);
        assert!((progress.row_percentage() - 50.0).abs() < f64::EPSILON);
        progress.complete();
        assert!(!progress.is_running());
        assert_eq!(progress.duration(), progress.duration());
    }

    #[test]
    fn test_empty_percentages() {
        let progress = ProgressTracker::new();
        assert!(progress.table_percentage().abs() < f64::EPSILON);
        assert_eq!(progress.duration(), Duration::ZERO);
    }
}
