//! # Lap Timing
//!
//! A wall-clock lap timer and the trimmed statistics used for every reported
//! figure. Each lap isolates exactly one blocking operation; the summary drops
//! the fastest and slowest 20% of laps so first-launch warm-up and scheduler
//! jitter do not skew the mean.

use std::time::{Duration, Instant};

use serde::Serialize;

/// Below this many laps nothing is discarded.
pub const MIN_LAPS_FOR_TRIM: usize = 5;

/// One timing sample for one blocking operation.
#[derive(Debug, Clone, Copy)]
pub struct LapSample {
    /// Host wall-clock time from submission to completion.
    pub wall: Duration,
    /// Device execution time from event profiling, when the queue records it.
    pub device: Option<Duration>,
}

/// Records consecutive laps: `next_lap` closes the running lap and opens the next.
#[derive(Debug, Clone)]
pub struct LapTimer {
    lap_start: Instant,
    laps: Vec<Duration>,
}

impl Default for LapTimer {
    fn default() -> Self {
        Self::start()
    }
}

impl LapTimer {
    /// Starts the first lap now.
    pub fn start() -> Self {
        Self {
            lap_start: Instant::now(),
            laps: Vec::new(),
        }
    }

    /// Closes the current lap, records it, and starts the next one.
    pub fn next_lap(&mut self) -> Duration {
        let now = Instant::now();
        let lap = now.duration_since(self.lap_start);
        self.laps.push(lap);
        self.lap_start = now;
        lap
    }

    /// Records a lap measured elsewhere (e.g. from device profiling).
    pub fn record(&mut self, lap: Duration) {
        self.laps.push(lap);
    }

    pub fn laps(&self) -> &[Duration] {
        &self.laps
    }

    pub fn is_empty(&self) -> bool {
        self.laps.is_empty()
    }

    /// Filtered mean in seconds.
    pub fn lap_avg(&self) -> f64 {
        self.summary().mean_s
    }

    /// Filtered standard deviation in seconds.
    pub fn lap_std(&self) -> f64 {
        self.summary().std_s
    }

    pub fn summary(&self) -> LapSummary {
        LapSummary::from_laps(&self.laps)
    }
}

/// Mean and spread over the trimmed lap set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LapSummary {
    pub mean_s: f64,
    pub std_s: f64,
    /// Laps recorded in total.
    pub total: usize,
    /// Laps the mean and deviation were computed over.
    pub kept: usize,
}

impl LapSummary {
    pub fn from_laps(laps: &[Duration]) -> Self {
        let kept = filtered_laps(laps);
        if kept.is_empty() {
            return Self {
                mean_s: 0.0,
                std_s: 0.0,
                total: laps.len(),
                kept: 0,
            };
        }

        let count = kept.len() as f64;
        let mean = kept.iter().map(Duration::as_secs_f64).sum::<f64>() / count;
        let variance = kept
            .iter()
            .map(|lap| {
                let delta = lap.as_secs_f64() - mean;
                delta * delta
            })
            .sum::<f64>()
            / count;

        Self {
            mean_s: mean,
            std_s: variance.sqrt(),
            total: laps.len(),
            kept: kept.len(),
        }
    }
}

/// Laps sorted by duration with the lowest and highest 20% removed.
///
/// With fewer than [`MIN_LAPS_FOR_TRIM`] laps every lap is kept.
pub fn filtered_laps(laps: &[Duration]) -> Vec<Duration> {
    let mut sorted = laps.to_vec();
    sorted.sort_unstable();

    if sorted.len() < MIN_LAPS_FOR_TRIM {
        return sorted;
    }

    let trim = sorted.len() / 5;
    sorted[trim..sorted.len() - trim].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn millis(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|&ms| Duration::from_millis(ms)).collect()
    }

    #[test]
    fn test_ten_laps_drop_two_from_each_end() {
        // Outliers sit at both ends; only 3..=8 ms should survive.
        let laps = millis(&[9, 1, 5, 100, 3, 4, 7, 6, 8, 2]);
        let kept = filtered_laps(&laps);
        assert_eq!(kept, millis(&[3, 4, 5, 6, 7, 8]));

        let summary = LapSummary::from_laps(&laps);
        assert_eq!(summary.total, 10);
        assert_eq!(summary.kept, 6);
        assert!((summary.mean_s - 0.0055).abs() < 1e-12);
    }

    #[test]
    fn test_short_sequences_are_not_trimmed() {
        let laps = millis(&[4, 1, 2, 3]);
        assert_eq!(filtered_laps(&laps).len(), 4);
        let summary = LapSummary::from_laps(&laps);
        assert!((summary.mean_s - 0.0025).abs() < 1e-12);
    }

    #[test]
    fn test_stddev_is_population_form() {
        let laps = millis(&[2, 4, 4, 4, 5, 5, 7, 9, 50, 1]);
        // kept after trimming two each side: [4, 4, 4, 5, 5, 7]
        let summary = LapSummary::from_laps(&laps);
        let kept = [4.0f64, 4.0, 4.0, 5.0, 5.0, 7.0];
        let mean = kept.iter().sum::<f64>() / 6.0;
        let var = kept.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / 6.0;
        assert!((summary.mean_s - mean / 1000.0).abs() < 1e-12);
        assert!((summary.std_s - var.sqrt() / 1000.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_summary() {
        let summary = LapSummary::from_laps(&[]);
        assert_eq!(summary.kept, 0);
        assert_eq!(summary.mean_s, 0.0);
    }

    #[test]
    fn test_timer_records_laps() {
        let mut timer = LapTimer::start();
        for _ in 0..3 {
            timer.next_lap();
        }
        timer.record(Duration::from_micros(10));
        assert_eq!(timer.laps().len(), 4);
        assert!(timer.lap_avg() >= 0.0);
        assert!(timer.lap_std() >= 0.0);
    }

    proptest! {
        #[test]
        fn prop_trim_keeps_middle_three_fifths(raw in prop::collection::vec(1u64..1_000_000, 5..200)) {
            let laps: Vec<Duration> = raw.iter().map(|&ns| Duration::from_nanos(ns)).collect();
            let kept = filtered_laps(&laps);
            let trim = laps.len() / 5;
            prop_assert_eq!(kept.len(), laps.len() - 2 * trim);

            let mut sorted = laps.clone();
            sorted.sort_unstable();
            prop_assert_eq!(kept.first(), sorted.get(trim));
            prop_assert_eq!(kept.last(), sorted.get(laps.len() - trim - 1));
        }

        #[test]
        fn prop_mean_lies_within_kept_range(raw in prop::collection::vec(1u64..1_000_000, 1..100)) {
            let laps: Vec<Duration> = raw.iter().map(|&ns| Duration::from_nanos(ns)).collect();
            let kept = filtered_laps(&laps);
            let summary = LapSummary::from_laps(&laps);
            let lo = kept.first().unwrap().as_secs_f64();
            let hi = kept.last().unwrap().as_secs_f64();
            prop_assert!(summary.mean_s >= lo - 1e-15 && summary.mean_s <= hi + 1e-15);
            prop_assert!(summary.std_s >= 0.0);
        }
    }
}
