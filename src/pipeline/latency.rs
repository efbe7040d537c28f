//! Latency measurement and aggregation for processed fragments.

use crate::pipeline::types::StageTimings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing of one processed fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySample {
    /// Total processing time, from acceptance to result.
    pub total_ms: u64,
    pub timings: StageTimings,
}

/// Aggregated latency statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub count: usize,
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub queued_avg_ms: f64,
    /// Averages over fragments that reached the stage.
    pub recognition_avg_ms: Option<f64>,
    pub translation_avg_ms: Option<f64>,
    pub synthesis_avg_ms: Option<f64>,
}

impl LatencyStats {
    /// One-line human summary for logs.
    pub fn summary_line(&self) -> String {
        format!(
            "{} fragments, avg {}, p50 {}, p95 {}, max {}",
            self.count,
            format_ms(self.avg_ms.round() as u64),
            format_ms(self.p50_ms),
            format_ms(self.p95_ms),
            format_ms(self.max_ms),
        )
    }
}

/// Collects latency samples for a session.
#[derive(Debug, Default)]
pub struct LatencyTracker {
    samples: Vec<LatencySample>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sample: LatencySample) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Computes aggregated statistics, `None` when nothing was recorded.
    pub fn stats(&self) -> Option<LatencyStats> {
        if self.samples.is_empty() {
            return None;
        }

        let mut totals: Vec<u64> = self.samples.iter().map(|s| s.total_ms).collect();
        totals.sort_unstable();

        let count = totals.len();
        let sum: u64 = totals.iter().sum();
        let queued: Vec<u64> = self.samples.iter().map(|s| s.timings.queued_ms).collect();

        Some(LatencyStats {
            count,
            avg_ms: sum as f64 / count as f64,
            min_ms: *totals.first()?,
            max_ms: *totals.last()?,
            p50_ms: percentile(&totals, 50.0),
            p95_ms: percentile(&totals, 95.0),
            queued_avg_ms: average(&queued).unwrap_or(0.0),
            recognition_avg_ms: self.stage_average(|t| t.recognition_ms),
            translation_avg_ms: self.stage_average(|t| t.translation_ms),
            synthesis_avg_ms: self.stage_average(|t| t.synthesis_ms),
        })
    }

    fn stage_average(&self, pick: impl Fn(&StageTimings) -> Option<u64>) -> Option<f64> {
        let values: Vec<u64> = self.samples.iter().filter_map(|s| pick(&s.timings)).collect();
        average(&values)
    }
}

fn average(values: &[u64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<u64>() as f64 / values.len() as f64)
}

/// Nearest-rank percentile over sorted values.
fn percentile(sorted: &[u64], pct: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Formats milliseconds as a human-friendly string.
/// Under 1s: "450ms", at or above 1s: "1.5s".
fn format_ms(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", Duration::from_millis(ms).as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(total_ms: u64, recognition: Option<u64>, synthesis: Option<u64>) -> LatencySample {
        LatencySample {
            total_ms,
            timings: StageTimings {
                queued_ms: 10,
                recognition_ms: recognition,
                translation_ms: None,
                synthesis_ms: synthesis,
            },
        }
    }

    #[test]
    fn test_empty_tracker_has_no_stats() {
        assert!(LatencyTracker::new().stats().is_none());
    }

    #[test]
    fn test_basic_aggregates() {
        let mut tracker = LatencyTracker::new();
        tracker.record(sample(100, Some(40), Some(50)));
        tracker.record(sample(300, Some(60), None));
        tracker.record(sample(200, Some(50), Some(70)));

        let stats = tracker.stats().unwrap();
        assert_eq!(stats.count, 3);
        assert!((stats.avg_ms - 200.0).abs() < f64::EPSILON);
        assert_eq!(stats.min_ms, 100);
        assert_eq!(stats.max_ms, 300);
        assert_eq!(stats.p50_ms, 200);
        assert_eq!(stats.p95_ms, 300);
        assert_eq!(stats.recognition_avg_ms, Some(50.0));
        assert_eq!(stats.translation_avg_ms, None);
        assert_eq!(stats.synthesis_avg_ms, Some(60.0));
        assert!((stats.queued_avg_ms - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let values: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile(&values, 50.0), 50);
        assert_eq!(percentile(&values, 95.0), 95);
        assert_eq!(percentile(&values, 100.0), 100);
        assert_eq!(percentile(&[7], 95.0), 7);
    }

    #[test]
    fn test_format_ms() {
        assert_eq!(format_ms(450), "450ms");
        assert_eq!(format_ms(1500), "1.5s");
    }

    #[test]
    fn test_summary_line() {
        let mut tracker = LatencyTracker::new();
        tracker.record(sample(1200, None, None));
        let line = tracker.stats().unwrap().summary_line();
        assert_eq!(line, "1 fragments, avg 1.2s, p50 1.2s, p95 1.2s, max 1.2s");
    }
}
