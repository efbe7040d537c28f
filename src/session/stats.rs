//! Cumulative per-session statistics.

use crate::pipeline::asset::Status;
use crate::pipeline::latency::{LatencySample, LatencyStats, LatencyTracker};
use crate::pipeline::types::FragmentResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Running counters, updated as fragments are admitted and delivered.
#[derive(Debug, Default)]
pub struct SessionStats {
    pub received: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub success: u64,
    pub partial: u64,
    pub failed: u64,
    /// Occurrences per error code, rejections included.
    pub errors: BTreeMap<String, u64>,
    latency: LatencyTracker,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fragment entered the pipeline.
    pub fn record_accepted(&mut self) {
        self.received += 1;
        self.accepted += 1;
    }

    /// A fragment was answered without being processed.
    pub fn record_rejected(&mut self, result: &FragmentResult) {
        self.received += 1;
        self.rejected += 1;
        self.record_outcome(result);
    }

    /// A processed fragment was delivered.
    pub fn record_delivered(&mut self, result: &FragmentResult) {
        self.record_outcome(result);
        self.latency.record(LatencySample {
            total_ms: result.processing_time_ms,
            timings: result.timings.clone(),
        });
    }

    pub fn latency(&self) -> Option<LatencyStats> {
        self.latency.stats()
    }

    fn record_outcome(&mut self, result: &FragmentResult) {
        match result.status {
            Status::Success => self.success += 1,
            Status::Partial => self.partial += 1,
            Status::Failed => self.failed += 1,
        }
        if let Some(error) = &result.error {
            *self.errors.entry(error.code.as_str().to_string()).or_insert(0) += 1;
        }
    }
}

/// Final statistics reported in `stream:complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub stream_id: String,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub received: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub success: u64,
    pub partial: u64,
    pub failed: u64,
    pub errors: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencyStats>,
    /// Sequence numbers never answered by the pipeline (rejected and not
    /// resubmitted before the stream ended).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_sequences: Vec<u64>,
}

impl SessionSummary {
    pub fn new(
        stream_id: &str,
        session_id: &str,
        started_at: DateTime<Utc>,
        stats: &SessionStats,
        skipped_sequences: Vec<u64>,
    ) -> Self {
        let ended_at = Utc::now();
        let duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;
        Self {
            stream_id: stream_id.to_string(),
            session_id: session_id.to_string(),
            started_at,
            ended_at,
            duration_ms,
            received: stats.received,
            accepted: stats.accepted,
            rejected: stats.rejected,
            success: stats.success,
            partial: stats.partial,
            failed: stats.failed,
            errors: stats.errors.clone(),
            latency: stats.latency(),
            skipped_sequences,
        }
    }

    /// Number of fragments answered, in any status.
    pub fn answered(&self) -> u64 {
        self.success + self.partial + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::asset::Warning;
    use crate::pipeline::error::{Stage, StageFailure};
    use crate::pipeline::types::{AudioPayload, Fragment};

    fn fragment(seq: u64) -> Fragment {
        Fragment::new(format!("f-{seq}"), "s", seq, AudioPayload::silence(16000, 1, 100))
    }

    #[test]
    fn test_counts_by_status_and_code() {
        let mut stats = SessionStats::new();

        stats.record_accepted();
        let mut ok = FragmentResult::dubbed(&fragment(0), AudioPayload::silence(16000, 1, 100), None);
        ok.processing_time_ms = 120;
        stats.record_delivered(&ok);

        stats.record_accepted();
        let mut partial = FragmentResult::dubbed(
            &fragment(1),
            AudioPayload::silence(16000, 1, 100),
            Some(Warning::duration_variance_high(0.15)),
        );
        partial.processing_time_ms = 80;
        stats.record_delivered(&partial);

        let rejected = FragmentResult::rejected(
            &fragment(2),
            Stage::Session,
            &StageFailure::BackpressureExceeded { in_flight: 10 },
        );
        stats.record_rejected(&rejected);

        assert_eq!(stats.received, 3);
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.rejected, 1);
        assert_eq!((stats.success, stats.partial, stats.failed), (1, 1, 1));
        assert_eq!(stats.errors.get("backpressure_exceeded"), Some(&1));

        let latency = stats.latency().unwrap();
        assert_eq!(latency.count, 2);
        assert_eq!(latency.max_ms, 120);
    }

    #[test]
    fn test_summary_copies_counters() {
        let mut stats = SessionStats::new();
        stats.record_accepted();
        stats.record_delivered(&FragmentResult::dubbed(
            &fragment(0),
            AudioPayload::silence(16000, 1, 100),
            None,
        ));

        let summary = SessionSummary::new("s", "sess", Utc::now(), &stats, vec![4]);
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.answered(), 1);
        assert_eq!(summary.skipped_sequences, vec![4]);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["success"], 1);
        assert!(json["latency"]["p95_ms"].is_u64());
    }
}
