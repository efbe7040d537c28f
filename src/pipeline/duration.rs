//! Duration policy: grades how closely dubbed audio matches the original length.
//!
//! `variance = |produced - original| / original`. Up to `success_max` the
//! difference is imperceptible; up to `partial_max` it is audible but usable;
//! beyond that synthesis degenerated and the fragment is failed.

use crate::defaults;
use crate::pipeline::asset::Warning;
use crate::pipeline::error::StageFailure;
use serde::{Deserialize, Serialize};

/// Outcome class of a duration check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationGrade {
    Success,
    Partial,
    Failed,
}

/// Duration-match metadata attached to synthesized audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationMatch {
    pub original_ms: u64,
    pub produced_ms: u64,
    /// Relative difference as a fraction (0.15 = 15%).
    pub variance: f64,
    /// `produced_ms / original_ms`, 0.0 when the original is empty.
    pub speed_ratio: f64,
    /// Whether the audio was time-stretched before grading.
    pub stretched: bool,
}

/// Result of [`DurationPolicy::evaluate`].
#[derive(Debug, Clone, PartialEq)]
pub struct DurationEvaluation {
    pub grade: DurationGrade,
    pub details: DurationMatch,
}

impl DurationEvaluation {
    pub fn variance(&self) -> f64 {
        self.details.variance
    }

    /// The `duration_variance_high` warning for a partial grade.
    pub fn warning(&self) -> Option<Warning> {
        (self.grade == DurationGrade::Partial)
            .then(|| Warning::duration_variance_high(self.details.variance))
    }

    /// The non-retryable failure for a failed grade.
    pub fn failure(&self) -> Option<StageFailure> {
        (self.grade == DurationGrade::Failed).then(|| StageFailure::DurationMismatch {
            variance: self.details.variance,
        })
    }
}

/// Thresholds for grading and time-stretching.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurationPolicy {
    /// Variance at or below which the dub is a full success.
    pub success_max: f64,
    /// Variance at or below which the dub is partial; above is failed.
    pub partial_max: f64,
    pub min_speed_ratio: f64,
    pub max_speed_ratio: f64,
}

impl Default for DurationPolicy {
    fn default() -> Self {
        Self {
            success_max: defaults::DURATION_SUCCESS_MAX,
            partial_max: defaults::DURATION_PARTIAL_MAX,
            min_speed_ratio: defaults::MIN_SPEED_RATIO,
            max_speed_ratio: defaults::MAX_SPEED_RATIO,
        }
    }
}

impl DurationPolicy {
    /// Grades `produced_ms` against `original_ms`.
    ///
    /// Both bounds are inclusive: exactly 10% is a success, exactly 20% is
    /// partial. An empty original only matches an empty dub; anything else
    /// is graded as 100% variance.
    pub fn evaluate(&self, original_ms: u64, produced_ms: u64) -> DurationEvaluation {
        let variance = variance(original_ms, produced_ms);
        let grade = if variance <= self.success_max {
            DurationGrade::Success
        } else if variance <= self.partial_max {
            DurationGrade::Partial
        } else {
            DurationGrade::Failed
        };

        DurationEvaluation {
            grade,
            details: DurationMatch {
                original_ms,
                produced_ms,
                variance,
                speed_ratio: raw_speed_ratio(original_ms, produced_ms),
                stretched: false,
            },
        }
    }

    /// Speed ratio handed to the time-stretch step.
    ///
    /// Returns `None` when the ratio falls outside the allowed band; such
    /// audio is not stretched and keeps its failed grade.
    pub fn speed_ratio(&self, original_ms: u64, produced_ms: u64) -> Option<f64> {
        if original_ms == 0 {
            return None;
        }
        let ratio = raw_speed_ratio(original_ms, produced_ms);
        (self.min_speed_ratio..=self.max_speed_ratio)
            .contains(&ratio)
            .then_some(ratio)
    }
}

fn variance(original_ms: u64, produced_ms: u64) -> f64 {
    if original_ms == 0 {
        return if produced_ms == 0 { 0.0 } else { 1.0 };
    }
    original_ms.abs_diff(produced_ms) as f64 / original_ms as f64
}

fn raw_speed_ratio(original_ms: u64, produced_ms: u64) -> f64 {
    if original_ms == 0 {
        return 0.0;
    }
    produced_ms as f64 / original_ms as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::asset::WarningCode;
    use crate::pipeline::error::ErrorCode;

    fn grade(original: u64, produced: u64) -> DurationGrade {
        DurationPolicy::default().evaluate(original, produced).grade
    }

    #[test]
    fn test_nine_percent_is_success() {
        let eval = DurationPolicy::default().evaluate(6000, 6540);
        assert_eq!(eval.grade, DurationGrade::Success);
        assert!((eval.variance() - 0.09).abs() < 1e-9);
        assert!(eval.warning().is_none());
        assert!(eval.failure().is_none());
    }

    #[test]
    fn test_fifteen_percent_is_partial_with_warning() {
        let eval = DurationPolicy::default().evaluate(6000, 6900);
        assert_eq!(eval.grade, DurationGrade::Partial);

        let warning = eval.warning().expect("partial carries a warning");
        assert_eq!(warning.code, WarningCode::DurationVarianceHigh);
        assert!((warning.variance_percent.unwrap() - 15.0).abs() < 1e-9);
        assert!(eval.failure().is_none());
    }

    #[test]
    fn test_thirty_percent_is_failed() {
        let eval = DurationPolicy::default().evaluate(6000, 7800);
        assert_eq!(eval.grade, DurationGrade::Failed);

        let failure = eval.failure().expect("failed grade carries a failure");
        assert_eq!(failure.code(), ErrorCode::DurationMismatchExceeded);
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        // exactly 10.0%
        assert_eq!(grade(10000, 11000), DurationGrade::Success);
        assert_eq!(grade(10000, 9000), DurationGrade::Success);
        // 10.01%
        assert_eq!(grade(10000, 11001), DurationGrade::Partial);
        // exactly 20.0%
        assert_eq!(grade(10000, 12000), DurationGrade::Partial);
        assert_eq!(grade(10000, 8000), DurationGrade::Partial);
        // 20.01%
        assert_eq!(grade(10000, 12001), DurationGrade::Failed);
        assert_eq!(grade(10000, 7999), DurationGrade::Failed);
    }

    #[test]
    fn test_shorter_dub_uses_absolute_difference() {
        let eval = DurationPolicy::default().evaluate(6000, 5100);
        assert_eq!(eval.grade, DurationGrade::Partial);
        assert!((eval.details.speed_ratio - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_empty_original() {
        assert_eq!(grade(0, 0), DurationGrade::Success);
        assert_eq!(grade(0, 500), DurationGrade::Failed);
    }

    #[test]
    fn test_speed_ratio_band() {
        let policy = DurationPolicy::default();
        assert_eq!(policy.speed_ratio(6000, 6900), Some(1.15));
        assert_eq!(policy.speed_ratio(6000, 7200), Some(1.2));
        assert_eq!(policy.speed_ratio(6000, 4800), Some(0.8));
        assert_eq!(policy.speed_ratio(6000, 7800), None);
        assert_eq!(policy.speed_ratio(6000, 4000), None);
        assert_eq!(policy.speed_ratio(0, 100), None);
    }

    #[test]
    fn test_custom_thresholds() {
        let policy = DurationPolicy {
            success_max: 0.05,
            partial_max: 0.5,
            ..Default::default()
        };
        assert_eq!(policy.evaluate(1000, 1080).grade, DurationGrade::Partial);
        assert_eq!(policy.evaluate(1000, 1400).grade, DurationGrade::Partial);
    }
}
