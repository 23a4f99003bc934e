//! Summary statistics over aggregated progress.

use std::time::Duration;

use crate::types::{AssessmentProgress, DomainStatus, ProgressStats};

/// Estimates remaining time from a completion-rate model owned by the caller.
pub trait Estimator: Send + Sync {
    fn estimate(&self, progress: &AssessmentProgress) -> Option<Duration>;
}

impl<F> Estimator for F
where
    F: Fn(&AssessmentProgress) -> Option<Duration> + Send + Sync,
{
    fn estimate(&self, progress: &AssessmentProgress) -> Option<Duration> {
        self(progress)
    }
}

/// Derive stats for `progress`.
///
/// Without an estimator the remaining time is unknown. A completed
/// assessment has zero time remaining whenever an estimator is present.
pub fn derive_stats(
    progress: &AssessmentProgress,
    estimator: Option<&dyn Estimator>,
) -> ProgressStats {
    let total = progress.total_domains();
    let completed = progress.count(DomainStatus::Completed);
    let blocked = progress.count(DomainStatus::Blocked);

    let percent_complete = if total == 0 {
        0
    } else {
        // completed <= total, so the quotient fits in 0..=100
        (completed * 100 / total) as u8
    };

    let estimated_time_remaining = estimator.and_then(|e| {
        if progress.is_complete() {
            Some(Duration::ZERO)
        } else {
            e.estimate(progress)
        }
    });

    ProgressStats {
        percent_complete,
        completed_domains: completed,
        total_domains: total,
        domains_remaining: total - completed,
        blocked_domains: blocked,
        estimated_time_remaining,
    }
}
