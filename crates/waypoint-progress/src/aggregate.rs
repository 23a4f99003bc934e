//! Pure reducer merging progress fragments into an assessment.
//!
//! Holds no state between calls. Ordering and duplicate rejection rely only
//! on per-domain sequence numbers, never on delivery order.

use crate::error::{ProgressError, ProgressResult};
use crate::types::{AssessmentProgress, DomainStatus, ProgressUpdate};

/// Outcome of reducing one fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reduced {
    /// The fragment was newer than the stored domain entry.
    Changed(AssessmentProgress),

    /// The fragment's sequence was not newer; state is unchanged.
    Stale,
}

/// Overall status of a set of domain statuses.
///
/// - no domains: `not_started`
/// - all `completed`: `completed`
/// - any `in_progress`: `in_progress`
/// - any `blocked` (none in progress): `blocked`
/// - all `not_started`: `not_started`
/// - otherwise (completed mixed with not started): `in_progress`
pub fn overall_status<I>(statuses: I) -> DomainStatus
where
    I: IntoIterator<Item = DomainStatus>,
{
    let mut total = 0usize;
    let mut completed = 0usize;
    let mut not_started = 0usize;
    let mut in_progress = false;
    let mut blocked = false;

    for status in statuses {
        total += 1;
        match status {
            DomainStatus::Completed => completed += 1,
            DomainStatus::NotStarted => not_started += 1,
            DomainStatus::InProgress => in_progress = true,
            DomainStatus::Blocked => blocked = true,
        }
    }

    if total == 0 {
        DomainStatus::NotStarted
    } else if completed == total {
        DomainStatus::Completed
    } else if in_progress {
        DomainStatus::InProgress
    } else if blocked {
        DomainStatus::Blocked
    } else if not_started == total {
        DomainStatus::NotStarted
    } else {
        DomainStatus::InProgress
    }
}

/// Reduce one fragment against the current state.
///
/// Fails with `WrongAssessment` or `UnknownDomain` without touching state.
pub fn reduce(current: &AssessmentProgress, update: &ProgressUpdate) -> ProgressResult<Reduced> {
    if update.assessment_id != current.assessment_id() {
        return Err(ProgressError::WrongAssessment {
            expected: current.assessment_id().to_string(),
            actual: update.assessment_id.clone(),
        });
    }

    let stored = current
        .domain(&update.domain_id)
        .ok_or_else(|| ProgressError::UnknownDomain {
            assessment_id: current.assessment_id().to_string(),
            domain_id: update.domain_id.clone(),
        })?;

    if update.sequence <= stored.sequence {
        return Ok(Reduced::Stale);
    }

    let mut next = current.clone();
    next.replace_domain(update.to_domain());
    Ok(Reduced::Changed(next))
}

/// Apply one fragment, returning the resulting state.
///
/// Stale fragments return `current` unchanged.
pub fn apply(
    current: &AssessmentProgress,
    update: &ProgressUpdate,
) -> ProgressResult<AssessmentProgress> {
    match reduce(current, update)? {
        Reduced::Changed(next) => Ok(next),
        Reduced::Stale => Ok(current.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    use crate::types::DomainStatus::*;

    fn a1() -> AssessmentProgress {
        AssessmentProgress::new("A1", ["d1", "d2"])
    }

    fn update(domain: &str, status: DomainStatus, percent: u8, seq: u64) -> ProgressUpdate {
        ProgressUpdate::new("A1", domain, status, percent, seq)
    }

    fn apply_all(start: &AssessmentProgress, updates: &[ProgressUpdate]) -> AssessmentProgress {
        updates
            .iter()
            .fold(start.clone(), |state, u| apply(&state, u).unwrap())
    }

    #[test]
    fn test_two_domain_scenario() {
        let state = apply(&a1(), &update("d1", Completed, 100, 1)).unwrap();
        assert_eq!(state.status(), InProgress);

        let state = apply(&state, &update("d2", Completed, 100, 1)).unwrap();
        assert_eq!(state.status(), Completed);
        assert!(state.is_complete());
    }

    #[test]
    fn test_out_of_order_keeps_newest() {
        let state = apply(&a1(), &update("d1", InProgress, 40, 5)).unwrap();
        let state = apply(&state, &update("d1", InProgress, 30, 3)).unwrap();

        let d1 = state.domain("d1").unwrap();
        assert_eq!(d1.percent_complete, 40);
        assert_eq!(d1.sequence, 5);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let u = update("d1", InProgress, 25, 2);
        let once = apply(&a1(), &u).unwrap();
        let twice = apply(&once, &u).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_stale_and_equal_sequence_rejected() {
        let state = apply(&a1(), &update("d1", InProgress, 50, 7)).unwrap();

        for seq in [0, 3, 7] {
            let result = reduce(&state, &update("d1", Completed, 100, seq)).unwrap();
            assert_eq!(result, Reduced::Stale, "seq {seq} must be stale");
        }
    }

    #[test]
    fn test_interleavings_converge() {
        let start = AssessmentProgress::new("A1", ["d1", "d2", "d3"]);
        let d1 = [
            update("d1", InProgress, 10, 1),
            update("d1", InProgress, 60, 2),
            update("d1", Completed, 100, 4),
        ];
        let d2 = [update("d2", Blocked, 20, 3), update("d2", InProgress, 30, 9)];
        let d3 = [update("d3", InProgress, 5, 2)];

        let sequential: Vec<_> = d1.iter().chain(&d2).chain(&d3).cloned().collect();
        let interleaved = vec![
            d2[0].clone(),
            d1[0].clone(),
            d3[0].clone(),
            d1[1].clone(),
            d2[1].clone(),
            d1[2].clone(),
        ];
        let mut by_sequence = sequential.clone();
        by_sequence.sort_by_key(|u| u.sequence);

        let expected = apply_all(&start, &sequential);
        assert_eq!(apply_all(&start, &interleaved), expected);
        assert_eq!(apply_all(&start, &by_sequence), expected);
        assert_eq!(expected.status(), InProgress);
    }

    #[test]
    fn test_unknown_domain_rejected() {
        let state = a1();
        let err = reduce(&state, &update("d9", Completed, 100, 1)).unwrap_err();
        assert!(matches!(
            err,
            ProgressError::UnknownDomain { ref domain_id, .. } if domain_id == "d9"
        ));
    }

    #[test]
    fn test_wrong_assessment_rejected() {
        let u = ProgressUpdate::new("A2", "d1", Completed, 100, 1);
        let err = apply(&a1(), &u).unwrap_err();
        assert!(matches!(err, ProgressError::WrongAssessment { .. }));
    }

    #[test]
    fn test_completion_iff_all_domains_completed() {
        let all = [NotStarted, InProgress, Completed, Blocked];
        for a in all {
            for b in all {
                for c in all {
                    let status = overall_status([a, b, c]);
                    let every_completed = [a, b, c].iter().all(|s| *s == Completed);
                    assert_eq!(status == Completed, every_completed, "{a} {b} {c}");
                }
            }
        }
    }

    #[test]
    fn test_overall_status_reduction() {
        assert_eq!(overall_status(Vec::<DomainStatus>::new()), NotStarted);
        assert_eq!(overall_status([NotStarted, NotStarted]), NotStarted);
        assert_eq!(overall_status([Blocked, Completed]), Blocked);
        assert_eq!(overall_status([Blocked, InProgress]), InProgress);
        assert_eq!(overall_status([Completed, NotStarted]), InProgress);
    }

    #[test]
    fn test_updated_at_is_max_of_domains() {
        let early = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();

        let state = apply(&a1(), &update("d1", InProgress, 10, 1).at(late)).unwrap();
        let state = apply(&state, &update("d2", InProgress, 10, 1).at(early)).unwrap();
        assert_eq!(state.updated_at(), Some(late));
    }

    #[test]
    fn test_completed_fragment_normalized_to_full_percent() {
        let state = apply(&a1(), &update("d1", Completed, 70, 1)).unwrap();
        assert_eq!(state.domain("d1").unwrap().percent_complete, 100);
    }
}
