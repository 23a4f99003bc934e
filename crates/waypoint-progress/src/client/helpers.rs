//! Pure helpers: snapshot decoding, Retry-After parsing (no HTTP, no status logic).

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::error::{ProgressError, ProgressResult};
use crate::types::{AssessmentProgress, DomainProgress};

/// Longest server-requested wait we honour before retrying.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Snapshot body of `GET /assessments/{id}/progress`.
///
/// The server may send its own overall status; it is ignored and
/// recomputed from the domains.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotWire {
    assessment_id: String,
    #[serde(default)]
    domains: Vec<DomainProgress>,
}

/// Decode a snapshot body for `requested_id`.
pub(crate) fn parse_snapshot(body: &str, requested_id: &str) -> ProgressResult<AssessmentProgress> {
    let wire: SnapshotWire =
        serde_json::from_str(body).map_err(|e| ProgressError::InvalidResponse {
            message: format!("failed to parse progress snapshot: {}", e),
        })?;

    if wire.assessment_id != requested_id {
        return Err(ProgressError::InvalidResponse {
            message: format!(
                "snapshot for {} returned assessment {}",
                requested_id, wire.assessment_id
            ),
        });
    }

    AssessmentProgress::from_domains(wire.assessment_id, wire.domains)
}

/// Parse a `Retry-After` header given in seconds.
pub(crate) fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Delay before retrying a rate-limited request: the server's hint capped
/// at 30s, with ±10% jitter.
pub(crate) fn rate_limit_delay(retry_after: Duration) -> Duration {
    let capped = retry_after.min(MAX_RETRY_AFTER);
    let base_ms = capped.as_millis() as u64;
    let jitter_factor: f64 = rand::thread_rng().gen_range(0.9_f64..=1.1_f64);
    let jittered_ms = ((base_ms as f64) * jitter_factor).round() as u64;
    Duration::from_millis(jittered_ms.max(100))
}
