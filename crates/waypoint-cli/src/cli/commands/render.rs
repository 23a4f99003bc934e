//! Terminal and JSON output for progress.

use chrono::Local;
use serde::Serialize;
use waypoint_progress::{AssessmentProgress, ProgressStats};

#[derive(Serialize)]
struct Report<'a> {
    progress: &'a AssessmentProgress,
    stats: &'a ProgressStats,
}

pub fn print(
    progress: &AssessmentProgress,
    stats: &ProgressStats,
    json: bool,
) -> anyhow::Result<()> {
    if json {
        println!("{}", to_json(progress, stats)?);
    } else {
        print!("{}", table(progress, stats));
    }
    Ok(())
}

fn to_json(progress: &AssessmentProgress, stats: &ProgressStats) -> serde_json::Result<String> {
    serde_json::to_string(&Report { progress, stats })
}

fn table(progress: &AssessmentProgress, stats: &ProgressStats) -> String {
    let mut out = format!(
        "{} {}: {} ({}%, {}/{} domains complete",
        progress
            .updated_at()
            .map(|t| t.with_timezone(&Local).format("[%H:%M:%S]").to_string())
            .unwrap_or_else(|| "[--:--:--]".to_string()),
        progress.assessment_id(),
        progress.status(),
        stats.percent_complete,
        stats.completed_domains,
        stats.total_domains,
    );
    if stats.blocked_domains > 0 {
        out.push_str(&format!(", {} blocked", stats.blocked_domains));
    }
    out.push_str(")\n");

    for domain in progress.domains().values() {
        out.push_str(&format!(
            "  {:<24} {:<12} {:>3}%  seq {}\n",
            domain.domain_id,
            domain.status.as_str(),
            domain.percent_complete,
            domain.sequence
        ));
    }
    out
}
