use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mktx_analytics::build_report;
use mktx_core::SyncRunResult;
use mktx_storage::write_atomic;
use tokio::fs;

pub const RUN_FILE: &str = "run.json";
pub const SUMMARY_FILE: &str = "summary.md";

/// Writes one directory per run under `<root>/<run_id>/`.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    root: PathBuf,
}

impl ReportWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn write(&self, result: &SyncRunResult) -> Result<PathBuf> {
        let dir = self.root.join(result.run_id.to_string());
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;

        let json = serde_json::to_vec_pretty(result).context("serializing run result")?;
        write_atomic(&dir.join(RUN_FILE), &json).await?;
        write_atomic(&dir.join(SUMMARY_FILE), render_summary(result).as_bytes()).await?;
        Ok(dir)
    }
}

pub fn render_summary(result: &SyncRunResult) -> String {
    let report = build_report(&result.statistics, &result.trend);
    let mut out = report.render_markdown(&format!("Sync run `{}`", result.config_id), &result.statistics);

    out.push_str("\n## Run\n\n");
    out.push_str(&format!(
        "- Run ID: `{}`\n- Status: {}\n- Started: {}\n- Finished: {} ({} ms)\n- Regions processed: {}\n- Records: {} fetched, {} new, {} duplicates, {} filtered out\n- Quality: {} verified / {} unverified, {} complete / {} incomplete\n",
        result.run_id,
        result.status.as_str(),
        result.started_at,
        result.finished_at,
        result.duration_ms,
        result.regions_processed,
        result.total_records,
        result.new_records,
        result.duplicates,
        result.filtered_out,
        result.quality.verified,
        result.quality.unverified,
        result.quality.complete,
        result.quality.incomplete,
    ));
    if !result.enriched.is_empty() {
        let failures: usize = result.enriched.iter().map(|e| e.failed_providers.len()).sum();
        out.push_str(&format!(
            "- Enriched: {} records, {} secondary lookups failed\n",
            result.enriched.len(),
            failures
        ));
    }

    if !result.error_messages.is_empty() {
        out.push_str(&format!("\n## Errors ({})\n\n", result.errors));
        for message in &result.error_messages {
            out.push_str(&format!("- {message}\n"));
        }
    }
    out
}

/// Latest runs first, optionally restricted to one job.
pub fn load_runs(root: &Path, job: Option<&str>, limit: usize) -> Result<Vec<SyncRunResult>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut runs = Vec::new();
    for entry in std::fs::read_dir(root).with_context(|| format!("reading {}", root.display()))? {
        let entry = entry.with_context(|| format!("reading {}", root.display()))?;
        let path = entry.path().join(RUN_FILE);
        if !path.is_file() {
            continue;
        }
        let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let run: SyncRunResult =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        if job.map_or(true, |id| run.config_id == id) {
            runs.push(run);
        }
    }
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    runs.truncate(limit.max(1));
    Ok(runs)
}

pub fn report_markdown(root: &Path, job: Option<&str>, limit: usize) -> Result<String> {
    let runs = load_runs(root, job, limit)?;
    let mut lines = vec!["# Market sync report".to_string(), String::new()];
    if runs.is_empty() {
        lines.push("No runs recorded yet.".to_string());
    }
    for run in runs {
        lines.push(format!("## `{}` run `{}`", run.config_id, run.run_id));
        lines.push(format!("- started: {}", run.started_at));
        lines.push(format!("- status: {}", run.status.as_str()));
        lines.push(format!(
            "- records: {} fetched, {} new, {} duplicates",
            run.total_records, run.new_records, run.duplicates
        ));
        lines.push(format!("- errors: {}", run.errors));
        lines.push(format!("- {}", mktx_analytics::summarize(&run.statistics, &run.trend)));
        lines.push(String::new());
    }
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use mktx_core::{DataQuality, RunStatus, StatisticsSnapshot, TrendSnapshot};
    use tempfile::tempdir;
    use uuid::Uuid;

    fn result(config_id: &str, day: u32, status: RunStatus) -> SyncRunResult {
        let started_at = Utc.with_ymd_and_hms(2024, 6, day, 2, 0, 0).unwrap();
        SyncRunResult {
            run_id: Uuid::new_v4(),
            config_id: config_id.to_string(),
            started_at,
            finished_at: started_at,
            duration_ms: 12,
            regions_processed: 1,
            total_records: 5,
            new_records: 4,
            duplicates: 1,
            filtered_out: 0,
            errors: 1,
            error_messages: vec!["region `north`: provider `feed` unavailable".into()],
            quality: DataQuality {
                verified: 4,
                unverified: 1,
                complete: 5,
                incomplete: 0,
            },
            status,
            imported: vec![],
            enriched: vec![],
            statistics: StatisticsSnapshot {
                average_price_per_sqm: 30_000.0,
                median_price_per_sqm: 29_000.0,
                min_price_per_sqm: 25_000.0,
                max_price_per_sqm: 36_000.0,
                count: 5,
                ..StatisticsSnapshot::default()
            },
            trend: TrendSnapshot::default(),
        }
    }

    #[test]
    fn summary_includes_status_counts_and_errors() {
        let text = render_summary(&result("tlv", 3, RunStatus::Partial));
        assert!(text.starts_with("# Sync run `tlv`"));
        assert!(text.contains("- Status: partial"));
        assert!(text.contains("- Records: 5 fetched, 4 new, 1 duplicates, 0 filtered out"));
        assert!(text.contains("## Errors (1)"));
        assert!(text.contains("provider `feed` unavailable"));
    }

    #[tokio::test]
    async fn written_runs_are_listed_newest_first() {
        let dir = tempdir().unwrap();
        let writer = ReportWriter::new(dir.path());
        let older = result("tlv", 1, RunStatus::Success);
        let newer = result("tlv", 8, RunStatus::Partial);
        let other = result("haifa", 9, RunStatus::Success);
        for run in [&older, &newer, &other] {
            let run_dir = writer.write(run).await.unwrap();
            assert!(run_dir.join(RUN_FILE).is_file());
            assert!(run_dir.join(SUMMARY_FILE).is_file());
        }

        let runs = load_runs(dir.path(), Some("tlv"), 10).unwrap();
        let ids: Vec<_> = runs.iter().map(|r| r.run_id).collect();
        assert_eq!(ids, vec![newer.run_id, older.run_id]);

        let md = report_markdown(dir.path(), None, 1).unwrap();
        assert!(md.contains(&format!("`haifa` run `{}`", other.run_id)));
        assert!(!md.contains("`tlv` run"));
    }

    #[test]
    fn missing_report_root_is_empty() {
        let dir = tempdir().unwrap();
        let md = report_markdown(&dir.path().join("nope"), None, 5).unwrap();
        assert!(md.contains("No runs recorded yet."));
    }
}
