//! The scheduler loop: runs due jobs against the import ledger, advances their
//! schedule, and writes run reports.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mktx_core::{ImportJobConfig, ImportedRecord, SyncRunResult};
use mktx_storage::ImportLedger;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::pipeline::SyncPipeline;
use crate::reports::ReportWriter;
use crate::schedule::{job_state, next_run_for, JobState};

pub const NOTIFY_TARGET: &str = "mktx::notify";

pub struct Scheduler {
    pipeline: SyncPipeline,
    jobs: Vec<ImportJobConfig>,
    ledger: ImportLedger,
    reports: Option<ReportWriter>,
}

impl Scheduler {
    pub fn new(pipeline: SyncPipeline, jobs: Vec<ImportJobConfig>, ledger: ImportLedger) -> Self {
        Self {
            pipeline,
            jobs,
            ledger,
            reports: None,
        }
    }

    pub fn with_reports(mut self, writer: ReportWriter) -> Self {
        self.reports = Some(writer);
        self
    }

    pub fn jobs(&self) -> &[ImportJobConfig] {
        &self.jobs
    }

    pub fn ledger(&self) -> &ImportLedger {
        &self.ledger
    }

    pub fn states(&self, now: DateTime<Utc>) -> Vec<(String, JobState)> {
        self.jobs
            .iter()
            .map(|job| (job.id.clone(), job_state(job, now, self.pipeline.locks())))
            .collect()
    }

    /// Run every job that is due at `now`.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<Vec<SyncRunResult>> {
        let due: Vec<usize> = self
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| job_state(job, now, self.pipeline.locks()) == JobState::Due)
            .map(|(index, _)| index)
            .collect();
        self.run_indices(due, now).await
    }

    /// Run one job, or every enabled job, regardless of schedule.
    pub async fn run_now(&mut self, job_id: Option<&str>, now: DateTime<Utc>) -> Result<Vec<SyncRunResult>> {
        let selected: Vec<usize> = match job_id {
            Some(id) => {
                let index = self
                    .jobs
                    .iter()
                    .position(|job| job.id == id)
                    .with_context(|| format!("unknown job `{id}`"))?;
                vec![index]
            }
            None => self
                .jobs
                .iter()
                .enumerate()
                .filter(|(_, job)| job.enabled)
                .map(|(index, _)| index)
                .collect(),
        };
        self.run_indices(selected, now).await
    }

    async fn run_indices(&mut self, indices: Vec<usize>, now: DateTime<Utc>) -> Result<Vec<SyncRunResult>> {
        let mut results = Vec::new();
        for index in indices {
            let job = self.jobs[index].clone();
            // Each job deduplicates against its own imports only.
            let existing: Vec<ImportedRecord> = self.ledger.for_config(&job.id).cloned().collect();
            match self.pipeline.run_sync(&job, &existing, now).await {
                Ok(result) => {
                    self.ledger.extend(result.imported.iter().cloned());
                    if let Some(writer) = &self.reports {
                        match writer.write(&result).await {
                            Ok(dir) => info!(job_id = %job.id, dir = %dir.display(), "run report written"),
                            Err(err) => warn!(job_id = %job.id, error = %err, "failed to write run report"),
                        }
                    }
                    if job.notify {
                        info!(
                            target: NOTIFY_TARGET,
                            job_id = %job.id,
                            status = result.status.as_str(),
                            new = result.new_records,
                            errors = result.errors,
                            "{}",
                            mktx_analytics::summarize(&result.statistics, &result.trend)
                        );
                    }
                    results.push(result);
                }
                Err(SyncError::ConcurrencyViolation(id)) => {
                    warn!(job_id = %id, "skipping job with a run already in progress");
                    continue;
                }
                Err(err) => {
                    warn!(job_id = %job.id, error = %err, "sync run failed");
                }
            }

            let entry = &mut self.jobs[index];
            entry.last_run = Some(now);
            entry.next_run = next_run_for(entry.cadence, now);
        }

        self.ledger.persist().await.context("persisting import ledger")?;
        Ok(results)
    }
}

/// Periodically drive [`Scheduler::tick`] when the scheduler is enabled.
pub async fn maybe_build_cron(config: &SyncConfig, scheduler: Arc<Mutex<Scheduler>>) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = config.tick_cron.as_str();
    let job = Job::new_async(cron, move |_uuid, _l| {
        let scheduler = Arc::clone(&scheduler);
        Box::pin(async move {
            let mut scheduler = scheduler.lock().await;
            match scheduler.tick(Utc::now()).await {
                Ok(results) => info!(runs = results.len(), "scheduler tick complete"),
                Err(err) => warn!(error = %err, "scheduler tick failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}
