//! Import and sync orchestration: filtering, deduplication, enrichment,
//! scheduling, and run reports.

use anyhow::Result;
use chrono::Utc;
use mktx_core::SyncRunResult;
use mktx_storage::ImportLedger;

pub mod config;
pub mod dedup;
pub mod enrich;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod reports;
pub mod schedule;
pub mod scheduler;

pub use config::{FeedWiring, JobRegistry, ProviderWiring, SecondaryWiring, SyncConfig};
pub use dedup::{find_duplicate, DedupConfig, DedupEngine};
pub use enrich::{comparability, Enricher};
pub use error::SyncError;
pub use filter::{apply_filter, is_complete};
pub use pipeline::{PipelineOptions, SyncPipeline};
pub use reports::{report_markdown, ReportWriter};
pub use schedule::{job_state, next_run_for, JobState, RunGuard, RunLocks};
pub use scheduler::{maybe_build_cron, Scheduler};

pub const CRATE_NAME: &str = "mktx-sync";

/// Load the registry, gateway and ledger described by `config`.
pub async fn scheduler_from_config(config: &SyncConfig) -> Result<Scheduler> {
    let registry = JobRegistry::load(&config.jobs_path()).await?;
    let gateway = registry.build_gateway(config)?;
    let pipeline = SyncPipeline::new(gateway, RunLocks::new()).with_options(config.pipeline_options());
    let ledger = ImportLedger::open(config.ledger_file()).await?;
    Ok(Scheduler::new(pipeline, registry.jobs, ledger).with_reports(ReportWriter::new(config.reports_root())))
}

pub async fn run_sync_once_from_env(job: Option<&str>) -> Result<Vec<SyncRunResult>> {
    let config = SyncConfig::from_env();
    let mut scheduler = scheduler_from_config(&config).await?;
    scheduler.run_now(job, Utc::now()).await
}
