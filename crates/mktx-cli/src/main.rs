use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use mktx_analytics::{EstimateRequest, DEFAULT_WINDOW_MONTHS};
use mktx_core::{Cadence, GeoRadius, ImportJobConfig, PropertyType};
use mktx_storage::{write_csv, ImportLedger};
use mktx_sync::{
    maybe_build_cron, next_run_for, report_markdown, scheduler_from_config, JobRegistry, RunLocks, SyncConfig,
    SyncPipeline,
};
use tokio::sync::Mutex;
use tracing::info;

mod telemetry;

#[derive(Debug, Parser)]
#[command(name = "mktx")]
#[command(about = "Market-transaction ingestion and statistics")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run jobs now, regardless of their schedule.
    Sync {
        #[arg(long)]
        job: Option<String>,
    },
    /// Run due jobs on the configured cron until interrupted.
    Schedule,
    /// Print when a cadence next fires.
    NextRun {
        #[arg(value_parser = parse_cadence)]
        cadence: Cadence,
        /// RFC 3339 instant; defaults to now.
        #[arg(long)]
        from: Option<DateTime<Utc>>,
    },
    /// Estimate market value for a property profile at a target date.
    Estimate {
        #[arg(long)]
        job: String,
        #[arg(long)]
        target_date: NaiveDate,
        #[arg(long)]
        area: f64,
        #[arg(long, value_parser = parse_property_type)]
        property_type: PropertyType,
        #[arg(long, default_value_t = DEFAULT_WINDOW_MONTHS)]
        window_months: u32,
    },
    /// Write the import ledger as CSV.
    Export {
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        job: Option<String>,
    },
    /// Summarize recent runs.
    Report {
        #[arg(long)]
        job: Option<String>,
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
}

fn parse_cadence(value: &str) -> Result<Cadence, String> {
    match value.to_ascii_lowercase().as_str() {
        "manual" => Ok(Cadence::Manual),
        "daily" => Ok(Cadence::Daily),
        "weekly" => Ok(Cadence::Weekly),
        "monthly" => Ok(Cadence::Monthly),
        other => Err(format!("unknown cadence `{other}` (manual, daily, weekly, monthly)")),
    }
}

fn parse_property_type(value: &str) -> Result<PropertyType, String> {
    match PropertyType::from_label(value) {
        PropertyType::Unknown => Err(format!("unknown property type `{value}`")),
        known => Ok(known),
    }
}

fn job_area(job: &ImportJobConfig) -> Option<GeoRadius> {
    job.filter
        .location
        .or_else(|| job.regions.first().map(|region| region.area()))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init()?;
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync { job: None }) {
        Commands::Sync { job } => {
            let mut scheduler = scheduler_from_config(&config).await?;
            for result in scheduler.run_now(job.as_deref(), Utc::now()).await? {
                println!(
                    "sync {}: run_id={} status={} regions={} records={} new={} duplicates={} errors={}",
                    result.config_id,
                    result.run_id,
                    result.status.as_str(),
                    result.regions_processed,
                    result.total_records,
                    result.new_records,
                    result.duplicates,
                    result.errors
                );
                for message in &result.error_messages {
                    println!("  - {message}");
                }
            }
        }
        Commands::Schedule => {
            let scheduler = Arc::new(Mutex::new(scheduler_from_config(&config).await?));
            match maybe_build_cron(&config, Arc::clone(&scheduler)).await? {
                Some(cron) => {
                    cron.start().await.context("starting scheduler")?;
                    info!(cron = %config.tick_cron, "scheduler running; ctrl-c to stop");
                    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
                }
                None => {
                    let results = scheduler.lock().await.tick(Utc::now()).await?;
                    println!(
                        "scheduler disabled (set MKTX_SCHEDULER_ENABLED=1); ran {} due job(s) once",
                        results.len()
                    );
                }
            }
        }
        Commands::NextRun { cadence, from } => {
            let from = from.unwrap_or_else(Utc::now);
            match next_run_for(cadence, from) {
                Some(next) => println!("{}", next.to_rfc3339()),
                None => println!("{} jobs have no next run", cadence.as_str()),
            }
        }
        Commands::Estimate {
            job,
            target_date,
            area,
            property_type,
            window_months,
        } => {
            let registry = JobRegistry::load(&config.jobs_path()).await?;
            let Some(job_config) = registry.job(&job) else {
                bail!("unknown job `{job}`");
            };
            let Some(region) = job_area(job_config) else {
                bail!("job `{job}` has neither a location filter nor regions");
            };
            let pipeline = SyncPipeline::new(registry.build_gateway(&config)?, RunLocks::new());
            let request = EstimateRequest::new(target_date, area, property_type).with_window_months(window_months);
            let estimate = pipeline.estimate_for_target_date(&region, &request).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&estimate).context("serializing estimate")?
            );
        }
        Commands::Export { out, job } => {
            let ledger = ImportLedger::open(config.ledger_file()).await?;
            let records: Vec<_> = match job.as_deref() {
                Some(id) => ledger.for_config(id).cloned().collect(),
                None => ledger.records().to_vec(),
            };
            let file = File::create(&out).with_context(|| format!("creating {}", out.display()))?;
            write_csv(&records, file).with_context(|| format!("writing {}", out.display()))?;
            println!("exported {} records to {}", records.len(), out.display());
        }
        Commands::Report { job, runs } => {
            let markdown = report_markdown(&config.reports_root(), job.as_deref(), runs)?;
            println!("{markdown}");
        }
    }

    Ok(())
}
