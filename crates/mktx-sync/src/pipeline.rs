//! Run orchestration for one job config: the single-location import run and the
//! multi-region sync run.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Months, NaiveDate, Utc};
use mktx_analytics::{aggregate, estimate_value, trends, EstimateRequest};
use mktx_core::{
    DataQuality, FilterSpec, GeoRadius, ImportJobConfig, ImportRunResult, ImportedRecord, MarketValueEstimate,
    ReferenceProperty, Region, RunStatus, StatisticsSnapshot, SyncRunResult, TransactionRecord, TrendSnapshot,
};
use mktx_providers::{FeedPage, ProviderError, ProviderGateway};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::dedup::{DedupConfig, DedupEngine};
use crate::enrich::Enricher;
use crate::error::SyncError;
use crate::filter::{apply_filter, is_complete};
use crate::schedule::RunLocks;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Regions fetched at once during a sync run; 1 keeps them sequential.
    pub region_concurrency: usize,
    pub enrich: bool,
    pub enrich_concurrency: usize,
    pub dedup: DedupConfig,
    /// Profile that enriched records are scored against.
    pub reference: Option<ReferenceProperty>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            region_concurrency: 1,
            enrich: false,
            enrich_concurrency: 4,
            dedup: DedupConfig::default(),
            reference: None,
        }
    }
}

/// Tracks run timing so every result reports a consistent start, end and duration.
struct RunClock {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    timer: Instant,
}

impl RunClock {
    fn start(now: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            timer: Instant::now(),
        }
    }

    fn finish(&self) -> (DateTime<Utc>, i64) {
        let duration_ms = i64::try_from(self.timer.elapsed().as_millis()).unwrap_or(i64::MAX);
        let finished_at = self.started_at + chrono::Duration::milliseconds(duration_ms);
        (finished_at, duration_ms)
    }
}

/// Outcome of dedup for one batch of candidates.
#[derive(Debug, Default)]
struct DedupOutcome {
    created: Vec<ImportedRecord>,
    duplicates: usize,
}

enum RegionOutcome {
    Fetched { region: String, page: FeedPage },
    Failed { region: String, error: ProviderError },
}

#[derive(Clone)]
pub struct SyncPipeline {
    gateway: ProviderGateway,
    locks: RunLocks,
    options: PipelineOptions,
    dedup: DedupEngine,
}

impl SyncPipeline {
    pub fn new(gateway: ProviderGateway, locks: RunLocks) -> Self {
        Self {
            gateway,
            locks,
            options: PipelineOptions::default(),
            dedup: DedupEngine::default(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.dedup = DedupEngine::new(options.dedup);
        self.options = options;
        self
    }

    pub fn locks(&self) -> &RunLocks {
        &self.locks
    }

    /// Wraps each candidate that does not duplicate `existing` or an earlier
    /// candidate of the same batch.
    fn dedup_batch(
        &self,
        config: &ImportJobConfig,
        candidates: Vec<TransactionRecord>,
        existing: &[ImportedRecord],
        imported_at: DateTime<Utc>,
        outcome: &mut DedupOutcome,
    ) {
        for candidate in candidates {
            let duplicate_of = self
                .dedup
                .find_duplicate(&candidate, existing.iter().chain(outcome.created.iter()))
                .map(|known| known.import_id);
            match duplicate_of {
                Some(import_id) => {
                    debug!(record = %candidate.id, duplicate_of = %import_id, "duplicate discarded");
                    outcome.duplicates += 1;
                }
                None => outcome.created.push(ImportedRecord::new(
                    candidate,
                    config.id.clone(),
                    imported_at,
                    config.auto_approve,
                )),
            }
        }
    }

    /// Fetch once for the job's location filter, then filter and deduplicate.
    ///
    /// Rejects synchronously with [`SyncError::ConcurrencyViolation`] when the
    /// job already has a run in flight. Every other failure is reported in the
    /// returned result.
    pub async fn run_import(
        &self,
        config: &ImportJobConfig,
        existing: &[ImportedRecord],
        now: DateTime<Utc>,
    ) -> Result<ImportRunResult, SyncError> {
        let _guard = self.locks.try_acquire(&config.id)?;
        let clock = RunClock::start(now);
        let span = info_span!("import_run", job_id = %config.id, run_id = %clock.run_id);

        let result = async move {
            let mut result = ImportRunResult {
                run_id: clock.run_id,
                config_id: config.id.clone(),
                started_at: clock.started_at,
                finished_at: clock.started_at,
                duration_ms: 0,
                total_fetched: 0,
                new_records: 0,
                duplicates: 0,
                filtered_out: 0,
                errored: 0,
                status: RunStatus::Success,
                errors: Vec::new(),
                imported: Vec::new(),
            };

            let Some(area) = config.filter.location else {
                let err = SyncError::Configuration(format!("job `{}` has no location filter", config.id));
                warn!(error = %err, "import run aborted");
                result.errored = 1;
                result.errors.push(err.to_string());
                result.status = RunStatus::Failed;
                (result.finished_at, result.duration_ms) = clock.finish();
                return result;
            };

            let page = match self.gateway.fetch(&area, config.lookback_months).await {
                Ok(page) => page,
                Err(err) => {
                    warn!(error = %err, "primary feed failed");
                    result.errored = 1;
                    result.errors.push(err.to_string());
                    result.status = RunStatus::Failed;
                    (result.finished_at, result.duration_ms) = clock.finish();
                    return result;
                }
            };

            result.total_fetched = page.records.len() + page.rejected.len();
            result.errored = page.rejected.len();
            result
                .errors
                .extend(page.rejected.iter().map(|err| format!("{}: {err}", self.gateway.feed_id())));

            let fetched = page.records.len();
            let kept = apply_filter(page.records, &Self::post_fetch_filter(config));
            result.filtered_out = fetched - kept.len();

            let mut outcome = DedupOutcome::default();
            self.dedup_batch(config, kept, existing, now, &mut outcome);
            result.new_records = outcome.created.len();
            result.duplicates = outcome.duplicates;
            result.imported = outcome.created;

            // The only provider call succeeded; rejected entries are counted, not fatal.
            result.status = RunStatus::Success;
            (result.finished_at, result.duration_ms) = clock.finish();
            info!(
                status = result.status.as_str(),
                fetched = result.total_fetched,
                new = result.new_records,
                duplicates = result.duplicates,
                "import run finished"
            );
            result
        }
        .instrument(span)
        .await;
        Ok(result)
    }

    /// The area was already applied by the provider, so only the remaining
    /// constraints are checked locally.
    fn post_fetch_filter(config: &ImportJobConfig) -> FilterSpec {
        FilterSpec {
            location: None,
            ..config.filter.clone()
        }
    }

    /// Regions a sync run covers: the configured ones, else the location filter.
    fn regions_for(config: &ImportJobConfig) -> Result<Vec<Region>, SyncError> {
        if !config.regions.is_empty() {
            return Ok(config.regions.clone());
        }
        match config.filter.location {
            Some(area) => Ok(vec![Region {
                name: config.id.clone(),
                center: area.center,
                radius_km: area.radius_km,
            }]),
            None => Err(SyncError::Configuration(format!(
                "job `{}` has neither regions nor a location filter",
                config.id
            ))),
        }
    }

    async fn fetch_regions(&self, regions: Vec<Region>, lookback_months: u32) -> Vec<RegionOutcome> {
        let permits = Arc::new(Semaphore::new(self.options.region_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for (index, region) in regions.into_iter().enumerate() {
            let gateway = self.gateway.clone();
            let permits = Arc::clone(&permits);
            tasks.spawn(
                async move {
                    let _permit = permits.acquire_owned().await;
                    let outcome = match gateway.fetch(&region.area(), lookback_months).await {
                        Ok(page) => RegionOutcome::Fetched {
                            region: region.name,
                            page,
                        },
                        Err(error) => RegionOutcome::Failed {
                            region: region.name,
                            error,
                        },
                    };
                    (index, outcome)
                }
                .in_current_span(),
            );
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(pair) => outcomes.push(pair),
                Err(err) => warn!(error = %err, "region fetch task did not complete"),
            }
        }
        outcomes.sort_by_key(|(index, _)| *index);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }

    /// Fetch and filter every region, deduplicate, and compute statistics over
    /// the surviving records. A failing region is counted and skipped.
    pub async fn run_sync(
        &self,
        config: &ImportJobConfig,
        existing: &[ImportedRecord],
        now: DateTime<Utc>,
    ) -> Result<SyncRunResult, SyncError> {
        let _guard = self.locks.try_acquire(&config.id)?;
        let clock = RunClock::start(now);
        let span = info_span!("sync_run", job_id = %config.id, run_id = %clock.run_id);

        let result = async move {
            let mut result = SyncRunResult {
                run_id: clock.run_id,
                config_id: config.id.clone(),
                started_at: clock.started_at,
                finished_at: clock.started_at,
                duration_ms: 0,
                regions_processed: 0,
                total_records: 0,
                new_records: 0,
                duplicates: 0,
                filtered_out: 0,
                errors: 0,
                error_messages: Vec::new(),
                quality: DataQuality::default(),
                status: RunStatus::Success,
                imported: Vec::new(),
                enriched: Vec::new(),
                statistics: StatisticsSnapshot::default(),
                trend: TrendSnapshot::default(),
            };

            let regions = match Self::regions_for(config) {
                Ok(regions) => regions,
                Err(err) => {
                    warn!(error = %err, "sync run aborted");
                    result.errors = 1;
                    result.error_messages.push(err.to_string());
                    result.status = RunStatus::Failed;
                    (result.finished_at, result.duration_ms) = clock.finish();
                    return result;
                }
            };

            let spec = Self::post_fetch_filter(config);
            let mut outcome = DedupOutcome::default();
            let mut run_records = Vec::new();
            let mut failed_regions = 0usize;
            // Overlapping regions see the same malformed entries; count each once.
            let mut rejected: BTreeMap<String, String> = BTreeMap::new();

            for region_outcome in self.fetch_regions(regions, config.lookback_months).await {
                match region_outcome {
                    RegionOutcome::Failed { region, error } => {
                        warn!(region = %region, error = %error, "region fetch failed");
                        failed_regions += 1;
                        result.errors += 1;
                        result.error_messages.push(format!("region `{region}`: {error}"));
                    }
                    RegionOutcome::Fetched { region, page } => {
                        result.regions_processed += 1;
                        result.total_records += page.records.len();
                        for entry in &page.rejected {
                            rejected
                                .entry(entry.key.clone())
                                .or_insert_with(|| format!("region `{region}`: {entry}"));
                        }

                        let fetched = page.records.len();
                        let kept = apply_filter(page.records, &spec);
                        result.filtered_out += fetched - kept.len();
                        for record in &kept {
                            if record.verified {
                                result.quality.verified += 1;
                            } else {
                                result.quality.unverified += 1;
                            }
                            if is_complete(record) {
                                result.quality.complete += 1;
                            } else {
                                result.quality.incomplete += 1;
                            }
                        }
                        info!(region = %region, fetched, kept = kept.len(), "region processed");
                        run_records.extend(kept.iter().cloned());
                        self.dedup_batch(config, kept, existing, now, &mut outcome);
                    }
                }
            }

            result.errors += rejected.len();
            result.error_messages.extend(rejected.into_values());
            result.new_records = outcome.created.len();
            result.duplicates = outcome.duplicates;
            result.imported = outcome.created;
            result.status = if result.total_records == 0 {
                RunStatus::Failed
            } else if failed_regions > 0 {
                RunStatus::Partial
            } else {
                RunStatus::Success
            };

            if self.options.enrich && !result.imported.is_empty() {
                let enricher =
                    Enricher::new(self.gateway.clone()).with_concurrency(self.options.enrich_concurrency);
                let records = result.imported.iter().map(|r| r.record.clone()).collect();
                result.enriched = enricher.enrich_all(records, self.options.reference.clone()).await;
            }

            result.statistics = aggregate(&run_records);
            result.trend = trends(&run_records, now.date_naive());
            (result.finished_at, result.duration_ms) = clock.finish();
            info!(
                status = result.status.as_str(),
                regions = result.regions_processed,
                records = result.total_records,
                new = result.new_records,
                errors = result.errors,
                "sync run finished"
            );
            result
        }
        .instrument(span)
        .await;
        Ok(result)
    }

    /// Records dated within `window_months` of `target_date` on either side.
    /// Fetches twice the window as lookback and narrows locally.
    pub async fn fetch_for_target_date(
        &self,
        area: &GeoRadius,
        target_date: NaiveDate,
        window_months: u32,
    ) -> Result<Vec<TransactionRecord>, SyncError> {
        let page = self.gateway.fetch(area, window_months.saturating_mul(2)).await?;
        let window = Months::new(window_months);
        let from = target_date.checked_sub_months(window).unwrap_or(NaiveDate::MIN);
        let to = target_date.checked_add_months(window).unwrap_or(NaiveDate::MAX);
        Ok(page
            .records
            .into_iter()
            .filter(|record| record.transaction_date >= from && record.transaction_date <= to)
            .collect())
    }

    pub async fn estimate_for_target_date(
        &self,
        area: &GeoRadius,
        request: &EstimateRequest,
    ) -> Result<MarketValueEstimate, SyncError> {
        let records = self
            .fetch_for_target_date(area, request.target_date, request.window_months)
            .await?;
        Ok(estimate_value(&records, request))
    }
}
