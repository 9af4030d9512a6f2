use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mktx_core::{ImportJobConfig, RecordSource, SecondaryKind};
use mktx_providers::{
    FixtureFeed, FixtureSecondary, HttpFeed, HttpSecondary, ProviderGateway, SecondaryProvider, TokenBucketQuota,
    TransactionFeed,
};
use mktx_storage::{ArtifactStore, HttpClientConfig, HttpFetcher, TokenBucketConfig};
use serde::Deserialize;
use tokio::fs;

use crate::dedup::DedupConfig;
use crate::pipeline::PipelineOptions;

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub workspace_root: PathBuf,
    pub jobs_file: PathBuf,
    pub ledger_path: PathBuf,
    pub artifacts_dir: PathBuf,
    pub scheduler_enabled: bool,
    pub tick_cron: String,
    pub provider_timeout_secs: u64,
    pub region_concurrency: usize,
    pub enrich: bool,
    pub enrich_concurrency: usize,
    pub quota_capacity: Option<u32>,
    pub quota_refill_ms: u64,
    pub user_agent: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            jobs_file: PathBuf::from("jobs.yaml"),
            ledger_path: PathBuf::from("./data/ledger.json"),
            artifacts_dir: PathBuf::from("./artifacts"),
            scheduler_enabled: false,
            tick_cron: "0 */5 * * * *".to_string(),
            provider_timeout_secs: 20,
            region_concurrency: 1,
            enrich: false,
            enrich_concurrency: 4,
            quota_capacity: None,
            quota_refill_ms: 1_000,
            user_agent: "mktx-bot/0.1".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workspace_root: std::env::var("MKTX_WORKSPACE")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            jobs_file: std::env::var("MKTX_JOBS_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.jobs_file),
            ledger_path: std::env::var("MKTX_LEDGER_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ledger_path),
            artifacts_dir: std::env::var("MKTX_ARTIFACTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifacts_dir),
            scheduler_enabled: env_flag("MKTX_SCHEDULER_ENABLED"),
            tick_cron: std::env::var("MKTX_TICK_CRON").unwrap_or(defaults.tick_cron),
            provider_timeout_secs: env_parse("MKTX_PROVIDER_TIMEOUT_SECS").unwrap_or(defaults.provider_timeout_secs),
            region_concurrency: env_parse("MKTX_REGION_CONCURRENCY").unwrap_or(defaults.region_concurrency),
            enrich: env_flag("MKTX_ENRICH"),
            enrich_concurrency: env_parse("MKTX_ENRICH_CONCURRENCY").unwrap_or(defaults.enrich_concurrency),
            quota_capacity: env_parse("MKTX_QUOTA_CAPACITY"),
            quota_refill_ms: env_parse("MKTX_QUOTA_REFILL_MS").unwrap_or(defaults.quota_refill_ms),
            user_agent: std::env::var("MKTX_USER_AGENT").unwrap_or(defaults.user_agent),
        }
    }

    /// Resolve a possibly relative path against the workspace root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        }
    }

    pub fn jobs_path(&self) -> PathBuf {
        self.resolve(&self.jobs_file)
    }

    pub fn ledger_file(&self) -> PathBuf {
        self.resolve(&self.ledger_path)
    }

    pub fn reports_root(&self) -> PathBuf {
        self.workspace_root.join("reports")
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            region_concurrency: self.region_concurrency.max(1),
            enrich: self.enrich,
            enrich_concurrency: self.enrich_concurrency.max(1),
            dedup: DedupConfig::default(),
            reference: None,
        }
    }
}

/// Where the primary feed comes from.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeedWiring {
    Fixture {
        path: PathBuf,
    },
    Http {
        provider_id: String,
        url: String,
        #[serde(default)]
        source: Option<RecordSource>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SecondaryWiring {
    Fixture {
        path: PathBuf,
    },
    Http {
        provider_id: String,
        kind: SecondaryKind,
        url: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderWiring {
    pub feed: FeedWiring,
    #[serde(default)]
    pub secondary: Vec<SecondaryWiring>,
}

impl ProviderWiring {
    fn uses_http(&self) -> bool {
        matches!(self.feed, FeedWiring::Http { .. })
            || self
                .secondary
                .iter()
                .any(|wiring| matches!(wiring, SecondaryWiring::Http { .. }))
    }
}

/// The jobs file: recurring job configs plus the providers they fetch from.
#[derive(Debug, Clone, Deserialize)]
pub struct JobRegistry {
    pub jobs: Vec<ImportJobConfig>,
    pub providers: ProviderWiring,
}

impl JobRegistry {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing job registry")
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn job(&self, id: &str) -> Option<&ImportJobConfig> {
        self.jobs.iter().find(|job| job.id == id)
    }

    /// Build the gateway described by the provider wiring. Relative fixture
    /// paths resolve against the workspace root.
    pub fn build_gateway(&self, config: &SyncConfig) -> Result<ProviderGateway> {
        let wiring = &self.providers;
        let fetcher = if wiring.uses_http() {
            Some(Arc::new(HttpFetcher::new(HttpClientConfig {
                timeout: config.provider_timeout(),
                user_agent: Some(config.user_agent.clone()),
                ..Default::default()
            })?))
        } else {
            None
        };
        let archive = ArtifactStore::new(config.resolve(&config.artifacts_dir));

        let feed: Arc<dyn TransactionFeed> = match &wiring.feed {
            FeedWiring::Fixture { path } => Arc::new(FixtureFeed::load(config.resolve(path))?),
            FeedWiring::Http {
                provider_id,
                url,
                source,
            } => {
                let fetcher = fetcher.clone().context("http fetcher not initialised")?;
                Arc::new(
                    HttpFeed::new(provider_id.clone(), url.clone(), source.unwrap_or(RecordSource::Platform), fetcher)
                        .with_archive(archive.clone()),
                )
            }
        };

        let mut gateway = ProviderGateway::new(feed).with_timeout(config.provider_timeout());
        for entry in &wiring.secondary {
            let provider: Arc<dyn SecondaryProvider> = match entry {
                SecondaryWiring::Fixture { path } => Arc::new(FixtureSecondary::load(config.resolve(path))?),
                SecondaryWiring::Http { provider_id, kind, url } => {
                    let fetcher = fetcher.clone().context("http fetcher not initialised")?;
                    Arc::new(
                        HttpSecondary::new(provider_id.clone(), *kind, url.clone(), fetcher)
                            .with_archive(archive.clone()),
                    )
                }
            };
            gateway = gateway.with_secondary(provider);
        }

        if let Some(capacity) = config.quota_capacity {
            gateway = gateway.with_quota(Arc::new(TokenBucketQuota::new(TokenBucketConfig {
                capacity,
                refill_every: Duration::from_millis(config.quota_refill_ms),
            })));
        }
        Ok(gateway)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mktx_core::Cadence;

    const REGISTRY: &str = r#"
jobs:
  - id: tlv-center
    name: Tel Aviv center
    cadence: weekly
    lookback_months: 12
    auto_approve: true
    filter:
      property_types: [apartment, penthouse]
      price: { min: 1000000 }
    regions:
      - name: lev-hair
        center: { lat: 32.07, lng: 34.776 }
        radius_km: 2.5
  - id: manual-check
    cadence: manual
    filter:
      location:
        center: { lat: 32.07, lng: 34.776 }
        radius_km: 1.0
providers:
  feed:
    type: fixture
    path: fixtures/feed/tel-aviv.json
  secondary:
    - type: fixture
      path: fixtures/secondary/planning.json
    - type: http
      provider_id: tax-api
      kind: tax
      url: https://tax.example/assess
"#;

    #[test]
    fn registry_parses_jobs_and_wiring() {
        let registry = JobRegistry::from_yaml(REGISTRY).unwrap();
        assert_eq!(registry.jobs.len(), 2);

        let job = registry.job("tlv-center").unwrap();
        assert_eq!(job.cadence, Cadence::Weekly);
        assert!(job.enabled);
        assert!(job.auto_approve);
        assert_eq!(job.lookback_months, 12);
        assert_eq!(job.regions[0].name, "lev-hair");
        assert_eq!(job.filter.price.and_then(|p| p.min), Some(1_000_000.0));
        assert!(job.filter.location.is_none());

        let manual = registry.job("manual-check").unwrap();
        assert_eq!(manual.lookback_months, 6);
        assert!(manual.filter.location.is_some());

        assert!(matches!(registry.providers.feed, FeedWiring::Fixture { .. }));
        assert!(registry.providers.uses_http());
        assert!(matches!(
            registry.providers.secondary[1],
            SecondaryWiring::Http { kind: SecondaryKind::Tax, .. }
        ));
    }

    #[test]
    fn relative_paths_resolve_against_workspace() {
        let config = SyncConfig {
            workspace_root: PathBuf::from("/srv/mktx"),
            ..SyncConfig::default()
        };
        assert_eq!(config.jobs_path(), PathBuf::from("/srv/mktx/jobs.yaml"));
        assert_eq!(config.resolve(Path::new("/etc/jobs.yaml")), PathBuf::from("/etc/jobs.yaml"));
        assert_eq!(config.pipeline_options().region_concurrency, 1);
    }

    #[test]
    fn gateway_builds_from_workspace_fixtures() {
        let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..");
        let config = SyncConfig {
            workspace_root: root,
            ..SyncConfig::default()
        };
        let registry = JobRegistry {
            jobs: vec![],
            providers: ProviderWiring {
                feed: FeedWiring::Fixture {
                    path: PathBuf::from("fixtures/feed/tel-aviv.json"),
                },
                secondary: vec![SecondaryWiring::Fixture {
                    path: PathBuf::from("fixtures/secondary/planning.json"),
                }],
            },
        };
        let gateway = registry.build_gateway(&config).unwrap();
        assert_eq!(gateway.feed_id(), "land-registry-fixture");
        assert!(gateway.has_secondary(SecondaryKind::Planning));
        assert!(!gateway.has_secondary(SecondaryKind::Tax));
    }
}
