//! Provider gateway: uniform async access to the primary transaction feed and
//! the secondary planning, tax, municipal, and spatial providers.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mktx_core::{
    GeoPoint, GeoRadius, MunicipalInfo, PlanningInfo, SecondaryKind, SpatialInfo, TaxAssessment,
    TransactionRecord,
};
use mktx_storage::{FetchError, SimpleTokenBucket, TokenBucketConfig};
use thiserror::Error;
use tracing::debug;

pub mod decode;
pub mod fixture;
pub mod http;

pub use fixture::{FixtureFeed, FixtureSecondary};
pub use http::{HttpFeed, HttpSecondary};

pub const CRATE_NAME: &str = "mktx-providers";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid value for `{field}`: {value}")]
    InvalidField { field: &'static str, value: String },
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected payload shape: {0}")]
    Shape(String),
}

/// Failure of a single provider call. None of these abort a run.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },
    #[error("{provider} rejected our credentials")]
    Unauthorized { provider: String },
    #[error("{provider} returned a malformed response: {source}")]
    Malformed {
        provider: String,
        #[source]
        source: DecodeError,
    },
    #[error("{provider} unavailable: {message}")]
    Unavailable { provider: String, message: String },
    #[error("quota refused call to {provider}")]
    QuotaRefused { provider: String },
    #[error("no {0} provider configured")]
    NotConfigured(&'static str),
}

impl ProviderError {
    pub fn unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn malformed(provider: impl Into<String>, source: DecodeError) -> Self {
        Self::Malformed {
            provider: provider.into(),
            source,
        }
    }

    /// `timeout` is the limit the fetcher enforced, reported when it expired.
    pub fn from_fetch(provider: &str, err: FetchError, timeout: Duration) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout {
                provider: provider.to_string(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }
        } else if err.is_unauthorized() {
            ProviderError::Unauthorized {
                provider: provider.to_string(),
            }
        } else {
            ProviderError::unavailable(provider, err.to_string())
        }
    }
}

/// Primary-feed query: an area and how many months back to look.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedQuery {
    pub area: GeoRadius,
    pub lookback_months: u32,
}

/// A feed entry the decoder refused. `key` is the entry's provider id, or its
/// raw JSON when it has none, so repeated pages can be matched up.
#[derive(Debug, Error)]
#[error("entry `{key}`: {error}")]
pub struct RejectedEntry {
    pub key: String,
    #[source]
    pub error: DecodeError,
}

/// One primary-feed response. Entries the decoder rejected are kept so the run
/// can count them.
#[derive(Debug, Default)]
pub struct FeedPage {
    pub records: Vec<TransactionRecord>,
    pub rejected: Vec<RejectedEntry>,
}

impl FeedPage {
    pub fn from_records(records: Vec<TransactionRecord>) -> Self {
        Self {
            records,
            rejected: Vec::new(),
        }
    }
}

/// Whatever locator a secondary provider needs: address, coordinates, or parcel id.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupKey {
    pub address: String,
    pub location: Option<GeoPoint>,
    pub parcel_id: Option<String>,
}

impl LookupKey {
    pub fn for_record(record: &TransactionRecord) -> Self {
        Self {
            address: record.address.clone(),
            location: record.location,
            parcel_id: None,
        }
    }

    pub fn by_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            location: None,
            parcel_id: None,
        }
    }

    pub fn at(location: GeoPoint) -> Self {
        Self {
            address: String::new(),
            location: Some(location),
            parcel_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SecondaryPayload {
    Planning(PlanningInfo),
    Tax(TaxAssessment),
    Municipal(MunicipalInfo),
    Spatial(SpatialInfo),
}

impl SecondaryPayload {
    pub fn kind(&self) -> SecondaryKind {
        match self {
            SecondaryPayload::Planning(_) => SecondaryKind::Planning,
            SecondaryPayload::Tax(_) => SecondaryKind::Tax,
            SecondaryPayload::Municipal(_) => SecondaryKind::Municipal,
            SecondaryPayload::Spatial(_) => SecondaryKind::Spatial,
        }
    }
}

#[async_trait]
pub trait TransactionFeed: Send + Sync {
    fn provider_id(&self) -> &str;

    async fn fetch_transactions(&self, query: &FeedQuery) -> Result<FeedPage, ProviderError>;
}

#[async_trait]
pub trait SecondaryProvider: Send + Sync {
    fn provider_id(&self) -> &str;
    fn kind(&self) -> SecondaryKind;

    async fn fetch(&self, key: &LookupKey) -> Result<SecondaryPayload, ProviderError>;
}

/// External quota/throttle collaborator. A refusal surfaces as an ordinary
/// provider failure.
pub trait QuotaGate: Send + Sync {
    fn try_acquire(&self, provider_id: &str) -> bool;
}

#[derive(Debug, Default)]
pub struct Unmetered;

impl QuotaGate for Unmetered {
    fn try_acquire(&self, _provider_id: &str) -> bool {
        true
    }
}

/// Process-wide token bucket shared by every provider call.
#[derive(Debug)]
pub struct TokenBucketQuota {
    bucket: SimpleTokenBucket,
}

impl TokenBucketQuota {
    pub fn new(config: TokenBucketConfig) -> Self {
        Self {
            bucket: SimpleTokenBucket::from_config(config),
        }
    }
}

impl QuotaGate for TokenBucketQuota {
    fn try_acquire(&self, _provider_id: &str) -> bool {
        self.bucket.try_take()
    }
}

fn kind_mismatch(payload: SecondaryPayload) -> ProviderError {
    ProviderError::malformed(
        payload.kind().as_str(),
        DecodeError::Shape(format!("unexpected {} payload", payload.kind().as_str())),
    )
}

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(20);

/// Uniform entry point for all provider calls. Applies the quota gate and the
/// caller-supplied timeout; never retries.
#[derive(Clone)]
pub struct ProviderGateway {
    feed: Arc<dyn TransactionFeed>,
    secondary: BTreeMap<SecondaryKind, Arc<dyn SecondaryProvider>>,
    quota: Arc<dyn QuotaGate>,
    timeout: Duration,
}

impl ProviderGateway {
    pub fn new(feed: Arc<dyn TransactionFeed>) -> Self {
        Self {
            feed,
            secondary: BTreeMap::new(),
            quota: Arc::new(Unmetered),
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    /// Register a secondary provider, replacing any previous one of the same kind.
    pub fn with_secondary(mut self, provider: Arc<dyn SecondaryProvider>) -> Self {
        self.secondary.insert(provider.kind(), provider);
        self
    }

    pub fn with_quota(mut self, quota: Arc<dyn QuotaGate>) -> Self {
        self.quota = quota;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn feed_id(&self) -> &str {
        self.feed.provider_id()
    }

    pub fn has_secondary(&self, kind: SecondaryKind) -> bool {
        self.secondary.contains_key(&kind)
    }

    async fn guarded<T>(
        &self,
        provider_id: &str,
        call: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ProviderError> {
        if !self.quota.try_acquire(provider_id) {
            return Err(ProviderError::QuotaRefused {
                provider: provider_id.to_string(),
            });
        }
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                provider: provider_id.to_string(),
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    pub async fn fetch(&self, area: &GeoRadius, lookback_months: u32) -> Result<FeedPage, ProviderError> {
        let query = FeedQuery {
            area: *area,
            lookback_months,
        };
        let provider_id = self.feed.provider_id();
        let page = self
            .guarded(provider_id, self.feed.fetch_transactions(&query))
            .await?;
        debug!(
            provider = provider_id,
            records = page.records.len(),
            rejected = page.rejected.len(),
            "primary feed page"
        );
        Ok(page)
    }

    pub async fn fetch_transactions(
        &self,
        lat: f64,
        lng: f64,
        radius_km: f64,
        months: u32,
    ) -> Result<FeedPage, ProviderError> {
        let area = GeoRadius {
            center: GeoPoint::new(lat, lng),
            radius_km,
        };
        self.fetch(&area, months).await
    }

    pub async fn fetch_secondary(
        &self,
        kind: SecondaryKind,
        key: &LookupKey,
    ) -> Result<SecondaryPayload, ProviderError> {
        let provider = self
            .secondary
            .get(&kind)
            .ok_or(ProviderError::NotConfigured(kind.as_str()))?;
        let provider_id = provider.provider_id();
        let payload = self.guarded(provider_id, provider.fetch(key)).await?;
        if payload.kind() != kind {
            return Err(ProviderError::malformed(
                provider_id,
                DecodeError::Shape(format!(
                    "expected {} payload, got {}",
                    kind.as_str(),
                    payload.kind().as_str()
                )),
            ));
        }
        Ok(payload)
    }

    pub async fn fetch_planning(&self, key: &LookupKey) -> Result<PlanningInfo, ProviderError> {
        match self.fetch_secondary(SecondaryKind::Planning, key).await? {
            SecondaryPayload::Planning(info) => Ok(info),
            other => Err(kind_mismatch(other)),
        }
    }

    pub async fn fetch_tax_assessment(&self, key: &LookupKey) -> Result<TaxAssessment, ProviderError> {
        match self.fetch_secondary(SecondaryKind::Tax, key).await? {
            SecondaryPayload::Tax(info) => Ok(info),
            other => Err(kind_mismatch(other)),
        }
    }

    pub async fn fetch_municipal(&self, key: &LookupKey) -> Result<MunicipalInfo, ProviderError> {
        match self.fetch_secondary(SecondaryKind::Municipal, key).await? {
            SecondaryPayload::Municipal(info) => Ok(info),
            other => Err(kind_mismatch(other)),
        }
    }

    pub async fn fetch_gis(&self, lat: f64, lng: f64) -> Result<SpatialInfo, ProviderError> {
        let key = LookupKey::at(GeoPoint::new(lat, lng));
        match self.fetch_secondary(SecondaryKind::Spatial, &key).await? {
            SecondaryPayload::Spatial(info) => Ok(info),
            other => Err(kind_mismatch(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowFeed;

    #[async_trait]
    impl TransactionFeed for SlowFeed {
        fn provider_id(&self) -> &str {
            "slow-feed"
        }

        async fn fetch_transactions(&self, _query: &FeedQuery) -> Result<FeedPage, ProviderError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(FeedPage::default())
        }
    }

    struct CountingFeed(AtomicUsize);

    #[async_trait]
    impl TransactionFeed for CountingFeed {
        fn provider_id(&self) -> &str {
            "counting-feed"
        }

        async fn fetch_transactions(&self, _query: &FeedQuery) -> Result<FeedPage, ProviderError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(FeedPage::default())
        }
    }

    struct Refuse;

    impl QuotaGate for Refuse {
        fn try_acquire(&self, _provider_id: &str) -> bool {
            false
        }
    }

    struct MislabeledTax;

    #[async_trait]
    impl SecondaryProvider for MislabeledTax {
        fn provider_id(&self) -> &str {
            "mislabeled"
        }

        fn kind(&self) -> SecondaryKind {
            SecondaryKind::Tax
        }

        async fn fetch(&self, _key: &LookupKey) -> Result<SecondaryPayload, ProviderError> {
            Ok(SecondaryPayload::Spatial(SpatialInfo::default()))
        }
    }

    #[tokio::test]
    async fn slow_feed_times_out_at_gateway_boundary() {
        let gateway = ProviderGateway::new(Arc::new(SlowFeed)).with_timeout(Duration::from_millis(20));
        let err = gateway.fetch_transactions(32.0, 34.8, 2.0, 6).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout { timeout_ms: 20, .. }));
    }

    #[tokio::test]
    async fn quota_refusal_is_an_ordinary_provider_error_and_skips_the_call() {
        let feed = Arc::new(CountingFeed(AtomicUsize::new(0)));
        let gateway = ProviderGateway::new(feed.clone()).with_quota(Arc::new(Refuse));
        let err = gateway.fetch_transactions(32.0, 34.8, 2.0, 6).await.unwrap_err();
        assert!(matches!(err, ProviderError::QuotaRefused { .. }));
        assert_eq!(feed.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unconfigured_secondary_kind_fails_only_that_call() {
        let gateway = ProviderGateway::new(Arc::new(CountingFeed(AtomicUsize::new(0))));
        let err = gateway.fetch_gis(32.0, 34.8).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured("spatial")));
    }

    #[tokio::test]
    async fn payload_of_wrong_kind_is_malformed() {
        let gateway =
            ProviderGateway::new(Arc::new(CountingFeed(AtomicUsize::new(0)))).with_secondary(Arc::new(MislabeledTax));
        let key = LookupKey::at(GeoPoint::new(32.0, 34.8));
        let err = gateway.fetch_tax_assessment(&key).await.unwrap_err();
        assert!(matches!(err, ProviderError::Malformed { .. }));
    }

    #[test]
    fn token_bucket_quota_refuses_after_capacity() {
        let quota = TokenBucketQuota::new(TokenBucketConfig {
            capacity: 1,
            refill_every: Duration::from_secs(3600),
        });
        assert!(quota.try_acquire("feed"));
        assert!(!quota.try_acquire("feed"));
    }
}
