//! JSON-over-HTTP providers on top of the shared [`HttpFetcher`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use mktx_core::{RecordSource, SecondaryKind};
use mktx_storage::{ArtifactStore, HttpFetcher, Url};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::decode::{decode_feed_page, decode_secondary};
use crate::{DecodeError, FeedPage, FeedQuery, LookupKey, ProviderError, SecondaryPayload, SecondaryProvider, TransactionFeed};

async fn get_json(
    fetcher: &HttpFetcher,
    archive: Option<&ArtifactStore>,
    provider_id: &str,
    url: Url,
) -> Result<JsonValue, ProviderError> {
    let response = fetcher
        .fetch_bytes(provider_id, url.as_str())
        .await
        .map_err(|err| ProviderError::from_fetch(provider_id, err, fetcher.timeout()))?;

    if let Some(store) = archive {
        if let Err(err) = store.archive(Utc::now(), provider_id, "json", &response.body).await {
            warn!(provider = provider_id, error = %err, "failed to archive provider payload");
        }
    }

    serde_json::from_slice(&response.body)
        .map_err(|err| ProviderError::malformed(provider_id, DecodeError::Json(err)))
}

fn parse_base(provider_id: &str, base_url: &str) -> Result<Url, ProviderError> {
    Url::parse(base_url)
        .map_err(|err| ProviderError::unavailable(provider_id, format!("invalid base url `{base_url}`: {err}")))
}

/// Primary feed queried as `GET <base>?lat=..&lng=..&radius_km=..&months=..`.
#[derive(Debug, Clone)]
pub struct HttpFeed {
    provider_id: String,
    base_url: String,
    default_source: RecordSource,
    fetcher: Arc<HttpFetcher>,
    archive: Option<ArtifactStore>,
}

impl HttpFeed {
    pub fn new(
        provider_id: impl Into<String>,
        base_url: impl Into<String>,
        default_source: RecordSource,
        fetcher: Arc<HttpFetcher>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            base_url: base_url.into(),
            default_source,
            fetcher,
            archive: None,
        }
    }

    pub fn with_archive(mut self, store: ArtifactStore) -> Self {
        self.archive = Some(store);
        self
    }

    pub fn request_url(&self, query: &FeedQuery) -> Result<Url, ProviderError> {
        let mut url = parse_base(&self.provider_id, &self.base_url)?;
        url.query_pairs_mut()
            .append_pair("lat", &query.area.center.lat.to_string())
            .append_pair("lng", &query.area.center.lng.to_string())
            .append_pair("radius_km", &query.area.radius_km.to_string())
            .append_pair("months", &query.lookback_months.to_string());
        Ok(url)
    }
}

#[async_trait]
impl TransactionFeed for HttpFeed {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn fetch_transactions(&self, query: &FeedQuery) -> Result<FeedPage, ProviderError> {
        let url = self.request_url(query)?;
        let body = get_json(&self.fetcher, self.archive.as_ref(), &self.provider_id, url).await?;
        decode_feed_page(&body, self.default_source).map_err(|err| ProviderError::malformed(&self.provider_id, err))
    }
}

/// Secondary provider queried with whichever locators the key carries.
#[derive(Debug, Clone)]
pub struct HttpSecondary {
    provider_id: String,
    kind: SecondaryKind,
    base_url: String,
    fetcher: Arc<HttpFetcher>,
    archive: Option<ArtifactStore>,
}

impl HttpSecondary {
    pub fn new(
        provider_id: impl Into<String>,
        kind: SecondaryKind,
        base_url: impl Into<String>,
        fetcher: Arc<HttpFetcher>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            kind,
            base_url: base_url.into(),
            fetcher,
            archive: None,
        }
    }

    pub fn with_archive(mut self, store: ArtifactStore) -> Self {
        self.archive = Some(store);
        self
    }

    pub fn request_url(&self, key: &LookupKey) -> Result<Url, ProviderError> {
        let mut url = parse_base(&self.provider_id, &self.base_url)?;
        {
            let mut pairs = url.query_pairs_mut();
            if !key.address.is_empty() {
                pairs.append_pair("address", &key.address);
            }
            if let Some(parcel) = &key.parcel_id {
                pairs.append_pair("parcel_id", parcel);
            }
            if let Some(point) = key.location {
                pairs
                    .append_pair("lat", &point.lat.to_string())
                    .append_pair("lng", &point.lng.to_string());
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl SecondaryProvider for HttpSecondary {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn kind(&self) -> SecondaryKind {
        self.kind
    }

    async fn fetch(&self, key: &LookupKey) -> Result<SecondaryPayload, ProviderError> {
        let url = self.request_url(key)?;
        let body = get_json(&self.fetcher, self.archive.as_ref(), &self.provider_id, url).await?;
        decode_secondary(self.kind, &body).map_err(|err| ProviderError::malformed(&self.provider_id, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mktx_core::{GeoPoint, GeoRadius};
    use mktx_storage::HttpClientConfig;

    fn fetcher() -> Arc<HttpFetcher> {
        Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn timeout_reports_the_fetcher_limit() {
        // Accepts connections into the backlog but never answers.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}/deals", listener.local_addr().unwrap());
        let fetcher = Arc::new(
            HttpFetcher::new(HttpClientConfig {
                timeout: std::time::Duration::from_millis(150),
                ..HttpClientConfig::default()
            })
            .unwrap(),
        );
        let feed = HttpFeed::new("registry", base, RecordSource::LandRegistry, fetcher);
        let query = FeedQuery {
            area: GeoRadius {
                center: GeoPoint::new(32.5, 34.9),
                radius_km: 1.0,
            },
            lookback_months: 6,
        };

        match feed.fetch_transactions(&query).await {
            Err(ProviderError::Timeout { provider, timeout_ms }) => {
                assert_eq!(provider, "registry");
                assert_eq!(timeout_ms, 150);
            }
            other => panic!("expected a timeout, got {other:?}"),
        }
        drop(listener);
    }

    #[test]
    fn feed_url_carries_area_and_lookback() {
        let feed = HttpFeed::new(
            "registry",
            "https://registry.example/api/deals",
            RecordSource::LandRegistry,
            fetcher(),
        );
        let url = feed
            .request_url(&FeedQuery {
                area: GeoRadius {
                    center: GeoPoint::new(32.5, 34.9),
                    radius_km: 1.5,
                },
                lookback_months: 12,
            })
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://registry.example/api/deals?lat=32.5&lng=34.9&radius_km=1.5&months=12"
        );
    }

    #[test]
    fn secondary_url_encodes_address() {
        let provider = HttpSecondary::new("tax", SecondaryKind::Tax, "https://tax.example/assess", fetcher());
        let url = provider.request_url(&LookupKey::by_address("5 Dizengoff St")).unwrap();
        assert_eq!(url.as_str(), "https://tax.example/assess?address=5+Dizengoff+St");
    }

    #[test]
    fn invalid_base_url_is_a_provider_error() {
        let provider = HttpSecondary::new("tax", SecondaryKind::Tax, "not a url", fetcher());
        assert!(matches!(
            provider.request_url(&LookupKey::by_address("x")),
            Err(ProviderError::Unavailable { .. })
        ));
    }
}
