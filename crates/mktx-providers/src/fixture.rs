//! Fixture-backed providers. The appraisal system only ever talks to simulated
//! government endpoints, so these are first-class providers, not test doubles.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Months, NaiveDate, Utc};
use mktx_core::{RecordSource, SecondaryKind};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::decode::{decode_feed_page, decode_secondary};
use crate::{FeedPage, FeedQuery, LookupKey, ProviderError, SecondaryPayload, SecondaryProvider, TransactionFeed};

#[derive(Debug, Clone, Deserialize)]
struct FeedFixtureFile {
    provider_id: String,
    #[serde(default)]
    source: Option<String>,
    /// Lookback windows are anchored here; defaults to today.
    #[serde(default)]
    reference_date: Option<NaiveDate>,
    records: JsonValue,
}

#[derive(Debug, Clone, Deserialize)]
struct SecondaryFixtureFile {
    provider_id: String,
    kind: SecondaryKind,
    entries: BTreeMap<String, JsonValue>,
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

/// Primary feed served from a JSON fixture. Decoding happens per call so that
/// malformed entries are reported on every run that sees them.
#[derive(Debug, Clone)]
pub struct FixtureFeed {
    provider_id: String,
    default_source: RecordSource,
    reference_date: Option<NaiveDate>,
    records: JsonValue,
}

impl FixtureFeed {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file: FeedFixtureFile = read_json_file(path)?;
        let default_source = match file.source.as_deref() {
            Some(label) => RecordSource::from_label(label)
                .with_context(|| format!("unknown source `{label}` in {}", path.display()))?,
            None => RecordSource::Platform,
        };
        Ok(Self {
            provider_id: file.provider_id,
            default_source,
            reference_date: file.reference_date,
            records: file.records,
        })
    }

    pub fn from_value(provider_id: impl Into<String>, default_source: RecordSource, records: JsonValue) -> Self {
        Self {
            provider_id: provider_id.into(),
            default_source,
            reference_date: None,
            records,
        }
    }

    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }
}

#[async_trait]
impl TransactionFeed for FixtureFeed {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn fetch_transactions(&self, query: &FeedQuery) -> Result<FeedPage, ProviderError> {
        let mut page = decode_feed_page(&self.records, self.default_source)
            .map_err(|err| ProviderError::malformed(&self.provider_id, err))?;

        let anchor = self.reference_date.unwrap_or_else(|| Utc::now().date_naive());
        let since = anchor
            .checked_sub_months(Months::new(query.lookback_months))
            .unwrap_or(NaiveDate::MIN);

        page.records.retain(|record| {
            let in_area = record
                .location
                .map(|point| query.area.contains(&point))
                .unwrap_or(false);
            in_area && record.transaction_date >= since && record.transaction_date <= anchor
        });
        Ok(page)
    }
}

/// Secondary provider answering from a fixture keyed by address, parcel id, or
/// `lat,lng` rounded to four decimals.
#[derive(Debug, Clone)]
pub struct FixtureSecondary {
    provider_id: String,
    kind: SecondaryKind,
    entries: BTreeMap<String, JsonValue>,
}

impl FixtureSecondary {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file: SecondaryFixtureFile = read_json_file(path.as_ref())?;
        Ok(Self {
            provider_id: file.provider_id,
            kind: file.kind,
            entries: file.entries,
        })
    }

    pub fn new(provider_id: impl Into<String>, kind: SecondaryKind, entries: BTreeMap<String, JsonValue>) -> Self {
        Self {
            provider_id: provider_id.into(),
            kind,
            entries,
        }
    }

    fn lookup(&self, key: &LookupKey) -> Option<&JsonValue> {
        let coordinate_key = key
            .location
            .map(|point| format!("{:.4},{:.4}", point.lat, point.lng));
        [key.parcel_id.clone(), coordinate_key, Some(key.address.clone())]
            .into_iter()
            .flatten()
            .find_map(|k| self.entries.get(&k))
    }
}

#[async_trait]
impl SecondaryProvider for FixtureSecondary {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn kind(&self) -> SecondaryKind {
        self.kind
    }

    async fn fetch(&self, key: &LookupKey) -> Result<SecondaryPayload, ProviderError> {
        let entry = self.lookup(key).ok_or_else(|| {
            ProviderError::unavailable(&self.provider_id, format!("no entry for `{}`", key.address))
        })?;
        decode_secondary(self.kind, entry).map_err(|err| ProviderError::malformed(&self.provider_id, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mktx_core::{GeoPoint, GeoRadius};
    use serde_json::json;

    fn query(lookback_months: u32) -> FeedQuery {
        FeedQuery {
            area: GeoRadius {
                center: GeoPoint::new(32.08, 34.78),
                radius_km: 2.0,
            },
            lookback_months,
        }
    }

    #[tokio::test]
    async fn feed_applies_area_and_lookback() {
        let feed = FixtureFeed::from_value(
            "registry-fixture",
            RecordSource::LandRegistry,
            json!([
                {"id": "near-recent", "address": "1 A St", "date": "2024-05-01", "price": 100, "lat": 32.081, "lng": 34.781},
                {"id": "near-old", "address": "2 B St", "date": "2023-01-01", "price": 100, "lat": 32.081, "lng": 34.781},
                {"id": "far", "address": "3 C St", "date": "2024-05-01", "price": 100, "lat": 31.77, "lng": 35.21},
                {"id": "nowhere", "address": "4 D St", "date": "2024-05-01", "price": 100}
            ]),
        )
        .with_reference_date(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap());

        let page = feed.fetch_transactions(&query(6)).await.unwrap();
        let ids: Vec<_> = page.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["near-recent"]);
    }

    #[tokio::test]
    async fn secondary_prefers_parcel_then_coordinates_then_address() {
        let mut entries = BTreeMap::new();
        entries.insert("32.0800,34.7800".to_string(), json!({"elevation_m": 12.0}));
        entries.insert("1 A St".to_string(), json!({"elevation_m": 99.0}));
        let provider = FixtureSecondary::new("gis-fixture", SecondaryKind::Spatial, entries);

        let key = LookupKey {
            address: "1 A St".into(),
            location: Some(GeoPoint::new(32.08, 34.78)),
            parcel_id: None,
        };
        match provider.fetch(&key).await.unwrap() {
            SecondaryPayload::Spatial(info) => assert_eq!(info.elevation_m, Some(12.0)),
            other => panic!("unexpected payload {other:?}"),
        }

        let missing = LookupKey::by_address("9 Z St");
        assert!(matches!(
            provider.fetch(&missing).await,
            Err(ProviderError::Unavailable { .. })
        ));
    }
}
