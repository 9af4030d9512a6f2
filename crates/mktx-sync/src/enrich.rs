//! Secondary-attribute enrichment. Each record gets one call per secondary
//! provider, issued together; a failing provider leaves its attributes empty
//! and is listed on the result.

use std::sync::Arc;

use mktx_core::{
    ComparabilityFactors, EnrichedRecord, ReferenceProperty, SecondaryAttributes, SecondaryKind, TransactionRecord,
};
use mktx_providers::{LookupKey, ProviderError, ProviderGateway};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Location similarity is not derived from coordinates; every transaction
/// scores the same.
pub const LOCATION_SIMILARITY: f64 = 0.8;

pub const LOCATION_WEIGHT: f64 = 0.35;
pub const SIZE_WEIGHT: f64 = 0.30;
pub const AGE_WEIGHT: f64 = 0.20;
pub const CONDITION_WEIGHT: f64 = 0.15;

pub fn comparability(record: &TransactionRecord, reference: &ReferenceProperty) -> ComparabilityFactors {
    let size = if reference.area_sqm > 0.0 {
        1.0 - ((record.area_sqm - reference.area_sqm).abs() / reference.area_sqm).min(1.0)
    } else {
        0.0
    };
    // A transaction with no recorded age is treated as new.
    let tx_age = f64::from(record.age_years.unwrap_or(0));
    let ref_age = f64::from(reference.age_years);
    let age = 1.0 - ((tx_age - ref_age).abs() / ref_age.max(1.0)).min(1.0);
    let condition = if record.condition == reference.condition { 1.0 } else { 0.5 };
    let location = LOCATION_SIMILARITY;

    ComparabilityFactors {
        location,
        size,
        age,
        condition,
        overall: LOCATION_WEIGHT * location + SIZE_WEIGHT * size + AGE_WEIGHT * age + CONDITION_WEIGHT * condition,
    }
}

#[derive(Clone)]
pub struct Enricher {
    gateway: ProviderGateway,
    concurrency: usize,
}

impl Enricher {
    pub fn new(gateway: ProviderGateway) -> Self {
        Self { gateway, concurrency: 4 }
    }

    /// Bound on how many records are enriched at once by [`Enricher::enrich_all`].
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Never fails: provider errors are logged and recorded in `failed_providers`.
    pub async fn enrich(&self, record: TransactionRecord, reference: Option<&ReferenceProperty>) -> EnrichedRecord {
        let key = LookupKey::for_record(&record);
        let spatial = async {
            match record.location {
                Some(point) => self.gateway.fetch_gis(point.lat, point.lng).await,
                None => Err(ProviderError::unavailable(
                    SecondaryKind::Spatial.as_str(),
                    format!("no coordinates for `{}`", record.address),
                )),
            }
        };
        let (planning, tax, municipal, spatial) = tokio::join!(
            self.gateway.fetch_planning(&key),
            self.gateway.fetch_tax_assessment(&key),
            self.gateway.fetch_municipal(&key),
            spatial,
        );

        let mut failed_providers = Vec::new();
        let attributes = SecondaryAttributes {
            planning: settle(&record, SecondaryKind::Planning, planning, &mut failed_providers),
            tax: settle(&record, SecondaryKind::Tax, tax, &mut failed_providers),
            municipal: settle(&record, SecondaryKind::Municipal, municipal, &mut failed_providers),
            spatial: settle(&record, SecondaryKind::Spatial, spatial, &mut failed_providers),
        };
        let comparability = reference.map(|reference| comparability(&record, reference));

        EnrichedRecord {
            record,
            attributes,
            comparability,
            failed_providers,
        }
    }

    /// Enrich many records with at most `concurrency` in flight. Output order
    /// follows input order.
    pub async fn enrich_all(
        &self,
        records: Vec<TransactionRecord>,
        reference: Option<ReferenceProperty>,
    ) -> Vec<EnrichedRecord> {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let reference = reference.map(Arc::new);
        let mut tasks = JoinSet::new();
        let total = records.len();

        for (index, record) in records.into_iter().enumerate() {
            let enricher = self.clone();
            let permits = Arc::clone(&permits);
            let reference = reference.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (index, enricher.enrich(record, reference.as_deref()).await)
            });
        }

        let mut enriched = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(pair) => enriched.push(pair),
                Err(err) => warn!(error = %err, "enrichment task did not complete"),
            }
        }
        enriched.sort_by_key(|(index, _)| *index);
        enriched.into_iter().map(|(_, record)| record).collect()
    }
}

fn settle<T>(
    record: &TransactionRecord,
    kind: SecondaryKind,
    outcome: Result<T, ProviderError>,
    failed: &mut Vec<SecondaryKind>,
) -> Option<T> {
    match outcome {
        Ok(value) => {
            debug!(record = %record.id, provider = kind.as_str(), "secondary attributes attached");
            Some(value)
        }
        Err(err) => {
            warn!(record = %record.id, provider = kind.as_str(), error = %err, "secondary provider failed");
            failed.push(kind);
            None
        }
    }
}
