//! Core domain model for market-transaction ingestion, enrichment, and statistics.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "mktx-core";

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Great-circle distance (haversine).
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropertyType {
    Apartment,
    GardenApartment,
    Penthouse,
    Duplex,
    House,
    Studio,
    Commercial,
    Land,
    Unknown,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Apartment => "apartment",
            PropertyType::GardenApartment => "garden-apartment",
            PropertyType::Penthouse => "penthouse",
            PropertyType::Duplex => "duplex",
            PropertyType::House => "house",
            PropertyType::Studio => "studio",
            PropertyType::Commercial => "commercial",
            PropertyType::Land => "land",
            PropertyType::Unknown => "unknown",
        }
    }

    /// Lenient label parsing used by provider decoders; unrecognized labels map to `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().replace(['_', ' '], "-").as_str() {
            "apartment" | "flat" | "unit" => PropertyType::Apartment,
            "garden-apartment" | "garden" => PropertyType::GardenApartment,
            "penthouse" => PropertyType::Penthouse,
            "duplex" => PropertyType::Duplex,
            "house" | "cottage" | "villa" | "detached" | "semi-detached" => PropertyType::House,
            "studio" => PropertyType::Studio,
            "commercial" | "office" | "retail" => PropertyType::Commercial,
            "land" | "plot" | "lot" => PropertyType::Land,
            _ => PropertyType::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Condition {
    New,
    Renovated,
    Good,
    Fair,
    NeedsRenovation,
    Unknown,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::New => "new",
            Condition::Renovated => "renovated",
            Condition::Good => "good",
            Condition::Fair => "fair",
            Condition::NeedsRenovation => "needs-renovation",
            Condition::Unknown => "unknown",
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().replace(['_', ' '], "-").as_str() {
            "new" | "from-contractor" => Condition::New,
            "renovated" => Condition::Renovated,
            "good" | "maintained" => Condition::Good,
            "fair" | "average" => Condition::Fair,
            "needs-renovation" | "poor" => Condition::NeedsRenovation,
            _ => Condition::Unknown,
        }
    }
}

/// Provenance of a transaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordSource {
    LandRegistry,
    TaxAuthority,
    Broker,
    Platform,
}

impl RecordSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordSource::LandRegistry => "land-registry",
            RecordSource::TaxAuthority => "tax-authority",
            RecordSource::Broker => "broker",
            RecordSource::Platform => "platform",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().replace(['_', ' '], "-").as_str() {
            "land-registry" | "registry" => Some(RecordSource::LandRegistry),
            "tax-authority" | "tax" => Some(RecordSource::TaxAuthority),
            "broker" => Some(RecordSource::Broker),
            "platform" => Some(RecordSource::Platform),
            _ => None,
        }
    }
}

/// An observed market transaction, normalized from a provider payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    pub transaction_date: NaiveDate,
    pub price: f64,
    pub price_per_sqm: f64,
    pub address: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub neighborhood: Option<String>,
    pub property_type: PropertyType,
    #[serde(default)]
    pub rooms: Option<f64>,
    #[serde(default)]
    pub floor: Option<i32>,
    #[serde(default)]
    pub total_floors: Option<i32>,
    pub area_sqm: f64,
    pub condition: Condition,
    #[serde(default)]
    pub age_years: Option<u32>,
    #[serde(default)]
    pub features: Vec<String>,
    pub verified: bool,
    pub source: RecordSource,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoRadius {
    pub center: GeoPoint,
    pub radius_km: f64,
}

impl GeoRadius {
    pub fn contains(&self, point: &GeoPoint) -> bool {
        self.center.distance_km(point) <= self.radius_km
    }
}

/// Inclusive range; a missing bound is unbounded on that side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange<T> {
    #[serde(default)]
    pub min: Option<T>,
    #[serde(default)]
    pub max: Option<T>,
}

impl<T: PartialOrd + Copy> ValueRange<T> {
    pub fn between(min: T, max: T) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn contains(&self, value: T) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

/// Optional multi-criterion constraints. Absent constraints are not checked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSpec {
    pub location: Option<GeoRadius>,
    pub property_types: Option<Vec<PropertyType>>,
    pub price: Option<ValueRange<f64>>,
    pub area: Option<ValueRange<f64>>,
    pub rooms: Option<Vec<f64>>,
    pub floor: Option<ValueRange<i32>>,
    pub conditions: Option<Vec<Condition>>,
    pub max_age_years: Option<u32>,
    pub verified_only: bool,
    pub sources: Option<Vec<RecordSource>>,
}

impl FilterSpec {
    pub fn is_empty(&self) -> bool {
        *self == FilterSpec::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Manual,
    Daily,
    Weekly,
    Monthly,
}

impl Cadence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Manual => "manual",
            Cadence::Daily => "daily",
            Cadence::Weekly => "weekly",
            Cadence::Monthly => "monthly",
        }
    }
}

/// A named geographic area a sync run fetches independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub center: GeoPoint,
    pub radius_km: f64,
}

impl Region {
    pub fn area(&self) -> GeoRadius {
        GeoRadius {
            center: self.center,
            radius_km: self.radius_km,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_lookback_months() -> u32 {
    6
}

/// A recurring import job. `next_run` is always after the instant it was computed
/// from, or `None` for manual cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJobConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub cadence: Cadence,
    #[serde(default)]
    pub filter: FilterSpec,
    #[serde(default = "default_lookback_months")]
    pub lookback_months: u32,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub notify: bool,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub regions: Vec<Region>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
    Duplicate,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
            ReviewStatus::Duplicate => "duplicate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedRecord {
    pub import_id: Uuid,
    pub config_id: String,
    pub imported_at: DateTime<Utc>,
    pub status: ReviewStatus,
    #[serde(default)]
    pub duplicate_of: Option<Uuid>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub record: TransactionRecord,
}

impl ImportedRecord {
    pub fn new(
        record: TransactionRecord,
        config_id: impl Into<String>,
        imported_at: DateTime<Utc>,
        auto_approve: bool,
    ) -> Self {
        Self {
            import_id: Uuid::new_v4(),
            config_id: config_id.into(),
            imported_at,
            status: if auto_approve {
                ReviewStatus::Approved
            } else {
                ReviewStatus::Pending
            },
            duplicate_of: None,
            tags: Vec::new(),
            record,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }
}

/// Immutable summary of one single-config import run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRunResult {
    pub run_id: Uuid,
    pub config_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub total_fetched: usize,
    pub new_records: usize,
    pub duplicates: usize,
    pub filtered_out: usize,
    pub errored: usize,
    pub status: RunStatus,
    pub errors: Vec<String>,
    pub imported: Vec<ImportedRecord>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataQuality {
    pub verified: usize,
    pub unverified: usize,
    pub complete: usize,
    pub incomplete: usize,
}

/// Immutable summary of one multi-region sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRunResult {
    pub run_id: Uuid,
    pub config_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub regions_processed: usize,
    pub total_records: usize,
    pub new_records: usize,
    pub duplicates: usize,
    pub filtered_out: usize,
    pub errors: usize,
    pub error_messages: Vec<String>,
    pub quality: DataQuality,
    pub status: RunStatus,
    pub imported: Vec<ImportedRecord>,
    #[serde(default)]
    pub enriched: Vec<EnrichedRecord>,
    pub statistics: StatisticsSnapshot,
    pub trend: TrendSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecondaryKind {
    Planning,
    Tax,
    Municipal,
    Spatial,
}

impl SecondaryKind {
    pub const ALL: [SecondaryKind; 4] = [
        SecondaryKind::Planning,
        SecondaryKind::Tax,
        SecondaryKind::Municipal,
        SecondaryKind::Spatial,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SecondaryKind::Planning => "planning",
            SecondaryKind::Tax => "tax",
            SecondaryKind::Municipal => "municipal",
            SecondaryKind::Spatial => "spatial",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanningInfo {
    pub status: Option<String>,
    pub zoning: Option<String>,
    pub building_rights_sqm: Option<f64>,
    pub building_rights_pct: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxAssessment {
    pub assessed_value: f64,
    pub assessment_year: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MunicipalInfo {
    pub neighborhood_code: Option<String>,
    pub statistical_area: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpatialInfo {
    pub elevation_m: Option<f64>,
    pub view_quality: Option<String>,
}

/// Secondary attributes; each part is present only if its provider call succeeded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecondaryAttributes {
    pub planning: Option<PlanningInfo>,
    pub tax: Option<TaxAssessment>,
    pub municipal: Option<MunicipalInfo>,
    pub spatial: Option<SpatialInfo>,
}

impl SecondaryAttributes {
    pub fn is_empty(&self) -> bool {
        self.planning.is_none() && self.tax.is_none() && self.municipal.is_none() && self.spatial.is_none()
    }
}

/// Existing property profile that transactions are compared against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceProperty {
    pub address: String,
    pub area_sqm: f64,
    pub age_years: u32,
    pub condition: Condition,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComparabilityFactors {
    pub location: f64,
    pub size: f64,
    pub age: f64,
    pub condition: f64,
    pub overall: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub record: TransactionRecord,
    pub attributes: SecondaryAttributes,
    pub comparability: Option<ComparabilityFactors>,
    #[serde(default)]
    pub failed_providers: Vec<SecondaryKind>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub average_price_per_sqm: f64,
    pub median_price_per_sqm: f64,
    pub min_price_per_sqm: f64,
    pub max_price_per_sqm: f64,
    pub count: usize,
    /// `YYYY-MM` -> record count.
    pub by_month: BTreeMap<String, usize>,
    pub by_category: BTreeMap<PropertyType, f64>,
}

/// Percentage changes; 0 when either side of a comparison has no data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendSnapshot {
    pub three_month_change_pct: f64,
    pub six_month_change_pct: f64,
    pub twelve_month_change_pct: f64,
    pub volume_change_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketValueEstimate {
    pub target_date: NaiveDate,
    pub property_type: PropertyType,
    pub area_sqm: f64,
    pub value_per_sqm: f64,
    pub total_value: f64,
    pub confidence: Confidence,
    pub sample_count: usize,
    pub range_min: f64,
    pub range_max: f64,
}

impl MarketValueEstimate {
    pub fn empty(target_date: NaiveDate, area_sqm: f64, property_type: PropertyType) -> Self {
        Self {
            target_date,
            property_type,
            area_sqm,
            value_per_sqm: 0.0,
            total_value: 0.0,
            confidence: Confidence::Low,
            sample_count: 0,
            range_min: 0.0,
            range_max: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_between_nearby_points_is_small() {
        let a = GeoPoint::new(32.0853, 34.7818);
        let b = GeoPoint::new(32.0900, 34.7818);
        let d = a.distance_km(&b);
        assert!(d > 0.4 && d < 0.6, "got {d}");
        assert_eq!(a.distance_km(&a), 0.0);
    }

    #[test]
    fn open_ended_range_checks_only_present_bounds() {
        let r = ValueRange {
            min: Some(10.0),
            max: None,
        };
        assert!(r.contains(10.0));
        assert!(r.contains(1e9));
        assert!(!r.contains(9.99));
    }

    #[test]
    fn labels_map_aliases() {
        assert_eq!(PropertyType::from_label("Garden Apartment"), PropertyType::GardenApartment);
        assert_eq!(PropertyType::from_label("spaceship"), PropertyType::Unknown);
        assert_eq!(Condition::from_label("needs_renovation"), Condition::NeedsRenovation);
        assert_eq!(RecordSource::from_label("Land Registry"), Some(RecordSource::LandRegistry));
        assert_eq!(RecordSource::from_label("gossip"), None);
    }

    #[test]
    fn confidence_orders_low_to_high() {
        assert!(Confidence::Low < Confidence::Medium);
        assert!(Confidence::Medium < Confidence::High);
    }

    #[test]
    fn job_config_defaults_fill_missing_fields() {
        let config: ImportJobConfig =
            serde_json::from_str(r#"{"id":"tlv","cadence":"weekly"}"#).unwrap();
        assert!(config.enabled);
        assert_eq!(config.lookback_months, 6);
        assert!(config.filter.is_empty());
        assert!(config.next_run.is_none());
    }

    #[test]
    fn statistics_snapshot_serializes_category_keys() {
        let mut snapshot = StatisticsSnapshot::default();
        snapshot.by_category.insert(PropertyType::GardenApartment, 100.0);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"garden-apartment\":100.0"));
    }
}
