//! Per-provider decoders from loosely shaped JSON payloads into normalized records.
//!
//! Providers disagree on field names (`deal_amount` vs `price`, `asset_type` vs
//! `property_type`); every alias a decoder accepts is listed at its call site.

use chrono::{Datelike, NaiveDate};
use mktx_core::{
    Condition, GeoPoint, MunicipalInfo, PlanningInfo, PropertyType, RecordSource, SecondaryKind, SpatialInfo,
    TaxAssessment, TransactionRecord,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{DecodeError, FeedPage, RejectedEntry, SecondaryPayload};

fn first_present<'a>(value: &'a JsonValue, keys: &[&str]) -> Option<&'a JsonValue> {
    keys.iter()
        .filter_map(|key| value.get(*key))
        .find(|v| !v.is_null())
}

const ID_KEYS: &[&str] = &["id", "deal_id", "transaction_id"];

fn json_str<'a>(value: &'a JsonValue, keys: &[&str]) -> Option<&'a str> {
    first_present(value, keys)
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Numbers may arrive as JSON numbers or as numeric strings with thousands separators.
fn json_f64(value: &JsonValue, keys: &[&str]) -> Option<f64> {
    let parsed = match first_present(value, keys)? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.replace([',', ' '], "").parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn json_i64(value: &JsonValue, keys: &[&str]) -> Option<i64> {
    json_f64(value, keys).map(|v| v.round() as i64)
}

fn json_bool(value: &JsonValue, keys: &[&str]) -> Option<bool> {
    match first_present(value, keys)? {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        JsonValue::Number(n) => n.as_i64().map(|v| v != 0),
        _ => None,
    }
}

fn json_string_vec(value: &JsonValue, keys: &[&str]) -> Vec<String> {
    first_present(value, keys)
        .and_then(JsonValue::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(ToString::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(day, "%d/%m/%Y"))
        .ok()
}

fn decode_location(value: &JsonValue) -> Option<GeoPoint> {
    let nested = value.get("location").filter(|v| v.is_object());
    let source = nested.unwrap_or(value);
    let lat = json_f64(source, &["lat", "latitude"])?;
    let lng = json_f64(source, &["lng", "lon", "longitude"])?;
    Some(GeoPoint::new(lat, lng))
}

fn synthetic_id(address: &str, date: NaiveDate, price: f64) -> String {
    let key = format!("{address}|{date}|{price:.0}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

/// Decode one primary-feed transaction. `default_source` applies when the payload
/// carries no provenance tag of its own.
pub fn decode_transaction(value: &JsonValue, default_source: RecordSource) -> Result<TransactionRecord, DecodeError> {
    if !value.is_object() {
        return Err(DecodeError::Shape("transaction is not an object".into()));
    }

    let address = json_str(value, &["address", "full_address", "street_address"])
        .ok_or(DecodeError::MissingField("address"))?
        .to_string();
    let raw_date = json_str(value, &["transaction_date", "deal_date", "date"])
        .ok_or(DecodeError::MissingField("transaction_date"))?;
    let transaction_date = parse_date(raw_date).ok_or_else(|| DecodeError::InvalidField {
        field: "transaction_date",
        value: raw_date.to_string(),
    })?;
    let price = json_f64(value, &["price", "deal_amount", "total_price"])
        .ok_or(DecodeError::MissingField("price"))?;
    if price < 0.0 {
        return Err(DecodeError::InvalidField {
            field: "price",
            value: price.to_string(),
        });
    }
    let area_sqm = json_f64(value, &["area_sqm", "area", "built_area"]).unwrap_or(0.0);
    let price_per_sqm = json_f64(value, &["price_per_sqm", "price_per_meter"])
        .unwrap_or_else(|| if area_sqm > 0.0 { price / area_sqm } else { 0.0 });

    let age_years = json_i64(value, &["age_years", "building_age"])
        .or_else(|| json_i64(value, &["year_built", "build_year"]).map(|year| i64::from(transaction_date.year()) - year))
        .and_then(|age| u32::try_from(age).ok());

    let source = match json_str(value, &["source", "provenance"]) {
        Some(label) => RecordSource::from_label(label).ok_or_else(|| DecodeError::InvalidField {
            field: "source",
            value: label.to_string(),
        })?,
        None => default_source,
    };

    let id = json_str(value, ID_KEYS)
        .map(ToString::to_string)
        .unwrap_or_else(|| synthetic_id(&address, transaction_date, price));

    Ok(TransactionRecord {
        id,
        transaction_date,
        price,
        price_per_sqm,
        city: json_str(value, &["city", "settlement"]).map(ToString::to_string),
        neighborhood: json_str(value, &["neighborhood", "quarter"]).map(ToString::to_string),
        property_type: json_str(value, &["property_type", "asset_type"])
            .map(PropertyType::from_label)
            .unwrap_or(PropertyType::Unknown),
        rooms: json_f64(value, &["rooms", "room_count"]),
        floor: json_i64(value, &["floor"]).and_then(|v| i32::try_from(v).ok()),
        total_floors: json_i64(value, &["total_floors", "building_floors"]).and_then(|v| i32::try_from(v).ok()),
        area_sqm,
        condition: json_str(value, &["condition"])
            .map(Condition::from_label)
            .unwrap_or(Condition::Unknown),
        age_years,
        features: json_string_vec(value, &["features", "amenities"]),
        verified: json_bool(value, &["verified", "is_verified"]).unwrap_or(false),
        source,
        location: decode_location(value),
        address,
    })
}

/// Decode a feed response: either a bare array or an object wrapping the array
/// under `records`, `deals`, or `transactions`. Entries that fail to decode are
/// collected as rejects rather than failing the page.
pub fn decode_feed_page(value: &JsonValue, default_source: RecordSource) -> Result<FeedPage, DecodeError> {
    let items = match value {
        JsonValue::Array(items) => items,
        JsonValue::Object(_) => first_present(value, &["records", "deals", "transactions"])
            .and_then(JsonValue::as_array)
            .ok_or_else(|| DecodeError::Shape("feed object has no records array".into()))?,
        _ => return Err(DecodeError::Shape("feed payload is neither array nor object".into())),
    };

    let mut page = FeedPage::default();
    for item in items {
        match decode_transaction(item, default_source) {
            Ok(record) => page.records.push(record),
            Err(error) => page.rejected.push(RejectedEntry {
                key: json_str(item, ID_KEYS).map_or_else(|| item.to_string(), ToString::to_string),
                error,
            }),
        }
    }
    Ok(page)
}

pub fn decode_planning(value: &JsonValue) -> Result<PlanningInfo, DecodeError> {
    let info = PlanningInfo {
        status: json_str(value, &["status", "plan_status"]).map(ToString::to_string),
        zoning: json_str(value, &["zoning", "designation", "land_use"]).map(ToString::to_string),
        building_rights_sqm: json_f64(value, &["building_rights_sqm", "rights_sqm"]),
        building_rights_pct: json_f64(value, &["building_rights_pct", "rights_percent"]),
    };
    if info == PlanningInfo::default() {
        return Err(DecodeError::Shape("planning payload carries no known fields".into()));
    }
    Ok(info)
}

pub fn decode_tax(value: &JsonValue) -> Result<TaxAssessment, DecodeError> {
    let assessed_value = json_f64(value, &["assessed_value", "assessment", "value"])
        .ok_or(DecodeError::MissingField("assessed_value"))?;
    Ok(TaxAssessment {
        assessed_value,
        assessment_year: json_i64(value, &["assessment_year", "year"]).and_then(|v| i32::try_from(v).ok()),
    })
}

pub fn decode_municipal(value: &JsonValue) -> Result<MunicipalInfo, DecodeError> {
    let info = MunicipalInfo {
        neighborhood_code: json_str(value, &["neighborhood_code", "quarter_code"]).map(ToString::to_string),
        statistical_area: json_str(value, &["statistical_area", "stat_area"]).map(ToString::to_string),
    };
    if info == MunicipalInfo::default() {
        return Err(DecodeError::Shape("municipal payload carries no known fields".into()));
    }
    Ok(info)
}

pub fn decode_spatial(value: &JsonValue) -> Result<SpatialInfo, DecodeError> {
    let info = SpatialInfo {
        elevation_m: json_f64(value, &["elevation_m", "elevation", "height"]),
        view_quality: json_str(value, &["view_quality", "view"]).map(ToString::to_string),
    };
    if info == SpatialInfo::default() {
        return Err(DecodeError::Shape("spatial payload carries no known fields".into()));
    }
    Ok(info)
}

pub fn decode_secondary(kind: SecondaryKind, value: &JsonValue) -> Result<SecondaryPayload, DecodeError> {
    Ok(match kind {
        SecondaryKind::Planning => SecondaryPayload::Planning(decode_planning(value)?),
        SecondaryKind::Tax => SecondaryPayload::Tax(decode_tax(value)?),
        SecondaryKind::Municipal => SecondaryPayload::Municipal(decode_municipal(value)?),
        SecondaryKind::Spatial => SecondaryPayload::Spatial(decode_spatial(value)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn aliases_map_into_normalized_record() {
        let value = json!({
            "deal_id": "IL-778",
            "full_address": "14 Ben Yehuda St",
            "deal_date": "2024-02-11T00:00:00Z",
            "deal_amount": "3,150,000",
            "built_area": 90,
            "asset_type": "Garden Apartment",
            "room_count": 4,
            "floor": 0,
            "building_floors": 5,
            "condition": "renovated",
            "year_built": 1994,
            "is_verified": "yes",
            "location": {"lat": 32.08, "lng": 34.77}
        });
        let record = decode_transaction(&value, RecordSource::LandRegistry).unwrap();
        assert_eq!(record.id, "IL-778");
        assert_eq!(record.address, "14 Ben Yehuda St");
        assert_eq!(record.transaction_date, NaiveDate::from_ymd_opt(2024, 2, 11).unwrap());
        assert_eq!(record.price, 3_150_000.0);
        assert_eq!(record.price_per_sqm, 35_000.0);
        assert_eq!(record.property_type, PropertyType::GardenApartment);
        assert_eq!(record.age_years, Some(30));
        assert!(record.verified);
        assert_eq!(record.source, RecordSource::LandRegistry);
        assert_eq!(record.location, Some(GeoPoint::new(32.08, 34.77)));
    }

    #[test]
    fn missing_address_is_a_decode_error() {
        let value = json!({"date": "2024-01-01", "price": 1000});
        let err = decode_transaction(&value, RecordSource::Broker).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("address")));
    }

    #[test]
    fn unknown_provenance_label_is_rejected() {
        let value = json!({"address": "1 A St", "date": "2024-01-01", "price": 1000, "source": "rumour"});
        let err = decode_transaction(&value, RecordSource::Broker).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidField { field: "source", .. }));
    }

    #[test]
    fn missing_id_gets_stable_synthetic_id() {
        let value = json!({"address": "1 A St", "date": "2024-01-01", "price": 1000});
        let a = decode_transaction(&value, RecordSource::Platform).unwrap();
        let b = decode_transaction(&value, RecordSource::Platform).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.source, RecordSource::Platform);
    }

    #[test]
    fn feed_page_keeps_good_records_and_collects_rejects() {
        let value = json!({"deals": [
            {"address": "1 A St", "date": "2024-01-01", "price": 1000, "area": 10},
            {"address": "2 B St", "date": "not-a-date", "price": 1000},
        ]});
        let page = decode_feed_page(&value, RecordSource::TaxAuthority).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.rejected.len(), 1);
        assert!(page.rejected[0].key.contains("2 B St"));
        assert!(page.rejected[0].to_string().contains("not-a-date"));
    }

    #[test]
    fn secondary_decoders_require_known_fields() {
        assert!(decode_planning(&json!({"unrelated": 1})).is_err());
        let tax = decode_tax(&json!({"assessment": 1_800_000, "year": 2023})).unwrap();
        assert_eq!(tax.assessment_year, Some(2023));
        let spatial = decode_secondary(SecondaryKind::Spatial, &json!({"elevation": 42.5})).unwrap();
        assert_eq!(spatial.kind(), SecondaryKind::Spatial);
    }
}
