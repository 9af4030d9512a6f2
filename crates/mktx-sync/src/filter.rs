use mktx_core::{FilterSpec, PropertyType, TransactionRecord};

/// Whether `record` satisfies every constraint present in `spec`. A record that
/// lacks the datum a constraint tests does not satisfy it.
pub fn matches(record: &TransactionRecord, spec: &FilterSpec) -> bool {
    if let Some(area) = &spec.location {
        match record.location {
            Some(point) if area.contains(&point) => {}
            _ => return false,
        }
    }
    if let Some(types) = &spec.property_types {
        if !types.contains(&record.property_type) {
            return false;
        }
    }
    if let Some(range) = &spec.price {
        if !range.contains(record.price) {
            return false;
        }
    }
    if let Some(range) = &spec.area {
        if !range.contains(record.area_sqm) {
            return false;
        }
    }
    if let Some(allowed) = &spec.rooms {
        match record.rooms {
            Some(rooms) if allowed.iter().any(|r| (r - rooms).abs() < f64::EPSILON) => {}
            _ => return false,
        }
    }
    if let Some(range) = &spec.floor {
        match record.floor {
            Some(floor) if range.contains(floor) => {}
            _ => return false,
        }
    }
    if let Some(conditions) = &spec.conditions {
        if !conditions.contains(&record.condition) {
            return false;
        }
    }
    if let Some(max_age) = spec.max_age_years {
        match record.age_years {
            Some(age) if age <= max_age => {}
            _ => return false,
        }
    }
    if spec.verified_only && !record.verified {
        return false;
    }
    if let Some(sources) = &spec.sources {
        if !sources.contains(&record.source) {
            return false;
        }
    }
    true
}

/// Order-preserving filter.
pub fn apply_filter(mut records: Vec<TransactionRecord>, spec: &FilterSpec) -> Vec<TransactionRecord> {
    if spec.is_empty() {
        return records;
    }
    records.retain(|record| matches(record, spec));
    records
}

/// Data-quality check only; incomplete records are still imported.
pub fn is_complete(record: &TransactionRecord) -> bool {
    !record.address.trim().is_empty()
        && record.price > 0.0
        && record.area_sqm > 0.0
        && record.price_per_sqm > 0.0
        && record.property_type != PropertyType::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use mktx_core::{Condition, GeoPoint, GeoRadius, RecordSource, ValueRange};

    fn record(id: &str) -> TransactionRecord {
        TransactionRecord {
            id: id.to_string(),
            transaction_date: NaiveDate::from_ymd_opt(2024, 4, 2).unwrap(),
            price: 2_400_000.0,
            price_per_sqm: 30_000.0,
            address: format!("{id} Herzl St"),
            city: Some("Tel Aviv".into()),
            neighborhood: None,
            property_type: PropertyType::Apartment,
            rooms: Some(3.0),
            floor: Some(2),
            total_floors: Some(5),
            area_sqm: 80.0,
            condition: Condition::Good,
            age_years: Some(30),
            features: vec![],
            verified: true,
            source: RecordSource::LandRegistry,
            location: Some(GeoPoint::new(32.07, 34.78)),
        }
    }

    fn sample() -> Vec<TransactionRecord> {
        let mut cheap = record("1");
        cheap.price = 900_000.0;
        let mut penthouse = record("2");
        penthouse.property_type = PropertyType::Penthouse;
        penthouse.floor = None;
        let mut broker = record("3");
        broker.source = RecordSource::Broker;
        broker.verified = false;
        broker.age_years = None;
        let mut far = record("4");
        far.location = Some(GeoPoint::new(31.77, 35.21));
        let mut big = record("5");
        big.rooms = Some(5.0);
        big.area_sqm = 160.0;
        vec![cheap, penthouse, broker, far, big, record("6")]
    }

    #[test]
    fn empty_spec_is_identity() {
        let records = sample();
        assert_eq!(apply_filter(records.clone(), &FilterSpec::default()), records);
    }

    #[test]
    fn every_kept_record_satisfies_present_constraints() {
        let specs = vec![
            FilterSpec {
                price: Some(ValueRange::between(1_000_000.0, 3_000_000.0)),
                ..Default::default()
            },
            FilterSpec {
                property_types: Some(vec![PropertyType::Apartment]),
                floor: Some(ValueRange::between(1, 4)),
                ..Default::default()
            },
            FilterSpec {
                location: Some(GeoRadius {
                    center: GeoPoint::new(32.07, 34.78),
                    radius_km: 3.0,
                }),
                rooms: Some(vec![3.0]),
                ..Default::default()
            },
            FilterSpec {
                verified_only: true,
                max_age_years: Some(40),
                sources: Some(vec![RecordSource::LandRegistry]),
                area: Some(ValueRange { min: None, max: Some(100.0) }),
                ..Default::default()
            },
        ];
        for spec in specs {
            let kept = apply_filter(sample(), &spec);
            assert!(!kept.is_empty());
            for record in &kept {
                assert!(matches(record, &spec), "{} should not pass {spec:?}", record.id);
            }
        }
    }

    #[test]
    fn filter_preserves_order_and_drops_missing_data() {
        let spec = FilterSpec {
            floor: Some(ValueRange::between(0, 10)),
            max_age_years: Some(50),
            ..Default::default()
        };
        let ids: Vec<_> = apply_filter(sample(), &spec).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["1", "4", "5", "6"]);
    }

    #[test]
    fn completeness_requires_positive_figures_and_known_type() {
        assert!(is_complete(&record("ok")));
        let mut no_area = record("a");
        no_area.area_sqm = 0.0;
        assert!(!is_complete(&no_area));
        let mut unknown = record("b");
        unknown.property_type = PropertyType::Unknown;
        assert!(!is_complete(&unknown));
        let mut blank = record("c");
        blank.address = "  ".into();
        assert!(!is_complete(&blank));
    }
}
