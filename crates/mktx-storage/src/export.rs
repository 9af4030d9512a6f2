use std::io;

use mktx_core::ImportedRecord;
use thiserror::Error;

/// Column order is fixed; downstream spreadsheets depend on it.
pub const CSV_HEADERS: [&str; 14] = [
    "date",
    "address",
    "price",
    "price_per_sqm",
    "area_sqm",
    "rooms",
    "floor",
    "total_floors",
    "condition",
    "age_years",
    "verified",
    "source",
    "import_date",
    "status",
];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("csv write failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("csv flush failed: {0}")]
    Io(#[from] io::Error),
    #[error("csv output was not utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn csv_row(imported: &ImportedRecord) -> [String; 14] {
    let r = &imported.record;
    [
        r.transaction_date.format("%Y-%m-%d").to_string(),
        r.address.clone(),
        format!("{:.0}", r.price),
        format!("{:.0}", r.price_per_sqm),
        format!("{}", r.area_sqm),
        opt(r.rooms),
        opt(r.floor),
        opt(r.total_floors),
        r.condition.as_str().to_string(),
        opt(r.age_years),
        r.verified.to_string(),
        r.source.as_str().to_string(),
        imported.imported_at.format("%Y-%m-%d").to_string(),
        imported.status.as_str().to_string(),
    ]
}

pub fn write_csv<W: io::Write>(records: &[ImportedRecord], writer: W) -> Result<(), ExportError> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(CSV_HEADERS)?;
    for imported in records {
        out.write_record(csv_row(imported))?;
    }
    out.flush()?;
    Ok(())
}

pub fn to_csv_string(records: &[ImportedRecord]) -> Result<String, ExportError> {
    let mut buf = Vec::new();
    write_csv(records, &mut buf)?;
    Ok(String::from_utf8(buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use mktx_core::{Condition, PropertyType, RecordSource, ReviewStatus, TransactionRecord};

    #[test]
    fn header_and_row_follow_fixed_column_order() {
        let record = TransactionRecord {
            id: "tx-1".into(),
            transaction_date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            price: 2_450_000.0,
            price_per_sqm: 30_625.0,
            address: "5 Dizengoff St, Tel Aviv".into(),
            city: None,
            neighborhood: None,
            property_type: PropertyType::Apartment,
            rooms: Some(3.5),
            floor: Some(3),
            total_floors: None,
            area_sqm: 80.0,
            condition: Condition::Renovated,
            age_years: Some(40),
            features: vec!["elevator".into()],
            verified: true,
            source: RecordSource::Broker,
            location: None,
        };
        let mut imported = ImportedRecord::new(
            record,
            "tlv",
            Utc.with_ymd_and_hms(2024, 6, 1, 2, 0, 0).single().unwrap(),
            true,
        );
        imported.status = ReviewStatus::Approved;

        let csv = to_csv_string(&[imported]).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "date,address,price,price_per_sqm,area_sqm,rooms,floor,total_floors,condition,age_years,verified,source,import_date,status"
        );
        assert_eq!(
            lines.next().unwrap(),
            "2024-05-02,\"5 Dizengoff St, Tel Aviv\",2450000,30625,80,3.5,3,,renovated,40,true,broker,2024-06-01,approved"
        );
        assert!(lines.next().is_none());
    }

    #[test]
    fn empty_export_still_has_header() {
        let csv = to_csv_string(&[]).unwrap();
        assert_eq!(csv.lines().count(), 1);
        assert_eq!(csv.lines().next().unwrap().split(',').count(), CSV_HEADERS.len());
    }
}
