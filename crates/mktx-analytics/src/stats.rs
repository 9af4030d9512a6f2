use std::collections::BTreeMap;

use chrono::{Months, NaiveDate};
use mktx_core::{
    Confidence, MarketValueEstimate, PropertyType, StatisticsSnapshot, TransactionRecord, TrendSnapshot,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_WINDOW_MONTHS: u32 = 6;
pub const HIGH_CONFIDENCE_MIN_SAMPLES: usize = 10;
pub const MEDIUM_CONFIDENCE_MIN_SAMPLES: usize = 5;

/// Median of an ascending slice; the mean of the two middle values for even lengths.
pub fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

fn sorted_prices(records: &[&TransactionRecord]) -> Vec<f64> {
    let mut prices: Vec<f64> = records.iter().map(|r| r.price_per_sqm).collect();
    prices.sort_by(f64::total_cmp);
    prices
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

pub fn aggregate(records: &[TransactionRecord]) -> StatisticsSnapshot {
    if records.is_empty() {
        return StatisticsSnapshot::default();
    }

    let refs: Vec<&TransactionRecord> = records.iter().collect();
    let prices = sorted_prices(&refs);

    let mut by_month: BTreeMap<String, usize> = BTreeMap::new();
    let mut category_totals: BTreeMap<PropertyType, (f64, usize)> = BTreeMap::new();
    for record in records {
        *by_month
            .entry(record.transaction_date.format("%Y-%m").to_string())
            .or_default() += 1;
        let entry = category_totals.entry(record.property_type).or_default();
        entry.0 += record.price_per_sqm;
        entry.1 += 1;
    }

    StatisticsSnapshot {
        average_price_per_sqm: mean(prices.iter().copied()),
        median_price_per_sqm: median(&prices),
        min_price_per_sqm: prices[0],
        max_price_per_sqm: prices[prices.len() - 1],
        count: records.len(),
        by_month,
        by_category: category_totals
            .into_iter()
            .map(|(category, (sum, count))| (category, sum / count as f64))
            .collect(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct WindowStats {
    count: usize,
    average: f64,
}

fn window(records: &[TransactionRecord], from: NaiveDate, to: NaiveDate, include_end: bool) -> WindowStats {
    let in_window = |d: NaiveDate| d >= from && if include_end { d <= to } else { d < to };
    let prices: Vec<f64> = records
        .iter()
        .filter(|r| in_window(r.transaction_date))
        .map(|r| r.price_per_sqm)
        .collect();
    WindowStats {
        count: prices.len(),
        average: mean(prices.into_iter()),
    }
}

/// Percentage change from `prior` to `recent`; 0 when either side is empty.
fn pct_change(recent: f64, prior: f64, recent_count: usize, prior_count: usize) -> f64 {
    if recent_count == 0 || prior_count == 0 || prior == 0.0 {
        return 0.0;
    }
    (recent - prior) / prior * 100.0
}

fn months_before(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_sub_months(Months::new(months)).unwrap_or(NaiveDate::MIN)
}

/// Rolling 3-vs-3 and 6-vs-6 month comparisons ending at `as_of`.
///
/// The 12-month figure repeats the 6-vs-6 comparison; downstream consumers
/// already read it that way.
pub fn trends(records: &[TransactionRecord], as_of: NaiveDate) -> TrendSnapshot {
    let m3 = months_before(as_of, 3);
    let m6 = months_before(as_of, 6);
    let m12 = months_before(as_of, 12);

    let recent3 = window(records, m3, as_of, true);
    let prior3 = window(records, m6, m3, false);
    let recent6 = window(records, m6, as_of, true);
    let prior6 = window(records, m12, m6, false);

    let six_month = pct_change(recent6.average, prior6.average, recent6.count, prior6.count);
    TrendSnapshot {
        three_month_change_pct: pct_change(recent3.average, prior3.average, recent3.count, prior3.count),
        six_month_change_pct: six_month,
        twelve_month_change_pct: six_month,
        volume_change_pct: pct_change(
            recent6.count as f64,
            prior6.count as f64,
            recent6.count,
            prior6.count,
        ),
    }
}

pub fn confidence_for(sample_count: usize) -> Confidence {
    if sample_count >= HIGH_CONFIDENCE_MIN_SAMPLES {
        Confidence::High
    } else if sample_count >= MEDIUM_CONFIDENCE_MIN_SAMPLES {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

/// Property profile and date an estimate is requested for. `window_months` is
/// the half-width of the date window applied when the records are fetched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimateRequest {
    pub target_date: NaiveDate,
    pub area_sqm: f64,
    pub property_type: PropertyType,
    #[serde(default = "default_window_months")]
    pub window_months: u32,
}

fn default_window_months() -> u32 {
    DEFAULT_WINDOW_MONTHS
}

impl EstimateRequest {
    pub fn new(target_date: NaiveDate, area_sqm: f64, property_type: PropertyType) -> Self {
        Self {
            target_date,
            area_sqm,
            property_type,
            window_months: DEFAULT_WINDOW_MONTHS,
        }
    }

    pub fn with_window_months(mut self, window_months: u32) -> Self {
        self.window_months = window_months;
        self
    }
}

/// Median price per m² over records of the requested type. The records are
/// expected to be windowed around the target date already.
pub fn estimate_value(records: &[TransactionRecord], request: &EstimateRequest) -> MarketValueEstimate {
    let matches: Vec<&TransactionRecord> = records
        .iter()
        .filter(|r| r.property_type == request.property_type)
        .collect();
    if matches.is_empty() {
        return MarketValueEstimate::empty(request.target_date, request.area_sqm, request.property_type);
    }

    let prices = sorted_prices(&matches);
    let value_per_sqm = median(&prices);
    MarketValueEstimate {
        target_date: request.target_date,
        property_type: request.property_type,
        area_sqm: request.area_sqm,
        value_per_sqm,
        total_value: value_per_sqm * request.area_sqm,
        confidence: confidence_for(matches.len()),
        sample_count: matches.len(),
        range_min: prices[0] * request.area_sqm,
        range_max: prices[prices.len() - 1] * request.area_sqm,
    }
}
