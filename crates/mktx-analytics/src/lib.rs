//! Market statistics over transaction records: aggregates, rolling trends,
//! point-in-time value estimates and the plain-language report built on them.
//!
//! Everything here is pure; callers supply the record set and the reference
//! date.

pub mod report;
pub mod stats;

pub use report::{build_report, insights, summarize, MarketReport};
pub use stats::{
    aggregate, confidence_for, estimate_value, median, trends, EstimateRequest, DEFAULT_WINDOW_MONTHS,
};
