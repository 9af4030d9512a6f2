use mktx_core::{ImportedRecord, TransactionRecord};
use strsim::jaro_winkler;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedupConfig {
    /// Maximum absolute price difference, in currency units.
    pub price_tolerance: f64,
    /// Maximum absolute area difference, in m².
    pub area_tolerance: f64,
    /// When set, addresses match on Jaro-Winkler similarity of their normalized
    /// form instead of exact string equality.
    pub fuzzy_address_threshold: Option<f64>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            price_tolerance: 1_000.0,
            area_tolerance: 2.0,
            fuzzy_address_threshold: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DedupEngine {
    config: DedupConfig,
}

impl DedupEngine {
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    pub fn normalize_address(input: &str) -> String {
        input
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn addresses_match(&self, a: &str, b: &str) -> bool {
        match self.config.fuzzy_address_threshold {
            None => a == b,
            Some(threshold) => {
                jaro_winkler(&Self::normalize_address(a), &Self::normalize_address(b)) >= threshold
            }
        }
    }

    pub fn is_duplicate_of(&self, candidate: &TransactionRecord, existing: &TransactionRecord) -> bool {
        self.addresses_match(&candidate.address, &existing.address)
            && candidate.transaction_date == existing.transaction_date
            && (candidate.price - existing.price).abs() <= self.config.price_tolerance
            && (candidate.area_sqm - existing.area_sqm).abs() <= self.config.area_tolerance
    }

    /// First record in `existing` that `candidate` duplicates.
    pub fn find_duplicate<'a, I>(&self, candidate: &TransactionRecord, existing: I) -> Option<&'a ImportedRecord>
    where
        I: IntoIterator<Item = &'a ImportedRecord>,
    {
        existing
            .into_iter()
            .find(|known| self.is_duplicate_of(candidate, &known.record))
    }
}

/// Strict address-exact duplicate lookup with the default tolerances.
pub fn find_duplicate<'a>(candidate: &TransactionRecord, existing: &'a [ImportedRecord]) -> Option<&'a ImportedRecord> {
    DedupEngine::default().find_duplicate(candidate, existing)
}
