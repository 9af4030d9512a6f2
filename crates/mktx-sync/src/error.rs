use mktx_providers::ProviderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The job cannot run as configured, e.g. it has no location to fetch.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A run for this job id is already in flight.
    #[error("job `{0}` already has a run in progress")]
    ConcurrencyViolation(String),
    /// The primary feed failed for a call whose result cannot be partial.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}
