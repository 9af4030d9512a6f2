//! Import ledger, raw payload archive, CSV export, and rate-limited HTTP fetch.

mod artifacts;
mod export;
mod http;
mod ledger;

pub use artifacts::{write_atomic, ArchivedPayload, ArtifactStore};
pub use export::{to_csv_string, write_csv, ExportError, CSV_HEADERS};
pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, FetchedResponse, HttpClientConfig,
    HttpFetcher, RetryDisposition, SimpleTokenBucket, TokenBucketConfig,
};
pub use ledger::ImportLedger;

pub const CRATE_NAME: &str = "mktx-storage";

pub use reqwest::Url;
