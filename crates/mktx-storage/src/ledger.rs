use std::path::{Path, PathBuf};

use anyhow::Context;
use mktx_core::{ImportedRecord, ReviewStatus};
use tokio::fs;
use tracing::info;
use uuid::Uuid;

use crate::artifacts::write_atomic;

/// The store of previously imported records that new runs deduplicate against.
/// Optionally backed by a JSON file.
#[derive(Debug, Clone, Default)]
pub struct ImportLedger {
    path: Option<PathBuf>,
    records: Vec<ImportedRecord>,
}

impl ImportLedger {
    /// Open a file-backed ledger. A missing file yields an empty ledger.
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let records = if fs::try_exists(&path)
            .await
            .with_context(|| format!("checking ledger {}", path.display()))?
        {
            let text = fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading ledger {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing ledger {}", path.display()))?
        } else {
            Vec::new()
        };
        info!(path = %path.display(), records = records.len(), "opened import ledger");
        Ok(Self {
            path: Some(path),
            records,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn records(&self) -> &[ImportedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = ImportedRecord>) {
        self.records.extend(records);
    }

    /// Reviewer decision on a stored record. Returns `false` if the id is unknown.
    pub fn set_status(&mut self, import_id: Uuid, status: ReviewStatus) -> bool {
        match self.records.iter_mut().find(|r| r.import_id == import_id) {
            Some(record) => {
                record.status = status;
                true
            }
            None => false,
        }
    }

    pub fn for_config<'a>(&'a self, config_id: &'a str) -> impl Iterator<Item = &'a ImportedRecord> + 'a {
        self.records.iter().filter(move |r| r.config_id == config_id)
    }

    /// Write the ledger back to its file. In-memory ledgers are a no-op.
    pub async fn persist(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(&self.records).context("serializing ledger")?;
        write_atomic(path, &bytes).await
    }
}
