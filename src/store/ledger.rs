// src/store/ledger.rs

//! Per-region bookkeeping of published records
//!
//! The target image service is the source of truth; the ledger records which
//! target id and checksum this engine published for each pedigree so that
//! the audit trail survives the records themselves.

use crate::error::{Error, Result};
use crate::streams::Pedigree;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

const LEDGER_FILE: &str = "ledger.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub pedigree: Pedigree,
    pub target_id: String,
    /// Prefixed checksum, e.g. `sha256:ab12…`
    pub checksum: String,
    pub published_at: DateTime<Utc>,
}

/// Published records of one region, keyed by pedigree
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    entries: BTreeMap<String, LedgerEntry>,
}

impl Ledger {
    /// Load the ledger in `dir`, starting empty when none exists
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(LEDGER_FILE);
        let entries = match std::fs::read(&path) {
            Ok(content) => serde_json::from_slice(&content).map_err(|e| {
                Error::IoError(format!("Corrupt ledger {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, entries })
    }

    pub fn get(&self, pedigree: &Pedigree) -> Option<&LedgerEntry> {
        self.entries.get(&pedigree.to_string())
    }

    pub fn record(&mut self, pedigree: &Pedigree, target_id: &str, checksum: &str) {
        self.entries.insert(
            pedigree.to_string(),
            LedgerEntry {
                pedigree: pedigree.clone(),
                target_id: target_id.to_string(),
                checksum: checksum.to_string(),
                published_at: Utc::now(),
            },
        );
    }

    pub fn forget(&mut self, pedigree: &Pedigree) -> Option<LedgerEntry> {
        self.entries.remove(&pedigree.to_string())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.values()
    }

    /// Write the ledger atomically
    pub fn save(&self) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        let content = serde_json::to_vec_pretty(&self.entries)
            .map_err(|e| Error::IoError(format!("Failed to encode ledger: {e}")))?;
        temp.write_all(&content)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| {
            Error::IoError(format!("Failed to write {}: {}", self.path.display(), e.error))
        })?;
        debug!("Saved ledger with {} entries", self.entries.len());
        Ok(())
    }
}
