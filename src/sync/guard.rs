// src/sync/guard.rs

//! Safe removal of target records
//!
//! A record is only deleted once nothing boots from it. Records still in
//! use are skipped and re-evaluated on the next pass. Deleting a record also
//! drops its ledger entry and, when no other record in the region points at
//! the same artifact, the cached artifact.

use crate::error::Result;
use crate::hash::Checksum;
use crate::store::{Ledger, ObjectStore};
use crate::target::{ImageQuery, ImageService, TargetRecord};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::retention::Removal;

/// What happened to a removal candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    Deleted,
    /// Live consumers still reference the record
    InUse(usize),
    /// The record had no target id; only bookkeeping was dropped
    Forgotten,
}

pub struct RemovalGuard<'a> {
    service: &'a dyn ImageService,
    store: &'a ObjectStore,
    cloud_name: &'a str,
}

impl<'a> RemovalGuard<'a> {
    pub fn new(service: &'a dyn ImageService, store: &'a ObjectStore, cloud_name: &'a str) -> Self {
        Self {
            service,
            store,
            cloud_name,
        }
    }

    /// Every record this cloud owns in the region, across content ids
    fn owned_records(&self) -> Result<Vec<TargetRecord>> {
        self.service.list_images(&ImageQuery {
            cloud_name: self.cloud_name.to_string(),
            content_id: None,
        })
    }

    pub fn remove(&self, removal: &Removal, ledger: &mut Ledger) -> Result<RemovalOutcome> {
        let record = &removal.record;
        let pedigree = record.pedigree();

        if record.id.is_empty() {
            if let Some(pedigree) = &pedigree {
                ledger.forget(pedigree);
            }
            return Ok(RemovalOutcome::Forgotten);
        }

        let consumers = self.service.count_consumers(&record.id)?;
        if consumers > 0 {
            warn!(
                "Not removing image {} ({}): {} instance(s) still use it",
                record.id, record.name, consumers
            );
            return Ok(RemovalOutcome::InUse(consumers));
        }

        self.service.delete_image(&record.id)?;
        info!("Removed image {} ({}): {}", record.id, record.name, removal.reason);

        if let Some(pedigree) = &pedigree {
            if ledger.get(pedigree).is_some_and(|e| e.target_id == record.id) {
                ledger.forget(pedigree);
            }
        }

        if let Some(checksum) = record.checksum() {
            let still_referenced = self
                .owned_records()?
                .iter()
                .any(|r| r.checksum() == Some(checksum));
            if !still_referenced {
                match Checksum::parse_prefixed(checksum) {
                    Ok(parsed) => {
                        self.store.remove(&parsed)?;
                    }
                    Err(e) => warn!("Image {} carries a bad checksum '{}': {}", record.id, checksum, e),
                }
            }
        }
        Ok(RemovalOutcome::Deleted)
    }

    /// Drop cached artifacts no record in the region references
    pub fn prune_cache(&self) -> Result<usize> {
        let referenced: HashSet<String> = self
            .owned_records()?
            .iter()
            .filter_map(|r| r.checksum().map(str::to_string))
            .collect();

        let mut pruned = 0;
        for checksum in self.store.entries()? {
            if referenced.contains(&checksum.to_prefixed_string()) {
                continue;
            }
            debug!("Cache entry {} is unreferenced", checksum.to_prefixed_string());
            if self.store.remove(&checksum)? {
                pruned += 1;
            }
        }
        Ok(pruned)
    }
}
