// src/sync/executor.rs

//! Transfer execution
//!
//! Carries out a [`TransferPlan`](super::planner::TransferPlan) entry by
//! entry: fetches the artifact into the object store (verified against the
//! declared checksum), creates the target record and uploads the data. Kept
//! records are brought up to date in place.

use crate::error::{Error, Result};
use crate::progress::{ProgressAggregator, ProgressEvent};
use crate::scheduler::Shutdown;
use crate::store::{Ledger, ObjectStore};
use crate::streams::{CatalogItem, CatalogSource};
use crate::target::{props, ImageService, ImageSpec, ImageUpdate, TargetRecord};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::planner::PlanEntry;
use super::properties::{disk_format, PublishContext, CONTAINER_FORMAT};

/// Disk format requested when importing with conversion
const CONVERSION_FORMAT: &str = "raw";

/// Executes transfers for one region pass
pub struct TransferExecutor<'a> {
    service: &'a dyn ImageService,
    store: &'a ObjectStore,
    source: &'a dyn CatalogSource,
    ctx: &'a PublishContext<'a>,
    shutdown: &'a Shutdown,
    progress: ProgressAggregator,
}

impl<'a> TransferExecutor<'a> {
    pub fn new(
        service: &'a dyn ImageService,
        store: &'a ObjectStore,
        source: &'a dyn CatalogSource,
        ctx: &'a PublishContext<'a>,
        shutdown: &'a Shutdown,
        progress: ProgressAggregator,
    ) -> Self {
        Self {
            service,
            store,
            source,
            ctx,
            shutdown,
            progress,
        }
    }

    pub fn progress(&self) -> &ProgressAggregator {
        &self.progress
    }

    /// Make sure the artifact of `entry` is in the object store
    ///
    /// Returns its path and whether it had to be downloaded.
    pub fn fetch(&mut self, entry: &PlanEntry) -> Result<(PathBuf, bool)> {
        if self.store.contains(&entry.checksum) {
            return Ok((self.store.path_for(&entry.checksum), false));
        }
        self.shutdown.check()?;

        let item = &entry.item;
        let path = item
            .path()
            .ok_or_else(|| Error::ParseError(format!("{}: item has no path", item.pedigree)))?;
        info!("Downloading {} from {}", item.pedigree, self.source.describe(&path));
        let mut reader = self.source.open(&path)?;

        let name = item.pedigree.to_string();
        let size = entry.size;
        let shutdown = self.shutdown;
        let progress = &mut self.progress;
        let mut written = 0u64;
        let stored = self.store.insert(&name, &mut reader, &entry.checksum, &mut |n| {
            shutdown.check()?;
            written += n;
            progress.record(&ProgressEvent {
                name: name.clone(),
                size,
                written,
            });
            Ok(())
        })?;

        self.progress.finish_item();
        Ok((stored, true))
    }

    /// Create and upload the target record for `entry`
    pub fn publish(
        &self,
        entry: &PlanEntry,
        artifact: &Path,
        latest: bool,
        ledger: &mut Ledger,
    ) -> Result<TargetRecord> {
        let item = &entry.item;
        let mut properties = self.ctx.desired_properties(item)?;
        if latest {
            properties.insert(props::LATEST.to_string(), "true".to_string());
        }
        let ftype = item.ftype().unwrap_or_default();
        let spec = ImageSpec {
            name: self.ctx.image_name(item),
            visibility: self.ctx.mirror.visibility,
            disk_format: disk_format(&ftype).to_string(),
            container_format: CONTAINER_FORMAT.to_string(),
            properties,
        };

        let record = self.service.create_image(&spec)?;
        let uploaded = if self.ctx.mirror.image_conversion {
            self.service.import_image(&record.id, artifact, CONVERSION_FORMAT)
        } else {
            self.service.upload_image(&record.id, artifact)
        };
        if let Err(e) = uploaded {
            warn!("Upload of {} failed, deleting image {}: {}", item.pedigree, record.id, e);
            if let Err(cleanup) = self.service.delete_image(&record.id) {
                warn!("Failed to delete half-created image {}: {}", record.id, cleanup);
            }
            return Err(e);
        }

        ledger.record(&item.pedigree, &record.id, &entry.checksum.to_prefixed_string());
        info!("Published {} as {} ({})", item.pedigree, record.name, record.id);
        Ok(record)
    }

    /// Bring a kept record's managed metadata in line with its item
    ///
    /// `latest` is `None` when latest marking is off. Returns whether the
    /// record was modified.
    pub fn refresh(
        &self,
        record: &TargetRecord,
        item: &CatalogItem,
        latest: Option<bool>,
        ledger: &mut Ledger,
    ) -> Result<bool> {
        let mut desired = self.ctx.desired_properties(item)?;

        // The record's bytes are immutable; a catalog that republished the
        // same pedigree with new content is only reported
        if let Some(current) = record.checksum() {
            if desired.get(props::CHECKSUM).map(String::as_str) != Some(current) {
                warn!(
                    "{} changed upstream ({} published, catalog now lists {})",
                    item.pedigree,
                    current,
                    desired[props::CHECKSUM]
                );
                desired.insert(props::CHECKSUM.to_string(), current.to_string());
            }
        }

        if latest == Some(true) {
            desired.insert(props::LATEST.to_string(), "true".to_string());
        }
        let mut update = ImageUpdate::between(record, &self.ctx.image_name(item), self.ctx.mirror.visibility, &desired);
        if latest == Some(false) && record.property(props::LATEST).is_some() {
            update.remove.push(props::LATEST.to_string());
        }

        let checksum = &desired[props::CHECKSUM];
        let tracked = ledger
            .get(&item.pedigree)
            .is_some_and(|e| e.target_id == record.id && &e.checksum == checksum);
        if !tracked {
            ledger.record(&item.pedigree, &record.id, checksum);
        }

        if update.is_empty() {
            debug!("Image {} ({}) is up to date", record.id, record.name);
            return Ok(false);
        }
        self.service.update_image(&record.id, &update)?;
        info!(
            "Updated image {} ({}): {} propert(ies) set, {} removed",
            record.id,
            record.name,
            update.set.len(),
            update.remove.len()
        );
        Ok(true)
    }
}
