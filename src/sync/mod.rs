// src/sync/mod.rs

//! Synchronization engine
//!
//! One region pass runs these steps in order:
//!
//! 1. read the catalog and apply the mirror's item filters
//! 2. snapshot the records this cloud owns for the target content id
//! 3. decide retention ([`retention`])
//! 4. plan transfers without side effects ([`planner`])
//! 5. download and publish, then refresh kept records ([`executor`])
//! 6. remove what retention dropped, unless in use ([`guard`])
//! 7. prune cache entries no record references and save the ledger
//!
//! Failures are handled at the smallest scope: a bad item is counted and
//! skipped, a failed region is logged and the next region runs, and a
//! catalog that cannot be read or verified ends the mirror's pass.

pub mod executor;
pub mod guard;
pub mod planner;
pub mod properties;
pub mod retention;

pub use executor::TransferExecutor;
pub use guard::{RemovalGuard, RemovalOutcome};
pub use planner::{PlanEntry, TransferPlan};
pub use properties::PublishContext;
pub use retention::{RemovalReason, RetentionDecision, RetentionPolicy};

use crate::config::{MirrorConfig, Settings};
use crate::error::{Error, Result};
use crate::filter::{self, ItemFilter};
use crate::progress::ProgressAggregator;
use crate::scheduler::Shutdown;
use crate::store::{Ledger, ObjectStore};
use crate::streams::{Catalog, CatalogItem, CatalogReader, Pedigree};
use crate::target::{props, ImageQuery, ImageUpdate, TargetCloud};
use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

/// Counters of one region pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionReport {
    pub region: String,
    /// Items passing the filters
    pub matched: usize,
    /// Items the filters rejected
    pub rejected: usize,
    pub downloaded: usize,
    pub published: usize,
    pub updated: usize,
    pub removed: usize,
    pub skipped_in_use: usize,
    pub failed: usize,
    pub bytes_downloaded: u64,
    pub interrupted: bool,
}

/// Outcome of one mirror pass
#[derive(Debug, Clone, Default)]
pub struct MirrorReport {
    pub url: String,
    pub regions: Vec<RegionReport>,
    /// Regions whose pass failed, with the error
    pub failed_regions: Vec<(String, String)>,
    pub interrupted: bool,
}

/// Run one pass of `mirror` over all its regions
///
/// Errors reading the catalog end the mirror pass; region failures are
/// logged and recorded in the report.
pub fn sync_mirror(
    settings: &Settings,
    mirror: &MirrorConfig,
    reader: &CatalogReader,
    cloud: &dyn TargetCloud,
    shutdown: &Shutdown,
) -> Result<MirrorReport> {
    let filters = mirror.filters()?;
    info!("Fetching catalog {} from {}", mirror.path, mirror.url);
    let catalog = reader.open(&mirror.path)?;

    let mut report = MirrorReport {
        url: mirror.url.clone(),
        ..Default::default()
    };
    for region in &mirror.regions {
        shutdown.check()?;
        info!("Syncing region {} from {}", region, mirror.url);
        match sync_region(settings, mirror, &catalog, &filters, reader, cloud, region, shutdown) {
            Ok(region_report) => {
                info!(
                    "Synced region {} from {}: {} published, {} updated, {} removed, {} in use, {} failed",
                    region,
                    mirror.url,
                    region_report.published,
                    region_report.updated,
                    region_report.removed,
                    region_report.skipped_in_use,
                    region_report.failed
                );
                let interrupted = region_report.interrupted;
                report.regions.push(region_report);
                if interrupted {
                    report.interrupted = true;
                    break;
                }
            }
            Err(Error::Interrupted) => {
                report.interrupted = true;
                break;
            }
            Err(e) if e.is_mirror_fatal() => return Err(e),
            Err(e) => {
                error!("Region {} from {} failed: {}", region, mirror.url, e);
                report.failed_regions.push((region.clone(), e.to_string()));
            }
        }
    }
    Ok(report)
}

/// Read and filter every item of the catalog
///
/// Returns the matching items and the number of rejected ones.
pub fn filtered_items(catalog: &Catalog<'_>, filters: &[ItemFilter]) -> Result<(Vec<CatalogItem>, usize)> {
    let mut items = Vec::new();
    let mut rejected = 0;
    for item in catalog.items() {
        let item = item?;
        if filter::matches_all(filters, &item) {
            items.push(item);
        } else {
            debug!("Filtered out {}", item.pedigree);
            rejected += 1;
        }
    }
    if items.is_empty() && rejected > 0 {
        warn!("Filters rejected all {} item(s); check the filter keys", rejected);
    } else {
        info!("{} item(s) match the filters, {} rejected", items.len(), rejected);
    }
    Ok((items, rejected))
}

/// Run one pass of `mirror` for one region
#[allow(clippy::too_many_arguments)]
pub fn sync_region(
    settings: &Settings,
    mirror: &MirrorConfig,
    catalog: &Catalog<'_>,
    filters: &[ItemFilter],
    reader: &CatalogReader,
    cloud: &dyn TargetCloud,
    region: &str,
    shutdown: &Shutdown,
) -> Result<RegionReport> {
    let store = ObjectStore::open(settings.region_directory(region))?;
    let mut ledger = Ledger::load(store.root())?;
    let ctx = PublishContext::new(mirror, region, &settings.cloud_name, &settings.name_prefix);

    let (items, rejected) = filtered_items(catalog, filters)?;
    let source_ids: BTreeSet<String> = catalog.content_ids().into_iter().map(str::to_string).collect();

    let service = cloud.region(region)?;
    let snapshot = service.list_images(&ImageQuery {
        cloud_name: settings.cloud_name.clone(),
        content_id: Some(ctx.content_id.clone()),
    })?;
    debug!("Region {} has {} image(s) for {}", region, snapshot.len(), ctx.content_id);

    let policy = RetentionPolicy::from(mirror);
    let decision = retention::decide(&policy, &items, &snapshot, &source_ids);
    let plan = planner::plan(&decision, &store);

    let mut report = RegionReport {
        region: region.to_string(),
        matched: items.len(),
        rejected,
        failed: plan.rejected.len(),
        ..Default::default()
    };
    let latest_marker =
        |pedigree: &Pedigree| policy.latest_property.then(|| decision.latest.contains(pedigree));

    let mut executor = TransferExecutor::new(
        service.as_ref(),
        &store,
        reader.source(),
        &ctx,
        shutdown,
        ProgressAggregator::new(plan.download_count(), plan.download_bytes()),
    );

    for entry in &plan.entries {
        if shutdown.is_triggered() {
            report.interrupted = true;
            break;
        }
        let artifact = match executor.fetch(entry) {
            Ok((artifact, downloaded)) => {
                if downloaded {
                    report.downloaded += 1;
                }
                artifact
            }
            Err(Error::Interrupted) => {
                report.interrupted = true;
                break;
            }
            Err(e) => {
                warn!("Skipping {}: {}", entry.item.pedigree, e);
                report.failed += 1;
                continue;
            }
        };
        let latest = latest_marker(&entry.item.pedigree).unwrap_or(false);
        match executor.publish(entry, &artifact, latest, &mut ledger) {
            Ok(_) => report.published += 1,
            Err(e) => {
                warn!("Failed to publish {}: {}", entry.item.pedigree, e);
                report.failed += 1;
            }
        }
    }
    report.bytes_downloaded = executor.progress().total_written();

    if !report.interrupted {
        for record in &decision.kept {
            let Some(pedigree) = record.pedigree() else { continue };
            let Some(item) = items.iter().find(|i| i.pedigree == pedigree) else {
                continue;
            };
            match executor.refresh(record, item, latest_marker(&pedigree), &mut ledger) {
                Ok(true) => report.updated += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to update image {} ({}): {}", record.id, record.name, e);
                    report.failed += 1;
                }
            }
        }

        let guard = RemovalGuard::new(service.as_ref(), &store, &settings.cloud_name);
        for removal in &decision.removals {
            match guard.remove(removal, &mut ledger) {
                Ok(RemovalOutcome::Deleted | RemovalOutcome::Forgotten) => report.removed += 1,
                Ok(RemovalOutcome::InUse(_)) => {
                    report.skipped_in_use += 1;
                    // A record that outlives its removal must not stay marked
                    if policy.latest_property && removal.record.is_latest() {
                        let update = ImageUpdate {
                            remove: vec![props::LATEST.to_string()],
                            ..Default::default()
                        };
                        match service.update_image(&removal.record.id, &update) {
                            Ok(()) => report.updated += 1,
                            Err(e) => warn!("Failed to clear latest on {}: {}", removal.record.id, e),
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to remove image {} ({}): {}", removal.record.id, removal.record.name, e);
                    report.failed += 1;
                }
            }
        }

        match guard.prune_cache() {
            Ok(0) => {}
            Ok(pruned) => info!("Pruned {} unreferenced cache entr(ies) in {}", pruned, region),
            Err(e) => warn!("Cache pruning in {} failed: {}", region, e),
        }
    }

    ledger.save()?;
    Ok(report)
}
