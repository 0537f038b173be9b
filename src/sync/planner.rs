// src/sync/planner.rs

//! Dry-run transfer planning
//!
//! Diffs the retained items against the target snapshot and the local
//! object store. Planning has no side effects: the plan is what the
//! executor will do, and its totals size the progress tracker.

use crate::hash::Checksum;
use crate::store::ObjectStore;
use crate::streams::{CatalogItem, Pedigree};
use std::collections::HashSet;
use tracing::{info, warn};

use super::retention::RetentionDecision;

/// One item to publish
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub item: CatalogItem,
    pub checksum: Checksum,
    /// Declared size (0 when the catalog omits it)
    pub size: u64,
    /// The artifact is not in the object store yet
    pub needs_download: bool,
}

/// Ordered publication manifest of one region pass
#[derive(Debug, Clone, Default)]
pub struct TransferPlan {
    pub entries: Vec<PlanEntry>,
    /// Items that cannot be published, with the reason
    pub rejected: Vec<(Pedigree, String)>,
}

impl TransferPlan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of artifacts to download
    pub fn download_count(&self) -> usize {
        self.entries.iter().filter(|e| e.needs_download).count()
    }

    /// Bytes to download
    pub fn download_bytes(&self) -> u64 {
        self.entries
            .iter()
            .filter(|e| e.needs_download)
            .map(|e| e.size)
            .sum()
    }

    /// Bytes to publish, cached or not
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

/// Plan the publication of retained items without a target record
pub fn plan(decision: &RetentionDecision, store: &ObjectStore) -> TransferPlan {
    let published: HashSet<Pedigree> = decision.kept.iter().filter_map(|r| r.pedigree()).collect();
    let mut plan = TransferPlan::default();
    let mut scheduled: HashSet<Checksum> = HashSet::new();

    for item in &decision.retained {
        if published.contains(&item.pedigree) {
            continue;
        }
        if item.path().is_none() {
            warn!("Cannot publish {}: item has no path", item.pedigree);
            plan.rejected.push((item.pedigree.clone(), "item has no path".to_string()));
            continue;
        }
        let checksum = match item.checksum() {
            Ok(checksum) => checksum,
            Err(e) => {
                warn!("Cannot publish {}: {}", item.pedigree, e);
                plan.rejected.push((item.pedigree.clone(), e.to_string()));
                continue;
            }
        };

        // Two items sharing an artifact download it once
        let needs_download = !store.contains(&checksum) && scheduled.insert(checksum.clone());
        plan.entries.push(PlanEntry {
            item: item.clone(),
            checksum,
            size: item.size().unwrap_or(0),
            needs_download,
        });
    }

    info!(
        "Planned {} image(s): {} download(s), {} bytes",
        plan.len(),
        plan.download_count(),
        plan.download_bytes()
    );
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{hash_bytes, HashAlgorithm};
    use crate::streams::Attributes;
    use crate::target::{props, TargetRecord};
    use serde_json::json;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn item(version: &str, data: &[u8]) -> CatalogItem {
        let attrs: Attributes = serde_json::from_value(json!({
            "path": format!("{version}/disk1.img"),
            "sha256": hash_bytes(HashAlgorithm::Sha256, data).as_str(),
            "size": data.len(),
        }))
        .unwrap();
        CatalogItem::new(Pedigree::new("c", "p", version, "disk1.img"), attrs)
    }

    fn record_for(item: &CatalogItem) -> TargetRecord {
        let p = &item.pedigree;
        TargetRecord {
            id: "existing".to_string(),
            name: "n".to_string(),
            visibility: Default::default(),
            properties: [
                (props::SOURCE_CONTENT_ID, p.content_id.as_str()),
                (props::PRODUCT_NAME, p.product_name.as_str()),
                (props::VERSION_NAME, p.version_name.as_str()),
                (props::ITEM_NAME, p.item_name.as_str()),
            ]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        }
    }

    #[test]
    fn test_plan_skips_published_and_cached() {
        let temp = TempDir::new().unwrap();
        let store = ObjectStore::open(temp.path()).unwrap();

        let published = item("v1", b"one");
        let cached = item("v2", b"two");
        let fresh = item("v3", b"three");
        let checksum = cached.checksum().unwrap();
        store
            .insert("v2", &mut Cursor::new(b"two"), &checksum, &mut |_| Ok(()))
            .unwrap();

        let decision = RetentionDecision {
            retained: vec![published.clone(), cached, fresh],
            kept: vec![record_for(&published)],
            ..Default::default()
        };
        let plan = plan(&decision, &store);

        assert_eq!(plan.len(), 2);
        assert!(!plan.entries[0].needs_download);
        assert!(plan.entries[1].needs_download);
        assert_eq!(plan.download_count(), 1);
        assert_eq!(plan.download_bytes(), 5);
        assert_eq!(plan.total_bytes(), 8);
    }

    #[test]
    fn test_plan_rejects_items_without_checksum() {
        let temp = TempDir::new().unwrap();
        let store = ObjectStore::open(temp.path()).unwrap();
        let attrs: Attributes = serde_json::from_value(json!({"path": "x"})).unwrap();
        let decision = RetentionDecision {
            retained: vec![CatalogItem::new(Pedigree::new("c", "p", "v", "i"), attrs)],
            ..Default::default()
        };
        let plan = plan(&decision, &store);
        assert!(plan.is_empty());
        assert_eq!(plan.rejected.len(), 1);
    }

    #[test]
    fn test_shared_artifact_downloaded_once() {
        let temp = TempDir::new().unwrap();
        let store = ObjectStore::open(temp.path()).unwrap();
        let decision = RetentionDecision {
            retained: vec![item("v1", b"same"), item("v2", b"same")],
            ..Default::default()
        };
        let plan = plan(&decision, &store);
        assert_eq!(plan.download_count(), 1);
    }
}
