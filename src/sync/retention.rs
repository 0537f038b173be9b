// src/sync/retention.rs

//! Retention policy
//!
//! Items are grouped into families by product name; a family's versions are
//! its version names. The newest `max_items` versions of each family are
//! retained for publishing. Existing target records are then classified:
//!
//! - version retained: keep
//! - still listed by the filtered source, but past the cutoff: keep only
//!   with `keep_items`
//! - no longer listed by the filtered source: remove
//!
//! Only records whose source content id belongs to the catalog being synced
//! are classified; records published from other streams are left alone.

use crate::config::{MirrorConfig, VersionOrder};
use crate::streams::{CatalogItem, Pedigree};
use crate::target::{props, TargetRecord};
use crate::version;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

use super::properties::{architecture, os_properties};

/// Retention settings of one mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_items: usize,
    pub keep_items: bool,
    pub version_order: VersionOrder,
    pub latest_property: bool,
}

impl From<&MirrorConfig> for RetentionPolicy {
    fn from(mirror: &MirrorConfig) -> Self {
        Self {
            max_items: mirror.max_items,
            keep_items: mirror.keep_items,
            version_order: mirror.version_order,
            latest_property: mirror.latest_property,
        }
    }
}

/// Why a record is slated for removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Past `max_items` and `keep_items` is off
    BeyondRetention,
    /// No longer listed by the filtered source
    GoneFromSource,
    /// Another record already carries the same pedigree
    Duplicate,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeyondRetention => write!(f, "beyond retention"),
            Self::GoneFromSource => write!(f, "gone from source"),
            Self::Duplicate => write!(f, "duplicate"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub record: TargetRecord,
    pub reason: RemovalReason,
}

/// Outcome of applying the policy to a catalog and a target snapshot
#[derive(Debug, Clone, Default)]
pub struct RetentionDecision {
    /// Items to have published, in catalog order
    pub retained: Vec<CatalogItem>,
    /// Existing records that stay
    pub kept: Vec<TargetRecord>,
    pub removals: Vec<Removal>,
    /// Pedigrees that should carry `latest=true`; empty unless latest
    /// marking is enabled
    pub latest: BTreeSet<Pedigree>,
}

impl RetentionDecision {
    /// Kept record for a pedigree
    pub fn kept_record(&self, pedigree: &Pedigree) -> Option<&TargetRecord> {
        self.kept.iter().find(|r| r.pedigree().as_ref() == Some(pedigree))
    }
}

/// Apply `policy` to the filtered `items` and the target `records`
///
/// `source_ids` are the content ids of the streams `items` came from.
pub fn decide(
    policy: &RetentionPolicy,
    items: &[CatalogItem],
    records: &[TargetRecord],
    source_ids: &BTreeSet<String>,
) -> RetentionDecision {
    let retained_versions = retained_versions(policy, items);
    let retained: Vec<CatalogItem> = items
        .iter()
        .filter(|item| {
            retained_versions
                .get(&item.pedigree.product_name)
                .is_some_and(|versions| versions.contains(&item.pedigree.version_name))
        })
        .cloned()
        .collect();

    let retained_set: HashSet<&Pedigree> = retained.iter().map(|i| &i.pedigree).collect();
    let listed_set: HashSet<&Pedigree> = items.iter().map(|i| &i.pedigree).collect();

    let mut decision = RetentionDecision::default();
    let mut seen: HashSet<Pedigree> = HashSet::new();

    for record in records {
        let Some(pedigree) = record.pedigree() else {
            warn!("Ignoring image {} ({}): no pedigree properties", record.id, record.name);
            continue;
        };
        if !source_ids.contains(&pedigree.content_id) {
            debug!("Image {} belongs to stream {}, not synced here", record.id, pedigree.content_id);
            continue;
        }
        if !seen.insert(pedigree.clone()) {
            decision.removals.push(Removal {
                record: record.clone(),
                reason: RemovalReason::Duplicate,
            });
            continue;
        }

        if retained_set.contains(&pedigree) {
            decision.kept.push(record.clone());
        } else if listed_set.contains(&pedigree) {
            if policy.keep_items {
                debug!("Keeping {} past max_items (keep_items)", pedigree);
                decision.kept.push(record.clone());
            } else {
                decision.removals.push(Removal {
                    record: record.clone(),
                    reason: RemovalReason::BeyondRetention,
                });
            }
        } else {
            decision.removals.push(Removal {
                record: record.clone(),
                reason: RemovalReason::GoneFromSource,
            });
        }
    }

    decision.retained = retained;
    if policy.latest_property {
        decision.latest = latest_markers(policy.version_order, &decision);
    }
    decision
}

/// Newest `max_items` version names per product family
fn retained_versions(policy: &RetentionPolicy, items: &[CatalogItem]) -> HashMap<String, BTreeSet<String>> {
    let mut families: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for item in items {
        families
            .entry(item.pedigree.product_name.as_str())
            .or_default()
            .insert(item.pedigree.version_name.as_str());
    }

    families
        .into_iter()
        .map(|(family, versions)| {
            let mut versions: Vec<String> = versions.into_iter().map(str::to_string).collect();
            version::sort_newest_first(policy.version_order, &mut versions);
            versions.truncate(policy.max_items);
            debug!("Family {}: retaining {:?}", family, versions);
            (family.to_string(), versions.into_iter().collect())
        })
        .collect()
}

/// Pick the newest pedigree per (os_version, architecture) among everything
/// that will exist after the pass
fn latest_markers(order: VersionOrder, decision: &RetentionDecision) -> BTreeSet<Pedigree> {
    let mut candidates: Vec<(Pedigree, Option<String>, Option<String>)> = Vec::new();
    let mut included: HashSet<Pedigree> = HashSet::new();

    for item in &decision.retained {
        let os = os_properties(item);
        included.insert(item.pedigree.clone());
        candidates.push((
            item.pedigree.clone(),
            os.get(props::OS_VERSION).cloned(),
            os.get(props::ARCHITECTURE).cloned(),
        ));
    }
    for record in &decision.kept {
        let Some(pedigree) = record.pedigree() else { continue };
        if included.insert(pedigree.clone()) {
            candidates.push((
                pedigree,
                record.property(props::OS_VERSION).map(str::to_string),
                record.property(props::ARCHITECTURE).map(|a| architecture(a).to_string()),
            ));
        }
    }

    let mut newest: BTreeMap<(String, String), Pedigree> = BTreeMap::new();
    for (pedigree, os_version, arch) in candidates {
        let (Some(os_version), Some(arch)) = (os_version, arch) else {
            continue;
        };
        match newest.get(&(os_version.clone(), arch.clone())) {
            Some(current) if newer(order, current, &pedigree) != Ordering::Less => {}
            _ => {
                newest.insert((os_version, arch), pedigree);
            }
        }
    }
    newest.into_values().collect()
}

fn newer(order: VersionOrder, a: &Pedigree, b: &Pedigree) -> Ordering {
    version::compare(order, &a.version_name, &b.version_name).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Visibility;
    use crate::streams::Attributes;
    use serde_json::json;

    const SOURCE: &str = "com.example:download";
    const FAMILY: &str = "com.example:22.04:amd64";

    fn item(product: &str, version: &str) -> CatalogItem {
        let attrs: Attributes = serde_json::from_value(json!({
            "version": "22.04",
            "arch": "amd64",
            "ftype": "disk1.img",
        }))
        .unwrap();
        CatalogItem::new(Pedigree::new(SOURCE, product, version, "disk1.img"), attrs)
    }

    fn record(id: &str, product: &str, version: &str) -> TargetRecord {
        let properties = [
            (props::SOURCE_CONTENT_ID, SOURCE),
            (props::PRODUCT_NAME, product),
            (props::VERSION_NAME, version),
            (props::ITEM_NAME, "disk1.img"),
            (props::OS_VERSION, "22.04"),
            (props::ARCHITECTURE, "x86_64"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        TargetRecord {
            id: id.to_string(),
            name: format!("{product}-{version}"),
            visibility: Visibility::Public,
            properties,
        }
    }

    fn policy(max_items: usize, keep_items: bool) -> RetentionPolicy {
        RetentionPolicy {
            max_items,
            keep_items,
            version_order: VersionOrder::Lexical,
            latest_property: true,
        }
    }

    fn sources() -> BTreeSet<String> {
        [SOURCE.to_string()].into_iter().collect()
    }

    fn versions(items: &[CatalogItem]) -> Vec<&str> {
        items.iter().map(|i| i.pedigree.version_name.as_str()).collect()
    }

    #[test]
    fn test_retains_newest_per_family() {
        let items: Vec<_> = ["v1", "v2", "v3", "v4", "v5"].iter().map(|v| item(FAMILY, v)).collect();
        let decision = decide(&policy(2, false), &items, &[], &sources());
        assert_eq!(versions(&decision.retained), vec!["v4", "v5"]);
    }

    #[test]
    fn test_families_are_independent() {
        let items = vec![item(FAMILY, "v1"), item(FAMILY, "v2"), item("other", "v1")];
        let decision = decide(&policy(1, false), &items, &[], &sources());
        assert_eq!(decision.retained.len(), 2);
        assert!(decision.retained.iter().any(|i| i.pedigree.product_name == "other"));
    }

    #[test]
    fn test_record_classification() {
        let items: Vec<_> = ["v1", "v2", "v3"].iter().map(|v| item(FAMILY, v)).collect();
        let records = vec![
            record("a", FAMILY, "v3"),
            record("b", FAMILY, "v2"),
            record("c", FAMILY, "v0"),
        ];

        let strict = decide(&policy(1, false), &items, &records, &sources());
        assert_eq!(strict.kept.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["a"]);
        let reasons: Vec<_> = strict.removals.iter().map(|r| (r.record.id.as_str(), r.reason)).collect();
        assert_eq!(
            reasons,
            vec![("b", RemovalReason::BeyondRetention), ("c", RemovalReason::GoneFromSource)]
        );

        let lenient = decide(&policy(1, true), &items, &records, &sources());
        assert_eq!(lenient.kept.len(), 2);
        assert_eq!(lenient.removals.len(), 1);
        assert_eq!(lenient.removals[0].reason, RemovalReason::GoneFromSource);
    }

    #[test]
    fn test_duplicates_removed() {
        let items = vec![item(FAMILY, "v1")];
        let records = vec![record("first", FAMILY, "v1"), record("second", FAMILY, "v1")];
        let decision = decide(&policy(1, false), &items, &records, &sources());
        assert_eq!(decision.kept[0].id, "first");
        assert_eq!(decision.removals[0].record.id, "second");
        assert_eq!(decision.removals[0].reason, RemovalReason::Duplicate);
    }

    #[test]
    fn test_other_streams_untouched() {
        let mut foreign = record("x", FAMILY, "v1");
        foreign
            .properties
            .insert(props::SOURCE_CONTENT_ID.to_string(), "com.example:daily".to_string());
        let decision = decide(&policy(1, false), &[], &[foreign], &sources());
        assert!(decision.kept.is_empty());
        assert!(decision.removals.is_empty());
    }

    #[test]
    fn test_latest_marks_newest() {
        let items: Vec<_> = ["v1", "v2"].iter().map(|v| item(FAMILY, v)).collect();
        let decision = decide(&policy(2, false), &items, &[record("a", FAMILY, "v1")], &sources());
        assert_eq!(decision.latest.len(), 1);
        assert_eq!(decision.latest.iter().next().unwrap().version_name, "v2");
    }

    #[test]
    fn test_latest_moves_off_kept_records() {
        let items: Vec<_> = ["v1", "v2", "v3"].iter().map(|v| item(FAMILY, v)).collect();
        let mut old = record("a", FAMILY, "v2");
        old.properties.insert(props::LATEST.to_string(), "true".to_string());
        let decision = decide(&policy(1, true), &items, &[old], &sources());
        assert_eq!(decision.kept.len(), 1);
        let latest: Vec<_> = decision.latest.iter().map(|p| p.version_name.as_str()).collect();
        assert_eq!(latest, vec!["v3"]);
    }

    #[test]
    fn test_semantic_order() {
        let items: Vec<_> = ["1.9.0", "1.10.0"].iter().map(|v| item(FAMILY, v)).collect();
        let mut semantic = policy(1, false);
        semantic.version_order = VersionOrder::Semantic;
        assert_eq!(versions(&decide(&semantic, &items, &[], &sources()).retained), vec!["1.10.0"]);
        assert_eq!(versions(&decide(&policy(1, false), &items, &[], &sources()).retained), vec!["1.9.0"]);
    }

    #[test]
    fn test_latest_disabled() {
        let items = vec![item(FAMILY, "v1")];
        let mut p = policy(1, false);
        p.latest_property = false;
        assert!(decide(&p, &items, &[], &sources()).latest.is_empty());
    }
}
