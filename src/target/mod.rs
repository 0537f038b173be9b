// src/target/mod.rs

//! Target image service capability
//!
//! The engine never talks to a cloud API directly. It works against
//! [`ImageService`], scoped to one region, obtained from a [`TargetCloud`].
//! Implementations:
//! - [`crate::openstack::OpenStackCloud`]: Glance images, Nova consumers
//! - [`memory::MemoryCloud`]: in-process, for dry environments and tests

pub mod memory;

use crate::config::Visibility;
use crate::error::Result;
use crate::streams::Pedigree;
use std::collections::BTreeMap;
use std::path::Path;

/// Image properties managed by the engine
pub mod props {
    /// Owning-cloud tag; only images carrying it are ever touched
    pub const CLOUD: &str = "simplestreams_cloud";
    /// Target content id (region substituted)
    pub const CONTENT_ID: &str = "content_id";
    pub const SOURCE_CONTENT_ID: &str = "source_content_id";
    pub const PRODUCT_NAME: &str = "product_name";
    pub const VERSION_NAME: &str = "version_name";
    pub const ITEM_NAME: &str = "item_name";
    pub const REGION: &str = "simplestreams_region";
    /// Prefixed checksum of the published artifact
    pub const CHECKSUM: &str = "simplestreams_checksum";
    pub const LATEST: &str = "latest";
    pub const HYPERVISOR_TYPE: &str = "hypervisor_type";
    pub const OS_DISTRO: &str = "os_distro";
    pub const OS_VERSION: &str = "os_version";
    pub const ARCHITECTURE: &str = "architecture";
}

/// An image as the target service reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRecord {
    pub id: String,
    pub name: String,
    pub visibility: Visibility,
    pub properties: BTreeMap<String, String>,
}

impl TargetRecord {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Pedigree recorded on the image, if it is complete
    pub fn pedigree(&self) -> Option<Pedigree> {
        Some(Pedigree::new(
            self.property(props::SOURCE_CONTENT_ID)?,
            self.property(props::PRODUCT_NAME)?,
            self.property(props::VERSION_NAME)?,
            self.property(props::ITEM_NAME)?,
        ))
    }

    /// Prefixed checksum of the artifact behind this record
    pub fn checksum(&self) -> Option<&str> {
        self.property(props::CHECKSUM)
    }

    pub fn is_latest(&self) -> bool {
        self.property(props::LATEST) == Some("true")
    }
}

/// Everything needed to create an image record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    pub name: String,
    pub visibility: Visibility,
    pub disk_format: String,
    pub container_format: String,
    pub properties: BTreeMap<String, String>,
}

/// Selection of images to list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageQuery {
    /// Owning cloud tag
    pub cloud_name: String,
    /// Restrict to one target content id
    pub content_id: Option<String>,
}

impl ImageQuery {
    pub fn matches(&self, record: &TargetRecord) -> bool {
        record.property(props::CLOUD) == Some(self.cloud_name.as_str())
            && self
                .content_id
                .as_deref()
                .is_none_or(|c| record.property(props::CONTENT_ID) == Some(c))
    }
}

/// In-place modification of an existing record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageUpdate {
    pub set: BTreeMap<String, String>,
    pub remove: Vec<String>,
    pub visibility: Option<Visibility>,
    pub name: Option<String>,
}

impl ImageUpdate {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty() && self.visibility.is_none() && self.name.is_none()
    }

    /// Changes that turn `record` into one with the desired managed state
    pub fn between(
        record: &TargetRecord,
        name: &str,
        visibility: Visibility,
        desired: &BTreeMap<String, String>,
    ) -> Self {
        let mut update = Self::default();
        for (key, value) in desired {
            if record.property(key) != Some(value.as_str()) {
                update.set.insert(key.clone(), value.clone());
            }
        }
        if record.visibility != visibility {
            update.visibility = Some(visibility);
        }
        if record.name != name {
            update.name = Some(name.to_string());
        }
        update
    }

    /// Apply to a local copy of a record
    pub fn apply_to(&self, record: &mut TargetRecord) {
        for (key, value) in &self.set {
            record.properties.insert(key.clone(), value.clone());
        }
        for key in &self.remove {
            record.properties.remove(key);
        }
        if let Some(visibility) = self.visibility {
            record.visibility = visibility;
        }
        if let Some(name) = &self.name {
            record.name = name.clone();
        }
    }
}

/// Image operations within one region
pub trait ImageService {
    /// List images matching the query
    fn list_images(&self, query: &ImageQuery) -> Result<Vec<TargetRecord>>;

    /// Create an image record (no data yet)
    fn create_image(&self, spec: &ImageSpec) -> Result<TargetRecord>;

    /// Upload image data as-is
    fn upload_image(&self, id: &str, artifact: &Path) -> Result<()>;

    /// Stage image data and import it, converting to `target_format`
    fn import_image(&self, id: &str, artifact: &Path, target_format: &str) -> Result<()>;

    fn update_image(&self, id: &str, update: &ImageUpdate) -> Result<()>;

    fn delete_image(&self, id: &str) -> Result<()>;

    /// Number of live consumers (e.g. instances) booted from the image
    fn count_consumers(&self, id: &str) -> Result<usize>;
}

/// Entry point to a target cloud
pub trait TargetCloud {
    /// Image service for one region
    fn region(&self, region: &str) -> Result<Box<dyn ImageService + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(props: &[(&str, &str)]) -> TargetRecord {
        TargetRecord {
            id: "id".to_string(),
            name: "n".to_string(),
            visibility: Visibility::Public,
            properties: props.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[test]
    fn test_pedigree_requires_all_parts() {
        let full = record(&[
            (props::SOURCE_CONTENT_ID, "c"),
            (props::PRODUCT_NAME, "p"),
            (props::VERSION_NAME, "v"),
            (props::ITEM_NAME, "i"),
        ]);
        assert_eq!(full.pedigree(), Some(Pedigree::new("c", "p", "v", "i")));

        let partial = record(&[(props::PRODUCT_NAME, "p")]);
        assert_eq!(partial.pedigree(), None);
    }

    #[test]
    fn test_query_matches_cloud_and_content() {
        let r = record(&[(props::CLOUD, "edge"), (props::CONTENT_ID, "RegionOne")]);
        let any = ImageQuery { cloud_name: "edge".to_string(), content_id: None };
        let same = ImageQuery { cloud_name: "edge".to_string(), content_id: Some("RegionOne".to_string()) };
        let other = ImageQuery { cloud_name: "edge".to_string(), content_id: Some("RegionTwo".to_string()) };
        let foreign = ImageQuery { cloud_name: "core".to_string(), content_id: None };
        assert!(any.matches(&r));
        assert!(same.matches(&r));
        assert!(!other.matches(&r));
        assert!(!foreign.matches(&r));
    }

    #[test]
    fn test_update_between_only_lists_differences() {
        let r = record(&[("a", "1"), ("b", "2")]);
        let desired: BTreeMap<_, _> = [("a".to_string(), "1".to_string()), ("b".to_string(), "3".to_string())]
            .into_iter()
            .collect();
        let update = ImageUpdate::between(&r, "n", Visibility::Public, &desired);
        assert_eq!(update.set.len(), 1);
        assert_eq!(update.set["b"], "3");
        assert!(update.visibility.is_none());
        assert!(update.name.is_none());

        let unchanged = ImageUpdate::between(&r, "n", Visibility::Public, &BTreeMap::new());
        assert!(unchanged.is_empty());
    }

    #[test]
    fn test_update_apply() {
        let mut r = record(&[("latest", "true"), ("a", "1")]);
        let update = ImageUpdate {
            remove: vec!["latest".to_string()],
            visibility: Some(Visibility::Private),
            ..Default::default()
        };
        update.apply_to(&mut r);
        assert!(!r.is_latest());
        assert_eq!(r.visibility, Visibility::Private);
    }
}
