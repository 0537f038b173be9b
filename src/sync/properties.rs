// src/sync/properties.rs

//! Mapping from catalog items to target image metadata

use crate::config::MirrorConfig;
use crate::error::Result;
use crate::streams::CatalogItem;
use crate::target::props;
use std::collections::BTreeMap;

/// Container format of every published image
pub const CONTAINER_FORMAT: &str = "bare";

/// Target-side identity of one region pass
#[derive(Debug, Clone)]
pub struct PublishContext<'a> {
    pub mirror: &'a MirrorConfig,
    pub region: &'a str,
    pub cloud_name: &'a str,
    pub name_prefix: &'a str,
    /// Target content id, region already substituted
    pub content_id: String,
}

impl<'a> PublishContext<'a> {
    pub fn new(mirror: &'a MirrorConfig, region: &'a str, cloud_name: &'a str, name_prefix: &'a str) -> Self {
        Self {
            mirror,
            region,
            cloud_name,
            name_prefix,
            content_id: mirror.content_id_for(region),
        }
    }

    /// Published name of an item
    pub fn image_name(&self, item: &CatalogItem) -> String {
        format!("{}{}", self.name_prefix, item.pubname())
    }

    /// Managed properties an up-to-date record for `item` carries
    ///
    /// The `latest` marker is not included; it depends on the whole family.
    pub fn desired_properties(&self, item: &CatalogItem) -> Result<BTreeMap<String, String>> {
        let checksum = item.checksum()?;
        let mut properties = self.mirror.custom_properties.clone();
        properties.extend(os_properties(item));

        let pedigree = &item.pedigree;
        for (key, value) in [
            (props::CLOUD, self.cloud_name),
            (props::CONTENT_ID, self.content_id.as_str()),
            (props::SOURCE_CONTENT_ID, pedigree.content_id.as_str()),
            (props::PRODUCT_NAME, pedigree.product_name.as_str()),
            (props::VERSION_NAME, pedigree.version_name.as_str()),
            (props::ITEM_NAME, pedigree.item_name.as_str()),
            (props::REGION, self.region),
        ] {
            properties.insert(key.to_string(), value.to_string());
        }
        properties.insert(props::CHECKSUM.to_string(), checksum.to_prefixed_string());

        if self.mirror.hypervisor_mapping {
            if let Some(hypervisor) = item.ftype().as_deref().and_then(hypervisor_type) {
                properties.insert(props::HYPERVISOR_TYPE.to_string(), hypervisor.to_string());
            }
        }
        Ok(properties)
    }
}

/// Glance architecture name for a Debian-style one
pub fn architecture(arch: &str) -> &str {
    match arch {
        "amd64" => "x86_64",
        "arm64" => "aarch64",
        "i386" => "i686",
        "armhf" => "armv7l",
        "ppc64el" => "ppc64le",
        other => other,
    }
}

/// `os_distro`, `os_version` and `architecture` derived from item attributes
pub fn os_properties(item: &CatalogItem) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    if let Some(os) = item.attr_text("os") {
        properties.insert(props::OS_DISTRO.to_string(), os);
    }
    if let Some(version) = item.attr_text("version") {
        properties.insert(props::OS_VERSION.to_string(), version);
    }
    if let Some(arch) = item.arch() {
        properties.insert(props::ARCHITECTURE.to_string(), architecture(&arch).to_string());
    }
    properties
}

/// Disk format for a simplestreams file type
pub fn disk_format(ftype: &str) -> &'static str {
    match ftype {
        "disk1.img" | "disk.img" | "uefi1.img" | "disk-kvm.img" => "qcow2",
        "root.tar.xz" | "root.tar.gz" => "root-tar",
        "squashfs" => "squashfs",
        _ => "raw",
    }
}

/// Hypervisor able to boot a file type
pub fn hypervisor_type(ftype: &str) -> Option<&'static str> {
    match ftype {
        "disk1.img" | "disk.img" | "uefi1.img" | "disk-kvm.img" => Some("qemu"),
        "root.tar.xz" | "root.tar.gz" | "squashfs" => Some("lxc"),
        _ => None,
    }
}
