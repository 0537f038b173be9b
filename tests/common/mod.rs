// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.
//!
//! [`CatalogFixture`] writes a file-backed simplestreams mirror (index,
//! products document and artifacts) into a temporary directory; passes run
//! against a [`MemoryCloud`].

#![allow(dead_code)]

use imagesync::config::{MirrorConfig, Settings};
use imagesync::hash::{hash_bytes, HashAlgorithm};
use imagesync::target::memory::MemoryCloud;
use imagesync::target::{props, TargetRecord};
use imagesync::{PassReport, RegionReport, Scheduler, Visibility};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const CONTENT_ID: &str = "com.ubuntu.cloud:released:download";
pub const INDEX_PATH: &str = "streams/v1/index.json";
pub const PRODUCTS_PATH: &str = "streams/v1/com.ubuntu.cloud-released-download.json";

#[derive(Debug, Clone)]
struct ProductFixture {
    release: String,
    os_version: String,
    arch: String,
    ftype: String,
    /// version name -> artifact bytes
    versions: BTreeMap<String, Vec<u8>>,
    /// Bytes served instead of the declared ones
    served: BTreeMap<String, Vec<u8>>,
}

/// A mirror on disk that tests edit between passes
pub struct CatalogFixture {
    pub dir: TempDir,
    products: BTreeMap<String, ProductFixture>,
}

impl CatalogFixture {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            products: BTreeMap::new(),
        }
    }

    /// Mirror root, usable as a mirror URL
    pub fn url(&self) -> String {
        self.dir.path().to_string_lossy().into_owned()
    }

    /// Register a product and return its name
    pub fn add_product(&mut self, release: &str, os_version: &str, arch: &str) -> String {
        self.add_product_with_ftype(release, os_version, arch, "disk1.img")
    }

    pub fn add_product_with_ftype(
        &mut self,
        release: &str,
        os_version: &str,
        arch: &str,
        ftype: &str,
    ) -> String {
        let name = format!("com.ubuntu.cloud:server:{os_version}:{arch}");
        self.products.insert(
            name.clone(),
            ProductFixture {
                release: release.to_string(),
                os_version: os_version.to_string(),
                arch: arch.to_string(),
                ftype: ftype.to_string(),
                versions: BTreeMap::new(),
                served: BTreeMap::new(),
            },
        );
        name
    }

    pub fn add_version(&mut self, product: &str, version: &str, data: &[u8]) {
        self.product(product).versions.insert(version.to_string(), data.to_vec());
        self.write();
    }

    pub fn remove_version(&mut self, product: &str, version: &str) {
        self.product(product).versions.remove(version);
        self.product(product).served.remove(version);
        self.write();
    }

    /// Serve bytes that do not match the declared checksum
    pub fn corrupt(&mut self, product: &str, version: &str, data: &[u8]) {
        self.product(product).served.insert(version.to_string(), data.to_vec());
        self.write();
    }

    fn product(&mut self, name: &str) -> &mut ProductFixture {
        self.products.get_mut(name).unwrap()
    }

    fn artifact_path(product: &str, version: &str, ftype: &str) -> String {
        format!("server/{}/{}/{}", product.replace(':', "_"), version, ftype)
    }

    /// Rewrite index, products document and artifacts
    pub fn write(&self) {
        let root = self.dir.path();
        let product_names: Vec<&String> = self.products.keys().collect();
        let mut entries = Map::new();
        entries.insert(
            CONTENT_ID.to_string(),
            json!({
                "datatype": "image-downloads",
                "format": "products:1.0",
                "path": PRODUCTS_PATH,
                "products": product_names,
            }),
        );
        let index = json!({
            "format": "index:1.0",
            "updated": "Mon, 01 Jan 2024 00:00:00 +0000",
            "index": Value::Object(entries),
        });
        write_file(root, INDEX_PATH, &serde_json::to_vec_pretty(&index).unwrap());

        let mut products = Map::new();
        for (name, product) in &self.products {
            let mut versions = Map::new();
            for (version, data) in &product.versions {
                let path = Self::artifact_path(name, version, &product.ftype);
                let served = product.served.get(version).unwrap_or(data);
                write_file(root, &path, served);

                let checksum = hash_bytes(HashAlgorithm::Sha256, data);
                let mut items = Map::new();
                items.insert(
                    product.ftype.clone(),
                    json!({
                        "ftype": product.ftype,
                        "path": path,
                        "sha256": checksum.as_str(),
                        "size": data.len(),
                    }),
                );
                versions.insert(version.clone(), json!({ "items": Value::Object(items) }));
            }
            products.insert(
                name.clone(),
                json!({
                    "arch": product.arch,
                    "os": "ubuntu",
                    "release": product.release,
                    "version": product.os_version,
                    "versions": Value::Object(versions),
                }),
            );
        }
        let document = json!({
            "content_id": CONTENT_ID,
            "format": "products:1.0",
            "datatype": "image-downloads",
            "products": Value::Object(products),
        });
        write_file(root, PRODUCTS_PATH, &serde_json::to_vec_pretty(&document).unwrap());
    }

    /// Mirror config reading this fixture into the given regions
    pub fn mirror(&self, regions: &[&str]) -> MirrorConfig {
        let mut mirror = MirrorConfig::new(self.url(), INDEX_PATH);
        mirror.regions = regions.iter().map(|r| r.to_string()).collect();
        mirror
    }
}

pub fn write_file(root: &Path, path: &str, content: &[u8]) {
    let full = root.join(path);
    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
    std::fs::write(full, content).unwrap();
}

/// Settings with one output directory and the given mirrors
pub fn settings(output: &Path, mirrors: Vec<MirrorConfig>) -> Settings {
    let settings = Settings {
        mirrors,
        output_directory: output.to_path_buf(),
        cloud_name: "test-cloud".to_string(),
        name_prefix: "auto-sync/".to_string(),
        keyring: PathBuf::from("/nonexistent/keyring.gpg"),
        ..Settings::default()
    };
    settings.validate().unwrap();
    settings
}

/// Run a single pass without a keyring
pub fn run_pass(settings: &Settings, cloud: &MemoryCloud) -> PassReport {
    let mut scheduler = Scheduler::new(settings.clone(), cloud, None);
    scheduler.run_pass()
}

/// Report of the only region of the only mirror
pub fn region_report(report: &PassReport) -> &RegionReport {
    assert!(report.failed_mirrors.is_empty(), "mirror failed: {:?}", report.failed_mirrors);
    &report.mirrors[0].regions[0]
}

/// A record carrying a full pedigree but owned by another cloud
pub fn foreign_record(product: &str, version: &str) -> TargetRecord {
    let properties = [
        (props::CLOUD, "other-cloud"),
        (props::CONTENT_ID, "RegionOne"),
        (props::SOURCE_CONTENT_ID, CONTENT_ID),
        (props::PRODUCT_NAME, product),
        (props::VERSION_NAME, version),
        (props::ITEM_NAME, "disk1.img"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    TargetRecord {
        id: "foreign-0001".to_string(),
        name: format!("manual/{version}"),
        visibility: Visibility::Private,
        properties,
    }
}
