// src/streams/model.rs

//! Simplestreams document types and the flattened catalog item

use crate::error::{Error, Result};
use crate::hash::{Checksum, HashAlgorithm};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Format tag of an index document
pub const INDEX_FORMAT: &str = "index:1.0";

/// Format tag of a product-stream document
pub const PRODUCTS_FORMAT: &str = "products:1.0";

/// Datatype of the streams this engine mirrors
pub const IMAGE_DOWNLOADS: &str = "image-downloads";

/// Attribute bag carried at every level of a products tree
pub type Attributes = BTreeMap<String, Value>;

/// Root index document (`index:1.0`)
#[derive(Debug, Clone, Deserialize)]
pub struct IndexDocument {
    pub format: String,
    #[serde(default)]
    pub index: BTreeMap<String, IndexEntry>,
}

/// One product stream referenced by the index
#[derive(Debug, Clone, Deserialize)]
pub struct IndexEntry {
    /// Path of the products document, relative to the mirror root
    pub path: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub datatype: Option<String>,
}

/// Product-stream document (`products:1.0`)
#[derive(Debug, Clone, Deserialize)]
pub struct ProductsDocument {
    pub content_id: String,
    #[serde(default)]
    pub products: BTreeMap<String, Product>,
    #[serde(flatten)]
    pub attrs: Attributes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Product {
    #[serde(default)]
    pub versions: BTreeMap<String, ProductVersion>,
    #[serde(flatten)]
    pub attrs: Attributes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProductVersion {
    #[serde(default)]
    pub items: BTreeMap<String, Attributes>,
    #[serde(flatten)]
    pub attrs: Attributes,
}

/// Identity of a catalog item across sync passes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pedigree {
    pub content_id: String,
    pub product_name: String,
    pub version_name: String,
    pub item_name: String,
}

impl Pedigree {
    pub fn new(
        content_id: impl Into<String>,
        product_name: impl Into<String>,
        version_name: impl Into<String>,
        item_name: impl Into<String>,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            product_name: product_name.into(),
            version_name: version_name.into(),
            item_name: item_name.into(),
        }
    }
}

impl fmt::Display for Pedigree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.content_id, self.product_name, self.version_name, self.item_name
        )
    }
}

/// One item of a product stream with inherited attributes flattened in
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogItem {
    pub pedigree: Pedigree,
    attrs: Attributes,
}

impl CatalogItem {
    pub fn new(pedigree: Pedigree, attrs: Attributes) -> Self {
        Self { pedigree, attrs }
    }

    /// Raw attribute value
    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key)
    }

    /// Attribute formatted as text; containers and nulls have no text form
    pub fn attr_text(&self, key: &str) -> Option<String> {
        match self.attrs.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }

    /// Artifact path relative to the mirror root
    pub fn path(&self) -> Option<String> {
        self.attr_text("path")
    }

    /// Declared size in bytes
    pub fn size(&self) -> Option<u64> {
        match self.attrs.get("size")? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn arch(&self) -> Option<String> {
        self.attr_text("arch")
    }

    pub fn ftype(&self) -> Option<String> {
        self.attr_text("ftype")
    }

    /// Declared checksum, preferring sha256 over md5
    pub fn checksum(&self) -> Result<Checksum> {
        for algorithm in [HashAlgorithm::Sha256, HashAlgorithm::Md5] {
            if let Some(value) = self.attr_text(algorithm.name()) {
                return Checksum::new(algorithm, value).map_err(|e| {
                    Error::ParseError(format!("{}: bad {} checksum: {}", self.pedigree, algorithm, e))
                });
            }
        }
        Err(Error::ParseError(format!("{}: item declares no checksum", self.pedigree)))
    }

    /// Human-readable publication name
    pub fn pubname(&self) -> String {
        self.attr_text("pubname").unwrap_or_else(|| {
            format!(
                "{}-{}",
                self.pedigree.product_name.replace(':', "-"),
                self.pedigree.version_name
            )
        })
    }
}

fn scalar_attrs(attrs: &Attributes) -> impl Iterator<Item = (&String, &Value)> {
    attrs
        .iter()
        .filter(|(_, v)| matches!(v, Value::String(_) | Value::Number(_) | Value::Bool(_)))
}

impl ProductsDocument {
    /// Flatten the products tree into items, leaf attributes winning
    pub fn flatten(&self) -> Vec<CatalogItem> {
        let mut items = Vec::new();
        for (product_name, product) in &self.products {
            for (version_name, version) in &product.versions {
                for (item_name, item_attrs) in &version.items {
                    let mut attrs = Attributes::new();
                    for level in [&self.attrs, &product.attrs, &version.attrs, item_attrs] {
                        for (k, v) in scalar_attrs(level) {
                            attrs.insert(k.clone(), v.clone());
                        }
                    }
                    attrs.insert("content_id".to_string(), Value::String(self.content_id.clone()));
                    attrs.insert("product_name".to_string(), Value::String(product_name.clone()));
                    attrs.insert("version_name".to_string(), Value::String(version_name.clone()));
                    attrs.insert("item_name".to_string(), Value::String(item_name.clone()));

                    items.push(CatalogItem::new(
                        Pedigree::new(&self.content_id, product_name, version_name, item_name),
                        attrs,
                    ));
                }
            }
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRODUCTS: &str = r#"{
        "content_id": "com.ubuntu.cloud:released:download",
        "datatype": "image-downloads",
        "format": "products:1.0",
        "products": {
            "com.ubuntu.cloud:server:22.04:amd64": {
                "arch": "amd64",
                "os": "ubuntu",
                "release": "jammy",
                "version": "22.04",
                "versions": {
                    "20240101": {
                        "label": "release",
                        "pubname": "ubuntu-jammy-22.04-amd64-server-20240101",
                        "items": {
                            "disk1.img": {
                                "ftype": "disk1.img",
                                "path": "server/releases/jammy/20240101/disk1.img",
                                "sha256": "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f",
                                "size": 13
                            },
                            "root.tar.xz": {
                                "ftype": "root.tar.xz",
                                "path": "server/releases/jammy/20240101/root.tar.xz",
                                "md5": "5eb63bbbe01eeed093cb22bb8f5acdc3",
                                "size": 11,
                                "label": "override"
                            }
                        }
                    }
                }
            }
        }
    }"#;

    #[test]
    fn test_flatten_inherits_attributes() {
        let doc: ProductsDocument = serde_json::from_str(PRODUCTS).unwrap();
        let items = doc.flatten();
        assert_eq!(items.len(), 2);

        let disk = &items[0];
        assert_eq!(disk.pedigree.item_name, "disk1.img");
        assert_eq!(disk.arch().as_deref(), Some("amd64"));
        assert_eq!(disk.attr_text("release").as_deref(), Some("jammy"));
        assert_eq!(disk.attr_text("datatype").as_deref(), Some("image-downloads"));
        assert_eq!(disk.attr_text("label").as_deref(), Some("release"));
        assert_eq!(disk.size(), Some(13));
        assert_eq!(disk.checksum().unwrap().algorithm, HashAlgorithm::Sha256);

        let root = &items[1];
        assert_eq!(root.attr_text("label").as_deref(), Some("override"));
        assert_eq!(root.checksum().unwrap().algorithm, HashAlgorithm::Md5);
    }

    #[test]
    fn test_containers_are_not_attributes() {
        let doc: ProductsDocument = serde_json::from_str(PRODUCTS).unwrap();
        let item = &doc.flatten()[0];
        assert!(item.attr("versions").is_none());
        assert!(item.attr("items").is_none());
        assert_eq!(item.attr_text("product_name").as_deref(), Some("com.ubuntu.cloud:server:22.04:amd64"));
    }

    #[test]
    fn test_missing_checksum() {
        let item = CatalogItem::new(Pedigree::new("c", "p", "v", "i"), Attributes::new());
        assert!(matches!(item.checksum(), Err(Error::ParseError(_))));
    }

    #[test]
    fn test_pubname_fallback() {
        let item = CatalogItem::new(Pedigree::new("c", "com.example:os:1", "20240101", "i"), Attributes::new());
        assert_eq!(item.pubname(), "com.example-os-1-20240101");
    }
}
