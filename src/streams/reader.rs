// src/streams/reader.rs

//! Catalog reader
//!
//! Loads the entry document of a mirror (an index or a single products
//! document), verifies signed documents, and yields catalog items lazily:
//! each product stream is fetched only when iteration reaches it.

use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};

use super::model::{
    CatalogItem, IndexDocument, ProductsDocument, IMAGE_DOWNLOADS, INDEX_FORMAT, PRODUCTS_FORMAT,
};
use super::signed::{is_signed_path, Keyring};
use super::source::CatalogSource;

/// Reads documents from one mirror, enforcing signatures on `.sjson` paths
pub struct CatalogReader {
    source: Box<dyn CatalogSource>,
    keyring: Option<Arc<Keyring>>,
}

impl CatalogReader {
    pub fn new(source: Box<dyn CatalogSource>, keyring: Option<Arc<Keyring>>) -> Self {
        Self { source, keyring }
    }

    pub fn source(&self) -> &dyn CatalogSource {
        self.source.as_ref()
    }

    /// Fetch a document, verifying it first when its path says it is signed
    pub fn read_document(&self, path: &str) -> Result<Vec<u8>> {
        let raw = self.source.fetch(path)?;
        if !is_signed_path(path) {
            return Ok(raw);
        }
        let keyring = self.keyring.as_ref().ok_or_else(|| {
            Error::VerificationError(format!("{} is signed but no keyring is loaded", path))
        })?;
        let content = keyring.verify_cleartext(&raw).map_err(|e| match e {
            Error::VerificationError(msg) => {
                Error::VerificationError(format!("{}: {}", self.source.describe(path), msg))
            }
            other => other,
        })?;
        info!("Verified signature of {}", self.source.describe(path));
        Ok(content)
    }

    fn read_json(&self, path: &str) -> Result<serde_json::Value> {
        let content = self.read_document(path)?;
        serde_json::from_slice(&content)
            .map_err(|e| Error::ParseError(format!("{}: {e}", self.source.describe(path))))
    }

    /// Load the entry document and list the product streams it references
    pub fn open(&self, path: &str) -> Result<Catalog<'_>> {
        let value = self.read_json(path)?;
        let format = value.get("format").and_then(|f| f.as_str()).unwrap_or_default();

        let streams = match format {
            INDEX_FORMAT => {
                let index: IndexDocument = serde_json::from_value(value).map_err(|e| {
                    Error::ParseError(format!("{}: {e}", self.source.describe(path)))
                })?;
                let mut streams = Vec::new();
                for (content_id, entry) in index.index {
                    if let Some(datatype) = entry.datatype.as_deref() {
                        if datatype != IMAGE_DOWNLOADS {
                            debug!("Skipping stream {} with datatype {}", content_id, datatype);
                            continue;
                        }
                    }
                    if let Some(format) = entry.format.as_deref() {
                        if format != PRODUCTS_FORMAT {
                            debug!("Skipping stream {} with format {}", content_id, format);
                            continue;
                        }
                    }
                    streams.push(StreamRef {
                        content_id,
                        path: entry.path,
                        preloaded: None,
                    });
                }
                streams
            }
            PRODUCTS_FORMAT => {
                let doc = parse_products(value, &self.source.describe(path))?;
                vec![StreamRef {
                    content_id: doc.content_id.clone(),
                    path: path.to_string(),
                    preloaded: Some(Arc::new(doc)),
                }]
            }
            other => {
                return Err(Error::ParseError(format!(
                    "{}: unsupported document format '{}'",
                    self.source.describe(path),
                    other
                )));
            }
        };

        info!(
            "Catalog {} lists {} product stream(s)",
            self.source.describe(path),
            streams.len()
        );
        Ok(Catalog {
            reader: self,
            streams,
        })
    }

    fn load_products(&self, stream: &StreamRef) -> Result<Vec<CatalogItem>> {
        let doc = match &stream.preloaded {
            Some(doc) => doc.clone(),
            None => {
                let value = self.read_json(&stream.path)?;
                Arc::new(parse_products(value, &self.source.describe(&stream.path))?)
            }
        };
        if doc.content_id != stream.content_id {
            return Err(Error::ParseError(format!(
                "{}: content_id '{}' does not match index entry '{}'",
                self.source.describe(&stream.path),
                doc.content_id,
                stream.content_id
            )));
        }
        let items = doc.flatten();
        debug!("Stream {} has {} item(s)", stream.content_id, items.len());
        Ok(items)
    }
}

fn parse_products(value: serde_json::Value, location: &str) -> Result<ProductsDocument> {
    serde_json::from_value(value).map_err(|e| Error::ParseError(format!("{}: {e}", location)))
}

#[derive(Debug, Clone)]
struct StreamRef {
    content_id: String,
    path: String,
    preloaded: Option<Arc<ProductsDocument>>,
}

/// A loaded entry document
pub struct Catalog<'a> {
    reader: &'a CatalogReader,
    streams: Vec<StreamRef>,
}

impl<'a> Catalog<'a> {
    /// Content ids of the product streams, in index order
    pub fn content_ids(&self) -> Vec<&str> {
        self.streams.iter().map(|s| s.content_id.as_str()).collect()
    }

    /// Iterate over all items; each call starts over from the first stream
    pub fn items(&self) -> CatalogItems<'a> {
        CatalogItems {
            reader: self.reader,
            pending: self.streams.iter().cloned().collect(),
            current: Vec::new().into_iter(),
        }
    }
}

/// Lazy item sequence; product documents are fetched on demand
pub struct CatalogItems<'a> {
    reader: &'a CatalogReader,
    pending: VecDeque<StreamRef>,
    current: std::vec::IntoIter<CatalogItem>,
}

impl Iterator for CatalogItems<'_> {
    type Item = Result<CatalogItem>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.current.next() {
                return Some(Ok(item));
            }
            let stream = self.pending.pop_front()?;
            match self.reader.load_products(&stream) {
                Ok(items) => self.current = items.into_iter(),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::signed::tests::{clearsign, test_cert};
    use crate::streams::source::FileSource;
    use std::path::Path;

    const INDEX: &str = r#"{
        "format": "index:1.0",
        "index": {
            "com.example:download": {
                "datatype": "image-downloads",
                "format": "products:1.0",
                "path": "streams/v1/download.json"
            },
            "com.example:ids": {
                "datatype": "image-ids",
                "format": "products:1.0",
                "path": "streams/v1/ids.json"
            }
        }
    }"#;

    const PRODUCTS: &str = r#"{
        "content_id": "com.example:download",
        "format": "products:1.0",
        "products": {
            "com.example:22.04:amd64": {
                "arch": "amd64",
                "versions": {
                    "20240101": {"items": {"disk1.img": {"ftype": "disk1.img", "path": "a.img", "md5": "5eb63bbbe01eeed093cb22bb8f5acdc3", "size": 11}}},
                    "20240201": {"items": {"disk1.img": {"ftype": "disk1.img", "path": "b.img", "md5": "5eb63bbbe01eeed093cb22bb8f5acdc3", "size": 11}}}
                }
            }
        }
    }"#;

    fn write(root: &Path, path: &str, content: &[u8]) {
        let full = root.join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }

    #[test]
    fn test_index_items() {
        let temp = tempfile::TempDir::new().unwrap();
        write(temp.path(), "streams/v1/index.json", INDEX.as_bytes());
        write(temp.path(), "streams/v1/download.json", PRODUCTS.as_bytes());

        let reader = CatalogReader::new(Box::new(FileSource::new(temp.path())), None);
        let catalog = reader.open("streams/v1/index.json").unwrap();
        assert_eq!(catalog.content_ids(), vec!["com.example:download"]);

        let items: Vec<_> = catalog.items().collect::<Result<_>>().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].pedigree.version_name, "20240101");

        // Restartable
        assert_eq!(catalog.items().count(), 2);
    }

    #[test]
    fn test_products_document_as_entry() {
        let temp = tempfile::TempDir::new().unwrap();
        write(temp.path(), "streams/v1/download.json", PRODUCTS.as_bytes());

        let reader = CatalogReader::new(Box::new(FileSource::new(temp.path())), None);
        let catalog = reader.open("streams/v1/download.json").unwrap();
        assert_eq!(catalog.items().count(), 2);
    }

    #[test]
    fn test_products_fetched_lazily() {
        let temp = tempfile::TempDir::new().unwrap();
        write(temp.path(), "streams/v1/index.json", INDEX.as_bytes());

        let reader = CatalogReader::new(Box::new(FileSource::new(temp.path())), None);
        // Opening succeeds without the products document
        let catalog = reader.open("streams/v1/index.json").unwrap();
        let first = catalog.items().next().unwrap();
        assert!(matches!(first, Err(Error::FetchError(_))));
    }

    #[test]
    fn test_malformed_document() {
        let temp = tempfile::TempDir::new().unwrap();
        write(temp.path(), "streams/v1/index.json", b"{not json");
        let reader = CatalogReader::new(Box::new(FileSource::new(temp.path())), None);
        assert!(matches!(reader.open("streams/v1/index.json"), Err(Error::ParseError(_))));

        write(temp.path(), "streams/v1/other.json", b"{\"format\": \"weird:2.0\"}");
        assert!(matches!(reader.open("streams/v1/other.json"), Err(Error::ParseError(_))));
    }

    #[test]
    fn test_signed_index_verified() {
        let temp = tempfile::TempDir::new().unwrap();
        let cert = test_cert("catalog@example.org");
        let index = INDEX.replace("download.json", "download.sjson");
        write(temp.path(), "streams/v1/index.sjson", &clearsign(&cert, index.as_bytes()));
        write(temp.path(), "streams/v1/download.sjson", &clearsign(&cert, PRODUCTS.as_bytes()));

        let keyring = Arc::new(Keyring::from_certs(vec![cert]));
        let reader = CatalogReader::new(Box::new(FileSource::new(temp.path())), Some(keyring));
        let catalog = reader.open("streams/v1/index.sjson").unwrap();
        assert_eq!(catalog.items().filter(|i| i.is_ok()).count(), 2);
    }

    #[test]
    fn test_signed_without_keyring_fails() {
        let temp = tempfile::TempDir::new().unwrap();
        let cert = test_cert("catalog@example.org");
        write(temp.path(), "streams/v1/index.sjson", &clearsign(&cert, INDEX.as_bytes()));

        let reader = CatalogReader::new(Box::new(FileSource::new(temp.path())), None);
        assert!(matches!(
            reader.open("streams/v1/index.sjson"),
            Err(Error::VerificationError(_))
        ));
    }

    #[test]
    fn test_unsigned_sjson_rejected() {
        let temp = tempfile::TempDir::new().unwrap();
        write(temp.path(), "streams/v1/index.sjson", INDEX.as_bytes());
        let keyring = Arc::new(Keyring::from_certs(vec![test_cert("catalog@example.org")]));
        let reader = CatalogReader::new(Box::new(FileSource::new(temp.path())), Some(keyring));
        assert!(matches!(
            reader.open("streams/v1/index.sjson"),
            Err(Error::VerificationError(_))
        ));
    }
}
