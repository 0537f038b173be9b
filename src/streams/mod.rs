// src/streams/mod.rs

//! Simplestreams catalog access
//!
//! This module provides functionality for:
//! - Fetching index and product-stream documents over HTTP or from disk
//! - Verifying OpenPGP cleartext signatures on `.sjson` documents
//! - Flattening product trees into catalog items with their pedigree

mod model;
mod reader;
mod source;

pub mod signed;

pub use model::{
    Attributes, CatalogItem, IndexDocument, IndexEntry, Pedigree, Product, ProductVersion,
    ProductsDocument, IMAGE_DOWNLOADS, INDEX_FORMAT, PRODUCTS_FORMAT,
};
pub use reader::{Catalog, CatalogItems, CatalogReader};
pub use signed::Keyring;
pub use source::{source_for_url, CatalogSource, FileSource, HttpSource};
