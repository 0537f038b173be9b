// src/lib.rs

//! Simplestreams image synchronizer
//!
//! Mirrors signed simplestreams image catalogs into a cloud image service,
//! one region at a time.
//!
//! # Architecture
//!
//! - Catalogs: `index:1.0` / `products:1.0` documents, flattened into items
//!   that carry their pedigree (content id, product, version, item)
//! - Target: an [`target::ImageService`] per region; the engine only ever
//!   touches images tagged with its own cloud name
//! - Cache: a content-addressed object store per region, so every artifact
//!   is downloaded once and verified before it is published
//! - Passes: a scheduler runs every mirror and region, then sleeps until the
//!   next pass is due

pub mod config;
mod error;
pub mod filter;
pub mod hash;
pub mod openstack;
pub mod progress;
pub mod scheduler;
pub mod store;
pub mod streams;
pub mod sync;
pub mod target;
pub mod version;

pub use config::{MirrorConfig, Settings, Visibility};
pub use error::{Error, Result};
pub use hash::{Checksum, HashAlgorithm};
pub use progress::{ProgressAggregator, ProgressEvent, ProgressSummary};
pub use scheduler::{Clock, PassReport, Scheduler, SchedulerState, Shutdown, SystemClock};
pub use streams::{CatalogItem, CatalogReader, Keyring, Pedigree};
pub use sync::{MirrorReport, RegionReport};
