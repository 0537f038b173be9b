// src/target/memory.rs

//! In-process image service
//!
//! Keeps images per region in memory and counts every mutating call, which
//! makes it suitable for exercising whole sync passes without a cloud.

use super::{ImageQuery, ImageService, ImageSpec, ImageUpdate, TargetCloud, TargetRecord};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredImage {
    record: TargetRecord,
    data: Option<Vec<u8>>,
    /// Format requested through the import path, if any
    imported_as: Option<String>,
}

#[derive(Debug, Default)]
struct RegionState {
    images: BTreeMap<String, StoredImage>,
    consumers: HashMap<String, usize>,
    /// Ids whose consumers were counted, in call order
    consumer_checks: Vec<String>,
    mutations: usize,
    failing_names: HashSet<String>,
}

/// In-memory cloud with independent regions
#[derive(Debug, Default)]
pub struct MemoryCloud {
    regions: Mutex<HashMap<String, RegionState>>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RegionState>> {
        // A poisoned lock only means a test thread panicked mid-call
        self.regions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the images in a region, ordered by id
    pub fn images(&self, region: &str) -> Vec<TargetRecord> {
        self.lock()
            .get(region)
            .map(|r| r.images.values().map(|i| i.record.clone()).collect())
            .unwrap_or_default()
    }

    /// Uploaded bytes of an image
    pub fn image_data(&self, region: &str, id: &str) -> Option<Vec<u8>> {
        self.lock().get(region)?.images.get(id)?.data.clone()
    }

    /// Format an image was imported as, when the import path was used
    pub fn imported_format(&self, region: &str, id: &str) -> Option<String> {
        self.lock().get(region)?.images.get(id)?.imported_as.clone()
    }

    /// Number of mutating calls made against a region
    pub fn mutations(&self, region: &str) -> usize {
        self.lock().get(region).map(|r| r.mutations).unwrap_or(0)
    }

    /// Ids passed to `count_consumers` in a region, in call order
    pub fn consumer_checks(&self, region: &str) -> Vec<String> {
        self.lock()
            .get(region)
            .map(|r| r.consumer_checks.clone())
            .unwrap_or_default()
    }

    /// Pretend `count` instances were booted from `id`
    pub fn set_consumers(&self, region: &str, id: &str, count: usize) {
        self.lock()
            .entry(region.to_string())
            .or_default()
            .consumers
            .insert(id.to_string(), count);
    }

    /// Make `create_image` fail for images with this name
    pub fn fail_creates_named(&self, region: &str, name: &str) {
        self.lock()
            .entry(region.to_string())
            .or_default()
            .failing_names
            .insert(name.to_string());
    }

    /// Insert a record directly (bypasses mutation counting)
    pub fn seed(&self, region: &str, record: TargetRecord) {
        self.lock()
            .entry(region.to_string())
            .or_default()
            .images
            .insert(
                record.id.clone(),
                StoredImage {
                    record,
                    data: None,
                    imported_as: None,
                },
            );
    }
}

impl TargetCloud for MemoryCloud {
    fn region(&self, region: &str) -> Result<Box<dyn ImageService + '_>> {
        self.lock().entry(region.to_string()).or_default();
        Ok(Box::new(MemoryImageService {
            cloud: self,
            region: region.to_string(),
        }))
    }
}

/// Region-scoped view of a [`MemoryCloud`]
pub struct MemoryImageService<'a> {
    cloud: &'a MemoryCloud,
    region: String,
}

impl MemoryImageService<'_> {
    fn with_region<T>(&self, f: impl FnOnce(&mut RegionState) -> Result<T>) -> Result<T> {
        let mut regions = self.cloud.lock();
        let state = regions.entry(self.region.clone()).or_default();
        f(state)
    }

    fn missing(&self, id: &str) -> Error {
        Error::PublishError(format!("image {} not found in {}", id, self.region))
    }
}

impl ImageService for MemoryImageService<'_> {
    fn list_images(&self, query: &ImageQuery) -> Result<Vec<TargetRecord>> {
        self.with_region(|state| {
            Ok(state
                .images
                .values()
                .filter(|i| query.matches(&i.record))
                .map(|i| i.record.clone())
                .collect())
        })
    }

    fn create_image(&self, spec: &ImageSpec) -> Result<TargetRecord> {
        self.with_region(|state| {
            if state.failing_names.contains(&spec.name) {
                return Err(Error::PublishError(format!("create rejected for {}", spec.name)));
            }
            state.mutations += 1;
            let mut properties = spec.properties.clone();
            properties.insert("disk_format".to_string(), spec.disk_format.clone());
            properties.insert("container_format".to_string(), spec.container_format.clone());
            let record = TargetRecord {
                id: uuid::Uuid::new_v4().to_string(),
                name: spec.name.clone(),
                visibility: spec.visibility,
                properties,
            };
            debug!("memory: created {} ({})", record.id, record.name);
            state.images.insert(
                record.id.clone(),
                StoredImage {
                    record: record.clone(),
                    data: None,
                    imported_as: None,
                },
            );
            Ok(record)
        })
    }

    fn upload_image(&self, id: &str, artifact: &Path) -> Result<()> {
        let data = std::fs::read(artifact)?;
        self.with_region(|state| {
            state.mutations += 1;
            let image = state.images.get_mut(id).ok_or_else(|| self.missing(id))?;
            image.data = Some(data);
            Ok(())
        })
    }

    fn import_image(&self, id: &str, artifact: &Path, target_format: &str) -> Result<()> {
        let data = std::fs::read(artifact)?;
        self.with_region(|state| {
            state.mutations += 1;
            let image = state.images.get_mut(id).ok_or_else(|| self.missing(id))?;
            image.data = Some(data);
            image.imported_as = Some(target_format.to_string());
            image
                .record
                .properties
                .insert("disk_format".to_string(), target_format.to_string());
            Ok(())
        })
    }

    fn update_image(&self, id: &str, update: &ImageUpdate) -> Result<()> {
        self.with_region(|state| {
            state.mutations += 1;
            let image = state.images.get_mut(id).ok_or_else(|| self.missing(id))?;
            update.apply_to(&mut image.record);
            Ok(())
        })
    }

    fn delete_image(&self, id: &str) -> Result<()> {
        self.with_region(|state| {
            state.mutations += 1;
            state.images.remove(id).ok_or_else(|| self.missing(id))?;
            state.consumers.remove(id);
            Ok(())
        })
    }

    fn count_consumers(&self, id: &str) -> Result<usize> {
        self.with_region(|state| {
            state.consumer_checks.push(id.to_string());
            Ok(state.consumers.get(id).copied().unwrap_or(0))
        })
    }
}
