// src/store/mod.rs

//! Per-region object store
//!
//! Downloaded artifacts are stored by checksum, similar to git's object
//! storage:
//!
//! ```text
//! <output_directory>/<region>/
//!     .lock                     advisory lock held while a pass runs
//!     ledger.json               published records (see [`Ledger`])
//!     objects/sha256/ab/cdef…   verified artifacts
//!     tmp/                      in-flight downloads
//! ```
//!
//! A download is written under `tmp/` and only renamed into `objects/` after
//! its checksum has been verified, so a partial file can never be mistaken
//! for a cache entry.

mod ledger;

pub use ledger::{Ledger, LedgerEntry};

use crate::error::{Error, Result};
use crate::hash::{Checksum, HashAlgorithm, Hasher};
use fs2::FileExt;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Buffer size for streaming downloads (64 KB)
const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Content-addressable artifact cache for one region
pub struct ObjectStore {
    root: PathBuf,
    objects_dir: PathBuf,
    tmp_dir: PathBuf,
    _lock: File,
}

impl ObjectStore {
    /// Open (creating on demand) the store rooted at `root`
    ///
    /// Takes an exclusive advisory lock on the directory and removes any
    /// partial downloads left behind by an interrupted run.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let objects_dir = root.join("objects");
        let tmp_dir = root.join("tmp");
        fs::create_dir_all(&objects_dir)?;
        fs::create_dir_all(&tmp_dir)?;

        let lock = File::create(root.join(".lock"))?;
        lock.try_lock_exclusive().map_err(|e| {
            Error::LockError(format!("{} is in use by another instance: {e}", root.display()))
        })?;

        let store = Self {
            root,
            objects_dir,
            tmp_dir,
            _lock: lock,
        };
        store.sweep_partials()?;
        debug!("Opened object store at {}", store.root.display());
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Storage path of a checksum: objects/{algorithm}/{first2}/{rest}
    pub fn path_for(&self, checksum: &Checksum) -> PathBuf {
        let value = checksum.as_str();
        let dir = self.objects_dir.join(checksum.algorithm.name());
        if value.len() < 2 {
            return dir.join(value);
        }
        let (prefix, suffix) = value.split_at(2);
        dir.join(prefix).join(suffix)
    }

    pub fn contains(&self, checksum: &Checksum) -> bool {
        self.path_for(checksum).is_file()
    }

    /// Stream `reader` into the store, verifying it against `expected`
    ///
    /// `on_chunk` is called with the size of each chunk written; returning an
    /// error aborts the transfer. On any failure nothing is added to the store.
    pub fn insert(
        &self,
        name: &str,
        reader: &mut dyn Read,
        expected: &Checksum,
        on_chunk: &mut dyn FnMut(u64) -> Result<()>,
    ) -> Result<PathBuf> {
        let dest = self.path_for(expected);
        if dest.is_file() {
            debug!("{} already cached as {}", name, expected);
            return Ok(dest);
        }

        let mut temp = tempfile::Builder::new()
            .prefix(".partial-")
            .tempfile_in(&self.tmp_dir)?;
        let mut hasher = Hasher::new(expected.algorithm);
        let mut buffer = vec![0u8; STREAM_BUFFER_SIZE];
        let mut written: u64 = 0;

        loop {
            let n = reader
                .read(&mut buffer)
                .map_err(|e| Error::FetchError(format!("Failed to read {}: {e}", name)))?;
            if n == 0 {
                break;
            }
            temp.write_all(&buffer[..n])?;
            hasher.update(&buffer[..n]);
            written += n as u64;
            on_chunk(n as u64)?;
        }
        temp.as_file().sync_all()?;

        let actual = hasher.finalize();
        if actual.value != expected.value {
            // Dropping `temp` deletes the partial file
            return Err(Error::IntegrityError {
                name: name.to_string(),
                expected: expected.to_prefixed_string(),
                actual: actual.to_prefixed_string(),
            });
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        temp.persist(&dest).map_err(|e| {
            Error::IoError(format!("Failed to move download to {}: {}", dest.display(), e.error))
        })?;

        info!("Cached {} ({} bytes) as {}", name, written, expected.to_prefixed_string());
        Ok(dest)
    }

    /// Remove a cache entry; returns whether one existed
    pub fn remove(&self, checksum: &Checksum) -> Result<bool> {
        let path = self.path_for(checksum);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Pruned cache entry {}", checksum.to_prefixed_string());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// All checksums currently cached
    pub fn entries(&self) -> Result<Vec<Checksum>> {
        let mut entries = Vec::new();
        for algorithm in [HashAlgorithm::Sha256, HashAlgorithm::Md5] {
            let dir = self.objects_dir.join(algorithm.name());
            if !dir.exists() {
                continue;
            }
            for entry in WalkDir::new(&dir).min_depth(2).max_depth(2) {
                let entry = entry.map_err(|e| Error::IoError(e.to_string()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let prefix = entry
                    .path()
                    .parent()
                    .and_then(|p| p.file_name())
                    .and_then(|s| s.to_str())
                    .unwrap_or_default();
                let suffix = entry.file_name().to_str().unwrap_or_default();
                match Checksum::new(algorithm, format!("{prefix}{suffix}")) {
                    Ok(checksum) => entries.push(checksum),
                    Err(e) => warn!("Ignoring stray file {}: {}", entry.path().display(), e),
                }
            }
        }
        entries.sort();
        Ok(entries)
    }

    fn sweep_partials(&self) -> Result<()> {
        for entry in fs::read_dir(&self.tmp_dir)? {
            let path = entry?.path();
            if path.is_file() {
                warn!("Removing partial download {}", path.display());
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn no_progress() -> impl FnMut(u64) -> Result<()> {
        |_| Ok(())
    }

    #[test]
    fn test_insert_verified() {
        let temp = TempDir::new().unwrap();
        let store = ObjectStore::open(temp.path().join("RegionOne")).unwrap();
        let data = b"image bytes";
        let checksum = hash_bytes(HashAlgorithm::Sha256, data);

        let mut written = 0;
        let path = store
            .insert("img", &mut Cursor::new(data), &checksum, &mut |n| {
                written += n;
                Ok(())
            })
            .unwrap();

        assert_eq!(written, data.len() as u64);
        assert_eq!(std::fs::read(&path).unwrap(), data);
        assert!(store.contains(&checksum));
        assert_eq!(store.entries().unwrap(), vec![checksum]);
    }

    #[test]
    fn test_path_layout() {
        let temp = TempDir::new().unwrap();
        let store = ObjectStore::open(temp.path()).unwrap();
        let checksum = hash_bytes(HashAlgorithm::Md5, b"hello world");
        let path = store.path_for(&checksum);
        assert!(path.ends_with("objects/md5/5e/b63bbbe01eeed093cb22bb8f5acdc3"));
    }

    #[test]
    fn test_checksum_mismatch_leaves_nothing() {
        let temp = TempDir::new().unwrap();
        let store = ObjectStore::open(temp.path()).unwrap();
        let declared = hash_bytes(HashAlgorithm::Sha256, b"expected");

        let result = store.insert("img", &mut Cursor::new(b"corrupted"), &declared, &mut no_progress());
        assert!(matches!(result, Err(Error::IntegrityError { .. })));
        assert!(!store.contains(&declared));
        assert!(store.entries().unwrap().is_empty());
        assert_eq!(std::fs::read_dir(temp.path().join("tmp")).unwrap().count(), 0);
    }

    #[test]
    fn test_abort_leaves_nothing() {
        let temp = TempDir::new().unwrap();
        let store = ObjectStore::open(temp.path()).unwrap();
        let checksum = hash_bytes(HashAlgorithm::Sha256, b"data");

        let result = store.insert("img", &mut Cursor::new(b"data"), &checksum, &mut |_| {
            Err(Error::Interrupted)
        });
        assert!(matches!(result, Err(Error::Interrupted)));
        assert!(!store.contains(&checksum));
    }

    #[test]
    fn test_partials_swept_on_open() {
        let temp = TempDir::new().unwrap();
        {
            let _store = ObjectStore::open(temp.path()).unwrap();
        }
        std::fs::write(temp.path().join("tmp/.partial-abc"), b"half").unwrap();
        let _store = ObjectStore::open(temp.path()).unwrap();
        assert_eq!(std::fs::read_dir(temp.path().join("tmp")).unwrap().count(), 0);
    }

    #[test]
    fn test_second_open_is_locked_out() {
        let temp = TempDir::new().unwrap();
        let _store = ObjectStore::open(temp.path()).unwrap();
        assert!(matches!(ObjectStore::open(temp.path()), Err(Error::LockError(_))));
    }

    #[test]
    fn test_remove() {
        let temp = TempDir::new().unwrap();
        let store = ObjectStore::open(temp.path()).unwrap();
        let checksum = hash_bytes(HashAlgorithm::Sha256, b"data");
        store
            .insert("img", &mut Cursor::new(b"data"), &checksum, &mut no_progress())
            .unwrap();

        assert!(store.remove(&checksum).unwrap());
        assert!(!store.remove(&checksum).unwrap());
        assert!(!store.contains(&checksum));
    }
}
