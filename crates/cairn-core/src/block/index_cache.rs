use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, warn};

use cairn_types::{CairnError, Result};

use super::index::{IndexData, PackIndex};

/// File name suffix of cached index blobs.
pub const INDEX_CACHE_SUFFIX: &str = ".sndx";

/// Unused cache entries older than this are removed by `expire_unused`.
const DEFAULT_CLEANUP_AGE: Duration = Duration::from_secs(3600);

/// Local cache of committed index blobs.
///
/// The blob store remains the authoritative source; a cache may be discarded
/// at any time without data loss.
pub trait IndexCache: Send + Sync {
    /// Whether the cache holds this index blob.
    fn has(&self, index_blob_id: &str) -> Result<bool>;

    /// Open a cached index blob for reading.
    fn open(&self, index_blob_id: &str) -> Result<PackIndex>;

    /// Install an index blob. Installing an already-present ID is a no-op.
    fn add(&self, index_blob_id: &str, data: &[u8]) -> Result<()>;

    /// Remove entries that are not in `in_use` and have not been touched
    /// recently.
    fn expire_unused(&self, in_use: &[String]) -> Result<()>;
}

/// Disk directory of `<indexBlobID>.sndx` files, memory-mapped on open and
/// installed via same-directory temp file + atomic rename so concurrent
/// processes can race safely on the same directory.
pub struct DiskIndexCache {
    dir: PathBuf,
    cleanup_age: Duration,
}

impl DiskIndexCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DiskIndexCache {
            dir: dir.into(),
            cleanup_age: DEFAULT_CLEANUP_AGE,
        }
    }

    /// Override the expiry age (tests use a zero age).
    pub fn with_cleanup_age(mut self, age: Duration) -> Self {
        self.cleanup_age = age;
        self
    }

    fn entry_path(&self, index_blob_id: &str) -> PathBuf {
        self.dir.join(format!("{index_blob_id}{INDEX_CACHE_SUFFIX}"))
    }

    fn write_temp(&self, data: &[u8]) -> Result<tempfile::NamedTempFile> {
        let mut tmp = match tempfile::NamedTempFile::new_in(&self.dir) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Cache directory is created on demand.
                fs::create_dir_all(&self.dir)?;
                tempfile::NamedTempFile::new_in(&self.dir)?
            }
            Err(e) => return Err(e.into()),
        };
        tmp.write_all(data)?;
        tmp.flush()?;
        Ok(tmp)
    }
}

impl IndexCache for DiskIndexCache {
    fn has(&self, index_blob_id: &str) -> Result<bool> {
        match fs::metadata(self.entry_path(index_blob_id)) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn open(&self, index_blob_id: &str) -> Result<PackIndex> {
        let file = fs::File::open(self.entry_path(index_blob_id))?;
        let mmap = unsafe { memmap2::Mmap::map(&file) }?;
        PackIndex::open(IndexData::Mapped(mmap))
    }

    fn add(&self, index_blob_id: &str, data: &[u8]) -> Result<()> {
        if self.has(index_blob_id)? {
            return Ok(());
        }

        let tmp = self.write_temp(data)?;
        let target = self.entry_path(index_blob_id);

        // rename() is atomic: when two processes install the same ID, one
        // wins and the other may see a failure. Re-check presence before
        // reporting an error.
        if let Err(persist_err) = tmp.persist(&target) {
            if !self.has(index_blob_id)? {
                return Err(CairnError::Other(format!(
                    "unsuccessful index cache write of {index_blob_id}: {}",
                    persist_err.error
                )));
            }
        }
        Ok(())
    }

    fn expire_unused(&self, in_use: &[String]) -> Result<()> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let name = match entry.file_name().into_string() {
                Ok(n) => n,
                Err(_) => continue,
            };
            let Some(blob_id) = name.strip_suffix(INDEX_CACHE_SUFFIX) else {
                continue;
            };
            if in_use.iter().any(|u| u == blob_id) {
                continue;
            }

            let age = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|mtime| mtime.elapsed().ok())
                .unwrap_or(Duration::ZERO);
            if age > self.cleanup_age {
                debug!("removing unused index cache entry {name}");
                if let Err(e) = fs::remove_file(entry.path()) {
                    warn!("unable to remove unused index cache entry {name}: {e}");
                }
            } else {
                debug!("keeping unused index cache entry {name}, too new");
            }
        }
        Ok(())
    }
}

/// In-memory cache, used in tests and as the fallback when disk installs
/// fail.
#[derive(Default)]
pub struct MemoryIndexCache {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryIndexCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexCache for MemoryIndexCache {
    fn has(&self, index_blob_id: &str) -> Result<bool> {
        Ok(self.entries.lock().unwrap().contains_key(index_blob_id))
    }

    fn open(&self, index_blob_id: &str) -> Result<PackIndex> {
        let entries = self.entries.lock().unwrap();
        let data = entries.get(index_blob_id).ok_or_else(|| {
            CairnError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("index blob {index_blob_id} not cached"),
            ))
        })?;
        PackIndex::from_bytes(data.clone())
    }

    fn add(&self, index_blob_id: &str, data: &[u8]) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .entry(index_blob_id.to_string())
            .or_insert_with(|| data.to_vec());
        Ok(())
    }

    fn expire_unused(&self, in_use: &[String]) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .retain(|id, _| in_use.iter().any(|u| u == id));
        Ok(())
    }
}

/// Default on-disk location for a repository's index cache.
pub fn default_cache_dir(repository_id: &[u8]) -> Option<PathBuf> {
    dirs::cache_dir().map(|base| {
        base.join("cairn")
            .join(hex::encode(repository_id))
            .join("indexes")
    })
}
