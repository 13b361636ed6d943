pub mod filesystem;
pub mod logging;
pub mod memory;
pub mod retry;
pub mod verify;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use cairn_types::{CairnError, CancelToken, Result};

/// Metadata for one blob returned by `list_blobs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMetadata {
    pub id: String,
    pub length: u64,
    pub timestamp: SystemTime,
}

/// Lazy, finite sequence of blob metadata. Cancellable at each pull; callers
/// that mutate the store while iterating must snapshot first.
pub type BlobIterator = Box<dyn Iterator<Item = Result<BlobMetadata>> + Send>;

/// Abstract flat blob store: an unordered namespace of named byte blobs.
///
/// All operations honor the cancellation token at their suspension points.
/// Absent blobs are reported with the distinguished
/// [`CairnError::BlockNotFound`] error so callers can test for it uniformly.
pub trait BlobStore: Send + Sync {
    /// Read a byte range of a blob. `length == None` reads from `offset` to
    /// the end. Returns `BlockNotFound` for absent IDs.
    fn get_blob(
        &self,
        cancel: &CancelToken,
        id: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<Vec<u8>>;

    /// Create or replace a blob. Overwrite is idempotent.
    fn put_blob(&self, cancel: &CancelToken, id: &str, data: &[u8]) -> Result<()>;

    /// Delete a blob. Deleting an absent ID is not an error.
    fn delete_blob(&self, cancel: &CancelToken, id: &str) -> Result<()>;

    /// List blobs whose ID starts with `prefix`, in unspecified order.
    fn list_blobs(&self, cancel: &CancelToken, prefix: &str) -> Result<BlobIterator>;

    /// Release any resources held by the store.
    fn close(&self) -> Result<()>;

    /// An opaque tagged record sufficient to reconstruct an equivalent store
    /// via [`connect`]. Round-trips to an equal value.
    fn connection_info(&self) -> ConnectionInfo;
}

impl BlobStore for Arc<dyn BlobStore> {
    fn get_blob(
        &self,
        cancel: &CancelToken,
        id: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<Vec<u8>> {
        (**self).get_blob(cancel, id, offset, length)
    }

    fn put_blob(&self, cancel: &CancelToken, id: &str, data: &[u8]) -> Result<()> {
        (**self).put_blob(cancel, id, data)
    }

    fn delete_blob(&self, cancel: &CancelToken, id: &str) -> Result<()> {
        (**self).delete_blob(cancel, id)
    }

    fn list_blobs(&self, cancel: &CancelToken, prefix: &str) -> Result<BlobIterator> {
        (**self).list_blobs(cancel, prefix)
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }

    fn connection_info(&self) -> ConnectionInfo {
        (**self).connection_info()
    }
}

/// Tagged description of how to reach a blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionInfo {
    /// Named in-memory map; stores with the same name share contents within
    /// one process.
    Memory { name: String },
    /// Flat directory of blob files.
    Filesystem { path: PathBuf },
}

/// Reconstruct a blob store from its connection info.
pub fn connect(info: &ConnectionInfo) -> Result<Arc<dyn BlobStore>> {
    match info {
        ConnectionInfo::Memory { name } => Ok(Arc::new(memory::MemoryStore::named(name))),
        ConnectionInfo::Filesystem { path } => {
            Ok(Arc::new(filesystem::FilesystemStore::new(path)?))
        }
    }
}

/// Collect a listing into metadata records, propagating the first error.
pub fn list_all(
    store: &dyn BlobStore,
    cancel: &CancelToken,
    prefix: &str,
) -> Result<Vec<BlobMetadata>> {
    store.list_blobs(cancel, prefix)?.collect()
}

pub(crate) fn not_found() -> CairnError {
    CairnError::BlockNotFound
}
