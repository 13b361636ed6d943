use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::SystemTime;

use cairn_types::{CancelToken, Result};

use crate::{not_found, BlobIterator, BlobMetadata, BlobStore, ConnectionInfo};

type BlobMap = HashMap<String, (Vec<u8>, SystemTime)>;

/// Process-global registry of named maps, so `connection_info` round-trips
/// to a store sharing the same contents.
fn registry() -> &'static Mutex<HashMap<String, Arc<Mutex<BlobMap>>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<Mutex<BlobMap>>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// In-memory blob store backed by a named shared map. Thread-safe via Mutex.
pub struct MemoryStore {
    name: String,
    data: Arc<Mutex<BlobMap>>,
}

impl MemoryStore {
    /// Create a store with a fresh, uniquely named map.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        Self::named(&format!("mem-{}-{n}", std::process::id()))
    }

    /// Attach to the named map, creating it if absent. Two stores with the
    /// same name observe the same blobs.
    pub fn named(name: &str) -> Self {
        let data = registry()
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .clone();
        MemoryStore {
            name: name.to_string(),
            data,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for MemoryStore {
    fn get_blob(
        &self,
        cancel: &CancelToken,
        id: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<Vec<u8>> {
        cancel.check()?;
        let map = self.data.lock().unwrap();
        let (data, _) = map.get(id).ok_or_else(not_found)?;
        let start = (offset as usize).min(data.len());
        let end = match length {
            Some(len) => (start + len as usize).min(data.len()),
            None => data.len(),
        };
        Ok(data[start..end].to_vec())
    }

    fn put_blob(&self, cancel: &CancelToken, id: &str, data: &[u8]) -> Result<()> {
        cancel.check()?;
        let mut map = self.data.lock().unwrap();
        map.insert(id.to_string(), (data.to_vec(), SystemTime::now()));
        Ok(())
    }

    fn delete_blob(&self, cancel: &CancelToken, id: &str) -> Result<()> {
        cancel.check()?;
        let mut map = self.data.lock().unwrap();
        map.remove(id);
        Ok(())
    }

    fn list_blobs(&self, cancel: &CancelToken, prefix: &str) -> Result<BlobIterator> {
        cancel.check()?;
        // Snapshot the matching metadata so the iterator stays valid while
        // the map keeps changing.
        let map = self.data.lock().unwrap();
        let mut matches: Vec<BlobMetadata> = map
            .iter()
            .filter(|(id, _)| id.starts_with(prefix))
            .map(|(id, (data, timestamp))| BlobMetadata {
                id: id.clone(),
                length: data.len() as u64,
                timestamp: *timestamp,
            })
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        let cancel = cancel.clone();
        Ok(Box::new(
            matches.into_iter().map(move |m| cancel.check().map(|()| m)),
        ))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo::Memory {
            name: self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify;

    #[test]
    fn verify_store_contract() {
        let cancel = CancelToken::new();
        let store = MemoryStore::new();
        verify::verify_store(&cancel, &store);
    }

    #[test]
    fn connection_info_round_trips() {
        let store = MemoryStore::new();
        verify::assert_connection_info_round_trips(&store);
    }

    #[test]
    fn named_stores_share_contents() {
        let cancel = CancelToken::new();
        let a = MemoryStore::named("shared-map-test");
        let b = MemoryStore::named("shared-map-test");
        a.put_blob(&cancel, "blob1", b"payload").unwrap();
        assert_eq!(b.get_blob(&cancel, "blob1", 0, None).unwrap(), b"payload");
    }

    #[test]
    fn range_reads() {
        let cancel = CancelToken::new();
        let store = MemoryStore::new();
        store.put_blob(&cancel, "r", b"0123456789").unwrap();
        assert_eq!(store.get_blob(&cancel, "r", 2, Some(3)).unwrap(), b"234");
        assert_eq!(store.get_blob(&cancel, "r", 8, None).unwrap(), b"89");
        assert_eq!(store.get_blob(&cancel, "r", 20, Some(5)).unwrap(), b"");
    }

    #[test]
    fn cancelled_token_aborts_calls() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let store = MemoryStore::new();
        assert!(store
            .get_blob(&cancel, "x", 0, None)
            .unwrap_err()
            .is_cancelled());
        assert!(store.put_blob(&cancel, "x", b"").unwrap_err().is_cancelled());
    }
}
