use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use cairn_types::{CairnError, CancelToken, Result};

use crate::{not_found, BlobIterator, BlobMetadata, BlobStore, ConnectionInfo};

/// Blob store over a single flat directory, one file per blob.
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(FilesystemStore { root })
    }

    /// Reject blob IDs that would not map to a plain file in the root.
    fn validate_id(id: &str) -> Result<()> {
        let unsafe_id = id.is_empty()
            || id == "."
            || id == ".."
            || id.contains('/')
            || id.contains('\\')
            || id.contains('\0');
        if unsafe_id {
            return Err(CairnError::InvalidFormat(format!(
                "unsafe blob ID: '{id}'"
            )));
        }
        Ok(())
    }

    fn blob_path(&self, id: &str) -> Result<PathBuf> {
        Self::validate_id(id)?;
        Ok(self.root.join(id))
    }
}

impl BlobStore for FilesystemStore {
    fn get_blob(
        &self,
        cancel: &CancelToken,
        id: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<Vec<u8>> {
        cancel.check()?;
        let path = self.blob_path(id)?;
        let mut file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };
        match length {
            None if offset == 0 => {
                let mut buf = Vec::new();
                file.read_to_end(&mut buf)?;
                Ok(buf)
            }
            None => {
                file.seek(SeekFrom::Start(offset))?;
                let mut buf = Vec::new();
                file.read_to_end(&mut buf)?;
                Ok(buf)
            }
            Some(len) => {
                file.seek(SeekFrom::Start(offset))?;
                let mut buf = vec![0u8; len as usize];
                let mut filled = 0;
                while filled < buf.len() {
                    match file.read(&mut buf[filled..]) {
                        Ok(0) => break,
                        Ok(n) => filled += n,
                        Err(e) => return Err(e.into()),
                    }
                }
                buf.truncate(filled);
                Ok(buf)
            }
        }
    }

    fn put_blob(&self, cancel: &CancelToken, id: &str, data: &[u8]) -> Result<()> {
        cancel.check()?;
        let path = self.blob_path(id)?;
        fs::write(&path, data)?;
        Ok(())
    }

    fn delete_blob(&self, cancel: &CancelToken, id: &str) -> Result<()> {
        cancel.check()?;
        let path = self.blob_path(id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_blobs(&self, cancel: &CancelToken, prefix: &str) -> Result<BlobIterator> {
        cancel.check()?;
        let mut matches = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = match entry.file_name().into_string() {
                Ok(n) => n,
                Err(_) => continue,
            };
            if !name.starts_with(prefix) {
                continue;
            }
            let meta = entry.metadata()?;
            matches.push(BlobMetadata {
                id: name,
                length: meta.len(),
                timestamp: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
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
        ConnectionInfo::Filesystem {
            path: self.root.clone(),
        }
    }
}
