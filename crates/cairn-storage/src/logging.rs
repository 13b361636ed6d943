use std::sync::Arc;
use std::time::Instant;

use cairn_types::{CancelToken, Result};

use crate::{BlobIterator, BlobMetadata, BlobStore, ConnectionInfo};

/// Sink for formatted log lines emitted by [`LoggingStore`].
pub type OutputFn = dyn Fn(&str) + Send + Sync;

/// Pass-through decorator that times every call on the wrapped store and
/// reports it to a sink. Purely observational: it never alters arguments,
/// results, or errors.
pub struct LoggingStore {
    base: Arc<dyn BlobStore>,
    output: Arc<OutputFn>,
    prefix: String,
}

impl LoggingStore {
    /// Wrap `base`, reporting through `tracing::debug!`.
    pub fn new(base: Arc<dyn BlobStore>) -> Self {
        LoggingStore {
            base,
            output: Arc::new(|line| tracing::debug!("{line}")),
            prefix: String::new(),
        }
    }

    /// Send all output to the given function instead of the tracing log.
    pub fn with_output(mut self, output: Arc<OutputFn>) -> Self {
        self.output = output;
        self
    }

    /// Prepend `prefix` to every reported line.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    fn report(&self, line: String) {
        (self.output)(&format!("{}{line}", self.prefix));
    }
}

impl BlobStore for LoggingStore {
    fn get_blob(
        &self,
        cancel: &CancelToken,
        id: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<Vec<u8>> {
        let t0 = Instant::now();
        let result = self.base.get_blob(cancel, id, offset, length);
        let dt = t0.elapsed();
        match &result {
            Ok(data) => self.report(format!(
                "get_blob({id:?},{offset},{length:?})=({} bytes) took {dt:?}",
                data.len()
            )),
            Err(e) => self.report(format!(
                "get_blob({id:?},{offset},{length:?})=err({e}) took {dt:?}"
            )),
        }
        result
    }

    fn put_blob(&self, cancel: &CancelToken, id: &str, data: &[u8]) -> Result<()> {
        let t0 = Instant::now();
        let result = self.base.put_blob(cancel, id, data);
        let dt = t0.elapsed();
        self.report(format!(
            "put_blob({id:?},len={})={} took {dt:?}",
            data.len(),
            outcome(&result)
        ));
        result
    }

    fn delete_blob(&self, cancel: &CancelToken, id: &str) -> Result<()> {
        let t0 = Instant::now();
        let result = self.base.delete_blob(cancel, id);
        let dt = t0.elapsed();
        self.report(format!(
            "delete_blob({id:?})={} took {dt:?}",
            outcome(&result)
        ));
        result
    }

    fn list_blobs(&self, cancel: &CancelToken, prefix: &str) -> Result<BlobIterator> {
        let t0 = Instant::now();
        match self.base.list_blobs(cancel, prefix) {
            Ok(inner) => Ok(Box::new(LoggingIter {
                inner,
                output: Arc::clone(&self.output),
                line_prefix: self.prefix.clone(),
                list_prefix: prefix.to_string(),
                started: t0,
                count: 0,
                reported: false,
            })),
            Err(e) => {
                self.report(format!(
                    "list_blobs({prefix:?})=err({e}) took {:?}",
                    t0.elapsed()
                ));
                Err(e)
            }
        }
    }

    fn close(&self) -> Result<()> {
        let t0 = Instant::now();
        let result = self.base.close();
        self.report(format!(
            "close()={} took {:?}",
            outcome(&result),
            t0.elapsed()
        ));
        result
    }

    fn connection_info(&self) -> ConnectionInfo {
        self.base.connection_info()
    }
}

/// Counts pulled items and reports once the underlying listing is exhausted.
struct LoggingIter {
    inner: BlobIterator,
    output: Arc<OutputFn>,
    line_prefix: String,
    list_prefix: String,
    started: Instant,
    count: usize,
    reported: bool,
}

impl Iterator for LoggingIter {
    type Item = Result<BlobMetadata>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next() {
            Some(item) => {
                if item.is_ok() {
                    self.count += 1;
                }
                Some(item)
            }
            None => {
                if !self.reported {
                    self.reported = true;
                    (self.output)(&format!(
                        "{}list_blobs({:?}) returned {} items and took {:?}",
                        self.line_prefix,
                        self.list_prefix,
                        self.count,
                        self.started.elapsed()
                    ));
                }
                None
            }
        }
    }
}

fn outcome(result: &Result<()>) -> String {
    match result {
        Ok(()) => "ok".to_string(),
        Err(e) => format!("err({e})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use std::sync::Mutex;

    fn capture() -> (Arc<OutputFn>, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let out: Arc<OutputFn> = Arc::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string());
        });
        (out, lines)
    }

    #[test]
    fn forwards_and_logs() {
        let cancel = CancelToken::new();
        let (out, lines) = capture();
        let base: Arc<dyn BlobStore> = Arc::new(MemoryStore::new());
        let store = LoggingStore::new(Arc::clone(&base))
            .with_output(out)
            .with_prefix("test: ");

        store.put_blob(&cancel, "blob1", b"hello").unwrap();
        assert_eq!(store.get_blob(&cancel, "blob1", 0, None).unwrap(), b"hello");

        let logged = lines.lock().unwrap();
        assert!(logged.iter().any(|l| l.starts_with("test: put_blob")));
        assert!(logged.iter().any(|l| l.starts_with("test: get_blob")));
        drop(logged);
        // The wrapped store actually received the write.
        assert_eq!(base.get_blob(&cancel, "blob1", 0, None).unwrap(), b"hello");
    }

    #[test]
    fn list_reports_item_count() {
        let cancel = CancelToken::new();
        let (out, lines) = capture();
        let base: Arc<dyn BlobStore> = Arc::new(MemoryStore::new());
        base.put_blob(&cancel, "a1", b"x").unwrap();
        base.put_blob(&cancel, "a2", b"y").unwrap();
        base.put_blob(&cancel, "b1", b"z").unwrap();

        let store = LoggingStore::new(base).with_output(out);
        let listed: Vec<_> = store
            .list_blobs(&cancel, "a")
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(listed.len(), 2);

        let logged = lines.lock().unwrap();
        assert!(logged
            .iter()
            .any(|l| l.contains("list_blobs(\"a\") returned 2 items")));
    }

    #[test]
    fn errors_pass_through_unchanged() {
        let cancel = CancelToken::new();
        let (out, _lines) = capture();
        let store = LoggingStore::new(Arc::new(MemoryStore::new())).with_output(out);
        assert!(store
            .get_blob(&cancel, "absent", 0, None)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn connection_info_is_the_wrapped_stores() {
        let base: Arc<dyn BlobStore> = Arc::new(MemoryStore::new());
        let store = LoggingStore::new(Arc::clone(&base));
        assert_eq!(store.connection_info(), base.connection_info());
    }
}
