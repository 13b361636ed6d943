use std::time::Duration;

use serde::{Deserialize, Serialize};

use cairn_types::{CairnError, Result};

/// Backoff parameters for retrying transient blob-store errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Number of retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub retry_delay_ms: u64,
    /// Upper bound on the backoff delay, in milliseconds.
    pub retry_max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 8,
            retry_delay_ms: 100,
            retry_max_delay_ms: 5_000,
        }
    }
}

/// Retry a fallible operation with exponential backoff + jitter.
///
/// `is_retryable` is supplied by the blob-store adapter: only errors it
/// accepts are retried, and only until the attempt budget runs out. The
/// final error is returned unchanged.
pub fn retry<T>(
    config: &RetryConfig,
    op_name: &str,
    is_retryable: impl Fn(&CairnError) -> bool,
    mut f: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut delay_ms = config.retry_delay_ms;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let jitter = rand::random::<u64>() % delay_ms.max(1);
            std::thread::sleep(Duration::from_millis(delay_ms + jitter));
            delay_ms = (delay_ms * 2).min(config.retry_max_delay_ms);
        }
        match f() {
            Ok(val) => return Ok(val),
            Err(e) if is_retryable(&e) && attempt < config.max_retries => {
                tracing::warn!(
                    "{op_name}: transient error (attempt {}/{}), retrying: {e}",
                    attempt + 1,
                    config.max_retries,
                );
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("loop returns on the final attempt");
}

/// Default retriability predicate: transient I/O failures only. Cancellation
/// and not-found are never retried.
pub fn is_retryable(err: &CairnError) -> bool {
    match err {
        CairnError::Io(e) => is_retryable_io(e),
        _ => false,
    }
}

/// Whether an I/O error is transient and worth retrying.
pub fn is_retryable_io(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            retry_delay_ms: 1,
            retry_max_delay_ms: 2,
        }
    }

    fn transient() -> CairnError {
        CairnError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ))
    }

    #[test]
    fn succeeds_first_try_without_sleeping() {
        let calls = AtomicU32::new(0);
        let result = retry(&fast_config(), "op", is_retryable, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry(&fast_config(), "op", is_retryable, || {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(transient())
            } else {
                Ok("done")
            }
        });
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn gives_up_after_attempt_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry(&fast_config(), "op", is_retryable, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        });
        assert!(result.is_err());
        // initial attempt + max_retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn permanent_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry(&fast_config(), "op", is_retryable, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CairnError::BlockNotFound)
        });
        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn classification() {
        assert!(is_retryable(&transient()));
        assert!(!is_retryable(&CairnError::BlockNotFound));
        assert!(!is_retryable(&CairnError::Cancelled));
        assert!(!is_retryable(&CairnError::InvalidFormat("x".into())));

        let non_retryable_kinds = [
            std::io::ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied,
            std::io::ErrorKind::InvalidData,
        ];
        for kind in non_retryable_kinds {
            let err = std::io::Error::new(kind, "test");
            assert!(!is_retryable_io(&err), "{kind:?} should NOT be retryable");
        }
    }
}
