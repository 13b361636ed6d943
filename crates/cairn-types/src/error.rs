use thiserror::Error;

pub type Result<T> = std::result::Result<T, CairnError>;

#[derive(Debug, Error)]
pub enum CairnError {
    /// No live entry for a content ID, or an absent blob. The same error is
    /// returned by blob stores and by the block manager so callers can test
    /// for it uniformly.
    #[error("block not found")]
    BlockNotFound,

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("unsupported index format version: {0}")]
    UnsupportedVersion(u8),

    #[error("invalid content ID: '{0}'")]
    InvalidContentId(String),

    #[error("invalid object ID: '{0}'")]
    InvalidObjectId(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("repository not initialized at this location")]
    RepositoryNotFound,

    #[error("repository already initialized at this location")]
    RepositoryAlreadyExists,

    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invariant violation; indicates a bug rather than bad input.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl CairnError {
    /// True for the distinguished not-found error (see `BlockNotFound`).
    pub fn is_not_found(&self) -> bool {
        matches!(self, CairnError::BlockNotFound)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CairnError::Cancelled)
    }
}
