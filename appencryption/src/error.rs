use thiserror::Error;

/// Result type for appencryption operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the appencryption library.
///
/// Each variant corresponds to one of the error kinds the engine's contract promises
/// callers: the kind is preserved end to end rather than collapsed into a single
/// catch-all, so callers can match on it (e.g. to distinguish a transient
/// `MetastoreUnavailable` from a fatal `DecryptionFailed`).
#[derive(Error, Debug)]
pub enum Error {
    /// A call to the KeyManagementService contract failed.
    #[error("KMS error: {0}")]
    KmsError(String),

    /// A call to the Metastore contract failed or the backing store is unreachable.
    #[error("metastore unavailable: {0}")]
    MetastoreUnavailable(String),

    /// A referenced key record could not be found in the metastore.
    #[error("key metadata missing: {0}")]
    MetadataMissing(String),

    /// A data row record's intermediate key does not belong to the session's partition.
    #[error("partition mismatch: {0}")]
    PartitionMismatch(String),

    /// AEAD decryption failed: tag mismatch, truncation, or wrong key (not distinguished).
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Errors related to cryptographic operations other than decryption (e.g. encryption,
    /// key wrapping).
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Errors related to secure memory operations, other than resource exhaustion
    /// (see [`Error::ResourceLimit`]).
    #[error("secure memory error: {0}")]
    SecureMemory(securememory::SecureMemoryError),

    /// A secret was accessed after it was closed.
    #[error("secret closed")]
    SecretClosed,

    /// A resource limit (e.g. locked-memory ulimit) was hit while allocating secure memory.
    /// The engine retries once, after evicting the oldest cache entries, before surfacing
    /// this to the caller.
    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),

    /// Errors related to JSON serialization/deserialization.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors related to I/O operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// General internal errors that do not map to a caller-actionable kind.
    #[error("internal error: {0}")]
    Internal(String),

    /// A required construction argument was missing or malformed (e.g. empty partition id).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A required configuration value was missing or malformed at construction time.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A blocking operation was aborted via its cancellation token.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Feature not implemented error.
    #[error("not implemented: {0}")]
    NotImplemented(String),
}

impl Error {
    /// Returns true if this error should never be retried by the engine itself
    /// (all kinds except the internally-recovered duplicate-store race).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Error::ResourceLimit(_))
    }
}

impl From<securememory::SecureMemoryError> for Error {
    fn from(err: securememory::SecureMemoryError) -> Self {
        match err {
            securememory::SecureMemoryError::ResourceLimit(msg) => Error::ResourceLimit(msg),
            other => Error::SecureMemory(other),
        }
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for Error {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Error::Internal(err.to_string())
    }
}
