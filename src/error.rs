/// Errors surfaced by this crate to the hosting coordinator.
///
/// Discovery I/O failures are not modeled here directly: `StreamProxy`
/// implementations return their own opaque error, which the enumerator
/// wraps as [`EnumeratorError::Discovery`] before treating it as fatal
/// as a transient upstream failure.
#[derive(Debug, thiserror::Error)]
pub enum EnumeratorError {
    #[error("listShards failed: {0}")]
    Discovery(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    #[error("cannot deserialize split state: unknown version {found}")]
    VersionMismatch { found: u8 },

    #[error("malformed encoded state: {0}")]
    MalformedState(String),

    #[error("AT_TIMESTAMP initial position requires stream.initial-timestamp to be set")]
    MissingInitialTimestamp,
}

pub type Result<T> = std::result::Result<T, EnumeratorError>;
