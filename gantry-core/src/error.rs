use thiserror::Error;

/// Failure modes shared between the catalog and the object pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// An unknown schema or object was requested.
    #[error("{0} not found")]
    NotFound(String),

    /// Schema definitions have not been built yet.
    ///
    /// Callers may retry after the next refresh completes.
    #[error("schema definitions not yet refreshed")]
    NotRefreshed,

    /// A refresh is already in progress.
    ///
    /// Treated as a no-op by the refresh loop.
    #[error("already refreshing schemas")]
    AlreadySyncing,

    /// Malformed input. Not retried.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// The HTTP method is explicitly disallowed on this schema.
    #[error("method {0} is blocked")]
    Blocked(String),

    /// A programming error that must not fail the whole pipeline.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
