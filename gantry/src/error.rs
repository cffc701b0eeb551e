use thiserror::Error;

/// Errors surfaced by the gateway runtime.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] gantry_core::Error),

    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to build request: {0}")]
    Request(#[from] kube::core::request::Error),

    #[error("invalid uri: {0}")]
    Uri(#[from] http::uri::InvalidUri),

    #[error("failed to build http request: {0}")]
    Http(#[from] http::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Errors collected from parallel workers, joined.
    #[error("{} tasks failed: {}", .0.len(), join_all(.0))]
    Multiple(Vec<Error>),
}

fn join_all(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Shorthand for the `Internal` kind (programming errors that must not
    /// fail the pipeline).
    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        Error::Core(gantry_core::Error::Internal(msg.into()))
    }

    /// Whether this is the benign refresh-in-progress sentinel.
    #[must_use]
    pub fn is_already_syncing(&self) -> bool {
        matches!(self, Error::Core(gantry_core::Error::AlreadySyncing))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
