//! Cluster client errors

use thiserror::Error;

/// Errors that can occur when reading from or writing to the cluster
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Referenced object does not exist (HTTP 404 or cache miss)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency collision (HTTP 409): the object changed since
    /// it was read, or it already exists on create
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Any other Kubernetes API or transport failure
    #[error("Kubernetes error: {0}")]
    Kube(#[source] kube::Error),

    /// Object is missing fields required for the request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A reflector cache was shut down before it synced
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),
}

impl ClusterError {
    /// Returns true if retrying against a fresh read may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict(_))
    }

    /// Returns true if the referenced object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ref response) if response.code == 409 => {
                ClusterError::Conflict(response.message.clone())
            }
            kube::Error::Api(ref response) if response.code == 404 => {
                ClusterError::NotFound(response.message.clone())
            }
            other => ClusterError::Kube(other),
        }
    }
}
