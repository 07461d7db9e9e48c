//! Controller-specific error types.
//!
//! This module defines error types specific to the service watcher that are
//! not covered by the cluster client's errors.

use cluster_client::ClusterError;
use thiserror::Error;

/// Errors that can occur in the service watcher.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Cluster read or write failed
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Kubernetes client could not be created
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Selector or network annotation could not be parsed
    #[error("Malformed annotation: {0}")]
    MalformedAnnotation(String),

    /// Every allowed attempt ended in a write conflict
    #[error("Gave up on {operation} after {attempts} conflicting attempts")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signal handler could not be installed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Returns true for optimistic-concurrency conflicts reported by the store.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ControllerError::Cluster(e) if e.is_conflict())
    }
}
