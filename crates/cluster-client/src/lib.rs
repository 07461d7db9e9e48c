//! Cluster access for the DANM service watcher
//!
//! Everything the reconciliation engine reads from or writes to the cluster
//! goes through the [`ClusterClient`] trait:
//!
//! - Pods, Services and DanmEps are served from reflector caches that are fed
//!   by the same watch streams the controller consumes as its change feed.
//! - Endpoints are read from and written to the API server directly, so a
//!   write that lost an optimistic-concurrency race re-reads the winner's
//!   version on its next attempt.
//!
//! # Features
//!
//! - `test-util`: enables [`MockClusterClient`], an in-memory implementation
//!   with resourceVersion checking and conflict injection.

pub mod cache;
pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod cluster_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use cache::{ChangeFeeds, FeedStream};
pub use client::KubeClusterClient;
pub use cluster_trait::ClusterClient;
pub use error::ClusterError;
#[cfg(feature = "test-util")]
pub use mock::MockClusterClient;
