//! DANM Service Watcher
//!
//! Keeps the Endpoints of DANM-managed Services in sync with the network
//! attachments (DanmEp) of multi-homed pods:
//! - DanmEp: addresses are published in every Service whose selector and
//!   target networks match the attachment
//! - Pod: readiness moves its addresses between the ready and not-ready lists
//! - Service: a new or changed membership declaration rebuilds its Endpoints
//!
//! Stock Kubernetes only publishes a pod's primary IP; this controller
//! publishes the addresses of its secondary interfaces instead.

mod config;
mod controller;
mod endpoints;
mod error;
mod event;
mod reconciler;
mod retry;
mod selector;
mod test_utils;
mod watcher;
mod writer;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting DANM service watcher");

    // Load configuration from environment variables
    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Max update retries: {}", config.retry.max_attempts());
    info!("  Retry interval: {:?} (gives up after {:?})", config.retry.interval(), config.retry.budget());

    // Initialize and run controller
    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
