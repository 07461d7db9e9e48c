//! DANM CRD Definitions
//!
//! Kubernetes Custom Resource Definitions shared by the DANM controllers.
//! Only the network attachment record (`DanmEp`) is modelled here; the
//! network objects themselves are referenced by name.

pub mod danm_ep;

pub use danm_ep::*;
