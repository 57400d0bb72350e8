//! Meridian Common - Shared Types and Utilities
//!
//! Foundational types used across all Meridian components. Provides the
//! unified error type and the configuration structures that the cluster
//! logic and the HTTP server share.
//!
//! Key Features:
//! - Unified error types with retryable error detection
//! - Cluster timing configuration (probe cadence, peer timeouts)
//!
//! @version 0.1.0
//! @author Meridian Development Team

pub mod config;
pub mod error;

pub use config::ClusterConfig;
pub use error::{MeridianError, Result};
