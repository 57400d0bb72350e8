//! Meridian Error - Unified Error Types
//!
//! Error handling for all Meridian operations. Categorizes errors by domain
//! (validation, routing, causal delivery, consensus, networking) and provides
//! utilities for determining retryability and error classification.
//!
//! @version 0.1.0
//! @author Meridian Development Team

use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Unified error type for all Meridian operations.
#[derive(Error, Debug)]
pub enum MeridianError {
    // Validation errors
    #[error("validation error: {0}")]
    Validation(String),

    #[error("key exceeds {0} bytes")]
    KeyTooLong(usize),

    #[error("request body missing required field: {0}")]
    MissingField(&'static str),

    // Lookup errors
    #[error("key does not exist")]
    KeyNotFound,

    #[error("no such shard: {0}")]
    ShardNotFound(String),

    #[error("view has no such replica: {0}")]
    ReplicaNotFound(String),

    // Causal delivery errors
    #[error("causal dependencies not satisfied; try again later")]
    DependencyNotSatisfied,

    #[error("shards not yet formed; try again later")]
    ShardsNotFormed,

    // Shard topology errors
    #[error("not enough nodes to provide fault tolerance with requested shard count")]
    InsufficientNodes { needed: usize, available: usize },

    #[error("node {0} already belongs to a shard")]
    AlreadySharded(String),

    // Network errors
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("timeout contacting {0}")]
    Timeout(String),

    // Serialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Type Aliases
// =============================================================================

/// Result type alias for Meridian operations.
pub type Result<T> = std::result::Result<T, MeridianError>;

// =============================================================================
// Error Classification
// =============================================================================

impl MeridianError {
    /// Returns true if the operation can be safely retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MeridianError::DependencyNotSatisfied
                | MeridianError::ShardsNotFormed
                | MeridianError::PeerUnreachable(_)
                | MeridianError::Network(_)
                | MeridianError::Timeout(_)
        )
    }

    /// Returns true if this is a user error (vs system error).
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            MeridianError::Validation(_)
                | MeridianError::KeyTooLong(_)
                | MeridianError::MissingField(_)
                | MeridianError::KeyNotFound
                | MeridianError::ShardNotFound(_)
                | MeridianError::ReplicaNotFound(_)
                | MeridianError::InsufficientNodes { .. }
                | MeridianError::AlreadySharded(_)
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
