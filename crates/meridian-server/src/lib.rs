//! Meridian Server
//!
//! The HTTP face of a Meridian replica: typed handlers for the peer wire
//! protocol, the replication broadcaster, the failure-detector probe loop,
//! and the driver for Paxos shard reallocation.
//!
//! @version 0.1.0
//! @author Meridian Development Team

pub mod broadcast;
pub mod config;
pub mod coordinator;
pub mod handlers;
pub mod peer;
pub mod probe;
pub mod router;
pub mod state;

pub use config::ServerConfig;
pub use router::create_router;
pub use state::AppState;
