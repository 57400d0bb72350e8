//! Meridian Failure Detector
//!
//! Background probe loop: every probe interval, ping each peer with a
//! short timeout and escalate to removal after the configured run of
//! consecutive failures. A removal is broadcast to the surviving members
//! and drops the dead peer's vector-clock entry.
//!
//! @version 0.1.0
//! @author Meridian Development Team

use crate::broadcast;
use crate::state::AppState;
use tokio::task::JoinHandle;

/// Spawn the probe loop for this replica.
pub fn spawn_probe_loop(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(state.config.cluster.probe_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            probe_once(&state).await;
        }
    })
}

/// Probe every peer once.
pub async fn probe_once(state: &AppState) {
    let peers = state.peer_addresses();

    for peer in peers {
        match state.peers.helo(&peer).await {
            Ok(()) => {
                state.view.write().record_probe_success(&peer);
            }
            Err(err) => {
                let escalated = {
                    let mut view = state.view.write();
                    view.record_probe_failure(&peer)
                };
                if escalated {
                    tracing::warn!(peer = %peer, error = %err, "peer failed repeated probes, removing");
                    broadcast::cascade_delete(state, peer).await;
                } else {
                    tracing::debug!(peer = %peer, error = %err, "probe failed");
                }
            }
        }
    }
}
