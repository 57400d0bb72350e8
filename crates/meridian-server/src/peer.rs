//! Meridian Peer Client
//!
//! Outbound HTTP calls to peer replicas. Every call carries a short
//! timeout and classifies failures as timeout, unreachable, or generic
//! network error; callers treat all three as a liveness failure rather
//! than retrying indefinitely.
//!
//! @version 0.1.0
//! @author Meridian Development Team

use meridian_cluster::{Address, CausalMetadata, PaxosMessage, VectorClock, Write, WriteAction};
use meridian_common::{ClusterConfig, MeridianError, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

// =============================================================================
// Peer Client
// =============================================================================

/// HTTP client for the peer wire protocol.
#[derive(Clone)]
pub struct PeerClient {
    http: reqwest::Client,
    local: Address,
    config: ClusterConfig,
}

impl PeerClient {
    pub fn new(local: Address, config: ClusterConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            local,
            config,
        }
    }

    fn classify(&self, peer: &Address, err: reqwest::Error) -> MeridianError {
        if err.is_timeout() {
            MeridianError::Timeout(peer.to_string())
        } else if err.is_connect() {
            MeridianError::PeerUnreachable(peer.to_string())
        } else {
            MeridianError::Network(format!("{peer}: {err}"))
        }
    }

    // =========================================================================
    // Liveness
    // =========================================================================

    /// Probe a peer, announcing our own address so a peer that dropped us
    /// can re-admit us.
    pub async fn helo(&self, peer: &Address) -> Result<()> {
        self.http
            .put(format!("{}/helo", peer.base_url()))
            .json(&json!({"socket-address": self.local}))
            .timeout(self.config.probe_timeout)
            .send()
            .await
            .map_err(|e| self.classify(peer, e))?;
        Ok(())
    }

    // =========================================================================
    // View Operations
    // =========================================================================

    /// Tell a peer to add `target` to its view (peer-originated, so the
    /// receiver will not re-broadcast).
    pub async fn view_put(&self, peer: &Address, target: &Address) -> Result<()> {
        self.http
            .put(format!("{}/view", peer.base_url()))
            .json(&json!({"socket-address": target, "sender-id": self.local}))
            .timeout(self.config.forward_timeout)
            .send()
            .await
            .map_err(|e| self.classify(peer, e))?;
        Ok(())
    }

    /// Tell a peer to remove `target` from its view.
    pub async fn view_delete(&self, peer: &Address, target: &Address) -> Result<()> {
        self.http
            .delete(format!("{}/view", peer.base_url()))
            .json(&json!({"socket-address": target, "sender-id": self.local}))
            .timeout(self.config.forward_timeout)
            .send()
            .await
            .map_err(|e| self.classify(peer, e))?;
        Ok(())
    }

    // =========================================================================
    // Replication
    // =========================================================================

    /// Fire-and-forget delivery of an accepted write to one peer.
    pub async fn send_write(
        &self,
        peer: &Address,
        write: &Write,
        metadata: &CausalMetadata,
    ) -> Result<()> {
        let url = format!("{}/kvs/{}", peer.base_url(), write.key);
        let body = json!({
            "value": write.value,
            "causal-metadata": metadata,
            "socket-address": self.local,
            "broadcast": false,
        });

        let request = match write.action {
            WriteAction::Put => self.http.put(url),
            WriteAction::Delete => self.http.delete(url),
        };
        request
            .json(&body)
            .timeout(self.config.broadcast_timeout)
            .send()
            .await
            .map_err(|e| self.classify(peer, e))?;
        Ok(())
    }

    /// Forward a key-space request verbatim to a member of the owning
    /// shard, returning its status and body for relay.
    pub async fn forward_kvs(
        &self,
        peer: &Address,
        method: reqwest::Method,
        key: &str,
        body: &Value,
    ) -> Result<(u16, Value)> {
        let url = format!("{}/kvs/{}", peer.base_url(), key);
        let response = self
            .http
            .request(method, url)
            .json(body)
            .timeout(self.config.forward_timeout)
            .send()
            .await
            .map_err(|e| self.classify(peer, e))?;

        let status = response.status().as_u16();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        Ok((status, body))
    }

    // =========================================================================
    // Bulk Transfer
    // =========================================================================

    /// Fetch a peer's full store and clock for bootstrap or shard join.
    pub async fn fetch_all(&self, peer: &Address) -> Result<(HashMap<String, Value>, VectorClock)> {
        #[derive(Deserialize)]
        struct FetchAllBody {
            kvs: HashMap<String, Value>,
            #[serde(rename = "causal-metadata")]
            metadata: CausalMetadata,
        }

        let response = self
            .http
            .get(format!("{}/kvs/fetchAll", peer.base_url()))
            .timeout(self.config.forward_timeout)
            .send()
            .await
            .map_err(|e| self.classify(peer, e))?;

        let body: FetchAllBody = response
            .json()
            .await
            .map_err(|e| MeridianError::Serialization(e.to_string()))?;
        Ok((body.kvs, body.metadata.clocks))
    }

    /// Bulk-load records into a peer during shard migration.
    pub async fn load_all(&self, peer: &Address, records: &HashMap<String, Value>) -> Result<()> {
        self.http
            .put(format!("{}/kvs/loadAll", peer.base_url()))
            .json(&json!({"kvs": records}))
            .timeout(self.config.forward_timeout)
            .send()
            .await
            .map_err(|e| self.classify(peer, e))?;
        Ok(())
    }

    /// Forward a key-count query to a member of the owning shard.
    pub async fn key_count(&self, peer: &Address, shard: &str) -> Result<(u16, Value)> {
        let response = self
            .http
            .get(format!("{}/shard/key-count/{}", peer.base_url(), shard))
            .timeout(self.config.forward_timeout)
            .send()
            .await
            .map_err(|e| self.classify(peer, e))?;

        let status = response.status().as_u16();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        Ok((status, body))
    }

    // =========================================================================
    // Paxos Channel
    // =========================================================================

    /// Send a Prepare and parse the synchronous Promise reply.
    pub async fn send_prepare(&self, peer: &Address, message: &PaxosMessage) -> Result<PaxosMessage> {
        let response = self
            .http
            .post(format!("{}/shard-alloc", peer.base_url()))
            .json(message)
            .timeout(self.config.paxos_timeout)
            .send()
            .await
            .map_err(|e| self.classify(peer, e))?;

        response
            .json::<PaxosMessage>()
            .await
            .map_err(|e| MeridianError::Serialization(e.to_string()))
    }

    /// Send an Accept or Accepted notification; the reply is a bare ack.
    pub async fn send_paxos(&self, peer: &Address, message: &PaxosMessage) -> Result<()> {
        self.http
            .post(format!("{}/shard-alloc", peer.base_url()))
            .json(message)
            .timeout(self.config.paxos_timeout)
            .send()
            .await
            .map_err(|e| self.classify(peer, e))?;
        Ok(())
    }
}
