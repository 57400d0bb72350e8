//! Meridian Request Handlers
//!
//! HTTP request handlers for the peer wire protocol: view membership,
//! key-value operations with causal metadata, shard topology
//! introspection, reallocation triggers, and the Paxos message channel.
//! Request bodies are validated once at the boundary into typed structs;
//! a missing field is an explicit error, never an afterthought.
//!
//! @version 0.1.0
//! @author Meridian Development Team

use crate::state::{AppState, KeyRoute};
use crate::{broadcast, coordinator};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use meridian_cluster::{
    Address, CausalMetadata, Delivery, PaxosMessage, Sender, ShardAssignment, ShardId, ViewChange,
    Write, WriteResult,
};
use meridian_common::MeridianError;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

// =============================================================================
// API Error
// =============================================================================

/// Error wrapper mapping the unified error type onto HTTP statuses.
#[derive(Debug)]
pub struct ApiError(pub MeridianError);

impl From<MeridianError> for ApiError {
    fn from(err: MeridianError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            MeridianError::Validation(_)
            | MeridianError::KeyTooLong(_)
            | MeridianError::MissingField(_)
            | MeridianError::InsufficientNodes { .. }
            | MeridianError::AlreadySharded(_) => StatusCode::BAD_REQUEST,
            MeridianError::KeyNotFound
            | MeridianError::ShardNotFound(_)
            | MeridianError::ReplicaNotFound(_) => StatusCode::NOT_FOUND,
            MeridianError::DependencyNotSatisfied
            | MeridianError::ShardsNotFormed
            | MeridianError::PeerUnreachable(_)
            | MeridianError::Network(_)
            | MeridianError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            MeridianError::Serialization(_)
            | MeridianError::Configuration(_)
            | MeridianError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Fallback for unknown routes.
pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({"error": "not found"})))
}

// =============================================================================
// Liveness
// =============================================================================

/// Body of a liveness greeting.
#[derive(Debug, Deserialize)]
pub struct HeloBody {
    #[serde(rename = "socket-address")]
    pub socket_address: String,
}

/// Probe greeting. Also re-admits a sender this replica had given up on.
pub async fn helo(State(state): State<AppState>, Json(body): Json<HeloBody>) -> impl IntoResponse {
    let sender = Address::new(body.socket_address);
    let change = state.view.write().restore(sender.clone());
    if change == ViewChange::Added {
        state.engine.write().track_replica(&sender);
        tracing::info!(replica = %sender, "re-admitted replica after greeting");
    }
    Json(json!({"result": "ok"}))
}

// =============================================================================
// View API
// =============================================================================

/// Body of a view mutation. A missing sender-id marks the request as
/// client-originated and triggers fan-out to the other members.
#[derive(Debug, Deserialize)]
pub struct ViewBody {
    #[serde(rename = "socket-address")]
    pub socket_address: String,
    #[serde(rename = "sender-id")]
    pub sender_id: Option<String>,
}

/// GET /view
pub async fn view_get(State(state): State<AppState>) -> impl IntoResponse {
    let members = state.view.read().members().to_vec();
    Json(json!({"view": members}))
}

/// PUT /view
pub async fn view_put(
    State(state): State<AppState>,
    Json(body): Json<ViewBody>,
) -> impl IntoResponse {
    let target = Address::new(body.socket_address);
    let change = state.view.write().join(target.clone());

    if change == ViewChange::AlreadyPresent {
        return (
            StatusCode::CREATED,
            Json(json!({"result": "already present"})),
        );
    }

    state.engine.write().track_replica(&target);
    tracing::info!(replica = %target, "replica added to view");

    if body.sender_id.is_none() {
        broadcast::fanout_view_put(&state, &target).await;
    }
    (StatusCode::OK, Json(json!({"result": "added"})))
}

/// DELETE /view
pub async fn view_delete(
    State(state): State<AppState>,
    Json(body): Json<ViewBody>,
) -> Result<Response, ApiError> {
    let target = Address::new(body.socket_address);

    if !state.view.read().contains(&target) {
        return Err(MeridianError::ReplicaNotFound(target.to_string()).into());
    }

    if body.sender_id.is_none() {
        // Client-originated: remove locally and fan out, cascading onto
        // any members found unreachable along the way.
        broadcast::cascade_delete(&state, target).await;
    } else {
        state.view.write().leave(&target);
        state.engine.write().forget_replica(&target);
        tracing::info!(replica = %target, "replica removed from view");
    }

    Ok((StatusCode::OK, Json(json!({"result": "deleted"}))).into_response())
}

// =============================================================================
// Key-Value API
// =============================================================================

/// Body of a key-value write.
#[derive(Debug, Default, Deserialize)]
pub struct KvsWriteBody {
    pub value: Option<Value>,
    #[serde(rename = "causal-metadata")]
    pub causal_metadata: Option<CausalMetadata>,
    /// Peer deliveries set this false; it is implied by socket-address.
    #[serde(default)]
    pub broadcast: Option<bool>,
    #[serde(rename = "socket-address")]
    pub socket_address: Option<String>,
}

/// Body of a key-value read.
#[derive(Debug, Default, Deserialize)]
pub struct KvsReadBody {
    #[serde(rename = "causal-metadata")]
    pub causal_metadata: Option<CausalMetadata>,
}

/// PUT /kvs/{key}
pub async fn kvs_put(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Option<Json<KvsWriteBody>>,
) -> Result<Response, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let max = state.config.cluster.max_key_bytes;
    if key.len() > max {
        return Err(MeridianError::KeyTooLong(max).into());
    }
    let Some(value) = body.value.clone() else {
        return Err(MeridianError::MissingField("value").into());
    };

    match state.route_key(&key) {
        KeyRoute::Remote(shard, members) => {
            let mut forwarded = json!({"value": value});
            if let Some(md) = &body.causal_metadata {
                forwarded["causal-metadata"] = serde_json::to_value(md)
                    .map_err(|e| MeridianError::Serialization(e.to_string()))?;
            }
            relay(&state, reqwest::Method::PUT, &key, forwarded, members, &shard).await
        }
        KeyRoute::Local(_) | KeyRoute::Unsharded => {
            local_write(&state, Write::put(key, value), body).await
        }
    }
}

/// DELETE /kvs/{key}
pub async fn kvs_delete(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Option<Json<KvsWriteBody>>,
) -> Result<Response, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();

    match state.route_key(&key) {
        KeyRoute::Remote(shard, members) => {
            let mut forwarded = json!({});
            if let Some(md) = &body.causal_metadata {
                forwarded["causal-metadata"] = serde_json::to_value(md)
                    .map_err(|e| MeridianError::Serialization(e.to_string()))?;
            }
            relay(&state, reqwest::Method::DELETE, &key, forwarded, members, &shard).await
        }
        KeyRoute::Local(_) | KeyRoute::Unsharded => {
            local_write(&state, Write::delete(key), body).await
        }
    }
}

/// GET /kvs/{key}
pub async fn kvs_get(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Option<Json<KvsReadBody>>,
) -> Result<Response, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();

    match state.route_key(&key) {
        KeyRoute::Remote(shard, members) => {
            let mut forwarded = json!({});
            if let Some(md) = &body.causal_metadata {
                forwarded["causal-metadata"] = serde_json::to_value(md)
                    .map_err(|e| MeridianError::Serialization(e.to_string()))?;
            }
            relay(&state, reqwest::Method::GET, &key, forwarded, members, &shard).await
        }
        KeyRoute::Local(_) | KeyRoute::Unsharded => {
            let engine = state.engine.read();
            if let Some(md) = &body.causal_metadata {
                if !engine.read_satisfiable(md) {
                    return Err(MeridianError::DependencyNotSatisfied.into());
                }
            }
            match engine.store().get(&key) {
                Some(value) => {
                    let metadata =
                        engine.read_metadata(body.causal_metadata.and_then(|m| m.depends_on));
                    Ok((
                        StatusCode::OK,
                        Json(json!({
                            "result": "found",
                            "value": value,
                            "causal-metadata": metadata,
                        })),
                    )
                        .into_response())
                }
                None => Err(MeridianError::KeyNotFound.into()),
            }
        }
    }
}

/// Apply a write locally through the causal engine and fan out whatever
/// client-originated deliveries it produced.
async fn local_write(
    state: &AppState,
    write: Write,
    body: KvsWriteBody,
) -> Result<Response, ApiError> {
    let sender = match body.socket_address {
        Some(addr) => Sender::Peer(Address::new(addr)),
        None => Sender::Client,
    };

    let delivery = state
        .engine
        .write()
        .submit(write, sender, body.causal_metadata)?;

    match delivery {
        Delivery::Queued => Err(MeridianError::DependencyNotSatisfied.into()),
        Delivery::Applied {
            result,
            metadata,
            broadcasts,
            unblocked,
        } => {
            if unblocked > 0 {
                tracing::info!(unblocked, "delivery unblocked queued writes");
            }
            broadcast::broadcast_writes(state, broadcasts);

            let status = if result == WriteResult::Created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            Ok((
                status,
                Json(json!({"result": result.as_str(), "causal-metadata": metadata})),
            )
                .into_response())
        }
    }
}

/// Forward a request to a member of the owning shard, trying a different
/// member on connection failure and relaying the first response unchanged.
async fn relay(
    state: &AppState,
    method: reqwest::Method,
    key: &str,
    body: Value,
    mut members: Vec<Address>,
    shard: &ShardId,
) -> Result<Response, ApiError> {
    members.shuffle(&mut rand::thread_rng());

    for member in &members {
        match state.peers.forward_kvs(member, method.clone(), key, &body).await {
            Ok((status, reply)) => {
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                return Ok((status, Json(reply)).into_response());
            }
            Err(err) => {
                tracing::warn!(peer = %member, error = %err, "forward failed, trying another member");
                broadcast::report_unreachable(state, member).await;
            }
        }
    }
    Err(MeridianError::PeerUnreachable(format!("shard {shard}")).into())
}

// =============================================================================
// Bulk Transfer API
// =============================================================================

/// GET /kvs/fetchAll — full local store plus causal metadata.
pub async fn fetch_all(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.engine.read();
    Json(json!({
        "kvs": engine.store().snapshot(),
        "causal-metadata": engine.read_metadata(None),
    }))
}

/// Body of a bulk load.
#[derive(Debug, Deserialize)]
pub struct LoadAllBody {
    pub kvs: Option<HashMap<String, Value>>,
}

/// PUT /kvs/loadAll — bulk-load records during shard migration.
pub async fn load_all(
    State(state): State<AppState>,
    body: Option<Json<LoadAllBody>>,
) -> Result<Response, ApiError> {
    let Some(kvs) = body.and_then(|Json(b)| b.kvs) else {
        return Err(MeridianError::MissingField("kvs").into());
    };

    let count = kvs.len();
    state.engine.write().store_mut().load(kvs);
    tracing::info!(records = count, "bulk load complete");
    Ok((StatusCode::OK, Json(json!({"result": "loaded"}))).into_response())
}

// =============================================================================
// Shard API
// =============================================================================

/// GET /shard/ids
pub async fn shard_ids(State(state): State<AppState>) -> impl IntoResponse {
    let ids = state.shards.read().map.ids();
    Json(json!({"shard-ids": ids}))
}

/// GET /shard/node-shard-id
pub async fn node_shard_id(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({"node-shard-id": state.own_shard()}))
}

/// GET /shard/members/{id}
pub async fn shard_members(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let shard = ShardId::new(id);
    let members = state
        .shards
        .read()
        .map
        .members(&shard)
        .map(|m| m.to_vec())
        .ok_or_else(|| MeridianError::ShardNotFound(shard.to_string()))?;
    Ok((StatusCode::OK, Json(json!({"shard-members": members}))).into_response())
}

/// GET /shard/key-count/{id} — forwarded to an owning member when this
/// replica is not in the queried shard.
pub async fn shard_key_count(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let shard = ShardId::new(id);
    let local = state.local_address();

    let members = {
        let view = state.view.read();
        let shards = state.shards.read();
        let members = shards
            .map
            .members(&shard)
            .ok_or_else(|| MeridianError::ShardNotFound(shard.to_string()))?;
        if members.contains(&local) {
            None
        } else {
            Some(
                members
                    .iter()
                    .filter(|m| view.contains(m))
                    .cloned()
                    .collect::<Vec<_>>(),
            )
        }
    };

    let Some(mut members) = members else {
        let count = state.engine.read().store().len();
        return Ok((StatusCode::OK, Json(json!({"shard-key-count": count}))).into_response());
    };

    members.shuffle(&mut rand::thread_rng());
    for member in &members {
        match state.peers.key_count(member, shard.as_str()).await {
            Ok((status, reply)) => {
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                return Ok((status, Json(reply)).into_response());
            }
            Err(err) => {
                tracing::warn!(peer = %member, error = %err, "key-count forward failed");
            }
        }
    }
    Err(MeridianError::PeerUnreachable(format!("shard {shard}")).into())
}

/// Body of an add-member request.
#[derive(Debug, Deserialize)]
pub struct AddMemberBody {
    #[serde(rename = "socket-address")]
    pub socket_address: String,
}

/// PUT /shard/add-member/{id} — drives a Paxos round for the grown map.
pub async fn add_member(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AddMemberBody>,
) -> Result<Response, ApiError> {
    let shard = ShardId::new(id);
    let target = Address::new(body.socket_address);

    let plan = {
        let view = state.view.read();
        let shards = state.shards.read();
        if !view.contains(&target) {
            return Err(MeridianError::ReplicaNotFound(target.to_string()).into());
        }
        let mut map = shards.map.clone();
        map.insert_member(&shard, target.clone())?;
        map
    };

    tracing::info!(shard = %shard, replica = %target, "proposing shard membership change");
    coordinator::run_reallocation(&state, ShardAssignment::new(plan)).await?;
    Ok((
        StatusCode::OK,
        Json(json!({"result": "node added to shard"})),
    )
        .into_response())
}

/// Body of a reshard request.
#[derive(Debug, Deserialize)]
pub struct ReshardBody {
    #[serde(rename = "shard-count")]
    pub shard_count: i64,
}

/// PUT /shard/reshard — drives a Paxos round for a resized map.
pub async fn reshard(
    State(state): State<AppState>,
    Json(body): Json<ReshardBody>,
) -> Result<Response, ApiError> {
    if body.shard_count <= 0 {
        return Err(
            MeridianError::Validation("'shard-count' must be a positive integer".into()).into(),
        );
    }

    let plan = {
        let view = state.view.read();
        let shards = state.shards.read();
        shards
            .map
            .redistribute(body.shard_count as usize, view.members())?
    };

    tracing::info!(shard_count = body.shard_count, "proposing reshard");
    coordinator::run_reallocation(&state, ShardAssignment::new(plan)).await?;
    Ok((StatusCode::OK, Json(json!({"result": "resharded"}))).into_response())
}

/// POST /shard-alloc — the Paxos message channel.
pub async fn shard_alloc(
    State(state): State<AppState>,
    Json(message): Json<PaxosMessage>,
) -> impl IntoResponse {
    Json(coordinator::handle_message(&state, message).await)
}
