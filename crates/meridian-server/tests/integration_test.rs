//! End-to-end integration tests for the Meridian server
//!
//! Drives the full router with in-process requests: view membership,
//! causally-consistent key-value operations, bulk transfer, shard
//! topology, and the Paxos message channel.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::Service;

use meridian_cluster::Address;
use meridian_server::{create_router, AppState, ServerConfig};

/// Build a replica with the given identity and initial view.
fn replica(local: &str, view: &[&str]) -> AppState {
    let config = ServerConfig::new(local)
        .with_view(view.iter().map(|v| Address::new(*v)).collect());
    AppState::new(config)
}

/// Make a request with an optional JSON body and return status + JSON.
async fn request(
    app: &mut axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(value) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_string(&value).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.call(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health() {
    let mut app = create_router(replica("10.0.0.2:8090", &["10.0.0.2:8090"]));
    let (status, body) = request(&mut app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());
}

// =============================================================================
// View API
// =============================================================================

#[tokio::test]
async fn test_view_lifecycle() {
    let mut app = create_router(replica("10.0.0.2:8090", &["10.0.0.2:8090"]));

    let (status, body) = request(&mut app, "GET", "/view", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["view"], json!(["10.0.0.2:8090"]));

    // Adding a present address is idempotent.
    let (status, body) = request(
        &mut app,
        "PUT",
        "/view",
        Some(json!({"socket-address": "10.0.0.2:8090"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["result"], "already present");

    // Peer-originated addition (sender-id present, no fan-out).
    let (status, body) = request(
        &mut app,
        "PUT",
        "/view",
        Some(json!({"socket-address": "10.0.0.3:8090", "sender-id": "10.0.0.3:8090"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "added");

    let (_, body) = request(&mut app, "GET", "/view", None).await;
    assert_eq!(body["view"].as_array().unwrap().len(), 2);

    // Deleting an absent replica is a 404.
    let (status, body) = request(
        &mut app,
        "DELETE",
        "/view",
        Some(json!({"socket-address": "10.0.0.9:8090", "sender-id": "10.0.0.3:8090"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, body) = request(
        &mut app,
        "DELETE",
        "/view",
        Some(json!({"socket-address": "10.0.0.3:8090", "sender-id": "10.0.0.3:8090"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "deleted");
}

#[tokio::test]
async fn test_view_put_requires_socket_address() {
    let mut app = create_router(replica("10.0.0.2:8090", &["10.0.0.2:8090"]));
    let (status, _) = request(&mut app, "PUT", "/view", Some(json!({"bogus": 1}))).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_helo_readmits_replica() {
    let mut app = create_router(replica("10.0.0.2:8090", &["10.0.0.2:8090"]));

    let (status, body) = request(
        &mut app,
        "PUT",
        "/helo",
        Some(json!({"socket-address": "10.0.0.7:8090"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "ok");

    let (_, body) = request(&mut app, "GET", "/view", None).await;
    assert!(body["view"]
        .as_array()
        .unwrap()
        .contains(&json!("10.0.0.7:8090")));
}

// =============================================================================
// Key-Value API (non-sharded, single replica)
// =============================================================================

#[tokio::test]
async fn test_kvs_validation() {
    let mut app = create_router(replica("10.0.0.2:8090", &["10.0.0.2:8090"]));

    // PUT without a value.
    let (status, body) = request(&mut app, "PUT", "/kvs/x", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    // Key longer than 50 bytes.
    let long_key = "k".repeat(51);
    let (status, _) = request(
        &mut app,
        "PUT",
        &format!("/kvs/{long_key}"),
        Some(json!({"value": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_kvs_write_read_delete() {
    let mut app = create_router(replica("10.0.0.2:8090", &["10.0.0.2:8090"]));

    let (status, body) = request(&mut app, "PUT", "/kvs/x", Some(json!({"value": 1}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["result"], "created");
    assert_eq!(body["causal-metadata"]["clocks"]["10.0.0.2:8090"], 1);

    let (status, body) = request(&mut app, "PUT", "/kvs/x", Some(json!({"value": 2}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "replaced");
    assert_eq!(body["causal-metadata"]["clocks"]["10.0.0.2:8090"], 2);

    let (status, body) = request(&mut app, "GET", "/kvs/x", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "found");
    assert_eq!(body["value"], 2);

    let (status, body) = request(&mut app, "DELETE", "/kvs/x", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "deleted");

    let (status, _) = request(&mut app, "GET", "/kvs/x", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = request(&mut app, "DELETE", "/kvs/x", Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unsatisfied_dependency_returns_503_then_converges() {
    let mut app = create_router(replica("10.0.0.2:8090", &["10.0.0.2:8090"]));

    // Write y=2 declaring a dependency on x=42, which is not yet stored.
    let metadata = json!({
        "depends-on": {"action": "PUT", "key": "x", "value": 42},
        "clocks": {},
    });
    let (status, body) = request(
        &mut app,
        "PUT",
        "/kvs/y",
        Some(json!({"value": 2, "causal-metadata": metadata})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].is_string());

    // y must not be observable before its dependency.
    let (status, _) = request(&mut app, "GET", "/kvs/y", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Satisfying the dependency delivers the buffered write automatically.
    let (status, _) = request(&mut app, "PUT", "/kvs/x", Some(json!({"value": 42}))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = request(&mut app, "GET", "/kvs/y", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], 2);
}

#[tokio::test]
async fn test_out_of_order_peer_delivery_is_buffered() {
    let mut app = create_router(replica("10.0.0.2:8090", &["10.0.0.2:8090", "10.0.0.3:8090"]));

    // The peer's second write arrives first.
    let (status, _) = request(
        &mut app,
        "PUT",
        "/kvs/x",
        Some(json!({
            "value": "second",
            "socket-address": "10.0.0.3:8090",
            "broadcast": false,
            "causal-metadata": {"clocks": {"10.0.0.3:8090": 2}},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, _) = request(&mut app, "GET", "/kvs/x", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The first write arrives; both deliver in causal order.
    let (status, _) = request(
        &mut app,
        "PUT",
        "/kvs/x",
        Some(json!({
            "value": "first",
            "socket-address": "10.0.0.3:8090",
            "broadcast": false,
            "causal-metadata": {"clocks": {"10.0.0.3:8090": 1}},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = request(&mut app, "GET", "/kvs/x", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], "second");
}

#[tokio::test]
async fn test_stale_read_rejected() {
    let mut app = create_router(replica("10.0.0.2:8090", &["10.0.0.2:8090"]));

    // A client claiming to have observed writes this replica has not.
    let (status, _) = request(
        &mut app,
        "GET",
        "/kvs/x",
        Some(json!({"causal-metadata": {"clocks": {"10.0.0.9:8090": 3}}})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

// =============================================================================
// Bulk Transfer
// =============================================================================

#[tokio::test]
async fn test_fetch_all_and_load_all() {
    let mut app = create_router(replica("10.0.0.2:8090", &["10.0.0.2:8090"]));

    request(&mut app, "PUT", "/kvs/x", Some(json!({"value": 1}))).await;

    let (status, body) = request(&mut app, "GET", "/kvs/fetchAll", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kvs"]["x"], 1);
    assert_eq!(body["causal-metadata"]["clocks"]["10.0.0.2:8090"], 1);

    let (status, body) = request(
        &mut app,
        "PUT",
        "/kvs/loadAll",
        Some(json!({"kvs": {"y": 2, "z": 3}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "loaded");

    let (status, body) = request(&mut app, "GET", "/kvs/y", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], 2);

    let (status, _) = request(&mut app, "PUT", "/kvs/loadAll", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// =============================================================================
// Shard API
// =============================================================================

#[tokio::test]
async fn test_shard_introspection_before_formation() {
    let mut app = create_router(replica("10.0.0.2:8090", &["10.0.0.2:8090"]));

    let (status, body) = request(&mut app, "GET", "/shard/ids", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["shard-ids"], json!([]));

    let (status, body) = request(&mut app, "GET", "/shard/node-shard-id", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["node-shard-id"], Value::Null);

    let (status, _) = request(&mut app, "GET", "/shard/members/alligator", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = request(&mut app, "GET", "/shard/key-count/alligator", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reshard_rejects_invalid_counts() {
    let mut app = create_router(replica("10.0.0.2:8090", &["10.0.0.2:8090"]));

    let (status, _) = request(
        &mut app,
        "PUT",
        "/shard/reshard",
        Some(json!({"shard-count": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // One node cannot sustain two members per shard; no proposal is issued
    // and the (empty) map is unchanged.
    let (status, body) = request(
        &mut app,
        "PUT",
        "/shard/reshard",
        Some(json!({"shard-count": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("fault tolerance"));

    let (_, body) = request(&mut app, "GET", "/shard/ids", None).await;
    assert_eq!(body["shard-ids"], json!([]));
}

#[tokio::test]
async fn test_paxos_prepare_promise_exchange() {
    let mut app = create_router(replica("10.0.0.2:8090", &["10.0.0.2:8090"]));

    let (status, body) = request(
        &mut app,
        "POST",
        "/shard-alloc",
        Some(json!({
            "type": "PREPARE",
            "proposal": {"number": 5, "sender-id": "10.0.0.3:8090"},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "PROMISE");
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["proposal"]["number"], 5);
    assert_eq!(body["auid"], "10.0.0.2:8090");

    // A lower-numbered competitor is rejected, and the reply carries the
    // promised proposal.
    let (status, body) = request(
        &mut app,
        "POST",
        "/shard-alloc",
        Some(json!({
            "type": "PREPARE",
            "proposal": {"number": 3, "sender-id": "10.0.0.4:8090"},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "rejected");
    assert_eq!(body["proposal"]["number"], 5);
}

#[tokio::test]
async fn test_accepted_message_applies_shard_map_once() {
    let mut app = create_router(replica("10.0.0.2:8090", &["10.0.0.2:8090"]));

    let accepted = json!({
        "type": "ACCEPTED",
        "proposal": {"number": 2, "sender-id": "10.0.0.3:8090"},
        "accepted-value": {
            "shards": {
                "alligator": ["10.0.0.2:8090"],
                "buffalo": ["10.0.0.5:8090", "10.0.0.6:8090"],
            },
        },
    });

    let (status, body) = request(&mut app, "POST", "/shard-alloc", Some(accepted.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "ok");

    let (_, body) = request(&mut app, "GET", "/shard/ids", None).await;
    assert_eq!(body["shard-ids"], json!(["alligator", "buffalo"]));

    let (_, body) = request(&mut app, "GET", "/shard/node-shard-id", None).await;
    assert_eq!(body["node-shard-id"], "alligator");

    let (status, body) = request(&mut app, "GET", "/shard/members/buffalo", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["shard-members"],
        json!(["10.0.0.5:8090", "10.0.0.6:8090"])
    );

    // Re-delivery of the same proposal is silently ignored.
    let (status, body) = request(&mut app, "POST", "/shard-alloc", Some(accepted)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "ok");

    // Key count for our own (empty) shard.
    let (status, body) = request(&mut app, "GET", "/shard/key-count/alligator", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["shard-key-count"], 0);
}

#[tokio::test]
async fn test_add_member_validates_inputs() {
    let mut app = create_router(replica("10.0.0.2:8090", &["10.0.0.2:8090"]));

    // Form a map first.
    request(
        &mut app,
        "POST",
        "/shard-alloc",
        Some(json!({
            "type": "ACCEPTED",
            "proposal": {"number": 1, "sender-id": "10.0.0.3:8090"},
            "accepted-value": {"shards": {"alligator": ["10.0.0.2:8090"]}},
        })),
    )
    .await;

    // Unknown shard.
    let (status, _) = request(
        &mut app,
        "PUT",
        "/shard/add-member/zebra",
        Some(json!({"socket-address": "10.0.0.2:8090"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Address not in the view.
    let (status, _) = request(
        &mut app,
        "PUT",
        "/shard/add-member/alligator",
        Some(json!({"socket-address": "10.0.0.9:8090"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Address already belongs to a shard.
    let (status, _) = request(
        &mut app,
        "PUT",
        "/shard/add-member/alligator",
        Some(json!({"socket-address": "10.0.0.2:8090"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
