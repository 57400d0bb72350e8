//! Meridian Router
//!
//! HTTP router configuration. Defines the peer wire protocol routes and
//! applies cross-cutting concerns like request tracing and CORS.
//!
//! @version 0.1.0
//! @author Meridian Development Team

use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

// =============================================================================
// Router
// =============================================================================

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/helo", put(handlers::helo))
        .route(
            "/view",
            put(handlers::view_put)
                .get(handlers::view_get)
                .delete(handlers::view_delete),
        )
        .route("/kvs/fetchAll", get(handlers::fetch_all))
        .route("/kvs/loadAll", put(handlers::load_all))
        .route(
            "/kvs/:key",
            put(handlers::kvs_put)
                .get(handlers::kvs_get)
                .delete(handlers::kvs_delete),
        )
        .route("/shard/ids", get(handlers::shard_ids))
        .route("/shard/node-shard-id", get(handlers::node_shard_id))
        .route("/shard/members/:id", get(handlers::shard_members))
        .route("/shard/key-count/:id", get(handlers::shard_key_count))
        .route("/shard/add-member/:id", put(handlers::add_member))
        .route("/shard/reshard", put(handlers::reshard))
        .route("/shard-alloc", post(handlers::shard_alloc))
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Tests
// =============================================================================
