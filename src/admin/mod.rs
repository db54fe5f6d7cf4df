//! Bearer-authenticated block management endpoints.

pub mod auth;
pub mod handlers;

use axum::routing::{delete, get};
use axum::{middleware, Router};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::service::AppState;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/blocks", get(list_blocks).post(add_block))
        .route("/admin/blocks/:client_key", delete(remove_block))
        .route("/admin/traffic/:client_key", get(traffic_stats))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
