//! Marketplace checkout server.
//!
//! Turns shopping carts into merchant-scoped orders with exact decimal prices,
//! applies vouchers, settles payments through an internal wallet ledger and
//! releases escrowed funds as orders complete.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use axum::{
    Router,
    extract::FromRef,
    middleware as axum_middleware,
    routing::{get, patch, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{config::CheckoutSettings, db::DbPool};

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub checkout: CheckoutSettings,
}

impl FromRef<AppState> for DbPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

/// Build the HTTP router with routes and middleware.
pub fn router(state: AppState) -> Router {
    // Authenticated routes (API endpoints)
    let authenticated_routes = Router::new()
        .route(
            "/api/v1/checkout/price",
            post(handlers::checkout::check_price),
        )
        .route("/api/v1/checkout", post(handlers::checkout::checkout))
        .route(
            "/api/v1/checkout/promotions",
            get(handlers::checkout::list_promotions),
        )
        .route(
            "/api/v1/orders/{order_detail_id}/status",
            patch(handlers::orders::update_status),
        )
        .route("/api/v1/wallets/me", get(handlers::wallets::get_wallet))
        .route(
            "/api/v1/wallets/me/transactions",
            get(handlers::wallets::list_transactions),
        )
        .route(
            "/api/v1/wallets/me/top-up",
            post(handlers::wallets::top_up),
        )
        // Apply authentication middleware to all routes in this group
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    Router::new()
        // Public routes (no authentication required)
        .route("/health", get(handlers::health::health_check))
        .merge(authenticated_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
