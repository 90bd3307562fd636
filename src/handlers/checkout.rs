//! Checkout HTTP handlers.
//!
//! This module implements the checkout API endpoints:
//! - POST /api/v1/checkout/price - Preview the price of a checkout
//! - POST /api/v1/checkout - Place the order
//! - GET /api/v1/checkout/promotions - Vouchers usable on the cart

use crate::{
    AppState,
    error::AppError,
    middleware::auth::AuthContext,
    models::{cart::CheckoutRequest, voucher::VoucherSummary},
    services::{
        checkout_service::{self, Buyer, CheckoutReceipt},
        pricing::CheckPriceResponse,
    },
};
use axum::{Extension, Json, extract::State, http::StatusCode};

fn buyer(auth: &AuthContext) -> Result<Buyer, AppError> {
    let cart_id = auth.cart_id.ok_or(AppError::NotFound("cart"))?;
    Ok(Buyer {
        user_id: auth.user_id,
        cart_id,
    })
}

/// Preview the price of checking out the caller's cart.
///
/// # Request Body
///
/// ```json
/// {
///   "address_id": 12,
///   "merchants": [{ "merchant_id": 3, "courier_id": 1, "courier_price": "5.00" }],
///   "voucher_id": 7
/// }
/// ```
///
/// # Response (200)
///
/// The price breakdown checkout would commit, plus `balance_sufficient`.
pub async fn check_price(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckPriceResponse>, AppError> {
    let response = checkout_service::check_price(&state.pool, buyer(&auth)?, &request).await?;
    Ok(Json(response))
}

/// Place an order for everything in the caller's cart.
///
/// # Endpoint
///
/// `POST /api/v1/checkout`
///
/// # Response
///
/// - **Success (201 Created)**: The committed order and its price breakdown
/// - **Error (404)**: Cart is empty
/// - **Error (400)**: Invalid address, voucher or courier selection
/// - **Error (422)**: Insufficient balance or stock
/// - **Error (503)**: Checkout timed out and was rolled back
pub async fn checkout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutReceipt>), AppError> {
    let receipt =
        checkout_service::checkout_cart(&state.pool, &state.checkout, buyer(&auth)?, &request)
            .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// List vouchers that currently apply to the caller's cart.
pub async fn list_promotions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<VoucherSummary>>, AppError> {
    let cart_id = buyer(&auth)?.cart_id;
    let vouchers = checkout_service::available_promotions(&state.pool, cart_id).await?;
    Ok(Json(vouchers))
}
