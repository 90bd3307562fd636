//! Order status HTTP handler.
//!
//! - PATCH /api/v1/orders/:order_detail_id/status - Advance an order detail

use crate::{
    AppState,
    error::AppError,
    middleware::auth::AuthContext,
    models::order::{OrderStatus, StatusUpdateRequest, StatusUpdateResponse},
    services::order_status::{self, Actor},
};
use axum::{
    Extension, Json,
    extract::{Path, State},
};

/// The role the caller acts in for a given target status.
///
/// Completing and reviewing are buyer steps; every other step is taken as the
/// caller's shop.
fn actor_for(auth: &AuthContext, target: OrderStatus) -> Result<Actor, AppError> {
    match target {
        OrderStatus::Completed | OrderStatus::Reviewed => auth
            .cart_id
            .map(|cart_id| Actor::Buyer { cart_id })
            .ok_or(AppError::UnauthorizedAccess),
        _ => auth
            .merchant_id
            .map(Actor::Merchant)
            .ok_or(AppError::UnauthorizedAccess),
    }
}

/// Advance an order detail to the next status.
///
/// # Request Body
///
/// ```json
/// { "status": "Processed" }
/// ```
///
/// # Response (200)
///
/// ```json
/// {
///   "order_detail_id": 41,
///   "previous_status": "Waiting for Seller",
///   "status": "Processed"
/// }
/// ```
///
/// Returns 401 when the target is not the next status or the caller does not
/// own the step.
pub async fn update_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(order_detail_id): Path<u64>,
    Json(request): Json<StatusUpdateRequest>,
) -> Result<Json<StatusUpdateResponse>, AppError> {
    let actor = actor_for(&auth, request.status)?;
    let response = order_status::advance_order_status(
        &state.pool,
        &state.checkout,
        order_detail_id,
        actor,
        request.status,
    )
    .await?;
    Ok(Json(response))
}
