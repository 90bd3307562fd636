//! Wallet HTTP handlers.
//!
//! - GET /api/v1/wallets/me - The caller's wallet
//! - GET /api/v1/wallets/me/transactions?page=N - The caller's ledger entries
//! - POST /api/v1/wallets/me/top-up - Add funds to the caller's wallet

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::wallet::{HistoryQuery, LedgerEntry, TopUpRequest, Wallet, WalletHistory},
    services::ledger,
};
use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
};

/// Get the caller's wallet. The PIN hash is never returned.
pub async fn get_wallet(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Wallet>, AppError> {
    let mut conn = pool.acquire().await?;
    let wallet = ledger::find_by_user(&mut conn, auth.user_id).await?;
    Ok(Json(wallet))
}

/// One page (10 entries) of the caller's ledger, newest first.
pub async fn list_transactions(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<WalletHistory>, AppError> {
    let history = ledger::history(&pool, auth.user_id, query.page).await?;
    Ok(Json(history))
}

/// Credit the caller's wallet.
///
/// # Request Body
///
/// ```json
/// { "amount": "150000.00" }
/// ```
///
/// # Response (201)
///
/// The ledger entry written for the top-up.
pub async fn top_up(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<TopUpRequest>,
) -> Result<(StatusCode, Json<LedgerEntry>), AppError> {
    let entry = ledger::top_up(&pool, auth.user_id, request.amount).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}
