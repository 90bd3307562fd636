//! Health check endpoint for service monitoring.

use crate::{db::DbPool, error::AppError};
use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` when checkout can run, `degraded` when the escrow wallet is missing
    pub status: &'static str,

    pub database: &'static str,

    /// Whether the platform escrow wallet exists. Every checkout pays into it.
    pub escrow_wallet: bool,

    pub timestamp: DateTime<Utc>,
}

/// Health check handler.
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "status": "healthy",
///   "database": "connected",
///   "escrow_wallet": true,
///   "timestamp": "2025-12-21T19:00:00Z"
/// }
/// ```
///
/// If the database is unreachable, returns the standard error response.
pub async fn health_check(State(pool): State<DbPool>) -> Result<Json<HealthResponse>, AppError> {
    let escrow_wallet: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM wallets WHERE kind = 'escrow')")
            .fetch_one(&pool)
            .await?;

    Ok(Json(HealthResponse {
        status: if escrow_wallet { "healthy" } else { "degraded" },
        database: "connected",
        escrow_wallet,
        timestamp: Utc::now(),
    }))
}
