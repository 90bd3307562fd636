//! Access token authentication middleware.
//!
//! Tokens are issued by the identity service; this middleware only verifies them.
//! It intercepts every protected request to:
//! 1. Extract the access token from the Authorization header
//! 2. Hash it and look it up in the database
//! 3. Inject the caller's identity (user, cart, shop) into the request
//! 4. Reject unauthorized requests with HTTP 401

use crate::{
    db::{DbPool, get_id, get_opt_id},
    error::AppError,
};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};

/// Authentication context attached to authenticated requests.
///
/// This struct is inserted into the request's extension map and can be
/// extracted by route handlers to know who made the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: u64,

    /// The user's cart. Buyers without a cart cannot check out.
    pub cart_id: Option<u64>,

    /// The shop the user runs, if any.
    pub merchant_id: Option<u64>,
}

/// SHA-256 hex digest of a token, as stored in `access_tokens.token_hash`.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Access token authentication middleware function.
///
/// # Flow
///
/// 1. Extract `Authorization: Bearer <token>` header from request
/// 2. Hash the `<token>` using SHA-256
/// 3. Query database for a matching active token, joined to the user's cart and shop
/// 4. If found: inject `AuthContext` into request, call next handler
/// 5. If not found: return 401 Unauthorized error
pub async fn auth_middleware(
    State(pool): State<DbPool>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::InvalidToken)?;

    let token_hash = hash_token(token);

    let row = sqlx::query(
        r#"
        SELECT t.user_id, c.id AS cart_id, m.id AS merchant_id
        FROM access_tokens t
        LEFT JOIN carts c ON c.user_id = t.user_id
        LEFT JOIN merchants m ON m.user_id = t.user_id
        WHERE t.token_hash = $1 AND t.is_active = true
        "#,
    )
    .bind(&token_hash)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::InvalidToken)?;

    let auth_context = AuthContext {
        user_id: get_id(&row, "user_id")?,
        cart_id: get_opt_id(&row, "cart_id")?,
        merchant_id: get_opt_id(&row, "merchant_id")?,
    };

    // Route handlers can now extract this using Extension<AuthContext>
    request.extensions_mut().insert(auth_context);

    Ok(next.run(request).await)
}
