//! Merchant and courier directory: who gets paid into which wallet.

use sqlx::{PgConnection, Row};

use crate::{
    db::{db_id, get_id},
    error::AppError,
};

/// A courier and its settlement wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct Courier {
    pub id: u64,
    pub code: String,
    pub wallet_id: u64,
}

/// Wallet a merchant is paid into: its owning user's wallet.
///
/// # Errors
///
/// - `NotFound`: Merchant doesn't exist or its owner has no wallet
pub async fn merchant_wallet_id(conn: &mut PgConnection, merchant_id: u64) -> Result<u64, AppError> {
    let row = sqlx::query(
        r#"
        SELECT w.id
        FROM merchants m
        JOIN wallets w ON w.user_id = m.user_id
        WHERE m.id = $1
        "#,
    )
    .bind(db_id(merchant_id)?)
    .fetch_optional(conn)
    .await?
    .ok_or(AppError::NotFound("merchant wallet"))?;

    Ok(get_id(&row, "id")?)
}

/// # Errors
///
/// - `NotFound`: Courier doesn't exist
pub async fn find_courier(conn: &mut PgConnection, courier_id: u64) -> Result<Courier, AppError> {
    let row = sqlx::query("SELECT id, code, wallet_id FROM couriers WHERE id = $1")
        .bind(db_id(courier_id)?)
        .fetch_optional(conn)
        .await?
        .ok_or(AppError::NotFound("courier"))?;

    Ok(Courier {
        id: get_id(&row, "id")?,
        code: row.try_get("code")?,
        wallet_id: get_id(&row, "wallet_id")?,
    })
}
