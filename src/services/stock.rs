//! Variant stock commitment during checkout.
//!
//! Stock is decremented inside the checkout transaction with the variant row
//! locked. The quantity is re-checked after the lock is taken, so concurrent
//! checkouts for the last units serialize on the row and the loser fails
//! instead of driving stock negative.

use std::collections::BTreeMap;

use crate::{
    db::{DbTx, db_id},
    error::AppError,
    models::cart::CartLine,
};

/// Take `quantity` units of a variant out of stock.
///
/// Returns the remaining stock.
///
/// # Errors
///
/// - `NotFound`: Variant doesn't exist
/// - `InsufficientStock`: Fewer than `quantity` units are left
pub async fn decrement_stock(tx: &mut DbTx<'_>, variant_id: u64, quantity: u64) -> Result<u64, AppError> {
    let id = db_id(variant_id)?;

    let stock: i64 = sqlx::query_scalar(
        "SELECT stock FROM variant_combination_products WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(AppError::NotFound("product variant"))?;

    let stock = u64::try_from(stock).unwrap_or_default();
    let remaining = stock
        .checked_sub(quantity)
        .ok_or(AppError::InsufficientStock(variant_id))?;

    sqlx::query(
        r#"
        UPDATE variant_combination_products
        SET stock = $1,
            updated_at = NOW()
        WHERE id = $2
        "#,
    )
    .bind(db_id(remaining)?)
    .bind(id)
    .execute(&mut **tx)
    .await?;

    Ok(remaining)
}

/// Decrement stock for every line of a checkout.
///
/// Quantities are summed per variant first, then variants are locked in
/// ascending id order so concurrent checkouts acquire row locks in the same order.
///
/// # Errors
///
/// - `InsufficientStock`: Any variant is short; nothing is applied once the
///   surrounding transaction rolls back
pub async fn commit_stock<'a>(
    tx: &mut DbTx<'_>,
    lines: impl IntoIterator<Item = &'a CartLine>,
) -> Result<(), AppError> {
    for (variant_id, quantity) in quantities_by_variant(lines)? {
        let remaining = decrement_stock(tx, variant_id, quantity).await?;
        tracing::debug!(variant_id, quantity, remaining, "stock committed");
    }
    Ok(())
}

fn quantities_by_variant<'a>(
    lines: impl IntoIterator<Item = &'a CartLine>,
) -> Result<BTreeMap<u64, u64>, AppError> {
    let mut quantities = BTreeMap::new();
    for line in lines {
        let total: &mut u64 = quantities
            .entry(line.variant_combination_product_id)
            .or_default();
        *total = total
            .checked_add(line.quantity)
            .ok_or_else(|| AppError::InvalidRequest("quantity is out of range".to_string()))?;
    }
    Ok(quantities)
}
