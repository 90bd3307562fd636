//! Read and write contracts on data owned by other services: carts, addresses
//! and product photos.
//!
//! Checkout only reads these, except for clearing the cart once an order is placed.

use std::collections::{BTreeMap, HashMap};

use sqlx::{PgConnection, Row};

use crate::{
    db::{DbTx, db_id, get_id},
    error::AppError,
    models::cart::{Address, CartLine, Photo},
};

/// Lock the cart row so two checkouts of the same cart run one after the other.
///
/// # Errors
///
/// - `NotFound`: Cart doesn't exist
pub async fn lock_cart(tx: &mut DbTx<'_>, cart_id: u64) -> Result<(), AppError> {
    sqlx::query("SELECT id FROM carts WHERE id = $1 FOR UPDATE")
        .bind(db_id(cart_id)?)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(AppError::NotFound("cart"))?;
    Ok(())
}

/// Current cart lines grouped by merchant.
///
/// Lines inside a group keep the order they were added to the cart.
pub async fn checkout_details(
    conn: &mut PgConnection,
    cart_id: u64,
) -> Result<BTreeMap<u64, Vec<CartLine>>, AppError> {
    let lines = sqlx::query_as::<_, CartLine>(
        r#"
        SELECT cp.id AS cart_product_id,
               p.merchant_id,
               p.id AS product_id,
               v.id AS variant_combination_product_id,
               p.title,
               p.description,
               v.price AS unit_price,
               cp.quantity,
               p.weight,
               v.stock
        FROM cart_products cp
        JOIN variant_combination_products v ON v.id = cp.variant_combination_product_id
        JOIN products p ON p.id = v.product_id
        WHERE cp.cart_id = $1 AND cp.deleted_at IS NULL
        ORDER BY p.merchant_id, cp.id
        "#,
    )
    .bind(db_id(cart_id)?)
    .fetch_all(conn)
    .await?;

    let mut groups: BTreeMap<u64, Vec<CartLine>> = BTreeMap::new();
    for line in lines {
        groups.entry(line.merchant_id).or_default().push(line);
    }
    Ok(groups)
}

/// Remove every line from a cart. Returns how many lines were removed.
pub async fn clear_cart(tx: &mut DbTx<'_>, cart_id: u64) -> Result<u64, AppError> {
    let removed = sqlx::query(
        "UPDATE cart_products SET deleted_at = NOW() WHERE cart_id = $1 AND deleted_at IS NULL",
    )
    .bind(db_id(cart_id)?)
    .execute(&mut **tx)
    .await?
    .rows_affected();

    Ok(removed)
}

pub async fn find_address(
    conn: &mut PgConnection,
    address_id: u64,
) -> Result<Option<Address>, AppError> {
    let address = sqlx::query_as::<_, Address>(
        r#"
        SELECT id, user_id, name, details, sub_sub_district, sub_district, district, province, zip_code
        FROM addresses
        WHERE id = $1 AND deleted_at IS NULL
        "#,
    )
    .bind(db_id(address_id)?)
    .fetch_optional(conn)
    .await?;

    Ok(address)
}

/// Catalog photos of the given products, keyed by product id, default photo first.
pub async fn product_photos(
    conn: &mut PgConnection,
    product_ids: &[u64],
) -> Result<HashMap<u64, Vec<Photo>>, AppError> {
    let ids = product_ids
        .iter()
        .map(|id| db_id(*id))
        .collect::<Result<Vec<i64>, _>>()?;

    let rows = sqlx::query(
        r#"
        SELECT product_id, url, is_default
        FROM product_photos
        WHERE product_id = ANY($1)
        ORDER BY product_id, is_default DESC, id
        "#,
    )
    .bind(&ids)
    .fetch_all(conn)
    .await?;

    let mut photos: HashMap<u64, Vec<Photo>> = HashMap::new();
    for row in rows {
        photos
            .entry(get_id(&row, "product_id")?)
            .or_default()
            .push(Photo {
                url: row.try_get("url")?,
                is_default: row.try_get("is_default")?,
            });
    }
    Ok(photos)
}
