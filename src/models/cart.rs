//! Cart, address and checkout request types.
//!
//! Carts and addresses belong to collaborators outside this service. The
//! types here are the read-side view checkout needs, plus the request bodies
//! for the checkout endpoints.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, postgres::PgRow};

use crate::db::{get_count, get_id};

/// One cart line joined with its variant, product and merchant.
///
/// Read fresh at checkout time inside the request; never cached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartLine {
    pub cart_product_id: u64,
    pub merchant_id: u64,
    pub product_id: u64,
    pub variant_combination_product_id: u64,
    pub title: String,
    pub description: String,
    pub unit_price: Decimal,
    pub quantity: u64,
    pub weight: Decimal,

    /// Stock at read time. Informational only; the authoritative check
    /// happens under the variant row lock when stock is committed.
    pub stock: u64,
}

impl<'r> FromRow<'r, PgRow> for CartLine {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            cart_product_id: get_id(row, "cart_product_id")?,
            merchant_id: get_id(row, "merchant_id")?,
            product_id: get_id(row, "product_id")?,
            variant_combination_product_id: get_id(row, "variant_combination_product_id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            unit_price: row.try_get("unit_price")?,
            quantity: get_count(row, "quantity")?,
            weight: row.try_get("weight")?,
            stock: get_count(row, "stock")?,
        })
    }
}

/// Courier choice for one merchant group of the cart.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MerchantCheckout {
    pub merchant_id: u64,
    pub courier_id: u64,
    pub courier_price: Decimal,
}

/// Body of `POST /api/v1/checkout` and `POST /api/v1/checkout/price`.
///
/// # JSON Example
///
/// ```json
/// {
///   "address_id": 12,
///   "merchants": [
///     { "merchant_id": 3, "courier_id": 1, "courier_price": "5.00" }
///   ],
///   "voucher_id": 7
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub address_id: u64,
    pub merchants: Vec<MerchantCheckout>,
    #[serde(default)]
    pub voucher_id: Option<u64>,
}

/// A delivery address as stored by the address book.
#[derive(Debug, Clone, PartialEq)]
pub struct Address {
    pub id: u64,
    pub user_id: u64,
    pub name: String,
    pub details: String,
    pub sub_sub_district: String,
    pub sub_district: String,
    pub district: String,
    pub province: String,
    pub zip_code: u64,
}

impl Address {
    /// Single-line snapshot stored on every order detail.
    pub fn formatted(&self) -> String {
        format!(
            "{}, {}, {}, {}, {}, {}, {}",
            self.name,
            self.details,
            self.sub_sub_district,
            self.sub_district,
            self.district,
            self.province,
            self.zip_code
        )
    }
}

impl<'r> FromRow<'r, PgRow> for Address {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: get_id(row, "id")?,
            user_id: get_id(row, "user_id")?,
            name: row.try_get("name")?,
            details: row.try_get("details")?,
            sub_sub_district: row.try_get("sub_sub_district")?,
            sub_district: row.try_get("sub_district")?,
            district: row.try_get("district")?,
            province: row.try_get("province")?,
            zip_code: get_count(row, "zip_code")?,
        })
    }
}

/// A product photo, either live in the catalog or snapshotted onto an order line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Photo {
    pub url: String,
    pub is_default: bool,
}
