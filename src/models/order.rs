//! Order models and the order status sequence.
//!
//! An [`Order`] is one checkout event. It owns one [`OrderDetail`] per
//! merchant, and each detail owns the [`OrderDetailProduct`] lines bought from
//! that merchant. Names, descriptions, prices and photos are snapshots taken at
//! checkout so the order stays accurate after the catalog changes.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, postgres::PgRow};

use crate::{
    db::{get_id, get_opt_id},
    models::cart::Photo,
};

/// Status of an order detail.
///
/// Statuses advance strictly in declaration order, one step at a time:
///
/// `Waiting for Seller -> Processed -> On Delivery -> Delivered -> Completed -> Reviewed`
///
/// The display text is both the stored value and the wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    #[serde(rename = "Waiting for Seller")]
    WaitingForSeller,
    #[serde(rename = "Processed")]
    Processed,
    #[serde(rename = "On Delivery")]
    OnDelivery,
    #[serde(rename = "Delivered")]
    Delivered,
    #[serde(rename = "Completed")]
    Completed,
    #[serde(rename = "Reviewed")]
    Reviewed,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::WaitingForSeller,
        OrderStatus::Processed,
        OrderStatus::OnDelivery,
        OrderStatus::Delivered,
        OrderStatus::Completed,
        OrderStatus::Reviewed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::WaitingForSeller => "Waiting for Seller",
            OrderStatus::Processed => "Processed",
            OrderStatus::OnDelivery => "On Delivery",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Completed => "Completed",
            OrderStatus::Reviewed => "Reviewed",
        }
    }

    /// The immediate successor, or `None` for the last status.
    pub fn next(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::WaitingForSeller => Some(OrderStatus::Processed),
            OrderStatus::Processed => Some(OrderStatus::OnDelivery),
            OrderStatus::OnDelivery => Some(OrderStatus::Delivered),
            OrderStatus::Delivered => Some(OrderStatus::Completed),
            OrderStatus::Completed => Some(OrderStatus::Reviewed),
            OrderStatus::Reviewed => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown order status {s:?}"))
    }
}

/// Invoice number of an order detail: `DDMMYYYY`, merchant id padded to four
/// digits, cart id padded to six.
pub fn invoice_number(order_date: DateTime<Utc>, merchant_id: u64, cart_id: u64) -> String {
    format!(
        "{:02}{:02}{:04}{:04}{:06}",
        order_date.day(),
        order_date.month(),
        order_date.year(),
        merchant_id,
        cart_id
    )
}

/// A committed order, returned by `POST /api/v1/checkout`.
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: u64,
    pub cart_id: u64,
    pub initial_price: Decimal,
    pub final_price: Decimal,
    pub order_date: DateTime<Utc>,
    pub voucher_id: Option<u64>,
    pub details: Vec<OrderDetail>,
}

/// The part of an order fulfilled by one merchant.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetail {
    pub id: u64,
    pub order_id: u64,
    pub merchant_id: u64,
    pub courier_id: u64,
    pub courier_price: Decimal,

    /// Formatted delivery address captured at checkout.
    pub address: String,

    pub estimated_time: DateTime<Utc>,
    pub invoice: String,
    pub status: OrderStatus,

    /// Goods subtotal before any voucher, courier price excluded.
    pub initial_price: Decimal,

    /// Goods subtotal after merchant or product vouchers, courier price excluded.
    pub final_price: Decimal,

    pub products: Vec<OrderDetailProduct>,
}

/// One purchased variant line.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetailProduct {
    pub id: u64,
    pub order_detail_id: u64,
    pub product_id: u64,
    pub variant_combination_product_id: u64,
    pub merchant_id: u64,
    pub name: String,
    pub description: String,
    pub quantity: u64,
    pub price: Decimal,
    pub initial_price: Decimal,
    pub final_price: Decimal,
    pub photos: Vec<Photo>,
}

/// The fields of an order detail a status transition needs, read under lock.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDetailState {
    pub id: u64,
    pub order_id: u64,
    pub cart_id: u64,
    pub merchant_id: u64,
    pub courier_id: u64,
    pub voucher_id: Option<u64>,
    pub status: OrderStatus,
    pub final_price: Decimal,
    pub courier_price: Decimal,
    pub invoice: String,
}

impl<'r> FromRow<'r, PgRow> for OrderDetailState {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let status: String = row.try_get("order_status")?;
        let status = status.parse().map_err(|e: String| sqlx::Error::ColumnDecode {
            index: "order_status".to_string(),
            source: e.into(),
        })?;

        Ok(Self {
            id: get_id(row, "id")?,
            order_id: get_id(row, "order_id")?,
            cart_id: get_id(row, "cart_id")?,
            merchant_id: get_id(row, "merchant_id")?,
            courier_id: get_id(row, "courier_id")?,
            voucher_id: get_opt_id(row, "voucher_id")?,
            status,
            final_price: row.try_get("final_price")?,
            courier_price: row.try_get("courier_price")?,
            invoice: row.try_get("invoice")?,
        })
    }
}

/// Body of `PATCH /api/v1/orders/{id}/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: OrderStatus,
}

/// Response of a successful status transition.
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdateResponse {
    pub order_detail_id: u64,
    pub previous_status: OrderStatus,
    pub status: OrderStatus,
}
