//! Voucher (promotion) models.
//!
//! A voucher row in `promotions` carries its type and scope as short codes.
//! The scope target lives in `merchant_product_promotions`; queries join it in
//! and `FromRow` folds both into [`VoucherScope`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{FromRow, Row, postgres::PgRow};

use crate::db::{get_count, get_id, get_opt_id};

/// How a voucher changes a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoucherType {
    /// Percentage off, `amount` is a rate in (0, 1].
    Discount,
    /// Fixed amount off.
    Cut,
}

impl VoucherType {
    /// Code stored in `promotions.promotion_type`.
    pub fn code(&self) -> &'static str {
        match self {
            VoucherType::Discount => "DISC",
            VoucherType::Cut => "CUT",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        [VoucherType::Discount, VoucherType::Cut]
            .into_iter()
            .find(|t| t.code() == code)
    }
}

/// Which part of an order a voucher applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", content = "target_id", rename_all = "snake_case")]
pub enum VoucherScope {
    Global,
    Merchant(u64),
    Product(u64),
}

/// A voucher as read from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct Voucher {
    pub id: u64,
    pub name: String,
    pub voucher_type: VoucherType,
    pub scope: VoucherScope,

    /// Discount rate for [`VoucherType::Discount`], fixed amount for [`VoucherType::Cut`].
    pub amount: Decimal,

    /// Soft cap on a Discount's computed amount. Ignored for Cut vouchers.
    pub max_amount: Option<Decimal>,

    pub quota: u64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Voucher {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let type_code: String = row.try_get("promotion_type")?;
        let voucher_type =
            VoucherType::from_code(&type_code).ok_or_else(|| decode_error("promotion_type", &type_code))?;

        let scope_code: String = row.try_get("promotion_scope")?;
        let scope = match scope_code.as_str() {
            "GLOBAL" => VoucherScope::Global,
            "MERCHANT" => VoucherScope::Merchant(
                get_opt_id(row, "target_merchant_id")?
                    .ok_or_else(|| decode_error("target_merchant_id", "NULL"))?,
            ),
            "PRODUCT" => VoucherScope::Product(
                get_opt_id(row, "target_product_id")?
                    .ok_or_else(|| decode_error("target_product_id", "NULL"))?,
            ),
            other => return Err(decode_error("promotion_scope", other)),
        };

        Ok(Self {
            id: get_id(row, "id")?,
            name: row.try_get("promo_name")?,
            voucher_type,
            scope,
            amount: row.try_get("amount")?,
            max_amount: row.try_get("max_amount")?,
            quota: get_count(row, "quota")?,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
        })
    }
}

fn decode_error(column: &str, value: &str) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("unexpected value {value:?}").into(),
    }
}

/// Voucher as listed to a buyer choosing a promotion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoucherSummary {
    pub id: u64,
    pub name: String,
    pub voucher_type: VoucherType,
    #[serde(flatten)]
    pub scope: VoucherScope,
    pub amount: Decimal,
    pub max_amount: Option<Decimal>,
    pub end_date: DateTime<Utc>,
}

impl From<Voucher> for VoucherSummary {
    fn from(voucher: Voucher) -> Self {
        Self {
            id: voucher.id,
            name: voucher.name,
            voucher_type: voucher.voucher_type,
            scope: voucher.scope,
            amount: voucher.amount,
            max_amount: voucher.max_amount,
            end_date: voucher.end_date,
        }
    }
}
