//! Wallet and ledger entry models.
//!
//! Balances are exact decimals. A wallet's balance only changes through
//! [`crate::services::ledger`], which writes a [`LedgerEntry`] for every change.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, postgres::PgRow};

use crate::db::{get_id, get_opt_id};

/// Who a wallet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletKind {
    /// A buyer's or merchant owner's personal wallet.
    User,
    /// The platform wallet that holds buyer funds until orders complete.
    Escrow,
    /// A courier's settlement wallet.
    Courier,
}

impl WalletKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletKind::User => "user",
            WalletKind::Escrow => "escrow",
            WalletKind::Courier => "courier",
        }
    }
}

/// Represents a wallet record from the database.
///
/// # Database Table
///
/// Maps to the `wallets` table. `user_id` is `NULL` for platform wallets
/// (escrow and couriers).
#[derive(Debug, Clone, Serialize)]
pub struct Wallet {
    pub id: u64,

    /// Externally visible wallet identifier, used as counterparty on ledger entries.
    pub wallet_number: String,

    pub user_id: Option<u64>,
    pub kind: WalletKind,
    pub balance: Decimal,

    /// PIN hash for wallet-protected actions. Never serialized.
    #[serde(skip_serializing)]
    pub pin_hash: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Wallet {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let kind: String = row.try_get("kind")?;
        let kind = [WalletKind::User, WalletKind::Escrow, WalletKind::Courier]
            .into_iter()
            .find(|k| k.as_str() == kind)
            .ok_or_else(|| sqlx::Error::ColumnDecode {
                index: "kind".to_string(),
                source: format!("unknown wallet kind {kind:?}").into(),
            })?;

        Ok(Self {
            id: get_id(row, "id")?,
            wallet_number: row.try_get("wallet_number")?,
            user_id: get_opt_id(row, "user_id")?,
            kind,
            balance: row.try_get("balance")?,
            pin_hash: row.try_get("pin_hash")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// One side of a balance change.
///
/// # Database Table
///
/// Maps to the `transactions` table. `amount` is signed: negative on the wallet
/// that paid, positive on the wallet that received. `sender_number` is `NULL`
/// for inflows from outside the ledger (top-ups).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub id: u64,
    pub wallet_id: u64,
    pub sender_number: Option<String>,
    pub recipient_number: String,
    pub amount: Decimal,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for LedgerEntry {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: get_id(row, "id")?,
            wallet_id: get_id(row, "wallet_id")?,
            sender_number: row.try_get("sender_number")?,
            recipient_number: row.try_get("recipient_number")?,
            amount: row.try_get("amount")?,
            description: row.try_get("description")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// One page of a wallet's ledger entries, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct WalletHistory {
    pub entries: Vec<LedgerEntry>,
    pub page: u64,
    pub total_pages: u64,
    pub total_entries: u64,
}

/// Query string of `GET /api/v1/wallets/me/transactions`.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "first_page")]
    pub page: u64,
}

fn first_page() -> u64 {
    1
}

/// Body of `POST /api/v1/wallets/me/top-up`.
///
/// # JSON Example
///
/// ```json
/// { "amount": "150000.00" }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct TopUpRequest {
    pub amount: Decimal,
}
