//! Wallet ledger - the only code that writes wallet balances.
//!
//! Every balance change happens inside a database transaction, on a wallet row
//! locked with `SELECT ... FOR UPDATE`, and is recorded as a ledger entry in
//! the `transactions` table.
//!
//! # Movements
//!
//! Money moving between two wallets is described by a [`Movement`]. The ledger
//! explodes it into exactly two entries, a debit on the sender and a matching
//! credit on the recipient, so the pair always sums to zero.
//!
//! # Lock ordering
//!
//! Callers that touch several wallets lock them up front with [`lock_wallets`],
//! which takes user wallets before platform wallets and orders by id inside
//! each group. Every transaction acquires wallet locks in the same order, so a
//! buyer's wallet is always locked before the escrow wallet.

use rust_decimal::Decimal;
use sqlx::PgConnection;

use crate::{
    db::{DbPool, DbTx, db_id},
    error::AppError,
    models::wallet::{LedgerEntry, Wallet, WalletHistory},
};

/// Ledger entries per history page.
pub const HISTORY_PAGE_SIZE: u64 = 10;

const WALLET_COLUMNS: &str =
    "id, wallet_number, user_id, kind, balance, pin_hash, created_at, updated_at";

/// A transfer of a positive amount between two distinct wallets.
#[derive(Debug, Clone, PartialEq)]
pub struct Movement {
    from: u64,
    to: u64,
    amount: Decimal,
    description: String,
}

/// One side of a [`Movement`]: a signed change to one wallet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Leg {
    pub wallet_id: u64,
    pub amount: Decimal,
}

impl Movement {
    /// # Errors
    ///
    /// - `InvalidRequest`: `amount` is not positive, or both wallets are the same
    pub fn new(
        from: u64,
        to: u64,
        amount: Decimal,
        description: impl Into<String>,
    ) -> Result<Self, AppError> {
        if amount <= Decimal::ZERO {
            return Err(AppError::InvalidRequest(
                "Amount must be positive".to_string(),
            ));
        }
        if from == to {
            return Err(AppError::InvalidRequest(
                "Cannot move funds from a wallet to itself".to_string(),
            ));
        }
        Ok(Self {
            from,
            to,
            amount,
            description: description.into(),
        })
    }

    pub fn sender(&self) -> u64 {
        self.from
    }

    pub fn recipient(&self) -> u64 {
        self.to
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The debit leg followed by the credit leg.
    pub fn legs(&self) -> [Leg; 2] {
        [
            Leg {
                wallet_id: self.from,
                amount: -self.amount,
            },
            Leg {
                wallet_id: self.to,
                amount: self.amount,
            },
        ]
    }
}

/// The two ledger entries written for one movement.
#[derive(Debug, Clone)]
pub struct RecordedMovement {
    pub debit: LedgerEntry,
    pub credit: LedgerEntry,
}

/// Lock a set of wallets for the rest of the transaction.
///
/// User wallets are locked before platform (escrow and courier) wallets, each
/// group by ascending id.
///
/// # Errors
///
/// - `NotFound`: One of the ids has no wallet
pub async fn lock_wallets(tx: &mut DbTx<'_>, wallet_ids: &[u64]) -> Result<Vec<Wallet>, AppError> {
    let mut ids = wallet_ids
        .iter()
        .map(|id| db_id(*id))
        .collect::<Result<Vec<i64>, _>>()?;
    ids.sort_unstable();
    ids.dedup();

    let wallets = sqlx::query_as::<_, Wallet>(&format!(
        "SELECT {WALLET_COLUMNS} FROM wallets
         WHERE id = ANY($1)
         ORDER BY (kind <> 'user'), id
         FOR UPDATE"
    ))
    .bind(&ids)
    .fetch_all(&mut **tx)
    .await?;

    if wallets.len() != ids.len() {
        return Err(AppError::NotFound("wallet"));
    }

    Ok(wallets)
}

/// Add `amount` (signed) to a wallet's balance under a row lock.
///
/// Returns the wallet number for use as a ledger counterparty.
///
/// # Errors
///
/// - `NotFound`: Wallet doesn't exist
/// - `InsufficientBalance`: The balance would go negative
async fn adjust_balance(tx: &mut DbTx<'_>, wallet_id: u64, amount: Decimal) -> Result<String, AppError> {
    let (balance, wallet_number): (Decimal, String) = sqlx::query_as(
        "SELECT balance, wallet_number FROM wallets WHERE id = $1 FOR UPDATE",
    )
    .bind(db_id(wallet_id)?)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(AppError::NotFound("wallet"))?;

    let new_balance = balance + amount;
    if new_balance < Decimal::ZERO {
        return Err(AppError::InsufficientBalance);
    }

    sqlx::query(
        r#"
        UPDATE wallets
        SET balance = $1,
            updated_at = NOW()
        WHERE id = $2
        "#,
    )
    .bind(new_balance)
    .bind(db_id(wallet_id)?)
    .execute(&mut **tx)
    .await
    .map_err(AppError::from_constraint)?;

    Ok(wallet_number)
}

async fn insert_entry(
    tx: &mut DbTx<'_>,
    wallet_id: u64,
    sender_number: Option<&str>,
    recipient_number: &str,
    amount: Decimal,
    description: &str,
) -> Result<LedgerEntry, AppError> {
    let entry = sqlx::query_as::<_, LedgerEntry>(
        r#"
        INSERT INTO transactions (wallet_id, sender_number, recipient_number, amount, description)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, wallet_id, sender_number, recipient_number, amount, description, created_at
        "#,
    )
    .bind(db_id(wallet_id)?)
    .bind(sender_number)
    .bind(recipient_number)
    .bind(amount)
    .bind(description)
    .fetch_one(&mut **tx)
    .await?;

    Ok(entry)
}

/// Apply a movement inside the caller's transaction.
///
/// Adjusts both balances and writes the debit and credit entries. Both
/// entries carry the sender and recipient wallet numbers.
///
/// # Errors
///
/// - `InsufficientBalance`: The sender cannot cover the amount
/// - `NotFound`: Either wallet doesn't exist
pub async fn record_movement(
    tx: &mut DbTx<'_>,
    movement: &Movement,
) -> Result<RecordedMovement, AppError> {
    let [debit_leg, credit_leg] = movement.legs();

    let sender_number = adjust_balance(tx, debit_leg.wallet_id, debit_leg.amount).await?;
    let recipient_number = adjust_balance(tx, credit_leg.wallet_id, credit_leg.amount).await?;

    let debit = insert_entry(
        tx,
        debit_leg.wallet_id,
        Some(&sender_number),
        &recipient_number,
        debit_leg.amount,
        movement.description(),
    )
    .await?;
    let credit = insert_entry(
        tx,
        credit_leg.wallet_id,
        Some(&sender_number),
        &recipient_number,
        credit_leg.amount,
        movement.description(),
    )
    .await?;

    tracing::debug!(
        from = movement.sender(),
        to = movement.recipient(),
        amount = %movement.amount(),
        description = movement.description(),
        "movement recorded"
    );

    Ok(RecordedMovement { debit, credit })
}

/// Find a user's wallet.
///
/// # Errors
///
/// - `NotFound`: The user has no wallet
pub async fn find_by_user(conn: &mut PgConnection, user_id: u64) -> Result<Wallet, AppError> {
    sqlx::query_as::<_, Wallet>(&format!(
        "SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1"
    ))
    .bind(db_id(user_id)?)
    .fetch_optional(conn)
    .await?
    .ok_or(AppError::NotFound("wallet"))
}

/// The platform escrow wallet.
///
/// # Errors
///
/// - `NotFound`: No escrow wallet is provisioned
pub async fn escrow_wallet(conn: &mut PgConnection) -> Result<Wallet, AppError> {
    sqlx::query_as::<_, Wallet>(&format!(
        "SELECT {WALLET_COLUMNS} FROM wallets WHERE kind = 'escrow'"
    ))
    .fetch_optional(conn)
    .await?
    .ok_or(AppError::NotFound("escrow wallet"))
}

/// Credit a user's wallet with funds from outside the ledger.
///
/// Writes a single entry with no sender.
///
/// # Errors
///
/// - `InvalidRequest`: Amount is zero or negative
/// - `NotFound`: The user has no wallet
pub async fn top_up(pool: &DbPool, user_id: u64, amount: Decimal) -> Result<LedgerEntry, AppError> {
    if amount <= Decimal::ZERO {
        return Err(AppError::InvalidRequest(
            "Amount must be positive".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    let wallet = find_by_user(&mut tx, user_id).await?;
    let wallet_number = adjust_balance(&mut tx, wallet.id, amount).await?;
    let entry = insert_entry(&mut tx, wallet.id, None, &wallet_number, amount, "Top up").await?;

    tx.commit().await?;

    tracing::info!(user_id, wallet_id = wallet.id, amount = %amount, "wallet topped up");
    Ok(entry)
}

/// One page of a user's ledger entries, newest first.
///
/// Pages start at 1.
///
/// # Errors
///
/// - `InvalidRequest`: Page is 0
/// - `NotFound`: The user has no wallet
pub async fn history(pool: &DbPool, user_id: u64, page: u64) -> Result<WalletHistory, AppError> {
    if page == 0 {
        return Err(AppError::InvalidRequest("Page starts at 1".to_string()));
    }

    let mut conn = pool.acquire().await?;
    let wallet = find_by_user(&mut conn, user_id).await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE wallet_id = $1")
        .bind(db_id(wallet.id)?)
        .fetch_one(&mut *conn)
        .await?;
    let total_entries = u64::try_from(total).unwrap_or_default();

    let offset = (page - 1).saturating_mul(HISTORY_PAGE_SIZE);
    let entries = sqlx::query_as::<_, LedgerEntry>(
        r#"
        SELECT id, wallet_id, sender_number, recipient_number, amount, description, created_at
        FROM transactions
        WHERE wallet_id = $1
        ORDER BY created_at DESC, id DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(db_id(wallet.id)?)
    .bind(db_id(HISTORY_PAGE_SIZE)?)
    .bind(db_id(offset)?)
    .fetch_all(&mut *conn)
    .await?;

    Ok(WalletHistory {
        entries,
        page,
        total_pages: total_entries.div_ceil(HISTORY_PAGE_SIZE),
        total_entries,
    })
}
