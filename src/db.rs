//! Database connection pool, migrations and id conversion helpers.
//!
//! Identifiers are `BIGINT` in PostgreSQL and `u64` everywhere else. The
//! helpers at the bottom of this module convert at the row boundary so an
//! out-of-range value surfaces as a decode error instead of wrapping.

use sqlx::{Pool, Postgres, Row, postgres::PgRow};

use crate::error::AppError;

/// Type alias for PostgreSQL connection pool.
pub type DbPool = Pool<Postgres>;

/// Type alias for an open PostgreSQL transaction.
pub type DbTx<'c> = sqlx::Transaction<'c, Postgres>;

/// Create a new PostgreSQL connection pool.
///
/// Checkout transactions hold row locks for their whole duration, so the
/// pool size bounds how many checkouts can wait on the same hot wallet.
///
/// # Errors
///
/// Returns an error if:
/// - Database connection string is invalid
/// - Cannot connect to PostgreSQL server
/// - Database authentication fails
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Run database migrations from the `migrations/` directory.
///
/// Migrations are tracked in the `_sqlx_migrations` table, so each one runs only once.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Convert an identifier to its database representation.
pub fn db_id(id: u64) -> Result<i64, AppError> {
    i64::try_from(id).map_err(|_| AppError::InvalidRequest(format!("identifier {id} is out of range")))
}

/// Read a non-null `BIGINT` id column as `u64`.
pub(crate) fn get_id(row: &PgRow, column: &str) -> sqlx::Result<u64> {
    let value: i64 = row.try_get(column)?;
    to_unsigned(column, value)
}

/// Read a nullable `BIGINT` id column as `Option<u64>`.
pub(crate) fn get_opt_id(row: &PgRow, column: &str) -> sqlx::Result<Option<u64>> {
    let value: Option<i64> = row.try_get(column)?;
    value.map(|v| to_unsigned(column, v)).transpose()
}

/// Read a non-null `BIGINT` count column (quantity, stock, quota) as `u64`.
pub(crate) fn get_count(row: &PgRow, column: &str) -> sqlx::Result<u64> {
    get_id(row, column)
}

fn to_unsigned(column: &str, value: i64) -> sqlx::Result<u64> {
    u64::try_from(value).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}
