//! Shared database fixtures for the integration tests.
//!
//! Tests run against the server named by `TEST_DATABASE_URL` when it is set.
//! Otherwise one PostgreSQL container is started for the whole test binary.
//! Every [`TestDb`] gets its own freshly migrated database on that server, so
//! tests never see each other's rows. Having neither is a hard failure.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Duration, Utc};
use marketplace_checkout_server::{
    config::CheckoutSettings,
    db::DbPool,
    middleware::auth::hash_token,
    models::cart::{CheckoutRequest, MerchantCheckout},
    services::checkout_service::Buyer,
};
use rust_decimal::Decimal;
use sqlx::{
    Connection, PgConnection,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres as PostgresImage;
use tokio::sync::OnceCell;

const DB_USER: &str = "checkout_test";
const DB_PASSWORD: &str = "checkout_test_password";

/// The PostgreSQL server tests create their databases on.
struct TestServer {
    admin_url: String,
    _container: Option<ContainerAsync<PostgresImage>>,
}

static TEST_SERVER: OnceCell<TestServer> = OnceCell::const_new();
static DB_COUNTER: AtomicU64 = AtomicU64::new(0);

async fn init_test_server() -> TestServer {
    if let Ok(admin_url) = std::env::var("TEST_DATABASE_URL") {
        return TestServer {
            admin_url,
            _container: None,
        };
    }

    let container = PostgresImage::default()
        .with_user(DB_USER)
        .with_password(DB_PASSWORD)
        .with_db_name("checkout_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container (set TEST_DATABASE_URL to use an existing server)");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get container port");
    let host = std::env::var("TESTCONTAINERS_HOST_OVERRIDE")
        .unwrap_or_else(|_| "localhost".to_string());

    TestServer {
        admin_url: format!("postgresql://{DB_USER}:{DB_PASSWORD}@{host}:{port}/postgres"),
        _container: Some(container),
    }
}

/// An isolated, migrated database on the shared test server.
#[derive(Debug, Clone)]
pub struct TestDb {
    pub pool: DbPool,
    pub name: String,
}

impl TestDb {
    pub async fn new() -> Self {
        let server = TEST_SERVER.get_or_init(init_test_server).await;

        let name = format!(
            "checkout_test_{}_{}",
            std::process::id(),
            DB_COUNTER.fetch_add(1, Ordering::Relaxed)
        );

        let mut conn = PgConnection::connect(&server.admin_url)
            .await
            .expect("Failed to connect to postgres database");
        sqlx::query(&format!("CREATE DATABASE \"{name}\""))
            .execute(&mut conn)
            .await
            .expect("Failed to create test database");
        conn.close().await.expect("Failed to close admin connection");

        let options = server
            .admin_url
            .parse::<PgConnectOptions>()
            .expect("Invalid test database URL")
            .database(&name);
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .expect("Failed to create pool for database");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations on database");

        Self { pool, name }
    }
}

pub fn dec(s: &str) -> Decimal {
    s.parse().expect("valid decimal literal")
}

fn id(raw: i64) -> u64 {
    u64::try_from(raw).expect("serial ids are positive")
}

pub fn settings() -> CheckoutSettings {
    CheckoutSettings::default()
}

pub async fn create_user(pool: &DbPool, username: &str) -> sqlx::Result<u64> {
    let raw: i64 = sqlx::query_scalar("INSERT INTO users (username) VALUES ($1) RETURNING id")
        .bind(username)
        .fetch_one(pool)
        .await?;
    Ok(id(raw))
}

pub async fn create_user_wallet(pool: &DbPool, user_id: u64, balance: Decimal) -> sqlx::Result<u64> {
    let raw: i64 = sqlx::query_scalar(
        "INSERT INTO wallets (wallet_number, user_id, kind, balance)
         VALUES ($1, $2, 'user', $3) RETURNING id",
    )
    .bind(format!("U{user_id:08}"))
    .bind(user_id as i64)
    .bind(balance)
    .fetch_one(pool)
    .await?;
    Ok(id(raw))
}

pub async fn create_escrow_wallet(pool: &DbPool, balance: Decimal) -> sqlx::Result<u64> {
    let raw: i64 = sqlx::query_scalar(
        "INSERT INTO wallets (wallet_number, kind, balance)
         VALUES ('ESCROW', 'escrow', $1) RETURNING id",
    )
    .bind(balance)
    .fetch_one(pool)
    .await?;
    Ok(id(raw))
}

/// A courier and its payout wallet. Returns `(courier_id, wallet_id)`.
pub async fn create_courier(pool: &DbPool, code: &str) -> sqlx::Result<(u64, u64)> {
    let wallet: i64 = sqlx::query_scalar(
        "INSERT INTO wallets (wallet_number, kind) VALUES ($1, 'courier') RETURNING id",
    )
    .bind(format!("C-{code}"))
    .fetch_one(pool)
    .await?;
    let courier: i64 = sqlx::query_scalar(
        "INSERT INTO couriers (code, name, wallet_id) VALUES ($1, $1, $2) RETURNING id",
    )
    .bind(code)
    .bind(wallet)
    .fetch_one(pool)
    .await?;
    Ok((id(courier), id(wallet)))
}

pub async fn create_merchant(pool: &DbPool, owner_id: u64, name: &str) -> sqlx::Result<u64> {
    let raw: i64 =
        sqlx::query_scalar("INSERT INTO merchants (user_id, name) VALUES ($1, $2) RETURNING id")
            .bind(owner_id as i64)
            .bind(name)
            .fetch_one(pool)
            .await?;
    Ok(id(raw))
}

/// A product with a single variant. Returns `(product_id, variant_id)`.
pub async fn create_product(
    pool: &DbPool,
    merchant_id: u64,
    title: &str,
    price: Decimal,
    stock: u64,
) -> sqlx::Result<(u64, u64)> {
    let product: i64 = sqlx::query_scalar(
        "INSERT INTO products (merchant_id, title, description) VALUES ($1, $2, $2) RETURNING id",
    )
    .bind(merchant_id as i64)
    .bind(title)
    .fetch_one(pool)
    .await?;
    sqlx::query("INSERT INTO product_photos (product_id, url, is_default) VALUES ($1, $2, TRUE)")
        .bind(product)
        .bind(format!("https://img.example.com/{product}.jpg"))
        .execute(pool)
        .await?;
    let variant: i64 = sqlx::query_scalar(
        "INSERT INTO variant_combination_products (product_id, price, stock)
         VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(product)
    .bind(price)
    .bind(stock as i64)
    .fetch_one(pool)
    .await?;
    Ok((id(product), id(variant)))
}

pub async fn create_cart(pool: &DbPool, user_id: u64) -> sqlx::Result<u64> {
    let raw: i64 = sqlx::query_scalar("INSERT INTO carts (user_id) VALUES ($1) RETURNING id")
        .bind(user_id as i64)
        .fetch_one(pool)
        .await?;
    Ok(id(raw))
}

pub async fn add_to_cart(pool: &DbPool, cart_id: u64, variant_id: u64, quantity: u64) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO cart_products (cart_id, variant_combination_product_id, quantity)
         VALUES ($1, $2, $3)",
    )
    .bind(cart_id as i64)
    .bind(variant_id as i64)
    .bind(quantity as i64)
    .execute(pool)
    .await?;
    Ok(())
}

/// Store an access token for `user_id` the way the identity service does.
pub async fn create_access_token(pool: &DbPool, user_id: u64, token: &str) -> sqlx::Result<()> {
    sqlx::query("INSERT INTO access_tokens (user_id, token_hash) VALUES ($1, $2)")
        .bind(user_id as i64)
        .bind(hash_token(token))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn create_address(pool: &DbPool, user_id: u64) -> sqlx::Result<u64> {
    let raw: i64 = sqlx::query_scalar(
        "INSERT INTO addresses
            (user_id, name, details, sub_sub_district, sub_district, district, province, zip_code)
         VALUES ($1, 'Home', 'Jl. Merdeka 1', 'Gambir', 'Gambir', 'Central Jakarta', 'DKI Jakarta', 10110)
         RETURNING id",
    )
    .bind(user_id as i64)
    .fetch_one(pool)
    .await?;
    Ok(id(raw))
}

/// A voucher valid from yesterday until tomorrow.
///
/// `scope` is `GLOBAL`, `MERCHANT` or `PRODUCT`; `target` is the merchant or
/// product id for the scoped kinds.
pub async fn create_voucher(
    pool: &DbPool,
    promotion_type: &str,
    scope: &str,
    target: Option<u64>,
    amount: Decimal,
    quota: u64,
) -> sqlx::Result<u64> {
    let now = Utc::now();
    let raw: i64 = sqlx::query_scalar(
        "INSERT INTO promotions
            (promo_name, promotion_type, promotion_scope, voucher_code, amount, quota, start_date, end_date)
         VALUES ('Test promo', $1, $2, 'TEST', $3, $4, $5, $6)
         RETURNING id",
    )
    .bind(promotion_type)
    .bind(scope)
    .bind(amount)
    .bind(quota as i64)
    .bind(now - Duration::days(1))
    .bind(now + Duration::days(1))
    .fetch_one(pool)
    .await?;

    let (merchant_id, product_id) = match (scope, target) {
        ("MERCHANT", Some(target)) => (Some(target as i64), None),
        ("PRODUCT", Some(target)) => (None, Some(target as i64)),
        _ => (None, None),
    };
    if merchant_id.is_some() || product_id.is_some() {
        sqlx::query(
            "INSERT INTO merchant_product_promotions (promotion_id, merchant_id, product_id)
             VALUES ($1, $2, $3)",
        )
        .bind(raw)
        .bind(merchant_id)
        .bind(product_id)
        .execute(pool)
        .await?;
    }
    Ok(id(raw))
}

pub async fn balance(pool: &DbPool, wallet_id: u64) -> sqlx::Result<Decimal> {
    sqlx::query_scalar("SELECT balance FROM wallets WHERE id = $1")
        .bind(wallet_id as i64)
        .fetch_one(pool)
        .await
}

pub async fn stock(pool: &DbPool, variant_id: u64) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT stock FROM variant_combination_products WHERE id = $1")
        .bind(variant_id as i64)
        .fetch_one(pool)
        .await
}

pub async fn count(pool: &DbPool, table: &str) -> sqlx::Result<i64> {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
}

pub async fn ledger_sum(pool: &DbPool) -> sqlx::Result<Decimal> {
    sqlx::query_scalar("SELECT COALESCE(SUM(amount), 0) FROM transactions")
        .fetch_one(pool)
        .await
}

pub async fn order_status(pool: &DbPool, order_detail_id: u64) -> sqlx::Result<String> {
    sqlx::query_scalar("SELECT order_status FROM order_details WHERE id = $1")
        .bind(order_detail_id as i64)
        .fetch_one(pool)
        .await
}

/// A buyer with a cart holding one product from one merchant.
///
/// The product costs 10.00 and the cart holds 3, so with the 5.00 delivery
/// fee of [`Marketplace::request`] the order totals 35.00.
#[derive(Debug, Clone)]
pub struct Marketplace {
    pub buyer: Buyer,
    pub buyer_wallet: u64,
    pub address_id: u64,
    pub merchant_id: u64,
    pub merchant_owner: u64,
    pub merchant_wallet: u64,
    pub courier_id: u64,
    pub courier_wallet: u64,
    pub escrow_wallet: u64,
    pub product_id: u64,
    pub variant_id: u64,
}

impl Marketplace {
    pub async fn seed(pool: &DbPool, buyer_balance: Decimal) -> sqlx::Result<Self> {
        let escrow_wallet = create_escrow_wallet(pool, Decimal::ZERO).await?;
        let (courier_id, courier_wallet) = create_courier(pool, "JNE").await?;

        let merchant_owner = create_user(pool, "seller").await?;
        let merchant_wallet = create_user_wallet(pool, merchant_owner, Decimal::ZERO).await?;
        let merchant_id = create_merchant(pool, merchant_owner, "Toko Seller").await?;
        let (product_id, variant_id) =
            create_product(pool, merchant_id, "Kopi Arabika", dec("10.00"), 10).await?;

        let buyer_id = create_user(pool, "buyer").await?;
        let buyer_wallet = create_user_wallet(pool, buyer_id, buyer_balance).await?;
        let cart_id = create_cart(pool, buyer_id).await?;
        add_to_cart(pool, cart_id, variant_id, 3).await?;
        let address_id = create_address(pool, buyer_id).await?;

        Ok(Self {
            buyer: Buyer {
                user_id: buyer_id,
                cart_id,
            },
            buyer_wallet,
            address_id,
            merchant_id,
            merchant_owner,
            merchant_wallet,
            courier_id,
            courier_wallet,
            escrow_wallet,
            product_id,
            variant_id,
        })
    }

    /// Checkout request shipping the single merchant group for 5.00.
    pub fn request(&self, voucher_id: Option<u64>) -> CheckoutRequest {
        CheckoutRequest {
            address_id: self.address_id,
            merchants: vec![MerchantCheckout {
                merchant_id: self.merchant_id,
                courier_id: self.courier_id,
                courier_price: dec("5.00"),
            }],
            voucher_id,
        }
    }
}
