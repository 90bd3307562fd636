//! Checkout service - turns a buyer's cart into a paid order.
//!
//! This service handles:
//! - Price previews (identical math to the real checkout, nothing persisted)
//! - Order placement: order graph, stock, voucher quota and payment in one transaction
//! - Listing the vouchers a cart can use
//!
//! # Atomicity Guarantees
//!
//! Everything a checkout writes happens inside one PostgreSQL transaction. A
//! failure at any point drops the transaction, which rolls back stock
//! decrements, order rows, voucher quota and ledger entries together. The
//! whole transaction runs under a time budget and is abandoned (rolled back)
//! when it expires.
//!
//! # Lock order
//!
//! Cart row, then variant rows by ascending id, then the buyer and escrow
//! wallets. Completions lock an order detail and then wallets in the same
//! wallet order, so the two never wait on each other in a cycle.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgConnection;

use crate::{
    config::CheckoutSettings,
    db::{DbPool, DbTx, db_id, get_id},
    error::AppError,
    models::{
        cart::CheckoutRequest,
        order::{Order, OrderDetail, OrderDetailProduct, OrderStatus, invoice_number},
        voucher::VoucherSummary,
        wallet::Wallet,
    },
    services::{
        catalog,
        directory::{self, Courier},
        ledger::{self, Movement},
        pricing::{self, CheckPriceResponse, PriceBreakdown, PricedOrder},
        stock, voucher,
    },
};

/// The authenticated buyer and the cart being checked out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Buyer {
    pub user_id: u64,
    pub cart_id: u64,
}

/// Response of a committed checkout.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutReceipt {
    pub order: Order,
    pub price: PriceBreakdown,
}

/// Everything validated before a checkout writes anything.
struct PreparedCheckout {
    order: PricedOrder,
    address: String,
    buyer_wallet: Wallet,
}

/// Read the cart, check the address, price the order and apply the voucher.
///
/// Shared by the price preview and the real checkout so both compute the
/// same numbers.
async fn prepare(
    conn: &mut PgConnection,
    buyer: Buyer,
    request: &CheckoutRequest,
    now: DateTime<Utc>,
) -> Result<PreparedCheckout, AppError> {
    let groups = catalog::checkout_details(&mut *conn, buyer.cart_id).await?;
    if groups.is_empty() {
        return Err(AppError::CartEmpty);
    }

    let address = catalog::find_address(&mut *conn, request.address_id)
        .await?
        .filter(|address| address.user_id == buyer.user_id)
        .ok_or(AppError::InvalidAddress)?;

    let mut order = pricing::build_price_tree(&groups, &request.merchants)?;

    if let Some(voucher_id) = request.voucher_id {
        let voucher = voucher::find_voucher(&mut *conn, voucher_id).await?;
        order = voucher::apply(&voucher, &order, now)?;
    }

    let buyer_wallet = ledger::find_by_user(&mut *conn, buyer.user_id).await?;

    Ok(PreparedCheckout {
        order,
        address: address.formatted(),
        buyer_wallet,
    })
}

/// Preview the price of a checkout without placing it.
///
/// Runs the same validation and pricing as [`checkout_cart`]. An insufficient
/// balance is reported in the response instead of failing the request.
///
/// # Errors
///
/// - `CartEmpty`, `InvalidAddress`, `InvalidVoucher`, `InvalidRequest`: as for checkout
pub async fn check_price(
    pool: &DbPool,
    buyer: Buyer,
    request: &CheckoutRequest,
) -> Result<CheckPriceResponse, AppError> {
    let mut conn = pool.acquire().await?;
    let prepared = prepare(&mut conn, buyer, request, Utc::now()).await?;

    Ok(CheckPriceResponse {
        balance_sufficient: prepared.buyer_wallet.balance > prepared.order.final_price,
        breakdown: PriceBreakdown::from(&prepared.order),
    })
}

/// Place an order for everything in the buyer's cart.
///
/// # Process
///
/// 1. Lock the cart and read its lines
/// 2. Verify the address belongs to the buyer
/// 3. Price the order and apply the voucher, if any
/// 4. Require the buyer's balance to strictly exceed the final price
/// 5. Decrement stock for every variant
/// 6. Lock the buyer and escrow wallets and re-check the buyer's balance
/// 7. Insert the order, its details, lines and photo snapshots
/// 8. Consume one unit of voucher quota
/// 9. Move the payment from the buyer to escrow
/// 10. Clear the cart and commit
///
/// # Errors
///
/// - `CartEmpty`: Cart has no lines
/// - `InvalidAddress`: Address missing or owned by someone else
/// - `InvalidVoucher`: Voucher unusable or exhausted
/// - `InsufficientBalance`: Balance does not exceed the final price
/// - `InsufficientStock`: A variant ran out
/// - `CheckoutTimeout`: The transaction did not finish within its budget
/// - `Database`: Database error occurred
pub async fn checkout_cart(
    pool: &DbPool,
    settings: &CheckoutSettings,
    buyer: Buyer,
    request: &CheckoutRequest,
) -> Result<CheckoutReceipt, AppError> {
    let result = match tokio::time::timeout(
        settings.transaction_timeout,
        place_order(pool, settings, buyer, request),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(AppError::CheckoutTimeout),
    };

    match &result {
        Ok(receipt) => tracing::info!(
            order_id = receipt.order.id,
            cart_id = buyer.cart_id,
            final_price = %receipt.order.final_price,
            details = receipt.order.details.len(),
            "checkout committed"
        ),
        Err(e) if e.is_validation() => {
            tracing::warn!(cart_id = buyer.cart_id, error = %e, "checkout rejected")
        }
        Err(e) => tracing::error!(cart_id = buyer.cart_id, error = %e, "checkout rolled back"),
    }

    result
}

async fn place_order(
    pool: &DbPool,
    settings: &CheckoutSettings,
    buyer: Buyer,
    request: &CheckoutRequest,
) -> Result<CheckoutReceipt, AppError> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    catalog::lock_cart(&mut tx, buyer.cart_id).await?;
    let prepared = prepare(&mut tx, buyer, request, now).await?;
    let priced = &prepared.order;

    if prepared.buyer_wallet.balance <= priced.final_price {
        return Err(AppError::InsufficientBalance);
    }

    stock::commit_stock(&mut tx, priced.lines().map(|l| &l.line)).await?;

    let escrow = ledger::escrow_wallet(&mut tx).await?;
    let mut couriers = Vec::with_capacity(priced.merchants.len());
    for merchant in &priced.merchants {
        couriers.push(directory::find_courier(&mut tx, merchant.courier_id).await?);
    }

    let locked = ledger::lock_wallets(&mut tx, &[prepared.buyer_wallet.id, escrow.id]).await?;

    let balance = locked
        .iter()
        .find(|w| w.id == prepared.buyer_wallet.id)
        .map(|w| w.balance)
        .ok_or(AppError::NotFound("wallet"))?;
    if balance <= priced.final_price {
        return Err(AppError::InsufficientBalance);
    }

    let order = insert_order(&mut tx, settings, buyer, &prepared, &couriers, now).await?;

    if let Some(voucher_id) = priced.voucher_id {
        voucher::consume_quota(&mut tx, voucher_id).await?;
    }

    pay_into_escrow(
        &mut tx,
        &order,
        priced.goods_price(),
        &couriers,
        prepared.buyer_wallet.id,
        escrow.id,
    )
    .await?;

    catalog::clear_cart(&mut tx, buyer.cart_id).await?;

    tx.commit().await?;

    Ok(CheckoutReceipt {
        price: PriceBreakdown::from(priced),
        order,
    })
}

/// Insert the order graph and return it as committed.
async fn insert_order(
    tx: &mut DbTx<'_>,
    settings: &CheckoutSettings,
    buyer: Buyer,
    prepared: &PreparedCheckout,
    couriers: &[Courier],
    now: DateTime<Utc>,
) -> Result<Order, AppError> {
    let priced = &prepared.order;
    let voucher_id = priced.voucher_id.map(db_id).transpose()?;

    let row = sqlx::query(
        r#"
        INSERT INTO orders (cart_id, initial_price, final_price, order_date, voucher_id)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(db_id(buyer.cart_id)?)
    .bind(priced.initial_price)
    .bind(priced.final_price)
    .bind(now)
    .bind(voucher_id)
    .fetch_one(&mut **tx)
    .await?;
    let order_id = get_id(&row, "id")?;

    let product_ids: Vec<u64> = priced.lines().map(|l| l.line.product_id).collect();
    let photos = catalog::product_photos(&mut **tx, &product_ids).await?;

    let estimated_time = now + Duration::days(i64::from(settings.delivery_estimate_days));
    let mut details = Vec::with_capacity(priced.merchants.len());

    for (merchant, courier) in priced.merchants.iter().zip(couriers) {
        let invoice = invoice_number(now, merchant.merchant_id, buyer.cart_id);

        let row = sqlx::query(
            r#"
            INSERT INTO order_details (
                order_id, merchant_id, courier_id, courier_price, address,
                estimated_time, invoice, order_status, initial_price, final_price
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(db_id(order_id)?)
        .bind(db_id(merchant.merchant_id)?)
        .bind(db_id(courier.id)?)
        .bind(merchant.courier_price)
        .bind(&prepared.address)
        .bind(estimated_time)
        .bind(&invoice)
        .bind(OrderStatus::WaitingForSeller.as_str())
        .bind(merchant.initial_price)
        .bind(merchant.final_price)
        .fetch_one(&mut **tx)
        .await?;
        let detail_id = get_id(&row, "id")?;

        let mut products = Vec::with_capacity(merchant.lines.len());
        for priced_line in &merchant.lines {
            let line = &priced_line.line;
            let row = sqlx::query(
                r#"
                INSERT INTO order_detail_products (
                    order_detail_id, product_id, variant_combination_product_id, merchant_id,
                    name, description, quantity, price, initial_price, final_price
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                RETURNING id
                "#,
            )
            .bind(db_id(detail_id)?)
            .bind(db_id(line.product_id)?)
            .bind(db_id(line.variant_combination_product_id)?)
            .bind(db_id(line.merchant_id)?)
            .bind(&line.title)
            .bind(&line.description)
            .bind(db_id(line.quantity)?)
            .bind(line.unit_price)
            .bind(priced_line.initial_price)
            .bind(priced_line.final_price)
            .fetch_one(&mut **tx)
            .await?;
            let detail_product_id = get_id(&row, "id")?;

            let line_photos = photos.get(&line.product_id).cloned().unwrap_or_default();
            for photo in &line_photos {
                sqlx::query(
                    r#"
                    INSERT INTO product_photo_orders (order_detail_product_id, url, is_default)
                    VALUES ($1, $2, $3)
                    "#,
                )
                .bind(db_id(detail_product_id)?)
                .bind(&photo.url)
                .bind(photo.is_default)
                .execute(&mut **tx)
                .await?;
            }

            products.push(OrderDetailProduct {
                id: detail_product_id,
                order_detail_id: detail_id,
                product_id: line.product_id,
                variant_combination_product_id: line.variant_combination_product_id,
                merchant_id: line.merchant_id,
                name: line.title.clone(),
                description: line.description.clone(),
                quantity: line.quantity,
                price: line.unit_price,
                initial_price: priced_line.initial_price,
                final_price: priced_line.final_price,
                photos: line_photos,
            });
        }

        details.push(OrderDetail {
            id: detail_id,
            order_id,
            merchant_id: merchant.merchant_id,
            courier_id: courier.id,
            courier_price: merchant.courier_price,
            address: prepared.address.clone(),
            estimated_time,
            invoice,
            status: OrderStatus::WaitingForSeller,
            initial_price: merchant.initial_price,
            final_price: merchant.final_price,
            products,
        });
    }

    Ok(Order {
        id: order_id,
        cart_id: buyer.cart_id,
        initial_price: priced.initial_price,
        final_price: priced.final_price,
        order_date: now,
        voucher_id: priced.voucher_id,
        details,
    })
}

/// Move the buyer's payment into escrow.
///
/// Goods are paid in one movement linked to every order detail. Each non-zero
/// delivery fee is paid in its own movement linked to its detail.
async fn pay_into_escrow(
    tx: &mut DbTx<'_>,
    order: &Order,
    goods: Decimal,
    couriers: &[Courier],
    buyer_wallet_id: u64,
    escrow_wallet_id: u64,
) -> Result<(), AppError> {
    if goods > Decimal::ZERO {
        let movement = Movement::new(
            buyer_wallet_id,
            escrow_wallet_id,
            goods,
            format!("Payment for order {}", order.id),
        )?;
        let recorded = ledger::record_movement(tx, &movement).await?;
        for detail in &order.details {
            insert_payment(tx, recorded.debit.id, detail.id).await?;
        }
    }

    for (detail, courier) in order.details.iter().zip(couriers) {
        if detail.courier_price.is_zero() {
            continue;
        }
        let movement = Movement::new(
            buyer_wallet_id,
            escrow_wallet_id,
            detail.courier_price,
            format!("Delivery fee {} via {}", detail.invoice, courier.code),
        )?;
        let recorded = ledger::record_movement(tx, &movement).await?;
        insert_payment(tx, recorded.debit.id, detail.id).await?;
    }

    Ok(())
}

async fn insert_payment(tx: &mut DbTx<'_>, entry_id: u64, order_detail_id: u64) -> Result<(), AppError> {
    sqlx::query("INSERT INTO payments (transaction_id, order_detail_id) VALUES ($1, $2)")
        .bind(db_id(entry_id)?)
        .bind(db_id(order_detail_id)?)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Vouchers the buyer can apply to their cart right now.
pub async fn available_promotions(pool: &DbPool, cart_id: u64) -> Result<Vec<VoucherSummary>, AppError> {
    let mut conn = pool.acquire().await?;
    let vouchers = voucher::available_for_cart(&mut conn, cart_id, Utc::now()).await?;
    Ok(vouchers.into_iter().map(VoucherSummary::from).collect())
}
