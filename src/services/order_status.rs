//! Order status transitions and fund distribution.
//!
//! An order detail moves one step at a time through [`OrderStatus`]. Each step
//! has an owner:
//!
//! | Target       | Who may perform it                                  |
//! |--------------|-----------------------------------------------------|
//! | Processed    | the detail's merchant                               |
//! | On Delivery  | the detail's merchant                               |
//! | Delivered    | the detail's merchant, its courier or the scheduler |
//! | Completed    | the buyer whose cart placed the order               |
//! | Reviewed     | the buyer whose cart placed the order               |
//!
//! Reaching `Completed` pays the merchant and the courier out of escrow in the
//! same transaction as the status change.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::{
    config::CheckoutSettings,
    db::{DbPool, DbTx, db_id, get_id},
    error::AppError,
    models::order::{OrderDetailState, OrderStatus, StatusUpdateResponse},
    services::{
        directory,
        ledger::{self, Movement},
    },
};

/// Who is asking for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Merchant(u64),
    Courier(u64),
    Buyer { cart_id: u64 },
    /// The daily delivery sweep.
    Scheduler,
}

/// Decide whether `actor` may move `detail` to `target`.
///
/// # Errors
///
/// - `UnauthorizedAccess`: `target` is not the immediate successor of the
///   current status, or `actor` does not own that step
pub fn authorize_transition(
    detail: &OrderDetailState,
    actor: Actor,
    target: OrderStatus,
) -> Result<(), AppError> {
    if detail.status.next() != Some(target) {
        return Err(AppError::UnauthorizedAccess);
    }

    let allowed = match target {
        OrderStatus::WaitingForSeller => false,
        OrderStatus::Processed | OrderStatus::OnDelivery => {
            actor == Actor::Merchant(detail.merchant_id)
        }
        OrderStatus::Delivered => match actor {
            Actor::Merchant(id) => id == detail.merchant_id,
            Actor::Courier(id) => id == detail.courier_id,
            Actor::Scheduler => true,
            Actor::Buyer { .. } => false,
        },
        OrderStatus::Completed | OrderStatus::Reviewed => {
            actor == Actor::Buyer {
                cart_id: detail.cart_id,
            }
        }
    };

    if allowed {
        Ok(())
    } else {
        Err(AppError::UnauthorizedAccess)
    }
}

/// Move an order detail to `target`.
///
/// # Process
///
/// 1. Lock the order detail row
/// 2. Check the transition is the next step and `actor` owns it
/// 3. On `Completed`, pay the merchant and the courier out of escrow
/// 4. Write the new status, guarded on the status read in step 1
/// 5. Commit
///
/// The status is unchanged whenever an error is returned.
///
/// # Errors
///
/// - `NotFound`: No such order detail
/// - `UnauthorizedAccess`: Transition not allowed
/// - `InsufficientBalance`: Escrow cannot cover the payout
/// - `CheckoutTimeout`: The transaction did not finish within its budget
pub async fn advance_order_status(
    pool: &DbPool,
    settings: &CheckoutSettings,
    order_detail_id: u64,
    actor: Actor,
    target: OrderStatus,
) -> Result<StatusUpdateResponse, AppError> {
    let result = match tokio::time::timeout(
        settings.transaction_timeout,
        transition(pool, order_detail_id, actor, target),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(AppError::CheckoutTimeout),
    };

    match &result {
        Ok(update) => tracing::info!(
            order_detail_id,
            from = %update.previous_status,
            to = %update.status,
            ?actor,
            "order status advanced"
        ),
        Err(e) => tracing::warn!(
            order_detail_id,
            target = %target,
            ?actor,
            error = %e,
            "order status transition refused"
        ),
    }

    result
}

async fn transition(
    pool: &DbPool,
    order_detail_id: u64,
    actor: Actor,
    target: OrderStatus,
) -> Result<StatusUpdateResponse, AppError> {
    let mut tx = pool.begin().await?;

    let detail = sqlx::query_as::<_, OrderDetailState>(
        r#"
        SELECT od.id, od.order_id, o.cart_id, od.merchant_id, od.courier_id, o.voucher_id,
               od.order_status, od.final_price, od.courier_price, od.invoice
        FROM order_details od
        JOIN orders o ON o.id = od.order_id
        WHERE od.id = $1
        FOR UPDATE OF od
        "#,
    )
    .bind(db_id(order_detail_id)?)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("order detail"))?;

    authorize_transition(&detail, actor, target)?;

    if target == OrderStatus::Completed {
        distribute_funds(&mut tx, &detail).await?;
    }

    let updated = sqlx::query(
        r#"
        UPDATE order_details
        SET order_status = $1,
            updated_at = NOW()
        WHERE id = $2 AND order_status = $3
        "#,
    )
    .bind(target.as_str())
    .bind(db_id(order_detail_id)?)
    .bind(detail.status.as_str())
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(AppError::UnauthorizedAccess);
    }

    tx.commit().await?;

    Ok(StatusUpdateResponse {
        order_detail_id,
        previous_status: detail.status,
        status: target,
    })
}

/// Pay out a completed order detail from escrow.
async fn distribute_funds(tx: &mut DbTx<'_>, detail: &OrderDetailState) -> Result<(), AppError> {
    let merchant_wallet = directory::merchant_wallet_id(&mut **tx, detail.merchant_id).await?;
    let courier = directory::find_courier(&mut **tx, detail.courier_id).await?;
    let escrow = ledger::escrow_wallet(&mut **tx).await?;

    ledger::lock_wallets(tx, &[merchant_wallet, courier.wallet_id, escrow.id]).await?;

    if detail.final_price > Decimal::ZERO {
        let movement = Movement::new(
            escrow.id,
            merchant_wallet,
            detail.final_price,
            format!("Settlement {}", detail.invoice),
        )?;
        ledger::record_movement(tx, &movement).await?;
    }

    if detail.courier_price > Decimal::ZERO {
        let movement = Movement::new(
            escrow.id,
            courier.wallet_id,
            detail.courier_price,
            format!("Delivery fee {} via {}", detail.invoice, courier.code),
        )?;
        ledger::record_movement(tx, &movement).await?;
    }

    tracing::info!(
        order_detail_id = detail.id,
        merchant_amount = %detail.final_price,
        courier_amount = %detail.courier_price,
        "funds distributed"
    );
    Ok(())
}

/// Advance every `On Delivery` detail whose estimated delivery falls on `today`.
///
/// Each detail goes through [`advance_order_status`] as the scheduler. A
/// failure is logged and the sweep moves on. Returns the ids that advanced.
pub async fn advance_due_deliveries(
    pool: &DbPool,
    settings: &CheckoutSettings,
    today: NaiveDate,
) -> Result<Vec<u64>, AppError> {
    let rows = sqlx::query(
        r#"
        SELECT id
        FROM order_details
        WHERE order_status = $1
          AND (estimated_time AT TIME ZONE 'UTC')::date = $2
        ORDER BY id
        "#,
    )
    .bind(OrderStatus::OnDelivery.as_str())
    .bind(today)
    .fetch_all(pool)
    .await?;

    let mut advanced = Vec::with_capacity(rows.len());
    for row in rows {
        let id = get_id(&row, "id")?;
        match advance_order_status(pool, settings, id, Actor::Scheduler, OrderStatus::Delivered).await {
            Ok(_) => advanced.push(id),
            Err(e) => tracing::error!(order_detail_id = id, error = %e, "due delivery not advanced"),
        }
    }

    tracing::info!(%today, advanced = advanced.len(), "due deliveries swept");
    Ok(advanced)
}
