//! Voucher validation and application.
//!
//! Application is pure: [`apply`] takes the un-discounted tree and returns a
//! new one, so a rejected voucher leaves the caller's tree untouched.
//!
//! # Scopes
//!
//! - **Global**: the reduction is taken off the order total, courier prices
//!   included, but it is paid for by the goods. It is spread over merchants in
//!   proportion to their subtotals and then over each merchant's lines, so the
//!   payout at completion matches what escrow received. It must not exceed the
//!   goods subtotal.
//! - **Merchant**: reduces the target merchant's goods subtotal. The reduction
//!   is spread over that merchant's lines so each subtotal stays the sum of its
//!   lines. Other merchants pass through unchanged.
//! - **Product**: every line of the target product is reduced on its own.
//!   Merchant subtotals and the order total are re-summed from the lines.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgConnection;

use crate::{
    db::{DbTx, db_id},
    error::AppError,
    models::voucher::{Voucher, VoucherScope, VoucherType},
    services::pricing::{Adjustment, PricedLine, PricedOrder, out_of_range},
};

const VOUCHER_SELECT: &str = r#"
    SELECT p.id, p.promo_name, p.promotion_type, p.promotion_scope, p.amount, p.max_amount,
           p.quota, p.start_date, p.end_date,
           mpp.merchant_id AS target_merchant_id,
           mpp.product_id AS target_product_id
    FROM promotions p
    LEFT JOIN merchant_product_promotions mpp ON mpp.promotion_id = p.id
"#;

/// Fetch a voucher that has not been withdrawn.
///
/// # Errors
///
/// - `InvalidVoucher`: No such voucher
pub async fn find_voucher(conn: &mut PgConnection, voucher_id: u64) -> Result<Voucher, AppError> {
    sqlx::query_as::<_, Voucher>(&format!(
        "{VOUCHER_SELECT} WHERE p.id = $1 AND p.deleted_at IS NULL"
    ))
    .bind(db_id(voucher_id)?)
    .fetch_optional(conn)
    .await?
    .ok_or(AppError::InvalidVoucher)
}

/// Vouchers usable at `now` on the given cart: global ones, plus merchant and
/// product vouchers whose target is in the cart.
pub async fn available_for_cart(
    conn: &mut PgConnection,
    cart_id: u64,
    now: DateTime<Utc>,
) -> Result<Vec<Voucher>, AppError> {
    let vouchers = sqlx::query_as::<_, Voucher>(&format!(
        r#"{VOUCHER_SELECT}
        WHERE p.deleted_at IS NULL
          AND p.quota > 0
          AND p.start_date <= $2
          AND p.end_date >= $2
          AND (
            p.promotion_scope = 'GLOBAL'
            OR (p.promotion_scope = 'MERCHANT' AND mpp.merchant_id IN (
                SELECT pr.merchant_id
                FROM cart_products cp
                JOIN variant_combination_products v ON v.id = cp.variant_combination_product_id
                JOIN products pr ON pr.id = v.product_id
                WHERE cp.cart_id = $1 AND cp.deleted_at IS NULL))
            OR (p.promotion_scope = 'PRODUCT' AND mpp.product_id IN (
                SELECT v.product_id
                FROM cart_products cp
                JOIN variant_combination_products v ON v.id = cp.variant_combination_product_id
                WHERE cp.cart_id = $1 AND cp.deleted_at IS NULL))
          )
        ORDER BY p.end_date, p.id
        "#
    ))
    .bind(db_id(cart_id)?)
    .bind(now)
    .fetch_all(conn)
    .await?;

    Ok(vouchers)
}

/// Use up one unit of a voucher's quota inside the checkout transaction.
///
/// # Errors
///
/// - `InvalidVoucher`: The quota ran out since the voucher was validated
pub async fn consume_quota(tx: &mut DbTx<'_>, voucher_id: u64) -> Result<(), AppError> {
    let updated = sqlx::query(
        r#"
        UPDATE promotions
        SET quota = quota - 1
        WHERE id = $1 AND quota > 0 AND deleted_at IS NULL
        "#,
    )
    .bind(db_id(voucher_id)?)
    .execute(&mut **tx)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(AppError::InvalidVoucher);
    }
    Ok(())
}

/// Check that a voucher is usable at `now`.
///
/// # Errors
///
/// - `InvalidVoucher`: `now` is outside `[start_date, end_date]`, or the quota is exhausted
pub fn validate(voucher: &Voucher, now: DateTime<Utc>) -> Result<(), AppError> {
    if now < voucher.start_date || now > voucher.end_date {
        return Err(AppError::InvalidVoucher);
    }
    if voucher.quota == 0 {
        return Err(AppError::InvalidVoucher);
    }
    Ok(())
}

/// Validate `voucher` and apply it to an un-discounted price tree.
///
/// # Errors
///
/// - `InvalidVoucher`: validation fails, the scope target is not in the order,
///   a Cut exceeds its base, a Discount rate is outside (0, 1] or its cap is
///   negative, or a Global reduction exceeds the goods subtotal
/// - `InvalidRequest`: a reduction does not fit in a `Decimal`
pub fn apply(
    voucher: &Voucher,
    order: &PricedOrder,
    now: DateTime<Utc>,
) -> Result<PricedOrder, AppError> {
    validate(voucher, now)?;

    let mut priced = reset(order);
    priced.voucher_id = Some(voucher.id);

    match voucher.scope {
        VoucherScope::Global => {
            let adjustment = reduction(voucher, order.initial_price)?;
            if adjustment.amount() > priced.goods_price() {
                return Err(AppError::InvalidVoucher);
            }
            let weights: Vec<Decimal> = priced.merchants.iter().map(|m| m.initial_price).collect();
            let shares = allocate(adjustment.amount(), &weights)?;
            for (merchant, share) in priced.merchants.iter_mut().zip(shares) {
                spread(&mut merchant.lines, share)?;
            }
            priced.adjustment = Some(adjustment);
        }
        VoucherScope::Merchant(merchant_id) => {
            let merchant = priced
                .merchants
                .iter_mut()
                .find(|m| m.merchant_id == merchant_id)
                .ok_or(AppError::InvalidVoucher)?;

            let adjustment = reduction(voucher, merchant.initial_price)?;
            spread(&mut merchant.lines, adjustment.amount())?;
            merchant.adjustment = Some(adjustment);
        }
        VoucherScope::Product(product_id) => {
            let mut matched = false;
            for line in priced
                .merchants
                .iter_mut()
                .flat_map(|m| m.lines.iter_mut())
                .filter(|l| l.line.product_id == product_id)
            {
                let adjustment = reduction(voucher, line.initial_price)?;
                line.final_price = line.initial_price - adjustment.amount();
                line.adjustment = Some(adjustment);
                matched = true;
            }
            if !matched {
                return Err(AppError::InvalidVoucher);
            }
        }
    }

    resum(&mut priced);
    Ok(priced)
}

/// Copy of `order` with every final price back at its initial price and no adjustments.
fn reset(order: &PricedOrder) -> PricedOrder {
    let mut priced = order.clone();
    priced.final_price = priced.initial_price;
    priced.adjustment = None;
    priced.voucher_id = None;
    for merchant in &mut priced.merchants {
        merchant.final_price = merchant.initial_price;
        merchant.adjustment = None;
        for line in &mut merchant.lines {
            line.final_price = line.initial_price;
            line.adjustment = None;
        }
    }
    priced
}

/// Take `amount` off `lines` in proportion to their initial prices.
fn spread(lines: &mut [PricedLine], amount: Decimal) -> Result<(), AppError> {
    let weights: Vec<Decimal> = lines.iter().map(|l| l.initial_price).collect();
    for (line, share) in lines.iter_mut().zip(allocate(amount, &weights)?) {
        line.final_price = line.initial_price - share;
    }
    Ok(())
}

/// Recompute merchant and order final prices from the lines upward.
fn resum(order: &mut PricedOrder) {
    let mut total = Decimal::ZERO;
    for merchant in &mut order.merchants {
        merchant.final_price = merchant.lines.iter().map(|l| l.final_price).sum();
        total += merchant.final_price + merchant.courier_price;
    }
    order.final_price = total;
}

/// The reduction `voucher` takes off `base`.
fn reduction(voucher: &Voucher, base: Decimal) -> Result<Adjustment, AppError> {
    match voucher.voucher_type {
        VoucherType::Discount => {
            let rate = voucher.amount;
            if rate <= Decimal::ZERO || rate > Decimal::ONE {
                return Err(AppError::InvalidVoucher);
            }
            let mut amount = base.checked_mul(rate).ok_or_else(out_of_range)?;
            if let Some(cap) = voucher.max_amount {
                if cap < Decimal::ZERO {
                    return Err(AppError::InvalidVoucher);
                }
                amount = amount.min(cap);
            }
            Ok(Adjustment::Discount { rate, amount })
        }
        VoucherType::Cut => {
            if voucher.amount > base {
                return Err(AppError::InvalidVoucher);
            }
            Ok(Adjustment::Cut {
                amount: voucher.amount,
            })
        }
    }
}

/// Split `total` across `weights` proportionally.
///
/// Shares are rounded to the finest scale among the inputs. The rounding
/// remainder goes to the heaviest weight, so the shares always sum to `total`.
fn allocate(total: Decimal, weights: &[Decimal]) -> Result<Vec<Decimal>, AppError> {
    let sum: Decimal = weights.iter().copied().sum();
    if weights.is_empty() || sum.is_zero() {
        return Ok(vec![Decimal::ZERO; weights.len()]);
    }

    let scale = weights
        .iter()
        .map(Decimal::scale)
        .chain(std::iter::once(total.scale()))
        .max()
        .unwrap_or(0);

    let mut shares = weights
        .iter()
        .map(|w| {
            total
                .checked_mul(*w)
                .and_then(|product| product.checked_div(sum))
                .map(|share| share.round_dp(scale))
                .ok_or_else(out_of_range)
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    let heaviest = weights
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let allocated: Decimal = shares.iter().copied().sum();
    shares[heaviest] += total - allocated;
    Ok(shares)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::pricing::{
        PriceBreakdown, build_price_tree,
        tests::{dec, group, line, selection, two_merchant_order},
    };
    use chrono::Duration;

    fn voucher(voucher_type: VoucherType, scope: VoucherScope, amount: &str) -> Voucher {
        let now = Utc::now();
        Voucher {
            id: 7,
            name: "test voucher".to_string(),
            voucher_type,
            scope,
            amount: dec(amount),
            max_amount: None,
            quota: 10,
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(1),
        }
    }

    fn simple_order() -> PricedOrder {
        let groups = group(vec![line(1, 10, "10.00", 3)]);
        build_price_tree(&groups, &[selection(1, "5.00")]).unwrap()
    }

    #[test]
    fn global_discount_takes_percentage_of_total() {
        let voucher = voucher(VoucherType::Discount, VoucherScope::Global, "0.10");
        let priced = apply(&voucher, &simple_order(), Utc::now()).unwrap();

        assert_eq!(priced.initial_price, dec("35.00"));
        assert_eq!(priced.final_price, dec("31.50"));
        assert_eq!(priced.voucher_id, Some(7));

        let breakdown = PriceBreakdown::from(&priced);
        assert_eq!(breakdown.discount, dec("3.50"));

        // Paid for by the goods: the courier still gets its full price.
        assert_eq!(priced.merchants[0].final_price, dec("26.50"));
        assert_eq!(priced.merchants[0].lines[0].final_price, dec("26.50"));
        assert_eq!(priced.merchants[0].courier_price, dec("5.00"));
    }

    #[test]
    fn global_reduction_is_spread_over_merchants_and_lines() {
        let order = two_merchant_order();
        let voucher = voucher(VoucherType::Cut, VoucherScope::Global, "15.00");
        let priced = apply(&voucher, &order, Utc::now()).unwrap();

        // Goods 35.00 and 40.00 take 7.00 and 8.00 of the cut.
        assert_eq!(priced.merchants[0].final_price, dec("28.00"));
        assert_eq!(priced.merchants[1].final_price, dec("32.00"));
        assert_eq!(priced.merchants[0].lines[0].final_price, dec("24.00"));
        assert_eq!(priced.merchants[0].lines[1].final_price, dec("4.00"));
        assert_eq!(priced.final_price, dec("72.00"));

        let details: Decimal = priced
            .merchants
            .iter()
            .map(|m| m.final_price + m.courier_price)
            .sum();
        assert_eq!(details, priced.final_price);
        assert!(priced.merchants.iter().all(|m| m.adjustment.is_none()));
        assert_eq!(priced.adjustment, Some(Adjustment::Cut { amount: dec("15.00") }));
    }

    #[test]
    fn global_cut_above_total_is_rejected() {
        let voucher = voucher(VoucherType::Cut, VoucherScope::Global, "40.00");
        let result = apply(&voucher, &simple_order(), Utc::now());
        assert!(matches!(result, Err(AppError::InvalidVoucher)));
    }

    #[test]
    fn global_voucher_must_leave_courier_price_covered() {
        // 35.00 total, 5.00 of it courier: a 31.00 cut would leave 4.00.
        let voucher = voucher(VoucherType::Cut, VoucherScope::Global, "31.00");
        let result = apply(&voucher, &simple_order(), Utc::now());
        assert!(matches!(result, Err(AppError::InvalidVoucher)));

        let voucher = Voucher {
            amount: dec("30.00"),
            ..voucher
        };
        let priced = apply(&voucher, &simple_order(), Utc::now()).unwrap();
        assert_eq!(priced.final_price, dec("5.00"));
        assert_eq!(priced.goods_price(), Decimal::ZERO);
        assert!(priced.lines().all(|l| l.final_price == Decimal::ZERO));
    }

    #[test]
    fn discount_cap_limits_reduction() {
        let mut voucher = voucher(VoucherType::Discount, VoucherScope::Global, "0.50");
        voucher.max_amount = Some(dec("2.00"));

        let priced = apply(&voucher, &simple_order(), Utc::now()).unwrap();
        assert_eq!(priced.final_price, dec("33.00"));
        assert_eq!(
            priced.adjustment,
            Some(Adjustment::Discount {
                rate: dec("0.50"),
                amount: dec("2.00")
            })
        );
    }

    #[test]
    fn negative_discount_cap_is_rejected() {
        let mut voucher = voucher(VoucherType::Discount, VoucherScope::Global, "0.10");
        voucher.max_amount = Some(dec("-1.00"));

        let result = apply(&voucher, &simple_order(), Utc::now());
        assert!(matches!(result, Err(AppError::InvalidVoucher)), "got {result:?}");
    }

    #[test]
    fn discount_rate_outside_unit_interval_is_rejected() {
        for rate in ["0", "1.5", "-0.1"] {
            let voucher = voucher(VoucherType::Discount, VoucherScope::Global, rate);
            let result = apply(&voucher, &simple_order(), Utc::now());
            assert!(matches!(result, Err(AppError::InvalidVoucher)), "rate {rate}");
        }
    }

    #[test]
    fn expired_or_not_started_voucher_is_rejected() {
        let voucher = voucher(VoucherType::Cut, VoucherScope::Global, "1.00");

        let after_end = voucher.end_date + Duration::seconds(1);
        assert!(matches!(validate(&voucher, after_end), Err(AppError::InvalidVoucher)));

        let before_start = voucher.start_date - Duration::seconds(1);
        assert!(matches!(validate(&voucher, before_start), Err(AppError::InvalidVoucher)));

        assert!(validate(&voucher, voucher.start_date).is_ok());
        assert!(validate(&voucher, voucher.end_date).is_ok());
    }

    #[test]
    fn exhausted_quota_is_rejected() {
        let mut voucher = voucher(VoucherType::Cut, VoucherScope::Global, "1.00");
        voucher.quota = 0;
        let result = apply(&voucher, &simple_order(), Utc::now());
        assert!(matches!(result, Err(AppError::InvalidVoucher)));
    }

    #[test]
    fn merchant_voucher_leaves_other_merchants_alone() {
        let order = two_merchant_order();
        let voucher = voucher(VoucherType::Discount, VoucherScope::Merchant(1), "0.20");
        let priced = apply(&voucher, &order, Utc::now()).unwrap();

        // Merchant 1 subtotal 35.00 -> 28.00, merchant 2 untouched.
        assert_eq!(priced.merchants[0].final_price, dec("28.00"));
        assert_eq!(priced.merchants[1], order.merchants[1]);
        assert_eq!(priced.final_price, dec("28.00") + dec("5.00") + dec("40.00") + dec("7.00"));

        let lines: Decimal = priced.merchants[0].lines.iter().map(|l| l.final_price).sum();
        assert_eq!(lines, priced.merchants[0].final_price);
    }

    #[test]
    fn merchant_cut_is_bounded_by_goods_subtotal() {
        let order = two_merchant_order();

        // Merchant 1 goods are 35.00; its 5.00 courier price is not discountable.
        let voucher = voucher(VoucherType::Cut, VoucherScope::Merchant(1), "36.00");
        let result = apply(&voucher, &order, Utc::now());
        assert!(matches!(result, Err(AppError::InvalidVoucher)));

        let voucher = Voucher {
            amount: dec("35.00"),
            ..voucher
        };
        let priced = apply(&voucher, &order, Utc::now()).unwrap();
        assert_eq!(priced.merchants[0].final_price, Decimal::ZERO);
        assert!(priced.merchants[0].lines.iter().all(|l| l.final_price == Decimal::ZERO));
    }

    #[test]
    fn product_voucher_leaves_sibling_lines_alone() {
        let order = two_merchant_order();
        let voucher = voucher(VoucherType::Cut, VoucherScope::Product(11), "1.00");
        let priced = apply(&voucher, &order, Utc::now()).unwrap();

        let before: Vec<_> = order.lines().collect();
        let after: Vec<_> = priced.lines().collect();
        for (old, new) in before.iter().zip(&after) {
            if old.line.product_id == 11 {
                assert_eq!(new.final_price, dec("4.00"));
            } else {
                assert_eq!(new.final_price, old.final_price);
            }
        }
        assert_eq!(priced.merchants[0].final_price, dec("34.00"));
        assert_eq!(priced.merchants[1].final_price, dec("40.00"));
        assert_eq!(priced.final_price, dec("86.00"));
    }

    #[test]
    fn product_cut_above_line_price_is_rejected_without_mutation() {
        let order = two_merchant_order();
        let snapshot = order.clone();
        let voucher = voucher(VoucherType::Cut, VoucherScope::Product(11), "5.01");

        let result = apply(&voucher, &order, Utc::now());
        assert!(matches!(result, Err(AppError::InvalidVoucher)));
        assert_eq!(order, snapshot);
    }

    #[test]
    fn voucher_targeting_absent_scope_is_rejected() {
        let order = two_merchant_order();
        let merchant = voucher(VoucherType::Cut, VoucherScope::Merchant(99), "1.00");
        let product = voucher(VoucherType::Cut, VoucherScope::Product(99), "1.00");

        assert!(matches!(apply(&merchant, &order, Utc::now()), Err(AppError::InvalidVoucher)));
        assert!(matches!(apply(&product, &order, Utc::now()), Err(AppError::InvalidVoucher)));
    }

    #[test]
    fn allocation_shares_sum_to_total() {
        let shares = allocate(dec("10.00"), &[dec("1.00"), dec("1.00"), dec("1.00")]).unwrap();
        assert_eq!(shares.iter().copied().sum::<Decimal>(), dec("10.00"));
        assert_eq!(shares[1], dec("3.33"));

        let shares = allocate(dec("5.00"), &[dec("0"), dec("30.00"), dec("5.00")]).unwrap();
        assert_eq!(shares[0], Decimal::ZERO);
        assert_eq!(shares.iter().copied().sum::<Decimal>(), dec("5.00"));
    }
}
