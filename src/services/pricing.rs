//! Price tree construction and the price breakdown shown to buyers.
//!
//! A checkout is priced as a three-level tree: the order, one [`PricedMerchant`]
//! per merchant in the cart, and one [`PricedLine`] per cart line. Building the
//! tree fills every `initial_price` and starts every `final_price` equal to it.
//! Vouchers are applied afterwards by [`crate::services::voucher::apply`],
//! which returns a new tree.
//!
//! Both the price preview and the committing checkout render their response
//! through [`PriceBreakdown::from`], so the two paths cannot disagree.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use serde::Serialize;

use crate::{
    error::AppError,
    models::cart::{CartLine, MerchantCheckout},
};

/// The price reduction a voucher produced at one level of the tree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Adjustment {
    /// Percentage voucher: `rate` applied, `amount` actually taken off after any cap.
    Discount { rate: Decimal, amount: Decimal },
    /// Fixed-amount voucher.
    Cut { amount: Decimal },
}

impl Adjustment {
    /// Amount taken off the base price.
    pub fn amount(&self) -> Decimal {
        match self {
            Adjustment::Discount { amount, .. } | Adjustment::Cut { amount } => *amount,
        }
    }
}

/// One cart line with its prices.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedLine {
    pub line: CartLine,
    /// `unit_price * quantity`.
    pub initial_price: Decimal,
    pub final_price: Decimal,
    pub adjustment: Option<Adjustment>,
}

/// One merchant's share of the order. Prices exclude the courier price.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedMerchant {
    pub merchant_id: u64,
    pub courier_id: u64,
    pub courier_price: Decimal,
    pub lines: Vec<PricedLine>,
    pub initial_price: Decimal,
    pub final_price: Decimal,
    pub adjustment: Option<Adjustment>,
}

/// The whole order. Prices include every merchant's courier price.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedOrder {
    pub merchants: Vec<PricedMerchant>,
    pub initial_price: Decimal,
    pub final_price: Decimal,
    /// Reduction of a Global voucher. Its amount is also spread over the
    /// merchants and lines, so every level still sums up.
    pub adjustment: Option<Adjustment>,
    /// Voucher the final prices reflect.
    pub voucher_id: Option<u64>,
}

impl PricedOrder {
    pub fn total_courier_price(&self) -> Decimal {
        self.merchants.iter().map(|m| m.courier_price).sum()
    }

    /// What the buyer pays for goods: the final price without delivery fees.
    pub fn goods_price(&self) -> Decimal {
        self.final_price - self.total_courier_price()
    }

    pub fn lines(&self) -> impl Iterator<Item = &PricedLine> {
        self.merchants.iter().flat_map(|m| m.lines.iter())
    }
}

/// Build the un-discounted price tree.
///
/// # Arguments
///
/// * `groups` - Cart lines grouped by merchant id
/// * `selections` - Courier choice for each merchant; merchants appear in the
///   tree in selection order
///
/// # Errors
///
/// - `CartEmpty`: No cart lines
/// - `InvalidRequest`: A cart merchant has no courier selection, a selection
///   names a merchant not in the cart or appears twice, a courier price is
///   negative, or a total does not fit in a `Decimal`
pub fn build_price_tree(
    groups: &BTreeMap<u64, Vec<CartLine>>,
    selections: &[MerchantCheckout],
) -> Result<PricedOrder, AppError> {
    if groups.values().all(Vec::is_empty) {
        return Err(AppError::CartEmpty);
    }

    let mut seen = BTreeSet::new();
    for selection in selections {
        if !seen.insert(selection.merchant_id) {
            return Err(AppError::InvalidRequest(format!(
                "merchant {} has more than one courier selection",
                selection.merchant_id
            )));
        }
        if selection.courier_price < Decimal::ZERO {
            return Err(AppError::InvalidRequest(
                "Courier price must not be negative".to_string(),
            ));
        }
    }

    let cart_merchants: BTreeSet<u64> = groups
        .iter()
        .filter(|(_, lines)| !lines.is_empty())
        .map(|(merchant_id, _)| *merchant_id)
        .collect();
    if let Some(missing) = cart_merchants.difference(&seen).next() {
        return Err(AppError::InvalidRequest(format!(
            "merchant {missing} has no courier selection"
        )));
    }
    if let Some(extra) = seen.difference(&cart_merchants).next() {
        return Err(AppError::InvalidRequest(format!(
            "merchant {extra} is not in the cart"
        )));
    }

    let mut merchants = Vec::with_capacity(selections.len());
    for selection in selections {
        let lines = groups
            .get(&selection.merchant_id)
            .into_iter()
            .flatten()
            .map(|line| {
                let initial_price = line
                    .unit_price
                    .checked_mul(Decimal::from(line.quantity))
                    .ok_or_else(out_of_range)?;
                Ok(PricedLine {
                    line: line.clone(),
                    initial_price,
                    final_price: initial_price,
                    adjustment: None,
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        let initial_price = checked_sum(lines.iter().map(|l| l.initial_price))?;
        merchants.push(PricedMerchant {
            merchant_id: selection.merchant_id,
            courier_id: selection.courier_id,
            courier_price: selection.courier_price,
            lines,
            initial_price,
            final_price: initial_price,
            adjustment: None,
        });
    }

    let initial_price = checked_sum(
        merchants
            .iter()
            .flat_map(|m| [m.initial_price, m.courier_price]),
    )?;

    Ok(PricedOrder {
        merchants,
        initial_price,
        final_price: initial_price,
        adjustment: None,
        voucher_id: None,
    })
}

pub(crate) fn out_of_range() -> AppError {
    AppError::InvalidRequest("price is out of range".to_string())
}

/// Sum that reports overflow instead of panicking.
fn checked_sum(values: impl IntoIterator<Item = Decimal>) -> Result<Decimal, AppError> {
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, value| acc.checked_add(value))
        .ok_or_else(out_of_range)
}

/// Price breakdown returned by the price preview and by checkout.
///
/// # JSON Example
///
/// ```json
/// {
///   "initial_price": "35.00",
///   "final_price": "31.5000",
///   "discount": "3.5000",
///   "courier_price": "5.00",
///   "voucher_id": 7,
///   "adjustment": { "type": "discount", "rate": "0.10", "amount": "3.5000" },
///   "merchants": [ ... ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceBreakdown {
    pub initial_price: Decimal,
    pub final_price: Decimal,
    /// Total taken off by the voucher at whatever level it applied.
    pub discount: Decimal,
    /// Sum of all merchants' courier prices.
    pub courier_price: Decimal,
    pub voucher_id: Option<u64>,
    pub adjustment: Option<Adjustment>,
    pub merchants: Vec<MerchantBreakdown>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MerchantBreakdown {
    pub merchant_id: u64,
    pub courier_id: u64,
    pub courier_price: Decimal,
    pub initial_price: Decimal,
    pub final_price: Decimal,
    pub adjustment: Option<Adjustment>,
    pub products: Vec<ProductBreakdown>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductBreakdown {
    pub product_id: u64,
    pub variant_combination_product_id: u64,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: u64,
    pub initial_price: Decimal,
    pub final_price: Decimal,
    pub adjustment: Option<Adjustment>,
}

impl From<&PricedOrder> for PriceBreakdown {
    fn from(order: &PricedOrder) -> Self {
        let merchants = order
            .merchants
            .iter()
            .map(|merchant| MerchantBreakdown {
                merchant_id: merchant.merchant_id,
                courier_id: merchant.courier_id,
                courier_price: merchant.courier_price,
                initial_price: merchant.initial_price,
                final_price: merchant.final_price,
                adjustment: merchant.adjustment,
                products: merchant
                    .lines
                    .iter()
                    .map(|priced| ProductBreakdown {
                        product_id: priced.line.product_id,
                        variant_combination_product_id: priced.line.variant_combination_product_id,
                        name: priced.line.title.clone(),
                        unit_price: priced.line.unit_price,
                        quantity: priced.line.quantity,
                        initial_price: priced.initial_price,
                        final_price: priced.final_price,
                        adjustment: priced.adjustment,
                    })
                    .collect(),
            })
            .collect();

        Self {
            initial_price: order.initial_price,
            final_price: order.final_price,
            discount: order.initial_price - order.final_price,
            courier_price: order.total_courier_price(),
            voucher_id: order.voucher_id,
            adjustment: order.adjustment,
            merchants,
        }
    }
}

/// Result of the price preview.
#[derive(Debug, Clone, Serialize)]
pub struct CheckPriceResponse {
    #[serde(flatten)]
    pub breakdown: PriceBreakdown,
    /// Whether the buyer's wallet currently covers the final price.
    pub balance_sufficient: bool,
}
