use serde::Serialize;
use utoipa::ToSchema;

use crate::config::AppConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct PriceSummary {
    pub subtotal: i64,
    pub shipping: i64,
    pub discount: i64,
    pub tax: i64,
    pub total: i64,
}

/// Order totals from the server-side subtotal. Amounts are in minor units.
/// `None` when any amount overflows.
pub fn summarize(config: &AppConfig, subtotal: i64) -> Option<PriceSummary> {
    let shipping = if config.free_shipping_threshold > 0 && subtotal >= config.free_shipping_threshold
    {
        0
    } else {
        config.shipping_fee
    };
    // promotions live in the CMS, not here
    let discount = 0;
    let tax = subtotal.checked_mul(config.tax_rate_bps)? / 10_000;
    let total = subtotal
        .checked_add(shipping)?
        .checked_add(tax)?
        .checked_sub(discount)?;
    Some(PriceSummary {
        subtotal,
        shipping,
        discount,
        tax,
        total,
    })
}

pub fn line_total(unit_price: i64, quantity: i32) -> Option<i64> {
    unit_price.checked_mul(i64::from(quantity))
}
