//! Remaining quantity per line item and money totals per claim.
//!
//! Nothing here fails. Claims naming items that no longer exist simply have nothing to
//! attach to, and over-claiming clamps remaining quantity at zero.

use std::collections::{BTreeMap, HashMap};
use chrono::{DateTime, Utc};
use crate::server::model::claim::{Claim, ItemQuantities};
use crate::server::model::item::{ItemView, LineItem};
use crate::server::model::{round_cents, ItemId};

/// Which claims count against an item's quantity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum CountedClaims {
    /// finalized claims only; what guests compete against on the claim form
    PaidOnly,
    /// finalized claims plus SELECTING claims not expired at the given instant
    PaidAndLive(DateTime<Utc>),
}

impl CountedClaims {
    pub fn counts(&self, claim: &Claim) -> bool {
        match self {
            CountedClaims::PaidOnly => claim.is_paid(),
            CountedClaims::PaidAndLive(now) => claim.is_paid() || claim.is_live(*now),
        }
    }
}

/// `max(0, quantity - sum of claimed quantities for the item)`.
pub(crate) fn remaining_quantity<'a, I>(item_id: &ItemId, quantity: f64, claims: I) -> f64
where
    I: IntoIterator<Item = &'a ItemQuantities>,
{
    let claimed: f64 = claims.into_iter().map(|q| q.get(item_id)).sum();
    let remaining = quantity - claimed;
    // also maps NaN and -0.0 to 0
    if remaining > 0.0 { remaining } else { 0.0 }
}

/// Remaining quantity of every existing item under the chosen counting rule.
pub(crate) fn remaining_quantities(items: &[LineItem], claims: &[Claim], counted: CountedClaims) -> BTreeMap<ItemId, f64> {
    let counted_claims = claims.iter().filter(|c| counted.counts(c)).collect::<Vec<_>>();
    items
        .iter()
        .map(|item| {
            let remaining = remaining_quantity(
                &item.id,
                item.quantity,
                counted_claims.iter().map(|c| &c.item_quantities),
            );
            (item.id, remaining)
        })
        .collect()
}

pub(crate) fn item_views(items: Vec<LineItem>, claims: &[Claim], counted: CountedClaims) -> Vec<ItemView> {
    let remaining = remaining_quantities(&items, claims, counted);
    items
        .into_iter()
        .map(|item| ItemView {
            total: item.total(),
            remaining_quantity: remaining.get(&item.id).copied().unwrap_or(0.0),
            item,
        })
        .collect()
}

/// Price lookup for claim totals.
pub(crate) struct PriceList(HashMap<ItemId, f64>);

impl PriceList {
    pub fn new(items: &[LineItem]) -> Self {
        Self(items.iter().map(|i| (i.id, i.price_per_unit)).collect())
    }

    /// claimed quantity x unit price, without tip; unknown items are worth nothing
    pub fn items_total(&self, quantities: &ItemQuantities) -> f64 {
        let total = quantities
            .iter()
            .filter_map(|(id, qty)| self.0.get(id).map(|price| qty * price))
            .sum();
        round_cents(total)
    }

    pub fn claim_total(&self, claim: &Claim) -> f64 {
        round_cents(self.items_total(&claim.item_quantities) + claim.tip_amount)
    }
}
