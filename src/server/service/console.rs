use std::sync::Arc;
use chrono::{DateTime, Utc};
use log::error;
use crate::server::database::LedgerStore;
use crate::server::model::claim::{BillSummary, Claim, ClaimCounts, ClaimStatus, ClaimTotals, ClaimView, LiveView};
use crate::server::model::item::LineItem;
use crate::server::model::{round_cents, BillId};
use crate::server::service::reconciler::{item_views, CountedClaims, PriceList};
use crate::server::service::ServiceError;
use crate::server::util::time::helper;
use crate::server::util::validate::parse_identifier;

/// Collected vs. received totals for the payer. Counts PAID and live SELECTING claims.
pub(crate) fn summarize(bill_id: BillId, items: &[LineItem], claims: &[Claim], now: DateTime<Utc>) -> BillSummary {
    let prices = PriceList::new(items);
    let counted = CountedClaims::PaidAndLive(now);
    let claims = claims
        .iter()
        .filter(|c| counted.counts(c))
        .map(|c| ClaimView { total: prices.claim_total(c), claim: c.clone() })
        .collect::<Vec<_>>();

    let total_amount = round_cents(items.iter().map(LineItem::total).sum());
    let claimed_amount = round_cents(claims.iter().map(|c| c.total).sum());
    let received_amount = round_cents(
        claims
            .iter()
            .filter(|c| c.claim.received_confirmed)
            .map(|c| c.total)
            .sum(),
    );
    BillSummary { bill_id, total_amount, claimed_amount, received_amount, claims }
}

/// Counts, per-status totals and listings of the claims currently in play.
pub(crate) fn live(bill_id: BillId, items: Vec<LineItem>, claims: &[Claim], now: DateTime<Utc>) -> LiveView {
    let prices = PriceList::new(&items);
    let counted = CountedClaims::PaidAndLive(now);
    let mut counts = ClaimCounts::default();
    let mut totals = ClaimTotals::default();
    let mut views = Vec::new();
    for claim in claims.iter().filter(|c| counted.counts(c)) {
        let items_total = prices.items_total(&claim.item_quantities);
        counts.total += 1;
        match claim.status {
            ClaimStatus::Selecting => {
                counts.selecting += 1;
                totals.selecting += items_total;
            }
            ClaimStatus::Paid => {
                counts.paid += 1;
                totals.paid += items_total;
            }
        }
        totals.tips += claim.tip_amount;
        views.push(ClaimView { total: prices.claim_total(claim), claim: claim.clone() });
    }
    totals.selecting = round_cents(totals.selecting);
    totals.paid = round_cents(totals.paid);
    totals.tips = round_cents(totals.tips);

    LiveView {
        bill_id,
        counts,
        totals,
        claims: views,
        items: item_views(items, claims, counted),
        degraded: false,
    }
}

pub(crate) struct PayerConsole<S> {
    store: Arc<S>,
}

impl<S: LedgerStore> PayerConsole<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn summary(&self, bill_id: &str) -> Result<BillSummary, ServiceError> {
        let bill_id = parse_identifier(bill_id, "bill_id")?;
        self.store
            .get_bill(bill_id)
            .await?
            .ok_or(ServiceError::NotFound("bill"))?;
        let items = self.store.list_items(bill_id).await?;
        let claims = self.store.list_claims(bill_id).await?;
        Ok(summarize(bill_id, &items, &claims, helper::get_utc_now()))
    }

    /// Live view of a bill. Failing item or claim reads degrade to an empty view instead
    /// of an error, so dashboards keep rendering.
    pub async fn live_view(&self, bill_id: &str) -> Result<LiveView, ServiceError> {
        let bill_id = parse_identifier(bill_id, "bill_id")?;
        self.store
            .get_bill(bill_id)
            .await?
            .ok_or(ServiceError::NotFound("bill"))?;

        let now = helper::get_utc_now();
        let (items, claims) = match (self.store.list_items(bill_id).await, self.store.list_claims(bill_id).await) {
            (Ok(items), Ok(claims)) => (items, claims),
            (items, claims) => {
                if let Err(e) = &items {
                    error!("live view of bill={} could not read items, {}", bill_id, e);
                }
                if let Err(e) = &claims {
                    error!("live view of bill={} could not read claims, {}", bill_id, e);
                }
                let mut view = live(bill_id, items.unwrap_or_default(), &[], now);
                view.degraded = true;
                return Ok(view);
            }
        };
        Ok(live(bill_id, items, &claims, now))
    }
}
