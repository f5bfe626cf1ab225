//! One guest's in-progress claim: quantity and tip upserts, submission, and the payer's
//! received toggle.
//!
//! Requests are checked before any store access, in a fixed order: required fields,
//! identifier format, numeric range, then text. The first failing check is reported.

use std::sync::Arc;
use log::{debug, info, warn};
use uuid::Uuid;
use crate::server::database::{ClaimUpsert, LedgerStore};
use crate::server::model::claim::{Claim, ClaimMutation, ClaimStatus, PostItemClaimRequest, PostSubmitRequest, PostTipRequest, SettlementMethod};
use crate::server::model::config::ClaimPolicy;
use crate::server::model::{BillId, ClaimId, ItemId, SessionId};
use crate::server::service::ServiceError;
use crate::server::util::time::{expiry_after, helper};
use crate::server::util::validate::{
    check_granularity, check_range, parse_identifier, require, sanitize_text, ValidationError, MAX_NAME_LEN,
};

pub(crate) const MAX_CLAIM_QUANTITY: f64 = 10.0;
pub(crate) const QUANTITY_STEP: f64 = 0.25;
pub(crate) const MAX_TIP_AMOUNT: f64 = 10_000.0;

#[derive(Debug)]
struct ItemQuantityInput {
    bill_id: BillId,
    item_id: ItemId,
    session_id: SessionId,
    guest_name: String,
    quantity: f64,
}

fn validate_item_quantity(req: &PostItemClaimRequest) -> Result<ItemQuantityInput, ValidationError> {
    let bill_id = require(req.bill_id.as_deref(), "bill_id")?;
    let item_id = require(req.item_id.as_deref(), "item_id")?;
    let session_id = require(req.session_id.as_deref(), "session_id")?;
    let guest_name = require(req.guest_name.as_deref(), "guest_name")?;
    let quantity = require(req.quantity, "quantity")?;

    let bill_id = parse_identifier(bill_id, "bill_id")?;
    let item_id = parse_identifier(item_id, "item_id")?;
    let session_id = parse_identifier(session_id, "session_id")?;

    let quantity = check_range(quantity, 0.0, MAX_CLAIM_QUANTITY, "quantity")?;
    let quantity = check_granularity(quantity, QUANTITY_STEP, "quantity")?;

    let guest_name = sanitize_text(guest_name, MAX_NAME_LEN, "guest_name")?;
    Ok(ItemQuantityInput { bill_id, item_id, session_id, guest_name, quantity })
}

#[derive(Debug)]
struct TipInput {
    bill_id: BillId,
    session_id: SessionId,
    guest_name: String,
    tip_amount: f64,
}

fn validate_tip(req: &PostTipRequest) -> Result<TipInput, ValidationError> {
    let bill_id = require(req.bill_id.as_deref(), "bill_id")?;
    let session_id = require(req.session_id.as_deref(), "session_id")?;
    let guest_name = require(req.guest_name.as_deref(), "guest_name")?;
    let tip_amount = require(req.tip_amount, "tip_amount")?;

    let bill_id = parse_identifier(bill_id, "bill_id")?;
    let session_id = parse_identifier(session_id, "session_id")?;

    let tip_amount = check_range(tip_amount, 0.0, MAX_TIP_AMOUNT, "tip_amount")?;

    let guest_name = sanitize_text(guest_name, MAX_NAME_LEN, "guest_name")?;
    Ok(TipInput { bill_id, session_id, guest_name, tip_amount })
}

fn validate_settlement_method(raw: Option<&str>) -> Result<Option<SettlementMethod>, ValidationError> {
    raw.map(|m| {
        m.parse().map_err(|_| ValidationError::InvalidText {
            field: "settlement_method",
            reason: "is not a valid settlement method",
        })
    })
    .transpose()
}

pub(crate) struct ClaimSessionManager<S> {
    store: Arc<S>,
    policy: ClaimPolicy,
}

impl<S: LedgerStore> ClaimSessionManager<S> {
    pub fn new(store: Arc<S>, policy: ClaimPolicy) -> Self {
        Self { store, policy }
    }

    /// Set how much of one item the session is claiming. Zero removes the entry.
    pub async fn upsert_item_quantity(&self, req: &PostItemClaimRequest) -> Result<Claim, ServiceError> {
        let input = validate_item_quantity(req)?;
        self.store
            .get_bill(input.bill_id)
            .await?
            .ok_or(ServiceError::NotFound("bill"))?;
        // clearing a quantity must keep working after the payer deleted the item
        if input.quantity > 0.0 {
            let items = self.store.list_items(input.bill_id).await?;
            if !items.iter().any(|i| i.id == input.item_id) {
                return Err(ServiceError::NotFound("item"));
            }
        }

        let now = helper::get_utc_now();
        let claim = self
            .store
            .upsert_selecting_claim(ClaimUpsert {
                claim_id: Uuid::new_v4(),
                bill_id: input.bill_id,
                session_id: input.session_id,
                guest_name: input.guest_name,
                mutation: ClaimMutation::ItemQuantity { item_id: input.item_id, quantity: input.quantity },
                expires_at: expiry_after(now, self.policy.item_ttl),
                now,
            })
            .await?;
        debug!(
            "claim={} bill={} item={} quantity={}",
            claim.id, claim.bill_id, input.item_id, input.quantity
        );
        Ok(claim)
    }

    pub async fn upsert_tip(&self, req: &PostTipRequest) -> Result<Claim, ServiceError> {
        let input = validate_tip(req)?;
        self.store
            .get_bill(input.bill_id)
            .await?
            .ok_or(ServiceError::NotFound("bill"))?;

        let now = helper::get_utc_now();
        let claim = self
            .store
            .upsert_selecting_claim(ClaimUpsert {
                claim_id: Uuid::new_v4(),
                bill_id: input.bill_id,
                session_id: input.session_id,
                guest_name: input.guest_name,
                mutation: ClaimMutation::Tip(input.tip_amount),
                expires_at: expiry_after(now, self.policy.tip_ttl),
                now,
            })
            .await?;
        debug!("claim={} bill={} tip={}", claim.id, claim.bill_id, input.tip_amount);
        Ok(claim)
    }

    /// SELECTING -> PAID. Submitting an already PAID claim returns it unchanged; an expired
    /// SELECTING claim is abandoned and cannot be submitted.
    pub async fn submit(&self, claim_id: &str, req: &PostSubmitRequest) -> Result<Claim, ServiceError> {
        let claim_id = parse_identifier(claim_id, "claim_id")?;
        let settlement_method = validate_settlement_method(req.settlement_method.as_deref())?;

        let now = helper::get_utc_now();
        if let Some(claim) = self.store.mark_paid(claim_id, settlement_method, now).await? {
            info!(
                "claim={} bill={} submitted, method={:?}",
                claim.id,
                claim.bill_id,
                claim.settlement_method.as_ref().map(SettlementMethod::as_str)
            );
            return Ok(claim);
        }
        match self.store.get_claim(claim_id).await? {
            Some(claim) if claim.is_paid() => {
                debug!("claim={} already submitted", claim.id);
                Ok(claim)
            }
            Some(claim) if !claim.is_live(now) => Err(ServiceError::InvalidState("claim has expired")),
            Some(_) => Err(ServiceError::InvalidState("claim changed while submitting")),
            None => Err(ServiceError::NotFound("claim")),
        }
    }

    pub async fn confirm_received(&self, claim_id: &str) -> Result<Claim, ServiceError> {
        self.set_received(claim_id, true).await
    }

    pub async fn unconfirm_received(&self, claim_id: &str) -> Result<Claim, ServiceError> {
        self.set_received(claim_id, false).await
    }

    async fn set_received(&self, claim_id: &str, received: bool) -> Result<Claim, ServiceError> {
        let claim_id: ClaimId = parse_identifier(claim_id, "claim_id")?;
        let now = helper::get_utc_now();
        if let Some(claim) = self
            .store
            .set_received(claim_id, received, self.policy.receipt_gate, now)
            .await?
        {
            info!("claim={} bill={} received={}", claim.id, claim.bill_id, received);
            return Ok(claim);
        }
        match self.store.get_claim(claim_id).await? {
            Some(claim) if claim.status == ClaimStatus::Selecting => Err(ServiceError::InvalidState("claim has expired")),
            Some(_) => Err(ServiceError::InvalidState("claim is not SELECTING")),
            None => Err(ServiceError::NotFound("claim")),
        }
    }

    /// Drop the session's SELECTING claim, e.g. when its tab closes. Store failures are
    /// logged and reported as nothing deleted.
    pub async fn cleanup_session(&self, bill_id: &str, session_id: &str) -> Result<u64, ServiceError> {
        let bill_id = parse_identifier(bill_id, "bill_id")?;
        let session_id = parse_identifier(session_id, "session_id")?;
        match self.store.delete_selecting_claims(bill_id, session_id).await {
            Ok(deleted) => {
                debug!("bill={} session={} cleaned up {} claim(s)", bill_id, session_id, deleted);
                Ok(deleted)
            }
            Err(e) => {
                warn!("cleanup of bill={} session={} failed, {}", bill_id, session_id, e);
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use crate::server::database::memory::MemoryLedger;
    use crate::server::database::tests::FailingLedger;
    use crate::server::model::bill::Bill;
    use crate::server::model::config::ReceiptGate;
    use crate::server::model::item::LineItem;
    use crate::server::service::console::PayerConsole;

    /// A bill with one item of the given quantity and price.
    pub(crate) async fn seed_bill(store: &MemoryLedger, quantity: f64, price: f64) -> (Bill, LineItem) {
        let now = helper::get_utc_now();
        let bill = Bill {
            id: Uuid::new_v4(),
            share_token: "sharetokensharetokensharetoken00".to_string(),
            payer_name: "Payer".to_string(),
            payment_handle: "@payer".to_string(),
            image_ref: "receipts/1.jpg".to_string(),
            restaurant_name: None,
            extracted_total: None,
            created_at: now,
            updated_at: now,
        };
        let item = LineItem {
            id: Uuid::new_v4(),
            bill_id: bill.id,
            name: "item1".to_string(),
            quantity,
            price_per_unit: price,
            position: 0,
            created_at: now,
            updated_at: now,
        };
        store.insert_bill(bill.clone(), vec![item.clone()]).await.unwrap();
        (bill, item)
    }

    fn item_request(bill: &Bill, item: &LineItem, session: Uuid, quantity: f64) -> PostItemClaimRequest {
        PostItemClaimRequest {
            bill_id: Some(bill.id.to_string()),
            item_id: Some(item.id.to_string()),
            session_id: Some(session.to_string()),
            guest_name: Some("Ana".to_string()),
            quantity: Some(quantity),
        }
    }

    fn tip_request(bill: &Bill, session: Uuid, tip: f64) -> PostTipRequest {
        PostTipRequest {
            bill_id: Some(bill.id.to_string()),
            session_id: Some(session.to_string()),
            guest_name: Some("Ana".to_string()),
            tip_amount: Some(tip),
        }
    }

    fn manager(store: &Arc<MemoryLedger>) -> ClaimSessionManager<MemoryLedger> {
        ClaimSessionManager::new(store.clone(), ClaimPolicy::default())
    }

    fn at(offset: Duration) -> DateTime<Utc> {
        let start = DateTime::<Utc>::from_timestamp(1_767_225_600, 0).unwrap();
        start + offset
    }

    #[tokio::test]
    async fn one_selecting_claim_per_session() {
        let store = Arc::new(MemoryLedger::new());
        let (bill, item) = seed_bill(&store, 4.0, 5.0).await;
        let sessions = manager(&store);
        let session = Uuid::new_v4();

        let first = sessions.upsert_item_quantity(&item_request(&bill, &item, session, 1.0)).await.unwrap();
        let second = sessions.upsert_item_quantity(&item_request(&bill, &item, session, 2.0)).await.unwrap();
        let tipped = sessions.upsert_tip(&tip_request(&bill, session, 1.5)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.id, tipped.id);
        let claims = store.list_claims(bill.id).await.unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].item_quantities.get(&item.id), 2.0);
        assert_eq!(claims[0].tip_amount, 1.5);
    }

    #[tokio::test]
    async fn zero_quantity_removes_entry() {
        let store = Arc::new(MemoryLedger::new());
        let (bill, item) = seed_bill(&store, 4.0, 5.0).await;
        let sessions = manager(&store);
        let session = Uuid::new_v4();

        sessions.upsert_item_quantity(&item_request(&bill, &item, session, 1.0)).await.unwrap();
        let claim = sessions.upsert_item_quantity(&item_request(&bill, &item, session, 0.0)).await.unwrap();
        assert!(claim.item_quantities.iter().next().is_none());
    }

    #[tokio::test]
    async fn validation_order_is_fixed() {
        let store = Arc::new(MemoryLedger::new());
        let sessions = manager(&store);
        let mut req = PostItemClaimRequest {
            bill_id: Some("not-a-uuid".to_string()),
            item_id: None,
            session_id: Some(Uuid::new_v4().to_string()),
            guest_name: Some("   ".to_string()),
            quantity: Some(11.0),
        };

        let err = |r: Result<Claim, ServiceError>| match r {
            Err(ServiceError::Validation(e)) => e,
            other => panic!("expected validation error, got {other:?}"),
        };

        assert_eq!(
            err(sessions.upsert_item_quantity(&req).await),
            ValidationError::MissingField { field: "item_id" }
        );
        req.item_id = Some(Uuid::new_v4().to_string());
        assert_eq!(
            err(sessions.upsert_item_quantity(&req).await),
            ValidationError::InvalidIdentifier { field: "bill_id" }
        );
        req.bill_id = Some(Uuid::new_v4().to_string());
        assert_eq!(
            err(sessions.upsert_item_quantity(&req).await),
            ValidationError::OutOfRange { field: "quantity", min: 0.0, max: MAX_CLAIM_QUANTITY }
        );
        req.quantity = Some(1.1);
        assert_eq!(
            err(sessions.upsert_item_quantity(&req).await),
            ValidationError::Granularity { field: "quantity", step: QUANTITY_STEP }
        );
        req.quantity = Some(1.0);
        assert_eq!(
            err(sessions.upsert_item_quantity(&req).await),
            ValidationError::InvalidText { field: "guest_name", reason: "must not be empty" }
        );
        req.guest_name = Some("Bo".to_string());
        assert!(matches!(
            sessions.upsert_item_quantity(&req).await,
            Err(ServiceError::NotFound("bill"))
        ));
        assert!(store.list_claims(Uuid::nil()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tip_range_is_checked() {
        let store = Arc::new(MemoryLedger::new());
        let (bill, _) = seed_bill(&store, 1.0, 1.0).await;
        let sessions = manager(&store);
        let res = sessions.upsert_tip(&tip_request(&bill, Uuid::new_v4(), 10_000.01)).await;
        assert!(matches!(
            res,
            Err(ServiceError::Validation(ValidationError::OutOfRange { field: "tip_amount", .. }))
        ));
        assert!(store.list_claims(bill.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_item_is_not_found_unless_clearing() {
        let store = Arc::new(MemoryLedger::new());
        let (bill, mut item) = seed_bill(&store, 1.0, 1.0).await;
        let sessions = manager(&store);
        item.id = Uuid::new_v4();

        let res = sessions.upsert_item_quantity(&item_request(&bill, &item, Uuid::new_v4(), 1.0)).await;
        assert!(matches!(res, Err(ServiceError::NotFound("item"))));
        let cleared = sessions.upsert_item_quantity(&item_request(&bill, &item, Uuid::new_v4(), 0.0)).await;
        assert!(cleared.is_ok());
    }

    #[tokio::test]
    async fn tip_expiry_survives_item_edits() {
        helper::set_utc_now(at(Duration::zero()));
        let store = Arc::new(MemoryLedger::new());
        let (bill, item) = seed_bill(&store, 2.0, 1.0).await;
        let sessions = manager(&store);
        let session = Uuid::new_v4();

        let claim = sessions.upsert_item_quantity(&item_request(&bill, &item, session, 1.0)).await.unwrap();
        assert_eq!(claim.expires_at, at(Duration::minutes(30)));

        let claim = sessions.upsert_tip(&tip_request(&bill, session, 2.0)).await.unwrap();
        assert_eq!(claim.expires_at, at(Duration::days(30)));

        helper::set_utc_now(at(Duration::minutes(5)));
        let claim = sessions.upsert_item_quantity(&item_request(&bill, &item, session, 2.0)).await.unwrap();
        assert_eq!(claim.expires_at, at(Duration::days(30)));
    }

    #[tokio::test]
    async fn expired_claim_is_revived_empty() {
        helper::set_utc_now(at(Duration::zero()));
        let store = Arc::new(MemoryLedger::new());
        let (bill, item) = seed_bill(&store, 2.0, 1.0).await;
        let sessions = manager(&store);
        let session = Uuid::new_v4();

        let stale = sessions.upsert_item_quantity(&item_request(&bill, &item, session, 2.0)).await.unwrap();
        helper::set_utc_now(at(Duration::minutes(31)));
        let fresh = sessions.upsert_tip(&tip_request(&bill, session, 1.0)).await.unwrap();

        assert_eq!(fresh.id, stale.id);
        assert!(fresh.item_quantities.iter().next().is_none());
        assert_eq!(fresh.expires_at, at(Duration::minutes(31) + Duration::days(30)));
    }

    #[tokio::test]
    async fn revived_claim_drops_old_receipt() {
        helper::set_utc_now(at(Duration::zero()));
        let store = Arc::new(MemoryLedger::new());
        let (bill, item) = seed_bill(&store, 4.0, 5.0).await;
        let sessions = manager(&store);
        let session = Uuid::new_v4();

        let stale = sessions.upsert_item_quantity(&item_request(&bill, &item, session, 1.0)).await.unwrap();
        assert!(sessions.confirm_received(&stale.id.to_string()).await.unwrap().received_confirmed);

        helper::set_utc_now(at(Duration::minutes(31)));
        let fresh = sessions.upsert_item_quantity(&item_request(&bill, &item, session, 3.0)).await.unwrap();
        assert_eq!(fresh.id, stale.id);
        assert!(!fresh.received_confirmed);
        assert!(fresh.settlement_method.is_none());

        let summary = PayerConsole::new(store.clone()).summary(&bill.id.to_string()).await.unwrap();
        assert_eq!(summary.claimed_amount, 15.0);
        assert_eq!(summary.received_amount, 0.0);
    }

    #[tokio::test]
    async fn expired_claims_cannot_be_submitted_or_confirmed() {
        helper::set_utc_now(at(Duration::zero()));
        let store = Arc::new(MemoryLedger::new());
        let (bill, item) = seed_bill(&store, 4.0, 5.0).await;
        let sessions = manager(&store);
        let claim = sessions.upsert_item_quantity(&item_request(&bill, &item, Uuid::new_v4(), 2.0)).await.unwrap();
        let id = claim.id.to_string();

        helper::set_utc_now(at(Duration::minutes(31)));
        assert!(matches!(
            sessions.submit(&id, &PostSubmitRequest::default()).await,
            Err(ServiceError::InvalidState("claim has expired"))
        ));
        assert!(matches!(
            sessions.confirm_received(&id).await,
            Err(ServiceError::InvalidState("claim has expired"))
        ));
        assert_eq!(store.get_claim(claim.id).await.unwrap(), Some(claim));
    }

    #[tokio::test]
    async fn submit_is_idempotent() {
        let store = Arc::new(MemoryLedger::new());
        let (bill, item) = seed_bill(&store, 4.0, 5.0).await;
        let sessions = manager(&store);
        let session = Uuid::new_v4();
        let claim = sessions.upsert_item_quantity(&item_request(&bill, &item, session, 2.0)).await.unwrap();

        let cash = PostSubmitRequest { settlement_method: Some("cash".to_string()) };
        let once = sessions.submit(&claim.id.to_string(), &cash).await.unwrap();
        let twice = sessions.submit(&claim.id.to_string(), &PostSubmitRequest::default()).await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(once.status, ClaimStatus::Paid);
        assert_eq!(once.settlement_method.as_ref().map(SettlementMethod::as_str), Some("CASH"));
        assert_eq!(store.list_claims(bill.id).await.unwrap(), vec![once]);
    }

    #[tokio::test]
    async fn paid_claim_is_frozen_and_session_starts_over() {
        let store = Arc::new(MemoryLedger::new());
        let (bill, item) = seed_bill(&store, 4.0, 5.0).await;
        let sessions = manager(&store);
        let session = Uuid::new_v4();
        let claim = sessions.upsert_item_quantity(&item_request(&bill, &item, session, 2.0)).await.unwrap();
        sessions.submit(&claim.id.to_string(), &PostSubmitRequest::default()).await.unwrap();

        let next = sessions.upsert_item_quantity(&item_request(&bill, &item, session, 1.0)).await.unwrap();
        assert_ne!(next.id, claim.id);
        let paid = store.get_claim(claim.id).await.unwrap().unwrap();
        assert_eq!(paid.item_quantities.get(&item.id), 2.0);
        assert_eq!(store.list_claims(bill.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn submit_unknown_claim() {
        let store = Arc::new(MemoryLedger::new());
        let sessions = manager(&store);
        let res = sessions.submit(&Uuid::new_v4().to_string(), &PostSubmitRequest::default()).await;
        assert!(matches!(res, Err(ServiceError::NotFound("claim"))));
        let res = sessions
            .submit(&Uuid::new_v4().to_string(), &PostSubmitRequest { settlement_method: Some("wire transfer".to_string()) })
            .await;
        assert!(matches!(res, Err(ServiceError::Validation(ValidationError::InvalidText { .. }))));
    }

    #[tokio::test]
    async fn received_toggle_requires_selecting() {
        let store = Arc::new(MemoryLedger::new());
        let (bill, item) = seed_bill(&store, 4.0, 5.0).await;
        let sessions = manager(&store);
        let claim = sessions.upsert_item_quantity(&item_request(&bill, &item, Uuid::new_v4(), 1.0)).await.unwrap();
        let id = claim.id.to_string();

        assert!(sessions.confirm_received(&id).await.unwrap().received_confirmed);
        assert!(sessions.confirm_received(&id).await.unwrap().received_confirmed);
        assert!(!sessions.unconfirm_received(&id).await.unwrap().received_confirmed);

        sessions.submit(&id, &PostSubmitRequest::default()).await.unwrap();
        assert!(matches!(sessions.confirm_received(&id).await, Err(ServiceError::InvalidState(_))));
        assert!(matches!(
            sessions.confirm_received(&Uuid::new_v4().to_string()).await,
            Err(ServiceError::NotFound("claim"))
        ));
    }

    #[tokio::test]
    async fn submit_then_confirm_with_any_gate() {
        let store = Arc::new(MemoryLedger::new());
        let (bill, item) = seed_bill(&store, 4.0, 5.0).await;
        let policy = ClaimPolicy { receipt_gate: ReceiptGate::Any, ..ClaimPolicy::default() };
        let sessions = ClaimSessionManager::new(store.clone(), policy);
        let claim = sessions.upsert_item_quantity(&item_request(&bill, &item, Uuid::new_v4(), 2.0)).await.unwrap();
        let id = claim.id.to_string();

        let paid = sessions
            .submit(&id, &PostSubmitRequest { settlement_method: Some("CASH".to_string()) })
            .await
            .unwrap();
        assert_eq!(paid.status, ClaimStatus::Paid);
        assert!(sessions.confirm_received(&id).await.unwrap().received_confirmed);
        assert!(!sessions.unconfirm_received(&id).await.unwrap().received_confirmed);

        let again = sessions.submit(&id, &PostSubmitRequest::default()).await.unwrap();
        assert_eq!(again.id, claim.id);
        assert_eq!(store.list_claims(bill.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cleanup_is_best_effort() {
        let store = Arc::new(MemoryLedger::new());
        let (bill, item) = seed_bill(&store, 4.0, 5.0).await;
        let sessions = manager(&store);
        let session = Uuid::new_v4();
        sessions.upsert_item_quantity(&item_request(&bill, &item, session, 1.0)).await.unwrap();

        let bill_id = bill.id.to_string();
        assert_eq!(sessions.cleanup_session(&bill_id, &session.to_string()).await.unwrap(), 1);
        assert_eq!(sessions.cleanup_session(&bill_id, &session.to_string()).await.unwrap(), 0);
        assert!(store.list_claims(bill.id).await.unwrap().is_empty());
        assert!(sessions.cleanup_session("bad", &session.to_string()).await.is_err());
    }

    #[tokio::test]
    async fn cleanup_swallows_store_errors() {
        let store = Arc::new(FailingLedger::default());
        let (bill, item) = seed_bill(&store.inner, 4.0, 5.0).await;
        let sessions = ClaimSessionManager::new(store.clone(), ClaimPolicy::default());
        let session = Uuid::new_v4();
        sessions.upsert_item_quantity(&item_request(&bill, &item, session, 1.0)).await.unwrap();

        store.fail("delete_selecting_claims");
        assert_eq!(sessions.cleanup_session(&bill.id.to_string(), &session.to_string()).await.unwrap(), 0);
        assert_eq!(store.list_claims(bill.id).await.unwrap().len(), 1);
    }
}
