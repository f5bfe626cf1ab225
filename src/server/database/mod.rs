//! Durable records for bills, line items and claims.
//!
//! Every mutation is a single-row statement scoped by identifier, except bill intake which
//! writes the bill and its items in one transaction.

pub(crate) mod memory;
pub(crate) mod pool;
pub(crate) mod postgres;

use std::future::Future;
use chrono::{DateTime, Utc};
use derive_more::{Display, Error, From};
use crate::server::database::memory::MemoryLedger;
use crate::server::database::postgres::PgLedger;
use crate::server::model::bill::Bill;
use crate::server::model::claim::{Claim, ClaimMutation, SettlementMethod};
use crate::server::model::config::ReceiptGate;
use crate::server::model::item::{LineItem, LineItemPatch};
use crate::server::model::{BillId, ClaimId, ItemId, SessionId};

#[derive(Debug, Display, Error, From)]
pub(crate) enum StoreError {
    #[from]
    #[display("postgres error: {_0}")]
    Postgres(tokio_postgres::Error),
    #[display("no database connection available")]
    Busy,
    #[display("database call timed out")]
    Timeout,
    #[display("undecodable row: {_0}")]
    Decode(#[error(not(source))] String),
}

/// Upsert into the one SELECTING claim of a (bill, session) pair.
#[derive(Debug, Clone)]
pub(crate) struct ClaimUpsert {
    /// id used only when no SELECTING claim exists yet
    pub claim_id: ClaimId,
    pub bill_id: BillId,
    pub session_id: SessionId,
    pub guest_name: String,
    pub mutation: ClaimMutation,
    pub expires_at: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

pub(crate) trait LedgerStore: Send + Sync + 'static {
    /// Write a bill and all of its items, or nothing.
    fn insert_bill(&self, bill: Bill, items: Vec<LineItem>) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn get_bill(&self, bill_id: BillId) -> impl Future<Output = Result<Option<Bill>, StoreError>> + Send;

    fn get_bill_by_share_token(&self, token: &str) -> impl Future<Output = Result<Option<Bill>, StoreError>> + Send;

    fn rename_bill(
        &self,
        bill_id: BillId,
        restaurant_name: Option<String>,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<Bill>, StoreError>> + Send;

    /// Items of a bill ordered by position.
    fn list_items(&self, bill_id: BillId) -> impl Future<Output = Result<Vec<LineItem>, StoreError>> + Send;

    fn insert_item(&self, item: LineItem) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn update_item(
        &self,
        bill_id: BillId,
        item_id: ItemId,
        patch: LineItemPatch,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<LineItem>, StoreError>> + Send;

    fn delete_item(&self, bill_id: BillId, item_id: ItemId) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// All claims of a bill in creation order, expired ones included.
    fn list_claims(&self, bill_id: BillId) -> impl Future<Output = Result<Vec<Claim>, StoreError>> + Send;

    fn get_claim(&self, claim_id: ClaimId) -> impl Future<Output = Result<Option<Claim>, StoreError>> + Send;

    /// Apply one mutation to the session's SELECTING claim, creating it when absent.
    ///
    /// An expired SELECTING claim is revived empty rather than with its stale contents, its
    /// received flag cleared. The expiry is never moved earlier than it already is.
    fn upsert_selecting_claim(&self, upsert: ClaimUpsert) -> impl Future<Output = Result<Claim, StoreError>> + Send;

    /// Flip a SELECTING claim to PAID. `None` when no unexpired SELECTING claim has this id.
    fn mark_paid(
        &self,
        claim_id: ClaimId,
        settlement_method: Option<SettlementMethod>,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<Claim>, StoreError>> + Send;

    /// Set the received flag on a claim the gate admits. Expired SELECTING claims are never
    /// admitted. `None` when nothing was updated.
    fn set_received(
        &self,
        claim_id: ClaimId,
        received: bool,
        gate: ReceiptGate,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<Claim>, StoreError>> + Send;

    fn delete_selecting_claims(
        &self,
        bill_id: BillId,
        session_id: SessionId,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Remove up to `limit` SELECTING claims whose expiry is at or before `now`.
    fn delete_expired_claims(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<ClaimId>, StoreError>> + Send;
}

/// Backend chosen at start-up.
pub(crate) enum Ledger {
    Postgres(PgLedger),
    Memory(MemoryLedger),
}

macro_rules! dispatch {
    ($ledger:expr, $store:ident => $call:expr) => {
        match $ledger {
            Ledger::Postgres($store) => $call,
            Ledger::Memory($store) => $call,
        }
    };
}

impl LedgerStore for Ledger {
    async fn insert_bill(&self, bill: Bill, items: Vec<LineItem>) -> Result<(), StoreError> {
        dispatch!(self, s => s.insert_bill(bill, items).await)
    }

    async fn get_bill(&self, bill_id: BillId) -> Result<Option<Bill>, StoreError> {
        dispatch!(self, s => s.get_bill(bill_id).await)
    }

    async fn get_bill_by_share_token(&self, token: &str) -> Result<Option<Bill>, StoreError> {
        dispatch!(self, s => s.get_bill_by_share_token(token).await)
    }

    async fn rename_bill(&self, bill_id: BillId, restaurant_name: Option<String>, now: DateTime<Utc>) -> Result<Option<Bill>, StoreError> {
        dispatch!(self, s => s.rename_bill(bill_id, restaurant_name, now).await)
    }

    async fn list_items(&self, bill_id: BillId) -> Result<Vec<LineItem>, StoreError> {
        dispatch!(self, s => s.list_items(bill_id).await)
    }

    async fn insert_item(&self, item: LineItem) -> Result<(), StoreError> {
        dispatch!(self, s => s.insert_item(item).await)
    }

    async fn update_item(&self, bill_id: BillId, item_id: ItemId, patch: LineItemPatch, now: DateTime<Utc>) -> Result<Option<LineItem>, StoreError> {
        dispatch!(self, s => s.update_item(bill_id, item_id, patch, now).await)
    }

    async fn delete_item(&self, bill_id: BillId, item_id: ItemId) -> Result<bool, StoreError> {
        dispatch!(self, s => s.delete_item(bill_id, item_id).await)
    }

    async fn list_claims(&self, bill_id: BillId) -> Result<Vec<Claim>, StoreError> {
        dispatch!(self, s => s.list_claims(bill_id).await)
    }

    async fn get_claim(&self, claim_id: ClaimId) -> Result<Option<Claim>, StoreError> {
        dispatch!(self, s => s.get_claim(claim_id).await)
    }

    async fn upsert_selecting_claim(&self, upsert: ClaimUpsert) -> Result<Claim, StoreError> {
        dispatch!(self, s => s.upsert_selecting_claim(upsert).await)
    }

    async fn mark_paid(&self, claim_id: ClaimId, settlement_method: Option<SettlementMethod>, now: DateTime<Utc>) -> Result<Option<Claim>, StoreError> {
        dispatch!(self, s => s.mark_paid(claim_id, settlement_method, now).await)
    }

    async fn set_received(&self, claim_id: ClaimId, received: bool, gate: ReceiptGate, now: DateTime<Utc>) -> Result<Option<Claim>, StoreError> {
        dispatch!(self, s => s.set_received(claim_id, received, gate, now).await)
    }

    async fn delete_selecting_claims(&self, bill_id: BillId, session_id: SessionId) -> Result<u64, StoreError> {
        dispatch!(self, s => s.delete_selecting_claims(bill_id, session_id).await)
    }

    async fn delete_expired_claims(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ClaimId>, StoreError> {
        dispatch!(self, s => s.delete_expired_claims(now, limit).await)
    }
}
