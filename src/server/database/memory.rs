//! In-process ledger for development and tests. Publishes the same row-level change
//! events as the Postgres triggers.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use crate::server::database::{ClaimUpsert, LedgerStore, StoreError};
use crate::server::model::bill::Bill;
use crate::server::model::claim::{Claim, ClaimMutation, ClaimStatus, ItemQuantities, SettlementMethod};
use crate::server::model::config::ReceiptGate;
use crate::server::model::feed::{ChangeEvent, ChangeOp, FeedTable, UNPUBLISHED_COLUMNS};
use crate::server::model::item::{LineItem, LineItemPatch};
use crate::server::model::{BillId, ClaimId, ItemId, SessionId};

const CHANGE_BUFFER: usize = 256;

/// A row as the change feed carries it, without the columns the triggers leave out.
fn feed_row<R: Serialize>(row: &R) -> Option<Value> {
    let mut value = serde_json::to_value(row).ok()?;
    if let Some(columns) = value.as_object_mut() {
        for column in UNPUBLISHED_COLUMNS {
            columns.remove(*column);
        }
    }
    Some(value)
}

#[derive(Default)]
struct Tables {
    bills: HashMap<BillId, Bill>,
    items: HashMap<ItemId, LineItem>,
    claims: HashMap<ClaimId, Claim>,
}

pub(crate) struct MemoryLedger {
    tables: Mutex<Tables>,
    changes: broadcast::Sender<Value>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            tables: Mutex::new(Tables::default()),
            changes,
        }
    }

    /// Raw change payloads, shaped like the Postgres NOTIFY payloads.
    pub fn changes(&self) -> broadcast::Sender<Value> {
        self.changes.clone()
    }

    /// (bills, items, claims) currently stored.
    #[cfg(test)]
    pub fn row_counts(&self) -> (usize, usize, usize) {
        let tables = self.tables();
        (tables.bills.len(), tables.items.len(), tables.claims.len())
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Broadcast one change. Called with the table lock held so events leave in write order.
    fn publish<R: Serialize>(&self, table: FeedTable, op: ChangeOp, bill_id: BillId, old: Option<&R>, new: Option<&R>) {
        let event = ChangeEvent {
            table,
            op,
            bill_id,
            old: old.and_then(feed_row),
            new: new.and_then(feed_row),
        };
        match serde_json::to_value(&event) {
            // no receivers is fine
            Ok(payload) => { let _ = self.changes.send(payload); },
            Err(e) => debug!("dropping unserializable change event, {}", e),
        }
    }

    fn apply(claim: &mut Claim, mutation: ClaimMutation) {
        match mutation {
            ClaimMutation::ItemQuantity { item_id, quantity } => claim.item_quantities.set(item_id, quantity),
            ClaimMutation::Tip(tip) => claim.tip_amount = tip,
        }
    }
}

impl LedgerStore for MemoryLedger {
    async fn insert_bill(&self, bill: Bill, items: Vec<LineItem>) -> Result<(), StoreError> {
        let mut tables = self.tables();
        if tables.bills.contains_key(&bill.id) || items.iter().any(|i| tables.items.contains_key(&i.id)) {
            return Err(StoreError::Decode(format!("duplicate key inserting bill {}", bill.id)));
        }
        tables.bills.insert(bill.id, bill);
        for item in items {
            self.publish(FeedTable::LineItems, ChangeOp::Insert, item.bill_id, None, Some(&item));
            tables.items.insert(item.id, item);
        }
        Ok(())
    }

    async fn get_bill(&self, bill_id: BillId) -> Result<Option<Bill>, StoreError> {
        Ok(self.tables().bills.get(&bill_id).cloned())
    }

    async fn get_bill_by_share_token(&self, token: &str) -> Result<Option<Bill>, StoreError> {
        Ok(self.tables().bills.values().find(|b| b.share_token == token).cloned())
    }

    async fn rename_bill(&self, bill_id: BillId, restaurant_name: Option<String>, now: DateTime<Utc>) -> Result<Option<Bill>, StoreError> {
        let mut tables = self.tables();
        Ok(tables.bills.get_mut(&bill_id).map(|bill| {
            bill.restaurant_name = restaurant_name;
            bill.updated_at = now;
            bill.clone()
        }))
    }

    async fn list_items(&self, bill_id: BillId) -> Result<Vec<LineItem>, StoreError> {
        let mut items = self
            .tables()
            .items
            .values()
            .filter(|i| i.bill_id == bill_id)
            .cloned()
            .collect::<Vec<_>>();
        items.sort_by_key(|i| (i.position, i.created_at));
        Ok(items)
    }

    async fn insert_item(&self, item: LineItem) -> Result<(), StoreError> {
        let mut tables = self.tables();
        self.publish(FeedTable::LineItems, ChangeOp::Insert, item.bill_id, None, Some(&item));
        tables.items.insert(item.id, item);
        Ok(())
    }

    async fn update_item(&self, bill_id: BillId, item_id: ItemId, patch: LineItemPatch, now: DateTime<Utc>) -> Result<Option<LineItem>, StoreError> {
        let mut tables = self.tables();
        let Some(item) = tables.items.get_mut(&item_id).filter(|i| i.bill_id == bill_id) else {
            return Ok(None);
        };
        let old = item.clone();
        if let Some(name) = patch.name {
            item.name = name;
        }
        if let Some(quantity) = patch.quantity {
            item.quantity = quantity;
        }
        if let Some(price) = patch.price_per_unit {
            item.price_per_unit = price;
        }
        item.updated_at = now;
        self.publish(FeedTable::LineItems, ChangeOp::Update, bill_id, Some(&old), Some(&*item));
        Ok(Some(item.clone()))
    }

    async fn delete_item(&self, bill_id: BillId, item_id: ItemId) -> Result<bool, StoreError> {
        let mut tables = self.tables();
        if !tables.items.get(&item_id).is_some_and(|i| i.bill_id == bill_id) {
            return Ok(false);
        }
        let removed = tables.items.remove(&item_id);
        self.publish(FeedTable::LineItems, ChangeOp::Delete, bill_id, removed.as_ref(), None);
        Ok(removed.is_some())
    }

    async fn list_claims(&self, bill_id: BillId) -> Result<Vec<Claim>, StoreError> {
        let mut claims = self
            .tables()
            .claims
            .values()
            .filter(|c| c.bill_id == bill_id)
            .cloned()
            .collect::<Vec<_>>();
        claims.sort_by_key(|c| (c.created_at, c.id));
        Ok(claims)
    }

    async fn get_claim(&self, claim_id: ClaimId) -> Result<Option<Claim>, StoreError> {
        Ok(self.tables().claims.get(&claim_id).cloned())
    }

    async fn upsert_selecting_claim(&self, upsert: ClaimUpsert) -> Result<Claim, StoreError> {
        let ClaimUpsert { claim_id, bill_id, session_id, guest_name, mutation, expires_at, now } = upsert;
        let mut tables = self.tables();
        let existing = tables.claims.values_mut().find(|c| {
            c.bill_id == bill_id && c.session_id == session_id && c.status == ClaimStatus::Selecting
        });
        match existing {
            Some(claim) => {
                let old = claim.clone();
                if claim.expires_at <= now {
                    claim.item_quantities = ItemQuantities::new();
                    claim.tip_amount = 0.0;
                    claim.received_confirmed = false;
                    claim.settlement_method = None;
                    claim.expires_at = expires_at;
                } else {
                    claim.expires_at = claim.expires_at.max(expires_at);
                }
                Self::apply(claim, mutation);
                claim.guest_name = guest_name;
                claim.updated_at = now;
                self.publish(FeedTable::Claims, ChangeOp::Update, bill_id, Some(&old), Some(&*claim));
                Ok(claim.clone())
            }
            None => {
                let mut claim = Claim {
                    id: claim_id,
                    bill_id,
                    guest_name,
                    session_id,
                    item_quantities: ItemQuantities::new(),
                    tip_amount: 0.0,
                    status: ClaimStatus::Selecting,
                    received_confirmed: false,
                    settlement_method: None,
                    expires_at,
                    created_at: now,
                    updated_at: now,
                };
                Self::apply(&mut claim, mutation);
                self.publish(FeedTable::Claims, ChangeOp::Insert, bill_id, None, Some(&claim));
                tables.claims.insert(claim.id, claim.clone());
                Ok(claim)
            }
        }
    }

    async fn mark_paid(&self, claim_id: ClaimId, settlement_method: Option<SettlementMethod>, now: DateTime<Utc>) -> Result<Option<Claim>, StoreError> {
        let mut tables = self.tables();
        let Some(claim) = tables.claims.get_mut(&claim_id).filter(|c| c.is_live(now)) else {
            return Ok(None);
        };
        let old = claim.clone();
        claim.status = ClaimStatus::Paid;
        claim.settlement_method = settlement_method;
        claim.updated_at = now;
        self.publish(FeedTable::Claims, ChangeOp::Update, claim.bill_id, Some(&old), Some(&*claim));
        Ok(Some(claim.clone()))
    }

    async fn set_received(&self, claim_id: ClaimId, received: bool, gate: ReceiptGate, now: DateTime<Utc>) -> Result<Option<Claim>, StoreError> {
        let mut tables = self.tables();
        let admitted = tables.claims.get_mut(&claim_id).filter(|c| match gate {
            ReceiptGate::Selecting => c.is_live(now),
            ReceiptGate::Any => c.is_paid() || c.is_live(now),
        });
        let Some(claim) = admitted else {
            return Ok(None);
        };
        let old = claim.clone();
        claim.received_confirmed = received;
        claim.updated_at = now;
        self.publish(FeedTable::Claims, ChangeOp::Update, claim.bill_id, Some(&old), Some(&*claim));
        Ok(Some(claim.clone()))
    }

    async fn delete_selecting_claims(&self, bill_id: BillId, session_id: SessionId) -> Result<u64, StoreError> {
        let mut tables = self.tables();
        let ids = tables
            .claims
            .values()
            .filter(|c| c.bill_id == bill_id && c.session_id == session_id && c.status == ClaimStatus::Selecting)
            .map(|c| c.id)
            .collect::<Vec<_>>();
        let mut deleted = 0;
        for claim in ids.iter().filter_map(|id| tables.claims.remove(id)) {
            self.publish(FeedTable::Claims, ChangeOp::Delete, bill_id, Some(&claim), None);
            deleted += 1;
        }
        Ok(deleted)
    }

    async fn delete_expired_claims(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ClaimId>, StoreError> {
        let mut tables = self.tables();
        let ids = tables
            .claims
            .values()
            .filter(|c| c.status == ClaimStatus::Selecting && c.expires_at <= now)
            .take(limit.max(0) as usize)
            .map(|c| c.id)
            .collect::<Vec<_>>();
        let mut deleted = Vec::with_capacity(ids.len());
        for claim in ids.iter().filter_map(|id| tables.claims.remove(id)) {
            self.publish(FeedTable::Claims, ChangeOp::Delete, claim.bill_id, Some(&claim), None);
            deleted.push(claim.id);
        }
        Ok(deleted)
    }
}
