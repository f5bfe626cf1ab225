//! Where a row change goes. SELECTING and PAID claims share one table, so claim events
//! are routed on their before/after status rather than on table identity.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use serde_json::Value;
use crate::server::model::claim::ClaimStatus;
use crate::server::model::feed::{ChangeEvent, ChangeOp, FeedTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    /// a claim is or was PAID
    Finalized,
    /// a claim is or was SELECTING
    LiveSelecting,
    Item,
    Unroutable,
}

pub(crate) fn route(event: &ChangeEvent) -> Route {
    match event.table {
        FeedTable::LineItems => Route::Item,
        FeedTable::Claims => {
            let (old, new) = (event.old_status(), event.new_status());
            if old == Some(ClaimStatus::Selecting) && new == Some(ClaimStatus::Paid) {
                return Route::Finalized;
            }
            let after = match event.op {
                ChangeOp::Delete => old,
                ChangeOp::Insert | ChangeOp::Update => new,
            };
            match after {
                Some(ClaimStatus::Paid) => Route::Finalized,
                Some(ClaimStatus::Selecting) => Route::LiveSelecting,
                None => Route::Unroutable,
            }
        }
    }
}

pub(crate) fn decode(payload: Value) -> Result<ChangeEvent, serde_json::Error> {
    serde_json::from_value(payload)
}

/// Bounded memory of recently delivered events, so a replayed event is applied once.
#[derive(Debug)]
pub(crate) struct RecentChanges {
    capacity: usize,
    order: VecDeque<u64>,
    seen: HashSet<u64>,
}

impl RecentChanges {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// True the first time an identical event shows up within the window.
    pub fn first_sighting(&mut self, event: &ChangeEvent) -> bool {
        let Ok(encoded) = serde_json::to_string(event) else {
            return true;
        };
        let mut hasher = DefaultHasher::new();
        encoded.hash(&mut hasher);
        let fingerprint = hasher.finish();

        if !self.seen.insert(fingerprint) {
            return false;
        }
        self.order.push_back(fingerprint);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }
}
