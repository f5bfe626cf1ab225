use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::server::model::claim::ClaimStatus;
use crate::server::model::BillId;

/// Name of the Postgres NOTIFY channel the ledger triggers publish on.
pub(crate) const LEDGER_CHANGES_CHANNEL: &str = "ledger_changes";

/// Columns left out of change payloads. NOTIFY payloads are capped at 8000 bytes and a
/// claim's quantity map is unbounded; subscribers refetch instead.
pub(crate) const UNPUBLISHED_COLUMNS: &[&str] = &["item_quantities"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum FeedTable {
    Claims,
    LineItems,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub(crate) enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// One row-level change notification, with the row before and after as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ChangeEvent {
    pub table: FeedTable,
    pub op: ChangeOp,
    pub bill_id: BillId,
    #[serde(default)]
    pub old: Option<Value>,
    #[serde(default)]
    pub new: Option<Value>,
}

impl ChangeEvent {
    pub fn old_status(&self) -> Option<ClaimStatus> {
        Self::status_of(self.old.as_ref())
    }

    pub fn new_status(&self) -> Option<ClaimStatus> {
        Self::status_of(self.new.as_ref())
    }

    fn status_of(row: Option<&Value>) -> Option<ClaimStatus> {
        row?.get("status")?.as_str()?.parse().ok()
    }
}
