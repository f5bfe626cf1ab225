use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::server::model::{round_cents, BillId, ItemId};

/// One priced, quantity-bearing line extracted from a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct LineItem {
    pub id: ItemId,
    pub bill_id: BillId,
    pub name: String,
    pub quantity: f64,
    pub price_per_unit: f64,
    pub position: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LineItem {
    /// quantity x price per unit
    pub fn total(&self) -> f64 {
        round_cents(self.quantity * self.price_per_unit)
    }
}

/// Line item as written at intake or by a payer edit, before it has an id.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct NewLineItem {
    pub name: Option<String>,
    pub quantity: Option<f64>,
    pub price_per_unit: Option<f64>,
}

/// Partial payer edit of a line item.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct LineItemPatch {
    pub name: Option<String>,
    pub quantity: Option<f64>,
    pub price_per_unit: Option<f64>,
}

impl LineItemPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.quantity.is_none() && self.price_per_unit.is_none()
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ItemView {
    #[serde(flatten)]
    pub item: LineItem,
    pub total: f64,
    pub remaining_quantity: f64,
}
