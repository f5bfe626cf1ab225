use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use crate::server::model::item::ItemView;
use crate::server::model::{BillId, ClaimId, ItemId, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum ClaimStatus {
    Selecting,
    Paid,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Selecting => "SELECTING",
            ClaimStatus::Paid => "PAID",
        }
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SELECTING" => Ok(Self::Selecting),
            "PAID" => Ok(Self::Paid),
            s => Err(format!("Invalid ClaimStatus: {s}")),
        }
    }
}

/// Claimed quantity per line item. Entries never hold zero or negative quantities.
///
/// Decoding is lenient: anything that is not an object of non-negative numbers keyed
/// by item id is dropped rather than rejected, so a damaged row reads as "no claims".
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub(crate) struct ItemQuantities(BTreeMap<ItemId, f64>);

impl ItemQuantities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, item_id: &ItemId) -> f64 {
        self.0.get(item_id).copied().unwrap_or(0.0)
    }

    /// Set a quantity, removing the entry once it reaches zero.
    pub fn set(&mut self, item_id: ItemId, quantity: f64) {
        if quantity > 0.0 {
            self.0.insert(item_id, quantity);
        } else {
            self.0.remove(&item_id);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ItemId, &f64)> {
        self.0.iter()
    }

    pub fn from_json(value: &Value) -> Self {
        let Some(entries) = value.as_object() else {
            return Self::default();
        };
        let quantities = entries
            .iter()
            .filter_map(|(key, qty)| {
                let item_id = ItemId::parse_str(key).ok()?;
                let qty = qty.as_f64()?;
                (qty.is_finite() && qty > 0.0).then_some((item_id, qty))
            })
            .collect();
        Self(quantities)
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(id, qty)| (id.to_string(), Value::from(*qty)))
                .collect(),
        )
    }
}

impl<'de> Deserialize<'de> for ItemQuantities {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value.map(|v| Self::from_json(&v)).unwrap_or_default())
    }
}

impl<const N: usize> From<[(ItemId, f64); N]> for ItemQuantities {
    fn from(entries: [(ItemId, f64); N]) -> Self {
        let mut quantities = Self::new();
        for (id, qty) in entries {
            quantities.set(id, qty);
        }
        quantities
    }
}

/// How the guest says they settled, e.g. `CASH`. Stored upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct SettlementMethod(String);

impl SettlementMethod {
    pub const MAX_LEN: usize = 32;

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SettlementMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        let well_formed = !normalized.is_empty()
            && normalized.len() <= Self::MAX_LEN
            && normalized.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        match well_formed {
            true => Ok(Self(normalized)),
            false => Err(format!("Invalid SettlementMethod: {s}")),
        }
    }
}

/// One guest's declared quantities plus tip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Claim {
    pub id: ClaimId,
    pub bill_id: BillId,
    pub guest_name: String,
    pub session_id: SessionId,
    #[serde(default)]
    pub item_quantities: ItemQuantities,
    pub tip_amount: f64,
    pub status: ClaimStatus,
    pub received_confirmed: bool,
    pub settlement_method: Option<SettlementMethod>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Claim {
    pub fn is_paid(&self) -> bool {
        self.status == ClaimStatus::Paid
    }

    /// SELECTING and not yet past its expiry.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == ClaimStatus::Selecting && self.expires_at > now
    }
}

/// The single change applied to a session's SELECTING claim by one upsert.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ClaimMutation {
    ItemQuantity { item_id: ItemId, quantity: f64 },
    Tip(f64),
}

#[derive(Debug, Deserialize)]
pub(crate) struct PostItemClaimRequest {
    pub bill_id: Option<String>,
    pub item_id: Option<String>,
    pub session_id: Option<String>,
    pub guest_name: Option<String>,
    pub quantity: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PostTipRequest {
    pub bill_id: Option<String>,
    pub session_id: Option<String>,
    pub guest_name: Option<String>,
    pub tip_amount: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PostSubmitRequest {
    pub settlement_method: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ClaimView {
    #[serde(flatten)]
    pub claim: Claim,
    pub total: f64,
}

#[derive(Debug, Default, PartialEq, Serialize)]
pub(crate) struct ClaimCounts {
    pub total: usize,
    pub selecting: usize,
    pub paid: usize,
}

#[derive(Debug, Default, PartialEq, Serialize)]
pub(crate) struct ClaimTotals {
    pub selecting: f64,
    pub paid: f64,
    pub tips: f64,
}

/// Live/debug read of a bill: every PAID claim and every live SELECTING claim.
#[derive(Debug, Serialize)]
pub(crate) struct LiveView {
    pub bill_id: BillId,
    pub counts: ClaimCounts,
    pub totals: ClaimTotals,
    pub claims: Vec<ClaimView>,
    pub items: Vec<ItemView>,
    /// set when claims could not be read and the view is empty for that reason
    pub degraded: bool,
}

/// Payer console fold over a bill.
#[derive(Debug, Serialize)]
pub(crate) struct BillSummary {
    pub bill_id: BillId,
    pub total_amount: f64,
    pub claimed_amount: f64,
    pub received_amount: f64,
    pub claims: Vec<ClaimView>,
}
