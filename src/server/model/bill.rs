use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::server::model::item::{ItemView, NewLineItem};
use crate::server::model::BillId;

/// One uploaded receipt. The share token is what guests see; the id stays internal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Bill {
    pub id: BillId,
    pub share_token: String,
    pub payer_name: String,
    pub payment_handle: String,
    pub image_ref: String,
    pub restaurant_name: Option<String>,
    pub extracted_total: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PostBillsRequest {
    pub payer_name: Option<String>,
    pub payment_handle: Option<String>,
    pub image_ref: Option<String>,
    pub restaurant_name: Option<String>,
    pub extracted_total: Option<f64>,
    #[serde(default)]
    pub items: Vec<NewLineItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PatchBillRequest {
    pub restaurant_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct GetBillResponse {
    pub bill: Bill,
    pub items: Vec<ItemView>,
}
