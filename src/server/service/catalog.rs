//! Bill intake and payer edits of bills and line items.

use std::sync::Arc;
use log::info;
use rand::distributions::Alphanumeric;
use rand::Rng;
use uuid::Uuid;
use crate::server::database::LedgerStore;
use crate::server::model::bill::{Bill, GetBillResponse, PatchBillRequest, PostBillsRequest};
use crate::server::model::config::{ClaimPolicy, ItemEditPolicy};
use crate::server::model::item::{LineItem, LineItemPatch, NewLineItem};
use crate::server::model::{BillId, ItemId};
use crate::server::service::reconciler::{item_views, CountedClaims};
use crate::server::service::session::QUANTITY_STEP;
use crate::server::service::ServiceError;
use crate::server::util::time::helper;
use crate::server::util::validate::{
    check_granularity, check_range, parse_identifier, require, sanitize_text, ValidationError, MAX_NAME_LEN,
};

pub(crate) const SHARE_TOKEN_LEN: usize = 32;
const MAX_ITEM_NAME_LEN: usize = 200;
const MAX_REF_LEN: usize = 500;
const MAX_ITEM_QUANTITY: f64 = 1_000.0;
const MAX_PRICE: f64 = 100_000.0;

fn new_share_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SHARE_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Fields of a new line item once every check passed.
struct ItemFields {
    name: String,
    quantity: f64,
    price_per_unit: f64,
}

fn check_item_quantity(quantity: f64) -> Result<f64, ValidationError> {
    let quantity = check_range(quantity, QUANTITY_STEP, MAX_ITEM_QUANTITY, "quantity")?;
    check_granularity(quantity, QUANTITY_STEP, "quantity")
}

fn check_price(price: f64) -> Result<f64, ValidationError> {
    check_range(price, 0.0, MAX_PRICE, "price_per_unit")
}

fn validate_new_items(items: &[NewLineItem]) -> Result<Vec<ItemFields>, ValidationError> {
    let present = items
        .iter()
        .map(|i| -> Result<_, ValidationError> {
            Ok((
                require(i.name.as_deref(), "name")?,
                require(i.quantity, "quantity")?,
                require(i.price_per_unit, "price_per_unit")?,
            ))
        })
        .collect::<Result<Vec<_>, ValidationError>>()?;
    let ranged = present
        .into_iter()
        .map(|(name, quantity, price)| -> Result<_, ValidationError> {
            Ok((name, check_item_quantity(quantity)?, check_price(price)?))
        })
        .collect::<Result<Vec<_>, ValidationError>>()?;
    ranged
        .into_iter()
        .map(|(name, quantity, price_per_unit)| -> Result<_, ValidationError> {
            Ok(ItemFields {
                name: sanitize_text(name, MAX_ITEM_NAME_LEN, "name")?,
                quantity,
                price_per_unit,
            })
        })
        .collect()
}

fn validate_patch(patch: &LineItemPatch) -> Result<LineItemPatch, ValidationError> {
    if patch.is_empty() {
        return Err(ValidationError::MissingField { field: "name|quantity|price_per_unit" });
    }
    let quantity = patch.quantity.map(check_item_quantity).transpose()?;
    let price_per_unit = patch.price_per_unit.map(check_price).transpose()?;
    let name = patch
        .name
        .as_deref()
        .map(|n| sanitize_text(n, MAX_ITEM_NAME_LEN, "name"))
        .transpose()?;
    Ok(LineItemPatch { name, quantity, price_per_unit })
}

pub(crate) struct BillCatalog<S> {
    store: Arc<S>,
    policy: ClaimPolicy,
}

impl<S: LedgerStore> BillCatalog<S> {
    pub fn new(store: Arc<S>, policy: ClaimPolicy) -> Self {
        Self { store, policy }
    }

    /// Record an extracted receipt: the bill and all of its items land together or not at all.
    pub async fn create_bill(&self, req: &PostBillsRequest) -> Result<GetBillResponse, ServiceError> {
        let payer_name = require(req.payer_name.as_deref(), "payer_name")?;
        let payment_handle = require(req.payment_handle.as_deref(), "payment_handle")?;
        let image_ref = require(req.image_ref.as_deref(), "image_ref")?;
        if req.items.is_empty() {
            return Err(ValidationError::MissingField { field: "items" }.into());
        }
        let extracted_total = req
            .extracted_total
            .map(|t| check_range(t, 0.0, MAX_PRICE * MAX_ITEM_QUANTITY, "extracted_total"))
            .transpose()?;
        let items = validate_new_items(&req.items)?;
        let payer_name = sanitize_text(payer_name, MAX_NAME_LEN, "payer_name")?;
        let payment_handle = sanitize_text(payment_handle, MAX_NAME_LEN, "payment_handle")?;
        let image_ref = sanitize_text(image_ref, MAX_REF_LEN, "image_ref")?;
        let restaurant_name = req
            .restaurant_name
            .as_deref()
            .map(|n| sanitize_text(n, MAX_NAME_LEN, "restaurant_name"))
            .transpose()?;

        let now = helper::get_utc_now();
        let bill = Bill {
            id: Uuid::new_v4(),
            share_token: new_share_token(),
            payer_name,
            payment_handle,
            image_ref,
            restaurant_name,
            extracted_total,
            created_at: now,
            updated_at: now,
        };
        let items = items
            .into_iter()
            .enumerate()
            .map(|(position, fields)| LineItem {
                id: Uuid::new_v4(),
                bill_id: bill.id,
                name: fields.name,
                quantity: fields.quantity,
                price_per_unit: fields.price_per_unit,
                position: position as i32,
                created_at: now,
                updated_at: now,
            })
            .collect::<Vec<_>>();

        self.store.insert_bill(bill.clone(), items.clone()).await?;
        info!("bill={} created with {} item(s)", bill.id, items.len());
        Ok(GetBillResponse { items: item_views(items, &[], CountedClaims::PaidOnly), bill })
    }

    pub async fn get_bill(&self, bill_id: &str) -> Result<GetBillResponse, ServiceError> {
        let bill_id = parse_identifier(bill_id, "bill_id")?;
        let bill = self.store.get_bill(bill_id).await?.ok_or(ServiceError::NotFound("bill"))?;
        self.with_items(bill).await
    }

    pub async fn get_bill_by_share_token(&self, token: &str) -> Result<GetBillResponse, ServiceError> {
        let well_formed = token.len() == SHARE_TOKEN_LEN && token.chars().all(|c| c.is_ascii_alphanumeric());
        if !well_formed {
            return Err(ValidationError::InvalidIdentifier { field: "share_token" }.into());
        }
        let bill = self
            .store
            .get_bill_by_share_token(token)
            .await?
            .ok_or(ServiceError::NotFound("bill"))?;
        self.with_items(bill).await
    }

    /// Items with what is left to claim against PAID claims only.
    async fn with_items(&self, bill: Bill) -> Result<GetBillResponse, ServiceError> {
        let items = self.store.list_items(bill.id).await?;
        let claims = self.store.list_claims(bill.id).await?;
        Ok(GetBillResponse { items: item_views(items, &claims, CountedClaims::PaidOnly), bill })
    }

    pub async fn rename_bill(&self, bill_id: &str, req: &PatchBillRequest) -> Result<Bill, ServiceError> {
        let bill_id = parse_identifier(bill_id, "bill_id")?;
        let restaurant_name = req
            .restaurant_name
            .as_deref()
            .map(|n| sanitize_text(n, MAX_NAME_LEN, "restaurant_name"))
            .transpose()?;
        self.store
            .rename_bill(bill_id, restaurant_name, helper::get_utc_now())
            .await?
            .ok_or(ServiceError::NotFound("bill"))
    }

    pub async fn add_item(&self, bill_id: &str, req: &NewLineItem) -> Result<LineItem, ServiceError> {
        let bill_id = parse_identifier(bill_id, "bill_id")?;
        let fields = validate_new_items(std::slice::from_ref(req))?
            .pop()
            .ok_or(ValidationError::MissingField { field: "item" })?;
        self.store.get_bill(bill_id).await?.ok_or(ServiceError::NotFound("bill"))?;

        let position = self
            .store
            .list_items(bill_id)
            .await?
            .iter()
            .map(|i| i.position + 1)
            .max()
            .unwrap_or(0);
        let now = helper::get_utc_now();
        let item = LineItem {
            id: Uuid::new_v4(),
            bill_id,
            name: fields.name,
            quantity: fields.quantity,
            price_per_unit: fields.price_per_unit,
            position,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_item(item.clone()).await?;
        Ok(item)
    }

    pub async fn update_item(&self, bill_id: &str, item_id: &str, patch: &LineItemPatch) -> Result<LineItem, ServiceError> {
        let bill_id = parse_identifier(bill_id, "bill_id")?;
        let item_id = parse_identifier(item_id, "item_id")?;
        let patch = validate_patch(patch)?;
        self.ensure_editable(bill_id, item_id).await?;
        self.store
            .update_item(bill_id, item_id, patch, helper::get_utc_now())
            .await?
            .ok_or(ServiceError::NotFound("item"))
    }

    /// Claims naming a deleted item keep their entry; it just stops counting.
    pub async fn delete_item(&self, bill_id: &str, item_id: &str) -> Result<(), ServiceError> {
        let bill_id = parse_identifier(bill_id, "bill_id")?;
        let item_id = parse_identifier(item_id, "item_id")?;
        self.ensure_editable(bill_id, item_id).await?;
        match self.store.delete_item(bill_id, item_id).await? {
            true => {
                info!("bill={} item={} deleted", bill_id, item_id);
                Ok(())
            }
            false => Err(ServiceError::NotFound("item")),
        }
    }

    async fn ensure_editable(&self, bill_id: BillId, item_id: ItemId) -> Result<(), ServiceError> {
        if self.policy.edit_policy == ItemEditPolicy::Permissive {
            return Ok(());
        }
        let counted = CountedClaims::PaidAndLive(helper::get_utc_now());
        let claimed = self
            .store
            .list_claims(bill_id)
            .await?
            .iter()
            .any(|c| counted.counts(c) && c.item_quantities.get(&item_id) > 0.0);
        match claimed {
            true => Err(ServiceError::Conflict("item already has claims against it")),
            false => Ok(()),
        }
    }
}
