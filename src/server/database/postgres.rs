use std::future::Future;
use std::time::Duration;
use chrono::{DateTime, Utc};
use log::{error, warn};
use serde_json::Value;
use tokio::time;
use tokio_postgres::types::{FromSql, ToSql};
use tokio_postgres::{Client, Row};
use crate::server::database::pool::{Connection, Pool, DB_TIMEOUT_SECONDS};
use crate::server::database::{ClaimUpsert, LedgerStore, StoreError};
use crate::server::model::bill::Bill;
use crate::server::model::claim::{Claim, ClaimMutation, ItemQuantities, SettlementMethod};
use crate::server::model::config::ReceiptGate;
use crate::server::model::item::{LineItem, LineItemPatch};
use crate::server::model::{BillId, ClaimId, ItemId, SessionId};

const ITEM_COLUMN_LEN: usize = 8;

const UPSERT_ITEM_QUANTITY: &str = r#"
    INSERT INTO claims (id, bill_id, session_id, guest_name, item_quantities, tip_amount,
                        status, received_confirmed, expires_at, created_at, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, 'SELECTING', FALSE, $7, $8, $8)
    ON CONFLICT (bill_id, session_id) WHERE status = 'SELECTING'
    DO UPDATE SET
        guest_name = EXCLUDED.guest_name,
        item_quantities = CASE
            WHEN $10::float8 > 0 THEN
                (CASE WHEN claims.expires_at <= $8 THEN '{}'::jsonb ELSE claims.item_quantities END)
                || jsonb_build_object($9::text, $10::float8)
            ELSE
                (CASE WHEN claims.expires_at <= $8 THEN '{}'::jsonb ELSE claims.item_quantities END)
                - $9::text
        END,
        tip_amount = CASE WHEN claims.expires_at <= $8 THEN 0 ELSE claims.tip_amount END,
        received_confirmed = claims.received_confirmed AND claims.expires_at > $8,
        settlement_method = CASE WHEN claims.expires_at <= $8 THEN NULL ELSE claims.settlement_method END,
        expires_at = CASE
            WHEN claims.expires_at <= $8 THEN EXCLUDED.expires_at
            ELSE GREATEST(claims.expires_at, EXCLUDED.expires_at)
        END,
        updated_at = EXCLUDED.updated_at
    RETURNING *
"#;

const UPSERT_TIP: &str = r#"
    INSERT INTO claims (id, bill_id, session_id, guest_name, item_quantities, tip_amount,
                        status, received_confirmed, expires_at, created_at, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, 'SELECTING', FALSE, $7, $8, $8)
    ON CONFLICT (bill_id, session_id) WHERE status = 'SELECTING'
    DO UPDATE SET
        guest_name = EXCLUDED.guest_name,
        item_quantities = CASE WHEN claims.expires_at <= $8 THEN '{}'::jsonb ELSE claims.item_quantities END,
        tip_amount = EXCLUDED.tip_amount,
        received_confirmed = claims.received_confirmed AND claims.expires_at > $8,
        settlement_method = CASE WHEN claims.expires_at <= $8 THEN NULL ELSE claims.settlement_method END,
        expires_at = CASE
            WHEN claims.expires_at <= $8 THEN EXCLUDED.expires_at
            ELSE GREATEST(claims.expires_at, EXCLUDED.expires_at)
        END,
        updated_at = EXCLUDED.updated_at
    RETURNING *
"#;

/// Ledger on Postgres, with reads and writes on separate pools.
pub(crate) struct PgLedger {
    read_pool: Pool<Client>,
    write_pool: Pool<Client>,
}

impl PgLedger {
    pub fn new(read_pool: Pool<Client>, write_pool: Pool<Client>) -> Self {
        Self { read_pool, write_pool }
    }

    async fn reader(&self) -> Result<Connection<Client>, StoreError> {
        self.read_pool
            .acquire(Duration::from_secs(DB_TIMEOUT_SECONDS))
            .await
            .ok_or(StoreError::Busy)
    }

    async fn writer(&self) -> Result<Connection<Client>, StoreError> {
        self.write_pool
            .acquire(Duration::from_secs(DB_TIMEOUT_SECONDS))
            .await
            .ok_or(StoreError::Busy)
    }
}

/// Run one database call under the statement timeout.
async fn bounded<T, F>(fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, tokio_postgres::Error>>,
{
    match time::timeout(Duration::from_secs(DB_TIMEOUT_SECONDS), fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            error!("database call failed, {}", e);
            Err(StoreError::from(e))
        }
        Err(_) => {
            warn!("database call timed out after {}s", DB_TIMEOUT_SECONDS);
            Err(StoreError::Timeout)
        }
    }
}

/// Named column access, shared by driver rows and rows built by hand in tests.
pub(crate) trait GenericRow {
    fn column<'a, T: FromSql<'a>>(&'a self, name: &str) -> Result<T, StoreError>;
}

impl GenericRow for Row {
    fn column<'a, T: FromSql<'a>>(&'a self, name: &str) -> Result<T, StoreError> {
        Ok(self.try_get(name)?)
    }
}

/// Statement and the parameters it needs beyond the [`ClaimUpsert`] fields.
#[derive(Debug)]
struct UpsertBinding {
    statement: &'static str,
    initial: Value,
    tip: f64,
    /// `($9, $10)` of the quantity upsert
    item: Option<(String, f64)>,
}

impl UpsertBinding {
    fn new(mutation: &ClaimMutation) -> Self {
        match *mutation {
            ClaimMutation::ItemQuantity { item_id, quantity } => Self {
                statement: UPSERT_ITEM_QUANTITY,
                initial: ItemQuantities::from([(item_id, quantity)]).to_json(),
                tip: 0.0,
                item: Some((item_id.to_string(), quantity)),
            },
            ClaimMutation::Tip(tip) => Self {
                statement: UPSERT_TIP,
                initial: ItemQuantities::new().to_json(),
                tip,
                item: None,
            },
        }
    }

    fn params<'a>(&'a self, upsert: &'a ClaimUpsert) -> Vec<&'a (dyn ToSql + Sync)> {
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![
            &upsert.claim_id,
            &upsert.bill_id,
            &upsert.session_id,
            &upsert.guest_name,
            &self.initial,
            &self.tip,
            &upsert.expires_at,
            &upsert.now,
        ];
        if let Some((item_key, quantity)) = &self.item {
            params.push(item_key);
            params.push(quantity);
        }
        params
    }
}

fn bill_from_row<R: GenericRow>(row: &R) -> Result<Bill, StoreError> {
    Ok(Bill {
        id: row.column("id")?,
        share_token: row.column("share_token")?,
        payer_name: row.column("payer_name")?,
        payment_handle: row.column("payment_handle")?,
        image_ref: row.column("image_ref")?,
        restaurant_name: row.column("restaurant_name")?,
        extracted_total: row.column("extracted_total")?,
        created_at: row.column("created_at")?,
        updated_at: row.column("updated_at")?,
    })
}

fn item_from_row<R: GenericRow>(row: &R) -> Result<LineItem, StoreError> {
    Ok(LineItem {
        id: row.column("id")?,
        bill_id: row.column("bill_id")?,
        name: row.column("name")?,
        quantity: row.column("quantity")?,
        price_per_unit: row.column("price_per_unit")?,
        position: row.column("position")?,
        created_at: row.column("created_at")?,
        updated_at: row.column("updated_at")?,
    })
}

fn claim_from_row<R: GenericRow>(row: &R) -> Result<Claim, StoreError> {
    let status: String = row.column("status")?;
    let quantities: Option<Value> = row.column("item_quantities")?;
    let settlement_method: Option<String> = row.column("settlement_method")?;
    Ok(Claim {
        id: row.column("id")?,
        bill_id: row.column("bill_id")?,
        guest_name: row.column("guest_name")?,
        session_id: row.column("session_id")?,
        item_quantities: quantities.map(|q| ItemQuantities::from_json(&q)).unwrap_or_default(),
        tip_amount: row.column("tip_amount")?,
        status: status.parse().map_err(StoreError::Decode)?,
        received_confirmed: row.column("received_confirmed")?,
        settlement_method: settlement_method.and_then(|m| m.parse().ok()),
        expires_at: row.column("expires_at")?,
        created_at: row.column("created_at")?,
        updated_at: row.column("updated_at")?,
    })
}

fn claims_from_rows<R: GenericRow>(rows: &[R]) -> Result<Vec<Claim>, StoreError> {
    rows.iter().map(claim_from_row).collect()
}

impl LedgerStore for PgLedger {
    async fn insert_bill(&self, bill: Bill, items: Vec<LineItem>) -> Result<(), StoreError> {
        let mut conn = self.writer().await?;
        let txn = bounded(conn.transaction()).await?;
        bounded(txn.execute(
            r#"
            INSERT INTO bills (id, share_token, payer_name, payment_handle, image_ref,
                               restaurant_name, extracted_total, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
            &[
                &bill.id,
                &bill.share_token,
                &bill.payer_name,
                &bill.payment_handle,
                &bill.image_ref,
                &bill.restaurant_name,
                &bill.extracted_total,
                &bill.created_at,
                &bill.updated_at,
            ],
        ))
        .await?;

        if !items.is_empty() {
            let mut stmt = "INSERT INTO line_items (id, bill_id, name, quantity, price_per_unit, position, created_at, updated_at) VALUES".to_string();
            let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(items.len() * ITEM_COLUMN_LEN);
            for (i, item) in items.iter().enumerate() {
                let idx = i * ITEM_COLUMN_LEN + 1;
                let maybe_comma = if i != items.len() - 1 { "," } else { "" };
                let placeholders = (idx..idx + ITEM_COLUMN_LEN)
                    .map(|p| format!("${p}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                stmt.push_str(&format!(" ({placeholders}){maybe_comma}"));
                params.extend([
                    &item.id as &(dyn ToSql + Sync),
                    &item.bill_id,
                    &item.name,
                    &item.quantity,
                    &item.price_per_unit,
                    &item.position,
                    &item.created_at,
                    &item.updated_at,
                ]);
            }
            bounded(txn.execute(&stmt, params.as_slice())).await?;
        }
        bounded(txn.commit()).await
    }

    async fn get_bill(&self, bill_id: BillId) -> Result<Option<Bill>, StoreError> {
        let conn = self.reader().await?;
        let row = bounded(conn.query_opt("SELECT * FROM bills WHERE id = $1", &[&bill_id])).await?;
        row.as_ref().map(bill_from_row).transpose()
    }

    async fn get_bill_by_share_token(&self, token: &str) -> Result<Option<Bill>, StoreError> {
        let conn = self.reader().await?;
        let row = bounded(conn.query_opt("SELECT * FROM bills WHERE share_token = $1", &[&token])).await?;
        row.as_ref().map(bill_from_row).transpose()
    }

    async fn rename_bill(&self, bill_id: BillId, restaurant_name: Option<String>, now: DateTime<Utc>) -> Result<Option<Bill>, StoreError> {
        let conn = self.writer().await?;
        let row = bounded(conn.query_opt(
            "UPDATE bills SET restaurant_name = $2, updated_at = $3 WHERE id = $1 RETURNING *",
            &[&bill_id, &restaurant_name, &now],
        ))
        .await?;
        row.as_ref().map(bill_from_row).transpose()
    }

    async fn list_items(&self, bill_id: BillId) -> Result<Vec<LineItem>, StoreError> {
        let conn = self.reader().await?;
        let rows = bounded(conn.query(
            "SELECT * FROM line_items WHERE bill_id = $1 ORDER BY position, created_at",
            &[&bill_id],
        ))
        .await?;
        rows.iter().map(item_from_row).collect()
    }

    async fn insert_item(&self, item: LineItem) -> Result<(), StoreError> {
        let conn = self.writer().await?;
        bounded(conn.execute(
            r#"
            INSERT INTO line_items (id, bill_id, name, quantity, price_per_unit, position, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
            &[
                &item.id,
                &item.bill_id,
                &item.name,
                &item.quantity,
                &item.price_per_unit,
                &item.position,
                &item.created_at,
                &item.updated_at,
            ],
        ))
        .await
        .map(|_| ())
    }

    async fn update_item(&self, bill_id: BillId, item_id: ItemId, patch: LineItemPatch, now: DateTime<Utc>) -> Result<Option<LineItem>, StoreError> {
        let conn = self.writer().await?;
        let row = bounded(conn.query_opt(
            r#"
            UPDATE line_items
            SET name = COALESCE($3, name),
                quantity = COALESCE($4, quantity),
                price_per_unit = COALESCE($5, price_per_unit),
                updated_at = $6
            WHERE bill_id = $1 AND id = $2
            RETURNING *
            "#,
            &[&bill_id, &item_id, &patch.name, &patch.quantity, &patch.price_per_unit, &now],
        ))
        .await?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn delete_item(&self, bill_id: BillId, item_id: ItemId) -> Result<bool, StoreError> {
        let conn = self.writer().await?;
        let deleted = bounded(conn.execute(
            "DELETE FROM line_items WHERE bill_id = $1 AND id = $2",
            &[&bill_id, &item_id],
        ))
        .await?;
        Ok(deleted > 0)
    }

    async fn list_claims(&self, bill_id: BillId) -> Result<Vec<Claim>, StoreError> {
        let conn = self.reader().await?;
        let rows = bounded(conn.query(
            "SELECT * FROM claims WHERE bill_id = $1 ORDER BY created_at, id",
            &[&bill_id],
        ))
        .await?;
        claims_from_rows(&rows)
    }

    async fn get_claim(&self, claim_id: ClaimId) -> Result<Option<Claim>, StoreError> {
        let conn = self.reader().await?;
        let row = bounded(conn.query_opt("SELECT * FROM claims WHERE id = $1", &[&claim_id])).await?;
        row.as_ref().map(claim_from_row).transpose()
    }

    async fn upsert_selecting_claim(&self, upsert: ClaimUpsert) -> Result<Claim, StoreError> {
        let binding = UpsertBinding::new(&upsert.mutation);
        let conn = self.writer().await?;
        let row = bounded(conn.query_one(binding.statement, &binding.params(&upsert))).await?;
        claim_from_row(&row)
    }

    async fn mark_paid(&self, claim_id: ClaimId, settlement_method: Option<SettlementMethod>, now: DateTime<Utc>) -> Result<Option<Claim>, StoreError> {
        let conn = self.writer().await?;
        let method = settlement_method.as_ref().map(SettlementMethod::as_str);
        let row = bounded(conn.query_opt(
            r#"
            UPDATE claims
            SET status = 'PAID', settlement_method = $2, updated_at = $3
            WHERE id = $1 AND status = 'SELECTING' AND expires_at > $3
            RETURNING *
            "#,
            &[&claim_id, &method, &now],
        ))
        .await?;
        row.as_ref().map(claim_from_row).transpose()
    }

    async fn set_received(&self, claim_id: ClaimId, received: bool, gate: ReceiptGate, now: DateTime<Utc>) -> Result<Option<Claim>, StoreError> {
        let conn = self.writer().await?;
        let any_status = gate == ReceiptGate::Any;
        let row = bounded(conn.query_opt(
            r#"
            UPDATE claims
            SET received_confirmed = $2, updated_at = $3
            WHERE id = $1
              AND ((status = 'SELECTING' AND expires_at > $3) OR ($4 AND status = 'PAID'))
            RETURNING *
            "#,
            &[&claim_id, &received, &now, &any_status],
        ))
        .await?;
        row.as_ref().map(claim_from_row).transpose()
    }

    async fn delete_selecting_claims(&self, bill_id: BillId, session_id: SessionId) -> Result<u64, StoreError> {
        let conn = self.writer().await?;
        bounded(conn.execute(
            "DELETE FROM claims WHERE bill_id = $1 AND session_id = $2 AND status = 'SELECTING'",
            &[&bill_id, &session_id],
        ))
        .await
    }

    async fn delete_expired_claims(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ClaimId>, StoreError> {
        let conn = self.writer().await?;
        let rows = bounded(conn.query(
            r#"
            DELETE FROM claims
            WHERE status = 'SELECTING' AND expires_at <= $1 AND id IN (
                SELECT id
                FROM claims
                WHERE status = 'SELECTING' AND expires_at <= $1
                ORDER BY expires_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id
            "#,
            &[&now, &limit],
        ))
        .await?;
        rows.iter()
            .map(|row| row.column("id"))
            .collect()
    }
}
