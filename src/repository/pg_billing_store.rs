use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{json, Map, Value};
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::{
    error::{AppError, AppResult},
    models::{
        Invoice, InvoiceItem, Lease, LeaseCharge, LeaseStatus, NewInvoice, NewInvoiceItem,
        NewNotification,
    },
    repository::{
        billing_store::{BillingStore, BillingTx, InvoiceFilter},
        table_service::{
            create_row, decode_row, decode_rows, find_row, list_rows, lock_row, map_db_error,
            update_row,
        },
    },
};

const PREVIOUS_CHARGE_ITEM_SQL: &str = "SELECT row_to_json(i) AS row
     FROM invoice_items i
     JOIN invoices v ON v.id = i.invoice_id
     WHERE v.lease_id = $1::uuid
       AND i.lease_charge_id = $2::uuid
       AND v.period_end <= $3
       AND v.status::text <> 'void'
     ORDER BY v.period_start DESC, i.created_at DESC
     LIMIT 1";

const PREVIOUS_CONFIRMED_METER_END_SQL: &str = "SELECT i.meter_end::float8 AS meter_end
     FROM invoice_items i
     JOIN invoices v ON v.id = i.invoice_id
     WHERE v.lease_id = $1::uuid
       AND i.lease_charge_id = $2::uuid
       AND v.period_end <= $3
       AND v.status::text <> 'void'
       AND i.status::text = 'confirmed'
       AND i.meter_end IS NOT NULL
     ORDER BY v.period_start DESC, i.created_at DESC
     LIMIT 1";

#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
    billing_manager_roles: Arc<Vec<String>>,
}

impl PgBillingStore {
    pub fn new(pool: PgPool, billing_manager_roles: Vec<String>) -> Self {
        Self {
            pool,
            billing_manager_roles: Arc::new(billing_manager_roles),
        }
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn begin(&self) -> AppResult<Box<dyn BillingTx>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Dependency(format!("txn begin: {e}")))?;
        Ok(Box::new(PgBillingTx {
            tx,
            billing_manager_roles: self.billing_manager_roles.clone(),
        }))
    }

    async fn list_active_leases(&self, organization_id: Option<&str>) -> AppResult<Vec<Lease>> {
        let mut filters = Map::new();
        filters.insert(
            "lease_status".to_string(),
            Value::String(LeaseStatus::Active.as_str().to_string()),
        );
        if let Some(org_id) = organization_id {
            filters.insert(
                "organization_id".to_string(),
                Value::String(org_id.to_string()),
            );
        }
        let rows = list_rows(&self.pool, "leases", Some(&filters), 5000, "start_date", true).await?;
        decode_rows("leases", rows)
    }

    async fn get_lease(&self, lease_id: &str) -> AppResult<Option<Lease>> {
        find_row(&self.pool, "leases", lease_id)
            .await?
            .map(|row| decode_row("leases", row))
            .transpose()
    }

    async fn list_active_charges(&self, lease_id: &str) -> AppResult<Vec<LeaseCharge>> {
        let mut filters = Map::new();
        filters.insert("lease_id".to_string(), Value::String(lease_id.to_string()));
        filters.insert("is_active".to_string(), Value::Bool(true));
        let rows = list_rows(
            &self.pool,
            "lease_charges",
            Some(&filters),
            500,
            "created_at",
            true,
        )
        .await?;
        decode_rows("lease_charges", rows)
    }

    async fn latest_invoice(&self, lease_id: &str) -> AppResult<Option<Invoice>> {
        let mut filters = Map::new();
        filters.insert("lease_id".to_string(), Value::String(lease_id.to_string()));
        let rows = list_rows(&self.pool, "invoices", Some(&filters), 1, "period_start", false).await?;
        rows.into_iter()
            .next()
            .map(|row| decode_row("invoices", row))
            .transpose()
    }

    async fn get_invoice(&self, invoice_id: &str) -> AppResult<Option<Invoice>> {
        find_row(&self.pool, "invoices", invoice_id)
            .await?
            .map(|row| decode_row("invoices", row))
            .transpose()
    }

    async fn list_invoice_items(&self, invoice_id: &str) -> AppResult<Vec<InvoiceItem>> {
        let mut filters = Map::new();
        filters.insert(
            "invoice_id".to_string(),
            Value::String(invoice_id.to_string()),
        );
        let rows = list_rows(
            &self.pool,
            "invoice_items",
            Some(&filters),
            500,
            "created_at",
            true,
        )
        .await?;
        decode_rows("invoice_items", rows)
    }

    async fn list_invoices(&self, filter: &InvoiceFilter) -> AppResult<Vec<Invoice>> {
        let mut filters = Map::new();
        filters.insert(
            "organization_id".to_string(),
            Value::String(filter.organization_id.clone()),
        );
        if let Some(lease_id) = &filter.lease_id {
            filters.insert("lease_id".to_string(), Value::String(lease_id.clone()));
        }
        if let Some(status) = filter.status {
            filters.insert(
                "status".to_string(),
                Value::String(status.as_str().to_string()),
            );
        }
        let rows = list_rows(
            &self.pool,
            "invoices",
            Some(&filters),
            filter.limit,
            "period_start",
            false,
        )
        .await?;
        decode_rows("invoices", rows)
    }
}

struct PgBillingTx {
    tx: Transaction<'static, Postgres>,
    billing_manager_roles: Arc<Vec<String>>,
}

#[async_trait]
impl BillingTx for PgBillingTx {
    async fn insert_invoice(&mut self, invoice: &NewInvoice) -> AppResult<Invoice> {
        let payload = to_payload(invoice)?;
        let row = create_row(&mut *self.tx, "invoices", &payload).await?;
        decode_row("invoices", row)
    }

    async fn insert_invoice_item(&mut self, item: &NewInvoiceItem) -> AppResult<InvoiceItem> {
        let payload = to_payload(item)?;
        let row = create_row(&mut *self.tx, "invoice_items", &payload).await?;
        decode_row("invoice_items", row)
    }

    async fn insert_notification(&mut self, notification: &NewNotification) -> AppResult<()> {
        let payload = to_payload(notification)?;
        create_row(&mut *self.tx, "notifications", &payload).await?;
        Ok(())
    }

    async fn list_billing_manager_ids(&mut self, organization_id: &str) -> AppResult<Vec<String>> {
        if self.billing_manager_roles.is_empty() {
            return Ok(Vec::new());
        }
        let mut filters = Map::new();
        filters.insert(
            "organization_id".to_string(),
            Value::String(organization_id.to_string()),
        );
        filters.insert(
            "role__in".to_string(),
            Value::Array(
                self.billing_manager_roles
                    .iter()
                    .cloned()
                    .map(Value::String)
                    .collect(),
            ),
        );
        let rows = list_rows(
            &mut *self.tx,
            "organization_members",
            Some(&filters),
            500,
            "created_at",
            true,
        )
        .await?;

        let mut user_ids = rows
            .iter()
            .filter_map(|row| row.get("user_id").and_then(Value::as_str))
            .map(ToOwned::to_owned)
            .collect::<Vec<_>>();
        user_ids.sort_unstable();
        user_ids.dedup();
        Ok(user_ids)
    }

    async fn previous_charge_item(
        &mut self,
        lease_id: &str,
        lease_charge_id: &str,
        before: NaiveDate,
    ) -> AppResult<Option<InvoiceItem>> {
        let row = sqlx::query(PREVIOUS_CHARGE_ITEM_SQL)
            .bind(lease_id)
            .bind(lease_charge_id)
            .bind(before)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_db_error)?;

        row.and_then(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
            .map(|value| decode_row("invoice_items", value))
            .transpose()
    }

    async fn previous_confirmed_meter_end(
        &mut self,
        lease_id: &str,
        lease_charge_id: &str,
        before: NaiveDate,
    ) -> AppResult<Option<f64>> {
        let row = sqlx::query(PREVIOUS_CONFIRMED_METER_END_SQL)
            .bind(lease_id)
            .bind(lease_charge_id)
            .bind(before)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_db_error)?;

        Ok(row.and_then(|row| row.try_get::<Option<f64>, _>("meter_end").ok().flatten()))
    }

    async fn lock_invoice(&mut self, invoice_id: &str) -> AppResult<Option<Invoice>> {
        lock_row(&mut *self.tx, "invoices", invoice_id)
            .await?
            .map(|row| decode_row("invoices", row))
            .transpose()
    }

    async fn get_invoice_item(&mut self, item_id: &str) -> AppResult<Option<InvoiceItem>> {
        find_row(&mut *self.tx, "invoice_items", item_id)
            .await?
            .map(|row| decode_row("invoice_items", row))
            .transpose()
    }

    async fn list_invoice_items(&mut self, invoice_id: &str) -> AppResult<Vec<InvoiceItem>> {
        let mut filters = Map::new();
        filters.insert(
            "invoice_id".to_string(),
            Value::String(invoice_id.to_string()),
        );
        let rows = list_rows(
            &mut *self.tx,
            "invoice_items",
            Some(&filters),
            500,
            "created_at",
            true,
        )
        .await?;
        decode_rows("invoice_items", rows)
    }

    async fn update_invoice_item(&mut self, item: &InvoiceItem) -> AppResult<()> {
        let payload = object(json!({
            "status": item.status,
            "meter_start": item.meter_start,
            "meter_end": item.meter_end,
            "quantity": item.quantity,
            "amount_cents": item.amount_cents,
        }));
        update_row(&mut *self.tx, "invoice_items", &item.id, &payload).await?;
        Ok(())
    }

    async fn update_invoice(&mut self, invoice: &Invoice) -> AppResult<()> {
        let payload = object(json!({
            "status": invoice.status,
            "total_amount_cents": invoice.total_amount_cents,
            "due_date": invoice.due_date,
            "issued_at": invoice.issued_at,
            "paid_at": invoice.paid_at,
        }));
        update_row(&mut *self.tx, "invoices", &invoice.id, &payload).await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let PgBillingTx { tx, .. } = *self;
        tx.commit().await.map_err(map_db_error)
    }
}

fn to_payload<T: Serialize>(record: &T) -> AppResult<Map<String, Value>> {
    match serde_json::to_value(record) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AppError::Internal(
            "Record did not serialize to an object.".to_string(),
        )),
        Err(error) => Err(AppError::Internal(format!(
            "Could not serialize record: {error}"
        ))),
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
