use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{
    error::AppResult,
    models::{
        Invoice, InvoiceItem, InvoiceStatus, Lease, LeaseCharge, NewInvoice, NewInvoiceItem,
        NewNotification,
    },
};

#[derive(Debug, Clone, Default)]
pub struct InvoiceFilter {
    pub organization_id: String,
    pub lease_id: Option<String>,
    /// Stored status only; the overdue view is derived by the caller.
    pub status: Option<InvoiceStatus>,
    pub limit: i64,
}

/// Persistence boundary of the billing engine.
///
/// Plain reads run outside any transaction. Anything that must commit
/// atomically goes through the unit of work returned by [`BillingStore::begin`].
#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn begin(&self) -> AppResult<Box<dyn BillingTx>>;

    async fn list_active_leases(&self, organization_id: Option<&str>) -> AppResult<Vec<Lease>>;

    async fn get_lease(&self, lease_id: &str) -> AppResult<Option<Lease>>;

    async fn list_active_charges(&self, lease_id: &str) -> AppResult<Vec<LeaseCharge>>;

    /// Invoice with the latest period for the lease, void invoices included.
    async fn latest_invoice(&self, lease_id: &str) -> AppResult<Option<Invoice>>;

    async fn get_invoice(&self, invoice_id: &str) -> AppResult<Option<Invoice>>;

    async fn list_invoice_items(&self, invoice_id: &str) -> AppResult<Vec<InvoiceItem>>;

    async fn list_invoices(&self, filter: &InvoiceFilter) -> AppResult<Vec<Invoice>>;
}

/// One atomic write unit. Dropping it without `commit` rolls everything back.
#[async_trait]
pub trait BillingTx: Send {
    /// Fails with `AppError::Conflict` when the lease already has an invoice
    /// for the exact same period.
    async fn insert_invoice(&mut self, invoice: &NewInvoice) -> AppResult<Invoice>;

    async fn insert_invoice_item(&mut self, item: &NewInvoiceItem) -> AppResult<InvoiceItem>;

    async fn insert_notification(&mut self, notification: &NewNotification) -> AppResult<()>;

    async fn list_billing_manager_ids(&mut self, organization_id: &str) -> AppResult<Vec<String>>;

    /// Latest item for the charge on a non-void invoice of the lease whose
    /// period ends on or before `before`.
    async fn previous_charge_item(
        &mut self,
        lease_id: &str,
        lease_charge_id: &str,
        before: NaiveDate,
    ) -> AppResult<Option<InvoiceItem>>;

    /// Like `previous_charge_item`, restricted to confirmed readings.
    async fn previous_confirmed_meter_end(
        &mut self,
        lease_id: &str,
        lease_charge_id: &str,
        before: NaiveDate,
    ) -> AppResult<Option<f64>>;

    /// Reads the invoice and holds it against concurrent writers until the
    /// unit of work ends.
    async fn lock_invoice(&mut self, invoice_id: &str) -> AppResult<Option<Invoice>>;

    async fn get_invoice_item(&mut self, item_id: &str) -> AppResult<Option<InvoiceItem>>;

    async fn list_invoice_items(&mut self, invoice_id: &str) -> AppResult<Vec<InvoiceItem>>;

    /// Persists the reading fields (status, meters, quantity, amount).
    async fn update_invoice_item(&mut self, item: &InvoiceItem) -> AppResult<()>;

    /// Persists status, total and lifecycle stamps.
    async fn update_invoice(&mut self, invoice: &Invoice) -> AppResult<()>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}
