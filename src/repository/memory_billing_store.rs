//! Volatile billing store for development mode and tests.
//!
//! A unit of work holds the store lock for its whole lifetime and mutates a
//! working copy of the state; `commit` swaps the copy in, dropping discards it.
//! Units of work are therefore fully serialized.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        Invoice, InvoiceItem, InvoiceItemStatus, InvoiceStatus, Lease, LeaseCharge,
        LeaseStatus, NewInvoice, NewInvoiceItem, NewNotification,
    },
    repository::billing_store::{BillingStore, BillingTx, InvoiceFilter},
};

#[derive(Debug, Clone, Deserialize)]
struct Membership {
    organization_id: String,
    user_id: String,
    role: String,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    leases: Vec<Lease>,
    charges: Vec<LeaseCharge>,
    invoices: Vec<Invoice>,
    items: Vec<InvoiceItem>,
    notifications: Vec<NewNotification>,
    members: Vec<Membership>,
}

impl MemoryState {
    fn previous_items<'a>(
        &'a self,
        lease_id: &'a str,
        lease_charge_id: &'a str,
        before: NaiveDate,
    ) -> impl Iterator<Item = (&'a Invoice, &'a InvoiceItem)> + 'a {
        self.items
            .iter()
            .filter(move |item| item.lease_charge_id.as_deref() == Some(lease_charge_id))
            .filter_map(move |item| {
                self.invoices
                    .iter()
                    .find(|invoice| invoice.id == item.invoice_id)
                    .filter(|invoice| {
                        invoice.lease_id == lease_id
                            && invoice.status != InvoiceStatus::Void
                            && invoice.period_end <= before
                    })
                    .map(|invoice| (invoice, item))
            })
    }
}

#[derive(Clone)]
pub struct MemoryBillingStore {
    state: Arc<Mutex<MemoryState>>,
    billing_manager_roles: Arc<Vec<String>>,
}

/// Fixture for a development store: leases, their charges and the
/// organization members who receive invoice notifications.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemorySeed {
    #[serde(default)]
    pub leases: Vec<Lease>,
    #[serde(default)]
    pub charges: Vec<LeaseCharge>,
    #[serde(default)]
    members: Vec<Membership>,
}

impl MemorySeed {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

impl MemoryBillingStore {
    pub fn new(billing_manager_roles: Vec<String>) -> Self {
        Self::with_seed(billing_manager_roles, MemorySeed::default())
    }

    pub fn with_seed(billing_manager_roles: Vec<String>, seed: MemorySeed) -> Self {
        let state = MemoryState {
            leases: seed.leases,
            charges: seed.charges,
            members: seed.members,
            ..MemoryState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            billing_manager_roles: Arc::new(billing_manager_roles),
        }
    }
}

/// Seeding and inspection helpers for tests.
#[cfg(test)]
impl MemoryBillingStore {
    pub async fn insert_lease(&self, lease: Lease) {
        let mut state = self.state.lock().await;
        state.leases.retain(|existing| existing.id != lease.id);
        state.leases.push(lease);
    }

    pub async fn insert_charge(&self, charge: LeaseCharge) {
        let mut state = self.state.lock().await;
        state.charges.retain(|existing| existing.id != charge.id);
        state.charges.push(charge);
    }

    pub async fn add_member(&self, organization_id: &str, user_id: &str, role: &str) {
        self.state.lock().await.members.push(Membership {
            organization_id: organization_id.to_string(),
            user_id: user_id.to_string(),
            role: role.to_string(),
        });
    }

    pub async fn notifications(&self) -> Vec<NewNotification> {
        self.state.lock().await.notifications.clone()
    }

    pub async fn invoices_for_lease(&self, lease_id: &str) -> Vec<Invoice> {
        let state = self.state.lock().await;
        let mut invoices = state
            .invoices
            .iter()
            .filter(|invoice| invoice.lease_id == lease_id)
            .cloned()
            .collect::<Vec<_>>();
        invoices.sort_by_key(|invoice| invoice.period_start);
        invoices
    }
}

#[async_trait]
impl BillingStore for MemoryBillingStore {
    async fn begin(&self) -> AppResult<Box<dyn BillingTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryBillingTx {
            guard,
            working,
            billing_manager_roles: self.billing_manager_roles.clone(),
        }))
    }

    async fn list_active_leases(&self, organization_id: Option<&str>) -> AppResult<Vec<Lease>> {
        let state = self.state.lock().await;
        Ok(state
            .leases
            .iter()
            .filter(|lease| lease.status == LeaseStatus::Active)
            .filter(|lease| organization_id.map_or(true, |org| lease.organization_id == org))
            .cloned()
            .collect())
    }

    async fn get_lease(&self, lease_id: &str) -> AppResult<Option<Lease>> {
        let state = self.state.lock().await;
        Ok(state.leases.iter().find(|lease| lease.id == lease_id).cloned())
    }

    async fn list_active_charges(&self, lease_id: &str) -> AppResult<Vec<LeaseCharge>> {
        let state = self.state.lock().await;
        Ok(state
            .charges
            .iter()
            .filter(|charge| charge.lease_id == lease_id && charge.is_active)
            .cloned()
            .collect())
    }

    async fn latest_invoice(&self, lease_id: &str) -> AppResult<Option<Invoice>> {
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .iter()
            .filter(|invoice| invoice.lease_id == lease_id)
            .max_by_key(|invoice| invoice.period_start)
            .cloned())
    }

    async fn get_invoice(&self, invoice_id: &str) -> AppResult<Option<Invoice>> {
        let state = self.state.lock().await;
        Ok(state.invoices.iter().find(|invoice| invoice.id == invoice_id).cloned())
    }

    async fn list_invoice_items(&self, invoice_id: &str) -> AppResult<Vec<InvoiceItem>> {
        let state = self.state.lock().await;
        Ok(state
            .items
            .iter()
            .filter(|item| item.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn list_invoices(&self, filter: &InvoiceFilter) -> AppResult<Vec<Invoice>> {
        let state = self.state.lock().await;
        let mut invoices = state
            .invoices
            .iter()
            .filter(|invoice| invoice.organization_id == filter.organization_id)
            .filter(|invoice| {
                filter
                    .lease_id
                    .as_deref()
                    .map_or(true, |lease_id| invoice.lease_id == lease_id)
            })
            .filter(|invoice| filter.status.map_or(true, |status| invoice.status == status))
            .cloned()
            .collect::<Vec<_>>();
        invoices.sort_by(|a, b| b.period_start.cmp(&a.period_start));
        invoices.truncate(filter.limit.max(1) as usize);
        Ok(invoices)
    }
}

struct MemoryBillingTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    billing_manager_roles: Arc<Vec<String>>,
}

#[async_trait]
impl BillingTx for MemoryBillingTx {
    async fn insert_invoice(&mut self, invoice: &NewInvoice) -> AppResult<Invoice> {
        let duplicate = self.working.invoices.iter().any(|existing| {
            existing.lease_id == invoice.lease_id
                && existing.period_start == invoice.period_start
                && existing.period_end == invoice.period_end
        });
        if duplicate {
            return Err(AppError::Conflict(
                "Duplicate value violates a unique constraint.".to_string(),
            ));
        }

        let created = Invoice {
            id: Uuid::new_v4().to_string(),
            organization_id: invoice.organization_id.clone(),
            lease_id: invoice.lease_id.clone(),
            period_start: invoice.period_start,
            period_end: invoice.period_end,
            status: invoice.status,
            total_amount_cents: invoice.total_amount_cents,
            due_date: invoice.due_date,
            issued_at: invoice.issued_at,
            paid_at: None,
        };
        self.working.invoices.push(created.clone());
        Ok(created)
    }

    async fn insert_invoice_item(&mut self, item: &NewInvoiceItem) -> AppResult<InvoiceItem> {
        if !self
            .working
            .invoices
            .iter()
            .any(|invoice| invoice.id == item.invoice_id)
        {
            return Err(AppError::Conflict(
                "Invoice item references a missing invoice.".to_string(),
            ));
        }

        let created = InvoiceItem {
            id: Uuid::new_v4().to_string(),
            invoice_id: item.invoice_id.clone(),
            lease_charge_id: item.lease_charge_id.clone(),
            kind: item.kind,
            mode: item.mode,
            status: item.status,
            description: item.description.clone(),
            period_start: item.period_start,
            period_end: item.period_end,
            unit_name: item.unit_name.clone(),
            unit_price_cents: item.unit_price_cents,
            meter_start: item.meter_start,
            meter_end: item.meter_end,
            quantity: item.quantity,
            amount_cents: item.amount_cents,
        };
        self.working.items.push(created.clone());
        Ok(created)
    }

    async fn insert_notification(&mut self, notification: &NewNotification) -> AppResult<()> {
        self.working.notifications.push(notification.clone());
        Ok(())
    }

    async fn list_billing_manager_ids(&mut self, organization_id: &str) -> AppResult<Vec<String>> {
        let mut user_ids = self
            .working
            .members
            .iter()
            .filter(|member| member.organization_id == organization_id)
            .filter(|member| self.billing_manager_roles.contains(&member.role))
            .map(|member| member.user_id.clone())
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
        Ok(self
            .working
            .previous_items(lease_id, lease_charge_id, before)
            .max_by_key(|(invoice, _)| invoice.period_start)
            .map(|(_, item)| item.clone()))
    }

    async fn previous_confirmed_meter_end(
        &mut self,
        lease_id: &str,
        lease_charge_id: &str,
        before: NaiveDate,
    ) -> AppResult<Option<f64>> {
        Ok(self
            .working
            .previous_items(lease_id, lease_charge_id, before)
            .filter(|(_, item)| item.status == InvoiceItemStatus::Confirmed)
            .filter_map(|(invoice, item)| item.meter_end.map(|end| (invoice.period_start, end)))
            .max_by_key(|(period_start, _)| *period_start)
            .map(|(_, end)| end))
    }

    async fn lock_invoice(&mut self, invoice_id: &str) -> AppResult<Option<Invoice>> {
        Ok(self
            .working
            .invoices
            .iter()
            .find(|invoice| invoice.id == invoice_id)
            .cloned())
    }

    async fn get_invoice_item(&mut self, item_id: &str) -> AppResult<Option<InvoiceItem>> {
        Ok(self.working.items.iter().find(|item| item.id == item_id).cloned())
    }

    async fn list_invoice_items(&mut self, invoice_id: &str) -> AppResult<Vec<InvoiceItem>> {
        Ok(self
            .working
            .items
            .iter()
            .filter(|item| item.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn update_invoice_item(&mut self, item: &InvoiceItem) -> AppResult<()> {
        let existing = self
            .working
            .items
            .iter_mut()
            .find(|existing| existing.id == item.id)
            .ok_or_else(|| AppError::NotFound("invoice_items record not found.".to_string()))?;
        existing.status = item.status;
        existing.meter_start = item.meter_start;
        existing.meter_end = item.meter_end;
        existing.quantity = item.quantity;
        existing.amount_cents = item.amount_cents;
        Ok(())
    }

    async fn update_invoice(&mut self, invoice: &Invoice) -> AppResult<()> {
        let existing = self
            .working
            .invoices
            .iter_mut()
            .find(|existing| existing.id == invoice.id)
            .ok_or_else(|| AppError::NotFound("invoices record not found.".to_string()))?;
        existing.status = invoice.status;
        existing.total_amount_cents = invoice.total_amount_cents;
        existing.due_date = invoice.due_date;
        existing.issued_at = invoice.issued_at;
        existing.paid_at = invoice.paid_at;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryBillingTx {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }
}
