use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, warn};

use crate::{
    error::{AppError, AppResult, BillingError},
    models::{
        ChargeMode, Invoice, InvoiceItem, InvoiceItemKind, InvoiceItemStatus, InvoiceStatus,
        Lease, LeaseCharge, LeaseStatus, NewInvoice, NewInvoiceItem, NewNotification,
    },
    repository::billing_store::{BillingStore, BillingTx},
    services::{
        charge_timing::{due_charges, ChargePeriod},
        rent::compute_rent,
    },
};

pub const INVOICE_NOTIFICATION_TYPE: &str = "invoice_generated";

/// How a freshly built invoice enters its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueMode {
    /// Catch-up path: payable immediately.
    Issue {
        issued_at: DateTime<Utc>,
        due_date: NaiveDate,
    },
    /// Manual path: stays editable until confirmed.
    Draft,
}

#[derive(Debug, Clone)]
pub struct BuiltInvoice {
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
    pub notified_user_ids: Vec<String>,
}

/// Builds, prices and persists the invoice for `[period_start, period_end)`
/// inside `tx`. Nothing is committed here.
pub async fn build_invoice(
    tx: &mut dyn BillingTx,
    lease: &Lease,
    charges: &[LeaseCharge],
    period_start: NaiveDate,
    period_end: NaiveDate,
    mode: IssueMode,
) -> AppResult<BuiltInvoice> {
    if period_start >= period_end {
        return Err(BillingError::InvalidPeriod(format!(
            "period_start {period_start} must be before period_end {period_end}"
        ))
        .into());
    }

    let mut drafts = vec![rent_item(lease, period_start, period_end)];
    for (charge, charge_period) in due_charges(lease.start_date, charges, period_start, period_end)
    {
        let draft = match charge.mode {
            ChargeMode::Fixed => match fixed_charge_item(charge, charge_period) {
                Some(item) => item,
                None => {
                    warn!(
                        lease_id = %lease.id,
                        lease_charge_id = %charge.id,
                        "Fixed charge has no amount, skipping"
                    );
                    continue;
                }
            },
            ChargeMode::Metered => {
                let previous = tx
                    .previous_charge_item(&lease.id, &charge.id, period_start)
                    .await?;
                metered_charge_item(charge, charge_period, prefill_meter_start(previous.as_ref()))
            }
        };
        drafts.push(draft);
    }

    let (status, issued_at, due_date) = match mode {
        IssueMode::Issue {
            issued_at,
            due_date,
        } => (InvoiceStatus::Issued, Some(issued_at), Some(due_date)),
        IssueMode::Draft => (InvoiceStatus::Draft, None, None),
    };

    let invoice = tx
        .insert_invoice(&NewInvoice {
            organization_id: lease.organization_id.clone(),
            lease_id: lease.id.clone(),
            period_start,
            period_end,
            status,
            total_amount_cents: draft_total(&drafts),
            due_date,
            issued_at,
        })
        .await?;

    let mut items = Vec::with_capacity(drafts.len());
    for mut draft in drafts {
        draft.invoice_id = invoice.id.clone();
        items.push(tx.insert_invoice_item(&draft).await?);
    }

    let notified_user_ids = tx.list_billing_manager_ids(&lease.organization_id).await?;
    for user_id in &notified_user_ids {
        tx.insert_notification(&invoice_notification(&invoice, user_id))
            .await?;
    }

    Ok(BuiltInvoice {
        invoice,
        items,
        notified_user_ids,
    })
}

/// Manual path: a DRAFT invoice for an arbitrary period of an active lease.
pub async fn create_manual_invoice(
    store: &dyn BillingStore,
    organization_id: &str,
    lease_id: &str,
    period_start: NaiveDate,
    period_end: NaiveDate,
) -> AppResult<Invoice> {
    if period_start >= period_end {
        return Err(BillingError::InvalidPeriod(format!(
            "period_start {period_start} must be before period_end {period_end}"
        ))
        .into());
    }

    let lease = store
        .get_lease(lease_id)
        .await?
        .filter(|lease| lease.organization_id == organization_id)
        .ok_or(BillingError::LeaseNotFound)?;
    if lease.status != LeaseStatus::Active {
        return Err(BillingError::LeaseNotActive.into());
    }
    let charges = store.list_active_charges(&lease.id).await?;

    let mut tx = store.begin().await?;
    let built = build_invoice(
        tx.as_mut(),
        &lease,
        &charges,
        period_start,
        period_end,
        IssueMode::Draft,
    )
    .await
    .map_err(|error| match error {
        AppError::Conflict(_) => AppError::Conflict(format!(
            "Lease {lease_id} is already invoiced for {period_start}..{period_end}."
        )),
        other => other,
    })?;
    tx.commit().await?;

    info!(
        organization_id,
        lease_id,
        invoice_id = %built.invoice.id,
        items = built.items.len(),
        "Created draft invoice"
    );
    Ok(built.invoice)
}

fn rent_item(lease: &Lease, period_start: NaiveDate, period_end: NaiveDate) -> NewInvoiceItem {
    NewInvoiceItem {
        invoice_id: String::new(),
        lease_charge_id: None,
        kind: InvoiceItemKind::Rent,
        mode: ChargeMode::Fixed,
        status: InvoiceItemStatus::Confirmed,
        description: format!("Rent {period_start} to {period_end}"),
        period_start: Some(period_start),
        period_end: Some(period_end),
        unit_name: None,
        unit_price_cents: None,
        meter_start: None,
        meter_end: None,
        quantity: None,
        amount_cents: compute_rent(lease, period_start),
    }
}

fn fixed_charge_item(charge: &LeaseCharge, period: ChargePeriod) -> Option<NewInvoiceItem> {
    let amount_cents = charge.fixed_amount_cents?;
    Some(NewInvoiceItem {
        invoice_id: String::new(),
        lease_charge_id: Some(charge.id.clone()),
        kind: InvoiceItemKind::Charge,
        mode: ChargeMode::Fixed,
        status: InvoiceItemStatus::Confirmed,
        description: charge.name.clone(),
        period_start: Some(period.start),
        period_end: Some(period.end),
        unit_name: charge.unit_name.clone(),
        unit_price_cents: charge.unit_price_cents,
        meter_start: None,
        meter_end: None,
        quantity: None,
        amount_cents,
    })
}

fn metered_charge_item(
    charge: &LeaseCharge,
    period: ChargePeriod,
    meter_start: Option<f64>,
) -> NewInvoiceItem {
    NewInvoiceItem {
        invoice_id: String::new(),
        lease_charge_id: Some(charge.id.clone()),
        kind: InvoiceItemKind::Charge,
        mode: ChargeMode::Metered,
        status: InvoiceItemStatus::PendingReading,
        description: charge.name.clone(),
        period_start: Some(period.start),
        period_end: Some(period.end),
        unit_name: charge.unit_name.clone(),
        unit_price_cents: charge.unit_price_cents,
        meter_start,
        meter_end: None,
        quantity: None,
        amount_cents: 0,
    }
}

/// Starting reading for a new metered item.
///
/// A confirmed predecessor hands over its closing reading. A predecessor still
/// waiting for its reading leaves the start open so the confirmer can resolve
/// it later; no history at all starts the meter at zero.
fn prefill_meter_start(previous: Option<&InvoiceItem>) -> Option<f64> {
    match previous {
        None => Some(0.0),
        Some(item) if item.status == InvoiceItemStatus::Confirmed => item.meter_end,
        Some(_) => None,
    }
}

fn draft_total(drafts: &[NewInvoiceItem]) -> i64 {
    drafts
        .iter()
        .filter(|item| item.status == InvoiceItemStatus::Confirmed)
        .map(|item| item.amount_cents)
        .sum()
}

fn invoice_notification(invoice: &Invoice, user_id: &str) -> NewNotification {
    NewNotification {
        organization_id: invoice.organization_id.clone(),
        user_id: user_id.to_string(),
        notification_type: INVOICE_NOTIFICATION_TYPE.to_string(),
        title: "New invoice generated".to_string(),
        body: format!(
            "Invoice for {} to {} created with a total of {} cents.",
            invoice.period_start, invoice.period_end, invoice.total_amount_cents
        ),
        entity_type: "invoice".to_string(),
        entity_id: invoice.id.clone(),
    }
}
