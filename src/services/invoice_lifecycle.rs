//! Forward-only invoice status transitions: DRAFT -> ISSUED -> PAID, with VOID
//! reachable from anything not yet paid.

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::{
    config::BillingPolicy,
    error::{AppResult, BillingError},
    models::{Invoice, InvoiceStatus},
    repository::billing_store::{BillingStore, BillingTx},
};

pub async fn confirm_invoice(
    store: &dyn BillingStore,
    policy: &BillingPolicy,
    organization_id: &str,
    invoice_id: &str,
    now: DateTime<Utc>,
) -> AppResult<Invoice> {
    let mut tx = store.begin().await?;
    let invoice = lock_scoped(tx.as_mut(), organization_id, invoice_id).await?;
    let items = tx.list_invoice_items(&invoice.id).await?;
    let pending = items.iter().filter(|item| item.is_pending()).count();

    let Some(issued) = issue_transition(&invoice, pending, now, policy.invoice_due_days)? else {
        return Ok(invoice);
    };
    tx.update_invoice(&issued).await?;
    tx.commit().await?;

    info!(
        organization_id,
        invoice_id = %issued.id,
        total_amount_cents = issued.total_amount_cents,
        "Invoice issued"
    );
    Ok(issued)
}

pub async fn mark_invoice_as_paid(
    store: &dyn BillingStore,
    organization_id: &str,
    invoice_id: &str,
    now: DateTime<Utc>,
) -> AppResult<Invoice> {
    let mut tx = store.begin().await?;
    let invoice = lock_scoped(tx.as_mut(), organization_id, invoice_id).await?;

    let paid = paid_transition(&invoice, now)?;
    tx.update_invoice(&paid).await?;
    tx.commit().await?;

    info!(organization_id, invoice_id = %paid.id, "Invoice marked as paid");
    Ok(paid)
}

pub async fn void_invoice(
    store: &dyn BillingStore,
    organization_id: &str,
    invoice_id: &str,
) -> AppResult<Invoice> {
    let mut tx = store.begin().await?;
    let invoice = lock_scoped(tx.as_mut(), organization_id, invoice_id).await?;

    let Some(voided) = void_transition(&invoice)? else {
        return Ok(invoice);
    };
    tx.update_invoice(&voided).await?;
    tx.commit().await?;

    info!(organization_id, invoice_id = %voided.id, "Invoice voided");
    Ok(voided)
}

async fn lock_scoped(
    tx: &mut dyn BillingTx,
    organization_id: &str,
    invoice_id: &str,
) -> AppResult<Invoice> {
    tx.lock_invoice(invoice_id)
        .await?
        .filter(|invoice| invoice.organization_id == organization_id)
        .ok_or_else(|| BillingError::InvoiceNotFound.into())
}

/// `None` means the invoice is already issued and nothing changes.
fn issue_transition(
    invoice: &Invoice,
    pending_items: usize,
    now: DateTime<Utc>,
    due_days: u32,
) -> Result<Option<Invoice>, BillingError> {
    match invoice.status {
        InvoiceStatus::Paid => return Err(BillingError::AlreadyPaid),
        InvoiceStatus::Void => return Err(BillingError::Voided),
        _ => {}
    }
    if pending_items > 0 {
        return Err(BillingError::PendingReadings(pending_items));
    }
    if invoice.status != InvoiceStatus::Draft {
        return Ok(None);
    }

    Ok(Some(Invoice {
        status: InvoiceStatus::Issued,
        issued_at: Some(now),
        due_date: invoice
            .due_date
            .or_else(|| Some(invoice.period_start + Duration::days(i64::from(due_days)))),
        ..invoice.clone()
    }))
}

fn paid_transition(invoice: &Invoice, now: DateTime<Utc>) -> Result<Invoice, BillingError> {
    match invoice.status {
        InvoiceStatus::Paid => Err(BillingError::AlreadyPaid),
        InvoiceStatus::Void => Err(BillingError::Voided),
        _ => Ok(Invoice {
            status: InvoiceStatus::Paid,
            paid_at: Some(now),
            ..invoice.clone()
        }),
    }
}

fn void_transition(invoice: &Invoice) -> Result<Option<Invoice>, BillingError> {
    match invoice.status {
        InvoiceStatus::Paid => Err(BillingError::AlreadyPaid),
        InvoiceStatus::Void => Ok(None),
        _ => Ok(Some(Invoice {
            status: InvoiceStatus::Void,
            ..invoice.clone()
        })),
    }
}
