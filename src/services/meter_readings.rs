use tracing::info;

use crate::{
    error::{AppResult, BillingError},
    models::{confirmed_total, ChargeMode, InvoiceItem, InvoiceItemStatus, InvoiceStatus},
    repository::billing_store::BillingStore,
    services::rent::round_cents,
};

/// Record the closing reading of a pending metered item and refresh the
/// invoice total, in one unit of work.
pub async fn confirm_invoice_item_reading(
    store: &dyn BillingStore,
    organization_id: &str,
    invoice_id: &str,
    item_id: &str,
    meter_start: Option<f64>,
    meter_end: f64,
) -> AppResult<InvoiceItem> {
    check_reading("meter_end", meter_end)?;
    if let Some(start) = meter_start {
        check_reading("meter_start", start)?;
    }

    let mut tx = store.begin().await?;

    let mut invoice = tx
        .lock_invoice(invoice_id)
        .await?
        .filter(|invoice| invoice.organization_id == organization_id)
        .ok_or(BillingError::InvoiceNotFound)?;
    match invoice.status {
        InvoiceStatus::Paid => return Err(BillingError::AlreadyPaid.into()),
        InvoiceStatus::Void => return Err(BillingError::Voided.into()),
        _ => {}
    }

    let item = tx
        .get_invoice_item(item_id)
        .await?
        .filter(|item| item.invoice_id == invoice.id)
        .ok_or(BillingError::InvoiceItemNotFound)?;
    check_pending_metered(&item)?;

    let start = match meter_start.or(item.meter_start) {
        Some(start) => start,
        None => match item.lease_charge_id.as_deref() {
            Some(charge_id) => tx
                .previous_confirmed_meter_end(&invoice.lease_id, charge_id, invoice.period_start)
                .await?
                .unwrap_or(0.0),
            None => 0.0,
        },
    };

    let confirmed = apply_reading(&item, start, meter_end)?;
    tx.update_invoice_item(&confirmed).await?;

    let items = tx.list_invoice_items(&invoice.id).await?;
    invoice.total_amount_cents = confirmed_total(&items);
    tx.update_invoice(&invoice).await?;
    tx.commit().await?;

    info!(
        organization_id,
        invoice_id = %invoice.id,
        item_id = %confirmed.id,
        quantity = confirmed.quantity.unwrap_or_default(),
        amount_cents = confirmed.amount_cents,
        total_amount_cents = invoice.total_amount_cents,
        "Meter reading confirmed"
    );
    Ok(confirmed)
}

fn check_reading(field: &str, value: f64) -> Result<(), BillingError> {
    if !value.is_finite() || value < 0.0 {
        return Err(BillingError::InvalidReading(format!(
            "{field} must be a finite, non-negative number"
        )));
    }
    Ok(())
}

fn check_pending_metered(item: &InvoiceItem) -> Result<(), BillingError> {
    if item.status != InvoiceItemStatus::PendingReading {
        return Err(BillingError::InvalidItemStatus);
    }
    if item.mode != ChargeMode::Metered || item.unit_price_cents.is_none() {
        return Err(BillingError::InvalidItem);
    }
    Ok(())
}

/// Prices a reading against the item's unit price.
fn apply_reading(
    item: &InvoiceItem,
    meter_start: f64,
    meter_end: f64,
) -> Result<InvoiceItem, BillingError> {
    let unit_price_cents = item.unit_price_cents.ok_or(BillingError::InvalidItem)?;
    if meter_end < meter_start {
        return Err(BillingError::InvalidReading(format!(
            "meter_end {meter_end} is lower than meter_start {meter_start}"
        )));
    }

    let quantity = meter_end - meter_start;
    Ok(InvoiceItem {
        status: InvoiceItemStatus::Confirmed,
        meter_start: Some(meter_start),
        meter_end: Some(meter_end),
        quantity: Some(quantity),
        amount_cents: round_cents(quantity * unit_price_cents as f64),
        ..item.clone()
    })
}
