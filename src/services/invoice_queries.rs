use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    error::{AppResult, BillingError},
    models::{Invoice, InvoiceItem, InvoiceStatus},
    repository::billing_store::{BillingStore, InvoiceFilter},
};

/// Stored rows fetched when the requested status is only known after deriving
/// the display status.
const DERIVED_FILTER_SCAN_LIMIT: i64 = 500;

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceView {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub display_status: InvoiceStatus,
}

impl InvoiceView {
    fn new(invoice: Invoice, now: DateTime<Utc>) -> Self {
        let display_status = invoice.display_status(now);
        Self {
            invoice,
            display_status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: InvoiceView,
    pub items: Vec<InvoiceItem>,
}

pub async fn get_invoice(
    store: &dyn BillingStore,
    organization_id: &str,
    invoice_id: &str,
    now: DateTime<Utc>,
) -> AppResult<InvoiceDetail> {
    let invoice = store
        .get_invoice(invoice_id)
        .await?
        .filter(|invoice| invoice.organization_id == organization_id)
        .ok_or(BillingError::InvoiceNotFound)?;
    let items = store.list_invoice_items(&invoice.id).await?;

    Ok(InvoiceDetail {
        invoice: InvoiceView::new(invoice, now),
        items,
    })
}

/// Newest period first. `status` filters on the display status, so `issued`
/// excludes invoices that already read as overdue.
pub async fn list_invoices(
    store: &dyn BillingStore,
    organization_id: &str,
    lease_id: Option<&str>,
    status: Option<InvoiceStatus>,
    limit: i64,
    now: DateTime<Utc>,
) -> AppResult<Vec<InvoiceView>> {
    let (stored_status, scan_limit) = match status {
        Some(InvoiceStatus::Overdue | InvoiceStatus::Issued) => {
            (Some(InvoiceStatus::Issued), DERIVED_FILTER_SCAN_LIMIT.max(limit))
        }
        other => (other, limit),
    };

    let invoices = store
        .list_invoices(&InvoiceFilter {
            organization_id: organization_id.to_string(),
            lease_id: lease_id.map(ToOwned::to_owned),
            status: stored_status,
            limit: scan_limit,
        })
        .await?;

    Ok(invoices
        .into_iter()
        .map(|invoice| InvoiceView::new(invoice, now))
        .filter(|view| status.map_or(true, |wanted| view.display_status == wanted))
        .take(limit.max(1) as usize)
        .collect())
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use serde_json::json;

    use super::{get_invoice, list_invoices};
    use crate::{
        config::BillingPolicy,
        error::{AppError, BillingError},
        models::{InvoiceStatus, Lease, LeaseStatus, RentIncreaseType},
        repository::memory_billing_store::MemoryBillingStore,
        services::{billing_run::generate_due_invoices, invoice_builder::create_manual_invoice},
    };

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid date")
    }

    async fn store() -> MemoryBillingStore {
        let store = MemoryBillingStore::new(Vec::new());
        store
            .insert_lease(Lease {
                id: "lease-1".to_string(),
                organization_id: "org-1".to_string(),
                room_id: None,
                tenant_id: None,
                status: LeaseStatus::Active,
                start_date: date("2026-09-01"),
                end_date: date("2027-09-01"),
                billing_cycle_months: 1,
                base_rent_cents: 250_000,
                rent_increase_type: RentIncreaseType::None,
                rent_increase_value: 0.0,
                rent_increase_interval_months: 0,
            })
            .await;
        let policy = BillingPolicy {
            max_periods_per_lease: 24,
            invoice_due_days: 5,
        };
        let run_at = Utc.with_ymd_and_hms(2026, 10, 2, 6, 0, 0).unwrap();
        generate_due_invoices(&store, &policy, None, run_at)
            .await
            .unwrap();
        create_manual_invoice(&store, "org-1", "lease-1", date("2026-12-01"), date("2027-01-01"))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn overdue_is_a_read_side_view() {
        let store = store().await;
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();

        let all = list_invoices(&store, "org-1", None, None, 50, now).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].invoice.period_start, date("2026-12-01"));
        assert_eq!(all[0].display_status, InvoiceStatus::Draft);

        let overdue = list_invoices(&store, "org-1", None, Some(InvoiceStatus::Overdue), 50, now)
            .await
            .unwrap();
        assert_eq!(overdue.len(), 2);
        assert!(overdue
            .iter()
            .all(|view| view.invoice.status == InvoiceStatus::Issued));

        let issued = list_invoices(&store, "org-1", None, Some(InvoiceStatus::Issued), 50, now)
            .await
            .unwrap();
        assert!(issued.is_empty());

        let early = Utc.with_ymd_and_hms(2026, 9, 3, 0, 0, 0).unwrap();
        let issued_early =
            list_invoices(&store, "org-1", Some("lease-1"), Some(InvoiceStatus::Issued), 50, early)
                .await
                .unwrap();
        assert_eq!(issued_early.len(), 2);
    }

    #[tokio::test]
    async fn detail_includes_items_and_display_status() {
        let store = store().await;
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        let first = list_invoices(&store, "org-1", None, None, 50, now)
            .await
            .unwrap()
            .into_iter()
            .find(|view| view.invoice.period_start == date("2026-09-01"))
            .unwrap();

        let detail = get_invoice(&store, "org-1", &first.invoice.id, now)
            .await
            .unwrap();
        assert_eq!(detail.items.len(), 1);

        let body = serde_json::to_value(&detail).unwrap();
        assert_eq!(body["status"], json!("issued"));
        assert_eq!(body["display_status"], json!("overdue"));
        assert_eq!(body["items"][0]["amount_cents"], json!(250_000));

        let hidden = get_invoice(&store, "org-2", &first.invoice.id, now)
            .await
            .unwrap_err();
        assert!(matches!(
            hidden,
            AppError::Billing(BillingError::InvoiceNotFound)
        ));
    }
}
