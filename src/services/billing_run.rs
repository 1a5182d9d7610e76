use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    config::BillingPolicy,
    error::AppResult,
    models::Lease,
    repository::billing_store::BillingStore,
    services::{
        billing_calendar::{add_months, whole_months_between},
        invoice_builder::{build_invoice, IssueMode},
    },
};

#[derive(Debug, Clone, Serialize)]
pub struct FailedLease {
    pub lease_id: String,
    pub error: String,
}

/// Result of one catch-up run across all active leases in scope.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BillingRunResult {
    pub created_count: usize,
    pub created_invoice_ids: Vec<String>,
    pub failed_leases: Vec<FailedLease>,
    /// Leases that still had billable periods when the per-run cap was hit.
    pub truncated_lease_ids: Vec<String>,
}

/// Generate every invoice due up to `now` for active leases, optionally
/// scoped to one organization.
///
/// Safe to re-run: the `(lease_id, period_start, period_end)` uniqueness
/// anchor turns a repeated period into a stop signal for that lease.
pub async fn generate_due_invoices(
    store: &dyn BillingStore,
    policy: &BillingPolicy,
    organization_id: Option<&str>,
    now: DateTime<Utc>,
) -> AppResult<BillingRunResult> {
    let leases = store.list_active_leases(organization_id).await?;
    let mut result = BillingRunResult::default();

    for lease in &leases {
        let mut created = Vec::new();
        match catch_up_lease(store, policy, lease, now, &mut created).await {
            Ok(LeaseOutcome::Truncated) => {
                warn!(
                    lease_id = %lease.id,
                    cap = policy.max_periods_per_lease,
                    "Billing backlog exceeds the per-run cap; remaining periods deferred"
                );
                result.truncated_lease_ids.push(lease.id.clone());
            }
            Ok(LeaseOutcome::CaughtUp) => {}
            Err(error) => {
                warn!(lease_id = %lease.id, error = %error, "Billing catch-up failed for lease");
                result.failed_leases.push(FailedLease {
                    lease_id: lease.id.clone(),
                    error: error.to_string(),
                });
            }
        }
        result.created_invoice_ids.extend(created);
    }

    result.created_count = result.created_invoice_ids.len();
    info!(
        organization_id = organization_id.unwrap_or("*"),
        leases = leases.len(),
        created = result.created_count,
        failed = result.failed_leases.len(),
        truncated = result.truncated_lease_ids.len(),
        "Billing run completed"
    );
    Ok(result)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaseOutcome {
    CaughtUp,
    Truncated,
}

/// Bills consecutive periods for one lease. Each period is its own unit of
/// work, so ids pushed to `created` are committed even if a later period fails.
async fn catch_up_lease(
    store: &dyn BillingStore,
    policy: &BillingPolicy,
    lease: &Lease,
    now: DateTime<Utc>,
    created: &mut Vec<String>,
) -> AppResult<LeaseOutcome> {
    let today = now.date_naive();
    let mut period_start = match store.latest_invoice(&lease.id).await? {
        Some(latest) => latest.period_end,
        None => lease.start_date,
    };
    let charges = store.list_active_charges(&lease.id).await?;

    let mut iterations = 0;
    while is_billable(period_start, lease.end_date, today) {
        if iterations >= policy.max_periods_per_lease {
            return Ok(LeaseOutcome::Truncated);
        }
        iterations += 1;

        let Some(period_end) = next_period_end(period_start, lease) else {
            break;
        };

        let mut tx = store.begin().await?;
        let mode = IssueMode::Issue {
            issued_at: now,
            due_date: period_start + Duration::days(i64::from(policy.invoice_due_days)),
        };
        let built = match build_invoice(tx.as_mut(), lease, &charges, period_start, period_end, mode)
            .await
        {
            Ok(built) => built,
            Err(error) if error.is_conflict() => {
                info!(
                    lease_id = %lease.id,
                    %period_start,
                    %period_end,
                    "Period already invoiced, stopping catch-up"
                );
                break;
            }
            Err(error) => return Err(error),
        };
        match tx.commit().await {
            Ok(()) => {}
            Err(error) if error.is_conflict() => break,
            Err(error) => return Err(error),
        }

        info!(
            lease_id = %lease.id,
            invoice_id = %built.invoice.id,
            %period_start,
            %period_end,
            total_amount_cents = built.invoice.total_amount_cents,
            "Invoice generated"
        );
        created.push(built.invoice.id);
        period_start = period_end;
    }

    Ok(LeaseOutcome::CaughtUp)
}

/// A period is billable once it has started (strictly before today) and
/// while the lease is still running.
fn is_billable(period_start: NaiveDate, lease_end: NaiveDate, today: NaiveDate) -> bool {
    period_start < today && period_start < lease_end
}

/// Next cycle boundary after `period_start`, clipped to the lease end.
/// Boundaries are counted from the lease start so a lease starting on the
/// 31st keeps returning to month end. `None` when the clipped period would be
/// empty.
fn next_period_end(period_start: NaiveDate, lease: &Lease) -> Option<NaiveDate> {
    let cycle = lease.billing_cycle_months.max(1);
    let offset = whole_months_between(lease.start_date, period_start).max(0) as u32;
    let mut cycles = offset / cycle;
    let mut boundary = add_months(lease.start_date, cycles.saturating_mul(cycle));
    while boundary <= period_start && boundary < NaiveDate::MAX {
        cycles += 1;
        boundary = add_months(lease.start_date, cycles.saturating_mul(cycle));
    }
    let period_end = boundary.min(lease.end_date);
    (period_end > period_start).then_some(period_end)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};

    use super::{generate_due_invoices, is_billable, next_period_end};
    use crate::{
        config::BillingPolicy,
        error::{AppError, AppResult},
        models::{
            BillingTiming, ChargeMode, FeeType, Invoice, InvoiceItem, InvoiceItemKind,
            InvoiceStatus, Lease, LeaseCharge, LeaseStatus, RentIncreaseType,
        },
        repository::{
            billing_store::{BillingStore, BillingTx, InvoiceFilter},
            memory_billing_store::MemoryBillingStore,
        },
        services::billing_calendar::sub_months,
    };

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid date")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap()
    }

    fn policy() -> BillingPolicy {
        BillingPolicy {
            max_periods_per_lease: 24,
            invoice_due_days: 5,
        }
    }

    fn lease(id: &str, start: NaiveDate, end: NaiveDate) -> Lease {
        Lease {
            id: id.to_string(),
            organization_id: "org-1".to_string(),
            room_id: None,
            tenant_id: None,
            status: LeaseStatus::Active,
            start_date: start,
            end_date: end,
            billing_cycle_months: 1,
            base_rent_cents: 250_000,
            rent_increase_type: RentIncreaseType::None,
            rent_increase_value: 0.0,
            rent_increase_interval_months: 0,
        }
    }

    fn annual_fee(lease_id: &str) -> LeaseCharge {
        LeaseCharge {
            id: "annual-mgmt".to_string(),
            lease_id: lease_id.to_string(),
            name: "Annual management fee".to_string(),
            fee_type: FeeType::Management,
            mode: ChargeMode::Fixed,
            fixed_amount_cents: Some(120_000),
            unit_price_cents: None,
            unit_name: None,
            billing_cycle_months: 12,
            billing_timing: None,
            is_active: true,
        }
    }

    async fn store_with(leases: Vec<Lease>) -> MemoryBillingStore {
        let store = MemoryBillingStore::new(vec!["owner_admin".to_string()]);
        for lease in leases {
            store.insert_lease(lease).await;
        }
        store
    }

    #[test]
    fn billable_window_is_strictly_before_today() {
        let today = date("2026-10-19");
        assert!(is_billable(date("2026-10-18"), date("2027-01-01"), today));
        assert!(!is_billable(date("2026-10-19"), date("2027-01-01"), today));
        assert!(!is_billable(date("2026-09-01"), date("2026-09-01"), today));
    }

    #[test]
    fn period_end_is_clipped_to_lease_end() {
        let short = lease("lease-1", date("2026-01-01"), date("2026-02-15"));
        assert_eq!(next_period_end(date("2026-01-01"), &short), Some(date("2026-02-01")));
        assert_eq!(next_period_end(date("2026-02-01"), &short), Some(date("2026-02-15")));
        assert_eq!(next_period_end(date("2026-02-15"), &short), None);

        let mut quarterly = lease("lease-2", date("2026-01-01"), date("2027-01-01"));
        quarterly.billing_cycle_months = 3;
        assert_eq!(
            next_period_end(date("2026-01-01"), &quarterly),
            Some(date("2026-04-01"))
        );
        assert_eq!(
            next_period_end(date("2026-02-10"), &quarterly),
            Some(date("2026-04-01"))
        );

        let month_end = lease("lease-3", date("2026-01-31"), date("2027-01-31"));
        assert_eq!(next_period_end(date("2026-02-28"), &month_end), Some(date("2026-03-31")));
    }

    #[tokio::test]
    async fn catches_up_two_months_of_rent() {
        let today = now().date_naive();
        let store = store_with(vec![lease(
            "lease-1",
            sub_months(today, 2),
            date("2027-12-31"),
        )])
        .await;

        let result = generate_due_invoices(&store, &policy(), None, now())
            .await
            .unwrap();
        assert_eq!(result.created_count, 2);
        assert!(result.failed_leases.is_empty());

        for invoice in store.invoices_for_lease("lease-1").await {
            assert_eq!(invoice.status, InvoiceStatus::Issued);
            assert_eq!(invoice.total_amount_cents, 250_000);
            assert_eq!(invoice.issued_at, Some(now()));
            let items = store.list_invoice_items(&invoice.id).await.unwrap();
            assert_eq!(items.len(), 1);
            assert_eq!(items[0].kind, InvoiceItemKind::Rent);
            assert_eq!(items[0].amount_cents, 250_000);
        }
    }

    #[tokio::test]
    async fn second_run_creates_nothing() {
        let store = store_with(vec![lease("lease-1", date("2026-01-01"), date("2027-01-01"))]).await;

        let first = generate_due_invoices(&store, &policy(), None, now())
            .await
            .unwrap();
        assert_eq!(first.created_count, 10);

        let second = generate_due_invoices(&store, &policy(), None, now())
            .await
            .unwrap();
        assert_eq!(second.created_count, 0);
        assert!(second.created_invoice_ids.is_empty());
        assert_eq!(store.invoices_for_lease("lease-1").await.len(), 10);
    }

    #[tokio::test]
    async fn periods_are_contiguous_with_due_dates() {
        let store = store_with(vec![lease("lease-1", date("2026-06-15"), date("2027-01-01"))]).await;
        generate_due_invoices(&store, &policy(), None, now())
            .await
            .unwrap();

        let invoices = store.invoices_for_lease("lease-1").await;
        assert_eq!(invoices.len(), 5);
        assert_eq!(invoices[0].period_start, date("2026-06-15"));
        for pair in invoices.windows(2) {
            assert_eq!(pair[0].period_end, pair[1].period_start);
        }
        assert_eq!(invoices[0].due_date, Some(date("2026-06-20")));
        assert_eq!(invoices[4].period_start, date("2026-10-15"));
    }

    #[tokio::test]
    async fn annual_charge_bills_once_per_year() {
        let store = store_with(vec![lease("lease-1", date("2025-10-01"), date("2027-10-01"))]).await;
        store.insert_charge(annual_fee("lease-1")).await;

        let result = generate_due_invoices(&store, &policy(), None, now())
            .await
            .unwrap();
        assert_eq!(result.created_count, 13);

        let mut with_fee = Vec::new();
        for invoice in store.invoices_for_lease("lease-1").await {
            let items = store.list_invoice_items(&invoice.id).await.unwrap();
            if items
                .iter()
                .any(|item| item.lease_charge_id.as_deref() == Some("annual-mgmt"))
            {
                assert_eq!(invoice.total_amount_cents, 370_000);
                with_fee.push(invoice.period_start);
            }
        }
        assert_eq!(with_fee, vec![date("2025-10-01"), date("2026-10-01")]);
    }

    async fn fee_period_starts(store: &MemoryBillingStore, charge_id: &str) -> Vec<NaiveDate> {
        let mut starts = Vec::new();
        for invoice in store.invoices_for_lease("lease-1").await {
            let items = store.list_invoice_items(&invoice.id).await.unwrap();
            if items
                .iter()
                .any(|item| item.lease_charge_id.as_deref() == Some(charge_id))
            {
                starts.push(invoice.period_start);
            }
        }
        starts
    }

    #[tokio::test]
    async fn month_end_lease_keeps_its_anchor_day() {
        let mut month_end = lease("lease-1", date("2026-01-31"), date("2028-01-31"));
        month_end.rent_increase_type = RentIncreaseType::Percent;
        month_end.rent_increase_value = 10.0;
        month_end.rent_increase_interval_months = 12;
        let store = store_with(vec![month_end]).await;
        store.insert_charge(annual_fee("lease-1")).await;

        let run_at = Utc.with_ymd_and_hms(2027, 3, 15, 6, 0, 0).unwrap();
        let result = generate_due_invoices(&store, &policy(), None, run_at)
            .await
            .unwrap();
        assert_eq!(result.created_count, 14);

        let invoices = store.invoices_for_lease("lease-1").await;
        let starts = invoices
            .iter()
            .map(|invoice| invoice.period_start)
            .collect::<Vec<_>>();
        assert_eq!(
            starts[..4],
            [
                date("2026-01-31"),
                date("2026-02-28"),
                date("2026-03-31"),
                date("2026-04-30"),
            ]
        );
        assert_eq!(starts[12], date("2027-01-31"));
        assert_eq!(starts[13], date("2027-02-28"));

        assert_eq!(
            fee_period_starts(&store, "annual-mgmt").await,
            vec![date("2026-01-31"), date("2027-01-31")]
        );
        assert_eq!(invoices[11].total_amount_cents, 250_000);
        assert_eq!(invoices[12].total_amount_cents, 275_000 + 120_000);
        assert_eq!(invoices[13].total_amount_cents, 275_000);
    }

    #[tokio::test]
    async fn postpaid_quarterly_charge_skips_off_periods() {
        let store = store_with(vec![lease("lease-1", date("2026-01-01"), date("2027-06-01"))]).await;
        let mut quarterly = annual_fee("lease-1");
        quarterly.id = "quarterly-mgmt".to_string();
        quarterly.billing_cycle_months = 3;
        quarterly.billing_timing = Some(BillingTiming::Postpaid);
        store.insert_charge(quarterly).await;

        let run_at = Utc.with_ymd_and_hms(2026, 12, 15, 6, 0, 0).unwrap();
        let result = generate_due_invoices(&store, &policy(), None, run_at)
            .await
            .unwrap();
        assert_eq!(result.created_count, 12);
        assert_eq!(
            fee_period_starts(&store, "quarterly-mgmt").await,
            vec![
                date("2026-01-01"),
                date("2026-04-01"),
                date("2026-07-01"),
                date("2026-10-01"),
            ]
        );
    }

    #[tokio::test]
    async fn cap_truncates_long_backlogs() {
        let store = store_with(vec![lease("lease-1", date("2024-01-01"), date("2028-01-01"))]).await;

        let first = generate_due_invoices(&store, &policy(), None, now())
            .await
            .unwrap();
        assert_eq!(first.created_count, 24);
        assert_eq!(first.truncated_lease_ids, vec!["lease-1".to_string()]);

        let second = generate_due_invoices(&store, &policy(), None, now())
            .await
            .unwrap();
        assert_eq!(second.created_count, 10);
        assert!(second.truncated_lease_ids.is_empty());
    }

    #[tokio::test]
    async fn scopes_to_one_organization() {
        let mut other = lease("lease-2", date("2026-09-01"), date("2027-01-01"));
        other.organization_id = "org-2".to_string();
        let store = store_with(vec![
            lease("lease-1", date("2026-09-01"), date("2027-01-01")),
            other,
        ])
        .await;

        let result = generate_due_invoices(&store, &policy(), Some("org-2"), now())
            .await
            .unwrap();
        assert_eq!(result.created_count, 2);
        assert!(store.invoices_for_lease("lease-1").await.is_empty());
    }

    /// Wraps the memory store, optionally forgetting invoice history (to
    /// simulate a racing run) or failing reads for one lease.
    struct FaultyStore {
        inner: MemoryBillingStore,
        forget_history: bool,
        failing_lease: Option<String>,
    }

    #[async_trait]
    impl BillingStore for FaultyStore {
        async fn begin(&self) -> AppResult<Box<dyn BillingTx>> {
            self.inner.begin().await
        }

        async fn list_active_leases(&self, organization_id: Option<&str>) -> AppResult<Vec<Lease>> {
            self.inner.list_active_leases(organization_id).await
        }

        async fn get_lease(&self, lease_id: &str) -> AppResult<Option<Lease>> {
            self.inner.get_lease(lease_id).await
        }

        async fn list_active_charges(&self, lease_id: &str) -> AppResult<Vec<LeaseCharge>> {
            if self.failing_lease.as_deref() == Some(lease_id) {
                return Err(AppError::Dependency("Database operation failed.".to_string()));
            }
            self.inner.list_active_charges(lease_id).await
        }

        async fn latest_invoice(&self, lease_id: &str) -> AppResult<Option<Invoice>> {
            if self.forget_history {
                return Ok(None);
            }
            self.inner.latest_invoice(lease_id).await
        }

        async fn get_invoice(&self, invoice_id: &str) -> AppResult<Option<Invoice>> {
            self.inner.get_invoice(invoice_id).await
        }

        async fn list_invoice_items(&self, invoice_id: &str) -> AppResult<Vec<InvoiceItem>> {
            self.inner.list_invoice_items(invoice_id).await
        }

        async fn list_invoices(&self, filter: &InvoiceFilter) -> AppResult<Vec<Invoice>> {
            self.inner.list_invoices(filter).await
        }
    }

    #[tokio::test]
    async fn racing_duplicate_is_absorbed() {
        let inner = store_with(vec![lease("lease-1", date("2026-08-01"), date("2027-01-01"))]).await;
        generate_due_invoices(&inner, &policy(), None, now())
            .await
            .unwrap();

        let racing = FaultyStore {
            inner: inner.clone(),
            forget_history: true,
            failing_lease: None,
        };
        let result = generate_due_invoices(&racing, &policy(), None, now())
            .await
            .unwrap();
        assert_eq!(result.created_count, 0);
        assert!(result.failed_leases.is_empty());
        assert_eq!(inner.invoices_for_lease("lease-1").await.len(), 3);
    }

    #[tokio::test]
    async fn one_failing_lease_does_not_abort_the_run() {
        let inner = store_with(vec![
            lease("lease-bad", date("2026-09-01"), date("2027-01-01")),
            lease("lease-ok", date("2026-09-01"), date("2027-01-01")),
        ])
        .await;
        let store = FaultyStore {
            inner: inner.clone(),
            forget_history: false,
            failing_lease: Some("lease-bad".to_string()),
        };

        let result = generate_due_invoices(&store, &policy(), None, now())
            .await
            .unwrap();
        assert_eq!(result.created_count, 2);
        assert_eq!(result.failed_leases.len(), 1);
        assert_eq!(result.failed_leases[0].lease_id, "lease-bad");

        let ids = result.created_invoice_ids.iter().collect::<HashSet<_>>();
        for invoice in inner.invoices_for_lease("lease-ok").await {
            assert!(ids.contains(&invoice.id));
        }
    }
}
