use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::{
    services::billing_run::{generate_due_invoices, BillingRunResult},
    state::AppState,
};

const TICK: Duration = Duration::from_secs(15);

/// Spawn-and-forget loop that triggers the billing catch-up run.
///
/// Each run goes into its own `tokio::spawn` so a failing or panicking run
/// never takes the loop down. Overlapping runs are harmless: the period
/// uniqueness anchor stops the slower one.
pub async fn run_background_scheduler(state: AppState) {
    if !state.config.billing_scheduler_enabled {
        tracing::info!("Billing scheduler disabled");
        return;
    }

    let billing_interval = Duration::from_secs(state.config.billing_run_interval_seconds());
    tracing::info!(
        interval_seconds = billing_interval.as_secs(),
        "Background scheduler started"
    );

    let mut last_billing_run: Option<Instant> = None;
    loop {
        let now_instant = Instant::now();
        let due = last_billing_run
            .map_or(true, |last| now_instant.duration_since(last) >= billing_interval);
        if due {
            last_billing_run = Some(now_instant);
            let st = state.clone();
            tokio::spawn(async move {
                run_billing_tick(&st).await;
            });
        }

        sleep(TICK).await;
    }
}

/// One scheduled catch-up run across every organization.
pub async fn run_billing_tick(state: &AppState) -> Option<BillingRunResult> {
    let now = state.clock.now();
    let policy = state.config.billing_policy();
    match generate_due_invoices(state.billing_store.as_ref(), &policy, None, now).await {
        Ok(result) => {
            if result.created_count > 0 || !result.failed_leases.is_empty() {
                tracing::info!(
                    created = result.created_count,
                    failed = result.failed_leases.len(),
                    truncated = result.truncated_lease_ids.len(),
                    "Scheduler: billing run completed"
                );
            }
            Some(result)
        }
        Err(error) => {
            tracing::error!(error = %error, "Scheduler: billing run failed");
            None
        }
    }
}
