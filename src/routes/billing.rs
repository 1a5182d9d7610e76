use axum::{extract::State, http::HeaderMap, Json};

use crate::{
    auth::require_internal_api_key,
    error::AppResult,
    schemas::{validate_input, GenerateDueInvoicesInput},
    services::billing_run::{generate_due_invoices, BillingRunResult},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route(
        "/billing/generate-due-invoices",
        axum::routing::post(generate_due_invoices_handler),
    )
}

/// Cron-compatible catch-up trigger. The body is optional.
async fn generate_due_invoices_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<Json<GenerateDueInvoicesInput>>,
) -> AppResult<Json<BillingRunResult>> {
    require_internal_api_key(&state, &headers)?;
    let input = payload.map(|Json(input)| input).unwrap_or_default();
    validate_input(&input)?;

    let now = input.now.unwrap_or_else(|| state.clock.now());
    let policy = state.config.billing_policy();
    let result = generate_due_invoices(
        state.billing_store.as_ref(),
        &policy,
        input.organization_id.as_deref(),
        now,
    )
    .await?;
    Ok(Json(result))
}
