use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};

use crate::{
    auth::require_internal_api_key,
    error::{AppError, AppResult},
    models::InvoiceStatus,
    schemas::{
        clamp_limit, validate_input, ConfirmReadingInput, CreateManualInvoiceInput,
        InvoiceItemPath, InvoicePath, InvoicesQuery, OrgLeasePath, OrgPath,
    },
    services::{
        invoice_builder::create_manual_invoice,
        invoice_lifecycle::{confirm_invoice, mark_invoice_as_paid, void_invoice},
        invoice_queries::{get_invoice, list_invoices, InvoiceDetail},
        meter_readings::confirm_invoice_item_reading,
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/organizations/{org_id}/invoices",
            axum::routing::get(list_invoices_handler),
        )
        .route(
            "/organizations/{org_id}/leases/{lease_id}/invoices",
            axum::routing::post(create_manual_invoice_handler),
        )
        .route(
            "/organizations/{org_id}/invoices/{invoice_id}",
            axum::routing::get(get_invoice_handler),
        )
        .route(
            "/organizations/{org_id}/invoices/{invoice_id}/items/{item_id}/confirm-reading",
            axum::routing::post(confirm_reading_handler),
        )
        .route(
            "/organizations/{org_id}/invoices/{invoice_id}/confirm",
            axum::routing::post(confirm_invoice_handler),
        )
        .route(
            "/organizations/{org_id}/invoices/{invoice_id}/mark-paid",
            axum::routing::post(mark_paid_handler),
        )
        .route(
            "/organizations/{org_id}/invoices/{invoice_id}/void",
            axum::routing::post(void_invoice_handler),
        )
}

async fn list_invoices_handler(
    State(state): State<AppState>,
    Path(path): Path<OrgPath>,
    Query(query): Query<InvoicesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_internal_api_key(&state, &headers)?;

    let status = match non_empty_opt(query.status.as_deref()) {
        Some(raw) => Some(
            InvoiceStatus::parse(&raw)
                .ok_or_else(|| AppError::BadRequest(format!("Unknown invoice status '{raw}'.")))?,
        ),
        None => None,
    };
    let lease_id = non_empty_opt(query.lease_id.as_deref());

    let invoices = list_invoices(
        state.billing_store.as_ref(),
        &path.org_id,
        lease_id.as_deref(),
        status,
        clamp_limit(query.limit),
        state.clock.now(),
    )
    .await?;
    Ok(Json(json!({ "data": invoices })))
}

async fn create_manual_invoice_handler(
    State(state): State<AppState>,
    Path(path): Path<OrgLeasePath>,
    headers: HeaderMap,
    Json(payload): Json<CreateManualInvoiceInput>,
) -> AppResult<Json<Value>> {
    require_internal_api_key(&state, &headers)?;

    let invoice = create_manual_invoice(
        state.billing_store.as_ref(),
        &path.org_id,
        &path.lease_id,
        payload.period_start,
        payload.period_end,
    )
    .await?;
    Ok(Json(json!({ "ok": true, "invoice_id": invoice.id })))
}

async fn get_invoice_handler(
    State(state): State<AppState>,
    Path(path): Path<InvoicePath>,
    headers: HeaderMap,
) -> AppResult<Json<InvoiceDetail>> {
    require_internal_api_key(&state, &headers)?;

    let detail = get_invoice(
        state.billing_store.as_ref(),
        &path.org_id,
        &path.invoice_id,
        state.clock.now(),
    )
    .await?;
    Ok(Json(detail))
}

async fn confirm_reading_handler(
    State(state): State<AppState>,
    Path(path): Path<InvoiceItemPath>,
    headers: HeaderMap,
    Json(payload): Json<ConfirmReadingInput>,
) -> AppResult<Json<Value>> {
    require_internal_api_key(&state, &headers)?;
    validate_input(&payload)?;

    confirm_invoice_item_reading(
        state.billing_store.as_ref(),
        &path.org_id,
        &path.invoice_id,
        &path.item_id,
        payload.meter_start,
        payload.meter_end,
    )
    .await?;
    Ok(Json(json!({ "ok": true })))
}

async fn confirm_invoice_handler(
    State(state): State<AppState>,
    Path(path): Path<InvoicePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_internal_api_key(&state, &headers)?;

    confirm_invoice(
        state.billing_store.as_ref(),
        &state.config.billing_policy(),
        &path.org_id,
        &path.invoice_id,
        state.clock.now(),
    )
    .await?;
    Ok(Json(json!({ "ok": true })))
}

async fn mark_paid_handler(
    State(state): State<AppState>,
    Path(path): Path<InvoicePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_internal_api_key(&state, &headers)?;

    mark_invoice_as_paid(
        state.billing_store.as_ref(),
        &path.org_id,
        &path.invoice_id,
        state.clock.now(),
    )
    .await?;
    Ok(Json(json!({ "ok": true })))
}

async fn void_invoice_handler(
    State(state): State<AppState>,
    Path(path): Path<InvoicePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_internal_api_key(&state, &headers)?;

    void_invoice(state.billing_store.as_ref(), &path.org_id, &path.invoice_id).await?;
    Ok(Json(json!({ "ok": true })))
}

fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}
