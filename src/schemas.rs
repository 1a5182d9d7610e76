use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

pub fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(1, 500)
}

fn default_limit_100() -> i64 {
    100
}

#[derive(Debug, Clone, Default, Deserialize, serde::Serialize, Validate)]
pub struct GenerateDueInvoicesInput {
    #[validate(length(min = 1, max = 64))]
    pub organization_id: Option<String>,
    /// Overrides the service clock, for replaying a missed run.
    pub now: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct CreateManualInvoiceInput {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct ConfirmReadingInput {
    #[validate(range(min = 0.0))]
    pub meter_start: Option<f64>,
    #[validate(range(min = 0.0))]
    pub meter_end: f64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct InvoicesQuery {
    pub lease_id: Option<String>,
    pub status: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct OrgPath {
    pub org_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct OrgLeasePath {
    pub org_id: String,
    pub lease_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct InvoicePath {
    pub org_id: String,
    pub invoice_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct InvoiceItemPath {
    pub org_id: String,
    pub invoice_id: String,
    pub item_id: String,
}
