use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    UnprocessableEntity(String),
    #[error("{0}")]
    Dependency(String),
    #[error("{0}")]
    Internal(String),
    #[error(transparent)]
    Billing(#[from] BillingError),
}

/// Domain failures of the billing engine. Never retried; the `code` is part of
/// the public contract.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BillingError {
    #[error("Invoice not found.")]
    InvoiceNotFound,
    #[error("Invoice item not found on this invoice.")]
    InvoiceItemNotFound,
    #[error("Lease not found.")]
    LeaseNotFound,
    #[error("Lease is not active.")]
    LeaseNotActive,
    #[error("Invoice item is not awaiting a meter reading.")]
    InvalidItemStatus,
    #[error("Invoice item is not a priced metered item.")]
    InvalidItem,
    #[error("Invalid meter reading: {0}")]
    InvalidReading(String),
    #[error("Invoice still has {0} item(s) pending a meter reading.")]
    PendingReadings(usize),
    #[error("Invoice is already paid.")]
    AlreadyPaid,
    #[error("Invoice has been voided.")]
    Voided,
    #[error("Invalid invoice period: {0}")]
    InvalidPeriod(String),
}

impl BillingError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvoiceNotFound => "invoice_not_found",
            Self::InvoiceItemNotFound => "invoice_item_not_found",
            Self::LeaseNotFound => "lease_not_found",
            Self::LeaseNotActive => "lease_not_active",
            Self::InvalidItemStatus => "invalid_item_status",
            Self::InvalidItem => "invalid_item",
            Self::InvalidReading(_) => "invalid_reading",
            Self::PendingReadings(_) => "pending_readings",
            Self::AlreadyPaid => "invoice_already_paid",
            Self::Voided => "invoice_voided",
            Self::InvalidPeriod(_) => "invalid_period",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvoiceNotFound | Self::InvoiceItemNotFound | Self::LeaseNotFound => {
                StatusCode::NOT_FOUND
            }
            Self::InvalidReading(_) | Self::InvalidPeriod(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::LeaseNotActive
            | Self::InvalidItemStatus
            | Self::InvalidItem
            | Self::PendingReadings(_)
            | Self::AlreadyPaid
            | Self::Voided => StatusCode::CONFLICT,
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Dependency(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Billing(error) => error.status_code(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        }

        let body = match &self {
            Self::Billing(error) => json!({ "detail": error.to_string(), "code": error.code() }),
            other => json!({ "detail": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
