use axum::http::HeaderMap;

use crate::{
    error::{AppError, AppResult},
    state::AppState,
};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Guards billing routes with the shared internal key when one is configured.
/// User authentication happens upstream of this service.
pub fn require_internal_api_key(state: &AppState, headers: &HeaderMap) -> AppResult<()> {
    let provided = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    validate_internal_api_key(
        state.config.is_production(),
        state.config.internal_api_key.as_deref(),
        provided,
    )
}

fn validate_internal_api_key(
    is_production: bool,
    expected_key: Option<&str>,
    provided_key: &str,
) -> AppResult<()> {
    let expected = expected_key.map(str::trim).unwrap_or_default();

    if is_production && expected.is_empty() {
        return Err(AppError::Dependency(
            "INTERNAL_API_KEY must be set in production to serve billing routes.".to_string(),
        ));
    }

    if !expected.is_empty() && provided_key.trim() != expected {
        return Err(AppError::Unauthorized(
            "Invalid or missing API key.".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::validate_internal_api_key;
    use crate::error::AppError;

    #[test]
    fn open_in_development_without_a_key() {
        assert!(validate_internal_api_key(false, None, "").is_ok());
    }

    #[test]
    fn production_requires_a_configured_key() {
        assert!(matches!(
            validate_internal_api_key(true, None, "anything"),
            Err(AppError::Dependency(_))
        ));
    }

    #[test]
    fn configured_key_must_match() {
        assert!(validate_internal_api_key(true, Some("s3cret"), "s3cret").is_ok());
        assert!(matches!(
            validate_internal_api_key(false, Some("s3cret"), "guess"),
            Err(AppError::Unauthorized(_))
        ));
    }
}
