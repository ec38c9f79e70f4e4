//! API error mapping
//!
//! Billing errors carry user-facing messages; this layer only decides the
//! status code and passes the message through verbatim.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use casaflow_billing::BillingError;
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn unauthorized(message: &str) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.to_string(),
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.to_string(),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        let status = match &err {
            // Validation
            BillingError::InvalidTier(_) | BillingError::MissingField(_) => {
                StatusCode::BAD_REQUEST
            }
            // Authentication
            BillingError::WebhookSignatureInvalid | BillingError::Unauthorized(_) => {
                StatusCode::UNAUTHORIZED
            }
            // Consistency
            BillingError::OrganizationNotFound(_)
            | BillingError::SubscriptionNotFound(_)
            | BillingError::PaymentMethodNotFound(_) => StatusCode::NOT_FOUND,
            BillingError::SubscriptionAlreadyActive(_)
            | BillingError::SubscriptionAlreadyCanceled(_)
            | BillingError::StaleWrite(_) => StatusCode::CONFLICT,
            // Provider
            BillingError::Provider(_)
            | BillingError::ProviderTimeout(_)
            | BillingError::ProviderUnsupported(_) => StatusCode::BAD_GATEWAY,
            // Infrastructure
            BillingError::Database(_) | BillingError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, message = %self.message, "Request failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn validation_errors_map_to_400() {
        let err: ApiError = BillingError::InvalidTier("mega".to_string()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err: ApiError = BillingError::MissingField("payer_email").into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn authentication_errors_map_to_401() {
        let err: ApiError = BillingError::WebhookSignatureInvalid.into();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn consistency_errors_map_to_conflict_or_not_found() {
        let org = Uuid::nil();
        let err: ApiError = BillingError::SubscriptionAlreadyActive(org).into();
        assert_eq!(err.status, StatusCode::CONFLICT);

        let err: ApiError = BillingError::SubscriptionNotFound(org).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn provider_errors_map_to_bad_gateway() {
        let err: ApiError = BillingError::Provider("unreachable".to_string()).into();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert!(err.message.contains("unreachable"));
    }
}
