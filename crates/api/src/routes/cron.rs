//! Cron trigger routes
//!
//! For deployments that prefer an external scheduler over the worker
//! binary. Protected by a bearer shared secret, compared in constant
//! time.

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::Json;
use casaflow_billing::{InvariantCheckSummary, SweepReport};
use subtle::ConstantTimeEq;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Check the bearer token against the configured secret without leaking
/// a timing signal
pub(crate) fn cron_authorized(headers: &HeaderMap, secret: &str) -> bool {
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let Some(token) = value.strip_prefix("Bearer ") else {
        return false;
    };
    token.as_bytes().ct_eq(secret.as_bytes()).into()
}

/// POST /api/cron/reconcile
pub async fn reconcile(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<SweepReport>> {
    if !cron_authorized(&headers, &state.config.cron_secret) {
        return Err(ApiError::unauthorized("Missing or invalid cron secret"));
    }

    tracing::info!("Reconciliation sweep triggered via HTTP");
    let report = state.billing.reconciliation.run_sweep().await;
    Ok(Json(report))
}

/// POST /api/cron/invariants
pub async fn invariants(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<InvariantCheckSummary>> {
    if !cron_authorized(&headers, &state.config.cron_secret) {
        return Err(ApiError::unauthorized("Missing or invalid cron secret"));
    }

    let summary = state.billing.invariants.run_all_checks().await?;
    if !summary.healthy {
        tracing::error!(
            violations = summary.violations.len(),
            "Billing invariant violations detected"
        );
    }
    Ok(Json(summary))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn accepts_the_configured_secret() {
        assert!(cron_authorized(&headers_with("Bearer s3cret"), "s3cret"));
    }

    #[test]
    fn rejects_wrong_secret_and_wrong_scheme() {
        assert!(!cron_authorized(&headers_with("Bearer nope"), "s3cret"));
        assert!(!cron_authorized(&headers_with("Basic s3cret"), "s3cret"));
        assert!(!cron_authorized(&HeaderMap::new(), "s3cret"));
    }

    #[test]
    fn rejects_prefix_of_the_secret() {
        assert!(!cron_authorized(&headers_with("Bearer s3cre"), "s3cret"));
        assert!(!cron_authorized(&headers_with("Bearer s3crett"), "s3cret"));
    }
}
