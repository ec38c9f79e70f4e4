//! Provider webhook route
//!
//! Contract: 401 on signature failure with no processing; otherwise
//! always 200 `{"received": true}` so the provider stops redelivering.
//! Processing failures after verification are logged inside the handler
//! and the reconciliation sweep corrects anything dropped.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// POST /api/webhooks/billing
pub async fn receive(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<serde_json::Value>> {
    let signature = header(&headers, "x-signature");
    let request_id = header(&headers, "x-request-id");
    let data_id = query.get("data.id").map(String::as_str);

    state
        .billing
        .webhooks
        .handle(&body, data_id, signature, request_id)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Rejected unauthenticated webhook");
            ApiError::from(e)
        })?;

    Ok(Json(json!({ "received": true })))
}
