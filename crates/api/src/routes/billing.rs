//! Billing routes
//!
//! Thin handlers over the subscription engine: parse, delegate, serialize.
//! Error messages from the engine pass through to the client verbatim.

use std::str::FromStr;

use axum::extract::{Path, State};
use axum::Json;
use casaflow_billing::{
    catalog, format_price, BillingStatus, CancelResult, CheckoutInfo, InvoiceRecord,
    PaymentMethodRecord, Plan, PlanChange, PlanLimits, ReactivateResult,
};
use casaflow_shared::PlanTier;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn parse_tier(raw: &str) -> Result<PlanTier, ApiError> {
    PlanTier::from_str(raw)
        .map_err(|_| ApiError::bad_request(&format!("Invalid plan tier: {raw}")))
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub organization_id: Uuid,
    pub plan_tier: String,
    pub payer_email: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub organization_id: Uuid,
    pub new_plan_tier: String,
}

#[derive(Debug, Deserialize)]
pub struct OrgRequest {
    pub organization_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct PlanResponse {
    pub tier: PlanTier,
    pub name: &'static str,
    pub price_ars_cents: i64,
    pub price_usd_cents: i64,
    pub display_price_ars: String,
    pub display_price_usd: String,
    pub trial_days: i64,
    pub limits: PlanLimits,
}

impl From<Plan> for PlanResponse {
    fn from(plan: Plan) -> Self {
        Self {
            tier: plan.tier,
            name: plan.name,
            price_ars_cents: plan.price_ars_cents,
            price_usd_cents: plan.price_usd_cents,
            display_price_ars: format_price(plan.price_ars_cents, "ARS"),
            display_price_usd: format_price(plan.price_usd_cents, "USD"),
            trial_days: plan.trial_days,
            limits: plan.limits,
        }
    }
}

/// GET /api/billing/plans
pub async fn list_plans() -> Json<Vec<PlanResponse>> {
    Json(catalog().into_iter().map(PlanResponse::from).collect())
}

/// POST /api/billing/subscribe
pub async fn subscribe(
    State(state): State<AppState>,
    Json(body): Json<SubscribeRequest>,
) -> ApiResult<Json<CheckoutInfo>> {
    let tier = parse_tier(&body.plan_tier)?;
    let checkout = state
        .billing
        .subscriptions
        .subscribe(body.organization_id, tier, &body.payer_email)
        .await?;
    Ok(Json(checkout))
}

/// POST /api/billing/change-plan
pub async fn change_plan(
    State(state): State<AppState>,
    Json(body): Json<ChangePlanRequest>,
) -> ApiResult<Json<PlanChange>> {
    let tier = parse_tier(&body.new_plan_tier)?;
    let change = state
        .billing
        .subscriptions
        .change_plan(body.organization_id, tier)
        .await?;
    Ok(Json(change))
}

/// POST /api/billing/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Json(body): Json<OrgRequest>,
) -> ApiResult<Json<CancelResult>> {
    let result = state
        .billing
        .subscriptions
        .cancel_subscription(body.organization_id)
        .await?;
    Ok(Json(result))
}

/// POST /api/billing/reactivate
pub async fn reactivate(
    State(state): State<AppState>,
    Json(body): Json<OrgRequest>,
) -> ApiResult<Json<ReactivateResult>> {
    let result = state
        .billing
        .subscriptions
        .reactivate_subscription(body.organization_id)
        .await?;
    Ok(Json(result))
}

/// GET /api/billing/status/{org_id}
pub async fn status(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
) -> ApiResult<Json<BillingStatus>> {
    let status = state.billing.subscriptions.subscription_status(org_id).await?;
    Ok(Json(status))
}

/// GET /api/billing/invoices/{org_id}
pub async fn invoices(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
) -> ApiResult<Json<Vec<InvoiceRecord>>> {
    let invoices = state.billing.subscriptions.list_invoices(org_id).await?;
    Ok(Json(invoices))
}

#[derive(Debug, Deserialize)]
pub struct PaymentMethodRequest {
    pub organization_id: Uuid,
    pub payment_method_id: Uuid,
}

/// GET /api/billing/payment-methods/{org_id}
pub async fn payment_methods(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
) -> ApiResult<Json<Vec<PaymentMethodRecord>>> {
    let methods = state.billing.payment_methods.list(org_id).await?;
    Ok(Json(methods))
}

/// POST /api/billing/payment-methods/set-default
pub async fn set_default_payment_method(
    State(state): State<AppState>,
    Json(body): Json<PaymentMethodRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .billing
        .payment_methods
        .set_default(body.organization_id, body.payment_method_id)
        .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

/// POST /api/billing/payment-methods/deactivate
pub async fn deactivate_payment_method(
    State(state): State<AppState>,
    Json(body): Json<PaymentMethodRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .billing
        .payment_methods
        .deactivate(body.organization_id, body.payment_method_id)
        .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}
