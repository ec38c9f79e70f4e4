//! Route registration

pub mod billing;
pub mod cron;
pub mod health;
pub mod webhooks;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/billing/plans", get(billing::list_plans))
        .route("/api/billing/subscribe", post(billing::subscribe))
        .route("/api/billing/change-plan", post(billing::change_plan))
        .route("/api/billing/cancel", post(billing::cancel))
        .route("/api/billing/reactivate", post(billing::reactivate))
        .route("/api/billing/status/{org_id}", get(billing::status))
        .route("/api/billing/invoices/{org_id}", get(billing::invoices))
        .route(
            "/api/billing/payment-methods/{org_id}",
            get(billing::payment_methods),
        )
        .route(
            "/api/billing/payment-methods/set-default",
            post(billing::set_default_payment_method),
        )
        .route(
            "/api/billing/payment-methods/deactivate",
            post(billing::deactivate_payment_method),
        )
        .route("/api/webhooks/billing", post(webhooks::receive))
        .route("/api/cron/reconcile", post(cron::reconcile))
        .route("/api/cron/invariants", post(cron::invariants))
        .with_state(state)
}
