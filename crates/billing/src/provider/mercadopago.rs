//! MercadoPago adapter
//!
//! Speaks the preapproval (recurring billing) and payments REST APIs.
//! Amounts cross this boundary in minor units; MercadoPago itself uses
//! decimal currency units, so conversion happens here and nowhere else.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use async_trait::async_trait;
use casaflow_shared::SubscriptionStatus;

use crate::error::{BillingError, BillingResult};
use crate::provider::{
    CreateSubscriptionRequest, PaymentProvider, PaymentStatus, ProviderConfig, RemotePayment,
    RemoteSubscription, WebhookEvent,
};

type HmacSha256 = Hmac<Sha256>;

/// Outbound provider calls are bounded; on timeout the operation fails and
/// retry is left to webhook redelivery or the next reconciliation sweep.
const PROVIDER_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);

/// Webhook timestamps older than this are rejected
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub struct MercadoPagoProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct FreeTrialBody {
    frequency: i64,
    frequency_type: &'static str,
}

#[derive(Debug, Serialize)]
struct AutoRecurringBody {
    frequency: u32,
    frequency_type: &'static str,
    transaction_amount: f64,
    currency_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    free_trial: Option<FreeTrialBody>,
}

#[derive(Debug, Serialize)]
struct CreatePreapprovalBody {
    reason: String,
    external_reference: String,
    payer_email: String,
    auto_recurring: AutoRecurringBody,
    back_url: String,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct UpdateAmountBody {
    auto_recurring: UpdateAutoRecurring,
}

#[derive(Debug, Serialize)]
struct UpdateAutoRecurring {
    transaction_amount: f64,
    currency_id: String,
}

#[derive(Debug, Serialize)]
struct UpdateStatusBody {
    status: &'static str,
}

#[derive(Debug, Deserialize)]
struct AutoRecurringResponse {
    transaction_amount: f64,
    currency_id: String,
}

#[derive(Debug, Deserialize)]
struct PreapprovalResponse {
    id: String,
    status: String,
    #[serde(default)]
    init_point: Option<String>,
    #[serde(default)]
    external_reference: Option<String>,
    #[serde(default)]
    auto_recurring: Option<AutoRecurringResponse>,
    #[serde(default)]
    last_charged_date: Option<String>,
    #[serde(default)]
    next_payment_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CardResponse {
    #[serde(default)]
    last_four_digits: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentMetadata {
    #[serde(default)]
    preapproval_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    id: u64,
    status: String,
    transaction_amount: f64,
    currency_id: String,
    #[serde(default)]
    date_approved: Option<String>,
    #[serde(default)]
    metadata: Option<PaymentMetadata>,
    #[serde(default)]
    payment_method_id: Option<String>,
    #[serde(default)]
    card: Option<CardResponse>,
}

#[derive(Debug, Deserialize)]
struct WebhookBody {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: Option<WebhookData>,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    id: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

fn cents_to_units(amount_cents: i64) -> f64 {
    amount_cents as f64 / 100.0
}

fn units_to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

fn parse_rfc3339(value: &Option<String>) -> Option<OffsetDateTime> {
    value
        .as_deref()
        .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
}

fn map_preapproval_status(status: &str) -> BillingResult<SubscriptionStatus> {
    match status {
        "pending" => Ok(SubscriptionStatus::Pending),
        "authorized" => Ok(SubscriptionStatus::Authorized),
        "paused" => Ok(SubscriptionStatus::Paused),
        "cancelled" => Ok(SubscriptionStatus::Cancelled),
        other => Err(BillingError::Provider(format!(
            "unknown preapproval status: {other}"
        ))),
    }
}

fn map_payment_status(status: &str) -> PaymentStatus {
    match status {
        "approved" => PaymentStatus::Approved,
        "rejected" | "cancelled" | "refunded" | "charged_back" => PaymentStatus::Rejected,
        // pending, in_process, authorized, in_mediation
        _ => PaymentStatus::Pending,
    }
}

impl From<PreapprovalResponse> for RemoteSubscription {
    fn from(resp: PreapprovalResponse) -> Self {
        let (amount_cents, currency) = resp
            .auto_recurring
            .as_ref()
            .map(|r| (units_to_cents(r.transaction_amount), r.currency_id.clone()))
            .unwrap_or((0, String::new()));

        RemoteSubscription {
            status: map_preapproval_status(&resp.status)
                .unwrap_or(SubscriptionStatus::Pending),
            provider_subscription_id: resp.id,
            amount_cents,
            currency,
            current_period_start: parse_rfc3339(&resp.last_charged_date),
            current_period_end: parse_rfc3339(&resp.next_payment_date),
            init_point: resp.init_point,
            external_reference: resp.external_reference,
        }
    }
}

impl From<PaymentResponse> for RemotePayment {
    fn from(resp: PaymentResponse) -> Self {
        RemotePayment {
            provider_payment_id: resp.id.to_string(),
            provider_subscription_id: resp.metadata.and_then(|m| m.preapproval_id),
            amount_cents: units_to_cents(resp.transaction_amount),
            currency: resp.currency_id,
            status: map_payment_status(&resp.status),
            paid_at: parse_rfc3339(&resp.date_approved),
            card_brand: resp.payment_method_id,
            card_last_four: resp.card.and_then(|c| c.last_four_digits),
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

impl MercadoPagoProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client, config }
    }

    async fn read_error(context: &str, response: reqwest::Response) -> BillingError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(300).collect();
        BillingError::Provider(format!("{context}: HTTP {status}: {snippet}"))
    }
}

#[async_trait]
impl PaymentProvider for MercadoPagoProvider {
    fn name(&self) -> &'static str {
        "mercadopago"
    }

    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> BillingResult<RemoteSubscription> {
        let body = CreatePreapprovalBody {
            reason: request.reason.clone(),
            external_reference: request.org_id.to_string(),
            payer_email: request.payer_email.clone(),
            auto_recurring: AutoRecurringBody {
                frequency: 1,
                frequency_type: "months",
                transaction_amount: cents_to_units(request.amount_cents),
                currency_id: request.currency.clone(),
                free_trial: request.trial_days.map(|days| FreeTrialBody {
                    frequency: days,
                    frequency_type: "days",
                }),
            },
            back_url: self.config.checkout_back_url.clone(),
            status: "pending",
        };

        let response = self
            .client
            .post(format!("{}/preapproval", self.config.base_url))
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::read_error("create preapproval", response).await);
        }

        let remote: PreapprovalResponse = response
            .json()
            .await
            .map_err(|e| BillingError::Provider(format!("parse preapproval: {e}")))?;
        // Surface unknown statuses instead of silently defaulting
        map_preapproval_status(&remote.status)?;

        tracing::info!(
            org_id = %request.org_id,
            preapproval_id = %remote.id,
            "Created pending MercadoPago preapproval"
        );

        Ok(remote.into())
    }

    async fn update_subscription_amount(
        &self,
        provider_subscription_id: &str,
        amount_cents: i64,
        currency: &str,
    ) -> BillingResult<RemoteSubscription> {
        let body = UpdateAmountBody {
            auto_recurring: UpdateAutoRecurring {
                transaction_amount: cents_to_units(amount_cents),
                currency_id: currency.to_string(),
            },
        };

        let response = self
            .client
            .put(format!(
                "{}/preapproval/{provider_subscription_id}",
                self.config.base_url
            ))
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::read_error("update preapproval amount", response).await);
        }

        let remote: PreapprovalResponse = response
            .json()
            .await
            .map_err(|e| BillingError::Provider(format!("parse preapproval: {e}")))?;
        map_preapproval_status(&remote.status)?;

        Ok(remote.into())
    }

    async fn cancel_subscription(
        &self,
        provider_subscription_id: &str,
    ) -> BillingResult<RemoteSubscription> {
        let response = self
            .client
            .put(format!(
                "{}/preapproval/{provider_subscription_id}",
                self.config.base_url
            ))
            .bearer_auth(&self.config.access_token)
            .json(&UpdateStatusBody {
                status: "cancelled",
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::read_error("cancel preapproval", response).await);
        }

        let remote: PreapprovalResponse = response
            .json()
            .await
            .map_err(|e| BillingError::Provider(format!("parse preapproval: {e}")))?;

        Ok(remote.into())
    }

    async fn fetch_subscription(
        &self,
        provider_subscription_id: &str,
    ) -> BillingResult<RemoteSubscription> {
        let response = self
            .client
            .get(format!(
                "{}/preapproval/{provider_subscription_id}",
                self.config.base_url
            ))
            .bearer_auth(&self.config.access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::read_error("fetch preapproval", response).await);
        }

        let remote: PreapprovalResponse = response
            .json()
            .await
            .map_err(|e| BillingError::Provider(format!("parse preapproval: {e}")))?;
        map_preapproval_status(&remote.status)?;

        Ok(remote.into())
    }

    async fn fetch_payment(&self, provider_payment_id: &str) -> BillingResult<RemotePayment> {
        let response = self
            .client
            .get(format!(
                "{}/v1/payments/{provider_payment_id}",
                self.config.base_url
            ))
            .bearer_auth(&self.config.access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::read_error("fetch payment", response).await);
        }

        let remote: PaymentResponse = response
            .json()
            .await
            .map_err(|e| BillingError::Provider(format!("parse payment: {e}")))?;

        Ok(remote.into())
    }

    fn verify_webhook(
        &self,
        data_id: &str,
        signature_header: &str,
        request_id: &str,
    ) -> BillingResult<()> {
        // Header format: ts=<unix seconds>,v1=<hex hmac>
        let mut timestamp: Option<i64> = None;
        let mut v1_signature: Option<&str> = None;

        for part in signature_header.split(',') {
            let kv: Vec<&str> = part.trim().splitn(2, '=').collect();
            if kv.len() == 2 {
                match kv[0] {
                    "ts" => timestamp = kv[1].parse().ok(),
                    "v1" => v1_signature = Some(kv[1]),
                    _ => {}
                }
            }
        }

        let timestamp = timestamp.ok_or(BillingError::WebhookSignatureInvalid)?;
        let v1_signature = v1_signature.ok_or(BillingError::WebhookSignatureInvalid)?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::warn!(
                timestamp = timestamp,
                now = now,
                "Webhook timestamp outside tolerance window"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        // Manifest per MercadoPago: id:<data.id>;request-id:<x-request-id>;ts:<ts>;
        let manifest = format!(
            "id:{};request-id:{};ts:{};",
            data_id.to_lowercase(),
            request_id,
            timestamp
        );

        let mut mac = HmacSha256::new_from_slice(self.config.webhook_secret.as_bytes())
            .map_err(|_| BillingError::WebhookSignatureInvalid)?;
        mac.update(manifest.as_bytes());
        let computed = mac.finalize().into_bytes();

        let provided =
            hex::decode(v1_signature).map_err(|_| BillingError::WebhookSignatureInvalid)?;

        if computed.ct_eq(provided.as_slice()).into() {
            Ok(())
        } else {
            Err(BillingError::WebhookSignatureInvalid)
        }
    }

    fn parse_webhook(&self, body: &str) -> BillingResult<WebhookEvent> {
        let parsed: WebhookBody = serde_json::from_str(body)
            .map_err(|e| BillingError::Provider(format!("malformed webhook body: {e}")))?;

        // data.id arrives as a number for payments and a string for
        // preapprovals; normalize to text either way
        let resource_id = parsed
            .data
            .and_then(|d| d.id)
            .map(|id| match id {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .ok_or(BillingError::MissingField("data.id"))?;

        let kind = parsed.kind.unwrap_or_default();
        Ok(match kind.as_str() {
            "payment" => WebhookEvent::SubscriptionPayment {
                payment_id: resource_id,
            },
            "subscription_preapproval" => WebhookEvent::SubscriptionUpdated {
                provider_subscription_id: resource_id,
            },
            _ => WebhookEvent::Unknown {
                kind,
                resource_id,
            },
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;
    use uuid::Uuid;

    fn test_config(base_url: String) -> ProviderConfig {
        ProviderConfig {
            provider: "mercadopago".to_string(),
            access_token: "TEST-token".to_string(),
            webhook_secret: "whsec-test".to_string(),
            base_url,
            checkout_back_url: "https://app.test/billing".to_string(),
        }
    }

    fn sign(secret: &str, data_id: &str, request_id: &str, ts: i64) -> String {
        let manifest = format!(
            "id:{};request-id:{};ts:{};",
            data_id.to_lowercase(),
            request_id,
            ts
        );
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(manifest.as_bytes());
        format!("ts={},v1={}", ts, hex::encode(mac.finalize().into_bytes()))
    }

    #[tokio::test]
    async fn create_subscription_returns_init_point() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/preapproval")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "id": "pre_123",
                    "status": "pending",
                    "init_point": "https://www.mercadopago.com/checkout/pre_123",
                    "external_reference": "org-ref",
                    "auto_recurring": {"transaction_amount": 79.0, "currency_id": "USD"}
                }"#,
            )
            .create_async()
            .await;

        let provider = MercadoPagoProvider::new(test_config(server.url()));
        let request = CreateSubscriptionRequest {
            org_id: Uuid::new_v4(),
            reason: "Casaflow Power".to_string(),
            payer_email: "a@b.com".to_string(),
            amount_cents: 7_900,
            currency: "USD".to_string(),
            trial_days: Some(14),
        };

        let remote = provider.create_subscription(&request).await.unwrap();
        mock.assert_async().await;

        assert_eq!(remote.provider_subscription_id, "pre_123");
        assert_eq!(remote.status, SubscriptionStatus::Pending);
        assert_eq!(remote.amount_cents, 7_900);
        assert_eq!(
            remote.init_point.as_deref(),
            Some("https://www.mercadopago.com/checkout/pre_123")
        );
    }

    #[tokio::test]
    async fn fetch_subscription_maps_authorized_status_and_period() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/preapproval/pre_9")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "id": "pre_9",
                    "status": "authorized",
                    "auto_recurring": {"transaction_amount": 299.9, "currency_id": "ARS"},
                    "last_charged_date": "2026-07-01T00:00:00.000-03:00",
                    "next_payment_date": "2026-08-01T00:00:00.000-03:00"
                }"#,
            )
            .create_async()
            .await;

        let provider = MercadoPagoProvider::new(test_config(server.url()));
        let remote = provider.fetch_subscription("pre_9").await.unwrap();

        assert_eq!(remote.status, SubscriptionStatus::Authorized);
        assert_eq!(remote.amount_cents, 29_990);
        assert!(remote.current_period_start.is_some());
        assert!(remote.current_period_end.is_some());
    }

    #[tokio::test]
    async fn fetch_payment_maps_approved_and_card_metadata() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/payments/555001")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "id": 555001,
                    "status": "approved",
                    "transaction_amount": 79.0,
                    "currency_id": "USD",
                    "date_approved": "2026-08-01T12:30:00.000-03:00",
                    "metadata": {"preapproval_id": "pre_9"},
                    "payment_method_id": "visa",
                    "card": {"last_four_digits": "4242"}
                }"#,
            )
            .create_async()
            .await;

        let provider = MercadoPagoProvider::new(test_config(server.url()));
        let payment = provider.fetch_payment("555001").await.unwrap();

        assert_eq!(payment.provider_payment_id, "555001");
        assert_eq!(payment.status, PaymentStatus::Approved);
        assert_eq!(payment.provider_subscription_id.as_deref(), Some("pre_9"));
        assert_eq!(payment.card_brand.as_deref(), Some("visa"));
        assert_eq!(payment.card_last_four.as_deref(), Some("4242"));
        assert_eq!(payment.amount_cents, 7_900);
    }

    #[tokio::test]
    async fn provider_errors_surface_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/preapproval/missing")
            .with_status(404)
            .with_body(r#"{"message": "preapproval not found"}"#)
            .create_async()
            .await;

        let provider = MercadoPagoProvider::new(test_config(server.url()));
        let err = provider.fetch_subscription("missing").await.unwrap_err();

        match err {
            BillingError::Provider(msg) => {
                assert!(msg.contains("404"));
                assert!(msg.contains("not found"));
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[test]
    fn verify_webhook_accepts_valid_signature() {
        let provider = MercadoPagoProvider::new(test_config("http://unused".to_string()));
        let ts = OffsetDateTime::now_utc().unix_timestamp();
        let header = sign("whsec-test", "555001", "req-1", ts);

        assert!(provider.verify_webhook("555001", &header, "req-1").is_ok());
    }

    #[test]
    fn verify_webhook_rejects_tampered_resource() {
        let provider = MercadoPagoProvider::new(test_config("http://unused".to_string()));
        let ts = OffsetDateTime::now_utc().unix_timestamp();
        let header = sign("whsec-test", "555001", "req-1", ts);

        let err = provider
            .verify_webhook("555002", &header, "req-1")
            .unwrap_err();
        assert!(matches!(err, BillingError::WebhookSignatureInvalid));
    }

    #[test]
    fn verify_webhook_rejects_wrong_secret() {
        let provider = MercadoPagoProvider::new(test_config("http://unused".to_string()));
        let ts = OffsetDateTime::now_utc().unix_timestamp();
        let header = sign("other-secret", "555001", "req-1", ts);

        assert!(provider.verify_webhook("555001", &header, "req-1").is_err());
    }

    #[test]
    fn verify_webhook_rejects_stale_timestamp() {
        let provider = MercadoPagoProvider::new(test_config("http://unused".to_string()));
        let ts = OffsetDateTime::now_utc().unix_timestamp() - 3600;
        let header = sign("whsec-test", "555001", "req-1", ts);

        assert!(provider.verify_webhook("555001", &header, "req-1").is_err());
    }

    #[test]
    fn verify_webhook_rejects_malformed_header() {
        let provider = MercadoPagoProvider::new(test_config("http://unused".to_string()));
        assert!(provider
            .verify_webhook("555001", "not-a-signature", "req-1")
            .is_err());
    }

    #[test]
    fn parse_webhook_normalizes_payment_event() {
        let provider = MercadoPagoProvider::new(test_config("http://unused".to_string()));
        let event = provider
            .parse_webhook(r#"{"type": "payment", "data": {"id": 555001}}"#)
            .unwrap();
        assert_eq!(
            event,
            WebhookEvent::SubscriptionPayment {
                payment_id: "555001".to_string()
            }
        );
    }

    #[test]
    fn parse_webhook_normalizes_preapproval_event() {
        let provider = MercadoPagoProvider::new(test_config("http://unused".to_string()));
        let event = provider
            .parse_webhook(r#"{"type": "subscription_preapproval", "data": {"id": "pre_9"}}"#)
            .unwrap();
        assert_eq!(
            event,
            WebhookEvent::SubscriptionUpdated {
                provider_subscription_id: "pre_9".to_string()
            }
        );
    }

    #[test]
    fn parse_webhook_passes_through_unknown_kinds() {
        let provider = MercadoPagoProvider::new(test_config("http://unused".to_string()));
        let event = provider
            .parse_webhook(r#"{"type": "plan", "data": {"id": "plan_1"}}"#)
            .unwrap();
        assert_eq!(
            event,
            WebhookEvent::Unknown {
                kind: "plan".to_string(),
                resource_id: "plan_1".to_string()
            }
        );
    }

    #[test]
    fn parse_webhook_requires_data_id() {
        let provider = MercadoPagoProvider::new(test_config("http://unused".to_string()));
        let err = provider.parse_webhook(r#"{"type": "payment"}"#).unwrap_err();
        assert!(matches!(err, BillingError::MissingField("data.id")));
    }

    #[test]
    #[serial]
    fn provider_config_from_env() {
        std::env::set_var("MP_ACCESS_TOKEN", "TEST-tok");
        std::env::set_var("MP_WEBHOOK_SECRET", "TEST-secret");
        std::env::remove_var("BILLING_PROVIDER");
        std::env::remove_var("MP_BASE_URL");

        let config = ProviderConfig::from_env().unwrap();
        assert_eq!(config.provider, "mercadopago");
        assert_eq!(config.base_url, "https://api.mercadopago.com");

        std::env::remove_var("MP_ACCESS_TOKEN");
        std::env::remove_var("MP_WEBHOOK_SECRET");
    }
}
