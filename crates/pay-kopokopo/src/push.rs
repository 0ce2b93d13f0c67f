//! # Kopokopo STK Push
//!
//! `PushGateway` implementation for Kopokopo's incoming-payments API.
//! A push is only "accepted for processing" here; the payment outcome
//! arrives later at the callback URL.

use crate::config::KopokopoConfig;
use crate::token::{transport_message, TokenManager};
use crate::webhook::{parse_callback, verify_signature};
use crate::PROVIDER;
use async_trait::async_trait;
use pay_core::{
    AccessToken, PaymentError, PaymentResult, ProviderCallback, PushGateway, PushOutcome,
    PushRequest,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Payment channel for M-PESA STK push
pub const PAYMENT_CHANNEL: &str = "M-PESA STK Push";

/// Kopokopo push gateway
pub struct KopokopoGateway {
    config: Arc<KopokopoConfig>,
    client: Client,
    tokens: TokenManager,
}

impl KopokopoGateway {
    /// Create a gateway; fails if the HTTP client cannot be built
    pub fn new(config: KopokopoConfig) -> PaymentResult<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        let config = Arc::new(config);
        if config.webhook_secret.is_none() {
            warn!("KOPOKOPO_WEBHOOK_SECRET not set; callbacks are accepted without a signature");
        }

        Ok(Self {
            tokens: TokenManager::new(config.clone(), client.clone()),
            config,
            client,
        })
    }

    /// Create from environment variables
    pub fn from_env() -> PaymentResult<Self> {
        Self::new(KopokopoConfig::from_env()?)
    }

    pub fn config(&self) -> &KopokopoConfig {
        &self.config
    }

    fn build_body<'a>(&'a self, request: &'a PushRequest) -> IncomingPaymentRequest<'a> {
        IncomingPaymentRequest {
            payment_channel: PAYMENT_CHANNEL,
            till_number: &self.config.credentials.till_number,
            subscriber: Subscriber {
                phone_number: request.phone.as_str(),
            },
            amount: Amount {
                currency: request.amount.currency.as_str(),
                value: request.amount.provider_value(),
            },
            links: Links {
                callback_url: &self.config.credentials.callback_url,
            },
        }
    }
}

#[async_trait]
impl PushGateway for KopokopoGateway {
    async fn acquire_token(&self) -> PaymentResult<AccessToken> {
        self.tokens.acquire().await
    }

    #[instrument(skip(self, request, token), fields(order_id = %request.order_id))]
    async fn send_push(&self, request: &PushRequest, token: &AccessToken) -> PaymentResult<PushOutcome> {
        let body = self.build_body(request);
        debug!(
            "Posting incoming payment: till={}, value={}",
            body.till_number, body.amount.value
        );

        let response = self
            .client
            .post(self.config.incoming_payments_url())
            .header("Authorization", token.bearer_header())
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| PaymentError::provider(PROVIDER, transport_message(&e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PaymentError::provider(PROVIDER, transport_message(&e)))?;

        if status == StatusCode::UNAUTHORIZED {
            warn!("Push rejected the bearer token; next push will refresh it");
            self.tokens.invalidate().await;
        }

        let outcome = decode_push_response(status.as_u16(), &text);
        if let PushOutcome::Accepted { reference } = &outcome {
            info!("Kopokopo accepted push: reference={}", reference);
        }
        Ok(outcome)
    }

    #[instrument(skip(self, payload, signature))]
    async fn verify_callback(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> PaymentResult<ProviderCallback> {
        if let Some(secret) = &self.config.webhook_secret {
            let signature = signature.ok_or_else(|| {
                PaymentError::WebhookVerificationFailed("Missing signature header".to_string())
            })?;
            verify_signature(secret, payload, signature)?;
        }

        parse_callback(payload)
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

/// Decode a push response: accepted only on 2xx with a non-empty `data.id`
pub fn decode_push_response(status: u16, body: &str) -> PushOutcome {
    let reference = (200..300)
        .contains(&status)
        .then(|| serde_json::from_str::<IncomingPaymentResponse>(body).ok())
        .flatten()
        .and_then(|r| r.data)
        .and_then(|d| d.id)
        .filter(|id| !id.trim().is_empty());

    match reference {
        Some(reference) => PushOutcome::Accepted { reference },
        None => PushOutcome::Rejected {
            status,
            raw_body: body.to_string(),
        },
    }
}

// =============================================================================
// Kopokopo API Types
// =============================================================================

#[derive(Debug, Serialize)]
struct IncomingPaymentRequest<'a> {
    payment_channel: &'static str,
    till_number: &'a str,
    subscriber: Subscriber<'a>,
    amount: Amount<'a>,
    #[serde(rename = "_links")]
    links: Links<'a>,
}

#[derive(Debug, Serialize)]
struct Subscriber<'a> {
    phone_number: &'a str,
}

#[derive(Debug, Serialize)]
struct Amount<'a> {
    currency: &'a str,
    value: String,
}

#[derive(Debug, Serialize)]
struct Links<'a> {
    callback_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct IncomingPaymentResponse {
    #[serde(default)]
    data: Option<IncomingPaymentData>,
}

#[derive(Debug, Deserialize)]
struct IncomingPaymentData {
    #[serde(default)]
    id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pay_core::{Currency, OrderId, Phone, Price};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer) -> KopokopoGateway {
        let config = KopokopoConfig::new("cid", "csecret", "K000000", "https://shop.example/webhook/kopokopo")
            .with_api_base_url(server.uri());
        KopokopoGateway::new(config).unwrap()
    }

    fn request(amount: Price) -> PushRequest {
        PushRequest {
            order_id: OrderId::new("o1"),
            phone: Phone::normalize("0722000111").unwrap(),
            amount,
        }
    }

    fn token() -> AccessToken {
        AccessToken::new("tok", Utc::now(), None)
    }

    #[test]
    fn test_decode_push_response() {
        assert_eq!(
            decode_push_response(201, r#"{"data":{"id":"tx_1"}}"#),
            PushOutcome::Accepted { reference: "tx_1".into() }
        );
        assert!(matches!(
            decode_push_response(200, r#"{"data":{}}"#),
            PushOutcome::Rejected { status: 200, .. }
        ));
        assert!(matches!(
            decode_push_response(200, r#"{"data":{"id":""}}"#),
            PushOutcome::Rejected { .. }
        ));
        assert!(matches!(
            decode_push_response(200, "<html>ok</html>"),
            PushOutcome::Rejected { .. }
        ));
        assert!(matches!(
            decode_push_response(400, r#"{"data":{"id":"tx_1"}}"#),
            PushOutcome::Rejected { status: 400, .. }
        ));
    }

    #[tokio::test]
    async fn test_push_body_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/incoming_payments"))
            .and(header("Authorization", "Bearer tok"))
            .and(header("Accept", "application/json"))
            .and(body_json(json!({
                "payment_channel": "M-PESA STK Push",
                "till_number": "K000000",
                "subscriber": { "phone_number": "254722000111" },
                "amount": { "currency": "KES", "value": "500" },
                "_links": { "callback_url": "https://shop.example/webhook/kopokopo" }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"data": {"id": "tx_1"}})))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = gateway(&server)
            .send_push(&request(Price::from_major(500, Currency::kes())), &token())
            .await
            .unwrap();
        assert_eq!(outcome, PushOutcome::Accepted { reference: "tx_1".into() });
    }

    #[tokio::test]
    async fn test_zero_total_is_still_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/incoming_payments"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"data": {"id": "tx_0"}})))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = gateway(&server)
            .send_push(&request(Price::zero(Currency::kes())), &token())
            .await
            .unwrap();
        assert!(matches!(outcome, PushOutcome::Accepted { .. }));
    }

    #[tokio::test]
    async fn test_200_without_id_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/incoming_payments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .mount(&server)
            .await;

        let outcome = gateway(&server)
            .send_push(&request(Price::from_major(10, Currency::kes())), &token())
            .await
            .unwrap();
        assert!(matches!(outcome, PushOutcome::Rejected { status: 200, .. }));
    }

    #[tokio::test]
    async fn test_401_invalidates_cached_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok"})))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/incoming_payments"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let gateway = gateway(&server);
        let token = gateway.acquire_token().await.unwrap();
        let outcome = gateway
            .send_push(&request(Price::from_major(10, Currency::kes())), &token)
            .await
            .unwrap();
        assert!(matches!(outcome, PushOutcome::Rejected { status: 401, .. }));

        gateway.acquire_token().await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/incoming_payments"))
            .respond_with(ResponseTemplate::new(201).set_delay(std::time::Duration::from_millis(500)))
            .mount(&server)
            .await;

        let config = KopokopoConfig::new("cid", "csecret", "K0", "https://shop.example/cb")
            .with_api_base_url(server.uri())
            .with_timeout(std::time::Duration::from_millis(50));
        let gateway = KopokopoGateway::new(config).unwrap();

        let err = gateway
            .send_push(&request(Price::from_major(10, Currency::kes())), &token())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::ProviderError { ref message, .. } if message.contains("timed out")));
    }

    #[tokio::test]
    async fn test_signed_callbacks_when_secret_configured() {
        let server = MockServer::start().await;
        let config = KopokopoConfig::new("cid", "csecret", "K0", "https://shop.example/cb")
            .with_api_base_url(server.uri())
            .with_webhook_secret("whsec");
        let gateway = KopokopoGateway::new(config).unwrap();

        let payload = br#"{"reference":"tx_1","outcome":"success"}"#;
        assert!(matches!(
            gateway.verify_callback(payload, None).await,
            Err(PaymentError::WebhookVerificationFailed(_))
        ));
        assert!(matches!(
            gateway.verify_callback(payload, Some("deadbeef")).await,
            Err(PaymentError::WebhookVerificationFailed(_))
        ));

        let signature = crate::webhook::sign("whsec", payload).unwrap();
        let callback = gateway.verify_callback(payload, Some(&signature)).await.unwrap();
        assert_eq!(callback.reference, "tx_1");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = KopokopoConfig::new("", "csecret", "K0", "https://shop.example/cb");
        assert!(matches!(
            KopokopoGateway::new(config),
            Err(PaymentError::Configuration(_))
        ));
    }
}
