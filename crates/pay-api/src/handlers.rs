//! # Request Handlers
//!
//! Axum request handlers for the push-payment API.
//! Shopper-facing failures carry `PaymentError::user_message()` only; the
//! full error goes to the log.

use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use pay_core::{CallbackAck, Order, OrderId, OrderStatus, PaymentError};
use pay_kopokopo::SIGNATURE_HEADER;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

/// Header carrying the storefront session id
pub const SESSION_HEADER: &str = "x-session-id";

/// Cookie carrying the storefront session id
pub const SESSION_COOKIE: &str = "session_id";

// =============================================================================
// Request/Response Types
// =============================================================================

/// Shopper push trigger
#[derive(Debug, Deserialize)]
pub struct StkPushRequest {
    /// Local-format M-PESA number (07XXXXXXXX)
    pub phone: String,
    /// Amount shown on the checkout page; logged, never charged
    #[serde(default)]
    pub amount: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct StkPushResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PlaceOrderResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Serialize)]
pub struct ExpireResponse {
    pub expired: Vec<OrderId>,
    pub count: usize,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}

fn status_of(err: &PaymentError) -> StatusCode {
    StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn payment_error_to_response(err: PaymentError) -> (StatusCode, Json<ErrorResponse>) {
    let status = status_of(&err);
    (status, Json(ErrorResponse::new(err.user_message(), status.as_u16())))
}

/// Session id from `X-Session-Id`, falling back to the `session_id` cookie
pub fn session_id(headers: &HeaderMap) -> Option<String> {
    let from_header = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    if let Some(id) = from_header {
        return Some(id.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn missing_session<T>(build: impl FnOnce(String) -> T) -> (StatusCode, Json<T>) {
    (
        StatusCode::BAD_REQUEST,
        Json(build("Checkout session not found. Please reload the page".to_string())),
    )
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "stk-push",
        "version": env!("CARGO_PKG_VERSION"),
        "provider": state.provider_name()
    }))
}

/// Shopper pressed "Pay Now"
#[instrument(skip(state, headers, request))]
pub async fn stk_push(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Result<Json<StkPushRequest>, JsonRejection>,
) -> Result<Json<StkPushResponse>, (StatusCode, Json<StkPushResponse>)> {
    let failure = |message: String| StkPushResponse {
        success: false,
        message,
        order_id: None,
        reference: None,
    };

    let session = session_id(&headers).ok_or_else(|| missing_session(failure))?;

    let Json(request) = request.map_err(|rejection| {
        let e = PaymentError::Validation(rejection.body_text());
        info!("Push refused: {}", e);
        (status_of(&e), Json(failure(e.user_message().to_string())))
    })?;

    let claimed = request.amount.as_ref().map(|v| match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    });

    match state
        .service
        .request_push(&session, &request.phone, claimed.as_deref())
        .await
    {
        Ok(ack) => Ok(Json(StkPushResponse {
            success: true,
            message: "STK Push sent successfully.".to_string(),
            order_id: Some(ack.order_id),
            reference: Some(ack.reference),
        })),
        Err(e) => {
            match &e {
                PaymentError::Validation(_) => info!("Push refused: {}", e),
                _ => error!("Push failed: {}", e),
            }
            Err((status_of(&e), Json(failure(e.user_message().to_string()))))
        }
    }
}

/// Checkout "place order" after a push
#[instrument(skip(state, headers))]
pub async fn place_order(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<PlaceOrderResponse>, (StatusCode, Json<PlaceOrderResponse>)> {
    let failure = |message: String| PlaceOrderResponse {
        success: false,
        message,
        order_id: None,
        status: None,
    };

    let session = session_id(&headers).ok_or_else(|| missing_session(failure))?;

    match state.service.place_order(&session).await {
        Ok(order) => {
            let message = match order.status {
                OrderStatus::Confirmed => "Payment received. Thank you for your order.",
                _ => "Order placed. Awaiting M-PESA confirmation.",
            };
            Ok(Json(PlaceOrderResponse {
                success: true,
                message: message.to_string(),
                order_id: Some(order.id),
                status: Some(order.status),
            }))
        }
        Err(e) => {
            warn!("Place order refused: {}", e);
            Err((status_of(&e), Json(failure(e.user_message().to_string()))))
        }
    }
}

/// Order snapshot (expires the order first if overdue)
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<Order>, (StatusCode, Json<ErrorResponse>)> {
    state
        .service
        .order_status(&OrderId::new(order_id))
        .await
        .map(Json)
        .map_err(payment_error_to_response)
}

/// Expire every order whose confirmation window has elapsed
pub async fn expire_orders(
    State(state): State<AppState>,
) -> Result<Json<ExpireResponse>, (StatusCode, Json<ErrorResponse>)> {
    let expired = state.service.expire_stale_orders().await.map_err(|e| {
        error!("Expiry sweep failed: {}", e);
        payment_error_to_response(e)
    })?;

    Ok(Json(ExpireResponse {
        count: expired.len(),
        expired,
    }))
}

/// Provider callback. Always answers 200 so the provider does not redeliver.
#[instrument(skip(state, headers, body), fields(bytes = body.len()))]
pub async fn provider_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<CallbackAck>) {
    if provider != state.provider_name() {
        warn!("Callback for inactive provider {:?}", provider);
        return (
            StatusCode::OK,
            Json(CallbackAck {
                status: "ignored",
                message: format!("provider {} is not active", provider),
            }),
        );
    }

    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let ack = state.service.handle_callback(&body, signature).await;

    info!("Callback handled: status={}, message={}", ack.status, ack.message);
    (StatusCode::OK, Json(ack))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_session_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, HeaderValue::from_static(" S1 "));
        headers.insert(header::COOKIE, HeaderValue::from_static("session_id=S2"));
        assert_eq!(session_id(&headers).as_deref(), Some("S1"));
    }

    #[test]
    fn test_session_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session_id=abc123; other=1"),
        );
        assert_eq!(session_id(&headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn test_no_session() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_id(&headers), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("session_id="));
        assert_eq!(session_id(&headers), None);
    }

    #[test]
    fn test_error_response_hides_detail() {
        let (status, Json(body)) = payment_error_to_response(PaymentError::provider(
            "kopokopo",
            "HTTP 500: secret stack trace",
        ));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.error, "STK Push failed");
    }
}
