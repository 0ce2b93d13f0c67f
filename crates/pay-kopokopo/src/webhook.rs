//! # Kopokopo Callback Handling
//!
//! Signature verification and decoding for the callbacks Kopokopo posts to
//! the configured callback URL once an STK push settles.

use hmac::{Hmac, Mac};
use pay_core::{CallbackOutcome, PaymentError, PaymentResult, ProviderCallback};
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the raw callback body
pub const SIGNATURE_HEADER: &str = "X-KopoKopo-Signature";

/// Hex HMAC-SHA256 of `payload` under `secret`
pub fn sign(secret: &str, payload: &[u8]) -> PaymentResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentError::Internal(format!("HMAC key rejected: {}", e)))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check `signature` against the body, in constant time
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> PaymentResult<()> {
    let expected = sign(secret, payload)?;
    let provided = signature.trim().to_ascii_lowercase();

    if !constant_time_compare(&provided, &expected) {
        return Err(PaymentError::WebhookVerificationFailed(
            "Signature mismatch".to_string(),
        ));
    }
    Ok(())
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Decode a callback body.
///
/// Accepts the Kopokopo resource shape
/// `{"data": {"id": ..., "attributes": {"status": "Success"}}}` and the flat
/// `{"reference": ..., "outcome": ...}` shape.
pub fn parse_callback(payload: &[u8]) -> PaymentResult<ProviderCallback> {
    let value: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|e| PaymentError::WebhookParseError(format!("Failed to parse callback: {}", e)))?;

    if value.get("data").is_none() {
        return ProviderCallback::from_flat_json(payload);
    }

    let envelope: ResourceCallback = serde_json::from_value(value)
        .map_err(|e| PaymentError::WebhookParseError(format!("Unexpected callback shape: {}", e)))?;

    let reference = envelope.data.id.trim().to_string();
    if reference.is_empty() {
        return Err(PaymentError::WebhookParseError(
            "Callback reference is empty".to_string(),
        ));
    }

    let attributes = envelope.data.attributes;
    debug!(
        "Decoded Kopokopo callback: reference={}, status={}",
        reference, attributes.status
    );

    Ok(ProviderCallback {
        reference,
        outcome: CallbackOutcome::parse(&attributes.status),
        metadata: attributes.event,
    })
}

#[derive(Debug, Deserialize)]
struct ResourceCallback {
    data: ResourceData,
}

#[derive(Debug, Deserialize)]
struct ResourceData {
    id: String,
    attributes: ResourceAttributes,
}

#[derive(Debug, Deserialize)]
struct ResourceAttributes {
    status: String,
    #[serde(default)]
    event: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resource_shape() {
        let payload = json!({
            "data": {
                "id": "tx_1",
                "type": "incoming_payment",
                "attributes": {
                    "initiation_time": "2024-01-01T10:00:00+03:00",
                    "status": "Success",
                    "event": { "type": "Incoming Payment Request", "errors": null }
                }
            }
        });

        let callback = parse_callback(payload.to_string().as_bytes()).unwrap();
        assert_eq!(callback.reference, "tx_1");
        assert_eq!(callback.outcome, CallbackOutcome::Success);
        assert_eq!(callback.metadata["type"], "Incoming Payment Request");
    }

    #[test]
    fn test_failed_resource() {
        let payload = json!({"data": {"id": "tx_2", "attributes": {"status": "Failed"}}});
        let callback = parse_callback(payload.to_string().as_bytes()).unwrap();
        assert_eq!(callback.outcome, CallbackOutcome::Failure);
    }

    #[test]
    fn test_flat_shape() {
        let callback = parse_callback(br#"{"reference":"tx_3","outcome":"success"}"#).unwrap();
        assert_eq!(callback.reference, "tx_3");
        assert_eq!(callback.outcome, CallbackOutcome::Success);
    }

    #[test]
    fn test_malformed_callbacks() {
        assert!(matches!(
            parse_callback(b"nope"),
            Err(PaymentError::WebhookParseError(_))
        ));
        assert!(parse_callback(br#"{"data":{"attributes":{"status":"Success"}}}"#).is_err());
        assert!(parse_callback(br#"{"data":{"id":" ","attributes":{"status":"Success"}}}"#).is_err());
        assert!(parse_callback(br#"{"outcome":"success"}"#).is_err());
    }

    #[test]
    fn test_signature_roundtrip() {
        let payload = br#"{"reference":"tx_1","outcome":"success"}"#;
        let signature = sign("whsec", payload).unwrap();

        assert_eq!(signature.len(), 64);
        assert!(verify_signature("whsec", payload, &signature).is_ok());
        assert!(verify_signature("whsec", payload, &signature.to_uppercase()).is_ok());
        assert!(verify_signature("other", payload, &signature).is_err());
        assert!(verify_signature("whsec", b"{}", &signature).is_err());
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc123", "abc123"));
        assert!(!constant_time_compare("abc123", "abc124"));
        assert!(!constant_time_compare("abc", "abcd"));
    }
}
