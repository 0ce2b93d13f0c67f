//! # Phone Normalization
//!
//! Server-side validation of the payer's M-PESA number. The checkout form also
//! checks the format, but that check is advisory only.

use crate::error::{PaymentError, PaymentResult};
use serde::{Deserialize, Serialize};

/// Country calling code that replaces the local leading `0`
pub const COUNTRY_CALLING_CODE: &str = "254";

/// Digits that follow the leading `0` in a local mobile number
const LOCAL_SUBSCRIBER_DIGITS: usize = 9;

/// A phone number in the provider's international format (`2547XXXXXXXX`)
///
/// Deserializing runs the same validation as [`Phone::normalize`], and also
/// accepts the international form this type serializes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Phone(String);

impl Phone {
    /// Validate a local-format number (`0` + 9 digits) and rewrite it as
    /// `254` + 9 digits. Any other shape is a `Validation` error.
    pub fn normalize(raw: &str) -> PaymentResult<Self> {
        let subscriber = raw
            .strip_prefix('0')
            .filter(|rest| {
                rest.len() == LOCAL_SUBSCRIBER_DIGITS && rest.bytes().all(|b| b.is_ascii_digit())
            })
            .ok_or_else(|| {
                PaymentError::Validation(
                    "expected a leading 0 followed by 9 digits (07XXXXXXXX)".to_string(),
                )
            })?;

        Ok(Self(format!("{}{}", COUNTRY_CALLING_CODE, subscriber)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Masked form for logs, e.g. `2547****678`
    pub fn masked(&self) -> String {
        let digits = &self.0;
        match (digits.get(..4), digits.get(digits.len().saturating_sub(3)..)) {
            (Some(head), Some(tail)) if digits.len() >= 8 => format!("{}****{}", head, tail),
            _ => "****".to_string(),
        }
    }
}

impl TryFrom<String> for Phone {
    type Error = PaymentError;

    fn try_from(raw: String) -> PaymentResult<Self> {
        let international = raw
            .strip_prefix(COUNTRY_CALLING_CODE)
            .map(|rest| {
                rest.len() == LOCAL_SUBSCRIBER_DIGITS && rest.bytes().all(|b| b.is_ascii_digit())
            })
            .unwrap_or(false);

        if international {
            Ok(Self(raw))
        } else {
            Self::normalize(&raw)
        }
    }
}

impl From<Phone> for String {
    fn from(phone: Phone) -> Self {
        phone.0
    }
}

impl std::fmt::Display for Phone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Free-function form of [`Phone::normalize`]
pub fn normalize(raw: &str) -> PaymentResult<Phone> {
    Phone::normalize(raw)
}
