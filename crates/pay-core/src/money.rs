//! # Money Types
//!
//! Order totals as read from the order store. The currency code is carried
//! opaquely; no conversion or per-currency logic happens here.

use serde::{Deserialize, Serialize};

/// Minor units per major unit. Opaque currencies all use two decimals.
const MINOR_PER_MAJOR: i64 = 100;

/// ISO 4217 currency code (upper-cased, otherwise uninterpreted)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_uppercase())
    }

    /// Kenyan shilling, the currency of M-PESA push payments
    pub fn kes() -> Self {
        Self("KES".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Currency {
    fn default() -> Self {
        Currency::kes()
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Price with amount in smallest currency unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Amount in smallest currency unit (cents)
    pub amount: i64,
    /// Currency
    pub currency: Currency,
}

impl Price {
    /// Create a price from whole major units (e.g. 500 KES)
    pub fn from_major(units: i64, currency: Currency) -> Self {
        Self {
            amount: units * MINOR_PER_MAJOR,
            currency,
        }
    }

    /// Create a price from smallest unit (cents)
    pub fn from_cents(amount: i64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// Zero in the given currency (fresh draft orders)
    pub fn zero(currency: Currency) -> Self {
        Self {
            amount: 0,
            currency,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    /// Amount in major units as sent to the provider: `"500"`, or
    /// `"500.50"` when there is a fractional part.
    pub fn provider_value(&self) -> String {
        let sign = if self.amount < 0 { "-" } else { "" };
        let abs = self.amount.unsigned_abs();
        let major = abs / MINOR_PER_MAJOR as u64;
        let minor = abs % MINOR_PER_MAJOR as u64;
        if minor == 0 {
            format!("{}{}", sign, major)
        } else {
            format!("{}{}.{:02}", sign, major, minor)
        }
    }

    /// Format for display (e.g., "KES 500.00")
    pub fn display(&self) -> String {
        let abs = self.amount.unsigned_abs();
        let sign = if self.amount < 0 { "-" } else { "" };
        format!(
            "{} {}{}.{:02}",
            self.currency,
            sign,
            abs / MINOR_PER_MAJOR as u64,
            abs % MINOR_PER_MAJOR as u64
        )
    }
}
