//! # Kopokopo Configuration
//!
//! The Credential Set and client tunables for the Kopokopo integration.
//! Values come from environment variables, optionally layered over a TOML
//! credentials file named by `KOPOKOPO_CREDENTIALS_FILE`.

use chrono::Duration;
use pay_core::PaymentError;
use serde::Deserialize;
use std::env;
use std::path::Path;

/// Production API host
pub const DEFAULT_API_BASE_URL: &str = "https://api.kopokopo.com";

/// Tokens are treated as stale after 50 minutes
pub const DEFAULT_TOKEN_MAX_AGE_SECS: i64 = 3000;

/// Bound on every outbound request
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Merchant credentials, read-only once loaded
#[derive(Clone, Deserialize)]
pub struct CredentialSet {
    pub client_id: String,
    pub client_secret: String,
    pub till_number: String,
    pub callback_url: String,
}

impl std::fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSet")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("till_number", &self.till_number)
            .field("callback_url", &self.callback_url)
            .finish()
    }
}

/// Kopokopo API configuration
#[derive(Clone)]
pub struct KopokopoConfig {
    pub credentials: CredentialSet,

    /// API base URL (overridable for sandbox and mocks)
    pub api_base_url: String,

    /// Shared secret for `X-KopoKopo-Signature`; callbacks are accepted
    /// unauthenticated when unset
    pub webhook_secret: Option<String>,

    /// Age after which a cached token is refreshed
    pub token_max_age: Duration,

    /// Timeout for token and push requests
    pub timeout: std::time::Duration,
}

impl std::fmt::Debug for KopokopoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KopokopoConfig")
            .field("credentials", &self.credentials)
            .field("api_base_url", &self.api_base_url)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "<redacted>"))
            .field("token_max_age", &self.token_max_age)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Shape of the optional TOML credentials file
#[derive(Default, Deserialize)]
struct CredentialsFile {
    client_id: Option<String>,
    client_secret: Option<String>,
    till_number: Option<String>,
    callback_url: Option<String>,
    api_base_url: Option<String>,
    webhook_secret: Option<String>,
}

impl KopokopoConfig {
    /// Load configuration from environment variables.
    ///
    /// Required (from env or the credentials file):
    /// - `KOPOKOPO_CLIENT_ID`
    /// - `KOPOKOPO_CLIENT_SECRET`
    /// - `KOPOKOPO_TILL_NUMBER`
    /// - `KOPOKOPO_CALLBACK_URL`
    pub fn from_env() -> Result<Self, PaymentError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let file = match env::var("KOPOKOPO_CREDENTIALS_FILE") {
            Ok(path) => read_credentials_file(Path::new(&path))?,
            Err(_) => CredentialsFile::default(),
        };

        Self::from_sources(file, |key| env::var(key).ok())
    }

    /// Create config with explicit values (for testing)
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        till_number: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            credentials: CredentialSet {
                client_id: client_id.into(),
                client_secret: client_secret.into(),
                till_number: till_number.into(),
                callback_url: callback_url.into(),
            },
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            webhook_secret: None,
            token_max_age: Duration::seconds(DEFAULT_TOKEN_MAX_AGE_SECS),
            timeout: std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Builder: set custom API base URL (for testing)
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Builder: require signed callbacks
    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }

    /// Builder: override the token safety margin
    pub fn with_token_max_age(mut self, max_age: Duration) -> Self {
        self.token_max_age = max_age;
        self
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn token_url(&self) -> String {
        format!("{}/oauth/token", self.api_base_url)
    }

    pub fn incoming_payments_url(&self) -> String {
        format!("{}/api/v1/incoming_payments", self.api_base_url)
    }

    /// Check the loaded values before the gateway is built
    pub fn validate(&self) -> Result<(), PaymentError> {
        let required = [
            ("KOPOKOPO_CLIENT_ID", &self.credentials.client_id),
            ("KOPOKOPO_CLIENT_SECRET", &self.credentials.client_secret),
            ("KOPOKOPO_TILL_NUMBER", &self.credentials.till_number),
            ("KOPOKOPO_CALLBACK_URL", &self.credentials.callback_url),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(PaymentError::Configuration(format!("{} is empty", name)));
            }
        }

        let url = &self.credentials.callback_url;
        if !url.starts_with("https://") && !url.starts_with("http://") {
            return Err(PaymentError::Configuration(
                "KOPOKOPO_CALLBACK_URL must be an http(s) URL".to_string(),
            ));
        }

        if self.token_max_age <= Duration::zero() {
            return Err(PaymentError::Configuration(
                "KOPOKOPO_TOKEN_MAX_AGE_SECS must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Build from a parsed credentials file plus variable lookups; lookups win.
    fn from_sources(
        file: CredentialsFile,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, PaymentError> {
        let value = |key: &str, fallback: Option<String>| lookup(key).or(fallback);
        let required = |key: &str, fallback: Option<String>| {
            value(key, fallback)
                .ok_or_else(|| PaymentError::Configuration(format!("{} not set", key)))
        };

        let mut config = Self::new(
            required("KOPOKOPO_CLIENT_ID", file.client_id)?,
            required("KOPOKOPO_CLIENT_SECRET", file.client_secret)?,
            required("KOPOKOPO_TILL_NUMBER", file.till_number)?,
            required("KOPOKOPO_CALLBACK_URL", file.callback_url)?,
        );

        if let Some(url) = value("KOPOKOPO_API_BASE_URL", file.api_base_url) {
            config = config.with_api_base_url(url);
        }

        config.webhook_secret =
            value("KOPOKOPO_WEBHOOK_SECRET", file.webhook_secret).filter(|s| !s.is_empty());

        if let Some(secs) = lookup("KOPOKOPO_TOKEN_MAX_AGE_SECS") {
            let secs: i64 = secs.parse().map_err(|_| {
                PaymentError::Configuration("KOPOKOPO_TOKEN_MAX_AGE_SECS must be a number".to_string())
            })?;
            config.token_max_age = Duration::seconds(secs);
        }

        if let Some(secs) = lookup("KOPOKOPO_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                PaymentError::Configuration("KOPOKOPO_TIMEOUT_SECS must be a number".to_string())
            })?;
            config.timeout = std::time::Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }
}

fn read_credentials_file(path: &Path) -> Result<CredentialsFile, PaymentError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        PaymentError::Configuration(format!("Cannot read {}: {}", path.display(), e))
    })?;
    parse_credentials_file(&raw)
}

fn parse_credentials_file(raw: &str) -> Result<CredentialsFile, PaymentError> {
    toml::from_str(raw)
        .map_err(|e| PaymentError::Configuration(format!("Invalid credentials file: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const FULL: &[(&str, &str)] = &[
        ("KOPOKOPO_CLIENT_ID", "cid"),
        ("KOPOKOPO_CLIENT_SECRET", "csecret"),
        ("KOPOKOPO_TILL_NUMBER", "K000000"),
        ("KOPOKOPO_CALLBACK_URL", "https://shop.example/webhook/kopokopo"),
    ];

    #[test]
    fn test_defaults() {
        let config = KopokopoConfig::from_sources(CredentialsFile::default(), lookup(FULL)).unwrap();

        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.token_max_age, Duration::minutes(50));
        assert_eq!(config.timeout, std::time::Duration::from_secs(60));
        assert!(config.webhook_secret.is_none());
        assert_eq!(config.token_url(), "https://api.kopokopo.com/oauth/token");
        assert_eq!(
            config.incoming_payments_url(),
            "https://api.kopokopo.com/api/v1/incoming_payments"
        );
    }

    #[test]
    fn test_missing_required_value() {
        let result = KopokopoConfig::from_sources(
            CredentialsFile::default(),
            lookup(&FULL[..3]),
        );
        assert!(matches!(result, Err(PaymentError::Configuration(msg)) if msg.contains("KOPOKOPO_CALLBACK_URL")));
    }

    #[test]
    fn test_callback_url_must_be_http() {
        let mut pairs = FULL.to_vec();
        pairs[3] = ("KOPOKOPO_CALLBACK_URL", "shop.example/callback");
        assert!(KopokopoConfig::from_sources(CredentialsFile::default(), lookup(&pairs)).is_err());
    }

    #[test]
    fn test_file_values_with_env_override() {
        let file = parse_credentials_file(
            r#"
            client_id = "file-id"
            client_secret = "file-secret"
            till_number = "K111111"
            callback_url = "https://file.example/cb"
            api_base_url = "https://sandbox.kopokopo.com/"
            webhook_secret = "whsec"
            "#,
        )
        .unwrap();

        let config = KopokopoConfig::from_sources(
            file,
            lookup(&[("KOPOKOPO_TILL_NUMBER", "K222222"), ("KOPOKOPO_TIMEOUT_SECS", "5")]),
        )
        .unwrap();

        assert_eq!(config.credentials.client_id, "file-id");
        assert_eq!(config.credentials.till_number, "K222222");
        assert_eq!(config.api_base_url, "https://sandbox.kopokopo.com");
        assert_eq!(config.webhook_secret.as_deref(), Some("whsec"));
        assert_eq!(config.timeout, std::time::Duration::from_secs(5));
    }

    #[test]
    fn test_bad_number() {
        let mut pairs = FULL.to_vec();
        pairs.push(("KOPOKOPO_TOKEN_MAX_AGE_SECS", "soon"));
        assert!(KopokopoConfig::from_sources(CredentialsFile::default(), lookup(&pairs)).is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = KopokopoConfig::new("cid", "super-secret", "K0", "https://x")
            .with_webhook_secret("hook-secret");
        let printed = format!("{:?}", config);
        assert!(!printed.contains("super-secret"));
        assert!(!printed.contains("hook-secret"));
        assert!(printed.contains("<redacted>"));
    }
}
