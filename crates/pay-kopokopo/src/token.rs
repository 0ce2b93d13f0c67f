//! # Token Manager
//!
//! OAuth client-credentials tokens for the Kopokopo API, cached in memory.
//! The cache lock is held across the refresh request, so concurrent callers
//! wait for one refresh instead of each issuing their own.

use crate::config::KopokopoConfig;
use crate::PROVIDER;
use chrono::{Duration, Utc};
use pay_core::{AccessToken, PaymentError, PaymentResult};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

pub struct TokenManager {
    config: Arc<KopokopoConfig>,
    client: Client,
    cached: Mutex<Option<AccessToken>>,
}

impl TokenManager {
    pub fn new(config: Arc<KopokopoConfig>, client: Client) -> Self {
        Self {
            config,
            client,
            cached: Mutex::new(None),
        }
    }

    /// Return the cached token while fresh, otherwise fetch a new one
    #[instrument(skip(self))]
    pub async fn acquire(&self) -> PaymentResult<AccessToken> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.is_fresh_at(Utc::now(), self.config.token_max_age) {
                debug!("Using cached access token");
                return Ok(token.clone());
            }
            debug!("Cached access token is stale");
        }

        let token = self.fetch().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached token (the provider rejected it)
    pub async fn invalidate(&self) {
        if self.cached.lock().await.take().is_some() {
            info!("Discarded cached access token");
        }
    }

    async fn fetch(&self) -> PaymentResult<AccessToken> {
        let credentials = &self.config.credentials;
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
        ];

        let response = self
            .client
            .post(self.config.token_url())
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| PaymentError::auth(PROVIDER, transport_message(&e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::auth(PROVIDER, transport_message(&e)))?;

        if !status.is_success() {
            // Body may echo credentials; log the status only.
            error!("Token request rejected: status={}", status);
            return Err(PaymentError::auth(PROVIDER, format!("token endpoint returned HTTP {}", status)));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|_| PaymentError::auth(PROVIDER, "token response is not JSON"))?;

        let value = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PaymentError::auth(PROVIDER, "token response has no access_token"))?;

        let expires_in = parsed.expires_in.filter(|s| *s > 0).map(Duration::seconds);
        info!("Obtained access token (expires_in={:?})", expires_in.map(|d| d.num_seconds()));

        Ok(AccessToken::new(value, Utc::now(), expires_in))
    }
}

/// Error text for a failed request, without URLs or bodies
pub(crate) fn transport_message(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        "provider unreachable".to_string()
    } else {
        "request failed".to_string()
    }
}
