//! # Application State
//!
//! Shared state for the Axum application: the payment service (gateway,
//! stores, binder, initiator, reconciler) and configuration.

use pay_core::{
    DemoGateway, DemoMode, InMemoryOrderStore, InMemorySessionStore, PaymentService,
    ServiceSettings, SharedGateway,
};
use pay_kopokopo::KopokopoGateway;
use std::sync::Arc;
use tracing::warn;

/// Which push provider backs the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Kopokopo,
    /// Credential-free demo gateway
    Demo,
}

impl ProviderKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "kopokopo" => Some(ProviderKind::Kopokopo),
            "demo" | "dummy" => Some(ProviderKind::Demo),
            _ => None,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Environment (development, staging, production)
    pub environment: String,
    /// Push provider
    pub provider: ProviderKind,
    /// Seconds a pushed order waits for its callback before expiring
    pub confirmation_window_secs: i64,
}

impl AppConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let provider = match std::env::var("PUSH_PROVIDER") {
            Ok(raw) => ProviderKind::parse(&raw).unwrap_or_else(|| {
                warn!("Unknown PUSH_PROVIDER {:?}, using kopokopo", raw);
                ProviderKind::Kopokopo
            }),
            Err(_) => ProviderKind::Kopokopo,
        };

        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            provider,
            confirmation_window_secs: std::env::var("CONFIRMATION_WINDOW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|s: &i64| *s > 0)
                .unwrap_or(pay_core::service::DEFAULT_CONFIRMATION_WINDOW_SECS),
        }
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            confirmation_window: chrono::Duration::seconds(self.confirmation_window_secs),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Push payment orchestration
    pub service: Arc<PaymentService>,
    /// Application config
    pub config: AppConfig,
}

impl AppState {
    /// Create a new AppState from the environment, backed by in-memory stores
    pub fn new() -> anyhow::Result<Self> {
        let config = AppConfig::from_env();

        let gateway: SharedGateway = match config.provider {
            ProviderKind::Kopokopo => Arc::new(
                KopokopoGateway::from_env()
                    .map_err(|e| anyhow::anyhow!("Failed to initialize Kopokopo: {}", e))?,
            ),
            ProviderKind::Demo => Arc::new(DemoGateway::new(DemoMode::Accept)),
        };

        let service = PaymentService::new(
            gateway,
            Arc::new(InMemoryOrderStore::new()),
            Arc::new(InMemorySessionStore::new()),
            config.service_settings(),
        );

        Ok(Self::with_service(config, Arc::new(service)))
    }

    /// Build state around an existing service (tests, embedding)
    pub fn with_service(config: AppConfig, service: Arc<PaymentService>) -> Self {
        Self { service, config }
    }

    /// Name of the active provider
    pub fn provider_name(&self) -> &'static str {
        self.service.gateway().provider_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        AppConfig {
            host: "0.0.0.0".to_string(),
            port: 3000,
            environment: "test".to_string(),
            provider: ProviderKind::Demo,
            confirmation_window_secs: 900,
        }
    }

    #[test]
    fn test_socket_addr() {
        let addr = config().socket_addr().unwrap();
        assert_eq!(addr.to_string(), "0.0.0.0:3000");

        let bad = AppConfig {
            host: "not a host".to_string(),
            ..config()
        };
        assert!(bad.socket_addr().is_err());
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!(ProviderKind::parse("KopoKopo"), Some(ProviderKind::Kopokopo));
        assert_eq!(ProviderKind::parse("demo"), Some(ProviderKind::Demo));
        assert_eq!(ProviderKind::parse("stripe"), None);
    }

    #[test]
    fn test_service_settings() {
        let settings = config().service_settings();
        assert_eq!(settings.confirmation_window, chrono::Duration::minutes(15));
    }

    #[test]
    fn test_demo_state_reports_provider() {
        let service = PaymentService::new(
            Arc::new(DemoGateway::default()),
            Arc::new(InMemoryOrderStore::new()),
            Arc::new(InMemorySessionStore::new()),
            ServiceSettings::default(),
        );
        let state = AppState::with_service(config(), Arc::new(service));
        assert_eq!(state.provider_name(), "demo");
    }
}
