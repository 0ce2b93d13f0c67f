//! # STK Push RS
//!
//! M-PESA STK push payment service.
//!
//! ## Usage
//!
//! ```bash
//! # Set environment variables
//! export KOPOKOPO_CLIENT_ID=...
//! export KOPOKOPO_CLIENT_SECRET=...
//! export KOPOKOPO_TILL_NUMBER=K000000
//! export KOPOKOPO_CALLBACK_URL=https://shop.example/webhook/kopokopo
//!
//! # Or try it without credentials
//! export PUSH_PROVIDER=demo
//!
//! # Run the server
//! push-cart
//! ```

use pay_api::{routes, state::AppState};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    print_banner();

    let state = AppState::new()?;

    let addr = state.config.socket_addr()?;
    let is_prod = state.config.is_production();
    let callback_path = state.service.gateway().callback_path();

    info!("Environment: {}", state.config.environment);
    info!("Push provider: {}", state.provider_name());
    info!(
        "Confirmation window: {}s",
        state.service.confirmation_window().num_seconds()
    );

    let app = routes::create_router(state);

    info!("push-cart starting on http://{}", addr);

    if !is_prod {
        info!("Health: http://{}/health", addr);
        info!("Push: POST http://{}/api/v1/stk-push", addr);
        info!("Callback: POST http://{}{}", addr, callback_path);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
  STK Push RS
  ━━━━━━━━━━━━━━━━━━━━━━━
  M-PESA push payments
  Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
