//! Connects to an echo server, sends a message every few seconds and logs
//! everything that comes back, reconnecting as needed.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=debug cargo run --example echo --features tracing -- wss://echo.websocket.org
//! ```
//!
//! Optionally log to a file:
//! ```sh
//! LOG_FILE=echo.log RUST_LOG=debug cargo run --example echo --features tracing -- wss://echo.websocket.org
//! ```

use std::fs::File;
use std::time::Duration;

use futures::StreamExt as _;
use resilient_ws::Client;
use resilient_ws::config::Config;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Ok(path) = std::env::var("LOG_FILE") {
        let file = File::create(path)?;
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }

    let endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "wss://echo.websocket.org".to_owned());

    let config = Config::builder()
        .ping_interval(Duration::from_secs(5))
        .ping_failure_threshold(2)
        .build();
    let client = Client::new(&endpoint, config)?;

    client.on_state_change(|state| info!(%state, "connection state changed"))?;

    let mut messages = Box::pin(client.subscribe());
    tokio::spawn(async move {
        while let Some(message) = messages.next().await {
            match message {
                Ok(message) => info!(?message, "received"),
                Err(e) => warn!(error = %e, "transport error"),
            }
        }
    });

    client.connect()?;

    let mut ticker = tokio::time::interval(Duration::from_secs(3));
    for n in 0_u32.. {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {}
        }

        match client.send(format!("hello #{n}")).await {
            Ok(()) => info!(n, "sent"),
            Err(e) => error!(error = %e, "send failed"),
        }
    }

    client.disconnect()?;
    Ok(())
}
