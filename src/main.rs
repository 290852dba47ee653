//! Service resilience runtime.
//!
//! Serves the health, metrics and breaker endpoints for a service built on
//! the `service_resilience` library.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                 SERVICE RESILIENCE                    │
//!   Inbound request  │  ┌────────────┐   ┌────────────┐   ┌──────────────┐  │
//!   ─────────────────┼─▶│ correlation│──▶│  handlers  │──▶│    health    │  │
//!                    │  │ middleware │   │ /health .. │   │  aggregator  │──┼──▶ dependency checks
//!                    │  └────────────┘   └────────────┘   └──────────────┘  │
//!                    │                                                       │
//!   Outbound call    │  ┌────────────┐   ┌────────────┐                     │
//!   ─────────────────┼─▶│   retry    │──▶│  breaker   │─────────────────────┼──▶ dependency
//!                    │  └────────────┘   └────────────┘                     │
//!                    │                                                       │
//!                    │  config (hot reload) · metrics · logging · lifecycle │
//!                    └──────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `service-resilience [config.toml]`. Without a path, defaults apply
//! and hot reload is off.

use std::path::PathBuf;
use std::time::Duration;

use tokio::net::TcpListener;

use service_resilience::config::{load_config, watcher::ConfigWatcher, ServiceConfig};
use service_resilience::http::HttpServer;
use service_resilience::lifecycle::{build_state, signals, Shutdown};
use service_resilience::observability::logging;

/// Grace period for in-flight requests after a stop signal, beyond the request timeout.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match &config_path {
        Some(path) => load_config(path)?,
        None => ServiceConfig::default(),
    };

    logging::init(&config.observability)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "service-resilience starting");
    tracing::info!(
        service = %config.service.name,
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        health_timeout_ms = config.health.timeout_ms,
        dependencies = config.health.dependencies.len(),
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    let state = build_state(config.clone(), shutdown.token())?;

    // Held for the life of the process; dropping it stops the watch.
    let _watcher = match &config_path {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let watcher = watcher.run()?;
            let reload_state = state.clone();
            tokio::spawn(async move {
                while let Some(new_config) = updates.recv().await {
                    reload_state.apply_config(new_config);
                }
            });
            Some(watcher)
        }
        None => None,
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(state);
    let mut serve = tokio::spawn(server.run(listener, shutdown.subscribe()));

    tokio::select! {
        result = &mut serve => {
            result??;
            tracing::info!("Shutdown complete");
            return Ok(());
        }
        _ = signals::shutdown_on_signal(&shutdown) => {}
    }

    let drain = Duration::from_secs(config.timeouts.request_secs) + DRAIN_GRACE;
    match tokio::time::timeout(drain, serve).await {
        Ok(result) => result??,
        Err(_) => tracing::warn!(drain_secs = drain.as_secs(), "Drain deadline passed, exiting"),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
