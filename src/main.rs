//! Recque · Adaptive Quiz Backend
//!
//! - Axum HTTP + WebSocket API over learning sessions
//! - Recursive learning stack: wrong answers drill down, right answers pop back
//! - OpenAI question source, or a deterministic offline source (mock mode / no key)
//!
//! Important env variables:
//!   PORT               : u16 (default 3000, overrides [server].port)
//!   OPENAI_API_KEY     : enables the OpenAI source if present
//!   OPENAI_BASE_URL    : default "https://api.openai.com/v1"
//!   RECQUE_MODEL       : gpt-4o | gpt-4o-mini | o3-mini (default "gpt-4o-mini")
//!   RECQUE_MOCK_MODE   : "1" / "true" / "yes" forces the offline source
//!   RECQUE_CONFIG_PATH : path to TOML config ([prompts], [engine], [server])
//!   LOG_LEVEL          : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT         : "pretty" (default) or "json"

mod telemetry;
mod util;
mod error;
mod domain;
mod config;
mod cache;
mod stack;
mod seeds;
mod source;
mod engine;
mod session;
mod store;
mod state;
mod protocol;
mod logic;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::AppConfig;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let cfg = AppConfig::from_env();
  let addr = SocketAddr::from(([0, 0, 0, 0], cfg.server.port));

  // Source, cache and session store are all chosen from the config.
  let state = Arc::new(AppState::new(cfg).await);
  let app = build_router(state);

  let listener = TcpListener::bind(addr).await?;
  info!(target: "recque_backend", %addr, "HTTP server listening");
  axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "recque_backend", error = %e, "Failed to listen for shutdown signal");
  }
  info!(target: "recque_backend", "Shutting down");
}
