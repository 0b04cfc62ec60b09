mod config;
mod error;
mod gemini;
mod models;
mod router;
mod translator;

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::AppConfig;
use gemini::GeminiClient;
use router::{run_router, RouterState};
use translator::RequestTranslator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // A missing .env is fine; the process environment may already be populated.
  let _ = dotenvy::dotenv();

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let config = AppConfig::from_env().context("failed to load configuration")?;
  info!(model = %config.model, uploads_dir = %config.uploads_dir.display(), "docrelay starting up");

  let client = Arc::new(GeminiClient::new(&config));
  let translator = RequestTranslator::new(client, config.system_instruction.clone())
    .with_uploads_dir(config.uploads_dir.clone());

  let addr = config.listen_addr()?;
  let listener = std::net::TcpListener::bind(addr).with_context(|| format!("failed to bind {addr}"))?;

  run_router(
    listener,
    RouterState {
      translator,
      max_upload_bytes: config.max_upload_bytes,
    },
  )
  .await
}
