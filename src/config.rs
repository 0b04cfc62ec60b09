use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::{RelayError, RelayResult};

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a PDF-based RAG assistant. Answer only from uploaded documents. \
You have access to metadata. Cite the page as [page x] when it is available.";

#[derive(Clone, Debug)]
pub struct AppConfig {
  pub api_key: String,
  pub host: String,
  pub port: u16,
  pub model: String,
  pub api_base: String,
  pub uploads_dir: PathBuf,
  pub system_instruction: String,
  pub max_upload_bytes: usize,
}

impl AppConfig {
  /// Builds a config with defaults for everything except the API key.
  pub fn with_api_key(api_key: impl Into<String>) -> Self {
    Self {
      api_key: api_key.into(),
      host: "0.0.0.0".to_string(),
      port: 8000,
      model: "gemini-2.5-flash".to_string(),
      api_base: "https://generativelanguage.googleapis.com".to_string(),
      uploads_dir: PathBuf::from("uploads"),
      system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
      max_upload_bytes: 100 * 1024 * 1024,
    }
  }

  pub fn from_env() -> RelayResult<Self> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  pub fn from_lookup<F>(lookup: F) -> RelayResult<Self>
  where
    F: Fn(&str) -> Option<String>,
  {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    let api_key = get("GEMINI_API_KEY")
      .ok_or_else(|| RelayError::Config("GEMINI_API_KEY not found in environment variables".to_string()))?;
    let mut config = Self::with_api_key(api_key.trim());

    if let Some(port) = get("PORT") {
      config.port = port
        .trim()
        .parse()
        .map_err(|_| RelayError::Config(format!("PORT is not a valid port number: {port}")))?;
    }
    if let Some(mb) = get("MAX_UPLOAD_MB") {
      let mb: usize = mb
        .trim()
        .parse()
        .map_err(|_| RelayError::Config(format!("MAX_UPLOAD_MB is not a number: {mb}")))?;
      config.max_upload_bytes = mb
        .checked_mul(1024 * 1024)
        .ok_or_else(|| RelayError::Config(format!("MAX_UPLOAD_MB is too large: {mb}")))?;
    }
    if let Some(host) = get("HOST") {
      config.host = host;
    }
    if let Some(model) = get("GEMINI_MODEL") {
      config.model = model;
    }
    if let Some(base) = get("GEMINI_API_BASE") {
      config.api_base = base.trim_end_matches('/').to_string();
    }
    if let Some(dir) = get("UPLOADS_DIR") {
      config.uploads_dir = PathBuf::from(dir);
    }
    if let Some(instruction) = get("SYSTEM_INSTRUCTION") {
      config.system_instruction = instruction;
    }

    Ok(config)
  }

  pub fn listen_addr(&self) -> RelayResult<SocketAddr> {
    format!("{}:{}", self.host, self.port)
      .parse()
      .map_err(|_| RelayError::Config(format!("invalid listen address {}:{}", self.host, self.port)))
  }
}
