use thiserror::Error;

/// Failures raised while relaying requests to the model provider.
#[derive(Error, Debug)]
pub enum RelayError {
  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Request Error: {0}")]
  Request(String),

  #[error("HTTP Error: {status_code} - {message}")]
  Http { status_code: u16, message: String },

  #[error("Response Error: {0}")]
  Response(String),

  #[error("Invalid Upload: {0}")]
  InvalidUpload(String),

  #[error("Failed to delete {handle}: {source}")]
  Delete {
    handle: String,
    #[source]
    source: Box<RelayError>,
  },

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

impl RelayError {
  /// Provider status code carried by this error, looking through wrappers.
  pub fn upstream_status(&self) -> Option<u16> {
    match self {
      Self::Http { status_code, .. } => Some(*status_code),
      Self::Delete { source, .. } => source.upstream_status(),
      _ => None,
    }
  }
}

pub type RelayResult<T> = Result<T, RelayError>;
