use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatTurn {
  pub role: String,
  pub content: String,
}

impl ChatTurn {
  pub fn is_user(&self) -> bool {
    self.role == "user"
  }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ChatRequest {
  pub message: String,
  #[serde(default)]
  pub history: Vec<ChatTurn>,
  #[serde(default)]
  pub file_ids: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SkippedAttachment {
  pub file_id: String,
  pub reason: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ChatResponse {
  pub response: String,
  pub attached_files: Vec<String>,
  pub skipped_files: Vec<SkippedAttachment>,
}

/// What the caller gets back from `/upload`. `file_id` and `uri` are both the provider URI.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UploadedFileRecord {
  pub filename: String,
  pub file_id: String,
  pub mime_type: String,
  pub uri: String,
}

/// Provider-side lifecycle of an uploaded file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
  #[default]
  StateUnspecified,
  Processing,
  Active,
  Failed,
  #[serde(other)]
  Unknown,
}

impl FileState {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::StateUnspecified => "STATE_UNSPECIFIED",
      Self::Processing => "PROCESSING",
      Self::Active => "ACTIVE",
      Self::Failed => "FAILED",
      Self::Unknown => "UNKNOWN",
    }
  }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FileListing {
  pub name: String,
  pub display_name: Option<String>,
  pub uri: String,
  pub mime_type: String,
  pub size_bytes: Option<u64>,
  pub create_time: Option<DateTime<Utc>>,
  pub state: FileState,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MessageResponse {
  pub message: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HealthResponse {
  pub status: String,
  pub message: String,
}
