//! Gemini REST client: the file store (upload, get, delete, list) and `generateContent`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part as FormPart};
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::AppConfig;
use crate::error::{RelayError, RelayResult};
use crate::models::{FileListing, FileState};

const API_KEY_HEADER: &str = "x-goog-api-key";
const LIST_PAGE_SIZE: u32 = 100;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
  pub mime_type: String,
  pub file_uri: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub text: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub file_data: Option<FileData>,
}

impl Part {
  pub fn text(text: impl Into<String>) -> Self {
    Self {
      text: Some(text.into()),
      file_data: None,
    }
  }

  pub fn file(file: &RemoteFile) -> Self {
    Self {
      text: None,
      file_data: Some(FileData {
        mime_type: file.mime_type.clone(),
        file_uri: file.uri.clone(),
      }),
    }
  }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Content {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub role: Option<String>,
  #[serde(default)]
  pub parts: Vec<Part>,
}

impl Content {
  pub fn new(role: &str, parts: Vec<Part>) -> Self {
    Self {
      role: Some(role.to_string()),
      parts,
    }
  }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
  contents: Vec<Content>,
  system_instruction: Content,
}

#[derive(Deserialize, Debug)]
struct GenerateContentResponse {
  #[serde(default)]
  candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
  content: Option<Content>,
}

/// File metadata as the provider reports it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
  pub name: String,
  #[serde(default)]
  pub display_name: Option<String>,
  #[serde(default)]
  pub mime_type: String,
  #[serde(default, deserialize_with = "size_from_string_or_number")]
  pub size_bytes: Option<u64>,
  #[serde(default)]
  pub create_time: Option<DateTime<Utc>>,
  #[serde(default)]
  pub uri: String,
  #[serde(default)]
  pub state: FileState,
}

impl From<RemoteFile> for FileListing {
  fn from(file: RemoteFile) -> Self {
    FileListing {
      name: file.name,
      display_name: file.display_name,
      uri: file.uri,
      mime_type: file.mime_type,
      size_bytes: file.size_bytes,
      create_time: file.create_time,
      state: file.state,
    }
  }
}

// int64 fields arrive as JSON strings.
fn size_from_string_or_number<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Raw {
    Text(String),
    Number(u64),
  }

  match Option::<Raw>::deserialize(deserializer)? {
    None => Ok(None),
    Some(Raw::Number(n)) => Ok(Some(n)),
    Some(Raw::Text(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
  }
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct FilePage {
  #[serde(default)]
  pub files: Vec<RemoteFile>,
  #[serde(default)]
  pub next_page_token: Option<String>,
}

#[derive(Deserialize, Debug)]
struct UploadResponse {
  file: RemoteFile,
}

/// The provider operations the relay depends on.
#[async_trait]
pub trait ModelClient: Send + Sync {
  async fn upload_file(&self, bytes: Vec<u8>, display_name: &str, mime_type: &str) -> RelayResult<RemoteFile>;

  async fn get_file(&self, name: &str) -> RelayResult<RemoteFile>;

  async fn delete_file(&self, name: &str) -> RelayResult<()>;

  async fn list_files(&self, page_token: Option<&str>) -> RelayResult<FilePage>;

  /// One conversational turn: prior `history` plus a new user turn made of `parts`.
  async fn send_message(
    &self,
    system_instruction: &str,
    history: Vec<Content>,
    parts: Vec<Part>,
  ) -> RelayResult<String>;
}

#[derive(Clone)]
pub struct GeminiClient {
  http: reqwest::Client,
  api_key: String,
  base_url: String,
  model: String,
}

impl std::fmt::Debug for GeminiClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("GeminiClient")
      .field("base_url", &self.base_url)
      .field("model", &self.model)
      .finish()
  }
}

impl GeminiClient {
  pub fn new(config: &AppConfig) -> Self {
    Self {
      http: reqwest::Client::new(),
      api_key: config.api_key.clone(),
      base_url: config.api_base.trim_end_matches('/').to_string(),
      model: config.model.clone(),
    }
  }

  fn api_url(&self, path: &str) -> String {
    format!("{}/v1beta/{}", self.base_url, path.trim_start_matches('/'))
  }

  async fn send(&self, request: reqwest::RequestBuilder) -> RelayResult<reqwest::Response> {
    let resp = request
      .header(API_KEY_HEADER, &self.api_key)
      .send()
      .await
      .map_err(|err| RelayError::Request(format!("Failed to send request: {err}")))?;

    let status = resp.status();
    if !status.is_success() {
      let body = resp
        .text()
        .await
        .unwrap_or_else(|_| "Gemini request failed.".to_string());
      return Err(RelayError::Http {
        status_code: status.as_u16(),
        message: body,
      });
    }
    Ok(resp)
  }

  async fn send_json<T: serde::de::DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> RelayResult<T> {
    self
      .send(request)
      .await?
      .json::<T>()
      .await
      .map_err(|err| RelayError::Response(format!("Failed to parse response: {err}")))
  }
}

#[async_trait]
impl ModelClient for GeminiClient {
  async fn upload_file(&self, bytes: Vec<u8>, display_name: &str, mime_type: &str) -> RelayResult<RemoteFile> {
    let metadata = serde_json::json!({ "file": { "displayName": display_name } }).to_string();
    let metadata_part = FormPart::text(metadata)
      .mime_str("application/json")
      .map_err(|err| RelayError::Request(err.to_string()))?;
    let file_part = FormPart::bytes(bytes)
      .file_name(display_name.to_string())
      .mime_str(mime_type)
      .map_err(|err| RelayError::InvalidUpload(format!("Invalid MIME type '{mime_type}': {err}")))?;
    let form = Form::new().part("metadata", metadata_part).part("file", file_part);

    let url = format!("{}/upload/v1beta/files?uploadType=multipart", self.base_url);
    let resp: UploadResponse = self.send_json(self.http.post(url).multipart(form)).await?;
    Ok(resp.file)
  }

  async fn get_file(&self, name: &str) -> RelayResult<RemoteFile> {
    let resource = file_resource(name)?;
    self.send_json(self.http.get(self.api_url(&resource))).await
  }

  async fn delete_file(&self, name: &str) -> RelayResult<()> {
    let resource = file_resource(name)?;
    self.send(self.http.delete(self.api_url(&resource))).await?;
    Ok(())
  }

  async fn list_files(&self, page_token: Option<&str>) -> RelayResult<FilePage> {
    let mut query = vec![("pageSize", LIST_PAGE_SIZE.to_string())];
    if let Some(token) = page_token {
      query.push(("pageToken", token.to_string()));
    }
    self.send_json(self.http.get(self.api_url("files")).query(&query)).await
  }

  async fn send_message(
    &self,
    system_instruction: &str,
    history: Vec<Content>,
    parts: Vec<Part>,
  ) -> RelayResult<String> {
    let mut contents = history;
    contents.push(Content::new("user", parts));
    let payload = GenerateContentRequest {
      contents,
      system_instruction: Content {
        role: None,
        parts: vec![Part::text(system_instruction)],
      },
    };

    let url = self.api_url(&format!("models/{}:generateContent", self.model));
    let resp: GenerateContentResponse = self.send_json(self.http.post(url).json(&payload)).await?;
    extract_text(&resp)
  }
}

/// Resolves a file name to a `files/<id>` resource path, prefixing bare ids.
///
/// Anything that would address a resource outside the `files/` collection is rejected.
fn file_resource(name: &str) -> RelayResult<String> {
  let id = name.strip_prefix("files/").unwrap_or(name);
  if id.is_empty() || id.contains(['/', '?', '#']) || id.contains("..") {
    return Err(RelayError::Request(format!("not a file name: {name}")));
  }
  Ok(format!("files/{id}"))
}

fn extract_text(response: &GenerateContentResponse) -> RelayResult<String> {
  let candidate = response
    .candidates
    .first()
    .ok_or_else(|| RelayError::Response("No candidates in response".to_string()))?;
  let content = candidate
    .content
    .as_ref()
    .ok_or_else(|| RelayError::Response("No content in candidate".to_string()))?;

  let texts: Vec<&str> = content.parts.iter().filter_map(|p| p.text.as_deref()).collect();
  if texts.is_empty() {
    return Err(RelayError::Response("No text in candidate parts".to_string()));
  }
  Ok(texts.concat())
}
