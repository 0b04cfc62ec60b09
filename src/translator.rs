//! Translation between the relay's API shapes and the provider calls.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{RelayError, RelayResult};
use crate::gemini::{Content, ModelClient, Part, RemoteFile};
use crate::models::{ChatTurn, FileListing, FileState, SkippedAttachment, UploadedFileRecord};

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Reduces a file handle to its canonical `files/<id>` form.
///
/// URIs such as `https://host/v1beta/files/abc` become `files/abc`; anything
/// else is returned unchanged, so the function is idempotent.
pub fn normalize_handle(handle: &str) -> String {
  if handle.starts_with("http") {
    if let Some((_, id)) = handle.rsplit_once("/files/") {
      return format!("files/{id}");
    }
  }
  handle.to_string()
}

/// Maps caller turns onto the provider's two roles, keeping order.
pub fn translate_history(history: &[ChatTurn]) -> Vec<Content> {
  history
    .iter()
    .map(|turn| {
      let role = if turn.is_user() { "user" } else { "model" };
      Content::new(role, vec![Part::text(turn.content.clone())])
    })
    .collect()
}

#[derive(Debug, Default)]
pub struct AttachmentReport {
  pub attached: Vec<RemoteFile>,
  pub skipped: Vec<SkippedAttachment>,
}

impl AttachmentReport {
  pub fn attached_names(&self) -> Vec<String> {
    self.attached.iter().map(|f| f.name.clone()).collect()
  }
}

fn classify(handle: String, lookup: RelayResult<RemoteFile>) -> Result<RemoteFile, SkippedAttachment> {
  match lookup {
    Ok(file) if file.state == FileState::Active => Ok(file),
    Ok(file) => Err(SkippedAttachment {
      file_id: handle,
      reason: format!("file is not ACTIVE (state: {})", file.state.as_str()),
    }),
    Err(err) => Err(SkippedAttachment {
      file_id: handle,
      reason: format!("lookup failed: {err}"),
    }),
  }
}

/// Looks up every handle and keeps only the ACTIVE files; the rest are
/// reported as skipped instead of failing the batch.
pub async fn validate_attachments(client: &dyn ModelClient, handles: &[String]) -> AttachmentReport {
  let mut lookups = Vec::with_capacity(handles.len());
  for handle in handles {
    let name = normalize_handle(handle);
    debug!(handle = %handle, name = %name, "looking up attachment");
    let lookup = client.get_file(&name).await;
    lookups.push((name, lookup));
  }

  lookups
    .into_iter()
    .map(|(name, lookup)| classify(name, lookup))
    .fold(AttachmentReport::default(), |mut report, outcome| {
      match outcome {
        Ok(file) => report.attached.push(file),
        Err(skipped) => {
          warn!(file_id = %skipped.file_id, reason = %skipped.reason, "skipping attachment");
          report.skipped.push(skipped);
        }
      }
      report
    })
}

#[derive(Debug)]
pub struct Answer {
  pub text: String,
  pub attachments: AttachmentReport,
}

pub struct RequestTranslator {
  client: Arc<dyn ModelClient>,
  system_instruction: String,
  uploads_dir: Option<PathBuf>,
}

impl RequestTranslator {
  pub fn new(client: Arc<dyn ModelClient>, system_instruction: impl Into<String>) -> Self {
    Self {
      client,
      system_instruction: system_instruction.into(),
      uploads_dir: None,
    }
  }

  /// Keep a local copy of every upload under `dir`.
  pub fn with_uploads_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.uploads_dir = Some(dir.into());
    self
  }

  pub fn uploads_dir(&self) -> Option<&Path> {
    self.uploads_dir.as_deref()
  }

  pub async fn submit_file(
    &self,
    bytes: Vec<u8>,
    filename: &str,
    mime_type: Option<&str>,
  ) -> RelayResult<UploadedFileRecord> {
    if filename.trim().is_empty() {
      return Err(RelayError::InvalidUpload("Filename cannot be empty".to_string()));
    }
    if bytes.is_empty() {
      return Err(RelayError::InvalidUpload("File content cannot be empty".to_string()));
    }
    let mime_type = mime_type
      .filter(|m| !m.trim().is_empty())
      .unwrap_or(DEFAULT_MIME_TYPE)
      .to_string();

    let local_copy = self.uploads_dir.as_ref().map(|_| bytes.clone());
    let file = self.client.upload_file(bytes, filename, &mime_type).await?;
    info!(filename = %filename, name = %file.name, "uploaded file");

    // Only files the provider accepted get a local copy.
    if let (Some(dir), Some(bytes)) = (&self.uploads_dir, local_copy) {
      if let Err(err) = save_local_copy(dir, filename, &bytes).await {
        warn!(filename = %filename, error = %err, "could not keep local copy of upload");
      }
    }

    Ok(UploadedFileRecord {
      filename: filename.to_string(),
      file_id: file.uri.clone(),
      mime_type,
      uri: file.uri,
    })
  }

  pub async fn answer_question(
    &self,
    message: &str,
    history: &[ChatTurn],
    file_handles: &[String],
  ) -> RelayResult<Answer> {
    let attachments = validate_attachments(self.client.as_ref(), file_handles).await;

    let mut parts = vec![Part::text(message)];
    parts.extend(attachments.attached.iter().map(Part::file));
    debug!(
      turns = history.len(),
      attached = attachments.attached.len(),
      skipped = attachments.skipped.len(),
      "sending message"
    );

    let text = self
      .client
      .send_message(&self.system_instruction, translate_history(history), parts)
      .await?;

    Ok(Answer { text, attachments })
  }

  /// Every provider file, across all pages.
  pub async fn list_files(&self) -> RelayResult<Vec<FileListing>> {
    let mut listings = Vec::new();
    let mut page_token: Option<String> = None;
    loop {
      let page = self.client.list_files(page_token.as_deref()).await?;
      listings.extend(page.files.into_iter().map(FileListing::from));
      match page.next_page_token {
        Some(token) if !token.is_empty() => page_token = Some(token),
        _ => break,
      }
    }
    Ok(listings)
  }

  pub async fn remove_file(&self, handle: &str) -> RelayResult<()> {
    let name = normalize_handle(handle);
    info!(handle = %handle, name = %name, "deleting file");
    self
      .client
      .delete_file(&name)
      .await
      .map_err(|err| RelayError::Delete {
        handle: handle.to_string(),
        source: Box::new(err),
      })
  }
}

async fn save_local_copy(dir: &Path, filename: &str, bytes: &[u8]) -> RelayResult<()> {
  let name = Path::new(filename)
    .file_name()
    .ok_or_else(|| RelayError::InvalidUpload(format!("unusable file name: {filename}")))?;
  tokio::fs::create_dir_all(dir).await?;
  tokio::fs::write(dir.join(name), bytes).await?;
  Ok(())
}


#[cfg(test)]
mod tests {
  use super::testing::{remote_file, FakeClient};
  use super::*;
  use crate::gemini::FilePage;

  fn translator(client: Arc<FakeClient>) -> RequestTranslator {
    RequestTranslator::new(client, "answer from documents")
  }

  fn turn(role: &str, content: &str) -> ChatTurn {
    ChatTurn {
      role: role.to_string(),
      content: content.to_string(),
    }
  }

  #[test]
  fn raw_and_uri_handles_normalize_the_same() {
    let raw = normalize_handle("files/xyz");
    let uri = normalize_handle("https://generativelanguage.googleapis.com/v1beta/files/xyz");
    assert_eq!(raw, "files/xyz");
    assert_eq!(uri, "files/xyz");
  }

  #[test]
  fn normalization_is_idempotent() {
    for input in [
      "files/xyz",
      "https://host/v1beta/files/xyz",
      "http://host/a/files/b/files/c",
      "plain-id",
      "https://host/no-file-segment",
      "",
    ] {
      let once = normalize_handle(input);
      assert_eq!(normalize_handle(&once), once, "input {input}");
    }
  }

  #[test]
  fn non_uri_strings_pass_through() {
    assert_eq!(normalize_handle("abc123"), "abc123");
    assert_eq!(normalize_handle("https://host/other/abc"), "https://host/other/abc");
  }

  #[test]
  fn history_keeps_order_and_maps_roles() {
    let history = vec![
      turn("user", "one"),
      turn("assistant", "two"),
      turn("system", "three"),
      turn("user", "four"),
    ];
    let contents = translate_history(&history);
    let roles: Vec<_> = contents.iter().map(|c| c.role.clone().unwrap()).collect();
    assert_eq!(roles, vec!["user", "model", "model", "user"]);
    let texts: Vec<_> = contents.iter().map(|c| c.parts[0].text.clone().unwrap()).collect();
    assert_eq!(texts, vec!["one", "two", "three", "four"]);
  }

  #[tokio::test]
  async fn upload_uses_provider_uri_as_file_id() {
    let client = Arc::new(FakeClient::default());
    let record = translator(client)
      .submit_file(b"hello".to_vec(), "report.pdf", Some("application/pdf"))
      .await
      .expect("upload");
    assert_eq!(record.filename, "report.pdf");
    assert_eq!(record.mime_type, "application/pdf");
    assert_eq!(record.file_id, record.uri);
  }

  #[tokio::test]
  async fn upload_defaults_mime_type() {
    let client = Arc::new(FakeClient::default());
    let record = translator(client)
      .submit_file(b"bytes".to_vec(), "blob", None)
      .await
      .expect("upload");
    assert_eq!(record.mime_type, DEFAULT_MIME_TYPE);
  }

  #[tokio::test]
  async fn empty_upload_is_rejected_before_calling_provider() {
    let client = Arc::new(FakeClient::default());
    let err = translator(client.clone())
      .submit_file(Vec::new(), "empty.pdf", None)
      .await
      .unwrap_err();
    assert!(matches!(err, RelayError::InvalidUpload(_)));
    assert!(client.files.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn upload_keeps_local_copy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let client = Arc::new(FakeClient::default());
    translator(client)
      .with_uploads_dir(dir.path())
      .submit_file(b"content".to_vec(), "../notes.txt", Some("text/plain"))
      .await
      .expect("upload");
    let saved = std::fs::read(dir.path().join("notes.txt")).expect("local copy");
    assert_eq!(saved, b"content");
  }

  #[tokio::test]
  async fn rejected_upload_leaves_no_local_copy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let client = Arc::new(FakeClient {
      fail_upload: true,
      ..FakeClient::default()
    });
    let err = translator(client)
      .with_uploads_dir(dir.path())
      .submit_file(b"content".to_vec(), "r.pdf", Some("application/pdf"))
      .await
      .unwrap_err();
    assert_eq!(err.upstream_status(), Some(500));
    assert!(!dir.path().join("r.pdf").exists());
  }

  #[tokio::test]
  async fn uploaded_handle_round_trips_into_chat() {
    let client = Arc::new(FakeClient::default());
    let translator = translator(client.clone());
    let record = translator
      .submit_file(b"pdf".to_vec(), "a.pdf", Some("application/pdf"))
      .await
      .expect("upload");

    translator
      .answer_question("q", &[], &[record.file_id.clone()])
      .await
      .expect("answer");
    let stored_name = client.files.lock().unwrap().keys().next().cloned().unwrap();
    assert_eq!(client.lookups.lock().unwrap().as_slice(), &[stored_name]);
  }

  #[tokio::test]
  async fn message_without_files_sends_single_text_part() {
    let client = Arc::new(FakeClient::default());
    let answer = translator(client.clone())
      .answer_question("Summarize page 1", &[], &[])
      .await
      .expect("answer");
    assert_eq!(answer.text, "answer");

    let sent = client.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].history.is_empty());
    assert_eq!(sent[0].parts, vec![Part::text("Summarize page 1")]);
    assert_eq!(sent[0].system_instruction, "answer from documents");
  }

  #[tokio::test]
  async fn processing_file_is_dropped() {
    let client = Arc::new(FakeClient::with_files(vec![remote_file("slow", FileState::Processing)]));
    let answer = translator(client.clone())
      .answer_question("q", &[], &["files/slow".to_string()])
      .await
      .expect("answer");

    let sent = client.sent.lock().unwrap();
    assert_eq!(sent[0].parts.len(), 1);
    assert!(answer.attachments.attached.is_empty());
    assert_eq!(answer.attachments.skipped.len(), 1);
    assert_eq!(answer.attachments.skipped[0].file_id, "files/slow");
    assert!(answer.attachments.skipped[0].reason.contains("PROCESSING"));
  }

  #[tokio::test]
  async fn active_uri_handle_is_attached_by_canonical_name() {
    let client = Arc::new(FakeClient::with_files(vec![remote_file("doc1", FileState::Active)]));
    let answer = translator(client.clone())
      .answer_question(
        "q",
        &[],
        &["https://generativelanguage.googleapis.com/v1beta/files/doc1".to_string()],
      )
      .await
      .expect("answer");

    assert_eq!(client.lookups.lock().unwrap().as_slice(), &["files/doc1".to_string()]);
    assert_eq!(answer.attachments.attached_names(), vec!["files/doc1"]);
    let sent = client.sent.lock().unwrap();
    assert_eq!(sent[0].parts.len(), 2);
    let data = sent[0].parts[1].file_data.as_ref().expect("file part");
    assert!(data.file_uri.ends_with("/files/doc1"));
  }

  #[tokio::test]
  async fn failed_lookups_are_skipped_and_the_rest_attached() {
    let client = Arc::new(FakeClient::with_files(vec![
      remote_file("ok", FileState::Active),
      remote_file("bad", FileState::Failed),
    ]));
    let handles = vec![
      "files/missing".to_string(),
      "files/ok".to_string(),
      "files/bad".to_string(),
    ];
    let report = validate_attachments(client.as_ref(), &handles).await;
    assert_eq!(report.attached_names(), vec!["files/ok"]);
    let skipped: Vec<_> = report.skipped.iter().map(|s| s.file_id.as_str()).collect();
    assert_eq!(skipped, vec!["files/missing", "files/bad"]);
    assert!(report.skipped[0].reason.contains("lookup failed"));
  }

  #[tokio::test]
  async fn history_reaches_provider_in_order() {
    let client = Arc::new(FakeClient::default());
    let history = vec![turn("user", "a"), turn("assistant", "b")];
    translator(client.clone())
      .answer_question("c", &history, &[])
      .await
      .expect("answer");
    let sent = client.sent.lock().unwrap();
    assert_eq!(sent[0].history, translate_history(&history));
  }

  #[tokio::test]
  async fn completion_failure_is_fatal() {
    let client = Arc::new(FakeClient {
      fail_send: true,
      ..FakeClient::default()
    });
    let err = translator(client).answer_question("q", &[], &[]).await.unwrap_err();
    assert!(err.to_string().contains("model overloaded"));
  }

  #[tokio::test]
  async fn list_walks_every_page() {
    let client = Arc::new(FakeClient::default());
    *client.pages.lock().unwrap() = vec![
      FilePage {
        files: vec![remote_file("a", FileState::Active)],
        next_page_token: Some("1".to_string()),
      },
      FilePage {
        files: vec![remote_file("b", FileState::Processing)],
        next_page_token: None,
      },
    ];
    let listings = translator(client).list_files().await.expect("list");
    let names: Vec<_> = listings.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, vec!["files/a", "files/b"]);
    assert_eq!(listings[1].state, FileState::Processing);
  }

  #[tokio::test]
  async fn delete_normalizes_uri_handles() {
    let client = Arc::new(FakeClient::with_files(vec![remote_file("d", FileState::Active)]));
    translator(client.clone())
      .remove_file("https://generativelanguage.googleapis.com/v1beta/files/d")
      .await
      .expect("delete");
    assert_eq!(client.deleted.lock().unwrap().as_slice(), &["files/d".to_string()]);
  }

  #[tokio::test]
  async fn delete_of_missing_file_names_the_handle() {
    let client = Arc::new(FakeClient::default());
    let err = translator(client).remove_file("files/ghost").await.unwrap_err();
    assert!(matches!(err, RelayError::Delete { .. }));
    assert!(err.to_string().contains("files/ghost"));
    assert_eq!(err.upstream_status(), Some(404));
  }
}
