use std::net::TcpListener;
use std::path::Path as FsPath;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower::ServiceExt;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::RelayError;
use crate::models::{ChatRequest, ChatResponse, HealthResponse, MessageResponse};
use crate::translator::RequestTranslator;

const VIEW_PREFIX: &str = "view/";
const NOT_FOUND_LOCALLY: &str = "File not found locally.";

pub struct RouterState {
  pub translator: RequestTranslator,
  pub max_upload_bytes: usize,
}

pub fn build_router(state: RouterState) -> Router {
  let body_limit = state.max_upload_bytes;
  Router::new()
    .route("/", get(health))
    .route("/upload", post(upload))
    .route("/chat", post(chat))
    .route("/files", get(list_files))
    // One catch-all serves both `GET /files/view/{filename}` and
    // `DELETE /files/{file_id}`, whose ids contain slashes.
    .route("/files/*rest", get(view_file).delete(delete_file))
    .layer(DefaultBodyLimit::max(body_limit))
    .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
    .layer(TraceLayer::new_for_http())
    .with_state(Arc::new(state))
}

pub async fn run_router(listener: TcpListener, state: RouterState) -> anyhow::Result<()> {
  let app = build_router(state);
  listener.set_nonblocking(true)?;
  let listener = tokio::net::TcpListener::from_std(listener)?;
  info!("listening on {}", listener.local_addr()?);
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  Ok(())
}

async fn shutdown_signal() {
  if let Err(err) = tokio::signal::ctrl_c().await {
    error!(error = %err, "failed to listen for shutdown signal");
    std::future::pending::<()>().await;
  }
  info!("shutting down");
}

async fn health() -> Json<HealthResponse> {
  Json(HealthResponse {
    status: "alive".to_string(),
    message: "Backend is running smoothly".to_string(),
  })
}

async fn upload(State(state): State<Arc<RouterState>>, mut multipart: Multipart) -> Response {
  loop {
    let field = match multipart.next_field().await {
      Ok(Some(field)) => field,
      Ok(None) => break,
      Err(err) => return error_response(StatusCode::BAD_REQUEST, "invalid_upload", &err.to_string()),
    };
    if field.name() != Some("file") {
      continue;
    }

    let filename = field.file_name().unwrap_or_default().to_string();
    let mime_type = field.content_type().map(str::to_string);
    let bytes = match field.bytes().await {
      Ok(b) => b.to_vec(),
      Err(err) => return error_response(StatusCode::BAD_REQUEST, "invalid_upload", &err.to_string()),
    };

    return match state
      .translator
      .submit_file(bytes, &filename, mime_type.as_deref())
      .await
    {
      Ok(record) => (StatusCode::OK, Json(record)).into_response(),
      Err(err @ RelayError::InvalidUpload(_)) => {
        error_response(StatusCode::BAD_REQUEST, "invalid_upload", &err.to_string())
      }
      Err(err) => {
        error!(filename = %filename, error = %err, "upload failed");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "upload_failed", &err.to_string())
      }
    };
  }

  error_response(StatusCode::BAD_REQUEST, "invalid_upload", "Missing multipart field 'file'.")
}

async fn chat(State(state): State<Arc<RouterState>>, Json(req): Json<ChatRequest>) -> Response {
  let file_ids = req.file_ids.unwrap_or_default();
  match state
    .translator
    .answer_question(&req.message, &req.history, &file_ids)
    .await
  {
    Ok(answer) => {
      let attached_files = answer.attachments.attached_names();
      let body = ChatResponse {
        response: answer.text,
        attached_files,
        skipped_files: answer.attachments.skipped,
      };
      (StatusCode::OK, Json(body)).into_response()
    }
    Err(err) => {
      error!(error = %err, "chat failed");
      error_response(StatusCode::INTERNAL_SERVER_ERROR, "chat_failed", &err.to_string())
    }
  }
}

async fn list_files(State(state): State<Arc<RouterState>>) -> Response {
  match state.translator.list_files().await {
    Ok(files) => (StatusCode::OK, Json(files)).into_response(),
    Err(err) => {
      error!(error = %err, "listing files failed");
      error_response(StatusCode::INTERNAL_SERVER_ERROR, "list_failed", &err.to_string())
    }
  }
}

async fn delete_file(State(state): State<Arc<RouterState>>, Path(rest): Path<String>) -> Response {
  let file_id = rest.trim_start_matches('/');
  match state.translator.remove_file(file_id).await {
    Ok(()) => (
      StatusCode::OK,
      Json(MessageResponse {
        message: format!("File {file_id} deleted successfully"),
      }),
    )
      .into_response(),
    Err(err) => {
      error!(error = %err, "delete failed");
      let status = match err.upstream_status() {
        Some(404) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
      };
      error_response(status, "delete_failed", &err.to_string())
    }
  }
}

async fn view_file(
  State(state): State<Arc<RouterState>>,
  Path(rest): Path<String>,
  request: Request,
) -> Response {
  let Some(filename) = rest.trim_start_matches('/').strip_prefix(VIEW_PREFIX) else {
    return error_response(StatusCode::NOT_FOUND, "not_found", "Not Found");
  };
  let Some(dir) = state.translator.uploads_dir() else {
    return not_found_locally();
  };
  if !is_plain_file_name(filename) {
    return not_found_locally();
  }

  let path = dir.join(filename);
  match tokio::fs::metadata(&path).await {
    Ok(meta) if meta.is_file() => match ServeFile::new(&path).oneshot(request).await {
      Ok(resp) => resp.into_response(),
      Err(never) => match never {},
    },
    _ => not_found_locally(),
  }
}

fn is_plain_file_name(name: &str) -> bool {
  !name.is_empty()
    && name != "."
    && name != ".."
    && !name.contains(['/', '\\'])
    && FsPath::new(name).file_name().is_some()
}

fn not_found_locally() -> Response {
  (
    StatusCode::OK,
    Json(MessageResponse {
      message: NOT_FOUND_LOCALLY.to_string(),
    }),
  )
    .into_response()
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
  let body = Json(serde_json::json!({ "error": message, "code": code }));
  (status, body).into_response()
}
