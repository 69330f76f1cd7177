//! HTTP front end: every request is offered to the worker, the rest is passed through.
//!
//! Control endpoints under `/__sw/` stand in for the browser facilities a
//! page would normally use (client messages, background sync, push).

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::Router;
use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use url::Url;

use crate::cache::{ResponseSource, SqliteStorage};
use crate::clients::ClientHub;
use crate::http::{Destination, Request, Response};
use crate::network::is_hop_by_hop;
use crate::push::PushHandler;
use crate::sync::{BackgroundSync, SyncTag};
use crate::worker::CacheWorker;

/// Largest request body accepted for pass-through and control requests.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Header telling the page where a response came from.
const SOURCE_HEADER: &str = "x-sw-source";

#[derive(Clone)]
pub struct AppState {
  pub worker: Arc<CacheWorker<SqliteStorage>>,
  pub sync: Arc<BackgroundSync>,
  pub push: PushHandler,
  pub clients: ClientHub,
  pub origin: Url,
}

/// Error returned by handlers as a JSON body.
#[derive(Debug)]
struct ApiError {
  status: StatusCode,
  message: String,
}

impl ApiError {
  fn bad_request(message: impl Into<String>) -> Self {
    Self {
      status: StatusCode::BAD_REQUEST,
      message: message.into(),
    }
  }

  fn bad_gateway(message: impl Into<String>) -> Self {
    Self {
      status: StatusCode::BAD_GATEWAY,
      message: message.into(),
    }
  }
}

impl From<color_eyre::Report> for ApiError {
  fn from(err: color_eyre::Report) -> Self {
    Self {
      status: StatusCode::INTERNAL_SERVER_ERROR,
      message: err.to_string(),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> axum::response::Response {
    let body = json!({ "error": { "message": self.message, "status": self.status.as_u16() } });
    (self.status, axum::Json(body)).into_response()
  }
}

pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/__sw/events", get(events))
    .route("/__sw/sync/{tag}", post(sync))
    .route("/__sw/push", post(push))
    .route("/__sw/notification-click/{action}", post(notification_click))
    .route("/__sw/analytics", post(queue_analytics))
    .route("/__sw/preferences", put(queue_preferences))
    .fallback(intercept)
    .with_state(state)
}

/// Bind and serve until Ctrl+C or SIGTERM.
pub async fn serve(listen: SocketAddr, state: AppState) -> Result<()> {
  let listener = tokio::net::TcpListener::bind(listen)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", listen, e))?;

  tracing::info!(%listen, origin = %state.origin, "Serving");

  axum::serve(listener, router(state))
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| eyre!("Server error: {}", e))?;

  tracing::info!("Server shut down gracefully");
  Ok(())
}

async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      tracing::error!(error = %e, "Failed to listen for Ctrl+C");
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut signal) => {
        signal.recv().await;
      }
      Err(e) => {
        tracing::error!(error = %e, "Failed to listen for SIGTERM");
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
    _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
  }
}

/// Every non-control request lands here.
async fn intercept(
  State(state): State<AppState>,
  request: axum::extract::Request,
) -> Result<axum::response::Response, ApiError> {
  let (parts, body) = request.into_parts();
  let body = to_bytes(body, MAX_BODY_BYTES)
    .await
    .map_err(|e| ApiError::bad_request(format!("Failed to read request body: {}", e)))?;

  let url = target_url(&state.origin, &parts.uri)?;
  let request = Request {
    method: parts.method,
    url,
    destination: destination(&parts.headers),
    headers: forwarded_headers(&parts.headers),
    body,
  };

  if let Some(outcome) = state.worker.handle_fetch(&request).await {
    // Revalidation keeps running on its own; the handle is not needed here
    tracing::debug!(
      url = %request.url,
      source = ?outcome.source,
      offline = outcome.response.is_offline_fallback(),
      revalidating = outcome.revalidation.is_some(),
      "Served"
    );
    return Ok(into_http(outcome.response, Some(outcome.source)));
  }

  match state.worker.pass_through(&request).await {
    Ok(response) => Ok(into_http(response, None)),
    Err(e) => {
      tracing::warn!(url = %request.url, error = %e, "Pass-through failed");
      Err(ApiError::bad_gateway(e.to_string()))
    }
  }
}

/// Absolute-form targets are forward-proxy requests; anything else is relative to the origin.
fn target_url(origin: &Url, uri: &Uri) -> Result<Url, ApiError> {
  if uri.scheme().is_some() {
    return Url::parse(&uri.to_string())
      .map_err(|e| ApiError::bad_request(format!("Invalid request target {}: {}", uri, e)));
  }

  let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
  origin
    .join(path_and_query)
    .map_err(|e| ApiError::bad_request(format!("Invalid request path {}: {}", path_and_query, e)))
}

fn destination(headers: &HeaderMap) -> Destination {
  let value = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
  Destination::from_headers(value("sec-fetch-dest"), value("accept"))
}

fn forwarded_headers(headers: &HeaderMap) -> Vec<(String, String)> {
  headers
    .iter()
    .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
    .filter_map(|(name, value)| {
      value
        .to_str()
        .ok()
        .map(|v| (name.as_str().to_string(), v.to_string()))
    })
    .collect()
}

fn into_http(response: Response, source: Option<ResponseSource>) -> axum::response::Response {
  let mut http = axum::response::Response::new(Body::from(response.body));
  *http.status_mut() = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);

  let headers = http.headers_mut();
  for (name, value) in &response.headers {
    if is_hop_by_hop(name) {
      continue;
    }
    let (Ok(name), Ok(value)) = (
      header::HeaderName::from_bytes(name.as_bytes()),
      HeaderValue::from_str(value),
    ) else {
      continue;
    };
    headers.append(name, value);
  }

  if let Some(source) = source {
    let label = match source {
      ResponseSource::Network => "network",
      ResponseSource::Cache => "cache",
      ResponseSource::Offline => "offline",
    };
    headers.insert(SOURCE_HEADER, HeaderValue::from_static(label));
  }

  http
}

/// Server-sent events carrying client messages.
async fn events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
  let stream = BroadcastStream::new(state.clients.subscribe())
    .filter_map(|message| message.ok())
    .map(|message| {
      let event = Event::default()
        .event(message.kind.clone())
        .json_data(&message)
        .unwrap_or_else(|e| {
          tracing::warn!(error = %e, "Failed to encode client message");
          Event::default().comment("unencodable message")
        });
      Ok(event)
    });

  Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn sync(
  State(state): State<AppState>,
  Path(tag): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
  let parsed: SyncTag = tag.parse().map_err(|e: color_eyre::Report| {
    tracing::warn!(%tag, "Ignoring unknown sync tag");
    ApiError::bad_request(e.to_string())
  })?;

  let report = state.sync.run(parsed).await?;
  Ok(axum::Json(json!({ "tag": tag, "report": report })))
}

async fn push(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
  let payload = (!body.is_empty()).then_some(&body[..]);
  axum::Json(state.push.push(payload))
}

async fn notification_click(
  State(state): State<AppState>,
  Path(action): Path<String>,
) -> impl IntoResponse {
  let opened = state.push.click(&action);
  axum::Json(json!({ "action": action, "opened": opened }))
}

async fn queue_analytics(
  State(state): State<AppState>,
  axum::Json(event): axum::Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
  state.sync.queue().push_analytics(&event)?;
  Ok(StatusCode::ACCEPTED)
}

async fn queue_preferences(
  State(state): State<AppState>,
  axum::Json(preferences): axum::Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
  state.sync.queue().set_preferences(&preferences)?;
  Ok(StatusCode::ACCEPTED)
}
