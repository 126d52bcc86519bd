//! HTTP API for initiating scans and retrieving stored documents.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/scan` | Initiate a mailbox scan |
//! | `GET`  | `/scan/events/{client_id}` | SSE progress stream |
//! | `GET`  | `/documents` | List stored documents for the owner |
//! | `GET`  | `/messages/{message_id}/attachments/{attachment_id}` | Download stored attachment bytes |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Delivery modes
//!
//! `POST /scan` without a `clientId` runs synchronously and responds with
//! the full report. With a `clientId`, the scan is spawned and the response
//! is an immediate acknowledgment; all further states arrive on the SSE
//! stream for that client id. Subscribe before initiating the scan, or the
//! completion event can be missed.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "start date is after end date" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `upstream` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser
//! clients streaming progress.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

use crate::cache::VerdictCache;
use crate::classify::{ClassificationPipeline, HttpClassifier};
use crate::config::Config;
use crate::extract::PdfTextExtractor;
use crate::mailbox::HttpMailbox;
use crate::mime;
use crate::models::{DocumentSummary, ScanRequest};
use crate::progress::{BroadcastSink, ChannelRegistry, NullSink, ProgressSink};
use crate::scan::{self, ScanContext};
use crate::store::DocumentStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    store: DocumentStore,
    cache: Arc<VerdictCache>,
    registry: Arc<ChannelRegistry>,
}

/// Start the HTTP server. Runs until the process is terminated.
pub async fn run_server(config: &Config, store: DocumentStore) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let state = AppState {
        config: Arc::new(config.clone()),
        store,
        cache: Arc::new(VerdictCache::new()),
        registry: Arc::new(ChannelRegistry::new()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/scan", post(handle_scan))
        .route("/scan/events/{client_id}", get(handle_scan_events))
        .route("/documents", get(handle_list_documents))
        .route(
            "/messages/{message_id}/attachments/{attachment_id}",
            get(handle_attachment_download),
        )
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    tracing::info!("wdx server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn upstream_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "upstream".to_string(),
        message: message.into(),
    }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ Request helpers ============

fn bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| unauthorized("missing Authorization header"))?;

    value
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| unauthorized("Authorization header must be a bearer token"))
}

fn owner_id(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get("x-owner-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| bad_request("missing X-Owner-Id header"))
}

fn parse_date(label: &str, value: Option<&str>) -> Result<Option<NaiveDate>, AppError> {
    match value {
        None => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| bad_request(format!("{} must be an ISO date (YYYY-MM-DD)", label))),
    }
}

// ============ POST /scan ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScanBody {
    max_results: Option<u32>,
    start_date: Option<String>,
    end_date: Option<String>,
    /// Progress-delivery identifier. Present → asynchronous mode.
    client_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScanAccepted {
    success: bool,
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScanCompleted {
    success: bool,
    total: usize,
    documents: Vec<DocumentSummary>,
}

async fn handle_scan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ScanBody>,
) -> Result<Response, AppError> {
    let token = bearer_token(&headers)?;
    let owner = owner_id(&headers)?;

    let request = ScanRequest {
        owner_id: owner,
        max_results: body.max_results.unwrap_or(crate::models::MAX_SCAN_RESULTS),
        start_date: parse_date("startDate", body.start_date.as_deref())?,
        end_date: parse_date("endDate", body.end_date.as_deref())?,
    }
    .normalized();

    // Validation failures surface synchronously in both delivery modes.
    request.validate().map_err(|e| bad_request(e.to_string()))?;

    let mailbox = HttpMailbox::new(&state.config.mailbox, &token)
        .map_err(|e| unauthorized(e.to_string()))?;
    let classifier =
        HttpClassifier::new(&state.config.classifier).map_err(|e| internal_error(e.to_string()))?;

    let sink: Arc<dyn ProgressSink> = match &body.client_id {
        Some(client_id) if !client_id.trim().is_empty() => {
            Arc::new(BroadcastSink::new(state.registry.sender(client_id)))
        }
        _ => Arc::new(NullSink),
    };

    let ctx = ScanContext {
        mailbox: Arc::new(mailbox),
        pipeline: Arc::new(ClassificationPipeline::new(
            state.cache.clone(),
            Arc::new(PdfTextExtractor),
            Arc::new(classifier),
            state.config.classifier.max_excerpt_chars,
        )),
        store: state.store.clone(),
        sink,
        concurrency: state.config.scan.concurrency,
        batch_pause: Duration::from_millis(state.config.scan.batch_pause_ms),
        page_size: state.config.mailbox.page_size,
    };

    if body.client_id.as_deref().is_some_and(|c| !c.trim().is_empty()) {
        scan::spawn_scan(Arc::new(ctx), request);
        return Ok(Json(ScanAccepted {
            success: true,
            message: "Processing started".to_string(),
        })
        .into_response());
    }

    let report = scan::run_scan(&ctx, request)
        .await
        .map_err(|e| upstream_error(e.to_string()))?;

    Ok(Json(ScanCompleted {
        success: true,
        total: report.total_accepted,
        documents: report.documents,
    })
    .into_response())
}

// ============ GET /scan/events/{client_id} ============

async fn handle_scan_events(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.registry.subscribe(&client_id);

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let sse = Event::default()
                        .event(event.kind())
                        .json_data(&event)
                        .unwrap_or_else(|_| Event::default().event("error"));
                    return Some((Ok(sse), rx));
                }
                // A lagged subscriber skips dropped events; no replay.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

// ============ GET /documents ============

#[derive(Deserialize)]
struct ListParams {
    limit: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentListResponse {
    total: i64,
    documents: Vec<DocumentSummary>,
}

async fn handle_list_documents(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<DocumentListResponse>, AppError> {
    let owner = owner_id(&headers)?;
    let limit = params.limit.unwrap_or(50).clamp(1, 500);

    let documents = state
        .store
        .list(&owner, limit)
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    let total = state
        .store
        .count(&owner)
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    Ok(Json(DocumentListResponse { total, documents }))
}

// ============ GET /messages/{message_id}/attachments/{attachment_id} ============

async fn handle_attachment_download(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((message_id, attachment_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let owner = owner_id(&headers)?;

    let (filename, content_type, bytes) = state
        .store
        .fetch_raw(&owner, &message_id, &attachment_id)
        .await
        .map_err(|e| internal_error(e.to_string()))?
        .ok_or_else(|| not_found("no stored document for that attachment"))?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        mime::sanitize_filename(&filename)
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
