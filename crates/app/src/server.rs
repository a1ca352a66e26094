//! HTTP surface: `/upload`, `/chat`, `/chat-stream` and `/health`.
//!
//! Every handler checks index readiness before touching its input, so a
//! request that arrives while provisioning is still running gets a 503.

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use docrelay_core::relay::{DONE_SENTINEL, END_EVENT, ERROR_EVENT};
use docrelay_core::{
    error_frames, relay_frames, DocumentKind, IndexDescription, PipelineError, RagPipeline,
    RelayFrame, SearchError, Upload,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

pub const UPLOAD_FIELD: &str = "file";

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<RagPipeline>,
}

pub fn router(pipeline: Arc<RagPipeline>, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/upload", post(handle_upload))
        .route("/chat", post(handle_chat))
        .route("/chat-stream", post(handle_chat_stream))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { pipeline })
}

/// Serves `app` while `provisioning` runs alongside it. The server keeps
/// going after provisioning succeeds and stops with an error if it fails.
pub async fn serve<P, S>(
    listener: TcpListener,
    app: Router,
    provisioning: P,
    shutdown: S,
) -> anyhow::Result<()>
where
    P: Future<Output = Result<IndexDescription, SearchError>>,
    S: Future<Output = ()> + Send + 'static,
{
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        served = &mut server => {
            served?;
            return Ok(());
        }
        provisioned = provisioning => {
            if let Err(err) = provisioned {
                error!(error = %err, "vector index provisioning failed");
                return Err(anyhow::anyhow!("vector index provisioning failed: {err}"));
            }
        }
    }

    server.await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub document_id: String,
    pub chunks: usize,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    index: &'static str,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(error: PipelineError) -> Self {
        let status = if error.is_not_ready() {
            StatusCode::SERVICE_UNAVAILABLE
        } else if error.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            error!(%error, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(error: MultipartError) -> Self {
        Self {
            status: error.status(),
            message: error.body_text(),
        }
    }
}

impl From<MultipartRejection> for AppError {
    fn from(rejection: MultipartRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

async fn handle_upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    state.pipeline.ensure_ready()?;
    let mut multipart = multipart?;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let media_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        // Reject before buffering the body.
        DocumentKind::from_media_type(&media_type).map_err(PipelineError::from)?;

        let file_name = field.file_name().map(str::to_string);
        let bytes = field.bytes().await?;
        info!(
            file = file_name.as_deref().unwrap_or("-"),
            media_type = %media_type,
            bytes = bytes.len(),
            "upload received"
        );

        let summary = state
            .pipeline
            .ingest(Upload {
                file_name,
                media_type,
                bytes,
            })
            .await?;

        return Ok(Json(UploadResponse {
            message: "File processed and indexed.".to_string(),
            document_id: summary.document_id,
            chunks: summary.chunk_count,
        }));
    }

    Err(AppError::bad_request(format!(
        "multipart field `{UPLOAD_FIELD}` is required"
    )))
}

async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    state.pipeline.ensure_ready()?;
    let Json(request) = payload?;
    let response = state.pipeline.answer(&request.message).await?;
    Ok(Json(ChatResponse { response }))
}

/// Once the event stream has started, failures are reported in-band as an
/// `error` event because the status line is already gone.
async fn handle_chat_stream(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    state.pipeline.ensure_ready()?;
    let Json(request) = payload?;

    let frames = match state.pipeline.answer_stream(&request.message).await {
        Ok(upstream) => relay_frames(upstream).boxed(),
        Err(error) if error.is_client_error() => return Err(error.into()),
        Err(error) => {
            warn!(%error, "completion stream failed to start");
            error_frames(error.to_string()).boxed()
        }
    };

    let events = frames.map(|frame| Ok(frame_event(frame)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        index: state.pipeline.index().phase_name(),
    })
}

fn frame_event(frame: RelayFrame) -> Event {
    match frame {
        RelayFrame::Data(text) => Event::default().data(normalize_line_breaks(&text)),
        RelayFrame::End => Event::default().event(END_EVENT).data(DONE_SENTINEL),
        RelayFrame::Error(message) => {
            warn!(error = %message, "completion stream aborted");
            Event::default()
                .event(ERROR_EVENT)
                .data(normalize_line_breaks(&message))
        }
    }
}

/// SSE data lines cannot carry a bare carriage return.
fn normalize_line_breaks(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn provisioning_failure_stops_the_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let failed = async {
            Err(SearchError::ProvisionTimeout {
                name: "rag-index".to_string(),
                waited_secs: 300,
            })
        };

        let error = serve(listener, Router::new(), failed, std::future::pending())
            .await
            .unwrap_err();
        assert!(error.to_string().contains("index rag-index was not ready after 300s"));
    }

    #[tokio::test]
    async fn server_outlives_successful_provisioning() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ready = async {
            Ok(IndexDescription {
                name: "rag-index".to_string(),
                host: "rag-index.svc.pinecone.io".to_string(),
                ready: true,
            })
        };
        let app = Router::new().route("/ping", get(|| async { "pong" }));
        let shutdown = tokio::time::sleep(std::time::Duration::from_millis(500));

        let server = tokio::spawn(serve(listener, app, ready, shutdown));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let body = reqwest::get(format!("http://{addr}/ping"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "pong");
        assert!(server.await.unwrap().is_ok());
    }

    #[test]
    fn carriage_returns_become_newlines() {
        assert_eq!(normalize_line_breaks("a\r\nb\rc\n"), "a\nb\nc\n");
    }

    #[test]
    fn pipeline_errors_map_to_statuses() {
        use docrelay_core::{CompletionError, IngestError};

        let not_ready: AppError =
            PipelineError::from(SearchError::NotReady("provisioning".into())).into();
        assert_eq!(not_ready.status, StatusCode::SERVICE_UNAVAILABLE);

        let unsupported: AppError =
            PipelineError::from(IngestError::UnsupportedFormat("text/plain".into())).into();
        assert_eq!(unsupported.status, StatusCode::BAD_REQUEST);

        let empty = PipelineError::InvalidRequest("message is empty".into());
        assert_eq!(AppError::from(empty).status, StatusCode::BAD_REQUEST);

        let upstream: AppError = PipelineError::from(CompletionError::Upstream {
            status: 502,
            body: "bad gateway".into(),
        })
        .into();
        assert_eq!(upstream.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
