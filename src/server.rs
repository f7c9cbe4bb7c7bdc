use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::logging::{RequestRecord, SharedJournal};
use crate::proxy::{self, ProxyOutcome};
use crate::routing::RoutingConfig;
use crate::transcode::{StreamSummary, TranscodeStream};
use crate::translate::anthropic_types::ErrorResponse;
use crate::upstream::{self, ClientRequest, UpstreamDialect};

use axum::body::Body;
use axum::extract::{Query, RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

const DEFAULT_JOURNAL_LIMIT: usize = 100;

pub struct AppState {
    pub config: ProxyConfig,
    pub routing: RoutingConfig,
    pub dialect: Box<dyn UpstreamDialect>,
    pub client: reqwest::Client,
    pub api_key: String,
    pub journal: SharedJournal,
}

impl AppState {
    /// Resolve routing, credentials and the upstream dialect from `config`.
    pub fn new(config: ProxyConfig, client: reqwest::Client, journal: SharedJournal) -> Result<Self> {
        let routing = config.routing()?;
        let api_key = config.resolve_api_key()?;
        let dialect = upstream::for_format(config.upstream_format(), config.params.drop.clone());
        Ok(Self {
            config,
            routing,
            dialect,
            client,
            api_key,
            journal,
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/messages", post(handle_messages))
        .route("/health", get(handle_health))
        .route("/v1/models", get(handle_models))
        .route("/journal", get(handle_journal))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_messages(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req = match ClientRequest::new(headers, query, body) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "Rejected request");
            return error_response(StatusCode::BAD_REQUEST, &ErrorResponse::invalid_request(e.to_string()));
        }
    };

    let record = RequestRecord::new(state.dialect.format(), req.model(), req.is_streaming());

    let upstream = match state.dialect.build(&req, &state.routing, &state.api_key) {
        Ok(u) => u,
        Err(e @ ProxyError::Decode { .. }) => {
            warn!(error = %e, "Rejected request");
            state.journal.record(record.with_status(400).with_error(e.to_string()));
            return error_response(StatusCode::BAD_REQUEST, &ErrorResponse::invalid_request(e.to_string()));
        }
        Err(e) => {
            error!(error = %e, "Failed to build upstream request");
            state.journal.record(record.with_status(502).with_error(e.to_string()));
            return error_response(StatusCode::BAD_GATEWAY, &ErrorResponse::api_error(format!("Proxy error: {e}")));
        }
    };

    let record = record.with_upstream_model(upstream.model.clone());

    // streams are journaled from the transcoder task, even if the client leaves
    let journal = state.journal.clone();
    let stream_record = record.clone();
    let on_stream_finish = move |summary: StreamSummary| {
        let mut record = stream_record.with_status(200).with_usage(summary.usage);
        if let Some(error) = summary.error {
            record = record.with_error(error);
        }
        journal.record(record);
    };

    match proxy::forward(&state, &req, upstream, on_stream_finish).await {
        Ok(ProxyOutcome::Complete { status, body, usage }) => {
            let mut record = record.with_status(status).with_usage(usage);
            if status >= 400 {
                record = record.with_error(format!("upstream returned {status}"));
            }
            state.journal.record(record);
            json_response(status, body)
        }
        Ok(ProxyOutcome::Stream(stream)) => sse_response(stream),
        Err(e) => {
            error!(error = %e, "Proxy error");
            state
                .journal
                .record(record.with_status(502).with_error(e.to_string()));
            error_response(StatusCode::BAD_GATEWAY, &ErrorResponse::api_error(format!("Proxy error: {e}")))
        }
    }
}

fn json_response(status: u16, body: Bytes) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn error_response(status: StatusCode, err: &ErrorResponse) -> Response {
    (status, Json(err)).into_response()
}

/// Relay transcoded records as they arrive. If the transcoder failed, one
/// trailing `event: error` record carries the Claude error envelope.
fn sse_response(stream: TranscodeStream) -> Response {
    let TranscodeStream { events, errors } = stream;

    // polled only after the event channel has closed
    let trailer = async_stream::stream! {
        if let Ok(err) = errors.await {
            let envelope = ErrorResponse::api_error(err.to_string());
            let data = serde_json::to_string(&envelope).unwrap_or_default();
            yield Bytes::from(format!("event: error\ndata: {data}\n\n"));
        }
    };

    let body = ReceiverStream::new(events)
        .chain(trailer)
        .map(Ok::<_, Infallible>);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "upstream": state.dialect.format(),
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let models: Vec<serde_json::Value> = state
        .routing
        .models()
        .keys()
        .map(|name| {
            serde_json::json!({
                "id": name,
                "object": "model",
                "owned_by": state.config.provider.name,
            })
        })
        .collect();

    Json(serde_json::json!({ "data": models, "object": "list" }))
}

#[derive(Debug, Deserialize)]
struct JournalQuery {
    limit: Option<usize>,
}

async fn handle_journal(
    State(state): State<Arc<AppState>>,
    Query(query): Query<JournalQuery>,
) -> Json<Vec<RequestRecord>> {
    Json(state.journal.recent(query.limit.unwrap_or(DEFAULT_JOURNAL_LIMIT)))
}
