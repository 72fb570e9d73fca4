pub mod range;

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tracing::error;

use crate::errors::GatewayError;
use crate::gateway::{SessionPool, Streamer};
use crate::store::ObjectRef;

use range::parse_range;

// -----------------------------------------------------------------------------
// ----- Router ----------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub streamer: Arc<Streamer>,
    pub pool: Arc<SessionPool>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/stream/:id", get(stream_object))
        .route("/healthz", get(healthz))
        .with_state(state)
}

// -----------------------------------------------------------------------------
// ----- Handlers --------------------------------------------------------------

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.pool.status();
    let code = if status.connected > 0 {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(serde_json::json!({
            "pool_size": status.size,
            "connected": status.connected,
        })),
    )
}

/// Bridge one `Range` request to the gateway's chunked stream. Always 206
/// for non-empty objects; players rely on `Accept-Ranges`/`Content-Range`
/// to seek.
async fn stream_object(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let id = ObjectRef(id);

    let info = match state.streamer.get_info(id).await {
        Ok(info) => info,
        Err(err) => return error_response(err),
    };

    if info.size == 0 {
        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, info.mime_type)
            .header(header::CONTENT_LENGTH, "0")
            .body(Body::empty())
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    let range_header = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    let spec = parse_range(range_header, info.size);

    let object = match state
        .streamer
        .open(id, spec.start, spec.length() as i64)
        .await
    {
        Ok(object) => object,
        Err(err) => return error_response(err),
    };

    let builder = Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", spec.start, spec.end, info.size),
        )
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, object.window.length.to_string())
        .header(header::CONTENT_TYPE, info.mime_type)
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        // Intermediaries must not buffer; chunks go straight to the player.
        .header("X-Accel-Buffering", "no");

    builder
        .body(Body::from_stream(object.chunks))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn error_response(err: GatewayError) -> Response {
    match err {
        GatewayError::NotFound => {
            (StatusCode::NOT_FOUND, "object not found in bin channel").into_response()
        }
        other => {
            error!("stream request failed: {other}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("streaming error: {other}"),
            )
                .into_response()
        }
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
