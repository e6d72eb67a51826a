//! Concrete axum-based transport adapter (spec §4.G). Translates axum's
//! `Request<Body>`/`Response` to and from the engine's `ServerRequest`/
//! `ServerResponse`. Routing is intentionally flat — a single catch-all
//! route forwards every method to the engine, which owns the real routing
//! decision tree (spec §4.E); axum here is just the wire.

use std::path::Path;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    response::{
        sse::Event,
        IntoResponse, Response, Sse,
    },
    routing::any,
    Router,
};
use futures::stream::StreamExt;
use http::{HeaderMap, StatusCode};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::ReaderStream;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any as AnyOrigin, CorsLayer},
};

use crate::{
    body::{ResponseBody, SseFrame},
    engine::{Engine, ServerRequest, ServerResponse},
};

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
}

/// Builds the router. CORS is wide open (auth is explicitly out of scope,
/// spec §1 Non-goals); compression is optional per `Config`.
pub fn router(engine: Arc<Engine>, enable_compression: bool) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods(AnyOrigin)
        .allow_headers(AnyOrigin)
        .expose_headers(AnyOrigin);

    let mut router = Router::new()
        .route("/{*path}", any(dispatch))
        .with_state(AppState { engine })
        .layer(cors);

    if enable_compression {
        router = router.layer(CompressionLayer::new());
    }
    router
}

async fn dispatch(State(state): State<AppState>, req: Request<Body>) -> Response {
    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    let server_request = ServerRequest {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        body: bytes,
    };

    let response = state.engine.handle(server_request).await;
    into_axum_response(response).await
}

async fn into_axum_response(response: ServerResponse) -> Response {
    let ServerResponse { status, headers, body } = response;

    match body {
        ResponseBody::Empty => with_status_and_headers(status, headers, Body::empty()),
        ResponseBody::Bytes(bytes) => with_status_and_headers(status, headers, Body::from(bytes)),
        ResponseBody::FileRegion { path, position, length } => match read_file_region(&path, position, length).await {
            Ok(body) => with_status_and_headers(status, headers, body),
            Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        },
        ResponseBody::Sse(rx) => {
            // No `.keep_alive(..)` here: the engine's own SSE loop already
            // sends a `SseFrame::Comment` keep-alive on `config.sse_keepalive_interval`.
            let stream = ReceiverStream::new(rx).map(|frame| {
                let event = match frame {
                    SseFrame::Event { event, data, id } => {
                        let mut e = Event::default().event(event).data(data);
                        if let Some(id) = id {
                            e = e.id(id);
                        }
                        e
                    }
                    SseFrame::Comment(text) => Event::default().comment(text),
                };
                Ok::<_, std::convert::Infallible>(event)
            });

            let mut response = Sse::new(stream).into_response();
            *response.status_mut() = status;
            response.headers_mut().extend(headers);
            response
        }
    }
}

fn with_status_and_headers(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().extend(headers);
    response
}

/// Streams a byte range off disk rather than buffering it whole, the
/// fallback spec §9 describes for platforms without a `sendfile` primitive
/// reachable from safe Rust.
async fn read_file_region(path: &Path, position: u64, length: u64) -> std::io::Result<Body> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(position)).await?;
    let limited = file.take(length);
    Ok(Body::from_stream(ReaderStream::new(limited)))
}
