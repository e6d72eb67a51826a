//! Protocol Engine (spec §4.E): the transport-independent request/response
//! state machine. `Engine::handle` never panics or propagates an error —
//! every failure is converted to a `ServerResponse` at this boundary, per
//! spec §7.

use std::{collections::HashSet, sync::Arc, time::Duration};

use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::{
    body::{ResponseBody, SseFrame},
    cache::{CacheMode, CachePolicy},
    codec::CodecRegistry,
    config::Config,
    cursor::{CursorPolicy, CursorVerification},
    dispatcher::Dispatcher,
    offset::{self, OffsetError},
    store::{StoreError, StreamConfig, StreamStore},
};

/// A transport-independent request. Adapters are responsible for fully
/// buffering the body before constructing this (the engine performs no I/O).
pub struct ServerRequest {
    pub method: Method,
    pub uri: http::Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub struct ServerResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl ServerResponse {
    fn new(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Self {
        Self { status, headers, body }
    }

    fn empty(status: StatusCode, headers: HeaderMap) -> Self {
        Self::new(status, headers, ResponseBody::Empty)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("cursor invalid or expired")]
    Gone,
    #[error("record too large")]
    PayloadTooLarge,
    #[error("unsupported media type: expected {expected}, got {actual}")]
    UnsupportedMediaType { expected: String, actual: String },
    #[error("range not satisfiable")]
    RangeNotSatisfiable,
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("waiter capacity exhausted")]
    ServiceUnavailable,
    #[error("internal error")]
    Internal,
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => EngineError::NotFound,
            StoreError::AlreadyExists => EngineError::Conflict,
            StoreError::RangeNotSatisfiable => EngineError::RangeNotSatisfiable,
            StoreError::ContentTypeMismatch { expected, actual } => {
                EngineError::UnsupportedMediaType { expected, actual }
            }
            StoreError::RecordTooLarge => EngineError::PayloadTooLarge,
            StoreError::Degraded | StoreError::Io(_) => EngineError::Internal,
        }
    }
}

impl From<OffsetError> for EngineError {
    fn from(e: OffsetError) -> Self {
        EngineError::BadRequest(e.to_string())
    }
}

impl EngineError {
    fn status(&self) -> StatusCode {
        match self {
            EngineError::BadRequest(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound => StatusCode::NOT_FOUND,
            EngineError::Conflict => StatusCode::CONFLICT,
            EngineError::Gone => StatusCode::GONE,
            EngineError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            EngineError::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            EngineError::RangeNotSatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            EngineError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            EngineError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Fatal and transient server errors are logged (spec §7); client
    /// errors are not, beyond debug.
    fn into_response(self) -> ServerResponse {
        let status = self.status();
        match status {
            StatusCode::INTERNAL_SERVER_ERROR => error!(error = %self, "internal error"),
            StatusCode::SERVICE_UNAVAILABLE => warn!(error = %self, "waiter capacity exhausted"),
            _ => debug!(error = %self, "request rejected"),
        }

        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        if status == StatusCode::SERVICE_UNAVAILABLE {
            headers.insert("retry-after", HeaderValue::from_static("1"));
        }
        if status == StatusCode::METHOD_NOT_ALLOWED {
            headers.insert(
                header::ALLOW,
                HeaderValue::from_static("GET, HEAD, PUT, POST, DELETE"),
            );
        }

        // Internal failures never leak details into the body (spec §7).
        let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
            ResponseBody::Empty
        } else {
            ResponseBody::bytes(self.to_string())
        };

        ServerResponse::new(status, headers, body)
    }
}

enum LiveMode {
    LongPoll,
    Sse,
}

#[derive(Default)]
struct ParsedQuery {
    offset: Option<String>,
    length: Option<u64>,
    cursor: Option<String>,
    timeout: Option<Duration>,
    live: Option<LiveMode>,
}

/// Parses the query string, rejecting duplicate keys with 400 (spec §4.E,
/// §8 testable property).
fn parse_query(query: Option<&str>) -> Result<ParsedQuery, EngineError> {
    let mut parsed = ParsedQuery::default();
    let Some(query) = query else {
        return Ok(parsed);
    };

    let mut seen = HashSet::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        if !seen.insert(key.to_string()) {
            return Err(EngineError::BadRequest(format!("duplicate query key: {key}")));
        }
        match key.as_ref() {
            "offset" => parsed.offset = Some(value.into_owned()),
            "length" => {
                parsed.length = Some(
                    value
                        .parse()
                        .map_err(|_| EngineError::BadRequest("invalid length".to_string()))?,
                )
            }
            "cursor" => parsed.cursor = Some(value.into_owned()),
            "timeout" => parsed.timeout = Some(parse_timeout(&value)?),
            "live" => {
                parsed.live = Some(match value.as_ref() {
                    "long-poll" => LiveMode::LongPoll,
                    "sse" => LiveMode::Sse,
                    other => return Err(EngineError::BadRequest(format!("invalid live mode: {other}"))),
                })
            }
            _ => {} // forward-compatible: unknown keys are ignored, not rejected
        }
    }
    Ok(parsed)
}

fn parse_timeout(raw: &str) -> Result<Duration, EngineError> {
    let digits = raw.strip_suffix('s').unwrap_or(raw);
    digits
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| EngineError::BadRequest("invalid timeout".to_string()))
}

fn resolve_offset(raw: &str, head: u64) -> Result<u64, EngineError> {
    if raw == offset::HEAD_SENTINEL {
        Ok(head)
    } else {
        Ok(offset::decode(raw)?)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub struct Engine {
    store: Arc<dyn StreamStore>,
    dispatcher: Arc<Dispatcher>,
    cursor_policy: CursorPolicy,
    codecs: CodecRegistry,
    config: Config,
}

impl Engine {
    pub fn new(
        store: Arc<dyn StreamStore>,
        dispatcher: Arc<Dispatcher>,
        cursor_policy: CursorPolicy,
        config: Config,
    ) -> Self {
        Self {
            store,
            dispatcher,
            cursor_policy,
            codecs: CodecRegistry::new(),
            config,
        }
    }

    pub async fn handle(&self, req: ServerRequest) -> ServerResponse {
        let path = req.uri.path().to_string();
        match req.method {
            Method::PUT => self.handle_create(&path, &req).await,
            Method::POST => self.handle_append(&path, &req).await,
            Method::GET => self.handle_get(&path, &req).await,
            Method::HEAD => self.handle_head(&path, &req),
            Method::DELETE => self.handle_delete(&path),
            _ => EngineError::MethodNotAllowed.into_response(),
        }
    }

    async fn handle_create(&self, path: &str, req: &ServerRequest) -> ServerResponse {
        debug!(path, "create");
        let content_type = match header_str(&req.headers, header::CONTENT_TYPE.as_str()) {
            Some(ct) => ct.to_string(),
            None => return EngineError::BadRequest("Content-Type required".to_string()).into_response(),
        };
        let item_content_type = header_str(&req.headers, "stream-item-content-type").map(String::from);
        let max_record_size = header_str(&req.headers, "stream-max-record-size").and_then(|v| v.parse().ok());
        let ttl = header_str(&req.headers, "stream-ttl")
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);

        let config = StreamConfig {
            content_type: content_type.clone(),
            item_content_type,
            max_record_size: max_record_size.or(self.config.max_record_size),
            ttl,
        };
        let initial_body = if req.body.is_empty() { None } else { Some(req.body.clone()) };

        match self.store.create(path, config, initial_body) {
            Ok(outcome) => {
                let mut headers = HeaderMap::new();
                headers.insert(header::LOCATION, header_value(path));
                headers.insert(header::ETAG, header_value(&crate::cache::etag_for(outcome.next_offset)));
                headers.insert(header::CONTENT_TYPE, header_value(&content_type));
                headers.insert("x-stream-next-offset", header_value(&offset::encode(outcome.next_offset)));
                ServerResponse::empty(StatusCode::CREATED, headers)
            }
            Err(e) => EngineError::from(e).into_response(),
        }
    }

    async fn handle_append(&self, path: &str, req: &ServerRequest) -> ServerResponse {
        debug!(path, "append");
        let content_type = header_str(&req.headers, header::CONTENT_TYPE.as_str());
        let item_content_type = header_str(&req.headers, "stream-item-content-type");

        let body = match self.store.head(path) {
            Some(head_info) if head_info.item_content_type.is_some() => {
                let ct = item_content_type.unwrap_or(&head_info.content_type);
                let codec = self.codecs.for_content_type(ct);
                codec.frame(&req.body)
            }
            _ => req.body.clone(),
        };

        match self.store.append(path, content_type, item_content_type, body) {
            Ok(outcome) => {
                let mut headers = HeaderMap::new();
                headers.insert(header::ETAG, header_value(&crate::cache::etag_for(outcome.next_offset)));
                headers.insert("x-stream-next-offset", header_value(&offset::encode(outcome.next_offset)));
                ServerResponse::empty(StatusCode::NO_CONTENT, headers)
            }
            Err(e) => EngineError::from(e).into_response(),
        }
    }

    async fn handle_get(&self, path: &str, req: &ServerRequest) -> ServerResponse {
        let query = match parse_query(req.uri.query()) {
            Ok(q) => q,
            Err(e) => return e.into_response(),
        };
        match query.live {
            Some(LiveMode::LongPoll) => self.handle_long_poll(path, &query).await,
            Some(LiveMode::Sse) => self.handle_sse(path, &req.headers, &query).await,
            None => self.handle_read(path, &req.headers, &query),
        }
    }

    fn handle_read(&self, path: &str, req_headers: &HeaderMap, query: &ParsedQuery) -> ServerResponse {
        let head_info = match self.store.head(path) {
            Some(h) => h,
            None => return EngineError::NotFound.into_response(),
        };
        let raw_offset = match &query.offset {
            Some(o) => o.as_str(),
            None => return EngineError::BadRequest("offset is required".to_string()).into_response(),
        };
        let from = match resolve_offset(raw_offset, head_info.head_offset) {
            Ok(v) => v,
            Err(e) => return e.into_response(),
        };
        let length = query.length.unwrap_or(self.config.default_read_length);

        // Conditional GET (spec §4.D): the policy reflects the resource's
        // *current* state, so it's computed before touching the store's read
        // path, letting a match skip that read entirely.
        let policy = CachePolicy::new(CacheMode::Private, head_info.head_offset, Some(head_info.created_at));
        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, header_value(policy.cache_control));
        headers.insert(header::ETAG, header_value(&policy.etag));
        headers.insert(header::CONTENT_TYPE, header_value(&head_info.content_type));
        headers.insert(header::VARY, header_value(policy.vary));

        let if_none_match = header_str(req_headers, header::IF_NONE_MATCH.as_str());
        if policy.matches_if_none_match(if_none_match) {
            return ServerResponse::empty(StatusCode::NOT_MODIFIED, headers);
        }

        if let Ok(Some(region)) = self.store.read_file_region(path, from, length) {
            headers.insert("x-stream-next-offset", header_value(&offset::encode(region.next_offset)));
            return ServerResponse::new(
                StatusCode::OK,
                headers,
                ResponseBody::FileRegion {
                    path: region.path,
                    position: region.position,
                    length: region.length,
                },
            );
        }

        match self.store.read(path, from, length) {
            Ok(outcome) => {
                headers.insert("x-stream-next-offset", header_value(&offset::encode(outcome.next_offset)));
                ServerResponse::new(StatusCode::OK, headers, ResponseBody::bytes(outcome.bytes))
            }
            Err(e) => EngineError::from(e).into_response(),
        }
    }

    fn handle_head(&self, path: &str, req: &ServerRequest) -> ServerResponse {
        match self.store.head(path) {
            Some(head_info) => {
                let policy = CachePolicy::new(CacheMode::Private, head_info.head_offset, Some(head_info.created_at));
                let mut headers = HeaderMap::new();
                headers.insert(header::CACHE_CONTROL, header_value(policy.cache_control));
                headers.insert(header::ETAG, header_value(&policy.etag));
                headers.insert(header::CONTENT_TYPE, header_value(&head_info.content_type));
                headers.insert(header::VARY, header_value(policy.vary));
                headers.insert(
                    header::LAST_MODIFIED,
                    header_value(&head_info.created_at.to_rfc2822()),
                );
                let if_none_match = header_str(&req.headers, header::IF_NONE_MATCH.as_str());
                if policy.matches_if_none_match(if_none_match) {
                    return ServerResponse::empty(StatusCode::NOT_MODIFIED, headers);
                }
                ServerResponse::empty(StatusCode::OK, headers)
            }
            None => EngineError::NotFound.into_response(),
        }
    }

    fn handle_delete(&self, path: &str) -> ServerResponse {
        if self.store.delete(path) {
            ServerResponse::empty(StatusCode::NO_CONTENT, HeaderMap::new())
        } else {
            EngineError::NotFound.into_response()
        }
    }

    async fn handle_long_poll(&self, path: &str, query: &ParsedQuery) -> ServerResponse {
        let head_info = match self.store.head(path) {
            Some(h) => h,
            None => return EngineError::NotFound.into_response(),
        };

        let guard = match self.dispatcher.reserve_waiter() {
            Ok(g) => g,
            Err(_) => return EngineError::ServiceUnavailable.into_response(),
        };

        let raw_offset = query.offset.as_deref().unwrap_or(offset::HEAD_SENTINEL);
        let from = match resolve_offset(raw_offset, head_info.head_offset) {
            Ok(v) => v,
            Err(e) => return e.into_response(),
        };

        let existing_cursor = match &query.cursor {
            Some(token) => match self.cursor_policy.verify(path, token) {
                CursorVerification::Valid(_) => Some(token.clone()),
                CursorVerification::Invalid | CursorVerification::Expired => {
                    return EngineError::Gone.into_response();
                }
            },
            None => None,
        };

        let timeout = self.config.clamp_long_poll_timeout(query.timeout);
        let woke = self.store.await_new_data(path, from, timeout).await;
        drop(guard);

        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

        if woke {
            match self.store.read(path, from, query.length.unwrap_or(self.config.default_read_length)) {
                Ok(outcome) => {
                    let cursor = self.cursor_policy.issue(path, outcome.next_offset);
                    headers.insert("x-stream-cursor", header_value(&cursor));
                    headers.insert("x-stream-next-offset", header_value(&offset::encode(outcome.next_offset)));
                    ServerResponse::new(StatusCode::OK, headers, ResponseBody::bytes(outcome.bytes))
                }
                Err(e) => EngineError::from(e).into_response(),
            }
        } else {
            let cursor = existing_cursor.unwrap_or_else(|| self.cursor_policy.issue(path, from));
            headers.insert("x-stream-cursor", header_value(&cursor));
            headers.insert("x-stream-next-offset", header_value(&offset::encode(from)));
            ServerResponse::empty(StatusCode::NO_CONTENT, headers)
        }
    }

    async fn handle_sse(&self, path: &str, req_headers: &HeaderMap, query: &ParsedQuery) -> ServerResponse {
        let head_info = match self.store.head(path) {
            Some(h) => h,
            None => return EngineError::NotFound.into_response(),
        };

        let guard = match self.dispatcher.reserve_waiter() {
            Ok(g) => g,
            Err(_) => return EngineError::ServiceUnavailable.into_response(),
        };

        let raw_offset = header_str(req_headers, "last-event-id")
            .or(query.offset.as_deref())
            .unwrap_or(offset::HEAD_SENTINEL);
        let from = match resolve_offset(raw_offset, head_info.head_offset) {
            Ok(v) => v,
            Err(e) => {
                drop(guard);
                return e.into_response();
            }
        };

        let (tx, rx) = mpsc::channel(8);
        let store = self.store.clone();
        let sse_max_duration = self.config.sse_max_duration;
        let keepalive_interval = self.config.sse_keepalive_interval;
        let path_owned = path.to_string();

        tokio::spawn(async move {
            let _guard = guard;
            run_sse_loop(store, path_owned, from, sse_max_duration, keepalive_interval, tx).await;
        });

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        ServerResponse::new(StatusCode::OK, headers, ResponseBody::Sse(rx))
    }
}

async fn run_sse_loop(
    store: Arc<dyn StreamStore>,
    path: String,
    mut offset_cursor: u64,
    sse_max_duration: Duration,
    keepalive_interval: Duration,
    tx: mpsc::Sender<SseFrame>,
) {
    let deadline = tokio::time::Instant::now() + sse_max_duration;

    loop {
        loop {
            match store.read(&path, offset_cursor, u64::MAX) {
                Ok(outcome) if !outcome.bytes.is_empty() => {
                    let frame = SseFrame::data(
                        "append",
                        String::from_utf8_lossy(&outcome.bytes).into_owned(),
                        offset::encode(outcome.next_offset),
                    );
                    offset_cursor = outcome.next_offset;
                    if tx.send(frame).await.is_err() {
                        return;
                    }
                }
                Ok(_) => break,
                Err(StoreError::NotFound) => {
                    let _ = tx.send(SseFrame::closed()).await;
                    return;
                }
                Err(_) => return,
            }
        }

        if tokio::time::Instant::now() >= deadline {
            return;
        }
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let wait = remaining.min(keepalive_interval);

        let woke = store.await_new_data(&path, offset_cursor, wait).await;
        if !woke {
            if store.head(&path).is_none() {
                let _ = tx.send(SseFrame::closed()).await;
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                return;
            }
            if tx.send(SseFrame::keepalive()).await.is_err() {
                return;
            }
        }
    }
}

fn header_value(s: &str) -> HeaderValue {
    HeaderValue::from_str(s).unwrap_or_else(|_| HeaderValue::from_static(""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_query_keys_are_rejected() {
        let err = parse_query(Some("offset=1&offset=2")).unwrap_err();
        assert!(matches!(err, EngineError::BadRequest(_)));
    }

    #[test]
    fn unknown_query_keys_are_ignored() {
        let parsed = parse_query(Some("offset=5&foo=bar")).unwrap();
        assert_eq!(parsed.offset.as_deref(), Some("5"));
    }

    #[test]
    fn timeout_accepts_trailing_s_suffix() {
        let parsed = parse_query(Some("timeout=30s")).unwrap();
        assert_eq!(parsed.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn head_sentinel_resolves_to_current_head() {
        assert_eq!(resolve_offset("-1", 42).unwrap(), 42);
        assert_eq!(resolve_offset("7", 42).unwrap(), 7);
        assert!(resolve_offset("garbage", 42).is_err());
    }
}
