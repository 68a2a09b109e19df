//! HTTP adapter for the durable streams protocol.
//!
//! Maps verbs on wildcard paths to store calls and store results to headers
//! and bodies. The store raises tagged errors only; the mapping to status
//! codes lives here.

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response, Sse, sse::Event},
    routing::{delete, get, head, post, put},
};
use futures::stream::Stream;
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::{
    cursor::{CursorOptions, generate_response_cursor, parse_cursor},
    error::StoreError,
    expiry::{parse_expires_at, parse_ttl},
    store::StreamStore,
    types::{AppendOptions, PutOptions, ReadResult, ServerOptions},
};

/// `Stream-Next-Offset`: canonical offset of the next append.
pub const HEADER_NEXT_OFFSET: &str = "Stream-Next-Offset";
/// `Stream-Cursor`: decimal interval number.
pub const HEADER_CURSOR: &str = "Stream-Cursor";
/// `Stream-Up-To-Date`: literal `true` or `false`.
pub const HEADER_UP_TO_DATE: &str = "Stream-Up-To-Date";
/// `Stream-Seq`: opaque monotonic append token.
pub const HEADER_SEQ: &str = "Stream-Seq";
/// `Stream-TTL`: positive integer seconds.
pub const HEADER_TTL: &str = "Stream-TTL";
/// `Stream-Expires-At`: ISO 8601 timestamp with timezone.
pub const HEADER_EXPIRES_AT: &str = "Stream-Expires-At";

/// Content type assumed for streams created without one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// SSE heartbeat interval.
const SSE_KEEPALIVE_SECS: u64 = 15;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StreamStore>,
    pub options: ServerOptions,
}

impl AppState {
    fn cursor_options(&self) -> CursorOptions {
        CursorOptions {
            interval_seconds: self.options.cursor_interval_seconds,
            epoch: self.options.cursor_epoch,
        }
    }
}

/// Query parameters for GET requests.
#[derive(Debug, Deserialize)]
pub struct ReadQuery {
    pub offset: Option<String>,
    pub live: Option<String>,
    pub cursor: Option<String>,
}

/// Create the router with all stream endpoints.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::HEAD,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        .route("/{*path}", put(handle_create))
        .route("/{*path}", head(handle_head))
        .route("/{*path}", get(handle_read))
        .route("/{*path}", post(handle_append))
        .route("/{*path}", delete(handle_delete))
        .layer(cors)
        .with_state(state)
}

/// Map a store error onto the wire.
fn error_response(err: StoreError) -> Response {
    let status = match &err {
        StoreError::StreamNotFound(_) => StatusCode::NOT_FOUND,
        StoreError::StreamConflict { .. }
        | StoreError::ContentTypeMismatch { .. }
        | StoreError::SequenceConflict { .. } => StatusCode::CONFLICT,
        StoreError::InvalidJson(_) | StoreError::InvalidOffset(_) => StatusCode::BAD_REQUEST,
        StoreError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        StoreError::Backend(_) => {
            warn!(error = %err, "store operation failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string()).into_response()
}

/// PUT - create a stream (idempotent)
async fn handle_create(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let path = format!("/{path}");
    debug!(path = %path, "creating stream");

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();

    let ttl_header = headers.get(HEADER_TTL).and_then(|v| v.to_str().ok());
    let expires_header = headers.get(HEADER_EXPIRES_AT).and_then(|v| v.to_str().ok());
    if ttl_header.is_some() && expires_header.is_some() {
        return (
            StatusCode::BAD_REQUEST,
            "Cannot specify both Stream-TTL and Stream-Expires-At",
        )
            .into_response();
    }
    let ttl_seconds = match ttl_header {
        Some(raw) => match parse_ttl(raw) {
            Some(ttl) => Some(ttl),
            None => return (StatusCode::BAD_REQUEST, "Invalid Stream-TTL").into_response(),
        },
        None => None,
    };
    let expires_at = match expires_header {
        Some(raw) => match parse_expires_at(raw) {
            Some(dt) => Some(dt),
            None => {
                return (StatusCode::BAD_REQUEST, "Invalid Stream-Expires-At").into_response();
            }
        },
        None => None,
    };

    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes.to_vec(),
        Err(_) => return (StatusCode::BAD_REQUEST, "Failed to read body").into_response(),
    };
    let data = if body_bytes.is_empty() {
        None
    } else {
        Some(body_bytes)
    };

    let options = PutOptions {
        content_type: content_type.clone(),
        ttl_seconds,
        expires_at,
        data,
    };
    match state.store.put(&path, options).await {
        Ok(outcome) => {
            let mut response = Response::builder()
                .status(if outcome.created {
                    StatusCode::CREATED
                } else {
                    StatusCode::OK
                })
                .header(HEADER_NEXT_OFFSET, &outcome.next_offset)
                .header(header::CONTENT_TYPE, &content_type);
            if outcome.created {
                response = response.header(header::LOCATION, &path);
            }
            response.body(Body::empty()).unwrap()
        }
        Err(e) => error_response(e),
    }
}

/// HEAD - stream metadata
async fn handle_head(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    let path = format!("/{path}");
    match state.store.head(&path).await {
        Ok(result) => Response::builder()
            .status(StatusCode::OK)
            .header(HEADER_NEXT_OFFSET, &result.next_offset)
            .header(header::ETAG, &result.etag)
            .header(header::CONTENT_TYPE, &result.content_type)
            .body(Body::empty())
            .unwrap(),
        Err(e) => error_response(e),
    }
}

/// GET - snapshot, long-poll, or SSE
async fn handle_read(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<ReadQuery>,
    headers: HeaderMap,
) -> Response {
    let path = format!("/{path}");
    let client_cursor = query.cursor.as_deref().and_then(parse_cursor);

    match query.live.as_deref() {
        None => {
            let if_none_match = headers
                .get(header::IF_NONE_MATCH)
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            match state.store.get(&path, query.offset.as_deref()).await {
                Ok(result) => {
                    read_response(&state, &path, result, client_cursor, if_none_match).await
                }
                Err(e) => error_response(e),
            }
        }
        Some(mode) => {
            // Live modes address a resume point; an explicit offset is
            // mandatory.
            let Some(offset) = query.offset.clone() else {
                return (
                    StatusCode::BAD_REQUEST,
                    "live mode requires an offset parameter",
                )
                    .into_response();
            };
            match mode {
                "long-poll" => handle_long_poll(state, path, offset, client_cursor).await,
                "sse" => handle_sse(state, path, offset, client_cursor).await,
                _ => (StatusCode::BAD_REQUEST, "unknown live mode").into_response(),
            }
        }
    }
}

/// Build the snapshot response: 304 on an ETag match, otherwise the framed
/// body with offset, cursor, and freshness headers.
async fn read_response(
    state: &AppState,
    path: &str,
    result: ReadResult,
    client_cursor: Option<u64>,
    if_none_match: Option<String>,
) -> Response {
    let cursor = generate_response_cursor(client_cursor, &state.cursor_options());

    if if_none_match.as_deref() == Some(result.etag.as_str()) {
        return Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .header(HEADER_NEXT_OFFSET, &result.next_offset)
            .header(HEADER_CURSOR, cursor.to_string())
            .header(header::ETAG, &result.etag)
            .body(Body::empty())
            .unwrap();
    }

    let body = state.store.format_response(path, &result.messages);
    Response::builder()
        .status(StatusCode::OK)
        .header(HEADER_NEXT_OFFSET, &result.next_offset)
        .header(HEADER_CURSOR, cursor.to_string())
        .header(HEADER_UP_TO_DATE, result.up_to_date.to_string())
        .header(header::ETAG, &result.etag)
        .header(header::CONTENT_TYPE, &result.content_type)
        .body(Body::from(body))
        .unwrap()
}

/// One wait cycle, then respond: fresh data as a snapshot, a timeout as an
/// empty up-to-date response, a vanished stream as 404.
async fn handle_long_poll(
    state: AppState,
    path: String,
    offset: String,
    client_cursor: Option<u64>,
) -> Response {
    let wait = state
        .store
        .wait_for_data(&path, &offset, state.options.long_poll_timeout_ms)
        .await;
    match wait {
        Err(e) => error_response(e),
        Ok(result) if result.timed_out => {
            let cursor = generate_response_cursor(client_cursor, &state.cursor_options());
            match state.store.head(&path).await {
                Ok(head) => Response::builder()
                    .status(StatusCode::NO_CONTENT)
                    .header(HEADER_NEXT_OFFSET, &head.next_offset)
                    .header(HEADER_CURSOR, cursor.to_string())
                    .header(HEADER_UP_TO_DATE, "true")
                    .body(Body::empty())
                    .unwrap(),
                Err(e) => error_response(e),
            }
        }
        Ok(result) if result.messages.is_empty() => {
            // Resolved without data or timeout: the stream was deleted.
            error_response(StoreError::StreamNotFound(path))
        }
        Ok(_) => {
            // Re-read as a snapshot so body and headers are one consistent
            // observation even if more appends landed since the wake-up.
            match state.store.get(&path, Some(&offset)).await {
                Ok(result) => read_response(&state, &path, result, client_cursor, None).await,
                Err(e) => error_response(e),
            }
        }
    }
}

/// SSE framing: replay what exists, then cycle `wait_for_data`, emitting
/// `data` events for new bytes and `control` events for offset/cursor
/// refreshes. A vanished stream emits an `error` event and closes.
async fn handle_sse(
    state: AppState,
    path: String,
    offset: String,
    client_cursor: Option<u64>,
) -> Response {
    // Surface absence as a plain 404 before committing to the event stream.
    if let Err(e) = state.store.head(&path).await {
        return error_response(e);
    }
    let stream = sse_event_stream(state, path, offset, client_cursor);
    Sse::new(stream)
        .keep_alive(
            axum::response::sse::KeepAlive::new()
                .interval(Duration::from_secs(SSE_KEEPALIVE_SECS))
                .text("keepalive"),
        )
        .into_response()
}

fn sse_event_stream(
    state: AppState,
    path: String,
    mut offset: String,
    client_cursor: Option<u64>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        let cursor_options = state.cursor_options();
        let mut cursor = generate_response_cursor(client_cursor, &cursor_options);

        // Replay whatever is already committed.
        match state.store.get(&path, Some(&offset)).await {
            Ok(result) => {
                if !result.messages.is_empty() {
                    let body = state.store.format_response(&path, &result.messages);
                    yield Ok(Event::default()
                        .event("data")
                        .data(String::from_utf8_lossy(&body)));
                }
                offset = result.next_offset.clone();
                yield Ok(control_event(&result.next_offset, cursor, true));
            }
            Err(e) => {
                yield Ok(error_event(&e));
                return;
            }
        }

        loop {
            let wait = state
                .store
                .wait_for_data(&path, &offset, state.options.long_poll_timeout_ms)
                .await;
            match wait {
                Ok(result) if result.timed_out => {
                    // Refresh cursor and offset so clients can checkpoint.
                    cursor = generate_response_cursor(Some(cursor), &cursor_options);
                    match state.store.head(&path).await {
                        Ok(head) => {
                            yield Ok(control_event(&head.next_offset, cursor, true));
                        }
                        Err(e) => {
                            yield Ok(error_event(&e));
                            break;
                        }
                    }
                }
                Ok(result) if result.messages.is_empty() => {
                    yield Ok(error_event(&StoreError::StreamNotFound(path.clone())));
                    break;
                }
                Ok(_) => match state.store.get(&path, Some(&offset)).await {
                    Ok(result) => {
                        let body = state.store.format_response(&path, &result.messages);
                        yield Ok(Event::default()
                            .event("data")
                            .data(String::from_utf8_lossy(&body)));
                        offset = result.next_offset.clone();
                        cursor = generate_response_cursor(Some(cursor), &cursor_options);
                        yield Ok(control_event(&result.next_offset, cursor, result.up_to_date));
                    }
                    Err(e) => {
                        yield Ok(error_event(&e));
                        break;
                    }
                },
                Err(e) => {
                    yield Ok(error_event(&e));
                    break;
                }
            }
        }
    }
}

fn control_event(next_offset: &str, cursor: u64, up_to_date: bool) -> Event {
    let control = serde_json::json!({
        "streamNextOffset": next_offset,
        "streamCursor": cursor.to_string(),
        "upToDate": up_to_date,
    });
    Event::default().event("control").data(control.to_string())
}

fn error_event(err: &StoreError) -> Event {
    let payload = serde_json::json!({ "error": err.to_string() });
    Event::default().event("error").data(payload.to_string())
}

/// POST - append to a stream
async fn handle_append(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let path = format!("/{path}");

    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
    else {
        return (StatusCode::BAD_REQUEST, "Content-Type is required").into_response();
    };
    let seq = headers
        .get(HEADER_SEQ)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes.to_vec(),
        Err(_) => return (StatusCode::BAD_REQUEST, "Failed to read body").into_response(),
    };
    if body_bytes.is_empty() {
        return (StatusCode::BAD_REQUEST, "Empty body not allowed").into_response();
    }

    let options = AppendOptions {
        content_type: Some(content_type),
        seq,
    };
    match state.store.append(&path, body_bytes, options).await {
        Ok(next_offset) => Response::builder()
            .status(StatusCode::OK)
            .header(HEADER_NEXT_OFFSET, next_offset)
            .body(Body::empty())
            .unwrap(),
        Err(e) => error_response(e),
    }
}

/// DELETE - remove a stream (idempotent)
async fn handle_delete(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    let path = format!("/{path}");
    match state.store.delete(&path).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// Bind and serve until the process exits.
pub async fn start_server(
    options: ServerOptions,
    store: Arc<dyn StreamStore>,
) -> std::io::Result<()> {
    let state = AppState {
        store,
        options: options.clone(),
    };
    let router = create_router(state);

    let addr = format!("{}:{}", options.host, options.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("durable streams server listening on {}", listener.local_addr()?);
    axum::serve(listener, router).await
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use futures::StreamExt;
    use tower::ServiceExt;

    use super::*;
    use crate::store::MemoryStreamStore;

    fn test_state() -> AppState {
        AppState {
            store: Arc::new(MemoryStreamStore::new()),
            options: ServerOptions::default(),
        }
    }

    fn request(method: &str, uri: &str) -> axum::http::request::Builder {
        Request::builder().method(method).uri(uri)
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    fn header<'a>(response: &'a Response, name: &str) -> &'a str {
        response
            .headers()
            .get(name)
            .unwrap_or_else(|| panic!("missing header {name}"))
            .to_str()
            .unwrap()
    }

    #[tokio::test]
    async fn create_and_read_empty_json_stream() {
        let app = create_router(test_state());

        let response = app
            .clone()
            .oneshot(
                request("PUT", "/s1")
                    .header("Content-Type", "application/json")
                    .body(Body::from("[]"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            header(&response, "stream-next-offset"),
            "0000000000000000_0000000000000000"
        );
        assert_eq!(header(&response, "location"), "/s1");

        let response = app
            .oneshot(request("GET", "/s1?offset=-1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "stream-up-to-date"), "true");
        assert_eq!(body_bytes(response).await, b"[]");
    }

    #[tokio::test]
    async fn append_raw_bytes_and_read_from_offset() {
        let app = create_router(test_state());

        let response = app
            .clone()
            .oneshot(
                request("PUT", "/s2")
                    .header("Content-Type", "application/octet-stream")
                    .body(Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            header(&response, "stream-next-offset"),
            "0000000000000001_0000000000000005"
        );

        let response = app
            .clone()
            .oneshot(
                request("POST", "/s2")
                    .header("Content-Type", "application/octet-stream")
                    .body(Body::from(" world"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            header(&response, "stream-next-offset"),
            "0000000000000002_000000000000000b"
        );

        let response = app
            .oneshot(
                request("GET", "/s2?offset=0000000000000000_0000000000000005")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b" world");
    }

    #[tokio::test]
    async fn json_append_convention() {
        let app = create_router(test_state());

        app.clone()
            .oneshot(
                request("PUT", "/s3")
                    .header("Content-Type", "application/json")
                    .body(Body::from("{\"a\":1}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        let response = app
            .clone()
            .oneshot(
                request("POST", "/s3")
                    .header("Content-Type", "application/json")
                    .body(Body::from("[{\"a\":2},{\"a\":3}]"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request("GET", "/s3?offset=-1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"[{\"a\":1},{\"a\":2},{\"a\":3}]");
    }

    #[tokio::test]
    async fn idempotent_put_conflicts() {
        let app = create_router(test_state());
        let put = |ct: &'static str, ttl: &'static str| {
            request("PUT", "/s4")
                .header("Content-Type", ct)
                .header(HEADER_TTL, ttl)
                .body(Body::empty())
                .unwrap()
        };

        let response = app
            .clone()
            .oneshot(put("application/json", "60"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(put("application/json", "120"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app.clone().oneshot(put("text/plain", "60")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app.oneshot(put("application/json", "60")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn sequence_conflict_maps_to_409() {
        let app = create_router(test_state());
        app.clone()
            .oneshot(
                request("PUT", "/s5")
                    .header("Content-Type", "application/octet-stream")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let post = |seq: &'static str, data: &'static str| {
            request("POST", "/s5")
                .header("Content-Type", "application/octet-stream")
                .header(HEADER_SEQ, seq)
                .body(Body::from(data))
                .unwrap()
        };

        let response = app.clone().oneshot(post("00000005", "a")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(post("00000005", "b")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_bytes(response).await;
        assert!(String::from_utf8_lossy(&body).contains("> 00000005"));

        let response = app.oneshot(post("00000006", "c")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn long_poll_wakes_on_append() {
        let state = test_state();
        let app = create_router(state.clone());

        let response = app
            .clone()
            .oneshot(
                request("PUT", "/s6")
                    .header("Content-Type", "application/octet-stream")
                    .body(Body::from("x"))
                    .unwrap(),
            )
            .await
            .unwrap();
        let offset = header(&response, "stream-next-offset").to_string();

        let waiting = {
            let app = app.clone();
            let uri = format!("/s6?offset={offset}&live=long-poll");
            tokio::spawn(async move {
                app.oneshot(request("GET", &uri).body(Body::empty()).unwrap())
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let response = app
            .oneshot(
                request("POST", "/s6")
                    .header("Content-Type", "application/octet-stream")
                    .body(Body::from("y"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = waiting.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            header(&response, "stream-next-offset"),
            "0000000000000002_0000000000000002"
        );
        assert_eq!(header(&response, "stream-up-to-date"), "true");
        assert_eq!(body_bytes(response).await, b"y");
    }

    #[tokio::test]
    async fn long_poll_timeout_returns_up_to_date() {
        let mut state = test_state();
        state.options.long_poll_timeout_ms = 50;
        let app = create_router(state);

        app.clone()
            .oneshot(
                request("PUT", "/s")
                    .header("Content-Type", "application/octet-stream")
                    .body(Body::from("x"))
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .oneshot(
                request(
                    "GET",
                    "/s?offset=0000000000000001_0000000000000001&live=long-poll",
                )
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(header(&response, "stream-up-to-date"), "true");
        assert_eq!(
            header(&response, "stream-next-offset"),
            "0000000000000001_0000000000000001"
        );
    }

    #[tokio::test]
    async fn live_mode_requires_offset() {
        let app = create_router(test_state());
        app.clone()
            .oneshot(
                request("PUT", "/s")
                    .header("Content-Type", "application/octet-stream")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .oneshot(
                request("GET", "/s?live=long-poll")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn etag_match_yields_304() {
        let app = create_router(test_state());
        app.clone()
            .oneshot(
                request("PUT", "/s")
                    .header("Content-Type", "application/octet-stream")
                    .body(Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(request("GET", "/s?offset=-1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let etag = header(&response, "etag").to_string();

        let response = app
            .clone()
            .oneshot(
                request("GET", "/s?offset=-1")
                    .header("If-None-Match", &etag)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(header(&response, "etag"), etag);
        assert!(body_bytes(response).await.is_empty());

        // The sentinel and its normalized form describe the same snapshot.
        let response = app
            .oneshot(
                request("GET", "/s?offset=0000000000000000_0000000000000000")
                    .header("If-None-Match", &etag)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn head_reports_metadata_or_404() {
        let app = create_router(test_state());

        let response = app
            .clone()
            .oneshot(request("HEAD", "/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        app.clone()
            .oneshot(
                request("PUT", "/s")
                    .header("Content-Type", "text/plain")
                    .body(Body::from("abc"))
                    .unwrap(),
            )
            .await
            .unwrap();
        let response = app
            .oneshot(request("HEAD", "/s").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            header(&response, "stream-next-offset"),
            "0000000000000001_0000000000000003"
        );
        assert_eq!(header(&response, "content-type"), "text/plain");
        assert!(response.headers().contains_key("etag"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let app = create_router(test_state());
        app.clone()
            .oneshot(
                request("PUT", "/s")
                    .header("Content-Type", "text/plain")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(request("DELETE", "/s").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(request("DELETE", "/s").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(request("GET", "/s?offset=-1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn append_requires_content_type_and_body() {
        let app = create_router(test_state());
        app.clone()
            .oneshot(
                request("PUT", "/s")
                    .header("Content-Type", "application/octet-stream")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(request("POST", "/s").body(Body::from("x")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(
                request("POST", "/s")
                    .header("Content-Type", "application/octet-stream")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn append_to_absent_stream_is_404() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                request("POST", "/nope")
                    .header("Content-Type", "application/octet-stream")
                    .body(Body::from("x"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_json_array_append_is_400() {
        let app = create_router(test_state());
        app.clone()
            .oneshot(
                request("PUT", "/j")
                    .header("Content-Type", "application/json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let response = app
            .oneshot(
                request("POST", "/j")
                    .header("Content-Type", "application/json")
                    .body(Body::from("[]"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_offset_is_400() {
        let app = create_router(test_state());
        app.clone()
            .oneshot(
                request("PUT", "/s")
                    .header("Content-Type", "application/octet-stream")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let response = app
            .oneshot(
                request("GET", "/s?offset=bogus")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn put_rejects_conflicting_or_malformed_expiry() {
        let app = create_router(test_state());

        let response = app
            .clone()
            .oneshot(
                request("PUT", "/s")
                    .header("Content-Type", "text/plain")
                    .header(HEADER_TTL, "60")
                    .header(HEADER_EXPIRES_AT, "2030-01-02T03:04:05Z")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(
                request("PUT", "/s")
                    .header("Content-Type", "text/plain")
                    .header(HEADER_TTL, "0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(
                request("PUT", "/s")
                    .header("Content-Type", "text/plain")
                    .header(HEADER_EXPIRES_AT, "2030-01-02T03:04Z")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn sse_replays_existing_data() {
        let app = create_router(test_state());
        app.clone()
            .oneshot(
                request("PUT", "/sse")
                    .header("Content-Type", "application/octet-stream")
                    .body(Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .oneshot(
                request("GET", "/sse?offset=-1&live=sse")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(header(&response, "content-type").starts_with("text/event-stream"));

        let mut body = response.into_body().into_data_stream();
        let mut collected = String::new();
        // The replayed data event and the first control event arrive
        // immediately; everything after that would block on the wait cycle.
        while !collected.contains("event: control") {
            let chunk = tokio::time::timeout(Duration::from_secs(1), body.next())
                .await
                .expect("timed out waiting for SSE frames")
                .expect("SSE stream ended early")
                .unwrap();
            collected.push_str(&String::from_utf8_lossy(&chunk));
        }
        assert!(collected.contains("event: data"));
        assert!(collected.contains("hello"));
        assert!(collected.contains("streamNextOffset"));
    }

    #[tokio::test]
    async fn sse_on_absent_stream_is_404() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                request("GET", "/nope?offset=-1&live=sse")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
