//! Purpose: Provide the HTTP transport server for an `InMemoryStore`.
//! Exports: `ServeConfig`, `serve`.
//! Role: Axum-based loopback server; bodies are JSON envelopes or IPC streams.
//! Invariants: JSON envelopes come from `api::wire`; error kinds remain stable.
//! Invariants: Loopback-only unless explicitly allowed.
//! Notes: Gets stream IPC bytes from a blocking task; puts run `accept_put` per request.

use std::future::IntoFuture;
use std::io::{self, BufWriter, Cursor, Write};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::thread;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path as AxumPath, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::json;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use memflight::api::wire::{
    ActionsEnvelope, ErrorBody, ErrorEnvelope, FlightEnvelope, FlightsEnvelope, PutQuery,
    PutResponse, ResultsEnvelope, STREAM_CONTENT_TYPE, VERSION, VERSION_HEADER,
};
use memflight::api::{
    Action, Criteria, Error, ErrorKind, InMemoryStore, StoreOptions, StreamDescriptor,
    StreamReader, StreamWriter, Ticket,
};

const GET_SLOT_WAIT: Duration = Duration::from_secs(5);
const STREAM_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub allow_non_loopback: bool,
    pub max_body_bytes: u64,
    pub put_queue_depth: usize,
    pub max_concurrent_gets: usize,
    pub memory_limit_bytes: Option<u64>,
    pub location: Option<String>,
}

#[derive(Clone)]
struct AppState {
    store: Arc<InMemoryStore>,
    get_semaphore: Arc<Semaphore>,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;

    init_tracing();

    let max_body_bytes: usize = config
        .max_body_bytes
        .try_into()
        .map_err(|_| Error::new(ErrorKind::Usage).with_message("--max-body-bytes is too large"))?;
    let memory_limit_bytes = match config.memory_limit_bytes {
        Some(limit) => Some(usize::try_from(limit).map_err(|_| {
            Error::new(ErrorKind::Usage).with_message("--memory-limit-bytes is too large")
        })?),
        None => None,
    };

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    let local_addr = listener.local_addr().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read bound address")
            .with_source(err)
    })?;

    let store = Arc::new(InMemoryStore::new(StoreOptions {
        put_queue_depth: config.put_queue_depth,
        location: None,
        memory_limit_bytes,
        ..StoreOptions::default()
    }));
    store.set_location(
        config
            .location
            .clone()
            .unwrap_or_else(|| format!("http://{local_addr}")),
    );

    let state = Arc::new(AppState {
        store: Arc::clone(&store),
        get_semaphore: Arc::new(Semaphore::new(config.max_concurrent_gets)),
    });

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v0/flights", get(list_all_flights).post(list_flights))
        .route("/v0/flights/info", post(flight_info))
        .route("/v0/get", post(get_stream))
        .route("/v0/put", post(put_stream))
        .route("/v0/actions", get(list_actions))
        .route("/v0/actions/:action", post(do_action))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!(addr = %local_addr, "memflight listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    let result = tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })
        }
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                }),
                Err(_) => Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out")),
            }
        }
    };
    store.close();
    result
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }

    if config.max_body_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes must be greater than zero")
            .with_hint("Use a positive value like 67108864."));
    }

    if config.max_body_bytes > usize::MAX as u64 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes exceeds platform limits")
            .with_hint("Use a smaller value that fits in memory."));
    }

    if config.put_queue_depth == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--put-queue-depth must be greater than zero")
            .with_hint("Use a positive value like 8."));
    }

    if config.max_concurrent_gets == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-concurrent-gets must be greater than zero")
            .with_hint("Use a positive value like 64."));
    }

    if config.memory_limit_bytes == Some(0) {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--memory-limit-bytes must be greater than zero")
            .with_hint("Omit the flag for no limit."));
    }

    if let Some(location) = &config.location {
        let parsed = url::Url::parse(location).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("--location must be a valid url")
                .with_hint("Use a value like http://127.0.0.1:8088.")
                .with_source(err)
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("--location must use http or https scheme"));
        }
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

async fn healthz() -> Response {
    json_response(json!({ "ok": true }))
}

async fn list_all_flights(State(state): State<Arc<AppState>>) -> Response {
    flights_response(&state.store, &Criteria::default())
}

async fn list_flights(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let criteria = if body.is_empty() {
        Criteria::default()
    } else {
        match serde_json::from_slice::<Criteria>(&body) {
            Ok(criteria) => criteria,
            Err(err) => {
                return error_response(
                    Error::new(ErrorKind::Usage)
                        .with_message("criteria is not valid JSON")
                        .with_source(err),
                );
            }
        }
    };
    flights_response(&state.store, &criteria)
}

fn flights_response(store: &InMemoryStore, criteria: &Criteria) -> Response {
    match store.list_flights(criteria) {
        Ok(flights) => envelope_response(&FlightsEnvelope { flights }),
        Err(err) => error_response(err),
    }
}

async fn flight_info(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let result = StreamDescriptor::from_json(&body)
        .and_then(|descriptor| state.store.get_flight_info(&descriptor));
    match result {
        Ok(flight) => envelope_response(&FlightEnvelope { flight }),
        Err(err) => error_response(err),
    }
}

async fn get_stream(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let stream = match state.store.get_stream(&Ticket::from_bytes(body)) {
        Ok(stream) => stream,
        Err(err) => return error_response(err),
    };
    let permit = match tokio::time::timeout(
        GET_SLOT_WAIT,
        Arc::clone(&state.get_semaphore).acquire_owned(),
    )
    .await
    {
        Ok(Ok(permit)) => permit,
        Ok(Err(_)) => {
            return error_response(
                Error::new(ErrorKind::Closed).with_message("server is shutting down"),
            );
        }
        Err(_) => {
            return error_response(
                Error::new(ErrorKind::Timeout)
                    .with_message("too many concurrent get requests")
                    .with_hint("Try again later or raise --max-concurrent-gets."),
            );
        }
    };

    let (tx, rx) = mpsc::channel::<Result<Bytes, Error>>(16);
    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        let sink = BufWriter::with_capacity(STREAM_CHUNK_BYTES, ChannelWriter { tx: tx.clone() });
        let schema = Arc::clone(stream.schema());
        let result = StreamWriter::new(sink, schema).and_then(|mut writer| {
            for batch in stream {
                writer.write_batch(&batch)?;
            }
            writer.finish().map(|_| ())
        });
        if let Err(err) = result {
            if err.kind() != ErrorKind::Io {
                tracing::warn!(error = %err, "get stream failed");
            }
            let _ = tx.blocking_send(Err(err));
        }
    });

    let stream = ReceiverStream::new(rx)
        .map(|result| result.map_err(|err| std::io::Error::other(err.to_string())));

    let mut response = Response::new(Body::from_stream(stream));
    response.headers_mut().insert(
        "content-type",
        HeaderValue::from_static(STREAM_CONTENT_TYPE),
    );
    response
        .headers_mut()
        .insert(VERSION_HEADER, HeaderValue::from_static(VERSION));
    response
}

/// Forwards writes as response body chunks; a gone client reads as a broken pipe.
struct ChannelWriter {
    tx: mpsc::Sender<Result<Bytes, Error>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

async fn put_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PutQuery>,
    body: Bytes,
) -> Response {
    let descriptor = match StreamDescriptor::from_json(query.descriptor.as_bytes()) {
        Ok(descriptor) => descriptor,
        Err(err) => return error_response(err),
    };
    let store = Arc::clone(&state.store);
    let result = tokio::task::spawn_blocking(move || run_put(&store, &descriptor, body)).await;
    match result {
        Ok(Ok(response)) => envelope_response(&response),
        Ok(Err(err)) => error_response(err),
        Err(err) => error_response(
            Error::new(ErrorKind::Internal)
                .with_message("put task failed")
                .with_source(err),
        ),
    }
}

/// Decodes an IPC body and feeds it through one put session.
fn run_put(
    store: &InMemoryStore,
    descriptor: &StreamDescriptor,
    body: Bytes,
) -> Result<PutResponse, Error> {
    let mut reader = StreamReader::new(Cursor::new(body), store.arena())?;
    let (mut writer, session) = store.put_channel(Arc::clone(reader.schema()));
    thread::scope(|scope| {
        let consumer = scope.spawn(|| store.accept_put(descriptor, session));
        let fed = (|| {
            while let Some((batch, app_metadata)) = reader.next_batch_with_metadata()? {
                writer.put_next(batch, app_metadata)?;
            }
            Ok::<(), Error>(())
        })();
        let outcome = match fed {
            Ok(()) => writer.complete_with_acks(),
            Err(err) => {
                writer.abort(err.detached());
                Err(err)
            }
        };
        if consumer.join().is_err() {
            return Err(Error::new(ErrorKind::Internal).with_message("put session panicked"));
        }
        let (summary, acks) = outcome?;
        Ok(PutResponse::new(summary, acks))
    })
}

async fn list_actions(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list_actions() {
        Ok(actions) => envelope_response(&ActionsEnvelope { actions }),
        Err(err) => error_response(err),
    }
}

async fn do_action(
    State(state): State<Arc<AppState>>,
    AxumPath(action): AxumPath<String>,
    body: Bytes,
) -> Response {
    match state.store.do_action(&Action::new(action, body)) {
        Ok(results) => envelope_response(&ResultsEnvelope { results }),
        Err(err) => error_response(err),
    }
}

fn envelope_response<T: serde::Serialize>(payload: &T) -> Response {
    match serde_json::to_value(payload) {
        Ok(value) => json_response(value),
        Err(err) => error_response(
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode response")
                .with_source(err),
        ),
    }
}

fn json_response(payload: serde_json::Value) -> Response {
    let mut response = Json(payload).into_response();
    response
        .headers_mut()
        .insert(VERSION_HEADER, HeaderValue::from_static(VERSION));
    response
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Usage | ErrorKind::MalformedEncoding | ErrorKind::ComparatorMisuse => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::UnknownDescriptor | ErrorKind::UnknownHandle => StatusCode::NOT_FOUND,
        ErrorKind::SchemaMismatch | ErrorKind::AbortedSession => StatusCode::CONFLICT,
        ErrorKind::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        ErrorKind::Allocation => StatusCode::INSUFFICIENT_STORAGE,
        ErrorKind::Timeout | ErrorKind::Closed => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Io | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: Error) -> Response {
    let status = status_for(err.kind());
    if status.is_server_error() {
        tracing::warn!(error = %err, "request failed");
    }
    let body = ErrorEnvelope {
        error: ErrorBody::from_error(&err),
    };
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(VERSION_HEADER, HeaderValue::from_static(VERSION));
    response
}

#[cfg(test)]
mod tests {
    use super::{ErrorKind, ServeConfig, serve, status_for, validate_config};
    use axum::http::StatusCode;

    fn config() -> ServeConfig {
        ServeConfig {
            bind: "127.0.0.1:0".parse().expect("bind"),
            allow_non_loopback: false,
            max_body_bytes: 1024 * 1024,
            put_queue_depth: 8,
            max_concurrent_gets: 64,
            memory_limit_bytes: None,
            location: None,
        }
    }

    #[tokio::test]
    async fn serve_rejects_non_loopback_bind() {
        let config = ServeConfig {
            bind: "0.0.0.0:0".parse().expect("bind"),
            ..config()
        };
        let err = serve(config).await.expect_err("expected usage error");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn non_loopback_allowed_with_flag() {
        let config = ServeConfig {
            bind: "0.0.0.0:0".parse().expect("bind"),
            allow_non_loopback: true,
            ..config()
        };
        validate_config(&config).expect("config ok");
    }

    #[test]
    fn safety_limits_require_positive_values() {
        for config in [
            ServeConfig {
                max_body_bytes: 0,
                ..config()
            },
            ServeConfig {
                put_queue_depth: 0,
                ..config()
            },
            ServeConfig {
                max_concurrent_gets: 0,
                ..config()
            },
            ServeConfig {
                memory_limit_bytes: Some(0),
                ..config()
            },
        ] {
            let err = validate_config(&config).expect_err("expected usage error");
            assert_eq!(err.kind(), ErrorKind::Usage);
        }
    }

    #[test]
    fn location_must_be_http_url() {
        let config = ServeConfig {
            location: Some("not a url".to_string()),
            ..config()
        };
        assert_eq!(
            validate_config(&config).expect_err("bad url").kind(),
            ErrorKind::Usage
        );
    }

    #[test]
    fn lookup_failures_map_to_not_found() {
        assert_eq!(status_for(ErrorKind::UnknownDescriptor), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::UnknownHandle), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::Unimplemented), StatusCode::NOT_IMPLEMENTED);
    }
}
