//! Purpose: Provide an HTTP client for the memflight v0 transport.
//! Exports: `RemoteClient`, `RemoteStream`.
//! Role: Blocking client that mirrors `InMemoryStore` operations against `memflight serve`.
//! Invariants: Envelopes come from `api::wire`; error kinds survive the round trip.
//! Invariants: Transport read/write timeouts surface as `ErrorKind::Timeout`.
#![allow(clippy::result_large_err)]

use std::error::Error as StdError;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::wire::{
    ActionsEnvelope, ErrorEnvelope, FlightEnvelope, FlightsEnvelope, PutResponse,
    ResultsEnvelope, STREAM_CONTENT_TYPE,
};
use crate::core::batch::Batch;
use crate::core::buffer::Arena;
use crate::core::error::{Error, ErrorKind};
use crate::core::ipc::{StreamReader, StreamWriter};
use crate::core::schema::Schema;
use crate::core::store::{
    Action, ActionResult, ActionType, Criteria, FlightInfo, StreamDescriptor, Ticket,
};

type ApiResult<T> = Result<T, Error>;

/// Batches of one remote sub-stream, decoded as they arrive.
pub type RemoteStream = StreamReader<Box<dyn Read + Send + Sync + 'static>>;

#[derive(Clone)]
pub struct RemoteClient {
    inner: Arc<RemoteClientInner>,
}

struct RemoteClientInner {
    base_url: Url,
    agent: ureq::Agent,
    arena: Arena,
}

impl RemoteClient {
    pub fn new(base_url: impl Into<String>) -> ApiResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let agent = ureq::AgentBuilder::new().build();
        Ok(Self {
            inner: Arc::new(RemoteClientInner {
                base_url,
                agent,
                arena: Arena::new(),
            }),
        })
    }

    /// Bounds connect, read, and write waits; expiry surfaces as `Timeout`.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        self.with_agent(agent)
    }

    /// Arena used for batches decoded from responses.
    pub fn with_arena(mut self, arena: Arena) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.arena = arena;
        } else {
            self.inner = Arc::new(RemoteClientInner {
                base_url: self.inner.base_url.clone(),
                agent: self.inner.agent.clone(),
                arena,
            });
        }
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn health(&self) -> ApiResult<()> {
        let url = build_url(&self.inner.base_url, &["healthz"])?;
        let _: serde_json::Value = self.request_json("GET", &url, &())?;
        Ok(())
    }

    pub fn list_flights(&self, criteria: &Criteria) -> ApiResult<Vec<FlightInfo>> {
        let url = build_url(&self.inner.base_url, &["v0", "flights"])?;
        let envelope: FlightsEnvelope = self.request_json("POST", &url, criteria)?;
        Ok(envelope.flights)
    }

    pub fn get_flight_info(&self, descriptor: &StreamDescriptor) -> ApiResult<FlightInfo> {
        let url = build_url(&self.inner.base_url, &["v0", "flights", "info"])?;
        let envelope: FlightEnvelope = self.request_json("POST", &url, descriptor)?;
        Ok(envelope.flight)
    }

    pub fn get_stream(&self, ticket: &Ticket) -> ApiResult<RemoteStream> {
        let url = build_url(&self.inner.base_url, &["v0", "get"])?;
        let response = self
            .request("POST", &url)
            .set("Accept", STREAM_CONTENT_TYPE)
            .send_bytes(ticket.as_bytes());
        let response = check_response(response)?;
        StreamReader::new(response.into_reader(), &self.inner.arena)
    }

    /// Uploads `batches` as one put session and returns the commit outcome.
    pub fn put<I>(
        &self,
        descriptor: &StreamDescriptor,
        schema: Arc<Schema>,
        batches: I,
    ) -> ApiResult<PutResponse>
    where
        I: IntoIterator<Item = (Batch, Bytes)>,
    {
        let mut writer = StreamWriter::new(Vec::new(), schema)?;
        for (batch, app_metadata) in batches {
            writer.write_batch_with_metadata(&batch, &app_metadata)?;
        }
        let body = writer.finish()?;

        let mut url = build_url(&self.inner.base_url, &["v0", "put"])?;
        let descriptor_json = String::from_utf8(descriptor.to_json()?).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("descriptor json is not utf-8")
                .with_source(err)
        })?;
        url.query_pairs_mut().append_pair("descriptor", &descriptor_json);
        let response = self
            .request("POST", &url)
            .set("Content-Type", STREAM_CONTENT_TYPE)
            .set("Accept", "application/json")
            .send_bytes(&body);
        read_json_response(check_response(response)?)
    }

    pub fn do_action(&self, action: &Action) -> ApiResult<Vec<ActionResult>> {
        let url = build_url(&self.inner.base_url, &["v0", "actions", action.kind.as_str()])?;
        let response = self
            .request("POST", &url)
            .set("Accept", "application/json")
            .send_bytes(&action.body);
        let envelope: ResultsEnvelope = read_json_response(check_response(response)?)?;
        Ok(envelope.results)
    }

    pub fn drop_flight(&self, descriptor: &StreamDescriptor) -> ApiResult<()> {
        self.do_action(&Action::drop_flight(descriptor)?)?;
        Ok(())
    }

    pub fn list_actions(&self) -> ApiResult<Vec<ActionType>> {
        let url = build_url(&self.inner.base_url, &["v0", "actions"])?;
        let envelope: ActionsEnvelope = self.request_json("GET", &url, &())?;
        Ok(envelope.actions)
    }

    fn request_json<T, R>(&self, method: &str, url: &Url, body: &T) -> ApiResult<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let request = self.request(method, url).set("Accept", "application/json");
        let response = if method == "GET" {
            request.call()
        } else {
            let payload = serde_json::to_string(body).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode request json")
                    .with_source(err)
            })?;
            request
                .set("Content-Type", "application/json")
                .send_string(&payload)
        };
        read_json_response(check_response(response)?)
    }

    fn request(&self, method: &str, url: &Url) -> ureq::Request {
        self.inner.agent.request(method, url.as_str())
    }

    fn with_agent(mut self, agent: ureq::Agent) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.agent = agent;
        } else {
            self.inner = Arc::new(RemoteClientInner {
                base_url: self.inner.base_url.clone(),
                agent,
                arena: self.inner.arena.clone(),
            });
        }
        self
    }
}

fn check_response(response: Result<ureq::Response, ureq::Error>) -> ApiResult<ureq::Response> {
    match response {
        Ok(resp) => Ok(resp),
        Err(ureq::Error::Status(code, resp)) => Err(parse_error_response(code, resp)),
        Err(ureq::Error::Transport(err)) => Err(transport_error(err)),
    }
}

fn transport_error(err: ureq::Transport) -> Error {
    let timed_out = {
        let mut source = err.source();
        let mut found = false;
        while let Some(cause) = source {
            if let Some(io_err) = cause.downcast_ref::<io::Error>() {
                if matches!(io_err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) {
                    found = true;
                    break;
                }
            }
            source = cause.source();
        }
        found
    };
    if timed_out {
        return Error::new(ErrorKind::Timeout)
            .with_message("request timed out")
            .with_source(err);
    }
    Error::new(ErrorKind::Io)
        .with_message("request failed")
        .with_hint("Check that the server is running and reachable.")
        .with_source(err)
}

fn normalize_base_url(raw: String) -> ApiResult<Url> {
    let mut url = Url::parse(&raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid remote base url")
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("remote base url must use http or https scheme"));
    }
    if url.path() != "/" && !url.path().is_empty() {
        return Err(
            Error::new(ErrorKind::Usage).with_message("remote base url must not include a path")
        );
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn build_url(base_url: &Url, segments: &[&str]) -> ApiResult<Url> {
    let mut url = base_url.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            Error::new(ErrorKind::Usage).with_message("remote base url cannot be a base")
        })?;
        path.clear();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

fn read_json_response<R>(response: ureq::Response) -> ApiResult<R>
where
    R: DeserializeOwned,
{
    let body = response.into_string().map_err(|err| {
        let kind = match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::Timeout,
            _ => ErrorKind::Io,
        };
        Error::new(kind)
            .with_message("failed to read response body")
            .with_source(err)
    })?;
    serde_json::from_str(&body).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("invalid response json")
            .with_source(err)
    })
}

fn parse_error_response(status: u16, response: ureq::Response) -> Error {
    let body = response.into_string().unwrap_or_default();
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&body) {
        return envelope.error.into_error();
    }
    let kind = error_kind_from_status(status);
    Error::new(kind).with_message(format!("remote error status {status}"))
}

fn error_kind_from_status(status: u16) -> ErrorKind {
    match status {
        400 | 413 => ErrorKind::Usage,
        404 => ErrorKind::UnknownDescriptor,
        409 => ErrorKind::SchemaMismatch,
        501 => ErrorKind::Unimplemented,
        503 => ErrorKind::Closed,
        504 => ErrorKind::Timeout,
        507 => ErrorKind::Allocation,
        500..=599 => ErrorKind::Internal,
        _ => ErrorKind::Io,
    }
}

#[cfg(test)]
mod tests {
    use super::{RemoteClient, build_url, error_kind_from_status, normalize_base_url};
    use crate::core::error::ErrorKind;

    #[test]
    fn normalize_base_url_strips_trailing_parts() {
        let url = normalize_base_url("http://localhost:8080".to_string()).expect("url");
        assert_eq!(url.as_str(), "http://localhost:8080/");
        let err = normalize_base_url("ftp://localhost".to_string()).expect_err("scheme");
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = normalize_base_url("http://localhost/v0".to_string()).expect_err("path");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn build_url_encodes_segments() {
        let base = normalize_base_url("http://localhost:8080".to_string()).expect("url");
        let url = build_url(&base, &["v0", "actions", "a b"]).expect("url");
        assert_eq!(url.as_str(), "http://localhost:8080/v0/actions/a%20b");
    }

    #[test]
    fn status_fallback_maps_to_kinds() {
        assert_eq!(error_kind_from_status(404), ErrorKind::UnknownDescriptor);
        assert_eq!(error_kind_from_status(501), ErrorKind::Unimplemented);
        assert_eq!(error_kind_from_status(504), ErrorKind::Timeout);
        assert_eq!(error_kind_from_status(302), ErrorKind::Io);
    }

    #[test]
    fn unreachable_server_is_io_error() {
        let client = RemoteClient::new("http://127.0.0.1:9").expect("client");
        let err = client.health().expect_err("no server");
        assert!(matches!(err.kind(), ErrorKind::Io | ErrorKind::Timeout));
    }
}
