// Descriptors, tickets, and the request/response records of the store protocol.
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind};
use crate::core::schema::Schema;

/// Names one stream: an opaque command blob or a list of path segments.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamDescriptor {
    Command { cmd: Bytes },
    Path { path: Vec<String> },
}

impl StreamDescriptor {
    pub fn path<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StreamDescriptor::Path {
            path: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn command(cmd: impl Into<Bytes>) -> Self {
        StreamDescriptor::Command { cmd: cmd.into() }
    }

    pub fn segments(&self) -> Option<&[String]> {
        match self {
            StreamDescriptor::Path { path } => Some(path),
            StreamDescriptor::Command { .. } => None,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(self).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode descriptor")
                .with_source(err)
        })
    }

    pub fn from_json(body: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(body).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("descriptor is not valid JSON")
                .with_hint(r#"Expected {"type":"path","path":["a","b"]} or {"type":"command","cmd":[...]}."#)
                .with_source(err)
        })
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamDescriptor::Path { path } => write!(f, "path:{}", path.join("/")),
            StreamDescriptor::Command { cmd } => {
                write!(f, "cmd:{}", String::from_utf8_lossy(cmd))
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
struct TicketBody {
    descriptor: StreamDescriptor,
    ordinal: usize,
}

/// Opaque handle to one committed sub-stream of one descriptor.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Ticket(Bytes);

impl Ticket {
    pub fn new(descriptor: &StreamDescriptor, ordinal: usize) -> Result<Self, Error> {
        let body = TicketBody {
            descriptor: descriptor.clone(),
            ordinal,
        };
        let bytes = serde_json::to_vec(&body).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode ticket")
                .with_source(err)
        })?;
        Ok(Self(Bytes::from(bytes)))
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    /// Resolves to (descriptor, sub-stream ordinal); bad bytes are `UnknownHandle`.
    pub fn resolve(&self) -> Result<(StreamDescriptor, usize), Error> {
        let body: TicketBody = serde_json::from_slice(&self.0).map_err(|err| {
            Error::new(ErrorKind::UnknownHandle)
                .with_message("ticket does not name a stream")
                .with_source(err)
        })?;
        Ok((body.descriptor, body.ordinal))
    }
}

/// Listing filter; the default matches every descriptor.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Criteria {
    #[serde(default)]
    pub path_prefix: Vec<String>,
}

impl Criteria {
    pub fn path_prefix<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path_prefix: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, descriptor: &StreamDescriptor) -> bool {
        if self.path_prefix.is_empty() {
            return true;
        }
        descriptor
            .segments()
            .is_some_and(|segments| segments.starts_with(&self.path_prefix))
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FlightEndpoint {
    pub ticket: Ticket,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlightInfo {
    pub descriptor: StreamDescriptor,
    pub schema: Arc<Schema>,
    pub endpoints: Vec<FlightEndpoint>,
    pub total_records: u64,
    pub total_bytes: u64,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub body: Bytes,
}

impl Action {
    pub fn new(kind: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            kind: kind.into(),
            body: body.into(),
        }
    }

    /// `drop` action for `descriptor`.
    pub fn drop_flight(descriptor: &StreamDescriptor) -> Result<Self, Error> {
        Ok(Self::new(ACTION_DROP, descriptor.to_json()?))
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ActionType {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub body: Bytes,
}

pub const ACTION_GET: &str = "get";
pub const ACTION_PUT: &str = "put";
pub const ACTION_DROP: &str = "drop";
