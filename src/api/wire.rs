//! Purpose: JSON envelopes and constants of the HTTP transport.
//! Exports: Request/response envelopes shared by `memflight serve` and `RemoteClient`.
//! Role: Single definition of the wire shape so both ends cannot drift.
//! Invariants: Error envelopes carry the stable `ErrorKind::as_str` names.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind};
use crate::core::store::{ActionResult, ActionType, FlightInfo, PutAck, PutSummary};

pub const STREAM_CONTENT_TYPE: &str = "application/x-memflight-stream";
pub const VERSION_HEADER: &str = "memflight-version";
pub const VERSION: &str = "0";

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
}

impl ErrorBody {
    pub fn from_error(err: &Error) -> Self {
        Self {
            kind: err.kind().as_str().to_string(),
            message: err.message().map(str::to_string),
            hint: err.hint().map(str::to_string),
            descriptor: err.descriptor().map(str::to_string),
            index: err.index(),
        }
    }

    /// Unknown kinds decode as `Internal`.
    pub fn into_error(self) -> Error {
        let kind = ErrorKind::parse(&self.kind).unwrap_or(ErrorKind::Internal);
        let mut err = Error::new(kind);
        if let Some(message) = self.message {
            err = err.with_message(message);
        }
        if let Some(hint) = self.hint {
            err = err.with_hint(hint);
        }
        if let Some(descriptor) = self.descriptor {
            err = err.with_descriptor(descriptor);
        }
        if let Some(index) = self.index {
            err = err.with_index(index);
        }
        err
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FlightsEnvelope {
    pub flights: Vec<FlightInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FlightEnvelope {
    pub flight: FlightInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActionsEnvelope {
    pub actions: Vec<ActionType>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResultsEnvelope {
    pub results: Vec<ActionResult>,
}

#[derive(Debug, Deserialize)]
pub struct PutQuery {
    pub descriptor: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AckRecord {
    pub index: u64,
    #[serde(default)]
    pub app_metadata: Bytes,
}

impl From<PutAck> for AckRecord {
    fn from(ack: PutAck) -> Self {
        Self {
            index: ack.index,
            app_metadata: ack.app_metadata,
        }
    }
}

/// Outcome of a remote put: the commit summary plus every ack in order.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PutResponse {
    pub ordinal: usize,
    pub batches: u64,
    pub records: u64,
    pub acks: Vec<AckRecord>,
}

impl PutResponse {
    pub fn new(summary: PutSummary, acks: Vec<PutAck>) -> Self {
        Self {
            ordinal: summary.ordinal,
            batches: summary.batches,
            records: summary.records,
            acks: acks.into_iter().map(AckRecord::from).collect(),
        }
    }
}
