//! Purpose: Define the public Rust API boundary for memflight.
//! Exports: Store, encoding, kernel, and codec types plus the HTTP `RemoteClient`.
//! Role: Public, additive-only surface used by the CLI, the server, and tests.
//! Invariants: Everything a caller needs is reachable from this module.
//! Invariants: Wire envelopes live in `wire` so server and client share one shape.

mod remote;
pub mod wire;

pub use crate::core::batch::Batch;
pub use crate::core::buffer::{Arena, Buffer, ColumnBuffer, ValidityBitmap};
pub use crate::core::compare::{
    DefaultComparator, FnComparator, NullOrder, StableComparator, VectorComparator, from_fn,
};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::ipc::{StreamReader, StreamWriter, decode_batch, encode_batch};
pub use crate::core::schema::{DataType, Field, Layout, Schema};
pub use crate::core::search::{binary_search, linear_search};
pub use crate::core::sort::{sort_in_place, sort_out_of_place};
pub use crate::core::store::{
    Action, ActionResult, ActionType, BatchStream, Criteria, FlightEndpoint, FlightInfo,
    HolderStatus, InMemoryStore, PutAck, PutReader, PutSummary, PutWriter, StoreOptions,
    StreamDescriptor, Ticket, put_channel,
};
pub use crate::core::vector::{ListSlice, Value, ValueRef, Vector};
pub use remote::{RemoteClient, RemoteStream};
