//! Purpose: In-memory stream store addressed by descriptors.
//! Exports: `InMemoryStore`, descriptors/tickets, the put channel, `BatchStream`.
//! Role: Owns every committed batch; readers receive shared `Arc` views.
//! Invariants: A holder is visible only once it has a committed sub-stream.
//! Invariants: A failed or cancelled put leaves no trace and touches no other session.
//! Invariants: After `close`, every operation fails with `Closed`.
mod descriptor;
mod holder;
mod registry;
mod session;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::core::batch::Batch;
use crate::core::buffer::Arena;
use crate::core::error::{Error, ErrorKind};
use crate::core::schema::Schema;

pub use descriptor::{
    ACTION_DROP, ACTION_GET, ACTION_PUT, Action, ActionResult, ActionType, Criteria,
    FlightEndpoint, FlightInfo, StreamDescriptor, Ticket,
};
pub use holder::{HolderStatus, StreamHolder, SubStream};
pub use session::{PutAck, PutReader, PutSummary, PutWriter, SessionId, put_channel};

use registry::Registry;
use session::PutEvent;

pub const DEFAULT_SHARD_COUNT: usize = 16;
pub const DEFAULT_PUT_QUEUE_DEPTH: usize = 8;

#[derive(Clone, Debug)]
pub struct StoreOptions {
    pub shard_count: usize,
    /// Bound of each put channel created through `InMemoryStore::put_channel`.
    pub put_queue_depth: usize,
    /// Reported in every endpoint; `None` means "this store".
    pub location: Option<String>,
    /// Limit for the store arena used to decode incoming payloads.
    pub memory_limit_bytes: Option<usize>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            shard_count: DEFAULT_SHARD_COUNT,
            put_queue_depth: DEFAULT_PUT_QUEUE_DEPTH,
            location: None,
            memory_limit_bytes: None,
        }
    }
}

pub struct InMemoryStore {
    registry: Registry,
    arena: Arena,
    location: RwLock<Option<String>>,
    put_queue_depth: usize,
    next_session: AtomicU64,
    closed: AtomicBool,
}

impl InMemoryStore {
    pub fn new(options: StoreOptions) -> Self {
        let arena = match options.memory_limit_bytes {
            Some(limit) => Arena::with_limit(limit),
            None => Arena::new(),
        };
        Self {
            registry: Registry::new(options.shard_count),
            arena,
            location: RwLock::new(options.location),
            put_queue_depth: options.put_queue_depth.max(1),
            next_session: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Arena for payloads decoded on behalf of this store.
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn location(&self) -> Option<String> {
        self.location.read().clone()
    }

    pub fn set_location(&self, location: impl Into<String>) {
        *self.location.write() = Some(location.into());
    }

    /// Put channel sized by the store's configured queue depth.
    pub fn put_channel(&self, schema: Arc<Schema>) -> (PutWriter, PutReader) {
        put_channel(schema, self.put_queue_depth)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::new(ErrorKind::Closed).with_message("store is closed"));
        }
        Ok(())
    }

    /// Every visible stream matching `criteria`, ordered by descriptor.
    pub fn list_flights(&self, criteria: &Criteria) -> Result<Vec<FlightInfo>, Error> {
        self.ensure_open()?;
        let mut flights = Vec::new();
        for holder in self.registry.snapshot() {
            if !holder.is_active() || !criteria.matches(holder.descriptor()) {
                continue;
            }
            flights.push(self.flight_info(&holder)?);
        }
        flights.sort_by_key(|info| info.descriptor.to_string());
        Ok(flights)
    }

    pub fn get_flight_info(&self, descriptor: &StreamDescriptor) -> Result<FlightInfo, Error> {
        self.ensure_open()?;
        let holder = self
            .registry
            .get(descriptor)
            .filter(|holder| holder.is_active())
            .ok_or_else(|| unknown_descriptor(descriptor))?;
        self.flight_info(&holder)
    }

    fn flight_info(&self, holder: &StreamHolder) -> Result<FlightInfo, Error> {
        let location = self.location();
        let streams = holder.streams();
        let mut endpoints = Vec::with_capacity(streams.len());
        for ordinal in 0..streams.len() {
            endpoints.push(FlightEndpoint {
                ticket: Ticket::new(holder.descriptor(), ordinal)?,
                location: location.clone(),
            });
        }
        let (total_records, total_bytes) = holder.totals();
        Ok(FlightInfo {
            descriptor: holder.descriptor().clone(),
            schema: Arc::clone(holder.schema()),
            endpoints,
            total_records,
            total_bytes,
        })
    }

    /// Replays one committed sub-stream from its first batch.
    pub fn get_stream(&self, ticket: &Ticket) -> Result<BatchStream, Error> {
        self.ensure_open()?;
        let (descriptor, ordinal) = ticket.resolve()?;
        let holder = self
            .registry
            .get(&descriptor)
            .filter(|holder| holder.is_active())
            .ok_or_else(|| {
                Error::new(ErrorKind::UnknownHandle)
                    .with_message("ticket names a stream that is not available")
                    .with_descriptor(&descriptor)
            })?;
        let batches = holder.stream(ordinal).ok_or_else(|| {
            Error::new(ErrorKind::UnknownHandle)
                .with_message("ticket names a sub-stream that does not exist")
                .with_descriptor(&descriptor)
                .with_index(ordinal as u64)
        })?;
        tracing::debug!(descriptor = %descriptor, ordinal, batches = batches.len(), "get stream");
        Ok(BatchStream {
            schema: Arc::clone(holder.schema()),
            batches,
            position: 0,
        })
    }

    /// Consumes one put session: acks each batch in order, commits on the end
    /// marker, and rolls back on abort, disconnect, or a bad batch.
    pub fn accept_put(
        &self,
        descriptor: &StreamDescriptor,
        reader: PutReader,
    ) -> Result<PutSummary, Error> {
        if let Err(err) = self.ensure_open() {
            reader.finish(Err(err.detached()));
            return Err(err);
        }
        let session = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        let holder = match self.registry.begin(descriptor, reader.schema(), session) {
            Ok(holder) => holder,
            Err(err) => {
                reader.finish(Err(err.detached()));
                return Err(err);
            }
        };
        tracing::debug!(descriptor = %descriptor, session = session.0, "put session started");

        let mut batches: Vec<Arc<Batch>> = Vec::new();
        let mut records = 0u64;
        let outcome = loop {
            match reader.recv() {
                PutEvent::Batch {
                    batch,
                    app_metadata,
                } => {
                    let index = batches.len() as u64;
                    if self.is_closed() {
                        break Err(Error::new(ErrorKind::Closed)
                            .with_message("store closed during put"));
                    }
                    if batch.schema().as_ref() != holder.schema().as_ref() {
                        break Err(Error::new(ErrorKind::SchemaMismatch)
                            .with_message("batch schema differs from the stream schema")
                            .with_index(index));
                    }
                    records += batch.row_count() as u64;
                    batches.push(Arc::new(batch));
                    reader.ack(PutAck {
                        index,
                        app_metadata,
                    });
                }
                PutEvent::End => break Ok(()),
                PutEvent::Abort(reason) => {
                    break Err(Error::new(ErrorKind::AbortedSession)
                        .with_message(format!("producer aborted: {reason}")));
                }
                PutEvent::Disconnected => {
                    break Err(Error::new(ErrorKind::AbortedSession)
                        .with_message("producer disconnected before the end marker"));
                }
            }
        };

        let batch_count = batches.len() as u64;
        let committed = outcome.and_then(|()| holder.commit(session, batches));
        match committed {
            Ok(ordinal) => {
                let summary = PutSummary {
                    ordinal,
                    batches: batch_count,
                    records,
                };
                tracing::info!(
                    descriptor = %descriptor,
                    session = session.0,
                    ordinal,
                    batches = batch_count,
                    records,
                    "put committed"
                );
                reader.finish(Ok(summary.clone()));
                Ok(summary)
            }
            Err(err) => {
                let err = err.with_descriptor(descriptor);
                holder.abort(session);
                let released = self.registry.release_if_idle(&holder);
                tracing::warn!(
                    descriptor = %descriptor,
                    session = session.0,
                    released,
                    error = %err,
                    "put aborted"
                );
                reader.finish(Err(err.detached()));
                Err(err)
            }
        }
    }

    pub fn do_action(&self, action: &Action) -> Result<Vec<ActionResult>, Error> {
        self.ensure_open()?;
        match action.kind.as_str() {
            ACTION_DROP => {
                let descriptor = StreamDescriptor::from_json(&action.body)?;
                self.registry
                    .remove_active(&descriptor)
                    .ok_or_else(|| unknown_descriptor(&descriptor))?;
                tracing::info!(descriptor = %descriptor, "stream dropped");
                Ok(vec![ActionResult {
                    body: Bytes::from(descriptor.to_string()),
                }])
            }
            ACTION_GET | ACTION_PUT => Err(Error::new(ErrorKind::Unimplemented)
                .with_message(format!("action '{}' is not callable directly", action.kind))
                .with_hint("Use get_stream or accept_put.")),
            other => Err(Error::new(ErrorKind::Unimplemented)
                .with_message(format!("unknown action '{other}'"))),
        }
    }

    pub fn list_actions(&self) -> Result<Vec<ActionType>, Error> {
        self.ensure_open()?;
        Ok(vec![
            ActionType {
                kind: ACTION_GET.to_string(),
                description: "pull a stream; use the get operation with a ticket".to_string(),
            },
            ActionType {
                kind: ACTION_PUT.to_string(),
                description: "push a stream; use the put operation with a descriptor".to_string(),
            },
            ActionType {
                kind: ACTION_DROP.to_string(),
                description: "delete a stream; action body is a JSON encoded descriptor"
                    .to_string(),
            },
        ])
    }

    /// Drops every stream; later calls fail with `Closed`. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped = self.registry.clear();
        tracing::info!(dropped, "store closed");
    }
}

fn unknown_descriptor(descriptor: &StreamDescriptor) -> Error {
    Error::new(ErrorKind::UnknownDescriptor)
        .with_message("no committed stream for descriptor")
        .with_descriptor(descriptor)
}

/// Finite replay of one committed sub-stream; dropping it has no effect on
/// the store.
#[derive(Debug)]
pub struct BatchStream {
    schema: Arc<Schema>,
    batches: SubStream,
    position: usize,
}

impl BatchStream {
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn remaining(&self) -> usize {
        self.batches.len() - self.position
    }
}

impl Iterator for BatchStream {
    type Item = Arc<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch = self.batches.get(self.position)?.clone();
        self.position += 1;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining(), Some(self.remaining()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::{Action, Criteria, InMemoryStore, StoreOptions, StreamDescriptor, Ticket};
    use crate::core::batch::tests::{person_batch, person_schema};
    use crate::core::buffer::Arena;
    use crate::core::error::{Error, ErrorKind};

    fn put_person(store: &InMemoryStore, descriptor: &StreamDescriptor, arena: &Arena) {
        thread::scope(|scope| {
            let (mut writer, reader) = store.put_channel(person_schema());
            let handle = scope.spawn(move || store.accept_put(descriptor, reader));
            writer.put_next(person_batch(arena), &b"first"[..]).expect("put");
            writer.complete().expect("complete");
            handle.join().expect("join").expect("accept");
        });
    }

    #[test]
    fn put_then_get_round_trip() {
        let arena = Arena::new();
        let store = InMemoryStore::new(StoreOptions::default());
        let descriptor = StreamDescriptor::path(["profiles"]);
        put_person(&store, &descriptor, &arena);

        let info = store.get_flight_info(&descriptor).expect("info");
        assert_eq!(info.total_records, 3);
        assert_eq!(info.endpoints.len(), 1);
        let batches: Vec<_> = store.get_stream(&info.endpoints[0].ticket).expect("get").collect();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].to_tsv(), person_batch(&arena).to_tsv());
    }

    #[test]
    fn second_put_adds_an_endpoint() {
        let arena = Arena::new();
        let store = InMemoryStore::new(StoreOptions::default());
        let descriptor = StreamDescriptor::path(["profiles"]);
        put_person(&store, &descriptor, &arena);
        put_person(&store, &descriptor, &arena);
        let info = store.get_flight_info(&descriptor).expect("info");
        assert_eq!(info.endpoints.len(), 2);
        assert_eq!(info.total_records, 6);
    }

    #[test]
    fn aborted_put_leaves_nothing() {
        let arena = Arena::new();
        let store = InMemoryStore::new(StoreOptions::default());
        let descriptor = StreamDescriptor::path(["aborted"]);
        thread::scope(|scope| {
            let (mut writer, reader) = store.put_channel(person_schema());
            let handle = scope.spawn(|| store.accept_put(&descriptor, reader));
            writer.put_next(person_batch(&arena), &b""[..]).expect("put");
            writer.abort(Error::new(ErrorKind::Usage).with_message("changed my mind"));
            let err = handle.join().expect("join").expect_err("aborted");
            assert_eq!(err.kind(), ErrorKind::AbortedSession);
        });
        let err = store.get_flight_info(&descriptor).expect_err("absent");
        assert_eq!(err.kind(), ErrorKind::UnknownDescriptor);
        assert!(store.list_flights(&Criteria::default()).expect("list").is_empty());
    }

    #[test]
    fn drop_action_removes_the_stream() {
        let arena = Arena::new();
        let store = InMemoryStore::new(StoreOptions::default());
        let descriptor = StreamDescriptor::path(["gone"]);
        put_person(&store, &descriptor, &arena);
        let info = store.get_flight_info(&descriptor).expect("info");

        let action = Action::drop_flight(&descriptor).expect("action");
        store.do_action(&action).expect("drop");
        assert_eq!(
            store.get_flight_info(&descriptor).expect_err("dropped").kind(),
            ErrorKind::UnknownDescriptor
        );
        assert_eq!(
            store.get_stream(&info.endpoints[0].ticket).err().expect("stale ticket").kind(),
            ErrorKind::UnknownHandle
        );
        assert_eq!(
            store.do_action(&action).expect_err("second drop").kind(),
            ErrorKind::UnknownDescriptor
        );
    }

    #[test]
    fn unknown_actions_are_unimplemented() {
        let store = InMemoryStore::new(StoreOptions::default());
        let err = store.do_action(&Action::new("shred", &b""[..])).expect_err("unknown");
        assert_eq!(err.kind(), ErrorKind::Unimplemented);
        let kinds: Vec<_> = store
            .list_actions()
            .expect("actions")
            .into_iter()
            .map(|action| action.kind)
            .collect();
        assert_eq!(kinds, vec!["get", "put", "drop"]);
    }

    #[test]
    fn bad_tickets_are_unknown_handles() {
        let store = InMemoryStore::new(StoreOptions::default());
        let ticket = Ticket::new(&StreamDescriptor::path(["nope"]), 0).expect("ticket");
        let err = store.get_stream(&ticket).err().expect("unknown");
        assert_eq!(err.kind(), ErrorKind::UnknownHandle);
    }

    #[test]
    fn location_is_reported_in_endpoints() {
        let arena = Arena::new();
        let store = InMemoryStore::new(StoreOptions::default());
        store.set_location("http://127.0.0.1:9000");
        let descriptor = StreamDescriptor::path(["loc"]);
        put_person(&store, &descriptor, &arena);
        let info = store.get_flight_info(&descriptor).expect("info");
        assert_eq!(info.endpoints[0].location.as_deref(), Some("http://127.0.0.1:9000"));
    }

    #[test]
    fn closed_store_refuses_everything() {
        let arena = Arena::new();
        let store = Arc::new(InMemoryStore::new(StoreOptions::default()));
        let descriptor = StreamDescriptor::path(["x"]);
        put_person(&store, &descriptor, &arena);
        store.close();
        store.close();
        assert_eq!(
            store.list_flights(&Criteria::default()).expect_err("closed").kind(),
            ErrorKind::Closed
        );
        let (_writer, reader) = store.put_channel(person_schema());
        assert_eq!(
            store.accept_put(&descriptor, reader).expect_err("closed").kind(),
            ErrorKind::Closed
        );
    }
}
