// One descriptor's lifecycle: schema, committed sub-streams, pending sessions.
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashSet;

use crate::core::batch::Batch;
use crate::core::error::{Error, ErrorKind};
use crate::core::schema::Schema;
use crate::core::store::descriptor::StreamDescriptor;
use crate::core::store::session::SessionId;

/// An immutable, committed sequence of batches.
pub type SubStream = Arc<[Arc<Batch>]>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HolderStatus {
    /// Registered by a pending session; invisible to readers.
    Empty,
    Active,
    Dropped,
}

#[derive(Debug)]
pub struct StreamHolder {
    descriptor: StreamDescriptor,
    schema: Arc<Schema>,
    state: RwLock<HolderState>,
}

#[derive(Debug, Default)]
struct HolderState {
    streams: Vec<SubStream>,
    pending: FxHashSet<SessionId>,
    dropped: bool,
}

impl StreamHolder {
    pub fn new(descriptor: StreamDescriptor, schema: Arc<Schema>) -> Self {
        Self {
            descriptor,
            schema,
            state: RwLock::new(HolderState::default()),
        }
    }

    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn status(&self) -> HolderStatus {
        let state = self.state.read();
        if state.dropped {
            HolderStatus::Dropped
        } else if state.streams.is_empty() {
            HolderStatus::Empty
        } else {
            HolderStatus::Active
        }
    }

    pub fn is_active(&self) -> bool {
        self.status() == HolderStatus::Active
    }

    /// Registers a pending session whose schema must match the holder's.
    pub fn begin_session(&self, session: SessionId, schema: &Schema) -> Result<(), Error> {
        if schema != self.schema.as_ref() {
            return Err(Error::new(ErrorKind::SchemaMismatch)
                .with_message("put schema differs from the established stream schema")
                .with_descriptor(&self.descriptor));
        }
        let mut state = self.state.write();
        if state.dropped {
            return Err(Error::new(ErrorKind::UnknownDescriptor)
                .with_message("stream was dropped")
                .with_descriptor(&self.descriptor));
        }
        state.pending.insert(session);
        Ok(())
    }

    /// Publishes `batches` as a new sub-stream and returns its ordinal.
    pub fn commit(&self, session: SessionId, batches: Vec<Arc<Batch>>) -> Result<usize, Error> {
        let mut state = self.state.write();
        state.pending.remove(&session);
        if state.dropped {
            return Err(Error::new(ErrorKind::AbortedSession)
                .with_message("stream was dropped while the put was in flight")
                .with_descriptor(&self.descriptor));
        }
        state.streams.push(batches.into());
        Ok(state.streams.len() - 1)
    }

    /// Forgets a pending session; returns true when nothing else holds the
    /// descriptor open.
    pub fn abort(&self, session: SessionId) -> bool {
        let mut state = self.state.write();
        state.pending.remove(&session);
        state.is_idle()
    }

    pub fn is_idle(&self) -> bool {
        self.state.read().is_idle()
    }

    pub fn pending_sessions(&self) -> usize {
        self.state.read().pending.len()
    }

    pub fn stream(&self, ordinal: usize) -> Option<SubStream> {
        self.state.read().streams.get(ordinal).cloned()
    }

    pub fn streams(&self) -> Vec<SubStream> {
        self.state.read().streams.clone()
    }

    pub fn mark_dropped(&self) {
        let mut state = self.state.write();
        state.dropped = true;
        state.streams.clear();
    }

    /// (records, bytes) across committed sub-streams.
    pub fn totals(&self) -> (u64, u64) {
        let state = self.state.read();
        state
            .streams
            .iter()
            .flat_map(|stream| stream.iter())
            .fold((0, 0), |(records, bytes), batch| {
                (
                    records + batch.row_count() as u64,
                    bytes + batch.byte_size() as u64,
                )
            })
    }
}

impl HolderState {
    fn is_idle(&self) -> bool {
        self.streams.is_empty() && self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{HolderStatus, StreamHolder};
    use crate::core::batch::tests::{person_batch, person_schema};
    use crate::core::buffer::Arena;
    use crate::core::error::ErrorKind;
    use crate::core::schema::{DataType, Field, Schema};
    use crate::core::store::descriptor::StreamDescriptor;
    use crate::core::store::session::SessionId;

    #[test]
    fn holder_becomes_active_on_first_commit() {
        let arena = Arena::new();
        let holder = StreamHolder::new(StreamDescriptor::path(["p"]), person_schema());
        holder.begin_session(SessionId(1), &person_schema()).expect("begin");
        assert_eq!(holder.status(), HolderStatus::Empty);
        let ordinal = holder
            .commit(SessionId(1), vec![Arc::new(person_batch(&arena))])
            .expect("commit");
        assert_eq!(ordinal, 0);
        assert_eq!(holder.status(), HolderStatus::Active);
        assert_eq!(holder.totals().0, 3);
        assert_eq!(holder.pending_sessions(), 0);
    }

    #[test]
    fn aborted_session_leaves_idle_holder() {
        let holder = StreamHolder::new(StreamDescriptor::path(["p"]), person_schema());
        holder.begin_session(SessionId(1), &person_schema()).expect("begin");
        holder.begin_session(SessionId(2), &person_schema()).expect("begin");
        assert!(!holder.abort(SessionId(1)));
        assert!(holder.abort(SessionId(2)));
    }

    #[test]
    fn schema_must_match_established_schema() {
        let holder = StreamHolder::new(StreamDescriptor::path(["p"]), person_schema());
        let other = Schema::new(vec![Field::new("x", DataType::Int32, true)]).expect("schema");
        let err = holder.begin_session(SessionId(1), &other).expect_err("mismatch");
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
    }

    #[test]
    fn commit_after_drop_is_aborted() {
        let arena = Arena::new();
        let holder = StreamHolder::new(StreamDescriptor::path(["p"]), person_schema());
        holder.begin_session(SessionId(1), &person_schema()).expect("begin");
        holder.mark_dropped();
        let err = holder
            .commit(SessionId(1), vec![Arc::new(person_batch(&arena))])
            .expect_err("dropped");
        assert_eq!(err.kind(), ErrorKind::AbortedSession);
        assert_eq!(holder.status(), HolderStatus::Dropped);
    }
}
