// Put channel: a bounded producer→store queue plus acks and a final outcome.
//
// The producer owns a `PutWriter`; the store consumes the matching
// `PutReader` inside `accept_put`. Dropping the writer without `complete`
// disconnects the channel, which the store treats as an abort.
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{
    bounded, unbounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender,
};

use crate::core::batch::Batch;
use crate::core::error::{Error, ErrorKind};
use crate::core::schema::Schema;

/// Identifies one put session within a store.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SessionId(pub u64);

/// Acknowledgement for the `index`-th batch of a session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PutAck {
    pub index: u64,
    pub app_metadata: Bytes,
}

/// What a committed session added.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PutSummary {
    pub ordinal: usize,
    pub batches: u64,
    pub records: u64,
}

pub(crate) enum PutMessage {
    Batch { batch: Batch, app_metadata: Bytes },
    End,
    Abort(Error),
}

/// Store-side view of one event; disconnection reads as `Disconnected`.
pub(crate) enum PutEvent {
    Batch { batch: Batch, app_metadata: Bytes },
    End,
    Abort(Error),
    Disconnected,
}

/// Creates a put channel whose batch queue holds at most `capacity` entries.
pub fn put_channel(schema: Arc<Schema>, capacity: usize) -> (PutWriter, PutReader) {
    let (batch_tx, batch_rx) = bounded(capacity.max(1));
    let (ack_tx, ack_rx) = unbounded();
    let (done_tx, done_rx) = bounded(1);
    let writer = PutWriter {
        schema: Arc::clone(&schema),
        batches: batch_tx,
        acks: ack_rx,
        done: done_rx,
        sent: 0,
    };
    let reader = PutReader {
        schema,
        batches: batch_rx,
        acks: ack_tx,
        done: done_tx,
    };
    (writer, reader)
}

/// Producer end of a put session.
pub struct PutWriter {
    schema: Arc<Schema>,
    batches: Sender<PutMessage>,
    acks: Receiver<PutAck>,
    done: Receiver<Result<PutSummary, Error>>,
    sent: u64,
}

impl PutWriter {
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// True when the next `put_next` will not block on a full queue.
    pub fn is_ready(&self) -> bool {
        !self.batches.is_full()
    }

    /// Queues one batch, blocking while the queue is full.
    pub fn put_next(&mut self, batch: Batch, app_metadata: impl Into<Bytes>) -> Result<(), Error> {
        self.check_schema(&batch)?;
        let message = PutMessage::Batch {
            batch,
            app_metadata: app_metadata.into(),
        };
        if self.batches.send(message).is_err() {
            return Err(self.store_gone());
        }
        self.sent += 1;
        Ok(())
    }

    /// Like `put_next` but gives up with `Timeout` once `timeout` elapses.
    pub fn put_next_timeout(
        &mut self,
        batch: Batch,
        app_metadata: impl Into<Bytes>,
        timeout: Duration,
    ) -> Result<(), Error> {
        self.check_schema(&batch)?;
        let message = PutMessage::Batch {
            batch,
            app_metadata: app_metadata.into(),
        };
        match self.batches.send_timeout(message, timeout) {
            Ok(()) => {
                self.sent += 1;
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => Err(Error::new(ErrorKind::Timeout)
                .with_message(format!("put queue stayed full for {timeout:?}"))
                .with_index(self.sent)),
            Err(SendTimeoutError::Disconnected(_)) => Err(self.store_gone()),
        }
    }

    /// Acks received so far, without blocking.
    pub fn poll_acks(&self) -> Vec<PutAck> {
        self.acks.try_iter().collect()
    }

    pub fn recv_ack_timeout(&self, timeout: Duration) -> Result<PutAck, Error> {
        self.acks.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => Error::new(ErrorKind::Timeout)
                .with_message(format!("no ack within {timeout:?}")),
            RecvTimeoutError::Disconnected => Error::new(ErrorKind::AbortedSession)
                .with_message("put session ended before the ack arrived"),
        })
    }

    /// Sends the end marker and waits for the store to commit.
    pub fn complete(self) -> Result<PutSummary, Error> {
        if self.batches.send(PutMessage::End).is_err() {
            return Err(self.store_gone());
        }
        match self.done.recv() {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::new(ErrorKind::AbortedSession)
                .with_message("store dropped the session without an outcome")),
        }
    }

    /// Like `complete`, also returning every ack not yet polled. The store
    /// sends all acks before its outcome, so none are missing.
    pub fn complete_with_acks(self) -> Result<(PutSummary, Vec<PutAck>), Error> {
        let acks = self.acks.clone();
        let summary = self.complete()?;
        Ok((summary, acks.try_iter().collect()))
    }

    /// Like `complete` but bounded by `timeout`.
    pub fn complete_timeout(self, timeout: Duration) -> Result<PutSummary, Error> {
        match self.batches.send_timeout(PutMessage::End, timeout) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                return Err(Error::new(ErrorKind::Timeout)
                    .with_message(format!("put queue stayed full for {timeout:?}")));
            }
            Err(SendTimeoutError::Disconnected(_)) => return Err(self.store_gone()),
        }
        self.done.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => Error::new(ErrorKind::Timeout)
                .with_message(format!("commit not confirmed within {timeout:?}")),
            RecvTimeoutError::Disconnected => Error::new(ErrorKind::AbortedSession)
                .with_message("store dropped the session without an outcome"),
        })?
    }

    /// Cancels the session and waits until the store has rolled it back.
    pub fn abort(self, reason: Error) {
        if self.batches.send(PutMessage::Abort(reason)).is_ok() {
            let _ = self.done.recv();
        }
    }

    fn check_schema(&self, batch: &Batch) -> Result<(), Error> {
        if batch.schema().as_ref() != self.schema.as_ref() {
            return Err(Error::new(ErrorKind::SchemaMismatch)
                .with_message("batch schema differs from the session schema")
                .with_index(self.sent));
        }
        Ok(())
    }

    fn store_gone(&self) -> Error {
        match self.done.try_recv() {
            Ok(Err(err)) => err,
            _ => Error::new(ErrorKind::AbortedSession)
                .with_message("store is no longer reading this session"),
        }
    }
}

/// Store end of a put session.
pub struct PutReader {
    schema: Arc<Schema>,
    batches: Receiver<PutMessage>,
    acks: Sender<PutAck>,
    done: Sender<Result<PutSummary, Error>>,
}

impl PutReader {
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub(crate) fn recv(&self) -> PutEvent {
        match self.batches.recv() {
            Ok(PutMessage::Batch {
                batch,
                app_metadata,
            }) => PutEvent::Batch {
                batch,
                app_metadata,
            },
            Ok(PutMessage::End) => PutEvent::End,
            Ok(PutMessage::Abort(err)) => PutEvent::Abort(err),
            Err(_) => PutEvent::Disconnected,
        }
    }

    pub(crate) fn ack(&self, ack: PutAck) {
        // Producers may stop reading acks; that is not an error.
        let _ = self.acks.send(ack);
    }

    pub(crate) fn finish(self, outcome: Result<PutSummary, Error>) {
        let _ = self.done.send(outcome);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{put_channel, PutAck, PutEvent};
    use crate::core::batch::tests::{person_batch, person_schema};
    use crate::core::buffer::Arena;
    use crate::core::error::ErrorKind;

    #[test]
    fn bounded_queue_reports_backpressure() {
        let arena = Arena::new();
        let (mut writer, reader) = put_channel(person_schema(), 1);
        assert!(writer.is_ready());
        writer.put_next(person_batch(&arena), &b""[..]).expect("first");
        assert!(!writer.is_ready());
        let err = writer
            .put_next_timeout(person_batch(&arena), &b""[..], Duration::from_millis(10))
            .expect_err("full");
        assert_eq!(err.kind(), ErrorKind::Timeout);

        assert!(matches!(reader.recv(), PutEvent::Batch { .. }));
        assert!(writer.is_ready());
    }

    #[test]
    fn acks_flow_back_to_the_writer() {
        let (writer, reader) = put_channel(person_schema(), 4);
        reader.ack(PutAck {
            index: 0,
            app_metadata: bytes::Bytes::from_static(b"m0"),
        });
        let ack = writer.recv_ack_timeout(Duration::from_millis(50)).expect("ack");
        assert_eq!(ack.index, 0);
        assert_eq!(&ack.app_metadata[..], b"m0");
        assert!(writer.poll_acks().is_empty());
    }

    #[test]
    fn dropped_writer_reads_as_disconnect() {
        let (writer, reader) = put_channel(person_schema(), 4);
        drop(writer);
        assert!(matches!(reader.recv(), PutEvent::Disconnected));
    }

    #[test]
    fn writer_checks_batch_schema() {
        let arena = Arena::new();
        let schema = std::sync::Arc::new(
            crate::core::schema::Schema::new(vec![crate::core::schema::Field::new(
                "x",
                crate::core::schema::DataType::Int32,
                true,
            )])
            .expect("schema"),
        );
        let (mut writer, _reader) = put_channel(schema, 4);
        let err = writer
            .put_next(person_batch(&arena), &b""[..])
            .expect_err("mismatch");
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
    }
}
