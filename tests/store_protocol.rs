//! Purpose: Exercise the put/get protocol of `InMemoryStore` through the public API.
//! Exports: None (integration test module).
//! Role: Validate session isolation, backpressure, and rollback across threads.
//! Invariants: Every producer runs inside `thread::scope`, so no thread outlives a test.
//! Invariants: Bounded waits avoid test flakiness.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use memflight::api::{
    Action, Arena, Batch, Criteria, DataType, DefaultComparator, Error, ErrorKind, Field,
    InMemoryStore,
    Schema, StoreOptions, StreamDescriptor, Ticket, Value, Vector, binary_search,
    sort_out_of_place,
};

fn person_schema() -> Arc<Schema> {
    Arc::new(
        Schema::new(vec![
            Field::new("name", DataType::Utf8, true),
            Field::new("age", DataType::Int32, true),
            Field::list("points", Field::new("intCol", DataType::Int32, true), true),
        ])
        .expect("schema"),
    )
}

fn person_batch(arena: &Arena, ages: [i32; 3]) -> Batch {
    let columns = vec![
        Vector::from_utf8(arena, "name", &[Some("david"), Some("gladis"), Some("juan")])
            .expect("name"),
        Vector::from_i32(arena, "age", &[Some(ages[0]), Some(ages[1]), Some(ages[2])])
            .expect("age"),
        Vector::from_i32_lists(
            arena,
            "points",
            &[
                Some(vec![1, 3, 5, 7, 9]),
                Some(vec![2, 4, 6, 8, 10]),
                None,
            ],
        )
        .expect("points"),
    ];
    Batch::try_new(person_schema(), 3, columns).expect("batch")
}

fn ages(store: &InMemoryStore, descriptor: &StreamDescriptor) -> Vec<i32> {
    let info = store.get_flight_info(descriptor).expect("info");
    let mut out = Vec::new();
    for endpoint in &info.endpoints {
        for batch in store.get_stream(&endpoint.ticket).expect("stream") {
            let column = batch.column("age").expect("age column");
            for row in 0..column.len() {
                match column.get(row).map(|value| value.to_value()) {
                    Some(Value::Int32(age)) => out.push(age),
                    other => panic!("unexpected age {other:?}"),
                }
            }
        }
    }
    out
}

#[test]
fn put_then_get_returns_batches_in_order() {
    let store = InMemoryStore::new(StoreOptions::default());
    let arena = Arena::new();
    let descriptor = StreamDescriptor::path(["people"]);

    thread::scope(|scope| {
        let (mut writer, reader) = store.put_channel(person_schema());
        let consumer = scope.spawn(|| store.accept_put(&descriptor, reader));
        writer
            .put_next(person_batch(&arena, [10, 20, 30]), &b"first"[..])
            .expect("put first");
        writer
            .put_next(person_batch(&arena, [40, 50, 60]), &b"second"[..])
            .expect("put second");
        let (summary, acks) = writer.complete_with_acks().expect("complete");
        assert_eq!(summary.batches, 2);
        assert_eq!(summary.records, 6);
        assert_eq!(acks.len(), 2);
        assert_eq!(&acks[1].app_metadata[..], b"second");
        consumer.join().expect("join").expect("accept");
    });

    assert_eq!(ages(&store, &descriptor), vec![10, 20, 30, 40, 50, 60]);

    let info = store.get_flight_info(&descriptor).expect("info");
    assert_eq!(info.total_records, 6);
    let mut stream = store
        .get_stream(&info.endpoints[0].ticket)
        .expect("stream");
    let first = stream.next().expect("first batch");
    assert_eq!(
        first.column("points").expect("points").get(2),
        None,
        "null list survives the round trip"
    );
    assert_eq!(stream.remaining(), 1);
}

#[test]
fn concurrent_puts_to_distinct_descriptors_are_isolated() {
    let store = InMemoryStore::new(StoreOptions::default());
    let arena = Arena::new();
    let descriptors: Vec<StreamDescriptor> = (0..8)
        .map(|i| StreamDescriptor::path(["fleet".to_string(), format!("ship-{i}")]))
        .collect();

    thread::scope(|scope| {
        for (i, descriptor) in descriptors.iter().enumerate() {
            let store = &store;
            let arena = &arena;
            scope.spawn(move || {
                let (mut writer, reader) = store.put_channel(person_schema());
                thread::scope(|inner| {
                    let consumer = inner.spawn(|| store.accept_put(descriptor, reader));
                    let base = i as i32 * 100;
                    for round in 0..4 {
                        let offset = base + round * 3;
                        writer
                            .put_next(
                                person_batch(arena, [offset, offset + 1, offset + 2]),
                                &b""[..],
                            )
                            .expect("put");
                    }
                    writer.complete().expect("complete");
                    consumer.join().expect("join").expect("accept");
                });
            });
        }
    });

    let flights = store
        .list_flights(&Criteria::path_prefix(["fleet"]))
        .expect("list");
    assert_eq!(flights.len(), descriptors.len());
    for (i, descriptor) in descriptors.iter().enumerate() {
        let base = i as i32 * 100;
        let expected: Vec<i32> = (base..base + 12).collect();
        assert_eq!(ages(&store, descriptor), expected);
    }
}

#[test]
fn concurrent_sessions_on_one_descriptor_add_endpoints() {
    let store = InMemoryStore::new(StoreOptions::default());
    let arena = Arena::new();
    let descriptor = StreamDescriptor::path(["shared"]);

    thread::scope(|scope| {
        for i in 0..4 {
            let store = &store;
            let arena = &arena;
            let descriptor = &descriptor;
            scope.spawn(move || {
                let (mut writer, reader) = store.put_channel(person_schema());
                thread::scope(|inner| {
                    let consumer = inner.spawn(|| store.accept_put(descriptor, reader));
                    writer
                        .put_next(person_batch(arena, [i, i, i]), &b""[..])
                        .expect("put");
                    writer.complete().expect("complete");
                    consumer.join().expect("join").expect("accept");
                });
            });
        }
    });

    let info = store.get_flight_info(&descriptor).expect("info");
    assert_eq!(info.endpoints.len(), 4);
    let mut seen = ages(&store, &descriptor);
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 0, 0, 1, 1, 1, 2, 2, 2, 3, 3, 3]);
}

#[test]
fn full_queue_blocks_producer_until_store_reads() {
    let store = InMemoryStore::new(StoreOptions {
        put_queue_depth: 1,
        ..StoreOptions::default()
    });
    let arena = Arena::new();
    let descriptor = StreamDescriptor::path(["slow"]);
    let (mut writer, reader) = store.put_channel(person_schema());

    writer
        .put_next(person_batch(&arena, [1, 2, 3]), &b""[..])
        .expect("first fits");
    assert!(!writer.is_ready());
    let err = writer
        .put_next_timeout(
            person_batch(&arena, [4, 5, 6]),
            &b""[..],
            Duration::from_millis(20),
        )
        .expect_err("queue full");
    assert_eq!(err.kind(), ErrorKind::Timeout);

    thread::scope(|scope| {
        let consumer = scope.spawn(|| store.accept_put(&descriptor, reader));
        writer
            .put_next_timeout(
                person_batch(&arena, [4, 5, 6]),
                &b""[..],
                Duration::from_secs(5),
            )
            .expect("drained");
        let summary = writer.complete().expect("complete");
        assert_eq!(summary.batches, 2);
        consumer.join().expect("join").expect("accept");
    });

    assert_eq!(ages(&store, &descriptor), vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn abort_and_disconnect_leave_no_stream() {
    let store = InMemoryStore::new(StoreOptions::default());
    let arena = Arena::new();
    let aborted = StreamDescriptor::path(["aborted"]);
    let vanished = StreamDescriptor::path(["vanished"]);

    thread::scope(|scope| {
        let (mut writer, reader) = store.put_channel(person_schema());
        let consumer = scope.spawn(|| store.accept_put(&aborted, reader));
        writer
            .put_next(person_batch(&arena, [1, 2, 3]), &b""[..])
            .expect("put");
        writer.abort(Error::new(ErrorKind::Usage).with_message("cancelled"));
        let err = consumer.join().expect("join").expect_err("aborted");
        assert_eq!(err.kind(), ErrorKind::AbortedSession);

        let (mut writer, reader) = store.put_channel(person_schema());
        let consumer = scope.spawn(|| store.accept_put(&vanished, reader));
        writer
            .put_next(person_batch(&arena, [1, 2, 3]), &b""[..])
            .expect("put");
        drop(writer);
        let err = consumer.join().expect("join").expect_err("disconnected");
        assert_eq!(err.kind(), ErrorKind::AbortedSession);
    });

    for descriptor in [&aborted, &vanished] {
        let err = store.get_flight_info(descriptor).expect_err("no stream");
        assert_eq!(err.kind(), ErrorKind::UnknownDescriptor);
    }
    assert!(store.list_flights(&Criteria::default()).expect("list").is_empty());
}

#[test]
fn pending_session_stays_hidden_and_its_abort_keeps_committed_state() {
    let store = InMemoryStore::new(StoreOptions::default());
    let arena = Arena::new();
    let session_arena = Arena::new();
    let descriptor = StreamDescriptor::path(["ledger"]);

    thread::scope(|scope| {
        let (mut writer, reader) = store.put_channel(person_schema());
        let consumer = scope.spawn(|| store.accept_put(&descriptor, reader));
        writer
            .put_next(person_batch(&arena, [1, 2, 3]), &b""[..])
            .expect("put");
        writer.complete().expect("complete");
        consumer.join().expect("join").expect("accept");
    });
    let committed = store.get_flight_info(&descriptor).expect("info");

    thread::scope(|scope| {
        let (mut writer, reader) = store.put_channel(person_schema());
        let consumer = scope.spawn(|| store.accept_put(&descriptor, reader));
        writer
            .put_next(person_batch(&session_arena, [4, 5, 6]), &b"pending"[..])
            .expect("put");
        let ack = writer
            .recv_ack_timeout(Duration::from_secs(5))
            .expect("store holds the batch");
        assert_eq!(ack.index, 0);
        assert!(session_arena.allocated_bytes() > 0);

        let during = store.get_flight_info(&descriptor).expect("info while pending");
        assert_eq!(during.endpoints.len(), 1);
        assert_eq!(during.total_records, 3);
        assert_eq!(ages(&store, &descriptor), vec![1, 2, 3]);

        writer.abort(Error::new(ErrorKind::Usage).with_message("cancelled"));
        let err = consumer.join().expect("join").expect_err("aborted");
        assert_eq!(err.kind(), ErrorKind::AbortedSession);
    });

    assert_eq!(
        session_arena.allocated_bytes(),
        0,
        "aborted session released its buffers"
    );
    let after = store.get_flight_info(&descriptor).expect("info after abort");
    assert_eq!(after.endpoints.len(), 1);
    assert_eq!(after.total_records, committed.total_records);
    assert_eq!(after.total_bytes, committed.total_bytes);
    assert_eq!(ages(&store, &descriptor), vec![1, 2, 3]);
}

#[test]
fn schema_conflict_is_rejected_without_touching_existing_data() {
    let store = InMemoryStore::new(StoreOptions::default());
    let arena = Arena::new();
    let descriptor = StreamDescriptor::path(["typed"]);

    thread::scope(|scope| {
        let (mut writer, reader) = store.put_channel(person_schema());
        let consumer = scope.spawn(|| store.accept_put(&descriptor, reader));
        writer
            .put_next(person_batch(&arena, [7, 8, 9]), &b""[..])
            .expect("put");
        writer.complete().expect("complete");
        consumer.join().expect("join").expect("accept");
    });

    let other = Arc::new(Schema::new(vec![Field::new("x", DataType::Int64, false)]).expect("schema"));
    thread::scope(|scope| {
        let (writer, reader) = store.put_channel(other);
        let consumer = scope.spawn(|| store.accept_put(&descriptor, reader));
        let err = writer.complete().expect_err("conflict");
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
        let err = consumer.join().expect("join").expect_err("conflict");
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
    });

    assert_eq!(ages(&store, &descriptor), vec![7, 8, 9]);
}

#[test]
fn drop_then_get_with_old_ticket_fails() {
    let store = InMemoryStore::new(StoreOptions::default());
    let arena = Arena::new();
    let descriptor = StreamDescriptor::command(&b"SELECT * FROM people"[..]);

    thread::scope(|scope| {
        let (mut writer, reader) = store.put_channel(person_schema());
        let consumer = scope.spawn(|| store.accept_put(&descriptor, reader));
        writer
            .put_next(person_batch(&arena, [1, 2, 3]), &b""[..])
            .expect("put");
        writer.complete().expect("complete");
        consumer.join().expect("join").expect("accept");
    });

    let ticket: Ticket = store.get_flight_info(&descriptor).expect("info").endpoints[0]
        .ticket
        .clone();
    let held = store.get_stream(&ticket).expect("stream before drop");

    store
        .do_action(&Action::drop_flight(&descriptor).expect("action"))
        .expect("drop");
    let err = store.get_stream(&ticket).expect_err("dropped");
    assert_eq!(err.kind(), ErrorKind::UnknownHandle);
    assert_eq!(held.count(), 1, "streams handed out before the drop stay readable");

    let err = store
        .do_action(&Action::drop_flight(&descriptor).expect("action"))
        .expect_err("second drop");
    assert_eq!(err.kind(), ErrorKind::UnknownDescriptor);
}

#[test]
fn fetched_column_can_be_sorted_and_searched() {
    let store = InMemoryStore::new(StoreOptions::default());
    let arena = Arena::new();
    let descriptor = StreamDescriptor::path(["ages"]);

    thread::scope(|scope| {
        let (mut writer, reader) = store.put_channel(person_schema());
        let consumer = scope.spawn(|| store.accept_put(&descriptor, reader));
        writer
            .put_next(person_batch(&arena, [42, 7, 19]), &b""[..])
            .expect("put");
        writer.complete().expect("complete");
        consumer.join().expect("join").expect("accept");
    });

    let info = store.get_flight_info(&descriptor).expect("info");
    let batch = store
        .get_stream(&info.endpoints[0].ticket)
        .expect("stream")
        .next()
        .expect("batch");
    let comparator = DefaultComparator::default();
    let sorted = sort_out_of_place(batch.column("age").expect("age"), &comparator).expect("sort");
    let probe = Vector::from_i32(&arena, "age", &[Some(19)]).expect("probe");
    let found = binary_search(&sorted, &comparator, &probe, 0).expect("search");
    assert_eq!(found, Some(1));
}
