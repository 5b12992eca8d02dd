//! Purpose: Hold top-level CLI command dispatch for `memflight`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Remote commands go through `api::RemoteClient`; no command touches a store directly.
//! Invariants: Batches print as TSV with a single header line per flight.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use memflight::api::{
    Arena, Batch, Criteria, RemoteClient, StreamReader, StreamWriter, Ticket,
};
use serde_json::json;

use super::*;

pub(super) fn dispatch_command(command: Command) -> Result<RunOutcome, Error> {
    match command {
        Command::Version => {
            emit_json(json!({
                "name": "memflight",
                "version": env!("CARGO_PKG_VERSION"),
                "wire_version": memflight::api::wire::VERSION,
            }));
            Ok(RunOutcome::ok())
        }
        Command::Serve(args) => {
            let bind: SocketAddr = args.bind.parse().map_err(|_| {
                Error::new(ErrorKind::Usage)
                    .with_message("invalid bind address")
                    .with_hint("Use a host:port value like 127.0.0.1:8088.")
            })?;
            let config = serve::ServeConfig {
                bind,
                allow_non_loopback: args.allow_non_loopback,
                max_body_bytes: args.max_body_bytes,
                put_queue_depth: args.put_queue_depth,
                max_concurrent_gets: args.max_concurrent_gets,
                memory_limit_bytes: args.memory_limit_bytes,
                location: args.location,
            };
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(serve::serve(config))?;
            Ok(RunOutcome::ok())
        }
        Command::Inspect { file } => {
            let mut reader = StreamReader::new(open_file(&file)?, &Arena::new())?;
            let mut out = std::io::stdout().lock();
            let mut header = true;
            while let Some(batch) = reader.next_batch()? {
                write_tsv(&mut out, &batch, header)?;
                header = false;
            }
            if header {
                write_header(&mut out, reader.schema())?;
            }
            Ok(RunOutcome::ok())
        }
        Command::List { remote, prefix } => {
            let client = remote_client(&remote)?;
            let criteria = match prefix {
                Some(prefix) => Criteria::path_prefix(split_path(&prefix)?),
                None => Criteria::default(),
            };
            let flights = client.list_flights(&criteria)?;
            emit_json(json!({ "flights": to_value(&flights)? }));
            Ok(RunOutcome::ok())
        }
        Command::Info { remote, descriptor } => {
            let client = remote_client(&remote)?;
            let flight = client.get_flight_info(&descriptor.descriptor()?)?;
            emit_json(json!({ "flight": to_value(&flight)? }));
            Ok(RunOutcome::ok())
        }
        Command::Get {
            remote,
            descriptor,
            output,
        } => {
            let client = remote_client(&remote)?;
            let flight = client.get_flight_info(&descriptor.descriptor()?)?;
            let tickets = flight
                .endpoints
                .iter()
                .map(|endpoint| endpoint.ticket.clone())
                .collect::<Vec<Ticket>>();
            match output {
                Some(path) => {
                    let file = File::create(&path).map_err(|err| {
                        Error::new(ErrorKind::Io)
                            .with_message(format!("failed to create {}", path.display()))
                            .with_source(err)
                    })?;
                    let mut writer =
                        StreamWriter::new(BufWriter::new(file), Arc::clone(&flight.schema))?;
                    for ticket in &tickets {
                        for batch in client.get_stream(ticket)? {
                            writer.write_batch(&batch?)?;
                        }
                    }
                    writer.finish()?;
                }
                None => {
                    let mut out = std::io::stdout().lock();
                    write_header(&mut out, &flight.schema)?;
                    for ticket in &tickets {
                        for batch in client.get_stream(ticket)? {
                            write_tsv(&mut out, &batch?, false)?;
                        }
                    }
                }
            }
            Ok(RunOutcome::ok())
        }
        Command::Put {
            remote,
            descriptor,
            file,
        } => {
            let client = remote_client(&remote)?;
            let descriptor = descriptor.descriptor()?;
            let mut reader = StreamReader::new(open_file(&file)?, &Arena::new())?;
            let schema = Arc::clone(reader.schema());
            let mut batches: Vec<(Batch, Bytes)> = Vec::new();
            while let Some(entry) = reader.next_batch_with_metadata()? {
                batches.push(entry);
            }
            let response = client.put(&descriptor, schema, batches)?;
            emit_json(json!({ "put": to_value(&response)? }));
            Ok(RunOutcome::ok())
        }
        Command::Drop { remote, descriptor } => {
            let client = remote_client(&remote)?;
            let descriptor = descriptor.descriptor()?;
            client.drop_flight(&descriptor)?;
            emit_json(json!({ "dropped": descriptor.to_string() }));
            Ok(RunOutcome::ok())
        }
        Command::Actions { remote } => {
            let client = remote_client(&remote)?;
            let actions = client.list_actions()?;
            emit_json(json!({ "actions": to_value(&actions)? }));
            Ok(RunOutcome::ok())
        }
    }
}

fn remote_client(args: &RemoteArgs) -> Result<RemoteClient, Error> {
    if args.timeout_secs == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--timeout-secs must be greater than zero"));
    }
    Ok(RemoteClient::new(args.url.clone())?.with_timeout(Duration::from_secs(args.timeout_secs)))
}

fn open_file(path: &Path) -> Result<BufReader<File>, Error> {
    let file = File::open(path).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message(format!("failed to open {}", path.display()))
            .with_source(err)
    })?;
    Ok(BufReader::new(file))
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, Error> {
    serde_json::to_value(value).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode output json")
            .with_source(err)
    })
}

fn write_header(out: &mut impl Write, schema: &memflight::api::Schema) -> Result<(), Error> {
    let names = schema
        .fields
        .iter()
        .map(|field| field.name.as_str())
        .collect::<Vec<_>>();
    writeln!(out, "{}", names.join("\t")).map_err(stdout_error)
}

fn write_tsv(out: &mut impl Write, batch: &Batch, header: bool) -> Result<(), Error> {
    let tsv = batch.to_tsv();
    let body = if header {
        tsv.as_str()
    } else {
        tsv.split_once('\n').map(|(_, rows)| rows).unwrap_or("")
    };
    out.write_all(body.as_bytes()).map_err(stdout_error)
}

fn stdout_error(err: std::io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write output")
        .with_source(err)
}
