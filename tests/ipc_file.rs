//! Purpose: Validate the IPC stream format against real files.
//! Exports: None (integration test module).
//! Role: Files written by `StreamWriter` read back through `StreamReader` and the CLI.
//! Invariants: Uses temp directories only.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::process::Command;
use std::sync::Arc;

use memflight::api::{
    Arena, Batch, DataType, ErrorKind, Field, Schema, StreamReader, StreamWriter, Vector,
};

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

fn readings(arena: &Arena, stations: &[Option<&str>], temps: &[Option<i32>]) -> TestResult<Batch> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("station", DataType::Utf8, true),
        Field::new("temp", DataType::Int32, true),
    ])?);
    let columns = vec![
        Vector::from_utf8(arena, "station", stations)?,
        Vector::from_i32(arena, "temp", temps)?,
    ];
    Ok(Batch::try_new(schema, stations.len(), columns)?)
}

fn write_file(path: &std::path::Path, batches: &[Batch]) -> TestResult<()> {
    let schema = Arc::clone(batches[0].schema());
    let mut writer = StreamWriter::new(BufWriter::new(File::create(path)?), schema)?;
    for (index, batch) in batches.iter().enumerate() {
        writer.write_batch_with_metadata(batch, format!("batch-{index}").as_bytes())?;
    }
    writer.finish()?;
    Ok(())
}

#[test]
fn file_round_trip_keeps_rows_and_metadata() -> TestResult<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("readings.mfs");
    let arena = Arena::new();
    let batches = vec![
        readings(&arena, &[Some("oslo"), None], &[Some(-3), Some(4)])?,
        readings(&arena, &[Some("lima")], &[None])?,
    ];
    write_file(&path, &batches)?;

    let mut reader = StreamReader::new(BufReader::new(File::open(&path)?), &arena)?;
    assert_eq!(reader.schema().len(), 2);
    let (first, meta) = reader.next_batch_with_metadata()?.ok_or("missing first")?;
    assert_eq!(&meta[..], b"batch-0");
    assert_eq!(first.to_tsv(), "station\ttemp\noslo\t-3\nnull\t4\n");
    let (second, meta) = reader.next_batch_with_metadata()?.ok_or("missing second")?;
    assert_eq!(&meta[..], b"batch-1");
    assert_eq!(second.to_tsv(), "station\ttemp\nlima\tnull\n");
    assert!(reader.next_batch()?.is_none());
    Ok(())
}

#[test]
fn truncated_file_is_malformed() -> TestResult<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("cut.mfs");
    let arena = Arena::new();
    write_file(&path, &[readings(&arena, &[Some("oslo")], &[Some(1)])?])?;

    let bytes = fs::read(&path)?;
    fs::write(&path, &bytes[..bytes.len() - 20])?;

    let mut reader = StreamReader::new(BufReader::new(File::open(&path)?), &arena)?;
    let err = reader.next_batch().expect_err("truncated");
    assert_eq!(err.kind(), ErrorKind::MalformedEncoding);
    Ok(())
}

#[test]
fn cli_inspect_prints_tsv() -> TestResult<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("readings.mfs");
    let arena = Arena::new();
    write_file(
        &path,
        &[
            readings(&arena, &[Some("oslo")], &[Some(-3)])?,
            readings(&arena, &[Some("lima")], &[Some(18)])?,
        ],
    )?;

    let output = Command::new(env!("CARGO_BIN_EXE_memflight"))
        .arg("inspect")
        .arg(&path)
        .output()?;
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8(output.stdout)?,
        "station\ttemp\noslo\t-3\nlima\t18\n"
    );
    Ok(())
}

#[test]
fn cli_inspect_missing_file_reports_io_json() -> TestResult<()> {
    let dir = tempfile::tempdir()?;
    let output = Command::new(env!("CARGO_BIN_EXE_memflight"))
        .arg("inspect")
        .arg(dir.path().join("absent.mfs"))
        .output()?;
    assert_eq!(output.status.code(), Some(13));
    let value: serde_json::Value = serde_json::from_slice(&output.stderr)?;
    assert_eq!(value["error"]["kind"], "Io");
    Ok(())
}
