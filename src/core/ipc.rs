// IPC stream codec: a schema message, batch messages, and an end marker.
//
// Every message is framed as magic (4) | kind u32 | body_len u64 | body.
// Schema bodies are JSON; batch bodies are little-endian binary:
//   metadata_len u32 | metadata | row_count u64 | column_count u32 | columns...
// and each column recursively:
//   len u64 | validity_len u32 | validity | [offsets_len u32 | offsets]
//   | data_len u64 | data | [child column]
use std::io::{self, Read, Write};
use std::sync::Arc;

use bytes::Bytes;

use crate::core::batch::Batch;
use crate::core::buffer::{Arena, Buffer, ValidityBitmap};
use crate::core::error::{Error, ErrorKind};
use crate::core::schema::{Field, Layout, Schema};
use crate::core::vector::{Vector, VectorParts};

pub const MESSAGE_MAGIC: [u8; 4] = *b"MFM1";
pub const MESSAGE_HEADER_LEN: usize = 16;
pub const MAX_MESSAGE_LEN: u64 = 1024 * 1024 * 1024;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageKind {
    Schema = 1,
    Batch = 2,
    End = 3,
}

impl MessageKind {
    fn from_u32(value: u32) -> Result<Self, Error> {
        match value {
            1 => Ok(MessageKind::Schema),
            2 => Ok(MessageKind::Batch),
            3 => Ok(MessageKind::End),
            _ => Err(Error::new(ErrorKind::MalformedEncoding)
                .with_message(format!("unknown message kind {value}"))),
        }
    }
}

pub fn encode_schema(schema: &Schema) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(schema).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode schema")
            .with_source(err)
    })
}

pub fn decode_schema(body: &[u8]) -> Result<Schema, Error> {
    let schema: Schema = serde_json::from_slice(body).map_err(|err| {
        Error::new(ErrorKind::MalformedEncoding)
            .with_message("schema message is not valid JSON")
            .with_source(err)
    })?;
    schema.validate()?;
    Ok(schema)
}

/// Encodes one batch body (without the message frame).
pub fn encode_batch(batch: &Batch, app_metadata: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(app_metadata.len() as u32).to_le_bytes());
    out.extend_from_slice(app_metadata);
    out.extend_from_slice(&(batch.row_count() as u64).to_le_bytes());
    out.extend_from_slice(&(batch.columns().len() as u32).to_le_bytes());
    for column in batch.columns() {
        encode_vector(column, &mut out);
    }
    out
}

fn encode_vector(vector: &Vector, out: &mut Vec<u8>) {
    out.extend_from_slice(&(vector.len() as u64).to_le_bytes());
    let validity = vector.validity().as_bytes();
    out.extend_from_slice(&(validity.len() as u32).to_le_bytes());
    out.extend_from_slice(validity);
    if let Some(offsets) = vector.offsets_buffer() {
        out.extend_from_slice(&(offsets.len() as u32).to_le_bytes());
        out.extend_from_slice(offsets.as_slice());
    }
    let data = vector.data();
    out.extend_from_slice(&(data.len() as u64).to_le_bytes());
    out.extend_from_slice(data);
    if let Some(child) = vector.child() {
        encode_vector(child, out);
    }
}

/// Decodes one batch body against `schema`, allocating from `arena`.
pub fn decode_batch(body: &[u8], schema: &Arc<Schema>, arena: &Arena) -> Result<(Batch, Bytes), Error> {
    let mut cursor = BodyCursor { buf: body, pos: 0 };
    let metadata_len = cursor.read_u32()? as usize;
    let metadata = Bytes::copy_from_slice(cursor.take(metadata_len)?);
    let row_count = cursor.read_u64()? as usize;
    let column_count = cursor.read_u32()? as usize;
    if column_count != schema.len() {
        return Err(Error::new(ErrorKind::SchemaMismatch).with_message(format!(
            "batch message has {column_count} columns, schema has {}",
            schema.len()
        )));
    }
    let mut columns = Vec::with_capacity(column_count);
    for field in &schema.fields {
        columns.push(decode_vector(&mut cursor, field, arena)?);
    }
    if cursor.pos != body.len() {
        return Err(Error::new(ErrorKind::MalformedEncoding)
            .with_message(format!("{} trailing bytes in batch message", body.len() - cursor.pos)));
    }
    Ok((Batch::try_new(Arc::clone(schema), row_count, columns)?, metadata))
}

fn decode_vector(cursor: &mut BodyCursor<'_>, field: &Field, arena: &Arena) -> Result<Vector, Error> {
    let len = cursor.read_u64()? as usize;
    let validity_len = cursor.read_u32()? as usize;
    let validity = ValidityBitmap::from_bytes(arena, cursor.take(validity_len)?, len)?;
    let offsets = match field.data_type.layout() {
        Layout::FixedWidth(_) => None,
        Layout::VariableWidth | Layout::List => {
            let offsets_len = cursor.read_u32()? as usize;
            Some(Buffer::from_slice(arena, cursor.take(offsets_len)?)?)
        }
    };
    let data_len = cursor.read_u64()? as usize;
    let data = Buffer::from_slice(arena, cursor.take(data_len)?)?;
    let child = match field.element() {
        Some(element) => Some(decode_vector(cursor, element, arena)?),
        None => None,
    };
    Vector::from_parts(VectorParts {
        field: field.clone(),
        len,
        validity,
        offsets,
        data,
        child,
    })
}

struct BodyCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BodyCursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], Error> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.buf.len()).ok_or_else(|| {
            Error::new(ErrorKind::MalformedEncoding).with_message(format!(
                "batch message truncated: need {len} bytes at offset {}",
                self.pos
            ))
        })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, Error> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn read_u64(&mut self) -> Result<u64, Error> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }
}

fn encode_header(kind: MessageKind, body_len: usize) -> [u8; MESSAGE_HEADER_LEN] {
    let mut buf = [0u8; MESSAGE_HEADER_LEN];
    buf[0..4].copy_from_slice(&MESSAGE_MAGIC);
    buf[4..8].copy_from_slice(&(kind as u32).to_le_bytes());
    buf[8..16].copy_from_slice(&(body_len as u64).to_le_bytes());
    buf
}

fn io_error(context: &str, err: io::Error) -> Error {
    let kind = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::Timeout,
        _ => ErrorKind::Io,
    };
    Error::new(kind).with_message(context.to_string()).with_source(err)
}

/// Writes a schema message on construction, then batches, then the end marker.
pub struct StreamWriter<W: Write> {
    writer: W,
    schema: Arc<Schema>,
    batches: u64,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(mut writer: W, schema: Arc<Schema>) -> Result<Self, Error> {
        let body = encode_schema(&schema)?;
        write_message(&mut writer, MessageKind::Schema, &body)?;
        Ok(Self {
            writer,
            schema,
            batches: 0,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn write_batch(&mut self, batch: &Batch) -> Result<(), Error> {
        self.write_batch_with_metadata(batch, &[])
    }

    pub fn write_batch_with_metadata(&mut self, batch: &Batch, app_metadata: &[u8]) -> Result<(), Error> {
        if batch.schema().as_ref() != self.schema.as_ref() {
            return Err(Error::new(ErrorKind::SchemaMismatch)
                .with_message("batch schema differs from stream schema")
                .with_index(self.batches));
        }
        let body = encode_batch(batch, app_metadata);
        write_message(&mut self.writer, MessageKind::Batch, &body)?;
        self.batches += 1;
        Ok(())
    }

    /// Writes the end marker and hands back the sink.
    pub fn finish(mut self) -> Result<W, Error> {
        write_message(&mut self.writer, MessageKind::End, &[])?;
        self.writer
            .flush()
            .map_err(|err| io_error("failed to flush stream", err))?;
        Ok(self.writer)
    }
}

fn write_message<W: Write>(writer: &mut W, kind: MessageKind, body: &[u8]) -> Result<(), Error> {
    writer
        .write_all(&encode_header(kind, body.len()))
        .and_then(|_| writer.write_all(body))
        .map_err(|err| io_error("failed to write message", err))
}

/// Reads the schema message on construction, then yields batches until the
/// end marker.
pub struct StreamReader<R: Read> {
    reader: R,
    schema: Arc<Schema>,
    arena: Arena,
    finished: bool,
}

impl<R: Read> StreamReader<R> {
    pub fn new(mut reader: R, arena: &Arena) -> Result<Self, Error> {
        let (kind, body) = read_message(&mut reader)?.ok_or_else(|| {
            Error::new(ErrorKind::MalformedEncoding).with_message("stream is empty")
        })?;
        if kind != MessageKind::Schema {
            return Err(Error::new(ErrorKind::MalformedEncoding)
                .with_message("stream must start with a schema message"));
        }
        let schema = Arc::new(decode_schema(&body)?);
        Ok(Self {
            reader,
            schema,
            arena: arena.clone(),
            finished: false,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn next_batch(&mut self) -> Result<Option<Batch>, Error> {
        Ok(self.next_batch_with_metadata()?.map(|(batch, _)| batch))
    }

    /// Next batch and its app metadata; `None` once the end marker is read.
    pub fn next_batch_with_metadata(&mut self) -> Result<Option<(Batch, Bytes)>, Error> {
        if self.finished {
            return Ok(None);
        }
        let (kind, body) = read_message(&mut self.reader)?.ok_or_else(|| {
            Error::new(ErrorKind::MalformedEncoding)
                .with_message("stream ended without an end marker")
        })?;
        match kind {
            MessageKind::Batch => decode_batch(&body, &self.schema, &self.arena).map(Some),
            MessageKind::End => {
                self.finished = true;
                Ok(None)
            }
            MessageKind::Schema => Err(Error::new(ErrorKind::MalformedEncoding)
                .with_message("unexpected second schema message")),
        }
    }
}

impl<R: Read> Iterator for StreamReader<R> {
    type Item = Result<Batch, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_batch() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => None,
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

/// `None` on a clean EOF before the header.
fn read_message<R: Read>(reader: &mut R) -> Result<Option<(MessageKind, Vec<u8>)>, Error> {
    let mut header = [0u8; MESSAGE_HEADER_LEN];
    let mut filled = 0;
    while filled < MESSAGE_HEADER_LEN {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(Error::new(ErrorKind::MalformedEncoding)
                    .with_message("message header truncated"));
            }
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(io_error("failed to read message header", err)),
        }
    }
    if header[0..4] != MESSAGE_MAGIC {
        return Err(Error::new(ErrorKind::MalformedEncoding).with_message("bad message magic"));
    }
    let mut kind_raw = [0u8; 4];
    kind_raw.copy_from_slice(&header[4..8]);
    let kind = MessageKind::from_u32(u32::from_le_bytes(kind_raw))?;
    let mut len_raw = [0u8; 8];
    len_raw.copy_from_slice(&header[8..16]);
    let body_len = u64::from_le_bytes(len_raw);
    if body_len > MAX_MESSAGE_LEN {
        return Err(Error::new(ErrorKind::MalformedEncoding)
            .with_message(format!("message body of {body_len} bytes exceeds limit")));
    }
    let mut body = vec![0u8; body_len as usize];
    reader.read_exact(&mut body).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Error::new(ErrorKind::MalformedEncoding)
                .with_message("message body truncated")
                .with_source(err)
        } else {
            io_error("failed to read message body", err)
        }
    })?;
    Ok(Some((kind, body)))
}
