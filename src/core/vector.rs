// Column vectors: fixed-width, variable-width, and list layouts over ColumnBuffer.
//
// Variable-width and list vectors are built with a forward cursor: slot i is
// closed once offsets[i + 1] is written, and a closed slot is never rewritten.
// Skipped slots become nulls with a zero offset delta.
use std::fmt;

use crate::core::buffer::{Arena, Buffer, ColumnBuffer, ValidityBitmap};
use crate::core::error::{Error, ErrorKind};
use crate::core::schema::{DataType, Field, Layout};

pub const OFFSET_WIDTH: usize = 4;

/// Owned cell value used when writing into a vector.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Utf8(String),
    Binary(Vec<u8>),
    List(Vec<Option<Value>>),
}

impl Value {
    fn matches(&self, data_type: DataType) -> bool {
        matches!(
            (self, data_type),
            (Value::Int32(_), DataType::Int32)
                | (Value::Int64(_), DataType::Int64)
                | (Value::Float32(_), DataType::Float32)
                | (Value::Float64(_), DataType::Float64)
                | (Value::Utf8(_), DataType::Utf8)
                | (Value::Binary(_), DataType::Binary)
                | (Value::List(_), DataType::List)
        )
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::Utf8(_) => "utf8",
            Value::Binary(_) => "binary",
            Value::List(_) => "list",
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float64(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Utf8(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Utf8(value)
    }
}

/// Borrowed view of one non-null cell.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ValueRef<'a> {
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Utf8(&'a str),
    Binary(&'a [u8]),
    List(ListSlice<'a>),
}

impl ValueRef<'_> {
    pub fn to_value(&self) -> Value {
        match self {
            ValueRef::Int32(value) => Value::Int32(*value),
            ValueRef::Int64(value) => Value::Int64(*value),
            ValueRef::Float32(value) => Value::Float32(*value),
            ValueRef::Float64(value) => Value::Float64(*value),
            ValueRef::Utf8(value) => Value::Utf8((*value).to_string()),
            ValueRef::Binary(value) => Value::Binary(value.to_vec()),
            ValueRef::List(slice) => Value::List(
                slice
                    .iter()
                    .map(|item| item.map(|value| value.to_value()))
                    .collect(),
            ),
        }
    }

    /// Raw bytes of a variable-width value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ValueRef::Utf8(value) => Some(value.as_bytes()),
            ValueRef::Binary(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for ValueRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueRef::Int32(value) => write!(f, "{value}"),
            ValueRef::Int64(value) => write!(f, "{value}"),
            ValueRef::Float32(value) => write!(f, "{value}"),
            ValueRef::Float64(value) => write!(f, "{value}"),
            ValueRef::Utf8(value) => f.write_str(value),
            ValueRef::Binary(value) => {
                for byte in value.iter() {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            ValueRef::List(slice) => {
                f.write_str("[")?;
                for (position, item) in slice.iter().enumerate() {
                    if position > 0 {
                        f.write_str(",")?;
                    }
                    match item {
                        Some(value) => write!(f, "{value}")?,
                        None => f.write_str("null")?,
                    }
                }
                f.write_str("]")
            }
        }
    }
}

/// Window `[start, end)` into a list vector's child.
#[derive(Clone, Copy)]
pub struct ListSlice<'a> {
    child: &'a Vector,
    start: usize,
    end: usize,
}

impl<'a> ListSlice<'a> {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn child(&self) -> &'a Vector {
        self.child
    }

    pub fn range(&self) -> (usize, usize) {
        (self.start, self.end)
    }

    pub fn get(&self, position: usize) -> Option<ValueRef<'a>> {
        if position >= self.len() {
            return None;
        }
        self.child.get(self.start + position)
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<ValueRef<'a>>> + '_ {
        (self.start..self.end).map(|index| self.child.get(index))
    }
}

impl PartialEq for ListSlice<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

impl fmt::Debug for ListSlice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[derive(Debug)]
pub struct FixedWidthVector {
    field: Field,
    width: usize,
    buffer: ColumnBuffer,
    len: usize,
}

#[derive(Debug)]
pub struct VariableWidthVector {
    field: Field,
    buffer: ColumnBuffer,
    offsets: Buffer,
    len: usize,
}

#[derive(Debug)]
pub struct ListVector {
    field: Field,
    validity: ValidityBitmap,
    offsets: Buffer,
    child: Box<Vector>,
    len: usize,
}

/// A nullable column in one of the three supported layouts.
#[derive(Debug)]
pub enum Vector {
    FixedWidth(FixedWidthVector),
    VariableWidth(VariableWidthVector),
    List(ListVector),
}

impl Vector {
    /// Allocates an empty vector for `field`; `capacity` is a sizing hint.
    pub fn allocate(arena: &Arena, field: &Field, capacity: usize) -> Result<Self, Error> {
        field.validate()?;
        let vector = match field.data_type.layout() {
            Layout::FixedWidth(width) => Vector::FixedWidth(FixedWidthVector {
                field: field.clone(),
                width,
                buffer: ColumnBuffer {
                    validity: ValidityBitmap::new(arena),
                    data: Buffer::with_capacity(arena, capacity * width),
                },
                len: 0,
            }),
            Layout::VariableWidth => Vector::VariableWidth(VariableWidthVector {
                field: field.clone(),
                buffer: ColumnBuffer::new(arena),
                offsets: initial_offsets(arena, capacity)?,
                len: 0,
            }),
            Layout::List => {
                let element = field.element().ok_or_else(|| {
                    Error::new(ErrorKind::MalformedEncoding)
                        .with_message(format!("list field '{}' has no element", field.name))
                })?;
                Vector::List(ListVector {
                    field: field.clone(),
                    validity: ValidityBitmap::new(arena),
                    offsets: initial_offsets(arena, capacity)?,
                    child: Box::new(Vector::allocate(arena, element, capacity)?),
                    len: 0,
                })
            }
        };
        Ok(vector)
    }

    /// Builds a finalized vector from `values` in one forward pass.
    pub fn from_values(
        arena: &Arena,
        field: &Field,
        values: impl IntoIterator<Item = Option<Value>>,
    ) -> Result<Self, Error> {
        let mut vector = Self::allocate(arena, field, 0)?;
        for value in values {
            vector.push(value)?;
        }
        let len = vector.len();
        vector.finalize(len)?;
        Ok(vector)
    }

    pub fn from_i32(arena: &Arena, name: &str, values: &[Option<i32>]) -> Result<Self, Error> {
        let field = Field::new(name, DataType::Int32, true);
        Self::from_values(arena, &field, values.iter().map(|value| value.map(Value::Int32)))
    }

    pub fn from_utf8(arena: &Arena, name: &str, values: &[Option<&str>]) -> Result<Self, Error> {
        let field = Field::new(name, DataType::Utf8, true);
        Self::from_values(arena, &field, values.iter().map(|value| value.map(Value::from)))
    }

    pub fn from_i32_lists(
        arena: &Arena,
        name: &str,
        values: &[Option<Vec<i32>>],
    ) -> Result<Self, Error> {
        let field = Field::list(name, Field::new("item", DataType::Int32, true), true);
        Self::from_values(
            arena,
            &field,
            values.iter().map(|value| {
                value.as_ref().map(|items| {
                    Value::List(items.iter().map(|item| Some(Value::Int32(*item))).collect())
                })
            }),
        )
    }

    pub fn field(&self) -> &Field {
        match self {
            Vector::FixedWidth(vector) => &vector.field,
            Vector::VariableWidth(vector) => &vector.field,
            Vector::List(vector) => &vector.field,
        }
    }

    pub fn data_type(&self) -> DataType {
        self.field().data_type
    }

    pub fn arena(&self) -> &Arena {
        match self {
            Vector::FixedWidth(vector) => vector.buffer.arena(),
            Vector::VariableWidth(vector) => vector.buffer.arena(),
            Vector::List(vector) => vector.offsets.arena(),
        }
    }

    /// Logical row count.
    pub fn len(&self) -> usize {
        match self {
            Vector::FixedWidth(vector) => vector.len,
            Vector::VariableWidth(vector) => vector.len,
            Vector::List(vector) => vector.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn validity(&self) -> &ValidityBitmap {
        match self {
            Vector::FixedWidth(vector) => &vector.buffer.validity,
            Vector::VariableWidth(vector) => &vector.buffer.validity,
            Vector::List(vector) => &vector.validity,
        }
    }

    pub fn is_null(&self, index: usize) -> bool {
        index >= self.len() || !self.validity().is_valid(index)
    }

    pub fn null_count(&self) -> usize {
        (0..self.len()).filter(|index| self.is_null(*index)).count()
    }

    /// Raw data bytes (values for fixed/variable width, empty for lists).
    pub fn data(&self) -> &[u8] {
        match self {
            Vector::FixedWidth(vector) => vector.buffer.data.as_slice(),
            Vector::VariableWidth(vector) => vector.buffer.data.as_slice(),
            Vector::List(_) => &[],
        }
    }

    /// Offset entries; empty for fixed-width vectors.
    pub fn offsets(&self) -> Vec<i32> {
        match self {
            Vector::FixedWidth(_) => Vec::new(),
            Vector::VariableWidth(vector) => decode_offsets(&vector.offsets),
            Vector::List(vector) => decode_offsets(&vector.offsets),
        }
    }

    pub fn child(&self) -> Option<&Vector> {
        match self {
            Vector::List(vector) => Some(&vector.child),
            _ => None,
        }
    }

    /// Same physical type (names and metadata ignored).
    pub fn type_equals(&self, other: &Vector) -> bool {
        self.field().type_equals(other.field())
    }

    /// Decoded value at `index`; `None` for nulls and positions past `len`.
    pub fn get(&self, index: usize) -> Option<ValueRef<'_>> {
        if self.is_null(index) {
            return None;
        }
        match self {
            Vector::FixedWidth(vector) => Some(vector.value_at(index)),
            Vector::VariableWidth(vector) => {
                let (start, end) = slot_bounds(&vector.offsets, index);
                let bytes = &vector.buffer.data.as_slice()[start..end];
                match vector.field.data_type {
                    DataType::Utf8 => std::str::from_utf8(bytes).ok().map(ValueRef::Utf8),
                    _ => Some(ValueRef::Binary(bytes)),
                }
            }
            Vector::List(vector) => {
                let (start, end) = slot_bounds(&vector.offsets, index);
                Some(ValueRef::List(ListSlice {
                    child: &vector.child,
                    start,
                    end,
                }))
            }
        }
    }

    pub fn set(&mut self, index: usize, value: Value) -> Result<(), Error> {
        let data_type = self.data_type();
        if !value.matches(data_type) {
            return Err(Error::new(ErrorKind::SchemaMismatch)
                .with_message(format!(
                    "cannot write {} value into {} vector '{}'",
                    value.type_name(),
                    data_type,
                    self.field().name
                ))
                .with_index(index as u64));
        }
        match (self, value) {
            (Vector::FixedWidth(vector), value) => vector.set(index, value),
            (Vector::VariableWidth(vector), Value::Utf8(text)) => {
                vector.append(index, Some(text.as_bytes()))
            }
            (Vector::VariableWidth(vector), Value::Binary(bytes)) => {
                vector.append(index, Some(bytes.as_slice()))
            }
            (Vector::List(vector), Value::List(items)) => vector.append(index, Some(items)),
            _ => Err(Error::new(ErrorKind::Internal).with_message("value/layout mismatch")),
        }
    }

    pub fn set_null(&mut self, index: usize) -> Result<(), Error> {
        match self {
            Vector::FixedWidth(vector) => vector.set_null(index),
            Vector::VariableWidth(vector) => vector.append(index, None),
            Vector::List(vector) => vector.append(index, None),
        }
    }

    /// Appends at the current length.
    pub fn push(&mut self, value: Option<Value>) -> Result<(), Error> {
        let index = self.len();
        match value {
            Some(value) => self.set(index, value),
            None => self.set_null(index),
        }
    }

    /// Fixes the logical length at `count`, closing trailing slots as nulls or
    /// truncating.
    pub fn finalize(&mut self, count: usize) -> Result<(), Error> {
        match self {
            Vector::FixedWidth(vector) => vector.finalize(count),
            Vector::VariableWidth(vector) => vector.finalize(count),
            Vector::List(vector) => vector.finalize(count),
        }
    }

    /// Checks layout invariants; violations are `MalformedEncoding`.
    pub fn validate(&self) -> Result<(), Error> {
        let len = self.len();
        if self.validity().len() < len {
            return Err(malformed(self, format!(
                "validity holds {} bits for {len} rows",
                self.validity().len()
            )));
        }
        match self {
            Vector::FixedWidth(vector) => {
                if vector.buffer.data.len() < len * vector.width {
                    return Err(malformed(self, format!(
                        "data holds {} bytes for {len} rows of width {}",
                        vector.buffer.data.len(),
                        vector.width
                    )));
                }
                Ok(())
            }
            Vector::VariableWidth(vector) => {
                validate_offsets(self, &vector.offsets, len, vector.buffer.data.len())?;
                if vector.field.data_type == DataType::Utf8 {
                    for index in 0..len {
                        if !vector.buffer.validity.is_valid(index) {
                            continue;
                        }
                        let (start, end) = slot_bounds(&vector.offsets, index);
                        if std::str::from_utf8(&vector.buffer.data.as_slice()[start..end]).is_err() {
                            return Err(malformed(self, "utf8 slot holds invalid bytes".to_string())
                                .with_index(index as u64));
                        }
                    }
                }
                Ok(())
            }
            Vector::List(vector) => {
                let element = vector.field.element().ok_or_else(|| {
                    malformed(self, "list field has no element".to_string())
                })?;
                if !vector.child.field().type_equals(element) {
                    return Err(malformed(self, "child vector type differs from element field".to_string()));
                }
                validate_offsets(self, &vector.offsets, len, vector.child.len())?;
                vector.child.validate()
            }
        }
    }

    /// Appends the value at `index` of `source` (same type) to the end of `self`.
    pub fn append_from(&mut self, source: &Vector, index: usize) -> Result<(), Error> {
        if !self.type_equals(source) {
            return Err(Error::new(ErrorKind::SchemaMismatch)
                .with_message("cannot copy between vectors of different types"));
        }
        let target = self.len();
        if source.is_null(index) {
            return self.set_null(target);
        }
        match (self, source) {
            (Vector::FixedWidth(dst), Vector::FixedWidth(src)) => {
                let width = src.width;
                let bytes = &src.buffer.data.as_slice()[index * width..(index + 1) * width];
                dst.write_raw(target, bytes)
            }
            (Vector::VariableWidth(dst), Vector::VariableWidth(src)) => {
                let (start, end) = slot_bounds(&src.offsets, index);
                dst.append(target, Some(&src.buffer.data.as_slice()[start..end]))
            }
            (Vector::List(dst), Vector::List(src)) => {
                let (start, end) = slot_bounds(&src.offsets, index);
                for child_index in start..end {
                    dst.child.append_from(&src.child, child_index)?;
                }
                dst.close_slot(target, true)
            }
            _ => Err(Error::new(ErrorKind::Internal).with_message("layout mismatch")),
        }
    }

    /// New vector holding `self[indices[0]], self[indices[1]], ...`.
    pub fn take(&self, indices: &[usize]) -> Result<Vector, Error> {
        let mut out = Vector::allocate(self.arena(), self.field(), indices.len())?;
        for &index in indices {
            if index >= self.len() {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("take index out of bounds (len {})", self.len()))
                    .with_index(index as u64));
            }
            out.append_from(self, index)?;
        }
        out.finalize(indices.len())?;
        Ok(out)
    }

    pub fn try_clone(&self) -> Result<Vector, Error> {
        let indices: Vec<usize> = (0..self.len()).collect();
        self.take(&indices)
    }

    pub(crate) fn fixed_width_mut(&mut self) -> Option<&mut FixedWidthVector> {
        match self {
            Vector::FixedWidth(vector) => Some(vector),
            _ => None,
        }
    }

    /// Assembles a vector from decoded parts; the result is validated.
    pub(crate) fn from_parts(parts: VectorParts) -> Result<Vector, Error> {
        let VectorParts {
            field,
            len,
            validity,
            offsets,
            data,
            child,
        } = parts;
        let vector = match field.data_type.layout() {
            Layout::FixedWidth(width) => Vector::FixedWidth(FixedWidthVector {
                field,
                width,
                buffer: ColumnBuffer { validity, data },
                len,
            }),
            Layout::VariableWidth => Vector::VariableWidth(VariableWidthVector {
                field,
                buffer: ColumnBuffer { validity, data },
                offsets: offsets.ok_or_else(|| {
                    Error::new(ErrorKind::MalformedEncoding).with_message("missing offsets")
                })?,
                len,
            }),
            Layout::List => Vector::List(ListVector {
                field,
                validity,
                offsets: offsets.ok_or_else(|| {
                    Error::new(ErrorKind::MalformedEncoding).with_message("missing offsets")
                })?,
                child: Box::new(child.ok_or_else(|| {
                    Error::new(ErrorKind::MalformedEncoding).with_message("missing list child")
                })?),
                len,
            }),
        };
        vector.validate()?;
        Ok(vector)
    }

    pub(crate) fn offsets_buffer(&self) -> Option<&Buffer> {
        match self {
            Vector::FixedWidth(_) => None,
            Vector::VariableWidth(vector) => Some(&vector.offsets),
            Vector::List(vector) => Some(&vector.offsets),
        }
    }
}

pub(crate) struct VectorParts {
    pub field: Field,
    pub len: usize,
    pub validity: ValidityBitmap,
    pub offsets: Option<Buffer>,
    pub data: Buffer,
    pub child: Option<Vector>,
}

impl FixedWidthVector {
    pub fn width(&self) -> usize {
        self.width
    }

    fn value_at(&self, index: usize) -> ValueRef<'_> {
        let bytes = &self.buffer.data.as_slice()[index * self.width..(index + 1) * self.width];
        match self.field.data_type {
            DataType::Int32 => ValueRef::Int32(i32::from_le_bytes(read_4(bytes))),
            DataType::Float32 => ValueRef::Float32(f32::from_le_bytes(read_4(bytes))),
            DataType::Int64 => ValueRef::Int64(i64::from_le_bytes(read_8(bytes))),
            _ => ValueRef::Float64(f64::from_le_bytes(read_8(bytes))),
        }
    }

    fn set(&mut self, index: usize, value: Value) -> Result<(), Error> {
        match value {
            Value::Int32(value) => self.write_raw(index, &value.to_le_bytes()),
            Value::Int64(value) => self.write_raw(index, &value.to_le_bytes()),
            Value::Float32(value) => self.write_raw(index, &value.to_le_bytes()),
            Value::Float64(value) => self.write_raw(index, &value.to_le_bytes()),
            _ => Err(Error::new(ErrorKind::Internal).with_message("not a fixed-width value")),
        }
    }

    fn write_raw(&mut self, index: usize, bytes: &[u8]) -> Result<(), Error> {
        self.ensure_slot(index)?;
        let start = index * self.width;
        self.buffer.data.as_mut_slice()[start..start + self.width].copy_from_slice(bytes);
        self.buffer.validity.set(index, true)
    }

    fn set_null(&mut self, index: usize) -> Result<(), Error> {
        self.ensure_slot(index)?;
        self.buffer.validity.set(index, false)
    }

    fn ensure_slot(&mut self, index: usize) -> Result<(), Error> {
        let needed = index
            .checked_add(1)
            .and_then(|slots| slots.checked_mul(self.width))
            .ok_or_else(|| {
                Error::new(ErrorKind::Allocation)
                    .with_message(format!("vector '{}' cannot address slot {index}", self.field.name))
                    .with_index(index as u64)
            })?;
        if self.buffer.data.len() < needed {
            self.buffer.data.resize(needed)?;
        }
        if self.buffer.validity.len() <= index {
            self.buffer.validity.resize(index + 1)?;
        }
        self.len = self.len.max(index + 1);
        Ok(())
    }

    fn finalize(&mut self, count: usize) -> Result<(), Error> {
        self.buffer.data.resize(count * self.width)?;
        self.buffer.validity.resize(count)?;
        self.len = count;
        Ok(())
    }

    /// Reorders rows in place so that row `i` becomes old row `order[i]`.
    pub(crate) fn permute(&mut self, order: &[usize]) -> Result<(), Error> {
        let width = self.width;
        let old_data = self.buffer.data.as_slice().to_vec();
        let old_valid: Vec<bool> = (0..self.len).map(|i| self.buffer.validity.is_valid(i)).collect();
        for (target, &source) in order.iter().enumerate() {
            self.buffer.data.as_mut_slice()[target * width..(target + 1) * width]
                .copy_from_slice(&old_data[source * width..(source + 1) * width]);
            self.buffer.validity.set(target, old_valid[source])?;
        }
        Ok(())
    }
}

impl VariableWidthVector {
    fn append(&mut self, index: usize, bytes: Option<&[u8]>) -> Result<(), Error> {
        if index < self.len {
            if bytes.is_none() && !self.buffer.validity.is_valid(index) {
                return Ok(());
            }
            return Err(out_of_order(&self.field, index, self.len));
        }
        let cursor = self.buffer.data.len();
        while self.len < index {
            self.buffer.validity.set(self.len, false)?;
            push_offset(&mut self.offsets, cursor)?;
            self.len += 1;
        }
        match bytes {
            Some(bytes) => {
                self.buffer.data.extend_from_slice(bytes)?;
                self.buffer.validity.set(index, true)?;
            }
            None => self.buffer.validity.set(index, false)?,
        }
        push_offset(&mut self.offsets, self.buffer.data.len())?;
        self.len = index + 1;
        Ok(())
    }

    fn finalize(&mut self, count: usize) -> Result<(), Error> {
        if count < self.len {
            let end = read_offset(&self.offsets, count);
            self.offsets.resize((count + 1) * OFFSET_WIDTH)?;
            self.buffer.data.resize(end)?;
            self.buffer.validity.resize(count)?;
            self.len = count;
            return Ok(());
        }
        if count > self.len {
            self.append(count - 1, None)?;
        }
        self.buffer.validity.resize(count)
    }
}

impl ListVector {
    fn append(&mut self, index: usize, items: Option<Vec<Option<Value>>>) -> Result<(), Error> {
        if index < self.len {
            if items.is_none() && !self.validity.is_valid(index) {
                return Ok(());
            }
            return Err(out_of_order(&self.field, index, self.len));
        }
        while self.len < index {
            self.close_slot(self.len, false)?;
        }
        match items {
            Some(items) => {
                let start = self.child.len();
                for item in items {
                    if let Err(err) = self.child.push(item) {
                        // Elements already written would leak into the next entry.
                        self.child.finalize(start)?;
                        return Err(err);
                    }
                }
                self.close_slot(index, true)
            }
            None => self.close_slot(index, false),
        }
    }

    /// Writes offsets[index + 1] at the child's current length.
    fn close_slot(&mut self, index: usize, valid: bool) -> Result<(), Error> {
        if index != self.len {
            return Err(out_of_order(&self.field, index, self.len));
        }
        let end = self.child.len();
        if !valid && end != read_offset(&self.offsets, index) {
            return Err(Error::new(ErrorKind::MalformedEncoding)
                .with_message("null list entry cannot own child elements")
                .with_index(index as u64));
        }
        self.validity.set(index, valid)?;
        push_offset(&mut self.offsets, end)?;
        self.len = index + 1;
        Ok(())
    }

    fn finalize(&mut self, count: usize) -> Result<(), Error> {
        if count < self.len {
            let end = read_offset(&self.offsets, count);
            self.offsets.resize((count + 1) * OFFSET_WIDTH)?;
            self.child.finalize(end)?;
            self.validity.resize(count)?;
            self.len = count;
            return Ok(());
        }
        while self.len < count {
            self.close_slot(self.len, false)?;
        }
        let child_len = self.child.len();
        self.child.finalize(child_len)?;
        self.validity.resize(count)
    }
}

fn initial_offsets(arena: &Arena, capacity: usize) -> Result<Buffer, Error> {
    let mut offsets = Buffer::with_capacity(arena, (capacity + 1) * OFFSET_WIDTH);
    offsets.extend_from_slice(&0i32.to_le_bytes())?;
    Ok(offsets)
}

fn push_offset(offsets: &mut Buffer, value: usize) -> Result<(), Error> {
    let value = i32::try_from(value).map_err(|_| {
        Error::new(ErrorKind::Allocation).with_message("offset exceeds i32 range")
    })?;
    offsets.extend_from_slice(&value.to_le_bytes())
}

pub(crate) fn read_offset(offsets: &Buffer, index: usize) -> usize {
    let start = index * OFFSET_WIDTH;
    i32::from_le_bytes(read_4(&offsets.as_slice()[start..start + OFFSET_WIDTH])) as usize
}

fn decode_offsets(offsets: &Buffer) -> Vec<i32> {
    offsets
        .as_slice()
        .chunks_exact(OFFSET_WIDTH)
        .map(|chunk| i32::from_le_bytes(read_4(chunk)))
        .collect()
}

fn slot_bounds(offsets: &Buffer, index: usize) -> (usize, usize) {
    (read_offset(offsets, index), read_offset(offsets, index + 1))
}

fn validate_offsets(
    vector: &Vector,
    offsets: &Buffer,
    len: usize,
    data_len: usize,
) -> Result<(), Error> {
    if offsets.len() != (len + 1) * OFFSET_WIDTH {
        return Err(malformed(vector, format!(
            "{} offset bytes for {len} rows",
            offsets.len()
        )));
    }
    let entries = decode_offsets(offsets);
    if entries[0] != 0 {
        return Err(malformed(vector, "first offset is not zero".to_string()));
    }
    for (index, pair) in entries.windows(2).enumerate() {
        if pair[1] < pair[0] {
            return Err(malformed(vector, "offsets decrease".to_string()).with_index(index as u64));
        }
        if pair[1] != pair[0] && !vector.validity().is_valid(index) {
            return Err(malformed(vector, "null slot spans data".to_string())
                .with_index(index as u64));
        }
    }
    if entries[len] < 0 || entries[len] as usize != data_len {
        return Err(malformed(vector, format!(
            "last offset {} does not match data length {data_len}",
            entries[len]
        )));
    }
    Ok(())
}

fn malformed(vector: &Vector, message: String) -> Error {
    Error::new(ErrorKind::MalformedEncoding)
        .with_message(format!("vector '{}': {message}", vector.field().name))
}

fn out_of_order(field: &Field, index: usize, len: usize) -> Error {
    Error::new(ErrorKind::MalformedEncoding)
        .with_message(format!(
            "vector '{}' is written forward only; slot {index} is closed (len {len})",
            field.name
        ))
        .with_index(index as u64)
}

fn read_4(buf: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[..4]);
    out
}

fn read_8(buf: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[..8]);
    out
}
