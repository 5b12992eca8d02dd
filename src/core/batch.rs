// Schema-bound record batches: one finalized vector per field, equal lengths.
use std::sync::Arc;

use crate::core::error::{Error, ErrorKind};
use crate::core::schema::Schema;
use crate::core::vector::{Value, Vector};

#[derive(Debug)]
pub struct Batch {
    schema: Arc<Schema>,
    row_count: usize,
    columns: Vec<Vector>,
}

impl Batch {
    /// Binds `columns` to `schema`; column order follows field order.
    pub fn try_new(schema: Arc<Schema>, row_count: usize, columns: Vec<Vector>) -> Result<Self, Error> {
        if columns.len() != schema.len() {
            return Err(Error::new(ErrorKind::SchemaMismatch).with_message(format!(
                "batch has {} columns, schema has {} fields",
                columns.len(),
                schema.len()
            )));
        }
        for (position, (field, column)) in schema.fields.iter().zip(&columns).enumerate() {
            if !field.type_equals(column.field()) {
                return Err(Error::new(ErrorKind::SchemaMismatch)
                    .with_message(format!(
                        "column '{}' is {} but field '{}' is {}",
                        column.field().name,
                        column.data_type(),
                        field.name,
                        field.data_type
                    ))
                    .with_index(position as u64));
            }
            if column.len() != row_count {
                return Err(Error::new(ErrorKind::MalformedEncoding)
                    .with_message(format!(
                        "column '{}' has {} rows, batch has {row_count}",
                        field.name,
                        column.len()
                    ))
                    .with_index(position as u64));
            }
            column.validate()?;
        }
        Ok(Self {
            schema,
            row_count,
            columns,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn columns(&self) -> &[Vector] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Vector> {
        self.schema.index_of(name).map(|index| &self.columns[index])
    }

    pub fn into_columns(self) -> Vec<Vector> {
        self.columns
    }

    /// Owned copy of one row, in field order.
    pub fn row(&self, index: usize) -> Vec<Option<Value>> {
        self.columns
            .iter()
            .map(|column| column.get(index).map(|value| value.to_value()))
            .collect()
    }

    /// Bytes held by every buffer of every column.
    pub fn byte_size(&self) -> usize {
        self.columns.iter().map(vector_bytes).sum()
    }

    /// Tab-separated rendering: a header of field names, then one line per row.
    pub fn to_tsv(&self) -> String {
        let mut out = self
            .schema
            .fields
            .iter()
            .map(|field| field.name.as_str())
            .collect::<Vec<_>>()
            .join("\t");
        out.push('\n');
        for row in 0..self.row_count {
            let cells = self
                .columns
                .iter()
                .map(|column| match column.get(row) {
                    Some(value) => value.to_string(),
                    None => "null".to_string(),
                })
                .collect::<Vec<_>>();
            out.push_str(&cells.join("\t"));
            out.push('\n');
        }
        out
    }
}

fn vector_bytes(vector: &Vector) -> usize {
    let offsets = vector.offsets_buffer().map(|buffer| buffer.len()).unwrap_or(0);
    let child = vector.child().map(vector_bytes).unwrap_or(0);
    vector.validity().as_bytes().len() + vector.data().len() + offsets + child
}
