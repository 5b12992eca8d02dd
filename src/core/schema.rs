// Field and schema definitions shared by vectors, batches, and the IPC codec.
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Int32,
    Int64,
    Float32,
    Float64,
    Utf8,
    Binary,
    /// Element type is the field's single child.
    List,
}

/// Physical layout family of a data type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Layout {
    FixedWidth(usize),
    VariableWidth,
    List,
}

impl DataType {
    pub fn layout(self) -> Layout {
        match self {
            DataType::Int32 | DataType::Float32 => Layout::FixedWidth(4),
            DataType::Int64 | DataType::Float64 => Layout::FixedWidth(8),
            DataType::Utf8 | DataType::Binary => Layout::VariableWidth,
            DataType::List => Layout::List,
        }
    }

    pub fn is_nested(self) -> bool {
        matches!(self, DataType::List)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Utf8 => "utf8",
            DataType::Binary => "binary",
            DataType::List => "list",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub nullable: bool,
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Field>,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            nullable,
            data_type,
            metadata: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn list(name: impl Into<String>, element: Field, nullable: bool) -> Self {
        Self {
            name: name.into(),
            nullable,
            data_type: DataType::List,
            metadata: BTreeMap::new(),
            children: vec![element],
        }
    }

    pub fn with_metadata<K, V>(mut self, metadata: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.metadata = metadata
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        self
    }

    /// Element field of a list; `None` for scalars.
    pub fn element(&self) -> Option<&Field> {
        match self.data_type {
            DataType::List => self.children.first(),
            _ => None,
        }
    }

    /// Checks the list/children rule recursively.
    pub fn validate(&self) -> Result<(), Error> {
        let expected = if self.data_type.is_nested() { 1 } else { 0 };
        if self.children.len() != expected {
            return Err(Error::new(ErrorKind::MalformedEncoding).with_message(format!(
                "field '{}' of type {} has {} children, expected {expected}",
                self.name,
                self.data_type,
                self.children.len()
            )));
        }
        for child in &self.children {
            child.validate()?;
        }
        Ok(())
    }

    /// Structural type equality: names and metadata are ignored.
    pub fn type_equals(&self, other: &Field) -> bool {
        self.data_type == other.data_type
            && self.nullable == other.nullable
            && self.children.len() == other.children.len()
            && self
                .children
                .iter()
                .zip(&other.children)
                .all(|(left, right)| left.type_equals(right))
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Result<Self, Error> {
        let schema = Self {
            fields,
            metadata: BTreeMap::new(),
        };
        schema.validate()?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let mut names = HashSet::new();
        for field in &self.fields {
            if !names.insert(field.name.as_str()) {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("duplicate field name '{}'", field.name)));
            }
            field.validate()?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::{DataType, Field, Layout, Schema};
    use crate::core::error::ErrorKind;

    fn person_schema() -> Schema {
        Schema::new(vec![
            Field::new("name", DataType::Utf8, true),
            Field::new("document", DataType::Utf8, true).with_metadata([
                ("A", "Id card"),
                ("B", "Passport"),
                ("C", "Visa"),
            ]),
            Field::new("age", DataType::Int32, true),
            Field::list("points", Field::new("intCol", DataType::Int32, true), true),
        ])
        .expect("schema")
    }

    #[test]
    fn layouts_follow_types() {
        assert_eq!(DataType::Int64.layout(), Layout::FixedWidth(8));
        assert_eq!(DataType::Float32.layout(), Layout::FixedWidth(4));
        assert_eq!(DataType::Binary.layout(), Layout::VariableWidth);
        assert_eq!(DataType::List.layout(), Layout::List);
    }

    #[test]
    fn list_requires_exactly_one_child() {
        let mut field = Field::list("xs", Field::new("item", DataType::Int32, true), true);
        field.validate().expect("valid");
        field.children.push(Field::new("extra", DataType::Int32, true));
        let err = field.validate().expect_err("two children");
        assert_eq!(err.kind(), ErrorKind::MalformedEncoding);

        let mut scalar = Field::new("x", DataType::Int32, true);
        scalar.children.push(Field::new("child", DataType::Int32, true));
        assert_eq!(
            scalar.validate().expect_err("scalar child").kind(),
            ErrorKind::MalformedEncoding
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = Schema::new(vec![
            Field::new("a", DataType::Int32, true),
            Field::new("a", DataType::Utf8, true),
        ])
        .expect_err("duplicate");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn schema_json_round_trip_keeps_metadata() {
        let schema = person_schema();
        let json = serde_json::to_string(&schema).expect("encode");
        let decoded: Schema = serde_json::from_str(&json).expect("decode");
        assert_eq!(decoded, schema);
        assert_eq!(
            decoded.field("document").expect("document").metadata.get("B"),
            Some(&"Passport".to_string())
        );
        assert_eq!(decoded.index_of("points"), Some(3));
    }

    #[test]
    fn type_equality_ignores_names() {
        let left = Field::new("int", DataType::Int32, true);
        let right = Field::new("int2", DataType::Int32, true);
        let other = Field::new("int", DataType::Int64, true);
        assert!(left.type_equals(&right));
        assert!(!left.type_equals(&other));
    }
}
