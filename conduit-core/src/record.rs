//! In-memory canonical dataset produced by `load` and consumed by `persist`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number};
use std::fmt;

/// A single cell of a [`Frame`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Infer a typed value from a text cell
    ///
    /// Tries integer, float and boolean in that order; empty text is null.
    /// Timestamps are not inferred and stay strings.
    pub fn infer(text: &str) -> Value {
        if text.is_empty() {
            return Value::Null;
        }
        if let Ok(i) = text.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(f) = text.parse::<f64>() {
            return Value::Float(f);
        }
        match text {
            "true" | "True" | "TRUE" => Value::Bool(true),
            "false" | "False" | "FALSE" => Value::Bool(false),
            _ => Value::Str(text.to_string()),
        }
    }

    /// Text form used by the text codecs; null renders as empty
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.clone(),
            Value::Timestamp(ts) => ts.to_rfc3339(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Timestamp(ts) => serde_json::Value::String(ts.to_rfc3339()),
        }
    }

    /// Scalar JSON values map directly; arrays and objects are kept as their JSON text
    pub fn from_json(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Str(s.clone()),
            other => Value::Str(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            other => f.write_str(&other.to_text()),
        }
    }
}

/// Column-named, row-major table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Frame {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Frame { columns, rows }
    }

    pub fn empty() -> Self {
        Frame::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.rows.is_empty()
    }

    /// Values of one column, `None` when the column does not exist
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(idx).unwrap_or(&Value::Null))
                .collect(),
        )
    }

    /// Build a frame from an array of JSON objects
    ///
    /// Columns appear in first-seen order across all records; keys missing
    /// from a record become nulls. Returns `None` when `value` is not an
    /// array of objects.
    pub fn from_json_records(value: &serde_json::Value) -> Option<Frame> {
        let records = value.as_array()?;
        let mut columns: Vec<String> = Vec::new();
        for record in records {
            for key in record.as_object()?.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .iter()
            .filter_map(|record| record.as_object())
            .map(|object| {
                columns
                    .iter()
                    .map(|c| object.get(c).map(Value::from_json).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Some(Frame { columns, rows })
    }

    /// Array of row objects keyed by column name
    pub fn to_json_records(&self) -> serde_json::Value {
        let records = self
            .rows
            .iter()
            .map(|row| {
                let mut object = Map::new();
                for (idx, column) in self.columns.iter().enumerate() {
                    let cell = row.get(idx).unwrap_or(&Value::Null);
                    object.insert(column.clone(), cell.to_json());
                }
                serde_json::Value::Object(object)
            })
            .collect();
        serde_json::Value::Array(records)
    }
}

/// Canonical dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    Table(Frame),
    Document(serde_json::Value),
    Raw(Vec<u8>),
}

impl Record {
    /// Empty-table sentinel returned for missing resources under the empty-result policy
    pub fn empty() -> Self {
        Record::Table(Frame::empty())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Record::Table(frame) => frame.is_empty(),
            Record::Document(doc) => doc.is_null(),
            Record::Raw(bytes) => bytes.is_empty(),
        }
    }

    pub fn as_table(&self) -> Option<&Frame> {
        match self {
            Record::Table(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Record::Table(_) => "table",
            Record::Document(_) => "document",
            Record::Raw(_) => "raw",
        }
    }
}

impl From<Frame> for Record {
    fn from(frame: Frame) -> Self {
        Record::Table(frame)
    }
}

impl From<serde_json::Value> for Record {
    fn from(value: serde_json::Value) -> Self {
        Record::Document(value)
    }
}
