//! Query-related data models.
//!
//! This module defines parameter values with their wire-type mapping, the
//! parameter mapping passed to the executor, and the result rows it returns.

use crate::error::{DbError, DbResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

/// Backend parameter type a value is sent as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WireType {
    /// Variable-length character data
    VarChar,
    /// Integer
    Int,
    /// Single bit / boolean
    Bit,
    /// Date and time
    DateTime,
}

impl std::fmt::Display for WireType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::VarChar => "VarChar",
            Self::Int => "Int",
            Self::Bit => "Bit",
            Self::DateTime => "DateTime",
        };
        f.write_str(name)
    }
}

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    Int(i64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    /// Structured value sent as its canonical JSON text.
    Opaque(JsonValue),
}

impl ParamValue {
    /// Map a JSON value by runtime kind: text, integer, boolean, then the
    /// opaque fallback. JSON has no timestamp kind; use [`ParamValue::Timestamp`].
    pub fn from_json(name: &str, value: JsonValue) -> DbResult<Self> {
        match value {
            JsonValue::String(s) => Ok(Self::Text(s)),
            JsonValue::Number(n) => match n.as_i64() {
                Some(v) => Ok(Self::Int(v)),
                None if n.is_u64() => Err(DbError::parameter_binding(
                    name,
                    format!("{n} is out of range for an integer parameter"),
                )),
                None => Err(DbError::parameter_binding(
                    name,
                    format!("{n} is not an integer"),
                )),
            },
            JsonValue::Bool(b) => Ok(Self::Bool(b)),
            other => Ok(Self::Opaque(other)),
        }
    }

    /// Serialize any value into the opaque fallback.
    pub fn opaque<T: Serialize>(name: &str, value: &T) -> DbResult<Self> {
        serde_json::to_value(value)
            .map(Self::Opaque)
            .map_err(|e| DbError::parameter_binding(name, e.to_string()))
    }

    pub fn wire_type(&self) -> WireType {
        match self {
            Self::Text(_) | Self::Opaque(_) => WireType::VarChar,
            Self::Int(_) => WireType::Int,
            Self::Bool(_) => WireType::Bit,
            Self::Timestamp(_) => WireType::DateTime,
        }
    }

    /// Text sent for `VarChar` values.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.clone()),
            Self::Opaque(v) => Some(v.to_string()),
            _ => None,
        }
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<DateTime<Utc>> for ParamValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

/// Naive timestamps are taken as UTC.
impl From<NaiveDateTime> for ParamValue {
    fn from(value: NaiveDateTime) -> Self {
        Self::Timestamp(value.and_utc())
    }
}

/// Ordered mapping from parameter name to value.
///
/// Insertion order is kept; it is the argument order for procedure calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParameters {
    entries: Vec<(String, ParamValue)>,
}

impl QueryParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a parameter. A leading `@` in the name is ignored.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        let name = name.into();
        let name = name.strip_prefix('@').map(String::from).unwrap_or(name);
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Build from a JSON object. Any other JSON value is rejected.
    pub fn from_json(value: JsonValue) -> DbResult<Self> {
        match value {
            JsonValue::Object(map) => Self::from_json_map(map),
            JsonValue::Null => Err(DbError::validation(
                "Parameters must be an object, got null",
            )),
            other => Err(DbError::validation(format!(
                "Parameters must be an object, got {}",
                json_kind(&other)
            ))),
        }
    }

    fn from_json_map(map: serde_json::Map<String, JsonValue>) -> DbResult<Self> {
        let mut params = Self::new();
        for (name, value) in map {
            let value = ParamValue::from_json(&name, value)?;
            params.insert(name, value);
        }
        Ok(params)
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

/// Anything the executor accepts as a parameter mapping.
pub trait IntoParameters {
    fn into_parameters(self) -> DbResult<QueryParameters>;
}

impl IntoParameters for QueryParameters {
    fn into_parameters(self) -> DbResult<QueryParameters> {
        Ok(self)
    }
}

impl IntoParameters for &QueryParameters {
    fn into_parameters(self) -> DbResult<QueryParameters> {
        Ok(self.clone())
    }
}

impl IntoParameters for () {
    fn into_parameters(self) -> DbResult<QueryParameters> {
        Ok(QueryParameters::new())
    }
}

impl IntoParameters for JsonValue {
    fn into_parameters(self) -> DbResult<QueryParameters> {
        QueryParameters::from_json(self)
    }
}

impl IntoParameters for serde_json::Map<String, JsonValue> {
    fn into_parameters(self) -> DbResult<QueryParameters> {
        QueryParameters::from_json_map(self)
    }
}

impl<K, V, const N: usize> IntoParameters for [(K, V); N]
where
    K: Into<String>,
    V: Into<ParamValue>,
{
    fn into_parameters(self) -> DbResult<QueryParameters> {
        let mut params = QueryParameters::new();
        for (name, value) in self {
            params.insert(name, value);
        }
        Ok(params)
    }
}

/// A named column value in a result row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub value: JsonValue,
}

/// A result row: columns in select-list order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Row {
    columns: Vec<Column>,
}

impl Row {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Convenience constructor from (name, value) pairs.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, JsonValue)>,
        K: Into<String>,
    {
        Self {
            columns: pairs
                .into_iter()
                .map(|(name, value)| Column {
                    name: name.into(),
                    value,
                })
                .collect(),
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Value of the first column with this name.
    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.value)
    }

    pub fn get_index(&self, idx: usize) -> Option<&JsonValue> {
        self.columns.get(idx).map(|c| &c.value)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Result of a statement or procedure call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// Rows returned, or rows affected when the statement returns none.
    pub row_count: u64,
    /// In arrival order.
    pub rows: Vec<Row>,
    /// Measured from call start, including retries.
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }
}
