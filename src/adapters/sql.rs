//! SQL driver calls: queries returning rows and statements returning counts.

use std::fmt;
use std::marker::PhantomData;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::CallCodec;
use crate::error::Result;
use crate::key::AdapterKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(#[serde(with = "crate::codec::base64_bytes")] Vec<u8>),
}

impl SqlValue {
    fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "bool",
            SqlValue::Int(_) => "int64",
            SqlValue::Float(_) => "float64",
            SqlValue::Text(_) => "string",
            SqlValue::Bytes(_) => "bytes",
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Bool(v) => write!(f, "{v}"),
            SqlValue::Int(v) => write!(f, "{v}"),
            SqlValue::Float(v) => write!(f, "{v}"),
            SqlValue::Text(v) => f.write_str(v),
            SqlValue::Bytes(v) => write!(f, "{v:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlQuery {
    pub dsn: String,
    pub query: String,
    #[serde(default)]
    pub params: Vec<SqlValue>,
}

impl SqlQuery {
    pub fn new(dsn: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            query: query.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: SqlValue) -> Self {
        self.params.push(value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SqlRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SqlExecResult {
    pub last_insert_id: i64,
    pub rows_affected: i64,
}

/// Stringify bound parameters as `sz#<n>@@<type>#<len>:<value>@@...`.
///
/// Every position is listed, nulls as `null#@@`. `<len>` is the byte length
/// of `<value>`, so a value containing `@@` cannot be read as two parameters.
/// Byte values are base64 encoded.
pub fn stringify_params(params: &[SqlValue]) -> String {
    let mut out = format!("sz#{}@@", params.len());
    for param in params {
        let value = match param {
            SqlValue::Null => {
                out.push_str("null#@@");
                continue;
            }
            SqlValue::Bytes(bytes) => STANDARD.encode(bytes),
            other => other.to_string(),
        };
        out.push_str(&format!("{}#{}:{}@@", param.type_name(), value.len(), value));
    }
    out
}

/// Codec for one SQL operation kind.
///
/// The response type picks the operation: [`SqlRows`] for queries,
/// [`SqlExecResult`] for statements.
pub struct SqlCodec<Resp> {
    operation: &'static str,
    _marker: PhantomData<fn() -> Resp>,
}

impl SqlCodec<SqlRows> {
    pub fn query() -> Self {
        Self {
            operation: "query",
            _marker: PhantomData,
        }
    }
}

impl SqlCodec<SqlExecResult> {
    pub fn exec() -> Self {
        Self {
            operation: "exec",
            _marker: PhantomData,
        }
    }
}

impl<Resp> CallCodec for SqlCodec<Resp>
where
    Resp: Serialize + DeserializeOwned,
{
    type Request = SqlQuery;
    type Response = Resp;

    fn kind(&self) -> AdapterKind {
        AdapterKind::Sql
    }

    fn tag(&self, request: &SqlQuery) -> String {
        format!(
            "sql_driver_hook_prefix@@{}@@{}@@{}",
            self.operation, request.dsn, request.query
        )
    }

    fn canonical_request(&self, request: &SqlQuery) -> Result<Vec<u8>> {
        Ok(stringify_params(&request.params).into_bytes())
    }

    fn encode_response(&self, response: &Resp) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(response)?)
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<Resp> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
