//! Fingerprints for external calls.
//!
//! A key has the shape `<trace>@@<tag>@@<payload>`. Each component is escaped
//! so that `@@` only ever appears as a separator, which keeps the mapping from
//! (trace, tag, payload) to key injective. Payloads longer than
//! [`MAX_INLINE_PAYLOAD`] bytes, or that are not UTF-8, are replaced by their
//! SHA-256 digest.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;

pub const KEY_SEPARATOR: &str = "@@";
pub const MAX_INLINE_PAYLOAD: usize = 256;

/// Protocol family of an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    Http,
    Rpc,
    Cache,
    Document,
    Sql,
    Producer,
    Custom(&'static str),
}

impl AdapterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::Http => "http",
            AdapterKind::Rpc => "rpc",
            AdapterKind::Cache => "cache",
            AdapterKind::Document => "document",
            AdapterKind::Sql => "sql",
            AdapterKind::Producer => "producer",
            AdapterKind::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied key override.
///
/// Receives the adapter kind, the call tag and the canonical request bytes.
/// Returning `None` (or an empty string) falls back to the canonical payload.
pub type GenKeyFn = Arc<dyn Fn(AdapterKind, &str, &[u8]) -> Option<String> + Send + Sync>;

/// Build the key for one call from its canonical request payload.
pub fn derive_key(trace_id: &str, tag: &str, payload: &[u8]) -> String {
    join(trace_id, tag, &payload_component(payload))
}

/// Build the key for one call using an adapter-chosen tag in place of the payload.
pub fn derive_custom_key(trace_id: &str, tag: &str, custom: &str) -> String {
    join(trace_id, tag, &format!("#custom:{}", escape(custom)))
}

fn join(trace_id: &str, tag: &str, payload: &str) -> String {
    let trace_id = escape(trace_id);
    let tag = escape(tag);
    let mut key = String::with_capacity(trace_id.len() + tag.len() + payload.len() + 4);
    key.push_str(&trace_id);
    key.push_str(KEY_SEPARATOR);
    key.push_str(&tag);
    key.push_str(KEY_SEPARATOR);
    key.push_str(payload);
    key
}

fn payload_component(payload: &[u8]) -> String {
    if payload.len() <= MAX_INLINE_PAYLOAD {
        if let Ok(text) = std::str::from_utf8(payload) {
            return escape(text);
        }
    }
    format!("#sha256:{}", digest_hex(payload))
}

pub fn digest_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

fn escape(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for ch in component.chars() {
        if matches!(ch, '\\' | '@' | '#') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Serialize `value` to canonical JSON bytes.
///
/// Object keys are sorted at every depth and no whitespace is emitted, so two
/// structurally equal values always produce identical bytes no matter how
/// their maps were populated.
///
/// Non-finite floats are rejected with [`EngineError::Serialization`]: JSON
/// would otherwise write them as `null` and collide with an absent value.
///
/// [`EngineError::Serialization`]: crate::error::EngineError::Serialization
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    value.serialize(finite::FiniteFloats)?;
    let value = serde_json::to_value(value)?;
    Ok(canonical_value(&value).into_bytes())
}

/// Re-encode raw JSON bytes canonically. Returns `None` if `raw` is not JSON.
pub fn canonicalize_json_bytes(raw: &[u8]) -> Option<Vec<u8>> {
    let value: Value = serde_json::from_slice(raw).ok()?;
    Some(canonical_value(&value).into_bytes())
}

pub fn canonical_value(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

mod finite {
    //! A serializer that only walks the value and fails on NaN or infinity.

    use serde::ser::{self, Error as _, Serialize};

    type Error = serde_json::Error;

    #[derive(Clone, Copy)]
    pub(super) struct FiniteFloats;

    fn check(v: f64) -> Result<(), Error> {
        if v.is_finite() {
            Ok(())
        } else {
            Err(Error::custom(format!("non-finite float {v} has no JSON form")))
        }
    }

    macro_rules! accept {
        ($($method:ident: $ty:ty),* $(,)?) => {
            $(fn $method(self, _: $ty) -> Result<(), Error> { Ok(()) })*
        };
    }

    impl ser::Serializer for FiniteFloats {
        type Ok = ();
        type Error = Error;
        type SerializeSeq = Self;
        type SerializeTuple = Self;
        type SerializeTupleStruct = Self;
        type SerializeTupleVariant = Self;
        type SerializeMap = Self;
        type SerializeStruct = Self;
        type SerializeStructVariant = Self;

        accept! {
            serialize_bool: bool,
            serialize_i8: i8,
            serialize_i16: i16,
            serialize_i32: i32,
            serialize_i64: i64,
            serialize_i128: i128,
            serialize_u8: u8,
            serialize_u16: u16,
            serialize_u32: u32,
            serialize_u64: u64,
            serialize_u128: u128,
            serialize_char: char,
            serialize_str: &str,
            serialize_bytes: &[u8],
            serialize_unit_struct: &'static str,
        }

        fn serialize_f32(self, v: f32) -> Result<(), Error> {
            check(f64::from(v))
        }

        fn serialize_f64(self, v: f64) -> Result<(), Error> {
            check(v)
        }

        fn serialize_none(self) -> Result<(), Error> {
            Ok(())
        }

        fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<(), Error> {
            value.serialize(self)
        }

        fn serialize_unit(self) -> Result<(), Error> {
            Ok(())
        }

        fn serialize_unit_variant(
            self,
            _name: &'static str,
            _index: u32,
            _variant: &'static str,
        ) -> Result<(), Error> {
            Ok(())
        }

        fn serialize_newtype_struct<T: ?Sized + Serialize>(
            self,
            _name: &'static str,
            value: &T,
        ) -> Result<(), Error> {
            value.serialize(self)
        }

        fn serialize_newtype_variant<T: ?Sized + Serialize>(
            self,
            _name: &'static str,
            _index: u32,
            _variant: &'static str,
            value: &T,
        ) -> Result<(), Error> {
            value.serialize(self)
        }

        fn serialize_seq(self, _len: Option<usize>) -> Result<Self, Error> {
            Ok(self)
        }

        fn serialize_tuple(self, _len: usize) -> Result<Self, Error> {
            Ok(self)
        }

        fn serialize_tuple_struct(self, _name: &'static str, _len: usize) -> Result<Self, Error> {
            Ok(self)
        }

        fn serialize_tuple_variant(
            self,
            _name: &'static str,
            _index: u32,
            _variant: &'static str,
            _len: usize,
        ) -> Result<Self, Error> {
            Ok(self)
        }

        fn serialize_map(self, _len: Option<usize>) -> Result<Self, Error> {
            Ok(self)
        }

        fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self, Error> {
            Ok(self)
        }

        fn serialize_struct_variant(
            self,
            _name: &'static str,
            _index: u32,
            _variant: &'static str,
            _len: usize,
        ) -> Result<Self, Error> {
            Ok(self)
        }
    }

    macro_rules! compound {
        ($($trait:ident :: $method:ident),* $(,)?) => {
            $(
                impl ser::$trait for FiniteFloats {
                    type Ok = ();
                    type Error = Error;

                    fn $method<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Error> {
                        value.serialize(*self)
                    }

                    fn end(self) -> Result<(), Error> {
                        Ok(())
                    }
                }
            )*
        };
    }

    compound! {
        SerializeSeq::serialize_element,
        SerializeTuple::serialize_element,
        SerializeTupleStruct::serialize_field,
        SerializeTupleVariant::serialize_field,
    }

    impl ser::SerializeMap for FiniteFloats {
        type Ok = ();
        type Error = Error;

        fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), Error> {
            key.serialize(*self)
        }

        fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Error> {
            value.serialize(*self)
        }

        fn end(self) -> Result<(), Error> {
            Ok(())
        }
    }

    impl ser::SerializeStruct for FiniteFloats {
        type Ok = ();
        type Error = Error;

        fn serialize_field<T: ?Sized + Serialize>(
            &mut self,
            _key: &'static str,
            value: &T,
        ) -> Result<(), Error> {
            value.serialize(*self)
        }

        fn end(self) -> Result<(), Error> {
            Ok(())
        }
    }

    impl ser::SerializeStructVariant for FiniteFloats {
        type Ok = ();
        type Error = Error;

        fn serialize_field<T: ?Sized + Serialize>(
            &mut self,
            _key: &'static str,
            value: &T,
        ) -> Result<(), Error> {
            value.serialize(*self)
        }

        fn end(self) -> Result<(), Error> {
            Ok(())
        }
    }
}
