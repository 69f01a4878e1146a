//! Payload encoding for intercepted calls.

use std::marker::PhantomData;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Result;
use crate::key::{canonical_json, AdapterKind};

/// Stored form of one call outcome.
///
/// `err` is the terminal marker: `None` means `value` holds the encoded
/// response, `Some(message)` means the real call failed with that message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub err: Option<String>,
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
}

impl Outcome {
    pub fn success(value: Vec<u8>) -> Self {
        Self { err: None, value }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            err: Some(message.into()),
            value: Vec::new(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.err.is_some()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

pub(crate) mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Converts one adapter's requests and responses to bytes.
///
/// `canonical_request` must be deterministic: equal requests yield equal bytes.
pub trait CallCodec: Send + Sync {
    type Request;
    type Response;

    fn kind(&self) -> AdapterKind;

    /// Operation tag for a request, e.g. protocol plus method name.
    fn tag(&self, request: &Self::Request) -> String;

    fn canonical_request(&self, request: &Self::Request) -> Result<Vec<u8>>;

    fn encode_response(&self, response: &Self::Response) -> Result<Vec<u8>>;

    fn decode_response(&self, bytes: &[u8]) -> Result<Self::Response>;
}

/// Codec for serde types: canonical JSON requests, plain JSON responses.
pub struct JsonCodec<Req, Resp> {
    kind: AdapterKind,
    operation: String,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> JsonCodec<Req, Resp> {
    pub fn new(kind: AdapterKind, operation: impl Into<String>) -> Self {
        Self {
            kind,
            operation: operation.into(),
            _marker: PhantomData,
        }
    }
}

impl<Req, Resp> CallCodec for JsonCodec<Req, Resp>
where
    Req: Serialize,
    Resp: Serialize + DeserializeOwned,
{
    type Request = Req;
    type Response = Resp;

    fn kind(&self) -> AdapterKind {
        self.kind
    }

    fn tag(&self, _request: &Req) -> String {
        format!("{}:{}", self.kind, self.operation)
    }

    fn canonical_request(&self, request: &Req) -> Result<Vec<u8>> {
        canonical_json(request)
    }

    fn encode_response(&self, response: &Resp) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(response)?)
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<Resp> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Codec for opaque byte payloads.
pub struct RawCodec {
    kind: AdapterKind,
    operation: String,
}

impl RawCodec {
    pub fn new(kind: AdapterKind, operation: impl Into<String>) -> Self {
        Self {
            kind,
            operation: operation.into(),
        }
    }
}

impl CallCodec for RawCodec {
    type Request = Vec<u8>;
    type Response = Vec<u8>;

    fn kind(&self) -> AdapterKind {
        self.kind
    }

    fn tag(&self, _request: &Vec<u8>) -> String {
        format!("{}:{}", self.kind, self.operation)
    }

    fn canonical_request(&self, request: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(request.clone())
    }

    fn encode_response(&self, response: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(response.clone())
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}
