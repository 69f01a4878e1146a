//! HTTP client exchanges.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::codec::CallCodec;
use crate::error::Result;
use crate::key::{canonicalize_json_bytes, AdapterKind};

pub type HeaderMap = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HttpRequestData {
    pub method: String,
    pub url: String,
    pub proto: String,
    #[serde(default)]
    pub headers: HeaderMap,
    #[serde(with = "crate::codec::base64_bytes")]
    pub body: Vec<u8>,
}

impl HttpRequestData {
    pub fn new(method: impl Into<String>, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            proto: "HTTP/1.1".to_string(),
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Replace every value of header `name`, matching it case-insensitively.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|k, _| !k.eq_ignore_ascii_case(name));
        self.headers.insert(name.to_string(), vec![value.into()]);
    }
}

fn find_header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.first())
        .map(String::as_str)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponseData {
    pub status: String,
    pub code: u16,
    pub proto: String,
    #[serde(default)]
    pub header: HeaderMap,
    #[serde(with = "crate::codec::base64_bytes")]
    pub body: Vec<u8>,
    pub length: i64,
}

impl HttpResponseData {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        Self {
            status: "200 OK".to_string(),
            code: 200,
            proto: "HTTP/1.1".to_string(),
            header: HeaderMap::new(),
            length: body.len() as i64,
            body,
        }
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        find_header(&self.header, name)
    }
}

/// Codec keyed by URL, method, protocol and body.
///
/// JSON bodies are canonicalized so field order does not affect the key;
/// any other body is used verbatim.
#[derive(Debug, Clone, Default)]
pub struct HttpCodec;

impl CallCodec for HttpCodec {
    type Request = HttpRequestData;
    type Response = HttpResponseData;

    fn kind(&self) -> AdapterKind {
        AdapterKind::Http
    }

    fn tag(&self, request: &HttpRequestData) -> String {
        format!(
            "http_request_key_prefix@@{}@@{}@@{}",
            request.url, request.method, request.proto
        )
    }

    fn canonical_request(&self, request: &HttpRequestData) -> Result<Vec<u8>> {
        Ok(canonicalize_json_bytes(&request.body).unwrap_or_else(|| request.body.clone()))
    }

    fn encode_response(&self, response: &HttpResponseData) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(response)?)
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<HttpResponseData> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
