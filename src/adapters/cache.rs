//! Key-value cache commands (Redis-style).

use serde::{Deserialize, Serialize};

use crate::codec::CallCodec;
use crate::error::Result;
use crate::key::{canonical_json, AdapterKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheCommand {
    pub name: String,
    pub args: Vec<String>,
}

impl CacheCommand {
    pub fn new<I, S>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CacheReply {
    Nil,
    Status(String),
    Int(i64),
    Bulk(#[serde(with = "crate::codec::base64_bytes")] Vec<u8>),
    Array(Vec<CacheReply>),
}

/// Codec scoped to one client endpoint.
#[derive(Debug, Clone)]
pub struct CacheCodec {
    client_id: String,
}

impl CacheCodec {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }

    /// Codec for a single-node client at `addr` over `network`.
    pub fn for_client(addr: &str, network: &str) -> Self {
        Self::new(format!("cache_client_id@{addr}@{network}"))
    }

    /// Codec for a cluster client; node order does not matter.
    pub fn for_cluster(addrs: &[&str]) -> Self {
        let mut addrs = addrs.to_vec();
        addrs.sort_unstable();
        Self::new(format!("cache_cluster_client_id@{}", addrs.join("#")))
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl CallCodec for CacheCodec {
    type Request = CacheCommand;
    type Response = CacheReply;

    fn kind(&self) -> AdapterKind {
        AdapterKind::Cache
    }

    fn tag(&self, request: &CacheCommand) -> String {
        format!("{}@{}", self.client_id, request.name.to_ascii_lowercase())
    }

    fn canonical_request(&self, request: &CacheCommand) -> Result<Vec<u8>> {
        canonical_json(&request.args)
    }

    fn encode_response(&self, response: &CacheReply) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(response)?)
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<CacheReply> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
