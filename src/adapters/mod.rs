//! Reference codecs for common dependency protocols.
//!
//! Each codec pairs with any [`ExternalCall`](crate::intercept::ExternalCall)
//! whose request and response types match, through
//! [`Intercepted`](crate::intercept::Intercepted).

pub mod cache;
pub mod http;
pub mod sql;

pub use cache::{CacheCodec, CacheCommand, CacheReply};
pub use http::{HeaderMap, HttpCodec, HttpRequestData, HttpResponseData};
pub use sql::{stringify_params, SqlCodec, SqlExecResult, SqlQuery, SqlRows, SqlValue};
