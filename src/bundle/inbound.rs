//! Selection of inbound HTTP exchanges for test-case bundles.
//!
//! A service registers the route patterns it wants captured. Each exchange on
//! a registered route is offered to [`InboundRecorder::capture`], which decides
//! whether it becomes a case in the current bundle.

use std::collections::HashMap;
use std::future::Future;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use flate2::read::GzDecoder;
use parking_lot::RwLock;

use super::{CaseData, CaseRecorder, PayloadType};
use crate::adapters::http::{HttpRequestData, HttpResponseData};

/// Notification kind for every capture decision.
pub const EVENT_INBOUND: &str = "inbound http recorder";
pub const INBOUND_RECORDED: &str = "recording http done";
pub const INBOUND_FAILURE_SKIPPED: &str = "ignoring error response";
pub const INBOUND_EMPTY_SKIPPED: &str = "empty response not recorded";

/// Request header naming the case.
pub const CASE_NAME_HEADER: &str = "RegressionName";
/// Response header a handler sets to `Failure` to keep the exchange out.
pub const RESPONSE_TYPE_HEADER: &str = "HttpResponseType";
pub const RECORDED_USER_AGENT: &str = "RegressionTool";

/// Rewrites a request body before it reaches the handler: `(pattern, body)`.
pub type RequestFixer = Arc<dyn Fn(&str, Vec<u8>) -> Vec<u8> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capture {
    /// Written to the bundle directory.
    Recorded(PathBuf),
    /// The handler marked the response as a failure.
    SkippedFailure,
    /// The response had no body.
    SkippedEmpty,
    /// No route is registered under the pattern.
    Unregistered,
}

#[derive(Clone, Default)]
struct Route {
    fixer: Option<RequestFixer>,
}

/// Route registry feeding a [`CaseRecorder`].
pub struct InboundRecorder {
    recorder: Arc<CaseRecorder>,
    routes: RwLock<HashMap<String, Route>>,
}

impl InboundRecorder {
    pub fn new(recorder: Arc<CaseRecorder>) -> Self {
        Self {
            recorder,
            routes: RwLock::new(HashMap::new()),
        }
    }

    /// Capture exchanges on `pattern`. Registering a pattern again replaces it.
    pub fn register(&self, pattern: impl Into<String>) {
        self.routes.write().insert(pattern.into(), Route::default());
    }

    /// Like [`register`](Self::register), rewriting each request body with `fixer` first.
    pub fn register_with_fixer<F>(&self, pattern: impl Into<String>, fixer: F)
    where
        F: Fn(&str, Vec<u8>) -> Vec<u8> + Send + Sync + 'static,
    {
        self.routes.write().insert(
            pattern.into(),
            Route {
                fixer: Some(Arc::new(fixer)),
            },
        );
    }

    pub fn is_registered(&self, pattern: &str) -> bool {
        self.routes.read().contains_key(pattern)
    }

    /// Ready `request` for the handler on `pattern`.
    ///
    /// Applies the route's fixer and pins the user agent. Returns `false`, and
    /// leaves the request untouched, when the pattern is not registered.
    pub fn prepare(&self, pattern: &str, request: &mut HttpRequestData) -> bool {
        let route = match self.routes.read().get(pattern) {
            Some(route) => route.clone(),
            None => return false,
        };
        if let Some(fixer) = route.fixer {
            let body = std::mem::take(&mut request.body);
            request.body = fixer(pattern, body);
        }
        request.set_header("User-Agent", RECORDED_USER_AGENT);
        true
    }

    /// Decide whether a served exchange becomes a case, and record it if so.
    ///
    /// `request` should already have gone through [`prepare`](Self::prepare).
    pub fn capture(
        &self,
        pattern: &str,
        request: &HttpRequestData,
        response: &HttpResponseData,
    ) -> anyhow::Result<Capture> {
        if !self.is_registered(pattern) {
            return Ok(Capture::Unregistered);
        }

        let manager = self.recorder.manager();
        let name = request.header_value(CASE_NAME_HEADER).unwrap_or_default();
        let (path, query) = split_target(&request.url);
        let location = format!("{path}@@{query}");

        if response
            .header_value(RESPONSE_TYPE_HEADER)
            .is_some_and(|v| v == "Failure")
        {
            let detail = format!("pattern:{pattern}, name:{name}");
            manager.notify(EVENT_INBOUND, INBOUND_FAILURE_SKIPPED, detail.as_bytes());
            return Ok(Capture::SkippedFailure);
        }

        let body = decoded_body(response);
        if body.is_empty() {
            manager.notify(EVENT_INBOUND, INBOUND_EMPTY_SKIPPED, location.as_bytes());
            return Ok(Capture::SkippedEmpty);
        }

        let uri = if query.is_empty() {
            pattern.to_string()
        } else {
            format!("{pattern}?{query}")
        };
        let case = CaseData::new(request.body.clone(), body)
            .with_desc(name)
            .with_uri(uri)
            .with_types(payload_type(request), PayloadType::Unknown);
        let dir = self.recorder.record_data(case)?;
        manager.notify(EVENT_INBOUND, INBOUND_RECORDED, location.as_bytes());
        Ok(Capture::Recorded(dir))
    }

    /// Serve `request` with `handler`, capturing the exchange on registered routes.
    ///
    /// The handler's response goes back unchanged. A failure to write the case
    /// is logged, not returned, so the client is never affected.
    pub async fn serve<F, Fut>(
        &self,
        pattern: &str,
        mut request: HttpRequestData,
        handler: F,
    ) -> HttpResponseData
    where
        F: FnOnce(HttpRequestData) -> Fut,
        Fut: Future<Output = HttpResponseData>,
    {
        if !self.prepare(pattern, &mut request) {
            return handler(request).await;
        }

        let response = handler(request.clone()).await;
        if let Err(e) = self.capture(pattern, &request, &response) {
            tracing::warn!(pattern = %pattern, error = %e, "Failed to record inbound exchange");
        }
        response
    }
}

impl std::fmt::Debug for InboundRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut patterns: Vec<String> = self.routes.read().keys().cloned().collect();
        patterns.sort();
        f.debug_struct("InboundRecorder")
            .field("patterns", &patterns)
            .finish()
    }
}

/// Path and raw query of a request target, with any scheme and host dropped.
fn split_target(url: &str) -> (&str, &str) {
    let target = match url.find("://") {
        Some(i) => {
            let rest = &url[i + 3..];
            rest.find('/').map(|j| &rest[j..]).unwrap_or("/")
        }
        None => url,
    };
    let target = target.split('#').next().unwrap_or(target);
    target.split_once('?').unwrap_or((target, ""))
}

fn decoded_body(response: &HttpResponseData) -> Vec<u8> {
    let gzipped = response
        .header_value("Content-Encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"));
    if !gzipped {
        return response.body.clone();
    }

    let mut out = Vec::new();
    match GzDecoder::new(response.body.as_slice()).read_to_end(&mut out) {
        Ok(_) => out,
        Err(e) => {
            tracing::warn!(error = %e, "Response claims gzip but does not decode; keeping raw body");
            response.body.clone()
        }
    }
}

fn payload_type(request: &HttpRequestData) -> PayloadType {
    match request.header_value("Content-Type") {
        Some(ct) if ct.to_ascii_lowercase().contains("json") => PayloadType::Json,
        _ => PayloadType::Unknown,
    }
}
