//! The record/replay seam wrapped around every external call.
//!
//! An adapter holds the real delegate and hands each call to the
//! [`Interceptor`]:
//! - Off: the delegate runs, nothing is stored
//! - Record: the delegate runs, its outcome (success or failure) is stored
//! - Replay: the stored outcome is returned, the delegate is never touched

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::codec::{CallCodec, Outcome};
use crate::error::{CallError, EngineError, Result};
use crate::key::AdapterKind;
use crate::manager::ReplayManager;
use crate::mode::Mode;

pub const EVENT_RECORDING: &str = "recording";
pub const EVENT_RECORDING_ERROR: &str = "recording-error";
pub const EVENT_RECORDING_FAILED: &str = "recording-failed";
pub const EVENT_REPLAYING: &str = "replaying";
pub const EVENT_REPLAY_MISS: &str = "replay-miss";
pub const EVENT_REPLAY_FAILED: &str = "replay-failed";

/// The real dependency behind an adapter.
#[async_trait]
pub trait ExternalCall: Send + Sync {
    type Request: Send + Sync;
    type Response: Send;
    type Error: Display + Send;

    async fn invoke(
        &self,
        request: &Self::Request,
    ) -> std::result::Result<Self::Response, Self::Error>;
}

#[derive(Clone)]
pub struct Interceptor {
    manager: Arc<ReplayManager>,
}

impl Interceptor {
    pub fn new(manager: Arc<ReplayManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<ReplayManager> {
        &self.manager
    }

    /// Run a blocking call through the record/replay contract.
    pub fn intercept_sync<T, E, F, Enc, Dec>(
        &self,
        kind: AdapterKind,
        tag: &str,
        canonical: &[u8],
        delegate: F,
        encode: Enc,
        decode: Dec,
    ) -> std::result::Result<T, CallError<E>>
    where
        E: Display,
        F: FnOnce() -> std::result::Result<T, E>,
        Enc: FnOnce(&T) -> Result<Vec<u8>>,
        Dec: FnOnce(&[u8]) -> Result<T>,
    {
        match self.manager.mode() {
            Mode::Off => delegate().map_err(CallError::Upstream),
            Mode::Record => {
                let key = self.manager.key_for(kind, tag, canonical);
                self.record(&key, delegate(), encode)
            }
            Mode::Replay => {
                let key = self.manager.key_for(kind, tag, canonical);
                self.replay(&key, decode)
            }
        }
    }

    /// Async form of [`Interceptor::intercept_sync`].
    pub async fn intercept<T, E, Fut, Enc, Dec>(
        &self,
        kind: AdapterKind,
        tag: &str,
        canonical: &[u8],
        delegate: Fut,
        encode: Enc,
        decode: Dec,
    ) -> std::result::Result<T, CallError<E>>
    where
        E: Display,
        Fut: Future<Output = std::result::Result<T, E>>,
        Enc: FnOnce(&T) -> Result<Vec<u8>>,
        Dec: FnOnce(&[u8]) -> Result<T>,
    {
        match self.manager.mode() {
            Mode::Off => delegate.await.map_err(CallError::Upstream),
            Mode::Record => {
                let key = self.manager.key_for(kind, tag, canonical);
                let result = delegate.await;
                self.record(&key, result, encode)
            }
            Mode::Replay => {
                let key = self.manager.key_for(kind, tag, canonical);
                self.replay(&key, decode)
            }
        }
    }

    /// Store the outcome of a real call and hand it back unchanged.
    pub fn record<T, E, Enc>(
        &self,
        key: &str,
        result: std::result::Result<T, E>,
        encode: Enc,
    ) -> std::result::Result<T, CallError<E>>
    where
        E: Display,
        Enc: FnOnce(&T) -> Result<Vec<u8>>,
    {
        match result {
            Ok(value) => {
                let payload = encode(&value)
                    .and_then(|bytes| Outcome::success(bytes).encode())
                    .map_err(|err| self.recording_failed(key, err))?;
                self.persist(key, &payload)?;
                self.manager.notify(EVENT_RECORDING, key, &payload);
                Ok(value)
            }
            Err(err) => {
                let payload = Outcome::failure(err.to_string())
                    .encode()
                    .map_err(|e| self.recording_failed(key, e))?;
                self.persist(key, &payload)?;
                self.manager.notify(EVENT_RECORDING_ERROR, key, &payload);
                Err(CallError::Upstream(err))
            }
        }
    }

    /// Answer a call from storage.
    pub fn replay<T, E, Dec>(&self, key: &str, decode: Dec) -> std::result::Result<T, CallError<E>>
    where
        Dec: FnOnce(&[u8]) -> Result<T>,
    {
        let payload = match self.manager.get_value(key) {
            Ok(payload) => payload,
            Err(err) => {
                let kind = if err.is_not_found() {
                    EVENT_REPLAY_MISS
                } else {
                    EVENT_REPLAY_FAILED
                };
                tracing::debug!(key = %key, error = %err, "replay lookup failed");
                self.manager.notify(kind, key, err.to_string().as_bytes());
                return Err(err.into());
            }
        };

        let outcome = Outcome::decode(&payload).map_err(|err| self.mismatch(key, err))?;
        self.manager.notify(EVENT_REPLAYING, key, &payload);

        match outcome.err {
            Some(message) => Err(CallError::Replayed(message)),
            None => decode(&outcome.value).map_err(|err| self.mismatch(key, err).into()),
        }
    }

    fn persist(&self, key: &str, payload: &[u8]) -> Result<()> {
        self.manager
            .store_value(key, payload)
            .map_err(|err| self.recording_failed(key, err))
    }

    fn recording_failed(&self, key: &str, err: EngineError) -> EngineError {
        tracing::warn!(key = %key, error = %err, "failed to record call outcome");
        self.manager
            .notify(EVENT_RECORDING_FAILED, key, err.to_string().as_bytes());
        err
    }

    fn mismatch(&self, key: &str, err: EngineError) -> EngineError {
        let mismatch = EngineError::ReplayMismatch {
            key: key.to_string(),
            reason: err.to_string(),
        };
        self.manager
            .notify(EVENT_REPLAY_FAILED, key, mismatch.to_string().as_bytes());
        mismatch
    }
}

/// A real delegate wrapped with a codec and the record/replay contract.
pub struct Intercepted<D, C> {
    delegate: D,
    codec: C,
    interceptor: Interceptor,
}

impl<D, C> Intercepted<D, C>
where
    D: ExternalCall,
    C: CallCodec<Request = D::Request, Response = D::Response>,
{
    pub fn new(delegate: D, codec: C, manager: Arc<ReplayManager>) -> Self {
        Self {
            delegate,
            codec,
            interceptor: Interceptor::new(manager),
        }
    }

    pub fn delegate(&self) -> &D {
        &self.delegate
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn key_for(&self, request: &D::Request) -> Result<String> {
        let canonical = self.codec.canonical_request(request)?;
        Ok(self
            .interceptor
            .manager()
            .key_for(self.codec.kind(), &self.codec.tag(request), &canonical))
    }

    pub async fn call(
        &self,
        request: &D::Request,
    ) -> std::result::Result<D::Response, CallError<D::Error>> {
        let manager = self.interceptor.manager();
        let mode = manager.mode();
        if mode == Mode::Off {
            return self
                .delegate
                .invoke(request)
                .await
                .map_err(CallError::Upstream);
        }

        let key = self.key_for(request).map_err(|err| {
            manager.notify(EVENT_RECORDING_FAILED, "", err.to_string().as_bytes());
            CallError::Engine(err)
        })?;

        match mode {
            Mode::Record => {
                let result = self.delegate.invoke(request).await;
                self.interceptor
                    .record(&key, result, |rsp| self.codec.encode_response(rsp))
            }
            _ => self
                .interceptor
                .replay(&key, |bytes| self.codec.decode_response(bytes)),
        }
    }
}
