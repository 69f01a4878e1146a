//! Portable test-case bundles.
//!
//! A bundle is a directory holding numbered request/response payload files,
//! snapshots of the storage files they replay against, and a `reg_config.json`
//! manifest describing how to launch the system under test in replay mode.

mod archive;
mod inbound;
mod recorder;
mod upload;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

pub use archive::{pack_bundle, unpack_bundle};
pub use inbound::{
    Capture, InboundRecorder, RequestFixer, CASE_NAME_HEADER, EVENT_INBOUND,
    INBOUND_EMPTY_SKIPPED, INBOUND_FAILURE_SKIPPED, INBOUND_RECORDED, RECORDED_USER_AGENT,
    RESPONSE_TYPE_HEADER,
};
pub use recorder::{CaseData, CaseRecorder, RecorderOptions};
pub use upload::{Uploader, EVENT_UPLOAD_DONE, UPLOAD_QUEUE_CAPACITY};

pub const MANIFEST_FILE: &str = "reg_config.json";

/// Payload encoding tag stored with each case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum PayloadType {
    Unknown = 23,
    Json = 24,
    PbText = 25,
    PbBinary = 26,
}

impl From<PayloadType> for i32 {
    fn from(value: PayloadType) -> Self {
        value as i32
    }
}

impl TryFrom<i32> for PayloadType {
    type Error = String;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        match value {
            23 => Ok(PayloadType::Unknown),
            24 => Ok(PayloadType::Json),
            25 => Ok(PayloadType::PbText),
            26 => Ok(PayloadType::PbBinary),
            other => Err(format!("unknown payload type {other}")),
        }
    }
}

/// Auxiliary file staged before a bundle runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveData {
    pub src: String,
    pub dst: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub req: String,
    pub rsp: String,
    #[serde(rename = "reqType")]
    pub req_type: PayloadType,
    #[serde(rename = "rspType")]
    pub rsp_type: PayloadType,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub runner: String,
}

/// Contents of `reg_config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestSuiteManifest {
    #[serde(default)]
    pub db: Vec<String>,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub input: Vec<MoveData>,
    #[serde(default)]
    pub cases: Vec<TestCase>,
    #[serde(default)]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_flag_files: Option<String>,
}

impl TestSuiteManifest {
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILE)
    }

    /// Load the manifest of `dir`, or `None` when the bundle has none yet.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = Self::path_in(dir);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(EngineError::Io(e)),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(Self::path_in(dir), json)?;
        Ok(())
    }

    /// Fold `prior` into this manifest: new cases first, prior inputs kept,
    /// version bumped past the prior one.
    pub fn merge_prior(&mut self, prior: TestSuiteManifest) {
        self.cases.extend(prior.cases);
        let mut input = prior.input;
        input.extend(std::mem::take(&mut self.input));
        self.input = input;
        self.version = prior.version + 1;
        if self.env_flag_files.is_none() {
            self.env_flag_files = prior.env_flag_files;
        }
    }
}
