use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;

use super::{PayloadType, TestCase, TestSuiteManifest, Uploader};
use crate::adapters::http::{HttpRequestData, HttpResponseData};
use crate::manager::ReplayManager;
use crate::mode::ResetKind;

const REQ_PREFIX: &str = "reg_req";
const RSP_PREFIX: &str = "reg_rsp";
const BUNDLE_DIR_PREFIX: &str = "ts";
const MAX_NAME_PROBES: usize = 102_400;

#[derive(Debug, Clone)]
pub struct RecorderOptions {
    pub output_dir: PathBuf,
    /// Start a new bundle after this many captures. Zero disables it.
    pub rotate_every: u64,
    pub env_flag_file: Option<PathBuf>,
}

impl RecorderOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            rotate_every: 0,
            env_flag_file: None,
        }
    }
}

/// One request/response pair selected for bundling.
#[derive(Debug, Clone)]
pub struct CaseData {
    /// File name suggestion for the payload files; may be empty.
    pub name: String,
    pub uri: String,
    pub desc: String,
    pub runner: String,
    pub request: Vec<u8>,
    pub request_type: PayloadType,
    pub response: Vec<u8>,
    pub response_type: PayloadType,
}

impl CaseData {
    pub fn new(request: impl Into<Vec<u8>>, response: impl Into<Vec<u8>>) -> Self {
        Self {
            name: String::new(),
            uri: String::new(),
            desc: String::new(),
            runner: String::new(),
            request: request.into(),
            request_type: PayloadType::Unknown,
            response: response.into(),
            response_type: PayloadType::Unknown,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    pub fn with_runner(mut self, runner: impl Into<String>) -> Self {
        self.runner = runner.into();
        self
    }

    pub fn with_types(mut self, request: PayloadType, response: PayloadType) -> Self {
        self.request_type = request;
        self.response_type = response;
        self
    }
}

struct RecorderState {
    current_dir: Option<PathBuf>,
    captures: u64,
}

/// Writes captured cases into the current bundle directory.
pub struct CaseRecorder {
    manager: Arc<ReplayManager>,
    options: RecorderOptions,
    state: Mutex<RecorderState>,
    uploader: Option<Uploader>,
}

impl CaseRecorder {
    pub fn new(manager: Arc<ReplayManager>, options: RecorderOptions) -> Self {
        Self {
            manager,
            options,
            state: Mutex::new(RecorderState {
                current_dir: None,
                captures: 0,
            }),
            uploader: None,
        }
    }

    pub fn with_uploader(mut self, uploader: Uploader) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn manager(&self) -> &Arc<ReplayManager> {
        &self.manager
    }

    pub fn options(&self) -> &RecorderOptions {
        &self.options
    }

    pub fn current_dir(&self) -> Option<PathBuf> {
        self.state.lock().current_dir.clone()
    }

    pub fn captures(&self) -> u64 {
        self.state.lock().captures
    }

    /// Switch to a fresh bundle directory and fire the manager's reset hook.
    pub fn rotate(&self) -> anyhow::Result<PathBuf> {
        let dir = {
            let mut state = self.state.lock();
            self.rotate_locked(&mut state)?
        };
        self.manager.reset(ResetKind::OutputDir);
        Ok(dir)
    }

    fn rotate_locked(&self, state: &mut RecorderState) -> anyhow::Result<PathBuf> {
        let dir = create_bundle_dir(&self.options.output_dir)?;
        tracing::info!(dir = %dir.display(), "Started new test-case bundle");
        state.current_dir = Some(dir.clone());
        Ok(dir)
    }

    /// Rotate every `interval` while the manager is recording, starting now.
    ///
    /// Runs until the returned handle is aborted.
    pub fn spawn_rotation_timer(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let recorder = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if !recorder.manager.should_record() {
                    continue;
                }
                if let Err(e) = recorder.rotate() {
                    tracing::warn!(error = %e, "Failed to rotate test-case bundle");
                }
            }
        })
    }

    /// Add one case to the current bundle and return the bundle directory.
    pub fn record_data(&self, case: CaseData) -> anyhow::Result<PathBuf> {
        let (dir, rotated) = {
            let mut state = self.state.lock();
            let dir = match state.current_dir.clone() {
                Some(dir) => dir,
                None => self.rotate_locked(&mut state)?,
            };

            self.write_case(&dir, &case)?;

            state.captures += 1;
            let rotated = self.options.rotate_every > 0
                && state.captures % self.options.rotate_every == 0;
            if rotated {
                self.rotate_locked(&mut state)?;
            }
            (dir, rotated)
        };

        if rotated {
            self.manager.reset(ResetKind::OutputDir);
        }
        if let Some(uploader) = &self.uploader {
            uploader.enqueue(&dir);
        }
        Ok(dir)
    }

    /// Record an HTTP exchange; both bodies are tagged as JSON.
    pub fn record_http(
        &self,
        desc: &str,
        request: &HttpRequestData,
        response: &HttpResponseData,
    ) -> anyhow::Result<PathBuf> {
        let case = CaseData::new(request.body.clone(), response.body.clone())
            .with_desc(desc)
            .with_uri(request.url.clone())
            .with_types(PayloadType::Json, PayloadType::Json);
        self.record_data(case)
    }

    /// Record an RPC exchange as JSON payloads.
    pub fn record_rpc<Req, Resp>(
        &self,
        desc: &str,
        method: &str,
        request: &Req,
        response: &Resp,
    ) -> anyhow::Result<PathBuf>
    where
        Req: Serialize + ?Sized,
        Resp: Serialize + ?Sized,
    {
        let req = serde_json::to_vec(request).context("failed to encode rpc request")?;
        let rsp = serde_json::to_vec(response).context("failed to encode rpc response")?;
        let case = CaseData::new(req, rsp)
            .with_desc(desc)
            .with_uri(method)
            .with_types(PayloadType::Json, PayloadType::Json);
        self.record_data(case)
    }

    fn write_case(&self, dir: &Path, case: &CaseData) -> anyhow::Result<()> {
        let req_name = unique_file_name(dir, REQ_PREFIX, &case.name)?;
        let rsp_name = unique_file_name(dir, RSP_PREFIX, &case.name)?;
        std::fs::write(dir.join(&req_name), &case.request)
            .with_context(|| format!("failed to write {req_name}"))?;
        std::fs::write(dir.join(&rsp_name), &case.response)
            .with_context(|| format!("failed to write {rsp_name}"))?;

        let mut db = Vec::new();
        for file in self.manager.db_files() {
            let name = file_name(&file)?;
            std::fs::copy(&file, dir.join(&name)).with_context(|| {
                format!("failed to copy db file {} into bundle", file.display())
            })?;
            db.push(name);
        }

        let env_flag_files = match &self.options.env_flag_file {
            Some(path) => {
                let name = file_name(path)?;
                std::fs::copy(path, dir.join(&name)).with_context(|| {
                    format!("failed to copy env flag file {}", path.display())
                })?;
                Some(name)
            }
            None => None,
        };

        let mut flags = vec![
            "--replaykit-mode=replay".to_string(),
            format!("--server-time={}", chrono::Local::now().to_rfc3339()),
        ];
        if let Some(main_db) = db.first() {
            flags.push(format!("--replaykit-db-file={main_db}"));
        }

        let mut manifest = TestSuiteManifest {
            db,
            flags,
            input: Vec::new(),
            cases: vec![TestCase {
                req: req_name,
                rsp: rsp_name,
                req_type: case.request_type,
                rsp_type: case.response_type,
                desc: case.desc.clone(),
                uri: case.uri.clone(),
                runner: case.runner.clone(),
            }],
            version: 1,
            env_flag_files,
        };
        if let Some(prior) = TestSuiteManifest::load(dir).context("failed to read existing manifest")? {
            manifest.merge_prior(prior);
        }
        manifest.save(dir).context("failed to write manifest")?;

        tracing::debug!(
            dir = %dir.display(),
            cases = manifest.cases.len(),
            version = manifest.version,
            "Recorded test case"
        );
        Ok(())
    }
}

impl std::fmt::Debug for CaseRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaseRecorder")
            .field("options", &self.options)
            .field("current_dir", &self.current_dir())
            .finish()
    }
}

fn file_name(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("invalid file path: {}", path.display()))
}

fn unique_file_name(dir: &Path, prefix: &str, suggest: &str) -> anyhow::Result<String> {
    let stem = if suggest.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}_{suggest}")
    };
    let first = format!("{stem}.dat");
    if !dir.join(&first).exists() {
        return Ok(first);
    }
    for i in 0..MAX_NAME_PROBES {
        let name = format!("{stem}_{i}.dat");
        if !dir.join(&name).exists() {
            return Ok(name);
        }
    }
    anyhow::bail!("no free {stem} file name in {}", dir.display())
}

fn create_bundle_dir(output_dir: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output dir {}", output_dir.display()))?;

    let stamp = chrono::Local::now().format("%Y%m%d%H%M%S").to_string();
    let base = output_dir.join(format!("{BUNDLE_DIR_PREFIX}{stamp}"));
    if try_create_dir(&base)? {
        return Ok(base);
    }
    for i in 0..MAX_NAME_PROBES {
        let path = output_dir.join(format!("{BUNDLE_DIR_PREFIX}{stamp}-{i}"));
        if try_create_dir(&path)? {
            return Ok(path);
        }
    }
    anyhow::bail!("no free bundle directory name in {}", output_dir.display())
}

fn try_create_dir(path: &Path) -> anyhow::Result<bool> {
    match std::fs::create_dir(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e).with_context(|| format!("failed to create {}", path.display())),
    }
}
