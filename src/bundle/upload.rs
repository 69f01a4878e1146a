use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::manager::ReplayManager;

pub const UPLOAD_QUEUE_CAPACITY: usize = 128;
pub const EVENT_UPLOAD_DONE: &str = "upload test case done";

/// Hands finished bundle directories to an external command.
///
/// A single background worker drains a bounded queue. Producers never wait:
/// when the queue is full the directory is dropped with a warning.
#[derive(Clone)]
pub struct Uploader {
    tx: mpsc::Sender<PathBuf>,
}

struct UploadWorker {
    command: String,
    destination: String,
    manager: Arc<ReplayManager>,
    rx: mpsc::Receiver<PathBuf>,
}

impl Uploader {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(
        command: impl Into<String>,
        destination: impl Into<String>,
        manager: Arc<ReplayManager>,
    ) -> (Self, JoinHandle<()>) {
        Self::spawn_with_capacity(command, destination, manager, UPLOAD_QUEUE_CAPACITY)
    }

    pub fn spawn_with_capacity(
        command: impl Into<String>,
        destination: impl Into<String>,
        manager: Arc<ReplayManager>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = UploadWorker {
            command: command.into(),
            destination: destination.into(),
            manager,
            rx,
        };
        let handle = tokio::spawn(worker.run());
        (Self { tx }, handle)
    }

    /// Queue `dir` for upload. Returns false if it was dropped.
    pub fn enqueue(&self, dir: &Path) -> bool {
        match self.tx.try_send(dir.to_path_buf()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dir)) => {
                tracing::warn!(dir = %dir.display(), "Upload queue full, dropping bundle");
                false
            }
            Err(mpsc::error::TrySendError::Closed(dir)) => {
                tracing::warn!(dir = %dir.display(), "Upload worker stopped, dropping bundle");
                false
            }
        }
    }
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("queued", &(self.tx.max_capacity() - self.tx.capacity()))
            .finish()
    }
}

impl UploadWorker {
    async fn run(mut self) {
        while let Some(dir) = self.rx.recv().await {
            let report = self.upload(&dir).await;
            self.manager
                .notify(EVENT_UPLOAD_DONE, &self.command, report.as_bytes());
        }
        tracing::debug!("Upload worker exiting");
    }

    async fn upload(&self, dir: &Path) -> String {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&self.command);
        cmd.env("S3_CASE_DIR", &self.destination);
        cmd.env("LOCAL_CASE_DIR", dir);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        match cmd.output().await {
            Ok(output) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                if output.status.success() {
                    tracing::debug!(dir = %dir.display(), "Uploaded bundle");
                    format!("output:{text}, err:<nil>")
                } else {
                    tracing::warn!(dir = %dir.display(), status = %output.status, "Upload command failed");
                    format!("output:{text}, err:{}", output.status)
                }
            }
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to run upload command");
                format!("output:, err:{e}")
            }
        }
    }
}
