//! Process bootstrap: wires configuration into a running engine.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;

use crate::bundle::{CaseRecorder, RecorderOptions, Uploader};
use crate::clock::{Clock, ReplayClock, SystemClock};
use crate::config::EngineConfig;
use crate::manager::{self, ReplayManager};
use crate::mode::Mode;
use crate::storage::SqliteStorage;

/// A configured engine and the background tasks it owns.
///
/// Dropping the engine stops the rotation timer and the uploader.
pub struct Engine {
    config: EngineConfig,
    manager: Arc<ReplayManager>,
    recorder: Option<Arc<CaseRecorder>>,
    clock: Arc<dyn Clock>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Start an engine with a fresh manager.
    pub fn init(config: EngineConfig) -> anyhow::Result<Self> {
        Self::init_with_manager(config, Arc::new(ReplayManager::default()))
    }

    /// Start an engine around an existing manager.
    ///
    /// In record mode the previous storage file is removed first, and the
    /// rotation timer (plus the uploader, when configured) is spawned on the
    /// current tokio runtime.
    pub fn init_with_manager(
        config: EngineConfig,
        manager: Arc<ReplayManager>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        manager.set_mode(config.mode);

        let mut engine = Self {
            clock: Arc::new(SystemClock),
            config,
            manager,
            recorder: None,
            tasks: Vec::new(),
        };

        if engine.config.mode == Mode::Off {
            tracing::debug!("Replay engine disabled");
            return Ok(engine);
        }

        let db_path = engine.config.db_path();
        if engine.config.mode == Mode::Record {
            tokio::runtime::Handle::try_current()
                .context("record mode needs a tokio runtime for bundle rotation")?;
            match std::fs::remove_file(&db_path) {
                Ok(()) => tracing::info!(path = %db_path.display(), "Removed previous recording"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("failed to remove previous recording {}", db_path.display())
                    })
                }
            }
        }

        let storage = SqliteStorage::open(&db_path, engine.config.sqlite_options())
            .with_context(|| format!("failed to open storage {}", db_path.display()))?;
        engine.manager.set_storage(Arc::new(storage));

        match engine.config.mode {
            Mode::Record => engine.start_recording(),
            Mode::Replay => {
                if let Some(time) = &engine.config.server_time {
                    engine.clock = Arc::new(ReplayClock::from_rfc3339(time)?);
                }
            }
            Mode::Off => {}
        }

        tracing::info!(
            mode = %engine.config.mode,
            db = %db_path.display(),
            "Replay engine started"
        );
        Ok(engine)
    }

    fn start_recording(&mut self) {
        let options = RecorderOptions {
            output_dir: self.config.output_dir.clone(),
            rotate_every: self.config.rotate_every,
            env_flag_file: self.config.env_flag_file.clone(),
        };
        let mut recorder = CaseRecorder::new(self.manager.clone(), options);

        if let Some((command, destination)) = self.config.upload_target() {
            let (uploader, handle) = Uploader::spawn(command, destination, self.manager.clone());
            recorder = recorder.with_uploader(uploader);
            self.tasks.push(handle);
        }

        let recorder = Arc::new(recorder);
        let interval = Duration::from_secs(self.config.refresh_interval_secs);
        self.tasks.push(recorder.spawn_rotation_timer(interval));
        self.recorder = Some(recorder);
    }

    pub fn mode(&self) -> Mode {
        self.manager.mode()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<ReplayManager> {
        &self.manager
    }

    /// Bundle recorder; present only in record mode.
    pub fn recorder(&self) -> Option<&Arc<CaseRecorder>> {
        self.recorder.as_ref()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Make this engine's manager the process-wide one. First install wins.
    pub fn install_global(&self) -> Arc<ReplayManager> {
        manager::global::install(self.manager.clone())
    }

    /// Stop background tasks and close the storage.
    pub fn shutdown(mut self) {
        self.stop_tasks();
        if let Ok(storage) = self.manager.storage() {
            storage.close();
        }
    }

    fn stop_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("mode", &self.mode())
            .field("db", &self.config.db_path())
            .field("recording", &self.recorder.is_some())
            .finish()
    }
}
