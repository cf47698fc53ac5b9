//! Area description management and the asynchronous save operation.

use crate::sdk::{ExportOutcome, TangoSdk};
use crate::types::{AreaDescription, AreaDescriptionMetadata, EventKey, TangoEvent};
use crate::{Result, TangoError};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Area description calls available while connected.
pub struct AreaLearning {
    sdk: Arc<dyn TangoSdk>,
    area_dir: PathBuf,
}

impl AreaLearning {
    /// Creates `area_dir` if it does not exist yet.
    pub fn new(sdk: Arc<dyn TangoSdk>, area_dir: impl Into<PathBuf>) -> Result<Self> {
        let area_dir = area_dir.into();
        std::fs::create_dir_all(&area_dir)?;
        log::info!("Area learning directory: {}", area_dir.display());
        Ok(Self { sdk, area_dir })
    }

    pub fn area_dir(&self) -> &Path {
        &self.area_dir
    }

    pub fn delete_area_description(&self, uuid: &str) -> Result<()> {
        self.sdk
            .delete_area_description(uuid)
            .map_err(TangoError::sdk("delete_area_description"))
    }

    pub fn list_uuids(&self) -> Result<Vec<String>> {
        self.sdk
            .list_area_description_uuids()
            .map_err(TangoError::sdk("list_area_description_uuids"))
    }

    /// Every stored area description, with the filename recorded in its metadata.
    pub fn area_descriptions(&self) -> Result<Vec<AreaDescription>> {
        let uuids = self.list_uuids()?;
        Ok(uuids
            .into_iter()
            .map(|uuid| {
                let filename = match self.sdk.get_area_description_metadata(&uuid) {
                    Ok(meta) => meta.name,
                    Err(status) => {
                        log::warn!("No metadata for area description {}: {}", uuid, status);
                        String::new()
                    }
                };
                AreaDescription::new(uuid, filename)
            })
            .collect())
    }

    pub fn metadata(&self, uuid: &str) -> Result<AreaDescriptionMetadata> {
        self.sdk
            .get_area_description_metadata(uuid)
            .map_err(TangoError::sdk("get_area_description_metadata"))
    }

    pub fn save_metadata(&self, uuid: &str, metadata: &AreaDescriptionMetadata) -> Result<()> {
        self.sdk
            .save_area_description_metadata(uuid, metadata)
            .map_err(TangoError::sdk("save_area_description_metadata"))
    }

    pub fn import(&self, path: &Path) -> Result<AreaDescription> {
        log::info!("Importing area description from {}", path.display());
        let uuid = self
            .sdk
            .import_area_description(path)
            .map_err(TangoError::sdk("import_area_description"))?;
        Ok(AreaDescription::new(uuid, path.to_string_lossy()))
    }

    pub fn export(&self, uuid: &str, path: &Path) -> Result<ExportOutcome> {
        log::info!("Exporting area description {} to {}", uuid, path.display());
        self.sdk
            .export_area_description(uuid, path)
            .map_err(TangoError::sdk("export_area_description"))
    }

    /// Work item for saving the current map as `filename` under the area directory.
    pub fn save_job(&self, filename: &str) -> SaveJob {
        SaveJob {
            sdk: self.sdk.clone(),
            export_path: self.area_dir.join(filename),
        }
    }
}

/// Everything a save worker needs; it does not borrow the session.
pub struct SaveJob {
    sdk: Arc<dyn TangoSdk>,
    export_path: PathBuf,
}

/// Outcome of a save operation.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveStatus {
    Pending,
    Succeeded(AreaDescription),
    Failed(String),
}

impl SaveStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, SaveStatus::Pending)
    }
}

struct Progress {
    percent_done: f32,
    status: SaveStatus,
}

struct SaveState {
    target: String,
    progress: Mutex<Progress>,
    done_tx: Sender<()>,
    done_rx: Receiver<()>,
}

impl SaveState {
    fn new(target: &str) -> Arc<Self> {
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        Arc::new(Self {
            target: target.to_string(),
            progress: Mutex::new(Progress {
                percent_done: 0.0,
                status: SaveStatus::Pending,
            }),
            done_tx,
            done_rx,
        })
    }

    fn status(&self) -> SaveStatus {
        self.progress.lock().status.clone()
    }

    fn set_progress(&self, fraction: f32) {
        let mut progress = self.progress.lock();
        if progress.status.is_pending() {
            // 1.0 is reserved for completion.
            progress.percent_done = fraction.clamp(0.0, 0.99);
        }
    }

    /// First completion wins; later ones are ignored.
    fn complete(&self, status: SaveStatus) {
        {
            let mut progress = self.progress.lock();
            if !progress.status.is_pending() {
                return;
            }
            match &status {
                SaveStatus::Succeeded(adf) => log::info!("Save for '{}' finished: {}", self.target, adf.uuid),
                SaveStatus::Failed(reason) => log::error!("Save for '{}' failed: {}", self.target, reason),
                SaveStatus::Pending => return,
            }
            progress.status = status;
            progress.percent_done = 1.0;
        }
        let _ = self.done_tx.try_send(());
    }
}

/// Handle to one save operation.
pub struct SaveTask {
    state: Arc<SaveState>,
    worker: Option<JoinHandle<()>>,
}

impl SaveTask {
    pub fn target(&self) -> &str {
        &self.state.target
    }

    /// Progress in `[0, 1]`; exactly 1.0 once finished.
    pub fn percent_done(&self) -> f32 {
        self.state.progress.lock().percent_done
    }

    pub fn status(&self) -> SaveStatus {
        self.state.status()
    }

    pub fn is_done(&self) -> bool {
        !self.status().is_pending()
    }

    /// Block until the save finishes or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<SaveStatus> {
        let status = self.status();
        if !status.is_pending() {
            return Ok(status);
        }
        match self.state.done_rx.recv_timeout(timeout) {
            Ok(()) => Ok(self.status()),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Err(TangoError::Timeout),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                Err(TangoError::SaveFailed("completion channel closed".into()))
            }
        }
    }

    /// Join the worker thread. Returns immediately if there is none.
    pub fn finish(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                self.state
                    .complete(SaveStatus::Failed("save worker panicked".into()));
            }
        }
    }
}

struct PendingExport {
    state: Arc<SaveState>,
    result: AreaDescription,
}

#[derive(Default)]
struct Coordinator {
    outstanding: Mutex<HashMap<String, Arc<SaveState>>>,
    // Export results carry no uuid; the service answers in request order.
    awaiting_export: Mutex<VecDeque<PendingExport>>,
}

/// Tracks save operations across connections; at most one outstanding per target.
#[derive(Clone, Default)]
pub struct SaveCoordinator {
    inner: Arc<Coordinator>,
}

impl SaveCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a save for `target`. A `job` of `Err(reason)` yields a task that
    /// has already failed with `reason`.
    ///
    /// Fails with [`TangoError::ConcurrentSaveRejected`] while another save for
    /// `target` is still pending; that save is left untouched.
    pub fn start(&self, target: &str, job: std::result::Result<SaveJob, String>) -> Result<SaveTask> {
        let state = {
            let mut outstanding = self.inner.outstanding.lock();
            outstanding.retain(|_, s| s.status().is_pending());
            if outstanding.contains_key(target) {
                log::warn!("Save for '{}' already in progress, rejecting", target);
                return Err(TangoError::ConcurrentSaveRejected(target.to_string()));
            }
            let state = SaveState::new(target);
            outstanding.insert(target.to_string(), state.clone());
            state
        };

        let job = match job {
            Ok(job) => job,
            Err(reason) => {
                log::warn!("Save for '{}' not started: {}", target, reason);
                state.complete(SaveStatus::Failed(reason));
                return Ok(SaveTask { state, worker: None });
            }
        };

        let worker_state = state.clone();
        let coordinator = self.clone();
        let spawned = std::thread::Builder::new()
            .name("tango-save-area".into())
            .spawn(move || save_worker(job, worker_state, coordinator));
        let worker = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                state.complete(SaveStatus::Failed(format!("failed to spawn save thread: {}", e)));
                None
            }
        };
        Ok(SaveTask { state, worker })
    }

    /// Number of saves still pending.
    pub fn outstanding(&self) -> usize {
        self.inner
            .outstanding
            .lock()
            .values()
            .filter(|s| s.status().is_pending())
            .count()
    }

    /// Apply save feedback from the service. Returns `true` when the event
    /// belonged to an outstanding save and must not be broadcast.
    pub fn handle_event(&self, event: &TangoEvent) -> bool {
        match event.key {
            EventKey::ExportResult => {
                let next = {
                    let mut awaiting = self.inner.awaiting_export.lock();
                    awaiting.retain(|p| p.state.status().is_pending());
                    awaiting.pop_front()
                };
                let Some(pending) = next else {
                    return false;
                };
                let code = event.message.trim().parse::<i32>();
                if code == Ok(0) {
                    pending.state.complete(SaveStatus::Succeeded(pending.result));
                } else {
                    pending.state.complete(SaveStatus::Failed(format!(
                        "export of {} failed ({})",
                        pending.result.uuid,
                        event.message.trim()
                    )));
                }
                true
            }
            EventKey::AreaDescriptionSaveProgress => {
                let fraction = match event.message.trim().parse::<f32>() {
                    Ok(f) if f.is_finite() => f,
                    _ => {
                        log::debug!("Unparseable save progress '{}'", event.message);
                        return false;
                    }
                };
                let outstanding = self.inner.outstanding.lock();
                let mut consumed = false;
                for state in outstanding.values().filter(|s| s.status().is_pending()) {
                    state.set_progress(fraction);
                    consumed = true;
                }
                consumed
            }
            _ => false,
        }
    }
}

fn save_worker(job: SaveJob, state: Arc<SaveState>, coordinator: SaveCoordinator) {
    let path = job.export_path.to_string_lossy().to_string();
    log::info!("Saving area description to {}", path);

    let uuid = match job.sdk.save_area_description() {
        Ok(uuid) => uuid,
        Err(status) => {
            state.complete(SaveStatus::Failed(format!("save_area_description: {}", status)));
            return;
        }
    };

    let named = job.sdk.get_area_description_metadata(&uuid).and_then(|mut meta| {
        meta.name = path.clone();
        job.sdk.save_area_description_metadata(&uuid, &meta)
    });
    if let Err(status) = named {
        state.complete(SaveStatus::Failed(format!(
            "saved {} but could not record its filename: {}",
            uuid, status
        )));
        return;
    }

    let result = AreaDescription::new(uuid.clone(), path);
    // Registered before exporting so an early export-result event finds it.
    coordinator.inner.awaiting_export.lock().push_back(PendingExport {
        state: state.clone(),
        result: result.clone(),
    });

    let outcome = job.sdk.export_area_description(&uuid, &job.export_path);
    let completed = match outcome {
        Ok(ExportOutcome::Pending) => return,
        Ok(ExportOutcome::Completed(true)) => SaveStatus::Succeeded(result),
        Ok(ExportOutcome::Completed(false)) => SaveStatus::Failed(format!("export of {} failed", uuid)),
        Err(status) => SaveStatus::Failed(format!("export_area_description: {}", status)),
    };
    coordinator
        .inner
        .awaiting_export
        .lock()
        .retain(|p| !Arc::ptr_eq(&p.state, &state));
    state.complete(completed);
}
