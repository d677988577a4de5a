//! Persistence gateway.
//!
//! The whole world is one JSON document on disk. Block edits arm a debounce
//! timer; when it fires the world is serialized on the event loop and written
//! on a blocking task, so a burst of edits costs one write. Writes go to a
//! temporary file first and are renamed into place.
//!
//! Failure policy:
//! - A missing or unreadable document at startup means an empty world.
//! - A failed write is logged and not retried; the next edit arms the timer again.
//! - A debounce that fires while a write is still running is re-armed instead
//!   of waiting on the event loop.

use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde_json::Value;
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};
use voxel_shared::world::WorldStore;

/// Errors raised while writing the world document.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode world: {0}")]
    Encode(#[from] serde_json::Error),
}

impl PersistError {
    fn io(path: &Path, source: io::Error) -> Self {
        PersistError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Two-state debounce timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Pending(Instant),
}

#[derive(Debug)]
pub struct Debounce {
    delay: Duration,
    state: DebounceState,
}

impl Debounce {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: DebounceState::Idle,
        }
    }

    /// (Re)arms the timer; any earlier deadline is superseded.
    pub fn schedule(&mut self, now: Instant) {
        self.state = DebounceState::Pending(now + self.delay);
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            DebounceState::Idle => None,
            DebounceState::Pending(at) => Some(at),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state != DebounceState::Idle
    }

    /// Returns to idle and reports true if the deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.state {
            DebounceState::Pending(at) if at <= now => {
                self.state = DebounceState::Idle;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.state = DebounceState::Idle;
    }
}

/// Reads and writes the world document at a fixed path.
#[derive(Debug)]
pub struct PersistenceGateway {
    path: PathBuf,
    in_flight: Option<JoinHandle<()>>,
}

impl PersistenceGateway {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            in_flight: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted world, falling back to an empty one.
    pub fn load_on_startup(&self) -> WorldStore {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No saved world, starting empty");
                return WorldStore::new();
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to read saved world, starting empty"
                );
                return WorldStore::new();
            }
        };

        let doc: Value = match serde_json::from_slice(&bytes) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Saved world is corrupt, starting empty"
                );
                return WorldStore::new();
            }
        };

        let (world, report) = WorldStore::hydrate(&doc);
        info!(
            path = %self.path.display(),
            rooms = world.room_count(),
            blocks = report.loaded,
            dropped = report.dropped,
            "World loaded"
        );
        world
    }

    /// True while a background write has not completed.
    pub fn is_writing(&self) -> bool {
        self.in_flight.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Serializes now and writes in the background. Never waits: if the
    /// previous write is still running nothing is started and `false` is
    /// returned, so the caller can try again later.
    pub fn persist(&mut self, world: &WorldStore) -> bool {
        if self.is_writing() {
            debug!(path = %self.path.display(), "World write still running, deferring");
            return false;
        }
        self.in_flight = None;

        let bytes = match encode(world) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Skipping world write");
                return true;
            }
        };

        let path = self.path.clone();
        debug!(path = %path.display(), bytes = bytes.len(), "Writing world");
        self.in_flight = Some(tokio::task::spawn_blocking(move || {
            if let Err(e) = write_atomic(&path, &bytes) {
                warn!(error = %e, "World write failed");
            }
        }));
        true
    }

    /// Waits for a background write, if one is running.
    pub async fn wait_in_flight(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "World write task failed");
            }
        }
    }

    /// Synchronous serialize + write.
    pub fn flush_now(&self, world: &WorldStore) -> Result<(), PersistError> {
        let bytes = encode(world)?;
        write_atomic(&self.path, &bytes)
    }

    /// Final flush on shutdown, after any background write has finished.
    pub async fn shutdown(&mut self, world: &WorldStore) {
        self.wait_in_flight().await;
        match self.flush_now(world) {
            Ok(()) => info!(
                path = %self.path.display(),
                blocks = world.block_count(),
                "World flushed"
            ),
            Err(e) => warn!(error = %e, "Final world flush failed"),
        }
    }
}

fn encode(world: &WorldStore) -> Result<Vec<u8>, PersistError> {
    Ok(serde_json::to_vec(&world.to_document())?)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| PersistError::io(dir, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, bytes).map_err(|e| PersistError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| PersistError::io(path, e))
}
