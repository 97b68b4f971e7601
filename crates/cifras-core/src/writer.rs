use crate::backend::{BackendError, PersistenceBackend};
use crate::model::CollectionSnapshot;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

enum WriterCommand {
    Save(CollectionSnapshot),
    Flush(mpsc::Sender<Result<(), BackendError>>),
    Shutdown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub scheduled: u64,
    pub written: u64,
    pub failed: u64,
    pub last_error: Option<String>,
}

/// Trailing-edge debounced snapshot writer.
///
/// Snapshots are sent in mutation order to a single worker thread. The worker
/// keeps only the newest pending snapshot and writes it once no newer one has
/// arrived for `window`. Flush, shutdown and drop always write what is pending.
/// A snapshot whose write fails stays pending until a later window, flush or
/// shutdown stores it, or a newer snapshot replaces it.
pub struct SnapshotWriter {
    sender: mpsc::Sender<WriterCommand>,
    worker: Option<JoinHandle<()>>,
    stats: Arc<Mutex<WriterStats>>,
}

impl SnapshotWriter {
    pub fn spawn(backend: Arc<dyn PersistenceBackend>, window: Duration) -> Self {
        let (sender, receiver) = mpsc::channel();
        let stats = Arc::new(Mutex::new(WriterStats::default()));
        let worker_stats = stats.clone();
        let worker = thread::Builder::new()
            .name(format!("snapshot-writer-{:?}", backend.mode()).to_lowercase())
            .spawn(move || run_worker(backend, window, receiver, worker_stats))
            .ok();
        if worker.is_none() {
            tracing::warn!("snapshot writer thread could not start; saves will be lost");
        }
        Self {
            sender,
            worker,
            stats,
        }
    }

    pub fn schedule(&self, snapshot: CollectionSnapshot) {
        update_stats(&self.stats, |stats| stats.scheduled += 1);
        if self.sender.send(WriterCommand::Save(snapshot)).is_err() {
            tracing::warn!("snapshot writer is gone; dropping save");
        }
    }

    /// Writes the pending snapshot now and waits for the outcome.
    pub fn flush(&self) -> Result<(), BackendError> {
        let (ack, outcome) = mpsc::channel();
        self.sender
            .send(WriterCommand::Flush(ack))
            .map_err(|_| writer_gone())?;
        outcome.recv().map_err(|_| writer_gone())?
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = self.sender.send(WriterCommand::Shutdown);
        if worker.join().is_err() {
            tracing::warn!("snapshot writer panicked during shutdown");
        }
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn writer_gone() -> BackendError {
    BackendError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "snapshot writer stopped",
    ))
}

fn update_stats(stats: &Mutex<WriterStats>, f: impl FnOnce(&mut WriterStats)) {
    if let Ok(mut stats) = stats.lock() {
        f(&mut *stats);
    }
}

fn run_worker(
    backend: Arc<dyn PersistenceBackend>,
    window: Duration,
    receiver: mpsc::Receiver<WriterCommand>,
    stats: Arc<Mutex<WriterStats>>,
) {
    let mut pending: Option<CollectionSnapshot> = None;
    let write = |pending: &mut Option<CollectionSnapshot>| -> Result<(), BackendError> {
        let Some(snapshot) = pending.take() else {
            return Ok(());
        };
        let outcome = backend.save_all(&snapshot);
        match &outcome {
            Ok(()) => {
                tracing::debug!(mode = ?backend.mode(), "snapshot saved");
                update_stats(&stats, |stats| stats.written += 1);
            }
            Err(err) => {
                tracing::warn!(mode = ?backend.mode(), "snapshot save failed, keeping it pending: {err}");
                update_stats(&stats, |stats| {
                    stats.failed += 1;
                    stats.last_error = Some(err.to_string());
                });
                // Only reachable with nothing newer queued: `pending` was just taken.
                *pending = Some(snapshot);
            }
        }
        outcome
    };

    loop {
        let command = if pending.is_some() {
            match receiver.recv_timeout(window) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => {
                    let _ = write(&mut pending);
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    if write(&mut pending).is_err() {
                        tracing::error!("snapshot writer stopped with an unsaved snapshot");
                    }
                    return;
                }
            }
        } else {
            match receiver.recv() {
                Ok(command) => command,
                Err(_) => return,
            }
        };

        match command {
            WriterCommand::Save(snapshot) => pending = Some(snapshot),
            WriterCommand::Flush(ack) => {
                let _ = ack.send(write(&mut pending));
            }
            WriterCommand::Shutdown => {
                if write(&mut pending).is_err() {
                    tracing::error!("snapshot writer stopped with an unsaved snapshot");
                }
                return;
            }
        }
    }
}
