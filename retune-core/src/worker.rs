//! # Render Worker Module
//!
//! Runs retunes on a dedicated background thread so hosts can keep
//! responding while long clips render. Jobs go in over one channel and
//! [`RenderEvent`]s come back over another, each tagged with the job id
//! returned by [`RenderWorker::submit`].

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::buffer::AudioBuffer;
use crate::error::{RetuneError, RetuneResult};
use crate::retune::{RetuneRequest, Retuner};

/// Identifies one submitted render.
pub type JobId = u64;

/// Lifecycle notifications for submitted jobs.
#[derive(Debug)]
pub enum RenderEvent {
    Started { id: JobId },
    /// Completed fraction in `[0, 1]`, sent at most once per percent.
    Progress { id: JobId, fraction: f32 },
    Finished { id: JobId, buffer: AudioBuffer },
    Failed { id: JobId, error: RetuneError },
}

impl RenderEvent {
    pub fn id(&self) -> JobId {
        match self {
            RenderEvent::Started { id }
            | RenderEvent::Progress { id, .. }
            | RenderEvent::Finished { id, .. }
            | RenderEvent::Failed { id, .. } => *id,
        }
    }
}

/// Bookkeeping shared by callers of [`RenderWorker::wait_for`].
#[derive(Default)]
struct WaitState {
    /// Submitted and not yet collected.
    pending: HashSet<JobId>,
    /// Outcomes that arrived while a caller was waiting on another job.
    parked: HashMap<JobId, RetuneResult<AudioBuffer>>,
}

struct RenderJob {
    id: JobId,
    source: Arc<AudioBuffer>,
    request: RetuneRequest,
}

/// Background render thread.
///
/// Jobs run one at a time in submission order. Dropping the worker shuts it
/// down; jobs still queued at that point are discarded.
///
/// Jobs may be collected with [`wait_for`](Self::wait_for) in any order.
/// Hosts that read [`events`](Self::events) directly take over delivery and
/// should not also wait on the same jobs.
pub struct RenderWorker {
    job_tx: Option<Sender<RenderJob>>,
    shutdown_tx: Sender<()>,
    events_rx: Receiver<RenderEvent>,
    next_id: AtomicU64,
    wait_state: Mutex<WaitState>,
    thread_handle: Option<JoinHandle<()>>,
}

impl RenderWorker {
    /// Starts the render thread.
    ///
    /// # Errors
    /// * `RenderFailed` - the OS refused to spawn the thread
    pub fn spawn(retuner: Retuner) -> RetuneResult<Self> {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<RenderJob>();
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);

        let thread_handle = thread::Builder::new()
            .name("retune-render".into())
            .spawn(move || run(&retuner, &job_rx, &shutdown_rx, &events_tx))
            .map_err(|e| RetuneError::RenderFailed(format!("cannot start render thread: {e}")))?;

        Ok(Self {
            job_tx: Some(job_tx),
            shutdown_tx,
            events_rx,
            next_id: AtomicU64::new(1),
            wait_state: Mutex::default(),
            thread_handle: Some(thread_handle),
        })
    }

    /// Queues a retune and returns its job id.
    pub fn submit(&self, source: Arc<AudioBuffer>, request: RetuneRequest) -> RetuneResult<JobId> {
        let job_tx = self.job_tx.as_ref().ok_or(RetuneError::WorkerDisconnected)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock_wait_state();
        state.pending.insert(id);
        let sent = job_tx.send(RenderJob {
            id,
            source,
            request,
        });
        if sent.is_err() {
            state.pending.remove(&id);
            return Err(RetuneError::WorkerDisconnected);
        }
        log::debug!("queued render job {id}");
        Ok(id)
    }

    /// All events from the worker, for hosts that multiplex several jobs.
    pub fn events(&self) -> &Receiver<RenderEvent> {
        &self.events_rx
    }

    /// Blocks until job `id` finishes.
    ///
    /// Outcomes of other jobs that arrive meanwhile are kept for their own
    /// `wait_for` call; their progress events are dropped.
    ///
    /// # Errors
    /// * `InvalidInput` - `id` was never submitted or was already collected
    /// * `WorkerDisconnected` - the render thread is gone
    /// * whatever the job itself failed with
    pub fn wait_for(&self, id: JobId) -> RetuneResult<AudioBuffer> {
        self.wait_with_progress(id, |_| {})
    }

    /// [`wait_for`](Self::wait_for), forwarding the job's progress.
    pub fn wait_with_progress(
        &self,
        id: JobId,
        mut on_progress: impl FnMut(f32),
    ) -> RetuneResult<AudioBuffer> {
        // Held for the whole wait so concurrent waiters take turns.
        let mut state = self.lock_wait_state();
        if !state.pending.contains(&id) {
            return Err(RetuneError::InvalidInput(format!(
                "render job {id} is unknown or already collected"
            )));
        }
        if let Some(outcome) = state.parked.remove(&id) {
            state.pending.remove(&id);
            return outcome;
        }

        loop {
            let event = self
                .events_rx
                .recv()
                .map_err(|_| RetuneError::WorkerDisconnected)?;
            let outcome = match event {
                RenderEvent::Started { .. } => continue,
                RenderEvent::Progress { id: job, fraction } => {
                    if job == id {
                        on_progress(fraction);
                    }
                    continue;
                }
                RenderEvent::Finished { id: job, buffer } => (job, Ok(buffer)),
                RenderEvent::Failed { id: job, error } => (job, Err(error)),
            };
            match outcome {
                (job, result) if job == id => {
                    state.pending.remove(&id);
                    return result;
                }
                (job, result) => {
                    log::debug!("parking outcome of render job {job}");
                    state.parked.insert(job, result);
                }
            }
        }
    }

    fn lock_wait_state(&self) -> MutexGuard<'_, WaitState> {
        self.wait_state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stops the thread and waits for it to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(handle) = self.thread_handle.take() else {
            return;
        };
        log::debug!("shutting down render worker");
        let _ = self.shutdown_tx.try_send(());
        self.job_tx = None;
        if handle.join().is_err() {
            log::error!("render thread panicked during shutdown");
        }
    }
}

impl Drop for RenderWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    retuner: &Retuner,
    job_rx: &Receiver<RenderJob>,
    shutdown_rx: &Receiver<()>,
    events_tx: &Sender<RenderEvent>,
) {
    log::debug!("render thread started");
    loop {
        crossbeam_channel::select! {
            recv(job_rx) -> msg => match msg {
                Ok(job) => {
                    if !process(retuner, job, events_tx) {
                        log::warn!("render event receiver dropped");
                        break;
                    }
                }
                Err(_) => break,
            },
            recv(shutdown_rx) -> _ => {
                log::debug!("render thread received shutdown signal");
                break;
            },
        }
    }
    log::debug!("render thread finished");
}

/// Runs one job. Returns `false` once nobody is listening for events.
fn process(retuner: &Retuner, job: RenderJob, events_tx: &Sender<RenderEvent>) -> bool {
    let id = job.id;
    if events_tx.send(RenderEvent::Started { id }).is_err() {
        return false;
    }

    let last_percent = AtomicU32::new(0);
    let report = |fraction: f32| {
        let percent = (fraction.clamp(0.0, 1.0) * 100.0) as u32;
        if percent > last_percent.fetch_max(percent, Ordering::Relaxed) {
            let _ = events_tx.send(RenderEvent::Progress { id, fraction });
        }
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        retuner.retune_with_progress(&job.source, &job.request, &report)
    }))
    .unwrap_or_else(|_| {
        log::error!("render job {id} panicked");
        Err(RetuneError::RenderFailed("render panicked".into()))
    });

    let event = match outcome {
        Ok(buffer) => RenderEvent::Finished { id, buffer },
        Err(error) => {
            log::warn!("render job {id} failed: {error}");
            RenderEvent::Failed { id, error }
        }
    };
    events_tx.send(event).is_ok()
}
