//! Background deploy engine.
//!
//! A single worker thread owns every flush. Mutations only send a
//! [`EngineMsg::Touched`] notification; the worker waits until the filesystem
//! has been idle for the configured deploy interval, then drains the queue and
//! runs the batch in one transaction. Lookups pause the idle clock so a flush
//! never fires in the middle of a directory walk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use serde::Serialize;
use sqlfs_core::deploy::{execute_batch, rolled_back, Batch, BatchFailure};
use sqlfs_core::{fetch_path, ConnectionPool, FlushReport, FsError, MetadataSource, ObjectPath, Result};
use tracing::{debug, error, info, warn};

use crate::overlay::SharedOverlay;

/// Message sent to the engine thread.
#[derive(Debug)]
pub enum EngineMsg {
    /// The queue changed; restart the idle wait
    Touched,
    /// A lookup started talking to the database
    PauseIdle,
    /// A lookup finished
    ResumeIdle,
    /// Flush immediately and report back
    FlushNow {
        response: Sender<Result<FlushReport>>,
    },
    Shutdown,
}

/// Counters kept by the engine thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub flushes: u64,
    pub commits: u64,
    pub rollbacks: u64,
    /// Statements committed across all flushes
    pub statements: u64,
    /// Drained commands that had nothing to run
    pub skipped: u64,
}

#[derive(Default)]
struct Counters {
    flushes: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    statements: AtomicU64,
    skipped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> EngineStats {
        EngineStats {
            flushes: self.flushes.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            statements: self.statements.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// State the worker publishes for the foreground.
#[derive(Default)]
struct Published {
    counters: Counters,
    last_report: ArcSwapOption<FlushReport>,
}

/// Monotonic idle clock that can be paused by concurrent lookups.
#[derive(Debug)]
pub(crate) struct IdleTimer {
    accumulated: Duration,
    running_since: Option<Instant>,
    pauses: usize,
}

impl IdleTimer {
    pub(crate) fn new() -> Self {
        Self {
            accumulated: Duration::ZERO,
            running_since: Some(Instant::now()),
            pauses: 0,
        }
    }

    pub(crate) fn restart(&mut self) {
        self.accumulated = Duration::ZERO;
        self.running_since = if self.pauses == 0 {
            Some(Instant::now())
        } else {
            None
        };
    }

    pub(crate) fn pause(&mut self) {
        if self.pauses == 0 {
            if let Some(since) = self.running_since.take() {
                self.accumulated += since.elapsed();
            }
        }
        self.pauses += 1;
    }

    pub(crate) fn resume(&mut self) {
        self.pauses = self.pauses.saturating_sub(1);
        if self.pauses == 0 && self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.pauses > 0
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.accumulated + self.running_since.map_or(Duration::ZERO, |s| s.elapsed())
    }
}

/// Cloneable sender used by the session and the resolver.
#[derive(Clone)]
pub struct EngineHandle {
    tx: Sender<EngineMsg>,
}

impl EngineHandle {
    /// Notifies the engine that the queue changed.
    pub fn touched(&self) {
        if self.tx.send(EngineMsg::Touched).is_err() {
            debug!("Deploy engine is gone, touch ignored");
        }
    }

    /// Pauses the idle clock until the returned guard drops.
    pub fn pause_idle(&self) -> IdleGuard {
        let _ = self.tx.send(EngineMsg::PauseIdle);
        IdleGuard {
            tx: self.tx.clone(),
        }
    }
}

/// Resumes the idle clock on drop.
pub struct IdleGuard {
    tx: Sender<EngineMsg>,
}

impl Drop for IdleGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(EngineMsg::ResumeIdle);
    }
}

/// Owner of the deploy worker thread.
pub struct DeployEngine {
    tx: Sender<EngineMsg>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
    published: Arc<Published>,
    overlay: SharedOverlay,
}

impl DeployEngine {
    /// Spawns the worker.
    ///
    /// # Arguments
    /// * `overlay` - Cache and queue shared with the session
    /// * `pool` - Pool the flush session is taken from
    /// * `metadata` - Looks up the ids of objects a flush created
    /// * `deploy_time` - Idle interval before queued DDL is deployed
    pub fn start(
        overlay: SharedOverlay,
        pool: Arc<ConnectionPool>,
        metadata: Arc<dyn MetadataSource>,
        deploy_time: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        let published = Arc::new(Published::default());
        let worker = Worker {
            rx,
            overlay: Arc::clone(&overlay),
            pool,
            metadata,
            deploy_time,
            published: Arc::clone(&published),
        };
        let thread = thread::spawn(move || worker.run());
        info!("Deploy engine started (idle interval {:?})", deploy_time);

        Self {
            tx,
            thread: Mutex::new(Some(thread)),
            published,
            overlay,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            tx: self.tx.clone(),
        }
    }

    /// Drains and deploys the queue now, waiting for the outcome.
    pub fn flush_now(&self) -> Result<FlushReport> {
        let (tx, rx) = mpsc::channel();
        self.tx
            .send(EngineMsg::FlushNow { response: tx })
            .map_err(|_| FsError::ShutDown("deploy engine"))?;
        rx.recv().map_err(|_| FsError::ShutDown("deploy engine"))?
    }

    pub fn stats(&self) -> EngineStats {
        self.published.counters.snapshot()
    }

    /// Report of the most recent flush that drained anything.
    pub fn last_report(&self) -> Option<Arc<FlushReport>> {
        self.published.last_report.load_full()
    }

    /// Stops the worker and discards whatever is still queued.
    ///
    /// # Returns
    /// Number of discarded commands, or `ShutDown` on a second call.
    pub fn shutdown(&self) -> Result<usize> {
        let thread = self
            .thread
            .lock()
            .take()
            .ok_or(FsError::ShutDown("deploy engine"))?;
        let _ = self.tx.send(EngineMsg::Shutdown);
        if thread.join().is_err() {
            error!("Deploy thread panicked");
        }

        let mut overlay = self.overlay.lock();
        let discarded = overlay.queue.clear();
        if discarded > 0 {
            warn!("Deploy engine stopped with {} undeployed command(s)", discarded);
        } else {
            info!("Deploy engine stopped");
        }
        Ok(discarded)
    }
}

impl Drop for DeployEngine {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

struct Worker {
    rx: Receiver<EngineMsg>,
    overlay: SharedOverlay,
    pool: Arc<ConnectionPool>,
    metadata: Arc<dyn MetadataSource>,
    deploy_time: Duration,
    published: Arc<Published>,
}

/// Result of one flush attempt.
struct Flushed {
    result: Result<FlushReport>,
    /// The batch never reached the database and is queued again
    requeued: bool,
}

impl Worker {
    fn run(self) {
        let mut timer = IdleTimer::new();
        // Set by a touch or by a batch that could not start, cleared by a flush
        let mut armed = false;

        loop {
            let msg = if armed {
                let remaining = self.deploy_time.saturating_sub(timer.elapsed());
                if !timer.is_paused() && remaining.is_zero() {
                    armed = self.flush().requeued;
                    timer.restart();
                    continue;
                }
                let wait = if timer.is_paused() {
                    self.deploy_time
                } else {
                    remaining
                };
                match self.rx.recv_timeout(wait) {
                    Ok(msg) => msg,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            } else {
                match self.rx.recv() {
                    Ok(msg) => msg,
                    Err(_) => break,
                }
            };

            match msg {
                EngineMsg::Touched => {
                    timer.restart();
                    armed = true;
                }
                EngineMsg::PauseIdle => timer.pause(),
                EngineMsg::ResumeIdle => timer.resume(),
                EngineMsg::FlushNow { response } => {
                    let flushed = self.flush();
                    armed = flushed.requeued;
                    timer.restart();
                    let _ = response.send(flushed.result);
                }
                EngineMsg::Shutdown => break,
            }
        }
        debug!("Deploy thread exiting");
    }

    /// Drains the queue and deploys it.
    ///
    /// The overlay lock is held for the drain and the settle only, never
    /// while statements are on the wire. A batch that never opened its
    /// transaction goes back to the front of the queue.
    fn flush(&self) -> Flushed {
        let batch = self.overlay.lock().queue.take_batch();
        if batch.is_empty() && batch.processed.is_empty() {
            return Flushed {
                result: Ok(FlushReport::idle(&batch)),
                requeued: false,
            };
        }

        let counters = &self.published.counters;
        counters.flushes.fetch_add(1, Ordering::Relaxed);

        let report = match execute_batch(&self.pool, &batch) {
            Ok(report) => {
                self.land(&batch);
                if !batch.is_empty() {
                    counters.commits.fetch_add(1, Ordering::Relaxed);
                    counters
                        .statements
                        .fetch_add(report.statements.len() as u64, Ordering::Relaxed);
                }
                report
            }
            Err(BatchFailure::NotStarted(e)) => {
                let restored = batch.commands.len();
                self.overlay.lock().queue.restore(batch.commands);
                warn!("Deploy could not start, {} command(s) queued again: {}", restored, e);
                return Flushed {
                    result: Err(e),
                    requeued: true,
                };
            }
            Err(BatchFailure::RolledBack(e)) => {
                {
                    let mut overlay = self.overlay.lock();
                    overlay.queue.abort_flight();
                    overlay.settle(&batch.processed);
                }
                counters.rollbacks.fetch_add(1, Ordering::Relaxed);
                error!(
                    "Deploy of {} statement(s) rolled back, batch discarded: {}",
                    batch.items.len(),
                    e
                );
                counters
                    .skipped
                    .fetch_add(batch.skipped as u64, Ordering::Relaxed);
                self.published
                    .last_report
                    .store(Some(Arc::new(rolled_back(&batch, &e))));
                return Flushed {
                    result: Err(e),
                    requeued: false,
                };
            }
        };
        counters
            .skipped
            .fetch_add(batch.skipped as u64, Ordering::Relaxed);
        self.published.last_report.store(Some(Arc::new(report.clone())));
        Flushed {
            result: Ok(report),
            requeued: false,
        }
    }

    /// Settles the overlay after a commit.
    ///
    /// Commands queued while the batch was on the wire still see the objects
    /// it created as local. Those objects get their database ids first, so
    /// the commands render as alters and drops of what now exists. The loop
    /// ends once no newly queued command targets an unlooked-up object.
    fn land(&self, batch: &Batch) {
        let mut adopted: HashMap<ObjectPath, Option<i64>> = HashMap::new();
        loop {
            let wanted: Vec<ObjectPath> = {
                let mut overlay = self.overlay.lock();
                let wanted: Vec<ObjectPath> = batch
                    .created
                    .iter()
                    .filter(|path| !adopted.contains_key(*path) && overlay.queue.references(path))
                    .cloned()
                    .collect();
                if wanted.is_empty() {
                    let overlay = &mut *overlay;
                    for (path, object_id) in &adopted {
                        if let Some(object_id) = *object_id {
                            overlay.queue.adopt_id(path, object_id);
                            overlay.cache.adopt_id(path, object_id);
                        }
                    }
                    overlay.queue.land();
                    overlay.settle(&batch.processed);
                    return;
                }
                wanted
            };
            adopted.extend(self.fetch_ids(&wanted));
        }
    }

    /// Looks up the database ids of freshly created objects.
    fn fetch_ids(&self, paths: &[ObjectPath]) -> Vec<(ObjectPath, Option<i64>)> {
        let mut session = match self.pool.acquire() {
            Ok(session) => session,
            Err(e) => {
                warn!("Cannot look up {} created object(s): {}", paths.len(), e);
                return paths.iter().map(|path| (path.clone(), None)).collect();
            }
        };
        paths
            .iter()
            .map(|path| {
                let object_id = match fetch_path(self.metadata.as_ref(), &mut session, path) {
                    Ok(found) => found.map(|object| object.object_id),
                    Err(e) => {
                        warn!("Cannot look up created {}: {}", path, e);
                        None
                    }
                };
                debug!("Created {} has id {:?}", path, object_id);
                (path.clone(), object_id)
            })
            .collect()
    }
}
