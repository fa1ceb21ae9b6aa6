// src/scheduler/mod.rs
//! Render Scheduler - drives the engine's per-frame tick from refresh signals.
//!
//! ## Threading Model
//! - `start`/`stop`/`service` run on the host's main thread.
//! - The refresh callback runs on the refresh source's thread. It only checks
//!   the running flag and the bound-view count, then queues a [`RenderJob::Tick`].
//! - A dedicated `render` worker drains the queue in order and calls into the
//!   engine. Ticks queue up behind a slow frame; none is dropped and two never
//!   run at once. The worker re-checks both conditions before each frame, so a
//!   tick queued before the last view unbound never reaches the engine.
//!
//! ## States
//! `Idle --start (engine down)--> Polling --availability--> Running`
//! `Idle --start (engine up)--> Running`, `* --stop--> Idle`

pub mod refresh;

#[cfg(test)]
mod tests;

pub use refresh::{ManualRefreshSource, RefreshCallback, RefreshSource, ThreadRefreshSource};

use crate::engine::EngineApi;
use crate::timer::Timer;
use anyhow::{Context, Result};
use log::*;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    /// Engine not available yet; re-checking on the poll timer.
    Polling,
    /// Attached to the refresh signal and ticking.
    Running,
}

/// Work items for the render worker.
pub enum RenderJob {
    Tick,
    /// Replies once every job queued before it has finished.
    Flush(Sender<()>),
}

/// Counters shared with the refresh callback and the render worker.
#[derive(Debug, Default)]
pub struct TickStats {
    dispatched: AtomicU64,
    completed: AtomicU64,
    skipped: AtomicU64,
}

impl TickStats {
    /// Ticks queued by the refresh callback.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::SeqCst)
    }

    /// Ticks the worker has finished.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Queued ticks discarded because the loop stopped or no view was bound
    /// by the time the worker reached them.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::SeqCst)
    }
}

/// How long unbinding a view waits for ticks already in the queue.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Flags shared by the refresh callback and the render worker.
#[derive(Clone)]
struct TickGate {
    running: Arc<AtomicBool>,
    bound_views: Arc<AtomicUsize>,
}

impl TickGate {
    fn open(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.bound_views.load(Ordering::Acquire) > 0
    }
}

struct RenderWorker {
    job_tx: Option<Sender<RenderJob>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl RenderWorker {
    fn spawn(engine: Arc<dyn EngineApi>, stats: Arc<TickStats>, gate: TickGate) -> Result<Self> {
        let (job_tx, job_rx) = mpsc::channel::<RenderJob>();
        let thread_handle = thread::Builder::new()
            .name("render".to_string())
            .spawn(move || {
                info!("RenderScheduler: Worker started");
                for job in job_rx {
                    match job {
                        RenderJob::Tick if !gate.open() => {
                            stats.skipped.fetch_add(1, Ordering::SeqCst);
                            trace!("RenderScheduler: Dropping stale tick");
                        }
                        RenderJob::Tick => {
                            engine.frame();
                            let done = stats.completed.fetch_add(1, Ordering::SeqCst) + 1;
                            trace!("RenderScheduler: Tick {} done", done);
                        }
                        RenderJob::Flush(reply) => {
                            let _ = reply.send(());
                        }
                    }
                }
                debug!("RenderScheduler: Worker exiting");
            })
            .context("Failed to spawn render worker thread")?;

        Ok(Self {
            job_tx: Some(job_tx),
            thread_handle: Some(thread_handle),
        })
    }

    fn sender(&self) -> Option<Sender<RenderJob>> {
        self.job_tx.clone()
    }
}

impl Drop for RenderWorker {
    fn drop(&mut self) {
        // Closing our sender ends the worker once the refresh callback (the only
        // other sender) has been dropped by the stopped source.
        self.job_tx.take();
        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                error!("RenderScheduler worker thread panicked: {:?}", e);
            }
        }
    }
}

struct Inner {
    state: SchedulerState,
    poll: Timer,
    source: Box<dyn RefreshSource>,
    worker: Option<RenderWorker>,
    users: usize,
}

/// Process-wide render loop shared by every host view.
pub struct RenderScheduler {
    engine: Arc<dyn EngineApi>,
    running: Arc<AtomicBool>,
    /// Views currently bound; refreshes are ignored while zero.
    bound_views: Arc<AtomicUsize>,
    stats: Arc<TickStats>,
    inner: Mutex<Inner>,
}

impl RenderScheduler {
    pub fn new(
        engine: Arc<dyn EngineApi>,
        source: Box<dyn RefreshSource>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            engine,
            running: Arc::new(AtomicBool::new(false)),
            bound_views: Arc::new(AtomicUsize::new(0)),
            stats: Arc::new(TickStats::default()),
            inner: Mutex::new(Inner {
                state: SchedulerState::Idle,
                poll: Timer::new(poll_interval),
                source,
                worker: None,
                users: 0,
            }),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.lock().state
    }

    pub fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Starts ticking, or polls for availability until the engine is up.
    ///
    /// A no-op while Running. Otherwise availability is checked right away, so
    /// calling `start` again is also how callers request a re-check.
    pub fn start(&self, now: Instant) -> SchedulerState {
        let mut inner = self.lock();
        if inner.state == SchedulerState::Running {
            return inner.state;
        }

        if self.engine.engine_ready() {
            self.enter_running(&mut inner, now);
        } else {
            if inner.state != SchedulerState::Polling {
                info!("RenderScheduler: Engine not available yet, polling");
            }
            inner.state = SchedulerState::Polling;
            inner.poll.arm_if_idle(now);
        }
        inner.state
    }

    /// Detaches from the refresh signal and cancels the poll timer. Idempotent.
    pub fn stop(&self) {
        let mut inner = self.lock();
        inner.poll.cancel();
        if self.running.swap(false, Ordering::SeqCst) {
            inner.source.stop();
            info!("RenderScheduler: Stopped");
        }
        inner.state = SchedulerState::Idle;
    }

    /// Registers one attached view and starts the loop if needed.
    pub fn acquire(&self, now: Instant) -> SchedulerState {
        self.lock().users += 1;
        self.start(now)
    }

    /// Unregisters one view; the last one out stops the loop.
    pub fn release(&self) {
        let remaining = {
            let mut inner = self.lock();
            inner.users = inner.users.saturating_sub(1);
            inner.users
        };
        if remaining == 0 {
            self.stop();
        }
    }

    /// Re-checks availability for attached views, e.g. after new symbols
    /// arrived. Does nothing while no view is attached.
    pub fn recheck(&self, now: Instant) -> SchedulerState {
        if self.lock().users == 0 {
            return self.state();
        }
        self.start(now)
    }

    /// A view finished binding; ticks may reach the engine.
    pub fn view_bound(&self) {
        self.bound_views.fetch_add(1, Ordering::AcqRel);
    }

    /// A view is about to release its engine window.
    ///
    /// Returns once every tick queued so far has either run or been
    /// discarded, so no frame overlaps the caller's teardown.
    pub fn view_unbound(&self) {
        let _ = self
            .bound_views
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if !self.flush(DRAIN_TIMEOUT) {
            warn!("RenderScheduler: Queued ticks did not drain before unbinding");
        }
    }

    pub fn bound_views(&self) -> usize {
        self.bound_views.load(Ordering::Acquire)
    }

    /// Runs the availability poll if it is due. Main thread only.
    pub fn service(&self, now: Instant) -> SchedulerState {
        let mut inner = self.lock();
        if inner.state == SchedulerState::Polling && inner.poll.fire_if_due(now) {
            if self.engine.engine_ready() {
                self.enter_running(&mut inner, now);
            } else {
                trace!("RenderScheduler: Engine still unavailable");
                inner.poll.arm(now);
            }
        }
        inner.state
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.lock().poll.deadline()
    }

    /// Blocks until every tick queued so far has run, or `timeout` passes.
    pub fn flush(&self, timeout: Duration) -> bool {
        let sender = match self.lock().worker.as_ref().and_then(RenderWorker::sender) {
            Some(sender) => sender,
            None => return true,
        };
        let (reply_tx, reply_rx) = mpsc::channel();
        if sender.send(RenderJob::Flush(reply_tx)).is_err() {
            return false;
        }
        reply_rx.recv_timeout(timeout).is_ok()
    }

    fn enter_running(&self, inner: &mut Inner, now: Instant) {
        inner.poll.cancel();

        if inner.worker.is_none() {
            match RenderWorker::spawn(
                Arc::clone(&self.engine),
                Arc::clone(&self.stats),
                self.gate(),
            ) {
                Ok(worker) => inner.worker = Some(worker),
                Err(e) => {
                    error!("RenderScheduler: {:#}", e);
                    self.fall_back_to_polling(inner, now);
                    return;
                }
            }
        }
        let Some(job_tx) = inner.worker.as_ref().and_then(RenderWorker::sender) else {
            self.fall_back_to_polling(inner, now);
            return;
        };

        let gate = self.gate();
        let stats = Arc::clone(&self.stats);
        let callback: RefreshCallback = Arc::new(move || {
            if !gate.open() {
                return;
            }
            if job_tx.send(RenderJob::Tick).is_ok() {
                stats.dispatched.fetch_add(1, Ordering::SeqCst);
            }
        });

        self.running.store(true, Ordering::Release);
        if let Err(e) = inner.source.start(callback) {
            error!("RenderScheduler: Failed to attach refresh source: {:#}", e);
            self.running.store(false, Ordering::Release);
            self.fall_back_to_polling(inner, now);
            return;
        }

        inner.state = SchedulerState::Running;
        info!("RenderScheduler: Running");
    }

    fn fall_back_to_polling(&self, inner: &mut Inner, now: Instant) {
        inner.state = SchedulerState::Polling;
        inner.poll.arm(now);
    }

    fn gate(&self) -> TickGate {
        TickGate {
            running: Arc::clone(&self.running),
            bound_views: Arc::clone(&self.bound_views),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RenderScheduler {
    fn drop(&mut self) {
        self.stop();
        // Worker joins after the source has released its sender.
        self.lock().worker.take();
    }
}
