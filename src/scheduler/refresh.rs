// src/scheduler/refresh.rs
//! Refresh signal sources.
//!
//! A refresh source calls back on its own thread once per display refresh.
//! The callback must return promptly: it only queues work for the render
//! worker.

use crate::config::clamp_refresh_rate;
use anyhow::{Context, Result};
use log::*;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Invoked once per refresh, from the source's thread.
pub type RefreshCallback = Arc<dyn Fn() + Send + Sync>;

/// A periodic, display-synchronised timing source.
pub trait RefreshSource: Send {
    /// Starts delivering refresh signals to `callback`. Replaces any previous
    /// callback.
    fn start(&mut self, callback: RefreshCallback) -> Result<()>;

    /// Stops delivery. Once this returns the callback is not invoked again.
    /// Idempotent.
    fn stop(&mut self);
}

enum RefreshCommand {
    Stop,
}

/// Software refresh source: a dedicated thread ticking at a fixed rate.
///
/// Stands in for a hardware display link on hosts that do not expose one.
pub struct ThreadRefreshSource {
    interval: Duration,
    control_tx: Option<Sender<RefreshCommand>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl ThreadRefreshSource {
    pub fn new(refresh_rate_hz: f64) -> Self {
        Self {
            interval: Duration::from_secs_f64(1.0 / clamp_refresh_rate(refresh_rate_hz)),
            control_tx: None,
            thread_handle: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl RefreshSource for ThreadRefreshSource {
    fn start(&mut self, callback: RefreshCallback) -> Result<()> {
        self.stop();

        let (control_tx, control_rx) = mpsc::channel();
        let interval = self.interval;
        let thread_handle = thread::Builder::new()
            .name("refresh".to_string())
            .spawn(move || {
                debug!("RefreshSource: Started ({:?} interval)", interval);
                loop {
                    match control_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => callback(),
                        Ok(RefreshCommand::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("RefreshSource: Thread exiting");
            })
            .context("Failed to spawn refresh thread")?;

        self.control_tx = Some(control_tx);
        self.thread_handle = Some(thread_handle);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(tx) = self.control_tx.take() {
            let _ = tx.send(RefreshCommand::Stop);
        }
        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                error!("RefreshSource thread panicked: {:?}", e);
            }
        }
    }
}

impl Drop for ThreadRefreshSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Refresh source fired by hand.
///
/// Clones share one callback slot, so a test can keep a clone and call
/// [`fire`](ManualRefreshSource::fire) while the scheduler owns the other.
#[derive(Clone, Default)]
pub struct ManualRefreshSource {
    callback: Arc<Mutex<Option<RefreshCallback>>>,
}

impl ManualRefreshSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers one refresh signal. Returns `false` when nothing is attached.
    pub fn fire(&self) -> bool {
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl RefreshSource for ManualRefreshSource {
    fn start(&mut self, callback: RefreshCallback) -> Result<()> {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
        Ok(())
    }

    fn stop(&mut self) {
        self.callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
