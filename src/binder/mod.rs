// src/binder/mod.rs
//! Surface Binder - registers a host surface with the engine.
//!
//! One binder per host view. Every transition happens on the main thread; the
//! binder owns its retry [`Timer`] and the engine-side handle and window id.
//!
//! ```text
//! Unbound --begin--> AwaitingEngine --wrap ok--> SurfaceCreated --target/window ok--> Bound
//!                         ^   |                        |
//!                         |   +--wrap fails------------+--sub-step fails (release, retry)
//!                         +-- retry timer
//! AwaitingEngine --attempts exhausted--> Failed --begin--> AwaitingEngine
//! * --unbind--> Unbound
//! ```


use crate::config::BinderConfig;
use crate::engine::{EngineApi, EngineCallError, EngineSurfaceHandle, EngineWindowId};
use crate::timer::Timer;
use log::*;
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Unbound,
    AwaitingEngine,
    SurfaceCreated,
    Bound,
    /// Retries exhausted for this attach cycle.
    Failed,
}

/// Result of one call into the binder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// This call completed the binding.
    JustBound(EngineWindowId),
    AlreadyBound(EngineWindowId),
    /// Not bound yet; a retry is scheduled.
    Pending,
    /// Not attached, or the attach cycle has failed.
    Inactive,
}

impl BindOutcome {
    pub fn window(self) -> Option<EngineWindowId> {
        match self {
            BindOutcome::JustBound(window) | BindOutcome::AlreadyBound(window) => Some(window),
            BindOutcome::Pending | BindOutcome::Inactive => None,
        }
    }
}

/// Why a bind attempt did not complete.
#[derive(Debug)]
enum BindFailure {
    EngineUnavailable,
    Missing(&'static str),
    Engine(EngineCallError),
}

impl fmt::Display for BindFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindFailure::EngineUnavailable => write!(f, "engine not available"),
            BindFailure::Missing(what) => write!(f, "{} entry point unresolved", what),
            BindFailure::Engine(e) => write!(f, "{}", e),
        }
    }
}

impl From<EngineCallError> for BindFailure {
    fn from(e: EngineCallError) -> Self {
        BindFailure::Engine(e)
    }
}

pub struct SurfaceBinder {
    state: BindingState,
    handle: Option<EngineSurfaceHandle>,
    window: Option<EngineWindowId>,
    /// `false` when bound to the engine's implicit main window.
    owns_window: bool,
    retry: Timer,
    attempts: u32,
    max_attempts: u32,
}

impl SurfaceBinder {
    pub fn new(config: &BinderConfig) -> Self {
        Self {
            state: BindingState::Unbound,
            handle: None,
            window: None,
            owns_window: false,
            retry: Timer::new(config.retry_interval()),
            attempts: 0,
            max_attempts: config.max_attempts.max(1),
        }
    }

    pub fn state(&self) -> BindingState {
        self.state
    }

    pub fn window(&self) -> Option<EngineWindowId> {
        self.window
    }

    pub fn is_bound(&self) -> bool {
        self.state == BindingState::Bound
    }

    /// Failed attempts in the current attach cycle.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.retry.deadline()
    }

    /// Starts an attach cycle. Has no effect unless Unbound or Failed.
    pub fn begin(&mut self) {
        match self.state {
            BindingState::Unbound | BindingState::Failed => {
                self.attempts = 0;
                self.retry.cancel();
                self.transition(BindingState::AwaitingEngine);
            }
            _ => {}
        }
    }

    /// Drives the binding forward. Safe to call from any trigger: a no-op once
    /// Bound, and never creates a second handle or window.
    pub fn bind_native_surface_if_needed(
        &mut self,
        engine: &dyn EngineApi,
        layer: u64,
        now: Instant,
    ) -> BindOutcome {
        match self.state {
            BindingState::Bound => match self.window {
                Some(window) => BindOutcome::AlreadyBound(window),
                None => BindOutcome::Inactive,
            },
            BindingState::Unbound | BindingState::Failed => BindOutcome::Inactive,
            BindingState::AwaitingEngine | BindingState::SurfaceCreated => {
                self.attempt(engine, layer, now)
            }
        }
    }

    /// Runs a due retry. Main thread only.
    pub fn service(&mut self, engine: &dyn EngineApi, layer: u64, now: Instant) -> BindOutcome {
        if self.retry.fire_if_due(now) {
            return self.bind_native_surface_if_needed(engine, layer, now);
        }
        match (self.state, self.window) {
            (BindingState::Bound, Some(window)) => BindOutcome::AlreadyBound(window),
            (BindingState::AwaitingEngine | BindingState::SurfaceCreated, _) => {
                BindOutcome::Pending
            }
            _ => BindOutcome::Inactive,
        }
    }

    /// Releases the window, then the surface handle, and returns to Unbound.
    ///
    /// Cancels any pending retry before returning.
    pub fn unbind(&mut self, engine: &dyn EngineApi) {
        self.retry.cancel();
        let was_bound = self.is_bound();
        self.release(engine);
        self.attempts = 0;
        if self.state != BindingState::Unbound {
            if was_bound {
                info!("SurfaceBinder: Unbound");
            }
            self.transition(BindingState::Unbound);
        }
    }

    fn attempt(&mut self, engine: &dyn EngineApi, layer: u64, now: Instant) -> BindOutcome {
        if !engine.engine_ready() {
            return self.retry_later(BindFailure::EngineUnavailable, now);
        }

        if self.handle.is_none() {
            match engine.create_surface(layer) {
                Some(Ok(handle)) => {
                    debug!("SurfaceBinder: Wrapped layer {:#x} as {:p}", layer, handle.as_ptr());
                    self.handle = Some(handle);
                    self.transition(BindingState::SurfaceCreated);
                }
                Some(Err(e)) => return self.retry_later(e.into(), now),
                None => return self.retry_later(BindFailure::Missing("surface wrapper"), now),
            }
        }

        match self.complete(engine) {
            Ok(window) => {
                self.retry.cancel();
                self.attempts = 0;
                self.transition(BindingState::Bound);
                info!("SurfaceBinder: Bound to engine window {}", window.0);
                BindOutcome::JustBound(window)
            }
            Err(failure) => {
                self.release(engine);
                self.transition(BindingState::AwaitingEngine);
                self.retry_later(failure, now)
            }
        }
    }

    /// SurfaceCreated -> Bound sub-steps.
    fn complete(&mut self, engine: &dyn EngineApi) -> Result<EngineWindowId, BindFailure> {
        let Some(handle) = self.handle.as_ref() else {
            return Err(BindFailure::Missing("surface handle"));
        };

        engine
            .set_native_surface(handle)
            .ok_or(BindFailure::Missing("set native surface"))??;

        let (window, owned) = match engine.create_window(handle) {
            Some(result) => (result?, true),
            None => (EngineWindowId::MAIN, false),
        };
        self.window = Some(window);
        self.owns_window = owned;

        if let Some(result) = engine.make_current(window) {
            result?;
        }
        Ok(window)
    }

    /// Drops engine-side registrations: window first, then the handle.
    fn release(&mut self, engine: &dyn EngineApi) {
        let owned = std::mem::take(&mut self.owns_window);
        if let Some(window) = self.window.take() {
            if owned {
                if let Some(Err(e)) = engine.delete_window(window) {
                    warn!("SurfaceBinder: Failed to delete window {}: {}", window.0, e);
                }
            }
        }
        if let Some(handle) = self.handle.take() {
            if let Some(Err(e)) = engine.destroy_surface(handle) {
                warn!("SurfaceBinder: Failed to destroy surface: {}", e);
            }
        }
    }

    fn retry_later(&mut self, failure: BindFailure, now: Instant) -> BindOutcome {
        self.attempts += 1;
        if self.attempts >= self.max_attempts {
            self.retry.cancel();
            warn!(
                "SurfaceBinder: Giving up after {} attempts (last: {})",
                self.attempts, failure
            );
            self.transition(BindingState::Failed);
            return BindOutcome::Inactive;
        }
        debug!(
            "SurfaceBinder: Attempt {} failed ({}), retrying in {:?}",
            self.attempts,
            failure,
            self.retry.interval()
        );
        self.retry.arm_if_idle(now);
        BindOutcome::Pending
    }

    fn transition(&mut self, next: BindingState) {
        if self.state != next {
            trace!("SurfaceBinder: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}
