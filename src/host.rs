// src/host.rs
//! Host loop - the bridge's main-thread actor.
//!
//! All binder and view state lives on the thread that runs [`HostLoop::run`].
//! Other threads talk to it through a cloneable [`HostHandle`]; the loop sleeps
//! on its channel until the next message or the next timer deadline, whichever
//! comes first.

use crate::channel::{MethodCall, MethodResponse};
use crate::engine::PointerMode;
use crate::plugin::EnginePlugin;
use crate::view::{KeyEvent, PointerEvent, ViewGeometry};
use anyhow::{anyhow, Context, Result};
use log::*;
use serde_json::Value;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

/// Per-view notifications from the host UI.
#[derive(Debug, Clone)]
pub enum ViewEvent {
    Attach(ViewGeometry),
    Geometry(ViewGeometry),
    Scale(f64),
    Key(KeyEvent),
    Pointer(PointerEvent),
    PointerMode(PointerMode),
    Title(String),
    Detach,
}

#[derive(Debug)]
pub enum HostMessage {
    Call {
        call: MethodCall,
        reply: Sender<MethodResponse>,
    },
    CreateView {
        id: i64,
        arguments: Value,
    },
    View {
        id: i64,
        event: ViewEvent,
    },
    DisposeView {
        id: i64,
    },
    Shutdown,
}

/// Sending side of the host loop. Cheap to clone, usable from any thread.
#[derive(Clone)]
pub struct HostHandle {
    tx: Sender<HostMessage>,
}

impl HostHandle {
    /// Sends a command-channel call and waits for the reply.
    ///
    /// Must not be called from the loop's own thread.
    pub fn call(&self, call: MethodCall, timeout: Duration) -> Result<MethodResponse> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(HostMessage::Call {
            call,
            reply: reply_tx,
        })?;
        reply_rx
            .recv_timeout(timeout)
            .context("Host loop did not reply")
    }

    pub fn create_view(&self, id: i64, arguments: Value) -> Result<()> {
        self.send(HostMessage::CreateView { id, arguments })
    }

    pub fn view_event(&self, id: i64, event: ViewEvent) -> Result<()> {
        self.send(HostMessage::View { id, event })
    }

    pub fn dispose_view(&self, id: i64) -> Result<()> {
        self.send(HostMessage::DisposeView { id })
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(HostMessage::Shutdown)
    }

    fn send(&self, message: HostMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| anyhow!("Host loop has exited"))
    }
}

pub struct HostLoop {
    plugin: EnginePlugin,
    rx: Receiver<HostMessage>,
}

impl HostLoop {
    pub fn new(plugin: EnginePlugin) -> (Self, HostHandle) {
        let (tx, rx) = mpsc::channel();
        (Self { plugin, rx }, HostHandle { tx })
    }

    pub fn plugin(&self) -> &EnginePlugin {
        &self.plugin
    }

    pub fn plugin_mut(&mut self) -> &mut EnginePlugin {
        &mut self.plugin
    }

    /// Runs until `Shutdown` arrives or every handle is dropped, then detaches
    /// all views.
    pub fn run(&mut self) -> Result<()> {
        info!("HostLoop: Running");
        loop {
            self.plugin.service(Instant::now());

            let message = match self.plugin.next_deadline() {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match self.rx.recv_timeout(wait) {
                        Ok(message) => message,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match self.rx.recv() {
                    Ok(message) => message,
                    Err(_) => break,
                },
            };

            if !self.dispatch(message) {
                break;
            }
        }
        self.plugin.shutdown();
        info!("HostLoop: Stopped");
        Ok(())
    }

    /// Handles one message. Returns `false` on shutdown.
    fn dispatch(&mut self, message: HostMessage) -> bool {
        let now = Instant::now();
        match message {
            HostMessage::Call { call, reply } => {
                let response = self.plugin.handle_call(&call, now);
                if reply.send(response).is_err() {
                    debug!("HostLoop: Caller went away before the reply to {}", call.method);
                }
            }
            HostMessage::CreateView { id, arguments } => {
                if let Err(e) = self.plugin.create_view(id, &arguments) {
                    warn!("HostLoop: {:#}", e);
                }
            }
            HostMessage::View { id, event } => self.view_event(id, event, now),
            HostMessage::DisposeView { id } => {
                if !self.plugin.dispose_view(id) {
                    debug!("HostLoop: Dispose for unknown view {}", id);
                }
            }
            HostMessage::Shutdown => {
                info!("HostLoop: Shutdown requested");
                return false;
            }
        }
        true
    }

    fn view_event(&mut self, id: i64, event: ViewEvent, now: Instant) {
        if let ViewEvent::Attach(geometry) = event {
            if let Err(e) = self.plugin.attach_view(id, geometry, now) {
                warn!("HostLoop: {:#}", e);
            }
            return;
        }

        let Some(view) = self.plugin.view_mut(id) else {
            warn!("HostLoop: Event for unknown view {}", id);
            return;
        };
        match event {
            ViewEvent::Attach(_) => {}
            ViewEvent::Geometry(geometry) => view.set_geometry(geometry, now),
            ViewEvent::Scale(scale) => view.set_scale(scale, now),
            ViewEvent::Key(key) => {
                view.key_event(&key);
            }
            ViewEvent::Pointer(pointer) => {
                view.pointer_event(&pointer);
            }
            ViewEvent::PointerMode(mode) => {
                view.set_pointer_mode(mode);
            }
            ViewEvent::Title(title) => view.set_title(title),
            ViewEvent::Detach => view.detach(),
        }
    }
}
