// src/plugin.rs
//! Engine plugin - the host-facing entry point.
//!
//! Registers the engine view type, owns every live [`HostViewBridge`], and
//! routes command-channel calls. When a call may have made the engine
//! available, the render loop and every view re-check right away instead of
//! waiting for their timers.

use crate::channel::{CommandChannel, MethodCall, MethodResponse};
use crate::symbols::EntryPointTable;
use crate::timer;
use crate::view::{BridgeContext, HostViewBridge, SurfaceFactory, ViewGeometry};
use anyhow::{bail, Result};
use log::*;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Platform-view type name the host's UI layer instantiates.
pub const VIEW_TYPE: &str = "EngineView";

/// Optional view-creation arguments.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ViewArgs {
    window_title: Option<String>,
}

pub struct EnginePlugin {
    context: BridgeContext,
    channel: CommandChannel,
    factory: Arc<dyn SurfaceFactory>,
    views: BTreeMap<i64, HostViewBridge>,
}

impl EnginePlugin {
    pub fn new(
        context: BridgeContext,
        symbols: Arc<EntryPointTable>,
        factory: Arc<dyn SurfaceFactory>,
    ) -> Self {
        info!("EnginePlugin: Registered view type '{}'", VIEW_TYPE);
        Self {
            context,
            channel: CommandChannel::new(symbols),
            factory,
            views: BTreeMap::new(),
        }
    }

    pub fn context(&self) -> &BridgeContext {
        &self.context
    }

    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    /// View factory: creates (but does not attach) a view.
    ///
    /// `arguments` may carry `{"window_title": "..."}`; anything else is ignored.
    pub fn create_view(&mut self, id: i64, arguments: &Value) -> Result<()> {
        if self.views.contains_key(&id) {
            bail!("View {} already exists", id);
        }
        let args = if arguments.is_null() {
            ViewArgs::default()
        } else {
            ViewArgs::deserialize(arguments).unwrap_or_else(|e| {
                debug!("EnginePlugin: Ignoring view arguments for {}: {}", id, e);
                ViewArgs::default()
            })
        };
        let title = args
            .window_title
            .unwrap_or_else(|| self.context.config.view.window_title.clone());
        let view = HostViewBridge::new(id, self.context.clone(), Arc::clone(&self.factory), title);
        self.views.insert(id, view);
        debug!("EnginePlugin: Created view {}", id);
        Ok(())
    }

    pub fn view(&self, id: i64) -> Option<&HostViewBridge> {
        self.views.get(&id)
    }

    pub fn view_mut(&mut self, id: i64) -> Option<&mut HostViewBridge> {
        self.views.get_mut(&id)
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn attach_view(&mut self, id: i64, geometry: ViewGeometry, now: Instant) -> Result<()> {
        match self.views.get_mut(&id) {
            Some(view) => view.attach(geometry, now),
            None => bail!("No view with id {}", id),
        }
    }

    pub fn detach_view(&mut self, id: i64) -> bool {
        match self.views.get_mut(&id) {
            Some(view) => {
                view.detach();
                true
            }
            None => false,
        }
    }

    /// Detaches and forgets a view.
    pub fn dispose_view(&mut self, id: i64) -> bool {
        self.views.remove(&id).is_some()
    }

    pub fn handle_call(&mut self, call: &MethodCall, now: Instant) -> MethodResponse {
        let handled = self.channel.handle(call);
        if handled.recheck_availability {
            self.recheck(now);
        }
        handled.response
    }

    /// JSON transport variant of [`handle_call`](Self::handle_call).
    pub fn handle_json(&mut self, request: &str, now: Instant) -> String {
        let (reply, recheck) = self.channel.handle_json(request);
        if recheck {
            self.recheck(now);
        }
        reply
    }

    /// Runs every due timer: the availability poll and view retries.
    pub fn service(&mut self, now: Instant) {
        self.context.scheduler.service(now);
        for view in self.views.values_mut() {
            view.service(now);
        }
    }

    /// Earliest pending timer across the scheduler and all views.
    pub fn next_deadline(&self) -> Option<Instant> {
        timer::earliest(
            std::iter::once(self.context.scheduler.next_deadline())
                .chain(self.views.values().map(HostViewBridge::next_deadline)),
        )
    }

    /// Detaches every view; the render loop stops with the last one.
    pub fn shutdown(&mut self) {
        for view in self.views.values_mut() {
            view.detach();
        }
        self.views.clear();
        self.context.scheduler.stop();
        info!("EnginePlugin: Shut down");
    }

    fn recheck(&mut self, now: Instant) {
        let state = self.context.scheduler.recheck(now);
        trace!("EnginePlugin: Re-check -> scheduler {:?}", state);
        for view in self.views.values_mut() {
            view.availability_changed(now);
        }
    }
}

impl Drop for EnginePlugin {
    fn drop(&mut self) {
        if !self.views.is_empty() {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::EngineApi;
    use crate::scheduler::{ManualRefreshSource, RenderScheduler, SchedulerState};
    use crate::testing::{EngineCall, MockEngine};
    use crate::view::HeadlessSurfaceFactory;
    use serde_json::json;
    use test_log::test;

    fn plugin(engine: &Arc<MockEngine>) -> EnginePlugin {
        let config = Arc::new(Config::default());
        let dyn_engine: Arc<dyn EngineApi> = engine.clone();
        let scheduler = Arc::new(RenderScheduler::new(
            Arc::clone(&dyn_engine),
            Box::new(ManualRefreshSource::new()),
            config.scheduler.poll_interval(),
        ));
        EnginePlugin::new(
            BridgeContext {
                engine: dyn_engine,
                scheduler,
                config,
            },
            Arc::new(EntryPointTable::new()),
            Arc::new(HeadlessSurfaceFactory::new()),
        )
    }

    #[test]
    fn view_arguments_override_the_title() {
        let engine = Arc::new(MockEngine::new());
        let mut plugin = plugin(&engine);

        plugin
            .create_view(1, &json!({ "window_title": "Level 1" }))
            .unwrap();
        plugin.create_view(2, &Value::Null).unwrap();
        plugin.create_view(3, &json!("garbage")).unwrap();

        assert_eq!(plugin.view(1).unwrap().title(), "Level 1");
        assert_eq!(plugin.view(2).unwrap().title(), "Engine Embedded");
        assert_eq!(plugin.view(3).unwrap().title(), "Engine Embedded");
        assert!(plugin.create_view(1, &Value::Null).is_err());
    }

    #[test]
    fn attach_instance_rechecks_without_waiting_for_timers() {
        let engine = Arc::new(MockEngine::new());
        let mut plugin = plugin(&engine);
        let t0 = Instant::now();
        plugin.create_view(1, &Value::Null).unwrap();
        plugin
            .attach_view(1, ViewGeometry::new(100.0, 50.0, 1.0), t0)
            .unwrap();
        assert_eq!(plugin.view(1).unwrap().window(), None);
        assert!(plugin.next_deadline().is_some());

        engine.set_available(true);
        let response = plugin.handle_call(
            &MethodCall::new("attachEngineInstance", json!({ "address": 4096 })),
            t0,
        );

        assert!(response.is_success());
        assert_eq!(plugin.context().scheduler.state(), SchedulerState::Running);
        assert!(plugin.view(1).unwrap().window().is_some());
        assert!(engine.control_calls().contains(&EngineCall::ResizeWindow {
            width: 100,
            height: 50,
            window: plugin.view(1).unwrap().window().unwrap(),
        }));
        assert_eq!(plugin.next_deadline(), None);
    }

    #[test]
    fn service_runs_due_retries() {
        let engine = Arc::new(MockEngine::new());
        let mut plugin = plugin(&engine);
        let t0 = Instant::now();
        plugin.create_view(1, &Value::Null).unwrap();
        plugin
            .attach_view(1, ViewGeometry::new(10.0, 10.0, 1.0), t0)
            .unwrap();

        engine.set_available(true);
        let due = plugin.next_deadline().unwrap();
        plugin.service(due);

        assert!(plugin.view(1).unwrap().window().is_some());
    }

    #[test]
    fn shutdown_releases_everything() {
        let engine = Arc::new(MockEngine::available());
        let mut plugin = plugin(&engine);
        let now = Instant::now();
        plugin.create_view(1, &Value::Null).unwrap();
        plugin
            .attach_view(1, ViewGeometry::new(10.0, 10.0, 1.0), now)
            .unwrap();

        plugin.shutdown();

        assert_eq!(plugin.view_count(), 0);
        assert_eq!(plugin.context().scheduler.state(), SchedulerState::Idle);
        assert!(engine
            .control_calls()
            .ends_with(&[
                EngineCall::DeleteWindow(crate::engine::EngineWindowId(1)),
                EngineCall::DestroySurface { handle: 0x1000 },
            ]));
    }
}
