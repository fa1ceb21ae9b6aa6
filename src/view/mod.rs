// src/view/mod.rs
//! Host View Bridge - one engine-backed host view.
//!
//! Owns the view's [`PresentableSurface`] and its [`SurfaceBinder`], and
//! forwards geometry, scale and input to the engine. Main thread only.
//!
//! ## Lifecycle
//! 1. `attach` - create the surface, start an attach cycle, acquire the render loop
//! 2. geometry/scale/input callbacks; binder retries via `service`
//! 3. `detach` (or `Drop`) - unbind from the engine, then drop the surface

pub mod input;
pub mod surface;

#[cfg(test)]
mod tests;

pub use input::{EngineTouch, KeyEvent, Modifiers, PointerEvent};
pub use surface::{
    HeadlessSurface, HeadlessSurfaceFactory, PixelSize, PresentableSurface, SurfaceEvent,
    SurfaceFactory, ViewGeometry,
};

use crate::binder::{BindOutcome, BindingState, SurfaceBinder};
use crate::config::Config;
use crate::engine::{EngineApi, EngineResult, EngineWindowId, PointerMode};
use crate::scheduler::RenderScheduler;
use anyhow::{Context, Result};
use log::*;
use std::sync::Arc;
use std::time::Instant;

/// Process-scoped collaborators shared by every view.
#[derive(Clone)]
pub struct BridgeContext {
    pub engine: Arc<dyn EngineApi>,
    pub scheduler: Arc<RenderScheduler>,
    pub config: Arc<Config>,
}

pub struct HostViewBridge {
    id: i64,
    context: BridgeContext,
    factory: Arc<dyn SurfaceFactory>,
    title: String,
    geometry: ViewGeometry,
    surface: Option<Box<dyn PresentableSurface>>,
    binder: SurfaceBinder,
    /// Last size handed to the engine; `None` until bound.
    applied_size: Option<PixelSize>,
    surface_size: Option<PixelSize>,
}

impl HostViewBridge {
    pub fn new(
        id: i64,
        context: BridgeContext,
        factory: Arc<dyn SurfaceFactory>,
        title: impl Into<String>,
    ) -> Self {
        let binder = SurfaceBinder::new(&context.config.binder);
        let default_scale = context.config.view.default_scale;
        Self {
            id,
            context,
            factory,
            title: title.into(),
            geometry: ViewGeometry::new(0.0, 0.0, default_scale),
            surface: None,
            binder,
            applied_size: None,
            surface_size: None,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn is_attached(&self) -> bool {
        self.surface.is_some()
    }

    pub fn binding_state(&self) -> BindingState {
        self.binder.state()
    }

    pub fn window(&self) -> Option<EngineWindowId> {
        self.binder.window()
    }

    pub fn geometry(&self) -> ViewGeometry {
        self.geometry
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.binder.next_deadline()
    }

    /// The view entered the host hierarchy.
    pub fn attach(&mut self, geometry: ViewGeometry, now: Instant) -> Result<()> {
        if self.is_attached() {
            self.set_geometry(geometry, now);
            return Ok(());
        }

        self.geometry = self.sanitize(geometry);
        let size = self.geometry.pixel_size();
        let surface = self
            .factory
            .create_surface(size, self.geometry.scale)
            .with_context(|| format!("Failed to create surface for view {}", self.id))?;
        info!(
            "HostViewBridge: View {} attached ({}x{} px @{})",
            self.id, size.width, size.height, self.geometry.scale
        );
        self.surface = Some(surface);
        self.surface_size = Some(size);

        self.binder.begin();
        self.context.scheduler.acquire(now);
        self.bind(now);
        Ok(())
    }

    /// The view left the host hierarchy. Engine registrations are released
    /// before the surface is dropped.
    pub fn detach(&mut self) {
        let Some(surface) = self.surface.take() else {
            return;
        };
        // Queued ticks drain before the window and surface go away.
        if self.binder.is_bound() {
            self.context.scheduler.view_unbound();
        }
        self.binder.unbind(self.context.engine.as_ref());
        drop(surface);
        self.applied_size = None;
        self.surface_size = None;
        self.context.scheduler.release();
        info!("HostViewBridge: View {} detached", self.id);
    }

    /// Bounds or scale changed.
    pub fn set_geometry(&mut self, geometry: ViewGeometry, now: Instant) {
        let geometry = self.sanitize(geometry);
        let scale_changed = geometry.scale != self.geometry.scale;
        self.geometry = geometry;
        if !self.is_attached() {
            return;
        }
        if scale_changed {
            self.apply_scale();
        }

        let size = geometry.pixel_size();
        if self.surface_size != Some(size) {
            if let Some(surface) = self.surface.as_mut() {
                surface.set_drawable_size(size);
            }
            self.surface_size = Some(size);
        }
        if self.applied_size == Some(size) {
            trace!("HostViewBridge: View {} size unchanged", self.id);
            return;
        }

        if let Some(window) = self.bind(now).window() {
            self.apply_size(window);
        }
    }

    /// Display scale changed without a bounds change.
    pub fn set_scale(&mut self, scale: f64, now: Instant) {
        let geometry = ViewGeometry { scale, ..self.geometry };
        self.set_geometry(geometry, now);
    }

    /// The engine may have become available; retry binding right away.
    pub fn availability_changed(&mut self, now: Instant) {
        if self.is_attached() {
            self.bind(now);
        }
    }

    /// Runs a due binder retry.
    pub fn service(&mut self, now: Instant) {
        let Some(layer) = self.layer() else {
            return;
        };
        let outcome = self
            .binder
            .service(self.context.engine.as_ref(), layer, now);
        if let BindOutcome::JustBound(window) = outcome {
            self.on_bound(window);
        }
    }

    /// Returns `true` when the engine accepted the event.
    pub fn key_event(&self, event: &KeyEvent) -> bool {
        let input = event.to_engine();
        delivered("key", self.context.engine.key(&input, self.target_window()))
    }

    pub fn pointer_event(&self, event: &PointerEvent) -> bool {
        let engine = &self.context.engine;
        let window = self.target_window();
        let result = match event.to_engine(self.geometry.scale) {
            EngineTouch::Press(press) => engine.touch_press(&press, window),
            EngineTouch::Drag(drag) => engine.touch_drag(&drag, window),
            EngineTouch::Cancel(index) => engine.touches_canceled(index, window),
        };
        delivered("pointer", result)
    }

    pub fn set_pointer_mode(&self, mode: PointerMode) -> bool {
        delivered("pointer mode", self.context.engine.mouse_set_mode(mode))
    }

    /// Stores the title and pushes it now if bound.
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        if let Some(window) = self.bound_window() {
            self.push_title(window);
        }
    }

    /// Size of the engine window, as the engine reports it.
    pub fn window_size(&self) -> Option<PixelSize> {
        let window = self.bound_window()?;
        match self.context.engine.window_size(window)? {
            Ok((width, height)) => Some(PixelSize::new(width, height)),
            Err(e) => {
                debug!("HostViewBridge: {}", e);
                None
            }
        }
    }

    fn bind(&mut self, now: Instant) -> BindOutcome {
        let Some(layer) = self.layer() else {
            return BindOutcome::Inactive;
        };
        let outcome =
            self.binder
                .bind_native_surface_if_needed(self.context.engine.as_ref(), layer, now);
        if let BindOutcome::JustBound(window) = outcome {
            self.on_bound(window);
        }
        outcome
    }

    /// Applies everything deferred while unbound.
    fn on_bound(&mut self, window: EngineWindowId) {
        self.context.scheduler.view_bound();
        self.applied_size = None;
        self.push_title(window);
        self.apply_scale();
        self.apply_size(window);
    }

    fn apply_size(&mut self, window: EngineWindowId) {
        let size = self.geometry.pixel_size();
        if self.applied_size == Some(size) {
            return;
        }
        match self
            .context
            .engine
            .resize_window(size.width, size.height, window)
        {
            Some(Ok(())) => debug!(
                "HostViewBridge: View {} resized to {}x{}",
                self.id, size.width, size.height
            ),
            // Left unrecorded so the next geometry change sends it again.
            Some(Err(e)) => {
                warn!("HostViewBridge: Resize failed: {}", e);
                return;
            }
            None => trace!("HostViewBridge: Resize entry point unresolved"),
        }
        self.applied_size = Some(size);
    }

    fn apply_scale(&mut self) {
        let scale = self.geometry.scale;
        if let Some(surface) = self.surface.as_mut() {
            surface.set_contents_scale(scale);
        }
        if self.binder.is_bound() {
            if let Some(Err(e)) = self.context.engine.set_content_scale(scale as f32) {
                warn!("HostViewBridge: Content scale rejected: {}", e);
            }
        }
    }

    fn push_title(&self, window: EngineWindowId) {
        if let Some(Err(e)) = self.context.engine.window_set_title(&self.title, window) {
            debug!("HostViewBridge: Title hint ignored: {}", e);
        }
    }

    fn bound_window(&self) -> Option<EngineWindowId> {
        if self.binder.is_bound() {
            self.binder.window()
        } else {
            None
        }
    }

    /// Input before binding goes to the engine's main window.
    fn target_window(&self) -> EngineWindowId {
        self.bound_window().unwrap_or(EngineWindowId::MAIN)
    }

    fn layer(&self) -> Option<u64> {
        self.surface.as_ref().map(|surface| surface.layer_address())
    }

    fn sanitize(&self, geometry: ViewGeometry) -> ViewGeometry {
        if geometry.scale.is_finite() && geometry.scale > 0.0 {
            geometry
        } else {
            ViewGeometry {
                scale: self.context.config.view.default_scale,
                ..geometry
            }
        }
    }
}

impl Drop for HostViewBridge {
    fn drop(&mut self) {
        self.detach();
    }
}

fn delivered(what: &str, result: EngineResult) -> bool {
    match result {
        Some(Ok(())) => true,
        Some(Err(e)) => {
            trace!("HostViewBridge: {} event rejected: {}", what, e);
            false
        }
        None => false,
    }
}
