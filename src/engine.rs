// src/engine.rs
//! Typed, capability-checked interface to the engine.
//!
//! Every operation returns [`EngineResult`]: `None` when the entry point is not
//! resolved (the engine is not loaded yet, or its API version lacks the call),
//! `Some(Err(..))` when the engine reported a failure, `Some(Ok(..))` otherwise.
//! Absence is a degraded capability, never a fault, so callers usually just
//! drop a `None`.

use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Outcome of a call through an optional entry point.
pub type EngineResult<T = ()> = Option<Result<T, EngineCallError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EngineCallError {
    #[error("{entry} returned failure code {code}")]
    Failed { entry: &'static str, code: i32 },
    #[error("{entry} returned a null handle")]
    NullHandle { entry: &'static str },
    #[error("{entry} rejected an argument that cannot cross the C boundary")]
    InvalidArgument { entry: &'static str },
}

/// Maps the engine's `0 == success` convention onto a `Result`.
pub fn status(entry: &'static str, code: i32) -> Result<(), EngineCallError> {
    if code == 0 {
        Ok(())
    } else {
        Err(EngineCallError::Failed { entry, code })
    }
}

/// Identifier the engine assigns to a bound surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineWindowId(pub i32);

impl EngineWindowId {
    /// The engine's implicit main window (the ABI's default argument).
    pub const MAIN: EngineWindowId = EngineWindowId(0);
}

/// Engine-side wrapper around a presentable surface.
///
/// Deliberately not `Clone`: exactly one handle exists per bound surface and
/// it is consumed by [`EngineApi::destroy_surface`].
#[derive(Debug, PartialEq, Eq)]
pub struct EngineSurfaceHandle(NonNull<c_void>);

impl EngineSurfaceHandle {
    pub fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.0.as_ptr()
    }
}

// SAFETY: the handle is an opaque token owned by the engine; this crate never
// dereferences it, only hands it back to the engine through the serialized gate.
unsafe impl Send for EngineSurfaceHandle {}

/// Key event in the engine's parameter layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInput {
    pub keycode: i32,
    /// UTF-32 scalar value, 0 when the key produces no text.
    pub char_code: u32,
    pub unshifted: i32,
    pub physical: i32,
    pub modifiers: u32,
    pub pressed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchPress {
    pub index: i32,
    pub x: i32,
    pub y: i32,
    pub pressed: bool,
    pub double_click: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchDrag {
    pub index: i32,
    pub prev_x: i32,
    pub prev_y: i32,
    pub x: i32,
    pub y: i32,
    pub pressure: f32,
    pub tilt_x: f32,
    pub tilt_y: f32,
}

/// Engine mouse modes, using the engine's enum values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PointerMode {
    #[default]
    Visible = 0,
    Hidden = 1,
    Captured = 2,
    Confined = 3,
    ConfinedHidden = 4,
}

/// The engine's C ABI as seen by the bridge.
pub trait EngineApi: Send + Sync {
    fn is_available(&self) -> Option<bool>;
    fn process_events(&self) -> Option<()>;
    fn swap_buffers(&self) -> EngineResult;
    fn resize_window(&self, width: i32, height: i32, window: EngineWindowId) -> EngineResult;
    fn window_size(&self, window: EngineWindowId) -> EngineResult<(i32, i32)>;
    fn set_content_scale(&self, scale: f32) -> EngineResult;
    fn key(&self, key: &KeyInput, window: EngineWindowId) -> EngineResult;
    fn touch_press(&self, touch: &TouchPress, window: EngineWindowId) -> EngineResult;
    fn touch_drag(&self, drag: &TouchDrag, window: EngineWindowId) -> EngineResult;
    fn touches_canceled(&self, index: i32, window: EngineWindowId) -> EngineResult;
    fn mouse_set_mode(&self, mode: PointerMode) -> EngineResult;
    fn window_set_title(&self, title: &str, window: EngineWindowId) -> EngineResult;
    fn make_current(&self, window: EngineWindowId) -> EngineResult;
    /// Wraps a native layer address into an engine surface.
    fn create_surface(&self, layer: u64) -> EngineResult<EngineSurfaceHandle>;
    fn set_native_surface(&self, surface: &EngineSurfaceHandle) -> EngineResult;
    fn create_window(&self, surface: &EngineSurfaceHandle) -> EngineResult<EngineWindowId>;
    fn delete_window(&self, window: EngineWindowId) -> EngineResult;
    fn destroy_surface(&self, surface: EngineSurfaceHandle) -> EngineResult;

    /// `false` when the availability entry point itself is unresolved.
    fn engine_ready(&self) -> bool {
        self.is_available().unwrap_or(false)
    }

    /// One frame of engine work: pump events, then present.
    fn frame(&self) {
        let _ = self.process_events();
        if let Some(Err(e)) = self.swap_buffers() {
            log::trace!("Engine: {}", e);
        }
    }
}

/// Serialises every call into the wrapped engine behind one gate.
///
/// The render worker and the main thread both talk to the engine; the gate
/// guarantees no two engine calls run at the same time, and a frame's
/// process/present pair is never interleaved with a main-thread call.
pub struct SerializedEngine<E: ?Sized> {
    inner: Arc<E>,
    gate: Mutex<()>,
}

impl<E: EngineApi + ?Sized> SerializedEngine<E> {
    pub fn new(inner: Arc<E>) -> Self {
        Self {
            inner,
            gate: Mutex::new(()),
        }
    }

    pub fn inner(&self) -> &Arc<E> {
        &self.inner
    }

    fn enter(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: EngineApi + ?Sized> EngineApi for SerializedEngine<E> {
    fn is_available(&self) -> Option<bool> {
        let _gate = self.enter();
        self.inner.is_available()
    }

    fn process_events(&self) -> Option<()> {
        let _gate = self.enter();
        self.inner.process_events()
    }

    fn swap_buffers(&self) -> EngineResult {
        let _gate = self.enter();
        self.inner.swap_buffers()
    }

    fn resize_window(&self, width: i32, height: i32, window: EngineWindowId) -> EngineResult {
        let _gate = self.enter();
        self.inner.resize_window(width, height, window)
    }

    fn window_size(&self, window: EngineWindowId) -> EngineResult<(i32, i32)> {
        let _gate = self.enter();
        self.inner.window_size(window)
    }

    fn set_content_scale(&self, scale: f32) -> EngineResult {
        let _gate = self.enter();
        self.inner.set_content_scale(scale)
    }

    fn key(&self, key: &KeyInput, window: EngineWindowId) -> EngineResult {
        let _gate = self.enter();
        self.inner.key(key, window)
    }

    fn touch_press(&self, touch: &TouchPress, window: EngineWindowId) -> EngineResult {
        let _gate = self.enter();
        self.inner.touch_press(touch, window)
    }

    fn touch_drag(&self, drag: &TouchDrag, window: EngineWindowId) -> EngineResult {
        let _gate = self.enter();
        self.inner.touch_drag(drag, window)
    }

    fn touches_canceled(&self, index: i32, window: EngineWindowId) -> EngineResult {
        let _gate = self.enter();
        self.inner.touches_canceled(index, window)
    }

    fn mouse_set_mode(&self, mode: PointerMode) -> EngineResult {
        let _gate = self.enter();
        self.inner.mouse_set_mode(mode)
    }

    fn window_set_title(&self, title: &str, window: EngineWindowId) -> EngineResult {
        let _gate = self.enter();
        self.inner.window_set_title(title, window)
    }

    fn make_current(&self, window: EngineWindowId) -> EngineResult {
        let _gate = self.enter();
        self.inner.make_current(window)
    }

    fn create_surface(&self, layer: u64) -> EngineResult<EngineSurfaceHandle> {
        let _gate = self.enter();
        self.inner.create_surface(layer)
    }

    fn set_native_surface(&self, surface: &EngineSurfaceHandle) -> EngineResult {
        let _gate = self.enter();
        self.inner.set_native_surface(surface)
    }

    fn create_window(&self, surface: &EngineSurfaceHandle) -> EngineResult<EngineWindowId> {
        let _gate = self.enter();
        self.inner.create_window(surface)
    }

    fn delete_window(&self, window: EngineWindowId) -> EngineResult {
        let _gate = self.enter();
        self.inner.delete_window(window)
    }

    fn destroy_surface(&self, surface: EngineSurfaceHandle) -> EngineResult {
        let _gate = self.enter();
        self.inner.destroy_surface(surface)
    }

    fn frame(&self) {
        let _gate = self.enter();
        self.inner.frame();
    }
}
