use crate::engine::{
    EngineApi, EngineCallError, EngineResult, EngineSurfaceHandle, EngineWindowId, KeyInput,
    PointerMode, TouchDrag, TouchPress,
};
use crate::symbols::EntryPoint;
use std::collections::HashSet;
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

const FIRST_HANDLE: usize = 0x1000;
const FIRST_WINDOW: i32 = 1;

/// A call received by the MockEngine, in the order it arrived.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    IsAvailable,
    ProcessEvents,
    SwapBuffers,
    ResizeWindow {
        width: i32,
        height: i32,
        window: EngineWindowId,
    },
    WindowSize(EngineWindowId),
    SetContentScale(f32),
    Key(KeyInput, EngineWindowId),
    TouchPress(TouchPress, EngineWindowId),
    TouchDrag(TouchDrag, EngineWindowId),
    TouchesCanceled(i32, EngineWindowId),
    MouseSetMode(PointerMode),
    WindowSetTitle(String, EngineWindowId),
    MakeCurrent(EngineWindowId),
    CreateSurface { layer: u64 },
    SetNativeSurface { handle: usize },
    CreateWindow { handle: usize },
    DeleteWindow(EngineWindowId),
    DestroySurface { handle: usize },
}

#[derive(Default)]
struct Script {
    missing: HashSet<EntryPoint>,
    fail_surface_creates: u32,
    fail_set_surface: u32,
    fail_create_window: u32,
    fail_make_current: u32,
    fail_resize: u32,
    frame_delay: Duration,
}

#[derive(Default)]
struct Record {
    calls: Vec<EngineCall>,
    frame_spans: Vec<(Instant, Instant)>,
    next_handle: usize,
    next_window: i32,
}

/// Scriptable engine double that records every call it receives.
///
/// Starts with every entry point present and availability `false`.
pub struct MockEngine {
    available: AtomicBool,
    script: Mutex<Script>,
    record: Mutex<Record>,
    active_frames: AtomicUsize,
    max_concurrent_frames: AtomicUsize,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(false),
            script: Mutex::new(Script::default()),
            record: Mutex::new(Record {
                next_handle: FIRST_HANDLE,
                next_window: FIRST_WINDOW,
                ..Record::default()
            }),
            active_frames: AtomicUsize::new(0),
            max_concurrent_frames: AtomicUsize::new(0),
        }
    }

    /// A mock that already reports ready.
    #[must_use]
    pub fn available() -> Self {
        let engine = Self::new();
        engine.set_available(true);
        engine
    }

    /// Removes entry points, as if the engine build did not export them.
    #[must_use]
    pub fn without(self, entries: &[EntryPoint]) -> Self {
        self.script().missing.extend(entries.iter().copied());
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn fail_next_surface_creates(&self, count: u32) {
        self.script().fail_surface_creates = count;
    }

    pub fn fail_next_set_surface(&self, count: u32) {
        self.script().fail_set_surface = count;
    }

    pub fn fail_next_create_window(&self, count: u32) {
        self.script().fail_create_window = count;
    }

    pub fn fail_next_make_current(&self, count: u32) {
        self.script().fail_make_current = count;
    }

    /// Makes every `process_events` call take at least `delay`.
    pub fn fail_next_resizes(&self, count: u32) {
        self.script().fail_resize = count;
    }

    pub fn set_frame_delay(&self, delay: Duration) {
        self.script().frame_delay = delay;
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.record().calls.clone()
    }

    pub fn count(&self, predicate: impl Fn(&EngineCall) -> bool) -> usize {
        self.record().calls.iter().filter(|call| predicate(call)).count()
    }

    /// Calls other than availability probes and frame work.
    pub fn control_calls(&self) -> Vec<EngineCall> {
        self.record()
            .calls
            .iter()
            .filter(|call| {
                !matches!(
                    call,
                    EngineCall::IsAvailable | EngineCall::ProcessEvents | EngineCall::SwapBuffers
                )
            })
            .cloned()
            .collect()
    }

    pub fn frames(&self) -> usize {
        self.count(|call| matches!(call, EngineCall::ProcessEvents))
    }

    /// Start/end instants of every `process_events` call.
    pub fn frame_spans(&self) -> Vec<(Instant, Instant)> {
        self.record().frame_spans.clone()
    }

    pub fn max_concurrent_frames(&self) -> usize {
        self.max_concurrent_frames.load(Ordering::SeqCst)
    }

    pub fn clear_calls(&self) {
        self.record().calls.clear();
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self) -> MutexGuard<'_, Record> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn has(&self, entry: EntryPoint) -> Option<()> {
        (!self.script().missing.contains(&entry)).then_some(())
    }

    fn push(&self, call: EngineCall) {
        self.record().calls.push(call);
    }

    /// Consumes one scripted failure from the counter picked by `pick`.
    fn take_failure(&self, pick: impl Fn(&mut Script) -> &mut u32) -> bool {
        let mut script = self.script();
        let remaining = pick(&mut *script);
        if *remaining > 0 {
            *remaining -= 1;
            true
        } else {
            false
        }
    }

    fn scripted(
        &self,
        entry: EntryPoint,
        pick: impl Fn(&mut Script) -> &mut u32,
    ) -> Result<(), EngineCallError> {
        if self.take_failure(pick) {
            Err(EngineCallError::Failed {
                entry: entry.symbol(),
                code: -1,
            })
        } else {
            Ok(())
        }
    }
}

impl EngineApi for MockEngine {
    fn is_available(&self) -> Option<bool> {
        self.has(EntryPoint::IsAvailable)?;
        self.push(EngineCall::IsAvailable);
        Some(self.available.load(Ordering::SeqCst))
    }

    fn process_events(&self) -> Option<()> {
        self.has(EntryPoint::ProcessEvents)?;
        let delay = self.script().frame_delay;

        let active = self.active_frames.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_frames.fetch_max(active, Ordering::SeqCst);
        let start = Instant::now();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        let end = Instant::now();
        self.active_frames.fetch_sub(1, Ordering::SeqCst);

        let mut record = self.record();
        record.calls.push(EngineCall::ProcessEvents);
        record.frame_spans.push((start, end));
        Some(())
    }

    fn swap_buffers(&self) -> EngineResult {
        self.has(EntryPoint::SwapBuffers)?;
        self.push(EngineCall::SwapBuffers);
        Some(Ok(()))
    }

    fn resize_window(&self, width: i32, height: i32, window: EngineWindowId) -> EngineResult {
        self.has(EntryPoint::ResizeWindow)?;
        self.push(EngineCall::ResizeWindow {
            width,
            height,
            window,
        });
        Some(self.scripted(EntryPoint::ResizeWindow, |s| &mut s.fail_resize))
    }

    fn window_size(&self, window: EngineWindowId) -> EngineResult<(i32, i32)> {
        self.has(EntryPoint::GetWindowSize)?;
        self.push(EngineCall::WindowSize(window));
        let last = self.record().calls.iter().rev().find_map(|call| match call {
            EngineCall::ResizeWindow { width, height, .. } => Some((*width, *height)),
            _ => None,
        });
        Some(Ok(last.unwrap_or((0, 0))))
    }

    fn set_content_scale(&self, scale: f32) -> EngineResult {
        self.has(EntryPoint::SetContentScale)?;
        self.push(EngineCall::SetContentScale(scale));
        Some(Ok(()))
    }

    fn key(&self, key: &KeyInput, window: EngineWindowId) -> EngineResult {
        self.has(EntryPoint::Key)?;
        self.push(EngineCall::Key(*key, window));
        Some(Ok(()))
    }

    fn touch_press(&self, touch: &TouchPress, window: EngineWindowId) -> EngineResult {
        self.has(EntryPoint::TouchPress)?;
        self.push(EngineCall::TouchPress(*touch, window));
        Some(Ok(()))
    }

    fn touch_drag(&self, drag: &TouchDrag, window: EngineWindowId) -> EngineResult {
        self.has(EntryPoint::TouchDrag)?;
        self.push(EngineCall::TouchDrag(*drag, window));
        Some(Ok(()))
    }

    fn touches_canceled(&self, index: i32, window: EngineWindowId) -> EngineResult {
        self.has(EntryPoint::TouchesCanceled)?;
        self.push(EngineCall::TouchesCanceled(index, window));
        Some(Ok(()))
    }

    fn mouse_set_mode(&self, mode: PointerMode) -> EngineResult {
        self.has(EntryPoint::MouseSetMode)?;
        self.push(EngineCall::MouseSetMode(mode));
        Some(Ok(()))
    }

    fn window_set_title(&self, title: &str, window: EngineWindowId) -> EngineResult {
        self.has(EntryPoint::WindowSetTitle)?;
        self.push(EngineCall::WindowSetTitle(title.to_string(), window));
        Some(Ok(()))
    }

    fn make_current(&self, window: EngineWindowId) -> EngineResult {
        self.has(EntryPoint::MakeCurrent)?;
        self.push(EngineCall::MakeCurrent(window));
        Some(self.scripted(EntryPoint::MakeCurrent, |s| &mut s.fail_make_current))
    }

    fn create_surface(&self, layer: u64) -> EngineResult<EngineSurfaceHandle> {
        self.has(EntryPoint::NativeSurfaceCreate)?;
        self.push(EngineCall::CreateSurface { layer });
        if self.take_failure(|s| &mut s.fail_surface_creates) {
            return Some(Err(EngineCallError::NullHandle {
                entry: EntryPoint::NativeSurfaceCreate.symbol(),
            }));
        }
        let mut record = self.record();
        let address = record.next_handle;
        record.next_handle += 0x10;
        Some(
            EngineSurfaceHandle::from_raw(address as *mut c_void).ok_or(
                EngineCallError::NullHandle {
                    entry: EntryPoint::NativeSurfaceCreate.symbol(),
                },
            ),
        )
    }

    fn set_native_surface(&self, surface: &EngineSurfaceHandle) -> EngineResult {
        self.has(EntryPoint::SetNativeSurface)?;
        self.push(EngineCall::SetNativeSurface {
            handle: surface.as_ptr() as usize,
        });
        Some(self.scripted(EntryPoint::SetNativeSurface, |s| &mut s.fail_set_surface))
    }

    fn create_window(&self, surface: &EngineSurfaceHandle) -> EngineResult<EngineWindowId> {
        self.has(EntryPoint::CreateNativeWindow)?;
        self.push(EngineCall::CreateWindow {
            handle: surface.as_ptr() as usize,
        });
        if let Err(e) = self.scripted(EntryPoint::CreateNativeWindow, |s| {
            &mut s.fail_create_window
        }) {
            return Some(Err(e));
        }
        let mut record = self.record();
        let window = EngineWindowId(record.next_window);
        record.next_window += 1;
        Some(Ok(window))
    }

    fn delete_window(&self, window: EngineWindowId) -> EngineResult {
        self.has(EntryPoint::DeleteWindow)?;
        self.push(EngineCall::DeleteWindow(window));
        Some(Ok(()))
    }

    fn destroy_surface(&self, surface: EngineSurfaceHandle) -> EngineResult {
        self.has(EntryPoint::NativeSurfaceDestroy)?;
        self.push(EngineCall::DestroySurface {
            handle: surface.as_ptr() as usize,
        });
        Some(Ok(()))
    }
}
