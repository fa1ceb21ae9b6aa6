// src/symbols/mod.rs
//! Symbol Table - runtime resolution of the engine's C entry points.
//!
//! Entry points are stored as raw addresses in one pointer-sized atomic slot
//! each. Writers (bulk resolution, per-entry overrides) store with `Release`;
//! callers load with `Acquire` and get either the latest address or nothing.
//! A call already in flight through an older address completes normally.
//!
//! ## Sources
//! - `resolve()` opens the first loadable candidate library, falling back to
//!   the symbols already loaded into the process.
//! - `override_symbol()` installs an address resolved by a loader outside the
//!   bridge, typically delivered over the command channel as an integer.

pub mod abi;


pub use abi::EntryPoint;

use crate::engine::{
    status, EngineApi, EngineCallError, EngineResult, EngineSurfaceHandle, EngineWindowId,
    KeyInput, PointerMode, TouchDrag, TouchPress,
};
use libc::c_int;
use libloading::Library;
use log::*;
use once_cell::sync::Lazy;
use std::ffi::CString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

static SHARED: Lazy<Arc<EntryPointTable>> = Lazy::new(|| Arc::new(EntryPointTable::new()));

/// Loads the slot for `$entry` and reinterprets it as the `$ty` fn pointer.
/// Evaluates to `None` (returned early via `?`) when the slot is empty.
macro_rules! entry_fn {
    ($table:expr, $entry:expr, $ty:ty) => {{
        let addr = $table.address($entry)?;
        // SAFETY: non-zero slot values are only written by `resolve` (the symbol
        // with this exact name) or `override_symbol` (an address the caller
        // vouches for), both of which must carry the `$ty` signature.
        unsafe { std::mem::transmute::<usize, $ty>(addr) }
    }};
}

/// Process-wide table of optional engine entry points.
pub struct EntryPointTable {
    slots: [AtomicUsize; EntryPoint::COUNT],
    // Opened libraries stay loaded for the life of the table so resolved
    // addresses never dangle.
    libraries: Mutex<Vec<Library>>,
}

impl Default for EntryPointTable {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryPointTable {
    /// An empty table: every entry point absent.
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| AtomicUsize::new(0)),
            libraries: Mutex::new(Vec::new()),
        }
    }

    /// The lazily created process-wide table.
    pub fn shared() -> Arc<EntryPointTable> {
        Arc::clone(&SHARED)
    }

    /// Resolves entry points from the first candidate library that opens.
    ///
    /// With `fallback_to_process`, symbols already present in the process
    /// (another component loaded the engine) are used when no candidate opens.
    /// Never fails: whatever could not be found simply stays absent. Returns
    /// the number of entry points found in this pass.
    pub fn resolve<S: AsRef<str>>(&self, candidates: &[S], fallback_to_process: bool) -> usize {
        let mut library = None;
        for name in candidates {
            let name = name.as_ref();
            match open_library(name) {
                Ok(lib) => {
                    info!("SymbolTable: Opened engine library '{}'", name);
                    library = Some(lib);
                    break;
                }
                Err(e) => debug!("SymbolTable: Could not open '{}': {}", name, e),
            }
        }

        if library.is_none() && fallback_to_process {
            match open_process() {
                Ok(lib) => {
                    info!("SymbolTable: No candidate library opened, using process symbols");
                    library = Some(lib);
                }
                Err(e) => warn!("SymbolTable: Process symbol lookup unavailable: {}", e),
            }
        }

        let Some(library) = library else {
            warn!("SymbolTable: No engine library found; entry points stay unavailable");
            return 0;
        };

        let found = self.resolve_from(&library);
        self.libraries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(library);
        info!(
            "SymbolTable: Resolved {}/{} entry points",
            found,
            EntryPoint::COUNT
        );
        found
    }

    fn resolve_from(&self, library: &Library) -> usize {
        let mut found = 0;
        for entry in EntryPoint::ALL {
            // SAFETY: the symbol is only read as an address here; it is called
            // later through the signature declared for this entry point.
            let symbol = unsafe { library.get::<unsafe extern "C" fn()>(entry.symbol().as_bytes()) };
            match symbol {
                Ok(f) => {
                    self.store(entry, *f as usize);
                    found += 1;
                }
                Err(_) => trace!("SymbolTable: {} not exported", entry.symbol()),
            }
        }
        found
    }

    /// Installs or replaces one entry point by raw address.
    ///
    /// Unknown names are ignored (returns `false`). An address of 0 clears the
    /// entry. Takes effect for the next call through that entry.
    pub fn override_symbol(&self, name: &str, address: u64) -> bool {
        let Some(entry) = EntryPoint::from_symbol(name) else {
            debug!("SymbolTable: Ignoring override for unknown symbol '{}'", name);
            return false;
        };
        let Ok(address) = usize::try_from(address) else {
            warn!(
                "SymbolTable: Address {:#x} for '{}' does not fit a pointer",
                address, name
            );
            return false;
        };
        self.store(entry, address);
        trace!("SymbolTable: {} -> {:#x}", name, address);
        true
    }

    /// Applies a batch of overrides, returning how many names were known.
    pub fn override_symbols<'a, I>(&self, overrides: I) -> usize
    where
        I: IntoIterator<Item = (&'a str, u64)>,
    {
        let applied = overrides
            .into_iter()
            .filter(|(name, address)| self.override_symbol(name, *address))
            .count();
        info!(
            "SymbolTable: Applied {} symbol overrides ({} entry points resolved)",
            applied,
            self.resolved_count()
        );
        applied
    }

    /// `true` only when the availability entry point exists and reports ready.
    pub fn is_engine_available(&self) -> bool {
        self.engine_ready()
    }

    pub fn is_resolved(&self, entry: EntryPoint) -> bool {
        self.address(entry).is_some()
    }

    pub fn resolved_count(&self) -> usize {
        EntryPoint::ALL
            .into_iter()
            .filter(|entry| self.is_resolved(*entry))
            .count()
    }

    fn store(&self, entry: EntryPoint, address: usize) {
        self.slots[entry.slot()].store(address, Ordering::Release);
    }

    fn address(&self, entry: EntryPoint) -> Option<usize> {
        match self.slots[entry.slot()].load(Ordering::Acquire) {
            0 => None,
            address => Some(address),
        }
    }
}

#[cfg(unix)]
fn open_library(name: &str) -> Result<Library, libloading::Error> {
    // SAFETY: loading runs the library's initialisers; the candidates are the
    // engine binaries this bridge is built to embed.
    unsafe { libloading::os::unix::Library::open(Some(name), libc::RTLD_NOW | libc::RTLD_GLOBAL) }
        .map(Library::from)
}

#[cfg(unix)]
fn open_process() -> Result<Library, libloading::Error> {
    Ok(libloading::os::unix::Library::this().into())
}

#[cfg(windows)]
fn open_library(name: &str) -> Result<Library, libloading::Error> {
    // SAFETY: see the unix variant.
    unsafe { Library::new(name) }
}

#[cfg(windows)]
fn open_process() -> Result<Library, libloading::Error> {
    libloading::os::windows::Library::this().map(Library::from)
}

impl EngineApi for EntryPointTable {
    fn is_available(&self) -> Option<bool> {
        let f = entry_fn!(self, EntryPoint::IsAvailable, abi::IsAvailableFn);
        // SAFETY: resolved entry point, no arguments.
        Some(unsafe { f() } == 1)
    }

    fn process_events(&self) -> Option<()> {
        let f = entry_fn!(self, EntryPoint::ProcessEvents, abi::ProcessEventsFn);
        // SAFETY: resolved entry point, no arguments.
        unsafe { f() };
        Some(())
    }

    fn swap_buffers(&self) -> EngineResult {
        let f = entry_fn!(self, EntryPoint::SwapBuffers, abi::SwapBuffersFn);
        // SAFETY: resolved entry point, no arguments.
        let code = unsafe { f() };
        Some(status(EntryPoint::SwapBuffers.symbol(), code))
    }

    fn resize_window(&self, width: i32, height: i32, window: EngineWindowId) -> EngineResult {
        let f = entry_fn!(self, EntryPoint::ResizeWindow, abi::ResizeWindowFn);
        // SAFETY: plain integer arguments.
        let code = unsafe { f(width, height, window.0) };
        Some(status(EntryPoint::ResizeWindow.symbol(), code))
    }

    fn window_size(&self, window: EngineWindowId) -> EngineResult<(i32, i32)> {
        let f = entry_fn!(self, EntryPoint::GetWindowSize, abi::GetWindowSizeFn);
        let mut width: c_int = 0;
        let mut height: c_int = 0;
        // SAFETY: both out-pointers reference live locals for the whole call.
        let code = unsafe { f(window.0, &mut width, &mut height) };
        Some(status(EntryPoint::GetWindowSize.symbol(), code).map(|()| (width, height)))
    }

    fn set_content_scale(&self, scale: f32) -> EngineResult {
        let f = entry_fn!(self, EntryPoint::SetContentScale, abi::SetContentScaleFn);
        // SAFETY: plain float argument.
        let code = unsafe { f(scale) };
        Some(status(EntryPoint::SetContentScale.symbol(), code))
    }

    fn key(&self, key: &KeyInput, window: EngineWindowId) -> EngineResult {
        let f = entry_fn!(self, EntryPoint::Key, abi::KeyFn);
        // SAFETY: plain integer arguments.
        let code = unsafe {
            f(
                key.keycode,
                key.char_code,
                key.unshifted,
                key.physical,
                key.modifiers,
                c_int::from(key.pressed),
                window.0,
            )
        };
        Some(status(EntryPoint::Key.symbol(), code))
    }

    fn touch_press(&self, touch: &TouchPress, window: EngineWindowId) -> EngineResult {
        let f = entry_fn!(self, EntryPoint::TouchPress, abi::TouchPressFn);
        // SAFETY: plain integer arguments.
        let code = unsafe {
            f(
                touch.index,
                touch.x,
                touch.y,
                c_int::from(touch.pressed),
                c_int::from(touch.double_click),
                window.0,
            )
        };
        Some(status(EntryPoint::TouchPress.symbol(), code))
    }

    fn touch_drag(&self, drag: &TouchDrag, window: EngineWindowId) -> EngineResult {
        let f = entry_fn!(self, EntryPoint::TouchDrag, abi::TouchDragFn);
        // SAFETY: plain integer and float arguments.
        let code = unsafe {
            f(
                drag.index,
                drag.prev_x,
                drag.prev_y,
                drag.x,
                drag.y,
                drag.pressure,
                drag.tilt_x,
                drag.tilt_y,
                window.0,
            )
        };
        Some(status(EntryPoint::TouchDrag.symbol(), code))
    }

    fn touches_canceled(&self, index: i32, window: EngineWindowId) -> EngineResult {
        let f = entry_fn!(self, EntryPoint::TouchesCanceled, abi::TouchesCanceledFn);
        // SAFETY: plain integer arguments.
        let code = unsafe { f(index, window.0) };
        Some(status(EntryPoint::TouchesCanceled.symbol(), code))
    }

    fn mouse_set_mode(&self, mode: PointerMode) -> EngineResult {
        let f = entry_fn!(self, EntryPoint::MouseSetMode, abi::MouseSetModeFn);
        // SAFETY: plain integer argument.
        let code = unsafe { f(mode as c_int) };
        Some(status(EntryPoint::MouseSetMode.symbol(), code))
    }

    fn window_set_title(&self, title: &str, window: EngineWindowId) -> EngineResult {
        let f = entry_fn!(self, EntryPoint::WindowSetTitle, abi::WindowSetTitleFn);
        let entry = EntryPoint::WindowSetTitle.symbol();
        let Ok(title) = CString::new(title) else {
            return Some(Err(EngineCallError::InvalidArgument { entry }));
        };
        // SAFETY: `title` is NUL-terminated and outlives the call.
        let code = unsafe { f(title.as_ptr(), window.0) };
        Some(status(entry, code))
    }

    fn make_current(&self, window: EngineWindowId) -> EngineResult {
        let f = entry_fn!(self, EntryPoint::MakeCurrent, abi::MakeCurrentFn);
        // SAFETY: plain integer argument.
        let code = unsafe { f(window.0) };
        Some(status(EntryPoint::MakeCurrent.symbol(), code))
    }

    fn create_surface(&self, layer: u64) -> EngineResult<EngineSurfaceHandle> {
        let f = entry_fn!(self, EntryPoint::NativeSurfaceCreate, abi::NativeSurfaceCreateFn);
        // SAFETY: the layer address belongs to a surface the caller keeps alive
        // until the returned handle is destroyed.
        let raw = unsafe { f(layer) };
        Some(EngineSurfaceHandle::from_raw(raw).ok_or(EngineCallError::NullHandle {
            entry: EntryPoint::NativeSurfaceCreate.symbol(),
        }))
    }

    fn set_native_surface(&self, surface: &EngineSurfaceHandle) -> EngineResult {
        let f = entry_fn!(self, EntryPoint::SetNativeSurface, abi::SetNativeSurfaceFn);
        // SAFETY: the handle was produced by the engine and has not been destroyed.
        let code = unsafe { f(surface.as_ptr()) };
        Some(status(EntryPoint::SetNativeSurface.symbol(), code))
    }

    fn create_window(&self, surface: &EngineSurfaceHandle) -> EngineResult<EngineWindowId> {
        let f = entry_fn!(self, EntryPoint::CreateNativeWindow, abi::CreateNativeWindowFn);
        let mut window: c_int = 0;
        // SAFETY: live engine handle; the out-pointer references a local.
        let code = unsafe { f(surface.as_ptr(), &mut window) };
        Some(status(EntryPoint::CreateNativeWindow.symbol(), code).map(|()| EngineWindowId(window)))
    }

    fn delete_window(&self, window: EngineWindowId) -> EngineResult {
        let f = entry_fn!(self, EntryPoint::DeleteWindow, abi::DeleteWindowFn);
        // SAFETY: plain integer argument.
        let code = unsafe { f(window.0) };
        Some(status(EntryPoint::DeleteWindow.symbol(), code))
    }

    fn destroy_surface(&self, surface: EngineSurfaceHandle) -> EngineResult {
        let f = entry_fn!(self, EntryPoint::NativeSurfaceDestroy, abi::NativeSurfaceDestroyFn);
        // SAFETY: the handle is consumed here and never used again.
        let code = unsafe { f(surface.as_ptr()) };
        Some(status(EntryPoint::NativeSurfaceDestroy.symbol(), code))
    }
}
