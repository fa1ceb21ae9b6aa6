// src/symbols/abi.rs
//! C signatures and symbol names of the engine's embedded display server API.
//!
//! Every function returns 0 on success and a negative code on failure unless
//! noted otherwise. All of them are no-ops on the engine side while its
//! embedded display server singleton does not exist yet.

use libc::{c_char, c_float, c_int, c_uint, c_void};

pub type IsAvailableFn = unsafe extern "C" fn() -> c_int;
pub type ProcessEventsFn = unsafe extern "C" fn();
pub type SwapBuffersFn = unsafe extern "C" fn() -> c_int;
pub type ResizeWindowFn = unsafe extern "C" fn(c_int, c_int, c_int) -> c_int;
pub type GetWindowSizeFn = unsafe extern "C" fn(c_int, *mut c_int, *mut c_int) -> c_int;
pub type SetContentScaleFn = unsafe extern "C" fn(c_float) -> c_int;
/// `(key, char_code, unshifted_key, physical_key, modifiers, pressed, window_id)`
pub type KeyFn = unsafe extern "C" fn(c_int, c_uint, c_int, c_int, c_uint, c_int, c_int) -> c_int;
/// `(index, x, y, pressed, double_click, window_id)`
pub type TouchPressFn = unsafe extern "C" fn(c_int, c_int, c_int, c_int, c_int, c_int) -> c_int;
/// `(index, prev_x, prev_y, x, y, pressure, tilt_x, tilt_y, window_id)`
pub type TouchDragFn = unsafe extern "C" fn(
    c_int,
    c_int,
    c_int,
    c_int,
    c_int,
    c_float,
    c_float,
    c_float,
    c_int,
) -> c_int;
pub type TouchesCanceledFn = unsafe extern "C" fn(c_int, c_int) -> c_int;
pub type MouseSetModeFn = unsafe extern "C" fn(c_int) -> c_int;
pub type WindowSetTitleFn = unsafe extern "C" fn(*const c_char, c_int) -> c_int;
pub type MakeCurrentFn = unsafe extern "C" fn(c_int) -> c_int;
pub type SetNativeSurfaceFn = unsafe extern "C" fn(*mut c_void) -> c_int;
pub type CreateNativeWindowFn = unsafe extern "C" fn(*mut c_void, *mut c_int) -> c_int;
pub type DeleteWindowFn = unsafe extern "C" fn(c_int) -> c_int;
/// Wraps a native layer address; returns null on failure.
pub type NativeSurfaceCreateFn = unsafe extern "C" fn(u64) -> *mut c_void;
pub type NativeSurfaceDestroyFn = unsafe extern "C" fn(*mut c_void) -> c_int;

/// Named entry points of the engine ABI.
///
/// The discriminant doubles as the slot index inside
/// [`EntryPointTable`](super::EntryPointTable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    IsAvailable,
    ProcessEvents,
    SwapBuffers,
    ResizeWindow,
    GetWindowSize,
    SetContentScale,
    Key,
    TouchPress,
    TouchDrag,
    TouchesCanceled,
    MouseSetMode,
    WindowSetTitle,
    MakeCurrent,
    SetNativeSurface,
    CreateNativeWindow,
    DeleteWindow,
    NativeSurfaceCreate,
    NativeSurfaceDestroy,
}

impl EntryPoint {
    pub const COUNT: usize = 18;

    pub const ALL: [EntryPoint; Self::COUNT] = [
        EntryPoint::IsAvailable,
        EntryPoint::ProcessEvents,
        EntryPoint::SwapBuffers,
        EntryPoint::ResizeWindow,
        EntryPoint::GetWindowSize,
        EntryPoint::SetContentScale,
        EntryPoint::Key,
        EntryPoint::TouchPress,
        EntryPoint::TouchDrag,
        EntryPoint::TouchesCanceled,
        EntryPoint::MouseSetMode,
        EntryPoint::WindowSetTitle,
        EntryPoint::MakeCurrent,
        EntryPoint::SetNativeSurface,
        EntryPoint::CreateNativeWindow,
        EntryPoint::DeleteWindow,
        EntryPoint::NativeSurfaceCreate,
        EntryPoint::NativeSurfaceDestroy,
    ];

    /// The exported C symbol name.
    pub const fn symbol(self) -> &'static str {
        match self {
            EntryPoint::IsAvailable => "libgodot_display_server_embedded_is_available",
            EntryPoint::ProcessEvents => "libgodot_display_server_embedded_process_events",
            EntryPoint::SwapBuffers => "libgodot_display_server_embedded_swap_buffers",
            EntryPoint::ResizeWindow => "libgodot_display_server_embedded_resize_window",
            EntryPoint::GetWindowSize => "libgodot_display_server_embedded_get_window_size",
            EntryPoint::SetContentScale => "libgodot_display_server_embedded_set_content_scale",
            EntryPoint::Key => "libgodot_display_server_embedded_key",
            EntryPoint::TouchPress => "libgodot_display_server_embedded_touch_press",
            EntryPoint::TouchDrag => "libgodot_display_server_embedded_touch_drag",
            EntryPoint::TouchesCanceled => "libgodot_display_server_embedded_touches_canceled",
            EntryPoint::MouseSetMode => "libgodot_display_server_embedded_mouse_set_mode",
            EntryPoint::WindowSetTitle => "libgodot_display_server_embedded_window_set_title",
            EntryPoint::MakeCurrent => "libgodot_display_server_embedded_gl_window_make_current",
            EntryPoint::SetNativeSurface => "libgodot_display_server_embedded_set_native_surface",
            EntryPoint::CreateNativeWindow => {
                "libgodot_display_server_embedded_create_native_window"
            }
            EntryPoint::DeleteWindow => "libgodot_display_server_embedded_delete_window",
            EntryPoint::NativeSurfaceCreate => "libgodot_rendering_native_surface_apple_create",
            EntryPoint::NativeSurfaceDestroy => "libgodot_rendering_native_surface_apple_destroy",
        }
    }

    pub fn from_symbol(name: &str) -> Option<EntryPoint> {
        Self::ALL.into_iter().find(|entry| entry.symbol() == name)
    }

    pub(crate) const fn slot(self) -> usize {
        self as usize
    }
}
