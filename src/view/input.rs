// src/view/input.rs

//! Host input events and their translation into the engine's layout.

use crate::engine::{KeyInput, TouchDrag, TouchPress};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Host keyboard modifiers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Modifiers: u8 {
        const SHIFT = 1 << 0;
        const CONTROL = 1 << 1;
        const ALT = 1 << 2; // Option on macOS
        const SUPER = 1 << 3; // Command on macOS
        const CAPS_LOCK = 1 << 4;
        const NUM_LOCK = 1 << 5;
    }
}

// Engine KeyModifierMask bits.
pub const ENGINE_MASK_SHIFT: u32 = 1 << 25;
pub const ENGINE_MASK_ALT: u32 = 1 << 26;
pub const ENGINE_MASK_META: u32 = 1 << 27;
pub const ENGINE_MASK_CTRL: u32 = 1 << 28;

impl Modifiers {
    /// Lock keys have no engine modifier bit and are dropped.
    pub fn engine_mask(self) -> u32 {
        let mut mask = 0;
        if self.contains(Modifiers::SHIFT) {
            mask |= ENGINE_MASK_SHIFT;
        }
        if self.contains(Modifiers::ALT) {
            mask |= ENGINE_MASK_ALT;
        }
        if self.contains(Modifiers::SUPER) {
            mask |= ENGINE_MASK_META;
        }
        if self.contains(Modifiers::CONTROL) {
            mask |= ENGINE_MASK_CTRL;
        }
        mask
    }
}

/// A key press or release as the host reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    /// Logical key code.
    pub keycode: i32,
    /// Text produced by the key, if any.
    pub text: Option<char>,
    /// Logical key code ignoring modifiers; 0 means "same as `keycode`".
    #[serde(default)]
    pub unshifted: i32,
    /// Hardware scan code.
    pub physical: i32,
    #[serde(default)]
    pub modifiers: Modifiers,
    pub pressed: bool,
}

impl KeyEvent {
    pub fn to_engine(&self) -> KeyInput {
        KeyInput {
            keycode: self.keycode,
            char_code: self.text.map_or(0, u32::from),
            unshifted: if self.unshifted == 0 {
                self.keycode
            } else {
                self.unshifted
            },
            physical: self.physical,
            modifiers: self.modifiers.engine_mask(),
            pressed: self.pressed,
        }
    }
}

/// Pointer input in logical view coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PointerEvent {
    Down {
        index: i32,
        x: f64,
        y: f64,
        double_click: bool,
    },
    Up {
        index: i32,
        x: f64,
        y: f64,
    },
    Moved {
        index: i32,
        prev_x: f64,
        prev_y: f64,
        x: f64,
        y: f64,
        pressure: f32,
    },
    Cancelled {
        index: i32,
    },
}

/// A pointer event ready for the engine's touch entry points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineTouch {
    Press(TouchPress),
    Drag(TouchDrag),
    Cancel(i32),
}

fn to_px(points: f64, scale: f64) -> i32 {
    (points * scale).round() as i32
}

impl PointerEvent {
    /// Converts to engine pixels at the given display scale.
    pub fn to_engine(&self, scale: f64) -> EngineTouch {
        match *self {
            PointerEvent::Down {
                index,
                x,
                y,
                double_click,
            } => EngineTouch::Press(TouchPress {
                index,
                x: to_px(x, scale),
                y: to_px(y, scale),
                pressed: true,
                double_click,
            }),
            PointerEvent::Up { index, x, y } => EngineTouch::Press(TouchPress {
                index,
                x: to_px(x, scale),
                y: to_px(y, scale),
                pressed: false,
                double_click: false,
            }),
            PointerEvent::Moved {
                index,
                prev_x,
                prev_y,
                x,
                y,
                pressure,
            } => EngineTouch::Drag(TouchDrag {
                index,
                prev_x: to_px(prev_x, scale),
                prev_y: to_px(prev_y, scale),
                x: to_px(x, scale),
                y: to_px(y, scale),
                pressure,
                tilt_x: 0.0,
                tilt_y: 0.0,
            }),
            PointerEvent::Cancelled { index } => EngineTouch::Cancel(index),
        }
    }
}
