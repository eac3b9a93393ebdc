//! Clipper objects
//!
//! Surfaces only need to know whether one is attached and which window it
//! tracks; clip lists are left to the window system.

use std::sync::Mutex;

use crate::types::WindowHandle;

#[derive(Default)]
pub struct Clipper {
    flags: u32,
    window: Mutex<Option<WindowHandle>>,
}

impl Clipper {
    pub fn new(flags: u32) -> Self {
        Self { flags, window: Mutex::new(None) }
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn set_hwnd(&self, hwnd: Option<WindowHandle>) {
        *self.window.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = hwnd;
    }

    pub fn hwnd(&self) -> Option<WindowHandle> {
        *self.window.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
