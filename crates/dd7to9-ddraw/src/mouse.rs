//! Cursor clamp
//!
//! When the back buffer is forced to a different size than the display mode
//! the game asked for, the cursor can wander outside the area the game
//! believes is the screen. A low-level mouse hook spots such moves and a
//! companion thread puts the cursor back, since a hook proc cannot move the
//! cursor itself.

use std::sync::Mutex;

use crate::types::WindowHandle;

/// Geometry the clamp works from, published by the device path
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClampArea {
    /// Display mode set by the game
    pub display: (u32, u32),
    /// Back buffer size of the device
    pub device: (u32, u32),
    pub windowed: bool,
    pub hwnd: WindowHandle,
}

static AREA: Mutex<Option<ClampArea>> = Mutex::new(None);

/// Publish the geometry used by the hook, `None` disables clamping
pub fn set_clamp_area(area: Option<ClampArea>) {
    *AREA.lock().unwrap_or_else(|p| p.into_inner()) = area;
}

pub fn clamp_area() -> Option<ClampArea> {
    *AREA.lock().unwrap_or_else(|p| p.into_inner())
}

/// Where the cursor has to go, or `None` if it may stay
pub fn clamp_cursor(area: &ClampArea, cursor: (i32, i32)) -> Option<(i32, i32)> {
    let (dw, dh) = area.display;
    let (bw, bh) = area.device;
    if area.windowed || dw == 0 || dh == 0 || bw == 0 || bh == 0 || dw == bw || dh == bh {
        return None;
    }
    let clamped = (cursor.0.min(dw as i32 - 1), cursor.1.min(dh as i32 - 1));
    (clamped != cursor).then_some(clamped)
}

#[cfg(windows)]
pub use hook::MouseHook;

#[cfg(windows)]
mod hook {
    use std::ffi::c_void;
    use std::sync::atomic::{AtomicPtr, Ordering};
    use std::sync::mpsc::{channel, Sender};
    use std::sync::Mutex;
    use std::thread::JoinHandle;

    use windows::Win32::Foundation::{HWND, LPARAM, LRESULT, POINT, WPARAM};
    use windows::Win32::UI::WindowsAndMessaging::{
        CallNextHookEx, GetCursorPos, IsIconic, IsWindow, SetCursorPos, SetWindowsHookExW, UnhookWindowsHookEx,
        HC_ACTION, HHOOK, WH_MOUSE_LL, WM_MOUSEMOVE,
    };

    use super::{clamp_area, clamp_cursor};

    static HOOK_HANDLE: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());
    static MOVES: Mutex<Option<Sender<(i32, i32)>>> = Mutex::new(None);

    unsafe extern "system" fn mouse_hook_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
        if code == HC_ACTION as i32 && wparam.0 == WM_MOUSEMOVE as usize {
            if let Some(area) = clamp_area() {
                let window = HWND(area.hwnd.0 as *mut c_void);
                let mut point = POINT::default();
                if IsWindow(window).as_bool() && !IsIconic(window).as_bool() && GetCursorPos(&mut point).is_ok() {
                    if let Some(target) = clamp_cursor(&area, (point.x, point.y)) {
                        if let Ok(moves) = MOVES.lock() {
                            if let Some(sender) = moves.as_ref() {
                                let _ = sender.send(target);
                            }
                        }
                    }
                }
            }
        }
        CallNextHookEx(HHOOK::default(), code, wparam, lparam)
    }

    /// Installed hook plus its clamp thread; dropping it removes both
    pub struct MouseHook {
        thread: Option<JoinHandle<()>>,
    }

    impl MouseHook {
        pub fn install() -> Option<MouseHook> {
            if !HOOK_HANDLE.load(Ordering::SeqCst).is_null() {
                return None;
            }

            let (sender, receiver) = channel::<(i32, i32)>();
            let thread = std::thread::Builder::new()
                .name("dd7to9-mouse-clamp".to_string())
                .spawn(move || {
                    while let Ok((x, y)) = receiver.recv() {
                        unsafe {
                            let _ = SetCursorPos(x, y);
                        }
                    }
                });
            let thread = match thread {
                Ok(thread) => thread,
                Err(err) => {
                    tracing::warn!("Failed to start cursor clamp thread: {}", err);
                    return None;
                }
            };
            if let Ok(mut moves) = MOVES.lock() {
                *moves = Some(sender);
            }

            match unsafe { SetWindowsHookExW(WH_MOUSE_LL, Some(mouse_hook_proc), None, 0) } {
                Ok(hook) => {
                    HOOK_HANDLE.store(hook.0, Ordering::SeqCst);
                    tracing::info!("Hooking mouse cursor");
                    Some(MouseHook { thread: Some(thread) })
                }
                Err(err) => {
                    tracing::warn!("Failed to install mouse hook: {}", err);
                    let mut hook = MouseHook { thread: Some(thread) };
                    hook.shutdown();
                    None
                }
            }
        }

        fn shutdown(&mut self) {
            let handle = HOOK_HANDLE.swap(std::ptr::null_mut(), Ordering::SeqCst);
            if !handle.is_null() {
                unsafe {
                    let _ = UnhookWindowsHookEx(HHOOK(handle));
                }
            }
            // Dropping the sender ends the clamp thread
            if let Ok(mut moves) = MOVES.lock() {
                moves.take();
            }
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
        }
    }

    impl Drop for MouseHook {
        fn drop(&mut self) {
            self.shutdown();
        }
    }
}
