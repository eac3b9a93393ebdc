//! Window system seam
//!
//! The device container needs a handful of window queries, has to replay the
//! messages a real mode switch would send, and must notice when the window
//! holding exclusive mode goes away. `Win32Windows` does this with user32 and a
//! CBT hook; `HeadlessWindows` fakes it for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::types::{Rect, WindowHandle};

/// Called with the handle of a watched window that is being destroyed
pub type DestroyCallback = Arc<dyn Fn(WindowHandle) + Send + Sync>;

/// What changed when a device was (re)created
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceChangeNotice {
    /// Set when the emulated display mode changed: (bpp, width, height)
    pub display_changed: Option<(u32, u32, u32)>,
    /// New window rectangle in screen coordinates
    pub window_rect: Rect,
    /// Client size after the change
    pub client_size: (u32, u32),
}

/// Message synthesized after device creation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowMessage {
    DisplayChange { bpp: u32, width: u32, height: u32 },
    WindowPosChanging(Rect),
    Move { x: i32, y: i32 },
    Size { width: u32, height: u32 },
    WindowPosChanged(Rect),
    Activate,
    SetFocus,
}

/// The message sequence an application expects after a mode switch
pub fn device_change_messages(notice: &DeviceChangeNotice) -> Vec<WindowMessage> {
    let mut messages = Vec::with_capacity(7);
    if let Some((bpp, width, height)) = notice.display_changed {
        messages.push(WindowMessage::DisplayChange { bpp, width, height });
    }
    let rect = notice.window_rect;
    messages.push(WindowMessage::WindowPosChanging(rect));
    messages.push(WindowMessage::Move { x: rect.left, y: rect.top });
    messages.push(WindowMessage::Size { width: notice.client_size.0, height: notice.client_size.1 });
    messages.push(WindowMessage::WindowPosChanged(rect));
    messages.push(WindowMessage::Activate);
    messages.push(WindowMessage::SetFocus);
    messages
}

pub trait WindowSystem: Send + Sync {
    fn is_window(&self, hwnd: WindowHandle) -> bool;

    fn client_size(&self, hwnd: WindowHandle) -> Option<(u32, u32)>;

    /// Desktop size of the monitor holding `hwnd` (primary monitor for `None`)
    fn screen_size(&self, hwnd: Option<WindowHandle>) -> (u32, u32);

    fn refresh_rate(&self, hwnd: Option<WindowHandle>) -> u32;

    fn bit_count(&self, hwnd: Option<WindowHandle>) -> u32;

    /// Dispatch the post-creation message sequence to `hwnd`
    fn notify_device_change(&self, hwnd: WindowHandle, notice: &DeviceChangeNotice);

    /// Install a destroy watch on `hwnd`, replacing any previous watch
    fn watch_destroy(&self, hwnd: WindowHandle, callback: DestroyCallback);

    fn unwatch_destroy(&self);
}

struct HeadlessWindow {
    client: (u32, u32),
    messages: Vec<WindowMessage>,
}

#[derive(Default)]
struct HeadlessState {
    next: isize,
    windows: HashMap<WindowHandle, HeadlessWindow>,
    watch: Option<(WindowHandle, DestroyCallback)>,
}

/// In-memory windows for tests and headless hosts
pub struct HeadlessWindows {
    screen: (u32, u32),
    refresh_rate: u32,
    bit_count: u32,
    state: Mutex<HeadlessState>,
}

impl Default for HeadlessWindows {
    fn default() -> Self {
        Self::new(1024, 768)
    }
}

impl HeadlessWindows {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            screen: (width, height),
            refresh_rate: 60,
            bit_count: 32,
            state: Mutex::new(HeadlessState { next: 0x1000, ..Default::default() }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create_window(&self, width: u32, height: u32) -> WindowHandle {
        let mut state = self.state();
        state.next += 0x10;
        let hwnd = WindowHandle(state.next);
        state.windows.insert(hwnd, HeadlessWindow { client: (width, height), messages: Vec::new() });
        hwnd
    }

    /// Destroy a window, firing the destroy watch if it targets this window
    pub fn destroy_window(&self, hwnd: WindowHandle) {
        let callback = {
            let mut state = self.state();
            state.windows.remove(&hwnd);
            match &state.watch {
                Some((watched, callback)) if *watched == hwnd => Some(callback.clone()),
                _ => None,
            }
        };
        if let Some(callback) = callback {
            callback(hwnd);
        }
    }

    pub fn messages(&self, hwnd: WindowHandle) -> Vec<WindowMessage> {
        self.state().windows.get(&hwnd).map(|w| w.messages.clone()).unwrap_or_default()
    }

    pub fn watched_window(&self) -> Option<WindowHandle> {
        self.state().watch.as_ref().map(|(hwnd, _)| *hwnd)
    }
}

impl WindowSystem for HeadlessWindows {
    fn is_window(&self, hwnd: WindowHandle) -> bool {
        self.state().windows.contains_key(&hwnd)
    }

    fn client_size(&self, hwnd: WindowHandle) -> Option<(u32, u32)> {
        self.state().windows.get(&hwnd).map(|w| w.client)
    }

    fn screen_size(&self, _hwnd: Option<WindowHandle>) -> (u32, u32) {
        self.screen
    }

    fn refresh_rate(&self, _hwnd: Option<WindowHandle>) -> u32 {
        self.refresh_rate
    }

    fn bit_count(&self, _hwnd: Option<WindowHandle>) -> u32 {
        self.bit_count
    }

    fn notify_device_change(&self, hwnd: WindowHandle, notice: &DeviceChangeNotice) {
        let mut state = self.state();
        if let Some(window) = state.windows.get_mut(&hwnd) {
            window.client = notice.client_size;
            window.messages.extend(device_change_messages(notice));
        }
    }

    fn watch_destroy(&self, hwnd: WindowHandle, callback: DestroyCallback) {
        self.state().watch = Some((hwnd, callback));
    }

    fn unwatch_destroy(&self) {
        self.state().watch = None;
    }
}

#[cfg(windows)]
pub use win32::Win32Windows;

#[cfg(windows)]
mod win32 {
    use std::sync::Mutex;

    use windows::Win32::Foundation::{HWND, LPARAM, LRESULT, RECT, WPARAM};
    use windows::Win32::Graphics::Gdi::{
        GetDC, GetDeviceCaps, ReleaseDC, BITSPIXEL, GET_DEVICE_CAPS_INDEX, VREFRESH,
    };
    use windows::Win32::System::Threading::GetCurrentThreadId;
    use windows::Win32::UI::WindowsAndMessaging::{
        CallNextHookEx, GetClientRect, GetSystemMetrics, GetWindowThreadProcessId, IsWindow, SendMessageW,
        SetWindowsHookExW, UnhookWindowsHookEx, HCBT_DESTROYWND, HHOOK, SM_CXSCREEN, SM_CYSCREEN, WA_ACTIVE,
        WH_CBT, WINDOWPOS, WM_ACTIVATE, WM_DISPLAYCHANGE, WM_MOVE, WM_SETFOCUS, WM_SIZE, WM_WINDOWPOSCHANGED,
        WM_WINDOWPOSCHANGING,
    };

    use super::{device_change_messages, DestroyCallback, DeviceChangeNotice, WindowMessage, WindowSystem};
    use crate::types::WindowHandle;

    struct Watch {
        hwnd: WindowHandle,
        hook: isize,
        callback: DestroyCallback,
    }

    /// CBT hook procs get no context pointer, so the watch lives here
    static WATCH: Mutex<Option<Watch>> = Mutex::new(None);

    fn hwnd(handle: WindowHandle) -> HWND {
        HWND(handle.0 as *mut core::ffi::c_void)
    }

    fn make_lparam(low: i32, high: i32) -> LPARAM {
        LPARAM(((high as u32 & 0xFFFF) << 16 | (low as u32 & 0xFFFF)) as isize)
    }

    unsafe extern "system" fn cbt_hook_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
        if code == HCBT_DESTROYWND as i32 {
            let destroyed = WindowHandle(wparam.0 as isize);
            let callback = WATCH
                .lock()
                .ok()
                .and_then(|watch| watch.as_ref().filter(|w| w.hwnd == destroyed).map(|w| w.callback.clone()));
            if let Some(callback) = callback {
                callback(destroyed);
            }
        }
        CallNextHookEx(HHOOK::default(), code, wparam, lparam)
    }

    /// user32 backed window system
    #[derive(Default)]
    pub struct Win32Windows;

    impl Win32Windows {
        fn gdi_cap(&self, index: GET_DEVICE_CAPS_INDEX) -> u32 {
            unsafe {
                let dc = GetDC(HWND::default());
                let value = GetDeviceCaps(dc, index);
                ReleaseDC(HWND::default(), dc);
                value.max(0) as u32
            }
        }
    }

    impl WindowSystem for Win32Windows {
        fn is_window(&self, handle: WindowHandle) -> bool {
            !handle.is_null() && unsafe { IsWindow(hwnd(handle)).as_bool() }
        }

        fn client_size(&self, handle: WindowHandle) -> Option<(u32, u32)> {
            let mut rect = RECT::default();
            unsafe { GetClientRect(hwnd(handle), &mut rect) }.ok()?;
            Some(((rect.right - rect.left).max(0) as u32, (rect.bottom - rect.top).max(0) as u32))
        }

        fn screen_size(&self, _handle: Option<WindowHandle>) -> (u32, u32) {
            unsafe { (GetSystemMetrics(SM_CXSCREEN).max(0) as u32, GetSystemMetrics(SM_CYSCREEN).max(0) as u32) }
        }

        fn refresh_rate(&self, _handle: Option<WindowHandle>) -> u32 {
            self.gdi_cap(VREFRESH)
        }

        fn bit_count(&self, _handle: Option<WindowHandle>) -> u32 {
            self.gdi_cap(BITSPIXEL)
        }

        fn notify_device_change(&self, handle: WindowHandle, notice: &DeviceChangeNotice) {
            let target = hwnd(handle);
            let same_thread = unsafe { GetWindowThreadProcessId(target, None) == GetCurrentThreadId() };
            if !same_thread {
                tracing::debug!("Skipping window messages for {:?}: owned by another thread", handle);
                return;
            }

            for message in device_change_messages(notice) {
                unsafe {
                    match message {
                        WindowMessage::DisplayChange { bpp, width, height } => {
                            SendMessageW(target, WM_DISPLAYCHANGE, WPARAM(bpp as usize), make_lparam(width as i32, height as i32));
                        }
                        WindowMessage::WindowPosChanging(rect) | WindowMessage::WindowPosChanged(rect) => {
                            let mut pos = WINDOWPOS {
                                hwnd: target,
                                x: rect.left,
                                y: rect.top,
                                cx: rect.width() as i32,
                                cy: rect.height() as i32,
                                ..Default::default()
                            };
                            let msg = if matches!(message, WindowMessage::WindowPosChanging(_)) {
                                WM_WINDOWPOSCHANGING
                            } else {
                                WM_WINDOWPOSCHANGED
                            };
                            SendMessageW(target, msg, WPARAM(0), LPARAM(&mut pos as *mut WINDOWPOS as isize));
                        }
                        WindowMessage::Move { x, y } => {
                            SendMessageW(target, WM_MOVE, WPARAM(0), make_lparam(x, y));
                        }
                        WindowMessage::Size { width, height } => {
                            SendMessageW(target, WM_SIZE, WPARAM(0), make_lparam(width as i32, height as i32));
                        }
                        WindowMessage::Activate => {
                            SendMessageW(target, WM_ACTIVATE, WPARAM(WA_ACTIVE as usize), LPARAM(0));
                        }
                        WindowMessage::SetFocus => {
                            SendMessageW(target, WM_SETFOCUS, WPARAM(0), LPARAM(0));
                        }
                    }
                }
            }
        }

        fn watch_destroy(&self, handle: WindowHandle, callback: DestroyCallback) {
            self.unwatch_destroy();
            let thread = unsafe { GetWindowThreadProcessId(hwnd(handle), None) };
            match unsafe { SetWindowsHookExW(WH_CBT, Some(cbt_hook_proc), None, thread) } {
                Ok(hook) => {
                    if let Ok(mut watch) = WATCH.lock() {
                        *watch = Some(Watch { hwnd: handle, hook: hook.0 as isize, callback });
                    }
                }
                Err(err) => tracing::warn!("Failed to install window destroy hook: {}", err),
            }
        }

        fn unwatch_destroy(&self) {
            let previous = WATCH.lock().ok().and_then(|mut watch| watch.take());
            if let Some(previous) = previous {
                unsafe {
                    let _ = UnhookWindowsHookEx(HHOOK(previous.hook as *mut core::ffi::c_void));
                }
            }
        }
    }

}
