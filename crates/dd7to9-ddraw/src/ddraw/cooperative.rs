//! SetCooperativeLevel
//!
//! Exclusive mode binds the process to one window. Another window may only
//! take it over once the first one is gone. The window that last set the
//! cooperative level also becomes the device window, unless a different
//! container already owns a live one.

use crate::context::DisplaySettings;
use crate::desc::CooperativeFlags;
use crate::error::{DdError, DdResult};
use crate::interface::InterfaceVersion;
use crate::types::WindowHandle;

use super::DirectDraw;

fn validate(flags: CooperativeFlags, hwnd_valid: bool) -> DdResult<()> {
    let exclusive = flags.contains(CooperativeFlags::EXCLUSIVE);
    let fullscreen = flags.contains(CooperativeFlags::FULLSCREEN);
    let normal = flags.contains(CooperativeFlags::NORMAL);

    let invalid = !(exclusive || normal)
        || (normal && flags.intersects(CooperativeFlags::ALLOWMODEX | CooperativeFlags::EXCLUSIVE))
        || exclusive != fullscreen
        || (flags.contains(CooperativeFlags::ALLOWMODEX) && !(exclusive && fullscreen))
        || flags.contains(CooperativeFlags::SETDEVICEWINDOW | CooperativeFlags::SETFOCUSWINDOW)
        || (exclusive && !hwnd_valid);
    if invalid {
        limit_warn!(100, "Invalid cooperative level flags {:?}", flags);
        return Err(DdError::InvalidParams);
    }
    Ok(())
}

impl DirectDraw {
    pub fn set_cooperative_level(&self, hwnd: WindowHandle, flags: CooperativeFlags) -> DdResult<()> {
        self.set_cooperative_level_as(hwnd, flags, self.version)
    }

    /// `version` decides the FPU default: versions up to 6 preserve it
    pub(crate) fn set_cooperative_level_as(
        &self,
        hwnd: WindowHandle,
        flags: CooperativeFlags,
        version: InterfaceVersion,
    ) -> DdResult<()> {
        self.live()?;
        let windows = self.ctx.windows();
        validate(flags, windows.is_window(hwnd))?;
        if flags.intersects(
            CooperativeFlags::CREATEDEVICEWINDOW | CooperativeFlags::SETDEVICEWINDOW | CooperativeFlags::SETFOCUSWINDOW,
        ) {
            not_implemented!("device and focus window cooperative flags");
        }
        tracing::debug!("SetCooperativeLevel {:?} {:?} on {:?}", hwnd, flags, self.id);

        self.ctx.with_state(|state| {
            let last_hwnd = state.display.hwnd;
            let last_fpu_preserve = state.device.fpu_preserve;
            let last_no_window_changes = state.device.no_window_changes;

            if flags.contains(CooperativeFlags::NORMAL) {
                let ours = state.exclusive_mode
                    && !hwnd.is_null()
                    && state.exclusive.hwnd == hwnd
                    && state.exclusive.set_by == Some(self.id);
                let orphaned = state.exclusive_mode && !windows.is_window(state.exclusive.hwnd);
                if ours || orphaned {
                    tracing::info!("Leaving exclusive mode on {:?}", state.exclusive.hwnd);
                    state.exclusive_mode = false;
                    state.exclusive = DisplaySettings::default();
                    windows.unwatch_destroy();
                }
            } else if flags.contains(CooperativeFlags::FULLSCREEN) {
                if state.exclusive_mode && state.exclusive.hwnd != hwnd && windows.is_window(state.exclusive.hwnd) {
                    limit_warn!(100, "Exclusive mode is already bound to {:?}", state.exclusive.hwnd);
                    return Err(DdError::HwndAlreadySet);
                }
                if state.exclusive.hwnd != hwnd {
                    state.exclusive = DisplaySettings::default();
                }
                state.exclusive_mode = true;
                state.exclusive.hwnd = hwnd;
                state.exclusive.set_by = Some(self.id);
                self.ctx.watch_exclusive_window(hwnd);
                tracing::info!("Entered exclusive mode on {:?}", hwnd);
            }

            let display = &state.display;
            let display_free = display.hwnd.is_null() || display.set_by.is_none() || display.set_by == Some(self.id);
            let exclusive_allows = !state.exclusive_mode || state.exclusive.hwnd == hwnd;
            if windows.is_window(hwnd) && ((exclusive_allows && display_free) || !windows.is_window(display.hwnd)) {
                state.display.hwnd = hwnd;
                state.display.set_by = Some(self.id);
            }

            if !(windows.is_window(state.display.hwnd) && state.display.hwnd == hwnd) {
                return Ok(());
            }
            let device = &mut state.device;
            device.allow_mode_x = flags.contains(CooperativeFlags::ALLOWMODEX);
            device.multithreaded = flags.contains(CooperativeFlags::MULTITHREADED);
            device.fpu_preserve = (flags.contains(CooperativeFlags::FPUPRESERVE) || version.number() <= 6)
                && !flags.contains(CooperativeFlags::FPUSETUP);
            device.no_window_changes = flags.contains(CooperativeFlags::NOWINDOWCHANGES);

            let changed = last_hwnd != hwnd
                || last_fpu_preserve != device.fpu_preserve
                || last_no_window_changes != device.no_window_changes;
            if changed && self.ctx.has_device() {
                self.ctx.create_device_locked(state)?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BehaviorFlags;
    use crate::context::testing::harness;
    use crate::context::CooperativeState;
    use std::sync::atomic::Ordering;

    const EXCLUSIVE: CooperativeFlags = CooperativeFlags::EXCLUSIVE.union(CooperativeFlags::FULLSCREEN);

    #[test]
    fn flag_combinations_are_validated() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let hwnd = h.windows.create_window(640, 480);
        let bad = [
            CooperativeFlags::empty(),
            CooperativeFlags::FULLSCREEN,
            CooperativeFlags::EXCLUSIVE,
            CooperativeFlags::NORMAL | CooperativeFlags::EXCLUSIVE | CooperativeFlags::FULLSCREEN,
            CooperativeFlags::NORMAL | CooperativeFlags::ALLOWMODEX,
            CooperativeFlags::NORMAL | CooperativeFlags::SETDEVICEWINDOW | CooperativeFlags::SETFOCUSWINDOW,
        ];
        for flags in bad {
            assert_eq!(dd.set_cooperative_level(hwnd, flags), Err(DdError::InvalidParams), "{:?}", flags);
        }
        assert_eq!(dd.set_cooperative_level(WindowHandle(0x7777), EXCLUSIVE), Err(DdError::InvalidParams));
        dd.set_cooperative_level(hwnd, EXCLUSIVE | CooperativeFlags::ALLOWMODEX).unwrap();
        dd.release();
    }

    #[test]
    fn exclusive_window_is_released_when_destroyed() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let first = h.windows.create_window(640, 480);
        let second = h.windows.create_window(640, 480);

        dd.set_cooperative_level(first, EXCLUSIVE).unwrap();
        assert_eq!(h.ctx.cooperative_state(), CooperativeState::ExclusivePending);
        assert_eq!(h.windows.watched_window(), Some(first));
        assert_eq!(dd.set_cooperative_level(second, EXCLUSIVE), Err(DdError::HwndAlreadySet));

        h.windows.destroy_window(first);
        assert_eq!(h.ctx.cooperative_state(), CooperativeState::Normal);
        assert_eq!(h.windows.watched_window(), None);

        dd.set_cooperative_level(second, EXCLUSIVE).unwrap();
        assert_eq!(h.ctx.lock_state().exclusive.hwnd, second);
        assert_eq!(h.ctx.lock_state().display.hwnd, second);
        dd.release();
    }

    #[test]
    fn normal_level_only_clears_own_exclusive_binding() {
        let h = harness();
        let a = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let b = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let hwnd = h.windows.create_window(640, 480);

        a.set_cooperative_level(hwnd, EXCLUSIVE).unwrap();
        b.set_cooperative_level(hwnd, CooperativeFlags::NORMAL).unwrap();
        assert!(h.ctx.lock_state().exclusive_mode);
        assert_eq!(h.ctx.lock_state().display.set_by, Some(a.inner().id()), "display stays with its owner");

        a.set_cooperative_level(hwnd, CooperativeFlags::NORMAL).unwrap();
        assert!(!h.ctx.lock_state().exclusive_mode);
        b.release();
        a.release();
    }

    #[test]
    fn releasing_the_owner_drops_exclusive_mode() {
        let h = harness();
        let a = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let b = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let hwnd = h.windows.create_window(640, 480);
        a.set_cooperative_level(hwnd, EXCLUSIVE).unwrap();
        a.release();
        assert_eq!(h.ctx.cooperative_state(), CooperativeState::Normal);
        b.release();
    }

    #[test]
    fn older_versions_preserve_the_fpu_by_default() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V4).unwrap();
        let hwnd = h.windows.create_window(640, 480);
        dd.set_cooperative_level(hwnd, CooperativeFlags::NORMAL).unwrap();
        h.ctx.ensure_device().unwrap();
        assert!(h.backend.stats.last_behavior().contains(BehaviorFlags::FPU_PRESERVE));

        dd.set_cooperative_level(hwnd, CooperativeFlags::NORMAL | CooperativeFlags::FPUSETUP).unwrap();
        assert!(!h.backend.stats.last_behavior().contains(BehaviorFlags::FPU_PRESERVE));
        assert_eq!(h.backend.stats.devices_created.load(Ordering::SeqCst), 2, "behavior change recreates");
        dd.release();
    }
}
