//! GetDC and ReleaseDC
//!
//! Device contexts always come from the emulated bitmap. Surfaces that work
//! out of the texture borrow a pooled bitmap for the duration.

use crate::error::{DdError, DdResult};
use crate::types::DeviceContext;

use super::{Representation, Surface, SurfaceState};

impl Surface {
    fn sync_color_table(state: &mut SurfaceState) {
        let (Some(emu), Some(palette)) = (state.emu.as_mut(), state.palette.as_ref()) else {
            return;
        };
        let usn = palette.usn();
        if emu.last_palette_usn != usn {
            emu.set_color_table(&palette.entries(), usn);
        }
    }

    pub fn get_dc(&self) -> DdResult<DeviceContext> {
        self.ctx.ensure_device()?;
        let mut state = self.live_state()?;
        if state.dc_out {
            return Err(DdError::DcAlreadyCreated);
        }
        if state.lock.is_some() {
            return Err(DdError::SurfaceBusy);
        }
        if state.format.is_compressed() || state.format.is_depth() {
            return Err(DdError::Unsupported);
        }

        if !self.uses_emulation_for(state.format) {
            let mut slot = self.ctx.lock_device();
            let dev = slot.as_mut().ok_or(DdError::Generic)?;
            self.sync_emu(&mut state, dev.as_mut())?;
            state.representation = Representation::Emulated;
        } else {
            self.ensure_emu(&mut state)?;
        }
        Self::sync_color_table(&mut state);

        let dc = state.emu.as_ref().map(|emu| emu.dc()).ok_or(DdError::Generic)?;
        state.dc_out = true;
        Ok(dc)
    }

    pub fn release_dc(&self, _dc: DeviceContext) -> DdResult<()> {
        let mut state = self.live_state()?;
        if !state.dc_out {
            return Err(DdError::NoDc);
        }
        state.dc_out = false;

        if !self.uses_emulation_for(state.format) {
            let mut slot = self.ctx.lock_device();
            if let Some(dev) = slot.as_mut() {
                if let Err(err) = self.sync_texture(&mut state, dev.as_mut()) {
                    limit_warn!(100, "Failed to copy GDI content of surface {:?}: {}", self.id, err);
                }
            }
            state.representation = Representation::Gpu;
            state.dirty = true;
            if let Some(emu) = state.emu.take() {
                self.ctx.emu_pool().release(emu);
            }
        } else {
            state.representation = Representation::Emulated;
        }
        drop(state);
        self.touch();

        if self.presents_on_write() {
            self.present_primary()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::harness;
    use crate::ddraw::DirectDraw;
    use crate::desc::{CooperativeFlags, LockFlags, VersionedDesc};
    use crate::format::D3dFormat;
    use crate::interface::InterfaceVersion;
    use crate::palette::{Palette, DDPCAPS_8BIT};
    use crate::surface::testing::offscreen_desc;
    use crate::types::PaletteEntry;
    use std::sync::Arc;

    #[test]
    fn dc_round_trip_keeps_texture_content() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let surface = dd.create_surface(VersionedDesc::Current(&offscreen_desc(4, 2, D3dFormat::X8R8G8B8))).unwrap();
        let inner = surface.inner();

        let lock = inner.lock(None, LockFlags::WAIT).unwrap();
        // SAFETY: the surface is locked and holds at least 4 bytes
        unsafe { std::ptr::copy_nonoverlapping([1u8, 2, 3, 4].as_ptr(), lock.bits, 4) };
        inner.unlock(None).unwrap();

        let dc = inner.get_dc().unwrap();
        assert_eq!(inner.get_dc(), Err(DdError::DcAlreadyCreated));
        assert_eq!(inner.lock(None, LockFlags::WAIT).err(), Some(DdError::SurfaceBusy));
        inner.release_dc(dc).unwrap();
        assert_eq!(inner.release_dc(dc), Err(DdError::NoDc));
        assert_eq!(h.ctx.emu_pool().pooled(), 1, "borrowed bitmap goes back to the pool");

        let lock = inner.lock(None, LockFlags::READONLY).unwrap();
        // SAFETY: the surface is locked and holds at least 4 bytes
        let first = unsafe { std::slice::from_raw_parts(lock.bits, 4) }.to_vec();
        inner.unlock(None).unwrap();
        assert_eq!(first, vec![1, 2, 3, 4]);
        dd.release();
    }

    #[test]
    fn dc_after_device_reset_sees_saved_content() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let hwnd = h.windows.create_window(640, 480);
        dd.set_cooperative_level(hwnd, CooperativeFlags::EXCLUSIVE | CooperativeFlags::FULLSCREEN).unwrap();
        dd.set_display_mode(640, 480, 32, 0, 0).unwrap();
        let surface = dd.create_surface(VersionedDesc::Current(&offscreen_desc(4, 2, D3dFormat::X8R8G8B8))).unwrap();
        let inner = surface.inner();

        let lock = inner.lock(None, LockFlags::WAIT).unwrap();
        // SAFETY: the surface is locked and holds at least 4 bytes
        unsafe { std::ptr::copy_nonoverlapping([9u8, 8, 7, 6].as_ptr(), lock.bits, 4) };
        inner.unlock(None).unwrap();

        dd.set_display_mode(800, 600, 32, 0, 0).unwrap();
        assert_eq!(inner.texture_id(), None);

        let dc = inner.get_dc().unwrap();
        {
            let state = inner.lock_state();
            assert_eq!(&state.emu.as_ref().unwrap().bits()[..4], &[9, 8, 7, 6]);
        }
        inner.release_dc(dc).unwrap();

        let lock = inner.lock(None, LockFlags::READONLY).unwrap();
        // SAFETY: the surface is locked and holds at least 4 bytes
        let first = unsafe { std::slice::from_raw_parts(lock.bits, 4) }.to_vec();
        inner.unlock(None).unwrap();
        assert_eq!(first, vec![9, 8, 7, 6]);
        dd.release();
    }

    #[test]
    fn indexed_dc_carries_the_palette() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let surface = dd.create_surface(VersionedDesc::Current(&offscreen_desc(4, 4, D3dFormat::P8))).unwrap();
        let palette = Arc::new(Palette::new(DDPCAPS_8BIT, &[PaletteEntry::rgb(10, 20, 30)]).unwrap());
        surface.inner().set_palette(Some(palette)).unwrap();

        let dc = surface.inner().get_dc().unwrap();
        {
            let state = surface.inner().lock_state();
            let table = state.emu.as_ref().unwrap().color_table();
            assert_eq!(table[0], PaletteEntry::rgb(10, 20, 30));
        }
        surface.inner().release_dc(dc).unwrap();
        dd.release();
    }
}
