//! GPU texture and emulated bitmap behind a surface

use crate::backend::{Device9, LockedRect, Pool, TextureDesc, TextureId, TextureLockFlags, Usage};
use crate::desc::PixelFormat;
use crate::error::{DdError, DdResult};
use crate::format::{compute_pitch, d3d_format_of, D3dFormat};

use super::{Representation, Surface, SurfaceState};

/// Bytes of `width` pixels at `format`, without padding
pub(super) fn row_bytes(width: u32, format: D3dFormat) -> usize {
    (width as usize * format.bits_per_pixel() as usize).div_ceil(8)
}

/// Addressable bytes of a locked region
pub(super) fn span(pitch: usize, height: u32, row: usize) -> usize {
    match height {
        0 => 0,
        h => pitch * (h as usize - 1) + row,
    }
}

/// View a locked texture as a byte slice
///
/// # Safety
/// `locked` must come from a `lock_texture` call on a texture of `height`
/// rows whose unlock has not happened yet.
pub(super) unsafe fn locked_bytes<'a>(locked: &LockedRect, height: u32, row: usize) -> &'a mut [u8] {
    std::slice::from_raw_parts_mut(locked.bits, span(locked.pitch as usize, height, row))
}

/// Copy one row between the logical and the storage layout of a format
pub(super) fn convert_row(src: &[u8], src_bpp: usize, dst: &mut [u8], dst_bpp: usize, width: usize) {
    if src_bpp == dst_bpp {
        let len = width * src_bpp;
        dst[..len].copy_from_slice(&src[..len]);
        return;
    }
    // 24-bit color lives in X8R8G8B8 textures
    for (s, d) in src.chunks_exact(src_bpp).zip(dst.chunks_exact_mut(dst_bpp)).take(width) {
        let n = src_bpp.min(dst_bpp);
        d[..n].copy_from_slice(&s[..n]);
        d[n..].fill(0);
    }
}

impl Surface {
    /// Whether a surface of `format` works out of emulated memory
    pub(super) fn uses_emulation_for(&self, format: D3dFormat) -> bool {
        format.requires_emulation() || (self.is_primary() && self.ctx.config().write_to_gdi)
    }

    fn texture_desc(&self, state: &SurfaceState) -> TextureDesc {
        let (usage, pool) = if state.format.is_depth() {
            (Usage::DEPTHSTENCIL, Pool::Default)
        } else if self.is_managed() {
            (Usage::empty(), Pool::Managed)
        } else {
            (Usage::DYNAMIC, Pool::Default)
        };
        TextureDesc {
            width: state.desc.width,
            height: state.desc.height,
            format: state.format.storage_format(),
            usage,
            pool,
        }
    }

    /// The surface texture, created on first use
    ///
    /// A backup taken before the last device reset is written into a freshly
    /// created texture.
    pub(super) fn ensure_texture(&self, state: &mut SurfaceState, dev: &mut dyn Device9) -> DdResult<TextureId> {
        if let Some(id) = state.texture {
            return Ok(id);
        }
        let desc = self.texture_desc(state);
        let id = dev.create_texture(&desc).map_err(|err| {
            tracing::error!("Failed to create texture {}x{} {:?}: {}", desc.width, desc.height, desc.format, err);
            DdError::from(err)
        })?;
        state.texture = Some(id);

        if let Some(backup) = state.backup.take() {
            let row = row_bytes(state.desc.width, state.format);
            let height = state.desc.height;
            let locked = dev.lock_texture(id, TextureLockFlags::empty())?;
            // SAFETY: the texture was locked above and is unlocked right after the copy
            let bits = unsafe { locked_bytes(&locked, height, row) };
            for (y, src) in backup.chunks_exact(row).take(height as usize).enumerate() {
                let offset = y * locked.pitch as usize;
                bits[offset..offset + row].copy_from_slice(src);
            }
            dev.unlock_texture(id)?;
            tracing::trace!("Restored backup of surface {:?}", self.id);
        }
        Ok(id)
    }

    /// The emulated bitmap, taken from the pool on first use
    pub(super) fn ensure_emu(&self, state: &mut SurfaceState) -> DdResult<()> {
        if state.emu.is_none() {
            state.emu = Some(self.ctx.emu_pool().acquire(state.desc.width, state.desc.height, state.format)?);
        }
        Ok(())
    }

    /// Bring the texture up to date with the emulated bitmap
    pub(super) fn sync_texture(&self, state: &mut SurfaceState, dev: &mut dyn Device9) -> DdResult<TextureId> {
        let id = self.ensure_texture(state, dev)?;
        if state.representation != Representation::Emulated {
            return Ok(id);
        }
        if let Some(emu) = state.emu.as_ref() {
            let (width, height) = (state.desc.width, state.desc.height);
            let src_bpp = (state.format.bits_per_pixel() / 8).max(1) as usize;
            let dst_bpp = (state.format.storage_format().bits_per_pixel() / 8).max(1) as usize;
            let locked = dev.lock_texture(id, TextureLockFlags::DISCARD)?;
            // SAFETY: the texture was locked above and is unlocked right after the copy
            let bits = unsafe { locked_bytes(&locked, height, width as usize * dst_bpp) };
            let src_pitch = emu.pitch as usize;
            for y in 0..height as usize {
                let src = &emu.bits()[y * src_pitch..];
                let dst = &mut bits[y * locked.pitch as usize..];
                convert_row(src, src_bpp, dst, dst_bpp, width as usize);
            }
            dev.unlock_texture(id)?;
        }
        state.representation = Representation::InSync;
        Ok(id)
    }

    /// Copy the texture into the emulated bitmap
    pub(super) fn sync_emu(&self, state: &mut SurfaceState, dev: &mut dyn Device9) -> DdResult<()> {
        self.ensure_emu(state)?;
        let id = self.ensure_texture(state, dev)?;
        let (width, height) = (state.desc.width, state.desc.height);
        let dst_bpp = (state.format.bits_per_pixel() / 8).max(1) as usize;
        let src_bpp = (state.format.storage_format().bits_per_pixel() / 8).max(1) as usize;
        let locked = dev.lock_texture(id, TextureLockFlags::READONLY)?;
        // SAFETY: the texture was locked above and is unlocked right after the copy
        let bits = unsafe { locked_bytes(&locked, height, width as usize * src_bpp) };
        if let Some(emu) = state.emu.as_mut() {
            let dst_pitch = emu.pitch as usize;
            let dst_bits = emu.bits_mut();
            for y in 0..height as usize {
                let src = &bits[y * locked.pitch as usize..];
                convert_row(src, src_bpp, &mut dst_bits[y * dst_pitch..], dst_bpp, width as usize);
            }
        }
        dev.unlock_texture(id)?;
        Ok(())
    }

    /// Run `f` over the authoritative pixels of the surface
    ///
    /// `f` gets the bytes starting at the surface origin and the row pitch,
    /// both in the logical format of the surface.
    pub(super) fn access_pixels<R>(
        &self,
        state: &mut SurfaceState,
        dev: &mut dyn Device9,
        write: bool,
        f: impl FnOnce(&mut [u8], usize) -> R,
    ) -> DdResult<R> {
        if state.format.is_compressed() {
            return Err(DdError::Unsupported);
        }
        if self.uses_emulation_for(state.format) {
            self.ensure_emu(state)?;
            let emu = state.emu.as_mut().ok_or(DdError::Generic)?;
            let pitch = emu.pitch as usize;
            let result = f(emu.bits_mut(), pitch);
            if write {
                state.representation = Representation::Emulated;
            }
            return Ok(result);
        }

        let id = self.ensure_texture(state, dev)?;
        let flags = if write { TextureLockFlags::empty() } else { TextureLockFlags::READONLY };
        let locked = dev.lock_texture(id, flags)?;
        let height = state.desc.height;
        // SAFETY: the texture was locked above and is unlocked right after `f`
        let bits = unsafe { locked_bytes(&locked, height, row_bytes(state.desc.width, state.format)) };
        let result = f(bits, locked.pitch as usize);
        dev.unlock_texture(id)?;
        if write {
            state.representation = Representation::Gpu;
            state.dirty = true;
        }
        Ok(result)
    }

    /// Drop the GPU texture, optionally saving its content for the next one
    pub(crate) fn release_d9(&self, backup: bool) {
        let mut state = self.lock_state();
        if state.lock.as_ref().is_some_and(|lock| lock.is_texture_backed()) {
            tracing::warn!("Surface {:?} lost its texture while locked", self.id);
            state.lock = None;
        }
        let Some(id) = state.texture.take() else {
            return;
        };

        let mut slot = self.ctx.lock_device();
        if let Some(dev) = slot.as_mut() {
            let authoritative = !self.uses_emulation_for(state.format) && !state.dc_out;
            let savable = !state.format.is_compressed() && !state.format.is_depth();
            if backup && state.dirty && authoritative && savable {
                match read_rows(dev.as_mut(), id, state.desc.width, state.desc.height, state.format) {
                    Ok(rows) => state.backup = Some(rows),
                    Err(err) => limit_warn!(100, "Failed to back up surface {:?}: {}", self.id, err),
                }
            }
            dev.release_texture(id);
        }

        if self.uses_emulation_for(state.format) || state.dc_out {
            state.representation = Representation::Emulated;
        }
    }

    /// Pick up a new display pixel format on surfaces tied to the display
    pub(crate) fn reset_display(&self, pixel_format: &PixelFormat) {
        if !self.follows_display {
            return;
        }
        let format = d3d_format_of(pixel_format);
        let mut state = self.lock_state();
        if state.format == format || format == D3dFormat::Unknown {
            return;
        }
        tracing::debug!("Surface {:?} follows display format {:?} -> {:?}", self.id, state.format, format);

        state.lock = None;
        if let Some(id) = state.texture.take() {
            if let Some(dev) = self.ctx.lock_device().as_mut() {
                dev.release_texture(id);
            }
        }
        if let Some(emu) = state.emu.take() {
            self.ctx.emu_pool().release(emu);
        }
        state.format = format;
        state.desc.pixel_format = *pixel_format;
        state.desc.pitch = compute_pitch(state.desc.width, format.bits_per_pixel()) as i32;
        state.backup = None;
        state.dirty = false;
        state.representation = if self.uses_emulation_for(format) {
            Representation::Emulated
        } else {
            Representation::Gpu
        };
    }

    /// Draw the surface over the device back buffer
    fn draw_to_back_buffer(&self) -> DdResult<()> {
        self.ctx.ensure_device()?;
        let mut state = self.live_state()?;
        let palette = match (state.format, state.palette.as_ref()) {
            (D3dFormat::P8, Some(palette)) => Some(palette.rgb_table()),
            _ => None,
        };
        let mut slot = self.ctx.lock_device();
        let dev = slot.as_mut().ok_or(DdError::Generic)?;
        let id = self.sync_texture(&mut state, dev.as_mut())?;
        dev.draw_texture(id, palette.as_ref()).map_err(DdError::from)
    }

    /// Show the surface on screen
    pub(crate) fn present_primary(&self) -> DdResult<()> {
        if self.ctx.skip_frame() {
            limit_debug!(10, "Skipping frame");
            return Ok(());
        }
        self.draw_to_back_buffer()?;
        self.ctx.present()
    }
}

/// Read the top level of a texture into tight rows
fn read_rows(dev: &mut dyn Device9, id: TextureId, width: u32, height: u32, format: D3dFormat) -> DdResult<Vec<u8>> {
    let row = row_bytes(width, format);
    let locked = dev.lock_texture(id, TextureLockFlags::READONLY)?;
    // SAFETY: the texture was locked above and is unlocked right after the copy
    let bits = unsafe { locked_bytes(&locked, height, row) };
    let mut rows = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        let offset = y * locked.pitch as usize;
        rows.extend_from_slice(&bits[offset..offset + row]);
    }
    dev.unlock_texture(id)?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{harness, Harness};
    use crate::ddraw::{DirectDraw, DirectDrawInterface};
    use crate::desc::{Caps, CooperativeFlags, LockFlags, SurfaceCaps, VersionedDesc};
    use crate::interface::InterfaceVersion;
    use crate::surface::testing::{offscreen_desc, primary_desc};

    fn exclusive_at_640x480(h: &Harness) -> DirectDrawInterface {
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let hwnd = h.windows.create_window(640, 480);
        dd.set_cooperative_level(hwnd, CooperativeFlags::EXCLUSIVE | CooperativeFlags::FULLSCREEN).unwrap();
        dd.set_display_mode(640, 480, 32, 0, 0).unwrap();
        dd
    }

    fn lock_and_write(surface: &Surface, rows: &[Vec<u8>]) {
        let lock = surface.lock(None, LockFlags::WAIT).unwrap();
        for (y, row) in rows.iter().enumerate() {
            // SAFETY: the surface is locked and every row fits its pitch
            unsafe { std::ptr::copy_nonoverlapping(row.as_ptr(), lock.bits.add(y * lock.pitch as usize), row.len()) };
        }
        surface.unlock(None).unwrap();
    }

    fn lock_and_read(surface: &Surface, count: usize, len: usize) -> Vec<Vec<u8>> {
        let lock = surface.lock(None, LockFlags::READONLY).unwrap();
        let rows = (0..count)
            // SAFETY: the surface is locked and every row fits its pitch
            .map(|y| unsafe { std::slice::from_raw_parts(lock.bits.add(y * lock.pitch as usize), len) }.to_vec())
            .collect();
        surface.unlock(None).unwrap();
        rows
    }

    fn pattern(count: usize, len: usize) -> Vec<Vec<u8>> {
        (0..count).map(|y| (0..len).map(|x| (y * len + x + 1) as u8).collect()).collect()
    }

    #[test]
    fn locked_content_survives_a_resolution_change() {
        let h = harness();
        let dd = exclusive_at_640x480(&h);
        let surface = dd.create_surface(VersionedDesc::Current(&offscreen_desc(8, 4, D3dFormat::X8R8G8B8))).unwrap();
        let inner = surface.inner();
        let rows = pattern(4, 32);
        lock_and_write(inner, &rows);

        dd.set_display_mode(800, 600, 32, 0, 0).unwrap();
        assert_eq!(inner.texture_id(), None, "textures go away with the old device");
        assert!(inner.lock_state().backup.is_some());
        let params = h.backend.stats.last_params().unwrap();
        assert_eq!((params.back_buffer_width, params.back_buffer_height), (800, 600));

        assert_eq!(lock_and_read(inner, 4, 32), rows);
        assert!(inner.lock_state().backup.is_none());
        dd.release();
    }

    #[test]
    fn clean_surfaces_take_no_backup() {
        let h = harness();
        let dd = exclusive_at_640x480(&h);
        let surface = dd.create_surface(VersionedDesc::Current(&offscreen_desc(8, 4, D3dFormat::X8R8G8B8))).unwrap();
        let inner = surface.inner();
        inner.lock(None, LockFlags::READONLY).unwrap();
        inner.unlock(None).unwrap();

        dd.set_display_mode(800, 600, 32, 0, 0).unwrap();
        assert!(inner.lock_state().backup.is_none());
        dd.release();
    }

    #[test]
    fn dirty_back_buffer_survives_a_resolution_change() {
        let h = harness();
        let dd = exclusive_at_640x480(&h);
        let primary = dd.create_surface(VersionedDesc::Current(&primary_desc(1))).unwrap();
        let front = primary.inner().clone();
        let back = front.get_attached_surface(&SurfaceCaps::new(Caps::BACKBUFFER)).unwrap();
        assert_eq!(back.format(), D3dFormat::X8R8G8B8);

        let rows = pattern(2, 64);
        lock_and_write(&back, &rows);
        front.lock(None, LockFlags::WAIT).unwrap();
        front.unlock(None).unwrap();

        dd.set_display_mode(800, 600, 32, 0, 0).unwrap();
        assert_eq!(back.texture_id(), None);
        assert_eq!(back.format(), D3dFormat::X8R8G8B8);
        assert_eq!(lock_and_read(&back, 2, 64), rows);
        dd.release();
    }

    #[test]
    fn rgb24_rows_widen_and_narrow() {
        let src = [1u8, 2, 3, 4, 5, 6];
        let mut wide = [0xFFu8; 8];
        convert_row(&src, 3, &mut wide, 4, 2);
        assert_eq!(wide, [1, 2, 3, 0, 4, 5, 6, 0]);

        let mut narrow = [0u8; 6];
        convert_row(&wide, 4, &mut narrow, 3, 2);
        assert_eq!(narrow, src);
    }

    #[test]
    fn span_stops_at_last_row() {
        assert_eq!(span(64, 4, 20), 64 * 3 + 20);
        assert_eq!(span(64, 0, 20), 0);
        assert_eq!(row_bytes(10, D3dFormat::R5G6B5), 20);
        assert_eq!(row_bytes(3, D3dFormat::R8G8B8), 9);
    }
}
