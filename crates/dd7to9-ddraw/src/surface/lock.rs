//! Lock and Unlock
//!
//! A lock hands the application a raw pointer into the authoritative pixels:
//! the emulated bitmap, the locked texture itself, or a staging copy when the
//! texture pitch is not the DWORD aligned pitch legacy code expects.

use std::thread::{self, ThreadId};

use crate::backend::{TextureId, TextureLockFlags};
use crate::desc::{DescFlags, LockFlags, SurfaceDesc2};
use crate::error::{DdError, DdResult};
use crate::format::compute_pitch;
use crate::types::Rect;

use super::resource::{locked_bytes, row_bytes, span};
use super::{Representation, Surface};

pub(super) enum LockTarget {
    /// The texture stays locked until Unlock
    Direct(TextureId),
    /// Pixels are copied back into the texture on Unlock
    Staging { texture: TextureId, buffer: Vec<u8>, gpu_pitch: usize },
    Emulated,
}

pub(crate) struct LockState {
    owner: ThreadId,
    count: u32,
    readonly: bool,
    /// Address of the surface origin
    base: usize,
    pitch: u32,
    target: LockTarget,
}

impl LockState {
    pub(super) fn is_texture_backed(&self) -> bool {
        !matches!(self.target, LockTarget::Emulated)
    }
}

/// What a successful Lock hands back
#[derive(Debug)]
pub struct SurfaceLock {
    /// First byte of the locked rectangle
    pub bits: *mut u8,
    pub pitch: u32,
    /// Surface description with `LPSURFACE` and `PITCH` filled in
    pub desc: SurfaceDesc2,
}

/// Copy each even scanline into the blank odd one below it
///
/// Applies only when every odd line is blank and at least one even line is not.
pub(crate) fn fill_blank_scanlines(bits: &mut [u8], pitch: usize, row: usize, height: usize) {
    if height < 2 {
        return;
    }
    let line = |bits: &[u8], y: usize| -> bool { bits[y * pitch..y * pitch + row].iter().any(|&b| b != 0) };
    let odd_blank = (1..height).step_by(2).all(|y| !line(bits, y));
    let even_content = (0..height).step_by(2).any(|y| line(bits, y));
    if !odd_blank || !even_content {
        return;
    }
    for y in (1..height).step_by(2) {
        let src = (y - 1) * pitch;
        bits.copy_within(src..src + row, y * pitch);
    }
}

impl Surface {
    pub fn is_locked(&self) -> bool {
        self.lock_state().lock.is_some()
    }

    fn lock_result(desc: &SurfaceDesc2, bpp: u32, base: usize, pitch: u32, rect: &Rect) -> SurfaceLock {
        let offset = rect.top as usize * pitch as usize + (rect.left as usize * bpp as usize) / 8;
        let bits = (base + offset) as *mut u8;
        let mut desc = *desc;
        desc.flags.insert(DescFlags::LPSURFACE | DescFlags::PITCH);
        desc.surface = bits as usize;
        desc.pitch = pitch as i32;
        SurfaceLock { bits, pitch, desc }
    }

    pub fn lock(&self, rect: Option<Rect>, flags: LockFlags) -> DdResult<SurfaceLock> {
        self.ctx.ensure_device()?;
        let mut state = self.live_state()?;
        let (width, height) = (state.desc.width, state.desc.height);
        let rect = match rect {
            Some(rect) if !rect.fits_within(width, height) => {
                limit_debug!(100, "Lock rect {} outside {}x{}", rect, width, height);
                return Err(DdError::InvalidParams);
            }
            Some(rect) => rect,
            None => Rect::from_size(width, height),
        };

        let me = thread::current().id();
        if let Some(lock) = state.lock.as_mut() {
            if lock.owner != me {
                return Err(DdError::SurfaceBusy);
            }
            lock.count += 1;
            let (base, pitch) = (lock.base, lock.pitch);
            return Ok(Self::lock_result(&state.desc, state.format.bits_per_pixel(), base, pitch, &rect));
        }
        if state.dc_out {
            return Err(DdError::SurfaceBusy);
        }

        let readonly = flags.contains(LockFlags::READONLY);
        let format = state.format;
        let (base, pitch, target) = if self.uses_emulation_for(format) {
            self.ensure_emu(&mut state)?;
            let emu = state.emu.as_mut().ok_or(DdError::Generic)?;
            (emu.bits_mut().as_mut_ptr() as usize, emu.pitch, LockTarget::Emulated)
        } else {
            let mut slot = self.ctx.lock_device();
            let dev = slot.as_mut().ok_or(DdError::Generic)?;
            let id = self.ensure_texture(&mut state, dev.as_mut())?;

            let mut lock_flags = TextureLockFlags::empty();
            if readonly {
                lock_flags |= TextureLockFlags::READONLY;
            }
            if flags.contains(LockFlags::NOSYSLOCK) {
                lock_flags |= TextureLockFlags::NOSYSLOCK;
            }
            if flags.contains(LockFlags::DONOTWAIT) {
                lock_flags |= TextureLockFlags::DONOTWAIT;
            }
            let locked = dev.lock_texture(id, lock_flags).map_err(|err| {
                limit_warn!(100, "Failed to lock texture of surface {:?}: {}", self.id, err);
                DdError::from(err)
            })?;

            let logical_pitch = compute_pitch(width, format.bits_per_pixel());
            if self.ctx.config().fix_byte_alignment && !format.is_compressed() && locked.pitch != logical_pitch {
                let row = row_bytes(width, format);
                let mut buffer = vec![0u8; logical_pitch as usize * height as usize];
                {
                    // SAFETY: the texture is locked until the unlock below
                    let src = unsafe { locked_bytes(&locked, height, row) };
                    for y in 0..height as usize {
                        let from = y * locked.pitch as usize;
                        let to = y * logical_pitch as usize;
                        buffer[to..to + row].copy_from_slice(&src[from..from + row]);
                    }
                }
                dev.unlock_texture(id)?;
                let base = buffer.as_mut_ptr() as usize;
                let target = LockTarget::Staging { texture: id, buffer, gpu_pitch: locked.pitch as usize };
                (base, logical_pitch, target)
            } else {
                (locked.bits as usize, locked.pitch, LockTarget::Direct(id))
            }
        };

        state.lock = Some(LockState { owner: me, count: 1, readonly, base, pitch, target });
        Ok(Self::lock_result(&state.desc, format.bits_per_pixel(), base, pitch, &rect))
    }

    pub fn unlock(&self, _rect: Option<Rect>) -> DdResult<()> {
        let mut state = self.live_state()?;
        let Some(lock) = state.lock.as_mut() else {
            return Err(DdError::NotLocked);
        };
        lock.count -= 1;
        if lock.count > 0 {
            return Ok(());
        }
        let Some(mut lock) = state.lock.take() else {
            return Err(DdError::NotLocked);
        };

        let (width, height, format) = (state.desc.width, state.desc.height, state.format);
        let row = row_bytes(width, format);
        if !lock.readonly && self.ctx.config().remove_scanlines && !format.is_compressed() {
            let len = span(lock.pitch as usize, height, row);
            let bits: &mut [u8] = match &mut lock.target {
                LockTarget::Staging { buffer, .. } => &mut buffer[..len],
                // SAFETY: the emulated bitmap or the locked texture is still mapped at `base`
                _ => unsafe { std::slice::from_raw_parts_mut(lock.base as *mut u8, len) },
            };
            fill_blank_scanlines(bits, lock.pitch as usize, row, height as usize);
        }

        match lock.target {
            LockTarget::Emulated => {}
            LockTarget::Direct(id) => {
                if let Some(dev) = self.ctx.lock_device().as_mut() {
                    dev.unlock_texture(id)?;
                }
            }
            LockTarget::Staging { texture, buffer, gpu_pitch } if !lock.readonly => {
                let mut slot = self.ctx.lock_device();
                let dev = slot.as_mut().ok_or(DdError::Generic)?;
                let locked = dev.lock_texture(texture, TextureLockFlags::empty())?;
                // SAFETY: the texture was locked above and is unlocked right after the copy
                let dst = unsafe { locked_bytes(&locked, height, row) };
                for y in 0..height as usize {
                    let from = y * lock.pitch as usize;
                    let to = y * gpu_pitch;
                    dst[to..to + row].copy_from_slice(&buffer[from..from + row]);
                }
                dev.unlock_texture(texture)?;
            }
            LockTarget::Staging { .. } => {}
        }

        if lock.readonly {
            return Ok(());
        }
        if self.uses_emulation_for(format) {
            state.representation = Representation::Emulated;
        } else {
            state.representation = Representation::Gpu;
            state.dirty = true;
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
    use crate::backend::software::SoftwareBackend;
    use crate::context::testing::{harness, harness_with, test_config};
    use crate::ddraw::DirectDraw;
    use crate::desc::VersionedDesc;
    use crate::format::D3dFormat;
    use crate::interface::InterfaceVersion;
    use crate::surface::testing::offscreen_desc;
    use std::sync::Arc;

    fn write_pattern(lock: &SurfaceLock, width: usize, height: usize, bpp: usize) {
        for y in 0..height {
            // SAFETY: the lock covers `height` rows of `width * bpp` bytes at `pitch`
            let row = unsafe { std::slice::from_raw_parts_mut(lock.bits.add(y * lock.pitch as usize), width * bpp) };
            for (x, byte) in row.iter_mut().enumerate() {
                *byte = (x * 7 + y * 13) as u8;
            }
        }
    }

    fn read_rows(lock: &SurfaceLock, width: usize, height: usize, bpp: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for y in 0..height {
            // SAFETY: the lock covers `height` rows of `width * bpp` bytes at `pitch`
            let row = unsafe { std::slice::from_raw_parts(lock.bits.add(y * lock.pitch as usize), width * bpp) };
            out.extend_from_slice(row);
        }
        out
    }

    #[test]
    fn misaligned_gpu_pitch_goes_through_staging() {
        let h = harness_with(test_config(), SoftwareBackend::new().with_pitch_alignment(64));
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let surface = dd.create_surface(VersionedDesc::Current(&offscreen_desc(10, 4, D3dFormat::R5G6B5))).unwrap();
        let inner = surface.inner();

        let lock = inner.lock(None, LockFlags::WAIT).unwrap();
        assert_eq!(lock.pitch, 20, "callers see the DWORD aligned pitch");
        write_pattern(&lock, 10, 4, 2);
        let written = read_rows(&lock, 10, 4, 2);
        inner.unlock(None).unwrap();

        let lock = inner.lock(None, LockFlags::READONLY).unwrap();
        assert_eq!(read_rows(&lock, 10, 4, 2), written);
        inner.unlock(None).unwrap();
        dd.release();
    }

    #[test]
    fn unlock_without_writes_leaves_pixels_alone() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let surface = dd.create_surface(VersionedDesc::Current(&offscreen_desc(16, 8, D3dFormat::X8R8G8B8))).unwrap();
        let inner = surface.inner();

        let lock = inner.lock(None, LockFlags::WAIT).unwrap();
        write_pattern(&lock, 16, 8, 4);
        let before = read_rows(&lock, 16, 8, 4);
        inner.unlock(None).unwrap();

        for rect in [Rect::new(0, 0, 16, 8), Rect::new(3, 2, 9, 7), Rect::new(15, 7, 16, 8)] {
            let lock = inner.lock(Some(rect), LockFlags::WAIT).unwrap();
            assert_eq!(lock.desc.pitch, lock.pitch as i32);
            inner.unlock(Some(rect)).unwrap();
        }

        let lock = inner.lock(None, LockFlags::READONLY).unwrap();
        assert_eq!(read_rows(&lock, 16, 8, 4), before);
        inner.unlock(None).unwrap();
        dd.release();
    }

    #[test]
    fn rect_lock_points_at_top_left_of_rect() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let surface = dd.create_surface(VersionedDesc::Current(&offscreen_desc(8, 8, D3dFormat::R5G6B5))).unwrap();
        let inner = surface.inner();

        let whole = inner.lock(None, LockFlags::WAIT).unwrap();
        let origin = whole.bits as usize;
        let pitch = whole.pitch as usize;
        inner.unlock(None).unwrap();

        let part = inner.lock(Some(Rect::new(2, 3, 6, 5)), LockFlags::WAIT).unwrap();
        assert_eq!(part.bits as usize, origin + 3 * pitch + 2 * 2);
        inner.unlock(None).unwrap();
        assert_eq!(inner.lock(Some(Rect::new(0, 0, 9, 8)), LockFlags::WAIT).err(), Some(DdError::InvalidParams));
        dd.release();
    }

    #[test]
    fn second_thread_sees_busy_surface() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let surface = dd.create_surface(VersionedDesc::Current(&offscreen_desc(8, 8, D3dFormat::R5G6B5))).unwrap();
        let inner: Arc<Surface> = surface.inner().clone();

        inner.lock(None, LockFlags::WAIT).unwrap();
        let other = inner.clone();
        let result = std::thread::spawn(move || other.lock(None, LockFlags::WAIT).map(|_| ())).join().unwrap();
        assert_eq!(result, Err(DdError::SurfaceBusy));

        // Same thread nests
        inner.lock(None, LockFlags::WAIT).unwrap();
        inner.unlock(None).unwrap();
        assert!(inner.is_locked());
        inner.unlock(None).unwrap();
        assert!(!inner.is_locked());
        assert_eq!(inner.unlock(None), Err(DdError::NotLocked));
        dd.release();
    }

    #[test]
    fn indexed_surface_locks_emulated_memory() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let surface = dd.create_surface(VersionedDesc::Current(&offscreen_desc(5, 3, D3dFormat::P8))).unwrap();
        let inner = surface.inner();
        let lock = inner.lock(None, LockFlags::WAIT).unwrap();
        assert_eq!(lock.pitch, 8);
        inner.unlock(None).unwrap();
        assert!(inner.texture_id().is_none(), "no texture until the surface is drawn");
        dd.release();
    }

    #[test]
    fn unlocking_a_plain_primary_presents_it() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let primary = dd.create_surface(VersionedDesc::Current(&crate::surface::testing::primary_desc(0))).unwrap();
        primary.inner().lock(None, LockFlags::WAIT).unwrap();
        primary.inner().unlock(None).unwrap();
        assert_eq!(h.backend.stats.presents.load(std::sync::atomic::Ordering::SeqCst), 1);
        dd.release();
    }

    #[test]
    fn blank_odd_scanlines_are_filled() {
        let mut bits = vec![0u8; 4 * 4];
        bits[0..2].copy_from_slice(&[9, 9]);
        bits[8..10].copy_from_slice(&[5, 5]);
        fill_blank_scanlines(&mut bits, 4, 2, 4);
        assert_eq!(&bits[4..6], &[9, 9]);
        assert_eq!(&bits[12..14], &[5, 5]);

        let mut striped = vec![1u8; 8];
        fill_blank_scanlines(&mut striped, 4, 4, 2);
        assert_eq!(striped, vec![1u8; 8], "rows with content are left alone");
    }
}
