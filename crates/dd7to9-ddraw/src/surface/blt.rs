//! Blt, BltFast and BltBatch
//!
//! Plain copies between two texture backed surfaces of the same format go
//! through `StretchRect`. Everything else (color keys, mirroring, emulated
//! surfaces, copies within one surface) runs on the CPU over the logical
//! pixel layout.

use crate::backend::{Device9, TextureFilter};
use crate::desc::{BltFastFlags, BltFlags, BltFx, BltFxFlags, BltStatusFlags, ColorKeyFlags, ROP_SRCCOPY};
use crate::error::{DdError, DdResult};
use crate::types::{ColorKey, Rect};

use super::{Surface, SurfaceState};

/// One entry of a BltBatch call
#[derive(Clone, Copy, Debug)]
pub struct BltBatchEntry<'a> {
    pub dest_rect: Option<Rect>,
    pub src: Option<&'a Surface>,
    pub src_rect: Option<Rect>,
    pub flags: BltFlags,
    pub fx: Option<BltFx>,
}

/// How source pixels land in the destination
#[derive(Clone, Copy, Debug, Default)]
struct CopyMode {
    key: Option<ColorKey>,
    mirror_x: bool,
    mirror_y: bool,
}

impl CopyMode {
    fn is_plain(&self) -> bool {
        self.key.is_none() && !self.mirror_x && !self.mirror_y
    }
}

fn fill_rect(bits: &mut [u8], pitch: usize, rect: &Rect, bytes: usize, value: u32) {
    let pixel = value.to_le_bytes();
    for y in rect.top as usize..rect.bottom as usize {
        let row = &mut bits[y * pitch + rect.left as usize * bytes..y * pitch + rect.right as usize * bytes];
        for px in row.chunks_exact_mut(bytes) {
            px.copy_from_slice(&pixel[..bytes]);
        }
    }
}

/// Tight copy of the pixels inside `rect`
fn read_rect(bits: &[u8], pitch: usize, rect: &Rect, bytes: usize) -> Vec<u8> {
    let width = rect.width() as usize * bytes;
    let mut out = Vec::with_capacity(width * rect.height() as usize);
    for y in rect.top as usize..rect.bottom as usize {
        let start = y * pitch + rect.left as usize * bytes;
        out.extend_from_slice(&bits[start..start + width]);
    }
    out
}

fn pixel_value(px: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw[..px.len()].copy_from_slice(px);
    u32::from_le_bytes(raw)
}

/// Write a tight source block into `dest`, stretching with nearest neighbor
fn write_rect(
    bits: &mut [u8],
    pitch: usize,
    dest: &Rect,
    src: &[u8],
    (src_w, src_h): (usize, usize),
    bytes: usize,
    mode: CopyMode,
) {
    let (dw, dh) = (dest.width() as usize, dest.height() as usize);
    for y in 0..dh {
        let mut sy = y * src_h / dh;
        if mode.mirror_y {
            sy = src_h - 1 - sy;
        }
        let row = (dest.top as usize + y) * pitch + dest.left as usize * bytes;
        for x in 0..dw {
            let mut sx = x * src_w / dw;
            if mode.mirror_x {
                sx = src_w - 1 - sx;
            }
            let from = (sy * src_w + sx) * bytes;
            let px = &src[from..from + bytes];
            if let Some(key) = mode.key {
                let value = pixel_value(px);
                if (key.low..=key.high).contains(&value) {
                    continue;
                }
            }
            let to = row + x * bytes;
            bits[to..to + bytes].copy_from_slice(px);
        }
    }
}

fn is_busy(state: &SurfaceState) -> bool {
    state.lock.is_some() || state.dc_out
}

impl Surface {
    fn size(&self) -> DdResult<(u32, u32)> {
        let state = self.live_state()?;
        Ok((state.desc.width, state.desc.height))
    }

    /// Lock this surface and `src` in id order
    ///
    /// `f` gets `None` as the source state when both are the same surface.
    fn with_pair<R>(
        &self,
        src: &Surface,
        f: impl FnOnce(&mut SurfaceState, Option<&mut SurfaceState>) -> DdResult<R>,
    ) -> DdResult<R> {
        if src.id == self.id {
            let mut state = self.live_state()?;
            return f(&mut state, None);
        }
        let (mut dst, mut other) = if self.id < src.id {
            let dst = self.live_state()?;
            (dst, src.live_state()?)
        } else {
            let other = src.live_state()?;
            (self.live_state()?, other)
        };
        f(&mut dst, Some(&mut other))
    }

    pub fn blt(
        &self,
        dest_rect: Option<Rect>,
        src: Option<&Surface>,
        src_rect: Option<Rect>,
        flags: BltFlags,
        fx: Option<&BltFx>,
    ) -> DdResult<()> {
        let alpha = BltFlags::ALPHADEST
            | BltFlags::ALPHADESTCONSTOVERRIDE
            | BltFlags::ALPHADESTNEG
            | BltFlags::ALPHADESTSURFACEOVERRIDE
            | BltFlags::ALPHAEDGEBLEND
            | BltFlags::ALPHASRC
            | BltFlags::ALPHASRCCONSTOVERRIDE
            | BltFlags::ALPHASRCNEG
            | BltFlags::ALPHASRCSURFACEOVERRIDE;
        if flags.intersects(alpha | BltFlags::ZBUFFER | BltFlags::ROTATIONANGLE | BltFlags::DDROPS) {
            not_implemented!("Blt with alpha, z-buffer, rotation or raster op flags");
            return Err(DdError::Unsupported);
        }
        let needs_fx = BltFlags::COLORFILL
            | BltFlags::DEPTHFILL
            | BltFlags::DDFX
            | BltFlags::ROP
            | BltFlags::KEYSRCOVERRIDE
            | BltFlags::KEYDESTOVERRIDE;
        if flags.intersects(needs_fx) && fx.is_none() {
            return Err(DdError::InvalidParams);
        }
        let fx = fx.copied().unwrap_or_default();
        if flags.contains(BltFlags::ROP) && fx.rop != ROP_SRCCOPY {
            limit_warn!(10, "Unsupported raster op {:#010x}", fx.rop);
            return Err(DdError::Unsupported);
        }
        if flags.intersects(BltFlags::KEYDEST | BltFlags::KEYDESTOVERRIDE) {
            not_implemented!("destination color keys");
        }

        self.ctx.ensure_device()?;
        let (width, height) = self.size()?;
        let has_clipper = self.lock_state().clipper.is_some();
        let full = Rect::from_size(width, height);
        let requested = dest_rect.unwrap_or(full);
        let dest = if requested.fits_within(width, height) {
            requested
        } else if has_clipper && !requested.is_empty() {
            match requested.intersect(&full) {
                Some(clipped) => clipped,
                None => return Ok(()),
            }
        } else {
            return Err(DdError::InvalidRect);
        };

        if flags.intersects(BltFlags::COLORFILL | BltFlags::DEPTHFILL) {
            let value = if flags.contains(BltFlags::DEPTHFILL) { fx.fill_depth } else { fx.fill_color };
            return self.fill(&dest, value);
        }

        let src = src.ok_or(DdError::InvalidParams)?;
        let (src_w, src_h) = src.size()?;
        let mut src_area = src_rect.unwrap_or(Rect::from_size(src_w, src_h));
        if !src_area.fits_within(src_w, src_h) {
            return Err(DdError::InvalidRect);
        }
        // Clipping an unscaled blt moves the source rect along with it
        if dest != requested && src_area.width() == requested.width() && src_area.height() == requested.height() {
            let (dx, dy) = (dest.left - requested.left, dest.top - requested.top);
            src_area = Rect::new(
                src_area.left + dx,
                src_area.top + dy,
                src_area.left + dx + dest.width() as i32,
                src_area.top + dy + dest.height() as i32,
            );
        }

        let mut mode = CopyMode::default();
        if flags.contains(BltFlags::KEYSRCOVERRIDE) {
            mode.key = Some(fx.src_color_key);
        } else if flags.contains(BltFlags::KEYSRC) {
            mode.key = Some(src.get_color_key(ColorKeyFlags::SRCBLT)?);
        }
        if flags.contains(BltFlags::DDFX) {
            mode.mirror_x = fx.ddfx.contains(BltFxFlags::MIRRORLEFTRIGHT);
            mode.mirror_y = fx.ddfx.contains(BltFxFlags::MIRRORUPDOWN);
        }
        let filter = if fx.ddfx.contains(BltFxFlags::ARITHSTRETCHY) { TextureFilter::Linear } else { TextureFilter::Point };

        self.with_pair(src, |dst_state, src_state| {
            if is_busy(dst_state) || src_state.as_deref().is_some_and(is_busy) {
                return Err(DdError::SurfaceBusy);
            }
            let mut slot = self.ctx.lock_device();
            let dev = slot.as_mut().ok_or(DdError::Generic)?;
            let dev: &mut dyn Device9 = dev.as_mut();

            if let Some(src_state) = src_state {
                let gpu = mode.is_plain()
                    && src_state.format == dst_state.format
                    && !self.uses_emulation_for(dst_state.format)
                    && !src.uses_emulation_for(src_state.format)
                    && !dst_state.format.is_depth();
                if gpu {
                    let src_tex = src.ensure_texture(src_state, dev)?;
                    let dst_tex = self.ensure_texture(dst_state, dev)?;
                    match dev.stretch_rect(src_tex, &src_area, dst_tex, &dest, filter) {
                        Ok(()) => {
                            dst_state.representation = super::Representation::Gpu;
                            dst_state.dirty = true;
                            return Ok(());
                        }
                        Err(err) => limit_debug!(100, "StretchRect failed, copying on the CPU: {}", err),
                    }
                }

                let bpp = dst_state.format.bits_per_pixel();
                if src_state.format.bits_per_pixel() != bpp {
                    limit_warn!(10, "Blt between {:?} and {:?} is not supported", src_state.format, dst_state.format);
                    return Err(DdError::Unsupported);
                }
                let bytes = (bpp / 8) as usize;
                let pixels = src.access_pixels(src_state, dev, false, |bits, pitch| read_rect(bits, pitch, &src_area, bytes))?;
                let size = (src_area.width() as usize, src_area.height() as usize);
                self.access_pixels(dst_state, dev, true, |bits, pitch| write_rect(bits, pitch, &dest, &pixels, size, bytes, mode))
            } else {
                let bytes = (dst_state.format.bits_per_pixel() / 8) as usize;
                let pixels = self.access_pixels(dst_state, dev, false, |bits, pitch| read_rect(bits, pitch, &src_area, bytes))?;
                let size = (src_area.width() as usize, src_area.height() as usize);
                self.access_pixels(dst_state, dev, true, |bits, pitch| write_rect(bits, pitch, &dest, &pixels, size, bytes, mode))
            }
        })?;

        self.touch();
        if self.presents_on_write() {
            self.present_primary()?;
        }
        Ok(())
    }

    fn fill(&self, dest: &Rect, value: u32) -> DdResult<()> {
        {
            let mut state = self.live_state()?;
            if is_busy(&state) {
                return Err(DdError::SurfaceBusy);
            }
            let bytes = (state.format.bits_per_pixel() / 8) as usize;
            if bytes == 0 {
                return Err(DdError::Unsupported);
            }
            let mut slot = self.ctx.lock_device();
            let dev = slot.as_mut().ok_or(DdError::Generic)?;
            self.access_pixels(&mut state, dev.as_mut(), true, |bits, pitch| fill_rect(bits, pitch, dest, bytes, value))?;
        }
        self.touch();
        if self.presents_on_write() {
            self.present_primary()?;
        }
        Ok(())
    }

    pub fn blt_fast(&self, x: u32, y: u32, src: &Surface, src_rect: Option<Rect>, flags: BltFastFlags) -> DdResult<()> {
        if self.lock_state().clipper.is_some() {
            return Err(DdError::BltFastCantClip);
        }
        let (src_w, src_h) = src.size()?;
        let area = src_rect.unwrap_or(Rect::from_size(src_w, src_h));
        let dest = Rect::new(x as i32, y as i32, x as i32 + area.width() as i32, y as i32 + area.height() as i32);

        let mut blt_flags = BltFlags::WAIT;
        if flags.contains(BltFastFlags::SRCCOLORKEY) {
            blt_flags |= BltFlags::KEYSRC;
        }
        if flags.contains(BltFastFlags::DESTCOLORKEY) {
            blt_flags |= BltFlags::KEYDEST;
        }
        self.blt(Some(dest), Some(src), Some(area), blt_flags, None)
    }

    pub fn blt_batch(&self, entries: &[BltBatchEntry<'_>], _flags: u32) -> DdResult<()> {
        for entry in entries {
            self.blt(entry.dest_rect, entry.src, entry.src_rect, entry.flags, entry.fx.as_ref())?;
        }
        Ok(())
    }

    pub fn get_blt_status(&self, flags: BltStatusFlags) -> DdResult<()> {
        if flags == BltStatusFlags::CANBLT {
            if is_busy(&*self.live_state()?) {
                return Err(DdError::SurfaceBusy);
            }
            Ok(())
        } else if flags == BltStatusFlags::ISBLTDONE {
            self.live_state().map(|_| ())
        } else {
            Err(DdError::InvalidParams)
        }
    }
}
