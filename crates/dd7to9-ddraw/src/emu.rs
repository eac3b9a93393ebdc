//! Emulated surface store
//!
//! CPU addressable bitmaps for surfaces the GPU path cannot serve: indexed
//! color, 24-bit color and anything that hands out a device context. Released
//! bitmaps go back to a process-wide pool and are reused by the next surface
//! asking for the same size and format.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::error::DdResult;
use crate::format::{compute_pitch, D3dFormat};
use crate::gdi::DibSection;
use crate::types::{DeviceContext, PaletteEntry};

/// Bitmaps kept around for reuse
const POOL_CAPACITY: usize = 16;

pub struct EmuSurface {
    dib: DibSection,
    pub width: u32,
    pub height: u32,
    pub format: D3dFormat,
    pub pitch: u32,
    /// Palette sequence number the color table was last synced to
    pub last_palette_usn: u32,
}

impl EmuSurface {
    fn new(width: u32, height: u32, format: D3dFormat) -> DdResult<Self> {
        Ok(Self {
            dib: DibSection::new(width, height, format)?,
            width,
            height,
            format,
            pitch: compute_pitch(width, format.bits_per_pixel()),
            last_palette_usn: 0,
        })
    }

    pub fn matches(&self, width: u32, height: u32, format: D3dFormat) -> bool {
        self.width == width && self.height == height && self.format == format
    }

    pub fn dc(&self) -> DeviceContext {
        self.dib.dc()
    }

    pub fn bit_count(&self) -> u32 {
        self.format.bits_per_pixel()
    }

    pub fn size(&self) -> usize {
        (self.pitch * self.height) as usize
    }

    pub fn bits(&self) -> &[u8] {
        self.dib.bits()
    }

    pub fn bits_mut(&mut self) -> &mut [u8] {
        self.dib.bits_mut()
    }

    pub fn set_color_table(&mut self, entries: &[PaletteEntry; 256], usn: u32) {
        self.dib.set_color_table(entries);
        self.last_palette_usn = usn;
    }

    pub fn color_table(&self) -> &[PaletteEntry; 256] {
        self.dib.color_table()
    }
}

#[derive(Default)]
pub struct EmuSurfacePool {
    free: Mutex<Vec<EmuSurface>>,
    created: AtomicU32,
    reused: AtomicU32,
}

impl EmuSurfacePool {
    pub fn new() -> Self {
        Self::default()
    }

    fn free(&self) -> std::sync::MutexGuard<'_, Vec<EmuSurface>> {
        self.free.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take a cleared bitmap of the given shape, reusing a pooled one if possible
    pub fn acquire(&self, width: u32, height: u32, format: D3dFormat) -> DdResult<EmuSurface> {
        let pooled = {
            let mut free = self.free();
            free.iter().position(|e| e.matches(width, height, format)).map(|i| free.swap_remove(i))
        };

        match pooled {
            Some(mut emu) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                emu.bits_mut().fill(0);
                emu.last_palette_usn = 0;
                Ok(emu)
            }
            None => {
                let emu = EmuSurface::new(width, height, format)?;
                self.created.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Created emulated surface {}x{} {:?}", width, height, format);
                Ok(emu)
            }
        }
    }

    pub fn release(&self, emu: EmuSurface) {
        let mut free = self.free();
        if free.len() >= POOL_CAPACITY {
            free.remove(0);
        }
        free.push(emu);
    }

    /// Drop every pooled bitmap
    pub fn clear(&self) {
        let drained = std::mem::take(&mut *self.free());
        if !drained.is_empty() {
            tracing::debug!("Releasing {} pooled emulated surfaces", drained.len());
        }
    }

    pub fn pooled(&self) -> usize {
        self.free().len()
    }

    pub fn created(&self) -> u32 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn reused(&self) -> u32 {
        self.reused.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_surfaces_are_reused_by_shape() {
        let pool = EmuSurfacePool::new();
        let mut emu = pool.acquire(64, 32, D3dFormat::P8).unwrap();
        emu.bits_mut()[0] = 0xAB;
        pool.release(emu);
        assert_eq!(pool.pooled(), 1);

        let other = pool.acquire(64, 32, D3dFormat::R5G6B5).unwrap();
        assert_eq!(pool.created(), 2);

        let again = pool.acquire(64, 32, D3dFormat::P8).unwrap();
        assert_eq!(pool.reused(), 1);
        assert_eq!(again.bits()[0], 0, "reused memory comes back cleared");
        assert_eq!(pool.pooled(), 0);
        drop(other);
    }

    #[test]
    fn pool_is_bounded_and_clearable() {
        let pool = EmuSurfacePool::new();
        for i in 0..(POOL_CAPACITY as u32 + 4) {
            let emu = pool.acquire(8 + i, 8, D3dFormat::X8R8G8B8).unwrap();
            pool.release(emu);
        }
        assert_eq!(pool.pooled(), POOL_CAPACITY);
        pool.clear();
        assert_eq!(pool.pooled(), 0);
    }

    #[test]
    fn pitch_follows_gdi_rules() {
        let pool = EmuSurfacePool::new();
        let emu = pool.acquire(3, 2, D3dFormat::R8G8B8).unwrap();
        assert_eq!(emu.pitch, 12);
        assert_eq!(emu.size(), 24);
        assert_eq!(emu.bit_count(), 24);
    }
}
