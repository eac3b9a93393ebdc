//! GDI bitmap memory behind emulated surfaces
//!
//! On Windows this is a DIB section selected into a memory DC, so GetDC can
//! hand the DC straight to the application. Elsewhere it is plain heap memory
//! with a synthetic DC handle.

use crate::error::DdResult;
use crate::format::D3dFormat;
use crate::types::{DeviceContext, PaletteEntry};

pub use platform::DibSection;

/// Bit masks of a DIB at `format`, `None` when the default layout applies
fn bitfield_masks(format: D3dFormat) -> Option<[u32; 3]> {
    match format {
        D3dFormat::R5G6B5 => Some([0xF800, 0x07E0, 0x001F]),
        D3dFormat::X1R5G5B5 | D3dFormat::A1R5G5B5 => Some([0x7C00, 0x03E0, 0x001F]),
        D3dFormat::X4R4G4B4 | D3dFormat::A4R4G4B4 => Some([0x0F00, 0x00F0, 0x000F]),
        _ => None,
    }
}

#[cfg(not(windows))]
mod platform {
    use std::sync::atomic::{AtomicIsize, Ordering};

    use super::*;
    use crate::format::compute_pitch;

    static NEXT_DC: AtomicIsize = AtomicIsize::new(0x7D00);

    pub struct DibSection {
        dc: DeviceContext,
        memory: Box<[u8]>,
        masks: Option<[u32; 3]>,
        color_table: Box<[PaletteEntry; 256]>,
    }

    impl DibSection {
        pub fn new(width: u32, height: u32, format: D3dFormat) -> DdResult<Self> {
            let pitch = compute_pitch(width, format.bits_per_pixel());
            Ok(Self {
                dc: DeviceContext(NEXT_DC.fetch_add(4, Ordering::Relaxed)),
                memory: vec![0u8; (pitch * height) as usize].into_boxed_slice(),
                masks: bitfield_masks(format),
                color_table: Box::new([PaletteEntry::default(); 256]),
            })
        }

        pub fn dc(&self) -> DeviceContext {
            self.dc
        }

        pub fn bits(&self) -> &[u8] {
            &self.memory
        }

        pub fn bits_mut(&mut self) -> &mut [u8] {
            &mut self.memory
        }

        pub fn masks(&self) -> Option<[u32; 3]> {
            self.masks
        }

        pub fn set_color_table(&mut self, entries: &[PaletteEntry; 256]) {
            *self.color_table = *entries;
        }

        pub fn color_table(&self) -> &[PaletteEntry; 256] {
            &self.color_table
        }
    }
}

#[cfg(windows)]
mod platform {
    use std::ffi::c_void;

    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::Graphics::Gdi::{
        CreateCompatibleDC, CreateDIBSection, DeleteDC, DeleteObject, SelectObject, SetDIBColorTable, BITMAPINFO,
        BITMAPINFOHEADER, BI_BITFIELDS, BI_RGB, DIB_RGB_COLORS, HBITMAP, HDC, HGDIOBJ, RGBQUAD,
    };

    use super::*;
    use crate::error::DdError;
    use crate::format::compute_pitch;

    /// `BITMAPINFO` with room for a full color table
    #[repr(C)]
    struct DibInfo {
        header: BITMAPINFOHEADER,
        colors: [RGBQUAD; 256],
    }

    pub struct DibSection {
        dc: HDC,
        bitmap: HBITMAP,
        previous: HGDIOBJ,
        bits: *mut u8,
        len: usize,
        masks: Option<[u32; 3]>,
        color_table: Box<[PaletteEntry; 256]>,
    }

    // The DIB memory and the DC are only touched under the owning surface's lock
    unsafe impl Send for DibSection {}

    impl DibSection {
        pub fn new(width: u32, height: u32, format: D3dFormat) -> DdResult<Self> {
            let bit_count = format.bits_per_pixel();
            let masks = bitfield_masks(format);
            let mut info = DibInfo {
                header: BITMAPINFOHEADER {
                    biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                    biWidth: width as i32,
                    biHeight: -(height as i32),
                    biPlanes: 1,
                    biBitCount: bit_count as u16,
                    biCompression: if masks.is_some() { BI_BITFIELDS.0 } else { BI_RGB.0 },
                    biClrUsed: if bit_count == 8 { 256 } else { 0 },
                    ..Default::default()
                },
                colors: [RGBQUAD::default(); 256],
            };
            if let Some(masks) = masks {
                for (slot, mask) in info.colors.iter_mut().zip(masks) {
                    let b = mask.to_le_bytes();
                    *slot = RGBQUAD { rgbBlue: b[0], rgbGreen: b[1], rgbRed: b[2], rgbReserved: b[3] };
                }
            }

            unsafe {
                let dc = CreateCompatibleDC(HDC::default());
                if dc.is_invalid() {
                    tracing::error!("CreateCompatibleDC failed");
                    return Err(DdError::Generic);
                }
                let mut bits: *mut c_void = std::ptr::null_mut();
                let bitmap = match CreateDIBSection(
                    dc,
                    &info as *const DibInfo as *const BITMAPINFO,
                    DIB_RGB_COLORS,
                    &mut bits,
                    HANDLE::default(),
                    0,
                ) {
                    Ok(bitmap) if !bits.is_null() => bitmap,
                    other => {
                        tracing::error!("CreateDIBSection failed: {:?}", other.err());
                        let _ = DeleteDC(dc);
                        return Err(DdError::OutOfMemory);
                    }
                };
                let previous = SelectObject(dc, HGDIOBJ(bitmap.0));
                Ok(Self {
                    dc,
                    bitmap,
                    previous,
                    bits: bits as *mut u8,
                    len: (compute_pitch(width, bit_count) * height) as usize,
                    masks,
                    color_table: Box::new([PaletteEntry::default(); 256]),
                })
            }
        }

        pub fn dc(&self) -> DeviceContext {
            DeviceContext(self.dc.0 as isize)
        }

        pub fn bits(&self) -> &[u8] {
            unsafe { std::slice::from_raw_parts(self.bits, self.len) }
        }

        pub fn bits_mut(&mut self) -> &mut [u8] {
            unsafe { std::slice::from_raw_parts_mut(self.bits, self.len) }
        }

        pub fn masks(&self) -> Option<[u32; 3]> {
            self.masks
        }

        pub fn set_color_table(&mut self, entries: &[PaletteEntry; 256]) {
            *self.color_table = *entries;
            let quads: Vec<RGBQUAD> = entries
                .iter()
                .map(|e| RGBQUAD { rgbBlue: e.blue, rgbGreen: e.green, rgbRed: e.red, rgbReserved: 0 })
                .collect();
            unsafe {
                SetDIBColorTable(self.dc, 0, &quads);
            }
        }

        pub fn color_table(&self) -> &[PaletteEntry; 256] {
            &self.color_table
        }
    }

    impl Drop for DibSection {
        fn drop(&mut self) {
            unsafe {
                SelectObject(self.dc, self.previous);
                let _ = DeleteObject(HGDIOBJ(self.bitmap.0));
                let _ = DeleteDC(self.dc);
            }
        }
    }
}
