//! Capability queries
//!
//! Caps are derived from the Direct3D9 adapter, never from a real DirectDraw
//! driver. Video memory figures are clamped into the range old games expect
//! to see.

use bitflags::bitflags;

use crate::backend::{DeviceCaps, Usage};
use crate::desc::{Caps, SurfaceCaps};
use crate::error::{DdError, DdResult};
use crate::format::{D3dFormat, FOURCC_CANDIDATES};
use crate::types::Guid;

use super::DirectDraw;

/// `sizeof(DDCAPS_DX1)`
pub const DDCAPS_DX1_SIZE: u32 = 172;
/// `sizeof(DDCAPS_DX3)`
pub const DDCAPS_DX3_SIZE: u32 = 316;
/// `sizeof(DDCAPS_DX5)`
pub const DDCAPS_DX5_SIZE: u32 = 364;
/// `sizeof(DDCAPS_DX6)`
pub const DDCAPS_DX6_SIZE: u32 = 380;
/// `sizeof(DDCAPS_DX7)`
pub const DDCAPS_DX7_SIZE: u32 = 380;

/// Largest video memory size reported
const MAX_VID_MEMORY: u32 = 0x2000_0000;
/// Video memory always reported as in use
const MIN_USED_VID_MEMORY: u32 = 0x0010_0000;

bitflags! {
    /// `DDCAPS_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DdCapsFlags: u32 {
        const THREE_D = 0x0000_0001;
        const BLT = 0x0000_0040;
        const BLTQUEUE = 0x0000_0080;
        const BLTFOURCC = 0x0000_0100;
        const BLTSTRETCH = 0x0000_0200;
        const GDI = 0x0000_0400;
        const COLORKEY = 0x0040_0000;
        const PALETTE = 0x0200_0000;
        const BLTCOLORFILL = 0x0400_0000;
        const CANBLTSYSMEM = 0x8000_0000;
    }

    /// `DDCAPS2_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DdCaps2Flags: u32 {
        const NO2DDURING3DSCENE = 0x0000_0002;
        const WIDESURFACES = 0x0000_1000;
        const PRIMARYGAMMA = 0x0002_0000;
        const CANRENDERWINDOWED = 0x0008_0000;
        const NOPAGELOCKREQUIRED = 0x0040_0000;
        const FLIPINTERVAL = 0x0020_0000;
        const FLIPNOVSYNC = 0x0100_0000;
    }

    /// `DDCKEYCAPS_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ColorKeyCaps: u32 {
        const DESTBLT = 0x0000_0001;
        const SRCBLT = 0x0000_0200;
    }

    /// `DDFXCAPS_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FxCaps: u32 {
        const BLTMIRRORLEFTRIGHT = 0x0000_0010;
        const BLTMIRRORUPDOWN = 0x0000_0020;
        const BLTSHRINKX = 0x0000_0200;
        const BLTSHRINKY = 0x0000_0800;
        const BLTSTRETCHX = 0x0000_2000;
        const BLTSTRETCHY = 0x0000_8000;
    }

    /// `DDPCAPS_*` reported for the driver
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PaletteCaps: u32 {
        const EIGHTBIT = 0x0000_0004;
        const PRIMARYSURFACE = 0x0000_0010;
        const ALLOW256 = 0x0000_0040;
    }
}

/// The `DDCAPS` fields the shim reports
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DdCaps {
    pub size: u32,
    pub caps: DdCapsFlags,
    pub caps2: DdCaps2Flags,
    pub ckey_caps: ColorKeyCaps,
    pub fx_caps: FxCaps,
    pub pal_caps: PaletteCaps,
    pub num_fourcc_codes: u32,
    pub vid_mem_total: u32,
    pub vid_mem_free: u32,
    pub scaps: SurfaceCaps,
}

impl Default for DdCaps {
    fn default() -> Self {
        Self {
            size: DDCAPS_DX7_SIZE,
            caps: DdCapsFlags::empty(),
            caps2: DdCaps2Flags::empty(),
            ckey_caps: ColorKeyCaps::empty(),
            fx_caps: FxCaps::empty(),
            pal_caps: PaletteCaps::empty(),
            num_fourcc_codes: 0,
            vid_mem_total: 0,
            vid_mem_free: 0,
            scaps: SurfaceCaps::default(),
        }
    }
}

impl DdCaps {
    fn from_device(device: &DeviceCaps) -> Self {
        let mut caps = DdCapsFlags::BLT
            | DdCapsFlags::BLTQUEUE
            | DdCapsFlags::BLTFOURCC
            | DdCapsFlags::BLTCOLORFILL
            | DdCapsFlags::COLORKEY
            | DdCapsFlags::PALETTE
            | DdCapsFlags::CANBLTSYSMEM
            | DdCapsFlags::GDI;
        let mut fx_caps = FxCaps::BLTMIRRORLEFTRIGHT | FxCaps::BLTMIRRORUPDOWN;
        if device.stretch_rect_filter {
            caps |= DdCapsFlags::BLTSTRETCH;
            fx_caps |= FxCaps::BLTSHRINKX | FxCaps::BLTSHRINKY | FxCaps::BLTSTRETCHX | FxCaps::BLTSTRETCHY;
        }
        if device.hardware_vertex_processing {
            caps |= DdCapsFlags::THREE_D;
        }
        let mut caps2 = DdCaps2Flags::CANRENDERWINDOWED
            | DdCaps2Flags::NOPAGELOCKREQUIRED
            | DdCaps2Flags::FLIPINTERVAL
            | DdCaps2Flags::FLIPNOVSYNC
            | DdCaps2Flags::PRIMARYGAMMA;
        if device.non_pow2_textures {
            caps2 |= DdCaps2Flags::WIDESURFACES;
        }
        let mut scaps = Caps::BACKBUFFER
            | Caps::COMPLEX
            | Caps::FLIP
            | Caps::FRONTBUFFER
            | Caps::OFFSCREENPLAIN
            | Caps::PRIMARYSURFACE
            | Caps::SYSTEMMEMORY
            | Caps::VIDEOMEMORY
            | Caps::LOCALVIDMEM
            | Caps::VISIBLE
            | Caps::PALETTE;
        if device.max_simultaneous_textures > 0 {
            scaps |= Caps::TEXTURE | Caps::THREE_D_DEVICE | Caps::ZBUFFER | Caps::MIPMAP;
        }
        Self {
            caps,
            caps2,
            ckey_caps: ColorKeyCaps::SRCBLT,
            fx_caps,
            pal_caps: PaletteCaps::EIGHTBIT | PaletteCaps::PRIMARYSURFACE | PaletteCaps::ALLOW256,
            scaps: SurfaceCaps::new(scaps),
            ..Default::default()
        }
    }
}

/// Snap an application supplied `DDCAPS` size to a known layout
fn normalize_caps_size(size: u32) -> u32 {
    match size {
        DDCAPS_DX3_SIZE | DDCAPS_DX5_SIZE | DDCAPS_DX6_SIZE => size,
        _ => DDCAPS_DX1_SIZE,
    }
}

/// Keep reported memory between `MIN_USED_VID_MEMORY` in use and
/// `MAX_VID_MEMORY` in total
fn adjust_vid_memory(total: u32, free: u32) -> (u32, u32) {
    let total = match (total, free) {
        (0, 0) => MAX_VID_MEMORY,
        (0, free) => free.saturating_add(MIN_USED_VID_MEMORY),
        (total, _) => total,
    };
    let total = total.clamp(MIN_USED_VID_MEMORY, MAX_VID_MEMORY);
    let limit = total - MIN_USED_VID_MEMORY;
    let free = if free != 0 { free.min(limit) } else { limit };
    (total, free)
}

/// `DDDEVICEIDENTIFIER2`
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct DeviceIdentifier {
    pub driver: String,
    pub description: String,
    pub driver_version: u64,
    pub vendor_id: u32,
    pub device_id: u32,
    pub sub_sys_id: u32,
    pub revision: u32,
    pub device_identifier: Guid,
    pub whql_level: u32,
}

impl DirectDraw {
    /// Fill the driver and emulation caps; at least one must be requested
    pub fn get_caps(&self, driver: Option<&mut DdCaps>, hel: Option<&mut DdCaps>) -> DdResult<()> {
        self.live()?;
        if driver.is_none() && hel.is_none() {
            return Err(DdError::InvalidParams);
        }
        let device_caps = self.ctx.with_state(|state| -> DdResult<DeviceCaps> {
            self.ctx.ensure_object(state)?;
            let d3d9 = state.d3d9.as_ref().ok_or(DdError::Generic)?;
            Ok(d3d9.device_caps()?)
        })?;
        let (vid_mem_total, vid_mem_free) =
            self.get_available_vid_mem(Some(&SurfaceCaps::new(Caps::VIDEOMEMORY)))?;

        let mut caps = DdCaps::from_device(&device_caps);
        caps.vid_mem_total = vid_mem_total;
        caps.vid_mem_free = vid_mem_free;
        if caps.caps.contains(DdCapsFlags::BLTFOURCC) {
            caps.num_fourcc_codes = self.get_fourcc_codes(None)? as u32;
        }

        for out in [driver, hel].into_iter().flatten() {
            let size = normalize_caps_size(out.size);
            *out = DdCaps { size, ..caps };
        }
        Ok(())
    }

    /// Total and free memory for surfaces with `caps`
    pub fn get_available_vid_mem(&self, caps: Option<&SurfaceCaps>) -> DdResult<(u32, u32)> {
        self.live()?;
        let Some(caps) = caps else {
            return Err(DdError::InvalidParams);
        };

        let (total, free) = if caps.caps.intersects(Caps::TEXTURE | Caps::OFFSCREENPLAIN) {
            self.ctx.ensure_device()?;
            let free = self.ctx.lock_device().as_ref().map(|dev| dev.available_texture_mem()).unwrap_or(0);
            (0, free)
        } else if caps.caps.intersects(Caps::VIDEOMEMORY | Caps::LOCALVIDMEM | Caps::THREE_D_DEVICE) {
            let identifier = self.ctx.with_state(|state| -> DdResult<_> {
                self.ctx.ensure_object(state)?;
                let d3d9 = state.d3d9.as_ref().ok_or(DdError::Generic)?;
                Ok(d3d9.adapter_identifier()?)
            })?;
            let memory = identifier.video_memory.unwrap_or(0).min(u64::from(u32::MAX)) as u32;
            (memory, 0)
        } else {
            limit_warn!(100, "Video memory query for unsupported caps {:?}", caps.caps);
            return Err(DdError::InvalidParams);
        };

        let adjusted = adjust_vid_memory(total, free);
        tracing::trace!("Available video memory for {:?}: {:?}", caps.caps, adjusted);
        Ok(adjusted)
    }

    /// FourCC codes the adapter can create surfaces for
    ///
    /// Returns the number of codes. With `out`, copies as many as fit and
    /// fails with `InvalidParams` when it is too small.
    pub fn get_fourcc_codes(&self, out: Option<&mut [u32]>) -> DdResult<usize> {
        self.live()?;
        let codes = self.ctx.with_state(|state| -> DdResult<Vec<u32>> {
            if let Some(codes) = &state.fourcc_codes {
                return Ok(codes.clone());
            }
            self.ctx.ensure_object(state)?;
            let d3d9 = state.d3d9.as_ref().ok_or(DdError::Generic)?;
            let codes: Vec<u32> = FOURCC_CANDIDATES
                .iter()
                .filter(|&&format| d3d9.check_device_format(D3dFormat::X8R8G8B8, Usage::empty(), format))
                .map(|format| format.raw())
                .collect();
            tracing::debug!("Adapter supports {} FourCC formats", codes.len());
            state.fourcc_codes = Some(codes.clone());
            Ok(codes)
        })?;

        if let Some(out) = out {
            let count = codes.len().min(out.len());
            out[..count].copy_from_slice(&codes[..count]);
            if out.len() < codes.len() {
                return Err(DdError::InvalidParams);
            }
        }
        Ok(codes.len())
    }

    pub fn get_device_identifier(&self, flags: u32) -> DdResult<DeviceIdentifier> {
        self.live()?;
        if flags != 0 {
            limit_debug!(10, "Ignoring device identifier flags {:#x}", flags);
        }
        let identifier = self.ctx.with_state(|state| -> DdResult<_> {
            self.ctx.ensure_object(state)?;
            let d3d9 = state.d3d9.as_ref().ok_or(DdError::Generic)?;
            Ok(d3d9.adapter_identifier()?)
        })?;
        Ok(DeviceIdentifier {
            driver: identifier.driver,
            description: identifier.description,
            driver_version: identifier.driver_version,
            vendor_id: identifier.vendor_id,
            device_id: identifier.device_id,
            sub_sys_id: identifier.sub_sys_id,
            revision: identifier.revision,
            device_identifier: Guid::from_u128(identifier.device_identifier),
            whql_level: identifier.whql_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::harness;
    use crate::interface::InterfaceVersion;

    const MB: u32 = 1024 * 1024;

    #[test]
    fn video_memory_is_clamped() {
        assert_eq!(adjust_vid_memory(0, 0), (512 * MB, 511 * MB));
        assert_eq!(adjust_vid_memory(0, 100 * MB), (101 * MB, 100 * MB));
        assert_eq!(adjust_vid_memory(2048 * MB, 0), (512 * MB, 511 * MB));
        assert_eq!(adjust_vid_memory(64 * MB, 128 * MB), (64 * MB, 63 * MB));
        assert_eq!(adjust_vid_memory(64 * MB, 10 * MB), (64 * MB, 10 * MB));
    }

    #[test]
    fn caps_sizes_snap_to_known_layouts() {
        assert_eq!(normalize_caps_size(DDCAPS_DX5_SIZE), DDCAPS_DX5_SIZE);
        assert_eq!(normalize_caps_size(DDCAPS_DX7_SIZE), DDCAPS_DX7_SIZE);
        assert_eq!(normalize_caps_size(0), DDCAPS_DX1_SIZE);
        assert_eq!(normalize_caps_size(999), DDCAPS_DX1_SIZE);
    }

    #[test]
    fn caps_report_memory_and_fourcc_count() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        assert_eq!(dd.get_caps(None, None), Err(DdError::InvalidParams));

        let mut driver = DdCaps { size: DDCAPS_DX3_SIZE, ..Default::default() };
        let mut hel = DdCaps { size: 7, ..Default::default() };
        dd.get_caps(Some(&mut driver), Some(&mut hel)).unwrap();
        assert_eq!(driver.size, DDCAPS_DX3_SIZE);
        assert_eq!(hel.size, DDCAPS_DX1_SIZE);
        assert!(driver.caps.contains(DdCapsFlags::BLT | DdCapsFlags::BLTSTRETCH | DdCapsFlags::BLTFOURCC));
        assert_eq!(driver.num_fourcc_codes, 5);
        assert_eq!((driver.vid_mem_total, driver.vid_mem_free), (256 * MB, 255 * MB));
        assert_eq!(hel.vid_mem_total, driver.vid_mem_total);
        dd.release();
    }

    #[test]
    fn available_memory_depends_on_surface_caps() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        assert_eq!(dd.get_available_vid_mem(None), Err(DdError::InvalidParams));
        assert_eq!(
            dd.get_available_vid_mem(Some(&SurfaceCaps::new(Caps::SYSTEMMEMORY))),
            Err(DdError::InvalidParams)
        );
        let (total, free) = dd.get_available_vid_mem(Some(&SurfaceCaps::new(Caps::TEXTURE))).unwrap();
        assert!(total <= MAX_VID_MEMORY);
        assert_eq!(total - free, MIN_USED_VID_MEMORY);
        assert_eq!(
            dd.get_available_vid_mem(Some(&SurfaceCaps::new(Caps::LOCALVIDMEM))),
            Ok((256 * MB, 255 * MB))
        );
        dd.release();
    }

    #[test]
    fn fourcc_codes_are_listed_and_cached() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        assert_eq!(dd.get_fourcc_codes(None), Ok(5));

        let mut codes = [0u32; 8];
        assert_eq!(dd.get_fourcc_codes(Some(&mut codes)), Ok(5));
        assert_eq!(codes[0], D3dFormat::Uyvy.raw());
        assert_eq!(codes[1], D3dFormat::Yuy2.raw());
        assert_eq!(codes[5], 0);

        let mut short = [0u32; 2];
        assert_eq!(dd.get_fourcc_codes(Some(&mut short)), Err(DdError::InvalidParams));
        assert_eq!(short[1], D3dFormat::Yuy2.raw());
        assert!(h.ctx.lock_state().fourcc_codes.is_some());
        dd.release();
    }

    #[test]
    fn device_identifier_comes_from_the_adapter() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let id = dd.get_device_identifier(0).unwrap();
        assert_eq!(id.vendor_id, 0x1414);
        assert_eq!(id.driver, "dd7to9 software");
        assert_eq!(id.whql_level, 1);

        let old = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V4).unwrap();
        assert_eq!(old.get_device_identifier(0).unwrap().whql_level, 0, "only version 7 reports WHQL");
        old.release();
        dd.release();
    }
}
