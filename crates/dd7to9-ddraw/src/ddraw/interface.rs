//! Per-version DirectDraw adapters
//!
//! The application holds a `DirectDrawInterface` for each version it asked
//! for. Adapters check structure generations and version specific argument
//! shapes, then forward to the shared `DirectDraw`.

use std::sync::Arc;

use crate::clipper::Clipper;
use crate::desc::{
    AnyDesc, CooperativeFlags, EnumModeFlags, EnumSurfacesFlags, SurfaceCaps, SurfaceDesc2, VersionedDesc,
    VersionedDescMut, WaitVbFlags,
};
use crate::error::{DdError, DdResult};
use crate::interface::{Interface, InterfaceVersion, IID_IUNKNOWN};
use crate::palette::Palette;
use crate::surface::SurfaceInterface;
use crate::types::{DeviceContext, EnumControl, Guid, PaletteEntry, WindowHandle};

use super::{DdCaps, DeviceIdentifier, DirectDraw};

#[derive(Clone)]
pub struct DirectDrawInterface {
    inner: Arc<DirectDraw>,
    version: InterfaceVersion,
}

impl std::fmt::Debug for DirectDrawInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectDrawInterface").field("id", &self.inner.id()).field("version", &self.version).finish()
    }
}

/// Widen an optional filter, refusing one of the wrong generation
fn filter_desc(desc: Option<VersionedDesc<'_>>, uses_desc2: bool) -> DdResult<Option<SurfaceDesc2>> {
    let Some(desc) = desc else {
        return Ok(None);
    };
    if matches!(desc, VersionedDesc::Current(_)) != uses_desc2 {
        return Err(DdError::InvalidParams);
    }
    desc.to_desc2().map(Some).ok_or(DdError::InvalidParams)
}

impl DirectDrawInterface {
    /// Wrap `inner` and take one reference of `version`
    pub(crate) fn acquire(inner: Arc<DirectDraw>, version: InterfaceVersion) -> Self {
        inner.add_ref(version);
        Self { inner, version }
    }

    pub fn version(&self) -> InterfaceVersion {
        self.version
    }

    pub fn inner(&self) -> &Arc<DirectDraw> {
        &self.inner
    }

    fn uses_desc2(&self) -> bool {
        self.version.uses_desc2()
    }

    pub fn add_ref(&self) -> u32 {
        self.inner.add_ref(self.version)
    }

    pub fn release(&self) -> u32 {
        self.inner.release(self.version)
    }

    pub fn query_interface(&self, iid: &Guid) -> DdResult<Interface> {
        let version = if *iid == IID_IUNKNOWN {
            self.version
        } else {
            InterfaceVersion::from_ddraw_iid(iid).ok_or_else(|| {
                limit_debug!(20, "DirectDraw QueryInterface for unknown {:?}", iid);
                DdError::NoInterface
            })?
        };
        if self.inner.is_released() {
            return Err(DdError::InvalidObject);
        }
        Ok(Interface::DirectDraw(Self::acquire(self.inner.clone(), version)))
    }

    // ---------------------------------------------------------------------
    // Forwarders
    // ---------------------------------------------------------------------

    pub fn initialize(&self) -> DdResult<()> {
        self.inner.initialize()
    }

    pub fn compact(&self) -> DdResult<()> {
        self.inner.compact()
    }

    pub fn create_clipper(&self, flags: u32) -> DdResult<Arc<Clipper>> {
        self.inner.create_clipper(flags)
    }

    pub fn create_palette(&self, flags: u32, entries: &[PaletteEntry]) -> DdResult<Arc<Palette>> {
        self.inner.create_palette(flags, entries)
    }

    pub fn create_surface(&self, desc: VersionedDesc<'_>) -> DdResult<SurfaceInterface> {
        let desc = filter_desc(Some(desc), self.uses_desc2())?.ok_or(DdError::InvalidParams)?;
        self.inner.create_surface(&desc, self.version)
    }

    pub fn duplicate_surface(&self, original: &SurfaceInterface) -> DdResult<SurfaceInterface> {
        self.inner.duplicate_surface(original.inner(), self.version)
    }

    pub fn enum_display_modes(
        &self,
        flags: EnumModeFlags,
        filter: Option<VersionedDesc<'_>>,
        callback: &mut dyn FnMut(AnyDesc) -> EnumControl,
    ) -> DdResult<()> {
        let filter = filter_desc(filter, self.uses_desc2())?;
        self.inner.enum_display_modes(flags, filter.as_ref(), self.uses_desc2(), callback)
    }

    pub fn enum_surfaces(
        &self,
        flags: EnumSurfacesFlags,
        filter: Option<VersionedDesc<'_>>,
        callback: &mut dyn FnMut(SurfaceInterface, AnyDesc) -> EnumControl,
    ) -> DdResult<()> {
        let filter = filter_desc(filter, self.uses_desc2())?;
        self.inner.enum_surfaces(flags, filter.as_ref(), self.version, callback)
    }

    pub fn flip_to_gdi_surface(&self) -> DdResult<()> {
        self.inner.flip_to_gdi_surface()
    }

    pub fn get_caps(&self, driver: Option<&mut DdCaps>, hel: Option<&mut DdCaps>) -> DdResult<()> {
        self.inner.get_caps(driver, hel)
    }

    pub fn get_display_mode(&self, out: &mut VersionedDescMut<'_>) -> DdResult<()> {
        if !out.is_valid_for(self.uses_desc2()) {
            return Err(DdError::InvalidParams);
        }
        out.fill(&self.inner.get_display_mode()?);
        Ok(())
    }

    pub fn get_fourcc_codes(&self, out: Option<&mut [u32]>) -> DdResult<usize> {
        self.inner.get_fourcc_codes(out)
    }

    pub fn get_gdi_surface(&self) -> DdResult<SurfaceInterface> {
        self.inner.get_gdi_surface(self.version)
    }

    pub fn get_monitor_frequency(&self) -> DdResult<u32> {
        self.inner.get_monitor_frequency()
    }

    pub fn get_scan_line(&self) -> DdResult<u32> {
        self.inner.get_scan_line()
    }

    pub fn get_vertical_blank_status(&self) -> DdResult<bool> {
        self.inner.get_vertical_blank_status()
    }

    pub fn restore_display_mode(&self) -> DdResult<()> {
        self.inner.restore_display_mode()
    }

    pub fn set_cooperative_level(&self, hwnd: WindowHandle, flags: CooperativeFlags) -> DdResult<()> {
        let convert = self.inner.ctx().config().convert_to_ddraw7;
        self.inner.set_cooperative_level_as(hwnd, flags, self.version.effective(convert))
    }

    /// Version 1 has no refresh rate or flags; pass zero for both
    pub fn set_display_mode(&self, width: u32, height: u32, bpp: u32, refresh_rate: u32, flags: u32) -> DdResult<()> {
        self.inner.set_display_mode(width, height, bpp, refresh_rate, flags)
    }

    pub fn wait_for_vertical_blank(&self, flags: WaitVbFlags) -> DdResult<()> {
        self.inner.wait_for_vertical_blank(flags)
    }

    /// Versions before 4 pass a `DDSCAPS`, which only has the first caps word
    pub fn get_available_vid_mem(&self, caps: Option<&SurfaceCaps>) -> DdResult<(u32, u32)> {
        let caps = caps.map(|caps| if self.uses_desc2() { *caps } else { SurfaceCaps::new(caps.caps) });
        self.inner.get_available_vid_mem(caps.as_ref())
    }

    pub fn get_surface_from_dc(&self, dc: DeviceContext) -> DdResult<()> {
        self.inner.get_surface_from_dc(dc)
    }

    pub fn restore_all_surfaces(&self) -> DdResult<()> {
        self.inner.restore_all_surfaces()
    }

    pub fn test_cooperative_level(&self) -> DdResult<()> {
        self.inner.test_cooperative_level()
    }

    /// `DDDEVICEIDENTIFIER` from version 4 has no WHQL level
    pub fn get_device_identifier(&self, flags: u32) -> DdResult<DeviceIdentifier> {
        let mut identifier = self.inner.get_device_identifier(flags)?;
        if self.version != InterfaceVersion::V7 {
            identifier.whql_level = 0;
        }
        Ok(identifier)
    }

    pub fn start_mode_test(&self) -> DdResult<()> {
        self.inner.start_mode_test()
    }

    pub fn evaluate_mode(&self, flags: u32) -> DdResult<u32> {
        self.inner.evaluate_mode(flags)
    }

    pub fn evict_managed_textures(&self) -> DdResult<()> {
        self.inner.evict_managed_textures()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::harness;
    use crate::desc::{Caps, Caps2, SurfaceDesc};
    use crate::format::D3dFormat;
    use crate::interface::{IID_IDIRECTDRAW2, IID_IDIRECTDRAW7, IID_IDIRECTDRAWSURFACE7};
    use crate::surface::testing::offscreen_desc;

    #[test]
    fn query_interface_moves_between_versions() {
        let h = harness();
        let v1 = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V1).unwrap();
        let v7 = v1.query_interface(&IID_IDIRECTDRAW7).unwrap().into_ddraw().unwrap();
        assert_eq!(v7.version(), InterfaceVersion::V7);
        assert!(Arc::ptr_eq(v1.inner(), v7.inner()));

        let unknown = v7.query_interface(&IID_IUNKNOWN).unwrap();
        assert_eq!(unknown.version(), InterfaceVersion::V7);
        assert!(matches!(v7.query_interface(&IID_IDIRECTDRAWSURFACE7), Err(DdError::NoInterface)));

        assert_eq!(v1.release(), 0);
        assert!(!v1.inner().is_released(), "other versions keep the container");
        unknown.into_ddraw().unwrap().release();
        assert_eq!(v7.release(), 0);
        assert!(v7.inner().is_released());
        assert!(matches!(v7.query_interface(&IID_IDIRECTDRAW2), Err(DdError::InvalidObject)));
    }

    #[test]
    fn descriptions_must_match_the_version() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V1).unwrap();
        let current = offscreen_desc(4, 4, D3dFormat::R5G6B5);
        assert_eq!(dd.create_surface(VersionedDesc::Current(&current)).err(), Some(DdError::InvalidParams));

        let mut mode = SurfaceDesc2::default();
        assert_eq!(dd.get_display_mode(&mut VersionedDescMut::Current(&mut mode)), Err(DdError::InvalidParams));
        let mut legacy = SurfaceDesc::default();
        dd.get_display_mode(&mut VersionedDescMut::Legacy(&mut legacy)).unwrap();
        assert_eq!((legacy.width, legacy.height), (1024, 768));

        let mut modes = 0;
        let filter = SurfaceDesc::from(&current);
        assert_eq!(
            dd.enum_display_modes(EnumModeFlags::empty(), Some(VersionedDesc::Current(&current)), &mut |_| {
                EnumControl::Continue
            }),
            Err(DdError::InvalidParams)
        );
        dd.enum_display_modes(EnumModeFlags::empty(), Some(VersionedDesc::Legacy(&filter)), &mut |desc| {
            assert!(matches!(desc, AnyDesc::Legacy(_)));
            modes += 1;
            EnumControl::Continue
        })
        .unwrap();
        assert_eq!(modes, 0, "no adapter mode is 4x4");
        dd.release();
    }

    #[test]
    fn legacy_memory_queries_ignore_extended_caps() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V2).unwrap();
        let caps = SurfaceCaps { caps2: Caps2::TEXTUREMANAGE, ..SurfaceCaps::new(Caps::VIDEOMEMORY) };
        let (total, free) = dd.get_available_vid_mem(Some(&caps)).unwrap();
        assert!(free < total);
        dd.release();
    }

    #[test]
    fn cooperative_level_uses_the_adapter_version() {
        let h = harness();
        let v7 = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let v2 = v7.query_interface(&IID_IDIRECTDRAW2).unwrap().into_ddraw().unwrap();
        let hwnd = h.windows.create_window(320, 240);
        v2.set_cooperative_level(hwnd, CooperativeFlags::NORMAL).unwrap();
        assert!(h.ctx.lock_state().device.fpu_preserve);
        v7.set_cooperative_level(hwnd, CooperativeFlags::NORMAL).unwrap();
        assert!(!h.ctx.lock_state().device.fpu_preserve);
        v2.release();
        v7.release();
    }
}
