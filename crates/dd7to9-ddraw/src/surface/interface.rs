//! Per-version surface adapters
//!
//! A `SurfaceInterface` is what the application holds: the shared surface
//! plus the interface version it was obtained through. Structure generation
//! checks happen here, everything else forwards to `Surface`.

use std::sync::Arc;

use crate::clipper::Clipper;
use crate::ddraw::DirectDrawInterface;
use crate::desc::{
    AnyDesc, BltFastFlags, BltFlags, BltFx, BltStatusFlags, ColorKeyFlags, FlipFlags, FlipStatusFlags, LockFlags,
    PixelFormat, SurfaceCaps, VersionedDesc, VersionedDescMut,
};
use crate::error::{DdError, DdResult};
use crate::interface::{Interface, InterfaceVersion, IID_IUNKNOWN};
use crate::palette::Palette;
use crate::types::{ColorKey, DeviceContext, EnumControl, Guid, Rect};

use super::{BltBatchEntry, Surface, SurfaceLock};

#[derive(Clone)]
pub struct SurfaceInterface {
    inner: Arc<Surface>,
    version: InterfaceVersion,
}

impl std::fmt::Debug for SurfaceInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceInterface").field("id", &self.inner.id()).field("version", &self.version).finish()
    }
}

impl SurfaceInterface {
    /// Wrap `inner` and take one reference of `version`
    pub(crate) fn acquire(inner: Arc<Surface>, version: InterfaceVersion) -> Self {
        inner.add_ref(version);
        Self { inner, version }
    }

    pub fn version(&self) -> InterfaceVersion {
        self.version
    }

    pub fn inner(&self) -> &Arc<Surface> {
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

    /// Hand out the adapter for another surface version
    pub fn query_interface(&self, iid: &Guid) -> DdResult<Interface> {
        let version = if *iid == IID_IUNKNOWN {
            self.version
        } else {
            InterfaceVersion::from_surface_iid(iid).ok_or_else(|| {
                limit_debug!(20, "Surface QueryInterface for unknown {:?}", iid);
                DdError::NoInterface
            })?
        };
        if self.inner.is_destroyed() {
            return Err(DdError::InvalidObject);
        }
        Ok(Interface::Surface(Self::acquire(self.inner.clone(), version)))
    }

    pub fn get_surface_desc(&self, out: &mut VersionedDescMut<'_>) -> DdResult<()> {
        if !out.is_valid_for(self.uses_desc2()) {
            return Err(DdError::InvalidParams);
        }
        out.fill(&self.inner.get_surface_desc()?);
        Ok(())
    }

    pub fn set_surface_desc(&self, desc: VersionedDesc<'_>, flags: u32) -> DdResult<()> {
        if matches!(desc, VersionedDesc::Current(_)) != self.uses_desc2() {
            return Err(DdError::InvalidParams);
        }
        self.inner.set_surface_desc(&desc, flags)
    }

    pub fn get_pixel_format(&self) -> DdResult<PixelFormat> {
        self.inner.get_pixel_format()
    }

    /// Versions 1 to 3 only see the first caps word
    pub fn get_caps(&self) -> DdResult<SurfaceCaps> {
        let caps = self.inner.get_caps()?;
        Ok(if self.uses_desc2() { caps } else { SurfaceCaps::new(caps.caps) })
    }

    pub fn lock(&self, rect: Option<Rect>, out: &mut VersionedDescMut<'_>, flags: LockFlags) -> DdResult<SurfaceLock> {
        if !out.is_valid_for(self.uses_desc2()) {
            return Err(DdError::InvalidParams);
        }
        let lock = self.inner.lock(rect, flags)?;
        out.fill(&lock.desc);
        Ok(lock)
    }

    pub fn unlock(&self, rect: Option<Rect>) -> DdResult<()> {
        self.inner.unlock(rect)
    }

    pub fn blt(
        &self,
        dest_rect: Option<Rect>,
        src: Option<&SurfaceInterface>,
        src_rect: Option<Rect>,
        flags: BltFlags,
        fx: Option<&BltFx>,
    ) -> DdResult<()> {
        self.inner.blt(dest_rect, src.map(|s| &*s.inner), src_rect, flags, fx)
    }

    pub fn blt_fast(
        &self,
        x: u32,
        y: u32,
        src: &SurfaceInterface,
        src_rect: Option<Rect>,
        flags: BltFastFlags,
    ) -> DdResult<()> {
        self.inner.blt_fast(x, y, &src.inner, src_rect, flags)
    }

    pub fn blt_batch(&self, entries: &[BltBatchEntry<'_>], flags: u32) -> DdResult<()> {
        self.inner.blt_batch(entries, flags)
    }

    pub fn get_blt_status(&self, flags: BltStatusFlags) -> DdResult<()> {
        self.inner.get_blt_status(flags)
    }

    pub fn flip(&self, target: Option<&SurfaceInterface>, flags: FlipFlags) -> DdResult<()> {
        self.inner.flip(target.map(|t| &t.inner), flags)
    }

    pub fn get_flip_status(&self, flags: FlipStatusFlags) -> DdResult<()> {
        self.inner.get_flip_status(flags)
    }

    pub fn add_attached_surface(&self, other: &SurfaceInterface) -> DdResult<()> {
        self.inner.add_attached_surface(&other.inner)
    }

    pub fn delete_attached_surface(&self, other: Option<&SurfaceInterface>) -> DdResult<()> {
        self.inner.delete_attached_surface(other.map(|o| &o.inner))
    }

    /// The returned adapter holds a reference of this adapter's version
    pub fn get_attached_surface(&self, caps: &SurfaceCaps) -> DdResult<SurfaceInterface> {
        let wanted = if self.uses_desc2() { *caps } else { SurfaceCaps::new(caps.caps) };
        let surface = self.inner.get_attached_surface(&wanted)?;
        Ok(Self::acquire(surface, self.version))
    }

    /// Each adapter handed to `callback` carries a reference the callee owns
    pub fn enum_attached_surfaces(
        &self,
        callback: &mut dyn FnMut(SurfaceInterface, AnyDesc) -> EnumControl,
    ) -> DdResult<()> {
        let (version, uses_desc2) = (self.version, self.uses_desc2());
        self.inner.enum_attached_surfaces(&mut |surface, desc| {
            callback(Self::acquire(surface.clone(), version), AnyDesc::for_version(desc, uses_desc2))
        })
    }

    pub fn get_dc(&self) -> DdResult<DeviceContext> {
        self.inner.get_dc()
    }

    pub fn release_dc(&self, dc: DeviceContext) -> DdResult<()> {
        self.inner.release_dc(dc)
    }

    pub fn get_color_key(&self, flags: ColorKeyFlags) -> DdResult<ColorKey> {
        self.inner.get_color_key(flags)
    }

    pub fn set_color_key(&self, flags: ColorKeyFlags, key: Option<ColorKey>) -> DdResult<()> {
        self.inner.set_color_key(flags, key)
    }

    pub fn get_palette(&self) -> DdResult<Arc<Palette>> {
        self.inner.get_palette()
    }

    pub fn set_palette(&self, palette: Option<Arc<Palette>>) -> DdResult<()> {
        self.inner.set_palette(palette)
    }

    pub fn get_clipper(&self) -> DdResult<Arc<Clipper>> {
        self.inner.get_clipper()
    }

    pub fn set_clipper(&self, clipper: Option<Arc<Clipper>>) -> DdResult<()> {
        self.inner.set_clipper(clipper)
    }

    pub fn is_lost(&self) -> DdResult<()> {
        self.inner.is_lost()
    }

    pub fn restore(&self) -> DdResult<()> {
        self.inner.restore()
    }

    pub fn initialize(&self, _dd: &DirectDrawInterface, _desc: VersionedDesc<'_>) -> DdResult<()> {
        self.inner.initialize()
    }

    /// The owning container through the matching DirectDraw version
    pub fn get_dd_interface(&self) -> DdResult<DirectDrawInterface> {
        let version = match self.version {
            InterfaceVersion::V4 | InterfaceVersion::V7 => self.version,
            _ => InterfaceVersion::V1,
        };
        Ok(DirectDrawInterface::acquire(self.inner.get_dd_interface()?, version))
    }

    pub fn page_lock(&self, flags: u32) -> DdResult<()> {
        self.inner.page_lock(flags)
    }

    pub fn page_unlock(&self, flags: u32) -> DdResult<()> {
        self.inner.page_unlock(flags)
    }

    pub fn get_overlay_position(&self) -> DdResult<(i32, i32)> {
        self.inner.get_overlay_position()
    }

    pub fn set_overlay_position(&self, x: i32, y: i32) -> DdResult<()> {
        self.inner.set_overlay_position(x, y)
    }

    pub fn update_overlay(&self) -> DdResult<()> {
        self.overlay_unsupported("UpdateOverlay")
    }

    pub fn update_overlay_display(&self) -> DdResult<()> {
        self.overlay_unsupported("UpdateOverlayDisplay")
    }

    pub fn update_overlay_z_order(&self) -> DdResult<()> {
        self.overlay_unsupported("UpdateOverlayZOrder")
    }

    pub fn enum_overlay_z_orders(&self) -> DdResult<()> {
        self.overlay_unsupported("EnumOverlayZOrders")
    }

    pub fn add_overlay_dirty_rect(&self, _rect: Rect) -> DdResult<()> {
        self.overlay_unsupported("AddOverlayDirtyRect")
    }

    fn overlay_unsupported(&self, call: &str) -> DdResult<()> {
        if !self.inner.caps().caps.contains(crate::desc::Caps::OVERLAY) {
            return Err(DdError::NotAOverlaySurface);
        }
        not_implemented!(call);
        Err(DdError::Unsupported)
    }

    pub fn get_uniqueness_value(&self) -> u32 {
        self.inner.get_uniqueness_value()
    }

    pub fn change_uniqueness_value(&self) -> DdResult<()> {
        self.inner.change_uniqueness_value()
    }

    pub fn set_private_data(&self, tag: Guid, data: &[u8], flags: u32) -> DdResult<()> {
        self.inner.set_private_data(tag, data, flags)
    }

    pub fn get_private_data(&self, tag: Guid, out: Option<&mut [u8]>) -> DdResult<usize> {
        self.inner.get_private_data(tag, out)
    }

    pub fn free_private_data(&self, tag: Guid) -> DdResult<()> {
        self.inner.free_private_data(tag)
    }

    pub fn set_priority(&self, priority: u32) -> DdResult<()> {
        self.inner.set_priority(priority)
    }

    pub fn get_priority(&self) -> DdResult<u32> {
        self.inner.get_priority()
    }

    pub fn set_lod(&self, lod: u32) -> DdResult<()> {
        self.inner.set_lod(lod)
    }

    pub fn get_lod(&self) -> DdResult<u32> {
        self.inner.get_lod()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::harness;
    use crate::ddraw::DirectDraw;
    use crate::desc::{Caps, SurfaceDesc, SurfaceDesc2};
    use crate::format::D3dFormat;
    use crate::interface::IID_IDIRECTDRAWSURFACE7;
    use crate::surface::testing::{offscreen_desc, primary_desc};

    #[test]
    fn versions_count_references_independently() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V1).unwrap();
        let legacy = SurfaceDesc::from(&offscreen_desc(4, 4, D3dFormat::R5G6B5));
        let v1 = dd.create_surface(VersionedDesc::Legacy(&legacy)).unwrap();
        assert_eq!(v1.version(), InterfaceVersion::V1);

        let v7 = v1.query_interface(&IID_IDIRECTDRAWSURFACE7).unwrap().into_surface().unwrap();
        assert_eq!(v7.version(), InterfaceVersion::V7);
        assert!(matches!(v7.query_interface(&Guid::from_u128(0x1234)), Err(DdError::NoInterface)));
        assert_eq!(v1.release(), 0);
        assert!(!v1.inner().is_destroyed(), "the version 7 reference keeps it alive");
        assert_eq!(v7.release(), 0);
        assert!(v7.inner().is_destroyed());
        dd.release();
    }

    #[test]
    fn structure_generation_must_match_the_version() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let surface = dd.create_surface(VersionedDesc::Current(&offscreen_desc(8, 4, D3dFormat::X8R8G8B8))).unwrap();

        let mut legacy = SurfaceDesc::default();
        assert_eq!(
            surface.get_surface_desc(&mut VersionedDescMut::Legacy(&mut legacy)),
            Err(DdError::InvalidParams)
        );
        let mut current = SurfaceDesc2::default();
        surface.get_surface_desc(&mut VersionedDescMut::Current(&mut current)).unwrap();
        assert_eq!((current.width, current.height), (8, 4));
        assert_eq!(current.pitch, 32);

        let lock = surface.lock(None, &mut VersionedDescMut::Current(&mut current), LockFlags::WAIT).unwrap();
        assert_eq!(current.surface, lock.bits as usize);
        surface.unlock(None).unwrap();
        dd.release();
    }

    #[test]
    fn attached_surfaces_come_back_referenced() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let primary = dd.create_surface(VersionedDesc::Current(&primary_desc(1))).unwrap();

        let back = primary.get_attached_surface(&SurfaceCaps::new(Caps::BACKBUFFER)).unwrap();
        assert_eq!(back.inner().ref_count(InterfaceVersion::V7), 1);

        let mut found = Vec::new();
        primary
            .enum_attached_surfaces(&mut |surface, desc| {
                assert!(matches!(desc, AnyDesc::Current(_)));
                found.push(surface);
                EnumControl::Continue
            })
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(back.inner().ref_count(InterfaceVersion::V7), 2);
        for surface in found {
            surface.release();
        }
        back.release();

        let owner = primary.get_dd_interface().unwrap();
        assert_eq!(owner.version(), InterfaceVersion::V7);
        owner.release();
        primary.release();
        dd.release();
    }

    #[test]
    fn overlay_calls_need_an_overlay_surface() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let surface = dd.create_surface(VersionedDesc::Current(&offscreen_desc(4, 4, D3dFormat::R5G6B5))).unwrap();
        assert_eq!(surface.update_overlay(), Err(DdError::NotAOverlaySurface));
        assert_eq!(surface.get_overlay_position(), Err(DdError::NotAOverlaySurface));
        dd.release();
    }
}
