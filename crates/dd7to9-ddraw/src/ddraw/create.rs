//! Surface creation and enumeration

use std::sync::Arc;

use crate::backend::{D3dError, Usage};
use crate::context::{SharedState, SurfaceId};
use crate::desc::{AnyDesc, Caps, Caps2, DescFlags, EnumSurfacesFlags, SurfaceDesc2};
use crate::error::{DdError, DdResult};
use crate::format::{d3d_format_of, is_unsupported_format, D3dFormat};
use crate::interface::InterfaceVersion;
use crate::surface::{Surface, SurfaceInterface, SurfaceParams};
use crate::types::EnumControl;

use super::DirectDraw;

/// Surface interface handed out by a DirectDraw interface of `version`
///
/// The DirectDraw 2 and 3 interfaces still create `IDirectDrawSurface`.
pub(crate) fn surface_version(version: InterfaceVersion) -> InterfaceVersion {
    match version {
        InterfaceVersion::V4 | InterfaceVersion::V7 => version,
        _ => InterfaceVersion::V1,
    }
}

fn validate(desc: &SurfaceDesc2, primary_exists: bool) -> DdResult<()> {
    let caps = desc.caps.caps;
    if caps.contains(Caps::PRIMARYSURFACE) && primary_exists {
        limit_warn!(100, "Primary surface already exists");
        return Err(DdError::PrimarySurfaceAlreadyExists);
    }
    if caps.contains(Caps::FLIP)
        && (!desc.flags.contains(DescFlags::BACKBUFFERCOUNT) || !caps.contains(Caps::COMPLEX))
    {
        limit_warn!(100, "Flip surface without a complex back buffer chain");
        return Err(DdError::InvalidParams);
    }
    let has_format = desc.flags.contains(DescFlags::PIXELFORMAT);
    if has_format && caps.contains(Caps::ZBUFFER) && !desc.pixel_format.is_depth() {
        limit_warn!(100, "Z-buffer surface with a color pixel format");
        return Err(DdError::InvalidParams);
    }
    if has_format && is_unsupported_format(&desc.pixel_format) {
        limit_warn!(100, "Pixel format not supported: {:?}", desc.pixel_format);
        return Err(DdError::InvalidPixelFormat);
    }
    Ok(())
}

fn warn_unsupported(desc: &SurfaceDesc2) {
    let caps = desc.caps;
    if caps.caps2.contains(Caps2::CUBEMAP) {
        not_implemented!("cube map surfaces");
    }
    if caps.caps2.contains(Caps2::VOLUME) {
        not_implemented!("volume surfaces");
    }
    if desc.flags.contains(DescFlags::MIPMAPCOUNT) && desc.mipmap_count != 1 && caps.caps.contains(Caps::MIPMAP) {
        not_implemented!("mipmap chains");
    }
    if desc.flags.intersects(DescFlags::CKDESTOVERLAY | DescFlags::CKSRCOVERLAY) || caps.caps.contains(Caps::OVERLAY) {
        not_implemented!("overlay surfaces");
    }
    if caps.caps.contains(Caps::OWNDC) {
        not_implemented!("own DC surfaces");
    }
    let flags = desc.flags
        & (DescFlags::ALPHABITDEPTH
            | DescFlags::LPSURFACE
            | DescFlags::LINEARSIZE
            | DescFlags::FVF
            | DescFlags::SRCVBHANDLE
            | DescFlags::DEPTH);
    if !flags.is_empty() {
        limit_warn!(100, "Ignoring surface description flags {:?}", flags);
    }
    let ignored = caps.caps & (Caps::LIVEVIDEO | Caps::HWCODEC | Caps::ALLOCONLOAD | Caps::VIDEOPORT);
    let ignored2 = caps.caps2 & (Caps2::HINTDYNAMIC | Caps2::HINTSTATIC | Caps2::OPAQUE | Caps2::NOTUSERLOCKABLE);
    if !ignored.is_empty() || !ignored2.is_empty() {
        limit_warn!(100, "Ignoring surface caps {:?} {:?}", ignored, ignored2);
    }
}

/// Descriptions of the back buffers created with a complex flipping surface
fn back_buffer_descs(root: &SurfaceDesc2) -> Vec<SurfaceDesc2> {
    let count = if root.caps.caps.contains(Caps::FLIP | Caps::COMPLEX) { root.back_buffer_count } else { 0 };
    (0..count)
        .map(|index| {
            let mut desc = *root;
            desc.flags.remove(DescFlags::BACKBUFFERCOUNT);
            desc.back_buffer_count = 0;
            desc.caps.caps.remove(Caps::PRIMARYSURFACE | Caps::FRONTBUFFER | Caps::VISIBLE);
            if index == 0 {
                desc.caps.caps.insert(Caps::BACKBUFFER);
            } else {
                desc.caps.caps.remove(Caps::BACKBUFFER);
            }
            desc
        })
        .collect()
}

impl DirectDraw {
    fn has_primary(&self, state: &SharedState) -> bool {
        state
            .container(self.id)
            .is_some_and(|entry| entry.surfaces.iter().any(|s| s.is_primary() && !s.is_destroyed()))
    }

    /// Size of the emulated display, used for primary surfaces
    fn display_size(&self, state: &SharedState) -> (u32, u32) {
        if state.exclusive_mode && state.exclusive.has_mode() {
            return (state.exclusive.width, state.exclusive.height);
        }
        if state.display.has_mode() {
            return (state.display.width, state.display.height);
        }
        let hwnd = state.display.hwnd;
        self.ctx.windows().screen_size((!hwnd.is_null()).then_some(hwnd))
    }

    fn new_surface(
        &self,
        desc: SurfaceDesc2,
        complex_root: Option<SurfaceId>,
        follows_display: bool,
    ) -> DdResult<Arc<Surface>> {
        Ok(Surface::create(SurfaceParams {
            ctx: self.ctx.clone(),
            id: SurfaceId(self.ctx.next_id()),
            container: self.id,
            owner: Arc::downgrade(&self.arc()?),
            version: surface_version(self.version),
            format: d3d_format_of(&desc.pixel_format),
            desc,
            complex_root,
            follows_display,
        }))
    }

    /// Create a surface, and its back buffers for a complex flipping surface
    ///
    /// The returned interface holds the only reference; back buffers live as
    /// long as their root.
    pub fn create_surface(&self, desc: &SurfaceDesc2, version: InterfaceVersion) -> DdResult<SurfaceInterface> {
        self.live()?;
        let config = self.ctx.config();
        let surfaces = self.ctx.with_state(|state| -> DdResult<Vec<Arc<Surface>>> {
            validate(desc, self.has_primary(state))?;
            warn_unsupported(desc);
            self.ctx.ensure_object(state)?;

            let mut desc = *desc;
            let mut reset = false;
            let caps = desc.caps.caps;
            let is_primary = caps.contains(Caps::PRIMARYSURFACE);

            if desc.flags.contains(DescFlags::PIXELFORMAT) && desc.pixel_format.flags.is_empty() {
                desc.flags.remove(DescFlags::PIXELFORMAT);
            }
            if desc.flags.contains(DescFlags::PIXELFORMAT) {
                let usage = if is_primary {
                    Usage::RENDERTARGET
                } else if desc.flags.contains(DescFlags::MIPMAPCOUNT) || caps.contains(Caps::MIPMAP) {
                    Usage::AUTOGENMIPMAP
                } else if desc.pixel_format.is_depth() {
                    Usage::DEPTHSTENCIL
                } else {
                    Usage::empty()
                };
                let format = d3d_format_of(&desc.pixel_format);
                let d3d9 = state.d3d9.as_ref().ok_or(DdError::Generic)?;
                if !d3d9.check_device_format(D3dFormat::X8R8G8B8, usage, format.storage_format()) {
                    limit_warn!(100, "Device does not support {:?} with usage {:?}", format, usage);
                    return Err(DdError::InvalidPixelFormat);
                }
                if is_primary {
                    state.display_pixel_format = Some(desc.pixel_format);
                }
            }

            desc.flags.insert(DescFlags::CAPS);
            if caps.contains(Caps::FLIP) {
                desc.caps.caps.insert(Caps::FRONTBUFFER);
            }
            if desc.flags.contains(DescFlags::BACKBUFFERCOUNT) {
                desc.back_buffer_count = desc.back_buffer_count.max(1);
            } else {
                desc.back_buffer_count = 0;
            }
            if desc.width == 0 || desc.height == 0 {
                desc.flags.remove(DescFlags::WIDTH | DescFlags::HEIGHT | DescFlags::PITCH);
            }
            if desc.refresh_rate == 0 {
                desc.flags.remove(DescFlags::REFRESHRATE);
            }

            if config.override_stencil_format == 0
                && desc.flags.contains(DescFlags::PIXELFORMAT)
                && desc.pixel_format.is_depth()
            {
                let depth = d3d_format_of(&desc.pixel_format);
                if depth != state.device.depth_stencil {
                    if state.device.depth_stencil != D3dFormat::Unknown {
                        limit_warn!(100, "Replacing depth stencil {:?} with {:?}", state.device.depth_stencil, depth);
                    }
                    state.device.depth_stencil = depth;
                    reset = true;
                }
            }

            let sized = desc.flags.contains(DescFlags::WIDTH | DescFlags::HEIGHT);
            if state.device.width == 0
                && state.device.height == 0
                && sized
                && caps.intersects(Caps::PRIMARYSURFACE | Caps::THREE_D_DEVICE)
            {
                state.surface_size = (desc.width, desc.height);
                let params = &state.present_params;
                if (desc.width, desc.height) != (params.back_buffer_width, params.back_buffer_height) {
                    reset = true;
                }
            }

            if is_primary && !config.anti_aliasing {
                let anti_aliasing =
                    desc.caps.caps2.contains(Caps2::HINTANTIALIASING) && caps.contains(Caps::THREE_D_DEVICE);
                if anti_aliasing != state.device.anti_aliasing {
                    state.device.anti_aliasing = anti_aliasing;
                    reset = true;
                }
            }

            if reset {
                self.ctx.create_device_locked(state)?;
            }

            if is_primary {
                (desc.width, desc.height) = self.display_size(state);
                desc.flags.insert(DescFlags::WIDTH | DescFlags::HEIGHT);
            } else if !sized {
                limit_warn!(100, "Surface created without a size, caps {:?}", caps);
                return Err(DdError::InvalidParams);
            }
            let follows_display = !desc.flags.contains(DescFlags::PIXELFORMAT);
            if follows_display {
                let bpp = self.display_bpp(state);
                desc.pixel_format = Self::display_format(state, bpp)?;
                desc.flags.insert(DescFlags::PIXELFORMAT);
            }

            let root = self.new_surface(desc, None, follows_display)?;
            let mut created = vec![root.clone()];
            for back_desc in back_buffer_descs(&desc) {
                let back = self.new_surface(back_desc, Some(root.id()), follows_display)?;
                if let Some(previous) = created.last() {
                    previous.attach_implicit(&back);
                }
                created.push(back);
            }
            self.ctx.add_surfaces(state, self.id, &created);
            Ok(created)
        })?;

        tracing::debug!(
            "Created {} surface(s) on {:?}, root {:?}",
            surfaces.len(),
            self.id,
            surfaces.first().map(|s| s.id())
        );
        let root = surfaces.into_iter().next().ok_or(DdError::Generic)?;
        Ok(SurfaceInterface::acquire(root, surface_version(version)))
    }

    /// A new standalone surface with the description of `original`
    ///
    /// The copy never becomes a primary surface and starts with undefined
    /// contents.
    pub fn duplicate_surface(&self, original: &Arc<Surface>, version: InterfaceVersion) -> DdResult<SurfaceInterface> {
        self.live()?;
        if original.is_destroyed() || original.container() != self.id {
            return Err(DdError::InvalidParams);
        }
        let mut desc = original.get_surface_desc()?;
        desc.caps.caps.remove(Caps::PRIMARYSURFACE | Caps::FRONTBUFFER | Caps::BACKBUFFER | Caps::FLIP);
        desc.flags.remove(DescFlags::BACKBUFFERCOUNT);
        desc.back_buffer_count = 0;

        let copy = self.new_surface(desc, None, original.follows_display())?;
        self.ctx.with_state(|state| self.ctx.add_surfaces(state, self.id, &[copy.clone()]));
        tracing::debug!("Duplicated surface {:?} as {:?}", original.id(), copy.id());
        Ok(SurfaceInterface::acquire(copy, surface_version(version)))
    }

    /// Enumerate the surfaces of this container
    ///
    /// Only existing surfaces can be listed, and only all of them. Every
    /// surface handed to the callback carries a new reference.
    pub fn enum_surfaces(
        &self,
        flags: EnumSurfacesFlags,
        filter: Option<&SurfaceDesc2>,
        version: InterfaceVersion,
        callback: &mut dyn FnMut(SurfaceInterface, AnyDesc) -> EnumControl,
    ) -> DdResult<()> {
        self.live()?;
        if filter.is_none() && !flags.contains(EnumSurfacesFlags::ALL) {
            limit_warn!(100, "EnumSurfaces without a description needs ALL");
            return Err(DdError::InvalidParams);
        }

        let exist = EnumSurfacesFlags::DOESEXIST;
        if flags == exist | EnumSurfacesFlags::ALL {
            let surfaces: Vec<Arc<Surface>> =
                self.ctx.lock_state().container(self.id).map(|entry| entry.surfaces.clone()).unwrap_or_default();
            let facade = surface_version(version);
            for surface in surfaces.into_iter().filter(|s| !s.is_destroyed()) {
                let desc = surface.get_surface_desc()?;
                let interface = SurfaceInterface::acquire(surface, facade);
                if callback(interface, AnyDesc::for_version(&desc, facade.uses_desc2())) == EnumControl::Cancel {
                    break;
                }
            }
            return Ok(());
        }
        if flags == exist | EnumSurfacesFlags::MATCH
            || flags == exist | EnumSurfacesFlags::NOMATCH
            || flags == EnumSurfacesFlags::CANBECREATED | EnumSurfacesFlags::MATCH
        {
            not_implemented!("EnumSurfaces matching");
            return Err(DdError::Unsupported);
        }
        limit_warn!(100, "Invalid EnumSurfaces flags {:?}", flags);
        Err(DdError::InvalidParams)
    }

    /// The primary surface, referenced
    pub fn get_gdi_surface(&self, version: InterfaceVersion) -> DdResult<SurfaceInterface> {
        self.live()?;
        let primary = self.ctx.lock_state().container(self.id).and_then(|entry| {
            entry.surfaces.iter().find(|s| s.is_primary() && !s.is_destroyed()).cloned()
        });
        let primary = primary.ok_or(DdError::NotFound)?;
        Ok(SurfaceInterface::acquire(primary, surface_version(version)))
    }

    /// Recover a device waiting for reset, otherwise realign every surface
    /// with the display format
    pub fn restore_all_surfaces(&self) -> DdResult<()> {
        self.live()?;
        let result = if self.ctx.device_status() == Some(Err(D3dError::DeviceNotReset)) {
            self.ctx.with_state(|state| self.ctx.reinit_device(state))
        } else {
            self.ctx.with_state(|state| self.restore_display_format(state))
        };
        if let Err(err) = result {
            limit_warn!(100, "RestoreAllSurfaces did not complete: {}", err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::context::testing::{harness, harness_with, test_config};
    use crate::desc::{PixelFlags, SurfaceCaps, VersionedDesc};
    use crate::format::pixel_format_of;
    use crate::surface::testing::{offscreen_desc, primary_desc};
    use dd7to9_common::Config;
    use std::sync::atomic::Ordering;

    #[test]
    fn only_one_primary_per_container() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let primary = dd.create_surface(VersionedDesc::Current(&primary_desc(0))).unwrap();
        assert_eq!(
            dd.create_surface(VersionedDesc::Current(&primary_desc(0))).err(),
            Some(DdError::PrimarySurfaceAlreadyExists)
        );
        primary.release();
        dd.create_surface(VersionedDesc::Current(&primary_desc(0))).unwrap();
        dd.release();
    }

    #[test]
    fn invalid_descriptions_are_refused() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();

        let mut flip = primary_desc(0);
        flip.caps.caps |= Caps::FLIP;
        assert_eq!(dd.create_surface(VersionedDesc::Current(&flip)).err(), Some(DdError::InvalidParams));

        let mut zbuffer = offscreen_desc(8, 8, D3dFormat::R5G6B5);
        zbuffer.caps = SurfaceCaps::new(Caps::ZBUFFER);
        assert_eq!(dd.create_surface(VersionedDesc::Current(&zbuffer)).err(), Some(DdError::InvalidParams));

        let mut yuv = offscreen_desc(8, 8, D3dFormat::R5G6B5);
        yuv.pixel_format.flags = PixelFlags::YUV;
        assert_eq!(dd.create_surface(VersionedDesc::Current(&yuv)).err(), Some(DdError::InvalidPixelFormat));

        let unsized_plain = SurfaceDesc2 {
            flags: DescFlags::CAPS,
            caps: SurfaceCaps::new(Caps::OFFSCREENPLAIN),
            ..Default::default()
        };
        assert_eq!(dd.create_surface(VersionedDesc::Current(&unsized_plain)).err(), Some(DdError::InvalidParams));

        let mut bad_size = offscreen_desc(8, 8, D3dFormat::R5G6B5);
        bad_size.size = 12;
        assert_eq!(dd.create_surface(VersionedDesc::Current(&bad_size)).err(), Some(DdError::InvalidParams));
        dd.release();
    }

    #[test]
    fn complex_primary_builds_a_back_buffer_chain() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let primary = dd.create_surface(VersionedDesc::Current(&primary_desc(2))).unwrap();
        let front = primary.inner();
        assert!(front.caps().caps.contains(Caps::FRONTBUFFER | Caps::FLIP | Caps::PRIMARYSURFACE));

        let chain = front.flip_chain();
        assert_eq!(chain.len(), 3);
        let first = chain[1].caps().caps;
        assert!(first.contains(Caps::BACKBUFFER | Caps::FLIP));
        assert!(!first.intersects(Caps::PRIMARYSURFACE | Caps::FRONTBUFFER));
        assert!(!chain[2].caps().caps.contains(Caps::BACKBUFFER));

        let desc = chain[2].get_surface_desc().unwrap();
        assert_eq!((desc.width, desc.height), (1024, 768), "primary takes the desktop size");
        assert_eq!(desc.back_buffer_count, 0);

        primary.release();
        assert!(chain.iter().all(|s| s.is_destroyed()), "back buffers go with their root");
        dd.release();
    }

    #[test]
    fn surfaces_without_a_format_follow_the_display() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        dd.set_display_mode(640, 480, 16, 0, 0).unwrap();
        let plain = SurfaceDesc2 {
            flags: DescFlags::CAPS | DescFlags::WIDTH | DescFlags::HEIGHT,
            width: 16,
            height: 16,
            caps: SurfaceCaps::new(Caps::OFFSCREENPLAIN),
            ..Default::default()
        };
        let surface = dd.create_surface(VersionedDesc::Current(&plain)).unwrap();
        assert_eq!(surface.inner().format(), D3dFormat::R5G6B5);
        assert!(surface.inner().follows_display());

        let primary = dd.create_surface(VersionedDesc::Current(&primary_desc(0))).unwrap();
        let desc = primary.inner().get_surface_desc().unwrap();
        assert_eq!((desc.width, desc.height), (640, 480));
        dd.release();
    }

    #[test]
    fn depth_buffers_set_the_device_depth_format() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let depth = SurfaceDesc2 {
            flags: DescFlags::CAPS | DescFlags::WIDTH | DescFlags::HEIGHT | DescFlags::PIXELFORMAT,
            width: 8,
            height: 8,
            pixel_format: pixel_format_of(D3dFormat::D16),
            caps: SurfaceCaps::new(Caps::ZBUFFER),
            ..Default::default()
        };
        dd.create_surface(VersionedDesc::Current(&depth)).unwrap();
        assert_eq!(h.ctx.lock_state().device.depth_stencil, D3dFormat::D16);
        assert_eq!(h.ctx.present_parameters().auto_depth_stencil_format, D3dFormat::D16);

        let created = h.backend.stats.devices_created.load(Ordering::SeqCst);
        dd.create_surface(VersionedDesc::Current(&depth)).unwrap();
        assert_eq!(h.backend.stats.devices_created.load(Ordering::SeqCst), created, "same format keeps the device");
        dd.release();
    }

    #[test]
    fn stencil_override_leaves_the_device_alone() {
        let h = harness_with(
            Config { override_stencil_format: D3dFormat::D24S8.raw(), ..test_config() },
            SoftwareBackend::new(),
        );
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let mut depth = offscreen_desc(8, 8, D3dFormat::D16);
        depth.caps = SurfaceCaps::new(Caps::ZBUFFER);
        dd.create_surface(VersionedDesc::Current(&depth)).unwrap();
        assert_eq!(h.ctx.lock_state().device.depth_stencil, D3dFormat::Unknown);
        dd.release();
    }

    #[test]
    fn legacy_containers_hand_out_version_one_surfaces() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V2).unwrap();
        let legacy = crate::desc::SurfaceDesc::from(&offscreen_desc(4, 4, D3dFormat::R5G6B5));
        let surface = dd.create_surface(VersionedDesc::Legacy(&legacy)).unwrap();
        assert_eq!(surface.version(), InterfaceVersion::V1);
        assert_eq!(surface.inner().ref_count(InterfaceVersion::V1), 1);

        assert_eq!(
            dd.create_surface(VersionedDesc::Current(&offscreen_desc(4, 4, D3dFormat::R5G6B5)))
                .err(),
            Some(DdError::InvalidParams),
            "version 2 takes the legacy description"
        );
        dd.release();
    }

    #[test]
    fn enumeration_lists_existing_surfaces_with_a_reference() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let a = dd.create_surface(VersionedDesc::Current(&offscreen_desc(4, 4, D3dFormat::R5G6B5))).unwrap();
        let b = dd.create_surface(VersionedDesc::Current(&offscreen_desc(8, 8, D3dFormat::X8R8G8B8))).unwrap();

        let mut seen = Vec::new();
        dd.enum_surfaces(EnumSurfacesFlags::DOESEXIST | EnumSurfacesFlags::ALL, None, &mut |surface, desc| {
            seen.push((surface, desc.to_desc2().width));
            EnumControl::Continue
        })
        .unwrap();
        let widths: Vec<u32> = seen.iter().map(|(_, width)| *width).collect();
        assert_eq!(widths, vec![4, 8]);
        assert_eq!(a.inner().ref_count(InterfaceVersion::V7), 2);
        for (surface, _) in seen {
            surface.release();
        }
        assert_eq!(b.inner().ref_count(InterfaceVersion::V7), 1);

        let mut calls = 0;
        dd.enum_surfaces(EnumSurfacesFlags::DOESEXIST | EnumSurfacesFlags::ALL, None, &mut |surface, _| {
            calls += 1;
            surface.release();
            EnumControl::Cancel
        })
        .unwrap();
        assert_eq!(calls, 1);

        let mut noop = |_: SurfaceInterface, _: AnyDesc| EnumControl::Continue;
        assert_eq!(dd.enum_surfaces(EnumSurfacesFlags::DOESEXIST, None, &mut noop), Err(DdError::InvalidParams));
        let filter = offscreen_desc(4, 4, D3dFormat::R5G6B5);
        let matching = || Some(VersionedDesc::Current(&filter));
        assert_eq!(
            dd.enum_surfaces(EnumSurfacesFlags::DOESEXIST | EnumSurfacesFlags::MATCH, matching(), &mut noop),
            Err(DdError::Unsupported)
        );
        assert_eq!(
            dd.enum_surfaces(EnumSurfacesFlags::CANBECREATED | EnumSurfacesFlags::MATCH, matching(), &mut noop),
            Err(DdError::Unsupported)
        );
        dd.release();
    }

    #[test]
    fn gdi_surface_is_the_primary() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        assert_eq!(dd.get_gdi_surface().err(), Some(DdError::NotFound));
        let primary = dd.create_surface(VersionedDesc::Current(&primary_desc(1))).unwrap();
        let gdi = dd.get_gdi_surface().unwrap();
        assert_eq!(gdi.inner().id(), primary.inner().id());
        assert_eq!(primary.inner().ref_count(InterfaceVersion::V7), 2);
        gdi.release();
        dd.release();
    }

    #[test]
    fn duplicates_are_independent_surfaces() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let primary = dd.create_surface(VersionedDesc::Current(&primary_desc(0))).unwrap();
        let copy = dd.duplicate_surface(&primary).unwrap();
        assert_ne!(copy.inner().id(), primary.inner().id());
        assert!(!copy.inner().is_primary());
        let desc = copy.inner().get_surface_desc().unwrap();
        assert_eq!((desc.width, desc.height), (1024, 768));

        let other = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        assert_eq!(other.duplicate_surface(&primary).err(), Some(DdError::InvalidParams));
        other.release();
        dd.release();
    }

    #[test]
    fn restore_all_surfaces_resets_a_waiting_device() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        dd.create_surface(VersionedDesc::Current(&primary_desc(0))).unwrap();
        h.ctx.ensure_device().unwrap();
        dd.restore_all_surfaces().unwrap();
        assert_eq!(h.backend.stats.resets.load(Ordering::SeqCst), 0);

        h.backend.faults.lose_device();
        h.backend.faults.make_resettable();
        dd.restore_all_surfaces().unwrap();
        assert_eq!(h.backend.stats.resets.load(Ordering::SeqCst), 1);
        dd.release();
    }
}
