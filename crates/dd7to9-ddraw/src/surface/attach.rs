//! Attached surfaces
//!
//! Attachments are weak: attaching does not keep the other surface alive, and
//! destroying a surface removes it from every attachment list in the process.
//! Implicit attachments come from complex creation and cannot be detached.

use std::sync::atomic::Ordering;
use std::sync::{Arc, MutexGuard, Weak};

use crate::context::SurfaceId;
use crate::desc::{Caps, SurfaceCaps, SurfaceDesc2};
use crate::error::{DdError, DdResult};
use crate::types::EnumControl;

use super::Surface;

pub(crate) struct Attachment {
    key: u32,
    id: SurfaceId,
    surface: Weak<Surface>,
    explicit: bool,
}

impl Surface {
    fn lock_attached(&self) -> MutexGuard<'_, Vec<Attachment>> {
        self.attached.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn push_attachment(&self, other: &Arc<Surface>, explicit: bool) {
        let key = self.next_attach_key.fetch_add(1, Ordering::Relaxed);
        self.lock_attached().push(Attachment { key, id: other.id(), surface: Arc::downgrade(other), explicit });
    }

    /// Link a surface created together with this one
    pub(crate) fn attach_implicit(&self, other: &Arc<Surface>) {
        self.push_attachment(other, false);
    }

    /// Live attachments in attach order
    pub(crate) fn attachments(&self) -> Vec<Arc<Surface>> {
        let attached = self.lock_attached();
        let mut live: Vec<(u32, Arc<Surface>)> = attached
            .iter()
            .filter_map(|a| a.surface.upgrade().filter(|s| !s.is_destroyed()).map(|s| (a.key, s)))
            .collect();
        live.sort_by_key(|(key, _)| *key);
        live.into_iter().map(|(_, s)| s).collect()
    }

    pub(crate) fn is_attached(&self, id: SurfaceId) -> bool {
        self.lock_attached().iter().any(|a| a.id == id)
    }

    #[cfg(test)]
    pub(crate) fn attachment_count(&self) -> usize {
        self.lock_attached().len()
    }

    /// Drop every attachment to one of `ids`
    pub(crate) fn forget_attachments(&self, ids: &[SurfaceId]) {
        self.lock_attached().retain(|a| !ids.contains(&a.id));
    }

    pub fn add_attached_surface(&self, other: &Arc<Surface>) -> DdResult<()> {
        if self.is_destroyed() || other.is_destroyed() {
            return Err(DdError::InvalidObject);
        }
        if other.id() == self.id {
            return Err(DdError::CannotAttachSurface);
        }
        if self.is_attached(other.id()) {
            return Err(DdError::SurfaceAlreadyAttached);
        }

        let theirs = other.caps().caps;
        let ours = self.caps.caps;
        if theirs.contains(Caps::ZBUFFER) {
            if ours.contains(Caps::ZBUFFER) {
                return Err(DdError::CannotAttachSurface);
            }
            if self.attachments().iter().any(|s| s.caps().caps.contains(Caps::ZBUFFER)) {
                limit_debug!(10, "Surface {:?} already has a depth buffer", self.id);
                return Err(DdError::CannotAttachSurface);
            }
        } else if theirs.intersects(Caps::BACKBUFFER | Caps::FLIP) {
            if !ours.contains(Caps::FLIP) {
                return Err(DdError::CannotAttachSurface);
            }
        } else if !(theirs.contains(Caps::MIPMAP) && ours.contains(Caps::MIPMAP)) {
            limit_debug!(10, "Refusing to attach {:?} to {:?}", theirs, ours);
            return Err(DdError::CannotAttachSurface);
        }

        self.push_attachment(other, true);

        if theirs.contains(Caps::ZBUFFER) && ours.intersects(Caps::THREE_D_DEVICE | Caps::PRIMARYSURFACE | Caps::BACKBUFFER) {
            let format = other.format();
            self.ctx.with_state(|state| {
                if state.device.depth_stencil != format {
                    state.device.depth_stencil = format;
                    if let Err(err) = self.ctx.create_device_locked(state) {
                        tracing::warn!("Failed to apply depth buffer {:?}: {}", format, err);
                    }
                }
            });
        }
        Ok(())
    }

    /// Detach one explicitly attached surface, or all of them with `None`
    pub fn delete_attached_surface(&self, other: Option<&Arc<Surface>>) -> DdResult<()> {
        if self.is_destroyed() {
            return Err(DdError::InvalidObject);
        }
        let mut attached = self.lock_attached();
        let Some(other) = other else {
            attached.retain(|a| !a.explicit);
            return Ok(());
        };
        let index = attached.iter().position(|a| a.id == other.id()).ok_or(DdError::SurfaceNotAttached)?;
        if !attached[index].explicit {
            return Err(DdError::CannotDetachSurface);
        }
        attached.remove(index);
        Ok(())
    }

    pub fn enum_attached_surfaces(
        &self,
        callback: &mut dyn FnMut(&Arc<Surface>, &SurfaceDesc2) -> EnumControl,
    ) -> DdResult<()> {
        if self.is_destroyed() {
            return Err(DdError::InvalidObject);
        }
        for surface in self.attachments() {
            let desc = surface.get_surface_desc()?;
            if callback(&surface, &desc) == EnumControl::Cancel {
                break;
            }
        }
        Ok(())
    }

    /// First attached surface whose caps contain `caps`
    pub fn get_attached_surface(&self, caps: &SurfaceCaps) -> DdResult<Arc<Surface>> {
        if self.is_destroyed() {
            return Err(DdError::InvalidObject);
        }
        self.attachments().into_iter().find(|s| s.caps().contains(caps)).ok_or(DdError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::harness;
    use crate::ddraw::DirectDraw;
    use crate::desc::{DescFlags, VersionedDesc};
    use crate::format::{pixel_format_of, D3dFormat};
    use crate::interface::InterfaceVersion;
    use crate::surface::testing::{offscreen_desc, primary_desc};

    fn depth_desc() -> SurfaceDesc2 {
        SurfaceDesc2 {
            flags: DescFlags::CAPS | DescFlags::WIDTH | DescFlags::HEIGHT | DescFlags::PIXELFORMAT,
            width: 8,
            height: 8,
            pixel_format: pixel_format_of(D3dFormat::D16),
            caps: SurfaceCaps::new(Caps::ZBUFFER),
            ..Default::default()
        }
    }

    fn device_desc() -> SurfaceDesc2 {
        let mut desc = offscreen_desc(8, 8, D3dFormat::X8R8G8B8);
        desc.caps.caps |= Caps::THREE_D_DEVICE;
        desc
    }

    #[test]
    fn destroying_a_surface_detaches_it_everywhere() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let depth = dd.create_surface(VersionedDesc::Current(&depth_desc())).unwrap();
        let targets: Vec<_> =
            (0..3).map(|_| dd.create_surface(VersionedDesc::Current(&device_desc())).unwrap()).collect();

        for target in &targets {
            target.inner().add_attached_surface(depth.inner()).unwrap();
            assert!(target.inner().is_attached(depth.inner().id()));
        }
        assert_eq!(
            targets[0].inner().add_attached_surface(depth.inner()),
            Err(DdError::SurfaceAlreadyAttached)
        );

        assert_eq!(depth.release(), 0);
        for target in &targets {
            assert_eq!(target.inner().attachment_count(), 0);
            let wanted = SurfaceCaps::new(Caps::ZBUFFER);
            assert_eq!(target.inner().get_attached_surface(&wanted).err(), Some(DdError::NotFound));
        }
        dd.release();
    }

    #[test]
    fn attaching_a_depth_buffer_updates_the_device() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let target = dd.create_surface(VersionedDesc::Current(&device_desc())).unwrap();
        let mut d24 = depth_desc();
        d24.pixel_format = pixel_format_of(D3dFormat::D24X8);
        let depth = dd.create_surface(VersionedDesc::Current(&d24)).unwrap();

        target.inner().add_attached_surface(depth.inner()).unwrap();
        let params = h.ctx.present_parameters();
        assert!(params.enable_auto_depth_stencil);
        assert_eq!(params.auto_depth_stencil_format, D3dFormat::D24X8);
        dd.release();
    }

    #[test]
    fn implicit_attachments_cannot_be_detached() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let primary = dd.create_surface(VersionedDesc::Current(&primary_desc(1))).unwrap();
        let back = primary.inner().get_attached_surface(&SurfaceCaps::new(Caps::BACKBUFFER)).unwrap();

        assert_eq!(primary.inner().delete_attached_surface(Some(&back)), Err(DdError::CannotDetachSurface));
        let loose = dd.create_surface(VersionedDesc::Current(&offscreen_desc(4, 4, D3dFormat::X8R8G8B8))).unwrap();
        assert_eq!(
            primary.inner().delete_attached_surface(Some(loose.inner())),
            Err(DdError::SurfaceNotAttached)
        );
        assert_eq!(primary.inner().add_attached_surface(loose.inner()), Err(DdError::CannotAttachSurface));
        dd.release();
    }

    #[test]
    fn enumeration_stops_on_cancel() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let depth_a = dd.create_surface(VersionedDesc::Current(&depth_desc())).unwrap();
        let primary = dd.create_surface(VersionedDesc::Current(&primary_desc(2))).unwrap();
        primary.inner().add_attached_surface(depth_a.inner()).unwrap();

        let mut seen = Vec::new();
        primary
            .inner()
            .enum_attached_surfaces(&mut |surface, desc| {
                seen.push((surface.id(), desc.caps.caps));
                EnumControl::Cancel
            })
            .unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].1.contains(Caps::BACKBUFFER), "implicit back buffer comes first");
        dd.release();
    }
}
