//! DirectDraw surface
//!
//! A surface keeps its pixels in one of two places: a GPU texture owned by the
//! shared device, or an emulated GDI bitmap from the process pool. Indexed and
//! 24-bit surfaces (and the primary when it is routed through GDI) always work
//! from the emulated bitmap and mirror it into the texture before drawing.
//! Everything else works from the texture and only borrows a bitmap while a
//! device context is out. `Representation` records which side is current.
//!
//! Surface state sits behind a per-surface mutex that is only held for the
//! duration of one call. The legacy notion of a locked surface is tracked in
//! `LockState`, so a Lock from a second thread fails with `SurfaceBusy`
//! instead of blocking.

mod attach;
mod blt;
mod dc;
mod flip;
pub mod interface;
mod lock;
mod resource;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::backend::TextureId;
use crate::clipper::Clipper;
use crate::context::{ContainerId, ProcessContext, SurfaceId};
use crate::ddraw::DirectDraw;
use crate::desc::{
    Caps, Caps2, ColorKeyFlags, DescFlags, PixelFormat, SurfaceCaps, SurfaceDesc2, VersionedDesc,
};
use crate::emu::EmuSurface;
use crate::error::{DdError, DdResult};
use crate::format::{compute_pitch, d3d_format_of, D3dFormat};
use crate::interface::{InterfaceVersion, RefCounts};
use crate::palette::Palette;
use crate::types::{ColorKey, Guid};

pub(crate) use attach::Attachment;
pub use blt::BltBatchEntry;
pub use interface::SurfaceInterface;
pub use lock::SurfaceLock;

/// Which copy of the pixels is current
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Representation {
    /// The texture is current, the emulated bitmap is stale or absent
    Gpu,
    /// The emulated bitmap is current, the texture is stale or absent
    Emulated,
    InSync,
}

pub(crate) struct SurfaceState {
    pub desc: SurfaceDesc2,
    pub format: D3dFormat,
    pub texture: Option<TextureId>,
    pub representation: Representation,
    pub emu: Option<EmuSurface>,
    /// Texture content saved across a device reset, rows at the logical pitch
    pub backup: Option<Vec<u8>>,
    pub dirty: bool,
    pub lock: Option<lock::LockState>,
    pub dc_out: bool,
    pub palette: Option<Arc<Palette>>,
    pub clipper: Option<Arc<Clipper>>,
    pub overlay_position: (i32, i32),
    pub priority: u32,
    pub lod: u32,
    pub private_data: HashMap<Guid, Vec<u8>>,
}

/// Everything needed to build a surface
pub(crate) struct SurfaceParams {
    pub ctx: Arc<ProcessContext>,
    pub id: SurfaceId,
    pub container: ContainerId,
    pub owner: Weak<DirectDraw>,
    pub version: InterfaceVersion,
    pub desc: SurfaceDesc2,
    pub format: D3dFormat,
    pub complex_root: Option<SurfaceId>,
    /// The pixel format was taken from the display mode
    pub follows_display: bool,
}

pub struct Surface {
    id: SurfaceId,
    ctx: Arc<ProcessContext>,
    container: ContainerId,
    owner: Weak<DirectDraw>,
    version: InterfaceVersion,
    caps: SurfaceCaps,
    complex_root: Option<SurfaceId>,
    follows_display: bool,
    refs: RefCounts,
    state: Mutex<SurfaceState>,
    attached: Mutex<Vec<Attachment>>,
    next_attach_key: AtomicU32,
    uniqueness: AtomicU32,
    destroyed: AtomicBool,
}

impl Surface {
    pub(crate) fn create(params: SurfaceParams) -> Arc<Surface> {
        let SurfaceParams { ctx, id, container, owner, version, mut desc, format, complex_root, follows_display } =
            params;

        if !format.is_compressed() && format.bits_per_pixel() != 0 {
            desc.flags.insert(DescFlags::PITCH);
            desc.pitch = compute_pitch(desc.width, format.bits_per_pixel()) as i32;
        }
        let representation = if format.requires_emulation() || (desc.caps.caps.contains(Caps::PRIMARYSURFACE) && ctx.config().write_to_gdi) {
            Representation::Emulated
        } else {
            Representation::Gpu
        };

        tracing::debug!(
            "Creating surface {:?} {}x{} {:?} caps {:?}",
            id,
            desc.width,
            desc.height,
            format,
            desc.caps.caps
        );

        Arc::new(Surface {
            id,
            caps: desc.caps,
            ctx,
            container,
            owner,
            version,
            complex_root,
            follows_display,
            refs: RefCounts::new(),
            state: Mutex::new(SurfaceState {
                desc,
                format,
                texture: None,
                representation,
                emu: None,
                backup: None,
                dirty: false,
                lock: None,
                dc_out: false,
                palette: None,
                clipper: None,
                overlay_position: (0, 0),
                priority: 0,
                lod: 0,
                private_data: HashMap::new(),
            }),
            attached: Mutex::new(Vec::new()),
            next_attach_key: AtomicU32::new(0),
            uniqueness: AtomicU32::new(1),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn version(&self) -> InterfaceVersion {
        self.version
    }

    pub fn container(&self) -> ContainerId {
        self.container
    }

    /// Root of the complex surface this one was created with
    pub(crate) fn complex_root(&self) -> Option<SurfaceId> {
        self.complex_root
    }

    pub fn caps(&self) -> SurfaceCaps {
        self.caps
    }

    pub fn is_primary(&self) -> bool {
        self.caps.caps.contains(Caps::PRIMARYSURFACE)
    }

    pub fn is_managed(&self) -> bool {
        self.caps.caps2.intersects(Caps2::TEXTUREMANAGE | Caps2::D3DTEXTUREMANAGE)
    }

    /// A primary outside a flip chain shows every write immediately
    fn presents_on_write(&self) -> bool {
        self.is_primary() && !self.caps.caps.contains(Caps::FLIP)
    }

    pub(crate) fn follows_display(&self) -> bool {
        self.follows_display
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, SurfaceState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// State of a surface that has not been destroyed
    pub(crate) fn live_state(&self) -> DdResult<MutexGuard<'_, SurfaceState>> {
        if self.is_destroyed() {
            return Err(DdError::InvalidObject);
        }
        Ok(self.lock_state())
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::Release);
        let mut state = self.lock_state();
        state.lock = None;
        if let Some(emu) = state.emu.take() {
            self.ctx.emu_pool().release(emu);
        }
    }

    fn touch(&self) {
        self.uniqueness.fetch_add(1, Ordering::AcqRel);
    }

    // ---------------------------------------------------------------------
    // Reference counting
    // ---------------------------------------------------------------------

    pub fn add_ref(&self, version: InterfaceVersion) -> u32 {
        self.refs.add_ref(version)
    }

    /// Drop one reference; the last one destroys the surface unless it
    /// belongs to a complex root, which takes it down with itself
    pub fn release(&self, version: InterfaceVersion) -> u32 {
        let remaining = self.refs.release(version);
        if self.refs.total() == 0 && self.complex_root.is_none() && !self.is_destroyed() {
            self.ctx.remove_surface(self.id);
        }
        remaining
    }

    pub fn ref_count(&self, version: InterfaceVersion) -> u32 {
        self.refs.count(version)
    }

    // ---------------------------------------------------------------------
    // Description
    // ---------------------------------------------------------------------

    pub fn get_surface_desc(&self) -> DdResult<SurfaceDesc2> {
        let state = self.live_state()?;
        let mut desc = state.desc;
        desc.flags.remove(DescFlags::LPSURFACE);
        desc.surface = 0;
        Ok(desc)
    }

    pub fn get_pixel_format(&self) -> DdResult<PixelFormat> {
        Ok(self.live_state()?.desc.pixel_format)
    }

    pub(crate) fn format(&self) -> D3dFormat {
        self.lock_state().format
    }

    /// Change the size or pixel format of a surface without client memory
    pub fn set_surface_desc(&self, desc: &VersionedDesc<'_>, flags: u32) -> DdResult<()> {
        if flags != 0 {
            return Err(DdError::InvalidParams);
        }
        let desc = desc.to_desc2().ok_or(DdError::InvalidParams)?;
        let allowed = DescFlags::WIDTH | DescFlags::HEIGHT | DescFlags::PITCH | DescFlags::PIXELFORMAT | DescFlags::LPSURFACE | DescFlags::CAPS;
        if !allowed.contains(desc.flags) {
            return Err(DdError::InvalidParams);
        }
        if desc.flags.contains(DescFlags::LPSURFACE) {
            not_implemented!("SetSurfaceDesc with client memory");
            return Err(DdError::Unsupported);
        }

        let format = if desc.flags.contains(DescFlags::PIXELFORMAT) {
            let format = d3d_format_of(&desc.pixel_format);
            if format == D3dFormat::Unknown {
                return Err(DdError::InvalidPixelFormat);
            }
            Some(format)
        } else {
            None
        };
        if desc.flags.intersects(DescFlags::WIDTH | DescFlags::HEIGHT) && (desc.width == 0 || desc.height == 0) {
            return Err(DdError::InvalidParams);
        }

        {
            let state = self.live_state()?;
            if state.lock.is_some() || state.dc_out {
                return Err(DdError::SurfaceBusy);
            }
        }
        self.release_d9(false);
        let mut state = self.live_state()?;
        if state.lock.is_some() || state.dc_out {
            return Err(DdError::SurfaceBusy);
        }
        if let Some(emu) = state.emu.take() {
            self.ctx.emu_pool().release(emu);
        }
        if desc.flags.contains(DescFlags::WIDTH) {
            state.desc.width = desc.width;
        }
        if desc.flags.contains(DescFlags::HEIGHT) {
            state.desc.height = desc.height;
        }
        if let Some(format) = format {
            state.format = format;
            state.desc.pixel_format = desc.pixel_format;
            state.desc.flags.insert(DescFlags::PIXELFORMAT);
        }
        let bpp = state.format.bits_per_pixel();
        state.desc.pitch = compute_pitch(state.desc.width, bpp) as i32;
        state.backup = None;
        state.dirty = false;
        state.representation = if self.uses_emulation_for(state.format) {
            Representation::Emulated
        } else {
            Representation::Gpu
        };
        drop(state);
        self.touch();
        Ok(())
    }

    pub fn get_caps(&self) -> DdResult<SurfaceCaps> {
        Ok(self.live_state()?.desc.caps)
    }

    // ---------------------------------------------------------------------
    // Color keys
    // ---------------------------------------------------------------------

    fn key_flag(flags: ColorKeyFlags) -> DdResult<DescFlags> {
        let which = flags & !ColorKeyFlags::COLORSPACE;
        if which == ColorKeyFlags::DESTBLT {
            Ok(DescFlags::CKDESTBLT)
        } else if which == ColorKeyFlags::DESTOVERLAY {
            Ok(DescFlags::CKDESTOVERLAY)
        } else if which == ColorKeyFlags::SRCBLT {
            Ok(DescFlags::CKSRCBLT)
        } else if which == ColorKeyFlags::SRCOVERLAY {
            Ok(DescFlags::CKSRCOVERLAY)
        } else {
            Err(DdError::InvalidParams)
        }
    }

    pub fn get_color_key(&self, flags: ColorKeyFlags) -> DdResult<ColorKey> {
        let flag = Self::key_flag(flags)?;
        let state = self.live_state()?;
        if !state.desc.flags.contains(flag) {
            return Err(DdError::NoColorKey);
        }
        let keys = &state.desc.color_keys;
        Ok(match flag {
            DescFlags::CKDESTBLT => keys.dest_blt,
            DescFlags::CKDESTOVERLAY => keys.dest_overlay,
            DescFlags::CKSRCBLT => keys.src_blt,
            _ => keys.src_overlay,
        })
    }

    /// Set or, with `None`, clear one of the four color keys
    pub fn set_color_key(&self, flags: ColorKeyFlags, key: Option<ColorKey>) -> DdResult<()> {
        let flag = Self::key_flag(flags)?;
        if flag.intersects(DescFlags::CKDESTOVERLAY | DescFlags::CKSRCOVERLAY) {
            not_implemented!("overlay color keys");
        }
        let mut state = self.live_state()?;
        let Some(mut key) = key else {
            state.desc.flags.remove(flag);
            return Ok(());
        };
        if !flags.contains(ColorKeyFlags::COLORSPACE) {
            key.high = key.low;
        }
        let keys = &mut state.desc.color_keys;
        match flag {
            DescFlags::CKDESTBLT => keys.dest_blt = key,
            DescFlags::CKDESTOVERLAY => keys.dest_overlay = key,
            DescFlags::CKSRCBLT => keys.src_blt = key,
            _ => keys.src_overlay = key,
        }
        state.desc.flags.insert(flag);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Palette and clipper
    // ---------------------------------------------------------------------

    pub fn set_palette(&self, palette: Option<Arc<Palette>>) -> DdResult<()> {
        let mut state = self.live_state()?;
        if palette.is_some() && !state.desc.pixel_format.is_palette_indexed() && !self.is_primary() {
            return Err(DdError::NotPalettized);
        }
        state.palette = palette;
        if let Some(emu) = state.emu.as_mut() {
            emu.last_palette_usn = 0;
        }
        Ok(())
    }

    pub fn get_palette(&self) -> DdResult<Arc<Palette>> {
        self.live_state()?.palette.clone().ok_or(DdError::NoPaletteAttached)
    }

    pub fn set_clipper(&self, clipper: Option<Arc<Clipper>>) -> DdResult<()> {
        self.live_state()?.clipper = clipper;
        Ok(())
    }

    pub fn get_clipper(&self) -> DdResult<Arc<Clipper>> {
        self.live_state()?.clipper.clone().ok_or(DdError::NoClipperAttached)
    }

    // ---------------------------------------------------------------------
    // Overlay bookkeeping
    // ---------------------------------------------------------------------

    pub fn set_overlay_position(&self, x: i32, y: i32) -> DdResult<()> {
        if !self.caps.caps.contains(Caps::OVERLAY) {
            return Err(DdError::NotAOverlaySurface);
        }
        self.live_state()?.overlay_position = (x, y);
        Ok(())
    }

    pub fn get_overlay_position(&self) -> DdResult<(i32, i32)> {
        if !self.caps.caps.contains(Caps::OVERLAY) {
            return Err(DdError::NotAOverlaySurface);
        }
        Ok(self.live_state()?.overlay_position)
    }

    // ---------------------------------------------------------------------
    // Misc
    // ---------------------------------------------------------------------

    /// Surfaces come out of CreateSurface fully built
    pub fn initialize(&self) -> DdResult<()> {
        Err(DdError::AlreadyInitialized)
    }

    pub fn get_dd_interface(&self) -> DdResult<Arc<DirectDraw>> {
        self.owner.upgrade().ok_or(DdError::InvalidObject)
    }

    pub fn page_lock(&self, _flags: u32) -> DdResult<()> {
        self.live_state().map(|_| ())
    }

    pub fn page_unlock(&self, _flags: u32) -> DdResult<()> {
        self.live_state().map(|_| ())
    }

    pub fn get_uniqueness_value(&self) -> u32 {
        self.uniqueness.load(Ordering::Acquire)
    }

    pub fn change_uniqueness_value(&self) -> DdResult<()> {
        self.live_state().map(drop)?;
        self.touch();
        Ok(())
    }

    pub fn set_private_data(&self, tag: Guid, data: &[u8], _flags: u32) -> DdResult<()> {
        self.live_state()?.private_data.insert(tag, data.to_vec());
        Ok(())
    }

    /// Copy private data into `out`, returning its size
    ///
    /// `MoreData` reports the needed size through the error path, so the
    /// caller asks again with a large enough buffer.
    pub fn get_private_data(&self, tag: Guid, out: Option<&mut [u8]>) -> DdResult<usize> {
        let state = self.live_state()?;
        let data = state.private_data.get(&tag).ok_or(DdError::NotFound)?;
        match out {
            Some(out) if out.len() >= data.len() => {
                out[..data.len()].copy_from_slice(data);
                Ok(data.len())
            }
            _ => Err(DdError::MoreData),
        }
    }

    pub fn private_data_size(&self, tag: Guid) -> DdResult<usize> {
        self.live_state()?.private_data.get(&tag).map(Vec::len).ok_or(DdError::NotFound)
    }

    pub fn free_private_data(&self, tag: Guid) -> DdResult<()> {
        self.live_state()?.private_data.remove(&tag).map(|_| ()).ok_or(DdError::NotFound)
    }

    pub fn set_priority(&self, priority: u32) -> DdResult<()> {
        if !self.is_managed() {
            return Err(DdError::InvalidObject);
        }
        self.live_state()?.priority = priority;
        Ok(())
    }

    pub fn get_priority(&self) -> DdResult<u32> {
        if !self.is_managed() {
            return Err(DdError::InvalidObject);
        }
        Ok(self.live_state()?.priority)
    }

    pub fn set_lod(&self, lod: u32) -> DdResult<()> {
        if !self.is_managed() {
            return Err(DdError::InvalidObject);
        }
        self.live_state()?.lod = lod;
        Ok(())
    }

    pub fn get_lod(&self) -> DdResult<u32> {
        if !self.is_managed() {
            return Err(DdError::InvalidObject);
        }
        Ok(self.live_state()?.lod)
    }

    /// Report whether the memory of this surface went away with the device
    pub fn is_lost(&self) -> DdResult<()> {
        self.live_state().map(drop)?;
        match self.ctx.device_status() {
            Some(Err(err)) => Err(err.into()),
            _ => Ok(()),
        }
    }

    /// Bring the device back if it can be reset
    pub fn restore(&self) -> DdResult<()> {
        self.live_state().map(drop)?;
        match self.ctx.device_status() {
            None | Some(Ok(())) => Ok(()),
            Some(Err(_)) => self.ctx.with_state(|state| self.ctx.reinit_device(state)),
        }
    }

    #[cfg(test)]
    pub(crate) fn texture_id(&self) -> Option<TextureId> {
        self.lock_state().texture
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface").field("id", &self.id).field("caps", &self.caps.caps).finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use crate::context::testing::harness;
    use crate::desc::{ColorKeyFlags, VersionedDesc};
    use crate::error::DdError;
    use crate::format::D3dFormat;
    use crate::interface::InterfaceVersion;
    use crate::ddraw::DirectDraw;
    use crate::palette::{Palette, DDPCAPS_8BIT};
    use crate::types::{ColorKey, Guid};
    use std::sync::Arc;

    #[test]
    fn color_keys_are_stored_per_kind() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let surface = dd.create_surface(VersionedDesc::Current(&offscreen_desc(8, 8, D3dFormat::R5G6B5))).unwrap();
        let inner = surface.inner();

        assert_eq!(inner.get_color_key(ColorKeyFlags::SRCBLT), Err(DdError::NoColorKey));
        inner.set_color_key(ColorKeyFlags::SRCBLT, Some(ColorKey { low: 0xF81F, high: 0 })).unwrap();
        assert_eq!(inner.get_color_key(ColorKeyFlags::SRCBLT), Ok(ColorKey::single(0xF81F)));
        assert_eq!(inner.get_color_key(ColorKeyFlags::DESTBLT), Err(DdError::NoColorKey));

        inner.set_color_key(ColorKeyFlags::SRCBLT, None).unwrap();
        assert_eq!(inner.get_color_key(ColorKeyFlags::SRCBLT), Err(DdError::NoColorKey));
        assert_eq!(
            inner.get_color_key(ColorKeyFlags::SRCBLT | ColorKeyFlags::DESTBLT),
            Err(DdError::InvalidParams)
        );
        dd.release();
    }

    #[test]
    fn palettes_only_attach_to_indexed_surfaces() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let rgb = dd.create_surface(VersionedDesc::Current(&offscreen_desc(8, 8, D3dFormat::R5G6B5))).unwrap();
        let indexed = dd.create_surface(VersionedDesc::Current(&offscreen_desc(8, 8, D3dFormat::P8))).unwrap();
        let palette = Arc::new(Palette::new(DDPCAPS_8BIT, &[]).unwrap());

        assert_eq!(rgb.inner().set_palette(Some(palette.clone())), Err(DdError::NotPalettized));
        assert_eq!(indexed.inner().get_palette().err(), Some(DdError::NoPaletteAttached));
        indexed.inner().set_palette(Some(palette.clone())).unwrap();
        assert!(Arc::ptr_eq(&indexed.inner().get_palette().unwrap(), &palette));
        dd.release();
    }

    #[test]
    fn private_data_reports_needed_size() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let surface = dd.create_surface(VersionedDesc::Current(&offscreen_desc(4, 4, D3dFormat::X8R8G8B8))).unwrap();
        let inner = surface.inner();
        let tag = Guid::from_u128(42);

        inner.set_private_data(tag, &[1, 2, 3, 4], 0).unwrap();
        let mut small = [0u8; 2];
        assert_eq!(inner.get_private_data(tag, Some(&mut small)), Err(DdError::MoreData));
        assert_eq!(inner.private_data_size(tag), Ok(4));
        let mut out = [0u8; 8];
        assert_eq!(inner.get_private_data(tag, Some(&mut out)), Ok(4));
        assert_eq!(&out[..4], &[1, 2, 3, 4]);
        inner.free_private_data(tag).unwrap();
        assert_eq!(inner.free_private_data(tag), Err(DdError::NotFound));
        dd.release();
    }

    #[test]
    fn priority_and_lod_need_managed_textures() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let plain = dd.create_surface(VersionedDesc::Current(&offscreen_desc(4, 4, D3dFormat::X8R8G8B8))).unwrap();
        assert_eq!(plain.inner().set_priority(1), Err(DdError::InvalidObject));

        let mut desc = offscreen_desc(4, 4, D3dFormat::X8R8G8B8);
        desc.caps.caps = crate::desc::Caps::TEXTURE;
        desc.caps.caps2 = crate::desc::Caps2::TEXTUREMANAGE;
        let managed = dd.create_surface(VersionedDesc::Current(&desc)).unwrap();
        managed.inner().set_priority(7).unwrap();
        managed.inner().set_lod(2).unwrap();
        assert_eq!(managed.inner().get_priority(), Ok(7));
        assert_eq!(managed.inner().get_lod(), Ok(2));
        dd.release();
    }

    #[test]
    fn uniqueness_changes_on_request() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let surface = dd.create_surface(VersionedDesc::Current(&offscreen_desc(4, 4, D3dFormat::X8R8G8B8))).unwrap();
        let before = surface.inner().get_uniqueness_value();
        surface.inner().change_uniqueness_value().unwrap();
        assert_ne!(surface.inner().get_uniqueness_value(), before);
        dd.release();
    }

    #[test]
    fn set_surface_desc_resizes_and_rejects_client_memory() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let surface = dd.create_surface(VersionedDesc::Current(&offscreen_desc(4, 4, D3dFormat::R5G6B5))).unwrap();

        let mut change = crate::desc::SurfaceDesc2 {
            flags: crate::desc::DescFlags::WIDTH | crate::desc::DescFlags::HEIGHT,
            width: 10,
            height: 6,
            ..Default::default()
        };
        surface.inner().set_surface_desc(&VersionedDesc::Current(&change), 0).unwrap();
        let desc = surface.inner().get_surface_desc().unwrap();
        assert_eq!((desc.width, desc.height, desc.pitch), (10, 6, 20));

        change.flags = crate::desc::DescFlags::LPSURFACE;
        assert_eq!(surface.inner().set_surface_desc(&VersionedDesc::Current(&change), 0), Err(DdError::Unsupported));
        assert_eq!(surface.inner().set_surface_desc(&VersionedDesc::Current(&change), 1), Err(DdError::InvalidParams));
        dd.release();
    }

    #[test]
    fn set_surface_desc_leaves_a_held_lock_alone() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let surface = dd.create_surface(VersionedDesc::Current(&offscreen_desc(4, 4, D3dFormat::R5G6B5))).unwrap();
        let inner = surface.inner();
        inner.lock(None, crate::desc::LockFlags::WAIT).unwrap();
        let texture = inner.texture_id();
        assert!(texture.is_some());

        let change = crate::desc::SurfaceDesc2 {
            flags: crate::desc::DescFlags::WIDTH | crate::desc::DescFlags::HEIGHT,
            width: 8,
            height: 8,
            ..Default::default()
        };
        assert_eq!(inner.set_surface_desc(&VersionedDesc::Current(&change), 0), Err(DdError::SurfaceBusy));
        assert!(inner.is_locked());
        assert_eq!(inner.texture_id(), texture);
        assert_eq!(inner.get_surface_desc().unwrap().width, 4);

        inner.unlock(None).unwrap();
        inner.set_surface_desc(&VersionedDesc::Current(&change), 0).unwrap();
        assert_eq!(inner.get_surface_desc().unwrap().width, 8);
        dd.release();
    }

    #[test]
    fn released_surface_turns_invalid() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let surface = dd.create_surface(VersionedDesc::Current(&offscreen_desc(4, 4, D3dFormat::R5G6B5))).unwrap();
        let inner = surface.inner().clone();
        assert_eq!(surface.release(), 0);
        assert!(inner.is_destroyed());
        assert_eq!(inner.get_surface_desc(), Err(DdError::InvalidObject));
        dd.release();
    }
}
