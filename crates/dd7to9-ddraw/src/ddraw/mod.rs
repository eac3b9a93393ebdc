//! DirectDraw container
//!
//! A `DirectDraw` object is one application-visible container: it owns the
//! surfaces created through it and carries the cooperative level and display
//! mode calls into the process-wide state in `ProcessContext`. The
//! application holds `DirectDrawInterface` adapters, one per interface
//! version it asked for.

mod caps;
mod cooperative;
mod create;
mod display;
mod interface;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::backend::D3dError;
use crate::clipper::Clipper;
use crate::context::{ContainerId, ProcessContext};
use crate::desc::WaitVbFlags;
use crate::error::{DdError, DdResult};
use crate::interface::{InterfaceVersion, RefCounts};
use crate::palette::Palette;
use crate::types::{DeviceContext, PaletteEntry};

pub use caps::{DdCaps, DeviceIdentifier, DDCAPS_DX1_SIZE, DDCAPS_DX3_SIZE, DDCAPS_DX5_SIZE, DDCAPS_DX6_SIZE, DDCAPS_DX7_SIZE};
pub use interface::DirectDrawInterface;

pub struct DirectDraw {
    ctx: Arc<ProcessContext>,
    id: ContainerId,
    /// Version whose semantics apply to calls made on the container itself
    version: InterfaceVersion,
    refs: RefCounts,
    initialized: AtomicBool,
    released: AtomicBool,
    self_ref: Weak<DirectDraw>,
}

impl DirectDraw {
    /// Build a container and hand out its first adapter
    pub fn create(ctx: Arc<ProcessContext>, version: InterfaceVersion) -> DdResult<DirectDrawInterface> {
        if !ctx.config().dd7to9 {
            tracing::warn!("Direct3D9 conversion is disabled in the config");
            return Err(DdError::Unsupported);
        }

        let id = ContainerId(ctx.next_id());
        let effective = version.effective(ctx.config().convert_to_ddraw7);
        let owner = ctx.clone();
        let ddraw = Arc::new_cyclic(|self_ref| DirectDraw {
            ctx: owner,
            id,
            version: effective,
            refs: RefCounts::new(),
            initialized: AtomicBool::new(false),
            released: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        });
        ctx.register_container(id, Arc::downgrade(&ddraw))?;
        tracing::info!("Created DirectDraw container {:?} as version {}", id, version.number());
        Ok(DirectDrawInterface::acquire(ddraw, version))
    }

    pub fn id(&self) -> ContainerId {
        self.id
    }

    pub fn version(&self) -> InterfaceVersion {
        self.version
    }

    pub(crate) fn ctx(&self) -> &Arc<ProcessContext> {
        &self.ctx
    }

    fn arc(&self) -> DdResult<Arc<DirectDraw>> {
        self.self_ref.upgrade().ok_or(DdError::InvalidObject)
    }

    /// Calls on a container whose last reference is gone fail
    fn live(&self) -> DdResult<()> {
        if self.released.load(Ordering::Acquire) {
            return Err(DdError::InvalidObject);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Reference counting
    // ---------------------------------------------------------------------

    pub fn add_ref(&self, version: InterfaceVersion) -> u32 {
        self.refs.add_ref(version)
    }

    /// Drop one reference; the last one releases every surface of the
    /// container and, for the last container, the device
    pub fn release(&self, version: InterfaceVersion) -> u32 {
        let remaining = self.refs.release(version);
        if self.refs.total() == 0 && !self.released.swap(true, Ordering::AcqRel) {
            tracing::debug!("Releasing DirectDraw container {:?}", self.id);
            self.ctx.unregister_container(self.id);
        }
        remaining
    }

    pub fn ref_count(&self, version: InterfaceVersion) -> u32 {
        self.refs.count(version)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    // ---------------------------------------------------------------------
    // Misc
    // ---------------------------------------------------------------------

    /// Objects created through CoCreateInstance are initialized once
    pub fn initialize(&self) -> DdResult<()> {
        self.live()?;
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Err(DdError::AlreadyInitialized);
        }
        Ok(())
    }

    pub fn compact(&self) -> DdResult<()> {
        self.live()
    }

    pub fn flip_to_gdi_surface(&self) -> DdResult<()> {
        self.live()
    }

    pub fn get_surface_from_dc(&self, _dc: DeviceContext) -> DdResult<()> {
        self.live()?;
        not_implemented!("GetSurfaceFromDC");
        Err(DdError::Unsupported)
    }

    pub fn start_mode_test(&self) -> DdResult<()> {
        self.live()?;
        not_implemented!("StartModeTest");
        Err(DdError::Unsupported)
    }

    pub fn evaluate_mode(&self, _flags: u32) -> DdResult<u32> {
        self.live()?;
        not_implemented!("EvaluateMode");
        Err(DdError::Unsupported)
    }

    pub fn create_palette(&self, flags: u32, entries: &[PaletteEntry]) -> DdResult<Arc<Palette>> {
        self.live()?;
        let palette = Palette::new(flags, entries)?;
        tracing::debug!("Created palette with flags {:#x} on {:?}", flags, self.id);
        Ok(Arc::new(palette))
    }

    pub fn create_clipper(&self, flags: u32) -> DdResult<Arc<Clipper>> {
        self.live()?;
        if flags != 0 {
            return Err(DdError::InvalidParams);
        }
        Ok(Arc::new(Clipper::new(flags)))
    }

    // ---------------------------------------------------------------------
    // Device status and vertical blank
    // ---------------------------------------------------------------------

    /// Whether the application may draw right now
    pub fn test_cooperative_level(&self) -> DdResult<()> {
        self.live()?;
        if !self.ctx.lock_state().exclusive_mode {
            return Err(DdError::NoExclusiveMode);
        }
        match self.ctx.device_status() {
            None | Some(Ok(())) => Ok(()),
            Some(Err(D3dError::DriverInternalError | D3dError::InvalidCall)) => Err(DdError::WrongMode),
            Some(Err(D3dError::DeviceNotReset)) => self.ctx.with_state(|state| self.ctx.reinit_device(state)),
            Some(Err(D3dError::DeviceLost)) => Err(DdError::SurfaceLost),
            Some(Err(err)) => Err(err.into()),
        }
    }

    /// Current scan line, `VerticalBlankInProgress` while in vertical blank
    pub fn get_scan_line(&self) -> DdResult<u32> {
        self.live()?;
        let status = self.ctx.raster_status()?;
        if status.in_vblank {
            return Err(DdError::VerticalBlankInProgress);
        }
        Ok(status.scan_line)
    }

    pub fn get_vertical_blank_status(&self) -> DdResult<bool> {
        self.live()?;
        Ok(self.ctx.raster_status()?.in_vblank)
    }

    pub fn wait_for_vertical_blank(&self, flags: WaitVbFlags) -> DdResult<()> {
        self.live()?;
        self.ctx.wait_for_vertical_blank(flags)
    }

    pub fn get_monitor_frequency(&self) -> DdResult<u32> {
        self.live()?;
        let device_rate = self.ctx.lock_device().as_ref().and_then(|dev| dev.display_mode().ok()).map(|m| m.refresh_rate);
        if let Some(rate) = device_rate.filter(|&rate| rate != 0) {
            return Ok(rate);
        }
        let hwnd = self.ctx.lock_state().display.hwnd;
        let hwnd = (!hwnd.is_null()).then_some(hwnd);
        Ok(self.ctx.windows().refresh_rate(hwnd))
    }

    pub fn evict_managed_textures(&self) -> DdResult<()> {
        self.live()?;
        self.ctx.ensure_device()?;
        match self.ctx.lock_device().as_mut() {
            Some(dev) => dev.evict_managed_resources().map_err(|err| {
                limit_warn!(100, "Failed to evict managed textures: {}", err);
                DdError::from(err)
            }),
            None => Err(DdError::Generic),
        }
    }
}

impl std::fmt::Debug for DirectDraw {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectDraw").field("id", &self.id).field("version", &self.version).finish()
    }
}
