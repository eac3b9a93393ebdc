//! Process-wide device state
//!
//! Every DirectDraw object in a process shares one Direct3D9 object and
//! device, one display mode record and one exclusive mode binding. They live
//! in `ProcessContext`, which is set up when the first container registers and
//! torn down when the last one goes away.
//!
//! Lock order: `state`, then surface state locks in ascending id order, then
//! `device`, then the leaf locks (frame counter, emulated surface pool,
//! attachment lists). Window messages produced while `state` is held are
//! queued and dispatched after it is released.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::time::{Duration, Instant};

use dd7to9_common::Config;

use crate::backend::{
    BehaviorFlags, D3dError, Device9, Direct3D9, Direct3DCreate, PresentParameters, RasterStatus, SwapEffect,
    PRESENT_INTERVAL_IMMEDIATE,
};
use crate::ddraw::DirectDraw;
use crate::desc::{CooperativeFlags, PixelFormat, WaitVbFlags};
use crate::emu::EmuSurfacePool;
use crate::error::{DdError, DdResult};
use crate::format::D3dFormat;
use crate::mouse::{self, ClampArea};
use crate::present::{FrameCounter, PresentThread};
use crate::surface::Surface;
use crate::types::{Rect, WindowHandle};
use crate::window::{DeviceChangeNotice, WindowSystem};

/// The Direct3D9 device slot shared with the present thread
pub type SharedDevice = Arc<Mutex<Option<Box<dyn Device9>>>>;

/// Longest busy wait for a vertical blank edge
const VBLANK_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

/// A display mode record and the container that set it
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DisplaySettings {
    pub hwnd: WindowHandle,
    pub set_by: Option<ContainerId>,
    pub width: u32,
    pub height: u32,
    pub bpp: u32,
    pub refresh_rate: u32,
}

impl DisplaySettings {
    pub fn has_mode(&self) -> bool {
        self.width != 0 && self.height != 0 && self.bpp != 0
    }

    pub(crate) fn clear_mode(&mut self) {
        self.width = 0;
        self.height = 0;
        self.bpp = 0;
        self.refresh_rate = 0;
    }
}

/// Where the process stands in the cooperative level state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CooperativeState {
    Normal,
    /// Exclusive mode is bound to a window but no display mode was set yet
    ExclusivePending,
    ExclusiveActive,
}

/// Device creation inputs collected from cooperative level and display calls
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct DeviceSettings {
    pub windowed: bool,
    pub anti_aliasing: bool,
    pub allow_mode_x: bool,
    pub multithreaded: bool,
    pub fpu_preserve: bool,
    pub no_window_changes: bool,
    pub width: u32,
    pub height: u32,
    pub refresh_rate: u32,
    pub depth_stencil: D3dFormat,
}

pub(crate) struct ContainerEntry {
    pub id: ContainerId,
    pub ddraw: Weak<DirectDraw>,
    pub surfaces: Vec<Arc<Surface>>,
}

#[derive(Default)]
pub(crate) struct SharedState {
    pub containers: Vec<ContainerEntry>,
    pub display: DisplaySettings,
    pub exclusive_mode: bool,
    pub exclusive: DisplaySettings,
    pub device: DeviceSettings,
    /// Set by a display mode change, makes the next device creation announce it
    pub set_resolution: bool,
    pub viewport: (u32, u32),
    pub surface_size: (u32, u32),
    pub display_pixel_format: Option<PixelFormat>,
    pub fourcc_codes: Option<Vec<u32>>,
    pub d3d9: Option<Box<dyn Direct3D9>>,
    pub present_params: PresentParameters,
    behavior: BehaviorFlags,
    focus_window: WindowHandle,
    last_device_size: (u32, u32),
    presenter: Option<PresentThread>,
    #[cfg(windows)]
    mouse_hook: Option<mouse::MouseHook>,
    pending_notice: Option<(WindowHandle, DeviceChangeNotice)>,
}

impl SharedState {
    pub fn all_surfaces(&self) -> impl Iterator<Item = &Arc<Surface>> + '_ {
        self.containers.iter().flat_map(|entry| entry.surfaces.iter())
    }

    pub fn container(&self, id: ContainerId) -> Option<&ContainerEntry> {
        self.containers.iter().find(|entry| entry.id == id)
    }

    pub fn container_mut(&mut self, id: ContainerId) -> Option<&mut ContainerEntry> {
        self.containers.iter_mut().find(|entry| entry.id == id)
    }

    pub fn cooperative_state(&self) -> CooperativeState {
        match (self.exclusive_mode, self.exclusive.has_mode()) {
            (false, _) => CooperativeState::Normal,
            (true, false) => CooperativeState::ExclusivePending,
            (true, true) => CooperativeState::ExclusiveActive,
        }
    }
}

pub struct ProcessContext {
    config: Config,
    create_d3d9: Direct3DCreate,
    windows: Arc<dyn WindowSystem>,
    state: Mutex<SharedState>,
    device: SharedDevice,
    emu_pool: EmuSurfacePool,
    frames: Mutex<FrameCounter>,
    wait_vsync: AtomicBool,
    multiple_cores: AtomicBool,
    next_id: AtomicU64,
    self_ref: Weak<ProcessContext>,
}

static GLOBAL: OnceLock<Arc<ProcessContext>> = OnceLock::new();

impl ProcessContext {
    pub fn new(config: Config, create_d3d9: Direct3DCreate, windows: Arc<dyn WindowSystem>) -> Arc<Self> {
        let safety = config.frame_skip_safety_factor;
        Arc::new_cyclic(|self_ref| Self {
            config,
            create_d3d9,
            windows,
            state: Mutex::new(SharedState::default()),
            device: Arc::new(Mutex::new(None)),
            emu_pool: EmuSurfacePool::new(),
            frames: Mutex::new(FrameCounter::new(safety, Instant::now())),
            wait_vsync: AtomicBool::new(false),
            multiple_cores: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            self_ref: self_ref.clone(),
        })
    }

    /// The context of the host process, built on first use
    pub fn global() -> Arc<ProcessContext> {
        GLOBAL
            .get_or_init(|| {
                let config = Config::load_from_env().unwrap_or_else(|err| {
                    tracing::error!("Failed to load config, using defaults: {:#}", err);
                    Config::default()
                });
                Self::with_platform(config)
            })
            .clone()
    }

    #[cfg(windows)]
    fn with_platform(config: Config) -> Arc<Self> {
        Self::new(config, crate::backend::d3d9::factory(), Arc::new(crate::window::Win32Windows))
    }

    #[cfg(not(windows))]
    fn with_platform(config: Config) -> Arc<Self> {
        let backend = crate::backend::software::SoftwareBackend::new();
        Self::new(config, backend.factory(), Arc::new(crate::window::HeadlessWindows::default()))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn windows(&self) -> &dyn WindowSystem {
        self.windows.as_ref()
    }

    pub(crate) fn emu_pool(&self) -> &EmuSurfacePool {
        &self.emu_pool
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, SharedState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn lock_device(&self) -> MutexGuard<'_, Option<Box<dyn Device9>>> {
        self.device.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Run `f` under the state lock, then deliver any queued window messages
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut SharedState) -> R) -> R {
        let (result, notice) = {
            let mut state = self.lock_state();
            let result = f(&mut state);
            (result, state.pending_notice.take())
        };
        if let Some((hwnd, notice)) = notice {
            self.windows.notify_device_change(hwnd, &notice);
        }
        result
    }

    pub fn cooperative_state(&self) -> CooperativeState {
        self.lock_state().cooperative_state()
    }

    pub fn present_parameters(&self) -> PresentParameters {
        self.lock_state().present_params
    }

    pub fn has_device(&self) -> bool {
        self.lock_device().is_some()
    }

    /// Status of the device, `None` before one exists
    pub(crate) fn device_status(&self) -> Option<Result<(), D3dError>> {
        self.lock_device().as_ref().map(|dev| dev.test_cooperative_level())
    }

    // ---------------------------------------------------------------------
    // Container registry
    // ---------------------------------------------------------------------

    pub(crate) fn register_container(&self, id: ContainerId, ddraw: Weak<DirectDraw>) -> DdResult<()> {
        self.with_state(|state| {
            if state.containers.is_empty() {
                self.init_shared(state)?;
            }
            state.containers.push(ContainerEntry { id, ddraw, surfaces: Vec::new() });
            tracing::debug!("Registered DirectDraw container {:?}", id);
            Ok(())
        })
    }

    fn init_shared(&self, state: &mut SharedState) -> DdResult<()> {
        tracing::info!("Initializing shared DirectDraw state");
        *state = SharedState::default();
        state.device.windowed = true;

        let config = &self.config;
        if config.use_native_resolution {
            let (width, height) = self.windows.screen_size(None);
            state.device.width = width;
            state.device.height = height;
        } else if config.override_width != 0 && config.override_height != 0 {
            state.device.width = config.override_width;
            state.device.height = config.override_height;
        }
        state.device.refresh_rate = config.override_refresh_rate;

        let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let threaded = !config.single_proc_affinity && cores > 1;
        if threaded {
            match PresentThread::spawn(self.device.clone()) {
                Ok(thread) => state.presenter = Some(thread),
                Err(err) => tracing::warn!("Failed to start present thread: {}", err),
            }
        }
        self.multiple_cores.store(state.presenter.is_some(), Ordering::Release);

        #[cfg(windows)]
        if config.enable_mouse_hook {
            state.mouse_hook = mouse::MouseHook::install();
        }

        self.ensure_object(state)
    }

    pub(crate) fn unregister_container(&self, id: ContainerId) {
        let released = self.with_state(|state| {
            if state.display.set_by == Some(id) {
                state.display.set_by = None;
            }
            if state.exclusive.set_by == Some(id) {
                state.exclusive_mode = false;
                state.exclusive = DisplaySettings::default();
                self.windows.unwatch_destroy();
            }

            let Some(index) = state.containers.iter().position(|entry| entry.id == id) else {
                return Vec::new();
            };
            let entry = state.containers.remove(index);
            let ids: Vec<SurfaceId> = entry.surfaces.iter().map(|s| s.id()).collect();
            for surface in &entry.surfaces {
                surface.release_d9(false);
                surface.mark_destroyed();
            }
            for surface in state.all_surfaces() {
                surface.forget_attachments(&ids);
            }

            if state.containers.is_empty() {
                self.teardown(state);
            }
            entry.surfaces
        });
        tracing::debug!("Released DirectDraw container {:?} with {} surfaces", id, released.len());
    }

    fn teardown(&self, state: &mut SharedState) {
        if let Some(mut presenter) = state.presenter.take() {
            presenter.stop();
        }
        self.multiple_cores.store(false, Ordering::Release);
        self.lock_device().take();
        state.d3d9 = None;
        state.fourcc_codes = None;
        self.windows.unwatch_destroy();
        #[cfg(windows)]
        {
            state.mouse_hook = None;
        }
        mouse::set_clamp_area(None);
        self.emu_pool.clear();
        tracing::info!("Last DirectDraw object released, device torn down");
    }

    pub(crate) fn add_surfaces(&self, state: &mut SharedState, container: ContainerId, surfaces: &[Arc<Surface>]) {
        if let Some(entry) = state.container_mut(container) {
            entry.surfaces.extend(surfaces.iter().cloned());
        }
        if !self.config.force_vsync_mode {
            self.wait_vsync.store(true, Ordering::Release);
        }
    }

    /// Drop a surface and the complex children created with it
    pub(crate) fn remove_surface(&self, id: SurfaceId) {
        let removed = self.with_state(|state| {
            let mut doomed = vec![id];
            let mut removed: Vec<Arc<Surface>> = Vec::new();
            while let Some(next) = doomed.pop() {
                for entry in state.containers.iter_mut() {
                    if let Some(index) = entry.surfaces.iter().position(|s| s.id() == next) {
                        removed.push(entry.surfaces.remove(index));
                        doomed.extend(
                            entry.surfaces.iter().filter(|s| s.complex_root() == Some(next)).map(|s| s.id()),
                        );
                    }
                }
            }

            let ids: Vec<SurfaceId> = removed.iter().map(|s| s.id()).collect();
            for surface in &removed {
                surface.release_d9(false);
                surface.mark_destroyed();
            }
            for surface in state.all_surfaces() {
                surface.forget_attachments(&ids);
            }
            removed
        });
        tracing::debug!("Destroyed {} surface(s) rooted at {:?}", removed.len(), id);
    }

    // ---------------------------------------------------------------------
    // Exclusive window watch
    // ---------------------------------------------------------------------

    pub(crate) fn watch_exclusive_window(&self, hwnd: WindowHandle) {
        let ctx = self.self_ref.clone();
        self.windows.watch_destroy(
            hwnd,
            Arc::new(move |destroyed| {
                if let Some(ctx) = ctx.upgrade() {
                    ctx.on_window_destroyed(destroyed);
                }
            }),
        );
    }

    fn on_window_destroyed(&self, hwnd: WindowHandle) {
        let owner = {
            let state = self.lock_state();
            if !state.exclusive_mode || state.exclusive.hwnd != hwnd {
                return;
            }
            let set_by = state.exclusive.set_by;
            state.containers.iter().find(|entry| Some(entry.id) == set_by).and_then(|entry| entry.ddraw.upgrade())
        };
        if let Some(ddraw) = owner {
            tracing::info!("Exclusive window {:?} destroyed, leaving exclusive mode", hwnd);
            if let Err(err) = ddraw.set_cooperative_level(hwnd, CooperativeFlags::NORMAL) {
                tracing::warn!("Failed to leave exclusive mode: {}", err);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Object and device lifecycle
    // ---------------------------------------------------------------------

    pub(crate) fn ensure_object(&self, state: &mut SharedState) -> DdResult<()> {
        if state.d3d9.is_some() {
            return Ok(());
        }
        match (self.create_d3d9)() {
            Ok(d3d9) => {
                tracing::debug!("Created Direct3D9 object");
                state.d3d9 = Some(d3d9);
                Ok(())
            }
            Err(err) => {
                tracing::error!("Failed to create Direct3D9 object: {}", err);
                Err(DdError::Generic)
            }
        }
    }

    /// Create the device if none exists yet
    pub(crate) fn ensure_device(&self) -> DdResult<()> {
        if self.has_device() {
            return Ok(());
        }
        self.with_state(|state| {
            if self.has_device() {
                return Ok(());
            }
            self.create_device_locked(state)
        })
    }

    fn back_buffer_size(&self, state: &SharedState, hwnd: WindowHandle) -> (u32, u32) {
        let device = &state.device;
        if device.width != 0 && device.height != 0 {
            return (device.width, device.height);
        }
        if state.viewport.0 != 0 && state.viewport.1 != 0 {
            return state.viewport;
        }
        if state.surface_size.0 != 0 && state.surface_size.1 != 0 {
            return state.surface_size;
        }
        if device.windowed && self.windows.is_window(hwnd) {
            if let Some((width, height)) = self.windows.client_size(hwnd) {
                if width != 0 && height != 0 {
                    return (width, height);
                }
            }
        }
        self.windows.screen_size(Some(hwnd))
    }

    /// Create or reset the device from the current settings
    ///
    /// Every GPU resource of every container is released first. The device is
    /// reset in place when the focus window and behavior flags are unchanged,
    /// otherwise it is recreated.
    pub(crate) fn create_device_locked(&self, state: &mut SharedState) -> DdResult<()> {
        self.ensure_object(state)?;
        let config = &self.config;

        let hwnd = state.display.hwnd;
        let windowed = state.device.windowed || hwnd.is_null();
        let (width, height) = self.back_buffer_size(state, hwnd);

        let mut params = PresentParameters {
            back_buffer_width: width,
            back_buffer_height: height,
            back_buffer_count: 1,
            swap_effect: SwapEffect::Discard,
            device_window: hwnd,
            windowed,
            presentation_interval: PRESENT_INTERVAL_IMMEDIATE,
            ..Default::default()
        };
        if windowed {
            params.back_buffer_format = D3dFormat::Unknown;
            params.refresh_rate = 0;
        } else {
            params.back_buffer_format = D3dFormat::X8R8G8B8;
            params.refresh_rate = state.device.refresh_rate;
        }

        let depth_stencil = if config.override_stencil_format != 0 {
            D3dFormat::from_raw(config.override_stencil_format)
        } else {
            state.device.depth_stencil
        };
        if depth_stencil != D3dFormat::Unknown {
            params.enable_auto_depth_stencil = true;
            params.auto_depth_stencil_format = depth_stencil;
        }

        let d3d9 = state.d3d9.as_ref().ok_or(DdError::Generic)?;
        if config.anti_aliasing || state.device.anti_aliasing {
            let format = if windowed { D3dFormat::X8R8G8B8 } else { params.back_buffer_format };
            for samples in (2..=16).rev() {
                if let Some(levels) = d3d9.multisample_quality_levels(format, windowed, samples) {
                    params.multisample_type = samples;
                    params.multisample_quality = levels.saturating_sub(1);
                    break;
                }
            }
        }

        let hardware = d3d9.device_caps().map(|caps| caps.hardware_vertex_processing).unwrap_or(false);
        let mut behavior = if hardware {
            BehaviorFlags::HARDWARE_VERTEXPROCESSING
        } else {
            BehaviorFlags::SOFTWARE_VERTEXPROCESSING
        };
        if !config.single_proc_affinity {
            behavior |= BehaviorFlags::MULTITHREADED;
        }
        if state.device.fpu_preserve {
            behavior |= BehaviorFlags::FPU_PRESERVE;
        }
        if state.device.no_window_changes {
            behavior |= BehaviorFlags::NOWINDOWCHANGES;
        }

        tracing::info!(
            "Creating Direct3D9 device {}x{} windowed={} refresh={} behavior={:?}",
            width,
            height,
            windowed,
            params.refresh_rate,
            behavior
        );

        self.release_all_d9(state, true);

        {
            let mut slot = self.lock_device();
            let reusable = slot.is_some() && state.focus_window == hwnd && state.behavior == behavior;
            if reusable {
                if let Some(dev) = slot.as_mut() {
                    if let Err(err) = dev.reset(&mut params) {
                        tracing::warn!("Device reset failed, recreating: {}", err);
                        slot.take();
                    }
                }
            } else if slot.take().is_some() {
                tracing::debug!("Focus window or behavior changed, recreating device");
            }

            if slot.is_none() {
                let d3d9 = state.d3d9.as_ref().ok_or(DdError::Generic)?;
                match d3d9.create_device(hwnd, behavior, &mut params) {
                    Ok(dev) => *slot = Some(dev),
                    Err(err) => {
                        tracing::error!("Failed to create Direct3D9 device: {}", err);
                        return Err(DdError::Generic);
                    }
                }
            }
        }

        state.present_params = params;
        state.focus_window = hwnd;
        state.behavior = behavior;
        state.fourcc_codes = None;
        self.wait_vsync.store(false, Ordering::Release);

        let size = (width, height);
        if self.windows.is_window(hwnd) {
            let display_changed = (state.set_resolution || size != state.last_device_size).then(|| {
                let bpp = if state.display.bpp != 0 { state.display.bpp } else { self.windows.bit_count(Some(hwnd)) };
                (bpp, width, height)
            });
            state.pending_notice = Some((
                hwnd,
                DeviceChangeNotice { display_changed, window_rect: Rect::from_size(width, height), client_size: size },
            ));
        }
        state.set_resolution = false;
        state.last_device_size = size;

        let refresh = if params.refresh_rate != 0 { params.refresh_rate } else { self.windows.refresh_rate(Some(hwnd)) };
        self.lock_frames().set_refresh_rate(refresh);

        self.update_mouse_clamp(state);
        Ok(())
    }

    fn update_mouse_clamp(&self, state: &SharedState) {
        let config = &self.config;
        if !config.enable_mouse_hook || !config.forces_back_buffer_size() || !config.is_fullscreen_path() {
            return;
        }
        let display = if state.exclusive.has_mode() { &state.exclusive } else { &state.display };
        let params = &state.present_params;
        mouse::set_clamp_area(Some(ClampArea {
            display: (display.width, display.height),
            device: (params.back_buffer_width, params.back_buffer_height),
            windowed: params.windowed,
            hwnd: state.display.hwnd,
        }));
    }

    /// Ask every surface in every container to drop its GPU resources
    pub(crate) fn release_all_d9(&self, state: &SharedState, backup: bool) {
        for surface in state.all_surfaces() {
            surface.release_d9(backup);
        }
    }

    /// Recover a lost device
    pub(crate) fn reinit_device(&self, state: &mut SharedState) -> DdResult<()> {
        let status = match self.lock_device().as_ref() {
            Some(dev) => dev.test_cooperative_level(),
            None => return self.create_device_locked(state),
        };
        match status {
            Ok(()) => return Ok(()),
            Err(D3dError::DeviceLost) => return Err(DdError::SurfaceLost),
            Err(D3dError::DeviceNotReset) | Err(D3dError::DriverInternalError) => {}
            Err(err) => {
                limit_warn!(100, "Device in unexpected state: {}", err);
                return Err(DdError::Generic);
            }
        }

        tracing::info!("Resetting lost device");
        self.release_all_d9(state, true);

        let mut params = state.present_params;
        let result = match self.lock_device().as_mut() {
            Some(dev) => dev.reset(&mut params),
            None => Err(D3dError::InvalidCall),
        };
        match result {
            Ok(()) => {
                state.present_params = params;
                Ok(())
            }
            Err(D3dError::DeviceRemoved) | Err(D3dError::DriverInternalError) => {
                tracing::warn!("Reset failed, recreating Direct3D9 object and device");
                self.lock_device().take();
                state.d3d9 = None;
                self.ensure_object(state)?;
                self.create_device_locked(state)
            }
            Err(err) => {
                tracing::error!("Device reset failed: {}", err);
                Err(DdError::Generic)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn set_viewport(&self, width: u32, height: u32) {
        self.lock_state().viewport = (width, height);
    }

    // ---------------------------------------------------------------------
    // Presentation
    // ---------------------------------------------------------------------

    fn lock_frames(&self) -> MutexGuard<'_, FrameCounter> {
        self.frames.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Whether the frame about to be presented may be dropped
    pub(crate) fn skip_frame(&self) -> bool {
        let use_vsync = self.wait_vsync.load(Ordering::Acquire) && !self.config.enable_vsync;
        self.config.auto_frame_skip && !use_vsync && self.lock_frames().should_skip(Instant::now())
    }

    #[cfg(test)]
    pub(crate) fn frames_presented(&self) -> u64 {
        self.lock_frames().frames()
    }

    /// Present the back buffer, on this thread or through the present thread
    pub(crate) fn present(&self) -> DdResult<()> {
        self.ensure_device()?;

        let wait_vsync = self.wait_vsync.load(Ordering::Acquire);
        if wait_vsync && !self.config.enable_vsync {
            let (interval, since) = {
                let frames = self.lock_frames();
                (frames.refresh_interval_ms(), frames.since_last_present(Instant::now()))
            };
            if since.as_secs_f32() * 1000.0 <= interval {
                self.spin_until_vblank(true)?;
            }
            self.wait_vsync.store(false, Ordering::Release);
        }

        let direct = (wait_vsync && self.config.enable_vsync) || !self.multiple_cores.load(Ordering::Acquire);
        let result = match self.lock_device().as_mut() {
            Some(dev) if direct => dev.present(),
            Some(dev) => dev.test_cooperative_level(),
            None => Err(D3dError::InvalidCall),
        };

        match result {
            Ok(()) => {
                if !direct {
                    if let Some(presenter) = self.lock_state().presenter.as_ref() {
                        presenter.trigger();
                    }
                }
                let mut frames = self.lock_frames();
                frames.presented(Instant::now());
                tracing::trace!("Presented frame {}", frames.frames());
                Ok(())
            }
            Err(D3dError::DeviceLost) | Err(D3dError::DeviceNotReset) => {
                limit_debug!(100, "Device lost during present, reinitializing");
                self.with_state(|state| self.reinit_device(state))
            }
            Err(err) => {
                limit_warn!(100, "Present failed: {}", err);
                Err(err.into())
            }
        }
    }

    pub(crate) fn raster_status(&self) -> DdResult<RasterStatus> {
        self.ensure_device()?;
        match self.lock_device().as_ref() {
            Some(dev) => dev.raster_status().map_err(|err| {
                limit_warn!(100, "Failed to get raster status: {}", err);
                DdError::Generic
            }),
            None => Err(DdError::Generic),
        }
    }

    fn spin_until_vblank(&self, in_vblank: bool) -> DdResult<()> {
        let deadline = Instant::now() + VBLANK_TIMEOUT;
        loop {
            if self.raster_status()?.in_vblank == in_vblank {
                return Ok(());
            }
            if Instant::now() >= deadline {
                limit_debug!(10, "Gave up waiting for vertical blank");
                return Ok(());
            }
            std::thread::yield_now();
        }
    }

    pub(crate) fn wait_for_vertical_blank(&self, flags: WaitVbFlags) -> DdResult<()> {
        self.ensure_device()?;
        if self.config.force_vsync_mode {
            return Ok(());
        }

        if flags == WaitVbFlags::BLOCKBEGIN {
            if self.raster_status()?.in_vblank {
                return Ok(());
            }
            self.spin_until_vblank(true)
        } else if flags == WaitVbFlags::BLOCKEND {
            self.spin_until_vblank(true)?;
            self.spin_until_vblank(false)
        } else if flags == WaitVbFlags::BLOCKBEGINEVENT {
            not_implemented!("WaitForVerticalBlank with DDWAITVB_BLOCKBEGINEVENT");
            Err(DdError::Unsupported)
        } else {
            Err(DdError::InvalidParams)
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::window::HeadlessWindows;

    pub(crate) struct Harness {
        pub ctx: Arc<ProcessContext>,
        pub backend: SoftwareBackend,
        pub windows: Arc<HeadlessWindows>,
    }

    /// Presents run on the calling thread so tests stay deterministic
    pub(crate) fn test_config() -> Config {
        Config { single_proc_affinity: true, ..Config::default() }
    }

    pub(crate) fn harness() -> Harness {
        harness_with(test_config(), SoftwareBackend::new())
    }

    pub(crate) fn harness_with(config: Config, backend: SoftwareBackend) -> Harness {
        let windows = Arc::new(HeadlessWindows::default());
        let ctx = ProcessContext::new(config, backend.factory(), windows.clone());
        Harness { ctx, backend, windows }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::ddraw::DirectDraw;
    use crate::interface::InterfaceVersion;

    #[test]
    fn first_container_sets_up_and_last_tears_down() {
        let h = harness();
        let a = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let b = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V1).unwrap();
        h.ctx.ensure_device().unwrap();
        assert!(h.ctx.has_device());

        a.release();
        assert!(h.ctx.has_device(), "device survives while a container is alive");
        b.release();
        assert!(!h.ctx.has_device());
        assert!(h.ctx.lock_state().d3d9.is_none());
    }

    #[test]
    fn anti_aliasing_picks_the_highest_supported_sample_count() {
        let h = harness_with(Config { anti_aliasing: true, ..test_config() }, SoftwareBackend::new());
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        h.ctx.ensure_device().unwrap();
        let params = h.backend.stats.last_params().unwrap();
        assert_eq!(params.multisample_type, 4);
        assert_eq!(params.multisample_quality, 0);
        dd.release();
    }

    #[test]
    fn back_buffer_size_falls_back_through_sources() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let hwnd = h.windows.create_window(640, 480);
        dd.set_cooperative_level(hwnd, CooperativeFlags::NORMAL).unwrap();
        h.ctx.ensure_device().unwrap();
        let params = h.backend.stats.last_params().unwrap();
        assert_eq!((params.back_buffer_width, params.back_buffer_height), (640, 480));
        assert!(params.windowed);

        h.ctx.set_viewport(320, 200);
        h.ctx.with_state(|state| h.ctx.create_device_locked(state)).unwrap();
        let params = h.backend.stats.last_params().unwrap();
        assert_eq!((params.back_buffer_width, params.back_buffer_height), (320, 200));
        dd.release();
    }

    #[test]
    fn same_window_and_behavior_resets_instead_of_recreating() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        h.ctx.ensure_device().unwrap();
        h.ctx.with_state(|state| h.ctx.create_device_locked(state)).unwrap();
        assert_eq!(h.backend.stats.devices_created.load(Ordering::SeqCst), 1);
        assert_eq!(h.backend.stats.resets.load(Ordering::SeqCst), 1);

        let hwnd = h.windows.create_window(800, 600);
        dd.set_cooperative_level(hwnd, CooperativeFlags::NORMAL).unwrap();
        assert_eq!(h.backend.stats.devices_created.load(Ordering::SeqCst), 2, "new focus window recreates");
        dd.release();
    }

    #[test]
    fn single_proc_affinity_drops_multithreaded_flag() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        h.ctx.ensure_device().unwrap();
        let behavior = h.backend.stats.last_behavior();
        assert!(!behavior.contains(BehaviorFlags::MULTITHREADED));
        assert!(behavior.contains(BehaviorFlags::HARDWARE_VERTEXPROCESSING));
        dd.release();
    }

    #[test]
    fn present_recovers_from_resettable_device() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        h.ctx.ensure_device().unwrap();

        h.backend.faults.make_resettable();
        h.ctx.present().unwrap();
        assert_eq!(h.backend.stats.resets.load(Ordering::SeqCst), 1);
        assert_eq!(h.ctx.device_status(), Some(Ok(())));

        h.ctx.present().unwrap();
        assert_eq!(h.backend.stats.presents.load(Ordering::SeqCst), 1);
        assert_eq!(h.ctx.frames_presented(), 1);
        dd.release();
    }

    #[test]
    fn failed_reset_recreates_object_and_device() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        h.ctx.ensure_device().unwrap();

        h.backend.faults.make_resettable();
        h.backend.faults.fail_next_reset.store(true, Ordering::SeqCst);
        h.ctx.with_state(|state| h.ctx.reinit_device(state)).unwrap();
        assert_eq!(h.backend.stats.devices_created.load(Ordering::SeqCst), 2);
        dd.release();
    }

    #[test]
    fn truly_lost_device_reports_surface_lost() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        h.ctx.ensure_device().unwrap();
        h.backend.faults.lose_device();
        assert_eq!(h.ctx.with_state(|state| h.ctx.reinit_device(state)), Err(DdError::SurfaceLost));
        assert_eq!(h.ctx.present(), Err(DdError::SurfaceLost));
        dd.release();
    }

    #[test]
    fn wait_for_vertical_blank_validates_flags() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        assert_eq!(h.ctx.wait_for_vertical_blank(WaitVbFlags::BLOCKBEGINEVENT), Err(DdError::Unsupported));
        assert_eq!(
            h.ctx.wait_for_vertical_blank(WaitVbFlags::BLOCKBEGIN | WaitVbFlags::BLOCKEND),
            Err(DdError::InvalidParams)
        );
        h.ctx.wait_for_vertical_blank(WaitVbFlags::BLOCKBEGIN).unwrap();
        h.ctx.wait_for_vertical_blank(WaitVbFlags::BLOCKEND).unwrap();
        dd.release();
    }

    #[test]
    fn device_creation_announces_itself_to_the_window() {
        let h = harness();
        let dd = DirectDraw::create(h.ctx.clone(), InterfaceVersion::V7).unwrap();
        let hwnd = h.windows.create_window(640, 480);
        dd.set_cooperative_level(hwnd, CooperativeFlags::NORMAL).unwrap();
        h.ctx.ensure_device().unwrap();
        let messages = h.windows.messages(hwnd);
        assert!(!messages.is_empty());
        assert_eq!(messages.last(), Some(&crate::window::WindowMessage::SetFocus));
        dd.release();
    }
}
