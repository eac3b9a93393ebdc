//! Display modes
//!
//! The display mode is emulated: SetDisplayMode records the mode the
//! application asked for and sizes the device back buffer to the closest
//! adapter mode. The desktop itself is only switched by the device when it
//! runs fullscreen.

use crate::backend::DisplayModeInfo;
use crate::context::SharedState;
use crate::desc::{AnyDesc, DescFlags, EnumModeFlags, PixelFormat, SurfaceDesc2};
use crate::error::{DdError, DdResult};
use crate::format::{compute_pitch, display_pixel_format, D3dFormat};
use crate::types::EnumControl;

use super::DirectDraw;

/// Bit depths an application may ask for
pub(crate) const DISPLAY_BIT_COUNTS: [u32; 4] = [8, 16, 24, 32];

/// Bit depths listed when enumerating without a pixel format filter
const ENUM_BIT_COUNTS: [u32; 3] = [8, 16, 32];

/// Adapter mode to run a requested mode in
///
/// An exact size match wins. Low resolution modes that no adapter lists run
/// in the next mode with the same aspect ratio, and 320 or 640 wide modes with
/// non square pixels run in the mode one fifth taller.
pub(crate) fn find_adapter_mode(modes: &[DisplayModeInfo], width: u32, height: u32) -> Option<(u32, u32)> {
    let mut found = None;
    for mode in modes {
        if mode.width == width && mode.height == height {
            return Some((mode.width, mode.height));
        }
        let taller = (mode.width == 320 || mode.width == 640) && mode.width == width && mode.height == height + height / 5;
        let doubled = (mode.width, mode.height) == (640, 480) && width == 320 && (height == 200 || height == 240)
            || (mode.width, mode.height) == (800, 600) && (width, height) == (400, 300)
            || (mode.width, mode.height) == (1024, 768) && (width, height) == (512, 384);
        if taller || doubled {
            found = Some((mode.width, mode.height));
        }
    }
    found
}

impl DirectDraw {
    /// Pixel format of the emulated display at `bpp` bits, cached in the state
    pub(crate) fn display_format(state: &mut SharedState, bpp: u32) -> DdResult<PixelFormat> {
        if let Some(pf) = state.display_pixel_format.filter(|pf| pf.rgb_bit_count == bpp) {
            return Ok(pf);
        }
        let pf = display_pixel_format(bpp)?;
        state.display_pixel_format = Some(pf);
        Ok(pf)
    }

    /// Bit depth of the emulated display, falling back to the desktop
    pub(crate) fn display_bpp(&self, state: &SharedState) -> u32 {
        if state.display.bpp != 0 {
            return state.display.bpp;
        }
        let hwnd = state.display.hwnd;
        self.ctx.windows().bit_count((!hwnd.is_null()).then_some(hwnd))
    }

    /// Point every surface tied to the display at the current display format
    pub(crate) fn restore_display_format(&self, state: &mut SharedState) -> DdResult<()> {
        let bpp = self.display_bpp(state);
        let pf = Self::display_format(state, bpp)?;
        for surface in state.all_surfaces() {
            surface.reset_display(&pf);
        }
        Ok(())
    }

    pub fn set_display_mode(&self, width: u32, height: u32, bpp: u32, refresh_rate: u32, flags: u32) -> DdResult<()> {
        self.live()?;
        if width == 0 || height == 0 || !DISPLAY_BIT_COUNTS.contains(&bpp) {
            limit_warn!(100, "Invalid display mode {}x{}x{}", width, height, bpp);
            return Err(DdError::InvalidParams);
        }
        if flags != 0 {
            not_implemented!("SetDisplayMode flags");
        }
        let config = self.ctx.config();
        let new_bpp = if config.override_bit_mode != 0 { config.override_bit_mode } else { bpp };
        tracing::info!("SetDisplayMode {}x{}x{} @{}Hz", width, height, new_bpp, refresh_rate);

        self.ctx.with_state(|state| {
            let last_size = (state.device.width, state.device.height);
            let last_bpp = state.display.bpp;
            let last_refresh = state.display.refresh_rate;

            let display = &state.display;
            let changed = display.width != width
                || display.height != height
                || display.bpp != new_bpp
                || (refresh_rate != 0 && display.refresh_rate != refresh_rate);
            if changed {
                let exclusive = state.exclusive_mode;
                let (mut found_width, mut found_height) = (width, height);
                if (exclusive && !config.enable_window_mode) || config.fullscreen_window_mode {
                    self.ctx.ensure_object(state)?;
                    let d3d9 = state.d3d9.as_ref().ok_or(DdError::Generic)?;
                    let modes = d3d9.adapter_modes(D3dFormat::X8R8G8B8);
                    (found_width, found_height) = find_adapter_mode(&modes, width, height).ok_or_else(|| {
                        limit_warn!(100, "No adapter mode can show {}x{}", width, height);
                        DdError::InvalidMode
                    })?;
                }

                state.display.width = width;
                state.display.height = height;
                state.display.bpp = new_bpp;
                state.display.refresh_rate = refresh_rate;
                state.device.windowed = !exclusive || config.enable_window_mode || config.fullscreen_window_mode;
                if !config.use_native_resolution && config.override_width == 0 {
                    state.device.width = found_width;
                }
                if !config.use_native_resolution && config.override_height == 0 {
                    state.device.height = found_height;
                }
                if config.override_refresh_rate == 0 {
                    state.device.refresh_rate = refresh_rate;
                }
            }

            if state.exclusive_mode && state.exclusive.hwnd == state.display.hwnd {
                state.exclusive.width = width;
                state.exclusive.height = height;
                state.exclusive.bpp = new_bpp;
                state.exclusive.refresh_rate = refresh_rate;
            }
            state.viewport = (0, 0);
            state.surface_size = (0, 0);

            let size_changed = (state.device.width, state.device.height) != last_size;
            let refresh_changed = !state.device.windowed && state.display.refresh_rate != last_refresh;
            if size_changed || refresh_changed {
                state.set_resolution = state.exclusive_mode;
                self.ctx.create_device_locked(state)?;
            }
            if state.display.bpp != last_bpp {
                self.restore_display_format(state)?;
            }
            Ok(())
        })
    }

    pub fn restore_display_mode(&self) -> DdResult<()> {
        self.live()?;
        let has_device = self.ctx.has_device();
        self.ctx.with_state(|state| {
            if state.display.has_mode() && !state.exclusive_mode {
                return Err(DdError::NoExclusiveMode);
            }
            tracing::info!("Restoring display mode");
            state.device.windowed = true;
            state.display.clear_mode();
            state.viewport = (0, 0);
            state.surface_size = (0, 0);
            if has_device {
                self.restore_display_format(state)?;
            }
            Ok(())
        })
    }

    /// The mode the application sees: its own when it set one, else the desktop
    pub fn get_display_mode(&self) -> DdResult<SurfaceDesc2> {
        self.live()?;
        let windows = self.ctx.windows();
        let config = self.ctx.config();
        self.ctx.with_state(|state| {
            let hwnd = state.display.hwnd;
            let hwnd = (!hwnd.is_null()).then_some(hwnd);
            let (width, height, mut refresh_rate, bpp) = if state.exclusive_mode && state.exclusive.has_mode() {
                let e = &state.exclusive;
                (e.width, e.height, e.refresh_rate, e.bpp)
            } else if state.display.has_mode() {
                let d = &state.display;
                (d.width, d.height, d.refresh_rate, d.bpp)
            } else {
                let (width, height) = windows.screen_size(hwnd);
                (width, height, windows.refresh_rate(hwnd), windows.bit_count(hwnd))
            };
            if refresh_rate == 0 {
                refresh_rate = windows.refresh_rate(hwnd);
            }
            let bpp = if config.override_bit_mode != 0 { config.override_bit_mode } else { bpp };
            let pixel_format = Self::display_format(state, bpp)?;

            Ok(SurfaceDesc2 {
                flags: DescFlags::WIDTH
                    | DescFlags::HEIGHT
                    | DescFlags::REFRESHRATE
                    | DescFlags::PIXELFORMAT
                    | DescFlags::PITCH,
                width,
                height,
                refresh_rate,
                pitch: compute_pitch(width, bpp) as i32,
                pixel_format,
                ..Default::default()
            })
        })
    }

    /// List adapter modes, optionally filtered by the size, refresh rate and
    /// pixel format in `filter`
    ///
    /// Without `REFRESHRATES` only modes at the desktop refresh rate are
    /// listed and the rate is left out of the descriptions.
    pub fn enum_display_modes(
        &self,
        flags: EnumModeFlags,
        filter: Option<&SurfaceDesc2>,
        uses_desc2: bool,
        callback: &mut dyn FnMut(AnyDesc) -> EnumControl,
    ) -> DdResult<()> {
        self.live()?;
        if flags.contains(EnumModeFlags::STANDARDVGAMODES) {
            not_implemented!("EnumDisplayModes with standard VGA modes");
        }
        let windows = self.ctx.windows();
        let limit = self.ctx.config().limit_display_mode_count;

        let (modes, display_bpp, hwnd) = self.ctx.with_state(|state| -> DdResult<_> {
            self.ctx.ensure_object(state)?;
            let d3d9 = state.d3d9.as_ref().ok_or(DdError::Generic)?;
            let hwnd = state.display.hwnd;
            Ok((d3d9.adapter_modes(D3dFormat::X8R8G8B8), state.display.bpp, (!hwnd.is_null()).then_some(hwnd)))
        })?;

        let wanted = |flag: DescFlags| filter.filter(|desc| desc.flags.contains(flag));
        let width = wanted(DescFlags::WIDTH).map(|desc| desc.width);
        let height = wanted(DescFlags::HEIGHT).map(|desc| desc.height);
        let mut refresh_rate = wanted(DescFlags::REFRESHRATE).map(|desc| desc.refresh_rate);
        let with_refresh = flags.contains(EnumModeFlags::REFRESHRATES) || refresh_rate.is_some();
        if !with_refresh {
            refresh_rate = Some(windows.refresh_rate(hwnd));
        }
        let bpp = wanted(DescFlags::PIXELFORMAT).map(|desc| desc.pixel_format.rgb_bit_count).unwrap_or(display_bpp);
        let bit_counts: Vec<u32> = if DISPLAY_BIT_COUNTS.contains(&bpp) { vec![bpp] } else { ENUM_BIT_COUNTS.to_vec() };

        let mut listed = 0u32;
        let mut seen: Vec<(u32, u32, u32, u32)> = Vec::new();
        for mode in &modes {
            if width.is_some_and(|w| w != mode.width)
                || height.is_some_and(|h| h != mode.height)
                || refresh_rate.is_some_and(|r| r != mode.refresh_rate)
            {
                continue;
            }
            for &bits in &bit_counts {
                let reported_refresh = if with_refresh { mode.refresh_rate } else { 0 };
                let key = (mode.width, mode.height, reported_refresh, bits);
                if seen.contains(&key) {
                    continue;
                }
                seen.push(key);

                listed += 1;
                if limit != 0 && listed > limit {
                    return Ok(());
                }
                let mut desc = SurfaceDesc2 {
                    flags: DescFlags::WIDTH | DescFlags::HEIGHT | DescFlags::PIXELFORMAT | DescFlags::PITCH,
                    width: mode.width,
                    height: mode.height,
                    pitch: compute_pitch(mode.width, bits) as i32,
                    pixel_format: display_pixel_format(bits)?,
                    ..Default::default()
                };
                if with_refresh {
                    desc.flags |= DescFlags::REFRESHRATE;
                    desc.refresh_rate = mode.refresh_rate;
                }
                if callback(AnyDesc::for_version(&desc, uses_desc2)) == EnumControl::Cancel {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}
