//! Direct3D9 runtime backend
//!
//! Thin translation of the backend traits onto `IDirect3D9` and
//! `IDirect3DDevice9`. Indexed textures are expanded through their palette on
//! the CPU into a scratch texture before they are drawn.

use std::collections::HashMap;
use std::ffi::c_void;
use std::{mem, ptr};

use windows::Win32::Foundation::{BOOL, HWND, RECT};
use windows::Win32::Graphics::Direct3D9::*;

use super::{
    AdapterIdentifier, BehaviorFlags, D3dError, D3dResult, Device9, DeviceCaps, Direct3D9, Direct3DCreate,
    DisplayModeInfo, LockedRect, Pool, PresentParameters, RasterStatus, SwapEffect, TextureDesc, TextureFilter,
    TextureId, TextureLockFlags, Usage,
};
use crate::format::D3dFormat;
use crate::types::{Rect, WindowHandle};

const DEVCAPS_HWTRANSFORMANDLIGHT: u32 = 0x0001_0000;
const PTFILTERCAPS_MINFLINEAR: u32 = 0x0000_0200;
const PTFILTERCAPS_MAGFLINEAR: u32 = 0x0200_0000;
const PTEXTURECAPS_POW2: u32 = 0x0000_0002;
const PTEXTURECAPS_NONPOW2CONDITIONAL: u32 = 0x0000_0100;

fn check(result: windows::core::Result<()>) -> D3dResult<()> {
    result.map_err(|err| D3dError::from_hresult(err.code().0))
}

fn d3d_format(format: D3dFormat) -> D3DFORMAT {
    D3DFORMAT(format.raw())
}

fn hwnd(handle: WindowHandle) -> HWND {
    HWND(handle.0 as *mut c_void)
}

fn rect(r: &Rect) -> RECT {
    RECT { left: r.left, top: r.top, right: r.right, bottom: r.bottom }
}

fn c_string<T>(chars: &[T]) -> String {
    let bytes = unsafe { std::slice::from_raw_parts(chars.as_ptr() as *const u8, mem::size_of_val(chars)) };
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn present_parameters(params: &PresentParameters) -> D3DPRESENT_PARAMETERS {
    D3DPRESENT_PARAMETERS {
        BackBufferWidth: params.back_buffer_width,
        BackBufferHeight: params.back_buffer_height,
        BackBufferFormat: d3d_format(params.back_buffer_format),
        BackBufferCount: params.back_buffer_count,
        MultiSampleType: D3DMULTISAMPLE_TYPE(params.multisample_type as i32),
        MultiSampleQuality: params.multisample_quality,
        SwapEffect: match params.swap_effect {
            SwapEffect::Discard => D3DSWAPEFFECT_DISCARD,
            SwapEffect::Flip => D3DSWAPEFFECT_FLIP,
            SwapEffect::Copy => D3DSWAPEFFECT_COPY,
        },
        hDeviceWindow: hwnd(params.device_window),
        Windowed: BOOL::from(params.windowed),
        EnableAutoDepthStencil: BOOL::from(params.enable_auto_depth_stencil),
        AutoDepthStencilFormat: d3d_format(params.auto_depth_stencil_format),
        Flags: 0,
        FullScreen_RefreshRateInHz: params.refresh_rate,
        PresentationInterval: params.presentation_interval,
    }
}

/// A `Direct3DCreate9` factory for the system runtime
pub fn factory() -> Direct3DCreate {
    Box::new(|| {
        let d3d9 = unsafe { Direct3DCreate9(D3D_SDK_VERSION) }.ok_or(D3dError::NotAvailable)?;
        tracing::info!("Created Direct3D9 object");
        Ok(Box::new(RuntimeDirect3D9 { d3d9 }) as Box<dyn Direct3D9>)
    })
}

pub struct RuntimeDirect3D9 {
    d3d9: IDirect3D9,
}

// The object is only touched with the process state lock held
unsafe impl Send for RuntimeDirect3D9 {}

impl Direct3D9 for RuntimeDirect3D9 {
    fn adapter_modes(&self, format: D3dFormat) -> Vec<DisplayModeInfo> {
        let format = d3d_format(format);
        let count = unsafe { self.d3d9.GetAdapterModeCount(D3DADAPTER_DEFAULT, format) };
        (0..count)
            .filter_map(|index| {
                let mut mode = D3DDISPLAYMODE::default();
                unsafe { self.d3d9.EnumAdapterModes(D3DADAPTER_DEFAULT, format, index, &mut mode) }.ok()?;
                Some(DisplayModeInfo {
                    width: mode.Width,
                    height: mode.Height,
                    refresh_rate: mode.RefreshRate,
                    format: D3dFormat::from_raw(mode.Format.0),
                })
            })
            .collect()
    }

    fn check_device_format(&self, adapter_format: D3dFormat, usage: Usage, format: D3dFormat) -> bool {
        let resource = if usage.contains(Usage::DEPTHSTENCIL) { D3DRTYPE_SURFACE } else { D3DRTYPE_TEXTURE };
        unsafe {
            self.d3d9.CheckDeviceFormat(
                D3DADAPTER_DEFAULT,
                D3DDEVTYPE_HAL,
                d3d_format(adapter_format),
                usage.bits(),
                resource,
                d3d_format(format),
            )
        }
        .is_ok()
    }

    fn device_caps(&self) -> D3dResult<DeviceCaps> {
        let mut caps = D3DCAPS9::default();
        check(unsafe { self.d3d9.GetDeviceCaps(D3DADAPTER_DEFAULT, D3DDEVTYPE_HAL, &mut caps) })?;
        let linear = PTFILTERCAPS_MINFLINEAR | PTFILTERCAPS_MAGFLINEAR;
        Ok(DeviceCaps {
            hardware_vertex_processing: caps.DevCaps & DEVCAPS_HWTRANSFORMANDLIGHT != 0,
            max_texture_width: caps.MaxTextureWidth,
            max_texture_height: caps.MaxTextureHeight,
            stretch_rect_filter: caps.StretchRectFilterCaps & linear == linear,
            non_pow2_textures: caps.TextureCaps & PTEXTURECAPS_POW2 == 0
                || caps.TextureCaps & PTEXTURECAPS_NONPOW2CONDITIONAL != 0,
            max_simultaneous_textures: caps.MaxSimultaneousTextures,
        })
    }

    fn adapter_identifier(&self) -> D3dResult<AdapterIdentifier> {
        let mut id = D3DADAPTER_IDENTIFIER9::default();
        check(unsafe { self.d3d9.GetAdapterIdentifier(D3DADAPTER_DEFAULT, 0, &mut id) })?;
        Ok(AdapterIdentifier {
            driver: c_string(&id.Driver),
            description: c_string(&id.Description),
            driver_version: id.DriverVersion as u64,
            vendor_id: id.VendorId,
            device_id: id.DeviceId,
            sub_sys_id: id.SubSysId,
            revision: id.Revision,
            device_identifier: id.DeviceIdentifier.to_u128(),
            whql_level: id.WHQLLevel,
            video_memory: None,
        })
    }

    fn multisample_quality_levels(&self, format: D3dFormat, windowed: bool, samples: u32) -> Option<u32> {
        let mut levels = 0u32;
        unsafe {
            self.d3d9.CheckDeviceMultiSampleType(
                D3DADAPTER_DEFAULT,
                D3DDEVTYPE_HAL,
                d3d_format(format),
                BOOL::from(windowed),
                D3DMULTISAMPLE_TYPE(samples as i32),
                &mut levels,
            )
        }
        .ok()?;
        Some(levels)
    }

    fn create_device(
        &self,
        focus_window: WindowHandle,
        behavior: BehaviorFlags,
        params: &mut PresentParameters,
    ) -> D3dResult<Box<dyn Device9>> {
        let mut native = present_parameters(params);
        let mut device = None;
        check(unsafe {
            self.d3d9.CreateDevice(
                D3DADAPTER_DEFAULT,
                D3DDEVTYPE_HAL,
                hwnd(focus_window),
                behavior.bits(),
                &mut native,
                &mut device,
            )
        })?;
        let device = device.ok_or(D3dError::NotAvailable)?;
        params.back_buffer_width = native.BackBufferWidth;
        params.back_buffer_height = native.BackBufferHeight;
        params.back_buffer_format = D3dFormat::from_raw(native.BackBufferFormat.0);
        Ok(Box::new(RuntimeDevice {
            device,
            params: *params,
            textures: HashMap::new(),
            next_id: 1,
            scratch: None,
        }))
    }
}

struct RuntimeTexture {
    texture: IDirect3DTexture9,
    desc: TextureDesc,
}

/// X8R8G8B8 texture an indexed texture is expanded into before drawing
struct Scratch {
    texture: IDirect3DTexture9,
    width: u32,
    height: u32,
}

pub struct RuntimeDevice {
    device: IDirect3DDevice9,
    params: PresentParameters,
    textures: HashMap<u32, RuntimeTexture>,
    next_id: u32,
    scratch: Option<Scratch>,
}

// Only used under the device mutex
unsafe impl Send for RuntimeDevice {}

#[repr(C)]
#[derive(Clone, Copy)]
struct QuadVertex {
    x: f32,
    y: f32,
    z: f32,
    rhw: f32,
    u: f32,
    v: f32,
}

impl QuadVertex {
    const FVF: u32 = D3DFVF_XYZRHW | D3DFVF_TEX1;
}

impl RuntimeDevice {
    fn texture(&self, id: TextureId) -> D3dResult<&RuntimeTexture> {
        self.textures.get(&id.0).ok_or(D3dError::InvalidCall)
    }

    fn scratch_texture(&mut self, width: u32, height: u32) -> D3dResult<IDirect3DTexture9> {
        if let Some(scratch) = self.scratch.as_ref().filter(|s| s.width == width && s.height == height) {
            return Ok(scratch.texture.clone());
        }
        self.scratch = None;
        let mut texture = None;
        check(unsafe {
            self.device.CreateTexture(
                width,
                height,
                1,
                D3DUSAGE_DYNAMIC as _,
                D3DFMT_X8R8G8B8,
                D3DPOOL_DEFAULT,
                &mut texture,
                ptr::null_mut(),
            )
        })?;
        let texture = texture.ok_or(D3dError::OutOfVideoMemory)?;
        self.scratch = Some(Scratch { texture: texture.clone(), width, height });
        Ok(texture)
    }

    /// Expand an 8-bit texture through `palette` into the scratch texture
    fn expand_palette(&mut self, id: TextureId, palette: &[u32; 256]) -> D3dResult<IDirect3DTexture9> {
        let source = self.texture(id)?;
        let (width, height) = (source.desc.width, source.desc.height);
        let source = source.texture.clone();
        let target = self.scratch_texture(width, height)?;
        unsafe {
            let mut src = D3DLOCKED_RECT::default();
            check(source.LockRect(0, &mut src, ptr::null(), D3DLOCK_READONLY as _))?;
            let mut dst = D3DLOCKED_RECT::default();
            if let Err(err) = check(target.LockRect(0, &mut dst, ptr::null(), D3DLOCK_DISCARD as _)) {
                let _ = source.UnlockRect(0);
                return Err(err);
            }
            for y in 0..height as usize {
                let src_row = (src.pBits as *const u8).add(y * src.Pitch as usize);
                let dst_row = (dst.pBits as *mut u32).byte_add(y * dst.Pitch as usize);
                for x in 0..width as usize {
                    *dst_row.add(x) = palette[*src_row.add(x) as usize];
                }
            }
            let _ = target.UnlockRect(0);
            let _ = source.UnlockRect(0);
        }
        Ok(target)
    }

    fn draw_quad(&self, texture: &IDirect3DTexture9) -> D3dResult<()> {
        let (w, h) = (self.params.back_buffer_width as f32, self.params.back_buffer_height as f32);
        let vertex = |x: f32, y: f32, u: f32, v: f32| QuadVertex { x: x - 0.5, y: y - 0.5, z: 0.0, rhw: 1.0, u, v };
        let quad = [vertex(0.0, 0.0, 0.0, 0.0), vertex(w, 0.0, 1.0, 0.0), vertex(0.0, h, 0.0, 1.0), vertex(w, h, 1.0, 1.0)];
        let device = &self.device;
        unsafe {
            check(device.BeginScene())?;
            let result = (|| -> windows::core::Result<()> {
                device.SetRenderState(D3DRS_LIGHTING, 0)?;
                device.SetRenderState(D3DRS_ZENABLE, 0)?;
                device.SetRenderState(D3DRS_ALPHABLENDENABLE, 0)?;
                device.SetRenderState(D3DRS_CULLMODE, D3DCULL_NONE.0 as _)?;
                device.SetTextureStageState(0, D3DTSS_COLOROP, D3DTOP_SELECTARG1.0 as _)?;
                device.SetTextureStageState(0, D3DTSS_COLORARG1, D3DTA_TEXTURE)?;
                device.SetSamplerState(0, D3DSAMP_MINFILTER, D3DTEXF_POINT.0 as _)?;
                device.SetSamplerState(0, D3DSAMP_MAGFILTER, D3DTEXF_POINT.0 as _)?;
                device.SetFVF(QuadVertex::FVF)?;
                device.SetTexture(0, texture)?;
                device.DrawPrimitiveUP(
                    D3DPT_TRIANGLESTRIP,
                    2,
                    quad.as_ptr() as *const c_void,
                    mem::size_of::<QuadVertex>() as u32,
                )
            })();
            let ended = device.EndScene();
            check(result)?;
            check(ended)
        }
    }
}

impl Device9 for RuntimeDevice {
    fn test_cooperative_level(&self) -> D3dResult<()> {
        check(unsafe { self.device.TestCooperativeLevel() })
    }

    fn reset(&mut self, params: &mut PresentParameters) -> D3dResult<()> {
        self.scratch = None;
        let mut native = present_parameters(params);
        check(unsafe { self.device.Reset(&mut native) })?;
        params.back_buffer_width = native.BackBufferWidth;
        params.back_buffer_height = native.BackBufferHeight;
        self.params = *params;
        Ok(())
    }

    fn present(&mut self) -> D3dResult<()> {
        check(unsafe { self.device.Present(ptr::null(), ptr::null(), HWND::default(), ptr::null()) })
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> D3dResult<TextureId> {
        let pool = match desc.pool {
            Pool::Default => D3DPOOL_DEFAULT,
            Pool::Managed => D3DPOOL_MANAGED,
            Pool::SystemMem => D3DPOOL_SYSTEMMEM,
        };
        let mut texture = None;
        check(unsafe {
            self.device.CreateTexture(
                desc.width,
                desc.height,
                1,
                desc.usage.bits(),
                d3d_format(desc.format),
                pool,
                &mut texture,
                ptr::null_mut(),
            )
        })?;
        let texture = texture.ok_or(D3dError::OutOfVideoMemory)?;
        let id = self.next_id;
        self.next_id += 1;
        self.textures.insert(id, RuntimeTexture { texture, desc: *desc });
        Ok(TextureId(id))
    }

    fn release_texture(&mut self, id: TextureId) {
        self.textures.remove(&id.0);
    }

    fn lock_texture(&mut self, id: TextureId, flags: TextureLockFlags) -> D3dResult<LockedRect> {
        let texture = self.texture(id)?;
        let mut locked = D3DLOCKED_RECT::default();
        check(unsafe { texture.texture.LockRect(0, &mut locked, ptr::null(), flags.bits()) })?;
        Ok(LockedRect { bits: locked.pBits as *mut u8, pitch: locked.Pitch.max(0) as u32 })
    }

    fn unlock_texture(&mut self, id: TextureId) -> D3dResult<()> {
        check(unsafe { self.texture(id)?.texture.UnlockRect(0) })
    }

    fn stretch_rect(
        &mut self,
        src: TextureId,
        src_rect: &Rect,
        dst: TextureId,
        dst_rect: &Rect,
        filter: TextureFilter,
    ) -> D3dResult<()> {
        let filter = match filter {
            TextureFilter::Point => D3DTEXF_POINT,
            TextureFilter::Linear => D3DTEXF_LINEAR,
        };
        let (source, target) = (self.texture(src)?, self.texture(dst)?);
        unsafe {
            let source = source.texture.GetSurfaceLevel(0).map_err(|err| D3dError::from_hresult(err.code().0))?;
            let target = target.texture.GetSurfaceLevel(0).map_err(|err| D3dError::from_hresult(err.code().0))?;
            let (s, d) = (rect(src_rect), rect(dst_rect));
            check(self.device.StretchRect(&source, &s, &target, &d, filter))
        }
    }

    fn draw_texture(&mut self, id: TextureId, palette: Option<&[u32; 256]>) -> D3dResult<()> {
        let texture = match palette {
            Some(palette) => self.expand_palette(id, palette)?,
            None => self.texture(id)?.texture.clone(),
        };
        self.draw_quad(&texture)
    }

    fn raster_status(&self) -> D3dResult<RasterStatus> {
        let mut status = D3DRASTER_STATUS::default();
        check(unsafe { self.device.GetRasterStatus(0, &mut status) })?;
        Ok(RasterStatus { in_vblank: status.InVBlank.as_bool(), scan_line: status.ScanLine })
    }

    fn display_mode(&self) -> D3dResult<DisplayModeInfo> {
        let mut mode = D3DDISPLAYMODE::default();
        check(unsafe { self.device.GetDisplayMode(0, &mut mode) })?;
        Ok(DisplayModeInfo {
            width: mode.Width,
            height: mode.Height,
            refresh_rate: mode.RefreshRate,
            format: D3dFormat::from_raw(mode.Format.0),
        })
    }

    fn available_texture_mem(&self) -> u32 {
        unsafe { self.device.GetAvailableTextureMem() }
    }

    fn evict_managed_resources(&mut self) -> D3dResult<()> {
        check(unsafe { self.device.EvictManagedResources() })
    }
}
