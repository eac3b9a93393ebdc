//! Direct3D9 seam
//!
//! The core never talks to Direct3D9 directly. It goes through `Direct3D9`
//! (the `IDirect3D9` object) and `Device9` (the `IDirect3DDevice9`), which lets
//! the same surface and device logic run on the real runtime or on the software
//! backend used by the tests.
//!
//! GPU textures are addressed by `TextureId`. The ids index an arena owned by
//! the device, so swapping two ids between surfaces swaps the resources
//! without touching any pixels.

use bitflags::bitflags;
use thiserror::Error;

use crate::format::D3dFormat;
use crate::types::{Rect, WindowHandle};

pub mod software;

#[cfg(windows)]
pub mod d3d9;

pub const D3DERR_DRIVERINTERNALERROR: i32 = 0x8876_0827_u32 as i32;
pub const D3DERR_NOTAVAILABLE: i32 = 0x8876_086A_u32 as i32;
pub const D3DERR_OUTOFVIDEOMEMORY: i32 = 0x8876_017C_u32 as i32;
pub const D3DERR_DEVICELOST: i32 = 0x8876_0868_u32 as i32;
pub const D3DERR_DEVICENOTRESET: i32 = 0x8876_0869_u32 as i32;
pub const D3DERR_INVALIDCALL: i32 = 0x8876_086C_u32 as i32;
pub const D3DERR_DEVICEREMOVED: i32 = 0x8876_0870_u32 as i32;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum D3dError {
    #[error("device lost")]
    DeviceLost,

    #[error("device lost but can be reset")]
    DeviceNotReset,

    #[error("driver internal error")]
    DriverInternalError,

    #[error("device removed")]
    DeviceRemoved,

    #[error("invalid call")]
    InvalidCall,

    #[error("not available")]
    NotAvailable,

    #[error("out of video memory")]
    OutOfVideoMemory,

    #[error("HRESULT {0:#010x}")]
    Other(i32),
}

pub type D3dResult<T> = std::result::Result<T, D3dError>;

impl D3dError {
    pub fn from_hresult(hr: i32) -> D3dError {
        match hr {
            D3DERR_DEVICELOST => D3dError::DeviceLost,
            D3DERR_DEVICENOTRESET => D3dError::DeviceNotReset,
            D3DERR_DRIVERINTERNALERROR => D3dError::DriverInternalError,
            D3DERR_DEVICEREMOVED => D3dError::DeviceRemoved,
            D3DERR_INVALIDCALL => D3dError::InvalidCall,
            D3DERR_NOTAVAILABLE => D3dError::NotAvailable,
            D3DERR_OUTOFVIDEOMEMORY => D3dError::OutOfVideoMemory,
            other => D3dError::Other(other),
        }
    }
}

/// Handle of a texture in the device's arena
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

bitflags! {
    /// `D3DCREATE_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BehaviorFlags: u32 {
        const FPU_PRESERVE = 0x0000_0002;
        const MULTITHREADED = 0x0000_0004;
        const PUREDEVICE = 0x0000_0010;
        const SOFTWARE_VERTEXPROCESSING = 0x0000_0020;
        const HARDWARE_VERTEXPROCESSING = 0x0000_0040;
        const MIXED_VERTEXPROCESSING = 0x0000_0080;
        const DISABLE_DRIVER_MANAGEMENT = 0x0000_0100;
        const NOWINDOWCHANGES = 0x0000_0800;
    }

    /// `D3DUSAGE_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Usage: u32 {
        const RENDERTARGET = 0x0000_0001;
        const DEPTHSTENCIL = 0x0000_0002;
        const DYNAMIC = 0x0000_0200;
        const AUTOGENMIPMAP = 0x0000_0400;
    }

    /// `D3DLOCK_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextureLockFlags: u32 {
        const READONLY = 0x0000_0010;
        const DISCARD = 0x0000_2000;
        const NOOVERWRITE = 0x0000_1000;
        const NOSYSLOCK = 0x0000_0800;
        const DONOTWAIT = 0x0000_4000;
    }
}

/// `D3DPOOL`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Pool {
    #[default]
    Default,
    Managed,
    SystemMem,
}

/// `D3DSWAPEFFECT`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum SwapEffect {
    #[default]
    Discard,
    Flip,
    Copy,
}

/// `D3DTEXTUREFILTERTYPE` subset used by StretchRect
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum TextureFilter {
    #[default]
    Point,
    Linear,
}

/// `D3DPRESENT_INTERVAL_IMMEDIATE`
pub const PRESENT_INTERVAL_IMMEDIATE: u32 = 0x8000_0000;
/// `D3DPRESENT_INTERVAL_ONE`
pub const PRESENT_INTERVAL_ONE: u32 = 0x0000_0001;

/// `D3DPRESENT_PARAMETERS`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PresentParameters {
    pub back_buffer_width: u32,
    pub back_buffer_height: u32,
    pub back_buffer_format: D3dFormat,
    pub back_buffer_count: u32,
    pub multisample_type: u32,
    pub multisample_quality: u32,
    pub swap_effect: SwapEffect,
    pub device_window: WindowHandle,
    pub windowed: bool,
    pub enable_auto_depth_stencil: bool,
    pub auto_depth_stencil_format: D3dFormat,
    pub refresh_rate: u32,
    pub presentation_interval: u32,
}

/// `D3DDISPLAYMODE`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct DisplayModeInfo {
    pub width: u32,
    pub height: u32,
    pub refresh_rate: u32,
    pub format: D3dFormat,
}

/// `D3DRASTER_STATUS`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RasterStatus {
    pub in_vblank: bool,
    pub scan_line: u32,
}

/// The parts of `D3DCAPS9` the shim translates into DirectDraw caps
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceCaps {
    pub hardware_vertex_processing: bool,
    pub max_texture_width: u32,
    pub max_texture_height: u32,
    pub stretch_rect_filter: bool,
    pub non_pow2_textures: bool,
    pub max_simultaneous_textures: u32,
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self {
            hardware_vertex_processing: true,
            max_texture_width: 8192,
            max_texture_height: 8192,
            stretch_rect_filter: true,
            non_pow2_textures: true,
            max_simultaneous_textures: 8,
        }
    }
}

/// `D3DADAPTER_IDENTIFIER9`
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct AdapterIdentifier {
    pub driver: String,
    pub description: String,
    pub driver_version: u64,
    pub vendor_id: u32,
    pub device_id: u32,
    pub sub_sys_id: u32,
    pub revision: u32,
    pub device_identifier: u128,
    pub whql_level: u32,
    /// Dedicated video memory in bytes when the backend can tell
    pub video_memory: Option<u64>,
}

/// Description of a texture to create
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: D3dFormat,
    pub usage: Usage,
    pub pool: Pool,
}

/// Result of locking a texture's top level
///
/// `bits` stays valid until the matching `unlock_texture` call or the texture
/// is released, whichever comes first.
#[derive(Clone, Copy, Debug)]
pub struct LockedRect {
    pub bits: *mut u8,
    pub pitch: u32,
}

/// `IDirect3D9`
pub trait Direct3D9: Send {
    fn adapter_modes(&self, format: D3dFormat) -> Vec<DisplayModeInfo>;

    fn check_device_format(&self, adapter_format: D3dFormat, usage: Usage, format: D3dFormat) -> bool;

    fn device_caps(&self) -> D3dResult<DeviceCaps>;

    fn adapter_identifier(&self) -> D3dResult<AdapterIdentifier>;

    /// Number of quality levels for `samples`, or `None` if unsupported
    fn multisample_quality_levels(&self, format: D3dFormat, windowed: bool, samples: u32) -> Option<u32>;

    fn create_device(
        &self,
        focus_window: WindowHandle,
        behavior: BehaviorFlags,
        params: &mut PresentParameters,
    ) -> D3dResult<Box<dyn Device9>>;
}

/// `IDirect3DDevice9`, reduced to what surfaces and the present path need
pub trait Device9: Send {
    fn test_cooperative_level(&self) -> D3dResult<()>;

    fn reset(&mut self, params: &mut PresentParameters) -> D3dResult<()>;

    fn present(&mut self) -> D3dResult<()>;

    fn create_texture(&mut self, desc: &TextureDesc) -> D3dResult<TextureId>;

    fn release_texture(&mut self, id: TextureId);

    fn lock_texture(&mut self, id: TextureId, flags: TextureLockFlags) -> D3dResult<LockedRect>;

    fn unlock_texture(&mut self, id: TextureId) -> D3dResult<()>;

    fn stretch_rect(
        &mut self,
        src: TextureId,
        src_rect: &Rect,
        dst: TextureId,
        dst_rect: &Rect,
        filter: TextureFilter,
    ) -> D3dResult<()>;

    /// Draw a texture over the whole back buffer
    ///
    /// `palette` is set for indexed textures and maps each texel to X8R8G8B8.
    fn draw_texture(&mut self, id: TextureId, palette: Option<&[u32; 256]>) -> D3dResult<()>;

    fn raster_status(&self) -> D3dResult<RasterStatus>;

    fn display_mode(&self) -> D3dResult<DisplayModeInfo>;

    fn available_texture_mem(&self) -> u32;

    fn evict_managed_resources(&mut self) -> D3dResult<()>;
}

/// Factory standing in for `Direct3DCreate9`
pub type Direct3DCreate = Box<dyn Fn() -> D3dResult<Box<dyn Direct3D9>> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hresults_map_to_device_errors() {
        assert_eq!(D3dError::from_hresult(D3DERR_DEVICELOST), D3dError::DeviceLost);
        assert_eq!(D3dError::from_hresult(D3DERR_DEVICENOTRESET), D3dError::DeviceNotReset);
        assert_eq!(D3dError::from_hresult(D3DERR_INVALIDCALL), D3dError::InvalidCall);
        assert_eq!(D3dError::from_hresult(-1), D3dError::Other(-1));
    }
}
