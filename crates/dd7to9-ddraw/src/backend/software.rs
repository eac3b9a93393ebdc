//! Software Direct3D9
//!
//! Textures live in heap memory, presents convert the drawn texture into an
//! X8R8G8B8 frame. Used off Windows and by the tests, which also use the
//! counters and the fault switches to drive device loss.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::{
    AdapterIdentifier, BehaviorFlags, D3dError, D3dResult, Device9, DeviceCaps, Direct3D9,
    Direct3DCreate, DisplayModeInfo, LockedRect, PresentParameters, RasterStatus, TextureDesc,
    TextureFilter, TextureId, TextureLockFlags, Usage,
};
use crate::format::D3dFormat;
use crate::types::{Rect, WindowHandle};

const VIDEO_MEMORY: u64 = 256 * 1024 * 1024;
const VBLANK_LINES: u32 = 45;

/// Counters shared by every object of one software backend
#[derive(Debug, Default)]
pub struct SoftwareStats {
    pub devices_created: AtomicU32,
    pub resets: AtomicU32,
    pub presents: AtomicU32,
    pub draws: AtomicU32,
    /// Texture to texture pixel copies done by the device
    pub copies: AtomicU64,
    pub live_textures: AtomicU32,
    last_params: Mutex<Option<PresentParameters>>,
    last_behavior: Mutex<BehaviorFlags>,
    front_buffer: Mutex<Vec<u32>>,
}

impl SoftwareStats {
    pub fn last_params(&self) -> Option<PresentParameters> {
        *lock(&self.last_params)
    }

    pub fn last_behavior(&self) -> BehaviorFlags {
        *lock(&self.last_behavior)
    }

    /// What the last present put on screen, X8R8G8B8, row major
    pub fn front_buffer(&self) -> Vec<u32> {
        lock(&self.front_buffer).clone()
    }
}

/// Switches the tests flip to simulate driver trouble
#[derive(Debug, Default)]
pub struct FaultSwitches {
    status: Mutex<Option<D3dError>>,
    pub fail_device_creation: AtomicBool,
    pub fail_next_reset: AtomicBool,
}

impl FaultSwitches {
    /// Report `DeviceLost` until `make_resettable` is called
    pub fn lose_device(&self) {
        *lock(&self.status) = Some(D3dError::DeviceLost);
    }

    /// Report `DeviceNotReset` until the next successful reset
    pub fn make_resettable(&self) {
        *lock(&self.status) = Some(D3dError::DeviceNotReset);
    }

    pub fn set_status(&self, status: Option<D3dError>) {
        *lock(&self.status) = status;
    }

    fn status(&self) -> Option<D3dError> {
        *lock(&self.status)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle for building software `Direct3D9` objects sharing counters
#[derive(Clone)]
pub struct SoftwareBackend {
    pub stats: Arc<SoftwareStats>,
    pub faults: Arc<FaultSwitches>,
    modes: Arc<Vec<DisplayModeInfo>>,
    pitch_alignment: u32,
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareBackend {
    pub fn new() -> Self {
        let mut modes = Vec::new();
        for (width, height) in [(640, 480), (800, 600), (1024, 768), (1280, 720), (1280, 1024), (1920, 1080)] {
            for refresh_rate in [60, 75] {
                modes.push(DisplayModeInfo { width, height, refresh_rate, format: D3dFormat::X8R8G8B8 });
            }
        }
        Self {
            stats: Arc::new(SoftwareStats::default()),
            faults: Arc::new(FaultSwitches::default()),
            modes: Arc::new(modes),
            pitch_alignment: 4,
        }
    }

    /// Row pitch alignment of created textures (power of two)
    pub fn with_pitch_alignment(mut self, alignment: u32) -> Self {
        self.pitch_alignment = alignment.max(1).next_power_of_two();
        self
    }

    pub fn with_modes(mut self, modes: Vec<DisplayModeInfo>) -> Self {
        self.modes = Arc::new(modes);
        self
    }

    pub fn create(&self) -> SoftwareDirect3D9 {
        SoftwareDirect3D9 { backend: self.clone() }
    }

    /// A `Direct3DCreate9` stand-in producing objects of this backend
    pub fn factory(&self) -> Direct3DCreate {
        let backend = self.clone();
        Box::new(move || Ok(Box::new(backend.create()) as Box<dyn Direct3D9>))
    }
}

pub struct SoftwareDirect3D9 {
    backend: SoftwareBackend,
}

impl Direct3D9 for SoftwareDirect3D9 {
    fn adapter_modes(&self, format: D3dFormat) -> Vec<DisplayModeInfo> {
        self.backend.modes.iter().filter(|m| m.format == format).copied().collect()
    }

    fn check_device_format(&self, _adapter_format: D3dFormat, usage: Usage, format: D3dFormat) -> bool {
        use D3dFormat::*;
        if usage.contains(Usage::DEPTHSTENCIL) {
            return format.is_depth();
        }
        matches!(
            format,
            A8R8G8B8 | X8R8G8B8 | R5G6B5 | X1R5G5B5 | A1R5G5B5 | A4R4G4B4 | X4R4G4B4 | L8 | A8L8
                | A8 | Dxt1 | Dxt3 | Dxt5 | Yuy2 | Uyvy
        )
    }

    fn device_caps(&self) -> D3dResult<DeviceCaps> {
        Ok(DeviceCaps::default())
    }

    fn adapter_identifier(&self) -> D3dResult<AdapterIdentifier> {
        Ok(AdapterIdentifier {
            driver: "dd7to9 software".to_string(),
            description: "Software Direct3D9 device".to_string(),
            driver_version: 0x0006_0014_0001_0000,
            vendor_id: 0x1414,
            device_id: 0x008C,
            device_identifier: 0x0D0D_7709_0000_0000_0000_0000_0000_0001,
            whql_level: 1,
            video_memory: Some(VIDEO_MEMORY),
            ..Default::default()
        })
    }

    fn multisample_quality_levels(&self, _format: D3dFormat, _windowed: bool, samples: u32) -> Option<u32> {
        (samples <= 4).then_some(1)
    }

    fn create_device(
        &self,
        _focus_window: WindowHandle,
        behavior: BehaviorFlags,
        params: &mut PresentParameters,
    ) -> D3dResult<Box<dyn Device9>> {
        if self.backend.faults.fail_device_creation.load(Ordering::SeqCst) {
            return Err(D3dError::NotAvailable);
        }
        let stats = &self.backend.stats;
        stats.devices_created.fetch_add(1, Ordering::SeqCst);
        *lock(&stats.last_params) = Some(*params);
        *lock(&stats.last_behavior) = behavior;

        Ok(Box::new(SoftwareDevice {
            backend: self.backend.clone(),
            params: *params,
            textures: HashMap::new(),
            next_id: 1,
            back_buffer: vec![0; (params.back_buffer_width * params.back_buffer_height) as usize],
            created: Instant::now(),
        }))
    }
}

struct SoftTexture {
    desc: TextureDesc,
    pitch: u32,
    bits: Box<[u8]>,
    locked: bool,
}

impl SoftTexture {
    fn bytes_per_pixel(&self) -> usize {
        (self.desc.format.bits_per_pixel() / 8).max(1) as usize
    }
}

pub struct SoftwareDevice {
    backend: SoftwareBackend,
    params: PresentParameters,
    textures: HashMap<u32, SoftTexture>,
    next_id: u32,
    back_buffer: Vec<u32>,
    created: Instant,
}

impl SoftwareDevice {
    fn stats(&self) -> &SoftwareStats {
        &self.backend.stats
    }

    fn texture(&self, id: TextureId) -> D3dResult<&SoftTexture> {
        self.textures.get(&id.0).ok_or(D3dError::InvalidCall)
    }

    fn read_texel(texture: &SoftTexture, x: u32, y: u32, palette: Option<&[u32; 256]>) -> u32 {
        let bpp = texture.bytes_per_pixel();
        let offset = y as usize * texture.pitch as usize + x as usize * bpp;
        let px = &texture.bits[offset..offset + bpp];
        match texture.desc.format {
            D3dFormat::L8 | D3dFormat::P8 => match palette {
                Some(table) => table[px[0] as usize],
                None => {
                    let l = px[0] as u32;
                    l << 16 | l << 8 | l
                }
            },
            D3dFormat::R5G6B5 => {
                let v = u16::from_le_bytes([px[0], px[1]]) as u32;
                let r = (v >> 11) & 0x1F;
                let g = (v >> 5) & 0x3F;
                let b = v & 0x1F;
                (r << 3 | r >> 2) << 16 | (g << 2 | g >> 4) << 8 | (b << 3 | b >> 2)
            }
            D3dFormat::X1R5G5B5 | D3dFormat::A1R5G5B5 => {
                let v = u16::from_le_bytes([px[0], px[1]]) as u32;
                let r = (v >> 10) & 0x1F;
                let g = (v >> 5) & 0x1F;
                let b = v & 0x1F;
                (r << 3 | r >> 2) << 16 | (g << 3 | g >> 2) << 8 | (b << 3 | b >> 2)
            }
            D3dFormat::X8R8G8B8 | D3dFormat::A8R8G8B8 => {
                u32::from_le_bytes([px[0], px[1], px[2], px[3]]) & 0x00FF_FFFF
            }
            _ => 0,
        }
    }
}

impl Device9 for SoftwareDevice {
    fn test_cooperative_level(&self) -> D3dResult<()> {
        match self.backend.faults.status() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn reset(&mut self, params: &mut PresentParameters) -> D3dResult<()> {
        if self.backend.faults.fail_next_reset.swap(false, Ordering::SeqCst) {
            return Err(D3dError::DriverInternalError);
        }
        if self.backend.faults.status() == Some(D3dError::DeviceLost) {
            return Err(D3dError::DeviceLost);
        }
        // Default pool resources must be gone before a reset
        if self.textures.values().any(|t| t.desc.pool == super::Pool::Default) {
            return Err(D3dError::InvalidCall);
        }
        self.backend.faults.set_status(None);
        self.params = *params;
        self.back_buffer = vec![0; (params.back_buffer_width * params.back_buffer_height) as usize];
        self.stats().resets.fetch_add(1, Ordering::SeqCst);
        *lock(&self.stats().last_params) = Some(*params);
        Ok(())
    }

    fn present(&mut self) -> D3dResult<()> {
        match self.backend.faults.status() {
            Some(D3dError::DeviceNotReset) | Some(D3dError::DeviceLost) => return Err(D3dError::DeviceLost),
            Some(err) => return Err(err),
            None => {}
        }
        *lock(&self.stats().front_buffer) = self.back_buffer.clone();
        self.stats().presents.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> D3dResult<TextureId> {
        if desc.width == 0 || desc.height == 0 || desc.format == D3dFormat::Unknown {
            return Err(D3dError::InvalidCall);
        }
        let bytes_per_pixel = (desc.format.bits_per_pixel() / 8).max(1);
        let align = self.backend.pitch_alignment;
        let pitch = (desc.width * bytes_per_pixel + align - 1) & !(align - 1);
        let id = self.next_id;
        self.next_id += 1;
        self.textures.insert(
            id,
            SoftTexture {
                desc: *desc,
                pitch,
                bits: vec![0u8; (pitch * desc.height) as usize].into_boxed_slice(),
                locked: false,
            },
        );
        self.stats().live_textures.fetch_add(1, Ordering::SeqCst);
        Ok(TextureId(id))
    }

    fn release_texture(&mut self, id: TextureId) {
        if self.textures.remove(&id.0).is_some() {
            self.stats().live_textures.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn lock_texture(&mut self, id: TextureId, _flags: TextureLockFlags) -> D3dResult<LockedRect> {
        let texture = self.textures.get_mut(&id.0).ok_or(D3dError::InvalidCall)?;
        if texture.locked {
            return Err(D3dError::InvalidCall);
        }
        texture.locked = true;
        Ok(LockedRect { bits: texture.bits.as_mut_ptr(), pitch: texture.pitch })
    }

    fn unlock_texture(&mut self, id: TextureId) -> D3dResult<()> {
        let texture = self.textures.get_mut(&id.0).ok_or(D3dError::InvalidCall)?;
        if !texture.locked {
            return Err(D3dError::InvalidCall);
        }
        texture.locked = false;
        Ok(())
    }

    fn stretch_rect(
        &mut self,
        src: TextureId,
        src_rect: &Rect,
        dst: TextureId,
        dst_rect: &Rect,
        _filter: TextureFilter,
    ) -> D3dResult<()> {
        if src == dst {
            return Err(D3dError::InvalidCall);
        }
        let source = self.texture(src)?;
        let target = self.texture(dst)?;
        if source.locked
            || target.locked
            || source.desc.format != target.desc.format
            || !src_rect.fits_within(source.desc.width, source.desc.height)
            || !dst_rect.fits_within(target.desc.width, target.desc.height)
        {
            return Err(D3dError::InvalidCall);
        }

        let bpp = source.bytes_per_pixel();
        let src_pitch = source.pitch as usize;
        let (sw, sh) = (src_rect.width() as usize, src_rect.height() as usize);
        let (dw, dh) = (dst_rect.width() as usize, dst_rect.height() as usize);
        let mut rows = Vec::with_capacity(dw * dh * bpp);
        for y in 0..dh {
            let sy = src_rect.top as usize + y * sh / dh;
            for x in 0..dw {
                let sx = src_rect.left as usize + x * sw / dw;
                let offset = sy * src_pitch + sx * bpp;
                rows.extend_from_slice(&source.bits[offset..offset + bpp]);
            }
        }

        let target = self.textures.get_mut(&dst.0).ok_or(D3dError::InvalidCall)?;
        let dst_pitch = target.pitch as usize;
        for (y, row) in rows.chunks(dw * bpp).enumerate() {
            let offset = (dst_rect.top as usize + y) * dst_pitch + dst_rect.left as usize * bpp;
            target.bits[offset..offset + row.len()].copy_from_slice(row);
        }
        self.stats().copies.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn draw_texture(&mut self, id: TextureId, palette: Option<&[u32; 256]>) -> D3dResult<()> {
        let texture = self.texture(id)?;
        let (bw, bh) = (self.params.back_buffer_width, self.params.back_buffer_height);
        let (tw, th) = (texture.desc.width, texture.desc.height);
        let mut frame = vec![0u32; (bw * bh) as usize];
        for y in 0..bh {
            let ty = y * th / bh.max(1);
            for x in 0..bw {
                let tx = x * tw / bw.max(1);
                frame[(y * bw + x) as usize] = Self::read_texel(texture, tx, ty, palette);
            }
        }
        self.back_buffer = frame;
        self.stats().draws.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn raster_status(&self) -> D3dResult<RasterStatus> {
        let refresh = if self.params.refresh_rate != 0 { self.params.refresh_rate } else { 60 };
        let height = self.params.back_buffer_height.max(1);
        let total_lines = height + VBLANK_LINES;
        let frame_ns = 1_000_000_000u128 / refresh as u128;
        let phase = self.created.elapsed().as_nanos() % frame_ns;
        let line = (phase * total_lines as u128 / frame_ns) as u32;
        Ok(RasterStatus { in_vblank: line >= height, scan_line: line.min(height - 1) })
    }

    fn display_mode(&self) -> D3dResult<DisplayModeInfo> {
        Ok(DisplayModeInfo {
            width: self.params.back_buffer_width,
            height: self.params.back_buffer_height,
            refresh_rate: if self.params.refresh_rate != 0 { self.params.refresh_rate } else { 60 },
            format: D3dFormat::X8R8G8B8,
        })
    }

    fn available_texture_mem(&self) -> u32 {
        let used: u64 = self.textures.values().map(|t| t.bits.len() as u64).sum();
        VIDEO_MEMORY.saturating_sub(used).min(u32::MAX as u64) as u32
    }

    fn evict_managed_resources(&mut self) -> D3dResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Pool;

    fn device(backend: &SoftwareBackend) -> Box<dyn Device9> {
        let mut params = PresentParameters {
            back_buffer_width: 4,
            back_buffer_height: 2,
            back_buffer_format: D3dFormat::X8R8G8B8,
            back_buffer_count: 1,
            ..Default::default()
        };
        backend.create().create_device(WindowHandle(1), BehaviorFlags::MULTITHREADED, &mut params).unwrap()
    }

    fn texture(width: u32, height: u32, format: D3dFormat) -> TextureDesc {
        TextureDesc { width, height, format, usage: Usage::DYNAMIC, pool: Pool::SystemMem }
    }

    #[test]
    fn textures_honor_pitch_alignment() {
        let backend = SoftwareBackend::new().with_pitch_alignment(64);
        let mut dev = device(&backend);
        let id = dev.create_texture(&texture(10, 10, D3dFormat::R5G6B5)).unwrap();
        let locked = dev.lock_texture(id, TextureLockFlags::empty()).unwrap();
        assert_eq!(locked.pitch, 64);
        assert!(dev.lock_texture(id, TextureLockFlags::empty()).is_err());
        dev.unlock_texture(id).unwrap();
    }

    #[test]
    fn stretch_rect_counts_copies() {
        let backend = SoftwareBackend::new();
        let mut dev = device(&backend);
        let a = dev.create_texture(&texture(4, 4, D3dFormat::X8R8G8B8)).unwrap();
        let b = dev.create_texture(&texture(8, 8, D3dFormat::X8R8G8B8)).unwrap();
        dev.stretch_rect(a, &Rect::from_size(4, 4), b, &Rect::from_size(8, 8), TextureFilter::Point).unwrap();
        assert_eq!(backend.stats.copies.load(Ordering::SeqCst), 1);
        assert!(dev.stretch_rect(a, &Rect::from_size(5, 4), b, &Rect::from_size(8, 8), TextureFilter::Point).is_err());
    }

    #[test]
    fn present_reflects_drawn_palette_texture() {
        let backend = SoftwareBackend::new();
        let mut dev = device(&backend);
        let id = dev.create_texture(&texture(4, 2, D3dFormat::L8)).unwrap();
        let locked = dev.lock_texture(id, TextureLockFlags::empty()).unwrap();
        unsafe { *locked.bits = 3 };
        dev.unlock_texture(id).unwrap();

        let mut palette = [0u32; 256];
        palette[3] = 0x00FF_0000;
        dev.draw_texture(id, Some(&palette)).unwrap();
        dev.present().unwrap();
        assert_eq!(backend.stats.front_buffer()[0], 0x00FF_0000);
        assert_eq!(backend.stats.front_buffer()[1], 0);
    }

    #[test]
    fn fault_switches_drive_device_status() {
        let backend = SoftwareBackend::new();
        let mut dev = device(&backend);
        backend.faults.make_resettable();
        assert_eq!(dev.test_cooperative_level(), Err(D3dError::DeviceNotReset));
        assert_eq!(dev.present(), Err(D3dError::DeviceLost));

        let mut params = backend.stats.last_params().unwrap();
        dev.reset(&mut params).unwrap();
        assert_eq!(dev.test_cooperative_level(), Ok(()));

        backend.faults.lose_device();
        assert_eq!(dev.reset(&mut params), Err(D3dError::DeviceLost));
    }

    #[test]
    fn reset_refuses_live_default_pool_textures() {
        let backend = SoftwareBackend::new();
        let mut dev = device(&backend);
        let desc = TextureDesc { pool: Pool::Default, ..texture(2, 2, D3dFormat::X8R8G8B8) };
        let id = dev.create_texture(&desc).unwrap();
        let mut params = backend.stats.last_params().unwrap();
        assert_eq!(dev.reset(&mut params), Err(D3dError::InvalidCall));
        dev.release_texture(id);
        dev.reset(&mut params).unwrap();
        assert_eq!(backend.stats.live_textures.load(Ordering::SeqCst), 0);
    }
}
