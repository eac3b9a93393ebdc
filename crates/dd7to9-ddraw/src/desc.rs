//! DirectDraw flags and description structures
//!
//! Both structure generations are modeled. The `size` field at the head of each
//! structure is the version discriminant the application fills in; adapters
//! check it and convert the legacy layout into the current one before calling
//! into the core.

use bitflags::bitflags;

use crate::types::ColorKey;

/// `sizeof(DDSURFACEDESC)`
pub const SURFACE_DESC_SIZE: u32 = 108;
/// `sizeof(DDSURFACEDESC2)`
pub const SURFACE_DESC2_SIZE: u32 = 124;
/// `sizeof(DDPIXELFORMAT)`
pub const PIXEL_FORMAT_SIZE: u32 = 32;

bitflags! {
    /// `DDSD_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DescFlags: u32 {
        const CAPS = 0x0000_0001;
        const HEIGHT = 0x0000_0002;
        const WIDTH = 0x0000_0004;
        const PITCH = 0x0000_0008;
        const BACKBUFFERCOUNT = 0x0000_0020;
        const ZBUFFERBITDEPTH = 0x0000_0040;
        const ALPHABITDEPTH = 0x0000_0080;
        const LPSURFACE = 0x0000_0800;
        const PIXELFORMAT = 0x0000_1000;
        const CKDESTOVERLAY = 0x0000_2000;
        const CKDESTBLT = 0x0000_4000;
        const CKSRCOVERLAY = 0x0000_8000;
        const CKSRCBLT = 0x0001_0000;
        const MIPMAPCOUNT = 0x0002_0000;
        const REFRESHRATE = 0x0004_0000;
        const LINEARSIZE = 0x0008_0000;
        const TEXTURESTAGE = 0x0010_0000;
        const FVF = 0x0020_0000;
        const SRCVBHANDLE = 0x0040_0000;
        const DEPTH = 0x0080_0000;
    }

    /// `DDSCAPS_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Caps: u32 {
        const ALPHA = 0x0000_0002;
        const BACKBUFFER = 0x0000_0004;
        const COMPLEX = 0x0000_0008;
        const FLIP = 0x0000_0010;
        const FRONTBUFFER = 0x0000_0020;
        const OFFSCREENPLAIN = 0x0000_0040;
        const OVERLAY = 0x0000_0080;
        const PALETTE = 0x0000_0100;
        const PRIMARYSURFACE = 0x0000_0200;
        const SYSTEMMEMORY = 0x0000_0800;
        const TEXTURE = 0x0000_1000;
        const THREE_D_DEVICE = 0x0000_2000;
        const VIDEOMEMORY = 0x0000_4000;
        const VISIBLE = 0x0000_8000;
        const WRITEONLY = 0x0001_0000;
        const ZBUFFER = 0x0002_0000;
        const OWNDC = 0x0004_0000;
        const LIVEVIDEO = 0x0008_0000;
        const HWCODEC = 0x0010_0000;
        const MODEX = 0x0020_0000;
        const MIPMAP = 0x0040_0000;
        const ALLOCONLOAD = 0x0400_0000;
        const VIDEOPORT = 0x0800_0000;
        const LOCALVIDMEM = 0x1000_0000;
        const NONLOCALVIDMEM = 0x2000_0000;
        const STANDARDVGAMODE = 0x4000_0000;
        const OPTIMIZED = 0x8000_0000;
    }

    /// `DDSCAPS2_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Caps2: u32 {
        const HINTDYNAMIC = 0x0000_0004;
        const HINTSTATIC = 0x0000_0008;
        const TEXTUREMANAGE = 0x0000_0010;
        const OPAQUE = 0x0000_0080;
        const HINTANTIALIASING = 0x0000_0100;
        const CUBEMAP = 0x0000_0200;
        const MIPMAPSUBLEVEL = 0x0001_0000;
        const D3DTEXTUREMANAGE = 0x0002_0000;
        const DONOTPERSIST = 0x0004_0000;
        const STEREOSURFACELEFT = 0x0008_0000;
        const VOLUME = 0x0020_0000;
        const NOTUSERLOCKABLE = 0x0040_0000;
    }

    /// `DDPF_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PixelFlags: u32 {
        const ALPHAPIXELS = 0x0000_0001;
        const ALPHA = 0x0000_0002;
        const FOURCC = 0x0000_0004;
        const PALETTEINDEXED4 = 0x0000_0008;
        const PALETTEINDEXEDTO8 = 0x0000_0010;
        const PALETTEINDEXED8 = 0x0000_0020;
        const RGB = 0x0000_0040;
        const COMPRESSED = 0x0000_0080;
        const RGBTOYUV = 0x0000_0100;
        const YUV = 0x0000_0200;
        const ZBUFFER = 0x0000_0400;
        const PALETTEINDEXED1 = 0x0000_0800;
        const PALETTEINDEXED2 = 0x0000_1000;
        const ZPIXELS = 0x0000_2000;
        const STENCILBUFFER = 0x0000_4000;
        const ALPHAPREMULT = 0x0000_8000;
        const LUMINANCE = 0x0002_0000;
        const BUMPLUMINANCE = 0x0004_0000;
        const BUMPDUDV = 0x0008_0000;
    }

    /// `DDSCL_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CooperativeFlags: u32 {
        const FULLSCREEN = 0x0000_0001;
        const ALLOWREBOOT = 0x0000_0002;
        const NOWINDOWCHANGES = 0x0000_0004;
        const NORMAL = 0x0000_0008;
        const EXCLUSIVE = 0x0000_0010;
        const ALLOWMODEX = 0x0000_0040;
        const SETFOCUSWINDOW = 0x0000_0080;
        const SETDEVICEWINDOW = 0x0000_0100;
        const CREATEDEVICEWINDOW = 0x0000_0200;
        const MULTITHREADED = 0x0000_0400;
        const FPUSETUP = 0x0000_0800;
        const FPUPRESERVE = 0x0000_1000;
    }

    /// `DDLOCK_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LockFlags: u32 {
        const WAIT = 0x0000_0001;
        const EVENT = 0x0000_0002;
        const READONLY = 0x0000_0010;
        const WRITEONLY = 0x0000_0020;
        const NOSYSLOCK = 0x0000_0800;
        const NOOVERWRITE = 0x0000_1000;
        const DISCARDCONTENTS = 0x0000_2000;
        const DONOTWAIT = 0x0000_4000;
    }

    /// `DDBLT_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BltFlags: u32 {
        const ALPHADEST = 0x0000_0001;
        const ALPHADESTCONSTOVERRIDE = 0x0000_0002;
        const ALPHADESTNEG = 0x0000_0004;
        const ALPHADESTSURFACEOVERRIDE = 0x0000_0008;
        const ALPHAEDGEBLEND = 0x0000_0010;
        const ALPHASRC = 0x0000_0020;
        const ALPHASRCCONSTOVERRIDE = 0x0000_0040;
        const ALPHASRCNEG = 0x0000_0080;
        const ALPHASRCSURFACEOVERRIDE = 0x0000_0100;
        const ASYNC = 0x0000_0200;
        const COLORFILL = 0x0000_0400;
        const DDFX = 0x0000_0800;
        const DDROPS = 0x0000_1000;
        const KEYDEST = 0x0000_2000;
        const KEYDESTOVERRIDE = 0x0000_4000;
        const KEYSRC = 0x0000_8000;
        const KEYSRCOVERRIDE = 0x0001_0000;
        const ROP = 0x0002_0000;
        const ROTATIONANGLE = 0x0004_0000;
        const ZBUFFER = 0x0008_0000;
        const WAIT = 0x0100_0000;
        const DEPTHFILL = 0x0200_0000;
        const DONOTWAIT = 0x0800_0000;
    }

    /// `DDBLTFAST_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BltFastFlags: u32 {
        const SRCCOLORKEY = 0x0000_0001;
        const DESTCOLORKEY = 0x0000_0002;
        const WAIT = 0x0000_0010;
        const DONOTWAIT = 0x0000_0020;
    }

    /// `DDBLTFX_*` (the `dwDDFX` member)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BltFxFlags: u32 {
        const ARITHSTRETCHY = 0x0000_0001;
        const MIRRORLEFTRIGHT = 0x0000_0002;
        const MIRRORUPDOWN = 0x0000_0004;
        const NOTEARING = 0x0000_0008;
    }

    /// `DDFLIP_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FlipFlags: u32 {
        const WAIT = 0x0000_0001;
        const EVEN = 0x0000_0002;
        const ODD = 0x0000_0004;
        const NOVSYNC = 0x0000_0008;
        const STEREO = 0x0000_0010;
        const DONOTWAIT = 0x0000_0020;
        const INTERVAL2 = 0x0200_0000;
        const INTERVAL3 = 0x0300_0000;
        const INTERVAL4 = 0x0400_0000;
    }

    /// `DDCKEY_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ColorKeyFlags: u32 {
        const COLORSPACE = 0x0000_0001;
        const DESTBLT = 0x0000_0002;
        const DESTOVERLAY = 0x0000_0004;
        const SRCBLT = 0x0000_0008;
        const SRCOVERLAY = 0x0000_0010;
    }

    /// `DDENUMSURFACES_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EnumSurfacesFlags: u32 {
        const ALL = 0x0000_0001;
        const MATCH = 0x0000_0002;
        const NOMATCH = 0x0000_0004;
        const CANBECREATED = 0x0000_0008;
        const DOESEXIST = 0x0000_0010;
    }

    /// `DDEDM_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EnumModeFlags: u32 {
        const REFRESHRATES = 0x0000_0001;
        const STANDARDVGAMODES = 0x0000_0002;
    }

    /// `DDWAITVB_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WaitVbFlags: u32 {
        const BLOCKBEGIN = 0x0000_0001;
        const BLOCKBEGINEVENT = 0x0000_0002;
        const BLOCKEND = 0x0000_0004;
    }

    /// `DDGBS_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BltStatusFlags: u32 {
        const CANBLT = 0x0000_0001;
        const ISBLTDONE = 0x0000_0002;
    }

    /// `DDGFS_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FlipStatusFlags: u32 {
        const CANFLIP = 0x0000_0001;
        const ISFLIPDONE = 0x0000_0002;
    }
}

/// `DDPIXELFORMAT`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PixelFormat {
    pub size: u32,
    pub flags: PixelFlags,
    pub fourcc: u32,
    /// Also the z-buffer bit depth for depth formats
    pub rgb_bit_count: u32,
    /// Also the stencil bit depth for depth formats
    pub r_bit_mask: u32,
    /// Also the z bit mask for depth formats
    pub g_bit_mask: u32,
    /// Also the stencil bit mask for depth formats
    pub b_bit_mask: u32,
    pub rgb_alpha_bit_mask: u32,
}

impl PixelFormat {
    pub fn is_palette_indexed(&self) -> bool {
        self.flags.intersects(
            PixelFlags::PALETTEINDEXED1
                | PixelFlags::PALETTEINDEXED2
                | PixelFlags::PALETTEINDEXED4
                | PixelFlags::PALETTEINDEXED8
                | PixelFlags::PALETTEINDEXEDTO8,
        )
    }

    pub fn is_depth(&self) -> bool {
        self.flags.intersects(PixelFlags::ZBUFFER | PixelFlags::STENCILBUFFER)
    }
}

/// `DDSCAPS2`; legacy `DDSCAPS` is just `caps`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SurfaceCaps {
    pub caps: Caps,
    pub caps2: Caps2,
    pub caps3: u32,
    pub caps4: u32,
}

impl SurfaceCaps {
    pub const fn new(caps: Caps) -> Self {
        Self { caps, caps2: Caps2::empty(), caps3: 0, caps4: 0 }
    }

    /// Every flag in `wanted` is present
    pub fn contains(&self, wanted: &SurfaceCaps) -> bool {
        self.caps.contains(wanted.caps)
            && self.caps2.contains(wanted.caps2)
            && self.caps3 & wanted.caps3 == wanted.caps3
            && self.caps4 & wanted.caps4 == wanted.caps4
    }
}

/// Color keys carried in a surface description
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct DescColorKeys {
    pub dest_overlay: ColorKey,
    pub dest_blt: ColorKey,
    pub src_overlay: ColorKey,
    pub src_blt: ColorKey,
}

/// `DDSURFACEDESC` (interfaces 1-3)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceDesc {
    pub size: u32,
    pub flags: DescFlags,
    pub height: u32,
    pub width: u32,
    /// `lPitch`
    pub pitch: i32,
    pub back_buffer_count: u32,
    /// Union of `dwMipMapCount`, `dwZBufferBitDepth` and `dwRefreshRate`
    pub mipmap_count: u32,
    pub alpha_bit_depth: u32,
    /// `lpSurface`
    pub surface: usize,
    pub color_keys: DescColorKeys,
    pub pixel_format: PixelFormat,
    pub caps: Caps,
}

impl Default for SurfaceDesc {
    fn default() -> Self {
        Self {
            size: SURFACE_DESC_SIZE,
            flags: DescFlags::empty(),
            height: 0,
            width: 0,
            pitch: 0,
            back_buffer_count: 0,
            mipmap_count: 0,
            alpha_bit_depth: 0,
            surface: 0,
            color_keys: DescColorKeys::default(),
            pixel_format: PixelFormat { size: PIXEL_FORMAT_SIZE, ..Default::default() },
            caps: Caps::empty(),
        }
    }
}

/// `DDSURFACEDESC2` (interfaces 4 and 7)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceDesc2 {
    pub size: u32,
    pub flags: DescFlags,
    pub height: u32,
    pub width: u32,
    /// `lPitch`, or `dwLinearSize` when `LINEARSIZE` is set
    pub pitch: i32,
    /// Also `dwDepth` for volume textures
    pub back_buffer_count: u32,
    pub mipmap_count: u32,
    pub refresh_rate: u32,
    pub alpha_bit_depth: u32,
    pub surface: usize,
    pub color_keys: DescColorKeys,
    pub pixel_format: PixelFormat,
    pub caps: SurfaceCaps,
    pub texture_stage: u32,
}

impl Default for SurfaceDesc2 {
    fn default() -> Self {
        Self {
            size: SURFACE_DESC2_SIZE,
            flags: DescFlags::empty(),
            height: 0,
            width: 0,
            pitch: 0,
            back_buffer_count: 0,
            mipmap_count: 0,
            refresh_rate: 0,
            alpha_bit_depth: 0,
            surface: 0,
            color_keys: DescColorKeys::default(),
            pixel_format: PixelFormat { size: PIXEL_FORMAT_SIZE, ..Default::default() },
            caps: SurfaceCaps::default(),
            texture_stage: 0,
        }
    }
}

impl From<&SurfaceDesc> for SurfaceDesc2 {
    fn from(desc: &SurfaceDesc) -> Self {
        let mut flags = desc.flags;
        let mut mipmap_count = 0;
        let mut refresh_rate = 0;
        let mut pixel_format = desc.pixel_format;

        // The legacy union is interpreted by whichever flag the caller set
        if flags.contains(DescFlags::MIPMAPCOUNT) {
            mipmap_count = desc.mipmap_count;
        } else if flags.contains(DescFlags::REFRESHRATE) {
            refresh_rate = desc.mipmap_count;
        } else if flags.contains(DescFlags::ZBUFFERBITDEPTH) {
            flags.remove(DescFlags::ZBUFFERBITDEPTH);
            if !flags.contains(DescFlags::PIXELFORMAT) {
                flags.insert(DescFlags::PIXELFORMAT);
                pixel_format = PixelFormat {
                    size: PIXEL_FORMAT_SIZE,
                    flags: PixelFlags::ZBUFFER,
                    rgb_bit_count: desc.mipmap_count,
                    g_bit_mask: depth_mask(desc.mipmap_count),
                    ..Default::default()
                };
            }
        }

        Self {
            size: SURFACE_DESC2_SIZE,
            flags,
            height: desc.height,
            width: desc.width,
            pitch: desc.pitch,
            back_buffer_count: desc.back_buffer_count,
            mipmap_count,
            refresh_rate,
            alpha_bit_depth: desc.alpha_bit_depth,
            surface: desc.surface,
            color_keys: desc.color_keys,
            pixel_format,
            caps: SurfaceCaps::new(desc.caps),
            texture_stage: 0,
        }
    }
}

impl From<&SurfaceDesc2> for SurfaceDesc {
    fn from(desc: &SurfaceDesc2) -> Self {
        let mut flags = desc.flags
            & !(DescFlags::TEXTURESTAGE | DescFlags::FVF | DescFlags::SRCVBHANDLE | DescFlags::DEPTH);
        let union = if flags.contains(DescFlags::MIPMAPCOUNT) {
            flags.remove(DescFlags::REFRESHRATE);
            desc.mipmap_count
        } else if flags.contains(DescFlags::REFRESHRATE) {
            desc.refresh_rate
        } else {
            0
        };
        if flags.contains(DescFlags::LINEARSIZE) {
            flags.remove(DescFlags::LINEARSIZE);
        }

        Self {
            size: SURFACE_DESC_SIZE,
            flags,
            height: desc.height,
            width: desc.width,
            pitch: desc.pitch,
            back_buffer_count: desc.back_buffer_count,
            mipmap_count: union,
            alpha_bit_depth: desc.alpha_bit_depth,
            surface: desc.surface,
            color_keys: desc.color_keys,
            pixel_format: desc.pixel_format,
            caps: desc.caps.caps,
        }
    }
}

fn depth_mask(bits: u32) -> u32 {
    match bits {
        0 => 0,
        32.. => u32::MAX,
        n => (1u32 << n) - 1,
    }
}

/// A description as handed in by the application, tagged by structure generation
#[derive(Clone, Copy, Debug)]
pub enum VersionedDesc<'a> {
    Legacy(&'a SurfaceDesc),
    Current(&'a SurfaceDesc2),
}

impl VersionedDesc<'_> {
    /// Check the size discriminant and widen to the current layout
    pub fn to_desc2(&self) -> Option<SurfaceDesc2> {
        match self {
            VersionedDesc::Legacy(desc) if desc.size == SURFACE_DESC_SIZE => Some(SurfaceDesc2::from(*desc)),
            VersionedDesc::Current(desc) if desc.size == SURFACE_DESC2_SIZE => Some(**desc),
            _ => None,
        }
    }
}

/// A description the application wants filled in
#[derive(Debug)]
pub enum VersionedDescMut<'a> {
    Legacy(&'a mut SurfaceDesc),
    Current(&'a mut SurfaceDesc2),
}

impl VersionedDescMut<'_> {
    /// Size discriminant matches the structure generation of `uses_desc2`
    pub fn is_valid_for(&self, uses_desc2: bool) -> bool {
        match self {
            VersionedDescMut::Legacy(desc) => !uses_desc2 && desc.size == SURFACE_DESC_SIZE,
            VersionedDescMut::Current(desc) => uses_desc2 && desc.size == SURFACE_DESC2_SIZE,
        }
    }

    /// Store `desc`, narrowing it for the legacy layout
    pub fn fill(&mut self, desc: &SurfaceDesc2) {
        match self {
            VersionedDescMut::Legacy(out) => **out = SurfaceDesc::from(desc),
            VersionedDescMut::Current(out) => **out = *desc,
        }
    }
}

/// A description handed to an enumeration callback in the caller's generation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnyDesc {
    Legacy(SurfaceDesc),
    Current(SurfaceDesc2),
}

impl AnyDesc {
    pub fn for_version(desc: &SurfaceDesc2, uses_desc2: bool) -> Self {
        if uses_desc2 {
            AnyDesc::Current(*desc)
        } else {
            AnyDesc::Legacy(SurfaceDesc::from(desc))
        }
    }

    pub fn to_desc2(&self) -> SurfaceDesc2 {
        match self {
            AnyDesc::Legacy(desc) => SurfaceDesc2::from(desc),
            AnyDesc::Current(desc) => *desc,
        }
    }
}

/// `DDBLTFX` subset used by Blt
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BltFx {
    pub ddfx: BltFxFlags,
    pub rop: u32,
    pub fill_color: u32,
    pub fill_depth: u32,
    pub dest_color_key: ColorKey,
    pub src_color_key: ColorKey,
}

/// `SRCCOPY`
pub const ROP_SRCCOPY: u32 = 0x00CC_0020;
