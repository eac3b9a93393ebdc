//! Pixel format mapping between DirectDraw and Direct3D9

use crate::desc::{PixelFlags, PixelFormat, PIXEL_FORMAT_SIZE};
use crate::error::{DdError, DdResult};

const fn make_fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | (code[1] as u32) << 8 | (code[2] as u32) << 16 | (code[3] as u32) << 24
}

/// `D3DFORMAT` values the shim deals with
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum D3dFormat {
    #[default]
    Unknown = 0,
    R8G8B8 = 20,
    A8R8G8B8 = 21,
    X8R8G8B8 = 22,
    R5G6B5 = 23,
    X1R5G5B5 = 24,
    A1R5G5B5 = 25,
    A4R4G4B4 = 26,
    R3G3B2 = 27,
    A8 = 28,
    X4R4G4B4 = 30,
    A8B8G8R8 = 32,
    X8B8G8R8 = 33,
    P8 = 41,
    L8 = 50,
    A8L8 = 51,
    V8U8 = 60,
    D16Lockable = 70,
    D32 = 71,
    D15S1 = 73,
    D24S8 = 75,
    D24X8 = 77,
    D16 = 80,
    Uyvy = make_fourcc(b"UYVY"),
    Yuy2 = make_fourcc(b"YUY2"),
    Dxt1 = make_fourcc(b"DXT1"),
    Dxt2 = make_fourcc(b"DXT2"),
    Dxt3 = make_fourcc(b"DXT3"),
    Dxt4 = make_fourcc(b"DXT4"),
    Dxt5 = make_fourcc(b"DXT5"),
}

/// FourCC formats probed for GetFourCCCodes
pub const FOURCC_CANDIDATES: [D3dFormat; 7] = [
    D3dFormat::Uyvy,
    D3dFormat::Yuy2,
    D3dFormat::Dxt1,
    D3dFormat::Dxt2,
    D3dFormat::Dxt3,
    D3dFormat::Dxt4,
    D3dFormat::Dxt5,
];

impl D3dFormat {
    pub fn raw(self) -> u32 {
        self as u32
    }

    pub fn from_raw(value: u32) -> D3dFormat {
        use D3dFormat::*;
        const ALL: [D3dFormat; 29] = [
            R8G8B8, A8R8G8B8, X8R8G8B8, R5G6B5, X1R5G5B5, A1R5G5B5, A4R4G4B4, R3G3B2, A8,
            X4R4G4B4, A8B8G8R8, X8B8G8R8, P8, L8, A8L8, V8U8, D16Lockable, D32, D15S1, D24S8,
            D24X8, D16, Uyvy, Yuy2, Dxt1, Dxt2, Dxt3, Dxt4, Dxt5,
        ];
        ALL.into_iter().find(|f| f.raw() == value).unwrap_or(Unknown)
    }

    pub fn bits_per_pixel(self) -> u32 {
        use D3dFormat::*;
        match self {
            Unknown => 0,
            R3G3B2 | A8 | P8 | L8 => 8,
            R5G6B5 | X1R5G5B5 | A1R5G5B5 | A4R4G4B4 | X4R4G4B4 | A8L8 | V8U8 | D16Lockable
            | D15S1 | D16 | Uyvy | Yuy2 => 16,
            R8G8B8 => 24,
            A8R8G8B8 | X8R8G8B8 | A8B8G8R8 | X8B8G8R8 | D32 | D24S8 | D24X8 => 32,
            Dxt1 => 4,
            Dxt2 | Dxt3 | Dxt4 | Dxt5 => 8,
        }
    }

    pub fn is_depth(self) -> bool {
        use D3dFormat::*;
        matches!(self, D16Lockable | D32 | D15S1 | D24S8 | D24X8 | D16)
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, D3dFormat::D15S1 | D3dFormat::D24S8)
    }

    pub fn is_fourcc(self) -> bool {
        self.raw() > 0xFF
    }

    pub fn is_compressed(self) -> bool {
        use D3dFormat::*;
        matches!(self, Dxt1 | Dxt2 | Dxt3 | Dxt4 | Dxt5)
    }

    /// Format of the GPU texture backing a surface of this format
    ///
    /// Indexed color lives in a luminance texture; 24-bit color is widened.
    pub fn storage_format(self) -> D3dFormat {
        match self {
            D3dFormat::P8 => D3dFormat::L8,
            D3dFormat::R8G8B8 => D3dFormat::X8R8G8B8,
            other => other,
        }
    }

    /// The storage format differs in layout, so CPU access goes through emulated memory
    pub fn requires_emulation(self) -> bool {
        matches!(self, D3dFormat::P8 | D3dFormat::R8G8B8)
    }
}

/// Translate a DirectDraw pixel format into a Direct3D9 format
pub fn d3d_format_of(pf: &PixelFormat) -> D3dFormat {
    use D3dFormat::*;
    let flags = pf.flags;

    if flags.contains(PixelFlags::FOURCC) {
        return D3dFormat::from_raw(pf.fourcc);
    }
    if flags.contains(PixelFlags::PALETTEINDEXED8) {
        return P8;
    }
    if pf.is_palette_indexed() {
        return Unknown;
    }
    if pf.is_depth() {
        let stencil = flags.contains(PixelFlags::STENCILBUFFER) && pf.r_bit_mask != 0;
        return match (pf.rgb_bit_count, stencil) {
            (16, false) => D16,
            (16, true) => D15S1,
            (24, _) | (32, true) => D24S8,
            (32, false) if pf.g_bit_mask == 0x00FF_FFFF || pf.g_bit_mask == 0xFFFF_FF00 => D24X8,
            (32, false) => D32,
            _ => Unknown,
        };
    }
    if flags.contains(PixelFlags::LUMINANCE) {
        return match pf.rgb_bit_count {
            8 => L8,
            16 if flags.contains(PixelFlags::ALPHAPIXELS) => A8L8,
            _ => Unknown,
        };
    }
    if flags.contains(PixelFlags::ALPHA) && !flags.contains(PixelFlags::RGB) {
        return if pf.rgb_bit_count == 8 { A8 } else { Unknown };
    }
    if !flags.contains(PixelFlags::RGB) {
        return Unknown;
    }

    let alpha = flags.contains(PixelFlags::ALPHAPIXELS) && pf.rgb_alpha_bit_mask != 0;
    match pf.rgb_bit_count {
        8 => R3G3B2,
        16 => match (pf.r_bit_mask, alpha) {
            (0xF800, _) => R5G6B5,
            (0x7C00, true) => A1R5G5B5,
            (0x7C00, false) => X1R5G5B5,
            (0x0F00, true) => A4R4G4B4,
            (0x0F00, false) => X4R4G4B4,
            _ => Unknown,
        },
        24 => R8G8B8,
        32 => match (pf.r_bit_mask, alpha) {
            (0x00FF_0000, true) => A8R8G8B8,
            (0x00FF_0000, false) => X8R8G8B8,
            (0x0000_00FF, true) => A8B8G8R8,
            (0x0000_00FF, false) => X8B8G8R8,
            _ => Unknown,
        },
        _ => Unknown,
    }
}

/// Build the DirectDraw pixel format describing a Direct3D9 format
pub fn pixel_format_of(format: D3dFormat) -> PixelFormat {
    use D3dFormat::*;
    let rgb = |bits, r, g, b, a: u32| PixelFormat {
        size: PIXEL_FORMAT_SIZE,
        flags: if a != 0 { PixelFlags::RGB | PixelFlags::ALPHAPIXELS } else { PixelFlags::RGB },
        fourcc: 0,
        rgb_bit_count: bits,
        r_bit_mask: r,
        g_bit_mask: g,
        b_bit_mask: b,
        rgb_alpha_bit_mask: a,
    };
    let depth = |bits, z, stencil_bits, stencil_mask| PixelFormat {
        size: PIXEL_FORMAT_SIZE,
        flags: if stencil_bits != 0 {
            PixelFlags::ZBUFFER | PixelFlags::STENCILBUFFER
        } else {
            PixelFlags::ZBUFFER
        },
        fourcc: 0,
        rgb_bit_count: bits,
        r_bit_mask: stencil_bits,
        g_bit_mask: z,
        b_bit_mask: stencil_mask,
        rgb_alpha_bit_mask: 0,
    };

    match format {
        R3G3B2 => rgb(8, 0xE0, 0x1C, 0x03, 0),
        R5G6B5 => rgb(16, 0xF800, 0x07E0, 0x001F, 0),
        X1R5G5B5 => rgb(16, 0x7C00, 0x03E0, 0x001F, 0),
        A1R5G5B5 => rgb(16, 0x7C00, 0x03E0, 0x001F, 0x8000),
        A4R4G4B4 => rgb(16, 0x0F00, 0x00F0, 0x000F, 0xF000),
        X4R4G4B4 => rgb(16, 0x0F00, 0x00F0, 0x000F, 0),
        R8G8B8 => rgb(24, 0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0),
        X8R8G8B8 => rgb(32, 0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0),
        A8R8G8B8 => rgb(32, 0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0xFF00_0000),
        X8B8G8R8 => rgb(32, 0x0000_00FF, 0x0000_FF00, 0x00FF_0000, 0),
        A8B8G8R8 => rgb(32, 0x0000_00FF, 0x0000_FF00, 0x00FF_0000, 0xFF00_0000),
        P8 => PixelFormat {
            size: PIXEL_FORMAT_SIZE,
            flags: PixelFlags::RGB | PixelFlags::PALETTEINDEXED8,
            rgb_bit_count: 8,
            ..Default::default()
        },
        L8 => PixelFormat {
            size: PIXEL_FORMAT_SIZE,
            flags: PixelFlags::LUMINANCE,
            rgb_bit_count: 8,
            r_bit_mask: 0xFF,
            ..Default::default()
        },
        A8L8 => PixelFormat {
            size: PIXEL_FORMAT_SIZE,
            flags: PixelFlags::LUMINANCE | PixelFlags::ALPHAPIXELS,
            rgb_bit_count: 16,
            r_bit_mask: 0x00FF,
            rgb_alpha_bit_mask: 0xFF00,
            ..Default::default()
        },
        A8 => PixelFormat {
            size: PIXEL_FORMAT_SIZE,
            flags: PixelFlags::ALPHA,
            rgb_bit_count: 8,
            rgb_alpha_bit_mask: 0xFF,
            ..Default::default()
        },
        D16 | D16Lockable => depth(16, 0xFFFF, 0, 0),
        D15S1 => depth(16, 0xFFFE, 1, 0x0001),
        D24X8 => depth(32, 0xFFFF_FF00, 0, 0),
        D24S8 => depth(32, 0xFFFF_FF00, 8, 0x0000_00FF),
        D32 => depth(32, 0xFFFF_FFFF, 0, 0),
        V8U8 => PixelFormat {
            size: PIXEL_FORMAT_SIZE,
            flags: PixelFlags::BUMPDUDV,
            rgb_bit_count: 16,
            r_bit_mask: 0x00FF,
            g_bit_mask: 0xFF00,
            ..Default::default()
        },
        Uyvy | Yuy2 | Dxt1 | Dxt2 | Dxt3 | Dxt4 | Dxt5 => PixelFormat {
            size: PIXEL_FORMAT_SIZE,
            flags: PixelFlags::FOURCC,
            fourcc: format.raw(),
            ..Default::default()
        },
        Unknown => PixelFormat { size: PIXEL_FORMAT_SIZE, ..Default::default() },
    }
}

/// Pixel format of the emulated display at `bpp` bits
pub fn display_pixel_format(bpp: u32) -> DdResult<PixelFormat> {
    match bpp {
        8 => Ok(pixel_format_of(D3dFormat::P8)),
        16 => Ok(pixel_format_of(D3dFormat::R5G6B5)),
        24 => Ok(pixel_format_of(D3dFormat::R8G8B8)),
        32 => Ok(pixel_format_of(D3dFormat::X8R8G8B8)),
        _ => {
            limit_warn!(100, "Unsupported display bit count: {}", bpp);
            Err(DdError::Unsupported)
        }
    }
}

/// DWORD aligned pitch of a `width` pixel row
pub fn compute_pitch(width: u32, bpp: u32) -> u32 {
    ((width * bpp + 31) & !31) >> 3
}

/// Pixel format flags the GPU path cannot represent at all
pub fn is_unsupported_format(pf: &PixelFormat) -> bool {
    pf.flags.intersects(
        PixelFlags::YUV
            | PixelFlags::RGBTOYUV
            | PixelFlags::BUMPLUMINANCE
            | PixelFlags::COMPRESSED
            | PixelFlags::PALETTEINDEXED1
            | PixelFlags::PALETTEINDEXED2
            | PixelFlags::PALETTEINDEXED4
            | PixelFlags::PALETTEINDEXEDTO8
            | PixelFlags::ALPHAPREMULT,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_round_trip() {
        for (bpp, format) in [
            (8, D3dFormat::P8),
            (16, D3dFormat::R5G6B5),
            (24, D3dFormat::R8G8B8),
            (32, D3dFormat::X8R8G8B8),
        ] {
            let pf = display_pixel_format(bpp).unwrap();
            assert_eq!(pf.rgb_bit_count, bpp);
            assert_eq!(d3d_format_of(&pf), format);
        }
        assert_eq!(display_pixel_format(15), Err(DdError::Unsupported));
    }

    #[test]
    fn sixteen_bit_layouts_are_told_apart_by_masks() {
        let mut pf = pixel_format_of(D3dFormat::X1R5G5B5);
        assert_eq!(d3d_format_of(&pf), D3dFormat::X1R5G5B5);
        pf.flags |= PixelFlags::ALPHAPIXELS;
        pf.rgb_alpha_bit_mask = 0x8000;
        assert_eq!(d3d_format_of(&pf), D3dFormat::A1R5G5B5);
    }

    #[test]
    fn depth_formats_map_by_depth_and_stencil() {
        assert_eq!(d3d_format_of(&pixel_format_of(D3dFormat::D16)), D3dFormat::D16);
        assert_eq!(d3d_format_of(&pixel_format_of(D3dFormat::D24S8)), D3dFormat::D24S8);
        assert_eq!(d3d_format_of(&pixel_format_of(D3dFormat::D24X8)), D3dFormat::D24X8);
        assert_eq!(d3d_format_of(&pixel_format_of(D3dFormat::D32)), D3dFormat::D32);
    }

    #[test]
    fn fourcc_codes_survive_translation() {
        let pf = pixel_format_of(D3dFormat::Dxt1);
        assert_eq!(pf.fourcc, 0x3154_5844);
        assert_eq!(d3d_format_of(&pf), D3dFormat::Dxt1);
        assert_eq!(D3dFormat::from_raw(0x1234_5678), D3dFormat::Unknown);
    }

    #[test]
    fn pitch_is_dword_aligned() {
        assert_eq!(compute_pitch(640, 8), 640);
        assert_eq!(compute_pitch(101, 16), 204);
        assert_eq!(compute_pitch(3, 24), 12);
        assert_eq!(compute_pitch(800, 32), 3200);
    }

    #[test]
    fn indexed_and_packed_formats_need_emulation() {
        assert!(D3dFormat::P8.requires_emulation());
        assert_eq!(D3dFormat::P8.storage_format(), D3dFormat::L8);
        assert!(D3dFormat::R8G8B8.requires_emulation());
        assert!(!D3dFormat::R5G6B5.requires_emulation());
    }

    #[test]
    fn yuv_and_low_bit_palettes_are_refused() {
        let mut pf = PixelFormat { flags: PixelFlags::YUV, ..Default::default() };
        assert!(is_unsupported_format(&pf));
        pf.flags = PixelFlags::PALETTEINDEXED4;
        assert!(is_unsupported_format(&pf));
        assert!(!is_unsupported_format(&pixel_format_of(D3dFormat::R5G6B5)));
    }
}
