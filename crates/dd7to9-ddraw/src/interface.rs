//! Interface versions and identity
//!
//! One container or surface is reachable through five interface versions.
//! Each version keeps its own reference count; the object dies when all five
//! reach zero. Adapters record the version they were acquired through once,
//! and `QueryInterface` picks a new adapter by IID.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::ddraw::DirectDrawInterface;
use crate::surface::SurfaceInterface;
use crate::types::Guid;

pub const IID_IUNKNOWN: Guid = Guid::from_u128(0x00000000_0000_0000_C000_000000000046);

pub const IID_IDIRECTDRAW: Guid = Guid::from_u128(0x6C14DB80_A733_11CE_A521_0020AF0BE560);
pub const IID_IDIRECTDRAW2: Guid = Guid::from_u128(0xB3A6F3E0_2B43_11CF_A2DE_00AA00B93356);
pub const IID_IDIRECTDRAW3: Guid = Guid::from_u128(0x618F8AD4_8B7A_11D0_8FCC_00C04FD9189D);
pub const IID_IDIRECTDRAW4: Guid = Guid::from_u128(0x9C59509A_39BD_11D1_8C4A_00C04FD930C5);
pub const IID_IDIRECTDRAW7: Guid = Guid::from_u128(0x15E65EC0_3B9C_11D2_B92F_00609797EA5B);

pub const IID_IDIRECTDRAWSURFACE: Guid = Guid::from_u128(0x6C14DB81_A733_11CE_A521_0020AF0BE560);
pub const IID_IDIRECTDRAWSURFACE2: Guid = Guid::from_u128(0x57805885_6EEC_11CF_9441_A82303C10E27);
pub const IID_IDIRECTDRAWSURFACE3: Guid = Guid::from_u128(0xDA044E00_69B2_11D0_A1D5_00AA00B8DFBB);
pub const IID_IDIRECTDRAWSURFACE4: Guid = Guid::from_u128(0x0B2B8630_AD35_11D0_8EA6_00609797EA5B);
pub const IID_IDIRECTDRAWSURFACE7: Guid = Guid::from_u128(0x06675A80_3B9B_11D2_B92F_00609797EA5B);

/// Legacy interface generation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InterfaceVersion {
    V1,
    V2,
    V3,
    V4,
    V7,
}

impl InterfaceVersion {
    pub const ALL: [InterfaceVersion; 5] = [
        InterfaceVersion::V1,
        InterfaceVersion::V2,
        InterfaceVersion::V3,
        InterfaceVersion::V4,
        InterfaceVersion::V7,
    ];

    fn index(self) -> usize {
        match self {
            InterfaceVersion::V1 => 0,
            InterfaceVersion::V2 => 1,
            InterfaceVersion::V3 => 2,
            InterfaceVersion::V4 => 3,
            InterfaceVersion::V7 => 4,
        }
    }

    /// The DirectX generation number
    pub fn number(self) -> u32 {
        match self {
            InterfaceVersion::V1 => 1,
            InterfaceVersion::V2 => 2,
            InterfaceVersion::V3 => 3,
            InterfaceVersion::V4 => 4,
            InterfaceVersion::V7 => 7,
        }
    }

    pub fn from_number(number: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.number() == number)
    }

    /// Versions 4 and 7 take `DDSURFACEDESC2` and `DDSCAPS2`
    pub fn uses_desc2(self) -> bool {
        self >= InterfaceVersion::V4
    }

    pub fn ddraw_iid(self) -> Guid {
        match self {
            InterfaceVersion::V1 => IID_IDIRECTDRAW,
            InterfaceVersion::V2 => IID_IDIRECTDRAW2,
            InterfaceVersion::V3 => IID_IDIRECTDRAW3,
            InterfaceVersion::V4 => IID_IDIRECTDRAW4,
            InterfaceVersion::V7 => IID_IDIRECTDRAW7,
        }
    }

    pub fn surface_iid(self) -> Guid {
        match self {
            InterfaceVersion::V1 => IID_IDIRECTDRAWSURFACE,
            InterfaceVersion::V2 => IID_IDIRECTDRAWSURFACE2,
            InterfaceVersion::V3 => IID_IDIRECTDRAWSURFACE3,
            InterfaceVersion::V4 => IID_IDIRECTDRAWSURFACE4,
            InterfaceVersion::V7 => IID_IDIRECTDRAWSURFACE7,
        }
    }

    pub fn from_ddraw_iid(iid: &Guid) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.ddraw_iid() == *iid)
    }

    pub fn from_surface_iid(iid: &Guid) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.surface_iid() == *iid)
    }

    /// Version whose semantics apply to calls made through `self`
    pub fn effective(self, convert_to_ddraw7: bool) -> Self {
        if convert_to_ddraw7 {
            InterfaceVersion::V7
        } else {
            self
        }
    }
}

/// Independent reference counts, one per interface version
#[derive(Debug, Default)]
pub struct RefCounts {
    counts: [AtomicU32; 5],
}

impl RefCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ref(&self, version: InterfaceVersion) -> u32 {
        self.counts[version.index()].fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop one reference of `version`, returning what is left of that version
    pub fn release(&self, version: InterfaceVersion) -> u32 {
        let counter = &self.counts[version.index()];
        match counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1)) {
            Ok(previous) => previous - 1,
            Err(_) => 0,
        }
    }

    pub fn count(&self, version: InterfaceVersion) -> u32 {
        self.counts[version.index()].load(Ordering::Acquire)
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().map(|c| c.load(Ordering::Acquire)).sum()
    }
}

/// What `QueryInterface` hands back
pub enum Interface {
    DirectDraw(DirectDrawInterface),
    Surface(SurfaceInterface),
}

impl Interface {
    pub fn version(&self) -> InterfaceVersion {
        match self {
            Interface::DirectDraw(dd) => dd.version(),
            Interface::Surface(surface) => surface.version(),
        }
    }

    pub fn into_ddraw(self) -> Option<DirectDrawInterface> {
        match self {
            Interface::DirectDraw(dd) => Some(dd),
            Interface::Surface(_) => None,
        }
    }

    pub fn into_surface(self) -> Option<SurfaceInterface> {
        match self {
            Interface::Surface(surface) => Some(surface),
            Interface::DirectDraw(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iids_resolve_to_versions() {
        for version in InterfaceVersion::ALL {
            assert_eq!(InterfaceVersion::from_ddraw_iid(&version.ddraw_iid()), Some(version));
            assert_eq!(InterfaceVersion::from_surface_iid(&version.surface_iid()), Some(version));
        }
        assert_eq!(InterfaceVersion::from_ddraw_iid(&IID_IUNKNOWN), None);
        assert_eq!(InterfaceVersion::from_surface_iid(&IID_IDIRECTDRAW7), None);
    }

    #[test]
    fn only_v4_and_v7_take_the_newer_layout() {
        assert!(!InterfaceVersion::V3.uses_desc2());
        assert!(InterfaceVersion::V4.uses_desc2());
        assert!(InterfaceVersion::V7.uses_desc2());
        assert_eq!(InterfaceVersion::from_number(7), Some(InterfaceVersion::V7));
        assert_eq!(InterfaceVersion::from_number(5), None);
    }

    #[test]
    fn ref_counts_are_independent_per_version() {
        let refs = RefCounts::new();
        assert_eq!(refs.add_ref(InterfaceVersion::V1), 1);
        assert_eq!(refs.add_ref(InterfaceVersion::V7), 1);
        assert_eq!(refs.add_ref(InterfaceVersion::V7), 2);
        assert_eq!(refs.total(), 3);

        assert_eq!(refs.release(InterfaceVersion::V7), 1);
        assert_eq!(refs.count(InterfaceVersion::V1), 1);
        assert_eq!(refs.release(InterfaceVersion::V4), 0, "releasing an unused version saturates");
        assert_eq!(refs.total(), 2);
    }

    #[test]
    fn convert_to_ddraw7_upgrades_semantics() {
        assert_eq!(InterfaceVersion::V1.effective(true), InterfaceVersion::V7);
        assert_eq!(InterfaceVersion::V2.effective(false), InterfaceVersion::V2);
    }
}
