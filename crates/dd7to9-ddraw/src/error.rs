//! DirectDraw status codes
//!
//! Every public operation returns `DdResult<T>`; `Ok` stands for `DD_OK` and
//! `DdError::hresult` gives the exact legacy code handed back to the caller.

use thiserror::Error;

use crate::backend::D3dError;

const fn make_ddhresult(code: u32) -> u32 {
    0x8876_0000 | code
}

pub const DD_OK: u32 = 0;
pub const E_NOTIMPL: u32 = 0x8000_4001;
pub const E_NOINTERFACE: u32 = 0x8000_4002;
pub const E_POINTER: u32 = 0x8000_4003;
pub const E_FAIL: u32 = 0x8000_4005;
pub const E_OUTOFMEMORY: u32 = 0x8007_000E;
pub const E_INVALIDARG: u32 = 0x8007_0057;

pub const DDERR_ALREADYINITIALIZED: u32 = make_ddhresult(5);
pub const DDERR_CANNOTATTACHSURFACE: u32 = make_ddhresult(10);
pub const DDERR_CANNOTDETACHSURFACE: u32 = make_ddhresult(20);
pub const DDERR_INVALIDCAPS: u32 = make_ddhresult(100);
pub const DDERR_INVALIDMODE: u32 = make_ddhresult(120);
pub const DDERR_INVALIDOBJECT: u32 = make_ddhresult(130);
pub const DDERR_INVALIDPIXELFORMAT: u32 = make_ddhresult(145);
pub const DDERR_INVALIDRECT: u32 = make_ddhresult(150);
pub const DDERR_NOCOLORKEY: u32 = make_ddhresult(215);
pub const DDERR_NOEXCLUSIVEMODE: u32 = make_ddhresult(225);
pub const DDERR_NOTFOUND: u32 = make_ddhresult(255);
pub const DDERR_SURFACEALREADYATTACHED: u32 = make_ddhresult(410);
pub const DDERR_SURFACEBUSY: u32 = make_ddhresult(430);
pub const DDERR_SURFACELOST: u32 = make_ddhresult(450);
pub const DDERR_SURFACENOTATTACHED: u32 = make_ddhresult(460);
pub const DDERR_PRIMARYSURFACEALREADYEXISTS: u32 = make_ddhresult(564);
pub const DDERR_VERTICALBLANKINPROGRESS: u32 = make_ddhresult(537);
pub const DDERR_NOCLIPPERATTACHED: u32 = make_ddhresult(568);
pub const DDERR_HWNDALREADYSET: u32 = make_ddhresult(571);
pub const DDERR_NOPALETTEATTACHED: u32 = make_ddhresult(572);
pub const DDERR_BLTFASTCANTCLIP: u32 = make_ddhresult(574);
pub const DDERR_NOTAOVERLAYSURFACE: u32 = make_ddhresult(580);
pub const DDERR_NOTFLIPPABLE: u32 = make_ddhresult(582);
pub const DDERR_NOTLOCKED: u32 = make_ddhresult(584);
pub const DDERR_NODC: u32 = make_ddhresult(586);
pub const DDERR_WRONGMODE: u32 = make_ddhresult(587);
pub const DDERR_NOTPALETTIZED: u32 = make_ddhresult(589);
pub const DDERR_DCALREADYCREATED: u32 = make_ddhresult(620);
pub const DDERR_MOREDATA: u32 = make_ddhresult(690);

pub const DDERR_INVALIDPARAMS: u32 = E_INVALIDARG;
pub const DDERR_GENERIC: u32 = E_FAIL;
pub const DDERR_UNSUPPORTED: u32 = E_NOTIMPL;
pub const DDERR_OUTOFMEMORY: u32 = E_OUTOFMEMORY;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdError {
    #[error("invalid parameters")]
    InvalidParams,

    #[error("null out-pointer")]
    Pointer,

    #[error("generic failure")]
    Generic,

    #[error("surface is locked or blitting on another thread")]
    SurfaceBusy,

    #[error("surface memory was lost with the device")]
    SurfaceLost,

    #[error("device is in the wrong mode")]
    WrongMode,

    #[error("exclusive mode is already bound to another window")]
    HwndAlreadySet,

    #[error("exclusive mode is required")]
    NoExclusiveMode,

    #[error("a primary surface already exists")]
    PrimarySurfaceAlreadyExists,

    #[error("pixel format is not supported")]
    InvalidPixelFormat,

    #[error("not supported")]
    Unsupported,

    #[error("display mode is not supported")]
    InvalidMode,

    #[error("not found")]
    NotFound,

    #[error("object is already initialized")]
    AlreadyInitialized,

    #[error("rectangle is outside the surface")]
    InvalidRect,

    #[error("surface is not locked")]
    NotLocked,

    #[error("surface is not flippable")]
    NotFlippable,

    #[error("no color key is set")]
    NoColorKey,

    #[error("surface is not palettized")]
    NotPalettized,

    #[error("a device context is already out")]
    DcAlreadyCreated,

    #[error("no device context is out")]
    NoDc,

    #[error("surface cannot be attached")]
    CannotAttachSurface,

    #[error("surface cannot be detached")]
    CannotDetachSurface,

    #[error("surface is already attached")]
    SurfaceAlreadyAttached,

    #[error("surface is not attached")]
    SurfaceNotAttached,

    #[error("surface is not an overlay")]
    NotAOverlaySurface,

    #[error("invalid object")]
    InvalidObject,

    #[error("buffer too small")]
    MoreData,

    #[error("BltFast cannot clip")]
    BltFastCantClip,

    #[error("interface not supported")]
    NoInterface,

    #[error("invalid capabilities")]
    InvalidCaps,

    #[error("out of memory")]
    OutOfMemory,

    #[error("vertical blank is in progress")]
    VerticalBlankInProgress,

    #[error("no clipper is attached")]
    NoClipperAttached,

    #[error("no palette is attached")]
    NoPaletteAttached,
}

pub type DdResult<T> = std::result::Result<T, DdError>;

impl DdError {
    /// The legacy status code returned through the COM surface
    pub fn hresult(self) -> u32 {
        match self {
            DdError::InvalidParams => DDERR_INVALIDPARAMS,
            DdError::Pointer => E_POINTER,
            DdError::Generic => DDERR_GENERIC,
            DdError::SurfaceBusy => DDERR_SURFACEBUSY,
            DdError::SurfaceLost => DDERR_SURFACELOST,
            DdError::WrongMode => DDERR_WRONGMODE,
            DdError::HwndAlreadySet => DDERR_HWNDALREADYSET,
            DdError::NoExclusiveMode => DDERR_NOEXCLUSIVEMODE,
            DdError::PrimarySurfaceAlreadyExists => DDERR_PRIMARYSURFACEALREADYEXISTS,
            DdError::InvalidPixelFormat => DDERR_INVALIDPIXELFORMAT,
            DdError::Unsupported => DDERR_UNSUPPORTED,
            DdError::InvalidMode => DDERR_INVALIDMODE,
            DdError::NotFound => DDERR_NOTFOUND,
            DdError::AlreadyInitialized => DDERR_ALREADYINITIALIZED,
            DdError::InvalidRect => DDERR_INVALIDRECT,
            DdError::NotLocked => DDERR_NOTLOCKED,
            DdError::NotFlippable => DDERR_NOTFLIPPABLE,
            DdError::NoColorKey => DDERR_NOCOLORKEY,
            DdError::NotPalettized => DDERR_NOTPALETTIZED,
            DdError::DcAlreadyCreated => DDERR_DCALREADYCREATED,
            DdError::NoDc => DDERR_NODC,
            DdError::CannotAttachSurface => DDERR_CANNOTATTACHSURFACE,
            DdError::CannotDetachSurface => DDERR_CANNOTDETACHSURFACE,
            DdError::SurfaceAlreadyAttached => DDERR_SURFACEALREADYATTACHED,
            DdError::SurfaceNotAttached => DDERR_SURFACENOTATTACHED,
            DdError::NotAOverlaySurface => DDERR_NOTAOVERLAYSURFACE,
            DdError::InvalidObject => DDERR_INVALIDOBJECT,
            DdError::MoreData => DDERR_MOREDATA,
            DdError::BltFastCantClip => DDERR_BLTFASTCANTCLIP,
            DdError::NoInterface => E_NOINTERFACE,
            DdError::InvalidCaps => DDERR_INVALIDCAPS,
            DdError::OutOfMemory => DDERR_OUTOFMEMORY,
            DdError::VerticalBlankInProgress => DDERR_VERTICALBLANKINPROGRESS,
            DdError::NoClipperAttached => DDERR_NOCLIPPERATTACHED,
            DdError::NoPaletteAttached => DDERR_NOPALETTEATTACHED,
        }
    }
}

/// Flatten a result into the status code seen by the application
pub fn to_hresult<T>(result: &DdResult<T>) -> u32 {
    match result {
        Ok(_) => DD_OK,
        Err(err) => err.hresult(),
    }
}

impl From<D3dError> for DdError {
    fn from(err: D3dError) -> Self {
        match err {
            D3dError::DeviceLost | D3dError::DeviceNotReset => DdError::SurfaceLost,
            D3dError::DriverInternalError | D3dError::InvalidCall => DdError::WrongMode,
            D3dError::OutOfVideoMemory => DdError::OutOfMemory,
            D3dError::NotAvailable => DdError::Unsupported,
            D3dError::DeviceRemoved | D3dError::Other(_) => DdError::Generic,
        }
    }
}
