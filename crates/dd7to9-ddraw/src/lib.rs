//! DirectDraw on Direct3D9
//!
//! Drop-in replacement for the DirectDraw 1 to 7 object model. Containers,
//! surfaces, palettes and clippers keep their legacy semantics while every
//! pixel lives in Direct3D9 textures, and presentation goes through a single
//! `IDirect3DDevice9` shared by the whole process.
//!
//! The safe entry points are [`direct_draw_create`] and
//! [`direct_draw_create_ex`]. On Windows the DLL also exports the classic
//! `DirectDrawCreate*` and `DirectDrawEnumerate*` symbols that the proxy layer
//! binds to.

#[macro_use]
mod limit;

pub mod backend;
pub mod clipper;
pub mod context;
pub mod ddraw;
pub mod desc;
pub mod emu;
pub mod error;
pub mod format;
pub mod gdi;
pub mod interface;
pub mod mouse;
pub mod palette;
pub mod present;
pub mod surface;
pub mod types;
pub mod window;

use anyhow::Context;
use dd7to9_common::Config;
use tracing_subscriber::EnvFilter;

use crate::context::ProcessContext;
use crate::ddraw::{DirectDraw, DirectDrawInterface};
use crate::error::{DdError, DdResult};
use crate::interface::{InterfaceVersion, IID_IDIRECTDRAW7};
use crate::types::Guid;

/// Install the global `tracing` subscriber
///
/// `RUST_LOG` wins over the configured level. Calling this twice is harmless.
pub fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .try_init();
}

fn load_config() -> anyhow::Result<Config> {
    Config::load_from_env().context("Failed to load dd7to9 config")
}

/// Process attach: load the config and start logging
///
/// A broken config file falls back to defaults after logging the failure.
pub fn attach_process() -> Config {
    match load_config() {
        Ok(config) => {
            init_logging(&config);
            config
        }
        Err(err) => {
            let config = Config::default();
            init_logging(&config);
            tracing::error!("{:#}, using defaults", err);
            config
        }
    }
}

/// `DirectDrawCreate`: a version 1 container on the process context
pub fn direct_draw_create() -> DdResult<DirectDrawInterface> {
    DirectDraw::create(ProcessContext::global(), InterfaceVersion::V1)
}

/// `DirectDrawCreateEx`: only `IID_IDirectDraw7` is accepted
pub fn direct_draw_create_ex(iid: &Guid) -> DdResult<DirectDrawInterface> {
    if *iid != IID_IDIRECTDRAW7 {
        tracing::warn!("DirectDrawCreateEx called with unsupported interface {:?}", iid);
        return Err(DdError::InvalidParams);
    }
    DirectDraw::create(ProcessContext::global(), InterfaceVersion::V7)
}

#[cfg(windows)]
mod exports {
    //! Raw DLL exports
    //!
    //! The handle written to `lplpdd` is an owned `DirectDrawInterface`. The
    //! proxy layer wraps it in the matching COM vtable and frees it through
    //! [`DirectDrawReleaseHandle`] once the last reference is gone.

    use std::ffi::c_void;

    use windows::core::{GUID, HRESULT, PCSTR, PCWSTR};
    use windows::Win32::Foundation::BOOL;

    use super::*;

    const DLL_PROCESS_ATTACH: u32 = 1;
    const DLL_PROCESS_DETACH: u32 = 0;
    const CLASS_E_NOAGGREGATION: u32 = 0x8004_0110;
    /// Guards against `lpGUID` values that are really `DDCREATE_*` flags
    const DDCREATE_FLAGS_MAX: usize = 2;

    type EnumCallbackA = unsafe extern "system" fn(*mut GUID, PCSTR, PCSTR, *mut c_void) -> BOOL;
    type EnumCallbackW = unsafe extern "system" fn(*mut GUID, PCWSTR, PCWSTR, *mut c_void) -> BOOL;

    fn status(result: DdResult<()>) -> HRESULT {
        HRESULT(result.map_or_else(|err| err.hresult(), |()| error::DD_OK) as i32)
    }

    unsafe fn hand_out(lplpdd: *mut *mut c_void, punkouter: *mut c_void, create: impl FnOnce() -> DdResult<DirectDrawInterface>) -> HRESULT {
        if lplpdd.is_null() {
            return HRESULT(error::E_POINTER as i32);
        }
        *lplpdd = std::ptr::null_mut();
        if !punkouter.is_null() {
            return HRESULT(CLASS_E_NOAGGREGATION as i32);
        }
        status(create().map(|dd| {
            *lplpdd = Box::into_raw(Box::new(dd)) as *mut c_void;
        }))
    }

    unsafe fn log_driver_guid(lpguid: *const GUID) {
        if lpguid as usize > DDCREATE_FLAGS_MAX {
            tracing::debug!("Ignoring driver GUID {:?}", *lpguid);
        }
    }

    #[no_mangle]
    #[allow(non_snake_case)]
    pub extern "system" fn DllMain(_hinst_dll: isize, fdw_reason: u32, _lpv_reserved: *mut c_void) -> i32 {
        match fdw_reason {
            DLL_PROCESS_ATTACH => {
                attach_process();
                tracing::info!("dd7to9 DirectDraw shim loaded");
            }
            DLL_PROCESS_DETACH => {
                tracing::info!("dd7to9 DirectDraw shim unloaded");
            }
            _ => {}
        }
        1
    }

    #[no_mangle]
    pub unsafe extern "system" fn DirectDrawCreate(
        lpguid: *mut GUID,
        lplpdd: *mut *mut c_void,
        punkouter: *mut c_void,
    ) -> HRESULT {
        tracing::debug!("DirectDrawCreate");
        log_driver_guid(lpguid);
        hand_out(lplpdd, punkouter, direct_draw_create)
    }

    #[no_mangle]
    pub unsafe extern "system" fn DirectDrawCreateEx(
        lpguid: *mut GUID,
        lplpdd: *mut *mut c_void,
        iid: *const GUID,
        punkouter: *mut c_void,
    ) -> HRESULT {
        tracing::debug!("DirectDrawCreateEx");
        log_driver_guid(lpguid);
        if iid.is_null() {
            return HRESULT(error::DDERR_INVALIDPARAMS as i32);
        }
        let iid = Guid((*iid).to_u128());
        hand_out(lplpdd, punkouter, || direct_draw_create_ex(&iid))
    }

    /// Drop a handle produced by `DirectDrawCreate` or `DirectDrawCreateEx`
    #[no_mangle]
    pub unsafe extern "system" fn DirectDrawReleaseHandle(handle: *mut c_void) {
        if !handle.is_null() {
            let dd = Box::from_raw(handle as *mut DirectDrawInterface);
            dd.release();
        }
    }

    /// Report the single primary display driver
    #[no_mangle]
    pub unsafe extern "system" fn DirectDrawEnumerateA(lpcallback: Option<EnumCallbackA>, lpcontext: *mut c_void) -> HRESULT {
        let Some(callback) = lpcallback else {
            return HRESULT(error::DDERR_INVALIDPARAMS as i32);
        };
        callback(
            std::ptr::null_mut(),
            PCSTR(b"Primary Display Driver\0".as_ptr()),
            PCSTR(b"display\0".as_ptr()),
            lpcontext,
        );
        HRESULT(0)
    }

    #[no_mangle]
    pub unsafe extern "system" fn DirectDrawEnumerateW(lpcallback: Option<EnumCallbackW>, lpcontext: *mut c_void) -> HRESULT {
        let Some(callback) = lpcallback else {
            return HRESULT(error::DDERR_INVALIDPARAMS as i32);
        };
        let description: Vec<u16> = "Primary Display Driver\0".encode_utf16().collect();
        let name: Vec<u16> = "display\0".encode_utf16().collect();
        callback(std::ptr::null_mut(), PCWSTR(description.as_ptr()), PCWSTR(name.as_ptr()), lpcontext);
        HRESULT(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::IID_IDIRECTDRAW4;

    #[test]
    fn create_ex_only_hands_out_version_seven() {
        assert_eq!(direct_draw_create_ex(&IID_IDIRECTDRAW4).err(), Some(DdError::InvalidParams));
    }

    #[test]
    fn logging_can_be_initialized_twice() {
        let config = Config::default();
        init_logging(&config);
        init_logging(&config);
    }
}
