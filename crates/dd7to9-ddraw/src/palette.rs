//! Palette objects
//!
//! Only the state surfaces read: 256 entries and an update sequence number.
//! Surfaces compare the number against the one they last synced to decide
//! whether the GDI color table or the display texture is stale.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::error::{DdError, DdResult};
use crate::types::PaletteEntry;

/// `DDPCAPS_8BIT`
pub const DDPCAPS_8BIT: u32 = 0x0000_0004;
/// `DDPCAPS_ALLOW256`
pub const DDPCAPS_ALLOW256: u32 = 0x0000_0040;

pub struct Palette {
    flags: u32,
    entries: Mutex<[PaletteEntry; 256]>,
    usn: AtomicU32,
}

impl Palette {
    pub fn new(flags: u32, initial: &[PaletteEntry]) -> DdResult<Self> {
        if initial.len() > 256 {
            return Err(DdError::InvalidParams);
        }
        let mut entries = [PaletteEntry::default(); 256];
        entries[..initial.len()].copy_from_slice(initial);
        Ok(Self { flags, entries: Mutex::new(entries), usn: AtomicU32::new(1) })
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Sequence number bumped by every entry change
    pub fn usn(&self) -> u32 {
        self.usn.load(Ordering::Acquire)
    }

    pub fn entries(&self) -> [PaletteEntry; 256] {
        *self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get_entries(&self, start: usize, out: &mut [PaletteEntry]) -> DdResult<()> {
        if start + out.len() > 256 {
            return Err(DdError::InvalidParams);
        }
        let entries = self.entries();
        out.copy_from_slice(&entries[start..start + out.len()]);
        Ok(())
    }

    pub fn set_entries(&self, start: usize, values: &[PaletteEntry]) -> DdResult<()> {
        if start + values.len() > 256 {
            return Err(DdError::InvalidParams);
        }
        {
            let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            entries[start..start + values.len()].copy_from_slice(values);
        }
        self.usn.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Entries packed as X8R8G8B8 for the display path
    pub fn rgb_table(&self) -> [u32; 256] {
        let entries = self.entries();
        let mut table = [0u32; 256];
        for (slot, entry) in table.iter_mut().zip(entries.iter()) {
            *slot = entry.to_xrgb();
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_entries_bumps_usn() {
        let palette = Palette::new(DDPCAPS_8BIT, &[]).unwrap();
        let before = palette.usn();
        palette.set_entries(10, &[PaletteEntry::rgb(1, 2, 3)]).unwrap();
        assert!(palette.usn() > before);
        assert_eq!(palette.rgb_table()[10], 0x0001_0203);
    }

    #[test]
    fn out_of_range_access_is_rejected() {
        let palette = Palette::new(DDPCAPS_8BIT, &[]).unwrap();
        assert_eq!(palette.set_entries(255, &[PaletteEntry::default(); 2]), Err(DdError::InvalidParams));
        let mut out = [PaletteEntry::default(); 4];
        assert_eq!(palette.get_entries(254, &mut out), Err(DdError::InvalidParams));
        assert!(Palette::new(0, &[PaletteEntry::default(); 257]).is_err());
    }
}
