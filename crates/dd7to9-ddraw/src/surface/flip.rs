//! Flip
//!
//! Flipping rotates the backing stores of a chain instead of copying pixels:
//! the front takes the first back buffer's resources, every back buffer takes
//! its successor's, and the last one takes the old front's.

use std::sync::{Arc, MutexGuard};

use crate::backend::TextureId;
use crate::desc::{Caps, FlipFlags, FlipStatusFlags};
use crate::emu::EmuSurface;
use crate::error::{DdError, DdResult};

use super::{Representation, Surface, SurfaceState};

/// Everything that moves between chain members on a flip
struct Backing {
    texture: Option<TextureId>,
    emu: Option<EmuSurface>,
    representation: Representation,
    backup: Option<Vec<u8>>,
    dirty: bool,
}

impl Backing {
    fn take(state: &mut SurfaceState) -> Backing {
        Backing {
            texture: state.texture.take(),
            emu: state.emu.take(),
            representation: state.representation,
            backup: state.backup.take(),
            dirty: state.dirty,
        }
    }

    fn put(self, state: &mut SurfaceState) {
        state.texture = self.texture;
        state.emu = self.emu;
        state.representation = self.representation;
        state.backup = self.backup;
        state.dirty = self.dirty;
    }
}

impl Surface {
    /// This surface followed by its back buffers in flip order
    pub(crate) fn flip_chain(self: &Arc<Self>) -> Vec<Arc<Surface>> {
        let mut chain = vec![self.clone()];
        loop {
            let Some(current) = chain.last() else { break };
            let next = current.attachments().into_iter().find(|s| {
                let caps = s.caps().caps;
                caps.contains(Caps::FLIP) && !caps.contains(Caps::FRONTBUFFER) && !chain.iter().any(|c| c.id == s.id)
            });
            match next {
                Some(next) => chain.push(next),
                None => break,
            }
        }
        chain
    }

    pub fn flip(self: &Arc<Self>, target: Option<&Arc<Surface>>, flags: FlipFlags) -> DdResult<()> {
        if self.is_destroyed() {
            return Err(DdError::InvalidObject);
        }
        if !self.caps.caps.contains(Caps::FLIP | Caps::FRONTBUFFER) {
            return Err(DdError::NotFlippable);
        }
        if flags.contains(FlipFlags::EVEN | FlipFlags::ODD) {
            return Err(DdError::InvalidParams);
        }
        if flags.contains(FlipFlags::STEREO) {
            limit_warn!(10, "Stereo flipping is not supported, flipping mono");
        }

        let chain = self.flip_chain();
        if chain.len() < 2 {
            limit_warn!(10, "Flip on surface {:?} without back buffers", self.id);
            return Err(DdError::Generic);
        }
        let members: Vec<Arc<Surface>> = match target {
            Some(target) => {
                if target.id == self.id || !chain.iter().any(|s| s.id == target.id) {
                    return Err(DdError::InvalidParams);
                }
                vec![self.clone(), target.clone()]
            }
            None => chain,
        };

        self.ctx.ensure_device()?;
        {
            let mut order: Vec<&Arc<Surface>> = members.iter().collect();
            order.sort_by_key(|s| s.id);
            let mut guards: Vec<(crate::context::SurfaceId, MutexGuard<'_, SurfaceState>)> =
                order.iter().map(|s| (s.id, s.lock_state())).collect();
            if guards.iter().any(|(_, state)| state.lock.is_some() || state.dc_out) {
                return Err(DdError::SurfaceBusy);
            }

            let position = |id| guards.iter().position(|(gid, _)| *gid == id).unwrap_or(0);
            let slots: Vec<usize> = members.iter().map(|s| position(s.id)).collect();
            let mut backings: Vec<Backing> = slots.iter().map(|&i| Backing::take(&mut guards[i].1)).collect();
            backings.rotate_left(1);
            for (backing, &i) in backings.into_iter().zip(&slots) {
                backing.put(&mut guards[i].1);
            }
        }
        for member in &members {
            member.touch();
        }

        if self.is_primary() {
            self.present_primary()?;
        }
        Ok(())
    }

    pub fn get_flip_status(&self, flags: FlipStatusFlags) -> DdResult<()> {
        if flags == FlipStatusFlags::CANFLIP {
            let state = self.live_state()?;
            if state.lock.is_some() || state.dc_out {
                return Err(DdError::SurfaceBusy);
            }
            Ok(())
        } else if flags == FlipStatusFlags::ISFLIPDONE {
            self.live_state().map(|_| ())
        } else {
            Err(DdError::InvalidParams)
        }
    }
}
