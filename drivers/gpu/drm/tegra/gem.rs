// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Tegra DRM buffer objects
//!
//! [`TegraBo`] is the driver's GEM object: physically contiguous memory from the host1x
//! carveout, together with the reservation object through which submissions order their
//! accesses to it. [`GatherBo`] is the kernel-owned copy of the command words of one
//! submission, which relocations are patched into before it is handed to the channel.

use crate::drm::TegraDrm;
use crate::uapi::GemCreateFlags;
use crate::{Error, Result};
use dma_buf::DmaResv;
use host1x::bo::Host1xBo;
use host1x::debug::*;
use host1x::Host1x;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const DEBUG_CLASS: DebugFlags = DebugFlags::Gem;

static GEM_ID: AtomicU64 = AtomicU64::new(0);

/// A GEM buffer object.
pub struct TegraBo {
    /// ID for debug
    id: u64,
    host: Arc<Host1x>,
    phys: u64,
    size: u64,
    flags: GemCreateFlags,
    resv: DmaResv,
}

impl TegraBo {
    /// Allocates a buffer object of `size` bytes.
    pub fn new(drm: &TegraDrm, size: u64, flags: u32) -> Result<Arc<TegraBo>> {
        let flags = GemCreateFlags::from_bits(flags).ok_or(Error::Invalid)?;
        if size == 0 {
            return Err(Error::Invalid);
        }

        let host = drm.host().clone();
        let phys = host.alloc_phys(size)?;
        let id = GEM_ID.fetch_add(1, Ordering::Relaxed);

        mod_pr_debug!("gem: bo {}: {:#x} bytes at {:#x}", id, size, phys);

        Ok(Arc::new(TegraBo {
            id,
            host,
            phys,
            size,
            flags,
            resv: DmaResv::new(drm.resv_class()),
        }))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn flags(&self) -> GemCreateFlags {
        self.flags
    }

    /// Returns the reservation object of the buffer.
    pub fn resv(&self) -> &DmaResv {
        &self.resv
    }
}

impl Host1xBo for TegraBo {
    fn size(&self) -> u64 {
        self.size
    }

    fn phys(&self) -> u64 {
        self.phys
    }
}

impl Drop for TegraBo {
    fn drop(&mut self) {
        mod_pr_debug!("gem: bo {}: freeing", self.id);
        self.host.free_phys(self.phys);
    }
}

/// Command words of one submission, copied from user space.
pub struct GatherBo {
    host: Arc<Host1x>,
    phys: u64,
    words: Mutex<Vec<u32>>,
}

impl GatherBo {
    /// Takes ownership of `words` and backs them with device-visible memory.
    pub fn new(host: &Arc<Host1x>, words: Vec<u32>) -> Result<Arc<GatherBo>> {
        let bytes = (words.len() as u64) * 4;
        let phys = host.alloc_phys(bytes)?;

        Ok(Arc::new(GatherBo {
            host: host.clone(),
            phys,
            words: Mutex::new(words),
        }))
    }

    /// Returns the number of words.
    pub fn len(&self) -> u32 {
        self.words.lock().len() as u32
    }

    /// Returns whether the gather holds no words.
    pub fn is_empty(&self) -> bool {
        self.words.lock().is_empty()
    }

    /// Overwrites word `offset` with `value`.
    pub fn write_reloc(&self, offset: u32, value: u32) -> Result {
        let mut words = self.words.lock();
        let word = words.get_mut(offset as usize).ok_or(Error::Invalid)?;
        *word = value;
        Ok(())
    }

    /// Returns a copy of the words.
    pub fn words(&self) -> Vec<u32> {
        self.words.lock().clone()
    }
}

impl Host1xBo for GatherBo {
    fn size(&self) -> u64 {
        self.words.lock().len() as u64 * 4
    }

    fn phys(&self) -> u64 {
        self.phys
    }
}

impl Drop for GatherBo {
    fn drop(&mut self) {
        self.host.free_phys(self.phys);
    }
}
