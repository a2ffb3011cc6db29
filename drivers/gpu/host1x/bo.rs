// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Buffer objects as seen by host1x
//!
//! host1x does not allocate memory for clients. Anything a channel or engine reads needs to be
//! a [`Host1xBo`], and is pinned for a specific client device before use: mapped into the
//! device's IOMMU domain, or addressed physically when the device has none.

use crate::debug::*;
use crate::dev::ClientDevice;
use crate::fault::FaultPoint;
use crate::iommu::IommuDomain;
use crate::{Error, Result};
use std::sync::Arc;

const DEBUG_CLASS: DebugFlags = DebugFlags::Iommu;

/// A buffer that can be made accessible to host1x clients.
pub trait Host1xBo: Send + Sync {
    /// Size of the buffer in bytes.
    fn size(&self) -> u64;

    /// Physical address of the (contiguous) backing memory.
    fn phys(&self) -> u64;
}

/// A buffer pinned for access by one client device. Unpinned on drop.
pub struct PinnedBo {
    bo: Arc<dyn Host1xBo>,
    domain: Option<Arc<IommuDomain>>,
    addr: u64,
}

impl PinnedBo {
    /// Pins `bo` for access by `dev`.
    pub fn pin(bo: Arc<dyn Host1xBo>, dev: &ClientDevice) -> Result<PinnedBo> {
        if dev.host().faults().should_fail(FaultPoint::Pin) {
            return Err(Error::NoMemory);
        }

        let domain = dev.domain().cloned();
        let addr = match domain.as_ref() {
            Some(domain) => domain.map(bo.phys(), bo.size())?,
            None => bo.phys(),
        };

        mod_dev_dbg!(dev, "pinned {:#x} bytes at {:#x}", bo.size(), addr);

        Ok(PinnedBo { bo, domain, addr })
    }

    /// Returns the address the device accesses the buffer at.
    pub fn dma_addr(&self) -> u64 {
        self.addr
    }

    /// Returns the pinned buffer.
    pub fn bo(&self) -> &Arc<dyn Host1xBo> {
        &self.bo
    }
}

impl Drop for PinnedBo {
    fn drop(&mut self) {
        if let Some(domain) = self.domain.as_ref() {
            if let Err(e) = domain.unmap(self.addr) {
                log::error!(
                    "host1x: failed to unpin {:#x} from {}: {:?}",
                    self.addr,
                    domain.name(),
                    e
                );
            }
        }
    }
}
