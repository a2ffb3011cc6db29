// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! host1x device
//!
//! [`Host1x`] ties together the hardware backend, the syncpoint and channel pools and the
//! interrupt dispatch of one host1x instance. Engine drivers register as [`ClientDevice`]s,
//! through which they request channels and pin buffers.

use crate::channel::ChannelList;
use crate::debug::*;
use crate::fault::FaultInjector;
use crate::hw::{Host1xHw, HwConfig};
use crate::intr::Intr;
use crate::iommu::{IommuDomain, RangeAllocator, PAGE_SIZE};
use crate::syncpt::{SyncptFlags, SyncptList, SyncptRef};
use crate::{Error, Result};
use dma_buf::dma_fence::FenceContexts;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

const DEBUG_CLASS: DebugFlags = DebugFlags::Hw;

/// Base of the physical carveout used for buffers of clients without an IOMMU domain.
const CARVEOUT_BASE: u64 = 0x8000_0000;
/// Size of the physical carveout.
const CARVEOUT_SIZE: u64 = 0x4000_0000;

/// A host1x instance.
pub struct Host1x {
    name: String,
    hw: Arc<dyn Host1xHw>,
    syncpts: SyncptList,
    intr: Intr,
    channels: ChannelList,
    faults: FaultInjector,
    carveout: Mutex<RangeAllocator>,
    syncpt_fences: FenceContexts,
    timeline_fences: FenceContexts,
}

impl Host1x {
    /// Brings up a host1x instance on top of a hardware backend.
    pub fn new(name: &str, hw: Arc<dyn Host1xHw>) -> Arc<Host1x> {
        let config = hw.config();

        let host = Arc::new_cyclic(|weak| {
            let syncpts = SyncptList::new(&hw, weak);
            let intr = Intr::new(hw.clone(), syncpts.all());

            Host1x {
                name: name.to_owned(),
                channels: ChannelList::new(&hw),
                syncpts,
                intr,
                faults: FaultInjector::new(),
                carveout: Mutex::new(RangeAllocator::new(CARVEOUT_BASE, CARVEOUT_SIZE)),
                syncpt_fences: FenceContexts::new(config.nb_pts, "host1x-syncpt"),
                timeline_fences: FenceContexts::new(1, "host1x-timeline"),
                hw: hw.clone(),
            }
        });

        let weak = Arc::downgrade(&host);
        hw.set_syncpt_irq_handler(Arc::new(move |id| {
            if let Some(host) = weak.upgrade() {
                host.intr.handle_syncpt(id);
            }
        }));

        dev_info!(
            host,
            "{}: {} channels, {} syncpoints",
            config.compatible,
            config.nb_channels,
            config.nb_pts
        );

        host
    }

    /// Returns the device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the hardware backend.
    pub fn hw(&self) -> &Arc<dyn Host1xHw> {
        &self.hw
    }

    /// Returns the static hardware configuration.
    pub fn config(&self) -> &'static HwConfig {
        self.hw.config()
    }

    /// Returns the syncpoint pool.
    pub fn syncpts(&self) -> &SyncptList {
        &self.syncpts
    }

    /// Returns the threshold interrupt dispatch.
    pub fn intr(&self) -> &Intr {
        &self.intr
    }

    /// Returns the channel pool.
    pub fn channels(&self) -> &ChannelList {
        &self.channels
    }

    /// Returns the fault injection state.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Allocates a syncpoint.
    pub fn syncpt_alloc(&self, flags: SyncptFlags, name: &str) -> Result<SyncptRef> {
        self.syncpts.alloc(flags, name)
    }

    /// Takes a reference to allocated syncpoint `id`.
    pub fn syncpt_get(&self, id: u32) -> Option<SyncptRef> {
        self.syncpts.get_by_id(id)
    }

    /// Returns the fence context of syncpoint `id`.
    pub fn syncpt_fence_context(&self, id: u32) -> u64 {
        self.syncpt_fences.context(id)
    }

    /// Returns the fence context used for merged gate dependencies.
    pub fn timeline_fence_context(&self) -> u64 {
        self.timeline_fences.context(0)
    }

    /// Allocates physically contiguous memory from the carveout.
    pub fn alloc_phys(&self, size: u64) -> Result<u64> {
        if size == 0 {
            return Err(Error::Invalid);
        }
        let size = size.checked_next_multiple_of(PAGE_SIZE).ok_or(Error::Invalid)?;
        self.carveout
            .lock()
            .alloc(size, PAGE_SIZE)
            .ok_or(Error::NoMemory)
    }

    /// Frees carveout memory allocated with [`Host1x::alloc_phys`].
    pub fn free_phys(&self, phys: u64) {
        if self.carveout.lock().free(phys).is_none() {
            dev_warn!(self, "freeing unknown carveout address {:#x}", phys);
        }
    }

    /// Shuts the instance down when the device goes away.
    ///
    /// Every blocked channel request, push buffer wait, syncpoint wait and syncpoint fence wait
    /// returns `Error::Interrupted`, and so does every later one. Pending syncpoint fences are
    /// canceled.
    pub fn shutdown(&self) {
        dev_info!(self, "shutting down");
        self.channels.shutdown();
        self.intr.shutdown();
    }

    /// Checks every channel for timed out jobs. Returns the channels newly marked hung.
    pub fn check_timeouts(&self, now: Instant) -> Vec<u32> {
        if debug_enabled(DebugFlags::NoJobTimeout) {
            return Vec::new();
        }

        let mut hung = Vec::new();
        for (id, cdma) in self.channels.cdmas() {
            if cdma.check_timeout(now) {
                dev_err!(self, "channel {} hung", id);
                hung.push(id);
            }
        }
        hung
    }

    /// Registers an engine client of class `class`.
    pub fn register_client(
        self: &Arc<Self>,
        name: &str,
        class: u32,
        domain: Option<Arc<IommuDomain>>,
    ) -> Arc<ClientDevice> {
        mod_dev_dbg!(self, "registered client {} (class {:#x})", name, class);
        Arc::new(ClientDevice {
            name: name.to_owned(),
            class,
            host: self.clone(),
            domain,
        })
    }
}

/// An engine driver bound to host1x.
pub struct ClientDevice {
    name: String,
    class: u32,
    host: Arc<Host1x>,
    domain: Option<Arc<IommuDomain>>,
}

impl ClientDevice {
    /// Returns the device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the host1x class of the engine.
    pub fn class(&self) -> u32 {
        self.class
    }

    /// Returns the host1x instance.
    pub fn host(&self) -> &Arc<Host1x> {
        &self.host
    }

    /// Returns the IOMMU domain of the device, if it sits behind the SMMU.
    pub fn domain(&self) -> Option<&Arc<IommuDomain>> {
        self.domain.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::{sim::SimHost1x, tegra124};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn bring_up() {
        let sim = SimHost1x::new(&tegra124::HWCONFIG);
        sim.write_syncpt(7, 1234);
        let host = Host1x::new("host1x", sim);

        assert_eq!(host.config().nb_channels, 12);
        assert_eq!(host.channels().free_count(), 12);
        assert_eq!(host.syncpts().get_by_id_noref(7).unwrap().read_min(), 1234);
        assert_ne!(host.syncpt_fence_context(0), host.syncpt_fence_context(1));
    }

    #[test]
    fn carveout() {
        let host = Host1x::new("host1x", SimHost1x::new(&tegra124::HWCONFIG));
        let a = host.alloc_phys(0x1800).unwrap();
        let b = host.alloc_phys(0x1000).unwrap();
        assert_eq!(a, CARVEOUT_BASE);
        assert_eq!(b, CARVEOUT_BASE + 0x2000);
        host.free_phys(a);
        assert_eq!(host.alloc_phys(0x1000).unwrap(), CARVEOUT_BASE);
        assert_eq!(host.alloc_phys(0), Err(Error::Invalid));
    }

    #[test]
    fn shutdown_interrupts_waits() {
        let host = Host1x::new("host1x", SimHost1x::new(&tegra124::HWCONFIG));
        let sp = host.syncpt_alloc(SyncptFlags::empty(), "wait").unwrap();
        let t = sp.incr_max(1);
        let fence = crate::fence::create(&sp, t).unwrap();

        let sp_waiter = {
            let sp = sp.clone();
            thread::spawn(move || sp.wait(t, Duration::MAX))
        };
        let fence_waiter = {
            let fence = fence.clone();
            thread::spawn(move || fence.wait(None))
        };

        thread::sleep(Duration::from_millis(20));
        host.shutdown();

        assert_eq!(sp_waiter.join().unwrap(), Err(Error::Interrupted));
        assert_eq!(fence_waiter.join().unwrap(), Err(dma_buf::Error::Interrupted));
        assert_eq!(fence.error(), dma_buf::dma_fence::ECANCELED);
        assert_eq!(host.intr().pending(sp.id()), 0);

        // Later waits fail right away, unless already satisfied.
        assert_eq!(sp.wait(t, Duration::MAX), Err(Error::Interrupted));
        sp.cpu_incr();
        assert_eq!(sp.wait(t, Duration::MAX), Ok(t));
    }
}
