// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Top-level Tegra DRM device
//!
//! [`TegraDrm`] owns the module-level state of one device: the host1x instance, the registry of
//! engine clients, the lock class shared by all buffer reservation objects and the sequence
//! counters used to tag files and submissions in log messages.

use crate::file::File;
use crate::params::ModuleParams;
use crate::pm::RuntimePm;
use crate::user_ptr::AddressSpace;
use crate::vic::Vic;
use crate::Result;
use dma_buf::{FdTable, WwClass};
use host1x::debug::*;
use host1x::iommu::IommuDomain;
use host1x::{Channel, ClientDevice, Host1x};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const DEBUG_CLASS: DebugFlags = DebugFlags::Drm;

/// Base of the IOVA space shared by the engines.
const IOVA_BASE: u64 = 0x1000_0000;
/// Size of the IOVA space shared by the engines.
const IOVA_SIZE: u64 = 0x4000_0000;

/// An engine driver exposed through the DRM device.
pub trait Client: Send + Sync {
    /// Returns the host1x device of the engine.
    fn device(&self) -> &Arc<ClientDevice>;
    /// Returns the engine's hardware version, as reported to user space.
    fn version(&self) -> u32;
    /// Returns a reference to the channel a new context submits to.
    fn open_channel(&self) -> Result<Channel>;
    /// Returns the power state of the engine.
    fn runtime_pm(&self) -> &Arc<RuntimePm>;

    /// Returns the host1x class of the engine.
    fn class(&self) -> u32 {
        self.device().class()
    }
}

/// A unique ID counter.
pub(crate) struct ID(AtomicU64);

impl ID {
    fn new(val: u64) -> ID {
        ID(AtomicU64::new(val))
    }

    /// Fetch the next unique ID.
    pub(crate) fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for ID {
    /// IDs default to starting at 2, as 0/1 are considered reserved for the system.
    fn default() -> Self {
        Self::new(2)
    }
}

/// Sequence counters for driver objects.
#[derive(Default)]
pub(crate) struct SequenceIDs {
    /// `File` instance ID.
    pub(crate) file: ID,
    /// Submission instance ID.
    pub(crate) submission: ID,
}

/// A Tegra DRM device.
pub struct TegraDrm {
    host: Arc<Host1x>,
    params: ModuleParams,
    domain: Arc<IommuDomain>,
    clients: Mutex<Vec<Arc<dyn Client>>>,
    resv_class: Arc<WwClass>,
    ids: SequenceIDs,
}

impl TegraDrm {
    /// Creates a device with no clients on top of `host`. Applies `params`.
    pub fn new(host: Arc<Host1x>, params: ModuleParams) -> Arc<TegraDrm> {
        params.apply();

        Arc::new(TegraDrm {
            host,
            params,
            domain: IommuDomain::new("tegra-drm", IOVA_BASE, IOVA_SIZE),
            clients: Mutex::new(Vec::new()),
            resv_class: WwClass::new("reservation_ww_class"),
            ids: Default::default(),
        })
    }

    /// Brings up the device and its engines.
    pub fn probe(host: Arc<Host1x>, params: ModuleParams) -> Result<Arc<TegraDrm>> {
        let drm = TegraDrm::new(host, params);

        dev_info!(drm, "Probing...");

        let vic = Vic::init(&drm.host, Some(drm.domain.clone()), &drm.params)?;
        drm.register_client(vic);

        Ok(drm)
    }

    pub fn name(&self) -> &str {
        self.host.name()
    }

    pub fn host(&self) -> &Arc<Host1x> {
        &self.host
    }

    pub fn params(&self) -> &ModuleParams {
        &self.params
    }

    /// Returns the IOMMU domain the engines share.
    pub fn domain(&self) -> &Arc<IommuDomain> {
        &self.domain
    }

    /// Returns the lock class of buffer reservation objects.
    pub fn resv_class(&self) -> &Arc<WwClass> {
        &self.resv_class
    }

    pub(crate) fn ids(&self) -> &SequenceIDs {
        &self.ids
    }

    /// Adds an engine client.
    pub fn register_client(&self, client: Arc<dyn Client>) {
        mod_dev_dbg!(
            self,
            "registered client {} (class {:#x})",
            client.device().name(),
            client.class()
        );
        self.clients.lock().push(client);
    }

    /// Returns the client driving host1x class `class`.
    pub fn client_by_class(&self, class: u32) -> Option<Arc<dyn Client>> {
        self.clients
            .lock()
            .iter()
            .find(|c| c.class() == class)
            .cloned()
    }

    /// Opens a new file on the device for a process with address space `mm` and descriptor
    /// table `fds`.
    pub fn open(self: &Arc<Self>, mm: Arc<AddressSpace>, fds: Arc<FdTable>) -> File {
        let id = self.ids.file.next();
        mod_dev_dbg!(self, "[File {}]: Opening...", id);
        File::new(self.clone(), id, mm, fds)
    }
}
