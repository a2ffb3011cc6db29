// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! VIC (Video Image Compositor) client
//!
//! VIC is a Falcon-based engine of host class 0x5D. The driver requests one host1x channel for
//! it at initialization time, and every channel context opened against VIC shares that channel.
//! The Falcon firmware is booted lazily, the first time the engine is powered up after being
//! suspended.

use crate::drm::Client;
use crate::params::ModuleParams;
use crate::pm::{RuntimePm, RuntimePmOps};
use crate::{Error, Result};
use host1x::debug::*;
use host1x::hw::opcodes::CLASS_VIC;
use host1x::iommu::IommuDomain;
use host1x::{Channel, ClientDevice, Host1x};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

const DEBUG_CLASS: DebugFlags = DebugFlags::Vic;

/// Per-SoC VIC configuration.
struct VicConfig {
    compatible: &'static str,
    firmware: &'static str,
    version: u32,
}

static VIC_CONFIGS: [VicConfig; 2] = [
    VicConfig {
        compatible: "nvidia,tegra124-host1x",
        firmware: "nvidia/tegra124/vic03_ucode.bin",
        version: 0x40,
    },
    VicConfig {
        compatible: "nvidia,tegra210-host1x",
        firmware: "nvidia/tegra210/vic04_fw.bin",
        version: 0x21,
    },
];

/// Falcon state of the engine.
struct VicFalcon {
    name: String,
    firmware: &'static str,
    booted: AtomicBool,
    boots: AtomicU32,
}

impl VicFalcon {
    fn name(&self) -> &str {
        &self.name
    }

    fn boot(&self) -> Result {
        if self.booted.load(Ordering::Acquire) {
            return Ok(());
        }

        mod_dev_dbg!(self, "booting falcon ({})", self.firmware);
        self.boots.fetch_add(1, Ordering::Relaxed);
        self.booted.store(true, Ordering::Release);
        Ok(())
    }
}

impl RuntimePmOps for VicFalcon {
    fn runtime_resume(&self) -> Result {
        self.boot()
    }

    fn runtime_suspend(&self) {
        self.booted.store(false, Ordering::Release);
    }
}

/// The VIC engine.
pub struct Vic {
    dev: Arc<ClientDevice>,
    channel: Channel,
    falcon: Arc<VicFalcon>,
    pm: Arc<RuntimePm>,
    version: u32,
}

impl Vic {
    /// Registers VIC with `host` and requests its channel.
    pub fn init(
        host: &Arc<Host1x>,
        domain: Option<Arc<IommuDomain>>,
        params: &ModuleParams,
    ) -> Result<Arc<Vic>> {
        let compatible = host.config().compatible;
        let config = VIC_CONFIGS
            .iter()
            .find(|c| c.compatible == compatible)
            .ok_or(Error::NoDevice)?;

        let dev = host.register_client("vic", CLASS_VIC, domain);

        let channel = Channel::request(&dev, false).map_err(|e| {
            dev_err!(dev, "failed to request channel: {:?}", e);
            e
        })?;

        let falcon = Arc::new(VicFalcon {
            name: dev.name().to_owned(),
            firmware: config.firmware,
            booted: AtomicBool::new(false),
            boots: AtomicU32::new(0),
        });
        let pm = RuntimePm::new(
            dev.name(),
            host,
            falcon.clone(),
            params.autosuspend_delay(),
        );

        dev_info!(dev, "channel {}, version {:#x}", channel.id(), config.version);

        Ok(Arc::new(Vic {
            dev,
            channel,
            falcon,
            pm,
            version: config.version,
        }))
    }

    /// Returns the channel shared by all VIC contexts.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Returns whether the Falcon firmware is running.
    pub fn is_booted(&self) -> bool {
        self.falcon.booted.load(Ordering::Acquire)
    }

    /// Returns how many times the Falcon was booted.
    pub fn boot_count(&self) -> u32 {
        self.falcon.boots.load(Ordering::Relaxed)
    }
}

impl Client for Vic {
    fn device(&self) -> &Arc<ClientDevice> {
        &self.dev
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn open_channel(&self) -> Result<Channel> {
        let _pm = self.pm.get_sync()?;
        Ok(self.channel.clone())
    }

    fn runtime_pm(&self) -> &Arc<RuntimePm> {
        &self.pm
    }
}
