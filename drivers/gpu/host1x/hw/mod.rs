// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Per-SoC hardware configuration and hardware access
//!
//! This module contains the static per-SoC configuration tables and the [`Host1xHw`] trait,
//! which is everything the core needs from the host1x register interface. The
//! [`sim::SimHost1x`] backend implements it in software.

use crate::Result;
use std::sync::Arc;

pub mod opcodes;
pub mod sim;
pub mod tegra124;
pub mod tegra210;

/// Static hardware configuration for a given host1x revision.
#[derive(Debug)]
pub struct HwConfig {
    /// Device tree compatible string.
    pub compatible: &'static str,
    /// host1x hardware revision.
    pub version: u32,
    /// Number of channels.
    pub nb_channels: u32,
    /// Number of syncpoints.
    pub nb_pts: u32,
    /// Number of wait bases.
    pub nb_bases: u32,
    /// Number of module locks.
    pub nb_mlocks: u32,
    /// Addressable DMA range.
    pub dma_mask: u64,
    /// Number of 2-word slots in each channel's push buffer.
    pub pushbuffer_slots: u32,
    /// Width of the syncpoint index field of increment and wait commands.
    pub syncpt_index_bits: u32,
}

/// Returns the configuration for a device tree compatible string.
pub fn config_for(compatible: &str) -> Option<&'static HwConfig> {
    [&tegra124::HWCONFIG, &tegra210::HWCONFIG]
        .into_iter()
        .find(|cfg| cfg.compatible == compatible)
}

/// Handler invoked with a syncpoint id when its threshold interrupt fires.
pub type IrqHandler = Arc<dyn Fn(u32) + Send + Sync>;

/// Register-level operations of a host1x instance.
pub trait Host1xHw: Send + Sync {
    /// Returns the static configuration of this instance.
    fn config(&self) -> &'static HwConfig;

    /// Brings up the channel registers of channel `id`.
    fn channel_init(&self, id: u32) -> Result;

    /// Starts command DMA on channel `id`.
    fn cdma_start(&self, id: u32);

    /// Stops command DMA on channel `id`, dropping any unexecuted words.
    fn cdma_stop(&self, id: u32);

    /// Makes `words`, just written to the push buffer, visible to channel `id`.
    fn cdma_kick(&self, id: u32, words: &[u32]);

    /// Reads the current value of syncpoint `id`.
    fn syncpt_load(&self, id: u32) -> u32;

    /// Increments syncpoint `id` from the CPU.
    fn syncpt_cpu_incr(&self, id: u32);

    /// Programs the threshold interrupt of syncpoint `id` and enables it.
    fn intr_set_syncpt_threshold(&self, id: u32, threshold: u32);

    /// Disables the threshold interrupt of syncpoint `id`.
    fn intr_disable_syncpt(&self, id: u32);

    /// Installs the syncpoint threshold interrupt handler.
    fn set_syncpt_irq_handler(&self, handler: IrqHandler);
}
