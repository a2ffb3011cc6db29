// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! NVIDIA Tegra host1x driver
//!
//! host1x is the DMA engine feeding command streams to the multimedia engines of Tegra SoCs
//! (display, 2D/3D, VIC, video codecs). It provides a fixed set of hardware channels, each
//! executing a push buffer of commands in order, and a fixed set of syncpoints: 32-bit hardware
//! counters that engines increment as they finish work, and that channels and the CPU can wait
//! on.
//!
//! This crate manages the channel pool, builds and submits jobs, tracks syncpoint values and
//! dispatches threshold interrupts, and exposes syncpoint thresholds as generic fences.
//! Everything hangs off a [`Host1x`] instance created at device bring-up from a hardware
//! backend implementing [`hw::Host1xHw`].

// Re-exported for the logging macros.
#[doc(hidden)]
pub use log;

pub mod bo;
mod cdma;
pub mod channel;
pub mod debug;
pub mod dev;
mod error;
pub mod fault;
pub mod fence;
pub mod hw;
pub mod intr;
pub mod iommu;
pub mod job;
pub mod syncpt;

pub use channel::Channel;
pub use dev::{ClientDevice, Host1x};
pub use error::{Error, Result};
pub use job::Job;
pub use syncpt::{Syncpt, SyncptRef};
