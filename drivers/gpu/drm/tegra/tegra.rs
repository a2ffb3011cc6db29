// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! NVIDIA Tegra DRM driver
//!
//! The user-facing half of the host1x stack. A [`TegraDrm`] device sits on top of a
//! [`host1x::Host1x`] instance and exposes its engines to user space: each open [`File`] can
//! create buffer objects, open channel contexts against an engine, map buffers into them and
//! submit command streams with [`submit::channel_submit`]. Submissions synchronize with each
//! other through syncpoint fences, sync files and the reservation objects of the buffers they
//! touch.
//!
//! The driver is organized into the following modules:
//! - `drm`: The device, its client registry and module-level state.
//! - `file`: Per-open-file state and the non-submission ioctls.
//! - `submit`: The channel submission ioctl.
//! - `context`: Channel contexts and buffer mappings.
//! - `gem`: Buffer objects and kernel-owned gather buffers.
//! - `vic`: The VIC engine client.
//! - `pm`: Runtime power management of engines.
//! - `uapi`: Ioctl argument structures.
//! - `user_ptr`: Access to the caller's memory.
//! - `ioctl`: Ioctl number dispatch.
//! - `params`: Module parameters.

pub mod context;
pub mod drm;
mod error;
pub mod file;
pub mod gem;
pub mod ioctl;
pub mod params;
pub mod pm;
pub mod submit;
pub mod uapi;
pub mod user_ptr;
pub mod vic;

pub use drm::TegraDrm;
pub use error::{Error, ErrorClass, Result};
pub use file::File;
