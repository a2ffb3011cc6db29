// SPDX-License-Identifier: GPL-2.0-only OR MIT
#![allow(non_camel_case_types)]

//! Tegra DRM user space API
//!
//! Argument structures of the Tegra DRM ioctls. All structures are `#[repr(C)]` with explicit
//! padding, so they can be decoded from and encoded to raw argument bytes directly.

use bitflags::bitflags;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

pub const DRM_TEGRA_GEM_CREATE: u32 = 0x00;
pub const DRM_TEGRA_SYNCPT_READ: u32 = 0x02;
pub const DRM_TEGRA_SYNCPT_INCR: u32 = 0x03;
pub const DRM_TEGRA_SYNCPT_WAIT: u32 = 0x04;
pub const DRM_TEGRA_CHANNEL_OPEN: u32 = 0x10;
pub const DRM_TEGRA_CHANNEL_CLOSE: u32 = 0x11;
pub const DRM_TEGRA_CHANNEL_MAP: u32 = 0x12;
pub const DRM_TEGRA_CHANNEL_UNMAP: u32 = 0x13;
pub const DRM_TEGRA_CHANNEL_SUBMIT: u32 = 0x14;
pub const DRM_TEGRA_SYNCPOINT_ALLOCATE: u32 = 0x20;
pub const DRM_TEGRA_SYNCPOINT_FREE: u32 = 0x21;

/// `drm_tegra_syncpt_wait::timeout` value that waits forever.
pub const DRM_TEGRA_NO_TIMEOUT: u32 = 0xffff_ffff;

pub const DRM_TEGRA_SUBMIT_CMD_GATHER_UPTR: u32 = 0;
pub const DRM_TEGRA_SUBMIT_CMD_WAIT_SYNCPT: u32 = 1;
pub const DRM_TEGRA_SUBMIT_CMD_WAIT_SYNC_FILE: u32 = 2;

bitflags! {
    /// `drm_tegra_gem_create::flags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GemCreateFlags: u32 {
        const TILED = 1 << 0;
        const BOTTOM_UP = 1 << 1;
    }
}

bitflags! {
    /// Access of an engine to a mapped buffer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChannelMapFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

bitflags! {
    /// `drm_tegra_submit_buf::flags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SubmitBufFlags: u32 {
        /// The relocated address points at a block-linear surface.
        const RELOC_BLOCKLINEAR = 1 << 0;
        /// The job reads the buffer. Waits for the last writer.
        const RESV_READ = 1 << 1;
        /// The job writes the buffer. Waits for every earlier access.
        const RESV_WRITE = 1 << 2;
    }
}

bitflags! {
    /// `drm_tegra_submit_syncpt_incr::flags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SyncptIncrFlags: u32 {
        /// Return a sync file for the job's completion fence.
        const CREATE_SYNC_FILE = 1 << 0;
    }
}

#[derive(Copy, Clone, Debug, Default, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct drm_tegra_gem_create {
    pub size: u64,
    pub flags: u32,
    pub handle: u32,
}

#[derive(Copy, Clone, Debug, Default, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct drm_tegra_syncpt_read {
    pub id: u32,
    pub value: u32,
}

#[derive(Copy, Clone, Debug, Default, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct drm_tegra_syncpt_incr {
    pub id: u32,
    pub pad: u32,
}

#[derive(Copy, Clone, Debug, Default, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct drm_tegra_syncpt_wait {
    pub id: u32,
    pub thresh: u32,
    /// Milliseconds, or [`DRM_TEGRA_NO_TIMEOUT`].
    pub timeout: u32,
    pub value: u32,
}

#[derive(Copy, Clone, Debug, Default, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct drm_tegra_channel_open {
    pub host1x_class: u32,
    pub flags: u32,
    pub channel_ctx: u32,
    pub hardware_version: u32,
}

#[derive(Copy, Clone, Debug, Default, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct drm_tegra_channel_close {
    pub channel_ctx: u32,
    pub reserved: u32,
}

#[derive(Copy, Clone, Debug, Default, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct drm_tegra_channel_map {
    pub channel_ctx: u32,
    pub handle: u32,
    pub flags: u32,
    pub mapping_id: u32,
}

#[derive(Copy, Clone, Debug, Default, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct drm_tegra_channel_unmap {
    pub channel_ctx: u32,
    pub mapping_id: u32,
}

#[derive(Copy, Clone, Debug, Default, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct drm_tegra_submit_reloc {
    /// Byte offset added to the buffer's device address.
    pub target_offset: u64,
    /// Gather data word that receives the address.
    pub gather_offset_words: u32,
    /// Right shift applied to the address.
    pub shift: u32,
}

#[derive(Copy, Clone, Debug, Default, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct drm_tegra_submit_buf {
    pub mapping_id: u32,
    pub flags: u32,
    pub reloc: drm_tegra_submit_reloc,
    pub reserved: [u64; 2],
}

#[derive(Copy, Clone, Debug, Default, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct drm_tegra_submit_syncpt_incr {
    pub syncpt_fd: i32,
    pub flags: u32,
    pub num_incrs: u32,
    pub fence_value: u32,
    pub sync_file_fd: i32,
    pub reserved: [u32; 3],
}

/// A submission command. The meaning of `data` depends on `type_`:
///
/// - `GATHER_UPTR`: `[words, reserved, reserved, reserved]`
/// - `WAIT_SYNCPT`: `[id, threshold, reserved, reserved]`
/// - `WAIT_SYNC_FILE`: `[fd, reserved, reserved, reserved]`
#[derive(Copy, Clone, Debug, Default, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct drm_tegra_submit_cmd {
    pub type_: u32,
    pub flags: u32,
    pub data: [u32; 4],
}

impl drm_tegra_submit_cmd {
    pub fn gather_uptr(words: u32) -> Self {
        drm_tegra_submit_cmd {
            type_: DRM_TEGRA_SUBMIT_CMD_GATHER_UPTR,
            flags: 0,
            data: [words, 0, 0, 0],
        }
    }

    pub fn wait_syncpt(id: u32, threshold: u32) -> Self {
        drm_tegra_submit_cmd {
            type_: DRM_TEGRA_SUBMIT_CMD_WAIT_SYNCPT,
            flags: 0,
            data: [id, threshold, 0, 0],
        }
    }

    pub fn wait_sync_file(fd: i32) -> Self {
        drm_tegra_submit_cmd {
            type_: DRM_TEGRA_SUBMIT_CMD_WAIT_SYNC_FILE,
            flags: 0,
            data: [fd as u32, 0, 0, 0],
        }
    }
}

#[derive(Copy, Clone, Debug, Default, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct drm_tegra_channel_submit {
    pub channel_ctx: u32,
    pub num_bufs: u32,
    pub num_cmds: u32,
    pub gather_data_words: u32,
    pub bufs_ptr: u64,
    pub cmds_ptr: u64,
    pub gather_data_ptr: u64,
    pub reserved0: u32,
    pub reserved1: u32,
    pub syncpt_incrs: [drm_tegra_submit_syncpt_incr; 2],
}

#[derive(Copy, Clone, Debug, Default, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct drm_tegra_syncpoint_allocate {
    pub fd: i32,
    pub reserved: u32,
}

#[derive(Copy, Clone, Debug, Default, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct drm_tegra_syncpoint_free {
    pub fd: i32,
    pub reserved: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::size_of;

    #[test]
    fn layout() {
        assert_eq!(size_of::<drm_tegra_submit_buf>(), 40);
        assert_eq!(size_of::<drm_tegra_submit_syncpt_incr>(), 32);
        assert_eq!(size_of::<drm_tegra_submit_cmd>(), 24);
        assert_eq!(size_of::<drm_tegra_channel_submit>(), 112);
        assert_eq!(size_of::<drm_tegra_gem_create>(), 16);
    }

    #[test]
    fn decode_from_bytes() {
        let cmd = drm_tegra_submit_cmd::wait_syncpt(7, 42);
        let decoded = drm_tegra_submit_cmd::read_from(cmd.as_bytes()).unwrap();
        assert_eq!(decoded.type_, DRM_TEGRA_SUBMIT_CMD_WAIT_SYNCPT);
        assert_eq!(decoded.data[..2], [7, 42]);
        assert!(drm_tegra_submit_cmd::read_from(&[0u8; 8][..]).is_none());
    }
}
