// SPDX-License-Identifier: GPL-2.0-only OR MIT
#![allow(dead_code)]

//! Shared setup for the end-to-end tests.

use dma_buf::FdTable;
use host1x::hw::opcodes::CLASS_VIC;
use host1x::hw::{sim::SimHost1x, tegra124};
use host1x::Host1x;
use std::sync::Arc;
use tegra_drm::params::ModuleParams;
use tegra_drm::uapi::*;
use tegra_drm::user_ptr::AddressSpace;
use tegra_drm::{File, TegraDrm};

pub struct Device {
    pub sim: Arc<SimHost1x>,
    pub drm: Arc<TegraDrm>,
    pub mm: Arc<AddressSpace>,
    pub fds: Arc<FdTable>,
}

impl Device {
    pub fn new() -> Device {
        let sim = SimHost1x::new(&tegra124::HWCONFIG);
        let host = Host1x::new("host1x", sim.clone());
        let drm = TegraDrm::probe(host, ModuleParams::default()).unwrap();

        Device {
            sim,
            drm,
            mm: AddressSpace::new(),
            fds: Arc::new(FdTable::new()),
        }
    }

    /// Opens a file with a VIC context and a syncpoint of its own.
    pub fn client(&self) -> Client {
        let file = self.drm.open(self.mm.clone(), self.fds.clone());

        let mut open = drm_tegra_channel_open {
            host1x_class: CLASS_VIC,
            ..Default::default()
        };
        file.channel_open(&mut open).unwrap();

        let mut alloc = drm_tegra_syncpoint_allocate::default();
        file.syncpoint_allocate(&mut alloc).unwrap();

        Client {
            file,
            ctx: open.channel_ctx,
            syncpt_fd: alloc.fd,
        }
    }
}

pub struct Client {
    pub file: File,
    pub ctx: u32,
    pub syncpt_fd: i32,
}

impl Client {
    /// Creates a buffer object and maps it. Returns the GEM handle and the mapping id.
    pub fn create_mapped(&self, size: u64) -> (u32, u32) {
        let mut gem = drm_tegra_gem_create {
            size,
            ..Default::default()
        };
        self.file.gem_create(&mut gem).unwrap();
        (gem.handle, self.map(gem.handle))
    }

    pub fn map(&self, handle: u32) -> u32 {
        let mut map = drm_tegra_channel_map {
            channel_ctx: self.ctx,
            handle,
            flags: ChannelMapFlags::READ_WRITE.bits(),
            mapping_id: 0,
        };
        self.file.channel_map(&mut map).unwrap();
        map.mapping_id
    }

    /// Builds submit arguments with one increment of the client's syncpoint.
    pub fn submit_args(
        &self,
        words: &[u32],
        bufs: &[drm_tegra_submit_buf],
        cmds: &[drm_tegra_submit_cmd],
    ) -> drm_tegra_channel_submit {
        let mm = self.file.mm();
        let mut data = drm_tegra_channel_submit {
            channel_ctx: self.ctx,
            num_bufs: bufs.len() as u32,
            num_cmds: cmds.len() as u32,
            gather_data_words: words.len() as u32,
            bufs_ptr: mm.alloc_slice(bufs),
            cmds_ptr: mm.alloc_slice(cmds),
            gather_data_ptr: mm.alloc_slice(words),
            ..Default::default()
        };
        data.syncpt_incrs[0].syncpt_fd = self.syncpt_fd;
        data.syncpt_incrs[0].num_incrs = 1;
        data
    }

    /// Submits a single gather of `words` with the given buffers.
    pub fn submit(
        &self,
        words: &[u32],
        bufs: &[drm_tegra_submit_buf],
    ) -> tegra_drm::Result<drm_tegra_channel_submit> {
        let cmds = [drm_tegra_submit_cmd::gather_uptr(words.len() as u32)];
        let mut data = self.submit_args(words, bufs, &cmds);
        tegra_drm::submit::channel_submit(&self.file, &mut data)?;
        Ok(data)
    }

    pub fn syncpt(&self) -> host1x::SyncptRef {
        host1x::syncpt::fd_get(self.file.fds(), self.syncpt_fd).unwrap()
    }
}

/// A buffer entry relocating `mapping` into gather word `word`.
pub fn buf(mapping: u32, flags: SubmitBufFlags, word: u32) -> drm_tegra_submit_buf {
    drm_tegra_submit_buf {
        mapping_id: mapping,
        flags: flags.bits(),
        reloc: drm_tegra_submit_reloc {
            target_offset: 0,
            gather_offset_words: word,
            shift: 0,
        },
        reserved: [0; 2],
    }
}
