// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Tegra DRM open file
//!
//! A [`File`] is created for each process that opens the device. It owns the GEM handles and
//! channel contexts of that process, and implements every ioctl except submission, which lives
//! in [`crate::submit`].

use crate::context::ChannelCtx;
use crate::drm::TegraDrm;
use crate::gem::TegraBo;
use crate::uapi::{self, ChannelMapFlags};
use crate::user_ptr::AddressSpace;
use crate::{Error, Result};
use dma_buf::FdTable;
use host1x::debug::*;
use host1x::syncpt::{SyncptFile, SyncptFlags};
use host1x::Syncpt;
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const DEBUG_CLASS: DebugFlags = DebugFlags::File;

pub(crate) struct FileInner {
    contexts: BTreeMap<u32, Arc<ChannelCtx>>,
    next_ctx: u32,
    gem: BTreeMap<u32, Arc<TegraBo>>,
    next_handle: u32,
}

impl FileInner {
    /// Returns the channel context with id `id`.
    pub(crate) fn context(&self, id: u32) -> Option<&Arc<ChannelCtx>> {
        self.contexts.get(&id)
    }
}

/// State associated with a client.
pub struct File {
    id: u64,
    drm: Arc<TegraDrm>,
    mm: Arc<AddressSpace>,
    fds: Arc<FdTable>,
    inner: Mutex<FileInner>,
}

impl File {
    pub(crate) fn new(
        drm: Arc<TegraDrm>,
        id: u64,
        mm: Arc<AddressSpace>,
        fds: Arc<FdTable>,
    ) -> File {
        File {
            id,
            drm,
            mm,
            fds,
            inner: Mutex::new(FileInner {
                contexts: BTreeMap::new(),
                next_ctx: 1,
                gem: BTreeMap::new(),
                next_handle: 1,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn drm(&self) -> &Arc<TegraDrm> {
        &self.drm
    }

    /// Returns the address space ioctl pointers refer to.
    pub fn mm(&self) -> &Arc<AddressSpace> {
        &self.mm
    }

    /// Returns the descriptor table of the calling process.
    pub fn fds(&self) -> &Arc<FdTable> {
        &self.fds
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, FileInner> {
        self.inner.lock()
    }

    fn syncpt_by_id(&self, id: u32) -> Result<&Arc<Syncpt>> {
        self.drm
            .host()
            .syncpts()
            .get_by_id_noref(id)
            .ok_or(Error::Invalid)
    }

    /// IOCTL: gem_create: Create a new GEM object.
    pub fn gem_create(&self, data: &mut uapi::drm_tegra_gem_create) -> Result<u32> {
        let bo = TegraBo::new(&self.drm, data.size, data.flags)?;
        let handle = self.gem_handle_create(bo)?;

        mod_dev_dbg!(
            self.drm,
            "[File {}]: IOCTL: gem_create size={:#x} handle={}",
            self.id,
            data.size,
            handle
        );

        data.handle = handle;
        Ok(0)
    }

    /// Creates a handle for `bo` in this file.
    pub fn gem_handle_create(&self, bo: Arc<TegraBo>) -> Result<u32> {
        let mut inner = self.inner.lock();
        let handle = inner.next_handle;
        inner.next_handle = handle.checked_add(1).ok_or(Error::NoMemory)?;
        inner.gem.insert(handle, bo);
        Ok(handle)
    }

    /// Returns the buffer object behind GEM handle `handle`.
    pub fn gem_lookup(&self, handle: u32) -> Option<Arc<TegraBo>> {
        self.inner.lock().gem.get(&handle).cloned()
    }

    /// IOCTL: channel_open: Open a channel context on an engine.
    pub fn channel_open(&self, data: &mut uapi::drm_tegra_channel_open) -> Result<u32> {
        if data.flags != 0 {
            return Err(Error::Invalid);
        }

        let client = self
            .drm
            .client_by_class(data.host1x_class)
            .ok_or(Error::NoDevice)?;
        let ctx = Arc::new(ChannelCtx::open(&client)?);

        let mut inner = self.inner.lock();
        let id = inner.next_ctx;
        inner.next_ctx = id.checked_add(1).ok_or(Error::NoMemory)?;
        inner.contexts.insert(id, ctx);

        mod_dev_dbg!(
            self.drm,
            "[File {}]: IOCTL: channel_open class={:#x} ctx={}",
            self.id,
            data.host1x_class,
            id
        );

        data.channel_ctx = id;
        data.hardware_version = client.version();
        Ok(0)
    }

    /// IOCTL: channel_close: Close a channel context and all its mappings.
    pub fn channel_close(&self, data: &mut uapi::drm_tegra_channel_close) -> Result<u32> {
        if data.reserved != 0 {
            return Err(Error::Invalid);
        }

        let ctx = self
            .inner
            .lock()
            .contexts
            .remove(&data.channel_ctx)
            .ok_or(Error::Invalid)?;

        mod_dev_dbg!(
            self.drm,
            "[File {}]: IOCTL: channel_close ctx={}",
            self.id,
            data.channel_ctx
        );

        drop(ctx);
        Ok(0)
    }

    /// IOCTL: channel_map: Map a GEM object into a channel context.
    pub fn channel_map(&self, data: &mut uapi::drm_tegra_channel_map) -> Result<u32> {
        let flags = ChannelMapFlags::from_bits(data.flags).ok_or(Error::Invalid)?;

        let inner = self.inner.lock();
        let ctx = inner.context(data.channel_ctx).ok_or(Error::Invalid)?;
        let bo = inner.gem.get(&data.handle).ok_or(Error::Invalid)?;

        let id = ctx.map(bo, flags)?;

        mod_dev_dbg!(
            self.drm,
            "[File {}]: IOCTL: channel_map ctx={} handle={} -> {}",
            self.id,
            data.channel_ctx,
            data.handle,
            id
        );

        data.mapping_id = id;
        Ok(0)
    }

    /// IOCTL: channel_unmap: Remove a mapping from a channel context.
    pub fn channel_unmap(&self, data: &mut uapi::drm_tegra_channel_unmap) -> Result<u32> {
        let inner = self.inner.lock();
        let ctx = inner.context(data.channel_ctx).ok_or(Error::Invalid)?;

        ctx.unmap(data.mapping_id)?;
        Ok(0)
    }

    /// IOCTL: syncpoint_allocate: Allocate a client-managed syncpoint, returned as an fd.
    pub fn syncpoint_allocate(&self, data: &mut uapi::drm_tegra_syncpoint_allocate) -> Result<u32> {
        if data.reserved != 0 {
            return Err(Error::Invalid);
        }

        let name = format!("tegra-drm-{}", self.id);
        let sp = self
            .drm
            .host()
            .syncpt_alloc(SyncptFlags::CLIENT_MANAGED, &name)?;
        let id = sp.id();

        // The syncpoint is freed with the file object if installation fails.
        let fd = self.fds.install(SyncptFile::new(sp))?;

        mod_dev_dbg!(
            self.drm,
            "[File {}]: IOCTL: syncpoint_allocate id={} fd={}",
            self.id,
            id,
            fd
        );

        data.fd = fd;
        Ok(0)
    }

    /// IOCTL: syncpoint_free: Close a syncpoint fd.
    pub fn syncpoint_free(&self, data: &mut uapi::drm_tegra_syncpoint_free) -> Result<u32> {
        if data.reserved != 0 {
            return Err(Error::Invalid);
        }

        self.fds
            .get::<SyncptFile>(data.fd)
            .ok_or(Error::Invalid)?;
        self.fds.close(data.fd)?;

        mod_dev_dbg!(
            self.drm,
            "[File {}]: IOCTL: syncpoint_free fd={}",
            self.id,
            data.fd
        );
        Ok(0)
    }

    /// IOCTL: syncpt_read: Read the current value of a syncpoint.
    pub fn syncpt_read(&self, data: &mut uapi::drm_tegra_syncpt_read) -> Result<u32> {
        let sp = self.syncpt_by_id(data.id)?;
        data.value = sp.load();
        Ok(0)
    }

    /// IOCTL: syncpt_incr: Increment a syncpoint from the CPU.
    pub fn syncpt_incr(&self, data: &mut uapi::drm_tegra_syncpt_incr) -> Result<u32> {
        let sp = self.syncpt_by_id(data.id)?;
        let value = sp.incr();
        mod_dev_dbg!(
            self.drm,
            "[File {}]: IOCTL: syncpt_incr id={} -> {}",
            self.id,
            data.id,
            value
        );
        Ok(0)
    }

    /// IOCTL: syncpt_wait: Wait for a syncpoint to reach a threshold.
    ///
    /// The current value is reported back even if the wait fails.
    pub fn syncpt_wait(&self, data: &mut uapi::drm_tegra_syncpt_wait) -> Result<u32> {
        let sp = self.syncpt_by_id(data.id)?;

        let timeout = match data.timeout {
            uapi::DRM_TEGRA_NO_TIMEOUT => Duration::MAX,
            ms => Duration::from_millis(ms.into()),
        };

        let ret = sp.wait(data.thresh, timeout);
        data.value = sp.read_min();

        ret?;
        Ok(0)
    }
}

impl Drop for File {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        mod_dev_dbg!(
            self.drm,
            "[File {}]: Closing ({} contexts, {} objects)...",
            self.id,
            inner.contexts.len(),
            inner.gem.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ModuleParams;
    use host1x::hw::opcodes::CLASS_VIC;
    use host1x::hw::{sim::SimHost1x, tegra124};
    use host1x::Host1x;

    fn setup() -> (Arc<TegraDrm>, File) {
        let host = Host1x::new("host1x", SimHost1x::new(&tegra124::HWCONFIG));
        let drm = TegraDrm::probe(host, ModuleParams::default()).unwrap();
        let file = drm.open(AddressSpace::new(), Arc::new(FdTable::new()));
        (drm, file)
    }

    fn open_vic(file: &File) -> u32 {
        let mut open = uapi::drm_tegra_channel_open {
            host1x_class: CLASS_VIC,
            ..Default::default()
        };
        file.channel_open(&mut open).unwrap();
        open.channel_ctx
    }

    #[test]
    fn channel_lifecycle() {
        let (drm, file) = setup();

        let mut open = uapi::drm_tegra_channel_open {
            host1x_class: CLASS_VIC,
            ..Default::default()
        };
        file.channel_open(&mut open).unwrap();
        assert_eq!(open.hardware_version, 0x40);

        let mut bad = uapi::drm_tegra_channel_open {
            host1x_class: 0x30,
            ..Default::default()
        };
        assert_eq!(file.channel_open(&mut bad), Err(Error::NoDevice));
        bad.host1x_class = CLASS_VIC;
        bad.flags = 1;
        assert_eq!(file.channel_open(&mut bad), Err(Error::Invalid));

        let mut gem = uapi::drm_tegra_gem_create {
            size: 0x1000,
            ..Default::default()
        };
        file.gem_create(&mut gem).unwrap();

        let mut map = uapi::drm_tegra_channel_map {
            channel_ctx: open.channel_ctx,
            handle: gem.handle,
            flags: ChannelMapFlags::READ_WRITE.bits(),
            mapping_id: 0,
        };
        file.channel_map(&mut map).unwrap();
        assert_eq!(drm.domain().mapped_count(), 1);

        map.flags = 0x4;
        assert_eq!(file.channel_map(&mut map), Err(Error::Invalid));
        map.flags = 0;
        map.handle = 99;
        assert_eq!(file.channel_map(&mut map), Err(Error::Invalid));

        let mut close = uapi::drm_tegra_channel_close {
            channel_ctx: open.channel_ctx,
            reserved: 0,
        };
        file.channel_close(&mut close).unwrap();
        assert_eq!(drm.domain().mapped_count(), 0);
        assert_eq!(file.channel_close(&mut close), Err(Error::Invalid));
    }

    #[test]
    fn unmap() {
        let (drm, file) = setup();
        let ctx = open_vic(&file);

        let mut gem = uapi::drm_tegra_gem_create {
            size: 0x1000,
            ..Default::default()
        };
        file.gem_create(&mut gem).unwrap();
        let mut map = uapi::drm_tegra_channel_map {
            channel_ctx: ctx,
            handle: gem.handle,
            flags: ChannelMapFlags::READ.bits(),
            mapping_id: 0,
        };
        file.channel_map(&mut map).unwrap();

        let mut unmap = uapi::drm_tegra_channel_unmap {
            channel_ctx: ctx,
            mapping_id: map.mapping_id,
        };
        file.channel_unmap(&mut unmap).unwrap();
        assert_eq!(drm.domain().mapped_count(), 0);
        assert_eq!(file.channel_unmap(&mut unmap), Err(Error::Invalid));
    }

    #[test]
    fn syncpoint_fds() {
        let (drm, file) = setup();
        let allocated = drm.host().syncpts().allocated_count();

        let mut alloc = uapi::drm_tegra_syncpoint_allocate::default();
        file.syncpoint_allocate(&mut alloc).unwrap();
        assert_eq!(drm.host().syncpts().allocated_count(), allocated + 1);

        let sp = host1x::syncpt::fd_get(file.fds(), alloc.fd).unwrap();
        assert!(sp.flags().contains(SyncptFlags::CLIENT_MANAGED));
        drop(sp);

        let mut free = uapi::drm_tegra_syncpoint_free {
            fd: alloc.fd,
            reserved: 0,
        };
        file.syncpoint_free(&mut free).unwrap();
        assert_eq!(drm.host().syncpts().allocated_count(), allocated);
        assert_eq!(file.syncpoint_free(&mut free), Err(Error::Invalid));
    }

    #[test]
    fn syncpt_ops() {
        let (drm, file) = setup();
        let sp = drm
            .host()
            .syncpt_alloc(SyncptFlags::CLIENT_MANAGED, "test")
            .unwrap();

        let mut incr = uapi::drm_tegra_syncpt_incr {
            id: sp.id(),
            pad: 0,
        };
        file.syncpt_incr(&mut incr).unwrap();
        file.syncpt_incr(&mut incr).unwrap();

        let mut read = uapi::drm_tegra_syncpt_read {
            id: sp.id(),
            value: 0,
        };
        file.syncpt_read(&mut read).unwrap();
        assert_eq!(read.value, 2);

        let mut wait = uapi::drm_tegra_syncpt_wait {
            id: sp.id(),
            thresh: 2,
            timeout: 0,
            value: 0,
        };
        file.syncpt_wait(&mut wait).unwrap();
        assert_eq!(wait.value, 2);

        wait.thresh = 3;
        wait.value = 0;
        assert_eq!(file.syncpt_wait(&mut wait), Err(Error::Again));
        assert_eq!(wait.value, 2);

        wait.timeout = 1;
        assert_eq!(file.syncpt_wait(&mut wait), Err(Error::TimedOut));

        read.id = 10_000;
        assert_eq!(file.syncpt_read(&mut read), Err(Error::Invalid));
    }
}
