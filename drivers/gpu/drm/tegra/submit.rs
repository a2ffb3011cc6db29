// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Channel submission
//!
//! This module implements the `CHANNEL_SUBMIT` ioctl. A submission is validated and turned into
//! a host1x job in one pass:
//!
//! 1. The gather data is copied into a kernel-owned [`GatherBo`], and every buffer relocation
//!    is patched into it with the buffer's device address.
//! 2. The commands are decoded into [`SubmitCmd`]s and appended to the job. Waits on sync files
//!    become native syncpoint waits where possible. Anything else a job has to wait for (foreign
//!    fences and the implicit fences of the buffers it touches) is folded into a single
//!    [`TimelineGate`], whose wait goes first in the job.
//! 3. The job is pinned and the engine powered up.
//! 4. The reservation objects of all buffers with implicit sync flags are locked as one batch,
//!    the job is pushed to the channel and its completion fence is attached to the buffers.
//!
//! Everything acquired along the way is owned by a guard, so a failure at any point releases it
//! again. The job payload holds the mapping references and the engine power reference until the
//! job retires.

use crate::context::{ChannelCtx, Mapping};
use crate::file::File;
use crate::gem::{GatherBo, TegraBo};
use crate::pm::PmRef;
use crate::uapi::{self, SubmitBufFlags, SyncptIncrFlags};
use crate::user_ptr::read_array;
use crate::{Error, Result};
use dma_buf::{FdTable, Fence, SyncFile, WwAcquireCtx, WwClass};
use host1x::debug::*;
use host1x::fence::{self, TimelineGate};
use host1x::hw::opcodes::GATHER_MAX_WORDS;
use host1x::syncpt;
use host1x::{Job, SyncptRef};
use std::sync::Arc;

const DEBUG_CLASS: DebugFlags = DebugFlags::Submit;

/// Block-linear relocation flag, set on the address before shifting.
const RELOC_BLOCKLINEAR_BIT: u64 = 1 << 39;

/// A decoded submission command.
enum SubmitCmd {
    /// Execute `words` words of the gather data, starting at word `offset`.
    Gather { words: u32, offset: u32 },
    /// Wait for syncpoint `id` to reach `threshold`.
    WaitSyncpt { id: u32, threshold: u32 },
    /// Wait for the fence of a sync file.
    WaitSyncFile(Fence),
}

impl SubmitCmd {
    /// Decodes `cmd`. `gather_offset` is the running offset into the gather data, which holds
    /// `gather_words` words.
    fn decode(
        cmd: &uapi::drm_tegra_submit_cmd,
        fds: &FdTable,
        gather_offset: &mut u32,
        gather_words: u32,
    ) -> Result<SubmitCmd> {
        if cmd.flags != 0 {
            return Err(Error::Invalid);
        }

        match cmd.type_ {
            uapi::DRM_TEGRA_SUBMIT_CMD_GATHER_UPTR => {
                if cmd.data[1..] != [0; 3] {
                    return Err(Error::Invalid);
                }

                let words = cmd.data[0];
                if words == 0 || words > GATHER_MAX_WORDS {
                    return Err(Error::Invalid);
                }

                let offset = *gather_offset;
                let next = offset.checked_add(words).ok_or(Error::Invalid)?;
                if next > gather_words {
                    return Err(Error::Invalid);
                }
                *gather_offset = next;

                Ok(SubmitCmd::Gather { words, offset })
            }
            uapi::DRM_TEGRA_SUBMIT_CMD_WAIT_SYNCPT => {
                if cmd.data[2..] != [0; 2] {
                    return Err(Error::Invalid);
                }

                Ok(SubmitCmd::WaitSyncpt {
                    id: cmd.data[0],
                    threshold: cmd.data[1],
                })
            }
            uapi::DRM_TEGRA_SUBMIT_CMD_WAIT_SYNC_FILE => {
                if cmd.data[1..] != [0; 3] {
                    return Err(Error::Invalid);
                }

                let fence = SyncFile::get_fence(fds, cmd.data[0] as i32).ok_or(Error::Invalid)?;
                Ok(SubmitCmd::WaitSyncFile(fence))
            }
            _ => Err(Error::Invalid),
        }
    }
}

/// Returns whether `fence` depends on an unsignaled fence that is not a syncpoint threshold.
fn has_foreign(fence: &Fence) -> bool {
    fence
        .flatten()
        .iter()
        .any(|f| fence::extract(f).is_none() && !f.is_signaled())
}

/// A buffer whose reservation object a submission synchronizes with.
struct ResvBuf {
    bo: Arc<TegraBo>,
    write: bool,
}

/// The reservation objects of a submission, locked as one batch. Unlocked on drop.
struct ResvLockSet {
    ctx: WwAcquireCtx,
    bufs: Vec<ResvBuf>,
}

impl ResvLockSet {
    /// Locks the reservation object of every buffer in `bufs`.
    ///
    /// On contention, everything held is dropped and the contended object is taken first on
    /// the next round, through the slow path.
    fn lock(class: &Arc<WwClass>, bufs: Vec<ResvBuf>) -> Result<ResvLockSet> {
        let mut ctx = WwAcquireCtx::new(class);
        let mut contended: Option<usize> = None;

        'retry: loop {
            if let Some(c) = contended {
                bufs[c].bo.resv().lock_slow(&mut ctx);
            }

            for (i, buf) in bufs.iter().enumerate() {
                if contended == Some(i) {
                    continue;
                }

                let Err(err) = buf.bo.resv().lock(&mut ctx) else {
                    continue;
                };

                for (j, held) in bufs[..i].iter().enumerate() {
                    if contended != Some(j) {
                        held.bo.resv().unlock(&mut ctx);
                    }
                }
                if let Some(c) = contended {
                    bufs[c].bo.resv().unlock(&mut ctx);
                }

                if err == dma_buf::Error::Deadlock {
                    cls_pr_debug!(Submit, "submit: resv contended on bo {}", buf.bo.id());
                    contended = Some(i);
                    continue 'retry;
                }

                ctx.done();
                return Err(err.into());
            }

            ctx.done();
            return Ok(ResvLockSet { ctx, bufs });
        }
    }

    /// Collects the fences the job has to wait for and reserves a shared slot on every buffer
    /// that is only read.
    ///
    /// Fences on `sp` are skipped, the job is serialized against them already.
    fn implicit_deps(&self, sp: &SyncptRef) -> Result<Vec<Fence>> {
        let mut deps = Vec::new();

        for buf in &self.bufs {
            buf.bo.resv().with_fences(&self.ctx, |fences| -> Result {
                if !buf.write {
                    fences.reserve_shared(1)?;
                }
                deps.extend(fences.implicit_fences(buf.write));
                Ok(())
            })??;
        }

        deps.retain(|f| fence::extract(f).map_or(true, |(id, _)| id != sp.id()));
        Ok(deps)
    }

    /// Attaches the completion fence of the job to every buffer.
    ///
    /// Every buffer is locked and readers have a slot reserved by [`Self::implicit_deps`], so
    /// this cannot fail.
    fn attach(&self, fence: &Fence) {
        for buf in &self.bufs {
            let ret = buf.bo.resv().with_fences(&self.ctx, |fences| {
                if buf.write {
                    fences.add_excl_fence(fence.clone());
                    Ok(())
                } else {
                    fences.add_shared_fence(fence.clone())
                }
            });

            if let Err(e) | Ok(Err(e)) = ret {
                log::error!("submit: bo {}: failed to attach fence: {:?}", buf.bo.id(), e);
            }
        }
    }
}

impl Drop for ResvLockSet {
    fn drop(&mut self) {
        for buf in &self.bufs {
            buf.bo.resv().unlock(&mut self.ctx);
        }
    }
}

/// Resources a job holds until it retires.
struct SubmitPayload {
    _mappings: Vec<Arc<Mapping>>,
    _pm: PmRef,
}

/// Patches the relocations of `bufs` into `gather`. Returns the mappings the job has to keep
/// alive and the buffers it synchronizes with.
fn relocate(
    ctx: &ChannelCtx,
    gather: &GatherBo,
    bufs: &[uapi::drm_tegra_submit_buf],
) -> Result<(Vec<Arc<Mapping>>, Vec<ResvBuf>)> {
    let mut mappings = Vec::new();
    let mut resv_bufs: Vec<ResvBuf> = Vec::new();

    for buf in bufs {
        let flags = SubmitBufFlags::from_bits(buf.flags).ok_or(Error::Invalid)?;
        if buf.reserved != [0; 2] || buf.reloc.shift >= u64::BITS {
            return Err(Error::Invalid);
        }

        let mapping = ctx.mapping_get(buf.mapping_id).ok_or(Error::Invalid)?;

        let mut iova = mapping.iova().wrapping_add(buf.reloc.target_offset);
        if flags.contains(SubmitBufFlags::RELOC_BLOCKLINEAR) {
            iova |= RELOC_BLOCKLINEAR_BIT;
        }
        gather.write_reloc(buf.reloc.gather_offset_words, (iova >> buf.reloc.shift) as u32)?;

        let write = flags.contains(SubmitBufFlags::RESV_WRITE);
        if write || flags.contains(SubmitBufFlags::RESV_READ) {
            match resv_bufs.iter_mut().find(|b| Arc::ptr_eq(&b.bo, mapping.bo())) {
                Some(b) => b.write |= write,
                None => resv_bufs.push(ResvBuf {
                    bo: mapping.bo().clone(),
                    write,
                }),
            }
        }

        mappings.push(mapping);
    }

    Ok((mappings, resv_bufs))
}

fn submit(file: &File, data: &mut uapi::drm_tegra_channel_submit, id: u64) -> Result<Arc<Job>> {
    let drm = file.drm();
    let params = drm.params();

    if data.reserved0 != 0 || data.reserved1 != 0 {
        return Err(Error::Invalid);
    }

    // Held for the whole submission.
    let inner = file.lock();
    let ctx: &ChannelCtx = inner.context(data.channel_ctx).ok_or(Error::Invalid)?;

    if data.gather_data_words == 0 || data.gather_data_words > params.max_gather_words {
        return Err(Error::Invalid);
    }

    mod_dev_dbg!(
        drm,
        "[File {} Ctx {}]: IOCTL: submit({}): Copying {} gather words",
        file.id(),
        data.channel_ctx,
        id,
        data.gather_data_words
    );
    let words = read_array::<u32>(file.mm(), data.gather_data_ptr, data.gather_data_words)?;
    let gather = GatherBo::new(drm.host(), words)?;

    mod_dev_dbg!(
        drm,
        "[File {} Ctx {}]: IOCTL: submit({}): Processing {} buffers",
        file.id(),
        data.channel_ctx,
        id,
        data.num_bufs
    );
    let bufs = read_array::<uapi::drm_tegra_submit_buf>(file.mm(), data.bufs_ptr, data.num_bufs)?;
    let (mappings, resv_bufs) = relocate(ctx, &gather, &bufs)?;

    let incr = &data.syncpt_incrs[0];
    if data.syncpt_incrs[1].num_incrs != 0 || incr.reserved != [0; 3] {
        return Err(Error::Invalid);
    }
    let incr_flags = SyncptIncrFlags::from_bits(incr.flags).ok_or(Error::Invalid)?;
    let sp = syncpt::fd_get(file.fds(), incr.syncpt_fd).ok_or(Error::Invalid)?;

    // Published only once the job is on the channel.
    let sync_file_fd = if incr_flags.contains(SyncptIncrFlags::CREATE_SYNC_FILE) {
        Some(file.fds().reserve()?)
    } else {
        None
    };

    mod_dev_dbg!(
        drm,
        "[File {} Ctx {}]: IOCTL: submit({}): Parsing {} commands",
        file.id(),
        data.channel_ctx,
        id,
        data.num_cmds
    );
    let raw_cmds = read_array::<uapi::drm_tegra_submit_cmd>(file.mm(), data.cmds_ptr, data.num_cmds)?;

    let mut cmds = Vec::new();
    cmds.try_reserve_exact(raw_cmds.len())
        .map_err(|_| Error::NoMemory)?;
    let mut gather_offset = 0;
    for raw in &raw_cmds {
        cmds.push(SubmitCmd::decode(raw, file.fds(), &mut gather_offset, gather.len())?);
    }
    if !cmds.iter().any(|c| matches!(c, SubmitCmd::Gather { .. })) {
        return Err(Error::Invalid);
    }

    let client = ctx.client();
    let dev = client.device();
    let mut job = Job::new(ctx.channel(), dev, cmds.len() + 1, incr.num_incrs)?;

    let needs_gate = !resv_bufs.is_empty()
        || cmds.iter().any(|c| match c {
            SubmitCmd::WaitSyncFile(f) => has_foreign(f),
            _ => false,
        });
    let gate = needs_gate.then(|| TimelineGate::reserve(&sp));
    if let Some(gate) = gate.as_ref() {
        job.add_wait(sp.id(), gate.threshold());
    }

    let mut deps = Vec::new();
    for cmd in cmds {
        match cmd {
            SubmitCmd::Gather { words, offset } => job.add_gather(gather.clone(), words, offset),
            SubmitCmd::WaitSyncpt { id, threshold } => job.add_wait(id, threshold),
            SubmitCmd::WaitSyncFile(f) => {
                if fence::push_native_waits(&mut job, &f) {
                    deps.push(f);
                }
            }
        }
    }

    job.set_serialize(true);
    job.set_syncpt(sp.clone());
    job.set_timeout(params.job_timeout());

    job.pin(dev)?;
    let pm = client.runtime_pm().get_sync()?;
    job.set_payload(Box::new(SubmitPayload {
        _mappings: mappings,
        _pm: pm,
    }));

    let locks = if resv_bufs.is_empty() {
        None
    } else {
        Some(ResvLockSet::lock(drm.resv_class(), resv_bufs)?)
    };
    if let Some(locks) = locks.as_ref() {
        deps.extend(locks.implicit_deps(&sp)?);
    }

    let job = ctx.channel().submit(job)?;

    // The job is on the channel. Nothing below may fail.
    if let Some(gate) = gate {
        gate.arm(deps);
    }

    let fence = fence::create_on(drm.host(), &sp, job.syncpt_end());
    if let Some(locks) = locks.as_ref() {
        locks.attach(&fence);
    }
    drop(locks);

    let incr = &mut data.syncpt_incrs[0];
    if let Some(fd) = sync_file_fd {
        incr.sync_file_fd = fd.install(SyncFile::new(fence));
    }
    incr.fence_value = job.syncpt_end();

    Ok(job)
}

/// IOCTL: channel_submit: Submit a job to a channel context.
pub fn channel_submit(file: &File, data: &mut uapi::drm_tegra_channel_submit) -> Result<u32> {
    let id = file.drm().ids().submission.next();
    mod_dev_dbg!(
        file.drm(),
        "[File {} Ctx {}]: IOCTL: submit (submission ID: {})",
        file.id(),
        data.channel_ctx,
        id
    );

    match submit(file, data, id) {
        Err(Error::Interrupted) => Err(Error::Interrupted),
        Err(e) => {
            dev_info!(
                file.drm(),
                "[File {} Ctx {}]: IOCTL: submit failed! (submission ID: {} err: {:?})",
                file.id(),
                data.channel_ctx,
                id,
                e
            );
            Err(e)
        }
        Ok(job) => {
            mod_dev_dbg!(
                file.drm(),
                "[File {} Ctx {}]: IOCTL: submit({}): Done, fence {}",
                file.id(),
                data.channel_ctx,
                id,
                job.syncpt_end()
            );
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drm::TegraDrm;
    use crate::params::ModuleParams;
    use crate::uapi::ChannelMapFlags;
    use crate::user_ptr::AddressSpace;
    use host1x::hw::opcodes::CLASS_VIC;
    use host1x::hw::{sim::SimHost1x, tegra124};
    use host1x::Host1x;
    use std::time::Duration;

    struct Setup {
        sim: Arc<SimHost1x>,
        drm: Arc<TegraDrm>,
        file: File,
        ctx: u32,
        syncpt_fd: i32,
    }

    fn setup() -> Setup {
        let sim = SimHost1x::new(&tegra124::HWCONFIG);
        let host = Host1x::new("host1x", sim.clone());
        let drm = TegraDrm::probe(host, ModuleParams::default()).unwrap();
        let file = drm.open(AddressSpace::new(), Arc::new(FdTable::new()));

        let mut open = uapi::drm_tegra_channel_open {
            host1x_class: CLASS_VIC,
            ..Default::default()
        };
        file.channel_open(&mut open).unwrap();

        let mut alloc = uapi::drm_tegra_syncpoint_allocate::default();
        file.syncpoint_allocate(&mut alloc).unwrap();

        Setup {
            sim,
            drm,
            file,
            ctx: open.channel_ctx,
            syncpt_fd: alloc.fd,
        }
    }

    fn map(s: &Setup, size: u64) -> u32 {
        let mut gem = uapi::drm_tegra_gem_create {
            size,
            ..Default::default()
        };
        s.file.gem_create(&mut gem).unwrap();
        let mut map = uapi::drm_tegra_channel_map {
            channel_ctx: s.ctx,
            handle: gem.handle,
            flags: ChannelMapFlags::READ_WRITE.bits(),
            mapping_id: 0,
        };
        s.file.channel_map(&mut map).unwrap();
        map.mapping_id
    }

    fn args(
        s: &Setup,
        words: &[u32],
        bufs: &[uapi::drm_tegra_submit_buf],
        cmds: &[uapi::drm_tegra_submit_cmd],
    ) -> uapi::drm_tegra_channel_submit {
        let mm = s.file.mm();
        let mut data = uapi::drm_tegra_channel_submit {
            channel_ctx: s.ctx,
            num_bufs: bufs.len() as u32,
            num_cmds: cmds.len() as u32,
            gather_data_words: words.len() as u32,
            bufs_ptr: mm.alloc_slice(bufs),
            cmds_ptr: mm.alloc_slice(cmds),
            gather_data_ptr: mm.alloc_slice(words),
            ..Default::default()
        };
        data.syncpt_incrs[0].syncpt_fd = s.syncpt_fd;
        data.syncpt_incrs[0].num_incrs = 1;
        data
    }

    fn decode(cmd: uapi::drm_tegra_submit_cmd, offset: &mut u32) -> Result<SubmitCmd> {
        SubmitCmd::decode(&cmd, &FdTable::new(), offset, 16)
    }

    #[test]
    fn decode_cmds() {
        let mut offset = 0;
        assert!(matches!(
            decode(uapi::drm_tegra_submit_cmd::gather_uptr(10), &mut offset),
            Ok(SubmitCmd::Gather {
                words: 10,
                offset: 0
            })
        ));
        assert!(matches!(
            decode(uapi::drm_tegra_submit_cmd::gather_uptr(6), &mut offset),
            Ok(SubmitCmd::Gather {
                words: 6,
                offset: 10
            })
        ));
        assert_eq!(offset, 16);

        // Past the end of the gather data.
        assert_eq!(
            decode(uapi::drm_tegra_submit_cmd::gather_uptr(1), &mut offset).err(),
            Some(Error::Invalid)
        );

        let mut offset = 0;
        assert!(matches!(
            decode(uapi::drm_tegra_submit_cmd::wait_syncpt(3, 7), &mut offset),
            Ok(SubmitCmd::WaitSyncpt {
                id: 3,
                threshold: 7
            })
        ));
        assert_eq!(
            decode(uapi::drm_tegra_submit_cmd::wait_sync_file(5), &mut offset).err(),
            Some(Error::Invalid)
        );

        let mut reserved = uapi::drm_tegra_submit_cmd::wait_syncpt(3, 7);
        reserved.data[3] = 1;
        assert_eq!(decode(reserved, &mut offset).err(), Some(Error::Invalid));

        let mut flags = uapi::drm_tegra_submit_cmd::gather_uptr(1);
        flags.flags = 1;
        assert_eq!(decode(flags, &mut offset).err(), Some(Error::Invalid));

        let mut unknown = uapi::drm_tegra_submit_cmd::gather_uptr(1);
        unknown.type_ = 3;
        assert_eq!(decode(unknown, &mut offset).err(), Some(Error::Invalid));

        assert_eq!(
            decode(uapi::drm_tegra_submit_cmd::gather_uptr(0), &mut offset).err(),
            Some(Error::Invalid)
        );
        assert_eq!(offset, 0);
    }

    #[test]
    fn relocations() {
        let s = setup();
        let target = map(&s, 0x4000);

        let bufs = [
            uapi::drm_tegra_submit_buf {
                mapping_id: target,
                flags: 0,
                reloc: uapi::drm_tegra_submit_reloc {
                    target_offset: 0x100,
                    gather_offset_words: 1,
                    shift: 0,
                },
                reserved: [0; 2],
            },
            uapi::drm_tegra_submit_buf {
                mapping_id: target,
                flags: SubmitBufFlags::RELOC_BLOCKLINEAR.bits(),
                reloc: uapi::drm_tegra_submit_reloc {
                    target_offset: 0,
                    gather_offset_words: 3,
                    shift: 8,
                },
                reserved: [0; 2],
            },
        ];

        let inner = s.file.lock();
        let ctx = inner.context(s.ctx).unwrap();
        let gather = GatherBo::new(s.drm.host(), vec![0xaa, 0, 0xbb, 0]).unwrap();
        let (mappings, resv_bufs) = relocate(ctx, &gather, &bufs).unwrap();

        let iova = ctx.mapping_get(target).unwrap().iova();
        assert_eq!(
            gather.words(),
            vec![
                0xaa,
                (iova + 0x100) as u32,
                0xbb,
                ((iova | RELOC_BLOCKLINEAR_BIT) >> 8) as u32
            ]
        );
        assert_eq!(mappings.len(), 2);
        assert!(resv_bufs.is_empty());
    }

    #[test]
    fn resv_flags_merge_per_buffer() {
        let s = setup();
        let a = map(&s, 0x1000);
        let b = map(&s, 0x1000);

        let buf = |mapping_id, flags: SubmitBufFlags| uapi::drm_tegra_submit_buf {
            mapping_id,
            flags: flags.bits(),
            reloc: Default::default(),
            reserved: [0; 2],
        };
        let bufs = [
            buf(a, SubmitBufFlags::RESV_READ),
            buf(b, SubmitBufFlags::RESV_READ),
            buf(a, SubmitBufFlags::RESV_WRITE),
        ];

        let inner = s.file.lock();
        let ctx = inner.context(s.ctx).unwrap();
        let gather = GatherBo::new(s.drm.host(), vec![0]).unwrap();
        let (_, resv_bufs) = relocate(ctx, &gather, &bufs).unwrap();

        let writes: Vec<_> = resv_bufs.iter().map(|b| b.write).collect();
        assert_eq!(writes, vec![true, false]);
    }

    #[test]
    fn executes_gathers() {
        let s = setup();
        let cmds = [
            uapi::drm_tegra_submit_cmd::gather_uptr(2),
            uapi::drm_tegra_submit_cmd::gather_uptr(2),
        ];
        let mut data = args(&s, &[0xaa, 0, 0xbb, 0], &[], &cmds);

        let job = submit(&s.file, &mut data, 1).unwrap();
        assert_eq!(data.syncpt_incrs[0].fence_value, job.syncpt_end());

        let channel = job.channel().id();
        s.sim.run_all();
        assert_eq!(job.wait(Duration::from_secs(1)), Ok(()));

        let gathers = s.sim.gathers(channel);
        assert_eq!(gathers.len(), 2);
        assert!(gathers.iter().all(|g| g.class == CLASS_VIC && g.words == 2));
    }

    #[test]
    fn unknown_wait_syncpt_ids_reach_the_channel() {
        let s = setup();
        let cmds = [
            uapi::drm_tegra_submit_cmd::wait_syncpt(9999, 0),
            uapi::drm_tegra_submit_cmd::gather_uptr(1),
        ];
        let mut data = args(&s, &[0], &[], &cmds);

        let job = submit(&s.file, &mut data, 1).unwrap();
        assert!(matches!(
            job.cmds()[0],
            host1x::job::JobCmd::Wait {
                id: 9999,
                threshold: 0
            }
        ));
    }

    #[test]
    fn bad_relocations() {
        let s = setup();
        let target = map(&s, 0x1000);
        let cmds = [uapi::drm_tegra_submit_cmd::gather_uptr(2)];

        let mut buf = uapi::drm_tegra_submit_buf {
            mapping_id: target,
            flags: 0,
            reloc: uapi::drm_tegra_submit_reloc {
                target_offset: 0,
                gather_offset_words: 2,
                shift: 0,
            },
            reserved: [0; 2],
        };
        let mut data = args(&s, &[0, 0], &[buf], &cmds);
        assert_eq!(submit(&s.file, &mut data, 1).err(), Some(Error::Invalid));

        buf.reloc.gather_offset_words = 0;
        buf.reloc.shift = 64;
        let mut data = args(&s, &[0, 0], &[buf], &cmds);
        assert_eq!(submit(&s.file, &mut data, 2).err(), Some(Error::Invalid));

        buf.reloc.shift = 0;
        buf.flags = 1 << 3;
        let mut data = args(&s, &[0, 0], &[buf], &cmds);
        assert_eq!(submit(&s.file, &mut data, 3).err(), Some(Error::Invalid));
    }

    #[test]
    fn argument_checks() {
        let s = setup();
        let cmds = [uapi::drm_tegra_submit_cmd::gather_uptr(1)];

        let mut data = args(&s, &[0], &[], &cmds);
        data.reserved1 = 1;
        assert_eq!(submit(&s.file, &mut data, 1).err(), Some(Error::Invalid));

        let mut data = args(&s, &[0], &[], &cmds);
        data.channel_ctx = 42;
        assert_eq!(submit(&s.file, &mut data, 2).err(), Some(Error::Invalid));

        let mut data = args(&s, &[0], &[], &cmds);
        data.syncpt_incrs[1].num_incrs = 1;
        assert_eq!(submit(&s.file, &mut data, 3).err(), Some(Error::Invalid));

        let mut data = args(&s, &[0], &[], &cmds);
        data.syncpt_incrs[0].syncpt_fd = 77;
        assert_eq!(submit(&s.file, &mut data, 4).err(), Some(Error::Invalid));

        let mut data = args(&s, &[0], &[], &cmds);
        data.syncpt_incrs[0].flags = 2;
        assert_eq!(submit(&s.file, &mut data, 5).err(), Some(Error::Invalid));

        // No gather.
        let mut data = args(&s, &[0], &[], &[uapi::drm_tegra_submit_cmd::wait_syncpt(0, 0)]);
        assert_eq!(submit(&s.file, &mut data, 6).err(), Some(Error::Invalid));

        let mut data = args(&s, &[0], &[], &cmds);
        data.gather_data_words = 0;
        assert_eq!(submit(&s.file, &mut data, 7).err(), Some(Error::Invalid));

        let mut data = args(&s, &[0], &[], &cmds);
        data.gather_data_ptr = 0x10;
        assert_eq!(submit(&s.file, &mut data, 8).err(), Some(Error::Fault));

        let mut data = args(&s, &[0], &[], &cmds);
        data.syncpt_incrs[0].num_incrs = u32::MAX;
        assert_eq!(submit(&s.file, &mut data, 9).err(), Some(Error::Invalid));

        assert_eq!(s.drm.domain().mapped_count(), 0);
    }
}
