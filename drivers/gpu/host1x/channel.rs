// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Channels
//!
//! A host1x instance has a fixed number of channels. Clients request one, and hold it through
//! counted [`Channel`] references for as long as they submit jobs to it. A counting semaphore
//! sized to the number of channels gates requests, so a requester either gets a channel, blocks
//! until one is released, or fails right away with `Error::Busy`.
//!
//! Submission to a channel is serialized by the channel's submit lock, which keeps the order in
//! which jobs reserve syncpoint values identical to the order in which they are pushed.

use crate::cdma::Cdma;
use crate::debug::*;
use crate::dev::{ClientDevice, Host1x};
use crate::fault::FaultPoint;
use crate::hw::opcodes::*;
use crate::hw::Host1xHw;
use crate::intr::Action;
use crate::job::{Job, JobCmd};
use crate::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

const DEBUG_CLASS: DebugFlags = DebugFlags::Channel;

#[derive(Default)]
struct SemaState {
    count: usize,
    shutdown: bool,
}

/// Counting semaphore with interruptible waits.
struct Semaphore {
    state: Mutex<SemaState>,
    cond: Condvar,
}

impl Semaphore {
    fn new(count: usize) -> Semaphore {
        Semaphore {
            state: Mutex::new(SemaState {
                count,
                shutdown: false,
            }),
            cond: Condvar::new(),
        }
    }

    fn down_interruptible(&self) -> Result {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return Err(Error::Interrupted);
            }
            if state.count > 0 {
                state.count -= 1;
                return Ok(());
            }
            self.cond.wait(&mut state);
        }
    }

    fn down_trylock(&self) -> bool {
        let mut state = self.state.lock();
        if state.shutdown || state.count == 0 {
            return false;
        }
        state.count -= 1;
        true
    }

    fn up(&self) {
        self.state.lock().count += 1;
        self.cond.notify_one();
    }

    fn interrupt_all(&self) {
        self.state.lock().shutdown = true;
        self.cond.notify_all();
    }

    fn count(&self) -> usize {
        self.state.lock().count
    }
}

pub(crate) struct ChannelSlot {
    id: u32,
    refcount: AtomicU32,
    submit_lock: Mutex<()>,
    cdma: Arc<Cdma>,
    owner: Mutex<Option<Arc<ClientDevice>>>,
}

/// The fixed set of channels of a host1x instance.
pub struct ChannelList {
    slots: Vec<Arc<ChannelSlot>>,
    allocated: Mutex<Vec<u64>>,
    sema: Semaphore,
}

impl ChannelList {
    pub(crate) fn new(hw: &Arc<dyn Host1xHw>) -> ChannelList {
        let count = hw.config().nb_channels;
        ChannelList {
            slots: (0..count)
                .map(|id| {
                    Arc::new(ChannelSlot {
                        id,
                        refcount: AtomicU32::new(0),
                        submit_lock: Mutex::new(()),
                        cdma: Arc::new(Cdma::new(id, hw.clone())),
                        owner: Mutex::new(None),
                    })
                })
                .collect(),
            allocated: Mutex::new(vec![0; (count as usize).div_ceil(64)]),
            sema: Semaphore::new(count as usize),
        }
    }

    fn take_free_bit(&self) -> Option<u32> {
        let mut bitmap = self.allocated.lock();
        for (i, word) in bitmap.iter_mut().enumerate() {
            let bit = (!*word).trailing_zeros();
            let id = i as u32 * 64 + bit;
            if bit < 64 && (id as usize) < self.slots.len() {
                *word |= 1 << bit;
                return Some(id);
            }
        }
        None
    }

    fn clear_bit(&self, id: u32) {
        let mut bitmap = self.allocated.lock();
        bitmap[id as usize / 64] &= !(1 << (id % 64));
    }

    pub(crate) fn cdmas(&self) -> impl Iterator<Item = (u32, &Arc<Cdma>)> {
        self.slots.iter().map(|slot| (slot.id, &slot.cdma))
    }

    /// Returns the number of channels that can be requested without blocking.
    pub fn free_count(&self) -> usize {
        self.sema.count()
    }

    /// Returns the number of channels.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns whether the host1x instance has no channels.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Wakes every blocked channel request and every submitter waiting for push buffer space
    /// with `Error::Interrupted`, and makes further requests fail. Used when the device goes
    /// away.
    pub fn shutdown(&self) {
        self.sema.interrupt_all();
        for slot in &self.slots {
            slot.cdma.interrupt();
        }
    }
}

/// A counted reference to an allocated channel.
pub struct Channel {
    host: Arc<Host1x>,
    slot: Arc<ChannelSlot>,
}

impl Channel {
    /// Requests a free channel for `dev`.
    ///
    /// If none is free, blocks until one is released when `wait` is set, and fails with
    /// `Error::Busy` otherwise.
    pub fn request(dev: &Arc<ClientDevice>, wait: bool) -> Result<Channel> {
        let host = dev.host();
        let list = host.channels();

        if wait {
            list.sema.down_interruptible()?;
        } else if !list.sema.down_trylock() {
            mod_dev_dbg!(dev, "no free channel");
            return Err(Error::Busy);
        }

        let Some(id) = list.take_free_bit() else {
            dev_err!(dev, "channel semaphore and bitmap out of sync");
            list.sema.up();
            return Err(Error::Busy);
        };

        let slot = list.slots[id as usize].clone();

        if let Err(e) = Channel::init(host, &slot) {
            dev_err!(dev, "failed to initialize channel {}: {:?}", id, e);
            list.clear_bit(id);
            list.sema.up();
            return Err(e);
        }

        *slot.owner.lock() = Some(dev.clone());
        slot.refcount.store(1, Ordering::Release);

        mod_dev_dbg!(dev, "channel {} allocated", id);

        Ok(Channel {
            host: host.clone(),
            slot,
        })
    }

    fn init(host: &Host1x, slot: &ChannelSlot) -> Result {
        if host.faults().should_fail(FaultPoint::ChannelInit) {
            return Err(Error::Io);
        }
        host.hw().channel_init(slot.id)?;
        slot.cdma.init()
    }

    /// Takes a new reference to channel `index` if it is allocated.
    pub fn get_index(host: &Arc<Host1x>, index: u32) -> Option<Channel> {
        let slot = host.channels().slots.get(index as usize)?;

        slot.refcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| {
                (r > 0).then_some(r + 1)
            })
            .ok()?;

        Some(Channel {
            host: host.clone(),
            slot: slot.clone(),
        })
    }

    /// Returns the channel index.
    pub fn id(&self) -> u32 {
        self.slot.id
    }

    /// Returns the host1x instance the channel belongs to.
    pub fn host(&self) -> &Arc<Host1x> {
        &self.host
    }

    /// Returns whether the channel was marked hung by a job timeout.
    pub fn is_hung(&self) -> bool {
        self.slot.cdma.is_hung()
    }

    /// Returns the number of submitted jobs that have not completed yet.
    pub fn pending_jobs(&self) -> usize {
        self.slot.cdma.pending_jobs()
    }

    /// Stops command DMA on this channel.
    pub fn stop(&self) {
        self.slot.cdma.stop();
    }

    pub(crate) fn cdma(&self) -> &Arc<Cdma> {
        &self.slot.cdma
    }

    /// Returns the number of push buffer slots `job` occupies.
    fn slot_count(job: &Job, serialize: bool) -> u64 {
        let cmds: u64 = job
            .cmds()
            .iter()
            .map(|cmd| match cmd {
                JobCmd::Wait { .. } => 3,
                JobCmd::Gather(_) => 1,
            })
            .sum();

        cmds + if serialize { 3 } else { 1 } + job.syncpt_incrs() as u64
    }

    fn build_cmds(
        job: &Job,
        id: u32,
        serialize_threshold: Option<u32>,
        max_slots: u32,
    ) -> Result<Vec<(u32, u32)>> {
        let slots = Channel::slot_count(job, serialize_threshold.is_some());
        if slots > max_slots as u64 {
            return Err(Error::Invalid);
        }

        let class = job.class();
        let mut cmds = Vec::with_capacity(slots as usize);

        let push_wait = |cmds: &mut Vec<(u32, u32)>, wait_id: u32, threshold: u32| {
            cmds.push((
                setclass(CLASS_HOST1X, UCLASS_LOAD_SYNCPT_PAYLOAD_32, 1),
                threshold,
            ));
            cmds.push((setclass(CLASS_HOST1X, UCLASS_WAIT_SYNCPT_32, 1), wait_id));
            cmds.push((setclass(class, 0, 0), NOP));
        };

        if let Some(threshold) = serialize_threshold {
            push_wait(&mut cmds, id, threshold);
        } else {
            cmds.push((setclass(class, 0, 0), NOP));
        }

        for cmd in job.cmds() {
            match cmd {
                JobCmd::Wait { id, threshold } => push_wait(&mut cmds, *id, *threshold),
                JobCmd::Gather(g) => {
                    let addr = g.addr().ok_or(Error::Invalid)?;
                    let addr = u32::try_from(addr).map_err(|_| Error::Invalid)?;
                    cmds.push((gather(g.words()), addr));
                }
            }
        }

        for _ in 0..job.syncpt_incrs() {
            cmds.push((
                nonincr(UCLASS_INCR_SYNCPT, 1),
                incr_syncpt(INCR_SYNCPT_COND_OP_DONE, id),
            ));
        }

        Ok(cmds)
    }

    /// Submits a pinned job. Returns the shared job, whose [`Job::syncpt_end`] is the value its
    /// syncpoint reaches on completion.
    pub fn submit(&self, mut job: Job) -> Result<Arc<Job>> {
        let sp = job.syncpt().cloned().ok_or(Error::Invalid)?;

        if job.gathers().next().is_none() || !job.is_pinned() {
            return Err(Error::Invalid);
        }
        if job.gathers().any(|g| g.words() == 0 || g.words() > GATHER_MAX_WORDS) {
            return Err(Error::Invalid);
        }

        let _guard = self.slot.submit_lock.lock();
        let cdma = &self.slot.cdma;

        let serialize = job.serialize().then(|| sp.read_max());
        let max_slots = self.host.config().pushbuffer_slots;
        let cmds = Channel::build_cmds(&job, sp.id(), serialize, max_slots)?;

        if self.host.faults().should_fail(FaultPoint::CdmaBegin) {
            return Err(Error::Io);
        }
        cdma.begin(cmds.len() as u32)?;

        // Nothing below can fail.
        let end = sp.incr_max(job.syncpt_incrs());
        job.set_syncpt_end(end);
        let job = Arc::new(job);

        cdma.end(job.clone(), &cmds);

        mod_dev_dbg!(
            self.host,
            "channel {}: submitted job (syncpt {} end {}, {} slots)",
            self.slot.id,
            sp.id(),
            end,
            cmds.len()
        );

        self.host
            .intr()
            .add_action(&sp, end, Action::SubmitComplete(cdma.clone()));

        Ok(job)
    }
}

impl Clone for Channel {
    fn clone(&self) -> Self {
        self.slot.refcount.fetch_add(1, Ordering::AcqRel);
        Channel {
            host: self.host.clone(),
            slot: self.slot.clone(),
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if self.slot.refcount.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        let list = self.host.channels();
        let id = self.slot.id;

        self.slot.cdma.stop();
        *self.slot.owner.lock() = None;
        list.clear_bit(id);
        list.sema.up();

        mod_dev_dbg!(self.host, "channel {} released", id);
    }
}

impl core::fmt::Debug for Channel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Channel").field("id", &self.slot.id).finish()
    }
}
