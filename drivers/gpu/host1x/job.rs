// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Jobs
//!
//! A [`Job`] is the unit of work submitted to a channel: an ordered list of gathers (command
//! buffers the channel fetches and executes) and syncpoint waits, followed by a number of
//! increments of the job's syncpoint once the engine finished its work. A job is assembled and
//! pinned by its submitter, then handed to [`Channel::submit`], which reserves the job's
//! syncpoint range and returns the job as a shared, immutable reference. The channel keeps that
//! reference until the job completes.
//!
//! Submitters can attach an opaque payload to a job. It is dropped exactly once, when the last
//! reference to the job goes away, and before the job's buffers are unpinned.

use crate::bo::{Host1xBo, PinnedBo};
use crate::channel::Channel;
use crate::debug::*;
use crate::dev::ClientDevice;
use crate::fault::FaultPoint;
use crate::syncpt::SyncptRef;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

const DEBUG_CLASS: DebugFlags = DebugFlags::Job;

/// Default job timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A command buffer executed by a job.
pub struct JobGather {
    bo: Arc<dyn Host1xBo>,
    words: u32,
    offset: u32,
    addr: Option<u64>,
}

impl JobGather {
    /// Returns the number of words in the gather.
    pub fn words(&self) -> u32 {
        self.words
    }

    /// Returns the offset of the gather within its buffer, in words.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Returns the device address of the gather once pinned.
    pub fn addr(&self) -> Option<u64> {
        self.addr
    }

    /// Returns the buffer holding the gather.
    pub fn bo(&self) -> &Arc<dyn Host1xBo> {
        &self.bo
    }
}

/// A job command, executed in order.
pub enum JobCmd {
    /// Execute a command buffer.
    Gather(JobGather),
    /// Wait for syncpoint `id` to reach `threshold`.
    Wait { id: u32, threshold: u32 },
}

/// A unit of work for a channel.
pub struct Job {
    payload: Option<Box<dyn Any + Send + Sync>>,
    client: Arc<ClientDevice>,
    class: u32,
    cmds: Vec<JobCmd>,
    syncpt: Option<SyncptRef>,
    syncpt_incrs: u32,
    syncpt_end: u32,
    timeout: Duration,
    serialize: bool,
    pins: Vec<PinnedBo>,
    status: Mutex<Option<Error>>,
    channel: Channel,
}

impl Job {
    /// Allocates a job for `channel` with room for `num_cmds` commands and `syncpt_incrs`
    /// increments of its syncpoint.
    ///
    /// Fails with `Error::Invalid` if the increments alone would not fit into the push buffer.
    pub fn new(
        channel: &Channel,
        client: &Arc<ClientDevice>,
        num_cmds: usize,
        syncpt_incrs: u32,
    ) -> Result<Job> {
        if syncpt_incrs >= client.host().config().pushbuffer_slots {
            mod_dev_dbg!(client, "job: {} syncpoint increments", syncpt_incrs);
            return Err(Error::Invalid);
        }

        if client.host().faults().should_fail(FaultPoint::JobAlloc) {
            return Err(Error::NoMemory);
        }

        let mut cmds = Vec::new();
        cmds.try_reserve_exact(num_cmds)
            .map_err(|_| Error::NoMemory)?;

        Ok(Job {
            payload: None,
            client: client.clone(),
            class: client.class(),
            cmds,
            syncpt: None,
            syncpt_incrs,
            syncpt_end: 0,
            timeout: DEFAULT_TIMEOUT,
            serialize: false,
            pins: Vec::new(),
            status: Mutex::new(None),
            channel: channel.clone(),
        })
    }

    /// Appends a gather of `words` words at word offset `offset` within `bo`.
    pub fn add_gather(&mut self, bo: Arc<dyn Host1xBo>, words: u32, offset: u32) {
        self.cmds.push(JobCmd::Gather(JobGather {
            bo,
            words,
            offset,
            addr: None,
        }));
    }

    /// Appends a wait for syncpoint `id` to reach `threshold`.
    pub fn add_wait(&mut self, id: u32, threshold: u32) {
        self.cmds.push(JobCmd::Wait { id, threshold });
    }

    /// Sets the syncpoint the job increments on completion.
    pub fn set_syncpt(&mut self, sp: SyncptRef) {
        self.syncpt = Some(sp);
    }

    /// Sets the job timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Makes the job wait for all previously reserved work on its syncpoint before executing.
    pub fn set_serialize(&mut self, serialize: bool) {
        self.serialize = serialize;
    }

    /// Attaches an opaque payload, dropped when the job is freed.
    pub fn set_payload(&mut self, payload: Box<dyn Any + Send + Sync>) {
        self.payload = Some(payload);
    }

    /// Pins every gather buffer for `dev`. On failure, nothing stays pinned.
    pub fn pin(&mut self, dev: &ClientDevice) -> Result {
        let mut pins = Vec::new();
        for cmd in &self.cmds {
            if let JobCmd::Gather(g) = cmd {
                pins.push(PinnedBo::pin(g.bo.clone(), dev)?);
            }
        }

        let mut pinned = pins.iter();
        for cmd in self.cmds.iter_mut() {
            if let JobCmd::Gather(g) = cmd {
                g.addr = pinned.next().map(|p| p.dma_addr() + g.offset as u64 * 4);
            }
        }
        self.pins = pins;

        mod_dev_dbg!(dev, "job: pinned {} gathers", self.pins.len());
        Ok(())
    }

    /// Returns whether every gather is pinned.
    pub fn is_pinned(&self) -> bool {
        self.gathers().all(|g| g.addr.is_some())
    }

    /// Returns the job's commands in execution order.
    pub fn cmds(&self) -> &[JobCmd] {
        &self.cmds
    }

    /// Returns the job's gathers in execution order.
    pub fn gathers(&self) -> impl Iterator<Item = &JobGather> {
        self.cmds.iter().filter_map(|cmd| match cmd {
            JobCmd::Gather(g) => Some(g),
            JobCmd::Wait { .. } => None,
        })
    }

    /// Returns the channel the job was allocated for.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Returns the client the job was allocated for.
    pub fn client(&self) -> &Arc<ClientDevice> {
        &self.client
    }

    /// Returns the engine class the job's gathers execute in.
    pub fn class(&self) -> u32 {
        self.class
    }

    /// Returns the job's syncpoint.
    pub fn syncpt(&self) -> Option<&SyncptRef> {
        self.syncpt.as_ref()
    }

    /// Returns the number of syncpoint increments the job performs.
    pub fn syncpt_incrs(&self) -> u32 {
        self.syncpt_incrs
    }

    /// Returns the syncpoint value at which the job is complete. Valid once submitted.
    pub fn syncpt_end(&self) -> u32 {
        self.syncpt_end
    }

    pub(crate) fn set_syncpt_end(&mut self, end: u32) {
        self.syncpt_end = end;
    }

    /// Returns the job timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns whether the job is serialized against earlier work on its syncpoint.
    pub fn serialize(&self) -> bool {
        self.serialize
    }

    /// Returns whether the job's syncpoint reached its end value.
    pub fn is_complete(&self) -> bool {
        self.syncpt
            .as_ref()
            .map_or(true, |sp| sp.is_expired(self.syncpt_end))
    }

    /// Returns the error the job completed with, if any.
    pub fn status(&self) -> Option<Error> {
        *self.status.lock()
    }

    pub(crate) fn set_status(&self, err: Error) {
        *self.status.lock() = Some(err);
    }

    /// Waits for the submitted job to complete.
    pub fn wait(&self, timeout: Duration) -> Result {
        let sp = self.syncpt.as_ref().ok_or(Error::Invalid)?;
        sp.wait(self.syncpt_end, timeout)?;

        match self.status() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        if let Some(payload) = self.payload.take() {
            drop(payload);
        }
        mod_dev_dbg!(
            self.client,
            "job: freeing (syncpt end {}, {} pins)",
            self.syncpt_end,
            self.pins.len()
        );
        self.pins.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::Host1x;
    use crate::hw::{sim::SimHost1x, tegra124};
    use crate::iommu::IommuDomain;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestBo;

    impl Host1xBo for TestBo {
        fn size(&self) -> u64 {
            0x1000
        }

        fn phys(&self) -> u64 {
            0x8000_0000
        }
    }

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn setup() -> (Arc<Host1x>, Arc<ClientDevice>, Arc<IommuDomain>, Channel) {
        let host = Host1x::new("host1x", SimHost1x::new(&tegra124::HWCONFIG));
        let domain = IommuDomain::new("vic", 0x10_0000, 0x100_0000);
        let dev = host.register_client("vic", 0x5d, Some(domain.clone()));
        let channel = Channel::request(&dev, false).unwrap();
        (host, dev, domain, channel)
    }

    #[test]
    fn commands_keep_order() {
        let (_host, dev, _domain, channel) = setup();
        let mut job = Job::new(&channel, &dev, 3, 1).unwrap();
        job.add_wait(4, 10);
        job.add_gather(Arc::new(TestBo), 16, 2);
        job.add_wait(5, 11);

        assert!(matches!(job.cmds()[0], JobCmd::Wait { id: 4, threshold: 10 }));
        assert!(matches!(job.cmds()[1], JobCmd::Gather(_)));
        assert!(matches!(job.cmds()[2], JobCmd::Wait { id: 5, threshold: 11 }));
        assert_eq!(job.class(), 0x5d);
        assert_eq!(job.timeout(), DEFAULT_TIMEOUT);
        assert!(!job.is_pinned());
    }

    #[test]
    fn pin_failure_unpins() {
        let (host, dev, domain, channel) = setup();
        let mut job = Job::new(&channel, &dev, 3, 1).unwrap();
        for _ in 0..3 {
            job.add_gather(Arc::new(TestBo), 4, 0);
        }

        host.faults().arm(FaultPoint::Pin, 2, 1);
        assert_eq!(job.pin(&dev), Err(Error::NoMemory));
        assert_eq!(domain.mapped_count(), 0);

        job.pin(&dev).unwrap();
        assert!(job.is_pinned());
        assert_eq!(domain.mapped_count(), 3);
        let g = job.gathers().next().unwrap();
        assert_eq!(domain.translate(g.addr().unwrap()), Some(0x8000_0000));

        drop(job);
        assert_eq!(domain.mapped_count(), 0);
    }

    #[test]
    fn payload_dropped_once() {
        let (_host, dev, _domain, channel) = setup();
        let drops = Arc::new(AtomicUsize::new(0));

        let mut job = Job::new(&channel, &dev, 1, 1).unwrap();
        job.set_payload(Box::new(DropCounter(drops.clone())));
        let job = Arc::new(job);
        let other = job.clone();

        drop(job);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(other);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn alloc_fault() {
        let (host, dev, _domain, channel) = setup();
        host.faults().fail_next(FaultPoint::JobAlloc);
        assert!(matches!(Job::new(&channel, &dev, 1, 1), Err(Error::NoMemory)));
    }

    #[test]
    fn increment_count_bounded_by_push_buffer() {
        let (host, dev, _domain, channel) = setup();
        let slots = host.config().pushbuffer_slots;

        assert!(matches!(
            Job::new(&channel, &dev, 1, u32::MAX),
            Err(Error::Invalid)
        ));
        assert!(matches!(Job::new(&channel, &dev, 1, slots), Err(Error::Invalid)));
        assert!(Job::new(&channel, &dev, 1, slots - 2).is_ok());
    }
}
