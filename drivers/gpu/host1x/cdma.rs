// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Command DMA
//!
//! Each channel owns a push buffer, a ring of 2-word slots the channel DMA engine fetches
//! commands from. Submitting a job reserves slots, writes the job's commands and kicks the
//! engine; the job is then kept in the sync queue until its syncpoint reaches the job's end
//! value, at which point its slots are returned and the queue's job reference is dropped.
//!
//! Jobs that stay in the sync queue past their timeout mark the channel as hung. The hung
//! channel's DMA is stopped and the syncpoint increments its pending jobs still owe are
//! performed from the CPU, so that waiters are released.

use crate::debug::*;
use crate::hw::opcodes::NOP;
use crate::hw::Host1xHw;
use crate::job::Job;
use crate::syncpt::value_expired;
use crate::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

const DEBUG_CLASS: DebugFlags = DebugFlags::Cdma;

/// Ring of 2-word command slots.
pub(crate) struct PushBuffer {
    ring: Vec<u32>,
    put: usize,
    free: u32,
    slots: u32,
}

impl PushBuffer {
    fn new(slots: u32) -> PushBuffer {
        PushBuffer {
            ring: vec![NOP; 2 * slots as usize],
            put: 0,
            free: slots,
            slots,
        }
    }

    fn push(&mut self, op1: u32, op2: u32) {
        self.ring[self.put] = op1;
        self.ring[self.put + 1] = op2;
        self.put = (self.put + 2) % self.ring.len();
    }

    fn pop(&mut self, slots: u32) {
        self.free = (self.free + slots).min(self.slots);
    }

    fn reset(&mut self) {
        self.put = 0;
        self.free = self.slots;
    }
}

struct QueuedJob {
    job: Arc<Job>,
    slots: u32,
    submitted: Instant,
}

struct CdmaInner {
    push_buffer: Option<PushBuffer>,
    running: bool,
    hung: bool,
    interrupted: bool,
    sync_queue: VecDeque<QueuedJob>,
}

/// Command DMA state of one channel.
pub struct Cdma {
    id: u32,
    hw: Arc<dyn Host1xHw>,
    inner: Mutex<CdmaInner>,
    cond: Condvar,
}

impl Cdma {
    pub(crate) fn new(id: u32, hw: Arc<dyn Host1xHw>) -> Cdma {
        Cdma {
            id,
            hw,
            inner: Mutex::new(CdmaInner {
                push_buffer: None,
                running: false,
                hung: false,
                interrupted: false,
                sync_queue: VecDeque::new(),
            }),
            cond: Condvar::new(),
        }
    }

    /// Prepares the channel for use. The push buffer is allocated on first use and kept
    /// afterwards.
    pub(crate) fn init(&self) -> Result {
        let slots = self.hw.config().pushbuffer_slots;
        let mut inner = self.inner.lock();

        match inner.push_buffer.as_mut() {
            Some(pb) => pb.reset(),
            None => {
                mod_pr_debug!("cdma {}: allocating {} slot push buffer", self.id, slots);
                inner.push_buffer = Some(PushBuffer::new(slots));
            }
        }

        inner.running = false;
        inner.hung = false;
        Ok(())
    }

    /// Reserves `slots` push buffer slots, waiting for in-flight jobs to retire if needed.
    /// Starts command DMA if it is not running.
    pub(crate) fn begin(&self, slots: u32) -> Result {
        let mut inner = self.inner.lock();

        loop {
            if inner.interrupted {
                return Err(Error::Interrupted);
            }
            if inner.hung {
                return Err(Error::Hang);
            }
            let pb = inner.push_buffer.as_ref().ok_or(Error::NoDevice)?;
            if slots > pb.slots {
                return Err(Error::Invalid);
            }
            if pb.free >= slots {
                break;
            }
            mod_pr_debug!("cdma {}: waiting for {} free slots", self.id, slots);
            self.cond.wait(&mut inner);
        }

        if let Some(pb) = inner.push_buffer.as_mut() {
            pb.free -= slots;
        }

        if !inner.running {
            self.hw.cdma_start(self.id);
            inner.running = true;
        }

        Ok(())
    }

    /// Writes the command slots reserved with [`Cdma::begin`], queues `job` and kicks the
    /// engine.
    pub(crate) fn end(&self, job: Arc<Job>, cmds: &[(u32, u32)]) {
        let mut inner = self.inner.lock();

        if let Some(pb) = inner.push_buffer.as_mut() {
            for &(op1, op2) in cmds {
                pb.push(op1, op2);
            }
        }

        inner.sync_queue.push_back(QueuedJob {
            job,
            slots: cmds.len() as u32,
            submitted: Instant::now(),
        });

        let words: Vec<u32> = cmds.iter().flat_map(|&(a, b)| [a, b]).collect();
        self.hw.cdma_kick(self.id, &words);

        mod_pr_debug!(
            "cdma {}: kicked {} slots ({} jobs queued)",
            self.id,
            cmds.len(),
            inner.sync_queue.len()
        );
    }

    /// Retires completed jobs from the head of the sync queue.
    pub(crate) fn update(&self) {
        loop {
            let retired = {
                let mut inner = self.inner.lock();
                match inner.sync_queue.front() {
                    Some(q) if q.job.is_complete() => {}
                    _ => break,
                }
                let Some(q) = inner.sync_queue.pop_front() else {
                    break;
                };
                if let Some(pb) = inner.push_buffer.as_mut() {
                    pb.pop(q.slots);
                }
                q
            };

            mod_pr_debug!(
                "cdma {}: retired job (syncpt end {})",
                self.id,
                retired.job.syncpt_end()
            );
            self.cond.notify_all();
            // The job reference is dropped here, outside of the lock.
        }
    }

    /// Checks the oldest pending job against its timeout. Returns whether the channel was
    /// newly marked hung.
    pub(crate) fn check_timeout(&self, now: Instant) -> bool {
        let owed = {
            let mut inner = self.inner.lock();
            if inner.hung {
                return false;
            }

            let Some(front) = inner.sync_queue.front() else {
                return false;
            };
            if front.job.is_complete()
                || now.saturating_duration_since(front.submitted) < front.job.timeout()
            {
                return false;
            }

            log::error!(
                "host1x: channel {}: job timed out (syncpt {:?} end {})",
                self.id,
                front.job.syncpt().map(|sp| sp.id()),
                front.job.syncpt_end()
            );

            inner.hung = true;
            inner.running = false;
            self.hw.cdma_stop(self.id);

            inner
                .sync_queue
                .iter()
                .map(|q| {
                    q.job.set_status(Error::Hang);
                    q.job.clone()
                })
                .collect::<Vec<_>>()
        };

        self.cond.notify_all();

        // Perform the increments the stopped engine still owed, so that waiters and the sync
        // queue make progress.
        for job in owed {
            if let Some(sp) = job.syncpt() {
                while !value_expired(sp.load(), job.syncpt_end()) {
                    sp.cpu_incr();
                }
            }
        }

        true
    }

    /// Stops command DMA. Pending jobs stay queued.
    pub(crate) fn stop(&self) {
        let mut inner = self.inner.lock();
        if inner.running {
            self.hw.cdma_stop(self.id);
            inner.running = false;
        }
    }

    /// Wakes submitters waiting for push buffer space with `Error::Interrupted`. Further
    /// submissions fail the same way.
    pub(crate) fn interrupt(&self) {
        self.inner.lock().interrupted = true;
        self.cond.notify_all();
    }

    /// Returns whether the channel is hung.
    pub(crate) fn is_hung(&self) -> bool {
        self.inner.lock().hung
    }

    /// Returns the number of jobs in the sync queue.
    pub(crate) fn pending_jobs(&self) -> usize {
        self.inner.lock().sync_queue.len()
    }

    /// Returns the number of free push buffer slots, or `None` before first use.
    pub(crate) fn free_slots(&self) -> Option<u32> {
        self.inner.lock().push_buffer.as_ref().map(|pb| pb.free)
    }
}
