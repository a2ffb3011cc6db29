// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Syncpoint threshold interrupts
//!
//! Every syncpoint has a list of waiters sorted by threshold. Only the earliest threshold is
//! programmed into the hardware; when its interrupt fires, [`Intr::handle_syncpt`] runs every
//! waiter that is due and programs the next threshold. Waiter actions run with the list lock
//! released, so they may add new waiters or increment syncpoints themselves.

use crate::cdma::Cdma;
use crate::debug::*;
use crate::hw::Host1xHw;
use crate::syncpt::{delta, value_expired, Syncpt};
use crate::{Error, Result};
use dma_buf::Fence;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEBUG_CLASS: DebugFlags = DebugFlags::Intr;

#[derive(Default, Clone, Copy, PartialEq, Eq)]
enum CompletionState {
    #[default]
    Pending,
    Done,
    Interrupted,
}

/// A one-shot completion a thread can block on.
#[derive(Default)]
pub struct Completion {
    state: Mutex<CompletionState>,
    cond: Condvar,
}

impl Completion {
    /// Creates a new, incomplete completion.
    pub fn new() -> Completion {
        Default::default()
    }

    fn finish(&self, to: CompletionState) {
        let mut state = self.state.lock();
        if *state == CompletionState::Pending {
            *state = to;
        }
        drop(state);
        self.cond.notify_all();
    }

    /// Marks the completion done and wakes all waiters.
    pub fn complete(&self) {
        self.finish(CompletionState::Done);
    }

    /// Wakes all waiters with `Error::Interrupted`, unless already done.
    pub fn interrupt(&self) {
        self.finish(CompletionState::Interrupted);
    }

    /// Returns whether the completion is done.
    pub fn is_done(&self) -> bool {
        *self.state.lock() == CompletionState::Done
    }

    /// Blocks until done or until `timeout` elapses. Returns whether the completion is done.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        // Timeouts too large to represent wait forever.
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        while *state == CompletionState::Pending {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.cond.wait(&mut state),
            }
        }

        match *state {
            CompletionState::Interrupted => Err(Error::Interrupted),
            CompletionState::Done => Ok(true),
            CompletionState::Pending => Ok(false),
        }
    }
}

/// What to do once a syncpoint reaches a threshold.
pub enum Action {
    /// Signal a syncpoint-backed fence.
    SignalFence(Fence),
    /// Wake a thread blocked in a syncpoint wait.
    Wakeup(Arc<Completion>),
    /// Retire completed jobs from a channel's sync queue.
    SubmitComplete(Arc<Cdma>),
}

impl Action {
    fn run(self) {
        match self {
            Action::SignalFence(fence) => {
                // The fence may already have been signaled by a poll.
                let _ = fence.signal();
            }
            Action::Wakeup(completion) => completion.complete(),
            Action::SubmitComplete(cdma) => cdma.update(),
        }
    }

    /// Whether the action is dropped when the device shuts down. Job retirement stays armed.
    fn is_cancelable(&self) -> bool {
        !matches!(self, Action::SubmitComplete(_))
    }

    fn cancel(self) {
        match self {
            Action::SignalFence(fence) => {
                let _ = fence.cancel();
            }
            Action::Wakeup(completion) => completion.interrupt(),
            Action::SubmitComplete(_) => {}
        }
    }
}

struct Waiter {
    id: u64,
    threshold: u32,
    action: Action,
}

/// Handle to a registered waiter, used to cancel it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WaiterRef {
    syncpt: u32,
    id: u64,
}

/// Threshold interrupt state of a host1x instance.
pub struct Intr {
    hw: Arc<dyn Host1xHw>,
    syncpts: Vec<Arc<Syncpt>>,
    lists: Vec<Mutex<VecDeque<Waiter>>>,
    next_id: AtomicU64,
    shutdown: AtomicBool,
}

impl Intr {
    pub(crate) fn new(hw: Arc<dyn Host1xHw>, syncpts: &[Arc<Syncpt>]) -> Intr {
        Intr {
            hw,
            syncpts: syncpts.to_vec(),
            lists: syncpts.iter().map(|_| Default::default()).collect(),
            next_id: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Schedules `action` to run once `sp` reaches `threshold`.
    ///
    /// If the threshold has already been reached, the action runs before this returns. After
    /// [`Intr::shutdown`], fences and wakeups are canceled instead of queued.
    pub fn add_action(&self, sp: &Syncpt, threshold: u32, action: Action) -> WaiterRef {
        let id = sp.id();
        let waiter_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let waiter = WaiterRef {
            syncpt: id,
            id: waiter_id,
        };

        {
            let mut list = self.lists[id as usize].lock();

            // Checked under the list lock, see shutdown().
            if action.is_cancelable() && self.shutdown.load(Ordering::SeqCst) {
                drop(list);
                mod_pr_debug!("syncpt {}: waiter {} canceled, shut down", id, waiter_id);
                action.cancel();
                return waiter;
            }

            let pos = list
                .iter()
                .position(|w| delta(w.threshold, threshold) > 0)
                .unwrap_or(list.len());

            list.insert(
                pos,
                Waiter {
                    id: waiter_id,
                    threshold,
                    action,
                },
            );

            if pos == 0 {
                self.hw.intr_set_syncpt_threshold(id, threshold);
            }
        }

        mod_pr_debug!(
            "syncpt {}: waiter {} added for threshold {}",
            id,
            waiter_id,
            threshold
        );

        // The counter may have passed the threshold before it was programmed.
        if value_expired(sp.load(), threshold) {
            self.handle_syncpt(id);
        }

        waiter
    }

    /// Cancels a waiter. Returns `false` if it already ran.
    pub fn remove_action(&self, waiter: &WaiterRef) -> bool {
        let id = waiter.syncpt;
        let mut list = self.lists[id as usize].lock();

        let Some(pos) = list.iter().position(|w| w.id == waiter.id) else {
            return false;
        };
        list.remove(pos);

        if pos == 0 {
            match list.front() {
                Some(next) => self.hw.intr_set_syncpt_threshold(id, next.threshold),
                None => self.hw.intr_disable_syncpt(id),
            }
        }

        true
    }

    /// Handles the threshold interrupt of syncpoint `id`.
    ///
    /// Runs every due waiter in threshold order, then programs the next pending threshold or
    /// disables the interrupt. Does not allocate.
    pub fn handle_syncpt(&self, id: u32) {
        let (Some(sp), Some(list)) = (self.syncpts.get(id as usize), self.lists.get(id as usize))
        else {
            log::warn!("host1x: interrupt for invalid syncpoint {}", id);
            return;
        };

        loop {
            let action = {
                let mut list = list.lock();
                let value = sp.load();

                let Some(front) = list.front() else {
                    self.hw.intr_disable_syncpt(id);
                    return;
                };

                if !value_expired(value, front.threshold) {
                    let threshold = front.threshold;
                    self.hw.intr_set_syncpt_threshold(id, threshold);
                    // Catch an increment that landed before the threshold was programmed.
                    if !value_expired(sp.load(), threshold) {
                        return;
                    }
                    continue;
                }

                match list.pop_front() {
                    Some(waiter) => waiter.action,
                    None => return,
                }
            };

            action.run();
        }
    }

    /// Cancels every pending fence and syncpoint wait. Used when the device goes away.
    ///
    /// Blocked waits return `Error::Interrupted` and fences signal as canceled. Actions added
    /// afterwards are canceled right away.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);

        for (id, list) in self.lists.iter().enumerate() {
            let canceled = {
                let mut list = list.lock();
                let (canceled, keep): (VecDeque<Waiter>, VecDeque<Waiter>) =
                    core::mem::take(&mut *list)
                        .into_iter()
                        .partition(|w| w.action.is_cancelable());
                *list = keep;

                match list.front() {
                    Some(next) => self.hw.intr_set_syncpt_threshold(id as u32, next.threshold),
                    None => self.hw.intr_disable_syncpt(id as u32),
                }
                canceled
            };

            if !canceled.is_empty() {
                mod_pr_debug!("syncpt {}: canceling {} waiters", id, canceled.len());
            }
            for waiter in canceled {
                waiter.action.cancel();
            }
        }
    }

    /// Returns whether [`Intr::shutdown`] was called.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Returns the number of waiters pending on syncpoint `id`.
    pub fn pending(&self, id: u32) -> usize {
        self.lists.get(id as usize).map_or(0, |list| list.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::Host1x;
    use crate::hw::{sim::SimHost1x, tegra124};
    use crate::syncpt::SyncptFlags;

    #[test]
    fn runs_in_threshold_order() {
        let sim = SimHost1x::new(&tegra124::HWCONFIG);
        let host = Host1x::new("host1x", sim.clone());
        let sp = host.syncpts().alloc(SyncptFlags::empty(), "intr").unwrap();
        let base = sp.read_max();
        sp.incr_max(3);

        let done: Vec<_> = (0..3).map(|_| Arc::new(Completion::new())).collect();
        host.intr()
            .add_action(&sp, base + 3, Action::Wakeup(done[2].clone()));
        host.intr()
            .add_action(&sp, base + 1, Action::Wakeup(done[0].clone()));
        host.intr()
            .add_action(&sp, base + 2, Action::Wakeup(done[1].clone()));
        assert_eq!(host.intr().pending(sp.id()), 3);
        assert_eq!(sim.threshold_armed(sp.id()), Some(base + 1));

        sp.cpu_incr();
        assert!(done[0].is_done());
        assert!(!done[1].is_done());
        assert_eq!(sim.threshold_armed(sp.id()), Some(base + 2));

        sp.cpu_incr();
        sp.cpu_incr();
        assert!(done.iter().all(|c| c.is_done()));
        assert_eq!(host.intr().pending(sp.id()), 0);
        assert_eq!(sim.threshold_armed(sp.id()), None);
    }

    #[test]
    fn expired_threshold_runs_immediately() {
        let sim = SimHost1x::new(&tegra124::HWCONFIG);
        let host = Host1x::new("host1x", sim);
        let sp = host.syncpts().alloc(SyncptFlags::empty(), "intr").unwrap();
        let t = sp.incr();

        let done = Arc::new(Completion::new());
        host.intr().add_action(&sp, t, Action::Wakeup(done.clone()));
        assert!(done.is_done());
        assert_eq!(host.intr().pending(sp.id()), 0);
    }

    #[test]
    fn remove_reprograms() {
        let sim = SimHost1x::new(&tegra124::HWCONFIG);
        let host = Host1x::new("host1x", sim.clone());
        let sp = host.syncpts().alloc(SyncptFlags::empty(), "intr").unwrap();
        let base = sp.read_max();

        let c = Arc::new(Completion::new());
        let first = host
            .intr()
            .add_action(&sp, base + 1, Action::Wakeup(c.clone()));
        let second = host
            .intr()
            .add_action(&sp, base + 5, Action::Wakeup(c.clone()));

        assert!(host.intr().remove_action(&first));
        assert!(!host.intr().remove_action(&first));
        assert_eq!(sim.threshold_armed(sp.id()), Some(base + 5));
        assert!(host.intr().remove_action(&second));
        assert_eq!(sim.threshold_armed(sp.id()), None);
        assert!(!c.is_done());
    }
}
