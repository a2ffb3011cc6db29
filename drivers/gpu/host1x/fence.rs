// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Syncpoint fences
//!
//! Bridges syncpoint thresholds and generic [`Fence`]s in both directions:
//!
//! - [`create`] wraps a syncpoint threshold into a fence, signaled from the threshold interrupt.
//! - [`extract`] recognizes such a fence again, so that a job can wait on it natively in its
//!   command stream instead of on the CPU.
//! - [`TimelineGate`] handles everything else: it reserves one increment on a syncpoint, pushes
//!   a native wait for it into the job, and performs the increment from the CPU once a set of
//!   arbitrary fences has signaled.

use crate::debug::*;
use crate::dev::Host1x;
use crate::intr::Action;
use crate::job::Job;
use crate::syncpt::SyncptRef;
use crate::Result;
use dma_buf::{Fence, FenceOps};

const DEBUG_CLASS: DebugFlags = DebugFlags::Fence;

/// Fence ops of a syncpoint threshold fence.
pub struct SyncptFence {
    syncpt: SyncptRef,
    threshold: u32,
    timeline: String,
}

impl SyncptFence {
    /// Returns the syncpoint of this fence.
    pub fn syncpt(&self) -> &SyncptRef {
        &self.syncpt
    }

    /// Returns the threshold at which this fence signals.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

impl FenceOps for SyncptFence {
    fn driver_name(&self) -> &str {
        "host1x"
    }

    fn timeline_name(&self) -> &str {
        &self.timeline
    }

    fn signaled(&self) -> bool {
        self.syncpt.is_expired(self.threshold)
    }
}

/// Creates a fence that signals once `sp` reaches `threshold`.
pub fn create(sp: &SyncptRef, threshold: u32) -> Result<Fence> {
    let host = sp.host()?;
    Ok(create_on(&host, sp, threshold))
}

/// Creates a fence that signals once `sp`, a syncpoint of `host`, reaches `threshold`.
pub fn create_on(host: &Host1x, sp: &SyncptRef, threshold: u32) -> Fence {
    let fence = Fence::new(
        SyncptFence {
            syncpt: sp.clone(),
            threshold,
            timeline: format!("syncpoint-{}", sp.id()),
        },
        host.syncpt_fence_context(sp.id()),
        threshold as u64,
    );

    mod_pr_debug!("fence: syncpt {} threshold {}", sp.id(), threshold);

    host.intr()
        .add_action(sp, threshold, Action::SignalFence(fence.clone()));

    fence
}

/// Returns the syncpoint id and threshold behind a syncpoint fence.
pub fn extract(fence: &Fence) -> Option<(u32, u32)> {
    fence
        .ops::<SyncptFence>()
        .map(|ops| (ops.syncpt.id(), ops.threshold))
}

/// Pushes native waits for every unexpired syncpoint fence within `fence` into `job`. Fence
/// arrays are flattened.
///
/// Returns whether `fence` also depends on something other than syncpoints that has not
/// signaled yet; the caller has to wait for those some other way.
pub fn push_native_waits(job: &mut Job, fence: &Fence) -> bool {
    let mut foreign = false;

    for f in fence.flatten() {
        match f.ops::<SyncptFence>() {
            Some(ops) => {
                if !ops.syncpt.is_expired(ops.threshold) {
                    job.add_wait(ops.syncpt.id(), ops.threshold);
                }
            }
            None => foreign |= !f.is_signaled(),
        }
    }

    foreign
}

/// A syncpoint increment performed by the CPU once a set of fences has signaled.
///
/// [`TimelineGate::reserve`] reserves one increment on the syncpoint; its threshold is pushed
/// as a wait into the job. [`TimelineGate::arm`] then hands over the fences to wait for. The
/// increment only happens once every earlier reservation on the syncpoint has also completed,
/// so it never makes earlier work look complete.
///
/// A gate that is dropped without being armed arms itself with no fences, so that the reserved
/// increment is not lost.
pub struct TimelineGate {
    syncpt: SyncptRef,
    threshold: u32,
    armed: bool,
}

impl TimelineGate {
    /// Reserves one increment on `sp`.
    pub fn reserve(sp: &SyncptRef) -> TimelineGate {
        let threshold = sp.incr_max(1);
        mod_pr_debug!("gate: syncpt {} reserved {}", sp.id(), threshold);
        TimelineGate {
            syncpt: sp.clone(),
            threshold,
            armed: false,
        }
    }

    /// Returns the syncpoint value at which the gate opens.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Returns the syncpoint of the gate.
    pub fn syncpt(&self) -> &SyncptRef {
        &self.syncpt
    }

    /// Opens the gate once every fence in `deps` has signaled.
    pub fn arm(mut self, deps: Vec<Fence>) {
        self.armed = true;
        self.arm_inner(deps);
    }

    fn arm_inner(&self, mut deps: Vec<Fence>) {
        let sp = self.syncpt.clone();
        let threshold = self.threshold;

        let host = match sp.host() {
            Ok(host) => host,
            Err(_) => {
                sp.cpu_incr();
                return;
            }
        };

        // Everything reserved before the gate.
        match create(&sp, threshold.wrapping_sub(1)) {
            Ok(prev) => deps.push(prev),
            Err(e) => log::warn!("gate: syncpt {}: no marker fence: {:?}", sp.id(), e),
        }

        mod_pr_debug!(
            "gate: syncpt {} threshold {} armed with {} fences",
            sp.id(),
            threshold,
            deps.len()
        );

        let merged = Fence::array(deps, host.timeline_fence_context(), threshold as u64);
        let open = move |f: &Fence| {
            if f.error() != 0 {
                log::warn!(
                    "gate: syncpt {} threshold {}: dependency failed ({})",
                    sp.id(),
                    threshold,
                    f.error()
                );
            }
            sp.cpu_incr();
        };

        if let Err(open) = merged.add_callback(open) {
            open(&merged);
        }
    }
}

impl Drop for TimelineGate {
    fn drop(&mut self) {
        if !self.armed {
            mod_pr_debug!(
                "gate: syncpt {} threshold {} dropped unarmed",
                self.syncpt.id(),
                self.threshold
            );
            self.arm_inner(Vec::new());
        }
    }
}
