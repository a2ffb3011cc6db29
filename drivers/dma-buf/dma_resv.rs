// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Reservation objects
//!
//! Every shareable buffer carries a [`DmaResv`], which records the fences of the work currently
//! accessing the buffer: at most one exclusive (write) fence and any number of shared (read)
//! fences. Submitters lock the reservation objects of all buffers a job touches, collect the
//! fences the job must wait for, and attach the job's own completion fence before unlocking.
//!
//! The lock is a [`WwMutex`], so that any number of reservation objects can be locked together
//! with a [`WwAcquireCtx`].

use crate::dma_fence::Fence;
use crate::ww_mutex::{WwAcquireCtx, WwClass, WwMutex};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The fences recorded in a reservation object.
#[derive(Default)]
pub struct DmaResvFences {
    excl: Option<Fence>,
    shared: Vec<Fence>,
    shared_max: usize,
}

impl DmaResvFences {
    /// Reserves space for `num` more shared fences.
    ///
    /// Signaled shared fences are pruned first.
    pub fn reserve_shared(&mut self, num: usize) -> Result {
        self.shared.retain(|f| !f.is_signaled());
        self.shared_max = self.shared_max.max(self.shared.len() + num);
        Ok(())
    }

    /// Adds a shared fence into a previously reserved slot.
    ///
    /// A fence from the same context as an existing shared fence replaces it without consuming
    /// a slot.
    pub fn add_shared_fence(&mut self, fence: Fence) -> Result {
        if let Some(old) = self
            .shared
            .iter_mut()
            .find(|f| f.context() == fence.context())
        {
            *old = fence;
            return Ok(());
        }

        if self.shared.len() >= self.shared_max {
            log::error!("dma_resv: add_shared_fence without a reserved slot");
            return Err(Error::NoMemory);
        }

        self.shared.push(fence);
        Ok(())
    }

    /// Replaces the exclusive fence and drops every shared fence.
    pub fn add_excl_fence(&mut self, fence: Fence) {
        self.excl = Some(fence);
        self.shared.clear();
    }

    /// Returns the exclusive fence, if any.
    pub fn excl_fence(&self) -> Option<&Fence> {
        self.excl.as_ref()
    }

    /// Returns the shared fences.
    pub fn shared_fences(&self) -> &[Fence] {
        &self.shared
    }

    /// Returns the unsignaled fences an access must wait for.
    ///
    /// Writers wait for every fence, readers only for the exclusive one.
    pub fn implicit_fences(&self, write: bool) -> Vec<Fence> {
        let mut fences: Vec<Fence> = self.excl.iter().cloned().collect();
        if write {
            fences.extend(self.shared.iter().cloned());
        }
        fences.retain(|f| !f.is_signaled());
        fences
    }
}

/// A reservation object.
pub struct DmaResv {
    lock: WwMutex<DmaResvFences>,
}

impl DmaResv {
    /// Creates a new, empty reservation object of the given lock class.
    pub fn new(class: &Arc<WwClass>) -> DmaResv {
        DmaResv {
            lock: WwMutex::new(class, DmaResvFences::default()),
        }
    }

    /// Locks the reservation object as part of the batch of `ctx`.
    pub fn lock(&self, ctx: &mut WwAcquireCtx) -> Result {
        self.lock.lock(ctx)
    }

    /// Locks the reservation object after backing off a batch.
    pub fn lock_slow(&self, ctx: &mut WwAcquireCtx) {
        self.lock.lock_slow(ctx)
    }

    /// Unlocks the reservation object.
    pub fn unlock(&self, ctx: &mut WwAcquireCtx) {
        self.lock.unlock(ctx)
    }

    /// Returns whether any context holds this reservation object.
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Returns whether `ctx` holds this reservation object.
    pub fn is_held_by(&self, ctx: &WwAcquireCtx) -> bool {
        self.lock.is_held_by(ctx)
    }

    /// Runs `f` on the fences. `ctx` must hold the lock.
    pub fn with_fences<R>(
        &self,
        ctx: &WwAcquireCtx,
        f: impl FnOnce(&mut DmaResvFences) -> R,
    ) -> Result<R> {
        self.lock.with(ctx, f)
    }

    /// Locks the reservation object alone and runs `f` on the fences.
    pub fn with_locked<R>(&self, f: impl FnOnce(&mut DmaResvFences) -> R) -> R {
        self.lock.with_locked(f)
    }

    /// Returns whether every fence relevant to a read (or write) access has signaled.
    pub fn test_signaled(&self, write: bool) -> bool {
        self.lock.peek(|fences| fences.implicit_fences(write).is_empty())
    }

    /// Waits until a read (or write) access would not have to wait for any fence.
    pub fn wait_timeout(&self, write: bool, timeout: Duration) -> Result {
        let deadline = Instant::now() + timeout;
        let fences = self.lock.peek(|fences| fences.implicit_fences(write));

        for fence in fences {
            let left = deadline.saturating_duration_since(Instant::now());
            fence.wait(Some(left))?;
        }

        Ok(())
    }
}
