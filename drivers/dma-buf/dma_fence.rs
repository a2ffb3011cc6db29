// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Single-shot completion fences
//!
//! A [`Fence`] is a reference-counted handle to a completion signal that starts out unsignaled
//! and is signaled exactly once by its producer. Consumers can block on it, poll it, or attach
//! callbacks which run exactly once when it signals. The producer-specific behavior lives behind
//! the [`FenceOps`] trait, which also lets a producer recognize its own fences again (see
//! [`Fence::ops`]).
//!
//! Fences belong to a fence context (a timeline) identified by a number allocated from
//! [`FenceContexts`], and carry a sequence number within that timeline.

use crate::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

/// Error a fence carries when it was canceled instead of completed.
pub const ECANCELED: i32 = -125;

/// Producer-specific fence behavior.
pub trait FenceOps: Any + Send + Sync {
    /// Name of the driver that created the fence.
    fn driver_name(&self) -> &str;

    /// Name of the timeline the fence belongs to.
    fn timeline_name(&self) -> &str;

    /// Polls the producer for completion.
    ///
    /// Producers that always signal their fences explicitly can keep the default.
    fn signaled(&self) -> bool {
        false
    }
}

/// A range of fence contexts allocated together.
#[derive(Debug)]
pub struct FenceContexts {
    start: u64,
    count: u32,
    name: &'static str,
    seqnos: Vec<AtomicU64>,
}

impl FenceContexts {
    /// Allocates `count` new fence contexts.
    pub fn new(count: u32, name: &'static str) -> FenceContexts {
        let start = NEXT_CONTEXT.fetch_add(count as u64, Ordering::Relaxed);
        FenceContexts {
            start,
            count,
            name,
            seqnos: (0..count).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Returns the context number of the context at `context` within this range.
    pub fn context(&self, context: u32) -> u64 {
        assert!(context < self.count);
        self.start + context as u64
    }

    /// Returns the name of this range of contexts.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Creates a new fence on the given context, with the next sequence number of that context.
    pub fn new_fence<T: FenceOps>(&self, context: u32, ops: T) -> Fence {
        let seqno = self.seqnos[context as usize].fetch_add(1, Ordering::Relaxed) + 1;
        Fence::new(ops, self.context(context), seqno)
    }
}

type Callback = Box<dyn FnOnce(&Fence) + Send>;

struct State {
    signaled: bool,
    error: i32,
    timestamp: Option<Instant>,
    callbacks: Vec<Callback>,
}

struct FenceObject {
    context: u64,
    seqno: u64,
    ops: Arc<dyn FenceOps>,
    any: Arc<dyn Any + Send + Sync>,
    state: Mutex<State>,
    cond: Condvar,
}

/// A reference to a fence object.
#[derive(Clone)]
pub struct Fence(Arc<FenceObject>);

impl Fence {
    /// Creates a new unsignaled fence with explicit context and sequence number.
    pub fn new<T: FenceOps>(ops: T, context: u64, seqno: u64) -> Fence {
        let ops = Arc::new(ops);
        let any: Arc<dyn Any + Send + Sync> = ops.clone();

        Fence(Arc::new(FenceObject {
            context,
            seqno,
            ops,
            any,
            state: Mutex::new(State {
                signaled: false,
                error: 0,
                timestamp: None,
                callbacks: Vec::new(),
            }),
            cond: Condvar::new(),
        }))
    }

    /// Creates a fence collection that signals once every fence in `fences` has signaled.
    ///
    /// Errors of component fences propagate to the array. An empty array is signaled on
    /// creation.
    pub fn array(fences: Vec<Fence>, context: u64, seqno: u64) -> Fence {
        let pending = fences.len();
        let array = Fence::new(
            FenceArray {
                fences: fences.clone(),
                pending: AtomicUsize::new(pending),
            },
            context,
            seqno,
        );

        if pending == 0 {
            let _ = array.signal();
            return array;
        }

        for fence in fences {
            let parent = array.clone();
            if let Err(cb) = fence.add_callback(move |f| FenceArray::component_done(&parent, f)) {
                cb(&fence);
            }
        }

        array
    }

    /// Returns the fence context number.
    pub fn context(&self) -> u64 {
        self.0.context
    }

    /// Returns the sequence number within the fence context.
    pub fn seqno(&self) -> u64 {
        self.0.seqno
    }

    /// Returns the name of the driver that created this fence.
    pub fn driver_name(&self) -> &str {
        self.0.ops.driver_name()
    }

    /// Returns the name of the timeline this fence belongs to.
    pub fn timeline_name(&self) -> &str {
        self.0.ops.timeline_name()
    }

    /// Returns the producer ops as `T`, if this fence was created with ops of that type.
    pub fn ops<T: FenceOps>(&self) -> Option<&T> {
        self.0.any.downcast_ref::<T>()
    }

    /// Returns whether both handles refer to the same fence object.
    pub fn ptr_eq(&self, other: &Fence) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Returns the component fences if this is a fence array, or this fence otherwise.
    ///
    /// Nested arrays are flattened.
    pub fn flatten(&self) -> Vec<Fence> {
        match self.ops::<FenceArray>() {
            Some(array) => array.fences.iter().flat_map(|f| f.flatten()).collect(),
            None => vec![self.clone()],
        }
    }

    /// Records an error to be reported with the signal. Must be called before signaling.
    pub fn set_error(&self, error: i32) {
        let mut state = self.0.state.lock();
        if state.signaled {
            log::warn!(
                "dma_fence: set_error on signaled fence {}:{}",
                self.0.context,
                self.0.seqno
            );
            return;
        }
        state.error = error;
    }

    /// Returns the error recorded on this fence, or 0.
    pub fn error(&self) -> i32 {
        self.0.state.lock().error
    }

    /// Returns the time at which the fence was signaled.
    pub fn timestamp(&self) -> Option<Instant> {
        self.0.state.lock().timestamp
    }

    /// Signals the fence, waking all waiters and running all callbacks.
    ///
    /// Returns `Error::Invalid` if the fence was already signaled.
    pub fn signal(&self) -> Result {
        self.signal_with(None)
    }

    /// Signals the fence with [`ECANCELED`], for producers that go away before completing it.
    /// Blocked waiters return `Error::Interrupted`.
    ///
    /// Returns `Error::Invalid` if the fence was already signaled.
    pub fn cancel(&self) -> Result {
        self.signal_with(Some(ECANCELED))
    }

    fn signal_with(&self, error: Option<i32>) -> Result {
        let callbacks = {
            let mut state = self.0.state.lock();
            if state.signaled {
                return Err(Error::Invalid);
            }
            if let Some(error) = error {
                state.error = error;
            }
            state.signaled = true;
            state.timestamp = Some(Instant::now());
            core::mem::take(&mut state.callbacks)
        };

        self.0.cond.notify_all();

        for cb in callbacks {
            cb(self);
        }

        Ok(())
    }

    /// Returns whether the fence is signaled, polling the producer if necessary.
    pub fn is_signaled(&self) -> bool {
        if self.0.state.lock().signaled {
            return true;
        }

        if self.0.ops.signaled() {
            let _ = self.signal();
            return true;
        }

        false
    }

    /// Registers a callback to run when the fence signals.
    ///
    /// If the fence has already signaled, the callback is handed back unrun.
    pub fn add_callback<F>(&self, cb: F) -> core::result::Result<(), F>
    where
        F: FnOnce(&Fence) + Send + 'static,
    {
        if self.is_signaled() {
            return Err(cb);
        }

        let mut state = self.0.state.lock();
        if state.signaled {
            return Err(cb);
        }
        state.callbacks.push(Box::new(cb));
        Ok(())
    }

    /// Blocks until the fence signals or `timeout` elapses. `None` waits forever.
    ///
    /// A canceled fence wakes its waiters with `Error::Interrupted`.
    pub fn wait(&self, timeout: Option<Duration>) -> Result {
        if self.is_signaled() {
            return Fence::wait_result(self.error());
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.0.state.lock();

        while !state.signaled {
            match deadline {
                None => self.0.cond.wait(&mut state),
                Some(deadline) => {
                    if self.0.cond.wait_until(&mut state, deadline).timed_out() && !state.signaled
                    {
                        return Err(Error::TimedOut);
                    }
                }
            }
        }

        Fence::wait_result(state.error)
    }

    fn wait_result(error: i32) -> Result {
        match error {
            ECANCELED => Err(Error::Interrupted),
            _ => Ok(()),
        }
    }
}

impl core::fmt::Debug for Fence {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Fence")
            .field("driver", &self.driver_name())
            .field("timeline", &self.timeline_name())
            .field("context", &self.0.context)
            .field("seqno", &self.0.seqno)
            .field("signaled", &self.0.state.lock().signaled)
            .finish()
    }
}

/// Ops for a fence that aggregates other fences.
pub struct FenceArray {
    fences: Vec<Fence>,
    pending: AtomicUsize,
}

impl FenceArray {
    fn component_done(parent: &Fence, fence: &Fence) {
        let error = fence.error();
        if error != 0 {
            parent.set_error(error);
        }

        let Some(array) = parent.ops::<FenceArray>() else {
            return;
        };

        if array.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _ = parent.signal();
        }
    }

    /// Returns the fences in this array.
    pub fn fences(&self) -> &[Fence] {
        &self.fences
    }
}

impl FenceOps for FenceArray {
    fn driver_name(&self) -> &str {
        "dma_fence_array"
    }

    fn timeline_name(&self) -> &str {
        "unbound"
    }
}
