// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Syncpoints
//!
//! A syncpoint is a 32-bit hardware counter. Engines increment it as they finish work, command
//! streams and the CPU wait for it to reach a threshold. The driver shadows two values per
//! syncpoint:
//!
//! - `max`, the value the counter will have once all work queued so far has completed. Every
//!   submitter reserves its increments by bumping `max` atomically, and the new value is the
//!   threshold its work completes at.
//! - `min`, the last value read back from the hardware.
//!
//! Both only move forward, modulo 2^32. A threshold is reached when `min - threshold`, taken as
//! a signed 32-bit value, is non-negative; this keeps comparisons correct across wraparound as
//! long as no two live thresholds are more than 2^31 apart.

use crate::debug::*;
use crate::dev::Host1x;
use crate::hw::Host1xHw;
use crate::intr::{Action, Completion};
use crate::{Error, Result};
use bitflags::bitflags;
use dma_buf::file::FdTable;
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

const DEBUG_CLASS: DebugFlags = DebugFlags::Syncpt;

bitflags! {
    /// Syncpoint allocation flags.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct SyncptFlags: u32 {
        /// `max` is tracked by the client rather than by job submission.
        const CLIENT_MANAGED = 1 << 0;
    }
}

/// Signed distance from `b` to `a`, wraparound aware.
#[inline]
pub fn delta(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

/// Returns whether a counter at `value` has reached `threshold`.
#[inline]
pub fn value_expired(value: u32, threshold: u32) -> bool {
    delta(value, threshold) >= 0
}

#[derive(Default)]
struct SyncptInner {
    name: Option<String>,
    flags: SyncptFlags,
}

/// A single hardware syncpoint.
pub struct Syncpt {
    id: u32,
    min: AtomicU32,
    max: AtomicU32,
    refcount: AtomicU32,
    inner: Mutex<SyncptInner>,
    hw: Arc<dyn Host1xHw>,
    host: Weak<Host1x>,
    list_lock: Arc<Mutex<()>>,
}

impl Syncpt {
    /// Returns the hardware index of this syncpoint.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns the name given at allocation, if allocated.
    pub fn name(&self) -> Option<String> {
        self.inner.lock().name.clone()
    }

    /// Returns the allocation flags.
    pub fn flags(&self) -> SyncptFlags {
        self.inner.lock().flags
    }

    /// Returns whether the syncpoint is currently allocated.
    pub fn is_allocated(&self) -> bool {
        self.refcount.load(Ordering::Acquire) > 0
    }

    /// Returns the host1x instance this syncpoint belongs to.
    pub fn host(&self) -> Result<Arc<Host1x>> {
        self.host.upgrade().ok_or(Error::NoDevice)
    }

    /// Reserves `incrs` increments. Returns the new `max`, the value the counter reaches once
    /// they have all happened.
    pub fn incr_max(&self, incrs: u32) -> u32 {
        self.max
            .fetch_add(incrs, Ordering::AcqRel)
            .wrapping_add(incrs)
    }

    /// Returns the cached counter value.
    pub fn read_min(&self) -> u32 {
        self.min.load(Ordering::Acquire)
    }

    /// Returns the value the counter reaches once all reserved work completes.
    pub fn read_max(&self) -> u32 {
        self.max.load(Ordering::Acquire)
    }

    /// Reads the counter from the hardware and updates the cached value.
    pub fn load(&self) -> u32 {
        let mut live = 0;
        let _ = self
            .min
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |_| {
                live = self.hw.syncpt_load(self.id);
                Some(live)
            });

        if !self.flags().contains(SyncptFlags::CLIENT_MANAGED)
            && delta(live, self.read_max()) > 0
        {
            log::error!(
                "host1x: syncpoint {} value {} exceeds reserved maximum {}",
                self.id,
                live,
                self.read_max()
            );
        }

        live
    }

    /// Returns whether the cached counter value has reached `threshold`.
    pub fn is_expired(&self, threshold: u32) -> bool {
        value_expired(self.read_min(), threshold)
    }

    /// Increments the counter from the CPU. The increment must have been reserved with
    /// [`Syncpt::incr_max`] beforehand.
    pub fn cpu_incr(&self) {
        mod_pr_debug!("syncpt {}: CPU increment", self.id);
        self.hw.syncpt_cpu_incr(self.id);
        self.load();
    }

    /// Reserves and performs a single CPU increment. Returns the new `max`.
    pub fn incr(&self) -> u32 {
        let value = self.incr_max(1);
        self.cpu_incr();
        value
    }

    /// Waits for the counter to reach `threshold`. Returns the counter value.
    ///
    /// A zero timeout polls once and returns `Error::Again` if the threshold is not reached.
    /// Returns `Error::Interrupted` if the device shuts down during the wait.
    pub fn wait(&self, threshold: u32, timeout: Duration) -> Result<u32> {
        if self.is_expired(threshold) {
            return Ok(self.read_min());
        }

        let value = self.load();
        if value_expired(value, threshold) {
            return Ok(value);
        }

        if timeout.is_zero() {
            return Err(Error::Again);
        }

        let host = self.host()?;
        let done = Arc::new(Completion::new());
        let waiter = host
            .intr()
            .add_action(self, threshold, Action::Wakeup(done.clone()));

        match done.wait_timeout(timeout) {
            Ok(true) => return Ok(self.read_min()),
            Ok(false) => {}
            Err(e) => {
                host.intr().remove_action(&waiter);
                mod_pr_debug!("syncpt {}: wait for {} interrupted", self.id, threshold);
                return Err(e);
            }
        }

        host.intr().remove_action(&waiter);

        let value = self.load();
        if value_expired(value, threshold) {
            return Ok(value);
        }

        dev_warn!(
            host,
            "syncpoint {} wait for {} timed out (value {}, max {})",
            self.id,
            threshold,
            value,
            self.read_max()
        );
        Err(Error::TimedOut)
    }

    fn get_unless_zero(self: &Arc<Self>) -> Option<SyncptRef> {
        self.refcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| {
                (r > 0).then_some(r + 1)
            })
            .ok()
            .map(|_| SyncptRef(self.clone()))
    }
}

/// A counted reference to an allocated syncpoint. The syncpoint is freed when the last
/// reference is dropped.
pub struct SyncptRef(Arc<Syncpt>);

impl Deref for SyncptRef {
    type Target = Syncpt;

    fn deref(&self) -> &Syncpt {
        &self.0
    }
}

impl Clone for SyncptRef {
    fn clone(&self) -> Self {
        self.0.refcount.fetch_add(1, Ordering::AcqRel);
        SyncptRef(self.0.clone())
    }
}

impl Drop for SyncptRef {
    fn drop(&mut self) {
        let sp = &self.0;

        // Fast path: not the last reference.
        if sp
            .refcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| {
                (r > 1).then(|| r - 1)
            })
            .is_ok()
        {
            return;
        }

        let _guard = sp.list_lock.lock();
        if sp.refcount.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        let mut inner = sp.inner.lock();
        mod_pr_debug!(
            "syncpt {}: freeing ({:?})",
            sp.id,
            inner.name.as_deref().unwrap_or("")
        );
        *inner = Default::default();
    }
}

impl core::fmt::Debug for SyncptRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SyncptRef")
            .field("id", &self.id)
            .field("min", &self.read_min())
            .field("max", &self.read_max())
            .finish()
    }
}

/// The fixed set of syncpoints of a host1x instance.
pub struct SyncptList {
    pts: Vec<Arc<Syncpt>>,
    lock: Arc<Mutex<()>>,
}

impl SyncptList {
    pub(crate) fn new(hw: &Arc<dyn Host1xHw>, host: &Weak<Host1x>) -> SyncptList {
        let lock = Arc::new(Mutex::new(()));
        let pts = (0..hw.config().nb_pts)
            .map(|id| {
                let value = hw.syncpt_load(id);
                Arc::new(Syncpt {
                    id,
                    min: AtomicU32::new(value),
                    max: AtomicU32::new(value),
                    refcount: AtomicU32::new(0),
                    inner: Default::default(),
                    hw: hw.clone(),
                    host: host.clone(),
                    list_lock: lock.clone(),
                })
            })
            .collect();

        SyncptList { pts, lock }
    }

    /// Allocates a free syncpoint.
    pub fn alloc(&self, flags: SyncptFlags, name: &str) -> Result<SyncptRef> {
        let _guard = self.lock.lock();

        let sp = self
            .pts
            .iter()
            .find(|sp| !sp.is_allocated())
            .ok_or(Error::Busy)?;

        {
            let mut inner = sp.inner.lock();
            inner.name = Some(name.to_owned());
            inner.flags = flags;
        }

        // A free syncpoint has no work pending, start from whatever the previous owner left.
        let value = sp.hw.syncpt_load(sp.id);
        sp.min.store(value, Ordering::Release);
        sp.max.store(value, Ordering::Release);

        sp.refcount.store(1, Ordering::Release);
        mod_pr_debug!("syncpt {}: allocated to {}", sp.id, name);

        Ok(SyncptRef(sp.clone()))
    }

    /// Takes a reference to syncpoint `id` if it is allocated.
    pub fn get_by_id(&self, id: u32) -> Option<SyncptRef> {
        let _guard = self.lock.lock();
        self.pts.get(id as usize)?.get_unless_zero()
    }

    /// Returns syncpoint `id` whether or not it is allocated.
    pub fn get_by_id_noref(&self, id: u32) -> Option<&Arc<Syncpt>> {
        self.pts.get(id as usize)
    }

    /// Returns all syncpoints.
    pub fn all(&self) -> &[Arc<Syncpt>] {
        &self.pts
    }

    /// Returns the number of allocated syncpoints.
    pub fn allocated_count(&self) -> usize {
        self.pts.iter().filter(|sp| sp.is_allocated()).count()
    }
}

/// A syncpoint handed out to userspace as a file descriptor.
pub struct SyncptFile(SyncptRef);

impl SyncptFile {
    /// Wraps a syncpoint reference for installation into an fd table.
    pub fn new(sp: SyncptRef) -> Arc<SyncptFile> {
        Arc::new(SyncptFile(sp))
    }

    /// Returns the syncpoint.
    pub fn syncpt(&self) -> &SyncptRef {
        &self.0
    }
}

/// Returns a new reference to the syncpoint behind `fd`.
pub fn fd_get(fds: &FdTable, fd: i32) -> Option<SyncptRef> {
    fds.get::<SyncptFile>(fd).map(|file| file.0.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::{sim::SimHost1x, tegra124};

    fn host() -> (Arc<SimHost1x>, Arc<Host1x>) {
        let sim = SimHost1x::new(&tegra124::HWCONFIG);
        let host = Host1x::new("host1x", sim.clone());
        (sim, host)
    }

    #[test]
    fn expiry_wraps() {
        assert!(value_expired(5, 5));
        assert!(value_expired(6, 5));
        assert!(!value_expired(4, 5));
        assert!(value_expired(0x10, 0xffff_fff0));
        assert!(!value_expired(0xffff_fff0, 0x10));
    }

    #[test]
    fn wraparound_threshold() {
        let (sim, host) = host();
        sim.write_syncpt(0, 0xffff_fff0);
        let sp = host.syncpts().alloc(SyncptFlags::empty(), "wrap").unwrap();
        assert_eq!(sp.read_min(), 0xffff_fff0);
        assert_eq!(sp.read_max(), 0xffff_fff0);

        let end = sp.incr_max(0x20);
        assert_eq!(end, 0x10);
        assert!(!sp.is_expired(end));

        for _ in 0..0x20 {
            sp.cpu_incr();
        }
        assert_eq!(sp.read_min(), 0x10);
        assert!(sp.is_expired(end));
        assert!(sp.is_expired(0xffff_fff8));
    }

    #[test]
    fn concurrent_incr_max() {
        let (_sim, host) = host();
        let sp = host.syncpts().alloc(SyncptFlags::empty(), "race").unwrap();
        let start = sp.read_max();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sp = sp.clone();
                std::thread::spawn(move || (0..1000).map(|_| sp.incr_max(1)).collect::<Vec<_>>())
            })
            .collect();

        let mut values: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        values.sort_unstable();
        values.dedup();

        assert_eq!(values.len(), 8000);
        assert_eq!(sp.read_max(), start + 8000);
    }

    #[test]
    fn alloc_and_release() {
        let (_sim, host) = host();
        let pts = host.syncpts();

        let a = pts.alloc(SyncptFlags::CLIENT_MANAGED, "a").unwrap();
        let b = pts.alloc(SyncptFlags::empty(), "b").unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.flags(), SyncptFlags::CLIENT_MANAGED);
        assert_eq!(a.name().as_deref(), Some("a"));

        let id = a.id();
        let a2 = pts.get_by_id(id).unwrap();
        drop(a);
        assert!(pts.get_by_id_noref(id).unwrap().is_allocated());
        drop(a2);
        assert!(pts.get_by_id(id).is_none());
        assert_eq!(pts.get_by_id_noref(id).unwrap().name(), None);

        // The freed syncpoint is handed out again.
        let c = pts.alloc(SyncptFlags::empty(), "c").unwrap();
        assert_eq!(c.id(), id);
    }

    #[test]
    fn exhaustion() {
        let (_sim, host) = host();
        let all: Vec<_> = (0..tegra124::HWCONFIG.nb_pts)
            .map(|_| host.syncpts().alloc(SyncptFlags::empty(), "x").unwrap())
            .collect();
        assert_eq!(
            host.syncpts().alloc(SyncptFlags::empty(), "y").err(),
            Some(Error::Busy)
        );
        drop(all);
        assert_eq!(host.syncpts().allocated_count(), 0);
    }

    #[test]
    fn wait_fast_path_and_timeout() {
        let (_sim, host) = host();
        let sp = host.syncpts().alloc(SyncptFlags::empty(), "wait").unwrap();

        let t = sp.incr();
        assert_eq!(sp.wait(t, Duration::ZERO), Ok(t));

        let t = sp.incr_max(1);
        assert_eq!(sp.wait(t, Duration::ZERO), Err(Error::Again));
        assert_eq!(
            sp.wait(t, Duration::from_millis(20)),
            Err(Error::TimedOut)
        );
        // The timed out waiter is gone.
        assert_eq!(host.intr().pending(sp.id()), 0);
    }

    #[test]
    fn wait_wakes_on_increment() {
        let (_sim, host) = host();
        let sp = host.syncpts().alloc(SyncptFlags::empty(), "wake").unwrap();
        let t = sp.incr_max(1);

        let sp2 = sp.clone();
        let incr = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            sp2.cpu_incr();
        });

        assert_eq!(sp.wait(t, Duration::from_secs(5)), Ok(t));
        incr.join().unwrap();
    }

    #[test]
    fn fd_handles() {
        let (_sim, host) = host();
        let fds = FdTable::new();
        let sp = host.syncpts().alloc(SyncptFlags::empty(), "fd").unwrap();
        let id = sp.id();

        let fd = fds.install(SyncptFile::new(sp)).unwrap();
        assert_eq!(fd_get(&fds, fd).map(|sp| sp.id()), Some(id));
        assert!(fd_get(&fds, fd + 1).is_none());

        fds.close(fd).unwrap();
        assert!(host.syncpts().get_by_id(id).is_none());
    }
}
