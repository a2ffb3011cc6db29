// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Runtime power management
//!
//! Engines are powered up on demand. Every user takes a [`PmRef`] from the engine's
//! [`RuntimePm`] with [`RuntimePm::get_sync`], which resumes the engine if it was suspended.
//! Once the last reference is dropped and the autosuspend delay has passed, the engine is
//! suspended again. A zero delay suspends right away.

use crate::{Error, Result};
use host1x::debug::*;
use host1x::fault::FaultPoint;
use host1x::Host1x;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEBUG_CLASS: DebugFlags = DebugFlags::Drm;

/// Power transitions of an engine.
pub trait RuntimePmOps: Send + Sync {
    /// Powers the engine up.
    fn runtime_resume(&self) -> Result;
    /// Powers the engine down.
    fn runtime_suspend(&self);
}

struct PmState {
    usage: u32,
    active: bool,
    last_busy: Instant,
}

/// Runtime power management state of one engine.
pub struct RuntimePm {
    name: String,
    host: Arc<Host1x>,
    ops: Arc<dyn RuntimePmOps>,
    autosuspend_delay: Duration,
    state: Mutex<PmState>,
}

impl RuntimePm {
    /// Creates the power state of a suspended engine.
    pub fn new(
        name: &str,
        host: &Arc<Host1x>,
        ops: Arc<dyn RuntimePmOps>,
        autosuspend_delay: Duration,
    ) -> Arc<RuntimePm> {
        Arc::new(RuntimePm {
            name: name.to_owned(),
            host: host.clone(),
            ops,
            autosuspend_delay,
            state: Mutex::new(PmState {
                usage: 0,
                active: false,
                last_busy: Instant::now(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Takes a usage reference, resuming the engine if needed.
    ///
    /// On failure the usage count is left unchanged.
    pub fn get_sync(self: &Arc<Self>) -> Result<PmRef> {
        let mut state = self.state.lock();

        if !state.active {
            if self.host.faults().should_fail(FaultPoint::RuntimeResume) {
                dev_err!(self, "failed to power up device");
                return Err(Error::Io);
            }
            self.ops.runtime_resume()?;
            state.active = true;
            mod_dev_dbg!(self, "resumed");
        }

        state.usage += 1;
        Ok(PmRef(self.clone()))
    }

    fn put_autosuspend(&self) {
        let mut state = self.state.lock();
        state.usage = state.usage.saturating_sub(1);
        state.last_busy = Instant::now();

        if state.usage == 0 && self.autosuspend_delay.is_zero() {
            self.suspend_locked(&mut state);
        }
    }

    fn suspend_locked(&self, state: &mut PmState) {
        if !state.active || debug_enabled(DebugFlags::KeepEnginePowered) {
            return;
        }

        self.ops.runtime_suspend();
        state.active = false;
        mod_dev_dbg!(self, "suspended");
    }

    /// Suspends the engine if it has been idle for the autosuspend delay. Returns whether it
    /// was suspended.
    pub fn check_autosuspend(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        if state.usage != 0 || !state.active {
            return false;
        }
        if now.saturating_duration_since(state.last_busy) < self.autosuspend_delay {
            return false;
        }

        self.suspend_locked(&mut state);
        !state.active
    }

    /// Returns the number of usage references.
    pub fn usage_count(&self) -> u32 {
        self.state.lock().usage
    }

    /// Returns whether the engine is powered.
    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }
}

/// A usage reference keeping an engine powered.
pub struct PmRef(Arc<RuntimePm>);

impl Drop for PmRef {
    fn drop(&mut self) {
        self.0.put_autosuspend();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use host1x::hw::{sim::SimHost1x, tegra124};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Counter {
        resumes: AtomicU32,
        suspends: AtomicU32,
    }

    impl RuntimePmOps for Counter {
        fn runtime_resume(&self) -> Result {
            self.resumes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn runtime_suspend(&self) {
            self.suspends.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn host() -> Arc<Host1x> {
        Host1x::new("host1x", SimHost1x::new(&tegra124::HWCONFIG))
    }

    #[test]
    fn usage_counting() {
        let host = host();
        let ops = Arc::new(Counter::default());
        let pm = RuntimePm::new("vic", &host, ops.clone(), Duration::ZERO);

        let a = pm.get_sync().unwrap();
        let b = pm.get_sync().unwrap();
        assert_eq!(pm.usage_count(), 2);
        assert_eq!(ops.resumes.load(Ordering::Relaxed), 1);

        drop(a);
        assert!(pm.is_active());
        drop(b);
        assert!(!pm.is_active());
        assert_eq!(ops.suspends.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn resume_fault() {
        let host = host();
        let pm = RuntimePm::new("vic", &host, Arc::new(Counter::default()), Duration::ZERO);

        host.faults().fail_next(FaultPoint::RuntimeResume);
        assert_eq!(pm.get_sync().err(), Some(Error::Io));
        assert_eq!(pm.usage_count(), 0);
        assert!(!pm.is_active());
    }

    #[test]
    fn autosuspend_delay() {
        let host = host();
        let pm = RuntimePm::new(
            "vic",
            &host,
            Arc::new(Counter::default()),
            Duration::from_millis(100),
        );

        drop(pm.get_sync().unwrap());
        assert!(pm.is_active());
        assert!(!pm.check_autosuspend(Instant::now()));
        assert!(pm.check_autosuspend(Instant::now() + Duration::from_secs(1)));
        assert!(!pm.is_active());
    }
}
