// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Fault injection
//!
//! Every fallible step of channel allocation and job submission consults a [`FaultPoint`]
//! before doing its work. Arming a point makes the step fail as if the underlying resource had
//! run out, which is how the unwind paths get exercised without broken hardware.

use parking_lot::Mutex;

/// A place where a failure can be injected.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaultPoint {
    /// Hardware channel initialization.
    ChannelInit = 0,
    /// Push buffer space reservation before a job is pushed to hardware.
    CdmaBegin = 1,
    /// Job allocation.
    JobAlloc = 2,
    /// Pinning a buffer for device access.
    Pin = 3,
    /// Powering an engine up.
    RuntimeResume = 4,
    /// Looking up a buffer mapping.
    MappingLookup = 5,
}

const NR_FAULT_POINTS: usize = 6;

#[derive(Default, Copy, Clone)]
struct FaultAttr {
    /// Number of calls to let through before failing.
    skip: u32,
    /// Number of calls to fail once `skip` ran out.
    times: u32,
    /// Number of failures injected so far.
    injected: u64,
}

/// Per-device fault injection state.
#[derive(Default)]
pub struct FaultInjector {
    attrs: Mutex<[FaultAttr; NR_FAULT_POINTS]>,
}

impl FaultInjector {
    /// Creates a fault injector with nothing armed.
    pub fn new() -> FaultInjector {
        Default::default()
    }

    /// Fails `times` consecutive calls at `point`, after letting `skip` calls through.
    pub fn arm(&self, point: FaultPoint, skip: u32, times: u32) {
        let mut attrs = self.attrs.lock();
        let attr = &mut attrs[point as usize];
        attr.skip = skip;
        attr.times = times;
    }

    /// Fails the next call at `point`.
    pub fn fail_next(&self, point: FaultPoint) {
        self.arm(point, 0, 1)
    }

    /// Disarms every fault point.
    pub fn clear(&self) {
        let mut attrs = self.attrs.lock();
        for attr in attrs.iter_mut() {
            attr.skip = 0;
            attr.times = 0;
        }
    }

    /// Returns how many failures were injected at `point`.
    pub fn injected(&self, point: FaultPoint) -> u64 {
        self.attrs.lock()[point as usize].injected
    }

    /// Returns whether the current call at `point` should fail.
    pub fn should_fail(&self, point: FaultPoint) -> bool {
        let mut attrs = self.attrs.lock();
        let attr = &mut attrs[point as usize];

        if attr.times == 0 {
            return false;
        }
        if attr.skip > 0 {
            attr.skip -= 1;
            return false;
        }

        attr.times -= 1;
        attr.injected += 1;
        log::info!("host1x: injecting fault at {:?}", point);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_then_fail() {
        let faults = FaultInjector::new();
        assert!(!faults.should_fail(FaultPoint::Pin));

        faults.arm(FaultPoint::Pin, 2, 2);
        assert!(!faults.should_fail(FaultPoint::Pin));
        assert!(!faults.should_fail(FaultPoint::Pin));
        assert!(!faults.should_fail(FaultPoint::JobAlloc));
        assert!(faults.should_fail(FaultPoint::Pin));
        assert!(faults.should_fail(FaultPoint::Pin));
        assert!(!faults.should_fail(FaultPoint::Pin));
        assert_eq!(faults.injected(FaultPoint::Pin), 2);
    }

    #[test]
    fn clear_disarms() {
        let faults = FaultInjector::new();
        faults.fail_next(FaultPoint::CdmaBegin);
        faults.clear();
        assert!(!faults.should_fail(FaultPoint::CdmaBegin));
    }
}
