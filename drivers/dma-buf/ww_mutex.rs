// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Wound/Wait mutexes
//!
//! A [`WwMutex`] is meant to be locked in batches whose acquisition order is not known up front,
//! such as the reservation objects of every buffer referenced by a job. Each batch is locked under
//! a [`WwAcquireCtx`], which carries a stamp taken from its [`WwClass`]: lower stamps are older.
//!
//! When a context needs a lock held by a younger context, the younger one is "wounded". A wounded
//! context that holds locks fails its next contended lock attempt with [`Error::Deadlock`]; it
//! must then drop every lock it holds, take the contended lock with [`WwMutex::lock_slow`] and
//! retry the rest. A context that needs a lock held by an older context simply waits. Since the
//! oldest context never backs off, every batch eventually completes.
//!
//! Lock ownership of all mutexes of a class is changed under the class lock, so that a wounded
//! context is woken no matter which mutex it is sleeping on.

use crate::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A class of Wound/Wait mutexes which may be locked together.
pub struct WwClass {
    name: &'static str,
    stamp: AtomicU64,
    lock: Mutex<()>,
    cond: Condvar,
}

impl WwClass {
    /// Creates a new lock class.
    pub fn new(name: &'static str) -> Arc<WwClass> {
        Arc::new(WwClass {
            name,
            stamp: AtomicU64::new(1),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        })
    }

    /// Returns the name of this class.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

struct Ticket {
    stamp: u64,
    wounded: AtomicBool,
}

/// An acquisition context for one batch of locks.
pub struct WwAcquireCtx {
    class: Arc<WwClass>,
    ticket: Arc<Ticket>,
    acquired: usize,
    done: bool,
}

impl WwAcquireCtx {
    /// Starts a new acquisition, stamped as younger than every existing one.
    pub fn new(class: &Arc<WwClass>) -> WwAcquireCtx {
        WwAcquireCtx {
            class: class.clone(),
            ticket: Arc::new(Ticket {
                stamp: class.stamp.fetch_add(1, Ordering::Relaxed),
                wounded: AtomicBool::new(false),
            }),
            acquired: 0,
            done: false,
        }
    }

    /// Marks the end of the acquire phase. No further locks may be taken with this context.
    pub fn done(&mut self) {
        self.done = true;
    }

    /// Returns the number of locks currently held with this context.
    pub fn acquired(&self) -> usize {
        self.acquired
    }

    /// Returns the stamp of this context. Lower stamps are older.
    pub fn stamp(&self) -> u64 {
        self.ticket.stamp
    }
}

impl Drop for WwAcquireCtx {
    fn drop(&mut self) {
        if self.acquired != 0 {
            log::warn!(
                "{}: acquire context dropped with {} locks held",
                self.class.name,
                self.acquired
            );
        }
    }
}

/// A mutex taking part in Wound/Wait batch locking.
///
/// The protected data is only reachable while the mutex is held by a context, through
/// [`WwMutex::with`].
pub struct WwMutex<T> {
    class: Arc<WwClass>,
    owner: Mutex<Option<Arc<Ticket>>>,
    data: Mutex<T>,
}

impl<T> WwMutex<T> {
    /// Creates a new unlocked mutex of the given class.
    pub fn new(class: &Arc<WwClass>, data: T) -> WwMutex<T> {
        WwMutex {
            class: class.clone(),
            owner: Mutex::new(None),
            data: Mutex::new(data),
        }
    }

    fn lock_common(&self, ctx: &mut WwAcquireCtx) -> Result {
        if !Arc::ptr_eq(&self.class, &ctx.class) {
            log::error!("{}: lock with a context of another class", self.class.name);
            return Err(Error::Invalid);
        }
        if ctx.done {
            log::error!("{}: lock after acquire phase was done", self.class.name);
            return Err(Error::Invalid);
        }

        let mut guard = self.class.lock.lock();

        if ctx.acquired == 0 {
            ctx.ticket.wounded.store(false, Ordering::Relaxed);
        }

        loop {
            {
                let mut owner = self.owner.lock();
                match owner.as_ref() {
                    None => {
                        *owner = Some(ctx.ticket.clone());
                        ctx.acquired += 1;
                        return Ok(());
                    }
                    Some(holder) if Arc::ptr_eq(holder, &ctx.ticket) => {
                        return Err(Error::Already);
                    }
                    Some(holder) => {
                        if ctx.acquired > 0 && ctx.ticket.wounded.load(Ordering::Relaxed) {
                            return Err(Error::Deadlock);
                        }
                        if holder.stamp > ctx.ticket.stamp
                            && !holder.wounded.swap(true, Ordering::Relaxed)
                        {
                            self.class.cond.notify_all();
                        }
                    }
                }
            }

            self.class.cond.wait(&mut guard);
        }
    }

    /// Locks the mutex as part of the batch of `ctx`.
    ///
    /// Returns `Error::Deadlock` if `ctx` must back off, and `Error::Already` if `ctx` already
    /// holds this mutex.
    pub fn lock(&self, ctx: &mut WwAcquireCtx) -> Result {
        self.lock_common(ctx)
    }

    /// Locks a contended mutex after backing off.
    ///
    /// `ctx` must not hold any other lock, so this cannot fail with `Error::Deadlock` and
    /// cannot be interrupted.
    pub fn lock_slow(&self, ctx: &mut WwAcquireCtx) {
        if ctx.acquired != 0 {
            log::warn!(
                "{}: slow path lock with {} locks held",
                self.class.name,
                ctx.acquired
            );
        }

        if let Err(e) = self.lock_common(ctx) {
            log::error!("{}: slow path lock failed: {:?}", self.class.name, e);
        }
    }

    /// Unlocks the mutex held by `ctx`.
    pub fn unlock(&self, ctx: &mut WwAcquireCtx) {
        let _guard = self.class.lock.lock();
        {
            let mut owner = self.owner.lock();
            match owner.as_ref() {
                Some(holder) if Arc::ptr_eq(holder, &ctx.ticket) => {
                    *owner = None;
                    ctx.acquired -= 1;
                }
                _ => {
                    log::warn!("{}: unlock of a mutex not held by context", self.class.name);
                    return;
                }
            }
        }
        self.class.cond.notify_all();
    }

    /// Returns whether the mutex is held by any context.
    pub fn is_locked(&self) -> bool {
        self.owner.lock().is_some()
    }

    /// Returns whether the mutex is held by `ctx`.
    pub fn is_held_by(&self, ctx: &WwAcquireCtx) -> bool {
        matches!(self.owner.lock().as_ref(), Some(holder) if Arc::ptr_eq(holder, &ctx.ticket))
    }

    /// Runs `f` on the protected data. `ctx` must hold the mutex.
    pub fn with<R>(&self, ctx: &WwAcquireCtx, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        if !self.is_held_by(ctx) {
            return Err(Error::Invalid);
        }
        Ok(f(&mut self.data.lock()))
    }

    /// Locks this mutex alone, runs `f` on the protected data and unlocks it again.
    pub fn with_locked<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut ctx = WwAcquireCtx::new(&self.class);
        self.lock_slow(&mut ctx);
        let ret = f(&mut self.data.lock());
        self.unlock(&mut ctx);
        ret
    }

    /// Returns a snapshot computed from the protected data without taking the mutex.
    ///
    /// This is the equivalent of an RCU read of the data: it observes a consistent state, but
    /// not necessarily one that a lock holder is done modifying.
    pub fn peek<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.data.lock())
    }
}
