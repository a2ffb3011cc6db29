// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Error codes for the synchronization primitives

/// Errors returned by fences, reservation objects and the fd table.
///
/// Each variant corresponds to the errno the kernel would return, see [`Error::to_errno`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A wait ran past its deadline.
    #[error("wait timed out")]
    TimedOut,
    /// A wait was aborted before the condition was met.
    #[error("interrupted")]
    Interrupted,
    /// A Wound/Wait context lost a lock race and must back off.
    #[error("lock contended, back off and retry")]
    Deadlock,
    /// The lock is already held by the acquiring context.
    #[error("lock already held by this context")]
    Already,
    /// Invalid argument, or operation on a fence that was already signaled.
    #[error("invalid argument")]
    Invalid,
    /// No reserved fence slot was available.
    #[error("out of memory")]
    NoMemory,
    /// The descriptor is not open.
    #[error("bad file descriptor")]
    BadFd,
    /// The descriptor table is full.
    #[error("too many open files")]
    TooManyFiles,
}

impl Error {
    /// Returns the negative errno for this error.
    pub fn to_errno(self) -> i32 {
        match self {
            Error::TimedOut => -110,
            Error::Interrupted => -512,
            Error::Deadlock => -35,
            Error::Already => -114,
            Error::Invalid => -22,
            Error::NoMemory => -12,
            Error::BadFd => -9,
            Error::TooManyFiles => -24,
        }
    }
}

/// Result type for this crate.
pub type Result<T = ()> = core::result::Result<T, Error>;
