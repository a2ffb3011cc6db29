// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! host1x error codes

/// Errors returned by host1x operations.
///
/// Variants map onto kernel errno values, see [`Error::to_errno`]. [`Error::Hang`] is kept
/// apart from [`Error::Io`] so that callers can tell a wedged engine from a failed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// No free channel or syncpoint.
    #[error("resource busy")]
    Busy,
    /// Allocation failure.
    #[error("out of memory")]
    NoMemory,
    /// Invalid argument.
    #[error("invalid argument")]
    Invalid,
    /// Unknown object.
    #[error("no such entry")]
    NotFound,
    /// Bad user address.
    #[error("bad address")]
    Fault,
    /// A wait was interrupted.
    #[error("interrupted")]
    Interrupted,
    /// A wait ran past its timeout.
    #[error("timed out")]
    TimedOut,
    /// The condition is not met yet and the caller asked not to wait.
    #[error("try again")]
    Again,
    /// Hardware access failed.
    #[error("I/O error")]
    Io,
    /// The device is gone.
    #[error("no such device")]
    NoDevice,
    /// Lock contention, back off.
    #[error("deadlock avoided")]
    Deadlock,
    /// The lock is already held by the caller.
    #[error("already held")]
    Already,
    /// Bad file descriptor.
    #[error("bad file descriptor")]
    BadFd,
    /// Too many open files.
    #[error("too many open files")]
    TooManyFiles,
    /// A job did not complete within its timeout; the channel is wedged.
    #[error("hardware hang")]
    Hang,
}

impl Error {
    /// Returns the negative errno for this error.
    pub fn to_errno(self) -> i32 {
        match self {
            Error::Busy => -16,
            Error::NoMemory => -12,
            Error::Invalid => -22,
            Error::NotFound => -2,
            Error::Fault => -14,
            Error::Interrupted => -512,
            Error::TimedOut => -110,
            Error::Again => -11,
            Error::Io => -5,
            Error::NoDevice => -19,
            Error::Deadlock => -35,
            Error::Already => -114,
            Error::BadFd => -9,
            Error::TooManyFiles => -24,
            Error::Hang => -62,
        }
    }
}

impl From<dma_buf::Error> for Error {
    fn from(err: dma_buf::Error) -> Self {
        match err {
            dma_buf::Error::TimedOut => Error::TimedOut,
            dma_buf::Error::Interrupted => Error::Interrupted,
            dma_buf::Error::Deadlock => Error::Deadlock,
            dma_buf::Error::Already => Error::Already,
            dma_buf::Error::Invalid => Error::Invalid,
            dma_buf::Error::NoMemory => Error::NoMemory,
            dma_buf::Error::BadFd => Error::BadFd,
            dma_buf::Error::TooManyFiles => Error::TooManyFiles,
        }
    }
}

/// Result type for host1x operations.
pub type Result<T = ()> = core::result::Result<T, Error>;
