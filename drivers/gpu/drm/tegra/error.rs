// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Tegra DRM error codes

/// Errors returned by the Tegra DRM ioctls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("resource busy")]
    Busy,
    #[error("out of memory")]
    NoMemory,
    #[error("invalid argument")]
    Invalid,
    #[error("no such entry")]
    NotFound,
    #[error("already held")]
    Already,
    #[error("bad address")]
    Fault,
    #[error("I/O error")]
    Io,
    #[error("interrupted")]
    Interrupted,
    #[error("timed out")]
    TimedOut,
    #[error("try again")]
    Again,
    #[error("no such device")]
    NoDevice,
    #[error("bad file descriptor")]
    BadFd,
    #[error("too many open files")]
    TooManyFiles,
    /// A job timed out and its channel is wedged.
    #[error("hardware hang")]
    Hang,
    /// Lock contention. Handled inside submission and never returned from it.
    #[error("deadlock avoided")]
    Deadlock,
}

/// Broad classes of errors, for callers deciding whether and how to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Out of channels, syncpoints, memory or descriptors.
    ResourceExhaustion,
    /// The request itself is malformed or refers to unknown objects.
    InvalidInput,
    /// Retrying may succeed.
    TransientIo,
    /// An engine stopped making progress.
    HardwareHang,
    /// Lock ordering conflict between concurrent submissions.
    Contention,
}

impl Error {
    /// Returns the negative errno for this error.
    pub fn to_errno(self) -> i32 {
        match self {
            Error::Busy => -16,
            Error::NoMemory => -12,
            Error::Invalid => -22,
            Error::NotFound => -2,
            Error::Already => -114,
            Error::Fault => -14,
            Error::Io => -5,
            Error::Interrupted => -512,
            Error::TimedOut => -110,
            Error::Again => -11,
            Error::NoDevice => -19,
            Error::BadFd => -9,
            Error::TooManyFiles => -24,
            Error::Hang => -62,
            Error::Deadlock => -35,
        }
    }

    /// Returns the class of this error.
    pub fn class(self) -> ErrorClass {
        match self {
            Error::Busy | Error::NoMemory | Error::TooManyFiles => ErrorClass::ResourceExhaustion,
            Error::Invalid | Error::NotFound | Error::Already | Error::BadFd | Error::NoDevice => {
                ErrorClass::InvalidInput
            }
            Error::Fault | Error::Io | Error::Interrupted | Error::TimedOut | Error::Again => {
                ErrorClass::TransientIo
            }
            Error::Hang => ErrorClass::HardwareHang,
            Error::Deadlock => ErrorClass::Contention,
        }
    }
}

impl From<host1x::Error> for Error {
    fn from(err: host1x::Error) -> Error {
        match err {
            host1x::Error::Busy => Error::Busy,
            host1x::Error::NoMemory => Error::NoMemory,
            host1x::Error::Invalid => Error::Invalid,
            host1x::Error::NotFound => Error::NotFound,
            host1x::Error::Fault => Error::Fault,
            host1x::Error::Interrupted => Error::Interrupted,
            host1x::Error::TimedOut => Error::TimedOut,
            host1x::Error::Again => Error::Again,
            host1x::Error::Io => Error::Io,
            host1x::Error::NoDevice => Error::NoDevice,
            host1x::Error::Deadlock => Error::Deadlock,
            host1x::Error::Already => Error::Already,
            host1x::Error::BadFd => Error::BadFd,
            host1x::Error::TooManyFiles => Error::TooManyFiles,
            host1x::Error::Hang => Error::Hang,
        }
    }
}

impl From<dma_buf::Error> for Error {
    fn from(err: dma_buf::Error) -> Error {
        host1x::Error::from(err).into()
    }
}

/// A specialized `Result` for Tegra DRM operations.
pub type Result<T = ()> = core::result::Result<T, Error>;
