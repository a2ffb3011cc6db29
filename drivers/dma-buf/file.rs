// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Per-process file descriptor table
//!
//! Objects exported to user space as file descriptors (sync files, syncpoints) are installed
//! into the [`FdTable`] of the calling process. Looking up a descriptor checks that it refers
//! to an object of the expected type, like comparing `f_op` on a `struct file`.
//!
//! A descriptor can be reserved ahead of time with [`FdTable::reserve`], so that publishing an
//! object later cannot fail.

use crate::{Error, Result};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Default limit of open descriptors per table.
const NR_OPEN_DEFAULT: usize = 1024;

/// An open file object.
pub type FileObject = Arc<dyn Any + Send + Sync>;

/// A file descriptor table.
///
/// Reserved descriptors hold no object yet.
pub struct FdTable {
    files: Mutex<BTreeMap<i32, Option<FileObject>>>,
    max_fds: usize,
}

impl FdTable {
    /// Creates an empty table with the default descriptor limit.
    pub fn new() -> FdTable {
        FdTable::with_limit(NR_OPEN_DEFAULT)
    }

    /// Creates an empty table holding at most `max_fds` descriptors.
    pub fn with_limit(max_fds: usize) -> FdTable {
        FdTable {
            files: Mutex::new(BTreeMap::new()),
            max_fds,
        }
    }

    fn alloc_fd(&self, file: Option<FileObject>) -> Result<i32> {
        let mut files = self.files.lock();
        if files.len() >= self.max_fds {
            return Err(Error::TooManyFiles);
        }

        let mut fd = 0;
        for &used in files.keys() {
            if used != fd {
                break;
            }
            fd += 1;
        }

        files.insert(fd, file);
        Ok(fd)
    }

    /// Installs `file` at the lowest free descriptor and returns that descriptor.
    pub fn install(&self, file: FileObject) -> Result<i32> {
        self.alloc_fd(Some(file))
    }

    /// Reserves the lowest free descriptor. The reservation is released if it is dropped
    /// without an object being installed.
    pub fn reserve(&self) -> Result<FdReservation<'_>> {
        let fd = self.alloc_fd(None)?;
        Ok(FdReservation {
            table: self,
            fd: Some(fd),
        })
    }

    /// Returns the object at `fd` if it is of type `T`.
    pub fn get<T: Any + Send + Sync>(&self, fd: i32) -> Option<Arc<T>> {
        let file = self.files.lock().get(&fd)?.clone()?;
        file.downcast::<T>().ok()
    }

    /// Closes `fd`, dropping the table's reference to the object.
    pub fn close(&self, fd: i32) -> Result {
        let file = {
            let mut files = self.files.lock();
            match files.get(&fd) {
                Some(Some(_)) => files.remove(&fd),
                _ => return Err(Error::BadFd),
            }
        };
        // Drop the object outside the table lock.
        drop(file);
        Ok(())
    }

    /// Returns the number of open descriptors.
    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    /// Returns whether no descriptor is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A descriptor reserved with [`FdTable::reserve`].
pub struct FdReservation<'a> {
    table: &'a FdTable,
    fd: Option<i32>,
}

impl FdReservation<'_> {
    /// Returns the reserved descriptor.
    pub fn fd(&self) -> i32 {
        self.fd.unwrap_or(-1)
    }

    /// Installs `file` at the reserved descriptor and returns the descriptor.
    pub fn install(mut self, file: FileObject) -> i32 {
        let Some(fd) = self.fd.take() else {
            return -1;
        };
        self.table.files.lock().insert(fd, Some(file));
        fd
    }
}

impl Drop for FdReservation<'_> {
    fn drop(&mut self) {
        if let Some(fd) = self.fd.take() {
            self.table.files.lock().remove(&fd);
        }
    }
}

impl Default for FdTable {
    fn default() -> Self {
        FdTable::new()
    }
}
