// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Sync files
//!
//! A sync file exports a fence to user space as a file descriptor, so that it can be passed
//! between processes and handed to other drivers as a wait dependency.

use crate::dma_fence::Fence;
use crate::file::FdTable;
use crate::Result;
use std::sync::Arc;

/// A fence exported as a file.
pub struct SyncFile {
    name: String,
    fence: Fence,
}

impl SyncFile {
    /// Creates a sync file wrapping `fence`.
    pub fn new(fence: Fence) -> Arc<SyncFile> {
        let name = format!(
            "{}-{}-{}",
            fence.driver_name(),
            fence.context(),
            fence.seqno()
        );
        Arc::new(SyncFile { name, fence })
    }

    /// Merges the fences of two sync files into a new one.
    pub fn merge(name: &str, a: &SyncFile, b: &SyncFile, context: u64) -> Arc<SyncFile> {
        let mut fences = a.fence.flatten();
        for fence in b.fence.flatten() {
            if !fences.iter().any(|f| f.ptr_eq(&fence)) {
                fences.push(fence);
            }
        }

        Arc::new(SyncFile {
            name: name.to_owned(),
            fence: Fence::array(fences, context, 1),
        })
    }

    /// Returns the name of this sync file.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the wrapped fence.
    pub fn fence(&self) -> &Fence {
        &self.fence
    }

    /// Installs this sync file into `fds`, returning the new descriptor.
    pub fn install(self: Arc<Self>, fds: &FdTable) -> Result<i32> {
        fds.install(self)
    }

    /// Returns the fence behind `fd`, if `fd` is a sync file.
    pub fn get_fence(fds: &FdTable, fd: i32) -> Option<Fence> {
        fds.get::<SyncFile>(fd).map(|file| file.fence.clone())
    }
}
