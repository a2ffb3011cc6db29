// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Buffer sharing and synchronization primitives
//!
//! This crate models the small slice of the kernel's dma-buf framework that engine drivers rely
//! on to synchronize with each other: single-shot completion fences, reservation objects that
//! attach fences to shared buffers (locked with Wound/Wait mutexes so that batches of buffers can
//! be locked without deadlocking), sync files that export a fence as a file descriptor, and a
//! per-process file descriptor table to install them in.

pub mod dma_fence;
pub mod dma_resv;
mod error;
pub mod file;
pub mod sync_file;
pub mod ww_mutex;

pub use dma_fence::{Fence, FenceOps};
pub use dma_resv::DmaResv;
pub use error::{Error, Result};
pub use file::{FdReservation, FdTable};
pub use sync_file::SyncFile;
pub use ww_mutex::{WwAcquireCtx, WwClass, WwMutex};
