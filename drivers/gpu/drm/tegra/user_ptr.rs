// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! User memory access
//!
//! Ioctl arguments refer to arrays in the caller's memory through `(pointer, count)` pairs.
//! [`AddressSpace`] models the caller's address space as a set of mapped regions; accesses to
//! anything not fully inside one region fail with [`Error::Fault`], like a failed
//! `copy_from_user()`.
//!
//! Reads go through a [`UserSlicePtr`] reader, so every user array is copied exactly once before
//! it is validated.

use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

const USER_BASE: u64 = 0x1_0000;
const USER_PAGE_SIZE: u64 = 0x1000;

struct Inner {
    regions: BTreeMap<u64, Vec<u8>>,
    next: u64,
}

/// The address space of a user process.
pub struct AddressSpace {
    inner: Mutex<Inner>,
}

impl AddressSpace {
    /// Creates an empty address space.
    pub fn new() -> Arc<AddressSpace> {
        Arc::new(AddressSpace {
            inner: Mutex::new(Inner {
                regions: BTreeMap::new(),
                next: USER_BASE,
            }),
        })
    }

    /// Maps `size` zeroed bytes and returns their address.
    pub fn alloc(&self, size: usize) -> u64 {
        let mut inner = self.inner.lock();
        let addr = inner.next;
        let pages = (size as u64).div_ceil(USER_PAGE_SIZE).max(1);
        // Leave a guard page between regions.
        inner.next += (pages + 1) * USER_PAGE_SIZE;
        inner.regions.insert(addr, vec![0; size]);
        addr
    }

    /// Maps a copy of `items` and returns its address.
    pub fn alloc_slice<T: AsBytes>(&self, items: &[T]) -> u64 {
        let bytes = items.as_bytes();
        let addr = self.alloc(bytes.len());
        if let Some(region) = self.inner.lock().regions.get_mut(&addr) {
            region.copy_from_slice(bytes);
        }
        addr
    }

    /// Unmaps the region starting at `addr`.
    pub fn free(&self, addr: u64) -> Result {
        self.inner
            .lock()
            .regions
            .remove(&addr)
            .map(|_| ())
            .ok_or(Error::Fault)
    }

    fn access<R>(&self, addr: u64, len: usize, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        if len == 0 {
            return Ok(f(&mut []));
        }

        let mut inner = self.inner.lock();
        let (&base, region) = inner
            .regions
            .range_mut(..=addr)
            .next_back()
            .ok_or(Error::Fault)?;

        let start = (addr - base) as usize;
        let end = start.checked_add(len).ok_or(Error::Fault)?;
        let bytes = region.get_mut(start..end).ok_or(Error::Fault)?;
        Ok(f(bytes))
    }

    /// Checks that `len` bytes at `addr` are mapped.
    pub fn check_range(&self, addr: u64, len: usize) -> Result {
        self.access(addr, len, |_| ())
    }

    /// Copies `buf.len()` bytes at `addr` into `buf`.
    pub fn read(&self, addr: u64, buf: &mut [u8]) -> Result {
        let len = buf.len();
        self.access(addr, len, |src| buf.copy_from_slice(src))
    }

    /// Copies `data` to `addr`.
    pub fn write(&self, addr: u64, data: &[u8]) -> Result {
        self.access(addr, data.len(), |dst| dst.copy_from_slice(data))
    }
}

/// A range of user memory.
pub struct UserSlicePtr<'a> {
    mm: &'a AddressSpace,
    ptr: u64,
    len: usize,
}

impl<'a> UserSlicePtr<'a> {
    /// Describes `len` bytes at `ptr` in `mm`.
    pub fn new(mm: &'a AddressSpace, ptr: u64, len: usize) -> Self {
        UserSlicePtr { mm, ptr, len }
    }

    /// Returns a reader consuming the range from its start.
    pub fn reader(self) -> UserSliceReader<'a> {
        UserSliceReader {
            mm: self.mm,
            ptr: self.ptr,
            left: self.len,
        }
    }

    /// Copies the whole range.
    pub fn read_all(self) -> Result<Vec<u8>> {
        self.mm.check_range(self.ptr, self.len)?;
        let mut data = Vec::new();
        data.try_reserve_exact(self.len)
            .map_err(|_| Error::NoMemory)?;
        data.resize(self.len, 0);
        self.mm.read(self.ptr, &mut data)?;
        Ok(data)
    }
}

/// Sequential reader over a range of user memory.
pub struct UserSliceReader<'a> {
    mm: &'a AddressSpace,
    ptr: u64,
    left: usize,
}

impl UserSliceReader<'_> {
    /// Returns the number of bytes left to read.
    pub fn len(&self) -> usize {
        self.left
    }

    /// Returns whether the whole range was read.
    pub fn is_empty(&self) -> bool {
        self.left == 0
    }

    /// Reads one `T`.
    pub fn read<T: FromBytes + AsBytes>(&mut self) -> Result<T> {
        let mut item = <T as FromZeroes>::new_zeroed();
        let size = core::mem::size_of::<T>();
        if size > self.left {
            return Err(Error::Fault);
        }

        self.mm.read(self.ptr, item.as_bytes_mut())?;
        self.ptr += size as u64;
        self.left -= size;
        Ok(item)
    }
}

/// Copies an array of `count` `T`s at `ptr`.
///
/// A `count` whose byte size overflows is `Error::Invalid`, unmapped memory is `Error::Fault`.
pub fn read_array<T: FromBytes + AsBytes>(
    mm: &AddressSpace,
    ptr: u64,
    count: u32,
) -> Result<Vec<T>> {
    let size = (count as usize)
        .checked_mul(core::mem::size_of::<T>())
        .ok_or(Error::Invalid)?;
    mm.check_range(ptr, size)?;

    let mut items = Vec::new();
    items
        .try_reserve_exact(count as usize)
        .map_err(|_| Error::NoMemory)?;

    let mut reader = UserSlicePtr::new(mm, ptr, size).reader();
    for _ in 0..count {
        items.push(reader.read::<T>()?);
    }

    Ok(items)
}
