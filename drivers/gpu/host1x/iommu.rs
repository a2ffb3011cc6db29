// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! IOMMU domains and address space allocation
//!
//! Client devices that sit behind the SMMU get an [`IommuDomain`]; buffers pinned for such a
//! device are mapped into the domain's IOVA range. Devices without a domain use physical
//! addresses directly, allocated from the host1x carveout with the same [`RangeAllocator`].

use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Page size of the SMMU.
pub const PAGE_SIZE: u64 = 0x1000;

/// First-fit allocator over a linear address range.
#[derive(Debug)]
pub struct RangeAllocator {
    base: u64,
    size: u64,
    // start -> length
    used: BTreeMap<u64, u64>,
}

impl RangeAllocator {
    /// Creates an allocator over `[base, base + size)`.
    pub fn new(base: u64, size: u64) -> RangeAllocator {
        RangeAllocator {
            base,
            size,
            used: BTreeMap::new(),
        }
    }

    /// Allocates `size` bytes aligned to `align` (a power of two). Returns the start address.
    pub fn alloc(&mut self, size: u64, align: u64) -> Option<u64> {
        if size == 0 || !align.is_power_of_two() {
            return None;
        }

        let end = self.base.checked_add(self.size)?;
        let mut cursor = self.base;

        for (&start, &len) in &self.used {
            let candidate = cursor.checked_next_multiple_of(align)?;
            if candidate.checked_add(size)? <= start {
                self.used.insert(candidate, size);
                return Some(candidate);
            }
            cursor = start + len;
        }

        let candidate = cursor.checked_next_multiple_of(align)?;
        if candidate.checked_add(size)? <= end {
            self.used.insert(candidate, size);
            Some(candidate)
        } else {
            None
        }
    }

    /// Frees the allocation starting at `start`. Returns its length.
    pub fn free(&mut self, start: u64) -> Option<u64> {
        self.used.remove(&start)
    }

    /// Returns the allocation containing `addr` as `(start, len)`.
    pub fn find(&self, addr: u64) -> Option<(u64, u64)> {
        self.used
            .range(..=addr)
            .next_back()
            .filter(|&(&start, &len)| addr < start + len)
            .map(|(&start, &len)| (start, len))
    }

    /// Returns the number of live allocations.
    pub fn count(&self) -> usize {
        self.used.len()
    }
}

struct DomainInner {
    iova: RangeAllocator,
    // iova -> phys
    mappings: BTreeMap<u64, u64>,
}

/// An IOMMU address space shared by one or more client devices.
pub struct IommuDomain {
    name: String,
    inner: Mutex<DomainInner>,
}

impl IommuDomain {
    /// Creates a domain translating the IOVA range `[base, base + size)`.
    pub fn new(name: &str, base: u64, size: u64) -> Arc<IommuDomain> {
        Arc::new(IommuDomain {
            name: name.to_owned(),
            inner: Mutex::new(DomainInner {
                iova: RangeAllocator::new(base, size),
                mappings: BTreeMap::new(),
            }),
        })
    }

    /// Returns the domain name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maps `size` bytes of physical memory at `phys`. Returns the IOVA.
    pub fn map(&self, phys: u64, size: u64) -> Result<u64> {
        if size == 0 || phys % PAGE_SIZE != 0 {
            return Err(Error::Invalid);
        }
        let size = size.checked_next_multiple_of(PAGE_SIZE).ok_or(Error::Invalid)?;

        let mut inner = self.inner.lock();
        let iova = inner.iova.alloc(size, PAGE_SIZE).ok_or(Error::NoMemory)?;
        inner.mappings.insert(iova, phys);

        log::trace!(
            "iommu {}: map {:#x} -> {:#x} ({:#x} bytes)",
            self.name,
            iova,
            phys,
            size
        );
        Ok(iova)
    }

    /// Unmaps the mapping at `iova`.
    pub fn unmap(&self, iova: u64) -> Result {
        let mut inner = self.inner.lock();
        inner.mappings.remove(&iova).ok_or(Error::NotFound)?;
        inner.iova.free(iova);
        log::trace!("iommu {}: unmap {:#x}", self.name, iova);
        Ok(())
    }

    /// Translates a device address into a physical address.
    pub fn translate(&self, iova: u64) -> Option<u64> {
        let inner = self.inner.lock();
        let (start, _) = inner.iova.find(iova)?;
        inner.mappings.get(&start).map(|phys| phys + (iova - start))
    }

    /// Returns the number of live mappings.
    pub fn mapped_count(&self) -> usize {
        self.inner.lock().mappings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_fit() {
        let mut ra = RangeAllocator::new(0x1000, 0x4000);
        let a = ra.alloc(0x1000, 0x1000).unwrap();
        let b = ra.alloc(0x2000, 0x1000).unwrap();
        assert_eq!(a, 0x1000);
        assert_eq!(b, 0x2000);
        assert_eq!(ra.alloc(0x2000, 0x1000), None);

        assert_eq!(ra.free(a), Some(0x1000));
        assert_eq!(ra.alloc(0x800, 0x1000), Some(0x1000));
        assert_eq!(ra.find(0x2fff), Some((0x2000, 0x2000)));
        assert_eq!(ra.find(0x4000), None);
        assert_eq!(ra.count(), 2);
    }

    #[test]
    fn map_translate_unmap() {
        let domain = IommuDomain::new("vic", 0x10_0000, 0x10_0000);
        let iova = domain.map(0x8000_0000, 0x1800).unwrap();
        assert_eq!(domain.translate(iova + 0x1234), Some(0x8000_1234));
        assert_eq!(domain.mapped_count(), 1);

        assert_eq!(domain.map(0x8000_0001, 0x1000), Err(Error::Invalid));
        assert_eq!(domain.unmap(iova), Ok(()));
        assert_eq!(domain.unmap(iova), Err(Error::NotFound));
        assert_eq!(domain.translate(iova), None);
    }
}
