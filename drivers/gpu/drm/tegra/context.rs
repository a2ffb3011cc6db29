// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Channel contexts and buffer mappings
//!
//! A [`ChannelCtx`] is what a file gets when it opens a channel: a reference to the engine's
//! channel plus the set of buffers mapped for that engine. A [`Mapping`] pins its buffer for the
//! engine's device until the last reference to it is gone. Jobs take their own references to
//! the mappings they use, so unmapping or closing the context while work is in flight only
//! drops the context's reference.

use crate::drm::Client;
use crate::gem::TegraBo;
use crate::uapi::ChannelMapFlags;
use crate::{Error, Result};
use host1x::bo::PinnedBo;
use host1x::debug::*;
use host1x::fault::FaultPoint;
use host1x::Channel;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

const DEBUG_CLASS: DebugFlags = DebugFlags::Context;

/// A buffer mapped into a channel context.
pub struct Mapping {
    id: u32,
    flags: ChannelMapFlags,
    // Unpinned before the buffer reference goes away.
    pinned: PinnedBo,
    bo: Arc<TegraBo>,
}

impl Mapping {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn flags(&self) -> ChannelMapFlags {
        self.flags
    }

    /// Returns the address the engine accesses the buffer at.
    pub fn iova(&self) -> u64 {
        self.pinned.dma_addr()
    }

    pub fn bo(&self) -> &Arc<TegraBo> {
        &self.bo
    }
}

struct CtxInner {
    mappings: BTreeMap<u32, Arc<Mapping>>,
    next_id: u32,
}

/// An open channel of one file.
pub struct ChannelCtx {
    client: Arc<dyn Client>,
    channel: Channel,
    inner: Mutex<CtxInner>,
}

impl ChannelCtx {
    /// Opens a channel on `client`.
    pub fn open(client: &Arc<dyn Client>) -> Result<ChannelCtx> {
        let channel = client.open_channel()?;

        Ok(ChannelCtx {
            client: client.clone(),
            channel,
            inner: Mutex::new(CtxInner {
                mappings: BTreeMap::new(),
                next_id: 1,
            }),
        })
    }

    pub fn client(&self) -> &Arc<dyn Client> {
        &self.client
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Pins `bo` for the context's engine and returns the new mapping id.
    pub fn map(&self, bo: &Arc<TegraBo>, flags: ChannelMapFlags) -> Result<u32> {
        let pinned = PinnedBo::pin(bo.clone(), self.client.device())?;

        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id = id.checked_add(1).ok_or(Error::NoMemory)?;

        mod_dev_dbg!(
            self.client.device(),
            "ctx: mapped bo {} as {} at {:#x}",
            bo.id(),
            id,
            pinned.dma_addr()
        );

        inner.mappings.insert(
            id,
            Arc::new(Mapping {
                id,
                flags,
                pinned,
                bo: bo.clone(),
            }),
        );

        Ok(id)
    }

    /// Removes mapping `id`. In-flight jobs keep their own references.
    pub fn unmap(&self, id: u32) -> Result {
        let mapping = self.inner.lock().mappings.remove(&id).ok_or(Error::Invalid)?;
        mod_dev_dbg!(self.client.device(), "ctx: unmapped {}", id);
        drop(mapping);
        Ok(())
    }

    /// Takes a reference to mapping `id`.
    pub fn mapping_get(&self, id: u32) -> Option<Arc<Mapping>> {
        let host = self.client.device().host();
        if host.faults().should_fail(FaultPoint::MappingLookup) {
            return None;
        }

        self.inner.lock().mappings.get(&id).cloned()
    }

    /// Returns the number of mappings.
    pub fn mapping_count(&self) -> usize {
        self.inner.lock().mappings.len()
    }
}

impl Drop for ChannelCtx {
    fn drop(&mut self) {
        mod_dev_dbg!(
            self.client.device(),
            "ctx: closing channel {} with {} mappings",
            self.channel.id(),
            self.inner.get_mut().mappings.len()
        );
    }
}
