// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Ioctl dispatch
//!
//! Maps ioctl numbers to their handlers. The argument buffer is decoded into the handler's
//! argument struct, and the struct is copied back after the handler ran, whether it succeeded
//! or not.

use crate::file::File;
use crate::submit;
use crate::uapi::*;
use crate::{Error, Result};
use host1x::debug::*;
use zerocopy::{AsBytes, FromBytes};

const DEBUG_CLASS: DebugFlags = DebugFlags::Drm;

fn call<T: FromBytes + AsBytes>(
    file: &File,
    args: &mut [u8],
    handler: fn(&File, &mut T) -> Result<u32>,
) -> Result<u32> {
    let mut data = T::read_from_prefix(args).ok_or(Error::Invalid)?;
    let ret = handler(file, &mut data);
    data.write_to_prefix(args).ok_or(Error::Fault)?;
    ret
}

macro_rules! declare_tegra_ioctls {
    ($file:expr, $nr:expr, $args:expr, { $(($cmd:ident, $struct:ident, $func:path)),* $(,)? }) => {
        match $nr {
            $($cmd => call::<$struct>($file, $args, $func),)*
            _ => {
                mod_dev_dbg!($file.drm(), "unknown ioctl {:#x}", $nr);
                Err(Error::Invalid)
            }
        }
    };
}

/// Runs ioctl `nr` with the argument bytes `args`. Returns 0 or a negative errno.
pub fn dispatch(file: &File, nr: u32, args: &mut [u8]) -> i32 {
    let ret = declare_tegra_ioctls!(file, nr, args, {
        (DRM_TEGRA_GEM_CREATE,         drm_tegra_gem_create,         File::gem_create),
        (DRM_TEGRA_SYNCPT_READ,        drm_tegra_syncpt_read,        File::syncpt_read),
        (DRM_TEGRA_SYNCPT_INCR,        drm_tegra_syncpt_incr,        File::syncpt_incr),
        (DRM_TEGRA_SYNCPT_WAIT,        drm_tegra_syncpt_wait,        File::syncpt_wait),
        (DRM_TEGRA_CHANNEL_OPEN,       drm_tegra_channel_open,       File::channel_open),
        (DRM_TEGRA_CHANNEL_CLOSE,      drm_tegra_channel_close,      File::channel_close),
        (DRM_TEGRA_CHANNEL_MAP,        drm_tegra_channel_map,        File::channel_map),
        (DRM_TEGRA_CHANNEL_UNMAP,      drm_tegra_channel_unmap,      File::channel_unmap),
        (DRM_TEGRA_CHANNEL_SUBMIT,     drm_tegra_channel_submit,     submit::channel_submit),
        (DRM_TEGRA_SYNCPOINT_ALLOCATE, drm_tegra_syncpoint_allocate, File::syncpoint_allocate),
        (DRM_TEGRA_SYNCPOINT_FREE,     drm_tegra_syncpoint_free,     File::syncpoint_free),
    });

    match ret {
        Ok(v) => v as i32,
        Err(e) => e.to_errno(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drm::TegraDrm;
    use crate::params::ModuleParams;
    use crate::user_ptr::AddressSpace;
    use dma_buf::FdTable;
    use host1x::hw::opcodes::CLASS_VIC;
    use host1x::hw::{sim::SimHost1x, tegra210};
    use host1x::Host1x;
    use std::sync::Arc;

    fn file() -> File {
        let host = Host1x::new("host1x", SimHost1x::new(&tegra210::HWCONFIG));
        let drm = TegraDrm::probe(host, ModuleParams::default()).unwrap();
        drm.open(AddressSpace::new(), Arc::new(FdTable::new()))
    }

    #[test]
    fn round_trip() {
        let file = file();

        let mut open = drm_tegra_channel_open {
            host1x_class: CLASS_VIC,
            ..Default::default()
        };
        assert_eq!(dispatch(&file, DRM_TEGRA_CHANNEL_OPEN, open.as_bytes_mut()), 0);
        assert_eq!(open.channel_ctx, 1);
        assert_eq!(open.hardware_version, 0x21);

        let mut close = drm_tegra_channel_close {
            channel_ctx: 5,
            reserved: 0,
        };
        assert_eq!(
            dispatch(&file, DRM_TEGRA_CHANNEL_CLOSE, close.as_bytes_mut()),
            Error::Invalid.to_errno()
        );
    }

    #[test]
    fn bad_requests() {
        let file = file();

        let mut short = [0u8; 4];
        assert_eq!(
            dispatch(&file, DRM_TEGRA_GEM_CREATE, &mut short),
            Error::Invalid.to_errno()
        );

        let mut args = [0u8; 16];
        assert_eq!(dispatch(&file, 0x7f, &mut args), Error::Invalid.to_errno());
    }

    #[test]
    fn copies_back_on_error() {
        let file = file();
        let sp = file
            .drm()
            .host()
            .syncpt_alloc(Default::default(), "ioctl")
            .unwrap();

        let mut wait = drm_tegra_syncpt_wait {
            id: sp.id(),
            thresh: sp.incr_max(1),
            timeout: 0,
            value: 0xdead,
        };
        assert_eq!(
            dispatch(&file, DRM_TEGRA_SYNCPT_WAIT, wait.as_bytes_mut()),
            Error::Again.to_errno()
        );
        assert_eq!(wait.value, sp.read_min());

        sp.cpu_incr();
    }
}
