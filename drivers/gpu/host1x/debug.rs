// SPDX-License-Identifier: GPL-2.0-only OR MIT
#![allow(dead_code)]

//! Debug enable/disable flags and convenience macros
//!
//! Each module picks a debug class with `const DEBUG_CLASS: DebugFlags = ...;`, and its
//! `mod_pr_debug!`/`mod_dev_dbg!` messages are only emitted when that class is enabled in the
//! global flags. The DRM driver sets the flags from its `debug_flags` parameter.

pub use crate::{
    cls_dev_dbg, cls_pr_debug, debug, dev_err, dev_info, dev_warn, mod_dev_dbg, mod_pr_debug,
};
use core::sync::atomic::{AtomicU64, Ordering};

static DEBUG_FLAGS: AtomicU64 = AtomicU64::new(0);

/// Debug flag bit indices
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DebugFlags {
    // 0-7: host1x core
    Channel = 0,
    Cdma = 1,
    Syncpt = 2,
    Intr = 3,
    Job = 4,
    Fence = 5,
    Iommu = 6,
    Hw = 7,

    // 8-15: DRM interface
    Drm = 8,
    File = 9,
    Submit = 10,
    Gem = 11,
    Context = 12,
    Vic = 13,

    // 32-: Behavior flags
    KeepEnginePowered = 32,
    NoJobTimeout = 33,

    // 48-: Misc
    Debug0 = 48,
    Debug1 = 49,
    Debug2 = 50,
    Debug3 = 51,
}

/// Replace the global debug flags
pub fn set_debug_flags(flags: u64) {
    DEBUG_FLAGS.store(flags, Ordering::Relaxed);
}

/// Returns the global debug flags
pub fn debug_flags() -> u64 {
    DEBUG_FLAGS.load(Ordering::Relaxed)
}

/// Check whether debug is enabled for a given flag
#[inline(always)]
pub fn debug_enabled(flag: DebugFlags) -> bool {
    DEBUG_FLAGS.load(Ordering::Relaxed) & 1 << (flag as usize) != 0
}

/// Run some code only if debug is enabled for the calling module
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        if $crate::debug::debug_enabled(DEBUG_CLASS) {
            $($arg)*
        }
    };
}

/// log::debug!() if debug is enabled for the calling module
#[macro_export]
macro_rules! mod_pr_debug (
    ($($arg:tt)*) => (
        $crate::debug! { $crate::log::debug!( $($arg)* ); }
    )
);

/// log::debug!() with a device prefix if debug is enabled for the calling module
#[macro_export]
macro_rules! mod_dev_dbg (
    ($dev:expr, $($arg:tt)*) => (
        $crate::debug! {
            $crate::log::debug!("{}: {}", $dev.name(), format_args!( $($arg)* ));
        }
    )
);

/// log::debug!() if debug is enabled for a specific module
#[macro_export]
macro_rules! cls_pr_debug (
    ($cls:ident, $($arg:tt)*) => (
        if $crate::debug::debug_enabled($crate::debug::DebugFlags::$cls) {
            $crate::log::debug!( $($arg)* );
        }
    )
);

/// log::debug!() with a device prefix if debug is enabled for a specific module
#[macro_export]
macro_rules! cls_dev_dbg (
    ($cls:ident, $dev:expr, $($arg:tt)*) => (
        if $crate::debug::debug_enabled($crate::debug::DebugFlags::$cls) {
            $crate::log::debug!("{}: {}", $dev.name(), format_args!( $($arg)* ));
        }
    )
);

/// log::error!() with a device prefix
#[macro_export]
macro_rules! dev_err (
    ($dev:expr, $($arg:tt)*) => (
        $crate::log::error!("{}: {}", $dev.name(), format_args!( $($arg)* ))
    )
);

/// log::warn!() with a device prefix
#[macro_export]
macro_rules! dev_warn (
    ($dev:expr, $($arg:tt)*) => (
        $crate::log::warn!("{}: {}", $dev.name(), format_args!( $($arg)* ))
    )
);

/// log::info!() with a device prefix
#[macro_export]
macro_rules! dev_info (
    ($dev:expr, $($arg:tt)*) => (
        $crate::log::info!("{}: {}", $dev.name(), format_args!( $($arg)* ))
    )
);
