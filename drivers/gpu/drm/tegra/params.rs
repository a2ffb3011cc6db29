// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Module parameters
//!
//! Parameters are given on the kernel command line as `tegra_drm.<name>=<value>` and applied
//! once, when the device is brought up. Tokens for other modules are ignored.
//!
//! | Name               | Default | Description                                        |
//! |--------------------|---------|----------------------------------------------------|
//! | `debug_flags`      | 0       | host1x debug class bitmask                         |
//! | `job_timeout_ms`   | 10000   | Timeout of submitted jobs                          |
//! | `max_gather_words` | 16383   | Maximum gather data words per submission           |
//! | `autosuspend_ms`   | 0       | Idle time before an engine is powered down         |

use crate::{Error, Result};
use host1x::hw::opcodes::GATHER_MAX_WORDS;
use std::time::Duration;

const PREFIX: &str = "tegra_drm.";

/// Module parameters of the Tegra DRM driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleParams {
    pub debug_flags: u64,
    pub job_timeout_ms: u32,
    pub max_gather_words: u32,
    pub autosuspend_ms: u32,
}

impl Default for ModuleParams {
    fn default() -> Self {
        ModuleParams {
            debug_flags: 0,
            job_timeout_ms: 10000,
            max_gather_words: GATHER_MAX_WORDS,
            autosuspend_ms: 0,
        }
    }
}

fn parse_u64(value: &str) -> Result<u64> {
    let parsed = match value.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|_| Error::Invalid)
}

fn parse_u32(value: &str) -> Result<u32> {
    u32::try_from(parse_u64(value)?).map_err(|_| Error::Invalid)
}

impl ModuleParams {
    /// Parses the `tegra_drm.*` parameters out of a kernel command line.
    pub fn parse(cmdline: &str) -> Result<ModuleParams> {
        let mut params = ModuleParams::default();

        for token in cmdline.split_whitespace() {
            let Some(param) = token.strip_prefix(PREFIX) else {
                continue;
            };
            let Some((name, value)) = param.split_once('=') else {
                log::warn!("tegra_drm: parameter '{}' needs a value", param);
                return Err(Error::Invalid);
            };

            match name {
                "debug_flags" => params.debug_flags = parse_u64(value)?,
                "job_timeout_ms" => params.job_timeout_ms = parse_u32(value)?,
                "max_gather_words" => {
                    let words = parse_u32(value)?;
                    if words == 0 || words > GATHER_MAX_WORDS {
                        return Err(Error::Invalid);
                    }
                    params.max_gather_words = words;
                }
                "autosuspend_ms" => params.autosuspend_ms = parse_u32(value)?,
                _ => log::warn!("tegra_drm: unknown parameter '{}' ignored", name),
            }
        }

        Ok(params)
    }

    /// Returns the job timeout.
    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms as u64)
    }

    /// Returns the engine autosuspend delay.
    pub fn autosuspend_delay(&self) -> Duration {
        Duration::from_millis(self.autosuspend_ms as u64)
    }

    /// Makes the parameters take effect.
    pub fn apply(&self) {
        host1x::debug::set_debug_flags(self.debug_flags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let params = ModuleParams::parse("console=ttyS0 quiet").unwrap();
        assert_eq!(params, ModuleParams::default());
        assert_eq!(params.job_timeout(), Duration::from_secs(10));
        assert_eq!(params.max_gather_words, 16383);
    }

    #[test]
    fn parse_values() {
        let params = ModuleParams::parse(
            "root=/dev/mmcblk0p1 tegra_drm.debug_flags=0x600 tegra_drm.job_timeout_ms=500 \
             tegra_drm.autosuspend_ms=50 tegra_drm.bogus=1",
        )
        .unwrap();
        assert_eq!(params.debug_flags, 0x600);
        assert_eq!(params.job_timeout(), Duration::from_millis(500));
        assert_eq!(params.autosuspend_ms, 50);
    }

    #[test]
    fn reject_bad_values() {
        assert_eq!(
            ModuleParams::parse("tegra_drm.max_gather_words=16384"),
            Err(Error::Invalid)
        );
        assert_eq!(
            ModuleParams::parse("tegra_drm.max_gather_words=0"),
            Err(Error::Invalid)
        );
        assert_eq!(
            ModuleParams::parse("tegra_drm.job_timeout_ms=ten"),
            Err(Error::Invalid)
        );
        assert_eq!(ModuleParams::parse("tegra_drm.debug_flags"), Err(Error::Invalid));
    }
}
