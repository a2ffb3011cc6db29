// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Hardware configuration for Tegra124 platforms (host1x04).

use super::HwConfig;

pub const HWCONFIG: HwConfig = HwConfig {
    compatible: "nvidia,tegra124-host1x",
    version: 4,
    nb_channels: 12,
    nb_pts: 192,
    nb_bases: 64,
    nb_mlocks: 16,
    dma_mask: (1 << 34) - 1,
    pushbuffer_slots: 512,
    syncpt_index_bits: 8,
};
