// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// Per core-type harvesting bitmasks.
///
/// Masks are in NOC order: bit `n` refers to the `n`th row, column, bank or
/// channel as it appears when walking the NOC0 layout.
#[derive(
    Clone, Copy, Debug, Default, Hash, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct HarvestingMasks {
    pub tensix: u32,
    pub dram: u32,
    pub eth: u32,
    pub pcie: u32,
    pub l2cpu: u32,
}

impl HarvestingMasks {
    pub fn with_tensix(mut self, mask: u32) -> Self {
        self.tensix = mask;
        self
    }

    pub fn with_dram(mut self, mask: u32) -> Self {
        self.dram = mask;
        self
    }

    pub fn with_eth(mut self, mask: u32) -> Self {
        self.eth = mask;
        self
    }

    pub fn with_pcie(mut self, mask: u32) -> Self {
        self.pcie = mask;
        self
    }

    pub fn with_l2cpu(mut self, mask: u32) -> Self {
        self.l2cpu = mask;
        self
    }
}
