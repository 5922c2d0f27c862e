// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// Chip location as seen by the Wormhole routing firmware.
#[derive(
    Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct EthCoord {
    pub cluster_id: u32,
    pub x: u32,
    pub y: u32,
    pub rack: u32,
    pub shelf: u32,
}

impl EthCoord {
    pub fn new(x: u32, y: u32, rack: u32, shelf: u32) -> Self {
        Self {
            cluster_id: 0,
            x,
            y,
            rack,
            shelf,
        }
    }
}

impl std::fmt::Display for EthCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.x, self.y, self.rack, self.shelf
        )
    }
}
