// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

mod board;
mod coord;
mod eth;
mod harvesting;

pub use board::BoardType;
pub use coord::{CoordSystem, CoreCoord, CoreType};
pub use eth::EthCoord;
pub use harvesting::HarvestingMasks;

/// Logical chip id assigned by topology discovery.
pub type ChipId = u32;

/// Logical ethernet channel on a chip.
pub type EthChannel = u32;

/// Architecture generation.
///
/// Model specifier for a Tenstorrent architecture generation.
#[derive(
    Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Arch {
    /// Grayskull.
    ///
    /// # Note
    ///
    /// Grayskull has no ethernet, so it only ever shows up as a single local chip.
    #[serde(rename = "grayskull")]
    Grayskull,
    /// Wormhole.
    #[default]
    #[serde(rename = "wormhole_b0", alias = "wormhole")]
    Wormhole,
    /// Blackhole.
    #[serde(rename = "blackhole")]
    Blackhole,
}

impl Arch {
    /// Checks if the architecture is [`Arch::Grayskull`].
    pub fn is_grayskull(&self) -> bool {
        matches!(self, Arch::Grayskull)
    }

    /// Checks if the architecture is [`Arch::Wormhole`].
    pub fn is_wormhole(&self) -> bool {
        matches!(self, Arch::Wormhole)
    }

    /// Checks if the architecture is [`Arch::Blackhole`].
    pub fn is_blackhole(&self) -> bool {
        matches!(self, Arch::Blackhole)
    }

    /// Name used in cluster descriptor files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Grayskull => "grayskull",
            Arch::Wormhole => "wormhole_b0",
            Arch::Blackhole => "blackhole",
        }
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "grayskull" => Ok(Arch::Grayskull),
            "wormhole" | "wormhole_b0" => Ok(Arch::Wormhole),
            "blackhole" => Ok(Arch::Blackhole),
            err => Err(err.to_string()),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
