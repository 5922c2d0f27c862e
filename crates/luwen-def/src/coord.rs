// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of core found at a NOC location.
#[derive(
    Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum CoreType {
    Arc,
    Dram,
    ActiveEth,
    IdleEth,
    Pcie,
    Tensix,
    RouterOnly,
    Security,
    L2Cpu,
    Harvested,
    Eth,
    Worker,
}

impl fmt::Display for CoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoreType::Arc => "ARC",
            CoreType::Dram => "DRAM",
            CoreType::ActiveEth => "ACTIVE_ETH",
            CoreType::IdleEth => "IDLE_ETH",
            CoreType::Pcie => "PCIE",
            CoreType::Tensix => "TENSIX",
            CoreType::RouterOnly => "ROUTER_ONLY",
            CoreType::Security => "SECURITY",
            CoreType::L2Cpu => "L2CPU",
            CoreType::Harvested => "HARVESTED",
            CoreType::Eth => "ETH",
            CoreType::Worker => "WORKER",
        };
        f.write_str(name)
    }
}

/// Coordinate system a [`CoreCoord`] is expressed in.
///
/// - `Noc0` is the raw wire layout read from hardware, oblivious to harvesting.
/// - `Noc1` is the same grid addressed from the second NOC, mirrored on both axes.
/// - `Logical` is dense and skips harvested rows/columns/banks.
/// - `Translated` is what routing firmware expects once NOC translation is enabled.
#[derive(
    Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum CoordSystem {
    Logical,
    Noc0,
    Noc1,
    Translated,
}

impl fmt::Display for CoordSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoordSystem::Logical => "LOGICAL",
            CoordSystem::Noc0 => "NOC0",
            CoordSystem::Noc1 => "NOC1",
            CoordSystem::Translated => "TRANSLATED",
        };
        f.write_str(name)
    }
}

/// A core location tagged with its core type and coordinate system.
///
/// Equality and ordering cover all four fields, so the same `(x, y)` in two
/// different systems are two different coordinates.
#[derive(
    Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CoreCoord {
    pub x: u32,
    pub y: u32,
    pub core_type: CoreType,
    pub coord_system: CoordSystem,
}

impl CoreCoord {
    pub const fn new(x: u32, y: u32, core_type: CoreType, coord_system: CoordSystem) -> Self {
        Self {
            x,
            y,
            core_type,
            coord_system,
        }
    }

    pub fn xy(&self) -> (u32, u32) {
        (self.x, self.y)
    }
}

impl fmt::Display for CoreCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.x, self.y, self.core_type, self.coord_system
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coord_system_is_part_of_identity() {
        let noc0 = CoreCoord::new(1, 1, CoreType::Tensix, CoordSystem::Noc0);
        let logical = CoreCoord::new(1, 1, CoreType::Tensix, CoordSystem::Logical);
        assert_ne!(noc0, logical);
        assert_eq!(noc0.xy(), logical.xy());
    }

    #[test]
    fn test_display() {
        let coord = CoreCoord::new(9, 6, CoreType::Eth, CoordSystem::Translated);
        assert_eq!(coord.to_string(), "(9, 6, ETH, TRANSLATED)");
    }
}
