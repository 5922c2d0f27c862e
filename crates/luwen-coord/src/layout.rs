// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Fixed NOC0 layouts for each architecture generation.

use luwen_def::{Arch, CoreType};

/// Which axis of the tensix grid harvesting removes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HarvestAxis {
    Row,
    Column,
}

/// NOC0 floorplan of one architecture generation.
///
/// All `*_cores` lists are in NOC order, which is also the order of the bits
/// in the matching harvesting mask. Grid sizes are `(x, y)`.
#[derive(Debug)]
pub struct SocLayout {
    pub arch: Arch,
    pub grid_size: (u32, u32),

    pub tensix_x: &'static [u32],
    pub tensix_y: &'static [u32],
    pub tensix_harvest_axis: HarvestAxis,

    /// `(banks, ports per bank)`; `dram_cores[bank * ports + port]`.
    pub dram_grid_size: (usize, usize),
    pub dram_cores: &'static [(u32, u32)],

    /// Indexed by physical ethernet channel.
    pub eth_cores: &'static [(u32, u32)],

    pub arc_grid_size: (usize, usize),
    pub arc_cores: &'static [(u32, u32)],

    pub pcie_grid_size: (usize, usize),
    pub pcie_cores: &'static [(u32, u32)],

    pub router_cores: &'static [(u32, u32)],
    pub security_cores: &'static [(u32, u32)],
    pub l2cpu_cores: &'static [(u32, u32)],

    pub noc0_x_to_noc1_x: &'static [u32],
    pub noc0_y_to_noc1_y: &'static [u32],

    /// Tensix rows/columns in the order the fuses report them.
    pub harvesting_noc_locations: &'static [u32],
}

impl SocLayout {
    pub fn get(arch: Arch) -> &'static SocLayout {
        match arch {
            Arch::Grayskull => &GRAYSKULL,
            Arch::Wormhole => &WORMHOLE,
            Arch::Blackhole => &BLACKHOLE,
        }
    }

    /// Tensix grid as `(columns, rows)` before harvesting.
    pub fn tensix_grid_size(&self) -> (usize, usize) {
        (self.tensix_x.len(), self.tensix_y.len())
    }

    /// Row-major walk over the tensix grid, yielding `(x index, y index, noc0)`.
    pub fn tensix_cores(&self) -> impl Iterator<Item = (usize, usize, (u32, u32))> + '_ {
        self.tensix_y.iter().enumerate().flat_map(move |(yi, y)| {
            self.tensix_x
                .iter()
                .enumerate()
                .map(move |(xi, x)| (xi, yi, (*x, *y)))
        })
    }

    /// NOC0 location of the tensix at grid index `(x, y)`.
    pub fn tensix_core(&self, x: usize, y: usize) -> (u32, u32) {
        (self.tensix_x[x], self.tensix_y[y])
    }

    /// The number of independently harvestable units for a core type.
    pub fn harvest_units(&self, core_type: CoreType) -> usize {
        match core_type {
            CoreType::Tensix => match self.tensix_harvest_axis {
                HarvestAxis::Row => self.tensix_y.len(),
                HarvestAxis::Column => self.tensix_x.len(),
            },
            CoreType::Dram => self.dram_grid_size.0,
            CoreType::Eth => self.eth_cores.len(),
            CoreType::Pcie => self.pcie_cores.len(),
            CoreType::L2Cpu => self.l2cpu_cores.len(),
            _ => 0,
        }
    }

    /// Every NOC0 location of a core type, harvested or not.
    pub fn noc0_cores(&self, core_type: CoreType) -> Option<Vec<(u32, u32)>> {
        let cores = match core_type {
            CoreType::Tensix => return Some(self.tensix_cores().map(|(_, _, c)| c).collect()),
            CoreType::Dram => self.dram_cores,
            CoreType::Eth => self.eth_cores,
            CoreType::Arc => self.arc_cores,
            CoreType::Pcie => self.pcie_cores,
            CoreType::RouterOnly => self.router_cores,
            CoreType::Security => self.security_cores,
            CoreType::L2Cpu => self.l2cpu_cores,
            _ => return None,
        };
        Some(cores.to_vec())
    }

    pub fn noc1(&self, noc0: (u32, u32)) -> Option<(u32, u32)> {
        let x = self.noc0_x_to_noc1_x.get(noc0.0 as usize)?;
        let y = self.noc0_y_to_noc1_y.get(noc0.1 as usize)?;
        Some((*x, *y))
    }
}

pub static GRAYSKULL: SocLayout = SocLayout {
    arch: Arch::Grayskull,
    grid_size: (13, 12),
    tensix_x: &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12],
    tensix_y: &[1, 2, 3, 4, 5, 7, 8, 9, 10, 11],
    tensix_harvest_axis: HarvestAxis::Row,
    dram_grid_size: (8, 1),
    dram_cores: &[
        (1, 6),
        (4, 6),
        (7, 6),
        (10, 6),
        (1, 0),
        (4, 0),
        (7, 0),
        (10, 0),
    ],
    eth_cores: &[],
    arc_grid_size: (1, 1),
    arc_cores: &[(0, 2)],
    pcie_grid_size: (1, 1),
    pcie_cores: &[(0, 4)],
    router_cores: &[],
    security_cores: &[],
    l2cpu_cores: &[],
    noc0_x_to_noc1_x: &[12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0],
    noc0_y_to_noc1_y: &[11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0],
    harvesting_noc_locations: &[5, 7, 4, 8, 3, 9, 2, 10, 1, 11],
};

pub static WORMHOLE: SocLayout = SocLayout {
    arch: Arch::Wormhole,
    grid_size: (10, 12),
    tensix_x: &[1, 2, 3, 4, 6, 7, 8, 9],
    tensix_y: &[1, 2, 3, 4, 5, 7, 8, 9, 10, 11],
    tensix_harvest_axis: HarvestAxis::Row,
    dram_grid_size: (6, 3),
    dram_cores: &[
        (0, 0),
        (0, 1),
        (0, 11),
        (0, 5),
        (0, 6),
        (0, 7),
        (5, 0),
        (5, 1),
        (5, 11),
        (5, 2),
        (5, 9),
        (5, 10),
        (5, 3),
        (5, 4),
        (5, 8),
        (5, 5),
        (5, 6),
        (5, 7),
    ],
    eth_cores: &[
        (9, 0),
        (1, 0),
        (8, 0),
        (2, 0),
        (7, 0),
        (3, 0),
        (6, 0),
        (4, 0),
        (9, 6),
        (1, 6),
        (8, 6),
        (2, 6),
        (7, 6),
        (3, 6),
        (6, 6),
        (4, 6),
    ],
    arc_grid_size: (1, 1),
    arc_cores: &[(0, 10)],
    pcie_grid_size: (1, 1),
    pcie_cores: &[(0, 3)],
    router_cores: &[(0, 2), (0, 4), (0, 8), (0, 9)],
    security_cores: &[],
    l2cpu_cores: &[],
    noc0_x_to_noc1_x: &[9, 8, 7, 6, 5, 4, 3, 2, 1, 0],
    noc0_y_to_noc1_y: &[11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0],
    harvesting_noc_locations: &[11, 1, 10, 2, 9, 3, 8, 4, 7, 5],
};

pub static BLACKHOLE: SocLayout = SocLayout {
    arch: Arch::Blackhole,
    grid_size: (17, 12),
    tensix_x: &[1, 2, 3, 4, 5, 6, 7, 10, 11, 12, 13, 14, 15, 16],
    tensix_y: &[2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
    tensix_harvest_axis: HarvestAxis::Column,
    dram_grid_size: (8, 3),
    dram_cores: &[
        (0, 0),
        (0, 1),
        (0, 11),
        (0, 2),
        (0, 10),
        (0, 3),
        (0, 9),
        (0, 4),
        (0, 8),
        (0, 5),
        (0, 7),
        (0, 6),
        (9, 0),
        (9, 1),
        (9, 11),
        (9, 2),
        (9, 10),
        (9, 3),
        (9, 9),
        (9, 4),
        (9, 8),
        (9, 5),
        (9, 7),
        (9, 6),
    ],
    eth_cores: &[
        (1, 1),
        (16, 1),
        (2, 1),
        (15, 1),
        (3, 1),
        (14, 1),
        (4, 1),
        (13, 1),
        (5, 1),
        (12, 1),
        (6, 1),
        (11, 1),
        (7, 1),
        (10, 1),
    ],
    arc_grid_size: (1, 1),
    arc_cores: &[(8, 0)],
    pcie_grid_size: (2, 1),
    pcie_cores: &[(2, 0), (11, 0)],
    router_cores: &[
        (1, 0),
        (3, 0),
        (4, 0),
        (5, 0),
        (6, 0),
        (7, 0),
        (10, 0),
        (12, 0),
        (13, 0),
        (14, 0),
        (15, 0),
        (16, 0),
        (8, 1),
        (8, 10),
        (8, 8),
        (8, 6),
        (8, 4),
        (8, 11),
    ],
    security_cores: &[(8, 2)],
    l2cpu_cores: &[(8, 3), (8, 5), (8, 7), (8, 9)],
    noc0_x_to_noc1_x: &[16, 15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0],
    noc0_y_to_noc1_y: &[11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0],
    harvesting_noc_locations: &[1, 16, 2, 15, 3, 14, 4, 13, 5, 12, 6, 11, 7, 10],
};
