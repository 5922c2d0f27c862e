// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use luwen_def::{Arch, BoardType, CoordSystem, CoreCoord, CoreType, HarvestingMasks};

use crate::error::CoordinateError;
use crate::layout::{HarvestAxis, SocLayout};
use crate::{blackhole, grayskull, wormhole};

type Xy = (u32, u32);

pub(crate) fn is_harvested(mask: u32, index: usize) -> bool {
    index < 32 && mask & (1 << index) != 0
}

/// Accumulates the coordinate maps while a [`CoordinateManager`] is built.
///
/// Insertions never overwrite: the first mapping recorded for a coordinate
/// wins, which lets the generation specific fills run after the identity pass.
pub(crate) struct MapBuilder {
    pub(crate) layout: &'static SocLayout,
    pub(crate) masks: HarvestingMasks,
    pub(crate) translation_enabled: bool,
    to_noc0: HashMap<CoreCoord, Xy>,
    from_noc0: HashMap<(Xy, CoordSystem), CoreCoord>,
    core_types: HashMap<(Xy, CoordSystem), CoreCoord>,
}

impl MapBuilder {
    fn new(layout: &'static SocLayout, masks: HarvestingMasks, translation_enabled: bool) -> Self {
        Self {
            layout,
            masks,
            translation_enabled,
            to_noc0: HashMap::new(),
            from_noc0: HashMap::new(),
            core_types: HashMap::new(),
        }
    }

    pub(crate) fn add(&mut self, coord: CoreCoord, noc0: Xy) {
        self.to_noc0.entry(coord).or_insert(noc0);
        self.from_noc0
            .entry((noc0, coord.coord_system))
            .or_insert(coord);
        if coord.coord_system != CoordSystem::Logical {
            self.core_types
                .entry((coord.xy(), coord.coord_system))
                .or_insert(coord);
        }
    }

    pub(crate) fn add_logical(&mut self, x: usize, y: usize, core_type: CoreType, noc0: Xy) {
        self.add(
            CoreCoord::new(x as u32, y as u32, core_type, CoordSystem::Logical),
            noc0,
        );
    }

    pub(crate) fn add_translated(&mut self, translated: Xy, core_type: CoreType, noc0: Xy) {
        self.add(
            CoreCoord::new(
                translated.0,
                translated.1,
                core_type,
                CoordSystem::Translated,
            ),
            noc0,
        );
    }

    /// NOC0 location of an already assigned logical coordinate.
    pub(crate) fn logical_noc0(
        &self,
        x: usize,
        y: usize,
        core_type: CoreType,
    ) -> Result<Xy, CoordinateError> {
        let coord = CoreCoord::new(x as u32, y as u32, core_type, CoordSystem::Logical);
        self.to_noc0
            .get(&coord)
            .copied()
            .ok_or(CoordinateError::CoordinateNotFound {
                coord,
                system: CoordSystem::Noc0,
            })
    }

    pub(crate) fn identity_translated(&mut self, core_type: CoreType) {
        for core in self.layout.noc0_cores(core_type).unwrap_or_default() {
            self.add_translated(core, core_type, core);
        }
    }

    fn identity_map_noc0(&mut self) {
        for core_type in NOC0_CORE_TYPES {
            for core in self.layout.noc0_cores(core_type).unwrap_or_default() {
                self.add(
                    CoreCoord::new(core.0, core.1, core_type, CoordSystem::Noc0),
                    core,
                );
            }
        }
    }

    fn translate_logical(&mut self) {
        let layout = self.layout;
        let masks = self.masks;

        let (grid_x, grid_y) = layout.tensix_grid_size();
        match layout.tensix_harvest_axis {
            HarvestAxis::Row => {
                let mut logical_y = 0;
                for y in (0..grid_y).filter(|y| !is_harvested(masks.tensix, *y)) {
                    for x in 0..grid_x {
                        self.add_logical(x, logical_y, CoreType::Tensix, layout.tensix_core(x, y));
                    }
                    logical_y += 1;
                }
            }
            HarvestAxis::Column => {
                let mut logical_x = 0;
                for x in (0..grid_x).filter(|x| !is_harvested(masks.tensix, *x)) {
                    for y in 0..grid_y {
                        self.add_logical(logical_x, y, CoreType::Tensix, layout.tensix_core(x, y));
                    }
                    logical_x += 1;
                }
            }
        }

        self.logical_grid(
            CoreType::Dram,
            layout.dram_grid_size,
            layout.dram_cores,
            masks.dram,
        );
        self.logical_grid(CoreType::Arc, layout.arc_grid_size, layout.arc_cores, 0);
        self.logical_grid(
            CoreType::Pcie,
            layout.pcie_grid_size,
            layout.pcie_cores,
            masks.pcie,
        );

        let eth = (0..layout.eth_cores.len()).filter(|c| !is_harvested(masks.eth, *c));
        for (logical, channel) in eth.enumerate() {
            self.add_logical(0, logical, CoreType::Eth, layout.eth_cores[channel]);
        }

        let l2cpu = (0..layout.l2cpu_cores.len()).filter(|c| !is_harvested(masks.l2cpu, *c));
        for (logical, index) in l2cpu.enumerate() {
            self.add_logical(0, logical, CoreType::L2Cpu, layout.l2cpu_cores[index]);
        }
    }

    /// Column-major `(x, y)` grid where the mask harvests whole `x` columns.
    fn logical_grid(&mut self, core_type: CoreType, grid: (usize, usize), cores: &[Xy], mask: u32) {
        let mut logical_x = 0;
        for x in (0..grid.0).filter(|x| !is_harvested(mask, *x)) {
            for y in 0..grid.1 {
                self.add_logical(logical_x, y, core_type, cores[x * grid.1 + y]);
            }
            logical_x += 1;
        }
    }

    fn add_noc1(&mut self) {
        for core_type in NOC0_CORE_TYPES {
            for core in self.layout.noc0_cores(core_type).unwrap_or_default() {
                if let Some((x, y)) = self.layout.noc1(core) {
                    self.add(CoreCoord::new(x, y, core_type, CoordSystem::Noc1), core);
                }
            }
        }
    }

    fn check_bijective(&self) -> Result<(), CoordinateError> {
        for (coord, noc0) in &self.to_noc0 {
            match self.from_noc0.get(&(*noc0, coord.coord_system)) {
                Some(back) if back == coord => {}
                _ => {
                    return Err(CoordinateError::NotBijective {
                        coord: *coord,
                        noc0: *noc0,
                    })
                }
            }
        }
        Ok(())
    }
}

const NOC0_CORE_TYPES: [CoreType; 8] = [
    CoreType::Tensix,
    CoreType::Dram,
    CoreType::Eth,
    CoreType::Arc,
    CoreType::Pcie,
    CoreType::RouterOnly,
    CoreType::Security,
    CoreType::L2Cpu,
];

/// Translates core coordinates between the NOC0, NOC1, logical and
/// translated coordinate systems of one chip.
///
/// Built once from the architecture and harvesting masks and never mutated
/// afterwards, so it can be shared freely between threads.
#[derive(Debug, Clone)]
pub struct CoordinateManager {
    arch: Arch,
    board_type: BoardType,
    is_remote: bool,
    noc_translation_enabled: bool,
    masks: HarvestingMasks,
    layout: &'static SocLayout,
    to_noc0: HashMap<CoreCoord, Xy>,
    from_noc0: HashMap<(Xy, CoordSystem), CoreCoord>,
    core_types: HashMap<(Xy, CoordSystem), CoreCoord>,
}

impl CoordinateManager {
    /// Build and validate the coordinate maps for one chip.
    ///
    /// `masks` are in NOC order, use [`Self::shuffle_tensix_harvesting_mask`]
    /// to convert a fused tensix mask first.
    pub fn create(
        arch: Arch,
        noc_translation_enabled: bool,
        masks: HarvestingMasks,
        board_type: BoardType,
        is_remote: bool,
    ) -> Result<Self, CoordinateError> {
        let layout = SocLayout::get(arch);
        validate(layout, &masks)?;

        tracing::debug!(
            %arch,
            ?masks,
            noc_translation_enabled,
            %board_type,
            "Building coordinate manager"
        );

        let mut builder = MapBuilder::new(layout, masks, noc_translation_enabled);
        builder.identity_map_noc0();
        builder.translate_logical();
        match arch {
            Arch::Grayskull => grayskull::fill_translated(&mut builder)?,
            Arch::Wormhole => wormhole::fill_translated(&mut builder)?,
            Arch::Blackhole => blackhole::fill_translated(&mut builder)?,
        }
        for core_type in [CoreType::RouterOnly, CoreType::Security, CoreType::L2Cpu] {
            builder.identity_translated(core_type);
        }
        builder.add_noc1();
        builder.check_bijective()?;

        Ok(Self {
            arch,
            board_type,
            is_remote,
            noc_translation_enabled,
            masks,
            layout,
            to_noc0: builder.to_noc0,
            from_noc0: builder.from_noc0,
            core_types: builder.core_types,
        })
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn board_type(&self) -> BoardType {
        self.board_type
    }

    pub fn is_remote(&self) -> bool {
        self.is_remote
    }

    pub fn noc_translation_enabled(&self) -> bool {
        self.noc_translation_enabled
    }

    pub fn harvesting_masks(&self) -> HarvestingMasks {
        self.masks
    }

    pub fn layout(&self) -> &'static SocLayout {
        self.layout
    }

    /// Translate `coord` into `system`.
    pub fn translate(
        &self,
        coord: CoreCoord,
        system: CoordSystem,
    ) -> Result<CoreCoord, CoordinateError> {
        let noc0 = self
            .to_noc0
            .get(&coord)
            .ok_or(CoordinateError::CoordinateNotFound {
                coord,
                system: coord.coord_system,
            })?;
        self.from_noc0
            .get(&(*noc0, system))
            .copied()
            .ok_or(CoordinateError::CoordinateNotFound { coord, system })
    }

    /// Resolve the core sitting at `(x, y)` in a physical system.
    pub fn coord_at(&self, x: u32, y: u32, system: CoordSystem) -> Result<CoreCoord, CoordinateError> {
        if system == CoordSystem::Logical {
            return Err(CoordinateError::AmbiguousLogical);
        }
        self.core_types
            .get(&((x, y), system))
            .copied()
            .ok_or(CoordinateError::NoCoreAt { x, y, system })
    }

    pub fn translate_xy(
        &self,
        x: u32,
        y: u32,
        from: CoordSystem,
        to: CoordSystem,
    ) -> Result<CoreCoord, CoordinateError> {
        let coord = self.coord_at(x, y, from)?;
        self.translate(coord, to)
    }

    fn noc0_cores(&self, core_type: CoreType, harvested: bool) -> Result<Vec<Xy>, CoordinateError> {
        let layout = self.layout;
        let masks = &self.masks;
        let cores: Vec<(Xy, bool)> = match core_type {
            CoreType::Tensix => layout
                .tensix_cores()
                .map(|(x, y, core)| {
                    let index = match layout.tensix_harvest_axis {
                        HarvestAxis::Row => y,
                        HarvestAxis::Column => x,
                    };
                    (core, is_harvested(masks.tensix, index))
                })
                .collect(),
            CoreType::Dram => {
                let ports = layout.dram_grid_size.1;
                indexed(layout.dram_cores, |i| is_harvested(masks.dram, i / ports))
            }
            CoreType::Eth => indexed(layout.eth_cores, |i| is_harvested(masks.eth, i)),
            CoreType::Pcie => {
                let per_x = layout.pcie_grid_size.1;
                indexed(layout.pcie_cores, |i| is_harvested(masks.pcie, i / per_x))
            }
            CoreType::L2Cpu => indexed(layout.l2cpu_cores, |i| is_harvested(masks.l2cpu, i)),
            CoreType::Arc => indexed(layout.arc_cores, |_| false),
            CoreType::RouterOnly => indexed(layout.router_cores, |_| false),
            CoreType::Security => indexed(layout.security_cores, |_| false),
            other => return Err(CoordinateError::UnsupportedCoreType(other)),
        };

        Ok(cores
            .into_iter()
            .filter(|(_, h)| *h == harvested)
            .map(|(core, _)| core)
            .collect())
    }

    fn snapshot(
        &self,
        cores: Vec<Xy>,
        core_type: CoreType,
        system: CoordSystem,
    ) -> Result<Vec<CoreCoord>, CoordinateError> {
        cores
            .into_iter()
            .map(|(x, y)| self.translate(CoreCoord::new(x, y, core_type, CoordSystem::Noc0), system))
            .collect()
    }

    /// Every unharvested core of `core_type`, in NOC order, expressed in `system`.
    pub fn get_cores(
        &self,
        core_type: CoreType,
        system: CoordSystem,
    ) -> Result<Vec<CoreCoord>, CoordinateError> {
        self.snapshot(self.noc0_cores(core_type, false)?, core_type, system)
    }

    /// Every harvested core of `core_type`; these have no logical coordinate.
    pub fn get_harvested_cores(
        &self,
        core_type: CoreType,
        system: CoordSystem,
    ) -> Result<Vec<CoreCoord>, CoordinateError> {
        self.snapshot(self.noc0_cores(core_type, true)?, core_type, system)
    }

    /// Logical grid size `(x, y)` left after harvesting.
    pub fn get_grid_size(&self, core_type: CoreType) -> Result<(usize, usize), CoordinateError> {
        let layout = self.layout;
        let harvested = |mask: u32| Self::num_harvested(mask) as usize;
        let size = match core_type {
            CoreType::Tensix => {
                let (x, y) = layout.tensix_grid_size();
                match layout.tensix_harvest_axis {
                    HarvestAxis::Row => (x, y - harvested(self.masks.tensix)),
                    HarvestAxis::Column => (x - harvested(self.masks.tensix), y),
                }
            }
            CoreType::Dram => {
                let (banks, ports) = layout.dram_grid_size;
                (banks - harvested(self.masks.dram), ports)
            }
            CoreType::Eth => (1, layout.eth_cores.len() - harvested(self.masks.eth)),
            CoreType::Arc => layout.arc_grid_size,
            CoreType::Pcie => {
                let (x, y) = layout.pcie_grid_size;
                (x - harvested(self.masks.pcie), y)
            }
            CoreType::L2Cpu => (1, layout.l2cpu_cores.len() - harvested(self.masks.l2cpu)),
            other => return Err(CoordinateError::UnsupportedCoreType(other)),
        };
        Ok(size)
    }

    /// Size `(x, y)` of the harvested part of a grid, `(0, 0)` when nothing is harvested.
    pub fn get_harvested_grid_size(
        &self,
        core_type: CoreType,
    ) -> Result<(usize, usize), CoordinateError> {
        let layout = self.layout;
        let mask = match core_type {
            CoreType::Tensix => self.masks.tensix,
            CoreType::Dram => self.masks.dram,
            CoreType::Eth => self.masks.eth,
            CoreType::Pcie => self.masks.pcie,
            CoreType::L2Cpu => self.masks.l2cpu,
            CoreType::Arc => 0,
            other => return Err(CoordinateError::UnsupportedCoreType(other)),
        };
        let count = Self::num_harvested(mask) as usize;
        if count == 0 {
            return Ok((0, 0));
        }

        let size = match core_type {
            CoreType::Tensix => {
                let (x, y) = layout.tensix_grid_size();
                match layout.tensix_harvest_axis {
                    HarvestAxis::Row => (x, count),
                    HarvestAxis::Column => (count, y),
                }
            }
            CoreType::Dram => (count, layout.dram_grid_size.1),
            CoreType::Pcie => (count, layout.pcie_grid_size.1),
            _ => (1, count),
        };
        Ok(size)
    }

    /// Ethernet channels left after harvesting.
    pub fn num_eth_channels(&self) -> usize {
        self.layout.eth_cores.len() - Self::num_harvested(self.masks.eth) as usize
    }

    pub fn num_harvested(mask: u32) -> u32 {
        mask.count_ones()
    }

    /// Convert a tensix mask in fuse (die) order into NOC order.
    ///
    /// Bits past the end of the architecture's harvesting table are dropped.
    pub fn shuffle_tensix_harvesting_mask(arch: Arch, physical_layout: u32) -> u32 {
        let locations = SocLayout::get(arch).harvesting_noc_locations;
        let mut sorted = locations.to_vec();
        sorted.sort_unstable();

        let mut mask = 0;
        for (pos, location) in locations.iter().enumerate() {
            if is_harvested(physical_layout, pos) {
                if let Ok(sorted_pos) = sorted.binary_search(location) {
                    mask |= 1u32 << sorted_pos;
                }
            }
        }
        mask
    }

    /// Convert a NOC ordered tensix mask into a mask of NOC0 row/column numbers.
    pub fn shuffle_tensix_harvesting_mask_to_noc0_coords(arch: Arch, logical_layout: u32) -> u32 {
        let mut sorted = SocLayout::get(arch).harvesting_noc_locations.to_vec();
        sorted.sort_unstable();

        sorted
            .iter()
            .enumerate()
            .filter(|(pos, _)| is_harvested(logical_layout, *pos))
            .fold(0, |mask, (_, location)| mask | (1u32 << *location))
    }

    /// Convert the L2CPU enable fuses into a NOC ordered harvesting mask.
    pub fn shuffle_l2cpu_harvesting_mask(
        arch: Arch,
        enabled_physical_layout: u32,
    ) -> Result<u32, CoordinateError> {
        if arch != Arch::Blackhole {
            return Err(CoordinateError::UnsupportedHarvesting {
                arch,
                reason: "L2CPU cores are only present on Blackhole".to_string(),
            });
        }

        let disabled = !enabled_physical_layout;
        // fuse bit -> noc order bit
        let order: [(u32, u32); 4] = [(0, 0), (1, 3), (2, 1), (3, 2)];
        Ok(order
            .iter()
            .filter(|(fuse, _)| disabled & (1u32 << *fuse) != 0)
            .fold(0, |mask, (_, noc)| mask | (1u32 << *noc)))
    }
}

fn indexed(cores: &[Xy], harvested: impl Fn(usize) -> bool) -> Vec<(Xy, bool)> {
    cores
        .iter()
        .enumerate()
        .map(|(i, core)| (*core, harvested(i)))
        .collect()
}

fn validate(layout: &SocLayout, masks: &HarvestingMasks) -> Result<(), CoordinateError> {
    let arch = layout.arch;
    for (core_type, mask) in [
        (CoreType::Tensix, masks.tensix),
        (CoreType::Dram, masks.dram),
        (CoreType::Eth, masks.eth),
        (CoreType::Pcie, masks.pcie),
        (CoreType::L2Cpu, masks.l2cpu),
    ] {
        let available = layout.harvest_units(core_type);
        let count = CoordinateManager::num_harvested(mask);
        let out_of_range = available < 32 && mask >> available != 0;
        if count as usize > available || out_of_range {
            return Err(CoordinateError::TooManyHarvested {
                arch,
                core_type,
                count,
                available,
            });
        }
    }

    match arch {
        Arch::Blackhole => blackhole::validate(layout, masks),
        Arch::Grayskull | Arch::Wormhole => {
            for (core_type, mask) in [
                (CoreType::Dram, masks.dram),
                (CoreType::Eth, masks.eth),
                (CoreType::Pcie, masks.pcie),
                (CoreType::L2Cpu, masks.l2cpu),
            ] {
                if mask != 0 {
                    return Err(CoordinateError::UnsupportedHarvesting {
                        arch,
                        reason: format!("{core_type} harvesting is supported only for Blackhole"),
                    });
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_harvested() {
        assert_eq!(CoordinateManager::num_harvested(0), 0);
        assert_eq!(CoordinateManager::num_harvested(0b1011), 3);
    }

    #[test]
    fn test_shuffle_tensix_mask() {
        // Wormhole fuse bit 0 is noc row 11, the last row in noc order.
        assert_eq!(
            CoordinateManager::shuffle_tensix_harvesting_mask(Arch::Wormhole, 0b1),
            1 << 9
        );
        // Fuse bit 1 is noc row 1.
        assert_eq!(
            CoordinateManager::shuffle_tensix_harvesting_mask(Arch::Wormhole, 0b10),
            1
        );
        // Blackhole fuse bit 1 is column x=16, the last column.
        assert_eq!(
            CoordinateManager::shuffle_tensix_harvesting_mask(Arch::Blackhole, 0b10),
            1 << 13
        );
        assert_eq!(
            CoordinateManager::shuffle_tensix_harvesting_mask(Arch::Grayskull, 0),
            0
        );
    }

    #[test]
    fn test_shuffle_to_noc0_coords() {
        assert_eq!(
            CoordinateManager::shuffle_tensix_harvesting_mask_to_noc0_coords(Arch::Wormhole, 0b11),
            (1 << 1) | (1 << 2)
        );
        assert_eq!(
            CoordinateManager::shuffle_tensix_harvesting_mask_to_noc0_coords(Arch::Blackhole, 1 << 7),
            1 << 10
        );
    }

    #[test]
    fn test_shuffle_l2cpu_mask() {
        assert_eq!(
            CoordinateManager::shuffle_l2cpu_harvesting_mask(Arch::Blackhole, 0xF),
            Ok(0)
        );
        assert_eq!(
            CoordinateManager::shuffle_l2cpu_harvesting_mask(Arch::Blackhole, 0b1101),
            Ok(1 << 3)
        );
        assert_eq!(
            CoordinateManager::shuffle_l2cpu_harvesting_mask(Arch::Blackhole, 0b0111),
            Ok(1 << 2)
        );
        assert!(CoordinateManager::shuffle_l2cpu_harvesting_mask(Arch::Wormhole, 0).is_err());
    }

    #[test]
    fn test_translate_xy_rejects_logical() {
        let manager = CoordinateManager::create(
            Arch::Wormhole,
            true,
            HarvestingMasks::default(),
            BoardType::N150,
            false,
        )
        .unwrap();
        assert_eq!(
            manager.translate_xy(0, 0, CoordSystem::Logical, CoordSystem::Noc0),
            Err(CoordinateError::AmbiguousLogical)
        );
        assert_eq!(
            manager.translate_xy(0, 10, CoordSystem::Noc0, CoordSystem::Translated),
            Ok(CoreCoord::new(0, 10, CoreType::Arc, CoordSystem::Translated))
        );
        assert!(matches!(
            manager.translate_xy(0, 2, CoordSystem::Noc0, CoordSystem::Logical),
            Err(CoordinateError::CoordinateNotFound { .. })
        ));
    }

    #[test]
    fn test_mask_out_of_range() {
        let err = CoordinateManager::create(
            Arch::Wormhole,
            false,
            HarvestingMasks::default().with_tensix(1 << 10),
            BoardType::N150,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, CoordinateError::TooManyHarvested { .. }));
    }
}
